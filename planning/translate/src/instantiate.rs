//! Instantiation of the normalized task into propositional actions and axioms.
//!
//! Only the instances that appear in the model of the grounding program are produced. Atoms of
//! predicates that no action or axiom can modify are evaluated against the initial state and removed
//! from the conditions.

use std::fmt::{Display, Formatter};

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use tracing::{debug, info};

use crate::datalog::model::compute_model;
use crate::datalog::{Program, Relation};
use crate::errors::{Message, TranslateError};
use crate::limits::Budget;
use crate::sym::Sym;
use crate::task::{Action, Args, Atom, Axiom, Condition, CostExpr, Effect, Literal, Pred, Task};

/// A conditional effect of a ground action: the atom is set if all literals of the condition hold.
pub type CondEffect = (Vec<Literal>, Atom);

/// A ground action, whose conditions only mention fluent atoms.
#[derive(Clone, Debug)]
pub struct PropositionalAction {
    /// e.g. `(move a b)`
    pub name: String,
    pub precondition: Vec<Literal>,
    pub add_effects: Vec<CondEffect>,
    /// Delete effects, excluding those whose atom is added under the same condition.
    pub del_effects: Vec<CondEffect>,
    pub cost: i64,
}

impl Display for PropositionalAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.name)?;
        for lit in &self.precondition {
            writeln!(f, "PRE: {lit}")?;
        }
        for (cond, atom) in &self.add_effects {
            writeln!(f, "ADD: {} -> {atom}", cond.iter().format(", "))?;
        }
        for (cond, atom) in &self.del_effects {
            writeln!(f, "DEL: {} -> {atom}", cond.iter().format(", "))?;
        }
        write!(f, "cost: {}", self.cost)
    }
}

/// A ground axiom: `effect` is derived when all literals of `condition` hold.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct PropositionalAxiom {
    pub name: String,
    pub condition: Vec<Literal>,
    pub effect: Atom,
}

impl Display for PropositionalAxiom {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.name)?;
        for lit in &self.condition {
            writeln!(f, "PRE: {lit}")?;
        }
        write!(f, "EFF: {}", self.effect)
    }
}

/// Result of the instantiation of a task.
#[derive(Clone, Debug)]
pub struct GroundTask {
    /// Whether the goal is reachable when ignoring negative conditions and delete effects.
    /// If not, all other fields are empty.
    pub relaxed_reachable: bool,
    /// Reachable atoms of fluent predicates, in the order in which they were derived.
    pub atoms: Vec<Atom>,
    pub actions: Vec<PropositionalAction>,
    /// Sorted propositional axioms
    pub axioms: Vec<PropositionalAxiom>,
    /// Fluent literals of the goal, `None` if a static literal of the goal is false.
    pub goal: Option<Vec<Literal>>,
    /// For each action schema (by index), the arguments of all its reachable instances.
    pub reachable_action_parameters: HashMap<usize, Vec<Args>>,
}

impl GroundTask {
    fn unreachable() -> GroundTask {
        GroundTask {
            relaxed_reachable: false,
            atoms: Vec::new(),
            actions: Vec::new(),
            axioms: Vec::new(),
            goal: None,
            reachable_action_parameters: HashMap::new(),
        }
    }
}

/// Raised when a static literal of a condition is false in the initial state.
struct Impossible;

/// Everything that is needed to evaluate the conditions of a ground schema.
struct Context<'a> {
    task: &'a Task,
    init: HashSet<Atom>,
    fluent: HashSet<Atom>,
    objects_by_type: HashMap<Sym, Vec<Sym>>,
}

impl Context<'_> {
    /// Appends the fluent literals of a (literal conjunction) condition to `out`.
    fn instantiate_condition(
        &self,
        condition: &Condition,
        binding: &HashMap<Sym, Sym>,
        out: &mut Vec<Literal>,
    ) -> Result<(), Impossible> {
        for lit in condition.literals() {
            let lit = lit.rename(binding);
            if self.fluent.contains(&lit.atom) {
                out.push(lit);
            } else if self.init.contains(&lit.atom) == lit.negated {
                return Err(Impossible);
            }
        }
        Ok(())
    }

    fn instantiate_effect(&self, effect: &Effect, binding: &mut HashMap<Sym, Sym>, out: &mut Vec<(Vec<Literal>, Literal)>) {
        if effect.parameters.is_empty() {
            self.instantiate_simple_effect(effect, binding, out);
            return;
        }
        let domains = effect
            .parameters
            .iter()
            .map(|p| self.objects_by_type.get(&p.tpe).map(|objs| objs.as_slice()).unwrap_or_default())
            .collect_vec();
        if domains.iter().any(|d| d.is_empty()) {
            return;
        }
        for objects in domains.iter().map(|d| d.iter()).multi_cartesian_product() {
            for (param, obj) in effect.parameters.iter().zip(objects) {
                binding.insert(param.name.clone(), obj.clone());
            }
            self.instantiate_simple_effect(effect, binding, out);
        }
        for param in &effect.parameters {
            binding.remove(&param.name);
        }
    }

    fn instantiate_simple_effect(&self, effect: &Effect, binding: &HashMap<Sym, Sym>, out: &mut Vec<(Vec<Literal>, Literal)>) {
        let mut condition = Vec::new();
        if self.instantiate_condition(&effect.condition, binding, &mut condition).is_err() {
            return;
        }
        let lit = effect.literal.rename(binding);
        // an unreachable atom can neither be added nor deleted
        if self.fluent.contains(&lit.atom) {
            out.push((condition, lit));
        }
    }

    fn cost(&self, action: &Action, name: &str, binding: &HashMap<Sym, Sym>) -> Result<i64, TranslateError> {
        if !self.task.use_min_cost_metric {
            return Ok(1);
        }
        match &action.cost {
            None => Ok(0),
            Some(CostExpr::Constant(c)) => Ok(*c),
            Some(CostExpr::Function(f)) => {
                let ground = f.rename(binding);
                match self.task.init_assignments.get(&ground) {
                    Some(&value) if value >= 0 => Ok(value),
                    Some(&value) => Err(Message::error(format!("Negative cost {value} for action {name}")).into()),
                    None => {
                        Err(Message::error(format!("No initial value for `{ground}`, the cost of action {name}")).into())
                    }
                }
            }
        }
    }

    fn instantiate_action(
        &self,
        action: &Action,
        args: &[Sym],
    ) -> Result<Option<PropositionalAction>, TranslateError> {
        let mut binding: HashMap<Sym, Sym> = action
            .parameters
            .iter()
            .map(|p| p.name.clone())
            .zip(args.iter().cloned())
            .collect();
        let name = instance_name(&action.name, &args[..action.num_external]);

        let mut precondition = Vec::new();
        if self.instantiate_condition(&action.precondition, &binding, &mut precondition).is_err() {
            return Ok(None);
        }
        let mut effects = Vec::new();
        for effect in &action.effects {
            self.instantiate_effect(effect, &mut binding, &mut effects);
        }
        if effects.is_empty() {
            return Ok(None);
        }
        let cost = self.cost(action, &name, &binding)?;

        let mut add_effects = Vec::new();
        for (cond, lit) in &effects {
            if !lit.negated {
                add_effects.push((cond.clone(), lit.atom.clone()));
            }
        }
        let mut del_effects = Vec::new();
        for (cond, lit) in effects {
            if lit.negated && !add_effects.iter().any(|(c, a)| c == &cond && a == &lit.atom) {
                del_effects.push((cond, lit.atom));
            }
        }
        Ok(Some(PropositionalAction {
            name,
            precondition,
            add_effects,
            del_effects,
            cost,
        }))
    }

    fn instantiate_axiom(&self, axiom: &Axiom, args: &[Sym]) -> Option<PropositionalAxiom> {
        let binding: HashMap<Sym, Sym> = axiom
            .parameters
            .iter()
            .map(|p| p.name.clone())
            .zip(args.iter().cloned())
            .collect();
        let external = &args[..axiom.num_external];
        let mut condition = Vec::new();
        self.instantiate_condition(&axiom.condition, &binding, &mut condition).ok()?;
        Some(PropositionalAxiom {
            name: instance_name(&axiom.name, external),
            condition,
            effect: Atom::new(Pred::Named(axiom.name.clone()), external.iter().cloned()),
        })
    }
}

/// Name of a ground action or axiom, e.g. `(move a b)`.
fn instance_name(schema: &Sym, args: &[Sym]) -> String {
    if args.is_empty() {
        format!("({schema})")
    } else {
        format!("({schema} {})", args.iter().format(" "))
    }
}

/// Predicates that may change value: those modified by some action and the derived ones.
fn fluent_predicates(task: &Task) -> HashSet<Pred> {
    let mut fluent: HashSet<Pred> = task
        .actions
        .iter()
        .flat_map(|a| a.effects.iter())
        .map(|e| e.literal.pred().clone())
        .collect();
    fluent.extend(task.axioms.iter().map(|ax| Pred::Named(ax.name.clone())));
    fluent
}

/// Computes the relaxed reachable atoms, actions and axioms of a normalized task.
pub fn explore(task: &Task, budget: &Budget) -> Result<GroundTask, TranslateError> {
    let program = Program::build(task);
    let model = compute_model(&program, budget)?;
    let _span = tracing::info_span!("instantiate").entered();

    let symbols = &program.symbols;
    let goal_reachable = model
        .iter()
        .any(|atom| matches!(symbols.relation(atom.rel), Relation::GoalReachable));
    if !goal_reachable {
        info!("Goal is not relaxed reachable");
        return Ok(GroundTask::unreachable());
    }

    let fluent_preds = fluent_predicates(task);
    let mut atoms = Vec::new();
    let mut fluent = HashSet::new();
    let mut action_instances = Vec::new();
    let mut axiom_instances = Vec::new();
    for atom in &model {
        let args = || atom.args.iter().map(|&obj| symbols.object(obj).clone()).collect::<Args>();
        match symbols.relation(atom.rel) {
            Relation::Pred(pred) if fluent_preds.contains(pred) => {
                let atom = Atom {
                    pred: pred.clone(),
                    args: args(),
                };
                fluent.insert(atom.clone());
                atoms.push(atom);
            }
            Relation::Action(i) => action_instances.push((*i, args())),
            Relation::Axiom(i) => axiom_instances.push((*i, args())),
            _ => {}
        }
    }

    let mut init: HashSet<Atom> = task.init.iter().cloned().collect();
    init.extend(task.type_atoms());
    let ctx = Context {
        task,
        init,
        fluent,
        objects_by_type: task.objects_by_type(),
    };

    let mut actions = Vec::new();
    let mut reachable_action_parameters: HashMap<usize, Vec<Args>> = HashMap::new();
    for (i, args) in action_instances {
        budget.tick()?;
        let action = &task.actions[i];
        if let Some(instance) = ctx.instantiate_action(action, &args)? {
            actions.push(instance);
        }
        reachable_action_parameters.entry(i).or_default().push(args);
    }

    let mut axioms = Vec::new();
    for (i, args) in axiom_instances {
        budget.tick()?;
        if let Some(instance) = ctx.instantiate_axiom(&task.axioms[i], &args) {
            axioms.push(instance);
        }
    }
    axioms.sort();

    let goal = instantiate_goal(&ctx, &task.goal);
    if goal.is_none() {
        debug!("Goal has a false static literal");
    }
    info!("{} actions and {} axioms instantiated", actions.len(), axioms.len());

    Ok(GroundTask {
        relaxed_reachable: true,
        atoms,
        actions,
        axioms,
        goal,
        reachable_action_parameters,
    })
}

fn instantiate_goal(ctx: &Context, goal: &Condition) -> Option<Vec<Literal>> {
    let mut literals = Vec::new();
    ctx.instantiate_condition(goal, &HashMap::new(), &mut literals).ok()?;
    Some(literals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Res;
    use crate::normalize::tests::normalized;

    fn ground(domain: &str, problem: &str) -> GroundTask {
        let task: Res<Task> = normalized(domain, problem);
        let task = task.unwrap();
        explore(&task, &Budget::unlimited()).unwrap()
    }

    fn names<T>(items: &[T], name: impl Fn(&T) -> &str) -> Vec<&str> {
        items.iter().map(name).collect()
    }

    const ROBOT: &str = "(define (domain robot) (:requirements :strips :typing)
      (:types room)
      (:predicates (at ?r - room) (connected ?a ?b - room))
      (:action move :parameters (?from ?to - room)
        :precondition (and (at ?from) (connected ?from ?to))
        :effect (and (at ?to) (not (at ?from)))))";

    #[test]
    fn reachable_instances() {
        let problem = "(define (problem p) (:domain robot) (:objects a b c - room)
          (:init (at a) (connected a b) (connected b a))
          (:goal (at b)))";
        let ground = ground(ROBOT, problem);
        assert!(ground.relaxed_reachable);
        let atoms = ground.atoms.iter().map(|a| a.to_string()).sorted().collect_vec();
        assert_eq!(atoms, vec!["at(a)", "at(b)"]);
        let actions = names(&ground.actions, |a| &a.name).into_iter().sorted().collect_vec();
        assert_eq!(actions, vec!["(move a b)", "(move b a)"]);

        let move_ab = ground.actions.iter().find(|a| a.name == "(move a b)").unwrap();
        // the static `connected` atom is evaluated away
        assert_eq!(move_ab.precondition.iter().map(|l| l.to_string()).collect_vec(), vec!["Atom at(a)"]);
        assert_eq!(move_ab.add_effects.len(), 1);
        assert_eq!(move_ab.del_effects.len(), 1);
        assert_eq!(move_ab.cost, 1);
        assert_eq!(ground.reachable_action_parameters[&0].len(), 2);
        assert_eq!(ground.goal.as_ref().map(|g| g.len()), Some(1));
    }

    #[test]
    fn unreachable_goal() {
        let problem = "(define (problem p) (:domain robot) (:objects a b c - room)
          (:init (at a) (connected a b))
          (:goal (at c)))";
        let ground = ground(ROBOT, problem);
        assert!(!ground.relaxed_reachable);
        assert!(ground.actions.is_empty());
    }

    #[test]
    fn false_static_goal() {
        let problem = "(define (problem p) (:domain robot) (:objects a b - room)
          (:init (at a) (connected a b))
          (:goal (and (at b) (not (connected a b)))))";
        let ground = ground(ROBOT, problem);
        assert!(ground.relaxed_reachable);
        assert_eq!(ground.goal, None);
    }

    #[test]
    fn added_atoms_are_not_deleted() {
        let domain = "(define (domain d) (:predicates (p) (q))
          (:action a :parameters () :precondition (q) :effect (and (p) (not (p)) (not (q)))))";
        let problem = "(define (problem p) (:domain d) (:init (q)) (:goal (p)))";
        let ground = ground(domain, problem);
        let action = &ground.actions[0];
        assert_eq!(action.name, "(a)");
        assert_eq!(action.add_effects.len(), 1);
        assert_eq!(action.del_effects.iter().map(|(_, a)| a.to_string()).collect_vec(), vec!["q()"]);
    }

    #[test]
    fn universal_effects_are_expanded() {
        let domain = "(define (domain d) (:types item)
          (:predicates (held ?i - item) (free) (heavy ?i - item))
          (:action drop :parameters ()
            :precondition (free)
            :effect (forall (?i - item) (when (heavy ?i) (not (held ?i)))))
          (:action grab :parameters (?i - item)
            :precondition (free)
            :effect (held ?i)))";
        let problem = "(define (problem p) (:domain d) (:objects x y - item)
          (:init (free) (heavy x))
          (:goal (held y)))";
        let ground = ground(domain, problem);
        let drop = ground.actions.iter().find(|a| a.name == "(drop)").unwrap();
        // `heavy` is static: the effect on `y` is impossible, the one on `x` is unconditional
        assert_eq!(drop.del_effects.len(), 1);
        let (cond, atom) = &drop.del_effects[0];
        assert!(cond.is_empty());
        assert_eq!(atom.to_string(), "held(x)");
    }

    #[test]
    fn action_costs() {
        let domain = "(define (domain d) (:requirements :action-costs) (:types loc)
          (:predicates (at ?l - loc))
          (:functions (total-cost) - number (dist ?a ?b - loc) - number)
          (:action go :parameters (?a ?b - loc)
            :precondition (at ?a)
            :effect (and (at ?b) (not (at ?a)) (increase (total-cost) (dist ?a ?b))))
          (:action stay :parameters (?a - loc) :precondition (at ?a) :effect (at ?a)))";
        let problem = "(define (problem p) (:domain d) (:objects l1 l2 - loc)
          (:init (at l1) (= (dist l1 l2) 7) (= (dist l2 l1) 3) (= (dist l1 l1) 0) (= (dist l2 l2) 0)
            (= (total-cost) 0))
          (:goal (at l2)) (:metric minimize (total-cost)))";
        let ground = ground(domain, problem);
        let cost_of = |name: &str| ground.actions.iter().find(|a| a.name == name).map(|a| a.cost);
        assert_eq!(cost_of("(go l1 l2)"), Some(7));
        assert_eq!(cost_of("(go l2 l1)"), Some(3));
        // without an explicit cost, actions are free under a metric
        assert_eq!(cost_of("(stay l1)"), Some(0));
    }

    #[test]
    fn axioms_are_sorted() {
        let domain = "(define (domain d) (:predicates (p ?x) (ok ?x) (go))
          (:derived (ok ?x) (p ?x))
          (:action a :parameters (?x) :precondition (ok ?x) :effect (go)))";
        let problem = "(define (problem p) (:domain d) (:objects o2 o1) (:init (p o2) (p o1)) (:goal (go)))";
        let ground = ground(domain, problem);
        let axioms = names(&ground.axioms, |a| &a.name);
        assert_eq!(axioms, vec!["(ok o1)", "(ok o2)"]);
        // `p` is static, the axioms are unconditional
        assert!(ground.axioms.iter().all(|a| a.condition.is_empty()));
    }
}
