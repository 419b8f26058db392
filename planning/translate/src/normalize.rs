//! Normalization of the conditions of a task.
//!
//! Once normalized, the precondition of every action, the condition of every effect and axiom and the
//! goal are conjunctions of literals. Universal quantifiers and disjunctions are compiled into new
//! axioms or into copies of their owner, existential quantifiers into additional parameters.

use std::ops::ControlFlow;

use hashbrown::{HashMap, HashSet};
use itertools::{Either, Itertools};
use tracing::debug;

use crate::errors::*;
use crate::sym::Sym;
use crate::task::names::{AxiomNames, NameGenerator};
use crate::task::*;

pub fn normalize(mut task: Task, names: &mut dyn NameGenerator) -> Res<Task> {
    let _span = tracing::info_span!("normalize").entered();
    remove_universal_quantifiers(&mut task, names);
    substitute_complicated_goal(&mut task, names);
    build_dnf(&mut task);
    split_disjunctions(&mut task);
    move_existential_quantifiers(&mut task);
    eliminate_existential_quantifiers(&mut task);
    remove_impossible_conditions(&mut task);
    verify_axiom_predicates(&task)?;
    debug!(
        "Normalized task: {} actions, {} axioms",
        task.actions.len(),
        task.axioms.len()
    );
    Ok(task)
}

/// Declares a new derived predicate defined by a single axiom.
fn add_axiom(task: &mut Task, names: &mut dyn NameGenerator, parameters: Vec<TypedParam>, condition: Condition) -> Sym {
    let name = names.fresh(AxiomNames::BASE);
    task.predicates.push(PredicateSchema {
        name: name.clone(),
        parameters: parameters.clone(),
        derived: true,
    });
    task.axioms.push(Axiom {
        name: name.clone(),
        num_external: parameters.len(),
        parameters,
        condition,
    });
    name
}

fn quantified_params(c: &Condition) -> impl Iterator<Item = &TypedParam> + '_ {
    c.walk()
        .filter_map(|node| match node {
            Condition::Forall(params, _) | Condition::Exists(params, _) => Some(params),
            _ => None,
        })
        .flatten()
}

/// Replaces each `forall` by the negation of a new axiom whose condition is the negated quantifier.
/// Identical quantified conditions share the same axiom.
struct UniversalRemover<'a> {
    names: &'a mut dyn NameGenerator,
    new_axioms: Vec<(Sym, Vec<TypedParam>, Condition)>,
    by_condition: HashMap<(Condition, Vec<TypedParam>), Sym>,
}

impl UniversalRemover<'_> {
    fn remove(&mut self, c: Condition, types: &HashMap<Sym, Sym>) -> Condition {
        if !c.has_universal_part() {
            return c;
        }
        c.replace_top_down(&mut |node| match node {
            Condition::Forall(..) => ControlFlow::Break(self.negated_axiom(node, types)),
            other => ControlFlow::Continue(other),
        })
        .simplified()
    }

    fn negated_axiom(&mut self, forall: Condition, types: &HashMap<Sym, Sym>) -> Condition {
        let condition = forall.negate();
        let parameters = condition
            .free_variables()
            .into_iter()
            .map(|v| {
                let tpe = types
                    .get(&v)
                    .cloned()
                    .unwrap_or_else(|| Sym::from(TypeHierarchy::OBJECT));
                TypedParam::new(v, tpe)
            })
            .collect_vec();
        let args = parameters.iter().map(|p| p.name.clone()).collect_vec();
        let key = (condition, parameters);
        let name = match self.by_condition.get(&key) {
            Some(name) => name.clone(),
            None => {
                let name = self.names.fresh(AxiomNames::BASE);
                self.by_condition.insert(key.clone(), name.clone());
                let (condition, parameters) = key;
                // negating the quantifier may have turned nested existentials into universals
                let condition = self.remove(condition, types);
                self.new_axioms.push((name.clone(), parameters, condition));
                name
            }
        };
        Condition::Literal(Atom::new(Pred::Named(name), args).negative())
    }
}

fn remove_universal_quantifiers(task: &mut Task, names: &mut dyn NameGenerator) {
    let mut remover = UniversalRemover {
        names,
        new_axioms: Vec::new(),
        by_condition: HashMap::new(),
    };
    for action in &mut task.actions {
        let types = Task::type_map(
            action
                .parameters
                .iter()
                .chain(action.effects.iter().flat_map(|e| e.parameters.iter()))
                .chain(quantified_params(&action.precondition))
                .chain(action.effects.iter().flat_map(|e| quantified_params(&e.condition))),
        );
        action.precondition = remover.remove(std::mem::replace(&mut action.precondition, Condition::True), &types);
        for effect in &mut action.effects {
            effect.condition = remover.remove(std::mem::replace(&mut effect.condition, Condition::True), &types);
        }
    }
    for axiom in &mut task.axioms {
        let types = Task::type_map(axiom.parameters.iter().chain(quantified_params(&axiom.condition)));
        axiom.condition = remover.remove(std::mem::replace(&mut axiom.condition, Condition::True), &types);
    }
    let types = Task::type_map(quantified_params(&task.goal));
    task.goal = remover.remove(std::mem::replace(&mut task.goal, Condition::True), &types);

    let new_axioms = remover.new_axioms;
    if !new_axioms.is_empty() {
        debug!("{} axioms introduced for universal conditions", new_axioms.len());
    }
    for (name, parameters, condition) in new_axioms {
        task.predicates.push(PredicateSchema {
            name: name.clone(),
            parameters: parameters.clone(),
            derived: true,
        });
        task.axioms.push(Axiom {
            name,
            num_external: parameters.len(),
            parameters,
            condition,
        });
    }
}

/// A goal that is not a conjunction of literals is replaced by a new nullary derived atom.
fn substitute_complicated_goal(task: &mut Task, names: &mut dyn NameGenerator) {
    if task.goal.as_literal_conjunction().is_some() {
        return;
    }
    let goal = std::mem::replace(&mut task.goal, Condition::True);
    let name = add_axiom(task, names, Vec::new(), goal);
    task.goal = Condition::Literal(Atom::new(Pred::Named(name), []).positive());
}

/// Puts the condition in disjunctive normal form, with existential quantifiers below the top-level disjunction.
fn to_dnf(c: Condition) -> Condition {
    if !c.has_disjunction() {
        return c;
    }
    c.rewrite(&mut |node| match node {
        Condition::And(parts) => {
            let (disjunctions, others): (Vec<Vec<Condition>>, Vec<Condition>) =
                parts.into_iter().partition_map(|part| match part {
                    Condition::Or(alternatives) => Either::Left(alternatives),
                    other => Either::Right(other),
                });
            if disjunctions.is_empty() {
                return Condition::And(others);
            }
            let disjuncts = disjunctions
                .into_iter()
                .multi_cartesian_product()
                .map(|combination| {
                    let mut conjuncts = others.clone();
                    conjuncts.extend(combination);
                    Condition::And(conjuncts)
                })
                .collect();
            Condition::Or(disjuncts)
        }
        Condition::Or(parts) => Condition::Or(
            parts
                .into_iter()
                .flat_map(|part| match part {
                    Condition::Or(nested) => nested,
                    other => vec![other],
                })
                .collect(),
        ),
        Condition::Exists(params, body) => match *body {
            Condition::Or(alternatives) => Condition::Or(
                alternatives
                    .into_iter()
                    .map(|alt| Condition::Exists(params.clone(), Box::new(alt)))
                    .collect(),
            ),
            body => Condition::Exists(params, Box::new(body)),
        },
        other => other,
    })
    .simplified()
}

fn build_dnf(task: &mut Task) {
    for action in &mut task.actions {
        action.precondition = to_dnf(std::mem::replace(&mut action.precondition, Condition::True));
        for effect in &mut action.effects {
            effect.condition = to_dnf(std::mem::replace(&mut effect.condition, Condition::True));
        }
    }
    for axiom in &mut task.axioms {
        axiom.condition = to_dnf(std::mem::replace(&mut axiom.condition, Condition::True));
    }
}

/// Replaces every element with a disjunctive condition by one copy per disjunct, appended after the others.
fn split_disjunctions(task: &mut Task) {
    for action in &mut task.actions {
        let effects = std::mem::take(&mut action.effects);
        let mut copies = Vec::new();
        for effect in effects {
            match effect.condition {
                Condition::Or(alternatives) => copies.extend(alternatives.into_iter().map(|alt| Effect {
                    parameters: effect.parameters.clone(),
                    condition: alt,
                    literal: effect.literal.clone(),
                })),
                _ => action.effects.push(effect),
            }
        }
        action.effects.extend(copies);
    }

    let actions = std::mem::take(&mut task.actions);
    let mut copies = Vec::new();
    for action in actions {
        match action.precondition {
            Condition::Or(alternatives) => copies.extend(alternatives.into_iter().map(|alt| Action {
                name: action.name.clone(),
                parameters: action.parameters.clone(),
                num_external: action.num_external,
                precondition: alt,
                effects: action.effects.clone(),
                cost: action.cost.clone(),
            })),
            _ => task.actions.push(action),
        }
    }
    task.actions.extend(copies);

    let axioms = std::mem::take(&mut task.axioms);
    let mut copies = Vec::new();
    for axiom in axioms {
        match axiom.condition {
            Condition::Or(alternatives) => copies.extend(alternatives.into_iter().map(|alt| Axiom {
                name: axiom.name.clone(),
                parameters: axiom.parameters.clone(),
                num_external: axiom.num_external,
                condition: alt,
            })),
            _ => task.axioms.push(axiom),
        }
    }
    task.axioms.extend(copies);
}

/// Merges nested existential quantifiers and pulls them out of conjunctions.
fn pull_existentials(c: Condition) -> Condition {
    if !c.has_existential_part() {
        return c;
    }
    c.rewrite(&mut |node| match node {
        Condition::And(parts) => {
            let mut params = Vec::new();
            let mut others = Vec::with_capacity(parts.len());
            let mut bodies = Vec::new();
            for part in parts {
                match part {
                    Condition::Exists(ps, body) => {
                        params.extend(ps);
                        bodies.push(*body);
                    }
                    other => others.push(other),
                }
            }
            if bodies.is_empty() {
                return Condition::And(others);
            }
            others.extend(bodies);
            Condition::Exists(params, Box::new(Condition::And(others)))
        }
        Condition::Exists(mut params, body) => match *body {
            Condition::Exists(inner, body) => {
                params.extend(inner);
                Condition::Exists(params, body)
            }
            body => Condition::Exists(params, Box::new(body)),
        },
        other => other,
    })
    .simplified()
}

fn move_existential_quantifiers(task: &mut Task) {
    for action in &mut task.actions {
        action.precondition = pull_existentials(std::mem::replace(&mut action.precondition, Condition::True));
        for effect in &mut action.effects {
            effect.condition = pull_existentials(std::mem::replace(&mut effect.condition, Condition::True));
        }
    }
    for axiom in &mut task.axioms {
        axiom.condition = pull_existentials(std::mem::replace(&mut axiom.condition, Condition::True));
    }
}

/// Splits a top-level existential quantifier into its variables and body.
fn split_existential(c: Condition) -> (Vec<TypedParam>, Condition) {
    match c {
        Condition::Exists(params, body) => (params, *body),
        other => (Vec::new(), other),
    }
}

/// Existential variables become additional (internal) parameters of axioms and actions,
/// and additional quantified variables of conditional effects.
fn eliminate_existential_quantifiers(task: &mut Task) {
    for axiom in &mut task.axioms {
        let (params, body) = split_existential(std::mem::replace(&mut axiom.condition, Condition::True));
        axiom.parameters.extend(params);
        axiom.condition = body;
    }
    for action in &mut task.actions {
        let (params, body) = split_existential(std::mem::replace(&mut action.precondition, Condition::True));
        action.parameters.extend(params);
        action.precondition = body;
        for effect in &mut action.effects {
            let (params, body) = split_existential(std::mem::replace(&mut effect.condition, Condition::True));
            effect.parameters.extend(params);
            effect.condition = body;
        }
    }
}

/// Removes the actions, effects and axioms whose condition simplified to false.
fn remove_impossible_conditions(task: &mut Task) {
    for action in &mut task.actions {
        action.effects.retain(|e| e.condition != Condition::False);
    }
    let num_actions = task.actions.len();
    task.actions
        .retain(|a| a.precondition != Condition::False && !a.effects.is_empty());
    let num_axioms = task.axioms.len();
    task.axioms.retain(|a| a.condition != Condition::False);
    let removed = num_actions - task.actions.len() + num_axioms - task.axioms.len();
    if removed > 0 {
        debug!("{removed} actions or axioms with an impossible condition removed");
    }
}

fn verify_axiom_predicates(task: &Task) -> Res<()> {
    let derived: HashSet<&Sym> = task.axioms.iter().map(|a| &a.name).collect();
    let is_derived = |atom: &Atom| match &atom.pred {
        Pred::Named(name) => derived.contains(name),
        _ => false,
    };
    if let Some(fact) = task.init.iter().find(|a| is_derived(*a)) {
        return Err(Message::error(format!(
            "Derived predicate `{}` appears in the initial state: {fact}",
            fact.pred
        )));
    }
    for action in &task.actions {
        if let Some(effect) = action.effects.iter().find(|e| is_derived(&e.literal.atom)) {
            return Err(Message::error(format!(
                "Derived predicate `{}` appears in an effect of action `{}`",
                effect.literal.pred(),
                action.name
            ))
            .info(&action.name, "action"));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::task::conditions::tests::{neg, pos};
    use crate::task::convert::tests::task_of;

    pub(crate) fn normalized(domain: &str, problem: &str) -> Res<Task> {
        let task = task_of(domain, problem)?;
        let mut names = AxiomNames::new(task.predicates.iter().map(|p| &p.name));
        normalize(task, &mut names)
    }

    fn names(params: &[TypedParam]) -> Vec<String> {
        params.iter().map(|p| p.name.to_string()).collect()
    }

    const PROBLEM: &str = "(define (problem p) (:domain d) (:objects b1 b2 - ball r1 r2 - room) (:init) (:goal (done)))";

    #[test]
    fn universal_preconditions_become_axioms() -> Res<()> {
        let dom = "(define (domain d) (:types ball room)
          (:predicates (at ?b - ball ?r - room) (done))
          (:action finish :parameters (?r - room)
            :precondition (forall (?b - ball) (at ?b ?r))
            :effect (done)))";
        let task = normalized(dom, PROBLEM)?;
        let action = &task.actions[0];
        assert_eq!(action.precondition, neg("new-axiom@0", &["?r"]));
        assert_eq!(task.axioms.len(), 1);
        let axiom = &task.axioms[0];
        assert_eq!(axiom.name, "new-axiom@0");
        assert_eq!(names(&axiom.parameters), vec!["?r", "?b"]);
        assert_eq!(axiom.num_external, 1);
        assert_eq!(axiom.parameters[0].tpe, "room");
        assert_eq!(axiom.condition, neg("at", &["?b", "?r"]));
        assert!(task.predicate("new-axiom@0").is_some_and(|p| p.derived));
        Ok(())
    }

    #[test]
    fn disjunctions_split_actions_and_effects() -> Res<()> {
        let dom = "(define (domain d) (:predicates (p) (q) (r) (done))
          (:action a :parameters ()
            :precondition (and (p) (or (q) (r)))
            :effect (when (or (q) (r)) (done))))";
        let pb = "(define (problem p) (:domain d) (:init) (:goal (done)))";
        let task = normalized(dom, pb)?;
        assert_eq!(task.actions.len(), 2);
        assert_eq!(task.actions[0].precondition, Condition::And(vec![pos("p", &[]), pos("q", &[])]));
        assert_eq!(task.actions[1].precondition, Condition::And(vec![pos("p", &[]), pos("r", &[])]));
        for action in &task.actions {
            let conditions = action.effects.iter().map(|e| e.condition.clone()).collect_vec();
            assert_eq!(conditions, vec![pos("q", &[]), pos("r", &[])]);
        }
        Ok(())
    }

    #[test]
    fn complicated_goals_are_derived() -> Res<()> {
        let dom = "(define (domain d) (:predicates (p) (q))
          (:action a :parameters () :precondition () :effect (p)))";
        let pb = "(define (problem p) (:domain d) (:init) (:goal (or (p) (q))))";
        let task = normalized(dom, pb)?;
        assert_eq!(task.goal, pos("new-axiom@0", &[]));
        assert_eq!(task.axioms.len(), 2);
        assert!(task.axioms.iter().all(|a| a.name == "new-axiom@0"));
        Ok(())
    }

    #[test]
    fn existential_preconditions_become_parameters() -> Res<()> {
        let dom = "(define (domain d) (:types ball room)
          (:predicates (at ?b - ball ?r - room) (done))
          (:action finish :parameters (?r - room)
            :precondition (and (exists (?b - ball) (at ?b ?r)) (not (done)))
            :effect (and (done) (forall (?x - room) (when (exists (?y - ball) (at ?y ?x)) (done))))))";
        let task = normalized(dom, PROBLEM)?;
        let action = &task.actions[0];
        assert_eq!(names(&action.parameters), vec!["?r", "?b"]);
        assert_eq!(action.num_external, 1);
        assert_eq!(action.precondition, Condition::And(vec![neg("done", &[]), pos("at", &["?b", "?r"])]));
        let effect = &action.effects[1];
        assert_eq!(names(&effect.parameters), vec!["?x", "?y"]);
        assert_eq!(effect.condition, pos("at", &["?y", "?x"]));
        Ok(())
    }

    #[test]
    fn nested_quantifiers_alternate() -> Res<()> {
        // forall ?b: exists ?r: at(?b, ?r)
        let dom = "(define (domain d) (:types ball room)
          (:predicates (at ?b - ball ?r - room) (done))
          (:action finish :parameters ()
            :precondition (forall (?b - ball) (exists (?r - room) (at ?b ?r)))
            :effect (done)))";
        let task = normalized(dom, PROBLEM)?;
        assert_eq!(task.actions[0].precondition, neg("new-axiom@0", &[]));
        // not (exists ?b: forall ?r: not at(?b, ?r)), the inner universal being itself an axiom
        let outer = task.axioms.iter().find(|a| a.name == "new-axiom@0").map(|a| a.condition.clone());
        assert_eq!(outer, Some(neg("new-axiom@1", &["?b"])));
        let inner = task.axioms.iter().find(|a| a.name == "new-axiom@1").map(|a| a.condition.clone());
        assert_eq!(inner, Some(pos("at", &["?b", "?r"])));
        Ok(())
    }

    #[test]
    fn derived_predicates_cannot_be_modified() {
        let dom = "(define (domain d) (:predicates (p) (d))
          (:derived (d) (p))
          (:action a :parameters () :precondition () :effect (d)))";
        let pb = "(define (problem p) (:domain d) (:init) (:goal (d)))";
        let err = normalized(dom, pb).err().map(|e| e.get_title().to_string());
        assert!(err.is_some_and(|e| e.contains("appears in an effect")));

        let dom = "(define (domain d) (:predicates (p) (d))
          (:derived (d) (p))
          (:action a :parameters () :precondition () :effect (p)))";
        let pb = "(define (problem p) (:domain d) (:init (d)) (:goal (d)))";
        let err = normalized(dom, pb).err().map(|e| e.get_title().to_string());
        assert!(err.is_some_and(|e| e.contains("initial state")));
    }

    #[test]
    fn impossible_actions_are_removed() -> Res<()> {
        let dom = "(define (domain d) (:predicates (p))
          (:action a :parameters () :precondition (and (p) (or)) :effect (p))
          (:action b :parameters () :precondition () :effect (p)))";
        let pb = "(define (problem p) (:domain d) (:init) (:goal (p)))";
        let task = normalized(dom, pb)?;
        assert_eq!(task.actions.len(), 1);
        assert_eq!(task.actions[0].name, "b");
        Ok(())
    }
}
