//! Synthesis of mutual exclusion invariants.
//!
//! An invariant states that, for any instantiation of its parameters, at most one of the atoms
//! described by its parts is true in any reachable state. Candidates are generated for each fluent
//! predicate and checked against every action that may add one of their atoms. A candidate whose
//! add effect is not balanced by a delete effect is either refined with an additional part or
//! discarded.

pub mod constraints;

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use tracing::{debug, info, trace};

use crate::errors::TranslateError;
use crate::invariants::constraints::{ConstraintSystem, EqualityConjunction, InequalityDisjunction};
use crate::limits::Budget;
use crate::sym::Sym;
use crate::task::names::{NameGenerator, VariableNames};
use crate::task::{Action, Args, Atom, Condition, Effect, Literal, Pred, Task};

/// One predicate of an invariant.
///
/// The parameters of the invariant are the arguments of the predicate at the positions in `order`.
/// The argument at the `omitted` position, if any, is the counted one: the invariant bounds the number
/// of true atoms over all its values.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct InvariantPart {
    pub pred: Pred,
    pub order: Vec<usize>,
    pub omitted: Option<usize>,
}

impl InvariantPart {
    pub fn arity(&self) -> usize {
        self.order.len()
    }

    /// Parameters of the invariant for an atom of this part.
    pub fn parameters(&self, args: &[Sym]) -> Vec<Sym> {
        self.order.iter().map(|&pos| args[pos].clone()).collect()
    }

    /// Equalities stating that `parameters` are the invariant parameters of the given atom.
    fn assignment(&self, parameters: &[Sym], args: &[Sym]) -> EqualityConjunction {
        EqualityConjunction::new(
            parameters
                .iter()
                .zip(&self.order)
                .map(|(param, &pos)| (param.clone(), args[pos].clone())),
        )
    }

    /// Atoms of this part for a given instantiation of the invariant parameters.
    pub fn instantiate(&self, parameters: &[Sym]) -> AtomPattern {
        let mut args = vec![None; self.order.len() + usize::from(self.omitted.is_some())];
        for (param, &pos) in parameters.iter().zip(&self.order) {
            args[pos] = Some(param.clone());
        }
        AtomPattern {
            pred: self.pred.clone(),
            args,
        }
    }

    /// Parts for the predicate of `other` that relate its arguments the same way as `own` relates
    /// its arguments to the parameters of this part.
    fn possible_matches(&self, own: &Literal, other: &Literal) -> Vec<InvariantPart> {
        let mut allowed_omissions = match other.args().len().checked_sub(self.arity()) {
            Some(n @ (0 | 1)) => n,
            _ => return Vec::new(),
        };
        let own_parameters = self.parameters(own.args());
        let own_positions = invert(&own_parameters);
        // (positions in `other`, positions in the order of this part, `None` for the omitted one)
        let mut factored: Vec<(Vec<usize>, Vec<Option<usize>>)> = Vec::new();
        for (arg, other_positions) in invert(other.args()) {
            let mut own_positions = own_positions
                .iter()
                .find(|(a, _)| *a == arg)
                .map(|(_, positions)| positions.iter().map(|&p| Some(p)).collect_vec())
                .unwrap_or_default();
            match other_positions.len() as isize - own_positions.len() as isize {
                0 => {}
                1 if allowed_omissions == 1 => {
                    own_positions.push(None);
                    allowed_omissions = 0;
                }
                _ => return Vec::new(),
            }
            factored.push((other_positions, own_positions));
        }

        let per_argument = factored
            .into_iter()
            .map(|(preimage, image)| {
                let k = image.len();
                image
                    .into_iter()
                    .permutations(k)
                    .map(|perm| preimage.iter().copied().zip(perm).collect_vec())
                    .collect_vec()
            })
            .collect_vec();

        let mut result = Vec::new();
        for mapping in per_argument.iter().map(|options| options.iter()).multi_cartesian_product() {
            let mut order = vec![0; self.arity()];
            let mut omitted = None;
            for &(other_pos, own_pos) in mapping.into_iter().flatten() {
                match own_pos {
                    Some(p) => order[p] = other_pos,
                    None => omitted = Some(other_pos),
                }
            }
            result.push(InvariantPart {
                pred: other.pred().clone(),
                order,
                omitted,
            });
        }
        result
    }
}

/// Positions of each distinct argument, in order of first occurrence.
fn invert(args: &[Sym]) -> Vec<(&Sym, Vec<usize>)> {
    let mut result: Vec<(&Sym, Vec<usize>)> = Vec::new();
    for (pos, arg) in args.iter().enumerate() {
        match result.iter_mut().find(|(a, _)| *a == arg) {
            Some((_, positions)) => positions.push(pos),
            None => result.push((arg, vec![pos])),
        }
    }
    result
}

impl Display for InvariantPart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.pred, self.order.iter().format(" "))?;
        if let Some(omitted) = self.omitted {
            write!(f, " [{omitted}]")?;
        }
        Ok(())
    }
}

/// An atom whose arguments are either objects or the counted argument of an invariant (`None`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct AtomPattern {
    pub pred: Pred,
    pub args: Vec<Option<Sym>>,
}

impl Display for AtomPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let args = self.args.iter().map(|a| a.as_ref().map_or("?X", |s| s.canonical_str()));
        write!(f, "{}({})", self.pred, args.format(", "))
    }
}

/// A set of parts, at most one per predicate, sharing the same arity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Invariant {
    /// Sorted parts
    parts: Vec<InvariantPart>,
}

impl Invariant {
    pub fn new(parts: impl IntoIterator<Item = InvariantPart>) -> Self {
        let mut parts = parts.into_iter().collect_vec();
        parts.sort();
        debug_assert!(parts.iter().map(|p| &p.pred).all_unique());
        Invariant { parts }
    }

    pub fn parts(&self) -> &[InvariantPart] {
        &self.parts
    }

    pub fn arity(&self) -> usize {
        self.parts.first().map_or(0, |p| p.arity())
    }

    pub fn part(&self, pred: &Pred) -> Option<&InvariantPart> {
        self.parts.iter().find(|p| &p.pred == pred)
    }

    fn with_part(&self, part: InvariantPart) -> Invariant {
        Invariant::new(self.parts.iter().cloned().chain([part]))
    }

    /// Parameters of the invariant for an atom of one of its predicates.
    pub fn parameters(&self, atom: &Atom) -> Option<Vec<Sym>> {
        self.part(&atom.pred).map(|part| part.parameters(&atom.args))
    }

    /// Checks that no action can violate the invariant.
    ///
    /// If an action adds an atom of the invariant without deleting another one, the refinements of
    /// the candidate are passed to `enqueue` before returning false.
    fn check_balance(&self, checker: &BalanceChecker, enqueue: &mut impl FnMut(Invariant)) -> bool {
        let threats: std::collections::BTreeSet<usize> = self
            .parts
            .iter()
            .flat_map(|part| checker.threats(&part.pred))
            .collect();
        for action in threats {
            if self.operator_too_heavy(&checker.heavy_actions[action]) {
                return false;
            }
            if self.operator_unbalanced(&checker.actions[action], enqueue) {
                return false;
            }
        }
        true
    }

    /// Whether the action may add two distinct atoms of the same instance of the invariant.
    fn operator_too_heavy(&self, action: &Action) -> bool {
        let add_effects = action
            .effects
            .iter()
            .filter(|e| !e.literal.negated && self.part(e.literal.pred()).is_some())
            .collect_vec();
        if add_effects.len() <= 1 {
            return false;
        }
        let inv_vars = unique_variables(action, self.arity());
        for (eff1, eff2) in add_effects.into_iter().tuple_combinations() {
            let mut system = ConstraintSystem::new();
            ensure_inequality(&mut system, &eff1.literal, &eff2.literal);
            self.ensure_cover(&mut system, &eff1.literal, &inv_vars);
            self.ensure_cover(&mut system, &eff2.literal, &inv_vars);
            ensure_conjunction_sat(
                &mut system,
                action
                    .precondition
                    .literals()
                    .chain(eff1.condition.literals())
                    .chain(eff2.condition.literals())
                    .cloned()
                    .chain([eff1.literal.negate(), eff2.literal.negate()]),
            );
            if system.is_solvable() {
                return true;
            }
        }
        false
    }

    fn operator_unbalanced(&self, action: &Action, enqueue: &mut impl FnMut(Invariant)) -> bool {
        let inv_vars = unique_variables(action, self.arity());
        let (add_effects, del_effects): (Vec<&Effect>, Vec<&Effect>) = action
            .effects
            .iter()
            .filter(|e| self.part(e.literal.pred()).is_some())
            .partition(|e| !e.literal.negated);
        add_effects
            .into_iter()
            .any(|eff| self.add_effect_unbalanced(action, eff, &del_effects, &inv_vars, enqueue))
    }

    fn ensure_cover(&self, system: &mut ConstraintSystem, literal: &Literal, inv_vars: &[Sym]) {
        if let Some(part) = self.part(literal.pred()) {
            system.add_equality_conjunction(part.assignment(inv_vars, literal.args()));
        }
    }

    /// Renamings of the action parameters that make the add effect covered by the invariant,
    /// requiring all parameters not identified by the covering to be distinct.
    fn minimal_covering_renamings(&self, action: &Action, add_effect: &Effect, inv_vars: &[Sym]) -> Vec<ConstraintSystem> {
        let Some(part) = self.part(add_effect.literal.pred()) else {
            return Vec::new();
        };
        let assignment = part.assignment(inv_vars, add_effect.literal.args());
        let Some(mapping) = assignment.mapping() else {
            return Vec::new();
        };
        let mut system = ConstraintSystem::new();
        system.add_equality_conjunction(assignment);
        let rep = |n: &Sym| mapping.get(n).cloned().unwrap_or_else(|| n.clone());
        for (p1, p2) in action.parameters.iter().tuple_combinations() {
            if rep(&p1.name) != rep(&p2.name) {
                system.add_inequality_disjunction(InequalityDisjunction::new([(p1.name.clone(), p2.name.clone())]));
            }
        }
        vec![system]
    }

    fn add_effect_unbalanced(
        &self,
        action: &Action,
        add_effect: &Effect,
        del_effects: &[&Effect],
        inv_vars: &[Sym],
        enqueue: &mut impl FnMut(Invariant),
    ) -> bool {
        let mut renamings = self.minimal_covering_renamings(action, add_effect, inv_vars);

        let mut lhs_by_pred: BTreeMap<Pred, Vec<Literal>> = BTreeMap::new();
        let lhs = action
            .precondition
            .literals()
            .chain(add_effect.condition.literals())
            .cloned()
            .chain([add_effect.literal.negate()]);
        for lit in lhs {
            lhs_by_pred.entry(lit.pred().clone()).or_default().push(lit);
        }

        for del_effect in del_effects {
            renamings = self.unbalanced_renamings(del_effect, add_effect, inv_vars, &lhs_by_pred, renamings);
            if renamings.is_empty() {
                return false;
            }
        }

        self.refine_candidate(add_effect, action, enqueue);
        true
    }

    /// Enqueues the candidates obtained by adding a part matching a delete effect of the action.
    fn refine_candidate(&self, add_effect: &Effect, action: &Action, enqueue: &mut impl FnMut(Invariant)) {
        let Some(part) = self.part(add_effect.literal.pred()) else {
            return;
        };
        for del_effect in action.effects.iter().filter(|e| e.literal.negated) {
            if self.part(del_effect.literal.pred()).is_none() {
                for candidate in part.possible_matches(&add_effect.literal, &del_effect.literal) {
                    enqueue(self.with_part(candidate));
                }
            }
        }
    }

    /// Keeps the renamings for which the delete effect does not balance the add effect.
    fn unbalanced_renamings(
        &self,
        del_effect: &Effect,
        add_effect: &Effect,
        inv_vars: &[Sym],
        lhs_by_pred: &BTreeMap<Pred, Vec<Literal>>,
        renamings: Vec<ConstraintSystem>,
    ) -> Vec<ConstraintSystem> {
        let Some(part) = self.part(del_effect.literal.pred()) else {
            return renamings;
        };
        let cover = part.assignment(inv_vars, del_effect.literal.args());

        // only the quantified variables of the delete effect may be renamed: the constants it
        // requires for the invariant parameters must already be imposed by the renaming
        let mut constant_test = ConstraintSystem::new();
        let mut check_constants = false;
        for (inv_var, arg) in &cover.equalities {
            if !arg.is_variable() {
                check_constants = true;
                constant_test.add_inequality_disjunction(InequalityDisjunction::new([(inv_var.clone(), arg.clone())]));
            }
        }

        let mut system = ConstraintSystem::new();
        system.add_equality_conjunction(cover);
        ensure_inequality(&mut system, &add_effect.literal, &del_effect.literal);

        let mut still_unbalanced = Vec::new();
        for renaming in renamings {
            if check_constants && constant_test.combine(&renaming).is_solvable() {
                still_unbalanced.push(renaming);
                continue;
            }
            let mut new_system = system.combine(&renaming);
            if lhs_satisfiable(&renaming, lhs_by_pred) {
                match imply_del_effect(del_effect, lhs_by_pred) {
                    Some(implies) => new_system.extend(&implies),
                    None => {
                        still_unbalanced.push(renaming);
                        continue;
                    }
                }
            }
            if !new_system.is_solvable() {
                still_unbalanced.push(renaming);
            }
        }
        still_unbalanced
    }
}

impl Display for Invariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.parts.iter().format(", "))
    }
}

/// `arity` variable names that do not clash with the variables of the action: `?v0`, `?v1`, ...
fn unique_variables(action: &Action, arity: usize) -> Vec<Sym> {
    let used: HashSet<&str> = action.variable_names().map(|s| s.canonical_str()).collect();
    (0..)
        .map(|i| format!("?v{i}"))
        .filter(|name| !used.contains(name.as_str()))
        .take(arity)
        .map(Sym::from)
        .collect()
}

/// Constrains the system so that it is only solvable if the conjunction of literals is satisfiable.
fn ensure_conjunction_sat(system: &mut ConstraintSystem, literals: impl IntoIterator<Item = Literal>) {
    let mut pos: BTreeMap<Pred, Vec<Literal>> = BTreeMap::new();
    let mut neg: BTreeMap<Pred, Vec<Literal>> = BTreeMap::new();
    for lit in literals {
        if lit.pred().is_equality() {
            let pair = (lit.args()[0].clone(), lit.args()[1].clone());
            if lit.negated {
                system.add_inequality_disjunction(InequalityDisjunction::new([pair]));
            } else {
                system.add_equality_conjunction(EqualityConjunction::new([pair]));
            }
        } else {
            let side = if lit.negated { &mut neg } else { &mut pos };
            let lits = side.entry(lit.pred().clone()).or_default();
            if !lits.contains(&lit) {
                lits.push(lit);
            }
        }
    }
    for (pred, positives) in &pos {
        let Some(negatives) = neg.get(pred) else {
            continue;
        };
        for p in positives {
            for n in negatives {
                // an empty disjunction (nullary atom both required and forbidden) is unsatisfiable
                let parts = n.args().iter().cloned().zip(p.args().iter().cloned());
                system.add_inequality_disjunction(InequalityDisjunction::new(parts));
            }
        }
    }
}

/// Constrains the system so that it is only solvable if the two atoms are distinct.
fn ensure_inequality(system: &mut ConstraintSystem, lit1: &Literal, lit2: &Literal) {
    if lit1.pred() == lit2.pred() && !lit1.args().is_empty() {
        let parts = lit1.args().iter().cloned().zip(lit2.args().iter().cloned());
        system.add_inequality_disjunction(InequalityDisjunction::new(parts));
    }
}

fn lhs_satisfiable(renaming: &ConstraintSystem, lhs_by_pred: &BTreeMap<Pred, Vec<Literal>>) -> bool {
    let mut system = renaming.clone();
    ensure_conjunction_sat(&mut system, lhs_by_pred.values().flatten().cloned());
    system.is_solvable()
}

/// A system that is solvable if the left-hand side implies the condition of the delete effect and
/// its deleted atom. `None` if no literal of the left-hand side can imply one of them.
fn imply_del_effect(del_effect: &Effect, lhs_by_pred: &BTreeMap<Pred, Vec<Literal>>) -> Option<ConstraintSystem> {
    let mut system = ConstraintSystem::new();
    for lit in del_effect.condition.literals().cloned().chain([del_effect.literal.negate()]) {
        let options = lhs_by_pred
            .get(lit.pred())
            .into_iter()
            .flatten()
            .filter(|m| m.negated == lit.negated)
            .map(|m| EqualityConjunction::new(lit.args().iter().cloned().zip(m.args().iter().cloned())))
            .collect_vec();
        if options.is_empty() {
            return None;
        }
        system.add_equality_dnf(options);
    }
    Some(system)
}

/// Actions of the task, as seen by the invariant synthesis.
struct BalanceChecker {
    /// Actions with additional inequality preconditions
    actions: Vec<Action>,
    /// Same as `actions`, with a renamed copy of each universal effect
    heavy_actions: Vec<Action>,
    /// Actions that add an atom of each predicate, by index
    add_actions: HashMap<Pred, Vec<usize>>,
}

impl BalanceChecker {
    fn new(task: &Task, reachable_action_parameters: &HashMap<usize, Vec<Args>>) -> Self {
        let mut actions = Vec::with_capacity(task.actions.len());
        let mut heavy_actions = Vec::with_capacity(task.actions.len());
        let mut add_actions: HashMap<Pred, Vec<usize>> = HashMap::new();
        for (i, action) in task.actions.iter().enumerate() {
            let no_params = Vec::new();
            let reachable = reachable_action_parameters.get(&i).unwrap_or(&no_params);
            let action = with_inequality_preconditions(action, reachable);
            for eff in &action.effects {
                if !eff.literal.negated {
                    let adders = add_actions.entry(eff.literal.pred().clone()).or_default();
                    if adders.last() != Some(&i) {
                        adders.push(i);
                    }
                }
            }
            heavy_actions.push(heavy_action(&action));
            actions.push(action);
        }
        BalanceChecker {
            actions,
            heavy_actions,
            add_actions,
        }
    }

    fn threats<'a>(&'a self, pred: &Pred) -> impl Iterator<Item = usize> + 'a {
        self.add_actions.get(pred).into_iter().flatten().copied()
    }
}

/// Adds `(not (= ?p1 ?p2))` to the precondition for each pair of parameters that are distinct in
/// all reachable instances of the action.
fn with_inequality_preconditions(action: &Action, reachable: &[Args]) -> Action {
    let mut action = action.clone();
    if action.parameters.len() < 2 {
        return action;
    }
    let mut inequalities = Vec::new();
    for (i, j) in (0..action.parameters.len()).tuple_combinations() {
        if reachable.iter().all(|args| args[i] != args[j]) {
            let (p1, p2) = (&action.parameters[i].name, &action.parameters[j].name);
            let lit = Atom::new(Pred::Equal, [p1.clone(), p2.clone()]).negative();
            inequalities.push(Condition::Literal(lit));
        }
    }
    if !inequalities.is_empty() {
        let precondition = std::mem::replace(&mut action.precondition, Condition::True);
        let mut parts = precondition.conjuncts().to_vec();
        parts.extend(inequalities);
        action.precondition = Condition::And(parts);
    }
    action
}

/// Copy of the action in which every universal effect appears twice, with distinct variables.
fn heavy_action(action: &Action) -> Action {
    if !action.effects.iter().any(|e| e.is_universal()) {
        return action.clone();
    }
    let mut names = VariableNames::new(action.variable_names());
    let mut effects = Vec::with_capacity(action.effects.len() * 2);
    for eff in &action.effects {
        effects.push(eff.clone());
        if eff.is_universal() {
            let renaming: HashMap<Sym, Sym> = eff
                .parameters
                .iter()
                .map(|p| (p.name.clone(), names.fresh(p.name.canonical_str())))
                .collect();
            effects.push(eff.rename(&renaming));
        }
    }
    Action {
        effects,
        ..action.clone()
    }
}

/// One candidate per fluent predicate and per argument that may be counted (or none).
fn initial_candidates(task: &Task) -> Vec<Invariant> {
    let fluent: HashSet<&Pred> = task
        .actions
        .iter()
        .flat_map(|a| a.effects.iter().map(|e| e.literal.pred()))
        .collect();
    let mut candidates = Vec::new();
    for pred in &task.predicates {
        let name = Pred::Named(pred.name.clone());
        if !fluent.contains(&name) {
            continue;
        }
        let arity = pred.arity();
        for omitted in [None].into_iter().chain((0..arity).map(Some)) {
            let order = (0..arity).filter(|&i| Some(i) != omitted).collect();
            candidates.push(Invariant::new([InvariantPart {
                pred: name.clone(),
                order,
                omitted,
            }]));
        }
    }
    candidates
}

/// Explores the candidate invariants breadth-first and returns those that were proven, sorted.
///
/// The exploration stops early, keeping the invariants found so far, when `max_candidates` were
/// generated or after `max_time`.
pub fn find_invariants(
    task: &Task,
    reachable_action_parameters: &HashMap<usize, Vec<Args>>,
    max_candidates: usize,
    max_time: Duration,
    budget: &Budget,
) -> Result<Vec<Invariant>, TranslateError> {
    let _span = tracing::info_span!("invariants").entered();
    let start = Instant::now();
    let mut queue: VecDeque<Invariant> = initial_candidates(task).into();
    info!("{} initial candidates", queue.len());
    let mut seen: HashSet<Invariant> = queue.iter().cloned().collect();
    let checker = BalanceChecker::new(task, reachable_action_parameters);

    let mut invariants = Vec::new();
    while let Some(candidate) = queue.pop_front() {
        budget.tick()?;
        if start.elapsed() > max_time {
            info!("Time limit reached, aborting invariant generation");
            break;
        }
        let mut enqueue = |refined: Invariant| {
            if seen.len() < max_candidates && !seen.contains(&refined) {
                trace!("new candidate {refined}");
                seen.insert(refined.clone());
                queue.push_back(refined);
            }
        };
        if candidate.check_balance(&checker, &mut enqueue) {
            debug!("invariant {candidate}");
            invariants.push(candidate);
        }
    }
    invariants.sort();
    info!("{} invariants found", invariants.len());
    Ok(invariants)
}

/// Instances of the invariants that have exactly one true atom in the initial state.
///
/// Groups are ordered by invariant, then by the first initial atom that belongs to them. The atom
/// patterns of a group follow the order of the parts of its invariant.
pub fn useful_groups(invariants: &[Invariant], init: &[Atom]) -> Vec<Vec<AtomPattern>> {
    let mut invariants_of_pred: HashMap<&Pred, Vec<usize>> = HashMap::new();
    for (i, inv) in invariants.iter().enumerate() {
        for part in inv.parts() {
            invariants_of_pred.entry(&part.pred).or_default().push(i);
        }
    }

    // number of initial atoms of each instance, and its first occurrence
    let mut counts: HashMap<(usize, Vec<Sym>), (usize, usize)> = HashMap::new();
    for (position, atom) in init.iter().enumerate() {
        for &i in invariants_of_pred.get(&atom.pred).into_iter().flatten() {
            let Some(params) = invariants[i].parameters(atom) else {
                continue;
            };
            counts.entry((i, params)).or_insert((position, 0)).1 += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, (_, count))| *count == 1)
        .map(|((i, params), (first, _))| (i, first, params))
        .sorted_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)))
        .map(|(i, _, params)| invariants[i].parts().iter().map(|part| part.instantiate(&params)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Res;
    use crate::instantiate::explore;
    use crate::normalize::tests::normalized;
    use crate::task::conditions::tests::atom;

    fn invariants_of(domain: &str, problem: &str) -> (Task, Vec<Invariant>) {
        let task: Res<Task> = normalized(domain, problem);
        let task = task.unwrap();
        let budget = Budget::unlimited();
        let ground = explore(&task, &budget).unwrap();
        let invariants = find_invariants(
            &task,
            &ground.reachable_action_parameters,
            1000,
            Duration::from_secs(60),
            &budget,
        )
        .unwrap();
        (task, invariants)
    }

    fn invariants_task_action(domain: &str, problem: &str) -> Action {
        let task: Res<Task> = normalized(domain, problem);
        let task = task.unwrap();
        task.actions.into_iter().find(|a| a.name == "reset").unwrap()
    }

    fn strings<T: ToString>(items: &[T]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    const LOGISTICS: &str = "(define (domain logistics) (:requirements :strips :typing)
      (:types pkg loc truck)
      (:predicates (at ?p - pkg ?l - loc) (in ?p - pkg ?t - truck) (truck-at ?t - truck ?l - loc))
      (:action load :parameters (?p - pkg ?t - truck ?l - loc)
        :precondition (and (at ?p ?l) (truck-at ?t ?l))
        :effect (and (in ?p ?t) (not (at ?p ?l))))
      (:action unload :parameters (?p - pkg ?t - truck ?l - loc)
        :precondition (and (in ?p ?t) (truck-at ?t ?l))
        :effect (and (at ?p ?l) (not (in ?p ?t))))
      (:action drive :parameters (?t - truck ?from ?to - loc)
        :precondition (truck-at ?t ?from)
        :effect (and (truck-at ?t ?to) (not (truck-at ?t ?from)))))";

    const LOGISTICS_PROBLEM: &str = "(define (problem p) (:domain logistics)
      (:objects p1 p2 - pkg l1 l2 - loc t1 - truck)
      (:init (at p1 l1) (at p2 l2) (truck-at t1 l1))
      (:goal (and (at p1 l2) (at p2 l1))))";

    #[test]
    fn candidate_parts() {
        let own = atom("at", &["?p", "?l"]).positive();
        let other = atom("in", &["?p", "?t"]).negative();
        let part = InvariantPart {
            pred: Pred::named("at"),
            order: vec![0],
            omitted: Some(1),
        };
        let matches = part.possible_matches(&own, &other);
        assert_eq!(
            matches,
            vec![InvariantPart {
                pred: Pred::named("in"),
                order: vec![0],
                omitted: Some(1),
            }]
        );
        // arities too different
        let other = atom("far", &["?p", "?t", "?u"]).negative();
        assert!(part.possible_matches(&own, &other).is_empty());
    }

    #[test]
    fn patterns() {
        let part = InvariantPart {
            pred: Pred::named("at"),
            order: vec![1],
            omitted: Some(0),
        };
        assert_eq!(part.instantiate(&[Sym::from("l1")]).to_string(), "at(?X, l1)");
        assert_eq!(part.to_string(), "at 1 [0]");
    }

    #[test]
    fn logistics_invariants() {
        let (task, invariants) = invariants_of(LOGISTICS, LOGISTICS_PROBLEM);
        let found = strings(&invariants);
        // each package is at one location or in one truck, each truck at one location
        assert!(found.contains(&"{at 0 [1], in 0 [1]}".to_string()), "{found:?}");
        assert!(found.contains(&"{truck-at 0 [1]}".to_string()), "{found:?}");
        // a location may hold several packages
        assert!(!found.contains(&"{at 1 [0]}".to_string()), "{found:?}");

        let groups = useful_groups(&invariants, &task.init);
        let groups = groups.iter().map(|g| strings(g).join(" ")).collect_vec();
        assert!(groups.contains(&"at(p1, ?X) in(p1, ?X)".to_string()), "{groups:?}");
        assert!(groups.contains(&"at(p2, ?X) in(p2, ?X)".to_string()), "{groups:?}");
        assert!(groups.contains(&"truck-at(t1, ?X)".to_string()), "{groups:?}");
    }

    #[test]
    fn crowded_groups_are_not_useful() {
        let invariants = vec![Invariant::new([InvariantPart {
            pred: Pred::named("at"),
            order: vec![0],
            omitted: Some(1),
        }])];
        let init = vec![atom("at", &["a", "x"]), atom("at", &["a", "y"]), atom("at", &["b", "x"])];
        let groups = useful_groups(&invariants, &init);
        assert_eq!(groups.len(), 1);
        assert_eq!(strings(&groups[0]), vec!["at(b, ?X)"]);
    }

    #[test]
    fn unbalanced_universal_effects() {
        // `reset` adds `on(?x)` for all objects at once, without deleting anything
        let domain = "(define (domain d)
          (:predicates (on ?x) (off ?x))
          (:action switch :parameters (?x) :precondition (off ?x) :effect (and (on ?x) (not (off ?x))))
          (:action reset :parameters () :effect (forall (?x) (on ?x))))";
        let problem = "(define (problem p) (:domain d) (:objects a b) (:init (off a) (off b)) (:goal (on a)))";
        let (_, invariants) = invariants_of(domain, problem);
        assert!(invariants.iter().all(|inv| inv.part(&Pred::named("on")).is_none()));
        let heavy = heavy_action(&invariants_task_action(domain, problem));
        assert_eq!(heavy.effects.len(), 2);
        assert_ne!(heavy.effects[0].parameters[0].name, heavy.effects[1].parameters[0].name);
    }

    #[test]
    fn inequality_preconditions_from_reachable_parameters() {
        let action = Action {
            name: Sym::from("move"),
            parameters: vec![
                crate::task::TypedParam::new("?a", "object"),
                crate::task::TypedParam::new("?b", "object"),
            ],
            num_external: 2,
            precondition: Condition::True,
            effects: vec![],
            cost: None,
        };
        let reachable: Vec<Args> = vec![
            [Sym::from("x"), Sym::from("y")].into_iter().collect(),
            [Sym::from("y"), Sym::from("x")].into_iter().collect(),
        ];
        let with = with_inequality_preconditions(&action, &reachable);
        assert_eq!(with.precondition.literals().map(|l| l.to_string()).collect_vec(), vec!["NegatedAtom =(?a, ?b)"]);

        let reachable: Vec<Args> = vec![[Sym::from("x"), Sym::from("x")].into_iter().collect()];
        let without = with_inequality_preconditions(&action, &reachable);
        assert_eq!(without.precondition, Condition::True);
    }
}
