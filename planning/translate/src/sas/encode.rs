//! Encoding of the ground task with the finite-domain variables of the chosen fact groups.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;
use itertools::Itertools;
use tracing::info;

use crate::axiom_rules::StratifiedAxioms;
use crate::errors::{Message, TranslateError};
use crate::fact_groups::FactGroups;
use crate::instantiate::{PropositionalAction, PropositionalAxiom};
use crate::sas::{Fact, MutexGroup, Operator, PrePost, SasAxiom, SasTask, Trivial, Variables};
use crate::task::{Atom, Literal};

/// Partial assignment of values to variables.
type Assignment = BTreeMap<usize, usize>;

/// Representation of each atom as facts of the finite-domain variables.
///
/// Variable `i` is built from the group `i`. Its values are the atoms of the group followed by a
/// value for "none of them".
pub struct Dictionary {
    ranges: Vec<usize>,
    facts: HashMap<Atom, Vec<Fact>>,
}

impl Dictionary {
    pub fn new(groups: &[Vec<Atom>]) -> Dictionary {
        let mut facts: HashMap<Atom, Vec<Fact>> = HashMap::new();
        for (var, group) in groups.iter().enumerate() {
            for (value, atom) in group.iter().enumerate() {
                facts.entry(atom.clone()).or_default().push(Fact::new(var, value));
            }
        }
        Dictionary {
            ranges: groups.iter().map(|g| g.len() + 1).collect(),
            facts,
        }
    }

    pub fn ranges(&self) -> &[usize] {
        &self.ranges
    }

    /// Facts representing the atom, empty for an atom that is not encoded.
    pub fn facts(&self, atom: &Atom) -> &[Fact] {
        self.facts.get(atom).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Checks that each of the `atoms` is represented by a single fact.
    fn check_partial(&self, atoms: &[Atom]) -> Result<(), TranslateError> {
        for atom in atoms {
            let n = self.facts(atom).len();
            if n != 1 {
                return Err(TranslateError::internal(format!("atom {atom} is encoded by {n} facts")));
            }
        }
        Ok(())
    }

    /// Translates a conjunction of literals into a disjunction of assignments, or `None` if the
    /// literals are contradictory.
    ///
    /// A negative literal is either enforced by restricting the values of a variable that is already
    /// constrained, or by requiring one of the other values of the smallest candidate variable. The
    /// result is multiplied out, starting with the variables with the fewest possible values.
    fn translate_conditions(&self, literals: &[Literal]) -> Option<Vec<Assignment>> {
        let mut condition: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for lit in literals.iter().filter(|l| !l.negated) {
            for fact in self.facts(&lit.atom) {
                if let Some(values) = condition.get(&fact.var) {
                    if !values.contains(&fact.value) {
                        return None;
                    }
                }
                condition.insert(fact.var, BTreeSet::from([fact.value]));
            }
        }

        for lit in literals.iter().filter(|l| l.negated) {
            let mut done = false;
            let mut candidates: Vec<(usize, BTreeSet<usize>)> = Vec::new();
            for fact in self.facts(&lit.atom) {
                match condition.get_mut(&fact.var) {
                    Some(values) => {
                        done = true;
                        values.remove(&fact.value);
                        if values.is_empty() {
                            return None;
                        }
                    }
                    None => {
                        let values = (0..self.ranges[fact.var]).filter(|&v| v != fact.value).collect();
                        candidates.push((fact.var, values));
                    }
                }
            }
            if !done {
                if let Some((var, values)) = candidates.into_iter().min_by_key(|(_, values)| values.len()) {
                    condition.insert(var, values);
                }
            }
        }

        let mut sorted = condition.into_iter().collect_vec();
        sorted.sort_by_key(|(_, values)| values.len());
        let mut flat = vec![Assignment::new()];
        for (var, values) in sorted {
            let mut next = Vec::with_capacity(flat.len() * values.len());
            for assignment in &flat {
                for &value in &values {
                    let mut assignment = assignment.clone();
                    assignment.insert(var, value);
                    next.push(assignment);
                }
            }
            flat = next;
        }
        Some(flat)
    }
}

/// Translation of conditions, checked against all mutex groups before being encoded.
struct Encoder<'a> {
    dictionary: &'a Dictionary,
    mutex_dictionary: &'a Dictionary,
    implied_effects_removed: usize,
    effect_conditions_simplified: usize,
}

impl Encoder<'_> {
    fn translate_conditions(&self, literals: &[Literal]) -> Option<Vec<Assignment>> {
        if literals.is_empty() {
            return Some(vec![Assignment::new()]);
        }
        self.mutex_dictionary.translate_conditions(literals)?;
        self.dictionary.translate_conditions(literals)
    }

    /// Negation (as a disjunction of assignments) of the disjunction of the conditions, or `None`
    /// if it is unsatisfiable.
    fn negate_and_translate(&self, conditions: &[&Vec<Literal>]) -> Option<Vec<Assignment>> {
        if conditions.iter().any(|c| c.is_empty()) {
            return None;
        }
        if conditions.is_empty() {
            return Some(vec![Assignment::new()]);
        }
        let mut negation = Vec::new();
        for combination in conditions.iter().map(|c| c.iter()).multi_cartesian_product() {
            let negated = combination.into_iter().map(Literal::negate).collect_vec();
            if let Some(assignments) = self.translate_conditions(&negated) {
                negation.extend(assignments);
            }
        }
        if negation.is_empty() { None } else { Some(negation) }
    }

    /// One operator per assignment satisfying the precondition of the action.
    fn translate_operator(&mut self, action: &PropositionalAction) -> Vec<Operator> {
        let Some(conditions) = self.translate_conditions(&action.precondition) else {
            return Vec::new();
        };
        conditions
            .into_iter()
            .filter_map(|condition| self.translate_operator_with(action, condition))
            .collect()
    }

    fn translate_operator_with(&mut self, action: &PropositionalAction, condition: Assignment) -> Option<Operator> {
        // var -> value -> conditions under which the variable takes the value
        let mut effects: BTreeMap<usize, BTreeMap<usize, Vec<Assignment>>> = BTreeMap::new();
        let mut add_conditions: BTreeMap<usize, Vec<&Vec<Literal>>> = BTreeMap::new();
        for (literals, atom) in &action.add_effects {
            let Some(assignments) = self.translate_conditions(literals) else {
                continue;
            };
            for fact in self.dictionary.facts(atom) {
                effects
                    .entry(fact.var)
                    .or_default()
                    .entry(fact.value)
                    .or_default()
                    .extend(assignments.iter().cloned());
                add_conditions.entry(fact.var).or_default().push(literals);
            }
        }

        let mut deletions: BTreeMap<usize, BTreeMap<usize, Vec<Assignment>>> = BTreeMap::new();
        for (literals, atom) in &action.del_effects {
            let Some(assignments) = self.translate_conditions(literals) else {
                continue;
            };
            for fact in self.dictionary.facts(atom) {
                deletions
                    .entry(fact.var)
                    .or_default()
                    .entry(fact.value)
                    .or_default()
                    .extend(assignments.iter().cloned());
            }
        }

        // a deleted value is replaced by "none of those" if it held and no add effect on the variable triggers
        for (var, deleted) in deletions {
            let adds = add_conditions.get(&var).map(Vec::as_slice).unwrap_or(&[]);
            let Some(no_add) = self.negate_and_translate(adds) else {
                continue;
            };
            let none_of_those = self.dictionary.ranges[var] - 1;
            for (value, assignments) in deleted {
                for mut assignment in assignments {
                    if assignment.get(&var).is_some_and(|&v| v != value) {
                        continue;
                    }
                    assignment.insert(var, value);
                    for no_add_assignment in &no_add {
                        let mut combined = assignment.clone();
                        let consistent = no_add_assignment
                            .iter()
                            .all(|(&cvar, &cval)| *combined.entry(cvar).or_insert(cval) == cval);
                        if consistent {
                            effects
                                .entry(var)
                                .or_default()
                                .entry(none_of_those)
                                .or_default()
                                .push(combined);
                        }
                    }
                }
            }
        }
        self.build_operator(&action.name, condition, &effects, action.cost)
    }

    fn build_operator(
        &mut self,
        name: &str,
        mut condition: Assignment,
        effects: &BTreeMap<usize, BTreeMap<usize, Vec<Assignment>>>,
        cost: i64,
    ) -> Option<Operator> {
        let prevail_and_pre = condition.clone();
        let mut pre_post = Vec::new();
        for (&var, effects_on_var) in effects {
            let pre = prevail_and_pre.get(&var).copied();
            let mut added_effect = false;
            for (&post, assignments) in effects_on_var {
                if pre == Some(post) {
                    self.implied_effects_removed += 1;
                    continue;
                }
                let mut eff_conditions = assignments
                    .iter()
                    .map(|a| a.iter().map(|(&v, &x)| Fact::new(v, x)).collect_vec())
                    .collect_vec();
                if self.dictionary.ranges[var] == 2
                    && prune_binary_effect_conditions(var, post, &mut eff_conditions, effects_on_var)
                {
                    self.effect_conditions_simplified += 1;
                }
                'conditions: for eff_condition in eff_conditions {
                    let mut filtered = Vec::with_capacity(eff_condition.len());
                    for fact in eff_condition {
                        match prevail_and_pre.get(&fact.var) {
                            // the effect can never trigger
                            Some(&value) if value != fact.value => continue 'conditions,
                            Some(_) => {}
                            None => filtered.push(fact),
                        }
                    }
                    pre_post.push(PrePost {
                        var,
                        pre,
                        post,
                        condition: filtered,
                    });
                    added_effect = true;
                }
            }
            if added_effect {
                condition.remove(&var);
            }
        }
        if pre_post.is_empty() {
            return None;
        }
        let prevail = condition.into_iter().map(|(var, value)| Fact::new(var, value)).collect();
        Some(Operator::new(name.to_string(), prevail, pre_post, cost))
    }

    fn translate_axiom(&self, axiom: &PropositionalAxiom) -> Result<Vec<SasAxiom>, TranslateError> {
        let Some(conditions) = self.translate_conditions(&axiom.condition) else {
            return Ok(Vec::new());
        };
        let &[effect] = self.dictionary.facts(&axiom.effect) else {
            return Err(TranslateError::internal(format!(
                "derived atom {} is not encoded by a single fact",
                axiom.effect
            )));
        };
        Ok(conditions
            .into_iter()
            .map(|c| SasAxiom::new(c.into_iter().map(|(var, value)| Fact::new(var, value)).collect(), effect))
            .collect())
    }
}

/// Simplifies the conditions of an effect `var := value` on a binary variable.
///
/// When no effect sets `var` to its other value, conditions requiring that other value are dropped,
/// and an empty condition subsumes all others. Returns true if the conditions were changed.
fn prune_binary_effect_conditions(
    var: usize,
    value: usize,
    conditions: &mut Vec<Vec<Fact>>,
    effects_on_var: &BTreeMap<usize, Vec<Assignment>>,
) -> bool {
    if matches!(conditions.as_slice(), [c] if c.is_empty()) {
        return false;
    }
    let dual_value = 1 - value;
    if effects_on_var.contains_key(&dual_value) {
        return false;
    }
    let dual = Fact::new(var, dual_value);
    let mut simplified = false;
    let mut unconditional = false;
    for condition in conditions.iter_mut() {
        let size = condition.len();
        condition.retain(|f| *f != dual);
        simplified |= condition.len() != size;
        if condition.is_empty() {
            unconditional = true;
            break;
        }
    }
    if unconditional {
        *conditions = vec![Vec::new()];
        return true;
    }
    simplified
}

/// Result of the encoding of a ground task.
#[derive(Debug)]
pub enum Encoded {
    Task(SasTask),
    Trivial(Trivial),
}

/// Encodes the ground task with one variable per chosen fact group.
///
/// `atoms` are all reachable fluent atoms, that must each be represented by the groups.
#[allow(clippy::too_many_arguments)]
pub fn encode_task(
    atoms: &[Atom],
    groups: &FactGroups,
    init: &[Atom],
    goal: &[Literal],
    actions: &[PropositionalAction],
    axioms: &StratifiedAxioms,
    metric: bool,
    use_partial_encoding: bool,
) -> Result<Encoded, TranslateError> {
    let _span = tracing::info_span!("encode").entered();
    let dictionary = Dictionary::new(&groups.groups);
    let mutex_dictionary = Dictionary::new(&groups.mutex_groups);
    if use_partial_encoding {
        dictionary.check_partial(atoms)?;
    } else if let Some(atom) = atoms.iter().find(|a| dictionary.facts(a).is_empty()) {
        return Err(TranslateError::internal(format!("atom {atom} is not encoded")));
    }
    let ranges = dictionary.ranges();

    // closed world assumption: variables start in their "none of those" value
    let mut init_values = ranges.iter().map(|r| r - 1).collect_vec();
    for atom in init {
        for fact in dictionary.facts(atom) {
            let current = init_values[fact.var];
            if current != ranges[fact.var] - 1 && current != fact.value {
                return Err(TranslateError::internal(format!("Inconsistent init facts! [fact = {atom}]")));
            }
            init_values[fact.var] = fact.value;
        }
    }

    let mut encoder = Encoder {
        dictionary: &dictionary,
        mutex_dictionary: &mutex_dictionary,
        implied_effects_removed: 0,
        effect_conditions_simplified: 0,
    };

    let Some(goal_assignments) = encoder.translate_conditions(goal) else {
        return Ok(Encoded::Trivial(Trivial::Unsolvable("Goal violates a mutex")));
    };
    let [goal_assignment] = goal_assignments.as_slice() else {
        return Err(Message::error("Negative goal not supported").into());
    };
    if goal_assignment.is_empty() {
        return Ok(Encoded::Trivial(Trivial::Solvable("Empty goal")));
    }
    let goal = goal_assignment
        .iter()
        .map(|(&var, &value)| Fact::new(var, value))
        .collect_vec();

    let mut operators = Vec::new();
    for action in actions {
        operators.extend(encoder.translate_operator(action));
    }
    let mut sas_axioms = Vec::new();
    for axiom in &axioms.axioms {
        sas_axioms.extend(encoder.translate_axiom(axiom)?);
    }
    info!("{} implied effects removed", encoder.implied_effects_removed);
    info!("{} effect conditions simplified", encoder.effect_conditions_simplified);

    let mut axiom_layers = vec![None; ranges.len()];
    for (atom, &layer) in &axioms.layers {
        let &[fact] = dictionary.facts(atom) else {
            return Err(TranslateError::internal(format!(
                "derived atom {atom} is not encoded by a single fact"
            )));
        };
        axiom_layers[fact.var] = Some(layer);
    }

    let mutexes = if use_partial_encoding {
        groups
            .mutex_groups
            .iter()
            .map(|group| MutexGroup::new(group.iter().filter_map(|atom| dictionary.facts(atom).first().copied())))
            .collect()
    } else {
        info!("using full encoding: between-variable mutex information skipped.");
        Vec::new()
    };

    Ok(Encoded::Task(SasTask {
        variables: Variables {
            ranges: ranges.to_vec(),
            axiom_layers,
            value_names: groups.translation_key.clone(),
        },
        mutexes,
        init: init_values,
        goal,
        operators,
        axioms: sas_axioms,
        metric,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::conditions::tests::atom;

    fn pos(pred: &str, args: &[&str]) -> Literal {
        atom(pred, args).positive()
    }

    fn neg(pred: &str, args: &[&str]) -> Literal {
        atom(pred, args).negative()
    }

    fn fact(var: usize, value: usize) -> Fact {
        Fact::new(var, value)
    }

    fn assignment(facts: &[(usize, usize)]) -> Assignment {
        facts.iter().copied().collect()
    }

    /// var0: at(t, a) at(t, b) at(t, c) <none>; var1: on() <not on>
    fn dictionary() -> Dictionary {
        Dictionary::new(&[
            vec![atom("at", &["t", "a"]), atom("at", &["t", "b"]), atom("at", &["t", "c"])],
            vec![atom("on", &[])],
        ])
    }

    fn encoder(dictionary: &Dictionary) -> Encoder<'_> {
        Encoder {
            dictionary,
            mutex_dictionary: dictionary,
            implied_effects_removed: 0,
            effect_conditions_simplified: 0,
        }
    }

    fn action(name: &str, pre: Vec<Literal>, add: Vec<(Vec<Literal>, Atom)>, del: Vec<(Vec<Literal>, Atom)>) -> PropositionalAction {
        PropositionalAction {
            name: name.to_string(),
            precondition: pre,
            add_effects: add,
            del_effects: del,
            cost: 1,
        }
    }

    #[test]
    fn positive_conditions() {
        let dict = dictionary();
        assert_eq!(
            dict.translate_conditions(&[pos("at", &["t", "b"]), pos("on", &[])]),
            Some(vec![assignment(&[(0, 1), (1, 0)])])
        );
        assert_eq!(dict.translate_conditions(&[pos("at", &["t", "a"]), pos("at", &["t", "b"])]), None);
    }

    #[test]
    fn negative_conditions_are_multiplied_out() {
        let dict = dictionary();
        assert_eq!(
            dict.translate_conditions(&[neg("at", &["t", "a"])]),
            Some(vec![assignment(&[(0, 1)]), assignment(&[(0, 2)]), assignment(&[(0, 3)])])
        );
        // restricting an existing condition
        assert_eq!(
            dict.translate_conditions(&[pos("at", &["t", "a"]), neg("at", &["t", "b"])]),
            Some(vec![assignment(&[(0, 0)])])
        );
        assert_eq!(dict.translate_conditions(&[pos("at", &["t", "a"]), neg("at", &["t", "a"])]), None);
        // binary variables need no multiplication
        assert_eq!(dict.translate_conditions(&[neg("on", &[])]), Some(vec![assignment(&[(1, 1)])]));
        // atoms that are never reached are false
        assert_eq!(dict.translate_conditions(&[neg("off", &[])]), Some(vec![assignment(&[])]));
    }

    #[test]
    fn move_operator() {
        let dict = dictionary();
        let mut enc = encoder(&dict);
        let mv = action(
            "(move t a b)",
            vec![pos("at", &["t", "a"]), pos("on", &[])],
            vec![(vec![], atom("at", &["t", "b"]))],
            vec![(vec![], atom("at", &["t", "a"]))],
        );
        let ops = enc.translate_operator(&mv);
        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.prevail, vec![fact(1, 0)]);
        // the deletion of at(t, a) is overridden by the addition of at(t, b)
        assert_eq!(
            op.pre_post,
            vec![PrePost {
                var: 0,
                pre: Some(0),
                post: 1,
                condition: vec![],
            }]
        );
    }

    #[test]
    fn deletions_set_none_of_those() {
        let dict = dictionary();
        let mut enc = encoder(&dict);
        let unload = action("(unload t a)", vec![pos("at", &["t", "a"])], vec![], vec![(vec![], atom("at", &["t", "a"]))]);
        let ops = enc.translate_operator(&unload);
        assert_eq!(ops[0].pre_post[0].pre, Some(0));
        assert_eq!(ops[0].pre_post[0].post, 3);
        assert!(ops[0].prevail.is_empty());
    }

    #[test]
    fn conditional_deletions_and_additions() {
        let dict = dictionary();
        let mut enc = encoder(&dict);
        // when on: add at(t, b); always delete at(t, a)
        let op = action(
            "(maybe-move)",
            vec![],
            vec![(vec![pos("on", &[])], atom("at", &["t", "b"]))],
            vec![(vec![], atom("at", &["t", "a"]))],
        );
        let ops = enc.translate_operator(&op);
        assert_eq!(ops.len(), 1);
        let pre_post = &ops[0].pre_post;
        assert_eq!(pre_post.len(), 2);
        // var0 := b if on
        assert_eq!(pre_post[0].post, 1);
        assert_eq!(pre_post[0].condition, vec![fact(1, 0)]);
        // var0 := none if at(t, a) and not on
        assert_eq!(pre_post[1].post, 3);
        assert_eq!(pre_post[1].condition, vec![fact(0, 0), fact(1, 1)]);
    }

    #[test]
    fn implied_effects_are_removed() {
        let dict = dictionary();
        let mut enc = encoder(&dict);
        let noop = action("(noop)", vec![pos("on", &[])], vec![(vec![], atom("on", &[]))], vec![]);
        assert!(enc.translate_operator(&noop).is_empty());
        assert_eq!(enc.implied_effects_removed, 1);
    }

    #[test]
    fn contradictory_effect_conditions_are_dropped() {
        let dict = dictionary();
        let mut enc = encoder(&dict);
        let op = action(
            "(op)",
            vec![pos("on", &[])],
            vec![
                (vec![neg("on", &[])], atom("at", &["t", "c"])),
                (vec![], atom("at", &["t", "b"])),
            ],
            vec![],
        );
        let ops = enc.translate_operator(&op);
        assert_eq!(ops[0].pre_post.len(), 1);
        assert_eq!(ops[0].pre_post[0].post, 1);
        assert_eq!(ops[0].prevail, vec![fact(1, 0)]);
    }

    #[test]
    fn binary_effect_conditions_are_pruned() {
        let dict = dictionary();
        let mut enc = encoder(&dict);
        // set on if not on or if at(t, a): the first condition is implied by the effect itself
        let op = action(
            "(op)",
            vec![],
            vec![
                (vec![neg("on", &[])], atom("on", &[])),
                (vec![pos("at", &["t", "a"])], atom("on", &[])),
            ],
            vec![],
        );
        let ops = enc.translate_operator(&op);
        assert_eq!(enc.effect_conditions_simplified, 1);
        assert_eq!(
            ops[0].pre_post,
            vec![PrePost {
                var: 1,
                pre: None,
                post: 0,
                condition: vec![],
            }]
        );
    }

    #[test]
    fn negative_preconditions_split_operators() {
        let dict = dictionary();
        let mut enc = encoder(&dict);
        let op = action("(op)", vec![neg("at", &["t", "a"])], vec![(vec![], atom("on", &[]))], vec![]);
        let ops = enc.translate_operator(&op);
        assert_eq!(ops.len(), 3);
        assert_eq!(ops.iter().map(|o| o.prevail[0]).collect_vec(), vec![fact(0, 1), fact(0, 2), fact(0, 3)]);
    }

    fn groups() -> FactGroups {
        let groups = vec![
            vec![atom("at", &["t", "a"]), atom("at", &["t", "b"])],
            vec![atom("ok", &[])],
        ];
        FactGroups {
            translation_key: vec![
                vec!["Atom at(t, a)".into(), "Atom at(t, b)".into(), "<none of those>".into()],
                vec!["Atom ok()".into(), "NegatedAtom ok()".into()],
            ],
            mutex_groups: groups.clone(),
            groups,
        }
    }

    #[test]
    fn full_task() {
        let groups = groups();
        let atoms = groups.groups.concat();
        let mv = action(
            "(move t a b)",
            vec![pos("at", &["t", "a"])],
            vec![(vec![], atom("at", &["t", "b"]))],
            vec![(vec![], atom("at", &["t", "a"]))],
        );
        let axiom = PropositionalAxiom {
            name: "(ok)".into(),
            condition: vec![pos("at", &["t", "b"])],
            effect: atom("ok", &[]),
        };
        let axioms = StratifiedAxioms {
            axioms: vec![axiom],
            layers: [(atom("ok", &[]), 0)].into_iter().collect(),
        };
        let init = vec![atom("at", &["t", "a"]), atom("road", &["a", "b"])];
        let goal = vec![pos("ok", &[])];
        let Encoded::Task(task) = encode_task(&atoms, &groups, &init, &goal, &[mv], &axioms, false, true).unwrap()
        else {
            panic!("expected a task")
        };
        assert!(task.check().is_ok());
        assert_eq!(task.init, vec![0, 1]);
        assert_eq!(task.goal, vec![fact(1, 0)]);
        assert_eq!(task.variables.axiom_layers, vec![None, Some(0)]);
        assert_eq!(task.operators.len(), 1);
        assert_eq!(task.axioms, vec![SasAxiom::new(vec![fact(0, 1)], fact(1, 0))]);
        assert_eq!(task.mutexes.len(), 2);
    }

    #[test]
    fn trivial_goals() {
        let groups = groups();
        let atoms = groups.groups.concat();
        let axioms = StratifiedAxioms::default();
        let run = |goal: &[Literal]| encode_task(&atoms, &groups, &[], goal, &[], &axioms, false, true);
        assert!(matches!(run(&[]), Ok(Encoded::Trivial(Trivial::Solvable(_)))));
        assert!(matches!(
            run(&[pos("at", &["t", "a"]), pos("at", &["t", "b"])]),
            Ok(Encoded::Trivial(Trivial::Unsolvable(_)))
        ));
        assert!(matches!(run(&[neg("at", &["t", "a"])]), Err(TranslateError::Input(_))));
    }

    #[test]
    fn atoms_are_encoded_once() {
        let groups = groups();
        let mut atoms = groups.groups.concat();
        atoms.push(atom("lost", &[]));
        let axioms = StratifiedAxioms::default();
        let result = encode_task(&atoms, &groups, &[], &[], &[], &axioms, false, true);
        assert!(matches!(result, Err(TranslateError::Internal(_))));
    }
}
