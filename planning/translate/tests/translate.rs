use aries_translate::errors::TranslateError;
use aries_translate::options::TranslateOptions;
use aries_translate::sas::{Fact, SasTask};
use aries_translate::translate::Outcome;
use std::collections::VecDeque;

use hashbrown::HashSet;
use itertools::Itertools;

mod common;

use common::{translate_fixture, translate_with};

/// Options under which no part of the task is simplified away.
fn unsimplified() -> TranslateOptions {
    TranslateOptions {
        use_partial_encoding: false,
        filter_unreachable_facts: false,
        filter_unimportant_vars: false,
        reorder_variables: false,
        ..Default::default()
    }
}

fn translated(outcome: Outcome) -> SasTask {
    match outcome {
        Outcome::Translated { task, .. } => task,
        Outcome::Unsolvable(_) => panic!("task was unexpectedly found unsolvable"),
    }
}

/// No operator requires two facts of the same variable or of the same mutex group.
fn check_operators_respect_mutexes(task: &SasTask) {
    for op in &task.operators {
        let conditions = op.applicability_conditions();
        assert!(conditions.iter().map(|f| f.var).all_unique(), "{}", op.name);
        for mutex in &task.mutexes {
            let in_group = conditions.iter().filter(|f| mutex.facts.contains(f)).count();
            assert!(in_group <= 1, "{} violates a mutex", op.name);
        }
    }
}

type State = Vec<usize>;

fn holds(state: &[usize], fact: &Fact) -> bool {
    state[fact.var] == fact.value
}

/// Resets the derived variables to their default value and applies the axioms layer by layer.
fn evaluate_axioms(task: &SasTask, state: &mut State) {
    for (var, layer) in task.variables.axiom_layers.iter().enumerate() {
        if layer.is_some() {
            state[var] = task.init[var];
        }
    }
    let layers = task.variables.axiom_layers.iter().flatten().copied().sorted().dedup();
    for layer in layers {
        let axioms = task
            .axioms
            .iter()
            .filter(|ax| task.variables.axiom_layers[ax.effect.var] == Some(layer))
            .collect_vec();
        let mut changed = true;
        while changed {
            changed = false;
            for axiom in &axioms {
                if !holds(state, &axiom.effect) && axiom.condition.iter().all(|c| holds(state, c)) {
                    state[axiom.effect.var] = axiom.effect.value;
                    changed = true;
                }
            }
        }
    }
}

fn successors(task: &SasTask, state: &State) -> Vec<State> {
    let mut result = Vec::new();
    for op in &task.operators {
        if !op.applicability_conditions().iter().all(|f| holds(state, f)) {
            continue;
        }
        let mut next = state.clone();
        for pp in &op.pre_post {
            if pp.condition.iter().all(|c| holds(state, c)) {
                next[pp.var] = pp.post;
            }
        }
        evaluate_axioms(task, &mut next);
        result.push(next);
    }
    result
}

/// States reachable from the initial state, explored breadth-first up to `limit` states.
fn reachable_states(task: &SasTask, limit: usize) -> Vec<State> {
    let mut init = task.init.clone();
    evaluate_axioms(task, &mut init);
    let mut seen: HashSet<State> = HashSet::new();
    let mut queue = VecDeque::from([init]);
    let mut states = Vec::new();
    while let Some(state) = queue.pop_front() {
        if states.len() >= limit {
            break;
        }
        if !seen.insert(state.clone()) {
            continue;
        }
        queue.extend(successors(task, &state).into_iter().filter(|s| !seen.contains(s)));
        states.push(state);
    }
    states
}

/// Applying operators never makes two facts of a mutex group true at the same time.
fn check_mutexes_hold(task: &SasTask, states: &[State]) {
    for state in states {
        for mutex in &task.mutexes {
            let true_facts = mutex.facts.iter().filter(|f| holds(state, f)).count();
            assert!(true_facts <= 1, "mutex {:?} violated in state {state:?}", mutex.facts);
        }
    }
}

fn goal_reached(task: &SasTask, states: &[State]) -> bool {
    states.iter().any(|s| task.goal.iter().all(|g| holds(s, g)))
}

/// Each axiom only depends on lower layers, or on positive values of its own layer.
fn check_stratification(task: &SasTask) {
    for axiom in &task.axioms {
        let Some(layer) = task.variables.axiom_layers[axiom.effect.var] else {
            panic!("axiom on a non-derived variable")
        };
        for cond in &axiom.condition {
            if let Some(cond_layer) = task.variables.axiom_layers[cond.var] {
                assert!(cond_layer <= layer);
                if cond.value == 1 {
                    assert!(cond_layer < layer);
                }
            }
        }
    }
}

fn solvable(name: &str) -> Result<(), TranslateError> {
    let outcome = translate_fixture(name)?;
    assert_eq!(outcome.exit_code(), TranslateError::EXIT_SUCCESS);
    let task = translated(outcome);
    task.check()?;
    let text = task.to_sas_string();
    assert!(text.starts_with("begin_version\n3\nend_version\nbegin_metric\n"));
    check_operators_respect_mutexes(&task);
    check_stratification(&task);
    let states = reachable_states(&task, 20_000);
    check_mutexes_hold(&task, &states);
    assert!(goal_reached(&task, &states));

    // translating again gives exactly the same output
    let again = translated(translate_fixture(name)?);
    assert_eq!(text, again.to_sas_string());

    let unsimplified = translated(translate_with(name, &unsimplified())?);
    unsimplified.check()?;
    assert!(unsimplified.variables.len() >= task.variables.len());
    Ok(())
}

#[cfg(test)]
mod fixtures {
    use super::solvable;

    macro_rules! make_test {
        ($name:ident) => {
            paste::item! {
                #[test]
                fn [< translate_ $name >] () {
                    let result = solvable(stringify!($name));
                    assert!(result.is_ok(), "\x1b[91m{:?}\x1b[0m", result.err().unwrap());
                }
            }
        };
    }

    make_test!(gripper);
    make_test!(trucks);
    make_test!(blocksworld);
    make_test!(briefcase);
    make_test!(lights);
    make_test!(costs);
    make_test!(conditional_delete);
    make_test!(universal_add);
}

/// The package may end up at several locations, which no fact group may hide.
fn package_can_be_at_two_places(name: &str) -> Result<(), TranslateError> {
    let task = translated(translate_fixture(name)?);
    let states = reachable_states(&task, 1_000);
    check_mutexes_hold(&task, &states);
    assert!(goal_reached(&task, &states));
    let at = |loc: &str| format!("Atom at(p, {loc})");
    for mutex in &task.mutexes {
        let names = mutex
            .facts
            .iter()
            .map(|f| task.variables.value_names[f.var][f.value].as_str())
            .collect_vec();
        assert!(!(names.contains(&at("l2").as_str()) && names.contains(&at("l3").as_str())), "{names:?}");
    }
    Ok(())
}

#[test]
fn conditional_delete_breaks_invariant() -> Result<(), TranslateError> {
    package_can_be_at_two_places("conditional_delete")
}

#[test]
fn universal_add_breaks_invariant() -> Result<(), TranslateError> {
    package_can_be_at_two_places("universal_add")
}

#[test]
fn gripper_variables() -> Result<(), TranslateError> {
    let task = translated(translate_fixture("gripper")?);
    // robby, one variable per gripper and one per ball
    let ranges = task.variables.ranges.iter().copied().sorted().collect_vec();
    assert_eq!(ranges, vec![2, 3, 3, 3, 3, 5, 5]);
    assert_eq!(task.operators.len(), 34);
    assert_eq!(task.goal.len(), 4);
    assert!(!task.metric);
    assert!(task.operators.iter().all(|op| op.cost == 1));
    Ok(())
}

#[test]
fn one_variable_per_truck() -> Result<(), TranslateError> {
    let task = translated(translate_fixture("trucks")?);
    assert_eq!(task.variables.len(), 2);
    assert_eq!(task.variables.ranges, vec![3, 3]);
    for names in &task.variables.value_names {
        let trucks: HashSet<&str> = names
            .iter()
            .map(|name| if name.contains("t1,") { "t1" } else { "t2" })
            .collect();
        assert_eq!(trucks.len(), 1, "{names:?}");
        assert!(names.iter().all(|name| name.starts_with("Atom at(")));
    }
    Ok(())
}

#[test]
fn partial_encoding_covers_each_atom_once() -> Result<(), TranslateError> {
    for name in ["gripper", "blocksworld", "briefcase"] {
        let outcome = translate_fixture(name)?;
        let groups = outcome.groups().expect("translated tasks have groups");
        let atoms = groups.groups.iter().flatten().collect_vec();
        assert!(atoms.iter().all_unique(), "{name}");
        for (group, key) in groups.groups.iter().zip(&groups.translation_key) {
            for (atom, value_name) in group.iter().zip(key) {
                assert_eq!(value_name, &format!("Atom {atom}"));
            }
        }
    }
    Ok(())
}

#[test]
fn full_encoding_keeps_every_group() -> Result<(), TranslateError> {
    let options = TranslateOptions {
        use_partial_encoding: false,
        ..Default::default()
    };
    let full = translate_with("gripper", &options)?;
    let partial = translate_fixture("gripper")?;
    let full_groups = full.groups().expect("translated");
    let partial_groups = partial.groups().expect("translated");
    let total = |groups: &Vec<Vec<_>>| groups.iter().map(Vec::len).sum::<usize>();
    assert!(total(&full_groups.groups) > total(&partial_groups.groups));
    translated(full).check()?;
    Ok(())
}

#[test]
fn action_costs() -> Result<(), TranslateError> {
    let task = translated(translate_fixture("costs")?);
    assert!(task.metric);
    let costs = task
        .operators
        .iter()
        .map(|op| (op.name.as_str(), op.cost))
        .sorted()
        .collect_vec();
    assert_eq!(costs, vec![("(drive a b)", 2), ("(drive a c)", 7), ("(drive b c)", 3)]);
    Ok(())
}

#[test]
fn derived_predicates_are_layered() -> Result<(), TranslateError> {
    let task = translated(translate_fixture("lights")?);
    assert!(!task.axioms.is_empty());
    let layers: HashSet<u32> = task.variables.axiom_layers.iter().flatten().copied().collect();
    // `some-dark` negates `lit`, so they cannot share a layer
    assert!(layers.len() >= 2);
    check_stratification(&task);
    Ok(())
}

#[test]
fn unproducible_goal_is_unsolvable() -> Result<(), TranslateError> {
    let outcome = translate_fixture("unreachable_goal")?;
    assert!(matches!(outcome, Outcome::Unsolvable(_)));
    assert_eq!(outcome.exit_code(), TranslateError::EXIT_UNSOLVABLE);
    assert_eq!(outcome.task().to_sas_string(), SasTask::unsolvable().to_sas_string());
    assert_eq!(outcome.task().goal, vec![Fact::new(0, 1)]);
    Ok(())
}

#[test]
fn negative_cycle_is_rejected() {
    let result = translate_fixture("negative_cycle");
    let Err(err) = result else {
        panic!("axioms with a negative cycle were accepted")
    };
    assert!(matches!(err, TranslateError::Stratification(_)), "{err}");
    assert_eq!(err.exit_code(), 31);
}

#[test]
fn groups_can_be_dumped() -> Result<(), TranslateError> {
    let outcome = translate_fixture("trucks")?;
    let mut out = Vec::new();
    outcome.groups().expect("translated").write_groups(&mut out).expect("write to a vector");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.starts_with("begin_groups\n"));
    assert!(text.ends_with("end_groups\n"));
    assert!(text.contains("Atom at(t1, l1)\n"));
    Ok(())
}
