//! The translation pipeline, from PDDL inputs to a finite-domain task.

use std::fmt::Write;

use hashbrown::HashSet;
use itertools::Itertools;
use tracing::{info, info_span};

use crate::axiom_rules::{handle_axioms, StratifiedAxioms};
use crate::errors::TranslateError;
use crate::fact_groups::{compute_groups, FactGroups};
use crate::instantiate::{explore, PropositionalAction};
use crate::limits::Budget;
use crate::normalize::normalize;
use crate::options::TranslateOptions;
use crate::pddl::input::Input;
use crate::pddl::{parse_pddl_domain, parse_pddl_problem};
use crate::sas::encode::{encode_task, Encoded};
use crate::sas::simplify::filter_unreachable_propositions;
use crate::sas::variable_order::find_and_apply_variable_order;
use crate::sas::{SasTask, Trivial};
use crate::task::convert::build_task;
use crate::task::names::{AxiomNames, VariableNames};
use crate::task::{Atom, Literal, Task};

/// Result of a successful run of the translator.
#[derive(Debug)]
pub enum Outcome {
    /// The translated task (possibly a dummy task whose goal holds initially), together with the
    /// fact groups its variables were built from.
    Translated { task: SasTask, groups: FactGroups },
    /// The task was proven unsolvable, the contained task is a dummy unsolvable task.
    Unsolvable(SasTask),
}

impl Outcome {
    pub fn task(&self) -> &SasTask {
        match self {
            Outcome::Translated { task, .. } | Outcome::Unsolvable(task) => task,
        }
    }

    pub fn groups(&self) -> Option<&FactGroups> {
        match self {
            Outcome::Translated { groups, .. } => Some(groups),
            Outcome::Unsolvable(_) => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Translated { .. } => TranslateError::EXIT_SUCCESS,
            Outcome::Unsolvable(_) => TranslateError::EXIT_UNSOLVABLE,
        }
    }

    fn trivial(trivial: Trivial, groups: FactGroups) -> Outcome {
        info!("{trivial}");
        match trivial {
            Trivial::Unsolvable(_) => Outcome::Unsolvable(trivial.task()),
            Trivial::Solvable(_) => Outcome::Translated {
                task: trivial.task(),
                groups,
            },
        }
    }
}

/// Parses a domain and a problem and translates them.
pub fn translate(
    domain: Input,
    problem: Input,
    options: &TranslateOptions,
    budget: &Budget,
) -> Result<Outcome, TranslateError> {
    let task = parse(domain, problem)?;
    translate_task(&task, options, budget)
}

/// Builds the normalized task of a domain and a problem.
pub fn parse(domain: Input, problem: Input) -> Result<Task, TranslateError> {
    let task = {
        let _span = info_span!("parse").entered();
        let domain = parse_pddl_domain(domain)?;
        let problem = parse_pddl_problem(problem)?;
        build_task(&domain, &problem, &mut VariableNames::default())?
    };
    let mut names = AxiomNames::new(task.predicates.iter().map(|p| &p.name));
    Ok(normalize(task, &mut names)?)
}

/// Translates a normalized task.
pub fn translate_task(task: &Task, options: &TranslateOptions, budget: &Budget) -> Result<Outcome, TranslateError> {
    let ground = explore(task, budget)?;
    if !ground.relaxed_reachable {
        return Ok(Outcome::trivial(Trivial::Unsolvable("No relaxed solution"), FactGroups::default()));
    }
    let Some(goal) = &ground.goal else {
        return Ok(Outcome::trivial(Trivial::Unsolvable("Trivially false goal"), FactGroups::default()));
    };
    budget.check()?;

    let groups = compute_groups(task, &ground.atoms, &ground.reachable_action_parameters, options, budget)?;
    budget.check()?;

    let axioms = handle_axioms(&ground.actions, ground.axioms.clone(), goal, options.layer_strategy)?;
    if options.dump_task {
        let fluent: HashSet<&Atom> = ground.atoms.iter().collect();
        let fluent_init = task.init.iter().filter(|a| fluent.contains(a)).collect_vec();
        info!("Grounded task:\n{}", dump_task(&fluent_init, goal, &ground.actions, &axioms));
    }

    let encoded = encode_task(
        &ground.atoms,
        &groups,
        &task.init,
        goal,
        &ground.actions,
        &axioms,
        task.use_min_cost_metric,
        options.use_partial_encoding,
    )?;
    let mut sas = match encoded {
        Encoded::Task(sas) => sas,
        Encoded::Trivial(trivial) => return Ok(Outcome::trivial(trivial, groups)),
    };
    budget.check()?;

    if options.filter_unreachable_facts {
        if let Err(trivial) = filter_unreachable_propositions(&mut sas) {
            return Ok(Outcome::trivial(trivial, groups));
        }
    }
    find_and_apply_variable_order(&mut sas, options.reorder_variables, options.filter_unimportant_vars);
    sas.check()?;
    Ok(Outcome::Translated { task: sas, groups })
}

/// Textual description of the grounded task, before its finite-domain encoding.
fn dump_task(init: &[&Atom], goal: &[Literal], actions: &[PropositionalAction], axioms: &StratifiedAxioms) -> String {
    let mut out = String::new();
    // writing to a string cannot fail
    let _ = write_task(&mut out, init, goal, actions, axioms);
    out
}

fn write_task(
    out: &mut String,
    init: &[&Atom],
    goal: &[Literal],
    actions: &[PropositionalAction],
    axioms: &StratifiedAxioms,
) -> std::fmt::Result {
    writeln!(out, "Initial state")?;
    for atom in init {
        writeln!(out, "{atom}")?;
    }
    writeln!(out, "\nGoals")?;
    for lit in goal {
        writeln!(out, "{lit}")?;
    }
    for action in actions {
        writeln!(out, "\nAction\n{action}")?;
    }
    for axiom in &axioms.axioms {
        writeln!(out, "\nAxiom\n{axiom}")?;
    }
    writeln!(out, "\nAxiom layers")?;
    for (atom, layer) in axioms.layers.iter().sorted() {
        writeln!(out, "{atom}: layer {layer}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(domain: &str, problem: &str) -> Result<Outcome, TranslateError> {
        translate(
            Input::from_string(domain),
            Input::from_string(problem),
            &TranslateOptions::default(),
            &Budget::unlimited(),
        )
    }

    const DOMAIN: &str = "(define (domain switch)
      (:predicates (on ?s) (off ?s))
      (:action turn-on :parameters (?s) :precondition (off ?s) :effect (and (on ?s) (not (off ?s))))
      (:action turn-off :parameters (?s) :precondition (on ?s) :effect (and (off ?s) (not (on ?s)))))";

    #[test]
    fn switches() -> Result<(), TranslateError> {
        let problem = "(define (problem p) (:domain switch) (:objects a b)
          (:init (off a) (off b)) (:goal (on a)))";
        let outcome = run(DOMAIN, problem)?;
        assert_eq!(outcome.exit_code(), 0);
        let task = outcome.task();
        // b is irrelevant to the goal
        assert_eq!(task.variables.len(), 1);
        assert_eq!(task.variables.value_names[0], vec!["Atom off(a)", "Atom on(a)"]);
        assert_eq!(task.init, vec![0]);
        assert_eq!(task.goal.len(), 1);
        assert_eq!(task.goal[0].value, 1);
        let operators = task.operators.iter().map(|o| o.name.as_str()).sorted().collect_vec();
        assert_eq!(operators, vec!["(turn-off a)", "(turn-on a)"]);
        Ok(())
    }

    #[test]
    fn unreachable_goal() -> Result<(), TranslateError> {
        // nothing can ever turn b off
        let problem = "(define (problem p) (:domain switch) (:objects a b)
          (:init (on a)) (:goal (and (on a) (off b))))";
        let outcome = run(DOMAIN, problem)?;
        assert!(matches!(outcome, Outcome::Unsolvable(_)));
        assert_eq!(outcome.exit_code(), 10);
        assert_eq!(outcome.task().goal, SasTask::unsolvable().goal);
        Ok(())
    }

    #[test]
    fn goal_true_initially() -> Result<(), TranslateError> {
        let problem = "(define (problem p) (:domain switch) (:objects a)
          (:init (on a)) (:goal (on a)))";
        let outcome = run(DOMAIN, problem)?;
        assert!(matches!(outcome, Outcome::Translated { .. }));
        let task = outcome.task();
        assert_eq!(task.init[0], task.goal[0].value);
        Ok(())
    }

    #[test]
    fn dumped_task() {
        let action = PropositionalAction {
            name: "(turn-on a)".into(),
            precondition: vec![Atom::new(crate::task::Pred::named("off"), ["a".into()]).positive()],
            add_effects: vec![],
            del_effects: vec![],
            cost: 1,
        };
        let init = Atom::new(crate::task::Pred::named("off"), ["a".into()]);
        let text = dump_task(&[&init], &[], &[action], &StratifiedAxioms::default());
        assert!(text.starts_with("Initial state\noff(a)\n\nGoals\n\nAction\n(turn-on a)\nPRE: Atom off(a)\n"));
        assert!(text.ends_with("Axiom layers\n"));
    }
}
