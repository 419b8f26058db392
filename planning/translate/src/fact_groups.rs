//! Choice of the groups of mutually exclusive atoms that become finite-domain variables.

use std::collections::BTreeSet;
use std::io::Write;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use tracing::info;

use crate::errors::TranslateError;
use crate::invariants::{find_invariants, useful_groups, AtomPattern};
use crate::limits::Budget;
use crate::options::TranslateOptions;
use crate::sym::Sym;
use crate::task::{Args, Atom, Task};

/// Name of the value of a variable that holds when none of the atoms of its group is true.
pub const NONE_OF_THOSE: &str = "<none of those>";

#[derive(Clone, Debug, Default)]
pub struct FactGroups {
    /// Chosen groups, one per variable. Each reachable atom is in exactly one of them in the partial
    /// encoding, in at least one otherwise.
    pub groups: Vec<Vec<Atom>>,
    /// All groups of the invariants, and a singleton for each atom that is not covered by any of them
    pub mutex_groups: Vec<Vec<Atom>>,
    /// Name of the values of the variable of each group.
    pub translation_key: Vec<Vec<String>>,
}

impl FactGroups {
    /// Writes the chosen groups in a line-based format.
    pub fn write_groups(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "begin_groups")?;
        writeln!(out, "{}", self.groups.len())?;
        for group in &self.groups {
            writeln!(out, "group")?;
            writeln!(out, "{}", group.len())?;
            for atom in group {
                writeln!(out, "Atom {atom}")?;
            }
        }
        writeln!(out, "end_groups")
    }
}

/// Replaces the counted argument of each pattern by all objects that yield a reachable atom.
fn expand_group(group: &[AtomPattern], task: &Task, reachable: &HashSet<&Atom>) -> Vec<Atom> {
    let mut result = Vec::new();
    for pattern in group {
        let counted = pattern.args.iter().position(|a| a.is_none());
        let mut args: Args = pattern
            .args
            .iter()
            .map(|a| a.clone().unwrap_or_else(|| Sym::new("?X")))
            .collect();
        match counted {
            None => {
                let atom = Atom {
                    pred: pattern.pred.clone(),
                    args,
                };
                if reachable.contains(&atom) {
                    result.push(atom);
                }
            }
            Some(pos) => {
                for obj in &task.objects {
                    args[pos] = obj.name.clone();
                    let atom = Atom {
                        pred: pattern.pred.clone(),
                        args: args.clone(),
                    };
                    if reachable.contains(&atom) {
                        result.push(atom);
                    }
                }
            }
        }
    }
    result
}

/// Each group sorted, then the groups in lexicographic order.
fn sort_groups(groups: Vec<Vec<Atom>>) -> Vec<Vec<Atom>> {
    groups
        .into_iter()
        .map(|mut g| {
            g.sort();
            g
        })
        .sorted()
        .collect()
}

/// Greedily picks the largest group, the earliest one in case of ties, until all remaining groups
/// have at most one atom. In the partial encoding, the atoms of a chosen group are removed from all
/// other groups.
fn choose_groups(groups: &[Vec<Atom>], atoms: &[Atom], partial_encoding: bool) -> Vec<Vec<Atom>> {
    let mut sets: Vec<HashSet<&Atom>> = groups.iter().map(|g| g.iter().collect()).collect();
    let mut groups_of_fact: HashMap<&Atom, Vec<usize>> = HashMap::new();
    for (i, group) in groups.iter().enumerate() {
        for atom in group {
            groups_of_fact.entry(atom).or_default().push(i);
        }
    }
    let mut max_size = sets.iter().map(|s| s.len()).max().unwrap_or(0);
    // groups by size, possibly outdated: a group may be smaller than the bucket it is in
    let mut by_size: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); max_size + 1];
    for (i, set) in sets.iter().enumerate() {
        by_size[set.len()].insert(i);
    }

    let mut chosen = Vec::new();
    let mut covered: HashSet<&Atom> = HashSet::new();
    loop {
        let top = loop {
            if max_size <= 1 {
                break None;
            }
            match by_size[max_size].pop_first() {
                Some(g) if sets[g].len() == max_size => break Some(g),
                Some(g) => {
                    by_size[sets[g].len()].insert(g);
                }
                None => max_size -= 1,
            }
        };
        let Some(top) = top else {
            break;
        };
        let group = sets[top].iter().copied().collect_vec();
        if partial_encoding {
            for atom in &group {
                for &other in &groups_of_fact[*atom] {
                    sets[other].remove(*atom);
                }
            }
        }
        covered.extend(group.iter().copied());
        chosen.push(group.into_iter().cloned().collect_vec());
    }

    let uncovered = atoms.iter().filter(|a| !covered.contains(a)).collect_vec();
    info!("{} uncovered facts", uncovered.len());
    chosen.extend(uncovered.into_iter().map(|a| vec![a.clone()]));
    chosen
}

/// All groups, plus a singleton for each atom they do not cover.
fn collect_all_mutex_groups(groups: &[Vec<Atom>], atoms: &[Atom]) -> Vec<Vec<Atom>> {
    let covered: HashSet<&Atom> = groups.iter().flatten().collect();
    let mut result = groups.to_vec();
    result.extend(atoms.iter().filter(|a| !covered.contains(a)).map(|a| vec![a.clone()]));
    result
}

/// Value names of the variable of each group. A variable with a single atom `p` has the values
/// `Atom p` and `NegatedAtom p`; others have a value for each atom and a last one when none of them
/// holds.
fn build_translation_key(groups: &[Vec<Atom>]) -> Vec<Vec<String>> {
    groups
        .iter()
        .map(|group| {
            let mut key = group.iter().map(|atom| format!("Atom {atom}")).collect_vec();
            match group.as_slice() {
                [single] => key.push(format!("NegatedAtom {single}")),
                _ => key.push(NONE_OF_THOSE.to_string()),
            }
            key
        })
        .collect()
}

/// Computes the fact groups of the reachable `atoms` (in the order in which they were reached).
pub fn compute_groups(
    task: &Task,
    atoms: &[Atom],
    reachable_action_parameters: &HashMap<usize, Vec<Args>>,
    options: &TranslateOptions,
    budget: &Budget,
) -> Result<FactGroups, TranslateError> {
    let invariants = find_invariants(
        task,
        reachable_action_parameters,
        options.invariant_max_candidates,
        options.invariant_max_time,
        budget,
    )?;
    let _span = tracing::info_span!("groups").entered();
    let patterns = useful_groups(&invariants, &task.init);

    let reachable: HashSet<&Atom> = atoms.iter().collect();
    let groups = patterns
        .iter()
        .map(|group| expand_group(group, task, &reachable))
        .collect_vec();
    let groups = sort_groups(groups);
    let mutex_groups = collect_all_mutex_groups(&groups, atoms);
    let chosen = sort_groups(choose_groups(&groups, atoms, options.use_partial_encoding));
    let translation_key = build_translation_key(&chosen);
    Ok(FactGroups {
        groups: chosen,
        mutex_groups,
        translation_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::conditions::tests::atom;

    fn group(atoms: &[&str]) -> Vec<Atom> {
        atoms.iter().map(|a| atom(a, &[])).collect()
    }

    fn names(groups: &[Vec<Atom>]) -> Vec<Vec<String>> {
        groups.iter().map(|g| g.iter().map(|a| a.pred.to_string()).collect()).collect()
    }

    #[test]
    fn largest_groups_first() {
        let groups = vec![group(&["a", "b"]), group(&["b", "c", "d"]), group(&["d", "e"])];
        let atoms = group(&["a", "b", "c", "d", "e", "f"]);
        let chosen = sort_groups(choose_groups(&groups, &atoms, true));
        // {b, c, d} is chosen first, leaving {a} and {e} which are singletons
        assert_eq!(
            names(&chosen),
            vec![vec!["a"], vec!["b", "c", "d"], vec!["e"], vec!["f"]]
        );
    }

    #[test]
    fn ties_go_to_the_earliest_group() {
        let groups = vec![group(&["a", "b"]), group(&["b", "c"])];
        let atoms = group(&["a", "b", "c"]);
        let chosen = sort_groups(choose_groups(&groups, &atoms, true));
        assert_eq!(names(&chosen), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn full_encoding_keeps_shared_atoms() {
        let groups = vec![group(&["a", "b"]), group(&["b", "c"])];
        let atoms = group(&["a", "b", "c"]);
        let chosen = sort_groups(choose_groups(&groups, &atoms, false));
        assert_eq!(names(&chosen), vec![vec!["a", "b"], vec!["b", "c"]]);
    }

    #[test]
    fn mutex_groups_cover_all_atoms() {
        let groups = vec![group(&["a", "b"])];
        let atoms = group(&["a", "b", "c"]);
        assert_eq!(names(&collect_all_mutex_groups(&groups, &atoms)), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn translation_key() {
        let key = build_translation_key(&[vec![atom("at", &["p", "l1"]), atom("at", &["p", "l2"])], vec![atom("on", &["x"])]]);
        assert_eq!(key[0], vec!["Atom at(p, l1)", "Atom at(p, l2)", NONE_OF_THOSE]);
        assert_eq!(key[1], vec!["Atom on(x)", "NegatedAtom on(x)"]);
    }

    #[test]
    fn expansion_keeps_reachable_atoms() {
        let task = crate::task::convert::tests::task_of(
            "(define (domain d) (:predicates (at ?x ?y)))",
            "(define (problem p) (:domain d) (:objects a b c) (:init) (:goal (and)))",
        )
        .unwrap();
        let reachable_atoms = vec![atom("at", &["a", "b"]), atom("at", &["a", "c"])];
        let reachable = reachable_atoms.iter().collect();
        let pattern = AtomPattern {
            pred: crate::task::Pred::named("at"),
            args: vec![Some("a".into()), None],
        };
        let expanded = expand_group(&[pattern], &task, &reachable);
        assert_eq!(expanded, reachable_atoms);
    }
}
