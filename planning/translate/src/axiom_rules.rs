//! Stratification of the propositional axioms.
//!
//! Derived atoms that can influence neither the goal nor an action are dropped, the remaining axioms
//! are simplified and each derived atom is assigned to a layer such that an axiom only depends
//! positively on atoms of its own or lower layers, and negatively on atoms of strictly lower layers.

use std::collections::BTreeSet;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use tracing::{debug, info};

use crate::errors::TranslateError;
use crate::graph::strongly_connected_components;
use crate::instantiate::{PropositionalAction, PropositionalAxiom};
use crate::options::LayerStrategy;
use crate::task::{Atom, Literal};

/// Axioms of the necessary derived atoms, together with the layer of each of these atoms.
#[derive(Clone, Debug, Default)]
pub struct StratifiedAxioms {
    /// Axioms grouped by strongly connected component, then by derived atom.
    pub axioms: Vec<PropositionalAxiom>,
    pub layers: HashMap<Atom, u32>,
}

/// Dependencies of each derived atom on the derived atoms in the body of its axioms.
struct Dependencies {
    derived: BTreeSet<Atom>,
    positive: HashMap<Atom, BTreeSet<Atom>>,
    negative: HashMap<Atom, BTreeSet<Atom>>,
}

impl Dependencies {
    fn new(axioms: &[PropositionalAxiom]) -> Self {
        let derived: BTreeSet<Atom> = axioms.iter().map(|ax| ax.effect.clone()).collect();
        let mut positive: HashMap<Atom, BTreeSet<Atom>> = HashMap::new();
        let mut negative: HashMap<Atom, BTreeSet<Atom>> = HashMap::new();
        for axiom in axioms {
            for lit in &axiom.condition {
                if derived.contains(&lit.atom) {
                    let deps = if lit.negated { &mut negative } else { &mut positive };
                    deps.entry(axiom.effect.clone()).or_default().insert(lit.atom.clone());
                }
            }
        }
        Dependencies {
            derived,
            positive,
            negative,
        }
    }

    fn dependencies_of<'a>(&'a self, atom: &Atom) -> impl Iterator<Item = &'a Atom> + 'a {
        let pos = self.positive.get(atom).into_iter().flatten();
        let neg = self.negative.get(atom).into_iter().flatten();
        pos.chain(neg)
    }

    /// Derived atoms that occur in the goal or in a condition of an action, and those they depend on.
    fn necessary_atoms(&self, actions: &[PropositionalAction], goal: &[Literal]) -> HashSet<Atom> {
        let action_conditions = actions.iter().flat_map(|a| {
            let effect_conditions = a
                .add_effects
                .iter()
                .chain(a.del_effects.iter())
                .flat_map(|(cond, _)| cond.iter());
            a.precondition.iter().chain(effect_conditions)
        });
        let mut necessary: HashSet<Atom> = HashSet::new();
        let mut queue = Vec::new();
        for lit in goal.iter().chain(action_conditions) {
            if self.derived.contains(&lit.atom) && necessary.insert(lit.atom.clone()) {
                queue.push(lit.atom.clone());
            }
        }
        while let Some(atom) = queue.pop() {
            for dep in self.dependencies_of(&atom) {
                if necessary.insert(dep.clone()) {
                    queue.push(dep.clone());
                }
            }
        }
        necessary
    }

    fn retain(&mut self, necessary: &HashSet<Atom>) {
        self.derived.retain(|atom| necessary.contains(atom));
        self.positive.retain(|atom, _| necessary.contains(atom));
        self.negative.retain(|atom, _| necessary.contains(atom));
    }
}

/// Removes duplicate literals, duplicate axioms and the axioms whose condition is a superset of the
/// condition of another axiom. All axioms must have the same effect.
fn simplify_axioms(mut axioms: Vec<PropositionalAxiom>) -> Vec<PropositionalAxiom> {
    for axiom in &mut axioms {
        axiom.condition.sort();
        axiom.condition.dedup();
    }

    let mut skipped = vec![false; axioms.len()];
    let mut axioms_by_literal: HashMap<&Literal, HashSet<usize>> = HashMap::new();
    for (i, axiom) in axioms.iter().enumerate() {
        // a condition on its own effect can never be useful
        if axiom.condition.iter().any(|l| !l.negated && l.atom == axiom.effect) {
            skipped[i] = true;
        } else {
            for lit in &axiom.condition {
                axioms_by_literal.entry(lit).or_default().insert(i);
            }
        }
    }

    for (i, axiom) in axioms.iter().enumerate() {
        if skipped[i] {
            continue;
        }
        let Some((first, rest)) = axiom.condition.split_first() else {
            // an unconditional axiom dominates all others
            return vec![axiom.clone()];
        };
        let mut dominated = axioms_by_literal[first].clone();
        for lit in rest {
            let with_lit = &axioms_by_literal[lit];
            dominated.retain(|j| with_lit.contains(j));
        }
        for j in dominated {
            if j != i {
                skipped[j] = true;
            }
        }
    }
    drop(axioms_by_literal);
    axioms
        .into_iter()
        .zip(skipped)
        .filter_map(|(axiom, skip)| (!skip).then_some(axiom))
        .collect()
}

/// A strongly connected component of the dependency graph of derived atoms.
struct Cluster {
    variables: Vec<Atom>,
    axioms: Vec<Vec<PropositionalAxiom>>,
    positive_children: BTreeSet<usize>,
    negative_children: BTreeSet<usize>,
    layer: u32,
}

/// Keeps the axioms of the necessary derived atoms, simplifies them and computes the layer of every
/// derived atom according to `strategy`.
///
/// Fails with a stratification error if a derived atom negatively depends on an atom of its own
/// strongly connected component.
pub fn handle_axioms(
    actions: &[PropositionalAction],
    axioms: Vec<PropositionalAxiom>,
    goal: &[Literal],
    strategy: LayerStrategy,
) -> Result<StratifiedAxioms, TranslateError> {
    let _span = tracing::info_span!("axioms").entered();
    let mut deps = Dependencies::new(&axioms);
    let necessary = deps.necessary_atoms(actions, goal);
    deps.retain(&necessary);

    // sorted for determinism
    let variables = deps.derived.iter().cloned().collect_vec();
    let index_of: HashMap<&Atom, usize> = variables.iter().enumerate().map(|(i, v)| (v, i)).collect();
    let successors = variables
        .iter()
        .map(|v| {
            let mut succ = deps.dependencies_of(v).map(|dep| index_of[dep]).collect_vec();
            succ.sort_unstable();
            succ.dedup();
            succ
        })
        .collect_vec();
    let components = strongly_connected_components(&successors);

    let mut cluster_of = vec![0; variables.len()];
    let mut position_in_cluster = vec![0; variables.len()];
    let mut clusters = Vec::with_capacity(components.len());
    for (c, component) in components.iter().enumerate() {
        for (p, &v) in component.iter().enumerate() {
            cluster_of[v] = c;
            position_in_cluster[v] = p;
        }
        clusters.push(Cluster {
            variables: component.iter().map(|&v| variables[v].clone()).collect(),
            axioms: vec![Vec::new(); component.len()],
            positive_children: BTreeSet::new(),
            negative_children: BTreeSet::new(),
            layer: 0,
        });
    }

    for axiom in axioms {
        // axioms of unnecessary atoms are dropped
        if let Some(&v) = index_of.get(&axiom.effect) {
            clusters[cluster_of[v]].axioms[position_in_cluster[v]].push(axiom);
        }
    }

    let mut removed = 0;
    for cluster in &mut clusters {
        for axioms in &mut cluster.axioms {
            let before = axioms.len();
            *axioms = simplify_axioms(std::mem::take(axioms));
            removed += before - axioms.len();
        }
    }
    info!("{removed} axioms removed by simplifying");

    for (v, var) in variables.iter().enumerate() {
        let from = cluster_of[v];
        for dep in deps.positive.get(var).into_iter().flatten() {
            let to = cluster_of[index_of[dep]];
            if to != from {
                clusters[from].positive_children.insert(to);
            }
        }
        for dep in deps.negative.get(var).into_iter().flatten() {
            let to = cluster_of[index_of[dep]];
            if to == from {
                return Err(TranslateError::Stratification(format!(
                    "{var} depends negatively on {dep} in a cycle"
                )));
            }
            clusters[from].negative_children.insert(to);
        }
    }

    // children always come after their parents in topological order
    match strategy {
        LayerStrategy::Max => {
            for (layer, cluster) in clusters.iter_mut().rev().enumerate() {
                cluster.layer = layer as u32;
            }
        }
        LayerStrategy::Min => {
            for c in (0..clusters.len()).rev() {
                let cluster = &clusters[c];
                let pos = cluster.positive_children.iter().map(|&child| clusters[child].layer);
                let neg = cluster.negative_children.iter().map(|&child| clusters[child].layer + 1);
                let layer = pos.chain(neg).max().unwrap_or(0);
                clusters[c].layer = layer;
            }
        }
    }

    let mut result = StratifiedAxioms::default();
    for cluster in clusters {
        for (var, axioms) in cluster.variables.into_iter().zip(cluster.axioms) {
            debug!("{var}: layer {}, {} axioms", cluster.layer, axioms.len());
            result.layers.insert(var, cluster.layer);
            result.axioms.extend(axioms);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::conditions::tests::atom;

    fn lit(s: &str) -> Literal {
        match s.strip_prefix('!') {
            Some(name) => atom(name, &[]).negative(),
            None => atom(s, &[]).positive(),
        }
    }

    fn axiom(head: &str, body: &[&str]) -> PropositionalAxiom {
        PropositionalAxiom {
            name: format!("({head})"),
            condition: body.iter().map(|l| lit(l)).collect(),
            effect: atom(head, &[]),
        }
    }

    fn layer(result: &StratifiedAxioms, name: &str) -> Option<u32> {
        result.layers.get(&atom(name, &[])).copied()
    }

    fn check_layering(result: &StratifiedAxioms) {
        for ax in &result.axioms {
            let head = result.layers[&ax.effect];
            for l in &ax.condition {
                if let Some(&body) = result.layers.get(&l.atom) {
                    assert!(body <= head);
                    assert!(!l.negated || body < head);
                }
            }
        }
    }

    #[test]
    fn negation_is_stratified() -> Result<(), TranslateError> {
        // b <- a, c <- !b, d <- c, goal: d
        let axioms = vec![axiom("a", &["x"]), axiom("b", &["a"]), axiom("c", &["!b"]), axiom("d", &["c"])];
        let result = handle_axioms(&[], axioms.clone(), &[lit("d")], LayerStrategy::Min)?;
        check_layering(&result);
        assert_eq!(layer(&result, "a"), Some(0));
        assert_eq!(layer(&result, "b"), Some(0));
        assert_eq!(layer(&result, "c"), Some(1));
        assert_eq!(layer(&result, "d"), Some(1));

        let result = handle_axioms(&[], axioms, &[lit("d")], LayerStrategy::Max)?;
        check_layering(&result);
        assert_eq!(layer(&result, "a"), Some(0));
        assert_eq!(layer(&result, "d"), Some(3));
        Ok(())
    }

    #[test]
    fn unnecessary_atoms_are_dropped() -> Result<(), TranslateError> {
        let axioms = vec![axiom("a", &["x"]), axiom("b", &["y"])];
        let result = handle_axioms(&[], axioms, &[lit("!a")], LayerStrategy::Min)?;
        assert_eq!(result.axioms.len(), 1);
        assert_eq!(layer(&result, "a"), Some(0));
        assert_eq!(layer(&result, "b"), None);
        Ok(())
    }

    #[test]
    fn action_conditions_are_necessary() -> Result<(), TranslateError> {
        let action = PropositionalAction {
            name: "(act)".to_string(),
            precondition: vec![],
            add_effects: vec![(vec![lit("!b")], atom("g", &[]))],
            del_effects: vec![],
            cost: 1,
        };
        let axioms = vec![axiom("a", &["x"]), axiom("b", &["y"])];
        let result = handle_axioms(&[action], axioms, &[], LayerStrategy::Min)?;
        assert_eq!(result.axioms.iter().map(|a| a.name.as_str()).collect_vec(), vec!["(b)"]);
        Ok(())
    }

    #[test]
    fn recursion_shares_a_layer() -> Result<(), TranslateError> {
        // reachability: r <- s, s <- r, s <- init
        let axioms = vec![axiom("r", &["s"]), axiom("s", &["r"]), axiom("s", &["init"])];
        let result = handle_axioms(&[], axioms, &[lit("r")], LayerStrategy::Min)?;
        assert_eq!(layer(&result, "r"), layer(&result, "s"));
        assert_eq!(result.axioms.len(), 3);
        check_layering(&result);
        Ok(())
    }

    #[test]
    fn negative_cycle_is_not_stratifiable() {
        // p <- q, !r and r <- p
        let axioms = vec![axiom("p", &["q", "!r"]), axiom("r", &["p"]), axiom("q", &["x"])];
        let result = handle_axioms(&[], axioms, &[lit("p")], LayerStrategy::Min);
        assert!(matches!(result, Err(TranslateError::Stratification(_))));
    }

    #[test]
    fn dominated_axioms_are_removed() {
        let axioms = vec![
            axiom("a", &["x", "y", "x"]),
            axiom("a", &["x"]),
            axiom("a", &["x"]),
            axiom("a", &["a", "z"]),
            axiom("a", &["z", "w"]),
        ];
        let simplified = simplify_axioms(axioms);
        let conditions = simplified
            .iter()
            .map(|a| a.condition.iter().map(|l| l.to_string()).join(" "))
            .collect_vec();
        assert_eq!(conditions, vec!["Atom x()", "Atom w() Atom z()"]);
    }

    #[test]
    fn unconditional_axioms_dominate() {
        let simplified = simplify_axioms(vec![axiom("a", &["x"]), axiom("a", &[])]);
        assert_eq!(simplified.len(), 1);
        assert!(simplified[0].condition.is_empty());
    }
}
