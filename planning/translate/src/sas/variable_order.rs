//! Ordering of the variables along the causal graph, and removal of the variables that cannot
//! influence the goal.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use tracing::info;

use crate::graph::strongly_connected_components;
use crate::sas::{Fact, MutexGroup, Operator, PrePost, SasAxiom, SasTask};

/// Extra weight of the arcs toward goal variables, which places them last in their component.
const GOAL_WEIGHT: u64 = 100_000;

/// Causal graph with an arc from each variable appearing in a condition to each variable affected
/// under this condition, weighted by the number of operators and axioms inducing it.
struct CausalGraph {
    weights: Vec<BTreeMap<usize, u64>>,
    predecessors: Vec<BTreeSet<usize>>,
    goal_vars: HashSet<usize>,
}

impl CausalGraph {
    fn new(task: &SasTask) -> CausalGraph {
        let n = task.variables.len();
        let mut graph = CausalGraph {
            weights: vec![BTreeMap::new(); n],
            predecessors: vec![BTreeSet::new(); n],
            goal_vars: task.goal.iter().map(|f| f.var).collect(),
        };
        for op in &task.operators {
            let mut sources = op.prevail.iter().map(|f| f.var).collect_vec();
            sources.extend(op.pre_post.iter().filter(|pp| pp.pre.is_some()).map(|pp| pp.var));
            for pp in &op.pre_post {
                for source in sources.iter().copied().chain(pp.condition.iter().map(|f| f.var)) {
                    graph.add_arc(source, pp.var);
                }
            }
        }
        for axiom in &task.axioms {
            for fact in &axiom.condition {
                graph.add_arc(fact.var, axiom.effect.var);
            }
        }
        graph
    }

    fn add_arc(&mut self, source: usize, target: usize) {
        if source != target {
            *self.weights[source].entry(target).or_default() += 1;
            self.predecessors[target].insert(source);
        }
    }

    /// Topological order of the strongly connected components, each of them ordered by
    /// [`max_dag_order`].
    fn ordering(&self) -> Vec<usize> {
        let successors = self.weights.iter().map(|w| w.keys().copied().collect_vec()).collect_vec();
        let mut ordering = Vec::with_capacity(self.weights.len());
        for scc in strongly_connected_components(&successors) {
            if scc.len() == 1 {
                ordering.push(scc[0]);
                continue;
            }
            let members: HashSet<usize> = scc.iter().copied().collect();
            let subgraph: HashMap<usize, Vec<(usize, u64)>> = scc
                .iter()
                .map(|&var| {
                    let edges = self.weights[var]
                        .iter()
                        .filter(|(target, _)| members.contains(*target))
                        .map(|(&target, &weight)| {
                            if self.goal_vars.contains(&target) {
                                (target, GOAL_WEIGHT + weight)
                            } else {
                                (target, weight)
                            }
                        })
                        .collect_vec();
                    (var, edges)
                })
                .collect();
            ordering.extend(max_dag_order(&scc, &subgraph));
        }
        ordering
    }

    /// Variables from which a goal variable can be reached in the causal graph (including the goal
    /// variables themselves).
    fn important_vars(&self) -> Vec<bool> {
        let mut necessary = vec![false; self.predecessors.len()];
        let mut stack = self.goal_vars.iter().copied().collect_vec();
        while let Some(var) = stack.pop() {
            if !necessary[var] {
                necessary[var] = true;
                stack.extend(self.predecessors[var].iter().copied());
            }
        }
        necessary
    }
}

/// Orders the variables of a strongly connected component by repeatedly picking the one with the
/// least total weight of incoming arcs from variables not picked yet.
///
/// Ties are broken by the order of `component`.
fn max_dag_order(component: &[usize], graph: &HashMap<usize, Vec<(usize, u64)>>) -> Vec<usize> {
    let mut incoming: HashMap<usize, u64> = component.iter().map(|&v| (v, 0)).collect();
    for edges in graph.values() {
        for &(target, weight) in edges {
            *incoming.entry(target).or_default() += weight;
        }
    }
    // may contain outdated entries, whose weight is larger than the current incoming weight
    let mut by_weight: BTreeMap<u64, VecDeque<usize>> = BTreeMap::new();
    for &var in component {
        by_weight.entry(incoming[&var]).or_default().push_back(var);
    }

    let mut done = HashSet::new();
    let mut result = Vec::with_capacity(component.len());
    while let Some(mut entry) = by_weight.first_entry() {
        let weight = *entry.key();
        let nodes = entry.get_mut();
        let mut selected = None;
        while let Some(node) = nodes.pop_front() {
            if !done.contains(&node) && incoming[&node] >= weight {
                selected = Some(node);
                break;
            }
        }
        if nodes.is_empty() {
            entry.remove();
        }
        let Some(node) = selected else {
            continue;
        };
        done.insert(node);
        result.push(node);
        for &(target, weight) in graph.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
            let weight = weight % GOAL_WEIGHT;
            if done.contains(&target) || weight == 0 {
                continue;
            }
            let new_weight = incoming[&target] - weight;
            incoming.insert(target, new_weight);
            by_weight.entry(new_weight).or_default().push_back(target);
        }
    }
    result
}

/// Renumbers the variables of the task following `ordering`. Variables absent from the ordering
/// are removed, together with the operators and axioms that only affect them.
fn apply_order(task: &mut SasTask, ordering: &[usize]) {
    let new_var: HashMap<usize, usize> = ordering.iter().enumerate().map(|(i, &v)| (v, i)).collect();
    let rename = |facts: &[Fact]| {
        facts
            .iter()
            .filter_map(|f| new_var.get(&f.var).map(|&var| Fact::new(var, f.value)))
            .collect_vec()
    };

    let variables = &task.variables;
    let ranges = ordering.iter().map(|&v| variables.ranges[v]).collect();
    let axiom_layers = ordering.iter().map(|&v| variables.axiom_layers[v]).collect();
    let value_names = ordering.iter().map(|&v| variables.value_names[v].clone()).collect();
    task.variables.ranges = ranges;
    task.variables.axiom_layers = axiom_layers;
    task.variables.value_names = value_names;
    task.init = ordering.iter().map(|&v| task.init[v]).collect();
    task.goal = rename(&task.goal).into_iter().sorted().collect();

    let num_mutexes = task.mutexes.len();
    task.mutexes = task
        .mutexes
        .iter()
        .map(|m| MutexGroup::new(rename(&m.facts)))
        .filter(|m| m.num_vars() > 1)
        .collect();
    info!("{} of {} mutex groups necessary.", task.mutexes.len(), num_mutexes);

    let num_operators = task.operators.len();
    task.operators = task
        .operators
        .iter()
        .filter_map(|op| {
            let pre_post = op
                .pre_post
                .iter()
                .filter_map(|pp| {
                    new_var.get(&pp.var).map(|&var| PrePost {
                        var,
                        pre: pp.pre,
                        post: pp.post,
                        condition: rename(&pp.condition),
                    })
                })
                .collect_vec();
            (!pre_post.is_empty()).then(|| Operator::new(op.name.clone(), rename(&op.prevail), pre_post, op.cost))
        })
        .collect();
    info!("{} of {} operators necessary.", task.operators.len(), num_operators);

    let num_axioms = task.axioms.len();
    task.axioms = task
        .axioms
        .iter()
        .filter_map(|ax| {
            let &var = new_var.get(&ax.effect.var)?;
            Some(SasAxiom::new(rename(&ax.condition), Fact::new(var, ax.effect.value)))
        })
        .collect();
    info!("{} of {} axiom rules necessary.", task.axioms.len(), num_axioms);
}

/// Reorders the variables along the causal graph and/or removes the variables that are irrelevant
/// to the goal.
pub fn find_and_apply_variable_order(task: &mut SasTask, reorder_vars: bool, filter_unimportant_vars: bool) {
    if !reorder_vars && !filter_unimportant_vars {
        return;
    }
    let _span = tracing::info_span!("variable-order").entered();
    let graph = CausalGraph::new(task);
    let mut ordering = if reorder_vars {
        graph.ordering()
    } else {
        (0..task.variables.len()).collect()
    };
    if filter_unimportant_vars {
        let necessary = graph.important_vars();
        info!(
            "{} of {} variables necessary.",
            necessary.iter().filter(|&&n| n).count(),
            ordering.len()
        );
        ordering.retain(|&v| necessary[v]);
    }
    apply_order(task, &ordering);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sas::Variables;

    fn fact(var: usize, value: usize) -> Fact {
        Fact::new(var, value)
    }

    fn task(num_vars: usize, operators: Vec<Operator>, goal: Vec<Fact>) -> SasTask {
        SasTask {
            variables: Variables {
                ranges: vec![2; num_vars],
                axiom_layers: vec![None; num_vars],
                value_names: (0..num_vars).map(|v| vec![format!("a{v}"), format!("b{v}")]).collect(),
            },
            mutexes: vec![],
            init: vec![0; num_vars],
            goal,
            operators,
            axioms: vec![],
            metric: false,
        }
    }

    /// Operator setting `target` to 1 under the given prevail conditions
    fn op(name: &str, prevail: &[usize], target: usize) -> Operator {
        Operator::new(
            name.into(),
            prevail.iter().map(|&v| fact(v, 0)).collect(),
            vec![PrePost {
                var: target,
                pre: Some(0),
                post: 1,
                condition: vec![],
            }],
            1,
        )
    }

    #[test]
    fn order_follows_causal_graph() {
        // 2 -> 1 -> 0
        let mut t = task(3, vec![op("a", &[1], 0), op("b", &[2], 1), op("c", &[], 2)], vec![fact(0, 1)]);
        find_and_apply_variable_order(&mut t, true, true);
        assert_eq!(t.variables.value_names, vec![vec!["a2", "b2"], vec!["a1", "b1"], vec!["a0", "b0"]]);
        assert_eq!(t.goal, vec![fact(2, 1)]);
        assert_eq!(t.operators[0].prevail, vec![fact(1, 0)]);
        assert_eq!(t.operators[0].pre_post[0].var, 2);
    }

    #[test]
    fn unimportant_variables_are_removed() {
        // var2 only depends on var0 and is not a goal
        let mut t = task(3, vec![op("a", &[1], 0), op("b", &[0], 2), op("c", &[], 1)], vec![fact(0, 1)]);
        t.mutexes = vec![MutexGroup::new([fact(0, 1), fact(2, 1)]), MutexGroup::new([fact(0, 0), fact(1, 1)])];
        find_and_apply_variable_order(&mut t, false, true);
        assert_eq!(t.variables.len(), 2);
        assert_eq!(t.operators.iter().map(|o| o.name.as_str()).collect_vec(), vec!["a", "c"]);
        assert_eq!(t.mutexes, vec![MutexGroup::new([fact(0, 0), fact(1, 1)])]);
    }

    #[test]
    fn cycles_are_broken_by_weights() {
        // 0 <-> 1, with a heavier arc 1 -> 0
        let ops = vec![op("a", &[1], 0), op("b", &[1], 0), op("c", &[0], 1)];
        let graph = CausalGraph::new(&task(2, ops, vec![]));
        // var1 has the least incoming weight and comes first
        assert_eq!(graph.ordering(), vec![1, 0]);
    }

    #[test]
    fn goal_variables_come_last_in_cycles() {
        let ops = vec![op("a", &[1], 0), op("b", &[1], 0), op("c", &[0], 1)];
        let graph = CausalGraph::new(&task(2, ops, vec![fact(1, 1)]));
        assert_eq!(graph.ordering(), vec![0, 1]);
    }

    #[test]
    fn max_dag_breaks_ties_by_input_order() {
        let graph: HashMap<usize, Vec<(usize, u64)>> = [(5, vec![(7, 1)]), (7, vec![(5, 1)])].into_iter().collect();
        assert_eq!(max_dag_order(&[7, 5], &graph), vec![7, 5]);
        assert_eq!(max_dag_order(&[5, 7], &graph), vec![5, 7]);
    }

    #[test]
    fn disabled() {
        let mut t = task(3, vec![op("a", &[1], 0)], vec![fact(0, 1)]);
        find_and_apply_variable_order(&mut t, false, false);
        assert_eq!(t.variables.len(), 3);
    }
}
