//! Decomposition of rules into rules with at most two conditions.
//!
//! Conditions that share no variable are first projected separately and combined with a product
//! rule. Each group of connected conditions is then joined pairwise, greedily picking the pair of
//! conditions that introduces the fewest new variables.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::datalog::*;

pub(crate) fn split_rules(symbols: &mut SymbolTable, rules: Vec<RawRule>) -> Vec<Rule> {
    let mut splitter = Splitter {
        symbols,
        next_aux: 0,
        result: Vec::new(),
    };
    for rule in rules {
        splitter.split_rule(rule);
    }
    splitter.result
}

struct Splitter<'a> {
    symbols: &'a mut SymbolTable,
    next_aux: u32,
    result: Vec<Rule>,
}

fn variable_set(atoms: &[RuleAtom]) -> BTreeSet<Sym> {
    atoms.iter().flat_map(|a| a.variables()).cloned().collect()
}

/// Groups of conditions connected through shared variables, ordered by their first condition.
fn connected_components(conditions: Vec<RuleAtom>) -> Vec<Vec<RuleAtom>> {
    let n = conditions.len();
    let mut parent = (0..n).collect_vec();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    let mut first_with_var: HashMap<&Sym, usize> = HashMap::new();
    for (i, cond) in conditions.iter().enumerate() {
        for var in cond.variables() {
            let first = *first_with_var.entry(var).or_insert(i);
            let (a, b) = (find(&mut parent, first), find(&mut parent, i));
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }
    }
    drop(first_with_var);
    let roots = (0..n).map(|i| find(&mut parent, i)).collect_vec();
    let mut components: Vec<Vec<RuleAtom>> = Vec::new();
    let mut component_of_root: HashMap<usize, usize> = HashMap::new();
    for (cond, root) in conditions.into_iter().zip(roots) {
        let idx = *component_of_root.entry(root).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[idx].push(cond);
    }
    components
}

impl Splitter<'_> {
    fn fresh_atom(&mut self, variables: impl IntoIterator<Item = Sym>) -> RuleAtom {
        let rel = self.symbols.intern_relation(Relation::Aux(self.next_aux));
        self.next_aux += 1;
        RuleAtom {
            rel,
            args: variables.into_iter().map(Term::Var).collect(),
        }
    }

    fn split_rule(&mut self, rule: RawRule) {
        let (important, trivial): (Vec<RuleAtom>, Vec<RuleAtom>) =
            rule.body.into_iter().partition(|c| c.has_variables());
        let components = connected_components(important);
        if components.len() == 1 && trivial.is_empty() {
            let body = components.into_iter().next().unwrap_or_default();
            self.split_into_binary_rules(body, rule.head);
            return;
        }

        let head_vars: BTreeSet<&Sym> = rule.head.variables().collect();
        let mut combined = Vec::with_capacity(components.len() + trivial.len());
        for component in components {
            let retained = variable_set(&component)
                .into_iter()
                .filter(|v| head_vars.contains(v))
                .collect_vec();
            let projected = self.fresh_atom(retained);
            combined.push(projected.clone());
            self.split_into_binary_rules(component, projected);
        }
        combined.extend(trivial);
        let kind = if combined.len() >= 2 {
            RuleKind::Product
        } else {
            RuleKind::Project
        };
        self.result.push(Rule {
            kind,
            body: combined,
            head: rule.head,
        });
    }

    fn split_into_binary_rules(&mut self, body: Vec<RuleAtom>, head: RuleAtom) {
        if body.len() <= 1 {
            self.result.push(Rule {
                kind: RuleKind::Project,
                body,
                head,
            });
        } else {
            self.greedy_join(body, head);
        }
    }

    fn greedy_join(&mut self, body: Vec<RuleAtom>, head: RuleAtom) {
        debug_assert!(body.len() >= 2);
        let mut occurrences = Occurrences::default();
        occurrences.update(&head, 1);
        for cond in &body {
            occurrences.update(cond, 1);
        }
        let mut costs = CostMatrix::default();
        for cond in body {
            costs.add(cond);
        }

        let first_rule = self.result.len();
        while costs.joinees.len() >= 2 {
            let (left, right) = costs.remove_min_pair();
            let mut joinees = [left, right];
            for joinee in &joinees {
                occurrences.update(joinee, -1);
            }
            let left_vars = variable_set(std::slice::from_ref(&joinees[0]));
            let right_vars = variable_set(std::slice::from_ref(&joinees[1]));
            let common: BTreeSet<Sym> = left_vars.intersection(&right_vars).cloned().collect();
            let effect_vars: BTreeSet<Sym> = left_vars
                .union(&right_vars)
                .filter(|v| occurrences.contains(v))
                .cloned()
                .collect();
            for joinee in &mut joinees {
                let joinee_vars = variable_set(std::slice::from_ref(joinee));
                let retained: BTreeSet<Sym> = joinee_vars
                    .iter()
                    .filter(|v| effect_vars.contains(*v) || common.contains(*v))
                    .cloned()
                    .collect();
                if retained != joinee_vars {
                    let projected = self.fresh_atom(retained);
                    let original = std::mem::replace(joinee, projected.clone());
                    self.result.push(Rule {
                        kind: RuleKind::Project,
                        body: vec![original],
                        head: projected,
                    });
                }
            }
            let joint = self.fresh_atom(effect_vars);
            self.result.push(Rule {
                kind: RuleKind::Join,
                body: joinees.to_vec(),
                head: joint.clone(),
            });
            occurrences.update(&joint, 1);
            costs.add(joint);
        }
        // the last join produces the head of the original rule
        debug_assert!(self.result.len() > first_rule);
        if let Some(last) = self.result.last_mut() {
            last.head = head;
        }
    }
}

/// Number of occurrences of each variable in the remaining atoms of a rule (head included).
#[derive(Default)]
struct Occurrences {
    counts: HashMap<Sym, usize>,
}

impl Occurrences {
    fn update(&mut self, atom: &RuleAtom, delta: isize) {
        for var in atom.variables() {
            let count = self.counts.entry(var.clone()).or_insert(0);
            *count = count.checked_add_signed(delta).expect("negative number of occurrences");
            if *count == 0 {
                self.counts.remove(var);
            }
        }
    }

    fn contains(&self, var: &Sym) -> bool {
        self.counts.contains_key(var)
    }
}

/// Cost of joining two conditions: number of variables unique to the smaller one, to the larger one,
/// then the number of shared variables (more is better).
type JoinCost = (usize, usize, Reverse<usize>);

fn join_cost(left: &RuleAtom, right: &RuleAtom) -> JoinCost {
    let mut left_vars = variable_set(std::slice::from_ref(left));
    let mut right_vars = variable_set(std::slice::from_ref(right));
    if left_vars.len() > right_vars.len() {
        std::mem::swap(&mut left_vars, &mut right_vars);
    }
    let common = left_vars.intersection(&right_vars).count();
    (left_vars.len() - common, right_vars.len() - common, Reverse(common))
}

/// Lower-triangular matrix of join costs between the conditions left to join.
#[derive(Default)]
struct CostMatrix {
    joinees: Vec<RuleAtom>,
    /// `costs[i][j]` is the cost of joining `joinees[i]` and `joinees[j]`, for `j < i`
    costs: Vec<Vec<JoinCost>>,
}

impl CostMatrix {
    fn add(&mut self, joinee: RuleAtom) {
        let row = self.joinees.iter().map(|other| join_cost(&joinee, other)).collect();
        self.costs.push(row);
        self.joinees.push(joinee);
    }

    fn remove(&mut self, index: usize) -> RuleAtom {
        for row in &mut self.costs[index + 1..] {
            row.remove(index);
        }
        self.costs.remove(index);
        self.joinees.remove(index)
    }

    /// Removes the cheapest pair, the first one in case of ties.
    fn remove_min_pair(&mut self) -> (RuleAtom, RuleAtom) {
        let mut best: Option<(JoinCost, usize, usize)> = None;
        for (i, row) in self.costs.iter().enumerate() {
            for (j, cost) in row.iter().enumerate() {
                if best.as_ref().is_none_or(|(c, _, _)| cost < c) {
                    best = Some((*cost, i, j));
                }
            }
        }
        let (_, left, right) = best.expect("at least two joinees");
        // left > right: remove the larger index first
        let left = self.remove(left);
        let right = self.remove(right);
        (left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        symbols: SymbolTable,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                symbols: SymbolTable::default(),
            }
        }

        fn atom(&mut self, rel: &str, args: &[&str]) -> RuleAtom {
            let rel = self.symbols.intern_relation(Relation::Pred(Pred::named(rel)));
            let args = args
                .iter()
                .map(|a| {
                    if a.starts_with('?') {
                        Term::Var(Sym::from(*a))
                    } else {
                        Term::Obj(self.symbols.intern_object(&Sym::from(*a)))
                    }
                })
                .collect();
            RuleAtom { rel, args }
        }
    }

    fn vars(atom: &RuleAtom) -> Vec<String> {
        atom.args.iter().map(|t| t.as_var().map(|v| v.to_string()).unwrap_or_default()).collect()
    }

    #[test]
    fn single_condition_is_a_projection() {
        let mut fx = Fixture::new();
        let rule = RawRule {
            body: vec![fx.atom("p", &["?x", "?y"])],
            head: fx.atom("q", &["?x"]),
        };
        let rules = split_rules(&mut fx.symbols, vec![rule]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].kind, RuleKind::Project);
    }

    #[test]
    fn chains_are_joined_pairwise() {
        let mut fx = Fixture::new();
        let head = fx.atom("path", &["?a", "?d"]);
        let rule = RawRule {
            body: vec![
                fx.atom("e", &["?a", "?b"]),
                fx.atom("e", &["?b", "?c"]),
                fx.atom("e", &["?c", "?d"]),
            ],
            head: head.clone(),
        };
        let rules = split_rules(&mut fx.symbols, vec![rule]);
        let joins = rules.iter().filter(|r| r.kind == RuleKind::Join).collect_vec();
        assert_eq!(joins.len(), 2);
        for join in &joins {
            assert_eq!(join.body.len(), 2);
        }
        assert_eq!(rules.last().map(|r| r.head.clone()), Some(head));
        // the first join projects away the shared variable that is not needed afterwards
        assert_eq!(vars(&joins[0].head), vec!["?a", "?c"]);
    }

    #[test]
    fn independent_conditions_are_combined_by_a_product() {
        let mut fx = Fixture::new();
        let rule = RawRule {
            body: vec![
                fx.atom("p", &["?x"]),
                fx.atom("q", &["?y", "?z"]),
                fx.atom("ready", &[]),
                fx.atom("r", &["?z", "c"]),
            ],
            head: fx.atom("h", &["?x", "?y"]),
        };
        let rules = split_rules(&mut fx.symbols, vec![rule]);
        let last = rules.last().expect("rules");
        assert_eq!(last.kind, RuleKind::Product);
        // one projection per component, then the condition without variables
        assert_eq!(last.body.len(), 3);
        assert_eq!(vars(&last.body[0]), vec!["?x"]);
        assert_eq!(vars(&last.body[1]), vec!["?y"]);
        assert!(!last.body[2].has_variables());
        assert!(rules.iter().any(|r| r.kind == RuleKind::Join));
    }
}
