//! Bottom-up computation of the least model of a split program.
//!
//! Atoms are processed in the order in which they are discovered. Each new atom is matched against
//! the conditions of all rules (through a discrimination tree on the constant arguments of the
//! conditions) and every match is combined with the atoms previously matched by the other
//! conditions of the rule.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use tracing::info;

use crate::datalog::*;
use crate::errors::TranslateError;
use crate::limits::{try_grow, Budget};

/// Argument of a compiled rule atom.
#[derive(Copy, Clone, Debug)]
enum Arg {
    /// Index of a variable of the rule
    Var(usize),
    Const(ObjId),
}

/// Condition `cond` of rule `rule`.
#[derive(Copy, Clone, Debug)]
struct Match {
    rule: usize,
    cond: usize,
}

enum State {
    Project,
    Join {
        /// For each condition, the positions of the variables shared with the other condition
        key_positions: [Vec<usize>; 2],
        /// For each condition, the atoms seen so far indexed by the values of the shared variables
        atoms_by_key: [HashMap<GroundArgs, Vec<usize>>; 2],
    },
    Product {
        atoms_by_cond: Vec<Vec<usize>>,
        num_empty: usize,
    },
}

struct CompiledRule {
    head_rel: RelId,
    head: Vec<Arg>,
    body: Vec<Vec<Arg>>,
    /// Values of the variables, overwritten each time the rule fires
    values: Vec<ObjId>,
    state: State,
}

impl CompiledRule {
    fn compile(rule: &Rule) -> CompiledRule {
        fn compile_atom<'a>(atom: &'a RuleAtom, var_ids: &mut HashMap<&'a Sym, usize>) -> Vec<Arg> {
            atom.args
                .iter()
                .map(|t| match t {
                    Term::Obj(o) => Arg::Const(*o),
                    Term::Var(v) => {
                        let next = var_ids.len();
                        Arg::Var(*var_ids.entry(v).or_insert(next))
                    }
                })
                .collect()
        }
        let mut var_ids: HashMap<&Sym, usize> = HashMap::new();
        let head = compile_atom(&rule.head, &mut var_ids);
        let body = rule.body.iter().map(|c| compile_atom(c, &mut var_ids)).collect_vec();
        let state = match rule.kind {
            RuleKind::Project => State::Project,
            RuleKind::Product => State::Product {
                atoms_by_cond: vec![Vec::new(); body.len()],
                num_empty: body.len(),
            },
            RuleKind::Join => {
                let vars_of = |cond: &[Arg]| {
                    cond.iter()
                        .filter_map(|a| match a {
                            Arg::Var(v) => Some(*v),
                            Arg::Const(_) => None,
                        })
                        .collect::<Vec<_>>()
                };
                let (left, right) = (vars_of(&body[0]), vars_of(&body[1]));
                let common = left.iter().filter(|v| right.contains(v)).copied().sorted().collect_vec();
                let positions = |cond: &[Arg]| {
                    common
                        .iter()
                        .map(|v| {
                            cond.iter()
                                .position(|a| matches!(a, Arg::Var(x) if x == v))
                                .expect("shared variable")
                        })
                        .collect_vec()
                };
                State::Join {
                    key_positions: [positions(&body[0]), positions(&body[1])],
                    atoms_by_key: [HashMap::new(), HashMap::new()],
                }
            }
        };
        CompiledRule {
            head_rel: rule.head.rel,
            head,
            body,
            values: vec![ObjId(u32::MAX); var_ids.len()],
            state,
        }
    }

    fn bind(values: &mut [ObjId], cond: &[Arg], args: &[ObjId]) {
        for (arg, &value) in cond.iter().zip(args) {
            if let Arg::Var(v) = arg {
                values[*v] = value;
            }
        }
    }

    fn emit(head_rel: RelId, head: &[Arg], values: &[ObjId], out: &mut Vec<GroundAtom>) {
        let args = head
            .iter()
            .map(|a| match a {
                Arg::Var(v) => values[*v],
                Arg::Const(o) => *o,
            })
            .collect();
        out.push(GroundAtom { rel: head_rel, args });
    }

    /// Records that the atom at index `atom` of the model matches condition `cond`, and produces all
    /// new instantiations of the head.
    fn fire(&mut self, cond: usize, atom: usize, atoms: &[GroundAtom], out: &mut Vec<GroundAtom>) {
        let args = &atoms[atom].args;
        Self::bind(&mut self.values, &self.body[cond], args);
        match &mut self.state {
            State::Project => Self::emit(self.head_rel, &self.head, &self.values, out),
            State::Join {
                key_positions,
                atoms_by_key,
            } => {
                let key: GroundArgs = key_positions[cond].iter().map(|&p| args[p]).collect();
                let [left, right] = atoms_by_key;
                let (mine, theirs) = if cond == 0 { (left, right) } else { (right, left) };
                let other = 1 - cond;
                if let Some(matching) = theirs.get(&key) {
                    for &other_atom in matching {
                        Self::bind(&mut self.values, &self.body[other], &atoms[other_atom].args);
                        Self::emit(self.head_rel, &self.head, &self.values, out);
                    }
                }
                mine.entry(key).or_default().push(atom);
            }
            State::Product {
                atoms_by_cond,
                num_empty,
            } => {
                if atoms_by_cond[cond].is_empty() {
                    *num_empty -= 1;
                }
                atoms_by_cond[cond].push(atom);
                if *num_empty > 0 {
                    return;
                }
                let others = (0..atoms_by_cond.len()).filter(|&c| c != cond).collect_vec();
                let combinations = others
                    .iter()
                    .map(|&c| atoms_by_cond[c].iter().copied())
                    .multi_cartesian_product();
                for combination in combinations {
                    for (&c, &other_atom) in others.iter().zip(&combination) {
                        Self::bind(&mut self.values, &self.body[c], &atoms[other_atom].args);
                    }
                    Self::emit(self.head_rel, &self.head, &self.values, out);
                }
            }
        }
    }
}

/// Discrimination tree selecting the conditions an atom can match based on its arguments.
enum Generator {
    Leaf(Vec<Match>),
    Node {
        /// Argument position tested by this node
        index: usize,
        /// Conditions matched regardless of the remaining arguments
        matches: Vec<Match>,
        branches: HashMap<ObjId, Generator>,
        /// Conditions that are unconstrained at `index`
        next: Box<Generator>,
    },
}

impl Generator {
    fn matches(&mut self) -> &mut Vec<Match> {
        match self {
            Generator::Leaf(matches) | Generator::Node { matches, .. } => matches,
        }
    }

    /// Adds a condition whose constant arguments are `constants` (sorted by position).
    fn insert(self, constants: &[(usize, ObjId)], m: Match) -> Generator {
        let Some(&(position, value)) = constants.first() else {
            let mut node = self;
            node.matches().push(m);
            return node;
        };
        match self {
            Generator::Leaf(matches) => {
                let mut root = Generator::Leaf(vec![m]);
                for &(index, value) in constants.iter().rev() {
                    root = Generator::Node {
                        index,
                        matches: Vec::new(),
                        branches: HashMap::from_iter([(value, root)]),
                        next: Box::new(Generator::Leaf(Vec::new())),
                    };
                }
                *root.matches() = matches;
                root
            }
            Generator::Node {
                index,
                matches,
                mut branches,
                next,
            } => {
                if index < position {
                    Generator::Node {
                        index,
                        matches,
                        branches,
                        next: Box::new((*next).insert(constants, m)),
                    }
                } else if index > position {
                    let branch = Generator::Leaf(Vec::new()).insert(&constants[1..], m);
                    Generator::Node {
                        index: position,
                        matches: Vec::new(),
                        branches: HashMap::from_iter([(value, branch)]),
                        next: Box::new(Generator::Node {
                            index,
                            matches,
                            branches,
                            next,
                        }),
                    }
                } else {
                    let branch = branches.remove(&value).unwrap_or(Generator::Leaf(Vec::new()));
                    branches.insert(value, branch.insert(&constants[1..], m));
                    Generator::Node {
                        index,
                        matches,
                        branches,
                        next,
                    }
                }
            }
        }
    }

    fn generate(&self, args: &[ObjId], out: &mut Vec<Match>) {
        match self {
            Generator::Leaf(matches) => out.extend_from_slice(matches),
            Generator::Node {
                index,
                matches,
                branches,
                next,
            } => {
                out.extend_from_slice(matches);
                if let Some(branch) = branches.get(&args[*index]) {
                    branch.generate(args, out);
                }
                next.generate(args, out);
            }
        }
    }
}

struct Unifier {
    by_relation: HashMap<RelId, Generator>,
}

impl Unifier {
    fn new(rules: &[CompiledRule], relations: impl Fn(usize, usize) -> RelId) -> Unifier {
        let mut by_relation: HashMap<RelId, Generator> = HashMap::new();
        for (r, rule) in rules.iter().enumerate() {
            for (c, cond) in rule.body.iter().enumerate() {
                let constants = cond
                    .iter()
                    .enumerate()
                    .filter_map(|(i, a)| match a {
                        Arg::Const(o) => Some((i, *o)),
                        Arg::Var(_) => None,
                    })
                    .collect_vec();
                let rel = relations(r, c);
                let root = by_relation.remove(&rel).unwrap_or(Generator::Leaf(Vec::new()));
                by_relation.insert(rel, root.insert(&constants, Match { rule: r, cond: c }));
            }
        }
        Unifier { by_relation }
    }

    fn unify(&self, atom: &GroundAtom, out: &mut Vec<Match>) {
        if let Some(root) = self.by_relation.get(&atom.rel) {
            root.generate(&atom.args, out);
        }
    }
}

/// Atoms discovered so far. Atoms before `next` have been processed.
struct Queue {
    atoms: Vec<GroundAtom>,
    enqueued: HashSet<GroundAtom>,
    next: usize,
    num_pushes: usize,
}

impl Queue {
    fn push(&mut self, atom: GroundAtom) -> Result<(), TranslateError> {
        self.num_pushes += 1;
        if !self.enqueued.contains(&atom) {
            try_grow(&mut self.atoms, 1)?;
            self.enqueued.try_reserve(1).map_err(|_| TranslateError::OutOfMemory)?;
            self.enqueued.insert(atom.clone());
            self.atoms.push(atom);
        }
        Ok(())
    }

    fn pop(&mut self) -> Option<usize> {
        if self.next < self.atoms.len() {
            self.next += 1;
            Some(self.next - 1)
        } else {
            None
        }
    }
}

/// Computes all atoms derivable from the facts of the program, in order of discovery.
pub fn compute_model(program: &Program, budget: &Budget) -> Result<Vec<GroundAtom>, TranslateError> {
    let _span = tracing::info_span!("model").entered();
    let mut rules = program.rules.iter().map(CompiledRule::compile).collect_vec();
    let unifier = Unifier::new(&rules, |r, c| program.rules[r].body[c].rel);

    let mut queue = Queue {
        atoms: Vec::new(),
        enqueued: HashSet::new(),
        next: 0,
        num_pushes: 0,
    };
    for fact in program.facts.iter().sorted() {
        queue.push(fact.clone())?;
    }

    let mut matches = Vec::new();
    let mut produced = Vec::new();
    while let Some(idx) = queue.pop() {
        budget.tick()?;
        matches.clear();
        unifier.unify(&queue.atoms[idx], &mut matches);
        for m in &matches {
            rules[m.rule].fire(m.cond, idx, &queue.atoms, &mut produced);
        }
        for atom in produced.drain(..) {
            queue.push(atom)?;
        }
        budget.check_model_size(queue.atoms.len())?;
    }

    let num_auxiliary = queue
        .atoms
        .iter()
        .filter(|a| program.symbols.relation(a.rel).is_auxiliary())
        .count();
    info!("{} relevant atoms", queue.atoms.len() - num_auxiliary);
    info!("{} auxiliary atoms", num_auxiliary);
    info!("{} final queue length", queue.atoms.len());
    info!("{} total queue pushes", queue.num_pushes);
    Ok(queue.atoms)
}
