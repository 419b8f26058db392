//! Equality constraints between the terms (variables and objects) of action schemas.

use std::fmt::{Display, Formatter};

use hashbrown::HashMap;
use itertools::Itertools;

use crate::sym::Sym;

/// Conjunction of equalities `t1 = t2` between terms.
#[derive(Clone, Debug, Default)]
pub struct EqualityConjunction {
    pub equalities: Vec<(Sym, Sym)>,
}

impl EqualityConjunction {
    pub fn new(equalities: impl IntoIterator<Item = (Sym, Sym)>) -> Self {
        EqualityConjunction {
            equalities: equalities.into_iter().collect(),
        }
    }

    /// Maps each term to the representative of its equivalence class: its object if any, otherwise
    /// its smallest variable.
    /// Returns `None` if two distinct objects are in the same class.
    pub fn mapping(&self) -> Option<HashMap<Sym, Sym>> {
        representatives(self.equalities.iter())
    }
}

fn representatives<'a>(equalities: impl Iterator<Item = &'a (Sym, Sym)>) -> Option<HashMap<Sym, Sym>> {
    let mut ids: HashMap<&Sym, usize> = HashMap::new();
    let mut terms: Vec<&Sym> = Vec::new();
    let mut parent: Vec<usize> = Vec::new();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for (a, b) in equalities {
        let mut id = |t: &'a Sym| {
            *ids.entry(t).or_insert_with(|| {
                let id = parent.len();
                terms.push(t);
                parent.push(id);
                id
            })
        };
        let (a, b) = (id(a), id(b));
        let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
        if ra != rb {
            parent[ra.max(rb)] = ra.min(rb);
        }
    }

    // representative term of each class
    let mut best: HashMap<usize, &Sym> = HashMap::new();
    for (i, &term) in terms.iter().enumerate() {
        let root = find(&mut parent, i);
        match best.get(&root) {
            None => {
                best.insert(root, term);
            }
            Some(&current) => match (current.is_variable(), term.is_variable()) {
                (false, false) if current != term => return None,
                (true, false) => {
                    best.insert(root, term);
                }
                (true, true) if term < current => {
                    best.insert(root, term);
                }
                _ => {}
            },
        }
    }
    let mut mapping = HashMap::with_capacity(terms.len());
    for (i, &term) in terms.iter().enumerate() {
        let root = find(&mut parent, i);
        mapping.insert(term.clone(), best[&root].clone());
    }
    Some(mapping)
}

impl Display for EqualityConjunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.equalities.iter().map(|(a, b)| format!("{a} = {b}")).format(" and "))
    }
}

/// Disjunction of inequalities `t1 != t2` between terms. An empty disjunction is unsatisfiable.
#[derive(Clone, Debug)]
pub struct InequalityDisjunction {
    pub parts: Vec<(Sym, Sym)>,
}

impl InequalityDisjunction {
    pub fn new(parts: impl IntoIterator<Item = (Sym, Sym)>) -> Self {
        InequalityDisjunction {
            parts: parts.into_iter().collect(),
        }
    }

    fn holds(&self, mapping: &HashMap<Sym, Sym>) -> bool {
        let rep = |t: &Sym| mapping.get(t).cloned().unwrap_or_else(|| t.clone());
        self.parts.iter().any(|(a, b)| rep(a) != rep(b))
    }
}

impl Display for InequalityDisjunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.parts.iter().map(|(a, b)| format!("{a} != {b}")).format(" or "))
    }
}

/// A conjunction of disjunctions of [`EqualityConjunction`] and of [`InequalityDisjunction`].
///
/// The system is solvable if one conjunction can be picked in each equality disjunction such that
/// the equivalence relation induced by all picked equalities never equates two distinct objects and
/// separates the two terms of at least one inequality of every inequality disjunction.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSystem {
    equality_dnfs: Vec<Vec<EqualityConjunction>>,
    inequality_disjunctions: Vec<InequalityDisjunction>,
}

impl ConstraintSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_equality_conjunction(&mut self, conjunction: EqualityConjunction) {
        self.equality_dnfs.push(vec![conjunction]);
    }

    pub fn add_equality_dnf(&mut self, dnf: Vec<EqualityConjunction>) {
        self.equality_dnfs.push(dnf);
    }

    pub fn add_inequality_disjunction(&mut self, disjunction: InequalityDisjunction) {
        self.inequality_disjunctions.push(disjunction);
    }

    pub fn extend(&mut self, other: &ConstraintSystem) {
        self.equality_dnfs.extend(other.equality_dnfs.iter().cloned());
        self.inequality_disjunctions
            .extend(other.inequality_disjunctions.iter().cloned());
    }

    /// Conjunction of both systems
    pub fn combine(&self, other: &ConstraintSystem) -> ConstraintSystem {
        let mut result = self.clone();
        result.extend(other);
        result
    }

    pub fn is_solvable(&self) -> bool {
        if self.equality_dnfs.iter().any(|dnf| dnf.is_empty()) {
            return false;
        }
        // enumerates all choices of one conjunction per disjunction
        let mut choice = vec![0; self.equality_dnfs.len()];
        loop {
            let equalities = choice
                .iter()
                .zip(&self.equality_dnfs)
                .flat_map(|(&c, dnf)| dnf[c].equalities.iter());
            if let Some(mapping) = representatives(equalities) {
                if self.inequality_disjunctions.iter().all(|d| d.holds(&mapping)) {
                    return true;
                }
            }
            let mut i = 0;
            loop {
                if i == choice.len() {
                    return false;
                }
                choice[i] += 1;
                if choice[i] < self.equality_dnfs[i].len() {
                    break;
                }
                choice[i] = 0;
                i += 1;
            }
        }
    }
}

impl Display for ConstraintSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let equalities = self
            .equality_dnfs
            .iter()
            .map(|dnf| format!("({})", dnf.iter().format(" or ")));
        let inequalities = self.inequality_disjunctions.iter().map(|d| d.to_string());
        write!(f, "{}", equalities.chain(inequalities).format(" and "))
    }
}
