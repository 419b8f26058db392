//! Generation of fresh names, for variables and auxiliary predicates.

use hashbrown::HashSet;

use crate::sym::Sym;

pub trait NameGenerator {
    /// Returns a name derived from `base` that was neither reserved nor returned before.
    fn fresh(&mut self, base: &str) -> Sym;

    /// Marks the name as taken. Returns false if it already was.
    fn reserve(&mut self, name: &Sym) -> bool;
}

/// Names of variables: `?x` is renamed into `?x1`, `?x2`, ... when already taken.
#[derive(Default, Clone)]
pub struct VariableNames {
    used: HashSet<Sym>,
}

impl VariableNames {
    pub fn new<'a>(used: impl IntoIterator<Item = &'a Sym>) -> Self {
        VariableNames {
            used: used.into_iter().cloned().collect(),
        }
    }
}

impl NameGenerator for VariableNames {
    fn fresh(&mut self, base: &str) -> Sym {
        let candidate = Sym::new(base);
        if self.used.insert(candidate.clone()) {
            return candidate;
        }
        let mut i = 1;
        loop {
            let candidate = Sym::from(format!("{base}{i}"));
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            i += 1;
        }
    }

    fn reserve(&mut self, name: &Sym) -> bool {
        self.used.insert(name.unspanned())
    }
}

/// Names of the auxiliary predicates introduced by normalization: `new-axiom@0`, `new-axiom@1`, ...
///
/// Names that are declared in the task are never returned.
pub struct AxiomNames {
    taken: HashSet<Sym>,
    next: usize,
}

impl AxiomNames {
    pub const BASE: &'static str = "new-axiom";

    pub fn new<'a>(declared: impl IntoIterator<Item = &'a Sym>) -> Self {
        AxiomNames {
            taken: declared.into_iter().cloned().collect(),
            next: 0,
        }
    }
}

impl NameGenerator for AxiomNames {
    fn fresh(&mut self, base: &str) -> Sym {
        loop {
            let candidate = Sym::from(format!("{base}@{}", self.next));
            self.next += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn reserve(&mut self, name: &Sym) -> bool {
        self.taken.insert(name.unspanned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_are_suffixed_when_taken() {
        let x = Sym::from("?x");
        let x1 = Sym::from("?x1");
        let mut names = VariableNames::new([&x, &x1]);
        assert_eq!(names.fresh("?x"), "?x2");
        assert_eq!(names.fresh("?y"), "?y");
        assert_eq!(names.fresh("?y"), "?y1");
        assert!(!names.reserve(&x));
        assert!(names.reserve(&Sym::from("?z")));
    }

    #[test]
    fn axiom_names_skip_declared_predicates() {
        let declared = Sym::from("new-axiom@1");
        let mut names = AxiomNames::new([&declared]);
        assert_eq!(names.fresh(AxiomNames::BASE), "new-axiom@0");
        assert_eq!(names.fresh(AxiomNames::BASE), "new-axiom@2");
    }
}
