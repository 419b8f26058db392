//! Formulas of the first-order task: atoms, literals and condition trees.
//!
//! All traversals of a [`Condition`] are done with an explicit stack so that arbitrarily deep
//! formulas can be processed without exhausting the call stack.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::ops::ControlFlow;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::sym::Sym;
use crate::task::Args;
use crate::utils::disp_iter;

/// Predicate symbol of an atom.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Pred {
    /// A predicate declared in the domain (possibly derived)
    Named(Sym),
    /// Unary predicate holding for all objects of a type (and its subtypes).
    Type(Sym),
    /// Built-in equality, whose extension is `{(o, o)}` for every object `o`.
    Equal,
}

impl Pred {
    pub fn named(name: impl Into<Sym>) -> Pred {
        Pred::Named(name.into())
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, Pred::Equal)
    }
}

impl Display for Pred {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Pred::Named(name) | Pred::Type(name) => write!(f, "{name}"),
            Pred::Equal => write!(f, "="),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Atom {
    pub pred: Pred,
    pub args: Args,
}

impl Atom {
    pub fn new(pred: Pred, args: impl IntoIterator<Item = Sym>) -> Atom {
        Atom {
            pred,
            args: args.into_iter().collect(),
        }
    }

    pub fn positive(self) -> Literal {
        Literal {
            atom: self,
            negated: false,
        }
    }

    pub fn negative(self) -> Literal {
        Literal {
            atom: self,
            negated: true,
        }
    }

    pub fn variables(&self) -> impl Iterator<Item = &Sym> + '_ {
        self.args.iter().filter(|a| a.is_variable())
    }

    pub fn rename(&self, renaming: &HashMap<Sym, Sym>) -> Atom {
        Atom {
            pred: self.pred.clone(),
            args: self
                .args
                .iter()
                .map(|a| renaming.get(a).cloned().unwrap_or_else(|| a.clone()))
                .collect(),
        }
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.pred)?;
        disp_iter(f, self.args.iter(), ", ")?;
        write!(f, ")")
    }
}

/// An atom or its negation.
///
/// Its display form (`Atom p(a, b)` or `NegatedAtom p(a, b)`) is the one used to name the values of
/// the finite-domain variables.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Literal {
    pub atom: Atom,
    pub negated: bool,
}

impl Literal {
    pub fn negate(&self) -> Literal {
        Literal {
            atom: self.atom.clone(),
            negated: !self.negated,
        }
    }

    pub fn pred(&self) -> &Pred {
        &self.atom.pred
    }

    pub fn args(&self) -> &[Sym] {
        &self.atom.args
    }

    pub fn rename(&self, renaming: &HashMap<Sym, Sym>) -> Literal {
        Literal {
            atom: self.atom.rename(renaming),
            negated: self.negated,
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.negated {
            write!(f, "NegatedAtom {}", self.atom)
        } else {
            write!(f, "Atom {}", self.atom)
        }
    }
}

/// A variable and its type, as in `?x - block`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TypedParam {
    pub name: Sym,
    pub tpe: Sym,
}

impl TypedParam {
    pub fn new(name: impl Into<Sym>, tpe: impl Into<Sym>) -> Self {
        TypedParam {
            name: name.into(),
            tpe: tpe.into(),
        }
    }

    /// Atom stating that the parameter belongs to its type.
    pub fn type_atom(&self) -> Atom {
        Atom::new(Pred::Type(self.tpe.clone()), [self.name.clone()])
    }
}

impl Display for TypedParam {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.name, self.tpe)
    }
}

/// Head keywords of compound conditions.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConditionKind {
    And,
    Or,
    Not,
    Imply,
    Forall,
    Exists,
}

impl ConditionKind {
    /// Kind of the condition starting with the given keyword, `None` for atoms.
    pub fn classify(head: &str) -> Option<ConditionKind> {
        match head {
            "and" => Some(ConditionKind::And),
            "or" => Some(ConditionKind::Or),
            "not" => Some(ConditionKind::Not),
            "imply" => Some(ConditionKind::Imply),
            "forall" => Some(ConditionKind::Forall),
            "exists" => Some(ConditionKind::Exists),
            _ => None,
        }
    }
}

/// A first-order formula in negation normal form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Condition {
    True,
    False,
    Literal(Literal),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Forall(Vec<TypedParam>, Box<Condition>),
    Exists(Vec<TypedParam>, Box<Condition>),
}

/// A compound node whose children have been taken out, to be rebuilt once they are processed.
enum Shell {
    And,
    Or,
    Forall(Vec<TypedParam>),
    Exists(Vec<TypedParam>),
}

enum Frame {
    Enter(Condition),
    Exit(Shell, usize),
}

impl Condition {
    pub fn literal(lit: Literal) -> Condition {
        Condition::Literal(lit)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Condition::True | Condition::False)
    }

    /// Rebuilds the formula bottom-up: `f` is applied to every node once all its children have been
    /// rewritten, and its result replaces the node.
    pub fn rewrite(self, f: &mut impl FnMut(Condition) -> Condition) -> Condition {
        let mut stack = vec![Frame::Enter(self)];
        let mut done: Vec<Condition> = Vec::new();
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(Condition::And(parts)) => push_children(&mut stack, Shell::And, parts),
                Frame::Enter(Condition::Or(parts)) => push_children(&mut stack, Shell::Or, parts),
                Frame::Enter(Condition::Forall(params, body)) => {
                    push_children(&mut stack, Shell::Forall(params), vec![*body])
                }
                Frame::Enter(Condition::Exists(params, body)) => {
                    push_children(&mut stack, Shell::Exists(params), vec![*body])
                }
                Frame::Enter(leaf) => done.push(f(leaf)),
                Frame::Exit(shell, num_children) => {
                    let mut children = done.split_off(done.len() - num_children);
                    let node = match shell {
                        Shell::And => Condition::And(children),
                        Shell::Or => Condition::Or(children),
                        Shell::Forall(params) => Condition::Forall(params, Box::new(take_single(&mut children))),
                        Shell::Exists(params) => Condition::Exists(params, Box::new(take_single(&mut children))),
                    };
                    done.push(f(node));
                }
            }
        }
        debug_assert_eq!(done.len(), 1);
        take_single(&mut done)
    }

    /// Rebuilds the formula top-down: `f` is applied to a node before its children. Returning
    /// `ControlFlow::Break(c)` replaces the node (and its subtree) by `c`, while `ControlFlow::Continue(c)`
    /// keeps `c` and proceeds with its children.
    pub fn replace_top_down(self, f: &mut impl FnMut(Condition) -> ControlFlow<Condition, Condition>) -> Condition {
        let mut stack = vec![Frame::Enter(self)];
        let mut done: Vec<Condition> = Vec::new();
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(c) => match f(c) {
                    ControlFlow::Break(replacement) => done.push(replacement),
                    ControlFlow::Continue(Condition::And(parts)) => push_children(&mut stack, Shell::And, parts),
                    ControlFlow::Continue(Condition::Or(parts)) => push_children(&mut stack, Shell::Or, parts),
                    ControlFlow::Continue(Condition::Forall(params, body)) => {
                        push_children(&mut stack, Shell::Forall(params), vec![*body])
                    }
                    ControlFlow::Continue(Condition::Exists(params, body)) => {
                        push_children(&mut stack, Shell::Exists(params), vec![*body])
                    }
                    ControlFlow::Continue(leaf) => done.push(leaf),
                },
                Frame::Exit(shell, num_children) => {
                    let mut children = done.split_off(done.len() - num_children);
                    done.push(match shell {
                        Shell::And => Condition::And(children),
                        Shell::Or => Condition::Or(children),
                        Shell::Forall(params) => Condition::Forall(params, Box::new(take_single(&mut children))),
                        Shell::Exists(params) => Condition::Exists(params, Box::new(take_single(&mut children))),
                    });
                }
            }
        }
        take_single(&mut done)
    }

    /// Iterates over all nodes of the formula, parents before their children.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// Folds all nodes of the formula, in the same order as [`Condition::walk`].
    pub fn fold<T>(&self, init: T, f: impl FnMut(T, &Condition) -> T) -> T {
        self.walk().fold(init, f)
    }

    /// All literals appearing in the formula.
    pub fn literals(&self) -> impl Iterator<Item = &Literal> + '_ {
        self.walk().filter_map(|c| match c {
            Condition::Literal(l) => Some(l),
            _ => None,
        })
    }

    /// Elements of the top-level conjunction, the condition itself if it is not a conjunction.
    pub fn conjuncts(&self) -> &[Condition] {
        match self {
            Condition::And(parts) => parts,
            Condition::True => &[],
            other => std::slice::from_ref(other),
        }
    }

    /// Returns the literals of the condition if it is a literal or a conjunction of literals.
    pub fn as_literal_conjunction(&self) -> Option<Vec<&Literal>> {
        self.conjuncts()
            .iter()
            .map(|c| match c {
                Condition::Literal(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    /// Negation of the formula, with the negation pushed down to the literals.
    pub fn negate(self) -> Condition {
        self.rewrite(&mut |c| match c {
            Condition::True => Condition::False,
            Condition::False => Condition::True,
            Condition::Literal(l) => Condition::Literal(l.negate()),
            Condition::And(parts) => Condition::Or(parts),
            Condition::Or(parts) => Condition::And(parts),
            Condition::Forall(params, body) => Condition::Exists(params, body),
            Condition::Exists(params, body) => Condition::Forall(params, body),
        })
    }

    /// Flattens nested conjunctions and disjunctions and propagates the truth constants.
    pub fn simplified(self) -> Condition {
        self.rewrite(&mut simplify_node)
    }

    /// Variables that occur in the formula without being bound by a quantifier.
    ///
    /// Quantified variables are assumed to be unique in the formula, which is ensured when building the task.
    pub fn free_variables(&self) -> BTreeSet<Sym> {
        let mut used = BTreeSet::new();
        let mut bound = BTreeSet::new();
        for c in self.walk() {
            match c {
                Condition::Literal(l) => used.extend(l.atom.variables().cloned()),
                Condition::Forall(params, _) | Condition::Exists(params, _) => {
                    bound.extend(params.iter().map(|p| p.name.clone()))
                }
                _ => {}
            }
        }
        used.retain(|v| !bound.contains(v));
        used
    }

    pub fn has_universal_part(&self) -> bool {
        self.walk().any(|c| matches!(c, Condition::Forall(..)))
    }

    pub fn has_disjunction(&self) -> bool {
        self.walk().any(|c| matches!(c, Condition::Or(..)))
    }

    pub fn has_existential_part(&self) -> bool {
        self.walk().any(|c| matches!(c, Condition::Exists(..)))
    }

    /// Replaces variables (free or bound) according to the renaming.
    pub fn rename(self, renaming: &HashMap<Sym, Sym>) -> Condition {
        let rename_params = |params: Vec<TypedParam>| {
            params
                .into_iter()
                .map(|p| TypedParam {
                    name: renaming.get(&p.name).cloned().unwrap_or(p.name),
                    tpe: p.tpe,
                })
                .collect_vec()
        };
        self.rewrite(&mut |c| match c {
            Condition::Literal(l) => Condition::Literal(l.rename(renaming)),
            Condition::Forall(params, body) => Condition::Forall(rename_params(params), body),
            Condition::Exists(params, body) => Condition::Exists(rename_params(params), body),
            other => other,
        })
    }
}

fn push_children(stack: &mut Vec<Frame>, shell: Shell, children: Vec<Condition>) {
    stack.push(Frame::Exit(shell, children.len()));
    stack.extend(children.into_iter().rev().map(Frame::Enter));
}

fn take_single(children: &mut Vec<Condition>) -> Condition {
    children.pop().expect("rebuilt node is missing a child")
}

fn simplify_node(c: Condition) -> Condition {
    match c {
        Condition::And(parts) => {
            let mut result = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    Condition::True => {}
                    Condition::False => return Condition::False,
                    Condition::And(nested) => result.extend(nested),
                    other => result.push(other),
                }
            }
            match result.len() {
                0 => Condition::True,
                1 => take_single(&mut result),
                _ => Condition::And(result),
            }
        }
        Condition::Or(parts) => {
            let mut result = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    Condition::False => {}
                    Condition::True => return Condition::True,
                    Condition::Or(nested) => result.extend(nested),
                    other => result.push(other),
                }
            }
            match result.len() {
                0 => Condition::False,
                1 => take_single(&mut result),
                _ => Condition::Or(result),
            }
        }
        Condition::Forall(params, body) | Condition::Exists(params, body) if params.is_empty() => *body,
        Condition::Forall(_, body) | Condition::Exists(_, body) if body.is_constant() => *body,
        other => other,
    }
}

/// Preorder iterator over the nodes of a condition.
pub struct Walk<'a> {
    stack: Vec<&'a Condition>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Condition;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        match next {
            Condition::And(parts) | Condition::Or(parts) => self.stack.extend(parts.iter().rev()),
            Condition::Forall(_, body) | Condition::Exists(_, body) => self.stack.push(body),
            _ => {}
        }
        Some(next)
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::True => write!(f, "true"),
            Condition::False => write!(f, "false"),
            Condition::Literal(l) if l.negated => write!(f, "(not {})", l.atom),
            Condition::Literal(l) => write!(f, "{}", l.atom),
            Condition::And(parts) => write!(f, "(and {})", parts.iter().format(" ")),
            Condition::Or(parts) => write!(f, "(or {})", parts.iter().format(" ")),
            Condition::Forall(params, body) => write!(f, "(forall ({}) {body})", params.iter().format(", ")),
            Condition::Exists(params, body) => write!(f, "(exists ({}) {body})", params.iter().format(", ")),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn atom(pred: &str, args: &[&str]) -> Atom {
        Atom::new(Pred::named(pred), args.iter().map(|a| Sym::from(*a)))
    }

    pub fn pos(pred: &str, args: &[&str]) -> Condition {
        Condition::Literal(atom(pred, args).positive())
    }

    pub fn neg(pred: &str, args: &[&str]) -> Condition {
        Condition::Literal(atom(pred, args).negative())
    }

    #[test]
    fn literal_display() {
        assert_eq!(atom("at", &["a", "b"]).positive().to_string(), "Atom at(a, b)");
        assert_eq!(atom("handempty", &[]).negative().to_string(), "NegatedAtom handempty()");
    }

    #[test]
    fn simplification() {
        let c = Condition::And(vec![
            Condition::True,
            Condition::And(vec![pos("p", &["?x"]), pos("q", &[])]),
            Condition::Or(vec![Condition::False, pos("r", &[])]),
        ]);
        assert_eq!(
            c.simplified(),
            Condition::And(vec![pos("p", &["?x"]), pos("q", &[]), pos("r", &[])])
        );
        let c = Condition::And(vec![pos("p", &[]), Condition::Or(vec![])]);
        assert_eq!(c.simplified(), Condition::False);
        let c = Condition::Exists(vec![TypedParam::new("?x", "object")], Box::new(Condition::And(vec![])));
        assert_eq!(c.simplified(), Condition::True);
    }

    #[test]
    fn negation_is_pushed_to_literals() {
        let x = TypedParam::new("?x", "object");
        let c = Condition::Forall(
            vec![x.clone()],
            Box::new(Condition::Or(vec![pos("p", &["?x"]), neg("q", &["?x"])])),
        );
        let expected = Condition::Exists(vec![x], Box::new(Condition::And(vec![neg("p", &["?x"]), pos("q", &["?x"])])));
        assert_eq!(c.negate(), expected);
    }

    #[test]
    fn free_variables_exclude_bound_ones() {
        let c = Condition::And(vec![
            pos("p", &["?a", "b"]),
            Condition::Exists(vec![TypedParam::new("?y", "t")], Box::new(pos("q", &["?y", "?c"]))),
        ]);
        let free = c.free_variables().into_iter().map(|s| s.to_string()).collect_vec();
        assert_eq!(free, vec!["?a", "?c"]);
    }

    #[test]
    fn walk_is_preorder() {
        let c = Condition::And(vec![pos("p", &[]), Condition::Or(vec![pos("q", &[]), pos("r", &[])])]);
        let lits = c.literals().map(|l| l.atom.to_string()).collect_vec();
        assert_eq!(lits, vec!["p()", "q()", "r()"]);
        assert_eq!(c.fold(0, |n, _| n + 1), 5);
    }

    #[test]
    fn deep_formulas_do_not_overflow() {
        let mut c = pos("p", &[]);
        for _ in 0..2_000 {
            c = Condition::And(vec![c]);
        }
        assert_eq!(c.walk().count(), 2_001);
        assert_eq!(c.simplified(), pos("p", &[]));
    }

    #[test]
    fn top_down_replacement_stops_at_replaced_nodes() {
        let x = TypedParam::new("?x", "object");
        let inner = Condition::Forall(vec![x.clone()], Box::new(pos("q", &["?x"])));
        let c = Condition::And(vec![pos("p", &[]), Condition::Forall(vec![x], Box::new(inner))]);
        let mut visited = 0;
        let replaced = c.replace_top_down(&mut |c| {
            visited += 1;
            match c {
                Condition::Forall(..) => ControlFlow::Break(pos("r", &[])),
                other => ControlFlow::Continue(other),
            }
        });
        assert_eq!(replaced, Condition::And(vec![pos("p", &[]), pos("r", &[])]));
        assert_eq!(visited, 3);
    }

    #[test]
    fn keyword_classification() {
        assert_eq!(ConditionKind::classify("imply"), Some(ConditionKind::Imply));
        assert_eq!(ConditionKind::classify("at"), None);
    }
}
