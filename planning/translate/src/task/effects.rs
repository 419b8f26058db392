use std::fmt::{Display, Formatter};

use hashbrown::HashMap;
use itertools::Itertools;

use crate::sym::Sym;
use crate::task::{Atom, Condition, Literal, TypedParam};

/// Head keywords of compound effects.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EffectKind {
    And,
    Not,
    Forall,
    When,
    Increase,
}

impl EffectKind {
    /// Kind of the effect starting with the given keyword, `None` for atoms.
    pub fn classify(head: &str) -> Option<EffectKind> {
        match head {
            "and" => Some(EffectKind::And),
            "not" => Some(EffectKind::Not),
            "forall" => Some(EffectKind::Forall),
            "when" => Some(EffectKind::When),
            "increase" => Some(EffectKind::Increase),
            _ => None,
        }
    }
}

/// A flattened effect: `forall parameters: when condition: literal`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Effect {
    /// Universally quantified variables (empty for simple effects)
    pub parameters: Vec<TypedParam>,
    pub condition: Condition,
    pub literal: Literal,
}

impl Effect {
    pub fn simple(literal: Literal) -> Effect {
        Effect {
            parameters: Vec::new(),
            condition: Condition::True,
            literal,
        }
    }

    pub fn is_universal(&self) -> bool {
        !self.parameters.is_empty()
    }

    /// Copy of the effect where its quantified variables are renamed.
    pub fn rename(&self, renaming: &HashMap<Sym, Sym>) -> Effect {
        Effect {
            parameters: self
                .parameters
                .iter()
                .map(|p| TypedParam::new(renaming.get(&p.name).cloned().unwrap_or_else(|| p.name.clone()), p.tpe.clone()))
                .collect(),
            condition: self.condition.clone().rename(renaming),
            literal: self.literal.rename(renaming),
        }
    }
}

impl Display for Effect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if !self.parameters.is_empty() {
            write!(f, "forall {}: ", self.parameters.iter().format(", "))?;
        }
        if self.condition != Condition::True {
            write!(f, "if {} then ", self.condition)?;
        }
        write!(f, "{}", self.literal)
    }
}

/// Cost of an action, as given by its `(increase (total-cost) ...)` effect.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum CostExpr {
    Constant(i64),
    /// Value of a function in the initial state, e.g. `(road-length ?from ?to)`
    Function(Atom),
}

impl Display for CostExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CostExpr::Constant(c) => write!(f, "{c}"),
            CostExpr::Function(atom) => write!(f, "{atom}"),
        }
    }
}
