use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::sym::Sym;
use crate::task::{Condition, CostExpr, Effect, TypedParam};

/// An action schema.
#[derive(Clone, Debug)]
pub struct Action {
    pub name: Sym,
    /// Parameters of the action. Only the first `num_external` ones appear in the name of its ground instances,
    /// the others are introduced when compiling away existential preconditions.
    pub parameters: Vec<TypedParam>,
    pub num_external: usize,
    pub precondition: Condition,
    pub effects: Vec<Effect>,
    pub cost: Option<CostExpr>,
}

impl Action {
    pub fn external_parameters(&self) -> &[TypedParam] {
        &self.parameters[..self.num_external]
    }

    /// Name of the parameters and of all variables quantified in its effects.
    pub fn variable_names(&self) -> impl Iterator<Item = &Sym> + '_ {
        self.parameters
            .iter()
            .chain(self.effects.iter().flat_map(|e| e.parameters.iter()))
            .map(|p| &p.name)
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}({})", self.name, self.parameters.iter().format(", "))?;
        writeln!(f, "  pre: {}", self.precondition)?;
        for eff in &self.effects {
            writeln!(f, "  eff: {eff}")?;
        }
        if let Some(cost) = &self.cost {
            writeln!(f, "  cost: {cost}")?;
        }
        Ok(())
    }
}

/// Rule defining a derived predicate: `name(parameters[..num_external]) <- condition`.
#[derive(Clone, Debug)]
pub struct Axiom {
    pub name: Sym,
    pub parameters: Vec<TypedParam>,
    pub num_external: usize,
    pub condition: Condition,
}

impl Axiom {
    pub fn external_parameters(&self) -> &[TypedParam] {
        &self.parameters[..self.num_external]
    }
}

impl Display for Axiom {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}) <- {}",
            self.name,
            self.external_parameters().iter().format(", "),
            self.condition
        )
    }
}
