//! Options of the translation. They only affect the size of the produced task and the verbosity of the
//! translator, never the semantics of the task.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// How derived variables are assigned to axiom layers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LayerStrategy {
    /// Smallest layer compatible with the dependencies of each variable
    #[default]
    Min,
    /// One layer per strongly connected component of the dependency graph
    Max,
}

impl FromStr for LayerStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(LayerStrategy::Min),
            "max" => Ok(LayerStrategy::Max),
            _ => Err(format!("Unknown layer strategy `{s}`, expected `min` or `max`")),
        }
    }
}

impl Display for LayerStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerStrategy::Min => write!(f, "min"),
            LayerStrategy::Max => write!(f, "max"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TranslateOptions {
    /// If false, an atom may be encoded in several variables (one per group it belongs to).
    pub use_partial_encoding: bool,
    /// Remove the values that cannot be reached in the domain transition graph of their variable.
    pub filter_unreachable_facts: bool,
    /// Remove the variables that are irrelevant to the goal.
    pub filter_unimportant_vars: bool,
    /// Order variables according to the causal graph (instead of the order of fact groups).
    pub reorder_variables: bool,
    pub invariant_max_candidates: usize,
    pub invariant_max_time: Duration,
    pub layer_strategy: LayerStrategy,
    /// Wall-clock limit for the entire translation
    pub time_limit: Option<Duration>,
    /// Maximal number of atoms in the model of the grounding program
    pub max_model_atoms: Option<usize>,
    /// Log the grounded task before its finite-domain encoding
    pub dump_task: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        TranslateOptions {
            use_partial_encoding: true,
            filter_unreachable_facts: true,
            filter_unimportant_vars: true,
            reorder_variables: true,
            invariant_max_candidates: 100_000,
            invariant_max_time: Duration::from_secs(300),
            layer_strategy: LayerStrategy::Min,
            time_limit: None,
            max_model_atoms: None,
            dump_task: false,
        }
    }
}
