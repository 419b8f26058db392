//! Translation of PDDL planning tasks into finite-domain (SAS+) tasks.
//!
//! The pipeline parses a domain and a problem, normalizes the resulting first-order task, grounds it with a
//! relaxed reachability analysis, synthesizes mutex invariants to group atoms into multi-valued variables
//! and finally writes the encoded task in the SAS format. The entry point is [`translate::translate`].

pub mod axiom_rules;
pub mod datalog;
pub mod errors;
pub mod fact_groups;
pub mod graph;
pub mod instantiate;
pub mod invariants;
pub mod limits;
pub mod normalize;
pub mod options;
pub mod pddl;
pub mod sas;
pub mod sym;
pub mod task;
pub mod translate;
pub mod utils;
