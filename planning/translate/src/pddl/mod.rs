//! Reading of PDDL files into a raw, syntax-level representation.

pub mod find_file;
pub mod input;
pub mod parser;
pub mod sexpr;

pub use find_file::find_domain_of;
pub use parser::*;
pub use sexpr::{SAtom, SExpr, SList};
