//! First-order representation of a planning task (domain and problem), with typed objects and schemas.

pub mod actions;
pub mod conditions;
pub mod convert;
pub mod effects;
pub mod names;

pub use actions::*;
pub use conditions::*;
pub use effects::*;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use smallvec::SmallVec;

use crate::errors::*;
use crate::pddl::PddlFeature;
use crate::sym::Sym;

/// Arguments of an atom. Most predicates have at most three parameters.
pub type Args = SmallVec<[Sym; 3]>;

/// Tree of the types of the task, rooted at `object`.
#[derive(Clone, Debug)]
pub struct TypeHierarchy {
    /// All types, in declaration order (`object` first)
    types: Vec<Sym>,
    parents: HashMap<Sym, Sym>,
}

impl TypeHierarchy {
    pub const OBJECT: &'static str = "object";

    /// Builds the hierarchy from `(type, parent)` declarations.
    ///
    /// Types without a parent, as well as parent types that are never declared, are placed directly below `object`.
    pub fn new(declarations: impl IntoIterator<Item = (Sym, Option<Sym>)>) -> Res<TypeHierarchy> {
        let object = Sym::from(Self::OBJECT);
        let mut types = vec![object.clone()];
        let mut parents: HashMap<Sym, Sym> = HashMap::new();
        let mut declared: HashMap<Sym, Sym> = HashMap::new();

        for (tpe, parent) in declarations {
            let parent = parent.unwrap_or_else(|| object.clone());
            if tpe == object {
                if parent != object {
                    return Err(tpe.invalid("The `object` type cannot have a parent type"));
                }
                continue;
            }
            if let Some(previous) = declared.get(&tpe) {
                if previous != &parent {
                    return Err(tpe
                        .invalid("Type declared with more than one parent")
                        .info(previous, "previous parent"));
                }
                continue;
            }
            declared.insert(tpe.clone(), parent.clone());
            // declaration of the type takes precedence over its implicit use as a parent
            if !parents.contains_key(&tpe) {
                types.push(tpe.clone());
            }
            parents.insert(tpe.clone(), parent.clone());
            if parent != object && !parents.contains_key(&parent) {
                types.push(parent.clone());
                parents.insert(parent.clone(), object.clone());
            }
        }
        let hierarchy = TypeHierarchy { types, parents };
        for tpe in &hierarchy.types {
            let mut visited = HashSet::new();
            let mut current = tpe;
            while let Some(parent) = hierarchy.parents.get(current) {
                if !visited.insert(current) {
                    return Err(tpe.invalid("Cyclic type hierarchy"));
                }
                current = parent;
            }
        }
        Ok(hierarchy)
    }

    pub fn contains(&self, tpe: &str) -> bool {
        tpe == Self::OBJECT || self.parents.contains_key(tpe)
    }

    /// All types in declaration order, starting with `object`.
    pub fn types(&self) -> &[Sym] {
        &self.types
    }

    pub fn parent(&self, tpe: &str) -> Option<&Sym> {
        self.parents.get(tpe)
    }

    /// The type itself followed by all its ancestors, up to `object`.
    pub fn ancestors<'a>(&'a self, tpe: &'a Sym) -> impl Iterator<Item = &'a Sym> + 'a {
        std::iter::successors(Some(tpe), move |t| self.parents.get(*t))
    }
}

#[derive(Clone, Debug)]
pub struct Object {
    pub name: Sym,
    pub tpe: Sym,
}

/// Predicate declared in the domain. Derived predicates are defined by axioms.
#[derive(Clone, Debug)]
pub struct PredicateSchema {
    pub name: Sym,
    pub parameters: Vec<TypedParam>,
    pub derived: bool,
}

impl PredicateSchema {
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }
}

#[derive(Clone, Debug)]
pub struct FunctionSchema {
    pub name: Sym,
    pub parameters: Vec<TypedParam>,
}

#[derive(Clone, Debug)]
pub struct Task {
    pub domain_name: Sym,
    pub problem_name: Sym,
    pub requirements: Vec<PddlFeature>,
    pub types: TypeHierarchy,
    /// All objects (domain constants and problem objects), in declaration order
    pub objects: Vec<Object>,
    pub predicates: Vec<PredicateSchema>,
    pub functions: Vec<FunctionSchema>,
    /// Atoms true in the initial state (including equality atoms), all others being false.
    pub init: Vec<Atom>,
    /// Initial value of functions, e.g. `(= (road-length a b) 10)`
    pub init_assignments: BTreeMap<Atom, i64>,
    pub goal: Condition,
    pub actions: Vec<Action>,
    pub axioms: Vec<Axiom>,
    pub use_min_cost_metric: bool,
}

impl Task {
    pub fn predicate(&self, name: &str) -> Option<&PredicateSchema> {
        self.predicates.iter().find(|p| p.name == name)
    }

    pub fn derived_predicates(&self) -> HashSet<Sym> {
        self.predicates
            .iter()
            .filter(|p| p.derived)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Maps each type to the objects of this type or any of its subtypes, in declaration order.
    pub fn objects_by_type(&self) -> HashMap<Sym, Vec<Sym>> {
        let mut result: HashMap<Sym, Vec<Sym>> = self.types.types().iter().map(|t| (t.clone(), Vec::new())).collect();
        for obj in &self.objects {
            for tpe in self.types.ancestors(&obj.tpe) {
                result.entry(tpe.clone()).or_default().push(obj.name.clone());
            }
        }
        result
    }

    /// Type membership atoms of all objects, e.g. `block(a)` and `object(a)`.
    pub fn type_atoms(&self) -> Vec<Atom> {
        self.objects
            .iter()
            .flat_map(|obj| {
                self.types
                    .ancestors(&obj.tpe)
                    .map(move |tpe| Atom::new(Pred::Type(tpe.clone()), [obj.name.clone()]))
            })
            .collect()
    }

    /// Type of all variables declared in a schema or one of its quantifiers.
    pub fn type_map<'a>(params: impl IntoIterator<Item = &'a TypedParam>) -> HashMap<Sym, Sym> {
        params.into_iter().map(|p| (p.name.clone(), p.tpe.clone())).collect()
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Problem {}: {} (domain {})", self.problem_name, self.requirements.iter().format(" "), self.domain_name)?;
        writeln!(f, "Types:")?;
        for tpe in self.types.types() {
            match self.types.parent(tpe.canonical_str()) {
                Some(parent) => writeln!(f, "  {tpe} - {parent}")?,
                None => writeln!(f, "  {tpe}")?,
            }
        }
        writeln!(f, "Objects:")?;
        for obj in &self.objects {
            writeln!(f, "  {}: {}", obj.name, obj.tpe)?;
        }
        writeln!(f, "Init:")?;
        for atom in &self.init {
            writeln!(f, "  {atom}")?;
        }
        for (atom, value) in &self.init_assignments {
            writeln!(f, "  {atom} := {value}")?;
        }
        writeln!(f, "Goal:\n  {}", self.goal)?;
        writeln!(f, "Actions:")?;
        for action in &self.actions {
            write!(f, "  {action}")?;
        }
        writeln!(f, "Axioms:")?;
        for axiom in &self.axioms {
            writeln!(f, "  {axiom}")?;
        }
        Ok(())
    }
}
