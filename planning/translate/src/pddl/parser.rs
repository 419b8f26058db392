use crate::errors::*;
use crate::sym::Sym;

use itertools::Itertools;
use smallvec::{SmallVec, smallvec};
use std::fmt::{Display, Error, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use crate::pddl::input::*;
use crate::pddl::sexpr::*;
use crate::utils::disp_slice;

pub fn parse_pddl_domain(dom: Input) -> Res<Domain> {
    let dom = Arc::new(dom);
    let expr = parse(dom.clone())?;
    read_domain(expr).title("Invalid domain: Syntax error")
}
pub fn parse_pddl_problem(pb: Input) -> Res<Problem> {
    let pb = Arc::new(pb);
    let expr = parse(pb.clone())?;
    read_problem(expr).title("Invalid problem: Syntax error")
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PddlFeature {
    Strips,
    Typing,
    Equality,
    NegativePreconditions,
    DisjunctivePreconditions,
    UniversalPreconditions,
    ExistentialPreconditions,
    QuantifiedPreconditions,
    ConditionalEffects,
    DerivedPredicates,
    Adl,
    ActionCosts,
    DurativeAction,
    NumericFluent,
    Fluents,
    TimedInitialLiterals,
    Preferences,
    Constraints,
}
impl std::str::FromStr for PddlFeature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ":strips" => Ok(PddlFeature::Strips),
            ":typing" => Ok(PddlFeature::Typing),
            ":equality" => Ok(PddlFeature::Equality),
            ":negative-preconditions" => Ok(PddlFeature::NegativePreconditions),
            ":disjunctive-preconditions" => Ok(PddlFeature::DisjunctivePreconditions),
            ":universal-preconditions" => Ok(PddlFeature::UniversalPreconditions),
            ":existential-preconditions" => Ok(PddlFeature::ExistentialPreconditions),
            ":quantified-preconditions" => Ok(PddlFeature::QuantifiedPreconditions),
            ":conditional-effects" => Ok(PddlFeature::ConditionalEffects),
            ":derived-predicates" => Ok(PddlFeature::DerivedPredicates),
            ":adl" => Ok(PddlFeature::Adl),
            ":action-costs" => Ok(PddlFeature::ActionCosts),
            ":durative-actions" => Ok(PddlFeature::DurativeAction),
            ":numeric-fluents" => Ok(PddlFeature::NumericFluent),
            ":fluents" => Ok(PddlFeature::Fluents),
            ":timed-initial-literals" => Ok(PddlFeature::TimedInitialLiterals),
            ":preferences" => Ok(PddlFeature::Preferences),
            ":constraints" => Ok(PddlFeature::Constraints),
            _ => Err(format!("Unknown feature `{s}`")),
        }
    }
}
impl Display for PddlFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let formatted = match self {
            PddlFeature::Strips => ":strips",
            PddlFeature::Typing => ":typing",
            PddlFeature::Equality => ":equality",
            PddlFeature::NegativePreconditions => ":negative-preconditions",
            PddlFeature::DisjunctivePreconditions => ":disjunctive-preconditions",
            PddlFeature::UniversalPreconditions => ":universal-preconditions",
            PddlFeature::ExistentialPreconditions => ":existential-preconditions",
            PddlFeature::QuantifiedPreconditions => ":quantified-preconditions",
            PddlFeature::ConditionalEffects => ":conditional-effects",
            PddlFeature::DerivedPredicates => ":derived-predicates",
            PddlFeature::Adl => ":adl",
            PddlFeature::ActionCosts => ":action-costs",
            PddlFeature::DurativeAction => ":durative-actions",
            PddlFeature::NumericFluent => ":numeric-fluents",
            PddlFeature::Fluents => ":fluents",
            PddlFeature::TimedInitialLiterals => ":timed-initial-literals",
            PddlFeature::Preferences => ":preferences",
            PddlFeature::Constraints => ":constraints",
        };
        write!(f, "{formatted}")
    }
}

/// Raw content of a domain file: every block is kept as close as possible to its syntax.
#[derive(Debug, Clone)]
pub struct Domain {
    pub name: Sym,
    pub features: Vec<PddlFeature>,
    pub types: Vec<TypedSymbol>,
    pub constants: Vec<TypedSymbol>,
    pub predicates: Vec<Predicate>,
    pub functions: Vec<Function>,
    pub actions: Vec<Action>,
    pub derived: Vec<Derived>,
}
impl Display for Domain {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "# Domain : {}", self.name)?;
        write!(f, "\n# Types \n  ")?;
        disp_slice(f, self.types.as_slice(), "\n  ")?;
        write!(f, "\n# Predicates \n  ")?;
        disp_slice(f, self.predicates.as_slice(), "\n  ")?;
        write!(f, "\n# Functions \n  ")?;
        disp_slice(f, self.functions.as_slice(), "\n  ")?;
        write!(f, "\n# Actions \n  ")?;
        disp_slice(f, self.actions.as_slice(), "\n  ")?;
        write!(f, "\n# Derived \n  ")?;
        disp_slice(f, self.derived.as_slice(), "\n  ")?;
        Result::Ok(())
    }
}

pub type TypedSymbol = Param;

pub type Types = SmallVec<[Sym; 1]>;

/// Parameter to a predicate, function or action
#[derive(Debug, Clone)]
pub struct Param {
    /// name of the parameter
    pub symbol: Sym,
    /// Possible types of the parameter (`object` if empty)
    pub tpe: Types,
}
impl Param {
    pub fn new(symbol: impl Into<Sym>, tpe: impl Into<Sym>) -> Self {
        Self {
            symbol: symbol.into(),
            tpe: smallvec![tpe.into()],
        }
    }

    pub fn new_union(symbol: impl Into<Sym>, tpe: Types) -> Self {
        Self {
            symbol: symbol.into(),
            tpe,
        }
    }
}

impl Display for Param {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self.tpe.as_slice() {
            [tpe] => write!(f, "{}: {}", self.symbol, tpe),
            [] => write!(f, "{}", self.symbol),
            several => {
                write!(f, "{}: {{", self.symbol)?;
                disp_slice(f, several, ", ")?;
                write!(f, "}}")
            }
        }
    }
}

/// A PDDL predicate, i.e., state function whose codomain is the set of booleans.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub name: Sym,
    pub args: Vec<Param>,
    pub source: Option<Span>,
}
impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}(", self.name)?;
        disp_slice(f, self.args.as_slice(), ", ")?;
        write!(f, ")")
    }
}

/// A PDDL function, i.e., state function whose codomain is the set of reals.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Sym,
    pub args: Vec<Param>,
    pub tpe: Option<Sym>,
    pub source: Option<Span>,
}

impl Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        disp_slice(f, self.args.as_slice(), ", ")?;
        write!(f, ")")
    }
}

#[derive(Clone, Debug)]
pub struct Action {
    pub name: Sym,
    pub args: Vec<Param>,
    pub pre: Option<SExpr>,
    pub eff: Option<SExpr>,
    /// Span covering the entire action definition
    pub span: Span,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}(", self.name)?;
        disp_slice(f, self.args.as_slice(), ", ")?;
        write!(f, ")")
    }
}

/// Definition of a derived predicate: `(:derived (head ?x - t) body)`
#[derive(Clone, Debug)]
pub struct Derived {
    pub name: Sym,
    pub args: Vec<Param>,
    pub body: SExpr,
    pub span: Span,
}

impl Display for Derived {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}(", self.name)?;
        disp_slice(f, self.args.as_slice(), ", ")?;
        write!(f, ") <- {}", self.body)
    }
}

impl Spanned for Derived {
    fn span(&self) -> Option<&Span> {
        Some(&self.span)
    }
}

/// Consume a typed list of symbols
///  - (a - loc b - loc c - loc) : symbols a, b and c of type loc
///  - (a b c - loc)  : symbols a, b and c of type loc
///  - (a b c) : symbols a b and c of type object
pub fn consume_typed_symbols(input: &mut ListIter) -> std::result::Result<Vec<TypedSymbol>, Message> {
    let mut args = Vec::with_capacity(input.len() / 3);
    let mut untyped: Vec<Sym> = Vec::with_capacity(args.len());
    while !input.is_empty() {
        let next = input.pop_atom()?;
        if next.canonical_str() == "-" {
            if untyped.is_empty() {
                return Err(next.invalid("Type annotation without any symbol to annotate"));
            }
            let mut types = Types::with_capacity(1);
            let tpe = input.pop()?;
            if let Some(variants) = tpe.as_application("either") {
                for variant in variants {
                    types.push(
                        variant
                            .as_atom()
                            .cloned()
                            .ok_or_else(|| variant.invalid("expected type name"))?,
                    );
                }
            } else {
                types.push(tpe.as_atom().cloned().ok_or_else(|| tpe.invalid("expected type name"))?);
            }
            untyped
                .drain(..)
                .map(|name| TypedSymbol::new_union(name, types.clone()))
                .for_each(|a| args.push(a));
        } else {
            untyped.push(next.into());
        }
    }
    // no type given, everything is an object
    untyped
        .drain(..)
        .map(|name| TypedSymbol {
            symbol: name,
            tpe: smallvec![],
        })
        .for_each(|a| args.push(a));
    Result::Ok(args)
}

fn read_domain(dom: SExpr) -> std::result::Result<Domain, Message> {
    let dom = &mut dom.as_list_iter().ok_or_else(|| dom.invalid("Expected a list"))?;

    dom.pop_known_atom("define")?;

    // extract the name of the domain, of the form `(domain XXX)`
    let mut domain_name_decl = dom.pop_list()?.iter();
    domain_name_decl.pop_known_atom("domain")?;
    let name = domain_name_decl.pop_atom().title("missing name of domain")?.clone();

    let mut res = Domain {
        name,
        features: vec![],
        types: vec![],
        constants: vec![],
        predicates: vec![],
        functions: vec![],
        actions: vec![],
        derived: vec![],
    };

    for current in dom {
        // a property associates a key (e.g. `:predicates`) to a value or a sequence of values
        let mut property = current
            .as_list_iter()
            .ok_or_else(|| current.invalid("expected a property list"))?;

        match property.pop_atom()?.canonical_str() {
            ":requirements" => {
                for feature in property {
                    let feature = feature
                        .as_atom()
                        .ok_or_else(|| feature.invalid("Expected feature name but got list"))?;
                    let f = PddlFeature::from_str(feature.canonical_str()).map_err(|e| feature.invalid(e))?;

                    res.features.push(f);
                }
            }
            ":predicates" => {
                for pred in property {
                    let mut pred = pred.as_list_iter().ok_or_else(|| pred.invalid("Expected a list"))?;
                    let name = pred.pop_atom()?.clone();
                    let args = consume_typed_symbols(&mut pred)?;
                    res.predicates.push(Predicate {
                        name,
                        args,
                        source: Some(pred.loc()),
                    });
                }
            }
            ":types" => {
                if !res.types.is_empty() {
                    return Err(current.invalid("More than one ':types' section definition"));
                }
                res.types = consume_typed_symbols(&mut property)?;
            }
            ":constants" => {
                if !res.constants.is_empty() {
                    return Err(current.invalid("More than one ':constants' section definition"));
                }
                res.constants = consume_typed_symbols(&mut property)?;
            }
            ":functions" => {
                while let Ok(func) = property.pop() {
                    // element is necessarily a function name and parameters, e.g., (road-length ?from ?to)
                    let mut func = func.as_list_iter().ok_or_else(|| func.invalid("Expected a list"))?;
                    let name = func.pop_atom()?.clone();
                    let args = consume_typed_symbols(&mut func)?;

                    // optional type annotation, e.g., (total-cost) - number
                    let tpe = if property.peek().is_some_and(|a| a.is_atom("-")) {
                        property.pop_known_atom("-")?;
                        Some(property.pop_atom().title("expected a type").cloned()?)
                    } else {
                        None
                    };
                    res.functions.push(Function {
                        name,
                        args,
                        tpe,
                        source: Some(func.loc()),
                    });
                }
            }
            ":action" => {
                let name = property.pop_atom()?.clone();
                let mut args = None;
                let mut pre = None;
                let mut eff = None;
                while !property.is_empty() {
                    let key_expr = property.pop_atom()?;
                    let value = property.pop().tag(key_expr, "No value associated to arg", None)?;
                    match key_expr.canonical_str() {
                        ":parameters" => {
                            if args.is_some() {
                                return Err(key_expr.invalid("Duplicated ':parameters' tag is not allowed"));
                            }
                            let mut value = value
                                .as_list_iter()
                                .ok_or_else(|| value.invalid("Expected a parameter list"))?;
                            args = Some(consume_typed_symbols(&mut value)?);
                        }
                        ":precondition" => {
                            if pre.is_some() {
                                return Err(key_expr.invalid("Duplicated ':precondition' tag is not allowed"));
                            }
                            pre = Some(value.clone());
                        }
                        ":effect" => {
                            if eff.is_some() {
                                return Err(key_expr.invalid("Duplicated ':effect' tag is not allowed"));
                            }
                            eff = Some(value.clone());
                        }
                        _ => return Err(key_expr.invalid("unsupported key in action")),
                    }
                }
                res.actions.push(Action {
                    name,
                    args: args.unwrap_or_default(),
                    pre,
                    eff,
                    span: current.loc(),
                })
            }
            ":derived" => {
                let head = property.pop()?;
                let mut head_list = head
                    .as_list_iter()
                    .ok_or_else(|| head.invalid("Expected the head of the derived predicate"))?;
                let name = head_list.pop_atom()?.clone();
                let args = consume_typed_symbols(&mut head_list)?;
                let body = property.pop().title("Missing body of derived predicate")?.clone();
                if let Some(unexpected) = property.next() {
                    return Err(unexpected.invalid("Expected end of derived predicate"));
                }
                res.derived.push(Derived {
                    name,
                    args,
                    body,
                    span: current.loc(),
                });
            }
            ":durative-action" => {
                return Err(current.invalid("Temporal planning is not supported"));
            }
            _ => return Err(current.invalid("unsupported block")),
        }
    }
    Ok(res)
}

/// given a term type T, parse one of `T, () or (and T T ...)
pub fn parse_conjunction<T>(e: &SExpr, item_parser: impl Fn(&SExpr) -> Res<T>) -> Res<Vec<T>> {
    match e {
        SExpr::Atom(_) => Ok(vec![item_parser(e)?]),
        SExpr::List(l) => {
            if let Some(conjuncts) = e.as_application("and") {
                let mut result = Vec::with_capacity(conjuncts.len());
                for c in conjuncts {
                    result.push(item_parser(c)?);
                }
                Ok(result)
            } else if l.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![item_parser(e)?])
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Problem {
    pub problem_name: Sym,
    pub domain_name: Sym,
    pub objects: Vec<TypedSymbol>,
    pub init: Vec<SExpr>,
    pub goal: Option<SExpr>,
    pub metric: Option<Metric>,
}

#[derive(Clone, Debug)]
pub enum Metric {
    Minimize(SExpr),
    Maximize(SExpr),
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "# Problem {} (domain: {})", &self.problem_name, &self.domain_name)?;
        write!(f, "\n# Objects \n  ")?;
        disp_slice(f, self.objects.as_slice(), "\n  ")?;
        write!(f, "\n# Init \n  ")?;
        disp_slice(f, self.init.as_slice(), "\n  ")?;
        write!(f, "\n# Goal \n  ")?;
        if let Some(goal) = &self.goal {
            write!(f, "{goal}")?;
        }
        Result::Ok(())
    }
}

fn read_problem(problem: SExpr) -> std::result::Result<Problem, Message> {
    let mut problem = problem
        .as_list_iter()
        .ok_or_else(|| problem.invalid("Expected a list"))?;
    problem.pop_known_atom("define")?;

    let mut problem_name = problem
        .pop_list()
        .title("Expected problem name definition of the form '(problem XXXXXX)'")?
        .iter();
    problem_name.pop_known_atom("problem")?;
    let problem_name = problem_name.pop_atom()?.clone();

    let mut domain_name_def = problem.pop_list()?.iter();
    domain_name_def.pop_known_atom(":domain")?;
    let domain_name = domain_name_def.pop_atom()?.clone();

    let mut res = Problem {
        problem_name,
        domain_name,
        objects: vec![],
        init: vec![],
        goal: None,
        metric: None,
    };

    for current in problem {
        // a property associates a key (e.g. `:objects`) to a value or a sequence of values
        let mut property = current
            .as_list_iter()
            .ok_or_else(|| current.invalid("Expected a list"))?;
        match property.pop_atom()?.canonical_str() {
            ":requirements" => {} // requirements are a property of the domain
            ":objects" => {
                let objects = consume_typed_symbols(&mut property)?;
                res.objects.extend(objects);
            }
            ":init" => {
                res.init.extend(property.cloned());
            }
            ":goal" => {
                if res.goal.is_some() {
                    return Err(current.invalid("More than one goal definition"));
                }
                let goal = property.pop().title("Missing goal condition")?;
                if let Some(unexpected) = property.next() {
                    return Err(unexpected.invalid("A goal must be a single condition"));
                }
                res.goal = Some(goal.clone());
            }
            ":metric" => {
                let qualifier = property.pop_atom()?;
                match qualifier.canonical_str() {
                    "minimize" => res.metric = Some(Metric::Minimize(property.pop().cloned()?)),
                    "maximize" => res.metric = Some(Metric::Maximize(property.pop().cloned()?)),
                    _ => return Err(qualifier.invalid("expected `maximize` or `minimize")),
                }
            }
            _ => return Err(current.invalid("unsupported block")),
        }
    }

    Ok(res)
}

/// Renders the requirements of the domain, for diagnostics.
pub fn features_string(features: &[PddlFeature]) -> String {
    features.iter().format(" ").to_string()
}
