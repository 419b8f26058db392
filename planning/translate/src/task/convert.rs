//! Conversion of the raw PDDL domain and problem into a typed [`Task`].

use std::collections::BTreeMap;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::errors::*;
use crate::pddl::{self, Domain, Metric, Param, Problem, SExpr};
use crate::sym::Sym;
use crate::task::names::NameGenerator;
use crate::task::*;

/// Variables in scope, mapped to their (possibly renamed) name in the task.
struct Bindings {
    lasts: HashMap<Sym, Sym>,
    prev: Option<Rc<Bindings>>,
}

impl Bindings {
    fn empty() -> Rc<Self> {
        Rc::new(Bindings {
            lasts: HashMap::new(),
            prev: None,
        })
    }

    fn stacked(params: impl IntoIterator<Item = (Sym, Sym)>, prev: &Rc<Bindings>) -> Rc<Self> {
        Rc::new(Bindings {
            lasts: params.into_iter().collect(),
            prev: Some(prev.clone()),
        })
    }

    fn get(&self, name: &Sym) -> Option<&Sym> {
        let mut current = self;
        loop {
            if let Some(renamed) = current.lasts.get(name) {
                return Some(renamed);
            }
            current = current.prev.as_deref()?;
        }
    }
}

/// Symbols declared by the domain and problem, used to resolve the atoms of formulas.
struct Env<'a> {
    types: &'a TypeHierarchy,
    objects: HashSet<Sym>,
    predicates: HashMap<Sym, usize>,
    functions: HashMap<Sym, usize>,
    /// Types whose name is shadowed by a predicate, already reported
    shadowed: HashSet<Sym>,
    vars: &'a mut dyn NameGenerator,
}

const TOTAL_COST: &str = "total-cost";

pub fn build_task(dom: &Domain, prob: &Problem, vars: &mut dyn NameGenerator) -> Res<Task> {
    if dom.name != prob.domain_name {
        return Err(prob
            .domain_name
            .invalid("Problem refers to another domain")
            .info(&dom.name, "name of the domain"));
    }

    let mut type_decls = Vec::with_capacity(dom.types.len());
    for tpe in &dom.types {
        match tpe.tpe.as_slice() {
            [] => type_decls.push((tpe.symbol.clone(), None)),
            [parent] => type_decls.push((tpe.symbol.clone(), Some(parent.clone()))),
            [_, second_parent, ..] => {
                return Err(second_parent
                    .invalid("unexpected second parent type")
                    .info(&tpe.symbol, "for type"));
            }
        }
    }
    let types = TypeHierarchy::new(type_decls)?;

    let mut predicates: Vec<PredicateSchema> = Vec::with_capacity(dom.predicates.len());
    for pred in &dom.predicates {
        if pred.name == "=" {
            return Err(pred.name.invalid("Equality is a built-in predicate"));
        }
        if let Some(previous) = predicates.iter().find(|p| p.name == pred.name) {
            return Err(pred
                .name
                .invalid("Predicate declared twice")
                .info(&previous.name, "previous declaration"));
        }
        predicates.push(PredicateSchema {
            name: pred.name.clone(),
            parameters: typed_params(&pred.args, &types)?,
            derived: false,
        });
    }
    for derived in &dom.derived {
        let Some(pred) = predicates.iter_mut().find(|p| p.name == derived.name) else {
            return Err(derived.name.invalid("Derived predicate is not declared in `:predicates`"));
        };
        if pred.arity() != derived.args.len() {
            return Err(derived
                .name
                .invalid(format!("Derived predicate expects {} parameters", pred.arity()))
                .info(&pred.name, "declaration"));
        }
        pred.derived = true;
    }

    let mut functions = Vec::with_capacity(dom.functions.len());
    for func in &dom.functions {
        if func.tpe.as_ref().is_some_and(|t| t != "number") {
            return Err(func.name.invalid("Object fluents are not supported"));
        }
        functions.push(FunctionSchema {
            name: func.name.clone(),
            parameters: typed_params(&func.args, &types)?,
        });
    }

    let mut objects: Vec<Object> = Vec::with_capacity(dom.constants.len() + prob.objects.len());
    for obj in dom.constants.iter().chain(prob.objects.iter()) {
        if let Some(previous) = objects.iter().find(|o| o.name == obj.symbol) {
            return Err(obj
                .symbol
                .invalid("Object declared twice")
                .info(&previous.name, "previous declaration"));
        }
        let tpe = single_type(obj, &types)?;
        objects.push(Object {
            name: obj.symbol.clone(),
            tpe,
        });
    }

    let mut env = Env {
        types: &types,
        objects: objects.iter().map(|o| o.name.clone()).collect(),
        predicates: predicates.iter().map(|p| (p.name.clone(), p.arity())).collect(),
        functions: functions.iter().map(|f| (f.name.clone(), f.parameters.len())).collect(),
        shadowed: HashSet::new(),
        vars,
    };

    let mut actions = Vec::with_capacity(dom.actions.len());
    for a in &dom.actions {
        let action = env.action(a).with_info(|| a.name.info("when parsing action"))?;
        match action {
            Some(action) => actions.push(action),
            None => debug!("Action {} has no effect and is ignored", a.name),
        }
    }

    let mut axioms = Vec::with_capacity(dom.derived.len());
    for d in &dom.derived {
        let axiom = env.axiom(d).with_info(|| d.name.info("when parsing derived predicate"))?;
        axioms.push(axiom);
    }

    let (mut init, init_assignments) = env.init(prob)?;
    for obj in &objects {
        init.push(Atom::new(Pred::Equal, [obj.name.clone(), obj.name.clone()]));
    }

    let goal = match &prob.goal {
        Some(goal) => env.condition(goal, &Bindings::empty()).title("Invalid goal")?,
        None => return Err(Message::error("The problem has no goal").info(&prob.problem_name, "in problem")),
    };

    let use_min_cost_metric = match &prob.metric {
        None => false,
        Some(Metric::Minimize(e)) if is_total_cost(e) => true,
        Some(Metric::Minimize(e)) | Some(Metric::Maximize(e)) => {
            return Err(e.invalid("Only `(:metric minimize (total-cost))` is supported"));
        }
    };

    Ok(Task {
        domain_name: dom.name.clone(),
        problem_name: prob.problem_name.clone(),
        requirements: dom.features.clone(),
        types,
        objects,
        predicates,
        functions,
        init,
        init_assignments,
        goal,
        actions,
        axioms,
        use_min_cost_metric,
    })
}

fn typed_params(params: &[Param], types: &TypeHierarchy) -> Res<Vec<TypedParam>> {
    params
        .iter()
        .map(|p| Ok(TypedParam::new(p.symbol.clone(), single_type(p, types)?)))
        .collect()
}

fn single_type(param: &Param, types: &TypeHierarchy) -> Res<Sym> {
    match param.tpe.as_slice() {
        [] => Ok(Sym::from(TypeHierarchy::OBJECT)),
        [tpe] if types.contains(tpe.canonical_str()) => Ok(tpe.clone()),
        [tpe] => Err(tpe.invalid("Unknown type")),
        [_, second, ..] => Err(second
            .invalid("`either` types are not supported")
            .info(&param.symbol, "for parameter")),
    }
}

/// Reads an integer, also accepting numbers with a null fractional part such as `3.0`.
fn parse_integer(v: &Sym) -> Res<i64> {
    let s = v.canonical_str();
    if let Ok(i) = s.parse::<i64>() {
        return Ok(i);
    }
    match s.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        Ok(_) => Err(v.invalid("Fractional numbers are not supported")),
        Err(_) => Err(v.invalid("Expected a number")),
    }
}

fn is_total_cost(e: &SExpr) -> bool {
    e.as_application(TOTAL_COST).is_some_and(|args| args.is_empty())
}

/// A condition being read, possibly under an odd number of negations.
enum Todo<'a> {
    Enter(&'a SExpr, bool, Rc<Bindings>),
    Exit(Compound, usize),
}

enum Compound {
    And,
    Or,
    Forall(Vec<TypedParam>),
    Exists(Vec<TypedParam>),
}

/// An effect being flattened, with the quantified variables and conditions of its enclosing effects.
struct PendingEffect<'a> {
    expr: &'a SExpr,
    parameters: Vec<TypedParam>,
    conditions: Vec<Condition>,
    bindings: Rc<Bindings>,
}

impl Env<'_> {
    /// Declares the variables of a quantifier or schema, renaming those whose name is already taken.
    fn bind(&mut self, params: &[Param], outer: &Rc<Bindings>, rename: bool) -> Res<(Vec<TypedParam>, Rc<Bindings>)> {
        let mut seen = HashSet::new();
        let mut typed = Vec::with_capacity(params.len());
        let mut renamings = Vec::with_capacity(params.len());
        for p in params {
            if !p.symbol.is_variable() {
                return Err(p.symbol.invalid("Expected a variable"));
            }
            if !seen.insert(p.symbol.clone()) {
                return Err(p.symbol.invalid("Variable declared twice"));
            }
            let tpe = single_type(p, self.types)?;
            let first_use = self.vars.reserve(&p.symbol);
            let name = if rename && !first_use {
                self.vars.fresh(p.symbol.canonical_str())
            } else {
                p.symbol.unspanned()
            };
            renamings.push((p.symbol.unspanned(), name.clone()));
            typed.push(TypedParam::new(name, tpe));
        }
        Ok((typed, Bindings::stacked(renamings, outer)))
    }

    fn action(&mut self, a: &pddl::Action) -> Res<Option<Action>> {
        let (parameters, bindings) = self.bind(&a.args, &Bindings::empty(), false)?;
        let precondition = match &a.pre {
            Some(pre) => self.condition(pre, &bindings)?,
            None => Condition::True,
        };
        let (effects, cost) = match &a.eff {
            Some(eff) => self.effects(eff, &bindings)?,
            None => (Vec::new(), None),
        };
        if effects.is_empty() {
            return Ok(None);
        }
        Ok(Some(Action {
            name: a.name.clone(),
            num_external: parameters.len(),
            parameters,
            precondition,
            effects,
            cost,
        }))
    }

    fn axiom(&mut self, d: &pddl::Derived) -> Res<Axiom> {
        let (parameters, bindings) = self.bind(&d.args, &Bindings::empty(), false)?;
        let condition = self.condition(&d.body, &bindings)?;
        Ok(Axiom {
            name: d.name.clone(),
            num_external: parameters.len(),
            parameters,
            condition,
        })
    }

    /// Resolves the predicate of an atom. A type name is a unary predicate, unless a predicate has the same name.
    fn predicate(&mut self, head: &Sym, arity: usize) -> Res<Pred> {
        let (pred, expected) = if head == "=" {
            (Pred::Equal, 2)
        } else if let Some(&expected) = self.predicates.get(head) {
            if self.types.contains(head.canonical_str()) && self.shadowed.insert(head.unspanned()) {
                warn!("Predicate `{head}` has the same name as a type, the predicate is used in formulas");
            }
            (Pred::Named(head.unspanned()), expected)
        } else if self.types.contains(head.canonical_str()) {
            (Pred::Type(head.unspanned()), 1)
        } else {
            return Err(head.invalid("Unknown predicate"));
        };
        if arity != expected {
            return Err(head.invalid(format!("Expected {expected} arguments but got {arity}")));
        }
        Ok(pred)
    }

    fn term(&self, arg: &SExpr, bindings: &Bindings) -> Res<Sym> {
        let sym = arg.as_atom().ok_or_else(|| arg.invalid("Expected a variable or an object"))?;
        if sym.is_variable() {
            bindings.get(sym).cloned().ok_or_else(|| sym.invalid("Unbound variable"))
        } else if self.objects.contains(sym) {
            Ok(sym.unspanned())
        } else {
            Err(sym.invalid("Unknown object"))
        }
    }

    fn atom(&mut self, e: &SExpr, bindings: &Bindings) -> Res<Atom> {
        let mut list = e.as_list_iter().ok_or_else(|| e.invalid("Expected an atom"))?;
        let head = list.pop_atom()?;
        let args = list.map(|arg| self.term(arg, bindings)).collect::<Res<Args>>()?;
        let pred = self.predicate(head, args.len())?;
        Ok(Atom { pred, args })
    }

    /// Reads a condition into its negation normal form.
    fn condition(&mut self, e: &SExpr, bindings: &Rc<Bindings>) -> Res<Condition> {
        let mut stack = vec![Todo::Enter(e, false, bindings.clone())];
        let mut done: Vec<Condition> = Vec::new();
        while let Some(todo) = stack.pop() {
            let (e, negated, bindings) = match todo {
                Todo::Enter(e, negated, bindings) => (e, negated, bindings),
                Todo::Exit(compound, n) => {
                    let mut children = done.split_off(done.len() - n);
                    let built = match compound {
                        Compound::And => Condition::And(children),
                        Compound::Or => Condition::Or(children),
                        Compound::Forall(params) => Condition::Forall(params, Box::new(single(&mut children)?)),
                        Compound::Exists(params) => Condition::Exists(params, Box::new(single(&mut children)?)),
                    };
                    done.push(built);
                    continue;
                }
            };
            if e.is_empty_list() {
                done.push(if negated { Condition::False } else { Condition::True });
                continue;
            }
            let mut list = e.as_list_iter().ok_or_else(|| e.invalid("Expected a condition"))?;
            let head = list.pop_atom()?;
            let Some(kind) = ConditionKind::classify(head.canonical_str()) else {
                let lit = Literal {
                    atom: self.atom(e, &bindings)?,
                    negated,
                };
                done.push(Condition::Literal(lit));
                continue;
            };
            match kind {
                ConditionKind::And | ConditionKind::Or => {
                    let conjunctive = (kind == ConditionKind::And) != negated;
                    let compound = if conjunctive { Compound::And } else { Compound::Or };
                    let parts = list.rest();
                    stack.push(Todo::Exit(compound, parts.len()));
                    for part in parts.iter().rev() {
                        stack.push(Todo::Enter(part, negated, bindings.clone()));
                    }
                }
                ConditionKind::Not => {
                    let [arg] = list.rest() else {
                        return Err(e.invalid("`not` expects exactly one argument"));
                    };
                    stack.push(Todo::Enter(arg, !negated, bindings));
                }
                ConditionKind::Imply => {
                    let [lhs, rhs] = list.rest() else {
                        return Err(e.invalid("`imply` expects exactly two arguments"));
                    };
                    // a -> b is (not a) or b, whose negation is a and (not b)
                    let compound = if negated { Compound::And } else { Compound::Or };
                    stack.push(Todo::Exit(compound, 2));
                    stack.push(Todo::Enter(rhs, negated, bindings.clone()));
                    stack.push(Todo::Enter(lhs, !negated, bindings));
                }
                ConditionKind::Forall | ConditionKind::Exists => {
                    let [vars, body] = list.rest() else {
                        return Err(e.invalid("Expected a list of variables and a condition"));
                    };
                    let mut vars = vars.as_list_iter().ok_or_else(|| vars.invalid("Expected a list of variables"))?;
                    let vars = pddl::consume_typed_symbols(&mut vars)?;
                    let (params, inner) = self.bind(&vars, &bindings, true)?;
                    let universal = (kind == ConditionKind::Forall) != negated;
                    let compound = if universal {
                        Compound::Forall(params)
                    } else {
                        Compound::Exists(params)
                    };
                    stack.push(Todo::Exit(compound, 1));
                    stack.push(Todo::Enter(body, negated, inner));
                }
            }
        }
        Ok(single(&mut done)?.simplified())
    }

    /// Flattens an effect into a list of `forall/when/literal` effects and an optional cost.
    fn effects(&mut self, e: &SExpr, bindings: &Rc<Bindings>) -> Res<(Vec<Effect>, Option<CostExpr>)> {
        let mut result: Vec<Effect> = Vec::new();
        let mut cost: Option<CostExpr> = None;
        let mut stack = vec![PendingEffect {
            expr: e,
            parameters: Vec::new(),
            conditions: Vec::new(),
            bindings: bindings.clone(),
        }];
        while let Some(pending) = stack.pop() {
            let e = pending.expr;
            if e.is_empty_list() {
                continue;
            }
            let mut list = e.as_list_iter().ok_or_else(|| e.invalid("Expected an effect"))?;
            let head = list.pop_atom()?;
            match EffectKind::classify(head.canonical_str()) {
                Some(EffectKind::And) => {
                    for part in list.rest().iter().rev() {
                        stack.push(PendingEffect {
                            expr: part,
                            parameters: pending.parameters.clone(),
                            conditions: pending.conditions.clone(),
                            bindings: pending.bindings.clone(),
                        });
                    }
                }
                Some(EffectKind::Forall) => {
                    let [vars, body] = list.rest() else {
                        return Err(e.invalid("Expected a list of variables and an effect"));
                    };
                    let mut vars = vars.as_list_iter().ok_or_else(|| vars.invalid("Expected a list of variables"))?;
                    let vars = pddl::consume_typed_symbols(&mut vars)?;
                    let (params, inner) = self.bind(&vars, &pending.bindings, true)?;
                    let mut parameters = pending.parameters;
                    parameters.extend(params);
                    stack.push(PendingEffect {
                        expr: body,
                        parameters,
                        conditions: pending.conditions,
                        bindings: inner,
                    });
                }
                Some(EffectKind::When) => {
                    let [cond, body] = list.rest() else {
                        return Err(e.invalid("Expected a condition and an effect"));
                    };
                    let cond = self.condition(cond, &pending.bindings)?;
                    let mut conditions = pending.conditions;
                    conditions.push(cond);
                    stack.push(PendingEffect {
                        expr: body,
                        parameters: pending.parameters,
                        conditions,
                        bindings: pending.bindings,
                    });
                }
                Some(EffectKind::Increase) => {
                    if !pending.parameters.is_empty() || !pending.conditions.is_empty() {
                        return Err(e.invalid("Cost increases are only supported as unconditional top-level effects"));
                    }
                    if cost.is_some() {
                        return Err(e.invalid("Action has more than one cost effect"));
                    }
                    cost = Some(self.cost(e, &pending.bindings)?);
                }
                Some(EffectKind::Not) => {
                    let [atom] = list.rest() else {
                        return Err(e.invalid("`not` expects exactly one argument"));
                    };
                    let literal = self.effect_atom(atom, &pending.bindings)?.negative();
                    add_effect(&mut result, pending.parameters, pending.conditions, literal);
                }
                None => {
                    let literal = self.effect_atom(e, &pending.bindings)?.positive();
                    add_effect(&mut result, pending.parameters, pending.conditions, literal);
                }
            }
        }
        Ok((result, cost))
    }

    fn effect_atom(&mut self, e: &SExpr, bindings: &Bindings) -> Res<Atom> {
        let atom = self.atom(e, bindings)?;
        match atom.pred {
            Pred::Named(_) => Ok(atom),
            Pred::Equal => Err(e.invalid("Equality cannot be modified by an action")),
            Pred::Type(_) => Err(e.invalid("The type of an object cannot be modified by an action")),
        }
    }

    /// Reads `(increase (total-cost) N)` or `(increase (total-cost) (f ?x ...))`.
    fn cost(&mut self, e: &SExpr, bindings: &Bindings) -> Res<CostExpr> {
        let args = e.as_application("increase").unwrap_or_default();
        let [target, value] = args else {
            return Err(e.invalid("`increase` expects two arguments"));
        };
        if !is_total_cost(target) {
            return Err(target.invalid("Only increases of `(total-cost)` are supported"));
        }
        match value {
            SExpr::Atom(v) => {
                let c = parse_integer(v)?;
                if c < 0 {
                    return Err(v.invalid("Action costs must not be negative"));
                }
                Ok(CostExpr::Constant(c))
            }
            SExpr::List(_) => Ok(CostExpr::Function(self.function_term(value, bindings)?)),
        }
    }

    fn function_term(&self, e: &SExpr, bindings: &Bindings) -> Res<Atom> {
        let mut list = e.as_list_iter().ok_or_else(|| e.invalid("Expected a function term"))?;
        let head = list.pop_atom()?;
        let Some(&arity) = self.functions.get(head) else {
            return Err(head.invalid("Unknown function"));
        };
        let args = list.map(|arg| self.term(arg, bindings)).collect::<Res<Args>>()?;
        if args.len() != arity {
            return Err(head.invalid(format!("Expected {arity} arguments but got {}", args.len())));
        }
        Ok(Atom::new(Pred::Named(head.unspanned()), args))
    }

    /// Reads the initial state: true atoms (in order of appearance) and function values.
    fn init(&mut self, prob: &Problem) -> Res<(Vec<Atom>, BTreeMap<Atom, i64>)> {
        let no_vars = Bindings::empty();
        let mut init = Vec::with_capacity(prob.init.len() + self.objects.len());
        let mut positive: HashMap<Atom, &SExpr> = HashMap::new();
        let mut negative: Vec<(Atom, &SExpr)> = Vec::new();
        let mut assignments: BTreeMap<Atom, i64> = BTreeMap::new();
        let mut assignment_sources: HashMap<Atom, &SExpr> = HashMap::new();

        for fact in &prob.init {
            if let Some([term, value]) = fact.as_application("=") {
                if term.is_atom(TOTAL_COST) || is_total_cost(term) {
                    // the initial value of the total cost is irrelevant
                    continue;
                }
                let term = self.function_term(term, &no_vars)?;
                let value = value.as_atom().ok_or_else(|| value.invalid("Expected a number"))?;
                let value = parse_integer(value)?;
                if let Some(previous) = assignments.insert(term.clone(), value) {
                    if previous != value {
                        let mut msg = fact.invalid("Function assigned two different values");
                        if let Some(other) = assignment_sources.get(&term) {
                            msg = msg.info(other, "previous assignment");
                        }
                        return Err(msg);
                    }
                }
                assignment_sources.insert(term, fact);
            } else if let Some(args) = fact.as_application("not") {
                let [atom] = args else {
                    return Err(fact.invalid("`not` expects exactly one argument"));
                };
                let atom = self.atom(atom, &no_vars)?;
                negative.push((atom, fact));
            } else {
                let atom = self.atom(fact, &no_vars)?;
                if atom.pred.is_equality() {
                    return Err(fact.invalid("Equality is built-in and cannot appear in the initial state"));
                }
                if positive.insert(atom.clone(), fact).is_some() {
                    warn!("Duplicate fact in the initial state: {atom}");
                } else {
                    init.push(atom);
                }
            }
        }
        for (atom, fact) in &negative {
            if let Some(pos) = positive.get(atom) {
                return Err(fact
                    .invalid("Fact is declared both true and false in the initial state")
                    .info(pos, "declared true here"));
            }
        }
        Ok((init, assignments))
    }
}

fn single(children: &mut Vec<Condition>) -> Res<Condition> {
    children
        .pop()
        .ok_or_else(|| Message::error("Malformed condition"))
}

/// Adds a flattened effect. An add and a delete of the same atom under the same parameters and condition
/// leave only the add effect.
fn add_effect(result: &mut Vec<Effect>, parameters: Vec<TypedParam>, conditions: Vec<Condition>, literal: Literal) {
    let effect = Effect {
        parameters,
        condition: Condition::And(conditions).simplified(),
        literal,
    };
    let contradiction = Effect {
        parameters: effect.parameters.clone(),
        condition: effect.condition.clone(),
        literal: effect.literal.negate(),
    };
    if let Some(pos) = result.iter().position(|e| e == &contradiction) {
        if contradiction.literal.negated {
            result.remove(pos);
            result.push(effect);
        }
    } else if !result.contains(&effect) {
        result.push(effect);
    }
}
