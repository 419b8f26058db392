//! Grounding program of a normalized task.
//!
//! The task is relaxed into a set of Horn rules (negative literals are ignored) whose least model
//! over-approximates the atoms, actions and axioms that are reachable from the initial state.
//! Rules are split into join, product and projection rules of at most two conditions before
//! the model is computed bottom-up (see [`model::compute_model`]).

pub mod model;
pub mod split;

use std::fmt::{Display, Formatter};

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use smallvec::SmallVec;
use tracing::debug;

use crate::sym::Sym;
use crate::task::{Atom, Condition, Pred, Task, TypedParam};
use crate::utils::Fmt;

/// Identifier of an interned [`Relation`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct RelId(u32);

impl RelId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of an interned object.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ObjId(u32);

impl ObjId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Relations of the grounding program.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Relation {
    /// Predicate of the task, including type predicates and equality.
    Pred(Pred),
    /// Applicability of the action with this index, over all its parameters.
    Action(usize),
    /// Applicability of the axiom with this index, over all its parameters.
    Axiom(usize),
    /// Intermediate relation introduced when splitting rules.
    Aux(u32),
    /// Holds for every object.
    Object,
    /// Holds if the relaxed goal is reachable.
    GoalReachable,
}

impl Relation {
    pub fn is_auxiliary(&self) -> bool {
        matches!(self, Relation::Aux(_))
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Relation::Pred(p) => write!(f, "{p}"),
            Relation::Action(i) => write!(f, "action@{i}"),
            Relation::Axiom(i) => write!(f, "axiom@{i}"),
            Relation::Aux(i) => write!(f, "p${i}"),
            Relation::Object => write!(f, "@object"),
            Relation::GoalReachable => write!(f, "@goal-reachable"),
        }
    }
}

/// Interned relations and objects of a program.
#[derive(Clone, Default, Debug)]
pub struct SymbolTable {
    relations: Vec<Relation>,
    relation_ids: HashMap<Relation, RelId>,
    objects: Vec<Sym>,
    object_ids: HashMap<Sym, ObjId>,
}

impl SymbolTable {
    pub fn intern_relation(&mut self, rel: Relation) -> RelId {
        if let Some(&id) = self.relation_ids.get(&rel) {
            return id;
        }
        let id = RelId(self.relations.len() as u32);
        self.relations.push(rel.clone());
        self.relation_ids.insert(rel, id);
        id
    }

    pub fn intern_object(&mut self, obj: &Sym) -> ObjId {
        if let Some(&id) = self.object_ids.get(obj) {
            return id;
        }
        let id = ObjId(self.objects.len() as u32);
        self.objects.push(obj.unspanned());
        self.object_ids.insert(obj.unspanned(), id);
        id
    }

    pub fn relation(&self, id: RelId) -> &Relation {
        &self.relations[id.index()]
    }

    pub fn object(&self, id: ObjId) -> &Sym {
        &self.objects[id.index()]
    }

    pub fn relation_id(&self, rel: &Relation) -> Option<RelId> {
        self.relation_ids.get(rel).copied()
    }

    pub fn object_id(&self, obj: &str) -> Option<ObjId> {
        self.object_ids.get(obj).copied()
    }

    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    /// Converts a ground atom of the task.
    /// Returns `None` if one of its arguments is not a known object.
    pub fn ground_atom(&self, atom: &Atom) -> Option<GroundAtom> {
        let rel = self.relation_id(&Relation::Pred(atom.pred.clone()))?;
        let args = atom.args.iter().map(|a| self.object_id(a.canonical_str())).collect::<Option<GroundArgs>>()?;
        Some(GroundAtom { rel, args })
    }

    pub fn display<'a>(&'a self, atom: &'a GroundAtom) -> impl Display + 'a {
        Fmt(move |f| {
            write!(f, "{}(", self.relation(atom.rel))?;
            write!(f, "{}", atom.args.iter().map(|&a| self.object(a)).format(", "))?;
            write!(f, ")")
        })
    }
}

pub type GroundArgs = SmallVec<[ObjId; 4]>;

/// An atom of the model of the program.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct GroundAtom {
    pub rel: RelId,
    pub args: GroundArgs,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Term {
    Var(Sym),
    Obj(ObjId),
}

impl Term {
    pub fn as_var(&self) -> Option<&Sym> {
        match self {
            Term::Var(v) => Some(v),
            Term::Obj(_) => None,
        }
    }
}

/// An atom of a rule, whose arguments may be variables.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct RuleAtom {
    pub rel: RelId,
    pub args: SmallVec<[Term; 4]>,
}

impl RuleAtom {
    pub fn variables(&self) -> impl Iterator<Item = &Sym> + '_ {
        self.args.iter().filter_map(Term::as_var)
    }

    pub fn has_variables(&self) -> bool {
        self.variables().next().is_some()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RuleKind {
    /// Two conditions, joined on their common variables.
    Join,
    /// Two or more conditions without common variables.
    Product,
    /// A single condition.
    Project,
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub kind: RuleKind,
    pub body: Vec<RuleAtom>,
    pub head: RuleAtom,
}

/// A rule as generated from the task, with an arbitrary number of conditions.
#[derive(Clone, Debug)]
pub(crate) struct RawRule {
    pub body: Vec<RuleAtom>,
    pub head: RuleAtom,
}

pub struct Program {
    pub symbols: SymbolTable,
    pub facts: Vec<GroundAtom>,
    pub rules: Vec<Rule>,
}

impl Program {
    /// Builds the relaxed exploration program of a normalized task.
    pub fn build(task: &Task) -> Program {
        let mut builder = Builder {
            symbols: SymbolTable::default(),
        };
        for obj in &task.objects {
            builder.symbols.intern_object(&obj.name);
        }
        let mut facts = task
            .type_atoms()
            .iter()
            .chain(&task.init)
            .map(|a| builder.fact(a))
            .collect_vec();
        let rules = builder.exploration_rules(task);
        let rules = normalize_rules(&mut builder.symbols, rules, &mut facts);
        let rules = split::split_rules(&mut builder.symbols, rules);
        debug!("Generated {} rules", rules.len());
        Program {
            symbols: builder.symbols,
            facts,
            rules,
        }
    }

    pub fn atom<'a>(&'a self, atom: &'a RuleAtom) -> impl Display + 'a {
        Fmt(move |f| {
            write!(f, "{}(", self.symbols.relation(atom.rel))?;
            let args = atom.args.iter().map(|t| match t {
                Term::Var(v) => v.to_string(),
                Term::Obj(o) => self.symbols.object(*o).to_string(),
            });
            write!(f, "{})", args.format(", "))
        })
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for fact in &self.facts {
            writeln!(f, "{}.", self.symbols.display(fact))?;
        }
        for rule in &self.rules {
            let kind = match rule.kind {
                RuleKind::Join => "join",
                RuleKind::Product => "product",
                RuleKind::Project => "project",
            };
            let body = rule.body.iter().map(|a| self.atom(a)).format(", ");
            writeln!(f, "{kind} {} :- {}.", self.atom(&rule.head), body)?;
        }
        Ok(())
    }
}

struct Builder {
    symbols: SymbolTable,
}

impl Builder {
    fn fact(&mut self, atom: &Atom) -> GroundAtom {
        let rel = self.symbols.intern_relation(Relation::Pred(atom.pred.clone()));
        let args = atom.args.iter().map(|a| self.symbols.intern_object(a)).collect();
        GroundAtom { rel, args }
    }

    fn term(&mut self, s: &Sym) -> Term {
        if s.is_variable() {
            Term::Var(s.unspanned())
        } else {
            Term::Obj(self.symbols.intern_object(s))
        }
    }

    fn rule_atom(&mut self, rel: Relation, args: &[Sym]) -> RuleAtom {
        let rel = self.symbols.intern_relation(rel);
        let args = args.iter().map(|a| self.term(a)).collect();
        RuleAtom { rel, args }
    }

    fn type_conditions(&mut self, params: &[TypedParam]) -> Vec<RuleAtom> {
        params
            .iter()
            .map(|p| self.rule_atom(Relation::Pred(Pred::Type(p.tpe.clone())), std::slice::from_ref(&p.name)))
            .collect()
    }

    /// Positive literals of a normalized condition. Negative literals are relaxed away.
    fn positive_conditions(&mut self, condition: &Condition) -> Vec<RuleAtom> {
        condition
            .literals()
            .filter(|l| !l.negated)
            .map(|l| self.rule_atom(Relation::Pred(l.atom.pred.clone()), &l.atom.args))
            .collect()
    }

    fn exploration_rules(&mut self, task: &Task) -> Vec<RawRule> {
        let mut rules = Vec::new();
        for (i, action) in task.actions.iter().enumerate() {
            let params = action.parameters.iter().map(|p| p.name.clone()).collect_vec();
            let applicable = self.rule_atom(Relation::Action(i), &params);
            let mut body = self.type_conditions(&action.parameters);
            body.extend(self.positive_conditions(&action.precondition));
            rules.push(RawRule {
                body,
                head: applicable.clone(),
            });
            for effect in &action.effects {
                if effect.literal.negated {
                    continue;
                }
                let mut body = vec![applicable.clone()];
                body.extend(self.type_conditions(&effect.parameters));
                body.extend(self.positive_conditions(&effect.condition));
                let head = self.rule_atom(Relation::Pred(effect.literal.atom.pred.clone()), &effect.literal.atom.args);
                rules.push(RawRule { body, head });
            }
        }
        for (i, axiom) in task.axioms.iter().enumerate() {
            let params = axiom.parameters.iter().map(|p| p.name.clone()).collect_vec();
            let applicable = self.rule_atom(Relation::Axiom(i), &params);
            let mut body = self.type_conditions(&axiom.parameters);
            body.extend(self.positive_conditions(&axiom.condition));
            rules.push(RawRule {
                body,
                head: applicable.clone(),
            });
            let head = self.rule_atom(Relation::Pred(Pred::Named(axiom.name.clone())), &params[..axiom.num_external]);
            rules.push(RawRule {
                body: vec![applicable],
                head,
            });
        }
        let body = self.positive_conditions(&task.goal);
        let head = self.rule_atom(Relation::GoalReachable, &[]);
        rules.push(RawRule { body, head });
        rules
    }
}

/// Makes the rules safe and free of repeated arguments, turning rules without conditions into facts.
fn normalize_rules(symbols: &mut SymbolTable, mut rules: Vec<RawRule>, facts: &mut Vec<GroundAtom>) -> Vec<RawRule> {
    // variables of the head that are not bound by the body range over all objects
    let object = symbols.intern_relation(Relation::Object);
    let mut needs_objects = false;
    for rule in &mut rules {
        let bound: HashSet<Sym> = rule.body.iter().flat_map(|a| a.variables()).cloned().collect();
        let free = rule
            .head
            .variables()
            .filter(|v| !bound.contains(*v))
            .cloned()
            .sorted()
            .dedup()
            .collect_vec();
        for var in free {
            needs_objects = true;
            rule.body.push(RuleAtom {
                rel: object,
                args: SmallVec::from_iter([Term::Var(var)]),
            });
        }
    }
    if needs_objects {
        let mentioned: HashSet<ObjId> = facts.iter().flat_map(|f| f.args.iter().copied()).collect();
        let objects = (0..symbols.num_objects() as u32).map(ObjId).filter(|o| mentioned.contains(o));
        facts.extend(objects.map(|o| GroundAtom {
            rel: object,
            args: SmallVec::from_iter([o]),
        }));
    }

    let equal = symbols.intern_relation(Relation::Pred(Pred::Equal));
    for rule in &mut rules {
        split_duplicate_arguments(rule, equal);
    }

    let mut result = Vec::with_capacity(rules.len());
    for rule in rules {
        if rule.body.is_empty() {
            let args = rule
                .head
                .args
                .iter()
                .map(|t| match t {
                    Term::Obj(o) => *o,
                    Term::Var(_) => unreachable!("unsafe rule without conditions"),
                })
                .collect();
            facts.push(GroundAtom {
                rel: rule.head.rel,
                args,
            });
        } else {
            result.push(rule);
        }
    }
    result
}

/// Replaces the repeated occurrences of a variable in an atom by fresh variables constrained to be equal.
fn split_duplicate_arguments(rule: &mut RawRule, equal: RelId) {
    let mut extra = Vec::new();
    let atoms = std::iter::once(&mut rule.head).chain(rule.body.iter_mut());
    for atom in atoms {
        let mut seen: HashSet<Sym> = HashSet::new();
        for arg in atom.args.iter_mut() {
            let Term::Var(var) = arg else { continue };
            if !seen.insert(var.clone()) {
                let renamed = Sym::from(format!("{var}@{}", extra.len()));
                extra.push(RuleAtom {
                    rel: equal,
                    args: SmallVec::from_iter([Term::Var(var.clone()), Term::Var(renamed.clone())]),
                });
                *arg = Term::Var(renamed);
            }
        }
    }
    rule.body.extend(extra);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Res;
    use crate::normalize::tests::normalized;

    const DOMAIN: &str = "(define (domain d) (:types ball room)
      (:predicates (at ?b - ball ?r - room) (link ?a ?b - room) (same ?a ?b - room))
      (:action move :parameters (?b - ball ?from ?to - room)
        :precondition (and (at ?b ?from) (link ?from ?to) (not (at ?b ?to)))
        :effect (and (at ?b ?to) (not (at ?b ?from))))
      (:action pair :parameters (?r - room)
        :precondition ()
        :effect (same ?r ?r)))";

    const PROBLEM: &str = "(define (problem p) (:domain d) (:objects b - ball r1 r2 - room)
      (:init (at b r1) (link r1 r2)) (:goal (at b r2)))";

    #[test]
    fn rules_of_the_task() -> Res<()> {
        let task = normalized(DOMAIN, PROBLEM)?;
        let program = Program::build(&task);
        let text = program.to_string();
        assert!(text.contains("at(b, r1)."));
        assert!(text.contains("ball(b)."));
        assert!(text.contains("object(r2)."));
        assert!(text.contains("=(r1, r1)."));
        // every rule has at most two conditions once split
        for rule in &program.rules {
            match rule.kind {
                RuleKind::Join => assert_eq!(rule.body.len(), 2),
                RuleKind::Product => assert!(rule.body.len() >= 2),
                RuleKind::Project => assert_eq!(rule.body.len(), 1),
            }
        }
        Ok(())
    }

    #[test]
    fn repeated_arguments_are_split() {
        let mut symbols = SymbolTable::default();
        let same = symbols.intern_relation(Relation::Pred(Pred::named("same")));
        let room = symbols.intern_relation(Relation::Pred(Pred::Type(Sym::from("room"))));
        let equal = symbols.intern_relation(Relation::Pred(Pred::Equal));
        let var = |v: &str| Term::Var(Sym::from(v));
        let mut rule = RawRule {
            body: vec![RuleAtom {
                rel: room,
                args: SmallVec::from_iter([var("?r")]),
            }],
            head: RuleAtom {
                rel: same,
                args: SmallVec::from_iter([var("?r"), var("?r")]),
            },
        };
        split_duplicate_arguments(&mut rule, equal);
        assert_eq!(rule.head.args.as_slice(), &[var("?r"), var("?r@0")]);
        assert_eq!(rule.body.len(), 2);
        assert_eq!(rule.body[1].rel, equal);
        assert_eq!(rule.body[1].args.as_slice(), &[var("?r"), var("?r@0")]);
    }

    #[test]
    fn unbound_head_variables_range_over_objects() {
        let mut symbols = SymbolTable::default();
        let a = symbols.intern_object(&Sym::from("a"));
        let p = symbols.intern_relation(Relation::Pred(Pred::named("p")));
        let q = symbols.intern_relation(Relation::Pred(Pred::named("q")));
        let rules = vec![
            RawRule {
                body: vec![RuleAtom {
                    rel: q,
                    args: SmallVec::new(),
                }],
                head: RuleAtom {
                    rel: p,
                    args: SmallVec::from_iter([Term::Var(Sym::from("?x"))]),
                },
            },
            RawRule {
                body: vec![],
                head: RuleAtom {
                    rel: q,
                    args: SmallVec::new(),
                },
            },
        ];
        let mut facts = vec![GroundAtom {
            rel: p,
            args: SmallVec::from_iter([a]),
        }];
        let rules = normalize_rules(&mut symbols, rules, &mut facts);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].body.len(), 2);
        let object = symbols.relation_id(&Relation::Object);
        assert_eq!(rules[0].body[1].rel, object.unwrap());
        // the object fact, then the rule without conditions
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[2].rel, q);
    }
}
