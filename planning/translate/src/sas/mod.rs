//! Finite-domain (SAS+) representation of a ground task and its textual encoding.
//!
//! Variables are identified by their index and their values by `0..range`. In the conditions of
//! operators, an unknown value (`-1` in the output) is represented by `None`.

pub mod encode;
pub mod simplify;
pub mod variable_order;

use std::io::Write;

use derive_more::derive::Display;
use itertools::Itertools;

use crate::errors::TranslateError;

/// Version of the output format.
pub const SAS_FILE_VERSION: u32 = 3;

/// Assignment of a value to a variable.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[display("{var} {value}")]
pub struct Fact {
    pub var: usize,
    pub value: usize,
}

impl Fact {
    pub fn new(var: usize, value: usize) -> Fact {
        Fact { var, value }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Variables {
    /// Number of values of each variable
    pub ranges: Vec<usize>,
    /// Axiom layer of each derived variable, `None` for the variables modified by operators
    pub axiom_layers: Vec<Option<u32>>,
    /// Name of each value of each variable
    pub value_names: Vec<Vec<String>>,
}

impl Variables {
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_derived(&self, var: usize) -> bool {
        self.axiom_layers[var].is_some()
    }

    fn check(&self) -> Result<(), TranslateError> {
        if self.axiom_layers.len() != self.len() || self.value_names.len() != self.len() {
            return Err(TranslateError::internal("inconsistent number of variables"));
        }
        for (var, (&range, names)) in self.ranges.iter().zip(&self.value_names).enumerate() {
            if range == 0 {
                return Err(TranslateError::internal(format!("variable {var} has no value")));
            }
            if names.len() != range {
                return Err(TranslateError::internal(format!(
                    "variable {var} has {range} values but {} names",
                    names.len()
                )));
            }
            if self.axiom_layers[var].is_some() && range != 2 {
                return Err(TranslateError::internal(format!("derived variable {var} is not binary")));
            }
        }
        Ok(())
    }

    fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "{}", self.len())?;
        for (var, ((range, layer), names)) in self
            .ranges
            .iter()
            .zip(&self.axiom_layers)
            .zip(&self.value_names)
            .enumerate()
        {
            writeln!(out, "begin_variable")?;
            writeln!(out, "var{var}")?;
            match layer {
                Some(layer) => writeln!(out, "{layer}")?,
                None => writeln!(out, "-1")?,
            }
            writeln!(out, "{range}")?;
            for name in names {
                writeln!(out, "{name}")?;
            }
            writeln!(out, "end_variable")?;
        }
        Ok(())
    }
}

/// Set of facts of which at most one holds in any reachable state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutexGroup {
    pub facts: Vec<Fact>,
}

impl MutexGroup {
    pub fn new(facts: impl IntoIterator<Item = Fact>) -> MutexGroup {
        MutexGroup {
            facts: facts.into_iter().sorted().dedup().collect(),
        }
    }

    /// Number of distinct variables involved in the group
    pub fn num_vars(&self) -> usize {
        self.facts.iter().map(|f| f.var).dedup().count()
    }

    fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "begin_mutex_group")?;
        writeln!(out, "{}", self.facts.len())?;
        for fact in &self.facts {
            writeln!(out, "{fact}")?;
        }
        writeln!(out, "end_mutex_group")
    }
}

/// Effect of an operator on a variable: if the variable has value `pre` (any value if `None`) and
/// all facts of `condition` hold, the variable takes the value `post`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrePost {
    pub var: usize,
    pub pre: Option<usize>,
    pub post: usize,
    pub condition: Vec<Fact>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operator {
    pub name: String,
    /// Conditions on the variables that are not affected by the operator
    pub prevail: Vec<Fact>,
    pub pre_post: Vec<PrePost>,
    pub cost: i64,
}

impl Operator {
    /// Builds an operator, putting its prevail conditions and effects in canonical (sorted) order.
    pub fn new(name: String, prevail: Vec<Fact>, pre_post: Vec<PrePost>, cost: i64) -> Operator {
        let pre_post = pre_post
            .into_iter()
            .map(|mut pp| {
                pp.condition.sort();
                pp.condition.dedup();
                pp
            })
            .sorted()
            .dedup()
            .collect();
        Operator {
            name,
            prevail: prevail.into_iter().sorted().dedup().collect(),
            pre_post,
            cost,
        }
    }

    /// All facts that must hold for the operator to be applicable.
    pub fn applicability_conditions(&self) -> Vec<Fact> {
        let mut conditions = self.prevail.clone();
        conditions.extend(
            self.pre_post
                .iter()
                .filter_map(|pp| pp.pre.map(|pre| Fact::new(pp.var, pre))),
        );
        conditions.sort();
        conditions.dedup();
        conditions
    }

    pub fn encoding_size(&self) -> usize {
        1 + self.prevail.len()
            + self
                .pre_post
                .iter()
                .map(|pp| 1 + pp.condition.len() + usize::from(pp.pre.is_some()))
                .sum::<usize>()
    }

    fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "begin_operator")?;
        let name = self.name.strip_prefix('(').unwrap_or(&self.name);
        let name = name.strip_suffix(')').unwrap_or(name);
        writeln!(out, "{name}")?;
        writeln!(out, "{}", self.prevail.len())?;
        for fact in &self.prevail {
            writeln!(out, "{fact}")?;
        }
        writeln!(out, "{}", self.pre_post.len())?;
        for pp in &self.pre_post {
            write!(out, "{}", pp.condition.len())?;
            for fact in &pp.condition {
                write!(out, " {fact}")?;
            }
            match pp.pre {
                Some(pre) => writeln!(out, " {} {pre} {}", pp.var, pp.post)?,
                None => writeln!(out, " {} -1 {}", pp.var, pp.post)?,
            }
        }
        writeln!(out, "{}", self.cost)?;
        writeln!(out, "end_operator")
    }
}

/// Rule setting a derived variable to `effect.value` when all facts of the condition hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SasAxiom {
    pub condition: Vec<Fact>,
    pub effect: Fact,
}

impl SasAxiom {
    pub fn new(condition: Vec<Fact>, effect: Fact) -> SasAxiom {
        SasAxiom {
            condition: condition.into_iter().sorted().dedup().collect(),
            effect,
        }
    }

    pub fn encoding_size(&self) -> usize {
        1 + self.condition.len()
    }

    fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "begin_rule")?;
        writeln!(out, "{}", self.condition.len())?;
        for fact in &self.condition {
            writeln!(out, "{fact}")?;
        }
        let Fact { var, value } = self.effect;
        writeln!(out, "{var} {} {value}", 1 - value as i64)?;
        writeln!(out, "end_rule")
    }
}

/// Outcome of a translation step that decided the solvability of the task.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum Trivial {
    #[display("{_0}! Generating unsolvable task...")]
    Unsolvable(&'static str),
    #[display("{_0}! Generating solvable task...")]
    Solvable(&'static str),
}

impl Trivial {
    /// Dummy task with the same solvability.
    pub fn task(self) -> SasTask {
        match self {
            Trivial::Unsolvable(_) => SasTask::unsolvable(),
            Trivial::Solvable(_) => SasTask::solvable(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SasTask {
    pub variables: Variables,
    pub mutexes: Vec<MutexGroup>,
    /// Initial value of each variable
    pub init: Vec<usize>,
    /// Sorted goal facts
    pub goal: Vec<Fact>,
    pub operators: Vec<Operator>,
    pub axioms: Vec<SasAxiom>,
    /// Whether the cost of operators is meaningful (otherwise all operators have unit cost)
    pub metric: bool,
}

impl SasTask {
    /// A task with a single variable whose goal value can never be reached.
    pub fn unsolvable() -> SasTask {
        Self::dummy(1)
    }

    /// A task whose goal holds in the initial state.
    pub fn solvable() -> SasTask {
        Self::dummy(0)
    }

    fn dummy(goal_value: usize) -> SasTask {
        SasTask {
            variables: Variables {
                ranges: vec![2],
                axiom_layers: vec![None],
                value_names: vec![vec!["Atom dummy(val1)".to_string(), "Atom dummy(val2)".to_string()]],
            },
            mutexes: Vec::new(),
            init: vec![0],
            goal: vec![Fact::new(0, goal_value)],
            operators: Vec::new(),
            axioms: Vec::new(),
            metric: true,
        }
    }

    fn check_fact(&self, fact: &Fact) -> Result<(), TranslateError> {
        match self.variables.ranges.get(fact.var) {
            Some(&range) if fact.value < range => Ok(()),
            _ => Err(TranslateError::internal(format!("invalid fact {fact}"))),
        }
    }

    /// Checks that all facts refer to existing variables and values, and that axioms only affect
    /// derived variables, from values of lower layers (or from values of the same layer that are
    /// not negated).
    pub fn check(&self) -> Result<(), TranslateError> {
        self.variables.check()?;
        if self.init.len() != self.variables.len() {
            return Err(TranslateError::internal("initial state does not assign all variables"));
        }
        for (var, &value) in self.init.iter().enumerate() {
            self.check_fact(&Fact::new(var, value))?;
        }
        for fact in self.mutexes.iter().flat_map(|m| &m.facts).chain(&self.goal) {
            self.check_fact(fact)?;
        }
        for op in &self.operators {
            for fact in op.prevail.iter().chain(op.pre_post.iter().flat_map(|pp| &pp.condition)) {
                self.check_fact(fact)?;
            }
            for pp in &op.pre_post {
                self.check_fact(&Fact::new(pp.var, pp.post))?;
                if let Some(pre) = pp.pre {
                    self.check_fact(&Fact::new(pp.var, pre))?;
                }
                if self.variables.is_derived(pp.var) {
                    return Err(TranslateError::internal(format!(
                        "operator {} modifies the derived variable {}",
                        op.name, pp.var
                    )));
                }
            }
        }
        for axiom in &self.axioms {
            self.check_fact(&axiom.effect)?;
            let Some(layer) = self.variables.axiom_layers[axiom.effect.var] else {
                return Err(TranslateError::internal(format!(
                    "axiom modifies the non-derived variable {}",
                    axiom.effect.var
                )));
            };
            for fact in &axiom.condition {
                self.check_fact(fact)?;
                if let Some(cond_layer) = self.variables.axiom_layers[fact.var] {
                    // negative conditions (default value) must be on strictly lower layers
                    let negative = fact.value == 1;
                    if cond_layer > layer || (negative && cond_layer == layer) {
                        return Err(TranslateError::internal(format!(
                            "axiom on layer {layer} depends on variable {} of layer {cond_layer}",
                            fact.var
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of integers needed to encode the task, as a measure of its size.
    pub fn encoding_size(&self) -> usize {
        let variables = self.variables.len() + self.variables.ranges.iter().sum::<usize>();
        let mutexes = self.mutexes.iter().map(|m| m.facts.len()).sum::<usize>();
        let operators = self.operators.iter().map(|op| op.encoding_size()).sum::<usize>();
        let axioms = self.axioms.iter().map(|ax| ax.encoding_size()).sum::<usize>();
        variables + mutexes + self.goal.len() + operators + axioms
    }

    /// Writes the task in the SAS format.
    pub fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "begin_version")?;
        writeln!(out, "{SAS_FILE_VERSION}")?;
        writeln!(out, "end_version")?;
        writeln!(out, "begin_metric")?;
        writeln!(out, "{}", u8::from(self.metric))?;
        writeln!(out, "end_metric")?;
        self.variables.write(out)?;
        writeln!(out, "{}", self.mutexes.len())?;
        for mutex in &self.mutexes {
            mutex.write(out)?;
        }
        writeln!(out, "begin_state")?;
        for value in &self.init {
            writeln!(out, "{value}")?;
        }
        writeln!(out, "end_state")?;
        writeln!(out, "begin_goal")?;
        writeln!(out, "{}", self.goal.len())?;
        for fact in &self.goal {
            writeln!(out, "{fact}")?;
        }
        writeln!(out, "end_goal")?;
        writeln!(out, "{}", self.operators.len())?;
        for op in &self.operators {
            op.write(out)?;
        }
        writeln!(out, "{}", self.axioms.len())?;
        for axiom in &self.axioms {
            axiom.write(out)?;
        }
        Ok(())
    }

    /// Textual encoding of the task, as written by [`SasTask::write`].
    pub fn to_sas_string(&self) -> String {
        let mut buffer = Vec::new();
        // writing to a vector cannot fail
        let _ = self.write(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn log_statistics(&self) {
        tracing::info!("Translator variables: {}", self.variables.len());
        tracing::info!(
            "Translator derived variables: {}",
            self.variables.axiom_layers.iter().filter(|l| l.is_some()).count()
        );
        tracing::info!("Translator facts: {}", self.variables.ranges.iter().sum::<usize>());
        tracing::info!("Translator goal facts: {}", self.goal.len());
        tracing::info!("Translator mutex groups: {}", self.mutexes.len());
        tracing::info!(
            "Translator total mutex groups size: {}",
            self.mutexes.iter().map(|m| m.facts.len()).sum::<usize>()
        );
        tracing::info!("Translator operators: {}", self.operators.len());
        tracing::info!("Translator axioms: {}", self.axioms.len());
        tracing::info!("Translator task size: {}", self.encoding_size());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(var: usize, value: usize) -> Fact {
        Fact::new(var, value)
    }

    /// Two variables: a location with three values and a derived binary variable.
    fn small_task() -> SasTask {
        SasTask {
            variables: Variables {
                ranges: vec![3, 2],
                axiom_layers: vec![None, Some(0)],
                value_names: vec![
                    vec!["Atom at(l1)".into(), "Atom at(l2)".into(), "<none of those>".into()],
                    vec!["Atom ok()".into(), "NegatedAtom ok()".into()],
                ],
            },
            mutexes: vec![MutexGroup::new([fact(0, 1), fact(0, 0)])],
            init: vec![0, 1],
            goal: vec![fact(1, 0)],
            operators: vec![Operator::new(
                "(move l1 l2)".into(),
                vec![],
                vec![PrePost {
                    var: 0,
                    pre: Some(0),
                    post: 1,
                    condition: vec![],
                }],
                1,
            )],
            axioms: vec![SasAxiom::new(vec![fact(0, 1)], fact(1, 0))],
            metric: false,
        }
    }

    #[test]
    fn output_format() {
        let expected = "\
begin_version
3
end_version
begin_metric
0
end_metric
2
begin_variable
var0
-1
3
Atom at(l1)
Atom at(l2)
<none of those>
end_variable
begin_variable
var1
0
2
Atom ok()
NegatedAtom ok()
end_variable
1
begin_mutex_group
2
0 0
0 1
end_mutex_group
begin_state
0
1
end_state
begin_goal
1
1 0
end_goal
1
begin_operator
move l1 l2
0
1
0 0 0 1
1
end_operator
1
begin_rule
1
0 1
1 1 0
end_rule
";
        let task = small_task();
        assert!(task.check().is_ok());
        assert_eq!(task.to_sas_string(), expected);
    }

    #[test]
    fn canonical_operators() {
        let op = Operator::new(
            "(op)".into(),
            vec![fact(3, 0), fact(1, 1), fact(3, 0)],
            vec![
                PrePost {
                    var: 2,
                    pre: None,
                    post: 1,
                    condition: vec![fact(4, 1), fact(1, 0)],
                },
                PrePost {
                    var: 0,
                    pre: Some(1),
                    post: 0,
                    condition: vec![],
                },
            ],
            3,
        );
        assert_eq!(op.prevail, vec![fact(1, 1), fact(3, 0)]);
        assert_eq!(op.pre_post[0].var, 0);
        assert_eq!(op.pre_post[1].condition, vec![fact(1, 0), fact(4, 1)]);
        assert_eq!(op.applicability_conditions(), vec![fact(0, 1), fact(1, 1), fact(3, 0)]);
        // 1 + 2 prevail + (1 + 0 + 1) + (1 + 2 + 0)
        assert_eq!(op.encoding_size(), 8);

        let mut out = Vec::new();
        op.write(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\n0 0 1 0\n2 1 0 4 1 2 -1 1\n3\n"));
    }

    #[test]
    fn encoding_size() {
        // variables: 2 + 5, mutex: 2, goal: 1, operator: 1 + 0 + 2, axiom: 2
        assert_eq!(small_task().encoding_size(), 15);
    }

    #[test]
    fn dummy_tasks() {
        let unsolvable = SasTask::unsolvable();
        assert!(unsolvable.check().is_ok());
        assert_eq!(unsolvable.goal, vec![fact(0, 1)]);
        assert_ne!(unsolvable.init[0], unsolvable.goal[0].value);
        let text = unsolvable.to_sas_string();
        assert!(text.contains("Atom dummy(val1)\nAtom dummy(val2)\n"));
        assert!(text.starts_with("begin_version\n3\nend_version\nbegin_metric\n1\nend_metric\n"));

        let solvable = SasTask::solvable();
        assert_eq!(solvable.init[0], solvable.goal[0].value);
    }

    #[test]
    fn checks_detect_invalid_facts() {
        let mut task = small_task();
        task.goal = vec![fact(0, 3)];
        assert!(matches!(task.check(), Err(TranslateError::Internal(_))));

        let mut task = small_task();
        task.axioms = vec![SasAxiom::new(vec![], fact(0, 0))];
        assert!(task.check().is_err());

        let mut task = small_task();
        task.axioms = vec![SasAxiom::new(vec![fact(1, 1)], fact(1, 0))];
        assert!(task.check().is_err(), "negation within the same layer");
    }

    #[test]
    fn mutex_groups_count_variables() {
        assert_eq!(MutexGroup::new([fact(0, 1), fact(0, 0)]).num_vars(), 1);
        assert_eq!(MutexGroup::new([fact(2, 1), fact(0, 0), fact(2, 0)]).num_vars(), 2);
    }
}
