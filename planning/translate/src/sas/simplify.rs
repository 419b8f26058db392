//! Removal of the values that are unreachable in the domain transition graph of their variable, and
//! of the variables left with a single value.

use fixedbitset::FixedBitSet;
use itertools::Itertools;
use tracing::{debug, info};

use crate::sas::{Fact, MutexGroup, Operator, PrePost, SasAxiom, SasTask, Trivial, Variables};

/// Transitions between the values of a variable.
struct DomainTransitionGraph {
    init: usize,
    /// successors of each value
    arcs: Vec<Vec<usize>>,
}

impl DomainTransitionGraph {
    fn new(init: usize, size: usize) -> Self {
        DomainTransitionGraph {
            init,
            arcs: vec![Vec::new(); size],
        }
    }

    /// Adds arcs to `post` from `pre`, or from all other values if `pre` is unknown.
    fn add_arcs(&mut self, pre: Option<usize>, post: usize) {
        match pre {
            Some(pre) => self.arcs[pre].push(post),
            None => {
                for (value, arcs) in self.arcs.iter_mut().enumerate() {
                    if value != post {
                        arcs.push(post);
                    }
                }
            }
        }
    }

    fn size(&self) -> usize {
        self.arcs.len()
    }

    fn reachable(&self) -> FixedBitSet {
        let mut reached = FixedBitSet::with_capacity(self.size());
        reached.insert(self.init);
        let mut queue = vec![self.init];
        while let Some(value) = queue.pop() {
            for &next in &self.arcs[value] {
                if !reached.put(next) {
                    queue.push(next);
                }
            }
        }
        reached
    }
}

/// Value that must hold in the effect condition or precondition of an effect on `var`, `None` if
/// any value is possible, or `Err(())` if they contradict each other.
fn effective_pre(var: usize, conditions: &[Fact], effect_condition: &[Fact]) -> Result<Option<usize>, ()> {
    let mut result = conditions.iter().find(|f| f.var == var).map(|f| f.value);
    for fact in effect_condition.iter().filter(|f| f.var == var) {
        match result {
            None => result = Some(fact.value),
            Some(value) if value != fact.value => return Err(()),
            Some(_) => {}
        }
    }
    Ok(result)
}

fn build_dtgs(task: &SasTask) -> Vec<DomainTransitionGraph> {
    let mut dtgs = task
        .init
        .iter()
        .zip(&task.variables.ranges)
        .map(|(&init, &size)| DomainTransitionGraph::new(init, size))
        .collect_vec();
    for op in &task.operators {
        let conditions = op.applicability_conditions();
        for pp in &op.pre_post {
            if let Ok(pre) = effective_pre(pp.var, &conditions, &pp.condition) {
                dtgs[pp.var].add_arcs(pre, pp.post);
            }
        }
    }
    for axiom in &task.axioms {
        dtgs[axiom.effect.var].add_arcs(None, axiom.effect.value);
    }
    dtgs
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum NewValue {
    AlwaysTrue,
    AlwaysFalse,
    Value(usize),
}

/// A fact that can never hold.
struct Impossible;

/// Renaming of the variables and values that remain after the removal of unreachable values.
struct Renaming {
    /// New index of each variable, `None` for removed variables
    new_vars: Vec<Option<usize>>,
    /// New value of each value of each (old) variable
    new_values: Vec<Vec<NewValue>>,
    /// Number of values of each new variable
    new_sizes: Vec<usize>,
    num_removed_values: usize,
}

impl Renaming {
    fn new(dtgs: &[DomainTransitionGraph]) -> Renaming {
        let mut renaming = Renaming {
            new_vars: Vec::with_capacity(dtgs.len()),
            new_values: Vec::with_capacity(dtgs.len()),
            new_sizes: Vec::new(),
            num_removed_values: 0,
        };
        for dtg in dtgs {
            renaming.register_variable(dtg.size(), dtg.init, &dtg.reachable());
        }
        renaming
    }

    fn register_variable(&mut self, size: usize, init: usize, domain: &FixedBitSet) {
        debug_assert!(domain.contains(init));
        if domain.count_ones(..) == 1 {
            let mut values = vec![NewValue::AlwaysFalse; size];
            values[init] = NewValue::AlwaysTrue;
            self.new_vars.push(None);
            self.new_values.push(values);
            self.num_removed_values += size;
        } else {
            let mut next = 0;
            let values = (0..size)
                .map(|value| {
                    if domain.contains(value) {
                        next += 1;
                        NewValue::Value(next - 1)
                    } else {
                        self.num_removed_values += 1;
                        NewValue::AlwaysFalse
                    }
                })
                .collect();
            self.new_vars.push(Some(self.new_sizes.len()));
            self.new_values.push(values);
            self.new_sizes.push(next);
        }
    }

    fn translate(&self, fact: Fact) -> (Option<usize>, NewValue) {
        (self.new_vars[fact.var], self.new_values[fact.var][fact.value])
    }

    /// Facts that remain after the renaming (the always true ones are dropped).
    fn convert(&self, facts: &[Fact]) -> Result<Vec<Fact>, Impossible> {
        let mut result = Vec::with_capacity(facts.len());
        for &fact in facts {
            match self.translate(fact) {
                (_, NewValue::AlwaysFalse) => return Err(Impossible),
                (_, NewValue::AlwaysTrue) => {}
                (Some(var), NewValue::Value(value)) => result.push(Fact::new(var, value)),
                (None, NewValue::Value(_)) => unreachable!("values of removed variables are constant"),
            }
        }
        Ok(result)
    }

    fn apply_to_variables(&self, variables: &Variables) -> Variables {
        let mut axiom_layers = vec![None; self.new_sizes.len()];
        let mut value_names = self.new_sizes.iter().map(|&size| vec![String::new(); size]).collect_vec();
        for (var, names) in variables.value_names.iter().enumerate() {
            if let Some(new_var) = self.new_vars[var] {
                axiom_layers[new_var] = variables.axiom_layers[var];
            }
            for (value, name) in names.iter().enumerate() {
                match self.translate(Fact::new(var, value)) {
                    (Some(new_var), NewValue::Value(new_value)) => value_names[new_var][new_value] = name.clone(),
                    (_, NewValue::AlwaysTrue) => debug!("Removed true proposition: {name}"),
                    _ => debug!("Removed false proposition: {name}"),
                }
            }
        }
        Variables {
            ranges: self.new_sizes.clone(),
            axiom_layers,
            value_names,
        }
    }

    fn apply_to_mutexes(&self, mutexes: &[MutexGroup]) -> Vec<MutexGroup> {
        let result = mutexes
            .iter()
            .filter_map(|mutex| {
                let facts = mutex
                    .facts
                    .iter()
                    .filter_map(|&f| match self.translate(f) {
                        (Some(var), NewValue::Value(value)) => Some(Fact::new(var, value)),
                        _ => None,
                    })
                    .collect_vec();
                (facts.len() >= 2).then(|| MutexGroup::new(facts))
            })
            .collect_vec();
        info!("{} of {} mutex groups necessary.", result.len(), mutexes.len());
        result
    }

    fn apply_to_init(&self, init: &[usize]) -> Vec<usize> {
        let mut values = vec![0; self.new_sizes.len()];
        for (var, &value) in init.iter().enumerate() {
            if let (Some(new_var), NewValue::Value(new_value)) = self.translate(Fact::new(var, value)) {
                values[new_var] = new_value;
            }
        }
        values
    }

    /// Renames an operator, or returns `None` if it is never applicable or has no effect.
    ///
    /// Preconditions are recomputed from scratch since the precondition of a removed effect
    /// becomes a prevail condition.
    fn apply_to_operator(&self, op: &Operator) -> Option<Operator> {
        let conditions = self.convert(&op.applicability_conditions()).ok()?;
        let mut prevail_vars = conditions.iter().map(|f| f.var).collect_vec();
        let mut pre_post = Vec::new();
        for pp in &op.pre_post {
            if let Some(new_pp) = self.apply_to_pre_post(pp, &conditions) {
                prevail_vars.retain(|&v| v != new_pp.var);
                pre_post.push(new_pp);
            }
        }
        if pre_post.is_empty() {
            return None;
        }
        let prevail = conditions
            .into_iter()
            .filter(|f| prevail_vars.contains(&f.var))
            .collect();
        Some(Operator::new(op.name.clone(), prevail, pre_post, op.cost))
    }

    /// Renamed effect, or `None` if it can never change the value of its variable.
    fn apply_to_pre_post(&self, pp: &PrePost, conditions: &[Fact]) -> Option<PrePost> {
        let (new_var, new_post) = self.translate(Fact::new(pp.var, pp.post));
        let new_post = match new_post {
            NewValue::AlwaysTrue => return None,
            NewValue::AlwaysFalse => return None,
            NewValue::Value(value) => value,
        };
        let new_var = new_var?;
        let new_pre = match pp.pre {
            None => None,
            Some(pre) => match self.translate(Fact::new(pp.var, pre)).1 {
                NewValue::Value(value) => Some(value),
                // the operator was already found applicable
                _ => return None,
            },
        };
        if new_pre == Some(new_post) {
            return None;
        }
        let condition = self.convert(&pp.condition).ok()?;
        let compatible = condition
            .iter()
            .all(|c| conditions.iter().all(|f| f.var != c.var || f.value == c.value));
        compatible.then_some(PrePost {
            var: new_var,
            pre: new_pre,
            post: new_post,
            condition,
        })
    }

    fn apply_to_axiom(&self, axiom: &SasAxiom) -> Option<SasAxiom> {
        let condition = self.convert(&axiom.condition).ok()?;
        match self.translate(axiom.effect) {
            (Some(var), NewValue::Value(value)) => Some(SasAxiom::new(condition, Fact::new(var, value))),
            // the effect is constant, the axiom does nothing
            _ => None,
        }
    }
}

/// Removes the values that cannot be reached from the initial value of their variable and the
/// variables that are left with a single value.
///
/// Fails with a [`Trivial`] outcome if the goal became impossible or empty.
pub fn filter_unreachable_propositions(task: &mut SasTask) -> Result<(), Trivial> {
    let _span = tracing::info_span!("simplify").entered();
    let dtgs = build_dtgs(task);
    let renaming = Renaming::new(&dtgs);

    let goal = renaming
        .convert(&task.goal)
        .map_err(|_| Trivial::Unsolvable("Simplified to trivially false goal"))?;
    if goal.is_empty() {
        return Err(Trivial::Solvable("Simplified to empty goal"));
    }

    let operators = task
        .operators
        .iter()
        .filter_map(|op| {
            let renamed = renaming.apply_to_operator(op);
            if renamed.is_none() {
                debug!("Removed operator: {}", op.name);
            }
            renamed
        })
        .collect_vec();
    info!("{} operators removed", task.operators.len() - operators.len());
    let axioms = task
        .axioms
        .iter()
        .filter_map(|axiom| renaming.apply_to_axiom(axiom))
        .collect_vec();
    info!("{} axioms removed", task.axioms.len() - axioms.len());

    task.variables = renaming.apply_to_variables(&task.variables);
    task.mutexes = renaming.apply_to_mutexes(&task.mutexes);
    task.init = renaming.apply_to_init(&task.init);
    task.goal = goal.into_iter().sorted().collect();
    task.operators = operators;
    task.axioms = axioms;
    info!("{} propositions removed", renaming.num_removed_values);
    Ok(())
}
