// Pipeline Graph
// Steps and hops with memoized adjacency, cycle and ordering queries

use super::hop::{Hop, HopKind};
use super::step::StepMeta;
use super::GraphError;
use crate::config::ExecutionConfig;
use crate::row::{name_key, same_name, RowSchema};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cache key: step plus optional target or lookup step, both normalized
pub(crate) type PairKey = (String, Option<String>);

/// Memoized query results, cleared wholesale on every structural mutation
#[derive(Debug, Default)]
pub(crate) struct GraphCaches {
    pub(crate) fields: Mutex<HashMap<PairKey, RowSchema>>,
    loops: Mutex<HashMap<PairKey, bool>>,
    ancestors: Mutex<HashMap<String, Arc<HashSet<String>>>>,
    natural_order: Mutex<Option<Vec<String>>>,
    previous: Mutex<HashMap<(String, bool), Vec<String>>>,
}

impl Clone for GraphCaches {
    fn clone(&self) -> Self {
        Self::default()
    }
}

/// Lock a cache map; a poisoned cache is still usable since it only holds
/// recomputable results
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The pipeline graph: named steps connected by hops
#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    pub name: String,
    pub description: Option<String>,
    /// Execution settings stored with the pipeline
    pub settings: ExecutionConfig,
    steps: Vec<StepMeta>,
    hops: Vec<Hop>,
    pub(crate) caches: GraphCaches,
}

impl PipelineGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_settings(mut self, settings: ExecutionConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn steps(&self) -> &[StepMeta] {
        &self.steps
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    /// Find a step by name, ignoring case
    pub fn find_step(&self, name: &str) -> Option<&StepMeta> {
        self.steps.iter().find(|s| same_name(&s.name, name))
    }

    pub(crate) fn require_step(&self, name: &str) -> Result<&StepMeta, GraphError> {
        self.find_step(name).ok_or_else(|| GraphError::not_found(name))
    }

    fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| same_name(&s.name, name))
    }

    /// Drop every memoized result
    pub fn clear_caches(&mut self) {
        self.caches = GraphCaches::default();
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add a step; names are unique ignoring case
    pub fn add_step(&mut self, step: StepMeta) -> Result<(), GraphError> {
        if self.find_step(&step.name).is_some() {
            return Err(GraphError::duplicate_step(format!(
                "step '{}' already exists",
                step.name
            )));
        }
        self.steps.push(step);
        self.clear_caches();
        Ok(())
    }

    /// Add a step or replace the step with the same name, keeping its hops
    pub fn add_or_replace_step(&mut self, step: StepMeta) -> Option<StepMeta> {
        let replaced = match self.step_index(&step.name) {
            Some(idx) => Some(std::mem::replace(&mut self.steps[idx], step)),
            None => {
                self.steps.push(step);
                None
            }
        };
        self.clear_caches();
        replaced
    }

    /// Remove a step, the hops touching it and error-handling links targeting it
    pub fn remove_step(&mut self, name: &str) -> Result<StepMeta, GraphError> {
        let idx = self
            .step_index(name)
            .ok_or_else(|| GraphError::not_found(name))?;
        let removed = self.steps.remove(idx);

        self.hops.retain(|hop| !hop.touches(&removed.name));
        for step in &mut self.steps {
            let targets_removed = step
                .error_handling
                .as_ref()
                .map(|eh| same_name(&eh.target_step, &removed.name))
                .unwrap_or(false);
            if targets_removed {
                step.error_handling = None;
            }
        }

        self.clear_caches();
        Ok(removed)
    }

    /// Add a hop; both endpoints must exist
    pub fn add_hop(&mut self, hop: Hop) -> Result<(), GraphError> {
        for endpoint in [&hop.from, &hop.to] {
            if self.find_step(endpoint).is_none() {
                return Err(GraphError::unknown_step(format!(
                    "hop {} references unknown step '{}'",
                    hop, endpoint
                )));
            }
        }
        if same_name(&hop.from, &hop.to) {
            return Err(GraphError::invalid_structure(format!(
                "hop {} connects a step to itself",
                hop
            )));
        }
        if self
            .hops
            .iter()
            .any(|h| h.kind == hop.kind && h.connects(&hop.from, &hop.to))
        {
            return Err(GraphError::invalid_structure(format!(
                "hop {} already exists",
                hop
            )));
        }

        self.hops.push(hop);
        self.clear_caches();
        Ok(())
    }

    /// Remove the first hop between two steps
    pub fn remove_hop(&mut self, from: &str, to: &str) -> Option<Hop> {
        let idx = self.hops.iter().position(|h| h.connects(from, to))?;
        let removed = self.hops.remove(idx);
        self.clear_caches();
        Some(removed)
    }

    /// Enable or disable every hop between two steps
    pub fn set_hop_enabled(&mut self, from: &str, to: &str, enabled: bool) -> Result<(), GraphError> {
        let mut found = false;
        for hop in self.hops.iter_mut().filter(|h| h.connects(from, to)) {
            hop.enabled = enabled;
            found = true;
        }
        if !found {
            return Err(GraphError::unknown_step(format!(
                "no hop from '{}' to '{}'",
                from, to
            )));
        }
        self.clear_caches();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Adjacency queries
    // ------------------------------------------------------------------

    pub fn find_hop(&self, from: &str, to: &str) -> Option<&Hop> {
        self.hops.iter().find(|h| h.connects(from, to))
    }

    /// Hops leaving a step, including disabled ones
    pub fn hops_from(&self, step: &str) -> Vec<&Hop> {
        self.hops
            .iter()
            .filter(|h| same_name(&h.from, step))
            .collect()
    }

    /// Hops entering a step, including disabled ones
    pub fn hops_to(&self, step: &str) -> Vec<&Hop> {
        self.hops.iter().filter(|h| same_name(&h.to, step)).collect()
    }

    /// Steps feeding `step` through enabled hops
    ///
    /// Main and error hops are always included; info hops only on request.
    pub fn predecessors(&self, step: &str, include_info: bool) -> Vec<String> {
        let key = (name_key(step), include_info);
        if let Some(cached) = lock(&self.caches.previous).get(&key) {
            return cached.clone();
        }

        let mut result: Vec<String> = Vec::new();
        for hop in self.hops.iter().filter(|h| h.enabled && same_name(&h.to, step)) {
            if hop.kind == HopKind::Info && !include_info {
                continue;
            }
            if !result.iter().any(|name| same_name(name, &hop.from)) {
                result.push(hop.from.clone());
            }
        }

        lock(&self.caches.previous).insert(key, result.clone());
        result
    }

    /// Steps supplying lookup rows to `step`
    pub fn info_steps(&self, step: &str) -> Vec<String> {
        self.hops
            .iter()
            .filter(|h| h.enabled && h.kind == HopKind::Info && same_name(&h.to, step))
            .map(|h| h.from.clone())
            .collect()
    }

    /// Steps fed by `step` through enabled hops of any kind
    pub fn successors(&self, step: &str) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        for hop in self.hops.iter().filter(|h| h.enabled && same_name(&h.from, step)) {
            if !result.iter().any(|name| same_name(name, &hop.to)) {
                result.push(hop.to.clone());
            }
        }
        result
    }

    /// Every step reachable downstream of `step`, as normalized names
    pub fn downstream(&self, step: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = self.successors(step);
        while let Some(next) = stack.pop() {
            if seen.insert(name_key(&next)) {
                stack.extend(self.successors(&next));
            }
        }
        seen
    }

    /// Steps without main or error predecessors
    pub fn input_steps(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| self.predecessors(&s.name, false).is_empty())
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn is_step_used_in_hops(&self, step: &str) -> bool {
        self.hops.iter().any(|h| h.touches(step))
    }

    /// `base`, or `base` with " 2", " 3", ... appended until no step uses the name
    pub fn unique_step_name(&self, base: &str) -> String {
        if self.find_step(base).is_none() {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{} {}", base, n))
            .find(|candidate| self.find_step(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    // ------------------------------------------------------------------
    // Cycles and ordering
    // ------------------------------------------------------------------

    /// Transitive predecessors of a step over enabled hops of every kind
    ///
    /// Contains the step itself only when it sits on a cycle.
    pub fn ancestors(&self, step: &str) -> Arc<HashSet<String>> {
        let key = name_key(step);
        if let Some(cached) = lock(&self.caches.ancestors).get(&key) {
            return Arc::clone(cached);
        }

        let mut seen = HashSet::new();
        let mut stack = self.predecessors(step, true);
        while let Some(prev) = stack.pop() {
            if seen.insert(name_key(&prev)) {
                stack.extend(self.predecessors(&prev, true));
            }
        }

        let result = Arc::new(seen);
        lock(&self.caches.ancestors).insert(key, Arc::clone(&result));
        result
    }

    /// Whether `step` can reach itself following predecessors
    pub fn has_cycle(&self, step: &str) -> bool {
        self.has_cycle_via(step, None)
    }

    /// Whether `lookup` (or `step` itself when absent) is a transitive
    /// predecessor of `step`
    ///
    /// Checking `has_cycle_via(from, Some(to))` before adding a hop `from -> to`
    /// tells whether the hop would close a cycle.
    pub fn has_cycle_via(&self, step: &str, lookup: Option<&str>) -> bool {
        let key = (name_key(step), lookup.map(name_key));
        if let Some(cached) = lock(&self.caches.loops).get(&key) {
            return *cached;
        }

        let target = key.1.clone().unwrap_or_else(|| key.0.clone());
        let result = self.ancestors(step).contains(&target);

        lock(&self.caches.loops).insert(key, result);
        result
    }

    /// Some cycle in the graph as a path of step names, if any
    pub fn cycle_path(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for step in &self.steps {
            if !visited.contains(&name_key(&step.name)) {
                if let Some(cycle) = self.dfs_cycle(&step.name, &mut visited, &mut rec_stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        let key = name_key(name);
        visited.insert(key.clone());
        rec_stack.insert(key.clone());

        for next in self.successors(name) {
            let next_key = name_key(&next);
            if !visited.contains(&next_key) {
                if let Some(mut cycle) = self.dfs_cycle(&next, visited, rec_stack) {
                    cycle.insert(0, name.to_string());
                    return Some(cycle);
                }
            } else if rec_stack.contains(&next_key) {
                return Some(vec![name.to_string(), next]);
            }
        }

        rec_stack.remove(&key);
        None
    }

    /// Steps ordered so that no step precedes one of its predecessors
    ///
    /// Among the steps whose predecessors are all placed, the name that sorts
    /// first (ignoring case) goes next. Steps on a cycle are placed by name
    /// once nothing else is ready.
    pub fn natural_order(&self) -> Vec<String> {
        if let Some(cached) = lock(&self.caches.natural_order).as_ref() {
            return cached.clone();
        }

        let mut remaining: Vec<&StepMeta> = self.steps.iter().collect();
        remaining.sort_by(|a, b| {
            name_key(&a.name)
                .cmp(&name_key(&b.name))
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut placed: HashSet<String> = HashSet::new();
        let mut order = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let ready = remaining.iter().position(|candidate| {
                let own = name_key(&candidate.name);
                self.ancestors(&candidate.name)
                    .iter()
                    .all(|a| *a == own || placed.contains(a))
            });
            let step = remaining.remove(ready.unwrap_or(0));
            placed.insert(name_key(&step.name));
            order.push(step.name.clone());
        }

        *lock(&self.caches.natural_order) = Some(order.clone());
        order
    }

    /// Hops ordered by the natural order of their source, then of their target
    pub fn natural_hop_order(&self) -> Vec<Hop> {
        let position: HashMap<String, usize> = self
            .natural_order()
            .iter()
            .enumerate()
            .map(|(idx, name)| (name_key(name), idx))
            .collect();
        let rank = |name: &str| position.get(&name_key(name)).copied().unwrap_or(usize::MAX);

        let mut hops = self.hops.clone();
        hops.sort_by_key(|h| (rank(&h.from), rank(&h.to)));
        hops
    }
}
