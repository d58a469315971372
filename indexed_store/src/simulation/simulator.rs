//! Main simulator harness for deterministic simulation testing.

use crate::{Handle, IndexDefinition, IndexedStore, MapKind, StoreConfig, StoreError};

use super::invariants::{InvariantChecker, InvariantViolation, Model, Record, RecordedKeys};
use super::op_gen::{Operation, OperationGenerator, OperationMix};

/// Configuration for the simulator.
#[derive(Debug, Clone, Copy)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Map kind used for the primary set and for indexes without an override.
    pub map_kind: MapKind,
    /// Operation weights.
    pub mix: OperationMix,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            map_kind: MapKind::Hash,
            mix: OperationMix::default(),
        }
    }

    /// Set the map kind.
    pub const fn with_map_kind(mut self, kind: MapKind) -> Self {
        self.map_kind = kind;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    /// Number of operations applied.
    pub steps: usize,
    /// Number of operations the store accepted.
    pub accepted: usize,
    /// Number of operations the store rejected.
    pub rejected: usize,
    /// Invariant violations detected.
    pub invariant_violations: Vec<InvariantViolation>,
}

impl SimulationResult {
    /// Check if the simulation passed (no invariant violations).
    pub fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }
}

/// Drives a store with generated operations and checks it after each one.
pub struct Simulator {
    config: SimulatorConfig,
    generator: OperationGenerator,
    store: IndexedStore<Record>,
    model: Model,
    removed_order: Vec<Handle>,
    checker: InvariantChecker,
    accepted: usize,
    rejected: usize,
}

impl Simulator {
    /// Create a new simulator with the given configuration.
    pub fn new(config: SimulatorConfig) -> Self {
        let store = IndexedStore::builder()
            .config(
                StoreConfig::default()
                    .with_default_map(config.map_kind)
                    .with_primary_map(config.map_kind),
            )
            .index(IndexDefinition::new("id", |r: &Record| r.id).unique())
            .index(IndexDefinition::partial("group", |r: &Record| r.group))
            .index(
                IndexDefinition::partial("tag", |r: &Record| r.tag)
                    .sparse()
                    .map_kind(MapKind::BTree),
            )
            .build()
            .expect("simulation store");

        Self {
            config,
            generator: OperationGenerator::new(config.seed, config.mix),
            store,
            model: Model::default(),
            removed_order: Vec::new(),
            checker: InvariantChecker::new(),
            accepted: 0,
            rejected: 0,
        }
    }

    /// Run `steps` operations.
    pub fn run(mut self, steps: usize) -> SimulationResult {
        for step in 0..steps {
            let operation = self
                .generator
                .next_operation(self.model.live.len(), &self.removed_order);
            self.apply(step, operation);
            self.checker.check(step, &self.store, &self.model);
        }

        SimulationResult {
            seed: self.config.seed,
            steps,
            accepted: self.accepted,
            rejected: self.rejected,
            invariant_violations: self.checker.into_violations(),
        }
    }

    fn live_handle(&self, position: usize) -> Handle {
        self.store
            .iter()
            .nth(position)
            .map(|(handle, _)| handle)
            .expect("position within live objects")
    }

    fn apply(&mut self, step: usize, operation: Operation) {
        match operation {
            Operation::Insert(record) => {
                let expected = RecordedKeys::of(&record)
                    .filter(|keys| self.model.id_available(None, keys.id));
                match (self.store.insert(record), expected) {
                    (Ok(handle), Some(keys)) => {
                        self.model.live.insert(handle, keys);
                        self.accepted += 1;
                    }
                    (Err(_), None) => self.rejected += 1,
                    (result, expected) => self.checker.report(
                        step,
                        format!("insert returned {:?}, expected keys {expected:?}", result.map_err(|e| e.error)),
                    ),
                }
            }
            Operation::Remove(position) => {
                let handle = self.live_handle(position);
                match self.store.remove(handle) {
                    Ok(_) => {
                        self.model.live.remove(&handle);
                        self.model.removed.insert(handle);
                        self.removed_order.push(handle);
                        self.accepted += 1;
                    }
                    Err(e) => self.checker.report(step, format!("remove of live {handle} failed: {e}")),
                }
            }
            Operation::Update { position, record } => {
                let handle = self.live_handle(position);
                let expected = RecordedKeys::of(&record)
                    .filter(|keys| self.model.id_available(Some(handle), keys.id));
                if let Some(object) = self.store.get_mut(handle) {
                    *object = record;
                }
                match (self.store.update(handle), expected) {
                    (Ok(()), Some(keys)) => {
                        self.model.live.insert(handle, keys);
                        self.accepted += 1;
                    }
                    (Err(_), None) => self.rejected += 1,
                    (result, expected) => self.checker.report(
                        step,
                        format!("update of {handle} returned {result:?}, expected keys {expected:?}"),
                    ),
                }
            }
            Operation::MutateOnly { position, record } => {
                let handle = self.live_handle(position);
                if let Some(object) = self.store.get_mut(handle) {
                    *object = record;
                }
                self.accepted += 1;
            }
            Operation::RemoveStale(index) => {
                let handle = self.removed_order[index];
                let result = self.store.remove(handle).map(|_| ());
                self.expect_not_found(step, handle, result);
            }
            Operation::UpdateStale(index) => {
                let handle = self.removed_order[index];
                let result = self.store.update(handle);
                self.expect_not_found(step, handle, result);
            }
        }
    }

    fn expect_not_found(&mut self, step: usize, handle: Handle, result: Result<(), StoreError>) {
        if result == Err(StoreError::NotFound(handle)) {
            self.rejected += 1;
        } else {
            self.checker.report(
                step,
                format!("stale handle {handle} gave {result:?} instead of NotFound"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_tracing;

    fn assert_passes(result: &SimulationResult) {
        assert!(
            result.passed(),
            "seed {} failed: {:#?}",
            result.seed,
            result.invariant_violations.iter().take(5).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_simulation_hash_maps() {
        init_tracing();
        for seed in 0..8 {
            let result = Simulator::new(SimulatorConfig::new(seed)).run(400);
            assert_passes(&result);
            assert_eq!(result.steps, 400);
            assert!(result.accepted > 0);
        }
    }

    #[test]
    fn test_simulation_btree_maps() {
        for seed in 100..108 {
            let config = SimulatorConfig::new(seed).with_map_kind(MapKind::BTree);
            assert_passes(&Simulator::new(config).run(400));
        }
    }

    #[test]
    fn test_simulation_exercises_rejections() {
        let mut config = SimulatorConfig::new(42);
        config.mix.missing_group_rate = 0.3;
        let result = Simulator::new(config).run(500);
        assert_passes(&result);
        assert!(result.rejected > 0);
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let first = Simulator::new(SimulatorConfig::new(9)).run(300);
        let second = Simulator::new(SimulatorConfig::new(9)).run(300);
        assert_eq!(first.accepted, second.accepted);
        assert_eq!(first.rejected, second.rejected);
    }
}
