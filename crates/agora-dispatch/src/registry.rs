//! Worker registry
//!
//! Single owner of worker records. All mutation goes through the methods
//! below, each applied under the registry write lock so status transitions
//! (idle ↔ busy) behave as compare-and-swap. Workers are kept in id order,
//! which makes every snapshot deterministic.

use std::collections::BTreeMap;

use agora_common::{RegistryError, Worker, WorkerId, WorkerRegistration, LOWEST_RANK_TIER};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Point-in-time copy of every worker record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrySnapshot(BTreeMap<WorkerId, Worker>);

impl RegistrySnapshot {
    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct WorkerRegistry {
    workers: RwLock<BTreeMap<WorkerId, Worker>>,
    /// Score shown on records before any performance data exists
    initial_score: f64,
}

impl WorkerRegistry {
    pub fn new(initial_score: f64) -> Self {
        Self {
            workers: RwLock::new(BTreeMap::new()),
            initial_score,
        }
    }

    /// Admit a worker at the entry tier
    pub fn register(&self, registration: WorkerRegistration) -> Result<WorkerId, RegistryError> {
        registration.validate()?;

        let mut workers = self.workers.write();
        if workers.contains_key(&registration.id) {
            return Err(RegistryError::DuplicateWorker(registration.id));
        }

        let worker = Worker::from_registration(registration, LOWEST_RANK_TIER, self.initial_score);
        let id = worker.id.clone();
        info!(worker = %id, skills = worker.skills.len(), capacity = worker.max_concurrent_tasks, "Worker registered");
        workers.insert(id.clone(), worker);
        Ok(id)
    }

    pub fn get(&self, id: &WorkerId) -> Option<Worker> {
        self.workers.read().get(id).cloned()
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.workers.read().contains_key(id)
    }

    /// Remove a worker record
    pub fn remove(&self, id: &WorkerId) -> Result<Worker, RegistryError> {
        let removed = self
            .workers
            .write()
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        info!(worker = %id, "Worker removed from registry");
        Ok(removed)
    }

    /// Workers with a free slot, in id order
    pub fn idle_workers(&self) -> Vec<Worker> {
        self.workers
            .read()
            .values()
            .filter(|w| w.is_idle())
            .cloned()
            .collect()
    }

    /// Every worker, in id order
    pub fn all(&self) -> Vec<Worker> {
        self.workers.read().values().cloned().collect()
    }

    /// Take a task slot on `id` (idle → busy when the last slot goes)
    pub fn claim(&self, id: &WorkerId) -> Result<(), RegistryError> {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        worker.claim_slot()?;
        debug!(worker = %id, load = worker.active_tasks, status = %worker.status, "Slot claimed");
        Ok(())
    }

    /// Return a task slot on `id` (busy → idle)
    pub fn release(&self, id: &WorkerId) -> Result<(), RegistryError> {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        worker.release_slot();
        debug!(worker = %id, load = worker.active_tasks, status = %worker.status, "Slot released");
        Ok(())
    }

    pub fn set_offline(&self, id: &WorkerId, offline: bool) -> Result<Worker, RegistryError> {
        self.update(id, |w| w.set_offline(offline))
    }

    pub fn set_rank_tier(&self, id: &WorkerId, tier: u8) -> Result<Worker, RegistryError> {
        self.update(id, |w| {
            w.rank_tier = tier;
            w.touch();
        })
    }

    pub fn set_performance_score(&self, id: &WorkerId, score: f64) -> Result<Worker, RegistryError> {
        self.update(id, |w| {
            w.performance_score = score;
            w.touch();
        })
    }

    /// Mirror ledger balances onto the record
    pub fn set_balances(
        &self,
        id: &WorkerId,
        utility: Decimal,
        governance: Decimal,
    ) -> Result<Worker, RegistryError> {
        self.update(id, |w| {
            w.utility_balance = utility;
            w.governance_balance = governance;
            w.touch();
        })
    }

    /// Members currently in `tier`
    pub fn tier_population(&self, tier: u8) -> usize {
        self.workers
            .read()
            .values()
            .filter(|w| w.rank_tier == tier)
            .count()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(self.workers.read().clone())
    }

    /// Replace every record with `snapshot` (ranking rollback)
    pub fn restore(&self, snapshot: RegistrySnapshot) {
        let count = snapshot.len();
        *self.workers.write() = snapshot.0;
        info!(workers = count, "Registry restored from snapshot");
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    fn update<F>(&self, id: &WorkerId, f: F) -> Result<Worker, RegistryError>
    where
        F: FnOnce(&mut Worker),
    {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        f(worker);
        Ok(worker.clone())
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(crate::DEFAULT_NEUTRAL_SCORE)
    }
}
