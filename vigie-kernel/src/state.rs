use crate::models::CycleSummary;
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Dernier sweep complet, consulté par la commande `status`.
/// Écrit uniquement par le Fleet Monitor, en fin de sweep.
#[derive(Clone)]
pub struct SweepSnapshot {
    inner: Shared<Option<CycleSummary>>,
}

impl SweepSnapshot {
    pub fn new() -> Self {
        Self { inner: new_state(None) }
    }

    pub fn store(&self, summary: CycleSummary) {
        *self.inner.lock() = Some(summary);
    }

    pub fn get(&self) -> Option<CycleSummary> {
        self.inner.lock().clone()
    }
}

impl Default for SweepSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
