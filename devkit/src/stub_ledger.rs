/*!
Stub ledger en mémoire : inventaire scriptable, statuts capturés pour
assertions, injection d'échecs d'écriture, et détecteur d'écritures
concurrentes : deux writers simultanés sur les lignes du ledger signalent
une violation de la règle "les sweeps ne se chevauchent pas".
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use vigie_kernel::ledger::{Ledger, LedgerError};
use vigie_kernel::models::{CheckResult, HostRecord};

#[derive(Default)]
pub struct StubLedger {
    hosts: Mutex<Vec<HostRecord>>,
    statuses: Mutex<HashMap<String, CheckResult>>,
    failing_writes: Mutex<HashSet<String>>,
    fail_inventory: AtomicBool,
    write_in_progress: AtomicBool,
    overlap_detected: AtomicBool,
}

impl StubLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, host: HostRecord) {
        self.hosts.lock().push(host);
    }

    /// Les écritures pour cet hôte échoueront (http 500 simulé).
    pub fn fail_writes_for(&self, host_address: &str) {
        self.failing_writes.lock().insert(host_address.to_string());
    }

    pub fn set_fail_inventory(&self, fail: bool) {
        self.fail_inventory.store(fail, Ordering::SeqCst);
    }

    /// Dernier statut écrit pour un hôte.
    pub fn written(&self, host_address: &str) -> Option<CheckResult> {
        self.statuses.lock().get(host_address).cloned()
    }

    pub fn written_count(&self) -> usize {
        self.statuses.lock().len()
    }

    /// Vrai si deux écritures se sont chevauchées depuis la création.
    pub fn overlap_detected(&self) -> bool {
        self.overlap_detected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for StubLedger {
    async fn load_inventory(&self) -> Result<Vec<HostRecord>, LedgerError> {
        if self.fail_inventory.load(Ordering::SeqCst) {
            return Err(LedgerError::Status(503));
        }
        Ok(self.hosts.lock().clone())
    }

    async fn write_status(&self, host_address: &str, result: &CheckResult) -> Result<(), LedgerError> {
        if self.write_in_progress.swap(true, Ordering::SeqCst) {
            self.overlap_detected.store(true, Ordering::SeqCst);
        }
        // élargit la fenêtre de course pour que deux writers se voient
        tokio::time::sleep(Duration::from_millis(2)).await;

        let outcome = if self.failing_writes.lock().contains(host_address) {
            Err(LedgerError::Status(500))
        } else {
            self.statuses
                .lock()
                .insert(host_address.to_string(), result.clone());
            Ok(())
        };

        self.write_in_progress.store(false, Ordering::SeqCst);
        outcome
    }

    async fn read_status(&self, host_address: &str) -> Result<Option<CheckResult>, LedgerError> {
        Ok(self.statuses.lock().get(host_address).cloned())
    }
}
