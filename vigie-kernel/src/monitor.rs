//! Fleet monitor
//!
//! Owns the sweep state machine: load inventory, check every host in
//! parallel (bounded pool), aggregate, persist, alert. Sweeps never
//! overlap: the gate rejects a second request instead of racing two
//! writers on the same ledger rows. One failing host never aborts or
//! delays the others: checks are isolated units of work.

use crate::alerts::{AlertEvaluator, AlertKind, FleetAlert};
use crate::checker::ServerChecker;
use crate::geo::CityResolver;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{CheckResult, CycleSummary, ErrorKind, HostRecord, SessionStatus};
use crate::session::SessionChecker;
use crate::state::SweepSnapshot;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("a sweep is already running")]
    AlreadyRunning,
    #[error("inventory unavailable: {0}")]
    Inventory(#[from] LedgerError),
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("check superseded by a newer request")]
    Superseded,
    #[error("check task failed")]
    Internal,
}

pub struct FleetMonitor {
    checker: Arc<ServerChecker>,
    session: Arc<SessionChecker>,
    ledger: Arc<dyn Ledger>,
    evaluator: Arc<AlertEvaluator>,
    geo: Arc<CityResolver>,
    pool_size: usize,
    sweep_timeout: Duration,
    sweep_running: AtomicBool,
    snapshot: SweepSnapshot,
    // checks mono-hôte en vol, pour supersede des demandes dupliquées
    inflight: Mutex<HashMap<String, tokio::task::AbortHandle>>,
}

/// Libère la gate de sweep même si le sweep panique ou sort en erreur.
struct SweepGate<'a>(&'a AtomicBool);

impl Drop for SweepGate<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FleetMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        checker: Arc<ServerChecker>,
        session: Arc<SessionChecker>,
        ledger: Arc<dyn Ledger>,
        evaluator: Arc<AlertEvaluator>,
        geo: Arc<CityResolver>,
        pool_size: usize,
        sweep_timeout: Duration,
    ) -> Self {
        Self {
            checker,
            session,
            ledger,
            evaluator,
            geo,
            pool_size: pool_size.max(1),
            sweep_timeout,
            sweep_running: AtomicBool::new(false),
            snapshot: SweepSnapshot::new(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Dernier sweep complet (commande `status`).
    pub fn last_summary(&self) -> Option<CycleSummary> {
        self.snapshot.get()
    }

    pub fn sweep_in_progress(&self) -> bool {
        self.sweep_running.load(Ordering::SeqCst)
    }

    /// Un sweep complet : Loading-Inventory → Checking → Aggregating →
    /// Persisting → Alerting. Rejette si un sweep est déjà en cours.
    pub async fn run_sweep(&self) -> Result<CycleSummary, SweepError> {
        if self
            .sweep_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SweepError::AlreadyRunning);
        }
        let _gate = SweepGate(&self.sweep_running);

        let started_at = OffsetDateTime::now_utc();
        self.geo.begin_sweep();

        let inventory = match self.ledger.load_inventory().await {
            Ok(inventory) => inventory,
            Err(e) => {
                // Échec de configuration/inventaire : bruyant, pas silencieux
                error!("sweep aborted, inventory unreachable: {e}");
                self.evaluator
                    .raise(FleetAlert::new(
                        AlertKind::SweepFailed,
                        "inventory",
                        format!("🚨 sweep impossible : inventaire injoignable ({e})"),
                    ))
                    .await;
                return Err(SweepError::Inventory(e));
            }
        };
        info!(hosts = inventory.len(), "sweep started");

        let results = self.check_all(inventory).await;

        let summary = CycleSummary {
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            hosts_checked: results.len() as u32,
            error_count: results.iter().filter(|r| r.error.is_some()).count() as u32,
            results,
        };

        self.persist(&summary.results).await;
        self.evaluator.process(&summary.results).await;
        self.snapshot.store(summary.clone());

        info!(
            hosts = summary.hosts_checked,
            errors = summary.error_count,
            "sweep finished"
        );
        Ok(summary)
    }

    /// Phase Checking : un task par hôte, pool borné, deadline globale.
    /// Un hôte encore en vol à la deadline est replié en résultat Timeout.
    async fn check_all(&self, inventory: Vec<HostRecord>) -> Vec<CheckResult> {
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut join_set = JoinSet::new();
        let mut pending: HashMap<String, HostRecord> = HashMap::new();

        for host in inventory {
            pending.insert(host.host_address.clone(), host.clone());
            let checker = self.checker.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                // un task qui n'a pas de slot attend ici, pas dans le transport
                let _permit = semaphore.acquire_owned().await.ok();
                checker.check(&host).await
            });
        }

        let deadline = tokio::time::Instant::now() + self.sweep_timeout;
        let mut results = Vec::with_capacity(pending.len());

        loop {
            let next = tokio::time::timeout_at(deadline, join_set.join_next()).await;
            match next {
                Ok(Some(Ok(result))) => {
                    pending.remove(&result.host_address);
                    results.push(result);
                }
                Ok(Some(Err(e))) => {
                    // un panic de task ne doit pas emporter le sweep
                    error!("check task crashed: {e}");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(remaining = pending.len(), "sweep deadline exceeded, abandoning stragglers");
                    join_set.abort_all();
                    for host in pending.values() {
                        results.push(CheckResult::unreachable(
                            host,
                            ErrorKind::Timeout,
                            "abandoned at sweep deadline".into(),
                        ));
                    }
                    break;
                }
            }
        }
        results
    }

    /// Phase Persisting : écrit chaque résultat dans la ligne de son hôte.
    /// Un échec d'écriture est loggé et sauté, jamais fatal au sweep.
    async fn persist(&self, results: &[CheckResult]) {
        for result in results {
            if let Err(e) = self.ledger.write_status(&result.host_address, result).await {
                warn!(host = %result.host_address, "ledger write failed, skipping: {e}");
            }
        }
    }

    /// Check mono-hôte à la demande. Une nouvelle demande pour le même hôte
    /// supersède la précédente (abort), elle n'est pas mise en file.
    pub async fn check_host(&self, host_address: &str) -> Result<CheckResult, SweepError> {
        let inventory = self.ledger.load_inventory().await?;
        let host = inventory
            .into_iter()
            .find(|h| h.host_address == host_address)
            .ok_or_else(|| SweepError::UnknownHost(host_address.to_string()))?;

        let checker = self.checker.clone();
        let ledger = self.ledger.clone();
        let evaluator = self.evaluator.clone();
        let handle = tokio::spawn(async move {
            let result = checker.check(&host).await;
            if let Err(e) = ledger.write_status(&result.host_address, &result).await {
                warn!(host = %result.host_address, "ledger write failed: {e}");
            }
            evaluator.process(std::slice::from_ref(&result)).await;
            result
        });

        // supersede : la demande précédente pour cet hôte est annulée
        if let Some(previous) = self
            .inflight
            .lock()
            .insert(host_address.to_string(), handle.abort_handle())
        {
            previous.abort();
        }

        let my_id = handle.id();
        let outcome = handle.await;
        {
            // ne retire l'entrée que si elle est toujours la nôtre (une
            // demande plus récente a pu nous remplacer dans la map)
            let mut inflight = self.inflight.lock();
            if inflight.get(host_address).map(|h| h.id()) == Some(my_id) {
                inflight.remove(host_address);
            }
        }
        match outcome {
            Ok(result) => Ok(result),
            Err(e) if e.is_cancelled() => Err(SweepError::Superseded),
            Err(e) => {
                error!(host = host_address, "check task failed: {e}");
                Err(SweepError::Internal)
            }
        }
    }

    /// Probe de session à la demande (commande `session <hôte>`).
    pub async fn check_host_session(&self, host_address: &str) -> Result<SessionStatus, SweepError> {
        let inventory = self.ledger.load_inventory().await?;
        let host = inventory
            .into_iter()
            .find(|h| h.host_address == host_address)
            .ok_or_else(|| SweepError::UnknownHost(host_address.to_string()))?;
        Ok(self.session.check_session(&host).await)
    }

    /// Boucle de sweep périodique. Un tick qui tombe pendant un sweep en
    /// cours est sauté (la gate sérialise), pas mis en file.
    pub fn spawn_scheduler(monitor: Arc<Self>, interval_secs: u64) {
        info!(interval = interval_secs, "starting sweep scheduler");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match monitor.run_sweep().await {
                    Ok(_) => {}
                    Err(SweepError::AlreadyRunning) => {
                        warn!("scheduled sweep skipped: previous sweep still running");
                    }
                    Err(e) => error!("scheduled sweep failed: {e}"),
                }
            }
        });
    }
}
