//! Proxy-provider package monitor
//!
//! Polls the provider's account API for quota and expiry, independently of
//! the shell-based host checks; a provider outage must never delay a
//! sweep. Failures degrade to `None`; the watch task keeps its own latch so
//! a package stuck under threshold warns once, not every poll.

use crate::alerts::{AlertEvaluator, AlertKind, FleetAlert};
use crate::config::TrafficConf;
use crate::ledger::Ledger;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PackageInfo {
    pub status: String,
    pub created_at: Option<String>,
    pub expired_at: Option<String>,
    pub days_left: i64,
    pub traffic_limit_gb: f64,
    pub traffic_used_gb: f64,
}

pub struct TrafficMonitor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Latch des packages déjà notifiés (clé "pkg:raison")
    warned: Mutex<HashSet<String>>,
}

impl TrafficMonitor {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub async fn get_package_info(&self, package_key: &str) -> Option<PackageInfo> {
        let url = format!("{}/packages/{}", self.base_url, package_key);
        let response = match self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .timeout(Duration::from_secs(15))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(package = package_key, "provider API unreachable: {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(package = package_key, status = %response.status(), "provider API error");
            return None;
        }
        match response.json::<PackageInfo>().await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(package = package_key, "provider payload invalid: {e}");
                None
            }
        }
    }

    /// Tâche périodique indépendante : parcourt les packages référencés par
    /// l'inventaire et lève des alertes quota/expiration (une seule fois par
    /// condition, relâchée quand le package repasse au-dessus du seuil).
    pub fn spawn_traffic_watch(
        self: Arc<Self>,
        conf: TrafficConf,
        ledger: Arc<dyn Ledger>,
        evaluator: Arc<AlertEvaluator>,
    ) {
        info!(interval = conf.poll_interval_secs, "starting traffic watch");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(conf.poll_interval_secs));
            loop {
                interval.tick().await;

                let hosts = match ledger.load_inventory().await {
                    Ok(hosts) => hosts,
                    Err(e) => {
                        warn!("traffic watch: inventory unavailable: {e}");
                        continue;
                    }
                };
                let packages: HashSet<String> =
                    hosts.into_iter().filter_map(|h| h.proxy_package_key).collect();

                for package_key in packages {
                    let Some(package) = self.get_package_info(&package_key).await else {
                        continue;
                    };
                    for (latch_key, alert) in package_alerts(
                        &package_key,
                        &package,
                        conf.warn_days_left,
                        conf.warn_usage_percent,
                    ) {
                        let first_time = self.warned.lock().insert(latch_key);
                        if first_time {
                            evaluator.raise(alert).await;
                        }
                    }
                    self.release_cleared_latches(&package_key, &package, &conf);
                }
            }
        });
    }

    fn release_cleared_latches(&self, package_key: &str, package: &PackageInfo, conf: &TrafficConf) {
        let mut warned = self.warned.lock();
        if package.days_left > conf.warn_days_left {
            warned.remove(&format!("{package_key}:expiring"));
        }
        if usage_percent(package) < conf.warn_usage_percent {
            warned.remove(&format!("{package_key}:quota"));
        }
    }
}

fn usage_percent(package: &PackageInfo) -> f64 {
    if package.traffic_limit_gb <= 0.0 {
        return 0.0;
    }
    package.traffic_used_gb / package.traffic_limit_gb * 100.0
}

/// Conditions d'alerte d'un package, avec la clé de latch associée.
fn package_alerts(
    package_key: &str,
    package: &PackageInfo,
    warn_days_left: i64,
    warn_usage_percent: f64,
) -> Vec<(String, FleetAlert)> {
    let mut alerts = Vec::new();
    if package.days_left <= warn_days_left {
        alerts.push((
            format!("{package_key}:expiring"),
            FleetAlert::new(
                AlertKind::PackageExpiring,
                package_key,
                format!("⚠️ package {package_key} expire dans {} jour(s)", package.days_left),
            ),
        ));
    }
    let percent = usage_percent(package);
    if percent >= warn_usage_percent {
        alerts.push((
            format!("{package_key}:quota"),
            FleetAlert::new(
                AlertKind::PackageQuota,
                package_key,
                format!(
                    "⚠️ package {package_key} : {:.1}/{:.1} Go consommés ({percent:.0}%)",
                    package.traffic_used_gb, package.traffic_limit_gb
                ),
            ),
        ));
    }
    alerts
}
