/**
 * ALERTES - Évaluation des transitions d'état + publication MQTT
 *
 * RÔLE : Comparer chaque sweep au précédent, hôte par hôte, et ne notifier
 * que les TRANSITIONS (edge-triggered) : un hôte qui reste cassé d'un sweep
 * à l'autre ne re-notifie pas.
 *
 * ARCHITECTURE : AlertState explicite possédé par l'évaluateur, remis à zéro
 * au redémarrage du process (la dédup d'alertes est un confort UX, pas une
 * garantie). Publication via MQTT ; le front-end conversationnel est abonné
 * au topic et relaie vers le canal de chat.
 */

use crate::config::MqttConf;
use crate::models::{CheckResult, ProxyStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info, warn};

pub const ALERT_TOPIC: &str = "vigie/alerts@v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HostDown,
    ProxyDisconnected,
    CityDrift,
    Recovered,
    SweepFailed,
    PackageExpiring,
    PackageQuota,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetAlert {
    pub kind: AlertKind,
    /// Hôte concerné, ou clé de package pour les alertes provider
    pub subject: String,
    pub message: String,
    pub timestamp: String, // RFC3339
}

impl FleetAlert {
    pub fn new(kind: AlertKind, subject: &str, message: String) -> Self {
        Self {
            kind,
            subject: subject.to_string(),
            message,
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, alert: &FleetAlert);
}

/// Sink MQTT : publie chaque alerte sur le topic versionné.
pub struct MqttAlertSink {
    client: AsyncClient,
}

impl MqttAlertSink {
    pub fn new(conf: &MqttConf) -> Self {
        let mut opts = MqttOptions::new("vigie-kernel-alerts", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);

        // Boucle d'événements MQTT en tâche de fond
        tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    error!("MQTT alert bus error: {e:?}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        });

        Self { client }
    }
}

#[async_trait]
impl AlertSink for MqttAlertSink {
    async fn publish(&self, alert: &FleetAlert) {
        let Ok(payload) = serde_json::to_string(alert) else { return };
        if let Err(e) = self.client.publish(ALERT_TOPIC, QoS::AtLeastOnce, false, payload).await {
            error!(subject = %alert.subject, "failed to publish alert: {e:?}");
        } else {
            info!(subject = %alert.subject, kind = ?alert.kind, "alert published");
        }
    }
}

/// Sink de repli quand aucun broker MQTT n'est configuré : log uniquement.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn publish(&self, alert: &FleetAlert) {
        warn!(subject = %alert.subject, kind = ?alert.kind, "{}", alert.message);
    }
}

/// Condition dérivée d'un résultat, du pire au meilleur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Unreachable,
    Disconnected,
    Drift,
    Ok,
}

fn condition_of(result: &CheckResult) -> Condition {
    if !result.reachable {
        Condition::Unreachable
    } else if result.proxy_status == ProxyStatus::Disconnected {
        Condition::Disconnected
    } else if result.city_drift {
        Condition::Drift
    } else {
        Condition::Ok
    }
}

/// Évaluateur edge-triggered. L'état vit le temps du process.
pub struct AlertEvaluator {
    sink: Arc<dyn AlertSink>,
    state: Mutex<HashMap<String, Condition>>,
}

impl AlertEvaluator {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink, state: Mutex::new(HashMap::new()) }
    }

    /// Compare les résultats du sweep courant à l'état mémorisé et publie
    /// une alerte par hôte dont la condition a changé.
    pub async fn process(&self, results: &[CheckResult]) {
        for result in results {
            let current = condition_of(result);
            let previous = {
                let mut state = self.state.lock();
                state.insert(result.host_address.clone(), current).unwrap_or(Condition::Ok)
            };
            if current == previous {
                continue;
            }
            if let Some(alert) = transition_alert(result, previous, current) {
                self.sink.publish(&alert).await;
            }
        }
    }

    /// Alerte hors-sweep (échec inventaire, quota provider...).
    pub async fn raise(&self, alert: FleetAlert) {
        self.sink.publish(&alert).await;
    }
}

fn transition_alert(result: &CheckResult, previous: Condition, current: Condition) -> Option<FleetAlert> {
    let host = &result.host_address;
    match current {
        Condition::Unreachable => {
            let reason = result.error.map(|e| e.as_label()).unwrap_or_else(|| "unknown".into());
            Some(FleetAlert::new(
                AlertKind::HostDown,
                host,
                format!("⚠️ {host} injoignable ({reason})"),
            ))
        }
        Condition::Disconnected => Some(FleetAlert::new(
            AlertKind::ProxyDisconnected,
            host,
            format!(
                "⚠️ {host} : tunnel proxy inactif (IP observée {})",
                result.egress_ip.as_deref().unwrap_or("?")
            ),
        )),
        Condition::Drift => Some(FleetAlert::new(
            AlertKind::CityDrift,
            host,
            format!(
                "⚠️ {host} : ville de sortie {} (inattendue)",
                result.city.as_deref().unwrap_or("?")
            ),
        )),
        // retour à la normale depuis un état dégradé
        Condition::Ok if previous != Condition::Ok => Some(FleetAlert::new(
            AlertKind::Recovered,
            host,
            format!("✅ {host} : retour à la normale"),
        )),
        Condition::Ok => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, TransportKind};
    use std::sync::Arc;

    struct CollectingSink(Mutex<Vec<FleetAlert>>);

    #[async_trait]
    impl AlertSink for CollectingSink {
        async fn publish(&self, alert: &FleetAlert) {
            self.0.lock().push(alert.clone());
        }
    }

    fn down(host: &str) -> CheckResult {
        CheckResult {
            timestamp: OffsetDateTime::now_utc(),
            host_address: host.into(),
            reachable: false,
            transport: TransportKind::Ssh,
            egress_ip: None,
            city: None,
            proxy_status: ProxyStatus::Unknown,
            city_drift: false,
            error: Some(ErrorKind::Timeout),
            detail: String::new(),
        }
    }

    fn ok(host: &str) -> CheckResult {
        CheckResult {
            reachable: true,
            proxy_status: ProxyStatus::Connected,
            error: None,
            ..down(host)
        }
    }

    #[tokio::test]
    async fn test_repeated_bad_state_alerts_once() {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let evaluator = AlertEvaluator::new(sink.clone());

        evaluator.process(&[down("10.0.0.5")]).await;
        evaluator.process(&[down("10.0.0.5")]).await;

        let alerts = sink.0.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HostDown);
    }

    #[tokio::test]
    async fn test_recovery_then_relapse_realerts() {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let evaluator = AlertEvaluator::new(sink.clone());

        evaluator.process(&[down("10.0.0.5")]).await;
        evaluator.process(&[ok("10.0.0.5")]).await;
        evaluator.process(&[down("10.0.0.5")]).await;

        let kinds: Vec<AlertKind> = sink.0.lock().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::HostDown, AlertKind::Recovered, AlertKind::HostDown]);
    }

    #[tokio::test]
    async fn test_healthy_host_never_alerts() {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let evaluator = AlertEvaluator::new(sink.clone());

        evaluator.process(&[ok("10.0.0.5")]).await;
        evaluator.process(&[ok("10.0.0.5")]).await;
        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_drift_transition_alerts() {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let evaluator = AlertEvaluator::new(sink.clone());

        let mut drifted = ok("10.0.0.5");
        drifted.city = Some("Berlin".into());
        drifted.city_drift = true;

        evaluator.process(&[ok("10.0.0.5")]).await;
        evaluator.process(&[drifted.clone()]).await;
        evaluator.process(&[drifted]).await;

        let alerts = sink.0.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::CityDrift);
    }
}
