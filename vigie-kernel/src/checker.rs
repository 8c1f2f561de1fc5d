//! Per-host status check
//!
//! Composes one transport call plus geo enrichment into a `CheckResult`.
//! Transport failures never escape this module: they fold into the result.
//!
//! The one rule that matters: a host reporting an egress IP that belongs to
//! the proxy provider's own entry/exit addresses is NOT proxied: its tunnel
//! is down and traffic leaves through the provider edge directly. That case
//! is `Disconnected` even though the probe command succeeded.

use crate::geo::CityResolver;
use crate::models::{truncate_detail, CheckResult, HostRecord, ProxyStatus, TransportKind};
use crate::transport::ConnectorSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub struct ServerChecker {
    connectors: Arc<ConnectorSet>,
    geo: Arc<CityResolver>,
    proxy_exit_ips: Vec<String>,
    egress_probe_url: String,
    command_timeout: Duration,
}

impl ServerChecker {
    pub fn new(
        connectors: Arc<ConnectorSet>,
        geo: Arc<CityResolver>,
        proxy_exit_ips: Vec<String>,
        egress_probe_url: String,
        command_timeout: Duration,
    ) -> Self {
        Self { connectors, geo, proxy_exit_ips, egress_probe_url, command_timeout }
    }

    pub async fn check(&self, host: &HostRecord) -> CheckResult {
        let command = egress_probe_command(host.transport, &self.egress_probe_url, self.command_timeout);
        let connector = self.connectors.for_kind(host.transport);

        let output = match connector.execute(host, &command, self.command_timeout).await {
            Ok(output) => output,
            Err(e) => {
                warn!(host = %host.host_address, "check failed: {e}");
                return CheckResult::unreachable(host, e.kind(), e.to_string());
            }
        };

        let Some(egress_ip) = parse_egress_ip(&output) else {
            debug!(host = %host.host_address, "no parseable egress ip");
            return CheckResult {
                timestamp: OffsetDateTime::now_utc(),
                host_address: host.host_address.clone(),
                reachable: true,
                transport: host.transport,
                egress_ip: None,
                city: None,
                proxy_status: ProxyStatus::Unknown,
                city_drift: false,
                error: None,
                detail: truncate_detail(&output),
            };
        };

        if self.proxy_exit_ips.iter().any(|exit| exit == &egress_ip) {
            // Tunnel inactif : l'hôte sort par l'adresse du provider lui-même
            return CheckResult {
                timestamp: OffsetDateTime::now_utc(),
                host_address: host.host_address.clone(),
                reachable: true,
                transport: host.transport,
                egress_ip: Some(egress_ip),
                city: None,
                proxy_status: ProxyStatus::Disconnected,
                city_drift: false,
                error: None,
                detail: truncate_detail(&output),
            };
        }

        let city = self.geo.resolve_city(&egress_ip).await;
        let city_drift = match (&city, &host.expected_city) {
            (Some(observed), Some(expected)) => observed != expected,
            _ => false,
        };

        CheckResult {
            timestamp: OffsetDateTime::now_utc(),
            host_address: host.host_address.clone(),
            reachable: true,
            transport: host.transport,
            egress_ip: Some(egress_ip),
            city,
            proxy_status: ProxyStatus::Connected,
            city_drift,
            error: None,
            detail: truncate_detail(&output),
        }
    }
}

/// Commande "quelle est mon IP", adaptée au shell de la cible. La requête
/// part DE l'hôte, donc traverse son proxy local : la réponse est l'IP de
/// sortie effective vue de l'extérieur.
fn egress_probe_command(kind: TransportKind, probe_url: &str, timeout: Duration) -> String {
    let secs = timeout.as_secs().max(1);
    match kind {
        TransportKind::Ssh => format!("curl -s --max-time {secs} {probe_url}"),
        TransportKind::Winrm => format!(
            "powershell -NoProfile -Command \"(Invoke-WebRequest -UseBasicParsing -TimeoutSec {secs} '{probe_url}').Content\""
        ),
    }
}

/// Frontière de parsing : premier token IPv4 plausible de la sortie brute.
pub fn parse_egress_ip(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.'))
        .find(|token| token.parse::<Ipv4Addr>().is_ok())
        .map(|token| token.to_string())
}
