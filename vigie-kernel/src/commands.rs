/**
 * COMMAND HANDLER - Canal de commande conversationnel
 *
 * RÔLE : Traduire le petit jeu de commandes utilisateur (check, status,
 * session, traffic) en opérations du Fleet Monitor et rendre des résumés
 * lisibles (tableau par hôte, détail mono-hôte) pour le canal de chat.
 *
 * Ne parle JAMAIS directement à un transport : uniquement le Fleet Monitor
 * et le dernier snapshot. En cas d'échec interne, l'utilisateur reçoit un
 * message générique, jamais une stacktrace.
 */

use crate::models::{BusyStatus, CheckResult, CycleSummary, ProxyStatus, SessionStatus};
use crate::monitor::{FleetMonitor, SweepError};
use crate::traffic::TrafficMonitor;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tracing::error;

const UNAVAILABLE: &str = "⚠️ Système indisponible, réessayez plus tard.";
const HELP: &str = "Commandes : `check all`, `check <hôte>`, `status`, `session <hôte>`, `traffic <package>`";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CheckAll,
    CheckHost(String),
    Status,
    Session(String),
    Traffic(String),
}

/// Parse tolérant du texte utilisateur vers le jeu fermé de commandes.
pub fn parse_command(input: &str) -> Option<Command> {
    let mut words = input.split_whitespace();
    let verb = words.next()?.to_lowercase();
    let arg = words.next().map(str::to_string);
    if words.next().is_some() {
        return None; // trop d'arguments
    }
    match (verb.as_str(), arg) {
        ("status", None) => Some(Command::Status),
        ("check", Some(arg)) if arg.eq_ignore_ascii_case("all") => Some(Command::CheckAll),
        ("check", Some(host)) => Some(Command::CheckHost(host)),
        ("session", Some(host)) => Some(Command::Session(host)),
        ("traffic", Some(package)) => Some(Command::Traffic(package)),
        _ => None,
    }
}

pub struct CommandHandler {
    monitor: Arc<FleetMonitor>,
    traffic: Option<Arc<TrafficMonitor>>,
}

impl CommandHandler {
    pub fn new(monitor: Arc<FleetMonitor>, traffic: Option<Arc<TrafficMonitor>>) -> Self {
        Self { monitor, traffic }
    }

    /// Point d'entrée du canal de commande : texte in, texte out.
    pub async fn handle_text(&self, input: &str) -> String {
        let Some(command) = parse_command(input) else {
            return HELP.to_string();
        };
        self.handle(command).await
    }

    pub async fn handle(&self, command: Command) -> String {
        match command {
            Command::Status => match self.monitor.last_summary() {
                Some(summary) => render_summary(&summary),
                None if self.monitor.sweep_in_progress() => {
                    "⏳ Premier sweep en cours, status bientôt disponible.".to_string()
                }
                None => "Aucun sweep terminé pour l'instant.".to_string(),
            },
            Command::CheckAll => match self.monitor.run_sweep().await {
                Ok(summary) => render_summary(&summary),
                Err(SweepError::AlreadyRunning) => "⏳ Un check est déjà en cours.".to_string(),
                Err(e) => {
                    error!("check all failed: {e}");
                    UNAVAILABLE.to_string()
                }
            },
            Command::CheckHost(host) => match self.monitor.check_host(&host).await {
                Ok(result) => render_result(&result),
                Err(SweepError::UnknownHost(host)) => format!("Hôte inconnu : {host}"),
                Err(SweepError::Superseded) => {
                    "Demande remplacée par une plus récente pour cet hôte.".to_string()
                }
                Err(e) => {
                    error!(host, "check failed: {e}");
                    UNAVAILABLE.to_string()
                }
            },
            Command::Session(host) => match self.monitor.check_host_session(&host).await {
                Ok(status) => render_session(&host, &status),
                Err(SweepError::UnknownHost(host)) => format!("Hôte inconnu : {host}"),
                Err(e) => {
                    error!(host, "session probe failed: {e}");
                    UNAVAILABLE.to_string()
                }
            },
            Command::Traffic(package) => {
                let Some(traffic) = &self.traffic else {
                    return "Suivi de trafic non configuré.".to_string();
                };
                match traffic.get_package_info(&package).await {
                    Some(info) => format!(
                        "📦 {package} : {} | expire: {} ({} j) | trafic: {:.1}/{:.1} Go",
                        info.status,
                        info.expired_at.as_deref().unwrap_or("?"),
                        info.days_left,
                        info.traffic_used_gb,
                        info.traffic_limit_gb,
                    ),
                    None => UNAVAILABLE.to_string(),
                }
            }
        }
    }
}

/// Tableau par hôte d'un sweep complet.
pub fn render_summary(summary: &CycleSummary) -> String {
    let mut out = format!(
        "Sweep du {} : {} hôte(s), {} erreur(s)\n",
        summary.started_at.format(&Rfc3339).unwrap_or_default(),
        summary.hosts_checked,
        summary.error_count,
    );
    out.push_str(&format!(
        "{:<18} {:<14} {:<16} {}\n",
        "HÔTE", "ÉTAT", "IP SORTIE", "VILLE"
    ));
    for result in &summary.results {
        out.push_str(&format!(
            "{:<18} {:<14} {:<16} {}\n",
            result.host_address,
            state_label(result),
            result.egress_ip.as_deref().unwrap_or("-"),
            city_label(result),
        ));
    }
    out
}

/// Détail mono-hôte.
pub fn render_result(result: &CheckResult) -> String {
    let mut out = format!(
        "{} : {} [{}]\n",
        result.host_address,
        state_label(result),
        result.transport,
    );
    out.push_str(&format!("IP sortie : {}\n", result.egress_ip.as_deref().unwrap_or("-")));
    out.push_str(&format!("Ville : {}\n", city_label(result)));
    if !result.detail.is_empty() {
        out.push_str(&format!("Détail : {}\n", result.detail));
    }
    out
}

pub fn render_session(host: &str, status: &SessionStatus) -> String {
    match status.busy {
        BusyStatus::Idle => format!("{host} : libre"),
        BusyStatus::Busy => format!(
            "{host} : occupé ({}), client {}{}",
            status.session_kind.as_deref().unwrap_or("?"),
            status.client_ip.as_deref().unwrap_or("?"),
            status
                .client_city
                .as_deref()
                .map(|c| format!(" ({c})"))
                .unwrap_or_default(),
        ),
    }
}

fn state_label(result: &CheckResult) -> String {
    if let Some(error) = result.error {
        return format!("❌ {}", error.as_label());
    }
    match result.proxy_status {
        ProxyStatus::Connected => "✅ connecté".to_string(),
        ProxyStatus::Disconnected => "🔌 proxy coupé".to_string(),
        ProxyStatus::Unknown => "❔ inconnu".to_string(),
    }
}

fn city_label(result: &CheckResult) -> String {
    match &result.city {
        Some(city) if result.city_drift => format!("{city} (drift!)"),
        Some(city) => city.clone(),
        None => "-".to_string(),
    }
}
