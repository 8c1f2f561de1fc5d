use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Tronque le texte brut de diagnostic conservé dans les résultats.
pub const MAX_DETAIL_LEN: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ssh,
    Winrm,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Ssh => write!(f, "ssh"),
            TransportKind::Winrm => write!(f, "winrm"),
        }
    }
}

/// Une cible gérée, telle que lue depuis le ledger externe.
/// Les colonnes credentials sont en lecture seule ; seules les colonnes
/// de statut sont réécrites par le kernel.
#[derive(Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub host_address: String,       // IP ou hostname
    pub label: String,              // nom logique (boutique, groupe...)
    pub transport: TransportKind,
    pub username: String,
    #[serde(skip_serializing)] // Jamais re-sérialisé vers l'extérieur
    pub secret: String,
    pub expected_city: Option<String>,
    pub proxy_package_key: Option<String>,
}

// Debug manuel : le secret ne doit jamais atterrir dans les logs.
impl fmt::Debug for HostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRecord")
            .field("host_address", &self.host_address)
            .field("label", &self.label)
            .field("transport", &self.transport)
            .field("username", &self.username)
            .field("secret", &"***")
            .field("expected_city", &self.expected_city)
            .field("proxy_package_key", &self.proxy_package_key)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    Connected,
    Disconnected,
    Unknown,
}

/// Catégorie d'échec transport, persistée dans la colonne "error" du ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    AuthFailed,
    ConnectionRefused,
    Protocol(u16),
    Transport,
}

impl ErrorKind {
    /// Encodage colonne ledger (ex: "protocol_500").
    pub fn as_label(&self) -> String {
        match self {
            ErrorKind::Timeout => "timeout".into(),
            ErrorKind::AuthFailed => "auth_failed".into(),
            ErrorKind::ConnectionRefused => "connection_refused".into(),
            ErrorKind::Protocol(code) => format!("protocol_{code}"),
            ErrorKind::Transport => "transport".into(),
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "timeout" => Some(ErrorKind::Timeout),
            "auth_failed" => Some(ErrorKind::AuthFailed),
            "connection_refused" => Some(ErrorKind::ConnectionRefused),
            "transport" => Some(ErrorKind::Transport),
            other => other
                .strip_prefix("protocol_")
                .and_then(|c| c.parse::<u16>().ok())
                .map(ErrorKind::Protocol),
        }
    }
}

/// Résultat d'un check d'hôte à un instant donné. Jamais muté après création.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub host_address: String,
    pub reachable: bool,
    pub transport: TransportKind,
    pub egress_ip: Option<String>,
    pub city: Option<String>,
    pub proxy_status: ProxyStatus,
    pub city_drift: bool,           // true ssi proxy_status == Connected et ville ≠ attendue
    pub error: Option<ErrorKind>,   // Some(..) implique reachable == false
    pub detail: String,             // sortie brute tronquée (diagnostic)
}

impl CheckResult {
    /// Résultat "hôte injoignable" : tous les champs d'observation à null.
    pub fn unreachable(host: &HostRecord, error: ErrorKind, detail: String) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            host_address: host.host_address.clone(),
            reachable: false,
            transport: host.transport,
            egress_ip: None,
            city: None,
            proxy_status: ProxyStatus::Unknown,
            city_drift: false,
            error: Some(error),
            detail: truncate_detail(&detail),
        }
    }
}

pub fn truncate_detail(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() <= MAX_DETAIL_LEN {
        return trimmed.to_string();
    }
    let mut cut = MAX_DETAIL_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &trimmed[..cut])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyStatus {
    Idle,
    Busy,
}

/// Résultat d'un probe de session interactive. Transitoire, non persisté.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub busy: BusyStatus,
    pub session_kind: Option<String>,   // "rdp", "remote-desktop-tool", "rdp+remote-desktop-tool"
    pub client_ip: Option<String>,
    pub client_city: Option<String>,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            busy: BusyStatus::Idle,
            session_kind: None,
            client_ip: None,
            client_city: None,
        }
    }
}

/// Agrégat d'un sweep complet de la flotte.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub hosts_checked: u32,
    pub error_count: u32,
    pub results: Vec<CheckResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::Timeout.as_label(), "timeout");
        assert_eq!(ErrorKind::Protocol(500).as_label(), "protocol_500");
        assert_eq!(ErrorKind::from_label("protocol_500"), Some(ErrorKind::Protocol(500)));
        assert_eq!(ErrorKind::from_label("auth_failed"), Some(ErrorKind::AuthFailed));
        assert_eq!(ErrorKind::from_label("n/a"), None);
    }

    #[test]
    fn test_truncate_detail() {
        let short = truncate_detail("  hello  ");
        assert_eq!(short, "hello");
        let long = truncate_detail(&"x".repeat(1000));
        assert!(long.len() <= MAX_DETAIL_LEN + '…'.len_utf8());
    }

    #[test]
    fn test_secret_redacted_in_debug() {
        let host = HostRecord {
            host_address: "10.0.0.5".into(),
            label: "shop-1".into(),
            transport: TransportKind::Ssh,
            username: "admin".into(),
            secret: "hunter2".into(),
            expected_city: Some("Moscow".into()),
            proxy_package_key: None,
        };
        let dbg = format!("{:?}", host);
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("***"));
    }
}
