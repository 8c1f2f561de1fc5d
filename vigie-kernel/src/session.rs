//! Interactive-session probe
//!
//! Answers "is someone currently on this host?" by running one composite
//! diagnostic command and sifting its free-form output: interactive logon
//! sessions, established connections on the remote-desktop port, and the
//! remote-desktop-tool trace (last connect vs last disconnect marker).
//!
//! Parsing is deliberately tolerant: an idle host legitimately produces
//! no output at all, so every miss degrades to Idle/None, never an error.

use crate::geo::CityResolver;
use crate::models::{BusyStatus, HostRecord, SessionStatus, TransportKind};
use crate::transport::ConnectorSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Port RDP standard, côté hôte surveillé.
const RDP_PORT: &str = "3389";

pub struct SessionChecker {
    connectors: Arc<ConnectorSet>,
    geo: Arc<CityResolver>,
    command_timeout: Duration,
}

impl SessionChecker {
    pub fn new(connectors: Arc<ConnectorSet>, geo: Arc<CityResolver>, command_timeout: Duration) -> Self {
        Self { connectors, geo, command_timeout }
    }

    pub async fn check_session(&self, host: &HostRecord) -> SessionStatus {
        let command = session_probe_command(host.transport);
        let connector = self.connectors.for_kind(host.transport);

        let output = match connector.execute(host, &command, self.command_timeout).await {
            Ok(output) => output,
            Err(e) => {
                warn!(host = %host.host_address, "session probe failed: {e}");
                return SessionStatus::idle();
            }
        };

        let mut status = parse_session_output(&output);
        if let Some(ip) = status.client_ip.clone() {
            status.client_city = self.geo.resolve_city(&ip).await;
        }
        debug!(host = %host.host_address, busy = ?status.busy, "session probe done");
        status
    }
}

fn session_probe_command(kind: TransportKind) -> String {
    match kind {
        TransportKind::Winrm => concat!(
            "qwinsta 2>nul & netstat -ano 2>nul & ",
            "powershell -NoProfile -Command \"Get-Content -Tail 200 ",
            "'C:\\ProgramData\\AnyDesk\\ad_svc.trace'\" 2>nul"
        )
        .to_string(),
        TransportKind::Ssh => concat!(
            "who 2>/dev/null; ",
            "ss -tn state established '( sport = :3389 )' 2>/dev/null; ",
            "tail -n 200 ~/.anydesk/anydesk.trace 2>/dev/null"
        )
        .to_string(),
    }
}

/// Assemble le statut à partir des trois frontières de parsing.
pub fn parse_session_output(output: &str) -> SessionStatus {
    let rdp_marker = parse_active_session(output);
    let rdp_peer = parse_rdp_peer(output);
    let tool_ip = parse_desktop_tool_events(output);

    let rdp = rdp_marker || rdp_peer.is_some();
    let tool = tool_ip.is_some();

    let session_kind = match (rdp, tool) {
        (true, true) => Some("rdp+remote-desktop-tool".to_string()),
        (true, false) => Some("rdp".to_string()),
        (false, true) => Some("remote-desktop-tool".to_string()),
        (false, false) => None,
    };

    SessionStatus {
        busy: if rdp || tool { BusyStatus::Busy } else { BusyStatus::Idle },
        session_kind,
        client_ip: rdp_peer.or(tool_ip),
        client_city: None,
    }
}

/// (a) marqueur de session interactive active dans la liste des sessions
/// (sortie type `qwinsta` : la ligne rdp-tcp#N porte l'état "Active"/"Actif")
fn parse_active_session(output: &str) -> bool {
    output.lines().any(|line| {
        let lower = line.to_lowercase();
        lower.contains("rdp-tcp#") && (lower.contains("active") || lower.contains("actif"))
    })
}

/// (b) connexion établie sur le port remote-desktop avec un pair non-loopback
/// (sortie type `netstat -ano` / `ss -tn`)
fn parse_rdp_peer(output: &str) -> Option<String> {
    for line in output.lines() {
        let upper = line.to_uppercase();
        if !upper.contains("ESTAB") {
            continue;
        }
        let mut local_seen = false;
        let mut peer = None;
        for token in line.split_whitespace() {
            let Some((ip, port)) = split_ip_port(token) else { continue };
            if port == RDP_PORT {
                local_seen = true;
            } else {
                peer = Some(ip);
            }
        }
        if local_seen {
            if let Some(ip) = peer {
                if !ip.starts_with("127.") && ip != "::1" {
                    return Some(ip);
                }
            }
        }
    }
    None
}

fn split_ip_port(token: &str) -> Option<(String, &str)> {
    let (ip, port) = token.rsplit_once(':')?;
    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let ip = ip.trim_matches(|c| c == '[' || c == ']');
    if ip.is_empty() {
        return None;
    }
    Some((ip.to_string(), port))
}

/// (c) trace de l'outil remote-desktop : dernier marqueur "Logged in from"
/// comparé au dernier marqueur de déconnexion : connecté ssi le login est
/// plus récent (ordre des lignes = ordre chronologique du tail).
fn parse_desktop_tool_events(output: &str) -> Option<String> {
    let mut last_login: Option<(usize, String)> = None;
    let mut last_disconnect: Option<usize> = None;

    for (idx, line) in output.lines().enumerate() {
        if let Some(at) = line.find("Logged in from ") {
            let rest = &line[at + "Logged in from ".len()..];
            let endpoint = rest.split_whitespace().next().unwrap_or_default();
            let ip = endpoint.rsplit_once(':').map(|(ip, _)| ip).unwrap_or(endpoint);
            if !ip.is_empty() {
                last_login = Some((idx, ip.to_string()));
            }
        }
        if line.contains("Session closed") || line.contains("Logged out") {
            last_disconnect = Some(idx);
        }
    }

    match (last_login, last_disconnect) {
        (Some((login_idx, ip)), Some(disc_idx)) if login_idx > disc_idx => Some(ip),
        (Some((_, ip)), None) => Some(ip),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QWINSTA_ACTIVE: &str = "\
 SESSIONNAME       USERNAME                 ID  STATE   TYPE        DEVICE
 services                                    0  Disc
 console                                     1  Conn
 rdp-tcp#12        operator                  2  Active
 rdp-tcp                                 65536  Listen
";

    const NETSTAT_RDP: &str = "\
  TCP    10.0.0.5:3389          203.0.113.50:51234     ESTABLISHED     1234
  TCP    10.0.0.5:445           10.0.0.9:52000         ESTABLISHED     4
";

    const ANYDESK_CONNECTED: &str = "\
info 2024-05-04 11:58:00.001  ad_svc  - Session closed by remote.
info 2024-05-04 12:00:01.123  ad_svc  - Logged in from 203.0.113.77:53210 on relay 4f2a.
";

    const ANYDESK_DISCONNECTED: &str = "\
info 2024-05-04 12:00:01.123  ad_svc  - Logged in from 203.0.113.77:53210 on relay 4f2a.
info 2024-05-04 12:31:44.900  ad_svc  - Session closed by remote.
";

    #[test]
    fn test_active_session_marker() {
        assert!(parse_active_session(QWINSTA_ACTIVE));
        assert!(!parse_active_session("console  1  Conn\nrdp-tcp  65536  Listen\n"));
        assert!(!parse_active_session(""));
    }

    #[test]
    fn test_rdp_peer_extraction() {
        assert_eq!(parse_rdp_peer(NETSTAT_RDP), Some("203.0.113.50".into()));
        // pair loopback = pas une session distante
        let local = "  TCP  127.0.0.1:3389  127.0.0.1:52000  ESTABLISHED  9\n";
        assert_eq!(parse_rdp_peer(local), None);
        // pas de ligne ESTABLISHED sur :3389
        assert_eq!(parse_rdp_peer("  TCP  10.0.0.5:445  10.0.0.9:52000  ESTABLISHED  4\n"), None);
    }

    #[test]
    fn test_desktop_tool_recency() {
        assert_eq!(parse_desktop_tool_events(ANYDESK_CONNECTED), Some("203.0.113.77".into()));
        assert_eq!(parse_desktop_tool_events(ANYDESK_DISCONNECTED), None);
        assert_eq!(parse_desktop_tool_events(""), None);
    }

    #[test]
    fn test_composite_output_both_kinds() {
        let output = format!("{QWINSTA_ACTIVE}\n{NETSTAT_RDP}\n{ANYDESK_CONNECTED}");
        let status = parse_session_output(&output);
        assert_eq!(status.busy, BusyStatus::Busy);
        assert_eq!(status.session_kind, Some("rdp+remote-desktop-tool".into()));
        // le pair RDP prime sur l'IP de l'outil
        assert_eq!(status.client_ip, Some("203.0.113.50".into()));
    }

    #[test]
    fn test_empty_output_is_idle() {
        let status = parse_session_output("");
        assert_eq!(status.busy, BusyStatus::Idle);
        assert_eq!(status.session_kind, None);
        assert_eq!(status.client_ip, None);
        assert_eq!(status.client_city, None);
    }
}
