/**
 * LEDGER - Interface vers l'inventaire tabulaire externe
 *
 * RÔLE :
 * Le ledger est la source de vérité de la flotte : une ligne par hôte,
 * colonnes credentials + attentes (ville proxy, package provider) +
 * colonnes de statut. Ce module lit toutes les colonnes mais n'écrit QUE
 * les colonnes de statut ; il est le seul écrivain de celles-ci.
 *
 * FONCTIONNEMENT :
 * - Trait Ledger = contrat commun (inventaire / écriture statut / relecture)
 * - HttpLedger = implémentation API lignes (GET /rows, PATCH /rows/{host})
 * - Frontière d'encodage status_columns/parse_status_columns testée seule
 *
 * UTILITÉ :
 * 🎯 Le Fleet Monitor persiste chaque CheckResult ligne par ligne
 * 🎯 Une ligne invalide est ignorée avec un warn, jamais fatale au sweep
 * 🎯 Les stubs de test (devkit) implémentent le même trait
 */

use crate::models::{CheckResult, ErrorKind, HostRecord, ProxyStatus, TransportKind};
use async_trait::async_trait;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ledger answered http {0}")]
    Status(u16),
    #[error("ledger payload invalid: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Charge l'inventaire complet (toutes colonnes).
    async fn load_inventory(&self) -> Result<Vec<HostRecord>, LedgerError>;
    /// Écrit les colonnes de statut de la ligne d'un hôte (last-write-wins).
    async fn write_status(&self, host_address: &str, result: &CheckResult) -> Result<(), LedgerError>;
    /// Relit les colonnes de statut d'un hôte (détail à la demande).
    async fn read_status(&self, host_address: &str) -> Result<Option<CheckResult>, LedgerError>;
}

pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLedger {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn rows_url(&self) -> String {
        format!("{}/rows", self.base_url)
    }

    fn row_url(&self, host_address: &str) -> String {
        format!("{}/rows/{}", self.base_url, host_address)
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn load_inventory(&self) -> Result<Vec<HostRecord>, LedgerError> {
        let response = self
            .client
            .get(self.rows_url())
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Status(status.as_u16()));
        }
        let rows: Vec<Value> = response.json().await?;

        let mut hosts = Vec::with_capacity(rows.len());
        for row in &rows {
            match parse_host_row(row) {
                Some(host) => hosts.push(host),
                None => warn!("ligne d'inventaire invalide ignorée: {}", row),
            }
        }
        Ok(hosts)
    }

    async fn write_status(&self, host_address: &str, result: &CheckResult) -> Result<(), LedgerError> {
        let response = self
            .client
            .patch(self.row_url(host_address))
            .header("x-api-key", &self.api_key)
            .json(&status_columns(result))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn read_status(&self, host_address: &str) -> Result<Option<CheckResult>, LedgerError> {
        let response = self
            .client
            .get(self.row_url(host_address))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LedgerError::Status(status.as_u16()));
        }
        let row: Value = response.json().await?;
        Ok(parse_status_columns(host_address, &row))
    }
}

/// Lecture tolérante d'une ligne d'inventaire. Colonnes requises :
/// host_address, transport, username, secret. Le reste est optionnel.
pub fn parse_host_row(row: &Value) -> Option<HostRecord> {
    let get_str = |key: &str| row.get(key).and_then(|v| v.as_str());
    let transport = match get_str("transport")? {
        "ssh" => TransportKind::Ssh,
        "winrm" => TransportKind::Winrm,
        _ => return None,
    };
    Some(HostRecord {
        host_address: get_str("host_address")?.to_string(),
        label: get_str("label").unwrap_or_default().to_string(),
        transport,
        username: get_str("username")?.to_string(),
        secret: get_str("secret")?.to_string(),
        expected_city: get_str("expected_city").filter(|s| !s.is_empty()).map(String::from),
        proxy_package_key: get_str("proxy_package_key").filter(|s| !s.is_empty()).map(String::from),
    })
}

/// Colonnes de statut écrites dans la ligne de l'hôte.
pub fn status_columns(result: &CheckResult) -> Value {
    serde_json::json!({
        "last_check": result.timestamp.format(&Rfc3339).unwrap_or_default(),
        "reachable": result.reachable,
        "transport": result.transport.to_string(),
        "egress_ip": result.egress_ip,
        "city": result.city,
        "proxy_status": proxy_status_label(result.proxy_status),
        "city_drift": result.city_drift,
        "error": result.error.map(|e| e.as_label()),
        "detail": result.detail,
    })
}

/// Relecture des colonnes de statut ; tolère les coercitions côté ledger
/// (booléens renvoyés en chaînes "true"/"false").
pub fn parse_status_columns(host_address: &str, row: &Value) -> Option<CheckResult> {
    let as_bool = |key: &str| -> Option<bool> {
        match row.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    };
    let as_opt_str = |key: &str| -> Option<String> {
        row.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(String::from)
    };

    let timestamp = row
        .get("last_check")
        .and_then(|v| v.as_str())
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())?;
    let transport = match row.get("transport").and_then(|v| v.as_str())? {
        "ssh" => TransportKind::Ssh,
        "winrm" => TransportKind::Winrm,
        _ => return None,
    };
    let proxy_status = match row.get("proxy_status").and_then(|v| v.as_str())? {
        "connected" => ProxyStatus::Connected,
        "disconnected" => ProxyStatus::Disconnected,
        _ => ProxyStatus::Unknown,
    };

    Some(CheckResult {
        timestamp,
        host_address: host_address.to_string(),
        reachable: as_bool("reachable")?,
        transport,
        egress_ip: as_opt_str("egress_ip"),
        city: as_opt_str("city"),
        proxy_status,
        city_drift: as_bool("city_drift").unwrap_or(false),
        error: as_opt_str("error").as_deref().and_then(ErrorKind::from_label),
        detail: as_opt_str("detail").unwrap_or_default(),
    })
}

fn proxy_status_label(status: ProxyStatus) -> &'static str {
    match status {
        ProxyStatus::Connected => "connected",
        ProxyStatus::Disconnected => "disconnected",
        ProxyStatus::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_result() -> CheckResult {
        CheckResult {
            timestamp: OffsetDateTime::parse("2024-05-04T12:00:00Z", &Rfc3339).unwrap(),
            host_address: "10.0.0.5".into(),
            reachable: true,
            transport: TransportKind::Winrm,
            egress_ip: Some("203.0.113.9".into()),
            city: Some("Berlin".into()),
            proxy_status: ProxyStatus::Connected,
            city_drift: true,
            error: None,
            detail: "203.0.113.9".into(),
        }
    }

    #[test]
    fn test_status_columns_roundtrip() {
        let original = sample_result();
        let columns = status_columns(&original);
        let back = parse_status_columns("10.0.0.5", &columns).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_status_columns_roundtrip_with_error() {
        let mut original = sample_result();
        original.reachable = false;
        original.egress_ip = None;
        original.city = None;
        original.proxy_status = ProxyStatus::Unknown;
        original.city_drift = false;
        original.error = Some(ErrorKind::Protocol(500));
        let back = parse_status_columns("10.0.0.5", &status_columns(&original)).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_roundtrip_tolerates_string_coercion() {
        // Le ledger renvoie parfois les booléens en chaînes
        let mut columns = status_columns(&sample_result());
        columns["reachable"] = Value::String("true".into());
        columns["city_drift"] = Value::String("true".into());
        let back = parse_status_columns("10.0.0.5", &columns).unwrap();
        assert!(back.reachable);
        assert!(back.city_drift);
    }

    #[test]
    fn test_parse_host_row_tolerant() {
        let full = serde_json::json!({
            "host_address": "10.0.0.5", "label": "shop-1", "transport": "ssh",
            "username": "admin", "secret": "pw", "expected_city": "Moscow",
            "proxy_package_key": "pkg-7",
        });
        let host = parse_host_row(&full).unwrap();
        assert_eq!(host.expected_city, Some("Moscow".into()));

        let missing_secret = serde_json::json!({
            "host_address": "10.0.0.6", "transport": "ssh", "username": "admin",
        });
        assert!(parse_host_row(&missing_secret).is_none());

        let bad_transport = serde_json::json!({
            "host_address": "10.0.0.7", "transport": "telnet",
            "username": "admin", "secret": "pw",
        });
        assert!(parse_host_row(&bad_transport).is_none());
    }

    #[tokio::test]
    async fn test_load_inventory_skips_invalid_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ledger/rows"))
            .and(header("x-api-key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "host_address": "10.0.0.5", "transport": "ssh", "username": "a", "secret": "s" },
                { "host_address": "10.0.0.6" },
            ])))
            .mount(&server)
            .await;

        let ledger = HttpLedger::new(&format!("{}/ledger", server.uri()), "k");
        let hosts = ledger.load_inventory().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host_address, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_write_status_patches_row() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/ledger/rows/10.0.0.5"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ledger = HttpLedger::new(&format!("{}/ledger", server.uri()), "k");
        ledger.write_status("10.0.0.5", &sample_result()).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_status_surfaces_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let ledger = HttpLedger::new(&format!("{}/ledger", server.uri()), "k");
        let err = ledger.write_status("10.0.0.5", &sample_result()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Status(503)));
    }
}
