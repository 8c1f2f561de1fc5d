//! IP-to-city resolution
//!
//! Best-effort enrichment against an external lookup service. Every failure
//! path degrades to `None`; geolocation never blocks a check. Results are
//! cached for the lifetime of one sweep (several hosts often egress through
//! the same proxy exit).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(8);

pub struct CityResolver {
    client: reqwest::Client,
    endpoint: String,
    // cache par sweep : ip -> ville (None = lookup déjà tenté et raté)
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl CityResolver {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Vide le cache ; appelé par le Fleet Monitor en début de sweep.
    pub fn begin_sweep(&self) {
        self.cache.lock().clear();
    }

    pub async fn resolve_city(&self, ip: &str) -> Option<String> {
        if is_placeholder(ip) {
            return None;
        }
        if let Some(cached) = self.cache.lock().get(ip) {
            return cached.clone();
        }
        let city = self.lookup(ip).await;
        self.cache.lock().insert(ip.to_string(), city.clone());
        city
    }

    async fn lookup(&self, ip: &str) -> Option<String> {
        let url = format!("{}/{}", self.endpoint, ip);
        let response = match self.client.get(&url).timeout(LOOKUP_TIMEOUT).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(ip, "geo lookup failed: {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(ip, status = %response.status(), "geo lookup non-200");
            return None;
        }
        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                debug!(ip, "geo body invalid: {e}");
                return None;
            }
        };
        // Format ip-api : {"status":"fail"} quand l'IP est inconnue/refusée
        if body.get("status").and_then(|s| s.as_str()) == Some("fail") {
            return None;
        }
        body.get("city")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string())
    }
}

/// IP vide ou placeholder : pas d'appel réseau.
fn is_placeholder(ip: &str) -> bool {
    let ip = ip.trim();
    ip.is_empty()
        || ip == "0.0.0.0"
        || ip == "127.0.0.1"
        || ip.eq_ignore_ascii_case("unknown")
}
