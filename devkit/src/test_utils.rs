/*!
Helpers de test : builders d'hôtes et sink d'alertes collecteur.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use vigie_kernel::alerts::{AlertSink, FleetAlert};
use vigie_kernel::models::{HostRecord, TransportKind};

/// Hôte SSH de test avec credentials factices.
pub fn host(address: &str) -> HostRecord {
    HostRecord {
        host_address: address.to_string(),
        label: format!("shop-{address}"),
        transport: TransportKind::Ssh,
        username: "admin".to_string(),
        secret: "test-secret".to_string(),
        expected_city: None,
        proxy_package_key: None,
    }
}

/// Variante WinRM du builder d'hôte.
pub fn winrm_host(address: &str) -> HostRecord {
    HostRecord {
        transport: TransportKind::Winrm,
        username: "Administrator".to_string(),
        ..host(address)
    }
}

/// Sink qui capture les alertes publiées, pour assertions.
#[derive(Default)]
pub struct CollectingSink {
    alerts: Mutex<Vec<FleetAlert>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<FleetAlert> {
        self.alerts.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().len()
    }
}

#[async_trait]
impl AlertSink for CollectingSink {
    async fn publish(&self, alert: &FleetAlert) {
        self.alerts.lock().push(alert.clone());
    }
}
