/*!
Stub transport scriptable : joue le rôle des deux connecteurs réels dans
les tests. On scripte par hôte soit une sortie brute, soit une fabrique
d'échec typé ; le stub enregistre au passage le parallélisme maximal
observé (utile pour vérifier le pool borné du Fleet Monitor).
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vigie_kernel::models::HostRecord;
use vigie_kernel::transport::{Connector, TransportError};

type FailureFactory = Box<dyn Fn() -> TransportError + Send + Sync>;

enum Script {
    Output(String),
    Failure(FailureFactory),
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<HashMap<String, Script>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct StubConnector {
    inner: Arc<Inner>,
}

impl StubConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// L'hôte répondra toujours cette sortie brute.
    pub fn respond(&self, host_address: &str, output: &str) {
        self.inner
            .scripts
            .lock()
            .insert(host_address.to_string(), Script::Output(output.to_string()));
    }

    /// L'hôte échouera toujours avec l'erreur fabriquée.
    pub fn fail_with<F>(&self, host_address: &str, factory: F)
    where
        F: Fn() -> TransportError + Send + Sync + 'static,
    {
        self.inner
            .scripts
            .lock()
            .insert(host_address.to_string(), Script::Failure(Box::new(factory)));
    }

    /// Délai artificiel par appel (pour élargir les fenêtres de course).
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Parallélisme maximal observé depuis la création du stub.
    pub fn max_parallel(&self) -> usize {
        self.inner.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn execute(
        &self,
        host: &HostRecord,
        _command: &str,
        _timeout: Duration,
    ) -> Result<String, TransportError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let scripts = self.inner.scripts.lock();
            match scripts.get(&host.host_address) {
                Some(Script::Output(output)) => Ok(output.clone()),
                Some(Script::Failure(factory)) => Err(factory()),
                None => Err(TransportError::Failed(format!(
                    "no script for host {}",
                    host.host_address
                ))),
            }
        };

        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
