//! Remote command transports
//!
//! Two wire protocols share one contract: run a single command string on a
//! named host and hand back raw stdout or a typed failure. Retry policy
//! belongs to callers; a connector is stateless per call (the remote shell
//! may reset between commands).

mod ssh;
mod winrm;

pub use ssh::SshConnector;
pub use winrm::WinrmConnector;

use crate::models::{ErrorKind, HostRecord, TransportKind};
use async_trait::async_trait;
use std::time::Duration;

/// Échecs transport, distingués pour que l'appelant sépare "hôte down"
/// de "hôte up mais remote-exec mal configuré".
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("command timed out")]
    Timeout,
    #[error("authentication failed")]
    AuthFailed,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("protocol error (http {code})")]
    Protocol { code: u16 },
    #[error("transport failure: {0}")]
    Failed(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Timeout => ErrorKind::Timeout,
            TransportError::AuthFailed => ErrorKind::AuthFailed,
            TransportError::ConnectionRefused => ErrorKind::ConnectionRefused,
            TransportError::Protocol { code } => ErrorKind::Protocol(*code),
            TransportError::Failed(_) => ErrorKind::Transport,
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Execute one command on the target host. A call past `timeout` fails
    /// with `TransportError::Timeout`, never partial output.
    async fn execute(
        &self,
        host: &HostRecord,
        command: &str,
        timeout: Duration,
    ) -> Result<String, TransportError>;
}

/// Paire de connecteurs, un par protocole supporté, sélectionné par hôte.
pub struct ConnectorSet {
    ssh: Box<dyn Connector>,
    winrm: Box<dyn Connector>,
}

impl ConnectorSet {
    pub fn new(ssh: Box<dyn Connector>, winrm: Box<dyn Connector>) -> Self {
        Self { ssh, winrm }
    }

    pub fn for_kind(&self, kind: TransportKind) -> &dyn Connector {
        match kind {
            TransportKind::Ssh => self.ssh.as_ref(),
            TransportKind::Winrm => self.winrm.as_ref(),
        }
    }
}
