//! SSH connector
//!
//! Drives the system OpenSSH client through `sshpass` so password-only
//! fleet hosts stay reachable without key distribution. The secret travels
//! via the `SSHPASS` environment variable, never argv and never logs.

use super::{Connector, TransportError};
use crate::models::HostRecord;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

pub struct SshConnector {
    port: u16,
    extra_opts: Vec<String>,
}

impl SshConnector {
    pub fn new(port: u16, extra_opts: Option<&str>) -> Self {
        // Options additionnelles splittées façon shell depuis la config
        let extra_opts = extra_opts
            .map(|s| shell_words::split(s).unwrap_or_default())
            .unwrap_or_default();
        Self { port, extra_opts }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn execute(
        &self,
        host: &HostRecord,
        command: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        debug!(host = %host.host_address, "ssh exec");

        let connect_timeout = timeout.as_secs().max(1).to_string();
        let mut cmd = AsyncCommand::new("sshpass");
        cmd.arg("-e")
            .arg("ssh")
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", &format!("ConnectTimeout={connect_timeout}")])
            .args(["-p", &self.port.to_string()])
            .args(&self.extra_opts)
            .arg(format!("{}@{}", host.username, host.host_address))
            .arg(command)
            .env("SSHPASS", &host.secret)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Failed(format!("spawn ssh: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        match output.status.code() {
            // 255 = échec côté ssh lui-même (auth, réseau...), pas la commande distante
            Some(255) => Err(classify_ssh_failure(&stderr)),
            // sshpass: 5 = mauvais mot de passe, 6 = host key inconnue
            Some(5) => Err(TransportError::AuthFailed),
            // La commande distante a tourné ; son exit code ne nous regarde pas,
            // l'appelant parse stdout.
            Some(_) => Ok(stdout),
            None => Err(TransportError::Failed("ssh killed by signal".into())),
        }
    }
}

/// Classe le stderr d'OpenSSH en échec typé.
fn classify_ssh_failure(stderr: &str) -> TransportError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied") || lower.contains("authentication") {
        TransportError::AuthFailed
    } else if lower.contains("connection refused") {
        TransportError::ConnectionRefused
    } else if lower.contains("timed out") {
        TransportError::Timeout
    } else {
        TransportError::Failed(crate::models::truncate_detail(stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_failure() {
        let err = classify_ssh_failure("admin@10.0.0.5: Permission denied (password).");
        assert!(matches!(err, TransportError::AuthFailed));
    }

    #[test]
    fn test_classify_connection_refused() {
        let err = classify_ssh_failure("ssh: connect to host 10.0.0.5 port 22: Connection refused");
        assert!(matches!(err, TransportError::ConnectionRefused));
    }

    #[test]
    fn test_classify_timeout() {
        let err = classify_ssh_failure("ssh: connect to host 10.0.0.5 port 22: Connection timed out");
        assert!(matches!(err, TransportError::Timeout));
    }

    #[test]
    fn test_classify_unknown_failure() {
        let err = classify_ssh_failure("kex_exchange_identification: read: reset by peer");
        assert!(matches!(err, TransportError::Failed(_)));
    }
}
