//! WinRM connector
//!
//! WS-Management over plain HTTP (port 5985) for Windows targets without
//! SSH. One call = one disposable shell: Create → Command → Receive →
//! Delete. Output streams come back base64-encoded inside the Receive
//! response. Some misconfigured targets answer HTTP 500 at the protocol
//! level; that is surfaced as `Protocol { code }`, distinct from
//! "host down".

use super::{Connector, TransportError};
use crate::models::HostRecord;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";
/// Garde-fou : nombre max d'appels Receive pour une commande.
const MAX_RECEIVE_ROUNDS: usize = 16;

pub struct WinrmConnector {
    client: reqwest::Client,
    port: u16,
}

impl WinrmConnector {
    pub fn new(port: u16) -> Self {
        Self { client: reqwest::Client::new(), port }
    }

    fn endpoint(&self, host: &HostRecord) -> String {
        format!("http://{}:{}/wsman", host.host_address, self.port)
    }

    async fn post(
        &self,
        host: &HostRecord,
        envelope: String,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let response = self
            .client
            .post(self.endpoint(host))
            .basic_auth(&host.username, Some(&host.secret))
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .timeout(timeout)
            .body(envelope)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(TransportError::AuthFailed);
        }
        if !status.is_success() {
            return Err(TransportError::Protocol { code: status.as_u16() });
        }
        response
            .text()
            .await
            .map_err(|e| TransportError::Failed(format!("read wsman body: {e}")))
    }
}

#[async_trait]
impl Connector for WinrmConnector {
    async fn execute(
        &self,
        host: &HostRecord,
        command: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        debug!(host = %host.host_address, "winrm exec");
        let run = self.run_in_shell(host, command, timeout);
        tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

impl WinrmConnector {
    async fn run_in_shell(
        &self,
        host: &HostRecord,
        command: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let op_secs = timeout.as_secs().max(1);

        let created = self.post(host, create_shell_envelope(&self.endpoint(host), op_secs), timeout).await?;
        let shell_id = extract_field(&created, "ShellId")
            .ok_or_else(|| TransportError::Failed("no ShellId in create response".into()))?
            .to_string();

        let result = self.run_command(host, &shell_id, command, timeout, op_secs).await;

        // Fermeture best-effort : le shell expire de toute façon côté cible.
        let _ = self
            .post(host, delete_shell_envelope(&self.endpoint(host), &shell_id, op_secs), timeout)
            .await;

        result
    }

    async fn run_command(
        &self,
        host: &HostRecord,
        shell_id: &str,
        command: &str,
        timeout: Duration,
        op_secs: u64,
    ) -> Result<String, TransportError> {
        let endpoint = self.endpoint(host);
        let started = self
            .post(host, command_envelope(&endpoint, shell_id, command, op_secs), timeout)
            .await?;
        let command_id = extract_field(&started, "CommandId")
            .ok_or_else(|| TransportError::Failed("no CommandId in command response".into()))?
            .to_string();

        let mut stdout = String::new();
        for _ in 0..MAX_RECEIVE_ROUNDS {
            let received = self
                .post(host, receive_envelope(&endpoint, shell_id, &command_id, op_secs), timeout)
                .await?;
            stdout.push_str(&decode_streams(&received, "stdout"));
            if received.contains("CommandState/Done") {
                return Ok(stdout);
            }
        }
        // Jamais Done : on rend quand même ce qu'on a lu
        Ok(stdout)
    }
}

fn classify_request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::ConnectionRefused
    } else {
        TransportError::Failed(e.to_string())
    }
}

/// Extrait la première valeur d'un champ WS-Man, que la réponse le donne en
/// élément (`<rsp:ShellId>x</rsp:ShellId>`) ou en sélecteur
/// (`<w:Selector Name="ShellId">x</w:Selector>`).
fn extract_field<'a>(xml: &'a str, field: &str) -> Option<&'a str> {
    let at = xml.find(field)?;
    let rest = &xml[at + field.len()..];
    let start = rest.find('>')? + 1;
    let end = rest[start..].find('<')? + start;
    let value = rest[start..end].trim();
    if value.is_empty() { None } else { Some(value) }
}

/// Concatène et décode les blocs `<rsp:Stream Name="{name}">base64</rsp:Stream>`.
fn decode_streams(xml: &str, name: &str) -> String {
    let marker = format!("Name=\"{name}\"");
    let mut out = String::new();
    for chunk in xml.split("<rsp:Stream ").skip(1) {
        let Some(start) = chunk.find('>') else { continue };
        if !chunk[..start].contains(&marker) {
            continue;
        }
        let Some(end) = chunk[start + 1..].find("</rsp:Stream>") else { continue };
        let payload = chunk[start + 1..start + 1 + end].trim();
        if payload.is_empty() {
            continue;
        }
        if let Ok(bytes) = BASE64.decode(payload) {
            out.push_str(&String::from_utf8_lossy(&bytes));
        }
    }
    out
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn envelope_header(endpoint: &str, action: &str, selector: Option<&str>, op_secs: u64) -> String {
    let selector_set = selector
        .map(|shell_id| {
            format!("<w:SelectorSet><w:Selector Name=\"ShellId\">{shell_id}</w:Selector></w:SelectorSet>")
        })
        .unwrap_or_default();
    format!(
        concat!(
            "<s:Header>",
            "<a:To>{endpoint}</a:To>",
            "<a:ReplyTo><a:Address s:mustUnderstand=\"true\">",
            "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous",
            "</a:Address></a:ReplyTo>",
            "<w:ResourceURI s:mustUnderstand=\"true\">",
            "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd",
            "</w:ResourceURI>",
            "<a:Action s:mustUnderstand=\"true\">{action}</a:Action>",
            "<w:MaxEnvelopeSize s:mustUnderstand=\"true\">153600</w:MaxEnvelopeSize>",
            "<a:MessageID>uuid:{message_id}</a:MessageID>",
            "<w:OperationTimeout>PT{op_secs}S</w:OperationTimeout>",
            "{selector_set}",
            "</s:Header>"
        ),
        endpoint = endpoint,
        action = action,
        message_id = Uuid::new_v4(),
        op_secs = op_secs,
        selector_set = selector_set,
    )
}

fn wrap_envelope(header: String, body: String) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\" ",
            "xmlns:a=\"http://schemas.xmlsoap.org/ws/2004/08/addressing\" ",
            "xmlns:w=\"http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd\" ",
            "xmlns:rsp=\"http://schemas.microsoft.com/wbem/wsman/1/windows/shell\">",
            "{header}<s:Body>{body}</s:Body></s:Envelope>"
        ),
        header = header,
        body = body,
    )
}

fn create_shell_envelope(endpoint: &str, op_secs: u64) -> String {
    wrap_envelope(
        envelope_header(
            endpoint,
            "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create",
            None,
            op_secs,
        ),
        "<rsp:Shell><rsp:InputStreams>stdin</rsp:InputStreams>\
         <rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>"
            .to_string(),
    )
}

fn command_envelope(endpoint: &str, shell_id: &str, command: &str, op_secs: u64) -> String {
    wrap_envelope(
        envelope_header(
            endpoint,
            "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command",
            Some(shell_id),
            op_secs,
        ),
        format!(
            "<rsp:CommandLine><rsp:Command>{}</rsp:Command></rsp:CommandLine>",
            escape_xml(command)
        ),
    )
}

fn receive_envelope(endpoint: &str, shell_id: &str, command_id: &str, op_secs: u64) -> String {
    wrap_envelope(
        envelope_header(
            endpoint,
            "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive",
            Some(shell_id),
            op_secs,
        ),
        format!(
            "<rsp:Receive><rsp:DesiredStream CommandId=\"{command_id}\">stdout stderr</rsp:DesiredStream></rsp:Receive>"
        ),
    )
}

fn delete_shell_envelope(endpoint: &str, shell_id: &str, op_secs: u64) -> String {
    wrap_envelope(
        envelope_header(
            endpoint,
            "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete",
            Some(shell_id),
            op_secs,
        ),
        String::new(),
    )
}
