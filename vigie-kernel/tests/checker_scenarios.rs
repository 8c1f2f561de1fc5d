//! Scénarios du Server Checker avec transport scripté : repli des échecs
//! transport, règle "IP provider = tunnel inactif", drift de ville,
//! idempotence.

use devkit::{host, StubConnector};
use std::sync::Arc;
use std::time::Duration;
use vigie_kernel::checker::ServerChecker;
use vigie_kernel::geo::CityResolver;
use vigie_kernel::models::{ErrorKind, ProxyStatus};
use vigie_kernel::transport::{ConnectorSet, TransportError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn checker_with(stub: StubConnector, geo_endpoint: &str, proxy_exit_ips: Vec<String>) -> ServerChecker {
    let connectors = Arc::new(ConnectorSet::new(Box::new(stub.clone()), Box::new(stub)));
    ServerChecker::new(
        connectors,
        Arc::new(CityResolver::new(geo_endpoint)),
        proxy_exit_ips,
        "https://api.ipify.org".into(),
        Duration::from_secs(10),
    )
}

#[tokio::test]
async fn transport_timeout_folds_into_result() {
    let stub = StubConnector::new();
    stub.fail_with("10.0.0.5", || TransportError::Timeout);
    let checker = checker_with(stub, "http://127.0.0.1:1", vec![]);

    let result = checker.check(&host("10.0.0.5")).await;
    assert!(!result.reachable);
    assert_eq!(result.error, Some(ErrorKind::Timeout));
    assert_eq!(result.egress_ip, None);
    assert_eq!(result.city, None);
    assert_eq!(result.proxy_status, ProxyStatus::Unknown);
}

#[tokio::test]
async fn winrm_protocol_error_folds_into_result() {
    let stub = StubConnector::new();
    stub.fail_with("10.0.0.9", || TransportError::Protocol { code: 500 });
    let checker = checker_with(stub, "http://127.0.0.1:1", vec![]);

    let result = checker.check(&devkit::winrm_host("10.0.0.9")).await;
    assert!(!result.reachable);
    assert_eq!(result.error, Some(ErrorKind::Protocol(500)));
}

#[tokio::test]
async fn egress_on_proxy_exit_ip_means_disconnected() {
    let stub = StubConnector::new();
    stub.respond("10.0.0.5", "198.51.100.7\n");
    let checker = checker_with(stub, "http://127.0.0.1:1", vec!["198.51.100.7".into()]);

    let result = checker.check(&host("10.0.0.5")).await;
    assert!(result.reachable);
    assert_eq!(result.proxy_status, ProxyStatus::Disconnected);
    assert_eq!(result.egress_ip, Some("198.51.100.7".into()));
    assert!(!result.city_drift);
}

#[tokio::test]
async fn unparseable_output_means_unknown() {
    let stub = StubConnector::new();
    stub.respond("10.0.0.5", "curl: (28) Operation timed out");
    let checker = checker_with(stub, "http://127.0.0.1:1", vec![]);

    let result = checker.check(&host("10.0.0.5")).await;
    assert!(result.reachable);
    assert_eq!(result.proxy_status, ProxyStatus::Unknown);
    assert_eq!(result.egress_ip, None);
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn city_drift_scenario() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/203.0.113.9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "city": "Berlin",
        })))
        .mount(&server)
        .await;

    let stub = StubConnector::new();
    stub.respond("10.0.0.5", "203.0.113.9");
    let checker = checker_with(stub, &server.uri(), vec![]);

    let mut moscow = host("10.0.0.5");
    moscow.expected_city = Some("Moscow".into());

    let result = checker.check(&moscow).await;
    assert_eq!(result.proxy_status, ProxyStatus::Connected);
    assert_eq!(result.city, Some("Berlin".into()));
    assert!(result.city_drift);
}

#[tokio::test]
async fn matching_city_is_not_drift() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "city": "Moscow",
        })))
        .mount(&server)
        .await;

    let stub = StubConnector::new();
    stub.respond("10.0.0.5", "203.0.113.9");
    let checker = checker_with(stub, &server.uri(), vec![]);

    let mut target = host("10.0.0.5");
    target.expected_city = Some("Moscow".into());

    let result = checker.check(&target).await;
    assert_eq!(result.proxy_status, ProxyStatus::Connected);
    assert!(!result.city_drift);
}

#[tokio::test]
async fn check_is_idempotent_modulo_timestamp() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "city": "Moscow",
        })))
        .mount(&server)
        .await;

    let stub = StubConnector::new();
    stub.respond("10.0.0.5", "203.0.113.9");
    let checker = checker_with(stub, &server.uri(), vec![]);

    let mut target = host("10.0.0.5");
    target.expected_city = Some("Moscow".into());

    let first = checker.check(&target).await;
    let second = checker.check(&target).await;
    assert_eq!(first.host_address, second.host_address);
    assert_eq!(first.reachable, second.reachable);
    assert_eq!(first.egress_ip, second.egress_ip);
    assert_eq!(first.city, second.city);
    assert_eq!(first.proxy_status, second.proxy_status);
    assert_eq!(first.city_drift, second.city_drift);
    assert_eq!(first.error, second.error);
    assert_eq!(first.detail, second.detail);
}
