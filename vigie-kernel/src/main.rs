/**
 * VIGIE KERNEL - Point d'entrée principal du service de supervision
 *
 * RÔLE : Orchestration de tous les modules : config, transports, checker,
 * monitor, ledger, alertes, API REST. Bootstrap du système complet avec
 * gestion d'erreurs et logging.
 *
 * ARCHITECTURE : Sweeps périodiques + commandes à la demande via API REST
 * + alertes MQTT. Seules les erreurs de configuration sont fatales ; tout
 * échec local à un hôte est contenu dans son résultat.
 */

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use vigie_kernel::alerts::{AlertEvaluator, AlertSink, LogAlertSink, MqttAlertSink};
use vigie_kernel::checker::ServerChecker;
use vigie_kernel::commands::CommandHandler;
use vigie_kernel::config::load_config;
use vigie_kernel::geo::CityResolver;
use vigie_kernel::http::{build_router, AppState};
use vigie_kernel::ledger::HttpLedger;
use vigie_kernel::monitor::FleetMonitor;
use vigie_kernel::session::SessionChecker;
use vigie_kernel::traffic::TrafficMonitor;
use vigie_kernel::transport::{ConnectorSet, SshConnector, WinrmConnector};

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigie_kernel=info".into()),
        )
        .init();

    info!("🛰️ Vigie kernel starting...");

    let cfg = load_config().await;
    let command_timeout = Duration::from_secs(cfg.command_timeout_secs);

    // Bus d'alertes : MQTT si configuré, sinon logs uniquement
    let sink: Arc<dyn AlertSink> = match &cfg.mqtt {
        Some(mqtt) => Arc::new(MqttAlertSink::new(mqtt)),
        None => {
            eprintln!("[kernel] pas de broker MQTT configuré, alertes en log uniquement");
            Arc::new(LogAlertSink)
        }
    };
    let evaluator = Arc::new(AlertEvaluator::new(sink));

    let geo = Arc::new(CityResolver::new(&cfg.geo.endpoint));
    let connectors = Arc::new(ConnectorSet::new(
        Box::new(SshConnector::new(cfg.ssh.port, cfg.ssh.extra_opts.as_deref())),
        Box::new(WinrmConnector::new(cfg.winrm.port)),
    ));
    let checker = Arc::new(ServerChecker::new(
        connectors.clone(),
        geo.clone(),
        cfg.proxy_exit_ips.clone(),
        cfg.egress_probe_url.clone(),
        command_timeout,
    ));
    let session = Arc::new(SessionChecker::new(connectors, geo.clone(), command_timeout));
    let ledger = Arc::new(HttpLedger::new(&cfg.ledger.base_url, &cfg.ledger.api_key));

    let monitor = Arc::new(FleetMonitor::new(
        checker,
        session,
        ledger.clone(),
        evaluator.clone(),
        geo,
        cfg.pool_size,
        Duration::from_secs(cfg.sweep_timeout_secs),
    ));

    // Suivi quota/expiration des packages proxy (domaine d'échec indépendant)
    let traffic = cfg.traffic.clone().map(|conf| {
        let monitor = Arc::new(TrafficMonitor::new(&conf.base_url, &conf.api_key));
        monitor
            .clone()
            .spawn_traffic_watch(conf, ledger.clone(), evaluator.clone());
        monitor
    });

    // Sweeps périodiques
    FleetMonitor::spawn_scheduler(monitor.clone(), cfg.interval_secs);

    // API REST pour le front-end conversationnel
    let handler = Arc::new(CommandHandler::new(monitor.clone(), traffic));
    let app = build_router(AppState { handler, monitor });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await.context("http server crashed")?;
    Ok(())
}
