use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KernelConfig {
    /// Intervalle entre deux sweeps automatiques (secondes)
    pub interval_secs: u64,
    /// Taille du pool de checks parallèles
    pub pool_size: usize,
    /// Deadline d'un sweep complet (secondes) ; les hôtes non finis sont abandonnés
    pub sweep_timeout_secs: u64,
    /// Timeout d'une commande transport individuelle (secondes)
    pub command_timeout_secs: u64,
    /// Port d'écoute de l'API REST commandes
    pub http_port: u16,
    /// Endpoint "quelle est mon IP" interrogé DEPUIS l'hôte (via son proxy local)
    pub egress_probe_url: String,
    /// IPs d'entrée/sortie connues du provider proxy : une IP observée dans
    /// cette liste signifie "tunnel proxy inactif"
    pub proxy_exit_ips: Vec<String>,
    pub ledger: LedgerConf,
    pub geo: GeoConf,
    pub traffic: Option<TrafficConf>,
    pub mqtt: Option<MqttConf>,
    pub ssh: SshConf,
    pub winrm: WinrmConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConf {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeoConf {
    pub endpoint: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrafficConf {
    pub base_url: String,
    pub api_key: String,
    pub poll_interval_secs: u64,
    /// Seuil d'alerte expiration (jours restants)
    pub warn_days_left: i64,
    /// Seuil d'alerte consommation (pourcentage du quota)
    pub warn_usage_percent: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SshConf {
    pub port: u16,
    /// Options OpenSSH additionnelles, splittées façon shell
    /// (ex: "-o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null")
    pub extra_opts: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WinrmConf {
    pub port: u16,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            pool_size: 8,
            sweep_timeout_secs: 300,
            command_timeout_secs: 20,
            http_port: 8080,
            egress_probe_url: "https://api.ipify.org".into(),
            proxy_exit_ips: Vec::new(),
            ledger: LedgerConf {
                base_url: "http://localhost:9090/ledger".into(),
                api_key: String::new(),
            },
            geo: GeoConf { endpoint: "http://ip-api.com/json".into() },
            traffic: None,
            mqtt: Some(MqttConf { host: "localhost".into(), port: 1883 }),
            ssh: SshConf { port: 22, extra_opts: None },
            winrm: WinrmConf { port: 5985 },
        }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("VIGIE_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() { return KernelConfig::default(); }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            eprintln!("[kernel] config invalide: {e}");
            KernelConfig::default()
        })
    } else {
        eprintln!("[kernel] pas de kernel.yaml, usage config par défaut");
        KernelConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.pool_size, 8);
        assert_eq!(cfg.ssh.port, 22);
        assert_eq!(cfg.winrm.port, 5985);
        assert!(cfg.proxy_exit_ips.is_empty());
    }

    #[test]
    fn test_partial_yaml_rejected_to_default() {
        // Une section manquante ne doit pas paniquer : serde échoue, on retombe
        // sur la config par défaut (comportement de load_config).
        let broken = "interval_secs: 60";
        let parsed: Result<KernelConfig, _> = serde_yaml::from_str(broken);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_full_yaml_roundtrip() {
        let cfg = KernelConfig::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: KernelConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.interval_secs, cfg.interval_secs);
        assert_eq!(back.ledger.base_url, cfg.ledger.base_url);
    }
}
