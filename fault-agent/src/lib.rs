//! Faultline Agent
//!
//! Sidecar executable that runs next to a service, injects faults into the
//! traffic it proxies and keeps its rule set in sync with the control plane.

use clap::Parser;
use fault_core::{compile, CertificateAuthority, ProxyServer, RuleStore, SidecarConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod client;
pub mod error;
pub mod subscriber;


pub use client::GrpcRuleSource;
pub use error::AgentError;
pub use subscriber::{ConfigSubscriber, RuleSource, TransportError, UpdateStream};

/// Command-line flags. Each one can also come from a `FAULTLINE_*` variable;
/// anything left unset falls back to the `--config` file, then to defaults.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON file with a full or partial sidecar configuration
    #[arg(long, env = "FAULTLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on for HTTP/HTTPS traffic
    #[arg(long, env = "FAULTLINE_LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Port to listen on for HTTP/HTTPS traffic
    #[arg(long, env = "FAULTLINE_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// Port to expose the Admin API (health/metrics)
    #[arg(long, env = "FAULTLINE_ADMIN_PORT")]
    pub admin_port: Option<u16>,

    /// URL of the control plane's rule distribution service
    #[arg(long, env = "FAULTLINE_CONTROL_PLANE_URL")]
    pub control_plane_url: Option<String>,

    /// Node identity reported to the control plane (defaults to the hostname)
    #[arg(long, env = "FAULTLINE_NODE_ID")]
    pub node_id: Option<String>,

    /// Directory holding the interception CA (ca.pem / ca.key)
    #[arg(long, env = "FAULTLINE_CERT_DIR")]
    pub cert_dir: Option<String>,

    /// Rules file published before the control plane delivers anything
    #[arg(long, env = "FAULTLINE_BOOTSTRAP_RULES")]
    pub bootstrap_rules: Option<PathBuf>,

    /// First reconnect delay in milliseconds
    #[arg(long, env = "FAULTLINE_BACKOFF_BASE_MS")]
    pub backoff_base_ms: Option<u64>,

    /// Longest reconnect delay in milliseconds
    #[arg(long, env = "FAULTLINE_BACKOFF_MAX_MS")]
    pub backoff_max_ms: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long, env = "FAULTLINE_LOG_JSON")]
    pub log_json: bool,
}

/// Build the effective configuration: flags and env over file over defaults.
pub fn load_sidecar_config(args: &Args) -> Result<SidecarConfig, AgentError> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| AgentError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|e| {
                AgentError::Config(format!("{} is not a valid config file: {}", path.display(), e))
            })?
        }
        None => SidecarConfig::default(),
    };

    if let Some(addr) = &args.listen_addr {
        config.listen_address = addr.clone();
    }
    if let Some(port) = args.listen_port {
        config.listen_port = port;
    }
    if let Some(port) = args.admin_port {
        config.admin_port = port;
    }
    if let Some(url) = &args.control_plane_url {
        config.control_plane_endpoint = url.clone();
    }
    if let Some(node_id) = &args.node_id {
        config.node_id = node_id.clone();
    }
    if let Some(dir) = &args.cert_dir {
        config.certificate_config.cert_store_path = dir.clone();
    }
    if let Some(path) = &args.bootstrap_rules {
        config.bootstrap_rules = Some(path.clone());
    }
    if let Some(base) = args.backoff_base_ms {
        config.backoff.base_delay_ms = base;
    }
    if let Some(max) = args.backoff_max_ms {
        config.backoff.max_delay_ms = max;
    }

    if config.node_id.is_empty() {
        config.node_id = default_node_id();
    }

    if config.backoff.base_delay_ms == 0 || config.backoff.base_delay_ms > config.backoff.max_delay_ms {
        return Err(AgentError::Config(format!(
            "backoff base delay ({}ms) must be positive and not above the max delay ({}ms)",
            config.backoff.base_delay_ms, config.backoff.max_delay_ms
        )));
    }

    Ok(config)
}

const FALLBACK_NODE_ID: &str = "faultline-sidecar";

/// The hostname, for nodes that were not given an explicit identity.
fn default_node_id() -> String {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_NODE_ID.to_string())
}

/// Compile a rules file and make it the active set.
pub fn load_bootstrap_rules(path: &Path, store: &RuleStore) -> Result<(), AgentError> {
    let payload = std::fs::read(path).map_err(|source| AgentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let rule_set = compile(&payload).map_err(|source| AgentError::BootstrapRules {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), version = %rule_set.version(), "Loaded bootstrap rules");
    store.publish(rule_set);
    Ok(())
}

pub async fn run_agent(args: Args) -> Result<(), AgentError> {
    // Logging should be initialized by the caller (main or test)
    let config = load_sidecar_config(&args)?;

    tracing::info!("Starting Faultline Agent...");
    tracing::info!("  Listen: {}:{}", config.listen_address, config.listen_port);
    tracing::info!("  Admin:  0.0.0.0:{}", config.admin_port);
    tracing::info!("  Rules:  {}", config.control_plane_endpoint);
    tracing::info!("  Node:   {}", config.node_id);

    let store = Arc::new(RuleStore::new());
    if let Some(path) = &config.bootstrap_rules {
        load_bootstrap_rules(path, &store)?;
    }

    let ca = CertificateAuthority::load_or_generate(
        Path::new(&config.certificate_config.cert_store_path),
        config.certificate_config.validity_days,
    )?;

    let source = GrpcRuleSource::new(
        config.control_plane_endpoint.clone(),
        config.node_id.clone(),
        config.backoff.connect_timeout(),
    )
    .with_keepalive(config.backoff.keepalive_interval());
    let subscriber = ConfigSubscriber::new(source, store.clone(), config.backoff.clone());
    let status = subscriber.status();
    tokio::spawn(subscriber.run());

    let proxy_server = ProxyServer::new(config, ca, store).with_subscriber_status(status);

    tracing::info!("Starting proxy server...");
    proxy_server.run().await?;
    Ok(())
}
