use crate::{
    admin::{start_admin_server, AdminState, Metrics},
    ca::CertificateAuthority,
    config::SidecarConfig,
    error::ProxyError,
    filter::FaultFilter,
    handlers::FaultHandler,
    sidecar::SidecarHost,
    status::SubscriberStatus,
    store::RuleStore,
    Result,
};
use hudsucker::{certificate_authority::RcgenAuthority, rustls, ProxyBuilder};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

pub struct ProxyServer {
    config: SidecarConfig,
    ca: CertificateAuthority,
    store: Arc<RuleStore>,
    metrics: Arc<Metrics>,
    subscriber_status: watch::Receiver<SubscriberStatus>,
}

impl ProxyServer {
    pub fn new(config: SidecarConfig, ca: CertificateAuthority, store: Arc<RuleStore>) -> Self {
        let (_, subscriber_status) = watch::channel(SubscriberStatus::default());
        Self {
            config,
            ca,
            store,
            metrics: Arc::new(Metrics::default()),
            subscriber_status,
        }
    }

    /// Report the rule subscription on the admin health endpoint.
    pub fn with_subscriber_status(mut self, status: watch::Receiver<SubscriberStatus>) -> Self {
        self.subscriber_status = status;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ip: IpAddr = self.config.listen_address.parse().map_err(|e| {
            ProxyError::Configuration(format!(
                "Invalid listen address {}: {}",
                self.config.listen_address, e
            ))
        })?;
        let addr = SocketAddr::new(ip, self.config.listen_port);
        info!("Starting fault-injection proxy on {}", addr);

        // Start Admin Server
        let admin_port = self.config.admin_port;
        let admin_state = AdminState {
            metrics: self.metrics.clone(),
            store: self.store.clone(),
            subscriber: self.subscriber_status.clone(),
        };
        let admin = tokio::spawn(async move {
            if let Err(e) = start_admin_server(admin_port, admin_state).await {
                error!("Admin server failed: {}", e);
            }
        });

        // Hudsucker/Rustls expects DER, not PEM.
        let private_key = rustls::PrivateKey(self.ca.key_der());
        let ca_cert = rustls::Certificate(self.ca.cert_der()?);
        let authority = RcgenAuthority::new(private_key, ca_cert, 1000).map_err(|e| {
            ProxyError::Configuration(format!("Failed to create CA authority: {}", e))
        })?;

        let (host, dispatcher) = SidecarHost::new(self.metrics.clone());
        let filter = FaultFilter::new(self.store.clone(), Arc::new(host));
        let timers = tokio::spawn(dispatcher.run(filter.clone()));
        let handler = FaultHandler::new(filter, self.config.resume_grace());

        let proxy = ProxyBuilder::new()
            .with_addr(addr)
            .with_rustls_client()
            .with_ca(authority)
            .with_http_handler(handler)
            .build();

        let served = proxy
            .start(shutdown)
            .await
            .map_err(|e| ProxyError::Network(format!("Proxy failed: {}", e)));

        timers.abort();
        admin.abort();
        info!("Proxy stopped");
        served
    }
}
