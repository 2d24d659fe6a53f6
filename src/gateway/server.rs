//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::flow::PublicOrigin;
use super::router::{AppState, create_router};
use crate::backend::SimulationBackend;
use crate::config::Config;
use crate::oauth::{ManagementClient, ProviderClient};
use crate::session::{
    CookieSettings, InMemorySessionStore, SessionManager, SessionStore, spawn_reaper,
};
use crate::token::{KeySet, TokenValidator};
use crate::{Error, Result};

/// Build an HTTP client whose every request is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("session-gateway/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Assemble the application state around an already-loaded key set.
pub fn build_state(
    config: &Config,
    keys: KeySet,
    store: Arc<dyn SessionStore>,
) -> Result<AppState> {
    let provider_http = http_client(config.provider.timeout)?;
    let backend_http = http_client(config.backend.timeout)?;

    let validator = TokenValidator::new(
        keys,
        config.provider.audience.clone(),
        config.provider.algorithm()?,
    )
    .with_leeway(config.provider.leeway)
    .with_email_claim(config.provider.email_claim.clone());

    Ok(AppState {
        validator,
        provider: ProviderClient::new(provider_http.clone(), &config.provider),
        management: ManagementClient::new(provider_http, &config.provider, &config.management),
        backend: SimulationBackend::new(backend_http, &config.backend),
        sessions: SessionManager::new(store, CookieSettings::from_config(&config.session)),
        origin: PublicOrigin::new(&config.server),
        admin_permission: config.admin.permission.clone(),
    })
}

/// Session gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Application state shared by all handlers
    state: Arc<AppState>,
    /// Session store, also owned by the reaper
    store: Arc<dyn SessionStore>,
}

impl Gateway {
    /// Create a new gateway.
    ///
    /// Fetches the provider's key set; failing to do so is fatal because no
    /// token could ever be verified.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let http = http_client(config.provider.timeout)?;
        let keys = KeySet::fetch(&http, &config.provider.issuer(), &config.provider.jwks_uri()).await?;

        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let state = Arc::new(build_state(&config, keys, Arc::clone(&store))?);

        Ok(Self {
            config,
            state,
            store,
        })
    }

    /// Run the gateway until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        spawn_reaper(
            Arc::clone(&self.store),
            self.config.session.max_age,
            self.config.session.reap_interval,
            shutdown_tx.subscribe(),
        );

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("SESSION GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            issuer = %self.state.validator.keys().issuer(),
            keys = self.state.validator.keys().len(),
            "Trusting provider signing keys"
        );
        info!(backend = %self.state.backend.base_url(), "Simulation backend");
        if !self.config.session.secure {
            warn!("Session cookie is not marked Secure");
        }

        let mut drain_rx = shutdown_tx.subscribe();
        let drain_timeout = self.config.server.shutdown_timeout;
        let server = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(shutdown_tx))
                .await
        };

        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = async {
                let _ = drain_rx.recv().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                warn!(timeout = ?drain_timeout, "Graceful shutdown timed out, dropping open connections");
            }
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
