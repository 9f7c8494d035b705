//! Server runtime.

use portal_governance::RateLimiter;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::error::ServerError;
use crate::routes::create_router;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;

/// HTTP server for the portal API.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a server from configuration and prepared state.
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Bind the configured address and serve until a shutdown signal.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| ConfigError::Validation(vec![e.to_string()]))?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until a shutdown signal.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        info!(
            address = %addr,
            environment = %self.config.environment,
            "Portal gateway listening"
        );
        if self.config.environment.is_production_like() && self.config.allowed_origins.is_empty() {
            warn!("No allowed origins configured; cross-origin requests will be refused");
        }

        let sweeper = spawn_sweeper(
            self.state.limiter.clone(),
            self.config.rate_limit.sweep_interval,
        );

        let app = create_router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
            })
            .await;

        sweeper.abort();
        result?;

        info!("Portal gateway stopped");
        Ok(())
    }
}

/// Load state for `config` and serve until a shutdown signal.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let state = AppState::from_config(&config).await?;
    Server::new(config, state).run().await
}

fn spawn_sweeper(limiter: RateLimiter, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_once(&limiter).await;
        }
    })
}

async fn sweep_once(limiter: &RateLimiter) -> usize {
    match limiter.sweep().await {
        Ok(removed) => {
            if removed > 0 {
                debug!(removed, "Swept idle rate-limit counters");
            }
            removed
        }
        Err(e) => {
            warn!(error = %e, "Counter sweep failed");
            0
        }
    }
}
