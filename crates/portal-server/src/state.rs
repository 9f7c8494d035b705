//! Shared application state.

use portal_governance::{
    CounterStore, Environment, FileUploadPolicy, MemoryCounterStore, RateLimiter,
    SecurityHeaderGuard, SecurityPolicies,
};
use portal_telemetry::GovernanceMetrics;
use std::sync::Arc;
use tracing::info;

use crate::config::{RateLimitStoreConfig, ServerConfig, StoreBackend};
use crate::error::ServerError;

/// Compiled header guards, one per named policy.
#[derive(Debug, Clone)]
pub struct Guards {
    /// General endpoints.
    pub default: SecurityHeaderGuard,
    /// Credential endpoints.
    pub auth: SecurityHeaderGuard,
    /// Payment endpoints.
    pub payment: SecurityHeaderGuard,
    /// JSON API endpoints.
    pub api: SecurityHeaderGuard,
}

impl Guards {
    /// Compile every policy in `policies` for `environment`.
    pub fn compile(policies: &SecurityPolicies, environment: Environment) -> Result<Self, ServerError> {
        Ok(Self {
            default: SecurityHeaderGuard::compile(&policies.default, environment)?,
            auth: SecurityHeaderGuard::compile(&policies.auth, environment)?,
            payment: SecurityHeaderGuard::compile(&policies.payment, environment)?,
            api: SecurityHeaderGuard::compile(&policies.api, environment)?,
        })
    }
}

/// State shared by all routes.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Deployment environment.
    pub environment: Environment,
    /// Rate limiter shared by every governed route.
    pub limiter: RateLimiter,
    /// Compiled header guards.
    pub guards: Arc<Guards>,
    /// Governance metrics.
    pub metrics: GovernanceMetrics,
    /// Attachment upload constraints.
    pub uploads: Arc<FileUploadPolicy>,
}

impl AppState {
    /// Start building state.
    #[must_use]
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }

    /// Build state from server configuration, connecting the counter store.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let store = open_store(&config.rate_limit).await?;
        info!(
            store = store.name(),
            distributed = store.is_distributed(),
            "Counter store ready"
        );

        Self::builder()
            .environment(config.environment)
            .allowed_origins(config.allowed_origins.clone())
            .limiter(RateLimiter::new(store))
            .uploads(config.uploads.clone())
            .build()
    }
}

async fn open_store(config: &RateLimitStoreConfig) -> Result<Arc<dyn CounterStore>, ServerError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryCounterStore::new(
            config.capacity,
            config.idle_ttl,
        ))),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let url = config.redis_url.as_deref().unwrap_or_default();
            let store = portal_governance::RedisCounterStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(ServerError::RedisUnavailable),
    }
}

/// Builder for [`AppState`].
#[derive(Debug, Default)]
pub struct AppStateBuilder {
    environment: Environment,
    allowed_origins: Vec<String>,
    limiter: Option<RateLimiter>,
    metrics: Option<GovernanceMetrics>,
    uploads: Option<FileUploadPolicy>,
}

impl AppStateBuilder {
    /// Set the environment.
    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the allowed CORS origins.
    #[must_use]
    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Set the rate limiter.
    #[must_use]
    pub fn limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Set the metrics registry.
    #[must_use]
    pub fn metrics(mut self, metrics: GovernanceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the upload policy.
    #[must_use]
    pub fn uploads(mut self, uploads: FileUploadPolicy) -> Self {
        self.uploads = Some(uploads);
        self
    }

    /// Compile policies and assemble the state.
    pub fn build(self) -> Result<AppState, ServerError> {
        let policies = SecurityPolicies::for_environment(self.environment, self.allowed_origins);
        let guards = Guards::compile(&policies, self.environment)?;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => GovernanceMetrics::new().map_err(|e| ServerError::Metrics(e.to_string()))?,
        };

        Ok(AppState {
            environment: self.environment,
            limiter: self.limiter.unwrap_or_default(),
            guards: Arc::new(guards),
            metrics,
            uploads: Arc::new(self.uploads.unwrap_or_default()),
        })
    }
}
