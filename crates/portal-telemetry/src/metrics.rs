//! Prometheus counters for governance decisions.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Outcome label for rate limit decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// Request admitted
    Allowed,
    /// Request rejected with 429
    Denied,
    /// Route skip predicate matched
    Skipped,
}

impl DecisionOutcome {
    /// Label value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::Skipped => "skipped",
        }
    }
}

/// Reason label for input rejections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Body over the configured byte limit
    PayloadTooLarge,
    /// Schema engine reported issues
    Schema,
    /// Undecodable or malformed input
    Malformed,
    /// Unexpected failure inside the governor
    Internal,
}

impl RejectionReason {
    /// Label value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PayloadTooLarge => "payload_too_large",
            Self::Schema => "schema",
            Self::Malformed => "malformed",
            Self::Internal => "internal",
        }
    }
}

/// Governance counters registered in a dedicated registry.
///
/// Cloning is cheap; clones share the underlying counters.
#[derive(Clone)]
pub struct GovernanceMetrics {
    registry: Registry,
    rate_limit_decisions: IntCounterVec,
    input_rejections: IntCounterVec,
    cors_preflights: IntCounter,
    upload_rejections: IntCounter,
}

impl std::fmt::Debug for GovernanceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceMetrics").finish_non_exhaustive()
    }
}

impl GovernanceMetrics {
    /// Create and register all counters
    ///
    /// # Errors
    /// Returns error if a metric cannot be registered
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("portal".to_string()), None)?;

        let rate_limit_decisions = IntCounterVec::new(
            Opts::new("rate_limit_decisions_total", "Rate limit decisions by category"),
            &["category", "outcome"],
        )?;
        let input_rejections = IntCounterVec::new(
            Opts::new("input_rejections_total", "Requests rejected by input governance"),
            &["reason"],
        )?;
        let cors_preflights = IntCounter::with_opts(Opts::new(
            "cors_preflights_total",
            "CORS preflight requests answered",
        ))?;
        let upload_rejections = IntCounter::with_opts(Opts::new(
            "upload_rejections_total",
            "File uploads rejected by upload validation",
        ))?;

        registry.register(Box::new(rate_limit_decisions.clone()))?;
        registry.register(Box::new(input_rejections.clone()))?;
        registry.register(Box::new(cors_preflights.clone()))?;
        registry.register(Box::new(upload_rejections.clone()))?;

        Ok(Self {
            registry,
            rate_limit_decisions,
            input_rejections,
            cors_preflights,
            upload_rejections,
        })
    }

    /// Count a rate limit decision
    pub fn record_decision(&self, category: &str, outcome: DecisionOutcome) {
        self.rate_limit_decisions
            .with_label_values(&[category, outcome.as_str()])
            .inc();
    }

    /// Count an input rejection
    pub fn record_rejection(&self, reason: RejectionReason) {
        self.input_rejections.with_label_values(&[reason.as_str()]).inc();
    }

    /// Count an answered preflight
    pub fn record_preflight(&self) {
        self.cors_preflights.inc();
    }

    /// Count a rejected upload batch
    pub fn record_upload_rejection(&self) {
        self.upload_rejections.inc();
    }

    /// Current value of a decision counter
    #[must_use]
    pub fn decisions(&self, category: &str, outcome: DecisionOutcome) -> u64 {
        self.rate_limit_decisions
            .with_label_values(&[category, outcome.as_str()])
            .get()
    }

    /// Current value of a rejection counter
    #[must_use]
    pub fn rejections(&self, reason: RejectionReason) -> u64 {
        self.input_rejections.with_label_values(&[reason.as_str()]).get()
    }

    /// Render all counters in the text exposition format
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
