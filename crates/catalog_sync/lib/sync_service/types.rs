use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use catalog_core::ScanPhase;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::RateLimiter;
use thiserror::Error;

/// Default number of raw provider records per adapter batch.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 200;

/// Extra headers every provider request of one run carries (for example a panel-specific
/// `User-Agent`).
pub type RequestHeaders = BTreeMap<String, String>;

/// Shared limiter so concurrent category fetches draw from one request budget.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Immutable description of one scan run; cloned into every phase handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub phases: Vec<ScanPhase>,
    /// Category-id allow-list per phase. A phase without an entry is scanned unfiltered.
    pub category_filters: BTreeMap<ScanPhase, Vec<String>>,
    /// Upper bound on raw records per adapter batch.
    pub batch_size: usize,
    /// Free-form tag carried into logs so multi-account setups can tell runs apart.
    pub account_label: Option<String>,
    /// Unix seconds; records older than this are skipped by the adapter.
    pub modified_since: Option<i64>,
    /// Per-phase quota on records handed to the mapper.
    pub max_items: Option<usize>,
}

impl SyncConfig {
    pub fn for_phases(phases: impl IntoIterator<Item = ScanPhase>) -> Self {
        Self {
            phases: phases.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn categories_for(&self, phase: ScanPhase) -> &[String] {
        self.category_filters
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn includes(&self, phase: ScanPhase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.phases.is_empty() {
            return Err("at least one scan phase is required".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch size must be > 0".to_string());
        }
        if self.max_items == Some(0) {
            return Err("max items must be > 0 when set".to_string());
        }
        if let Some(phase) = self
            .category_filters
            .keys()
            .find(|phase| !self.includes(**phase))
        {
            return Err(format!(
                "category filter given for phase `{phase}` which is not part of the run"
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            phases: ScanPhase::ALL.to_vec(),
            category_filters: BTreeMap::new(),
            batch_size: DEFAULT_SCAN_BATCH_SIZE,
            account_label: None,
            modified_since: None,
            max_items: None,
        }
    }
}

/// Retry behaviour for individual provider requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first attempt.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Pure doubling from `initial_backoff`, no jitter; used where delays must be predictable.
    pub fn exponential(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff: Duration::MAX,
            jitter: Duration::ZERO,
        }
    }
}

/// Normalized fetch failure classes used by retry logic and failure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    RateLimited,
    UpstreamUnavailable,
    Unauthorized,
    Forbidden,
    MalformedResponse,
    Other,
}

impl FetchErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::MalformedResponse => "malformed_response",
            Self::Other => "other",
        }
    }
}

/// Typed provider failure with a human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} fetch error: {message}", kind.as_str())]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::Network
                | FetchErrorKind::RateLimited
                | FetchErrorKind::UpstreamUnavailable
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// This one item could not be written; the batch continues.
    ItemRejected,
    /// The store itself is gone; the run must stop.
    Unavailable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("store error ({kind:?}): {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::ItemRejected,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == StoreErrorKind::Unavailable
    }
}

/// Coarse reason shown to the user when a chain fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Network,
    Permission,
    Unauthenticated,
    Unknown,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Permission => "permission",
            Self::Unauthenticated => "unauthenticated",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&FetchError> for FailureReason {
    fn from(error: &FetchError) -> Self {
        match error.kind {
            FetchErrorKind::Network
            | FetchErrorKind::RateLimited
            | FetchErrorKind::UpstreamUnavailable => Self::Network,
            FetchErrorKind::Unauthorized => Self::Unauthenticated,
            FetchErrorKind::Forbidden => Self::Permission,
            FetchErrorKind::MalformedResponse | FetchErrorKind::Other => Self::Unknown,
        }
    }
}

/// Terminal state of one source run or one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    /// Something was written, but at least one phase or item failed.
    PartialSuccess,
    Failed(FailureReason),
}

impl RunStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::PartialSuccess => "partial_success",
            Self::Failed(_) => "failed",
        }
    }

    pub fn failure_reason(self) -> Option<FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Folds the status of a later step into the chain status; the worst outcome wins.
    pub fn combine(self, other: RunStatus) -> RunStatus {
        match (self, other) {
            (Self::Failed(reason), _) | (_, Self::Failed(reason)) => Self::Failed(reason),
            (Self::PartialSuccess, _) | (_, Self::PartialSuccess) => Self::PartialSuccess,
            _ => Self::Succeeded,
        }
    }
}
