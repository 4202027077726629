//! Closed error taxonomy shared by every subsystem.
//!
//! The retry manager (`resilience::retry`) and circuit breaker
//! (`resilience::circuit_breaker`) both dispatch on `VortexError::kind`, so
//! every variant here must map unambiguously to exactly one
//! [`ErrorKind`]. Adding a new failure mode means adding a variant and
//! deciding its kind, not threading a new bool through every call site.

use std::fmt;

use crate::correlation::CorrelationId;

/// The coarse classification used by the retry predicate and the circuit
/// breaker's monitored-failure set. Kept separate from `VortexError` itself
/// so both can switch on it exhaustively without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Connection,
    RateLimit,
    AllowanceExceeded,
    DataNotFound,
    LowData,
    Storage,
    Config,
    CircuitOpen,
}

impl ErrorKind {
    /// Whether the retry manager should attempt this call again.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Connection | Self::RateLimit)
    }

    /// Whether the circuit breaker counts this failure against its
    /// consecutive-failure threshold. Authentication, validation, config,
    /// and "no data" outcomes say nothing about provider health.
    #[must_use]
    pub const fn is_monitored_by_breaker(self) -> bool {
        matches!(self, Self::Connection | Self::RateLimit)
    }
}

/// Structured context every error carries, per spec: correlation id,
/// provider, instrument, period, operation, and a suggested action.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub correlation_id: Option<CorrelationId>,
    pub provider: Option<String>,
    pub instrument_id: Option<String>,
    pub period: Option<String>,
    pub operation: Option<String>,
    pub suggested_action: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_provider(mut self, name: impl Into<String>) -> Self {
        self.provider = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_instrument(mut self, id: impl Into<String>) -> Self {
        self.instrument_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    #[must_use]
    pub fn with_operation(mut self, op: impl Into<String>) -> Self {
        self.operation = Some(op.into());
        self
    }

    #[must_use]
    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.correlation_id {
            write!(f, "[{id}] ")?;
        }
        if let Some(op) = &self.operation {
            write!(f, "{op}: ")?;
        }
        if let Some(p) = &self.provider {
            write!(f, "provider={p} ")?;
        }
        if let Some(i) = &self.instrument_id {
            write!(f, "instrument={i} ")?;
        }
        if let Some(p) = &self.period {
            write!(f, "period={p} ")?;
        }
        Ok(())
    }
}

/// The closed sum type named in spec §7. Every fallible operation in this
/// crate returns `Result<T, VortexError>`.
#[derive(Debug, thiserror::Error)]
pub enum VortexError {
    #[error("{ctx}validation error: {message}")]
    Validation { message: String, ctx: ErrorContext },

    #[error("{ctx}authentication failed: {message}")]
    Authentication { message: String, ctx: ErrorContext },

    #[error("{ctx}connection error: {message}")]
    Connection { message: String, ctx: ErrorContext },

    #[error("{ctx}rate limited: {message}")]
    RateLimit { message: String, ctx: ErrorContext },

    #[error("{ctx}allowance exceeded: {message}")]
    AllowanceExceeded { message: String, ctx: ErrorContext },

    #[error("{ctx}no data found")]
    DataNotFound { ctx: ErrorContext },

    #[error("{ctx}too few bars returned ({count})")]
    LowData { count: usize, ctx: ErrorContext },

    #[error("{ctx}storage error: {message}")]
    Storage { message: String, ctx: ErrorContext },

    #[error("{ctx}config error: {message}")]
    Config { message: String, ctx: ErrorContext },

    #[error("{ctx}circuit open for provider")]
    CircuitOpen { ctx: ErrorContext },
}

impl VortexError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::AllowanceExceeded { .. } => ErrorKind::AllowanceExceeded,
            Self::DataNotFound { .. } => ErrorKind::DataNotFound,
            Self::LowData { .. } => ErrorKind::LowData,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Config { .. } => ErrorKind::Config,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
        }
    }

    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        match self {
            Self::Validation { ctx, .. }
            | Self::Authentication { ctx, .. }
            | Self::Connection { ctx, .. }
            | Self::RateLimit { ctx, .. }
            | Self::AllowanceExceeded { ctx, .. }
            | Self::DataNotFound { ctx }
            | Self::LowData { ctx, .. }
            | Self::Storage { ctx, .. }
            | Self::Config { ctx, .. }
            | Self::CircuitOpen { ctx } => ctx,
        }
    }

    /// Maps to the exit codes enumerated in spec §6.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Authentication { .. } => 2,
            Self::Config { .. } => 3,
            Self::Connection { .. } => 4,
            Self::Storage { .. } => 6,
            Self::RateLimit { .. } | Self::AllowanceExceeded { .. } | Self::CircuitOpen { .. } => 7,
            Self::Validation { .. } | Self::DataNotFound { .. } | Self::LowData { .. } => 8,
        }
    }

    pub fn connection(message: impl Into<String>, ctx: ErrorContext) -> Self {
        Self::Connection {
            message: message.into(),
            ctx,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            ctx: ErrorContext::new(),
        }
    }

    pub fn storage(message: impl Into<String>, ctx: ErrorContext) -> Self {
        Self::Storage {
            message: message.into(),
            ctx,
        }
    }

    pub fn validation(message: impl Into<String>, ctx: ErrorContext) -> Self {
        Self::Validation {
            message: message.into(),
            ctx,
        }
    }
}

pub type Result<T> = std::result::Result<T, VortexError>;
