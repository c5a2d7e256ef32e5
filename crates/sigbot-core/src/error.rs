//! Typed error definitions for the signal bot.
//!
//! Each stage of the pipeline has its own failure type so callers can tell a
//! dropped signal from a rejected order from a transient exchange hiccup. The
//! short reason tags returned by `reason()` are stable and appear in logs and
//! notifications.

use thiserror::Error;

use crate::types::OrderStatus;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Why a message could not be turned into a signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("no-direction")]
    NoDirection,

    #[error("no-symbol")]
    NoSymbol,

    /// A symbol field was present but its quote asset is not recognized.
    #[error("unrecognized-symbol: {0}")]
    UnrecognizedSymbol(String),

    #[error("invalid-leverage: {0}")]
    InvalidLeverage(String),

    #[error("invalid-number: {0}")]
    InvalidNumber(String),

    /// Both `.` and `,` are used as decimal separators in one message.
    #[error("ambiguous-number-format")]
    AmbiguousNumberFormat,

    #[error("invalid-entry: {0}")]
    InvalidEntry(String),

    #[error("no-targets")]
    NoTargets,

    /// Targets are not strictly ordered away from the entry.
    #[error("invalid-target-order")]
    InvalidTargetOrder,
}

impl ParseFailure {
    /// Stable reason tag.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoDirection => "no-direction",
            Self::NoSymbol => "no-symbol",
            Self::UnrecognizedSymbol(_) => "unrecognized-symbol",
            Self::InvalidLeverage(_) => "invalid-leverage",
            Self::InvalidNumber(_) => "invalid-number",
            Self::AmbiguousNumberFormat => "ambiguous-number-format",
            Self::InvalidEntry(_) => "invalid-entry",
            Self::NoTargets => "no-targets",
            Self::InvalidTargetOrder => "invalid-target-order",
        }
    }
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Why a signal could not be turned into an order plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizingFailure {
    /// Balance too small to meet the exchange's minimum order.
    #[error("insufficient-balance")]
    InsufficientBalance,

    #[error("invalid-leverage: {0}")]
    InvalidLeverage(String),

    /// Leverage above the exchange maximum while clamping is disabled.
    #[error("leverage-out-of-bounds: requested {requested}x, maximum {max}x")]
    LeverageOutOfBounds { requested: String, max: u32 },

    /// The account already holds a position in the symbol.
    #[error("position-already-open: {0}")]
    PositionAlreadyOpen(String),

    /// Market entry without a price to size against.
    #[error("no-reference-price")]
    NoReferencePrice,

    #[error("invalid-instrument: {0}")]
    InvalidInstrument(String),
}

impl SizingFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InsufficientBalance => "insufficient-balance",
            Self::InvalidLeverage(_) => "invalid-leverage",
            Self::LeverageOutOfBounds { .. } => "leverage-out-of-bounds",
            Self::PositionAlreadyOpen(_) => "position-already-open",
            Self::NoReferencePrice => "no-reference-price",
            Self::InvalidInstrument(_) => "invalid-instrument",
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Coarse classification of exchange call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeErrorKind {
    /// Connection failure or server-side error.
    Network,
    /// The call did not complete within its deadline.
    Timeout,
    /// HTTP 429/418 or an equivalent exchange code.
    RateLimited,
    /// The exchange understood and refused the request.
    Rejected,
    /// The response could not be decoded.
    Decode,
}

impl std::fmt::Display for ExchangeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate-limited",
            Self::Rejected => "rejected",
            Self::Decode => "decode",
        };
        f.write_str(s)
    }
}

/// An error reported by the exchange collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct ExchangeError {
    pub kind: ExchangeErrorKind,
    /// Exchange-specific error code, when one was returned.
    pub code: Option<i64>,
    pub message: String,
}

impl ExchangeError {
    pub fn new(kind: ExchangeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::Network, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::Rejected, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::Timeout, message)
    }

    /// `true` for failures worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ExchangeErrorKind::Network | ExchangeErrorKind::Timeout | ExchangeErrorKind::RateLimited
        )
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Why an order plan did not result in an open position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFailure {
    /// Setting leverage or margin mode failed; nothing was placed.
    #[error("leverage-rejected: {0}")]
    Leverage(ExchangeError),

    /// The entry order was refused; nothing was placed.
    #[error("entry-rejected: {0}")]
    EntryRejected(ExchangeError),

    /// The entry did not fill in time and was canceled without any fill.
    #[error("entry-timeout")]
    EntryTimeout,

    /// The exchange ended the entry order without any fill.
    #[error("entry-not-filled: {0:?}")]
    EntryNotFilled(OrderStatus),

    /// Shutdown arrived before the entry filled; the order was canceled.
    #[error("entry-aborted")]
    EntryAborted,
}

impl ExecutionFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Leverage(_) => "leverage-rejected",
            Self::EntryRejected(_) => "entry-rejected",
            Self::EntryTimeout => "entry-timeout",
            Self::EntryNotFilled(_) => "entry-not-filled",
            Self::EntryAborted => "entry-aborted",
        }
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Errors raised by notification transports.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Network(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The messaging platform returned an error.
    #[error("platform error: {0}")]
    Platform(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_match_display_prefix() {
        assert_eq!(ParseFailure::NoDirection.to_string(), "no-direction");
        assert_eq!(ParseFailure::InvalidTargetOrder.reason(), "invalid-target-order");
        assert_eq!(SizingFailure::InsufficientBalance.to_string(), "insufficient-balance");
        assert_eq!(ExecutionFailure::EntryTimeout.to_string(), "entry-timeout");
    }

    #[test]
    fn transient_kinds() {
        assert!(ExchangeError::network("down").is_transient());
        assert!(!ExchangeError::rejected("bad qty").is_transient());
        assert_eq!(
            ExchangeError::rejected("bad qty").with_code(-1111).to_string(),
            "rejected error: bad qty"
        );
    }
}
