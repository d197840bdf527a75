//! Error Reporter Port (Driven Port)
//!
//! Capability for forwarding errors to an external reporting sink. The
//! default is a no-op; a concrete reporter is selected at startup.

use std::error::Error;

/// Where an error happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Component name (`market_data_client`, `polling_fallback`, ...).
    pub component: &'static str,
    /// Operation in progress (`connect`, `decode`, ...).
    pub operation: &'static str,
    /// Symbol involved, if any.
    pub symbol: Option<String>,
}

impl ErrorContext {
    /// Create a context for a component operation.
    #[must_use]
    pub const fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            symbol: None,
        }
    }

    /// Attach a symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Port for reporting errors.
///
/// Implementations must not block and must not panic.
pub trait ErrorReporter: Send + Sync {
    /// Report an error.
    fn report(&self, error: &(dyn Error + 'static), context: &ErrorContext);
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopErrorReporter;

impl ErrorReporter for NoopErrorReporter {
    fn report(&self, _error: &(dyn Error + 'static), _context: &ErrorContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn noop_reporter_accepts_errors() {
        let reporter: &dyn ErrorReporter = &NoopErrorReporter;
        reporter.report(&Boom, &ErrorContext::new("test", "report").with_symbol("EUR/USD"));
    }

    #[test]
    fn context_builder() {
        let ctx = ErrorContext::new("client", "connect").with_symbol("BTC/USD");
        assert_eq!(ctx.component, "client");
        assert_eq!(ctx.symbol.as_deref(), Some("BTC/USD"));
    }
}
