//! Error reporter writing to the tracing pipeline.

use std::error::Error;

use crate::application::ports::{ErrorContext, ErrorReporter};
use crate::infrastructure::metrics;

/// Logs each report as a structured `error` event and counts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, error: &(dyn Error + 'static), context: &ErrorContext) {
        let source = error.source().map(ToString::to_string);
        tracing::error!(
            component = context.component,
            operation = context.operation,
            symbol = context.symbol.as_deref(),
            source = source.as_deref(),
            error = %error,
            "Reported error"
        );
        metrics::record_error(context.component, context.operation);
    }
}
