//! Diagnostic sink: where advisory warnings about deferreds end up.
use std::{fmt, panic::Location};

/// A warning raised while settling a deferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Rejected while no error handler was registered.
    UnhandledRejection {
        label: String,
        trace: Option<String>,
        reason: String,
        rejected_at: &'static Location<'static>,
        created_at: &'static Location<'static>,
        backtrace: Option<String>,
    },
    /// Resolved or rejected after a previous completion.
    DoubleCompletion {
        label: String,
        previous_status: String,
        previous_value: String,
        attempted: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnhandledRejection {
                label,
                trace,
                reason,
                rejected_at,
                created_at,
                backtrace,
            } => {
                write!(
                    f,
                    "unhandled rejection of {label}: {reason} (rejected at {rejected_at}, created at {created_at})"
                )?;
                if let Some(trace) = trace {
                    write!(f, "\n  trace: {trace}")?;
                }
                if let Some(backtrace) = backtrace {
                    write!(f, "\n{backtrace}")?;
                }
                Ok(())
            }
            Diagnostic::DoubleCompletion {
                label,
                previous_status,
                previous_value,
                attempted,
            } => write!(
                f,
                "{label} completed twice: previously {previous_status} with {previous_value}, attempted {attempted}"
            ),
        }
    }
}

/// Receives diagnostics. Implementations must not panic.
pub trait DiagnosticSink {
    fn warn(&self, diagnostic: &Diagnostic);
}

/// Forwards diagnostics to `tracing`: unhandled rejections at warn level,
/// double completions at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn warn(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::UnhandledRejection {
                label,
                trace,
                reason,
                rejected_at,
                created_at,
                backtrace,
            } => tracing::warn!(
                deferred = %label,
                trace = trace.as_deref().unwrap_or("-"),
                %reason,
                %rejected_at,
                %created_at,
                backtrace = backtrace.as_deref().unwrap_or("-"),
                "unhandled rejection"
            ),
            Diagnostic::DoubleCompletion {
                label,
                previous_status,
                previous_value,
                attempted,
            } => tracing::error!(
                deferred = %label,
                %previous_status,
                %previous_value,
                %attempted,
                "double completion"
            ),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn warn(&self, _diagnostic: &Diagnostic) {}
}
