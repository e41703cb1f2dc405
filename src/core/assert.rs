/*!
 * Assert Hooks
 *
 * Pluggable reporting for allocator invariant failures.
 *
 * The memory subsystem never hands structured errors back through `alloc`/`free`.
 * Failures are routed to an [`AssertHandler`] installed by the embedding
 * application, together with the source location that triggered them:
 *
 * - [`Severity::Assert`]: log-and-continue, the operation degrades gracefully
 * - [`Severity::Critical`]: log-and-abort, the calling thread panics once the
 *   handler returns
 */

use crate::memory::MemoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// How bad an invariant failure is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Diagnostic only, execution continues
    Assert,
    /// The process must not continue
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Assert => write!(f, "ASSERT"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Everything a handler needs to diagnose a failure
#[derive(Debug)]
pub struct AssertReport<'a> {
    pub error: &'a MemoryError,
    pub severity: Severity,
    pub file: &'static str,
    pub line: u32,
}

impl AssertReport<'_> {
    /// Stable machine-readable code for the failure
    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

impl fmt::Display for AssertReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) at {}:{}",
            self.severity,
            self.error,
            self.code(),
            self.file,
            self.line
        )
    }
}

type HookFn = dyn Fn(&AssertReport<'_>) + Send + Sync;

/// Installed assert hook
///
/// Cheap to clone; the default logs through `tracing`.
#[derive(Clone)]
pub struct AssertHandler {
    hook: Arc<HookFn>,
}

impl AssertHandler {
    /// Wrap a custom hook
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&AssertReport<'_>) + Send + Sync + 'static,
    {
        Self {
            hook: Arc::new(hook),
        }
    }

    /// Report `error`, panicking afterwards when it is critical
    #[track_caller]
    pub fn raise(&self, error: &MemoryError) {
        let location = Location::caller();
        let severity = error.severity();
        let report = AssertReport {
            error,
            severity,
            file: location.file(),
            line: location.line(),
        };

        (self.hook)(&report);

        if severity == Severity::Critical {
            panic!("{}", report);
        }
    }
}

impl Default for AssertHandler {
    fn default() -> Self {
        Self::new(|report| {
            tracing::error!(
                code = report.code(),
                severity = %report.severity,
                file = report.file,
                line = report.line,
                "{}",
                report.error
            );
        })
    }
}

impl fmt::Debug for AssertHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AssertHandler").finish_non_exhaustive()
    }
}
