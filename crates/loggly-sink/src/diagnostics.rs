// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-diagnostics for faults the sink cannot surface to the producer.

use std::fmt::Debug;
use tracing::error;

/// Receives descriptions of internal faults. Implementations must not fail or block.
pub trait DiagnosticSink: Send + Sync + Debug {
    fn report_fault(&self, message: &str);
}

/// Reports faults as `tracing` error events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn report_fault(&self, message: &str) {
        error!("LOGGLY | Unhandled sink fault: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_tracing_diagnostics_emits_error() {
        TracingDiagnostics.report_fault("Discarded message:3 Server error:bad format");
        assert!(logs_contain("Unhandled sink fault"));
        assert!(logs_contain("bad format"));
    }
}
