//! Severity-filtered diagnostic reporting.
//!
//! `FemtoReporter` owns a mutable maximum-severity threshold and forwards
//! messages that pass it to a [`LogSink`]. The sink is the only observable
//! effect of the reporter; swapping it redirects every diagnostic of the
//! component holding the reporter. Formatting is paid only for messages
//! that actually pass the threshold; use [`FemtoReporter::log_with`] for
//! anything that allocates.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicI32, Ordering};

use once_cell::sync::Lazy;

use crate::severity::Severity;

/// Destination for already-formatted report lines.
///
/// Implementations must be `Send + Sync` so a reporter can be shared
/// across the threads driving one socket.
pub trait LogSink: Send + Sync {
    /// Write one line at the given severity.
    fn write_line(&self, severity: Severity, line: &str);
}

/// Sink writing to standard error, severity header applied.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_line(&self, severity: Severity, line: &str) {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{}{}", severity.header(), line);
    }
}

/// Sink discarding every line.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write_line(&self, _severity: Severity, _line: &str) {}
}

/// Reporter filtering messages against a mutable severity threshold.
///
/// A message is delivered iff its severity is at or below (at least as
/// severe as) the current threshold. Filtering is silent; the reporter
/// itself never fails.
pub struct FemtoReporter {
    max_severity: AtomicI32,
    sink: Box<dyn LogSink>,
}

impl FemtoReporter {
    /// Create a reporter over `sink` with the given initial threshold.
    pub fn new(sink: impl LogSink + 'static, max_severity: Severity) -> Self {
        Self {
            max_severity: AtomicI32::new(max_severity.raw()),
            sink: Box::new(sink),
        }
    }

    /// Standard-error reporter at the [`Severity::INFO`] threshold.
    pub fn stderr() -> Self {
        Self::new(StderrSink, Severity::INFO)
    }

    /// Reporter that discards everything.
    pub fn null() -> Self {
        Self::new(NullSink, Severity::FATAL)
    }

    /// Current maximum severity threshold.
    pub fn max_severity(&self) -> Severity {
        Severity::from_raw(self.max_severity.load(Ordering::Relaxed))
    }

    /// Unconditionally set the threshold.
    ///
    /// Moving it to [`Severity::DEBUG`] or finer announces the new level
    /// through the sink; the announcement is filtered against the *new*
    /// threshold, so it always passes.
    pub fn set_max_severity(&self, level: Severity) {
        self.max_severity.store(level.raw(), Ordering::Relaxed);
        if level >= Severity::DEBUG {
            self.log_with(level, || format!("debug level set to {}", level.raw()));
        }
    }

    /// Loosen the threshold to `level`; no-op when already at least as
    /// loose. Never tightens.
    pub fn raise_max_severity(&self, level: Severity) {
        if self.max_severity() < level {
            self.set_max_severity(level);
        }
    }

    /// Deliver `message` iff `severity` passes the threshold.
    pub fn log(&self, severity: Severity, message: &str) {
        if severity <= self.max_severity() {
            self.sink.write_line(severity, message);
        }
    }

    /// Lazily-formatted [`log`](Self::log): the closure runs only when the
    /// severity check passes, so suppressed messages cost nothing.
    pub fn log_with<F>(&self, severity: Severity, message: F)
    where
        F: FnOnce() -> String,
    {
        if severity <= self.max_severity() {
            self.sink.write_line(severity, &message());
        }
    }

    /// Report a fatal error.
    pub fn fatal(&self, message: &str) {
        self.log(Severity::FATAL, message);
    }

    /// Report a severe error.
    pub fn severe(&self, message: &str) {
        self.log(Severity::SEVERE, message);
    }

    /// Report an error.
    pub fn error(&self, message: &str) {
        self.log(Severity::ERROR, message);
    }

    /// Report a warning.
    pub fn warning(&self, message: &str) {
        self.log(Severity::WARNING, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Severity::INFO, message);
    }

    pub fn verbose(&self, message: &str) {
        self.log(Severity::VERBOSE, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(Severity::DEBUG, message);
    }
}

impl fmt::Debug for FemtoReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FemtoReporter")
            .field("max_severity", &self.max_severity())
            .finish_non_exhaustive()
    }
}

static STDERR_REPORT: Lazy<FemtoReporter> = Lazy::new(FemtoReporter::stderr);
static NULL_REPORT: Lazy<FemtoReporter> = Lazy::new(FemtoReporter::null);

/// Process-wide standard-error reporter; the default destination when an
/// operation is called without an explicit reporter.
pub fn stderr_report() -> &'static FemtoReporter {
    &STDERR_REPORT
}

/// Process-wide discarding reporter, used where failures must stay silent
/// (notably destructors).
pub fn null_report() -> &'static FemtoReporter {
    &NULL_REPORT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CollectingSink;
    use proptest::prelude::*;
    use rstest::rstest;
    use static_assertions::assert_impl_all;

    fn reporter(threshold: Severity) -> (FemtoReporter, CollectingSink) {
        let sink = CollectingSink::new();
        (FemtoReporter::new(sink.clone(), threshold), sink)
    }

    #[rstest]
    fn reporter_is_shareable_across_threads() {
        assert_impl_all!(FemtoReporter: Send, Sync);
    }

    #[rstest]
    #[case(Severity::WARNING, Severity::ERROR, true)]
    #[case(Severity::WARNING, Severity::WARNING, true)]
    #[case(Severity::WARNING, Severity::INFO, false)]
    #[case(Severity::INFO, Severity::VERBOSE, false)]
    #[case(Severity::DEBUG, Severity::debug_level(3), false)]
    #[case(Severity::debug_level(3), Severity::debug_level(3), true)]
    fn delivery_requires_severity_at_or_below_threshold(
        #[case] threshold: Severity,
        #[case] severity: Severity,
        #[case] delivered: bool,
    ) {
        let (report, sink) = reporter(threshold);
        report.log(severity, "x");
        assert_eq!(sink.collected().len(), usize::from(delivered));
    }

    #[rstest]
    fn suppression_is_silent_and_delivery_renders_with_prefix() {
        let (report, sink) = reporter(Severity::WARNING);
        report.log(Severity::INFO, "x");
        report.log(Severity::ERROR, "y");
        assert_eq!(sink.rendered(), vec!["Error: y".to_string()]);
    }

    #[rstest]
    fn suppressed_messages_are_never_formatted() {
        let (report, _sink) = reporter(Severity::ERROR);
        let mut formatted = false;
        report.log_with(Severity::DEBUG, || {
            formatted = true;
            String::new()
        });
        assert!(!formatted, "closure must not run for a suppressed message");
    }

    #[rstest]
    fn setting_threshold_to_debug_announces_itself_once() {
        let (report, sink) = reporter(Severity::INFO);
        report.set_max_severity(Severity::DEBUG);
        assert_eq!(
            sink.collected(),
            vec![(Severity::DEBUG, "debug level set to 1".to_string())]
        );
    }

    #[rstest]
    fn setting_threshold_below_debug_is_silent() {
        let (report, sink) = reporter(Severity::INFO);
        report.set_max_severity(Severity::WARNING);
        assert_eq!(report.max_severity(), Severity::WARNING);
        assert!(sink.collected().is_empty());
    }

    #[rstest]
    fn raise_only_loosens_the_threshold() {
        let (report, _sink) = reporter(Severity::WARNING);
        report.raise_max_severity(Severity::ERROR);
        assert_eq!(report.max_severity(), Severity::WARNING);
        report.raise_max_severity(Severity::VERBOSE);
        assert_eq!(report.max_severity(), Severity::VERBOSE);
    }

    #[rstest]
    fn raising_twice_is_idempotent() {
        let (report, sink) = reporter(Severity::INFO);
        report.raise_max_severity(Severity::debug_level(2));
        report.raise_max_severity(Severity::debug_level(2));
        assert_eq!(report.max_severity(), Severity::debug_level(2));
        assert_eq!(sink.collected().len(), 1, "second raise must be a no-op");
    }

    #[rstest]
    fn tier_helpers_log_at_their_tier() {
        let (report, sink) = reporter(Severity::DEBUG);
        report.fatal("f");
        report.severe("s");
        report.error("e");
        report.warning("w");
        report.info("i");
        report.verbose("v");
        report.debug("d");
        let severities: Vec<Severity> =
            sink.collected().into_iter().map(|(severity, _)| severity).collect();
        assert_eq!(
            severities,
            vec![
                Severity::FATAL,
                Severity::SEVERE,
                Severity::ERROR,
                Severity::WARNING,
                Severity::INFO,
                Severity::VERBOSE,
                Severity::DEBUG,
            ]
        );
    }

    #[rstest]
    fn default_reporters_are_process_wide() {
        assert!(std::ptr::eq(stderr_report(), stderr_report()));
        assert!(std::ptr::eq(null_report(), null_report()));
        assert_eq!(stderr_report().max_severity(), Severity::INFO);
    }

    proptest! {
        #[test]
        fn delivery_iff_at_or_below_threshold(threshold in -20i32..20, severity in -20i32..20) {
            let sink = CollectingSink::new();
            let report = FemtoReporter::new(sink.clone(), Severity::from_raw(threshold));
            report.log(Severity::from_raw(severity), "m");
            prop_assert_eq!(sink.collected().len() == 1, severity <= threshold);
        }
    }
}
