//! Ordered severity scale used by the reporting layer.
//!
//! Severities are plain integers under the hood so the scale stays open
//! ended: values finer than [`Severity::DEBUG`] are debug sub-levels and
//! values below [`Severity::FATAL`] are unnamed. Lower values are more
//! severe, so threshold checks are ordinary `<=` comparisons.

use std::borrow::Cow;

/// Severity of a reported event. Lower values are more severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Severity(i32);

impl Severity {
    /// Unrecoverable failure; the most severe defined tier.
    pub const FATAL: Severity = Severity(-5);
    /// Serious failure, processing may continue in a degraded way.
    pub const SEVERE: Severity = Severity(-4);
    /// Operation failed.
    pub const ERROR: Severity = Severity(-3);
    /// Something suspicious, the operation itself succeeded.
    pub const WARNING: Severity = Severity(-2);
    /// Normal user-facing information.
    pub const INFO: Severity = Severity(-1);
    /// Extra information for verbose runs.
    pub const VERBOSE: Severity = Severity(0);
    /// First debug tier; finer tiers are [`Severity::debug_level`] values.
    pub const DEBUG: Severity = Severity(1);

    /// Debug sub-level `extra` steps finer than [`Severity::DEBUG`].
    ///
    /// `debug_level(0)` is [`Severity::DEBUG`] itself.
    pub const fn debug_level(extra: u16) -> Severity {
        Severity(Severity::DEBUG.0 + extra as i32)
    }

    /// Wrap a raw severity value, named or not.
    pub const fn from_raw(value: i32) -> Severity {
        Severity(value)
    }

    /// The raw integer value of this severity.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Display prefix for a message line at this severity.
    ///
    /// Total over every integer: named tiers use their fixed prefix,
    /// [`Severity::INFO`] and [`Severity::VERBOSE`] render bare, values
    /// outside the named range fall back to a numeric form.
    pub fn header(self) -> Cow<'static, str> {
        if self.0 < Severity::FATAL.0 {
            Cow::Owned(format!("[{}] ", self.0))
        } else if self.0 > Severity::DEBUG.0 {
            Cow::Owned(format!("Debug[{}]: ", self.0))
        } else {
            Cow::Borrowed(match self {
                Severity::FATAL => "FATAL ERROR: ",
                Severity::SEVERE => "SEVERE ERROR: ",
                Severity::ERROR => "Error: ",
                Severity::WARNING => "Warning: ",
                Severity::DEBUG => "Debug: ",
                _ => "",
            })
        }
    }
}
