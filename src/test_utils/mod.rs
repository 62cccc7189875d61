//! Test-only helpers shared across crate unit tests.

mod collecting_sink;

pub use collecting_sink::CollectingSink;
