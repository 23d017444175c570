//! Common test utilities.
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     // ...
//! }
//! ```
//!
//! Filter with `RUST_LOG`, e.g. `RUST_LOG=fastfair=trace` (the crate only
//! emits events when built with `--features tracing`).

#![allow(dead_code)]

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Ensures tracing is only initialized once across all tests.
static INIT: Once = Once::new();

/// Initialize the tracing subscriber for test output.
///
/// Safe to call multiple times - only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
