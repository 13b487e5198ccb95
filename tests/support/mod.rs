#![allow(dead_code)]

pub mod fixtures;
pub mod test_library;

pub use fixtures::*;
pub use test_library::TestLibrary;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
