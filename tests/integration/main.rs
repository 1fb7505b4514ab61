//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the balancing service
//! against the mock house adapter. Everything runs on the host with no
//! hub or devices attached.

mod mock_directory;
mod persistence_tests;
mod service_tests;
