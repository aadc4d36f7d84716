#![warn(missing_docs)]
//! Integration test crate for the tab coordination layer.
//!
//! This crate exists solely for integration testing. It is `publish =
//! false` and has no library code — all tests live in `tests/`.
