//! Library half of the `patchship` binary, exposed for integration tests.

pub mod config;
