//! Shared fixtures for unit tests.

pub mod builders;
