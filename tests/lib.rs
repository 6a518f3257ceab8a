//! Shared fixtures for the murmur integration tests.

pub mod fixtures;
