//! Test infrastructure for kurz integration tests.
//!
//! Provides disposable containers so storage tests can run against a real
//! Postgres server without any host setup.

pub mod error;
pub mod postgres;

pub use error::{Result, TestInfraError};
pub use postgres::{PostgresConfig, PostgresServer};
