//! The kurz URL shortener service.
//!
//! A single deployed instance serves a REST surface (axum) and an equivalent
//! gRPC surface (tonic) over one [`ShortenerService`] façade, which in turn
//! drives the pluggable storage layer and the asynchronous delete pipeline
//! from `kurz-storage`.
//!
//! [`ShortenerService`]: service::ShortenerService

pub mod app;
pub mod config;
pub mod grpc;
pub mod http;
pub mod service;
