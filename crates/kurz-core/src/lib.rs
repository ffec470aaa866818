//! Core types and traits for the kurz URL shortener.
//!
//! This crate provides the storage contract shared by the concrete
//! backends, the short-token type and generator, and the signed
//! user-identifier codec used by both the HTTP and gRPC surfaces.

pub mod auth;
pub mod error;
pub mod storage;
pub mod token;

pub use auth::TokenCodec;
pub use error::{AuthError, Result, StorageError};
pub use storage::{
    AddOutcome, BatchItem, BatchResult, DeleteRequest, InternalStats, Resolution, Storage, UserId,
    UserUrl,
};
pub use token::ShortToken;
