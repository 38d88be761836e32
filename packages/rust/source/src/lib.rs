//! Content source boundary and the X API v2 client.
//!
//! This crate provides:
//! - [`ContentSource`]: "give me everything newer than this cursor" for one account
//! - [`FetchOutcome`]: the explicit success / rate-limited / transient / fatal classification
//! - [`XApiClient`]: the production implementation over the X API v2

pub mod client;
pub mod x_api;

pub use client::{ContentSource, FetchOutcome};
pub use x_api::XApiClient;
