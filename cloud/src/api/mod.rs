//! Cloud control plane API

pub mod client;
pub mod common;
pub mod error;
pub mod instances;
pub mod packet_filters;
pub mod security_rules;

pub use client::Client;
pub use error::ApiError;
