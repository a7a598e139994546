//! Core types shared by every EaseMail crate.
//!
//! This crate provides the identifier types used to key tenants,
//! integrations and connections.

pub mod id;

pub use id::{ConnectionId, IntegrationId, ParseIdError, TenantId};
