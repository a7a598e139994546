//! Database access for the EaseMail server.
//!
//! This module provides the PostgreSQL implementation of the integration
//! store: platform configs and tenant connections.

pub mod integration;

pub use integration::PgIntegrationStore;
