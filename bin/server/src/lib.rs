//! EaseMail integration server.
//!
//! This crate provides the HTTP API over the connection broker: tenant
//! integration listings, connection management, credential health checks
//! and tool dispatch.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
