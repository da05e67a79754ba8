//! Opt Console — task registry and status-notification engine for a remote
//! distributed optimization backend.

pub mod backend;
pub mod config;
pub mod error;
pub mod tasks;
