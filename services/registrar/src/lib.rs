//! Campus events registrar library.
//!
//! This crate primarily ships a `registrar` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod db;
pub mod model;
pub mod notify;
pub mod registration;
pub mod reminders;
pub mod state;
