//! Cafeboard library - cafe open/closed status board
//!
//! This module exports internal components for integration testing.

pub mod auth;
pub mod backup;
pub mod catalog;
pub mod cli;
pub mod clock;
pub mod config;
pub mod model;
pub mod scheduler;
pub mod server;
pub mod status;
pub mod store;
pub mod time_window;
