//! # mm_app
//!
//! Process shell for hub and spoke nodes: logging, config and shutdown

pub mod cli;
pub mod config_loader;
pub mod ipc_config;
pub mod shutdown_handler;
pub mod time_utils;
pub mod tracing_setup;
