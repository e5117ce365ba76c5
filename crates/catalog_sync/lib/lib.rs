pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod server;
pub mod sources;
pub mod state;
pub mod sync_service;
