pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod humanize;
pub mod orchestrator;
pub mod tasks;
pub mod telemetry;
pub mod url_gate;
