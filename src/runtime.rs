//! Runtime glue that wires configs, message handlers, health, telemetry, and
//! runner orchestration.

pub mod config;
pub mod handler;
pub mod health;
pub mod runner;
pub mod telemetry;
