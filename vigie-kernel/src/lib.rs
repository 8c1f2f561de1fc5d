//! Vigie kernel - fleet health-check and remote-command orchestrator.
//!
//! Library surface shared by the binary and by the devkit test stubs.

pub mod alerts;
pub mod checker;
pub mod commands;
pub mod config;
pub mod geo;
pub mod http;
pub mod ledger;
pub mod models;
pub mod monitor;
pub mod session;
pub mod state;
pub mod traffic;
pub mod transport;
