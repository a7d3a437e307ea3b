//! iqamah library - mosque prayer times, iqama reminders and the last third of the night
//!
//! This module exports internal components for integration testing.

pub mod cli;
pub mod config;
pub mod engine;
pub mod format;
pub mod mawaqit;
pub mod night;
pub mod notify;
pub mod orchestrator;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod server;
pub mod state;
