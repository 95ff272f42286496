// Library surface for headless/integration tests and reuse.
// Keep this lean to avoid coupling to bin-only types in main.rs.
pub mod advice;
pub mod app_dirs;
pub mod config;
pub mod error;
pub mod game;
pub mod gate;
pub mod handoff;
pub mod history;
pub mod landmark;
pub mod relay;
pub mod runtime;
pub mod schedule;
pub mod score;
pub mod sequencer;
pub mod steps;
pub mod util;

/// Base cadence of the event loop, in milliseconds.
pub const TICK_RATE_MS: u64 = 100;
