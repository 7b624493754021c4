//! # bottling_sim - Industrial Bottling Line Digital Twin
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! A deterministic, schedule-driven digital twin of a single industrial
//! bottling line. The simulator advances virtual time, arbitrates line
//! state through a fixed precedence table, exposes its instantaneous
//! state as a bank of Modbus TCP holding registers, and emits a
//! governed, ordered, append-only stream of transaction events.
//!
//! ## Features
//!
//! - **Virtual time** — a configurable speed factor decouples simulated
//!   pacing from wall-clock time.
//! - **Modbus TCP server** — read-only FC01-04 access to the register
//!   bank, served from a coherent per-read snapshot.
//! - **Precedence-arbitrated state machine** — FAULT beats CIP beats
//!   CHANGEOVER beats STOPPED/STARVED/BLOCKED beats MICROSTOP beats
//!   RUNNING beats IDLE.
//! - **Stochastic microstop/breakdown model** — ten microstop kinds and
//!   three major breakdowns, each with typed per-code fingerprints.
//! - **Durable event log** — newline-delimited JSON, flushed to disk
//!   before each write is acknowledged.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bottling_sim::config::Config;
//!
//! # async fn run() -> bottling_sim::error::SimResult<()> {
//! let config = Config::load("config.yaml")?;
//! let skus = config.load_skus()?;
//! let schedule = config.load_schedule()?;
//! # let _ = (skus, schedule);
//! # Ok(())
//! # }
//! ```

/// Core error types and result handling.
pub mod error;

/// Protocol-level and simulation-level constants.
pub mod constants;

/// Register <-> typed value conversions (big-endian network byte order).
pub mod bytes;

/// The fixed-layout holding register bank and its documented map.
pub mod registers;

/// Virtual time source.
pub mod clock;

/// Precedence-arbitrated line state machine.
pub mod state_machine;

/// Static reference data: SKUs, schedule, microstop/breakdown libraries.
pub mod domain;

/// The transaction event schema and durable emitter.
pub mod events;

/// The read-only Modbus TCP server: MBAP framing, PDU codec, accept loop.
pub mod modbus;

/// The tick loop: line simulator and its seven-step per-tick algorithm.
pub mod simulator;

/// YAML configuration loading.
pub mod config;

/// The CLI surface (`--speed`, `--port`, `--config`).
pub mod cli;

pub use clock::{Clock, VirtualInstant};
pub use config::Config;
pub use error::{SimError, SimResult};
pub use events::{Event, EventFlusher, EventSender};
pub use registers::{RegisterBank, RegisterKind, REGISTER_COUNT};
pub use simulator::Simulator;
pub use state_machine::{select, LineState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information.
pub fn info() -> String {
    format!("bottling_sim v{VERSION} - bottling line digital twin by Evan Liu")
}
