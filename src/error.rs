//! Error taxonomy for the bottling line simulator.
//!
//! Every variant maps to one of the failure classes in the simulator's
//! error handling design: configuration, port binding, schedule
//! validation, the Modbus wire protocol, and the transaction log.

use thiserror::Error;

/// Top-level result type used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;

/// Errors the simulator can raise.
#[derive(Debug, Error)]
pub enum SimError {
    /// Missing or invalid YAML configuration. Fatal at startup.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The configured Modbus port (and its fallback) could not be bound.
    #[error("could not bind Modbus TCP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The schedule failed load-time validation (overlap, ordering).
    #[error("schedule error: {message}")]
    Schedule { message: String },

    /// A Modbus request could not be parsed or was out of range.
    ///
    /// This never escapes a single client session: the server logs it
    /// and closes the offending connection.
    #[error("modbus protocol error: {message}")]
    ModbusProtocol { message: String },

    /// The transaction log could not be appended to or flushed.
    ///
    /// Per the correctness-over-availability contract this is fatal:
    /// the tick loop halts after attempting a final flush.
    #[error("event log append failed: {source}")]
    EventLogIo {
        #[source]
        source: std::io::Error,
    },
}

impl SimError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn schedule(message: impl Into<String>) -> Self {
        Self::Schedule {
            message: message.into(),
        }
    }

    pub fn modbus(message: impl Into<String>) -> Self {
        Self::ModbusProtocol {
            message: message.into(),
        }
    }

    /// Process exit code for this error, per the CLI surface contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            SimError::Config { .. } => 1,
            SimError::Schedule { .. } => 2,
            SimError::Bind { .. } => 3,
            SimError::ModbusProtocol { .. } => 4,
            SimError::EventLogIo { .. } => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(SimError::config("bad yaml").exit_code(), 1);
        assert_eq!(SimError::schedule("overlap").exit_code(), 2);
    }

    #[test]
    fn display_messages_are_readable() {
        let err = SimError::config("missing speed_factor");
        assert_eq!(err.to_string(), "configuration error: missing speed_factor");
    }
}
