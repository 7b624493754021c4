//! Modbus protocol constants based on official specification.
//!
//! Trimmed to the read-only subset this server implements: holding
//! register reads (FC03), with coil/discrete/input reads (FC01/02/04)
//! aliased onto the same register bank. Write function codes are not
//! part of this server's contract.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Modbus MBAP header length for TCP.
/// Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes.
/// The Length field itself is not counted here; it is read separately.
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size per the Modbus specification (RS485 ADU inheritance).
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU).
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Read buffer size for an incoming request frame.
pub const MODBUS_REQUEST_BUFFER_SIZE: usize = 512;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers).
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of coils/discretes for FC01/FC02, aliased onto registers.
pub const MAX_READ_COILS: u16 = 2000;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01) — aliased onto the holding register bank.
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02) — aliased onto the holding register bank.
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03).
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04) — aliased onto the holding register bank.
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function.
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address.
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value.
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure.
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

// ============================================================================
// Default ports and timing
// ============================================================================

/// Standard Modbus TCP port (requires privilege on most systems).
pub const DEFAULT_MODBUS_PORT: u16 = 502;

/// Unprivileged fallback port when binding 502 fails.
pub const FALLBACK_MODBUS_PORT: u16 = 5020;

/// Fixed virtual tick interval, unless overridden by configuration.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Default idle-read timeout for a Modbus client connection, unless
/// overridden by configuration.
pub const DEFAULT_MODBUS_IDLE_TIMEOUT_SEC: u64 = 30;

/// Hard cap on microstop duration, per the microstop library contract.
pub const MICROSTOP_MAX_SEC: u64 = 120;

/// Minimum effective microstop duration.
pub const MICROSTOP_MIN_SEC: u64 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_constants() {
        assert_eq!(MBAP_HEADER_LEN, 6);
        assert_eq!(MAX_PDU_SIZE, 253);
        assert_eq!(MAX_MBAP_LENGTH, 254);
    }

    #[test]
    fn register_limit_fits_pdu() {
        let read_pdu_size = 1 + 1 + (MAX_READ_REGISTERS as usize * 2);
        assert!(read_pdu_size <= MAX_PDU_SIZE);
        assert_eq!(MAX_READ_REGISTERS, 125);
    }

    #[test]
    fn microstop_bounds() {
        assert!(MICROSTOP_MIN_SEC < MICROSTOP_MAX_SEC);
    }
}
