//! Stack-allocated Modbus PDU, trimmed to the server's read-only
//! surface: parsing read requests (FC01-04) and building read
//! responses or exception responses.
//!
//! Uses a fixed-size stack buffer with no heap allocation per frame;
//! write-request builders are dropped since this server never issues
//! requests of its own.

use tracing::debug;

use crate::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS,
};
use crate::error::{SimError, SimResult};

/// A parsed read request: FC01/02 read coil-width bits, FC03/04 read
/// register-width words. Both are served from the same register bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub function_code: u8,
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    pub fn is_bit_read(self) -> bool {
        matches!(self.function_code, FC_READ_COILS | FC_READ_DISCRETE_INPUTS)
    }

    /// Parse a request PDU (function code + 2-byte address + 2-byte
    /// quantity), validating the quantity against the per-function
    /// ceiling.
    pub fn parse(pdu: &[u8]) -> Result<Self, u8> {
        if pdu.len() != 5 {
            return Err(EXCEPTION_ILLEGAL_DATA_VALUE);
        }
        let function_code = pdu[0];
        let start_address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);

        let max = match function_code {
            FC_READ_COILS | FC_READ_DISCRETE_INPUTS => MAX_READ_COILS,
            FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => MAX_READ_REGISTERS,
            _ => return Err(EXCEPTION_ILLEGAL_FUNCTION),
        };
        if quantity == 0 || quantity > max {
            return Err(EXCEPTION_ILLEGAL_DATA_VALUE);
        }

        debug!(
            function_code,
            start_address, quantity, "parsed Modbus read request"
        );

        Ok(Self {
            function_code,
            start_address,
            quantity,
        })
    }
}

/// A PDU response, built in a fixed stack buffer to avoid per-frame
/// heap allocation.
#[derive(Debug, Clone)]
pub struct ResponsePdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ResponsePdu {
    fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) -> SimResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(SimError::modbus("response PDU exceeds max size"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// FC01/02 response: byte count + bit-packed coil values.
    pub fn read_bits(function_code: u8, values: &[bool]) -> SimResult<Self> {
        let byte_count = values.len().div_ceil(8);
        let mut pdu = Self::new();
        pdu.push(function_code)?;
        pdu.push(byte_count as u8)?;
        for chunk in values.chunks(8) {
            let mut byte = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                if bit {
                    byte |= 1 << i;
                }
            }
            pdu.push(byte)?;
        }
        Ok(pdu)
    }

    /// FC03/04 response: byte count + big-endian register words.
    pub fn read_registers(function_code: u8, values: &[u16]) -> SimResult<Self> {
        let byte_count = values.len() * 2;
        let mut pdu = Self::new();
        pdu.push(function_code)?;
        pdu.push(byte_count as u8)?;
        for &value in values {
            let [hi, lo] = value.to_be_bytes();
            pdu.push(hi)?;
            pdu.push(lo)?;
        }
        Ok(pdu)
    }

    /// Exception response: function code with the error bit set, plus
    /// the exception code.
    pub fn exception(function_code: u8, exception_code: u8) -> Self {
        let mut pdu = Self::new();
        let _ = pdu.push(function_code | 0x80);
        let _ = pdu.push(exception_code);
        pdu
    }
}

/// Map a register-bank miss (out-of-range address) onto the standard
/// Modbus exception code.
pub const fn illegal_address() -> u8 {
    EXCEPTION_ILLEGAL_DATA_ADDRESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_read_holding_registers_request() {
        let pdu = [0x03, 0x00, 0x00, 0x00, 0x0A];
        let req = ReadRequest::parse(&pdu).unwrap();
        assert_eq!(req.function_code, 0x03);
        assert_eq!(req.start_address, 0);
        assert_eq!(req.quantity, 10);
        assert!(!req.is_bit_read());
    }

    #[test]
    fn rejects_zero_quantity() {
        let pdu = [0x03, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(ReadRequest::parse(&pdu), Err(EXCEPTION_ILLEGAL_DATA_VALUE));
    }

    #[test]
    fn rejects_quantity_above_ceiling() {
        let pdu = [0x03, 0x00, 0x00, 0x00, 0xFF];
        assert_eq!(ReadRequest::parse(&pdu), Err(EXCEPTION_ILLEGAL_DATA_VALUE));
    }

    #[test]
    fn rejects_unsupported_function_code() {
        let pdu = [0x10, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(ReadRequest::parse(&pdu), Err(EXCEPTION_ILLEGAL_FUNCTION));
    }

    #[test]
    fn builds_register_response_big_endian() {
        let pdu = ResponsePdu::read_registers(0x03, &[0x0102, 0x0304]).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x04, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn builds_bit_response_lsb_first() {
        let pdu = ResponsePdu::read_bits(0x01, &[true, false, true]).unwrap();
        assert_eq!(pdu.as_slice(), &[0x01, 0x01, 0b0000_0101]);
    }

    #[test]
    fn builds_exception_with_error_bit_set() {
        let pdu = ResponsePdu::exception(0x03, EXCEPTION_ILLEGAL_DATA_ADDRESS);
        assert_eq!(pdu.as_slice(), &[0x83, 0x02]);
    }
}
