//! The Modbus TCP Application Protocol header: transaction id, protocol
//! id, length, and unit id, prefixed to every PDU on the wire.

use crate::constants::MBAP_HEADER_LEN;
use crate::error::{SimError, SimResult};

/// Protocol id is always 0 for Modbus; anything else is not Modbus.
const MODBUS_PROTOCOL_ID: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of unit id + PDU that follows this header.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse the fixed 7-byte MBAP header (transaction id, protocol id,
    /// length, unit id) from the front of a request buffer.
    pub fn parse(buf: &[u8]) -> SimResult<Self> {
        if buf.len() < MBAP_HEADER_LEN + 1 {
            return Err(SimError::modbus(format!(
                "frame too short for MBAP header: {} bytes",
                buf.len()
            )));
        }
        let transaction_id = u16::from_be_bytes([buf[0], buf[1]]);
        let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
        let length = u16::from_be_bytes([buf[4], buf[5]]);
        let unit_id = buf[6];

        if protocol_id != MODBUS_PROTOCOL_ID {
            return Err(SimError::modbus(format!(
                "unsupported protocol id {protocol_id}, expected Modbus (0)"
            )));
        }

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }

    /// Serialize the header for a response whose PDU is `pdu_len` bytes.
    pub fn response_bytes(&self, pdu_len: usize) -> [u8; MBAP_HEADER_LEN + 1] {
        let length = (1 + pdu_len) as u16;
        let mut out = [0u8; MBAP_HEADER_LEN + 1];
        out[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        out[2..4].copy_from_slice(&MODBUS_PROTOCOL_ID.to_be_bytes());
        out[4..6].copy_from_slice(&length.to_be_bytes());
        out[6] = self.unit_id;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_header() {
        let buf = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let header = MbapHeader::parse(&buf).unwrap();
        assert_eq!(header.transaction_id, 1);
        assert_eq!(header.protocol_id, 0);
        assert_eq!(header.length, 6);
        assert_eq!(header.unit_id, 1);
    }

    #[test]
    fn rejects_non_modbus_protocol_id() {
        let buf = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert!(MbapHeader::parse(&buf).is_err());
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(MbapHeader::parse(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn response_bytes_round_trip_transaction_and_unit() {
        let header = MbapHeader {
            transaction_id: 42,
            protocol_id: 0,
            length: 6,
            unit_id: 7,
        };
        let bytes = header.response_bytes(5);
        assert_eq!(&bytes[0..2], &42u16.to_be_bytes());
        assert_eq!(&bytes[4..6], &6u16.to_be_bytes());
        assert_eq!(bytes[6], 7);
    }
}
