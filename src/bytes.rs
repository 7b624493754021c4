//! Register <-> value conversions for the register bank.
//!
//! The register surface documented in `README.md` is big-endian network
//! byte order only (no configurable device byte order): a `uint32` or
//! `float32` occupies two consecutive registers with the high word at
//! the lower address. These helpers are the single encode/decode path
//! both the simulator's writers and the Modbus server's test-decode
//! path go through.

/// Split a `u32` into its two big-endian registers (high word first).
#[inline]
pub fn u32_to_regs(value: u32) -> [u16; 2] {
    let bytes = value.to_be_bytes();
    [
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ]
}

/// Reassemble a `u32` from its two big-endian registers.
#[inline]
pub fn regs_to_u32(regs: [u16; 2]) -> u32 {
    let b0 = regs[0].to_be_bytes();
    let b1 = regs[1].to_be_bytes();
    u32::from_be_bytes([b0[0], b0[1], b1[0], b1[1]])
}

/// Split an `f32` into its two big-endian registers (IEEE-754, high
/// word first).
#[inline]
pub fn f32_to_regs(value: f32) -> [u16; 2] {
    u32_to_regs(value.to_bits())
}

/// Reassemble an `f32` from its two big-endian registers.
#[inline]
pub fn regs_to_f32(regs: [u16; 2]) -> f32 {
    f32::from_bits(regs_to_u32(regs))
}

/// Encode a `bool` as a single register (0 or 1).
#[inline]
pub fn bool_to_reg(value: bool) -> u16 {
    u16::from(value)
}

/// Decode a single register as a `bool` (nonzero is true).
#[inline]
pub fn reg_to_bool(reg: u16) -> bool {
    reg != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_roundtrip() {
        for value in [0u32, 1, 0x1234_5678, u32::MAX] {
            let regs = u32_to_regs(value);
            assert_eq!(regs_to_u32(regs), value);
        }
    }

    #[test]
    fn u32_high_word_first() {
        let regs = u32_to_regs(0x1234_5678);
        assert_eq!(regs, [0x1234, 0x5678]);
    }

    #[test]
    fn f32_roundtrip_within_tolerance() {
        for value in [0.0f32, -1.0, 123.456, std::f32::consts::PI] {
            let regs = f32_to_regs(value);
            let decoded = regs_to_f32(regs);
            let tolerance = (value.abs() * 2e-6).max(1e-9);
            assert!(
                (decoded - value).abs() <= tolerance,
                "roundtrip failed for {value}: got {decoded}"
            );
        }
    }

    #[test]
    fn bool_roundtrip() {
        assert!(reg_to_bool(bool_to_reg(true)));
        assert!(!reg_to_bool(bool_to_reg(false)));
        // Any nonzero register reads back as true.
        assert!(reg_to_bool(0xFFFF));
    }
}
