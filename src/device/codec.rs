//! Wire encoding for the Coyote's proprietary GATT protocol.
//!
//! Both messages are 3 bytes. Values are packed without validation, callers must keep inputs in
//! range (power 0-2047, pulse 0-31, pause 0-1023, amplitude 0-31).

/// Packs two 11-bit power levels.
///
/// Natural packing is `[a(6 bits), a(5 bits) b(3 bits), b(8 bits)]`; the device expects the
/// three bytes in reverse order.
pub fn encode_power(pow_a: u16, pow_b: u16) -> [u8; 3] {
    let b0 = ((pow_a >> 5) & 0x3F) as u8;
    let b1 = (((pow_a & 0x1F) << 3) | ((pow_b >> 8) & 0x07)) as u8;
    let b2 = (pow_b & 0xFF) as u8;
    [b2, b1, b0]
}

/// Packs one pattern frame.
///
/// The low amplitude bit, the 10-bit pause and the 5-bit pulse share a little-endian u16. The
/// upper four amplitude bits follow in a third byte.
pub fn encode_pattern(pulse: u8, pause: u16, amplitude: u8) -> [u8; 3] {
    let extra = (amplitude >> 1) & 0x0F;
    let combined: u16 = (((amplitude & 0x01) as u16) << 15)
        | ((pause & 0x03FF) << 5)
        | (pulse & 0x1F) as u16;
    let [low, high] = combined.to_le_bytes();
    [low, high, extra]
}

/// The battery characteristic holds the charge in percent as a single unsigned byte.
pub fn decode_battery(data: &[u8]) -> Option<u8> {
    data.first().copied()
}
