/// CRC-16 as used by the module protocol: seed `0xFFFF`, reflected polynomial `0xA001`.
pub fn crc16 (bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in bytes {
        crc ^= *byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Converts an engineering value to its fixed-point wire representation, saturating at the
/// bounds of an unsigned 16-bit register.
pub fn to_wire (value: f64, scale: f64) -> u16 {
    let raw = (value * scale).round();
    if raw.is_nan() || raw <= 0.0 {
        0
    } else if raw >= u16::MAX as f64 {
        u16::MAX
    } else {
        raw as u16
    }
}

#[inline]
pub fn from_wire (raw: u16, scale: f64) -> f64 { raw as f64 / scale }

#[inline]
pub fn be_u16 (bytes: &[u8]) -> u16 { u16::from_be_bytes ([bytes[0], bytes[1]]) }

/// Space-separated hex dump, used when logging frames.
pub fn hex_dump (bytes: &[u8]) -> String {
    bytes.iter().map (|b| format!("{:02x}", b)).collect::<Vec<_>>().join (" ")
}

#[test]
fn test_crc_known_frame() {
    // read 9 registers from 0x0000 on slave 1
    let crc = crc16 (&[0x01, 0x03, 0x00, 0x00, 0x00, 0x09]);
    assert_eq!(crc.to_le_bytes(), [0x85, 0xCC]);
}

#[test]
fn test_crc_single_bit_flips() {
    let frame = [0x01_u8, 0x06, 0x00, 0x09, 0x00, 0x01, 0x42, 0x17, 0xFE];
    let reference = crc16 (&frame);
    assert_eq!(crc16 (&frame), reference);
    for index in 0..frame.len() {
        for bit in 0..8 {
            let mut flipped = frame;
            flipped[index] ^= 1 << bit;
            assert_ne!(crc16 (&flipped), reference, "byte {} bit {}", index, bit);
        }
    }
}

#[test]
fn test_fixed_point() {
    assert_eq!(to_wire (5.0, 100.0), 500);
    assert_eq!(to_wire (0.1234, 1000.0), 123);
    assert_eq!(to_wire (-1.0, 100.0), 0);
    assert_eq!(to_wire (1e9, 100.0), u16::MAX);
    assert_eq!(from_wire (1250, 1000.0), 1.25);
}
