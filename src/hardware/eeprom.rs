//! EUI-48 identification EEPROM
use embedded_hal_02::blocking::{delay::DelayMs, i2c::WriteRead};

// Variant without address pins: the 3 LSB are don't-care.
const I2C_ADDR: u8 = 0x50;

// The EUI-48 occupies the last 6 bytes of the 256 byte array.
const EUI48_POINTER: u8 = 0xFA;

const ATTEMPTS: usize = 40;

/// Read the factory-programmed EUI-48.
///
/// # Note
/// The bus may not be available immediately after power-up. The read is repeated until two
/// consecutive reads agree.
///
/// # Returns
/// The EUI-48 or `None` if no two consecutive reads agreed within the attempt budget.
pub fn read_eui48<T: WriteRead>(
    i2c: &mut T,
    delay: &mut impl DelayMs<u8>,
) -> Option<[u8; 6]> {
    let mut previous = None;
    for _ in 0..ATTEMPTS {
        let mut eui48 = [0u8; 6];
        match i2c.write_read(I2C_ADDR, &[EUI48_POINTER], &mut eui48) {
            Ok(()) if previous == Some(eui48) => return Some(eui48),
            Ok(()) => previous = Some(eui48),
            Err(_) => previous = None,
        }
        delay.delay_ms(100);
    }
    None
}

/// The device identifier reported to peers, the EUI-48 in the low bytes of a `u64`.
pub fn device_id(eui48: &[u8; 6]) -> u64 {
    eui48
        .iter()
        .fold(0, |id, &byte| (id << 8) | byte as u64)
}
