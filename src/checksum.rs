//! CRC-32/Q, the checksum used inside Garmin database files.

use crc_any::CRC;
use std::io;

const CRC32_Q_POLYNOMIAL: u64 = 0x8141_41AB;

/// Incremental CRC-32/Q (non-reflected, zero initial value and no final XOR).
///
/// # Examples
///
/// ```rust
/// use skybound::Crc32Q;
///
/// let mut crc = Crc32Q::new();
/// crc.digest(b"hello ");
/// crc.digest(b"world");
/// assert_eq!(crc.get(), 0x13aa9356);
/// ```
pub struct Crc32Q(CRC);

impl Crc32Q {
    pub fn new() -> Self {
        Crc32Q(CRC::create_crc(CRC32_Q_POLYNOMIAL, 32, 0, 0, false))
    }

    pub fn digest(&mut self, data: &[u8]) {
        self.0.digest(data);
    }

    pub fn get(&self) -> u32 {
        self.0.get_crc() as u32
    }
}

impl Default for Crc32Q {
    fn default() -> Self {
        Crc32Q::new()
    }
}

/// Lets a checksum be computed while an image is copied with `io::copy`.
impl io::Write for Crc32Q {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.digest(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Calculates the CRC-32/Q of a buffer.
pub fn crc32_q(data: &[u8]) -> u32 {
    let mut crc = Crc32Q::new();
    crc.digest(data);
    crc.get()
}
