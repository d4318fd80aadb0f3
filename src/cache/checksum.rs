//! Adler-32 (RFC 1950), the change detector for cached messages.

use adler2::Adler32;

pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = Adler32::new();
    hasher.write_slice(data);
    hasher.checksum()
}
