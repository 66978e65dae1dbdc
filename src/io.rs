use std::io::{self, Read, Write};

use crate::error::{PgScrubError, Result};

/// Binary codec for the custom dump format.
///
/// - Integers: 1 byte sign (0 = non-negative) + `int_size` bytes magnitude
///   (little-endian).
/// - Strings: integer length + UTF-8 bytes.
/// - Offsets: `offset_size` bytes (little-endian, unsigned).
///
/// The width parameters are declared in the dump header; reads that happen
/// before the header is parsed use the defaults below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpIO {
    pub int_size: usize,
    pub offset_size: usize,
}

impl Default for DumpIO {
    fn default() -> Self {
        Self {
            int_size: 4,
            offset_size: 8,
        }
    }
}

impl DumpIO {
    pub fn new(int_size: usize, offset_size: usize) -> Self {
        Self {
            int_size,
            offset_size,
        }
    }

    /// Read a single byte from the reader.
    pub fn read_byte<R: Read>(reader: &mut R) -> Result<u8> {
        let mut buf = [0u8; 1];
        fill(reader, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a signed integer encoded as `1 byte sign + int_size bytes`.
    ///
    /// The encoding cannot represent the signed minimum and collapses -0 to 0;
    /// both are tolerated.
    pub fn read_int<R: Read>(&self, reader: &mut R) -> Result<i64> {
        let mut buf = [0u8; 9];
        fill(reader, &mut buf[..1 + self.int_size])?;
        let sign = buf[0];

        let mut value: i64 = 0;
        for (i, &b) in buf[1..1 + self.int_size].iter().enumerate() {
            value |= (b as i64) << (i * 8);
        }

        Ok(if sign != 0 { -value } else { value })
    }

    /// Write a signed integer as `1 byte sign + int_size bytes`.
    pub fn write_int<W: Write>(&self, writer: &mut W, val: i64) -> Result<()> {
        let mut buf = [0u8; 9];
        buf[0] = (val < 0) as u8;
        let mut magnitude = val.unsigned_abs();
        for slot in buf[1..1 + self.int_size].iter_mut() {
            *slot = (magnitude & 0xff) as u8;
            magnitude >>= 8;
        }
        writer.write_all(&buf[..1 + self.int_size])?;
        Ok(())
    }

    /// Read a string: int length + bytes. Lengths <= 0 yield the empty string.
    pub fn read_string<R: Read>(&self, reader: &mut R) -> Result<String> {
        let len = self.read_int(reader)?;
        if len <= 0 {
            return Ok(String::new());
        }
        let buf = Self::read_exact(reader, len as usize)?;
        Ok(std::str::from_utf8(&buf)?.to_string())
    }

    /// Read an offset value as raw bytes (no sign prefix), little-endian.
    pub fn read_offset<R: Read>(&self, reader: &mut R) -> Result<u64> {
        let mut buf = [0u8; 8];
        fill(reader, &mut buf[..self.offset_size])?;
        let mut offset: u64 = 0;
        for (i, &b) in buf[..self.offset_size].iter().enumerate() {
            offset |= (b as u64) << (i * 8);
        }
        Ok(offset)
    }

    /// Read exactly n bytes.
    pub fn read_exact<R: Read>(reader: &mut R, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        fill(reader, &mut buf)?;
        Ok(buf)
    }
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => PgScrubError::UnexpectedEof,
        _ => PgScrubError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_byte() {
        let mut input: &[u8] = b"\x42";
        assert_eq!(DumpIO::read_byte(&mut input).unwrap(), 0x42);

        input = b"";
        assert!(matches!(
            DumpIO::read_byte(&mut input),
            Err(PgScrubError::UnexpectedEof)
        ));
    }

    #[test]
    fn read_int() {
        let dio = DumpIO::new(2, 8);

        // positive
        let mut input: &[u8] = b"\x00\x01\x02";
        assert_eq!(dio.read_int(&mut input).unwrap(), 0x0201);

        // negative
        input = b"\x01\x01\x02";
        assert_eq!(dio.read_int(&mut input).unwrap(), -0x0201);

        // -0 collapses to 0
        input = b"\x01\x00\x00";
        assert_eq!(dio.read_int(&mut input).unwrap(), 0);

        // not enough data
        input = b"\x00\x01";
        assert!(matches!(
            dio.read_int(&mut input),
            Err(PgScrubError::UnexpectedEof)
        ));
    }

    #[test]
    fn int_round_trip() {
        let dio = DumpIO::default();
        for val in [0i64, 1, -1, 42, -42, 4096, 0x7fff_ffff, -0x7fff_ffff] {
            let mut buf = Vec::new();
            dio.write_int(&mut buf, val).unwrap();
            assert_eq!(buf.len(), 1 + dio.int_size);
            let mut input = buf.as_slice();
            assert_eq!(dio.read_int(&mut input).unwrap(), val, "value {}", val);
        }
    }

    #[test]
    fn read_string() {
        let dio = DumpIO::default();

        // zero length
        let mut input: &[u8] = b"\x00\x00\x00\x00\x00";
        assert_eq!(dio.read_string(&mut input).unwrap(), "");

        // negative length also yields the empty string
        input = b"\x01\x01\x00\x00\x00";
        assert_eq!(dio.read_string(&mut input).unwrap(), "");

        // valid string
        input = b"\x00\x0d\x00\x00\x00hello, world!";
        assert_eq!(dio.read_string(&mut input).unwrap(), "hello, world!");

        // invalid UTF-8
        input = b"\x00\x02\x00\x00\x00\xff\xfe";
        assert!(matches!(
            dio.read_string(&mut input),
            Err(PgScrubError::InvalidUtf8(_))
        ));

        // short read
        input = b"\x00\x05\x00\x00\x00ab";
        assert!(matches!(
            dio.read_string(&mut input),
            Err(PgScrubError::UnexpectedEof)
        ));
    }

    #[test]
    fn string_round_trip() {
        let dio = DumpIO::default();
        let s = "naïve résumé";
        let mut buf = Vec::new();
        dio.write_int(&mut buf, s.len() as i64).unwrap();
        buf.extend_from_slice(s.as_bytes());
        let mut input = buf.as_slice();
        assert_eq!(dio.read_string(&mut input).unwrap(), s);
    }

    #[test]
    fn read_offset() {
        let dio = DumpIO::new(4, 2);
        let mut input: &[u8] = b"\x01\x02";
        assert_eq!(dio.read_offset(&mut input).unwrap(), 0x0201);

        input = b"\x01";
        assert!(matches!(
            dio.read_offset(&mut input),
            Err(PgScrubError::UnexpectedEof)
        ));
    }

    #[test]
    fn defaults() {
        let dio = DumpIO::default();
        assert_eq!(dio.int_size, 4);
        assert_eq!(dio.offset_size, 8);
    }
}
