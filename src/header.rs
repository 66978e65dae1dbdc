use std::io::Read;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{PgScrubError, Result};
use crate::io::DumpIO;

/// pg_dump archive format version triple.
pub type Version = (u8, u8, u8);

pub const MIN_SUPPORTED_VERSION: Version = (1, 12, 0);
pub const MAX_SUPPORTED_VERSION: Version = (1, 16, 0);

/// Format 1.14 added the table access method to every TOC entry.
pub const VERSION_TABLEAM: Version = (1, 14, 0);
/// Format 1.15 replaced the compression level integer with a method byte.
pub const VERSION_COMPRESSION_BYTE: Version = (1, 15, 0);

/// PGDMP magic bytes
pub const MAGIC: &[u8; 5] = b"PGDMP";

/// Custom format discriminator; plain, directory and tar dumps use other values.
const FORMAT_CUSTOM: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Gzip,
    Zlib,
    Lz4,
}

#[derive(Debug, Clone)]
pub struct Header {
    pub version: Version,
    pub int_size: usize,
    pub offset_size: usize,
    pub compression: CompressionMethod,
    pub create_date: NaiveDateTime,
    pub database_name: String,
    pub server_version: String,
    pub pgdump_version: String,
}

impl Header {
    pub fn is_version_at_least(&self, other: Version) -> bool {
        self.version >= other
    }

    /// Parse the fixed header off the front of a custom format dump.
    ///
    /// Installs the declared integer and offset widths into `dio`; all
    /// subsequent codec reads on this stream must use the same instance.
    pub fn parse<R: Read>(reader: &mut R, dio: &mut DumpIO) -> Result<Header> {
        let magic = DumpIO::read_exact(reader, MAGIC.len())?;
        if magic != MAGIC {
            return Err(PgScrubError::BadMagic);
        }

        let version = (
            DumpIO::read_byte(reader)?,
            DumpIO::read_byte(reader)?,
            DumpIO::read_byte(reader)?,
        );
        if version < MIN_SUPPORTED_VERSION || version > MAX_SUPPORTED_VERSION {
            return Err(PgScrubError::UnsupportedVersion(
                version.0, version.1, version.2,
            ));
        }

        let int_size = DumpIO::read_byte(reader)? as usize;
        let offset_size = DumpIO::read_byte(reader)? as usize;
        if int_size == 0 || int_size > 8 || offset_size == 0 || offset_size > 8 {
            return Err(PgScrubError::Corrupt(format!(
                "invalid int_size={} or offset_size={}",
                int_size, offset_size
            )));
        }
        dio.int_size = int_size;
        dio.offset_size = offset_size;

        let format = DumpIO::read_byte(reader)?;
        if format != FORMAT_CUSTOM {
            return Err(PgScrubError::UnsupportedFormat(format));
        }

        let compression = if version >= VERSION_COMPRESSION_BYTE {
            // 1.15+: a single method byte. No level integer follows; reading
            // one here desyncs everything after it.
            match DumpIO::read_byte(reader)? {
                0 => CompressionMethod::None,
                1 => CompressionMethod::Gzip,
                2 => CompressionMethod::Lz4,
                3 => CompressionMethod::Zlib,
                other => {
                    return Err(PgScrubError::BadCompression(format!(
                        "unknown compression method byte {}",
                        other
                    )))
                }
            }
        } else {
            // Pre-1.15 stores the zlib level; only the method survives since
            // rewritten blocks are recompressed at the default level.
            match dio.read_int(reader)? {
                -1 => CompressionMethod::Zlib,
                0 => CompressionMethod::None,
                1..=9 => CompressionMethod::Gzip,
                other => {
                    return Err(PgScrubError::BadCompression(format!(
                        "invalid compression level {}",
                        other
                    )))
                }
            }
        };

        let sec = dio.read_int(reader)?;
        let min = dio.read_int(reader)?;
        let hour = dio.read_int(reader)?;
        let mday = dio.read_int(reader)?;
        let mon = dio.read_int(reader)?;
        let year = dio.read_int(reader)?;
        let _isdst = dio.read_int(reader)?;

        // On-wire layout follows C struct tm: year is 1900-based, month 0-based.
        let create_date =
            NaiveDate::from_ymd_opt((year + 1900) as i32, (mon + 1) as u32, mday as u32)
                .and_then(|d| d.and_hms_opt(hour as u32, min as u32, sec as u32))
                .ok_or(PgScrubError::BadDate)?;

        let database_name = dio.read_string(reader)?;
        let server_version = dio.read_string(reader)?;
        let pgdump_version = dio.read_string(reader)?;

        Ok(Header {
            version,
            int_size,
            offset_size,
            compression,
            create_date,
            database_name,
            server_version,
            pgdump_version,
        })
    }
}
