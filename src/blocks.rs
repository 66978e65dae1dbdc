use std::io::{Read, Write};

use ahash::AHashSet;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::error::{PgScrubError, Result};
use crate::header::CompressionMethod;
use crate::io::DumpIO;
use crate::toc::Dump;
use crate::transform::Transform;

pub const BLK_DATA: u8 = 0x01;
pub const BLK_BLOBS: u8 = 0x02;
pub const BLK_END: u8 = 0x04;

/// pg_dump splits compressed payloads into chunks of this size; a chunk
/// shorter than this can only be the last one.
pub const ZLIB_CHUNK_SIZE: usize = 4096;

/// Walks the data blocks that follow the TOC, rewriting table-data payloads
/// and passing everything else through verbatim.
pub struct BlockEngine<'a, T: Transform> {
    dio: DumpIO,
    compression: CompressionMethod,
    table_data: AHashSet<i64>,
    transform: &'a mut T,
}

impl<'a, T: Transform> BlockEngine<'a, T> {
    pub fn new(dump: &Dump, transform: &'a mut T) -> Self {
        Self {
            dio: DumpIO::new(dump.header.int_size, dump.header.offset_size),
            compression: dump.header.compression,
            table_data: dump.table_data_ids(),
            transform,
        }
    }

    /// Process blocks until the END marker or end-of-stream.
    pub fn process<R: Read, W: Write>(&mut self, reader: &mut R, writer: &mut W) -> Result<()> {
        loop {
            let tag = match DumpIO::read_byte(reader) {
                Ok(tag) => tag,
                // A dump without an END marker simply stops after the last
                // block; pg_restore tolerates this and so do we.
                Err(PgScrubError::UnexpectedEof) => break,
                Err(e) => return Err(e),
            };

            match tag {
                BLK_END => {
                    writer.write_all(&[tag])?;
                    writer.flush()?;
                    break;
                }
                BLK_DATA => {
                    let dump_id = self.dio.read_int(reader)?;
                    let rewrite = self.table_data.contains(&dump_id)
                        && matches!(
                            self.compression,
                            CompressionMethod::None | CompressionMethod::Zlib
                        );
                    if rewrite {
                        match self.compression {
                            CompressionMethod::Zlib => {
                                self.rewrite_compressed(reader, writer, dump_id)?
                            }
                            _ => self.rewrite_plain(reader, writer, dump_id)?,
                        }
                    } else {
                        self.pass_through(reader, writer, tag, dump_id)?;
                    }
                }
                BLK_BLOBS => {
                    let dump_id = self.dio.read_int(reader)?;
                    self.pass_through(reader, writer, tag, dump_id)?;
                }
                // Producers that close a chunked payload with a short chunk
                // may still emit the zero-length terminator; it then shows up
                // here as a stray zero int. Swallow it.
                0x00 => self.skip_stray_terminator(reader)?,
                other => {
                    return Err(PgScrubError::Corrupt(format!(
                        "unknown block type {:#04x}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    /// Decompress a chunk-framed zlib payload, transform it, and re-emit the
    /// result as a single length-prefixed chunk. Nothing is written until
    /// recompression has succeeded.
    fn rewrite_compressed<R: Read, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        dump_id: i64,
    ) -> Result<()> {
        let plain = self.read_chunked_zlib(reader)?;
        let rewritten = self.transform.transform(&plain)?;

        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(rewritten.len() / 2 + 64),
            Compression::default(),
        );
        encoder.write_all(&rewritten)?;
        let compressed = encoder.finish()?;

        writer.write_all(&[BLK_DATA])?;
        self.dio.write_int(writer, dump_id)?;
        self.dio.write_int(writer, compressed.len() as i64)?;
        writer.write_all(&compressed)?;
        writer.flush()?;
        Ok(())
    }

    /// Uncompressed table data is a single length-prefixed payload.
    fn rewrite_plain<R: Read, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        dump_id: i64,
    ) -> Result<()> {
        let len = self.dio.read_int(reader)?;
        if len < 0 {
            return Err(PgScrubError::Corrupt(format!(
                "negative data block length {}",
                len
            )));
        }
        let payload = DumpIO::read_exact(reader, len as usize)?;
        let rewritten = self.transform.transform(&payload)?;

        writer.write_all(&[BLK_DATA])?;
        self.dio.write_int(writer, dump_id)?;
        self.dio.write_int(writer, rewritten.len() as i64)?;
        writer.write_all(&rewritten)?;
        writer.flush()?;
        Ok(())
    }

    fn pass_through<R: Read, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        tag: u8,
        dump_id: i64,
    ) -> Result<()> {
        let len = self.dio.read_int(reader)?;
        if len < 0 {
            return Err(PgScrubError::Corrupt(format!(
                "negative data block length {}",
                len
            )));
        }
        let payload = DumpIO::read_exact(reader, len as usize)?;

        writer.write_all(&[tag])?;
        self.dio.write_int(writer, dump_id)?;
        self.dio.write_int(writer, len)?;
        writer.write_all(&payload)?;
        Ok(())
    }

    /// Inflate the chunk-framed payload the reader is positioned at.
    ///
    /// The loop ends at the first of: a zero-size chunk, a chunk shorter than
    /// ZLIB_CHUNK_SIZE, or the end of the zlib stream itself. The last
    /// condition keeps single-chunk payloads larger than the chunk size
    /// readable.
    fn read_chunked_zlib<R: Read>(&self, reader: &mut R) -> Result<Vec<u8>> {
        let mut inflater = Decompress::new(true);
        let mut plain = Vec::new();
        let mut finished = false;

        loop {
            let chunk_len = self.dio.read_int(reader)?;
            if chunk_len == 0 {
                break;
            }
            if chunk_len < 0 {
                return Err(PgScrubError::Corrupt(format!(
                    "negative chunk length {}",
                    chunk_len
                )));
            }
            let chunk = DumpIO::read_exact(reader, chunk_len as usize)?;
            finished = inflate_into(&mut inflater, &chunk, &mut plain)?;
            if finished || (chunk_len as usize) < ZLIB_CHUNK_SIZE {
                break;
            }
        }

        if !finished {
            if inflater.total_in() == 0 {
                // Degenerate empty payload: nothing was ever compressed.
                return Ok(plain);
            }
            if !inflate_finish(&mut inflater, &mut plain)? {
                return Err(PgScrubError::Corrupt(
                    "zlib stream ended prematurely".to_string(),
                ));
            }
        }

        Ok(plain)
    }

    fn skip_stray_terminator<R: Read>(&self, reader: &mut R) -> Result<()> {
        let rest = DumpIO::read_exact(reader, self.dio.int_size)?;
        if rest.iter().any(|&b| b != 0) {
            return Err(PgScrubError::Corrupt(
                "non-zero bytes in chunk terminator".to_string(),
            ));
        }
        Ok(())
    }
}

/// Feed one chunk to the decompressor. Returns true once the zlib stream is
/// complete; input past the end of the stream is ignored.
fn inflate_into(inflater: &mut Decompress, mut input: &[u8], out: &mut Vec<u8>) -> Result<bool> {
    while !input.is_empty() {
        if out.len() == out.capacity() {
            out.reserve(32 * 1024);
        }
        let before = inflater.total_in();
        let status = inflater
            .decompress_vec(input, out, FlushDecompress::None)
            .map_err(|e| PgScrubError::Corrupt(format!("zlib inflate failed: {}", e)))?;
        let consumed = (inflater.total_in() - before) as usize;
        input = &input[consumed..];
        match status {
            Status::StreamEnd => return Ok(true),
            Status::BufError if consumed == 0 => {
                return Err(PgScrubError::Corrupt("zlib stream stalled".to_string()))
            }
            _ => {}
        }
    }
    Ok(false)
}

/// Drain whatever the decompressor still holds after the terminal chunk.
/// Returns true if the stream reached its end marker.
fn inflate_finish(inflater: &mut Decompress, out: &mut Vec<u8>) -> Result<bool> {
    loop {
        if out.len() == out.capacity() {
            out.reserve(1024);
        }
        let status = inflater
            .decompress_vec(&[], out, FlushDecompress::Finish)
            .map_err(|e| PgScrubError::Corrupt(format!("zlib inflate failed: {}", e)))?;
        match status {
            Status::StreamEnd => return Ok(true),
            Status::BufError => return Ok(false),
            Status::Ok => continue,
        }
    }
}
