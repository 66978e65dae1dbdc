use std::io::{BufWriter, Cursor, Read, Write};

use crate::blocks::BlockEngine;
use crate::error::{PgScrubError, Result};
use crate::stream::PrefixReader;
use crate::toc::Dump;
use crate::transform::Transform;

/// Upstream read granularity while hunting for the end of the TOC.
const SCRATCH_CHUNK: usize = 8192;

/// Upper bound on the buffered header+TOC prefix. Real dumps stay well under
/// a few megabytes even for very large schemas.
const MAX_PREFIX: usize = 64 * 1024 * 1024;

/// Glues the pieces together: buffers the header+TOC off a non-seekable
/// upstream, copies that prefix verbatim downstream, then streams the data
/// blocks through the transformer.
pub struct Rewriter<T: Transform> {
    transform: T,
}

impl<T: Transform> Rewriter<T> {
    pub fn new(transform: T) -> Self {
        Self { transform }
    }

    /// Rewrite one custom-format dump from `reader` to `writer`.
    pub fn process<R: Read, W: Write>(&mut self, mut reader: R, writer: W) -> Result<()> {
        let mut writer = BufWriter::with_capacity(65536, writer);
        let mut scratch: Vec<u8> = Vec::with_capacity(SCRATCH_CHUNK);
        let mut chunk = [0u8; SCRATCH_CHUNK];

        // The TOC length is unknown up front: keep buffering upstream chunks
        // and retrying the parse until it stops running out of bytes.
        let (dump, consumed) = loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                // Upstream is exhausted. One final attempt, so that a real
                // parse error wins over UnexpectedEof.
                let mut cursor = Cursor::new(scratch.as_slice());
                let dump = Dump::parse(&mut cursor)?;
                break (dump, cursor.position() as usize);
            }
            scratch.extend_from_slice(&chunk[..n]);
            if scratch.len() > MAX_PREFIX {
                return Err(PgScrubError::Corrupt(format!(
                    "header and TOC exceed {} bytes",
                    MAX_PREFIX
                )));
            }
            let mut cursor = Cursor::new(scratch.as_slice());
            match Dump::parse(&mut cursor) {
                Ok(dump) => break (dump, cursor.position() as usize),
                Err(PgScrubError::UnexpectedEof) => continue,
                Err(e) => return Err(e),
            }
        };

        // The prefix is reproduced bit-exactly; only data blocks are rewritten.
        writer.write_all(&scratch[..consumed])?;
        writer.flush()?;

        let leftover = scratch.split_off(consumed);
        let mut input = PrefixReader::new(leftover, reader);

        let mut engine = BlockEngine::new(&dump, &mut self.transform);
        engine.process(&mut input, &mut writer)?;

        writer.flush()?;
        Ok(())
    }
}
