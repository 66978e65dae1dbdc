use std::cmp;
use std::io::{self, Read};

/// Reader that drains a buffered prefix before falling through to the
/// underlying stream.
///
/// The header parser reads upstream in chunks and usually overshoots into the
/// first data block; the overshoot becomes the prefix here so the block engine
/// sees one continuous stream. A single `read` may return bytes from both
/// sources: once the prefix is exhausted mid-call, the remainder of the buffer
/// is refilled from the inner reader until it is full or the inner reader hits
/// end-of-stream.
pub struct PrefixReader<R> {
    prefix: Vec<u8>,
    pos: usize,
    inner: R,
}

impl<R: Read> PrefixReader<R> {
    pub fn new(prefix: Vec<u8>, inner: R) -> Self {
        Self {
            prefix,
            pos: 0,
            inner,
        }
    }
}

impl<R: Read> Read for PrefixReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;

        if self.pos < self.prefix.len() {
            let n = cmp::min(buf.len(), self.prefix.len() - self.pos);
            buf[..n].copy_from_slice(&self.prefix[self.pos..self.pos + n]);
            self.pos += n;
            filled = n;
            if self.pos == self.prefix.len() {
                self.prefix = Vec::new();
                self.pos = 0;
            }
        }

        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if filled == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }

        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_crosses_boundary() {
        let inner: &[u8] = b"world";
        let mut reader = PrefixReader::new(b"hello ".to_vec(), inner);
        let mut buf = [0u8; 11];
        assert_eq!(reader.read(&mut buf).unwrap(), 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn empty_prefix() {
        let inner: &[u8] = b"abc";
        let mut reader = PrefixReader::new(Vec::new(), inner);
        let mut buf = [0u8; 3];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn eof_after_both_drained() {
        let inner: &[u8] = b"b";
        let mut reader = PrefixReader::new(b"a".to_vec(), inner);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn small_reads_stay_in_prefix() {
        let inner: &[u8] = b"xyz";
        let mut reader = PrefixReader::new(b"ab".to_vec(), inner);
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'a');
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'b');
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'x');
    }
}
