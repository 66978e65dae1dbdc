use crate::error::Result;

/// Rewrite applied to the decompressed payload of every table-data block.
///
/// Implementations receive the complete COPY text for one table and return
/// the replacement bytes. The engine does not interpret the bytes; when the
/// input is well-formed UTF-8 the output must be too, or the rewritten dump
/// will not restore cleanly.
pub trait Transform {
    fn transform(&mut self, data: &[u8]) -> Result<Vec<u8>>;
}

impl<T: Transform + ?Sized> Transform for &mut T {
    fn transform(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        (**self).transform(data)
    }
}

/// Returns every payload unchanged. Useful for validating that a dump
/// survives the rewrite pipeline intact.
pub struct Identity;

impl Transform for Identity {
    fn transform(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}
