use std::io::{self, Read};

/// A primitive read that failed, tagged with the wire field being decoded.
///
/// The field name is purely diagnostic; nothing dispatches on it.
#[derive(Debug, thiserror::Error)]
#[error("failed to read {field:?}: {source}")]
pub struct FieldError {
    pub field: &'static str,
    #[source]
    pub source: io::Error,
}

impl FieldError {
    pub(crate) fn new(field: &'static str, source: io::Error) -> Self {
        FieldError { field, source }
    }

    pub(crate) fn eof(field: &'static str) -> Self {
        FieldError::new(field, io::ErrorKind::UnexpectedEof.into())
    }
}

/// Field-scoped big-endian reads, the primitives every level of the
/// descent is built from.
pub(crate) trait ReadExt: Read {
    fn read_u8(&mut self, field: &'static str) -> Result<u8, FieldError> {
        Ok(self.read_bytes::<1>(field)?[0])
    }

    fn read_u16(&mut self, field: &'static str) -> Result<u16, FieldError> {
        Ok(u16::from_be_bytes(self.read_bytes(field)?))
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, FieldError> {
        Ok(u32::from_be_bytes(self.read_bytes(field)?))
    }

    fn read_u64(&mut self, field: &'static str) -> Result<u64, FieldError> {
        Ok(u64::from_be_bytes(self.read_bytes(field)?))
    }

    fn read_bytes<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], FieldError> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)
            .map_err(|source| FieldError::new(field, source))?;
        Ok(buf)
    }

    /// Read and discard exactly `count` bytes.
    fn skip(&mut self, count: u64, field: &'static str) -> Result<(), FieldError> {
        let mut remaining = count;
        let mut scratch = [0u8; 64];
        while remaining > 0 {
            let want = remaining.min(scratch.len() as u64) as usize;
            match self.read(&mut scratch[..want]) {
                Ok(0) => return Err(FieldError::eof(field)),
                Ok(n) => remaining -= n as u64,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(FieldError::new(field, source)),
            }
        }
        Ok(())
    }
}

impl<T> ReadExt for T where T: Read {}
