use std::io::{self, Read};

/// Caps reads from a parent reader at a declared byte budget.
///
/// Every length-framed record in an sFlow datagram hands its body to an
/// inner decoder through one of these. Reads never cross the budget; once
/// the budget is spent, reads return `Ok(0)` so the inner decoder observes
/// end-of-stream. On drop, whatever the inner decoder left unread is
/// drained from the parent, which therefore resumes exactly at the next
/// record boundary no matter how the inner decode went (success, error,
/// unknown tag).
pub(crate) struct BoundedReader<'a, R: Read> {
    inner: &'a mut R,
    remaining: u64,
}

impl<'a, R: Read> BoundedReader<'a, R> {
    pub fn new(inner: &'a mut R, limit: u64) -> Self {
        BoundedReader {
            inner,
            remaining: limit,
        }
    }

    #[cfg(test)]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<R: Read> Read for BoundedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }

        let max = self.remaining.min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl<R: Read> Drop for BoundedReader<'_, R> {
    fn drop(&mut self) {
        // Residual bytes belong to this record; discard them silently. A
        // parent that is itself truncated surfaces the problem on its own
        // next read, so errors here are not reported.
        let mut scratch = [0u8; 512];
        while self.remaining > 0 {
            let want = self.remaining.min(scratch.len() as u64) as usize;
            match self.inner.read(&mut scratch[..want]) {
                Ok(0) => break,
                Ok(n) => self.remaining -= n as u64,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}
