use std::io::{Error, ErrorKind, Result};
use std::sync::Mutex;

use redb::StorageBackend;

/// Growable, zero-filled in-memory backend for redb. Sync is a no-op, so
/// this is only suitable for tests and ephemeral stores.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    buf: Mutex<Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_usize(v: u64, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::new(ErrorKind::InvalidInput, format!("{what} too large")))
}

impl StorageBackend for MemoryBackend {
    fn len(&self) -> Result<u64> {
        let b = self.buf.lock().map_err(|_| ErrorKind::Other)?;
        Ok(b.len() as u64)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let b = self.buf.lock().map_err(|_| ErrorKind::Other)?;
        let off = to_usize(offset, "offset")?;
        let end = off
            .checked_add(len)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "length overflow"))?;
        if end > b.len() {
            return Err(Error::new(ErrorKind::UnexpectedEof, "read past end"));
        }
        Ok(b[off..end].to_vec())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        let mut b = self.buf.lock().map_err(|_| ErrorKind::Other)?;
        let new_len = to_usize(len, "len")?;
        b.resize(new_len, 0);
        Ok(())
    }

    fn sync_data(&self, _eventual: bool) -> Result<()> {
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut b = self.buf.lock().map_err(|_| ErrorKind::Other)?;
        let off = to_usize(offset, "offset")?;
        let end = off
            .checked_add(data.len())
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "length overflow"))?;
        if b.len() < end {
            b.resize(end, 0);
        }
        b[off..end].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let backend = MemoryBackend::new();
        backend.write(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.len().unwrap(), 4);
        assert_eq!(backend.read(0, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn gaps_are_zero_filled() {
        let backend = MemoryBackend::new();
        backend.write(2, &[9, 9]).unwrap();
        assert_eq!(backend.read(0, 4).unwrap(), vec![0, 0, 9, 9]);
    }

    #[test]
    fn read_past_end_is_an_error() {
        let backend = MemoryBackend::new();
        backend.write(0, &[1, 2]).unwrap();
        let err = backend.read(0, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
