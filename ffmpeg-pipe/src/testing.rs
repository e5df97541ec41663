//! In-memory transports for tests.

use std::io::{self, Read, SeekFrom, Write};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::io::{ReadStream, WriteStream};

#[derive(Default)]
struct Calls {
    close: AtomicUsize,
    abort: AtomicUsize,
    seek: AtomicUsize,
}

/// Readable object over a byte vector. Clones share position and counters.
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<Vec<u8>>,
    pos: Arc<Mutex<usize>>,
    seekable: bool,
    fail_after: Option<usize>,
    end_at: Option<usize>,
    calls: Arc<Calls>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            pos: Arc::new(Mutex::new(0)),
            seekable: true,
            fail_after: None,
            end_at: None,
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn sequential(mut self) -> Self {
        self.seekable = false;
        self
    }

    /// Fail every read once `bytes` bytes have been delivered.
    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    /// Report end of stream after `bytes` bytes while `len()` still
    /// announces the full object.
    pub fn end_at(mut self, bytes: usize) -> Self {
        self.end_at = Some(bytes);
        self
    }

    pub fn close_calls(&self) -> usize {
        self.calls.close.load(Ordering::SeqCst)
    }
}

impl Read for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pos = self.pos.lock().unwrap();
        let mut end = self.data.len();
        if let Some(limit) = self.fail_after {
            if *pos >= limit {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection dropped",
                ));
            }
            end = end.min(limit);
        }
        if let Some(limit) = self.end_at {
            end = end.min(limit);
        }
        let n = buf.len().min(end.saturating_sub(*pos));
        buf[..n].copy_from_slice(&self.data[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }
}

impl ReadStream for MemorySource {
    fn seekable(&self) -> bool {
        self.seekable
    }

    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        self.calls.seek.fetch_add(1, Ordering::SeqCst);
        let mut pos = self.pos.lock().unwrap();
        let next = match target {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => *pos as i64 + d,
            SeekFrom::End(d) => self.data.len() as i64 + d,
        };
        if next < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        *pos = next as usize;
        Ok(next as u64)
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn close(&mut self) -> io::Result<()> {
        self.calls.close.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Writable object collecting bytes in memory; never seek-capable.
#[derive(Clone)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
    fail_after: Option<usize>,
    calls: Arc<Calls>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(Vec::new())),
            fail_after: None,
            calls: Arc::new(Calls::default()),
        }
    }

    /// Reject writes once `bytes` bytes have been accepted.
    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    /// Close and abort calls together: each releases the transport.
    pub fn close_calls(&self) -> usize {
        self.calls.close.load(Ordering::SeqCst) + self.calls.abort.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> usize {
        self.calls.abort.load(Ordering::SeqCst)
    }

    pub fn seek_calls(&self) -> usize {
        self.calls.seek.load(Ordering::SeqCst)
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.lock().unwrap();
        if let Some(limit) = self.fail_after {
            if data.len() + buf.len() > limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "upload rejected"));
            }
        }
        data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteStream for MemorySink {
    fn seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        self.calls.seek.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "destination stream is not seekable",
        ))
    }

    fn close(&mut self) -> io::Result<()> {
        self.calls.close.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&mut self) {
        self.calls.abort.fetch_add(1, Ordering::SeqCst);
    }
}
