//! Byte-stream contract between a remote object transport and the container layer.
//!
//! Both sides are blocking: the container library pulls and pushes bytes from
//! inside its own calls, so implementations backed by async clients bridge over
//! channels and must not be driven from an async task.

use std::io::{self, Read, SeekFrom, Write};

/// Sequentially readable source object.
pub trait ReadStream: Read + Send {
    /// Whether `seek` may be called. Demuxers for containers with a trailing
    /// index need this.
    fn seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source stream is not seekable",
        ))
    }

    /// Total object size, when known.
    fn len(&self) -> Option<u64> {
        None
    }

    /// Release the underlying object. Must be safe before the stream is drained.
    fn close(&mut self) -> io::Result<()>;
}

/// Sequentially writable destination object.
pub trait WriteStream: Write + Send {
    /// Whether the container writer may seek backwards. Destinations opened
    /// for streaming writes report `false` even when the backing store could
    /// technically rewind, since bytes already sent cannot be patched.
    fn seekable(&self) -> bool;

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "destination stream is not seekable",
        ))
    }

    /// Finalize the remote object. The object is not guaranteed to exist
    /// before this returns.
    fn close(&mut self) -> io::Result<()>;

    /// Release the stream after a failure without committing the object where
    /// the transport can avoid it.
    fn abort(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("destination close during abort failed: {}", e);
        }
    }
}
