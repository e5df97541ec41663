//! Custom FFmpeg I/O contexts over [`ReadStream`] and [`WriteStream`].
//!
//! The container library calls back into these from inside demux/mux calls.
//! Transport errors raised in a callback are parked in the callback state and
//! picked up by the caller with `take_error`, since FFmpeg itself only sees an
//! opaque error code.

use std::{
    ffi::c_void,
    io::{self, SeekFrom},
    os::raw::c_int,
    ptr,
};

use ffmpeg_next::ffi;

use crate::io::{ReadStream, WriteStream};

const BUFFER_SIZE: usize = 64 * 1024;

const AVSEEK_SIZE: c_int = 0x10000;
const AVSEEK_FORCE: c_int = 0x20000;
const SEEK_SET: c_int = 0;
const SEEK_CUR: c_int = 1;
const SEEK_END: c_int = 2;

fn seek_target(offset: i64, whence: c_int) -> Option<SeekFrom> {
    match whence & !AVSEEK_FORCE {
        SEEK_SET => Some(SeekFrom::Start(offset.max(0) as u64)),
        SEEK_CUR => Some(SeekFrom::Current(offset)),
        SEEK_END => Some(SeekFrom::End(offset)),
        _ => None,
    }
}

unsafe fn alloc_context(
    opaque: *mut c_void,
    write: bool,
    read_packet: Option<unsafe extern "C" fn(*mut c_void, *mut u8, c_int) -> c_int>,
    write_packet: Option<unsafe extern "C" fn(*mut c_void, *const u8, c_int) -> c_int>,
    seek: Option<unsafe extern "C" fn(*mut c_void, i64, c_int) -> i64>,
) -> io::Result<*mut ffi::AVIOContext> {
    unsafe {
        let buffer = ffi::av_malloc(BUFFER_SIZE) as *mut u8;
        if buffer.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "avio buffer allocation failed",
            ));
        }
        let ctx = ffi::avio_alloc_context(
            buffer,
            BUFFER_SIZE as c_int,
            write as c_int,
            opaque,
            read_packet,
            write_packet,
            seek,
        );
        if ctx.is_null() {
            ffi::av_free(buffer as *mut c_void);
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "avio context allocation failed",
            ));
        }
        Ok(ctx)
    }
}

unsafe fn free_context(ctx: &mut *mut ffi::AVIOContext) {
    unsafe {
        if ctx.is_null() {
            return;
        }
        // FFmpeg may have swapped the buffer; free whatever the context holds now.
        ffi::av_freep(&mut (**ctx).buffer as *mut *mut u8 as *mut c_void);
        ffi::avio_context_free(ctx);
        *ctx = ptr::null_mut();
    }
}

struct ReaderState {
    stream: Box<dyn ReadStream>,
    /// Byte offset of the next read.
    pos: u64,
    error: Option<io::Error>,
    closed: bool,
}

unsafe extern "C" fn read_source(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    let state = unsafe { &mut *(opaque as *mut ReaderState) };
    if buf_size <= 0 {
        return 0;
    }
    let out = unsafe { std::slice::from_raw_parts_mut(buf, buf_size as usize) };
    loop {
        match state.stream.read(out) {
            Ok(0) => match state.stream.len() {
                // The object announced more bytes than it delivered.
                Some(len) if state.pos < len => {
                    state.error = Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("source ended at byte {} of {}", state.pos, len),
                    ));
                    return ffi::AVERROR_EXTERNAL;
                }
                _ => return ffi::AVERROR_EOF,
            },
            Ok(n) => {
                state.pos += n as u64;
                return n as c_int;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                state.error = Some(e);
                return ffi::AVERROR_EXTERNAL;
            }
        }
    }
}

unsafe extern "C" fn seek_source(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let state = unsafe { &mut *(opaque as *mut ReaderState) };
    if whence & AVSEEK_SIZE != 0 {
        return state.stream.len().map(|n| n as i64).unwrap_or(-1);
    }
    let Some(target) = seek_target(offset, whence) else {
        return -1;
    };
    match state.stream.seek(target) {
        Ok(pos) => {
            state.pos = pos;
            pos as i64
        }
        Err(e) => {
            log::debug!("source seek to {:?} failed: {}", target, e);
            -1
        }
    }
}

/// Read-side I/O context owning the source stream.
pub struct AvioReader {
    ctx: *mut ffi::AVIOContext,
    state: *mut ReaderState,
}

unsafe impl Send for AvioReader {}

impl AvioReader {
    pub fn new(stream: Box<dyn ReadStream>) -> io::Result<Self> {
        let seek = if stream.seekable() {
            Some(seek_source as unsafe extern "C" fn(*mut c_void, i64, c_int) -> i64)
        } else {
            None
        };
        let state = Box::into_raw(Box::new(ReaderState {
            stream,
            pos: 0,
            error: None,
            closed: false,
        }));
        match unsafe { alloc_context(state as *mut c_void, false, Some(read_source), None, seek) } {
            Ok(ctx) => Ok(Self { ctx, state }),
            Err(e) => {
                let mut state = unsafe { Box::from_raw(state) };
                let _ = state.stream.close();
                Err(e)
            }
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut ffi::AVIOContext {
        self.ctx
    }

    /// The transport error behind the last failed read, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        unsafe { (*self.state).error.take() }
    }

    pub fn close(&mut self) -> io::Result<()> {
        let state = unsafe { &mut *self.state };
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.stream.close()
    }
}

impl Drop for AvioReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("source close on drop failed: {}", e);
        }
        unsafe {
            free_context(&mut self.ctx);
            drop(Box::from_raw(self.state));
        }
    }
}

struct WriterState {
    stream: Box<dyn WriteStream>,
    error: Option<io::Error>,
    closed: bool,
}

unsafe extern "C" fn write_sink(opaque: *mut c_void, buf: *const u8, buf_size: c_int) -> c_int {
    let state = unsafe { &mut *(opaque as *mut WriterState) };
    if buf_size <= 0 {
        return 0;
    }
    let data = unsafe { std::slice::from_raw_parts(buf, buf_size as usize) };
    match state.stream.write_all(data) {
        Ok(()) => buf_size,
        Err(e) => {
            state.error = Some(e);
            ffi::AVERROR_EXTERNAL
        }
    }
}

unsafe extern "C" fn seek_sink(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let state = unsafe { &mut *(opaque as *mut WriterState) };
    if whence & AVSEEK_SIZE != 0 {
        return -1;
    }
    let Some(target) = seek_target(offset, whence) else {
        return -1;
    };
    match state.stream.seek(target) {
        Ok(pos) => pos as i64,
        Err(e) => {
            state.error = Some(e);
            ffi::AVERROR_EXTERNAL as i64
        }
    }
}

/// Write-side I/O context owning the destination stream. A seek callback is
/// only installed when the stream reports itself seek-capable.
pub struct AvioWriter {
    ctx: *mut ffi::AVIOContext,
    state: *mut WriterState,
    seekable: bool,
}

unsafe impl Send for AvioWriter {}

impl AvioWriter {
    pub fn new(stream: Box<dyn WriteStream>) -> io::Result<Self> {
        let seekable = stream.seekable();
        let seek = if seekable {
            Some(seek_sink as unsafe extern "C" fn(*mut c_void, i64, c_int) -> i64)
        } else {
            None
        };
        let state = Box::into_raw(Box::new(WriterState {
            stream,
            error: None,
            closed: false,
        }));
        match unsafe { alloc_context(state as *mut c_void, true, None, Some(write_sink), seek) } {
            Ok(ctx) => Ok(Self {
                ctx,
                state,
                seekable,
            }),
            Err(e) => {
                let mut state = unsafe { Box::from_raw(state) };
                state.stream.abort();
                Err(e)
            }
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut ffi::AVIOContext {
        self.ctx
    }

    pub fn seekable(&self) -> bool {
        self.seekable
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        unsafe { (*self.state).error.take() }
    }

    /// Push buffered bytes down to the transport.
    pub fn flush(&mut self) -> io::Result<()> {
        unsafe { ffi::avio_flush(self.ctx) };
        if let Some(e) = self.take_error() {
            return Err(e);
        }
        let state = unsafe { &mut *self.state };
        state.stream.flush()
    }

    /// Flush and finalize the destination object.
    pub fn close(&mut self) -> io::Result<()> {
        if unsafe { (*self.state).closed } {
            return Ok(());
        }
        let flushed = self.flush();
        let state = unsafe { &mut *self.state };
        state.closed = true;
        match flushed {
            Ok(()) => state.stream.close(),
            Err(e) => {
                state.stream.abort();
                Err(e)
            }
        }
    }

    /// Release the destination without finalizing it.
    pub fn abort(&mut self) {
        let state = unsafe { &mut *self.state };
        if state.closed {
            return;
        }
        state.closed = true;
        state.stream.abort();
    }
}

impl Drop for AvioWriter {
    fn drop(&mut self) {
        self.abort();
        unsafe {
            free_context(&mut self.ctx);
            drop(Box::from_raw(self.state));
        }
    }
}
