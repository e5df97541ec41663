//! HTTP object transport. Async reqwest workers on the runtime feed or drain
//! bounded channels that the blocking container side reads and writes.

use std::io::{self, Read, SeekFrom, Write};

use bytes::Bytes;
use ffmpeg_pipe::{ReadStream, WriteStream};
use futures::StreamExt;
use reqwest::{
    Client, StatusCode, Url,
    header::{ACCEPT_RANGES, RANGE},
};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;

/// Response chunks buffered ahead of the demuxer.
const CHUNK_QUEUE: usize = 16;
/// Upload chunks buffered ahead of the request body.
const UPLOAD_QUEUE: usize = 8;

type Chunk = io::Result<Bytes>;

fn status_error(method: &str, url: &Url, status: StatusCode) -> io::Error {
    let kind = match status {
        StatusCode::NOT_FOUND => io::ErrorKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => io::ErrorKind::PermissionDenied,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, format!("{} {} returned {}", method, url, status))
}

async fn get(client: &Client, url: &Url, token: Option<&str>, offset: u64) -> io::Result<reqwest::Response> {
    let mut req = client.get(url.clone());
    if offset > 0 {
        req = req.header(RANGE, format!("bytes={}-", offset));
    }
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.map_err(io::Error::other)?;
    let status = resp.status();
    let accepted = if offset > 0 {
        status == StatusCode::PARTIAL_CONTENT
    } else {
        status.is_success()
    };
    if !accepted {
        return Err(status_error("GET", url, status));
    }
    Ok(resp)
}

struct Body {
    rx: mpsc::Receiver<Chunk>,
    worker: JoinHandle<()>,
}

impl Body {
    fn spawn(handle: &Handle, resp: reqwest::Response) -> Self {
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
        let worker = handle.spawn(async move {
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(io::Error::other);
                let failed = chunk.is_err();
                if tx.send(chunk).await.is_err() || failed {
                    break;
                }
            }
        });
        Self { rx, worker }
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Streams a GET response body. Seeking re-issues a ranged GET and is only
/// offered when the server advertises `Accept-Ranges: bytes` and a length.
pub struct HttpReader {
    client: Client,
    url: Url,
    token: Option<String>,
    handle: Handle,
    body: Option<Body>,
    pending: Bytes,
    pos: u64,
    len: Option<u64>,
    ranges: bool,
    closed: bool,
}

impl HttpReader {
    pub async fn open(client: Client, url: Url, token: Option<&str>) -> io::Result<Self> {
        let handle = Handle::current();
        let resp = get(&client, &url, token, 0).await?;
        let ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let len = resp.content_length();
        log::info!(
            "GET {}: {} bytes, ranges={}",
            url,
            len.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
            ranges
        );
        let body = Body::spawn(&handle, resp);
        Ok(Self {
            client,
            url,
            token: token.map(str::to_string),
            handle,
            body: Some(body),
            pending: Bytes::new(),
            pos: 0,
            len,
            ranges,
            closed: false,
        })
    }

    fn reopen(&mut self, offset: u64) -> io::Result<()> {
        self.body = None;
        self.pending = Bytes::new();
        self.pos = offset;
        if self.len.is_some_and(|len| offset >= len) {
            return Ok(());
        }
        log::debug!("GET {} from byte {}", self.url, offset);
        let resp = self.handle.block_on(get(
            &self.client,
            &self.url,
            self.token.as_deref(),
            offset,
        ))?;
        self.body = Some(Body::spawn(&self.handle, resp));
        Ok(())
    }
}

impl Read for HttpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "http reader closed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            let Some(body) = self.body.as_mut() else {
                return Ok(0);
            };
            match body.rx.blocking_recv() {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => return Err(e),
                None => {
                    self.body = None;
                    return Ok(0);
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        self.pos += n as u64;
        Ok(n)
    }
}

impl ReadStream for HttpReader {
    fn seekable(&self) -> bool {
        self.ranges && self.len.is_some()
    }

    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let Some(len) = self.len.filter(|_| self.ranges) else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "server does not support range requests",
            ));
        };
        let next = match target {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::Current(d) => self.pos as i128 + d as i128,
            SeekFrom::End(d) => len as i128 + d as i128,
        };
        if next < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        let next = next as u64;
        if next == self.pos {
            return Ok(next);
        }
        // Short forward skips stay inside the chunk already received.
        if next > self.pos && next - self.pos <= self.pending.len() as u64 {
            let _ = self.pending.split_to((next - self.pos) as usize);
            self.pos = next;
            return Ok(next);
        }
        self.reopen(next)?;
        Ok(next)
    }

    fn len(&self) -> Option<u64> {
        self.len
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.body = None;
        self.pending = Bytes::new();
        Ok(())
    }
}

/// Streams a chunked PUT. The object is committed when `close` sees a
/// successful response; `abort` drops the request mid-body instead.
pub struct HttpWriter {
    url: Url,
    handle: Handle,
    tx: Option<mpsc::Sender<Chunk>>,
    upload: Option<JoinHandle<io::Result<()>>>,
    written: u64,
}

impl HttpWriter {
    /// Must be called from within the runtime that will drive the upload.
    pub fn open(client: Client, url: Url, token: Option<&str>) -> Self {
        let handle = Handle::current();
        let (tx, rx) = mpsc::channel(UPLOAD_QUEUE);
        let mut req = client
            .put(url.clone())
            .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let target = url.clone();
        let upload = handle.spawn(async move {
            let resp = req.send().await.map_err(io::Error::other)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(status_error("PUT", &target, status));
            }
            Ok(())
        });
        Self {
            url,
            handle,
            tx: Some(tx),
            upload: Some(upload),
            written: 0,
        }
    }

    /// End the body and wait for the response.
    fn finish(&mut self) -> io::Result<()> {
        self.tx = None;
        let Some(upload) = self.upload.take() else {
            return Ok(());
        };
        match self.handle.block_on(upload) {
            Ok(result) => result,
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

impl Write for HttpWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "upload closed"));
        };
        if buf.is_empty() {
            return Ok(0);
        }
        if tx.blocking_send(Ok(Bytes::copy_from_slice(buf))).is_err() {
            // The request ended before the body did; report why.
            return Err(match self.finish() {
                Err(e) => e,
                Ok(()) => io::Error::new(io::ErrorKind::BrokenPipe, "upload ended early"),
            });
        }
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteStream for HttpWriter {
    fn seekable(&self) -> bool {
        false
    }

    fn close(&mut self) -> io::Result<()> {
        if self.upload.is_none() {
            return Ok(());
        }
        self.finish()?;
        log::info!("PUT {}: {} bytes committed", self.url, self.written);
        Ok(())
    }

    fn abort(&mut self) {
        let Some(upload) = self.upload.take() else {
            return;
        };
        // A failed body chunk keeps the server from seeing a complete request.
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send(Err(io::Error::other("upload aborted")));
        }
        upload.abort();
        log::warn!("PUT {} aborted after {} bytes", self.url, self.written);
    }
}

impl Drop for HttpWriter {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
#[path = "http_test.rs"]
mod http_test;
