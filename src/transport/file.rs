use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use ffmpeg_pipe::{ReadStream, WriteStream};

pub struct FileReader {
    inner: Option<BufReader<File>>,
    len: u64,
}

impl FileReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            inner: Some(BufReader::new(file)),
            len,
        })
    }

    fn file(&mut self) -> io::Result<&mut BufReader<File>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file reader closed"))
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file()?.read(buf)
    }
}

impl ReadStream for FileReader {
    fn seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file()?.seek(pos)
    }

    fn len(&self) -> Option<u64> {
        Some(self.len)
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.take();
        Ok(())
    }
}

/// Writes to `<path>.part` and renames over `path` on close, so an aborted
/// run never leaves a truncated object at the destination.
pub struct FileWriter {
    inner: Option<BufWriter<File>>,
    path: PathBuf,
    part: PathBuf,
}

impl FileWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut part = path.as_os_str().to_owned();
        part.push(".part");
        let part = PathBuf::from(part);
        let file = File::create(&part)?;
        Ok(Self {
            inner: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            part,
        })
    }

    fn file(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file writer closed"))
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl WriteStream for FileWriter {
    fn seekable(&self) -> bool {
        false
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(writer) = self.inner.take() else {
            return Ok(());
        };
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.part, &self.path)
    }

    fn abort(&mut self) {
        if self.inner.take().is_none() {
            return;
        }
        if let Err(e) = fs::remove_file(&self.part) {
            log::warn!("remove {}: {}", self.part.display(), e);
        }
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        self.abort();
    }
}
