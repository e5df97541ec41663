//! Byte-stream transports for source and destination objects.

use std::{fmt, path::PathBuf};

use anyhow::Context;
use ffmpeg_pipe::{ReadStream, WriteStream};
use reqwest::Url;

use crate::config::TransportConfig;

const S3_SCHEME_HINT: &str =
    "s3:// locations are not supported; pass a presigned https:// URL for the object instead";

mod file;
mod http;

pub use file::{FileReader, FileWriter};
pub use http::{HttpReader, HttpWriter};

/// Where an object lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Http(Url),
}

impl Location {
    /// Object stores are reached through presigned `http(s)://` URLs.
    pub fn parse(location: &str) -> anyhow::Result<Self> {
        if let Some(path) = location.strip_prefix("file://") {
            return Ok(Location::File(PathBuf::from(path)));
        }
        if location.starts_with("s3://") {
            anyhow::bail!("{}: {}", S3_SCHEME_HINT, location);
        }
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = Url::parse(location).with_context(|| format!("invalid url {}", location))?;
            return Ok(Location::Http(url));
        }
        if location.contains("://") {
            anyhow::bail!("unsupported location scheme: {}", location);
        }
        if location.is_empty() {
            anyhow::bail!("empty location");
        }
        Ok(Location::File(PathBuf::from(location)))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File(path) => write!(f, "{}", path.display()),
            Location::Http(url) => write!(f, "{}", url),
        }
    }
}

/// Opens transports for parsed locations. Readers and writers talk to async
/// workers on the current runtime and must be used from a blocking thread.
pub struct Transports {
    config: TransportConfig,
    client: reqwest::Client,
}

impl Transports {
    pub fn new(config: TransportConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("build http client")?;
        Ok(Self { config, client })
    }

    pub async fn open_read(&self, location: &Location) -> anyhow::Result<Box<dyn ReadStream>> {
        match location {
            Location::File(path) => Ok(Box::new(FileReader::open(path)?)),
            Location::Http(url) => {
                let reader =
                    HttpReader::open(self.client.clone(), url.clone(), self.config.token()).await?;
                Ok(Box::new(reader))
            }
        }
    }

    /// Destination streams are never seek-capable.
    pub async fn open_write(&self, location: &Location) -> anyhow::Result<Box<dyn WriteStream>> {
        match location {
            Location::File(path) => Ok(Box::new(FileWriter::create(path)?)),
            Location::Http(url) => Ok(Box::new(HttpWriter::open(
                self.client.clone(),
                url.clone(),
                self.config.token(),
            ))),
        }
    }
}
