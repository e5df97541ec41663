use std::env;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "gray-stream")]
#[command(about = "Stream a video from remote storage through a grayscale re-encode")]
pub struct Args {
    /// Source object: local path, file:// or http(s):// (presigned for object stores)
    #[arg(short, long, env = "GRAY_STREAM_INPUT")]
    pub input: String,

    /// Destination object, same forms as --input
    #[arg(short, long, env = "GRAY_STREAM_OUTPUT")]
    pub output: String,

    /// Output container (FFmpeg muxer name)
    #[arg(short, long, default_value = "mp4")]
    pub format: String,

    /// Extra movflags for MP4-family containers, e.g. "default_base_moof"
    #[arg(long)]
    pub movflags: Option<String>,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long, default_value = "info")]
    pub log_level: log::LevelFilter,

    /// Print a JSON run summary on stdout
    #[arg(long)]
    pub json: bool,
}

/// Settings shared by every transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportConfig {
    token: Option<String>,
}

impl TransportConfig {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.map(str::to_string),
        }
    }

    /// `OBJECT_STORE_TOKEN`, sent as a bearer credential when set.
    pub fn from_env() -> Self {
        Self::new(env::var("OBJECT_STORE_TOKEN").ok().filter(|v| !v.is_empty()).as_deref())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}
