//! Error kinds surfaced by the transcode pipeline.

use std::fmt;

use crate::stream::MediaKind;

/// Which byte stream a transport failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Destination => write!(f, "destination"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Source is not a recognised container or lacks a required stream.
    #[error("container open failed: {reason}")]
    ContainerOpen { reason: String },

    /// Malformed container data that cannot be attributed to one stream.
    #[error("demux failed: {reason}")]
    Demux { reason: String },

    #[error("{stream} decode failed: {reason}")]
    Decode { stream: MediaKind, reason: String },

    #[error("{stream} encode failed: {reason}")]
    Encode { stream: MediaKind, reason: String },

    #[error("{side} transport error: {source}")]
    Transport {
        side: Side,
        #[source]
        source: std::io::Error,
    },

    /// Container-level write failure that did not originate in the transport.
    #[error("mux failed: {reason}")]
    Mux { reason: String },

    #[error("pipeline cancelled")]
    Cancelled,
}

impl PipeError {
    pub fn container_open(reason: impl fmt::Display) -> Self {
        Self::ContainerOpen {
            reason: reason.to_string(),
        }
    }

    pub fn demux(reason: impl fmt::Display) -> Self {
        Self::Demux {
            reason: reason.to_string(),
        }
    }

    pub fn decode(stream: MediaKind, reason: impl fmt::Display) -> Self {
        Self::Decode {
            stream,
            reason: reason.to_string(),
        }
    }

    pub fn encode(stream: MediaKind, reason: impl fmt::Display) -> Self {
        Self::Encode {
            stream,
            reason: reason.to_string(),
        }
    }

    pub fn transport(side: Side, source: std::io::Error) -> Self {
        Self::Transport { side, source }
    }

    pub fn mux(reason: impl fmt::Display) -> Self {
        Self::Mux {
            reason: reason.to_string(),
        }
    }

    /// Stable label for logs and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContainerOpen { .. } => "container_open",
            Self::Demux { .. } => "demux",
            Self::Decode { .. } => "decode",
            Self::Encode { .. } => "encode",
            Self::Transport { .. } => "transport",
            Self::Mux { .. } => "mux",
            Self::Cancelled => "cancelled",
        }
    }

    /// The stream this error is attributed to, if any.
    pub fn stream(&self) -> Option<MediaKind> {
        match self {
            Self::Decode { stream, .. } | Self::Encode { stream, .. } => Some(*stream),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipeError>;
