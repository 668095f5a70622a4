//! Crate errors

use std::path::PathBuf;

use thiserror::Error;

use crate::network::LinkId;
use crate::particle::{Layer, Timestamp};

/// Crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop a tracking run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("input file not found: {}", path.display())]
    MissingInputFile { path: PathBuf },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("inconsistent topology: {message}")]
    InconsistentTopology { message: String },

    #[error("degenerate hydraulic state at link {link}, {layer} layer, t={timestamp}: {detail}")]
    DegenerateHydraulicState {
        link: LinkId,
        layer: Layer,
        timestamp: Timestamp,
        detail: String,
    },

    #[error("outlet link {outlet} missing from snapshot at t={timestamp}")]
    MissingOutlet { outlet: LinkId, timestamp: Timestamp },

    #[error("ambiguous seeding: {0}")]
    AmbiguousSeeding(String),

    #[error("link {link} is not part of the network ({context})")]
    UnknownLink { link: LinkId, context: String },

    #[error("frame t={timestamp} has no hydraulic row for link {link}")]
    IncompleteFrame { link: LinkId, timestamp: Timestamp },

    #[error("no snapshot frames found next to {}", path.display())]
    EmptySequence { path: PathBuf },

    #[error("{}: {reason}", path.display())]
    FileName { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid json in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("binary codec error on {}: {source}", path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::MissingInputFile { path }
        } else {
            Error::Io { path, source }
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
