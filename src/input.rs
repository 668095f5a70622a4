//! Hydrological model snapshots: the per-timestep input of the tracker.
//!
//! A snapshot file holds one row per link (discharge, three water columns
//! and the cumulative rain column) encoded with bincode. Its timestamp is the
//! integer after the last `_` of the file stem, e.g. `basin_1500000600.bin`.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::network::LinkId;
use crate::particle::Timestamp;

/// Model output for one link at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub link: LinkId,
    /// Channel discharge [m³/s].
    pub discharge: f64,
    /// Water column stored in ponds [m].
    pub pond_wc: f64,
    /// Water column stored in the top soil layer [m].
    pub top_layer_wc: f64,
    /// Water column stored in the subsurface [m].
    pub subsurface_wc: f64,
    /// Rain water column accumulated since the start of the model run [m].
    pub rain_wc: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFrame {
    pub timestamp: Timestamp,
    pub rows: Vec<SnapshotRow>,
}

/// Time-ordered provider of snapshot frames.
pub trait SnapshotSource {
    /// Next frame, or `None` once the sequence is exhausted.
    fn next_frame(&mut self) -> Result<Option<SnapshotFrame>>;

    /// Frames left, when known.
    fn remaining(&self) -> Option<usize> { None }
}

// ---------------------------------------------------------------------------
// File-backed sequence
// ---------------------------------------------------------------------------

/// All frame files sitting next to a start file, in ascending timestamp order.
#[derive(Debug)]
pub struct FileSequence {
    files: VecDeque<(Timestamp, PathBuf)>,
}

impl FileSequence {
    /// Lists the files sharing `start`'s prefix (text before the first `_`)
    /// and extension in `start`'s directory.
    pub fn discover(start: &Path) -> Result<Self> {
        if !start.is_file() {
            return Err(Error::MissingInputFile { path: start.to_path_buf() });
        }
        let dir = match start.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let start_name = start.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let prefix = match start_name.split_once('_') {
            Some((head, _)) => format!("{head}_"),
            None => {
                return Err(Error::FileName {
                    path: start.to_path_buf(),
                    reason: "file name carries no '_<timestamp>' suffix".into(),
                });
            }
        };
        let extension = start.extension().map(|e| e.to_os_string());

        let mut files = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| Error::io(&dir, e))?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !path.is_file() || !name.starts_with(&prefix) || path.extension().map(|e| e.to_os_string()) != extension {
                continue;
            }
            match timestamp_from_path(&path) {
                Ok(t) => files.push((t, path)),
                Err(_) => warn!(path = %path.display(), "skipping file without a timestamp suffix"),
            }
        }
        if files.is_empty() {
            return Err(Error::EmptySequence { path: start.to_path_buf() });
        }
        files.sort();
        info!(dir = %dir.display(), frames = files.len(), "snapshot sequence discovered");
        Ok(Self { files: files.into() })
    }

    pub fn len(&self) -> usize { self.files.len() }

    pub fn is_empty(&self) -> bool { self.files.is_empty() }

    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.files.iter().map(|(t, _)| *t).collect()
    }
}

impl SnapshotSource for FileSequence {
    fn next_frame(&mut self) -> Result<Option<SnapshotFrame>> {
        match self.files.pop_front() {
            Some((_, path)) => read_frame(&path).map(Some),
            None => Ok(None),
        }
    }

    fn remaining(&self) -> Option<usize> { Some(self.files.len()) }
}

/// Integer after the last `_` of the file stem.
pub fn timestamp_from_path(path: &Path) -> Result<Timestamp> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let suffix = stem.rsplit('_').next().unwrap_or_default();
    suffix
        .parse::<Timestamp>()
        .map_err(|_| Error::FileName {
            path: path.to_path_buf(),
            reason: format!("no integer timestamp in file name (found '{suffix}')"),
        })
}

pub fn read_frame(path: &Path) -> Result<SnapshotFrame> {
    let timestamp = timestamp_from_path(path)?;
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let rows: Vec<SnapshotRow> = bincode::deserialize_from(BufReader::new(file))
        .map_err(|source| Error::Codec { path: path.to_path_buf(), source })?;
    Ok(SnapshotFrame { timestamp, rows })
}

/// Encodes `rows` in the layout `read_frame` expects.
pub fn write_frame(path: &Path, rows: &[SnapshotRow]) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    bincode::serialize_into(BufWriter::new(file), rows)
        .map_err(|source| Error::Codec { path: path.to_path_buf(), source })
}

// ---------------------------------------------------------------------------
// In-memory sequence
// ---------------------------------------------------------------------------

/// Frames held in memory, for drivers that produce snapshots themselves.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<SnapshotFrame>,
}

impl MemorySource {
    pub fn new(frames: Vec<SnapshotFrame>) -> Self {
        Self { frames: frames.into() }
    }
}

impl SnapshotSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<SnapshotFrame>> {
        Ok(self.frames.pop_front())
    }

    fn remaining(&self) -> Option<usize> { Some(self.frames.len()) }
}
