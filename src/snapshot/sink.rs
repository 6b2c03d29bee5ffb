use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};
use crate::memory::Graph;
use crate::snapshot::{self, ConflictPolicy, ImportReport, FORMAT_VERSION};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// The companion metadata written beside each snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkMetadata {
    pub vertex_count: u64,
    pub edge_count: u64,
    pub byte_size: u64,
    pub format_version: u64,
    pub compressed: bool,
}

/// A file-backed snapshot sink: one document per file, optionally
/// gzip-wrapped, with a `<file>.meta.json` companion carrying element
/// counts, byte size, and the format version.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    path: PathBuf,
    compress: bool,
}

impl SnapshotSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            compress: false,
        }
    }

    /// A sink that gzip-wraps the document bytes.
    pub fn compressed<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            compress: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    fn meta_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".meta.json");
        PathBuf::from(name)
    }

    /// Writes the graph's snapshot document to the sink file, then its
    /// metadata companion. Both writes go through a temporary file and a
    /// rename.
    pub fn save(&self, graph: &Graph) -> Result<SinkMetadata> {
        let mut document = Vec::new();
        snapshot::write(graph, &mut document)?;

        let bytes = if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&document)?;
            encoder.finish()?
        } else {
            document
        };

        let metadata = SinkMetadata {
            vertex_count: graph.vertex_count(),
            edge_count: graph.edge_count(),
            byte_size: bytes.len() as u64,
            format_version: FORMAT_VERSION,
            compressed: self.compress,
        };

        persist_bytes(&self.path, &bytes)?;
        let meta_bytes = serde_json::to_vec(&metadata)
            .map_err(|err| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
        persist_bytes(&self.meta_path(), &meta_bytes)?;

        Ok(metadata)
    }

    /// Reads the sink file back into `graph` under the given conflict
    /// policy (or the graph's configured default).
    pub fn load(&self, graph: &Graph, policy: Option<ConflictPolicy>) -> Result<ImportReport> {
        let file = BufReader::new(File::open(&self.path)?);
        if self.compress {
            snapshot::read(graph, GzDecoder::new(file), policy)
        } else {
            snapshot::read(graph, file, policy)
        }
    }

    /// Reads the metadata companion.
    pub fn metadata(&self) -> Result<SinkMetadata> {
        let mut raw = String::new();
        File::open(self.meta_path())?.read_to_string(&mut raw)?;
        serde_json::from_str(&raw).map_err(|err| Error::MalformedSnapshot(format!("sink metadata: {}", err)))
    }
}

fn persist_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temp = match dir {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };
    temp.write_all(bytes)?;
    temp.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}
