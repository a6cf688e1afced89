use crate::{
    Error, GrantedSet, Identifier, LineStore, Result, store::interface::dedup_stable,
};
use core::future::Future;
use std::collections::HashSet;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const TERMINATOR: u8 = b'\n';

/// Append-only text log holding one trimmed identifier per `\n`-terminated
/// record.
///
/// The log is re-read on every [`load`](LineStore::load); nothing is cached
/// here. Wrap it in [`CachedLineStore`](crate::CachedLineStore) to keep the
/// decoded set in memory.
///
/// Each append is built in memory and issued as one write followed by
/// `fsync`. If the write fails the file is truncated back to its previous
/// length, so a reader never sees a half-written record.
///
/// Records that are not valid UTF-8 (a torn multi-byte tail left by a crash)
/// are skipped with a warning rather than failing the whole load.
#[derive(Clone, Debug)]
pub struct FileLineStore {
    path: PathBuf,
}

impl FileLineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_for_append(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::io("opening the line log", e))
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::io("reading the line log", e)),
        }
    }
}

impl LineStore for FileLineStore {
    async fn load(&self) -> Result<GrantedSet> {
        let bytes = self.read_bytes().await?;
        Ok(Arc::new(decode_records(&self.path, &bytes)))
    }

    async fn append_unique(&self, ids: &[Identifier]) -> Result<usize> {
        let unique = dedup_stable(ids);
        if unique.is_empty() {
            return Ok(0);
        }

        let mut file = self.open_for_append().await?;
        let original_len = file
            .metadata()
            .await
            .map_err(|e| Error::io("inspecting the line log", e))?
            .len();

        let payload_len: usize = unique.iter().map(|id| id.as_str().len() + 1).sum();
        let mut buf = Vec::with_capacity(payload_len + 1);
        if !ends_with_terminator(&mut file, original_len).await? {
            // The last record was never terminated; close it before ours.
            buf.push(TERMINATOR);
        }
        for id in &unique {
            buf.extend_from_slice(id.as_str().as_bytes());
            buf.push(TERMINATOR);
        }

        append_or_roll_back(&mut file, original_len, &buf)
            .await
            .map_err(|e| Error::io("appending to the line log", e))?;

        tracing::trace!(path = %self.path.display(), records = unique.len(), "appended records");
        Ok(unique.len())
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io("creating the line log directory", e))?;
        }
        // `create` without `truncate` never clobbers an existing log, and
        // concurrent callers race harmlessly on the same open.
        self.open_for_append().await?;
        Ok(())
    }

    async fn read_log(&self) -> Result<String> {
        let bytes = self.read_bytes().await?;
        Ok(match String::from_utf8(bytes) {
            Ok(contents) => contents,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

fn decode_records(path: &Path, bytes: &[u8]) -> HashSet<Identifier> {
    bytes
        .split(|&b| b == TERMINATOR)
        .enumerate()
        .filter_map(|(record, raw)| match core::str::from_utf8(raw) {
            Ok(text) => Identifier::parse(text),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    record,
                    "skipping undecodable record: {err}"
                );
                None
            }
        })
        .collect()
}

/// Destination of an append: the log file, or a stand-in under test.
pub(crate) trait AppendSink: Send {
    fn write_synced(&mut self, buf: &[u8]) -> impl Future<Output = std::io::Result<()>> + Send;

    fn truncate(&mut self, len: u64) -> impl Future<Output = std::io::Result<()>> + Send;
}

impl AppendSink for File {
    async fn write_synced(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_all(buf).await?;
        self.flush().await?;
        self.sync_data().await
    }

    async fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len).await
    }
}

/// Writes `buf` and, on failure, cuts the sink back to `original_len` so no
/// partial record survives. The write error is returned either way.
pub(crate) async fn append_or_roll_back<W: AppendSink>(
    sink: &mut W,
    original_len: u64,
    buf: &[u8],
) -> std::io::Result<()> {
    let Err(err) = sink.write_synced(buf).await else {
        return Ok(());
    };
    if let Err(rollback_err) = sink.truncate(original_len).await {
        tracing::error!(original_len, "failed to roll back torn append: {rollback_err}");
    }
    Err(err)
}

async fn ends_with_terminator(file: &mut File, len: u64) -> Result<bool> {
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0_u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .await
        .map_err(|e| Error::io("inspecting the line log", e))?;
    file.read_exact(&mut last)
        .await
        .map_err(|e| Error::io("inspecting the line log", e))?;
    Ok(last[0] == TERMINATOR)
}
