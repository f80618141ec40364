use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::warn;

use crate::TransferLogError;

/// Append-only text log kept next to the chunks it describes.
///
/// Each entry is one line. Appends are buffered by the OS until [`fsync`]
/// is called; callers fsync before acting on what they just logged.
///
/// [`fsync`]: TransferLog::fsync
pub struct TransferLog {
    path: PathBuf,
    file: File,
}

impl TransferLog {
    pub fn open(dir: &Path, name: &str) -> io::Result<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, line: &str) -> io::Result<()> {
        self.file.write_all(format!("{}\n", line).as_bytes())
    }

    pub fn fsync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

/// Complete lines of a log file. A missing file reads as empty and a torn
/// final line (no newline) is dropped.
fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    if let Some(last) = lines.pop() {
        if !last.is_empty() {
            warn!("Ignoring torn last line in {}: {:?}", path.display(), last);
        }
    }
    Ok(lines)
}

// -- Uploads --

pub const UPLOAD_LOG_NAME: &str = "uploads.log";

pub struct UploadLog {
    log: TransferLog,
}

/// What an upload log says about a chunk directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadLogState {
    /// Chunk file names in assignment order, one entry per assignment.
    pub assigned: Vec<String>,
    pub completed: Vec<String>,
}

impl UploadLogState {
    /// Chunks assigned at least once and never completed, in first-assignment
    /// order. A single `completed` entry settles every assignment of a chunk.
    pub fn incomplete(&self) -> Vec<String> {
        let completed: HashSet<&str> = self.completed.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        self.assigned
            .iter()
            .filter(|name| !completed.contains(name.as_str()) && seen.insert(name.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_completed(&self, chunk_name: &str) -> bool {
        self.completed.iter().any(|c| c == chunk_name)
    }
}

impl UploadLog {
    pub fn open(dir: &Path) -> io::Result<Self> {
        Ok(Self { log: TransferLog::open(dir, UPLOAD_LOG_NAME)? })
    }

    pub fn append_assignment(&mut self, chunk_file_name: &str) -> io::Result<()> {
        self.log.append(&format!("assigned {}", chunk_file_name))
    }

    pub fn append_complete(&mut self, chunk_file_name: &str) -> io::Result<()> {
        self.log.append(&format!("completed {}", chunk_file_name))
    }

    pub fn fsync(&mut self) -> io::Result<()> {
        self.log.fsync()
    }

    pub fn replay(dir: &Path) -> Result<UploadLogState, TransferLogError> {
        let mut state = UploadLogState::default();
        for (i, line) in read_lines(&dir.join(UPLOAD_LOG_NAME))?.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (kind, name) = match (parts.next(), parts.next(), parts.next()) {
                (Some(kind), Some(name), None) => (kind, name.to_string()),
                _ => return Err(malformed(UPLOAD_LOG_NAME, i, "expected `<kind> <chunk>`")),
            };
            match kind {
                "assigned" => state.assigned.push(name),
                "completed" => state.completed.push(name),
                other => return Err(malformed(UPLOAD_LOG_NAME, i, &format!("unknown entry `{}`", other))),
            }
        }
        Ok(state)
    }

    /// Chunks that were assigned storage but never completed.
    pub fn read_incomplete(dir: &Path) -> Result<Vec<String>, TransferLogError> {
        Ok(Self::replay(dir)?.incomplete())
    }
}

fn malformed(log: &'static str, index: usize, reason: &str) -> TransferLogError {
    TransferLogError::Malformed {
        log,
        line: index + 1,
        reason: reason.to_string(),
    }
}

// -- Downloads --

pub const DOWNLOAD_LOG_NAME: &str = "downloads.log";

/// Sources whose authorization expires within this window are not reused.
const SOURCE_EXPIRY_MARGIN_MINUTES: i64 = 5;
const DT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One storage node a chunk can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSource {
    pub uri: String,
    pub expire_time: DateTime<Utc>,
    pub signature: String,
    pub signature_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadChunkInfo {
    pub sequence_number: u32,
    pub chunk_name: String,
    pub chunk_hash: String,
    pub chunk_size: u64,
    pub sources: Vec<DownloadSource>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadLogState {
    pub completed: Vec<u32>,
    pub chunks: BTreeMap<u32, DownloadChunkInfo>,
}

pub struct DownloadLog {
    log: TransferLog,
}

fn format_dt(dt: &DateTime<Utc>) -> String {
    dt.format(DT_FORMAT).to_string()
}

fn parse_dt(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, DT_FORMAT).ok().map(|n| n.and_utc())
}

impl DownloadLog {
    pub fn open(dir: &Path) -> io::Result<Self> {
        Ok(Self { log: TransferLog::open(dir, DOWNLOAD_LOG_NAME)? })
    }

    pub fn append_download_info(&mut self, chunk: &DownloadChunkInfo, source: &DownloadSource) -> io::Result<()> {
        let fields = [
            chunk.sequence_number.to_string(),
            chunk.chunk_name.clone(),
            chunk.chunk_hash.clone(),
            chunk.chunk_size.to_string(),
            source.uri.clone(),
            format_dt(&source.expire_time),
            source.signature.clone(),
            format_dt(&source.signature_ts),
        ];
        self.log.append(&format!("assigned {}", fields.join(",")))
    }

    pub fn append_complete(&mut self, sequence_number: u32) -> io::Result<()> {
        self.log.append(&format!("completed {}", sequence_number))
    }

    pub fn fsync(&mut self) -> io::Result<()> {
        self.log.fsync()
    }

    /// Completed sequences plus every still-usable source per chunk, as of `now`.
    pub fn read(dir: &Path, now: DateTime<Utc>) -> Result<DownloadLogState, TransferLogError> {
        let cutoff = now + Duration::minutes(SOURCE_EXPIRY_MARGIN_MINUTES);
        let mut state = DownloadLogState::default();

        for (i, line) in read_lines(&dir.join(DOWNLOAD_LOG_NAME))?.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("completed ") {
                let seq = rest
                    .trim()
                    .parse()
                    .map_err(|_| malformed(DOWNLOAD_LOG_NAME, i, "bad sequence number"))?;
                state.completed.push(seq);
                continue;
            }
            let rest = line
                .strip_prefix("assigned ")
                .ok_or_else(|| malformed(DOWNLOAD_LOG_NAME, i, "unknown entry"))?;
            let fields: Vec<&str> = rest.split(',').collect();
            let [seq, name, hash, size, uri, expire, signature, signature_ts] = fields[..] else {
                return Err(malformed(DOWNLOAD_LOG_NAME, i, "expected 8 fields"));
            };
            let sequence_number: u32 = seq
                .parse()
                .map_err(|_| malformed(DOWNLOAD_LOG_NAME, i, "bad sequence number"))?;
            let chunk_size: u64 = size
                .parse()
                .map_err(|_| malformed(DOWNLOAD_LOG_NAME, i, "bad chunk size"))?;
            let expire_time = parse_dt(expire).ok_or_else(|| malformed(DOWNLOAD_LOG_NAME, i, "bad expire time"))?;
            let signature_ts =
                parse_dt(signature_ts).ok_or_else(|| malformed(DOWNLOAD_LOG_NAME, i, "bad signature time"))?;

            let entry = state.chunks.entry(sequence_number).or_insert_with(|| DownloadChunkInfo {
                sequence_number,
                chunk_name: name.to_string(),
                chunk_hash: hash.to_string(),
                chunk_size,
                sources: Vec::new(),
            });
            if expire_time < cutoff {
                continue;
            }
            entry.sources.push(DownloadSource {
                uri: uri.to_string(),
                expire_time,
                signature: signature.to_string(),
                signature_ts,
            });
        }
        Ok(state)
    }
}
