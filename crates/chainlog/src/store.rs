// store.rs - PartitionStore: partition name -> backing JSONL file.
//
// Each partition is stored as `<base_dir>/<name>.jsonl`. The store is the only
// component that opens those files: the append path gets a handle for
// writing, and readers get a LineCursor that yields complete lines only.
//
// A line is visible once its terminating '\n' is on disk. A trailing fragment
// without one is a write in progress (or a torn write after a crash) and is
// never handed to a reader.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::LogError;

/// File extension of partition data files.
pub const PARTITION_EXT: &str = "jsonl";

const MAX_NAME_LEN: usize = 128;

/// Size of each backwards read when locating the last line.
const TAIL_CHUNK: u64 = 8 * 1024;

/// Check that `name` is safe to use as a file stem.
pub fn validate_name(name: &str) -> Result<(), LogError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.len() > MAX_NAME_LEN {
        "name is longer than 128 characters"
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        "only ASCII letters, digits, '-' and '_' are allowed"
    } else {
        return Ok(());
    };
    Err(LogError::InvalidPartitionName {
        name: name.to_string(),
        reason,
    })
}

/// Owns the mapping from partition names to backing files.
pub struct PartitionStore {
    base_dir: PathBuf,
    /// Serializes creation so two callers never race on the same new file.
    create_lock: Mutex<()>,
}

impl PartitionStore {
    /// Open a store rooted at `base_dir`, creating the directory if needed.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, LogError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).map_err(|source| LogError::storage(&base_dir, source))?;
        Ok(Self {
            base_dir,
            create_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the data file for `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, LogError> {
        validate_name(name)?;
        Ok(self.base_dir.join(format!("{}.{}", name, PARTITION_EXT)))
    }

    /// True if a partition named `name` exists. Invalid names never exist.
    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Handle to an existing partition, or `NotFound`.
    pub fn open(&self, name: &str) -> Result<PartitionHandle, LogError> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(LogError::NotFound(name.to_string()));
        }
        Ok(PartitionHandle {
            name: name.to_string(),
            path,
        })
    }

    /// Handle to the partition, creating an empty file if it is absent.
    pub fn open_or_create(&self, name: &str) -> Result<PartitionHandle, LogError> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            let _creating = self.create_lock.lock();
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => tracing::info!(partition = name, "created partition"),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => return Err(LogError::storage(&path, source)),
            }
        }
        Ok(PartitionHandle {
            name: name.to_string(),
            path,
        })
    }

    /// Names of all partitions, sorted. Costs one directory listing.
    pub fn list(&self) -> Result<BTreeSet<String>, LogError> {
        let entries =
            fs::read_dir(&self.base_dir).map_err(|source| LogError::storage(&self.base_dir, source))?;

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| LogError::storage(&self.base_dir, source))?;
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == PARTITION_EXT) || !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.insert(stem.to_string());
                }
            }
        }
        Ok(names)
    }
}

/// The last complete line of a partition file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tail {
    /// No complete, non-blank line.
    Empty,
    /// `line` holds the raw bytes of the last non-blank line; the file is
    /// `len` bytes long.
    Line { line: Vec<u8>, len: u64 },
    /// The file ends with an unterminated fragment starting at `offset`.
    Torn { offset: u64 },
}

/// A resolved partition: its name and backing file.
#[derive(Debug, Clone)]
pub struct PartitionHandle {
    name: String,
    path: PathBuf,
}

impl PartitionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the backing file in bytes.
    pub fn len(&self) -> Result<u64, LogError> {
        fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|source| LogError::storage(&self.path, source))
    }

    pub fn is_empty(&self) -> Result<bool, LogError> {
        Ok(self.len()? == 0)
    }

    /// Open the file for appending. Writes always land at the end.
    pub fn open_append(&self) -> Result<File, LogError> {
        OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| LogError::storage(&self.path, source))
    }

    /// Cursor over complete lines, starting at the top of the file.
    pub fn cursor(&self) -> Result<LineCursor, LogError> {
        let file = File::open(&self.path).map_err(|source| LogError::storage(&self.path, source))?;
        Ok(LineCursor {
            reader: BufReader::new(file),
            path: self.path.clone(),
            offset: 0,
            line_no: 0,
            buf: Vec::new(),
        })
    }

    /// Locate the last line by reading backwards from the end of the file.
    ///
    /// Reads only the trailing chunk(s), so the cost does not grow with the
    /// number of entries.
    pub fn tail(&self) -> Result<Tail, LogError> {
        self.tail_before(u64::MAX)
    }

    /// Like [`tail`](Self::tail), but only considers the first `end` bytes.
    /// `Tail::Line::len` is then the considered length, not the file size.
    ///
    /// Used to find the last complete entry in front of a torn fragment.
    pub fn tail_before(&self, end: u64) -> Result<Tail, LogError> {
        let io_err = |source| LogError::storage(&self.path, source);
        let mut file = File::open(&self.path).map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();
        read_tail(&mut file, end.min(len)).map_err(io_err)
    }
}

fn read_tail(file: &mut File, len: u64) -> io::Result<Tail> {
    if len == 0 {
        return Ok(Tail::Empty);
    }

    // `window` holds bytes [start, len) of the file.
    let mut start = len;
    let mut window: Vec<u8> = Vec::new();
    loop {
        let chunk = TAIL_CHUNK.min(start);
        start -= chunk;
        let mut buf = vec![0u8; chunk as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        buf.extend_from_slice(&window);
        window = buf;

        if window.last() != Some(&b'\n') {
            // Unterminated fragment: find where it begins.
            if let Some(nl) = window.iter().rposition(|&b| b == b'\n') {
                return Ok(Tail::Torn {
                    offset: start + nl as u64 + 1,
                });
            }
            if start == 0 {
                return Ok(Tail::Torn { offset: 0 });
            }
            continue;
        }

        // Drop trailing blank lines, then look for the newline before the last line.
        let content_end = match window.iter().rposition(|b| !b.is_ascii_whitespace()) {
            Some(i) => i + 1,
            None if start == 0 => return Ok(Tail::Empty),
            None => continue,
        };
        match window[..content_end].iter().rposition(|&b| b == b'\n') {
            Some(nl) => {
                return Ok(Tail::Line {
                    line: window[nl + 1..content_end].to_vec(),
                    len,
                })
            }
            None if start == 0 => {
                return Ok(Tail::Line {
                    line: window[..content_end].to_vec(),
                    len,
                })
            }
            None => continue,
        }
    }
}

/// Forward reader over the complete, non-blank lines of a partition file.
///
/// When it reaches an unterminated fragment it rewinds to the fragment's
/// start and reports end-of-data, so a later call picks the line up once
/// the writer has finished it. This is what makes follow mode work.
pub struct LineCursor {
    reader: BufReader<File>,
    path: PathBuf,
    /// Byte offset just past the last complete line consumed.
    offset: u64,
    /// Physical line number (1-based) of the last complete line consumed.
    line_no: usize,
    buf: Vec<u8>,
}

impl LineCursor {
    /// Next complete non-blank line as `(line_no, bytes)`, or `None` if no
    /// complete line is available yet.
    pub fn next_line(&mut self) -> Result<Option<(usize, Vec<u8>)>, LogError> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .map_err(|source| LogError::storage(&self.path, source))?;
            if read == 0 {
                return Ok(None);
            }
            if self.buf.last() != Some(&b'\n') {
                // In-progress write: forget the fragment and retry later.
                self.reader
                    .seek(SeekFrom::Start(self.offset))
                    .map_err(|source| LogError::storage(&self.path, source))?;
                return Ok(None);
            }

            self.offset += read as u64;
            self.line_no += 1;
            // Bytes are handed over untouched; decoding decides what is valid.
            let mut end = self.buf.len();
            while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
                end -= 1;
            }
            let line = &self.buf[..end];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some((self.line_no, line.to_vec())));
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}
