use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use thiserror::Error;

use crate::error::{CoreError, Result};
use crate::event::TimestampedEvent;

/// Raised by a collaborating line parser on malformed input. The tailer logs
/// and skips the offending line; it never inspects the error's contents
/// (spec §3, "Event" / §6 "Collaborators consumed").
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ParseError(pub String);

/// External collaborator: turns one log line into an event, or `None` as a
/// throttle signal meaning "re-offer this exact line next call" (spec §6).
pub trait LineParser<E>: Send + Sync {
    fn parse(&self, line: &str) -> std::result::Result<Option<E>, ParseError>;
}

/// Incremental, memory-mapped readout of a single append-only file with a
/// resumable byte cursor (spec §4.B).
pub struct FileTailer<E, P> {
    path: PathBuf,
    parent: PathBuf,
    cursor: u64,
    parser: P,
    line_buf: Vec<u8>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: TimestampedEvent, P: LineParser<E>> FileTailer<E, P> {
    pub fn new(path: impl Into<PathBuf>, parser: P) -> Self {
        let path = path.into();
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            path,
            parent,
            cursor: 0,
            parser,
            line_buf: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parent(&self) -> &Path {
        &self.parent
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Resets the cursor to the start of the file (used on read-from-start
    /// mode and after CREATE/DELETE resets, spec §3 "Tailer cursor").
    pub fn move_to_start(&mut self) {
        self.cursor = 0;
    }

    /// Sets the cursor to the file's current length. Returns `false` (and
    /// resets the cursor to 0) if the file does not yet exist.
    pub fn move_to_end(&mut self) -> bool {
        match std::fs::metadata(&self.path) {
            Ok(meta) => {
                self.cursor = meta.len();
                true
            }
            Err(_) => {
                self.cursor = 0;
                false
            }
        }
    }

    /// True when `parent/name` names the file this tailer watches, used to
    /// filter watch-service events down to ones relevant to us.
    pub fn file_matches(&self, name: &std::ffi::OsStr) -> bool {
        self.parent.join(name) == self.path
    }

    /// Reads and parses every complete line appended since the last call.
    /// See spec §4.B for the full algorithm this implements line by line.
    pub fn fetch_available_lines(&mut self) -> Result<Vec<E>> {
        let file = File::open(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::FileMissing
            } else {
                CoreError::Io(e)
            }
        })?;
        let size = file.metadata()?.len();

        if size <= self.cursor {
            // Either nothing new, or the file shrank (truncation): clamp
            // the cursor to the new size and report nothing this call.
            self.cursor = size;
            return Ok(Vec::new());
        }

        let region_len = (size - self.cursor) as usize;
        let mmap = unsafe {
            MmapOptions::new()
                .offset(self.cursor)
                .len(region_len)
                .map(&file)?
        };

        let mut results = Vec::new();
        let mut line_start = 0usize;
        let mut i = 0usize;
        while i < mmap.len() {
            if mmap[i] == b'\n' {
                let mut end = i;
                if end > line_start && mmap[end - 1] == b'\r' {
                    end -= 1;
                }
                self.copy_line(&mmap[line_start..end]);

                match std::str::from_utf8(&self.line_buf) {
                    Ok(text) => match self.parser.parse(text) {
                        Ok(Some(event)) => {
                            results.push(event);
                            line_start = i + 1;
                        }
                        Ok(None) => {
                            // Throttle: stop without consuming this line so
                            // the same bytes are re-offered next call.
                            break;
                        }
                        Err(err) => {
                            tracing::warn!(
                                offset = self.cursor + line_start as u64,
                                %err,
                                "skipping unparsable line"
                            );
                            line_start = i + 1;
                        }
                    },
                    Err(_) => {
                        tracing::warn!(
                            offset = self.cursor + line_start as u64,
                            "skipping non-utf8 line"
                        );
                        line_start = i + 1;
                    }
                }
            }
            i += 1;
        }
        // Any trailing partial line (no '\n') is intentionally left for the
        // next call by not advancing line_start past it.
        self.cursor += line_start as u64;

        results.sort_by_key(|e| e.timestamp_millis());
        Ok(results)
    }

    /// Copies `bytes` into the reusable line buffer, growing its capacity by
    /// ~1.5x when needed and never shrinking it (spec §4.B).
    fn copy_line(&mut self, bytes: &[u8]) {
        let needed = bytes.len();
        let mut cap = self.line_buf.capacity().max(64);
        while cap < needed {
            cap = cap + cap / 2 + 1;
        }
        if cap > self.line_buf.capacity() {
            self.line_buf.reserve_exact(cap - self.line_buf.len());
        }
        self.line_buf.clear();
        self.line_buf.extend_from_slice(bytes);
    }
}
