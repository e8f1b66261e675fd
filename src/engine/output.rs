//! Bounded capture of a child's stdout and stderr.
//!
//! Each stream keeps at most `capacity` bytes; older bytes are dropped
//! first. ANSI SGR colour sequences are removed before storage so matches
//! do not depend on terminal colouring. A sequence split across two reads
//! is held back until the next write completes it.

use regex::bytes::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

/// Default per-stream capacity (2 MiB).
pub const DEFAULT_CAPACITY: usize = 2 * 1024 * 1024;

/// Longest incomplete escape sequence held back between writes.
const MAX_PENDING: usize = 64;

static ANSI_SGR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]+m").expect("valid ANSI regex"));

/// Which stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One bounded, ANSI-filtered buffer.
#[derive(Debug)]
pub struct OutputContainer {
    data: Vec<u8>,
    pending: Vec<u8>,
    capacity: usize,
}

impl OutputContainer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            pending: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn write(&mut self, chunk: &[u8]) {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let split = incomplete_escape_start(&input);
        self.pending = input.split_off(split);

        let clean = ANSI_SGR.replace_all(&input, &b""[..]);
        self.append(&clean);
    }

    fn append(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.capacity {
            self.data.clear();
            self.data
                .extend_from_slice(&bytes[bytes.len() - self.capacity..]);
            return;
        }

        let overflow = (self.data.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.data.drain(..overflow);
        }
        self.data.extend_from_slice(bytes);
    }

    /// Stored bytes, including a held-back partial escape sequence.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + self.pending.len());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.pending);
        let excess = out.len().saturating_sub(self.capacity);
        out.drain(..excess);
        out
    }

    pub fn string(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    pub fn len(&self) -> usize {
        (self.data.len() + self.pending.len()).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.pending.is_empty()
    }

    pub fn purge(&mut self) {
        self.data.clear();
        self.pending.clear();
    }
}

/// Start of a trailing `ESC [ <digits/;>*` that may still be completed.
fn incomplete_escape_start(input: &[u8]) -> usize {
    let Some(pos) = input.iter().rposition(|&b| b == 0x1b) else {
        return input.len();
    };

    let tail = &input[pos..];
    if tail.len() > MAX_PENDING {
        return input.len();
    }

    let incomplete = match tail {
        [_] => true,
        [_, b'[', rest @ ..] => rest.iter().all(|b| b.is_ascii_digit() || *b == b';'),
        _ => false,
    };

    if incomplete { pos } else { input.len() }
}

struct Streams {
    stdout: OutputContainer,
    stderr: OutputContainer,
}

impl Streams {
    fn get_mut(&mut self, stream: Stream) -> &mut OutputContainer {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }
}

/// Captured output of one child, shared between the readers and the driver.
///
/// The clear request is honoured by whichever side touches the store
/// next, so output written after the request always survives it.
pub struct OutputStore {
    streams: Mutex<Streams>,
    clear: AtomicBool,
}

impl OutputStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            streams: Mutex::new(Streams {
                stdout: OutputContainer::new(capacity),
                stderr: OutputContainer::new(capacity),
            }),
            clear: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Streams> {
        let mut guard = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        if self.clear.swap(false, Ordering::AcqRel) {
            guard.stdout.purge();
            guard.stderr.purge();
        }
        guard
    }

    pub fn write(&self, stream: Stream, chunk: &[u8]) {
        log::trace!("captured {} bytes on {}", chunk.len(), stream.as_str());
        self.lock().get_mut(stream).write(chunk);
    }

    /// Ask for the buffers to be emptied before the next append or read.
    pub fn request_clear(&self) {
        self.clear.store(true, Ordering::Release);
    }

    /// Total bytes held across both streams.
    pub fn len(&self) -> usize {
        let guard = self.lock();
        guard.stdout.len() + guard.stderr.len()
    }

    pub fn is_empty(&self) -> bool {
        let guard = self.lock();
        guard.stdout.is_empty() && guard.stderr.is_empty()
    }

    pub fn has_data(&self) -> bool {
        !self.is_empty()
    }

    /// Whether either stream contains `needle`.
    ///
    /// Streams are searched one at a time: the two are not ordered against
    /// each other, so a needle split across stdout and stderr never matches.
    pub fn contains(&self, needle: &str) -> bool {
        let guard = self.lock();
        let needle = needle.as_bytes();
        [&guard.stdout, &guard.stderr]
            .iter()
            .any(|c| contains_bytes(&c.bytes(), needle))
    }

    /// Whether either stream matches `pattern`, searched per stream like
    /// [`OutputStore::contains`].
    pub fn is_match(&self, pattern: &regex::Regex) -> bool {
        let guard = self.lock();
        [&guard.stdout, &guard.stderr]
            .iter()
            .any(|c| pattern.is_match(&c.string()))
    }
}

#[cfg(test)]
impl OutputStore {
    pub fn stdout(&self) -> Vec<u8> {
        self.lock().stdout.bytes()
    }

    /// Stdout followed by stderr.
    pub fn bytes(&self) -> Vec<u8> {
        let guard = self.lock();
        let mut out = guard.stdout.bytes();
        out.extend(guard.stderr.bytes());
        out
    }

    pub fn string(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
