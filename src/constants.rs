//! Shared constants for buffer sizing and scheduling.

/// Bytes pulled from the source stream per read.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Search buffer size past which the extractor discards scanned bytes.
pub const LOOKBACK_LIMIT: usize = 100 * 1024;

/// Tail kept after a discard so a key pattern split across two reads
/// still matches.
pub const LOOKBACK_TAIL: usize = 1024;

/// Serialized prompt budget handed to the analysis service.
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 8000;

/// Minimum seconds between persisted progress updates during extraction.
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 2;

/// Buffer size used when hashing the source in a dedicated pass.
pub const HASH_READ_SIZE: usize = 8 * 1024 * 1024;

pub const MIB: u64 = 1024 * 1024;
