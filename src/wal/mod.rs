//! Write-ahead log.
//!
//! An append-only stream of fixed-size physical blocks. Logical records
//! (one per write batch, and version edits in the manifest, which reuses
//! this format) are split into fragments so a record may span blocks:
//!
//! ```text
//! block:    ┌────────────┬────────────┬─── ... ───┬─ zero padding ─┐
//! fragment: │ CRC(4B) │ Len(2B) │ Type(1B) │ payload(Len bytes)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The CRC covers the type byte and the payload. A fragment that fails its
//! CRC, or a header that runs past the end of the file, marks the point a
//! crash interrupted an append — everything before it is valid.

pub mod reader;
pub mod writer;

pub use reader::LogReader;
pub use writer::LogWriter;

/// Size of one physical block.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Fragment header: CRC (4) + length (2) + type (1).
pub const HEADER_SIZE: usize = 7;

/// Fragment type tags. A record that fits in one block is FULL; otherwise
/// it is written as FIRST, zero or more MIDDLE, then LAST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Never written; a zeroed header is block-trailer padding.
    Zero = 0x00,
    Full = 0x01,
    First = 0x02,
    Middle = 0x03,
    Last = 0x04,
}

impl RecordType {
    pub fn from_u8(byte: u8) -> Option<RecordType> {
        match byte {
            0x00 => Some(RecordType::Zero),
            0x01 => Some(RecordType::Full),
            0x02 => Some(RecordType::First),
            0x03 => Some(RecordType::Middle),
            0x04 => Some(RecordType::Last),
            _ => None,
        }
    }
}

/// CRC of a fragment: type byte followed by the payload.
pub(crate) fn fragment_crc(record_type: RecordType, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[record_type as u8]);
    hasher.update(payload);
    hasher.finalize()
}
