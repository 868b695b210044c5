use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned layer identifier (monotonic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub i64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned file entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One indexed layer, as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub digest: String,
    /// Compressed blob size in bytes
    pub csize: i64,
    /// Uncompressed size in bytes
    pub usize: i64,
    /// Archive type (e.g. "tar+gzip")
    pub archive_type: String,
    pub media_type: String,
    /// `None` only for rows written by external tooling without a timestamp
    pub indexed_at: Option<DateTime<Utc>>,
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
    pub image_ref: Option<String>,
}

impl Layer {
    pub fn has_provenance(&self) -> bool {
        self.registry.is_some()
            || self.namespace.is_some()
            || self.repository.is_some()
            || self.tag.is_some()
            || self.image_ref.is_some()
    }
}

/// One entry from a layer's file listing, as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: FileId,
    pub layer_id: LayerId,
    pub name: String,
    /// Raw tar typeflag byte
    pub typeflag: u8,
    pub size: i64,
    pub mode: u32,
    /// `None` when the TOC carried no (or a zero) modification time
    pub mod_time: Option<DateTime<Utc>>,
    /// Byte offset of the entry inside the layer blob
    pub offset: i64,
    pub linkname: String,
}

impl FileEntry {
    pub fn entry_type(&self) -> EntryType {
        EntryType::from_typeflag(self.typeflag)
    }
}

/// Typed view of a tar typeflag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Reg,
    Hardlink,
    Symlink,
    Char,
    Block,
    Dir,
    Fifo,
    /// PAX/GNU extension headers and anything unrecognised
    Other(u8),
}

impl EntryType {
    pub fn from_typeflag(typeflag: u8) -> Self {
        match typeflag {
            // '7' is the reserved contiguous-file type, handled as a regular file
            b'0' | b'\0' | b'7' => EntryType::Reg,
            b'1' => EntryType::Hardlink,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::Char,
            b'4' => EntryType::Block,
            b'5' => EntryType::Dir,
            b'6' => EntryType::Fifo,
            other => EntryType::Other(other),
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, EntryType::Hardlink | EntryType::Symlink)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryType::Reg => write!(f, "file"),
            EntryType::Hardlink => write!(f, "hardlink"),
            EntryType::Symlink => write!(f, "symlink"),
            EntryType::Char => write!(f, "char"),
            EntryType::Block => write!(f, "block"),
            EntryType::Dir => write!(f, "dir"),
            EntryType::Fifo => write!(f, "fifo"),
            EntryType::Other(b) if b.is_ascii_graphic() => write!(f, "other({})", *b as char),
            EntryType::Other(b) => write!(f, "other(0x{:02x})", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typeflag_mapping() {
        assert_eq!(EntryType::from_typeflag(0), EntryType::Reg);
        assert_eq!(EntryType::from_typeflag(b'0'), EntryType::Reg);
        assert_eq!(EntryType::from_typeflag(b'5'), EntryType::Dir);
        assert_eq!(EntryType::from_typeflag(b'2'), EntryType::Symlink);
        assert!(EntryType::from_typeflag(b'1').is_link());
        assert_eq!(EntryType::from_typeflag(b'x'), EntryType::Other(b'x'));
        assert_eq!(EntryType::Other(b'x').to_string(), "other(x)");
        assert_eq!(EntryType::Other(0x80).to_string(), "other(0x80)");
    }
}
