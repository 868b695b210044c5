//! Table of contents handed over by the extraction component.
//!
//! A [`Toc`] describes one layer blob: its aggregate sizes plus the ordered
//! list of entries found in the archive. Both types deserialize from JSON so
//! that TOC documents produced elsewhere can be imported directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unix timestamp of `0001-01-01T00:00:00Z`, the "unset" time emitted by
/// toolchains that have no optional time type.
const ZERO_TIME_UNIX: i64 = -62_135_596_800;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Toc {
    /// Compressed blob size in bytes
    #[serde(default)]
    pub csize: i64,
    /// Uncompressed size in bytes
    #[serde(default)]
    pub usize: i64,
    /// Archive type (e.g. "tar+gzip")
    #[serde(default, rename = "type")]
    pub archive_type: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub files: Vec<TocFile>,
}

impl Toc {
    pub fn new(csize: i64, usize: i64) -> Self {
        Self {
            csize,
            usize,
            ..Self::default()
        }
    }

    pub fn with_archive_type(mut self, archive_type: impl Into<String>) -> Self {
        self.archive_type = archive_type.into();
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    pub fn with_file(mut self, file: TocFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = TocFile>) -> Self {
        self.files.extend(files);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TocFile {
    pub name: String,
    /// Raw tar typeflag byte
    #[serde(default)]
    pub typeflag: u8,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub mode: u32,
    #[serde(default, rename = "mod", skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub linkname: String,
}

impl TocFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_typeflag(mut self, typeflag: u8) -> Self {
        self.typeflag = typeflag;
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mod_time(mut self, mod_time: DateTime<Utc>) -> Self {
        self.mod_time = Some(mod_time);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_linkname(mut self, linkname: impl Into<String>) -> Self {
        self.linkname = linkname.into();
        self
    }

    /// Modification time to persist: `None` for an absent or zero-value time.
    ///
    /// The Unix epoch is a real time and is kept.
    pub fn effective_mod_time(&self) -> Option<DateTime<Utc>> {
        self.mod_time
            .filter(|t| !(t.timestamp() == ZERO_TIME_UNIX && t.timestamp_subsec_nanos() == 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_zero_time_is_absent() {
        let zero = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(zero.timestamp(), ZERO_TIME_UNIX);

        let f = TocFile::new("etc/hosts").with_mod_time(zero);
        assert_eq!(f.effective_mod_time(), None);

        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let f = TocFile::new("etc/hosts").with_mod_time(epoch);
        assert_eq!(f.effective_mod_time(), Some(epoch));

        assert_eq!(TocFile::new("etc/hosts").effective_mod_time(), None);
    }

    #[test]
    fn test_deserialize_toc_document() {
        let json = r#"{
            "csize": 100,
            "usize": 400,
            "type": "tar+gzip",
            "media_type": "application/vnd.oci.image.layer.v1.tar+gzip",
            "files": [
                {"name": "/etc/passwd", "typeflag": 48, "size": 10, "mode": 420,
                 "mod": "2024-03-01T12:00:00Z", "offset": 512},
                {"name": "/bin/sh", "typeflag": 50, "linkname": "busybox"}
            ]
        }"#;
        let toc: Toc = serde_json::from_str(json).unwrap();
        assert_eq!(toc.csize, 100);
        assert_eq!(toc.archive_type, "tar+gzip");
        assert_eq!(toc.files.len(), 2);
        assert_eq!(toc.files[0].offset, 512);
        assert!(toc.files[0].mod_time.is_some());
        assert_eq!(toc.files[1].linkname, "busybox");
        assert_eq!(toc.files[1].size, 0);
    }
}
