//! eStargz table of contents and footer.
//!
//! The TOC is a JSON document stored as the last tar entry of the blob, in its
//! own gzip member. The 51-byte footer is an empty gzip member whose extra
//! field records where that member starts.

use std::collections::BTreeMap;
use std::io::Read;

use a3s_stargz_core::error::{OptimizeError, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use super::TOC_TAR_NAME;

/// Size of the footer in bytes.
pub const FOOTER_SIZE: usize = 51;

/// TOC format version written by the encoder.
pub const TOC_VERSION: i32 = 1;

/// The table of contents of an eStargz blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toc {
    pub version: i32,
    pub entries: Vec<TocEntry>,
}

impl Toc {
    pub fn new() -> Self {
        Self {
            version: TOC_VERSION,
            entries: Vec::new(),
        }
    }

    /// The primary entry for `name` (not a continuation chunk).
    pub fn entry(&self, name: &str) -> Option<&TocEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name && e.entry_type != "chunk")
    }

    /// Names of the entries in stream order, chunks excluded.
    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.entry_type != "chunk")
            .map(|e| e.name.as_str())
            .collect()
    }
}

impl Default for Toc {
    fn default() -> Self {
        Self::new()
    }
}

/// One TOC entry: a tar entry, or a further chunk of a regular file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Cleaned path, without leading `/` or `./`
    pub name: String,

    /// One of dir, reg, symlink, hardlink, char, block, fifo, chunk
    #[serde(rename = "type")]
    pub entry_type: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: i64,

    #[serde(rename = "modtime", default, skip_serializing_if = "String::is_empty")]
    pub mod_time: String,

    #[serde(rename = "linkName", default, skip_serializing_if = "String::is_empty")]
    pub link_name: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub mode: i64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub uid: i64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub gid: i64,

    #[serde(rename = "userName", default, skip_serializing_if = "String::is_empty")]
    pub user_name: String,

    #[serde(rename = "groupName", default, skip_serializing_if = "String::is_empty")]
    pub group_name: String,

    /// Compressed offset of the gzip member holding this entry's payload
    #[serde(default, skip_serializing_if = "is_zero")]
    pub offset: i64,

    #[serde(rename = "devMajor", default, skip_serializing_if = "is_zero")]
    pub dev_major: i64,

    #[serde(rename = "devMinor", default, skip_serializing_if = "is_zero")]
    pub dev_minor: i64,

    /// Extended attributes, values base64 encoded on the wire
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", with = "xattrs_serde")]
    pub xattrs: BTreeMap<String, Vec<u8>>,

    /// Digest of the whole file (regular files only)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,

    #[serde(rename = "chunkOffset", default, skip_serializing_if = "is_zero")]
    pub chunk_offset: i64,

    /// Zero means "up to the end of the file"
    #[serde(rename = "chunkSize", default, skip_serializing_if = "is_zero")]
    pub chunk_size: i64,

    #[serde(rename = "chunkDigest", default, skip_serializing_if = "String::is_empty")]
    pub chunk_digest: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Render the footer pointing at the TOC member at `toc_offset`.
pub fn footer_bytes(toc_offset: u64) -> Vec<u8> {
    let subfield = format!("{:016x}STARGZ", toc_offset);
    let mut footer = Vec::with_capacity(FOOTER_SIZE);

    // gzip header with FEXTRA set, no mtime, unknown OS
    footer.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0x00, 0xff]);
    footer.extend_from_slice(&((subfield.len() + 4) as u16).to_le_bytes());
    footer.extend_from_slice(b"SG");
    footer.extend_from_slice(&(subfield.len() as u16).to_le_bytes());
    footer.extend_from_slice(subfield.as_bytes());
    // final empty stored block
    footer.extend_from_slice(&[0x01, 0x00, 0x00, 0xff, 0xff]);
    // CRC32 and ISIZE of empty input
    footer.extend_from_slice(&[0u8; 8]);

    footer
}

/// Extract the TOC offset from a footer.
pub fn parse_footer(footer: &[u8]) -> Result<u64> {
    let invalid = |reason: &str| OptimizeError::LayerEncodingError(format!("invalid eStargz footer: {}", reason));

    if footer.len() != FOOTER_SIZE {
        return Err(invalid("wrong size"));
    }
    if footer[0] != 0x1f || footer[1] != 0x8b || footer[3] & 0x04 == 0 {
        return Err(invalid("not a gzip header with extra field"));
    }
    let xlen = u16::from_le_bytes([footer[10], footer[11]]);
    if xlen != 26 || &footer[12..14] != b"SG" {
        return Err(invalid("missing SG subfield"));
    }
    let sublen = u16::from_le_bytes([footer[14], footer[15]]);
    if sublen != 22 || &footer[32..38] != b"STARGZ" {
        return Err(invalid("missing STARGZ magic"));
    }
    let hex_offset = std::str::from_utf8(&footer[16..32]).map_err(|_| invalid("offset is not ascii"))?;
    u64::from_str_radix(hex_offset, 16).map_err(|_| invalid("offset is not hex"))
}

/// Read the raw TOC JSON from an eStargz blob.
pub fn read_toc_json(blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < FOOTER_SIZE {
        return Err(OptimizeError::LayerEncodingError(
            "blob too small to be eStargz".to_string(),
        ));
    }
    let footer_start = blob.len() - FOOTER_SIZE;
    let toc_offset = parse_footer(&blob[footer_start..])? as usize;
    if toc_offset > footer_start {
        return Err(OptimizeError::LayerEncodingError(format!(
            "TOC offset {} is past the end of the blob",
            toc_offset
        )));
    }

    let mut archive = tar::Archive::new(GzDecoder::new(&blob[toc_offset..footer_start]));
    let mut entries = archive.entries()?;
    let mut entry = entries.next().ok_or_else(|| {
        OptimizeError::LayerEncodingError("TOC member holds no tar entry".to_string())
    })??;

    let name = entry.path()?.to_string_lossy().to_string();
    if name != TOC_TAR_NAME {
        return Err(OptimizeError::LayerEncodingError(format!(
            "expected {} at TOC offset, found {}",
            TOC_TAR_NAME, name
        )));
    }

    let mut json = Vec::new();
    entry.read_to_end(&mut json)?;
    Ok(json)
}

/// Parse the TOC of an eStargz blob.
pub fn read_toc(blob: &[u8]) -> Result<Toc> {
    let json = read_toc_json(blob)?;
    Ok(serde_json::from_slice(&json)?)
}

mod xattrs_serde {
    use std::collections::BTreeMap;

    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        xattrs: &BTreeMap<String, Vec<u8>>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        s.collect_map(
            xattrs
                .iter()
                .map(|(k, v)| (k, base64::engine::general_purpose::STANDARD.encode(v))),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(d)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                base64::engine::general_purpose::STANDARD
                    .decode(&v)
                    .map(|bytes| (k, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footer_layout() {
        let footer = footer_bytes(0x1234);
        assert_eq!(footer.len(), FOOTER_SIZE);
        assert_eq!(&footer[..4], &[0x1f, 0x8b, 0x08, 0x04]);
        assert_eq!(&footer[16..38], b"0000000000001234STARGZ");
        assert_eq!(parse_footer(&footer).unwrap(), 0x1234);
    }

    #[test]
    fn test_footer_is_valid_empty_gzip() {
        let mut out = Vec::new();
        GzDecoder::new(footer_bytes(7).as_slice())
            .read_to_end(&mut out)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_parse_footer_rejects_garbage() {
        assert!(parse_footer(&[0u8; FOOTER_SIZE]).is_err());
        assert!(parse_footer(&[0u8; 10]).is_err());
        let mut footer = footer_bytes(1);
        footer[33] = b'X';
        assert!(parse_footer(&footer).is_err());
    }

    #[test]
    fn test_read_toc_rejects_short_blob() {
        assert!(read_toc(b"tiny").is_err());
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = TocEntry {
            name: "bin/sh".to_string(),
            entry_type: "reg".to_string(),
            size: 3,
            mode: 0o755,
            offset: 120,
            xattrs: BTreeMap::from([("user.k".to_string(), b"v".to_vec())]),
            digest: "sha256:abc".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "reg");
        assert_eq!(json["xattrs"]["user.k"], "dg==");
        assert!(json.get("chunkSize").is_none());
        assert!(json.get("linkName").is_none());

        let back: TocEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_toc_lookup_skips_chunks() {
        let toc = Toc {
            version: TOC_VERSION,
            entries: vec![
                TocEntry {
                    name: "big".to_string(),
                    entry_type: "reg".to_string(),
                    ..Default::default()
                },
                TocEntry {
                    name: "big".to_string(),
                    entry_type: "chunk".to_string(),
                    chunk_offset: 4,
                    ..Default::default()
                },
            ],
        };
        assert_eq!(toc.names(), vec!["big"]);
        assert_eq!(toc.entry("big").unwrap().entry_type, "reg");
    }
}
