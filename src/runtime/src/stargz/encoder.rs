//! eStargz encoder.
//!
//! Reads an uncompressed layer tar fully into memory, reorders it so that
//! prioritized files come first, and writes it back out with every regular
//! file payload chunk in its own gzip member.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};

use a3s_stargz_core::config::{OptimizeConfig, DEFAULT_CHUNK_SIZE, DEFAULT_COMPRESSION_LEVEL};
use a3s_stargz_core::error::{OptimizeError, Result};
use chrono::{SecondsFormat, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use oci_spec::image::MediaType;
use sha2::{Digest, Sha256};
use tar::{EntryType, Header};

use super::toc::{footer_bytes, Toc, TocEntry};
use super::{
    EncodedLayer, LayerEncoder, LANDMARK_CONTENTS, NO_PREFETCH_LANDMARK, PREFETCH_LANDMARK,
    TOC_DIGEST_ANNOTATION, TOC_TAR_NAME, UNCOMPRESSED_SIZE_ANNOTATION,
};
use crate::oci::manifest::sha256_digest;
use crate::oci::Layer;

const BLOCK_SIZE: usize = 512;
const LONG_LINK_NAME: &[u8] = b"././@LongLink";

/// Encoder producing eStargz layers.
#[derive(Debug, Clone)]
pub struct StargzEncoder {
    compression_level: u32,
    chunk_size: usize,
}

impl StargzEncoder {
    pub fn new() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn from_config(config: &OptimizeConfig) -> Self {
        Self::new()
            .with_compression_level(config.compression_level)
            .with_chunk_size(config.chunk_size)
    }

    /// Gzip level for every member, clamped to 0-9.
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for StargzEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerEncoder for StargzEncoder {
    fn encode(&self, tar: &mut dyn Read, prioritize: &[String]) -> Result<EncodedLayer> {
        let files = read_entries(tar)?;
        let total = files.len();

        let mut sorter = Sorter::new(files);
        let mut missing = Vec::new();
        for path in prioritize {
            if !sorter.prioritize(path) {
                missing.push(path.clone());
            }
        }
        let (front, rest) = sorter.finish();
        let prefetched = front.len();

        let mut writer = BlobWriter::new(self.compression_level, self.chunk_size);
        let mut toc = Toc::new();

        if front.is_empty() {
            writer.write_entry(&landmark(NO_PREFETCH_LANDMARK), &mut toc)?;
        } else {
            for file in &front {
                writer.write_entry(file, &mut toc)?;
            }
            writer.write_entry(&landmark(PREFETCH_LANDMARK), &mut toc)?;
        }
        for file in &rest {
            writer.write_entry(file, &mut toc)?;
        }

        let (blob, toc_json, diff_id, uncompressed_size) = writer.finish(&toc)?;

        tracing::debug!(
            entries = total,
            prefetched,
            missing = missing.len(),
            size = blob.len(),
            "Encoded eStargz layer"
        );

        let annotations = BTreeMap::from([
            (TOC_DIGEST_ANNOTATION.to_string(), sha256_digest(&toc_json)),
            (
                UNCOMPRESSED_SIZE_ANNOTATION.to_string(),
                uncompressed_size.to_string(),
            ),
        ]);
        let layer = Layer::from_blob(MediaType::ImageLayerGzip.to_string(), blob)
            .with_diff_id(diff_id)
            .with_annotations(annotations);

        Ok(EncodedLayer { layer, missing })
    }
}

/// One input tar entry held in memory.
struct TarFile {
    /// Cleaned name, used for matching and in the TOC
    name: String,
    /// Path as it appeared in the input
    path: Vec<u8>,
    header: Header,
    link_name: Option<Vec<u8>>,
    xattrs: BTreeMap<String, Vec<u8>>,
    data: Vec<u8>,
}

fn read_err(e: std::io::Error) -> OptimizeError {
    OptimizeError::LayerEncodingError(format!("Failed to read layer tar: {}", e))
}

/// Read every entry of `tar`. A later entry for the same name replaces the
/// earlier one; landmarks, PAX global headers and an existing TOC are dropped.
fn read_entries(tar: &mut dyn Read) -> Result<Vec<TarFile>> {
    let mut archive = tar::Archive::new(tar);
    let mut files: Vec<TarFile> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for entry in archive.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;
        if entry.header().entry_type() == EntryType::XGlobalHeader {
            continue;
        }

        let path = entry.path_bytes().into_owned();
        let name = clean_entry_name(&String::from_utf8_lossy(&path));
        if name == PREFETCH_LANDMARK || name == NO_PREFETCH_LANDMARK || name == TOC_TAR_NAME {
            continue;
        }

        let link_name = entry.link_name_bytes().map(|l| l.into_owned());
        let xattrs = pax_xattrs(&mut entry)?;
        let header = entry.header().clone();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(read_err)?;

        if !seen.insert(name.clone()) {
            files.retain(|f| f.name != name);
        }
        files.push(TarFile {
            name,
            path,
            header,
            link_name,
            xattrs,
            data,
        });
    }

    Ok(files)
}

fn pax_xattrs<R: Read>(entry: &mut tar::Entry<'_, R>) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut xattrs = BTreeMap::new();
    if let Some(extensions) = entry.pax_extensions().map_err(read_err)? {
        for extension in extensions {
            let extension = extension.map_err(read_err)?;
            if let Some(attr) = extension
                .key()
                .ok()
                .and_then(|k| k.strip_prefix("SCHILY.xattr."))
            {
                xattrs.insert(attr.to_string(), extension.value_bytes().to_vec());
            }
        }
    }
    Ok(xattrs)
}

fn landmark(name: &str) -> TarFile {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(1);
    TarFile {
        name: name.to_string(),
        path: name.as_bytes().to_vec(),
        header,
        link_name: None,
        xattrs: BTreeMap::new(),
        data: vec![LANDMARK_CONTENTS],
    }
}

/// Clean a tar entry name the way lookups expect: rooted, `.`/`..`
/// resolved, then stripped of the leading `/`.
pub(crate) fn clean_entry_name(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    parts.join("/")
}

/// Moves prioritized entries (and their ancestors) out of the input order.
struct Sorter {
    slots: Vec<Option<TarFile>>,
    index: HashMap<String, usize>,
    front: Vec<TarFile>,
    moved: HashSet<String>,
    visiting: HashSet<String>,
}

impl Sorter {
    fn new(files: Vec<TarFile>) -> Self {
        let index = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            slots: files.into_iter().map(Some).collect(),
            index,
            front: Vec::new(),
            moved: HashSet::new(),
            visiting: HashSet::new(),
        }
    }

    /// Move `path` to the front. Returns false when no such entry exists.
    fn prioritize(&mut self, path: &str) -> bool {
        let name = clean_entry_name(path);
        if name.is_empty() {
            self.take_to_front("");
            return true;
        }
        if !self.index.contains_key(&name) && !self.moved.contains(&name) {
            return false;
        }
        self.move_with_ancestors(&name);
        true
    }

    fn move_with_ancestors(&mut self, name: &str) {
        if !self.visiting.insert(name.to_string()) {
            return;
        }

        self.take_to_front("");
        let mut end = 0;
        while let Some(pos) = name[end..].find('/') {
            end += pos;
            self.take_to_front(&name[..end]);
            end += 1;
        }

        // A hard link is only usable once its target is present.
        let link_target = self
            .index
            .get(name)
            .and_then(|&i| self.slots[i].as_ref())
            .filter(|f| f.header.entry_type() == EntryType::Link)
            .and_then(|f| f.link_name.as_ref())
            .map(|l| clean_entry_name(&String::from_utf8_lossy(l)));
        if let Some(target) = link_target {
            if self.index.contains_key(&target) {
                self.move_with_ancestors(&target);
            }
        }

        self.take_to_front(name);
    }

    fn take_to_front(&mut self, name: &str) {
        if let Some(i) = self.index.remove(name) {
            if let Some(file) = self.slots[i].take() {
                self.moved.insert(name.to_string());
                self.front.push(file);
            }
        }
    }

    /// Moved entries in move order, then everything else in input order.
    fn finish(self) -> (Vec<TarFile>, Vec<TarFile>) {
        let rest = self.slots.into_iter().flatten().collect();
        (self.front, rest)
    }
}

/// Accumulates the compressed blob one gzip member at a time.
struct BlobWriter {
    blob: Vec<u8>,
    member: Option<GzEncoder<Vec<u8>>>,
    level: Compression,
    chunk_size: usize,
    diff_id: Sha256,
    uncompressed_size: u64,
}

impl BlobWriter {
    fn new(level: u32, chunk_size: usize) -> Self {
        Self {
            blob: Vec::new(),
            member: None,
            level: Compression::new(level),
            chunk_size: chunk_size.max(1),
            diff_id: Sha256::new(),
            uncompressed_size: 0,
        }
    }

    /// Write uncompressed bytes into the open member, opening one if needed.
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let level = self.level;
        let member = self
            .member
            .get_or_insert_with(|| GzEncoder::new(Vec::new(), level));
        member.write_all(data)?;
        self.diff_id.update(data);
        self.uncompressed_size += data.len() as u64;
        Ok(())
    }

    fn close_member(&mut self) -> Result<()> {
        if let Some(member) = self.member.take() {
            let compressed = member.finish()?;
            self.blob.extend_from_slice(&compressed);
        }
        Ok(())
    }

    /// Compressed offset of the next member.
    fn offset(&self) -> i64 {
        self.blob.len() as i64
    }

    fn write_block(&mut self, header: &Header, payload: &[u8]) -> Result<()> {
        self.write(header.as_bytes())?;
        self.write(payload)?;
        self.write(&[0u8; BLOCK_SIZE][..padding(payload.len())])
    }

    fn write_entry(&mut self, file: &TarFile, toc: &mut Toc) -> Result<()> {
        let entry_type = file.header.entry_type();
        let toc_type = toc_type(entry_type).ok_or_else(|| {
            OptimizeError::LayerEncodingError(format!(
                "unsupported tar entry type {:?} for {}",
                entry_type, file.name
            ))
        })?;

        if !file.xattrs.is_empty() {
            let mut records = Vec::new();
            for (key, value) in &file.xattrs {
                pax_record(&mut records, &format!("SCHILY.xattr.{}", key), value);
            }
            let header = meta_header(EntryType::XHeader, b"PaxHeader", records.len() as u64);
            self.write_block(&header, &records)?;
        }
        if file.path.len() > 100 {
            let header = meta_header(EntryType::GNULongName, LONG_LINK_NAME, file.path.len() as u64 + 1);
            self.write_block(&header, &nul_terminated(&file.path))?;
        }
        if let Some(link) = file.link_name.as_ref().filter(|l| l.len() > 100) {
            let header = meta_header(EntryType::GNULongLink, LONG_LINK_NAME, link.len() as u64 + 1);
            self.write_block(&header, &nul_terminated(link))?;
        }

        let header = output_header(file, toc_type == "reg")?;
        self.write(header.as_bytes())?;

        let src = &file.header;
        let mut entry = TocEntry {
            name: file.name.clone(),
            entry_type: toc_type.to_string(),
            mod_time: format_mod_time(src.mtime().unwrap_or(0)),
            mode: src.mode().unwrap_or(0) as i64,
            uid: src.uid().unwrap_or(0) as i64,
            gid: src.gid().unwrap_or(0) as i64,
            user_name: src
                .username_bytes()
                .map(|u| String::from_utf8_lossy(u).to_string())
                .unwrap_or_default(),
            group_name: src
                .groupname_bytes()
                .map(|g| String::from_utf8_lossy(g).to_string())
                .unwrap_or_default(),
            xattrs: file.xattrs.clone(),
            ..Default::default()
        };
        match entry_type {
            EntryType::Link | EntryType::Symlink => {
                entry.link_name = file
                    .link_name
                    .as_ref()
                    .map(|l| String::from_utf8_lossy(l).to_string())
                    .unwrap_or_default();
            }
            EntryType::Char | EntryType::Block => {
                entry.dev_major = src.device_major().ok().flatten().unwrap_or(0) as i64;
                entry.dev_minor = src.device_minor().ok().flatten().unwrap_or(0) as i64;
            }
            _ => {}
        }

        if toc_type != "reg" || file.data.is_empty() {
            toc.entries.push(entry);
            return Ok(());
        }

        let total = file.data.len();
        entry.size = total as i64;
        entry.digest = sha256_digest(&file.data);

        let mut next = Some(entry);
        let mut written = 0;
        while written < total {
            let mut chunk_entry = next.take().unwrap_or_else(|| TocEntry {
                name: file.name.clone(),
                entry_type: "chunk".to_string(),
                ..Default::default()
            });

            let remain = total - written;
            let len = if remain < self.chunk_size {
                remain
            } else {
                chunk_entry.chunk_size = self.chunk_size as i64;
                self.chunk_size
            };
            let chunk = &file.data[written..written + len];

            self.close_member()?;
            chunk_entry.offset = self.offset();
            chunk_entry.chunk_offset = written as i64;
            chunk_entry.chunk_digest = sha256_digest(chunk);
            self.write(chunk)?;

            toc.entries.push(chunk_entry);
            written += len;
        }
        self.write(&[0u8; BLOCK_SIZE][..padding(total)])
    }

    /// Append the TOC member and footer.
    ///
    /// Returns the blob, the TOC JSON, the diff-ID and the uncompressed size.
    fn finish(mut self, toc: &Toc) -> Result<(Vec<u8>, Vec<u8>, String, u64)> {
        self.close_member()?;
        let toc_offset = self.offset() as u64;

        let toc_json = serde_json::to_vec_pretty(toc)?;
        let mut header = Header::new_gnu();
        set_field(&mut header.as_old_mut().name, TOC_TAR_NAME.as_bytes());
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(toc_json.len() as u64);
        header.set_cksum();
        self.write_block(&header, &toc_json)?;
        self.write(&[0u8; BLOCK_SIZE * 2])?;
        self.close_member()?;

        self.blob.extend_from_slice(&footer_bytes(toc_offset));

        let diff_id = format!("sha256:{}", hex::encode(self.diff_id.finalize()));
        Ok((self.blob, toc_json, diff_id, self.uncompressed_size))
    }
}

fn toc_type(entry_type: EntryType) -> Option<&'static str> {
    match entry_type {
        EntryType::Regular | EntryType::Continuous => Some("reg"),
        EntryType::Directory => Some("dir"),
        EntryType::Symlink => Some("symlink"),
        EntryType::Link => Some("hardlink"),
        EntryType::Char => Some("char"),
        EntryType::Block => Some("block"),
        EntryType::Fifo => Some("fifo"),
        _ => None,
    }
}

/// Rebuild `file`'s header in GNU format; names over 100 bytes are
/// truncated here and carried in a preceding long-name entry.
///
/// Numeric fields left blank by the producer read as zero.
fn output_header(file: &TarFile, regular: bool) -> Result<Header> {
    let src = &file.header;
    let entry_type = src.entry_type();
    let mut header = Header::new_gnu();

    header.set_entry_type(if regular { EntryType::Regular } else { entry_type });
    header.set_mode(src.mode().unwrap_or(0o644));
    header.set_uid(src.uid().unwrap_or(0));
    header.set_gid(src.gid().unwrap_or(0));
    header.set_mtime(src.mtime().unwrap_or(0));
    header.set_size(if regular { file.data.len() as u64 } else { 0 });
    if let Some(user) = src.username_bytes() {
        header.set_username(&String::from_utf8_lossy(user))?;
    }
    if let Some(group) = src.groupname_bytes() {
        header.set_groupname(&String::from_utf8_lossy(group))?;
    }
    if matches!(entry_type, EntryType::Char | EntryType::Block) {
        header.set_device_major(src.device_major().ok().flatten().unwrap_or(0))?;
        header.set_device_minor(src.device_minor().ok().flatten().unwrap_or(0))?;
    }

    set_field(&mut header.as_old_mut().name, &file.path);
    if let Some(link) = &file.link_name {
        set_field(&mut header.as_old_mut().linkname, link);
    }
    header.set_cksum();
    Ok(header)
}

fn meta_header(entry_type: EntryType, name: &[u8], size: u64) -> Header {
    let mut header = Header::new_gnu();
    set_field(&mut header.as_old_mut().name, name);
    header.set_entry_type(entry_type);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(size);
    header.set_cksum();
    header
}

fn set_field(field: &mut [u8; 100], value: &[u8]) {
    let n = value.len().min(field.len());
    field[..n].copy_from_slice(&value[..n]);
}

fn nul_terminated(value: &[u8]) -> Vec<u8> {
    let mut out = value.to_vec();
    out.push(0);
    out
}

fn padding(len: usize) -> usize {
    (BLOCK_SIZE - len % BLOCK_SIZE) % BLOCK_SIZE
}

/// Append a PAX record `"<len> <key>=<value>\n"`, where len counts itself.
fn pax_record(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    let body = key.len() + value.len() + 3;
    let mut len = body + 1;
    while len != body + len.to_string().len() {
        len = body + len.to_string().len();
    }
    out.extend_from_slice(format!("{} {}=", len, key).as_bytes());
    out.extend_from_slice(value);
    out.push(b'\n');
}

fn format_mod_time(mtime: u64) -> String {
    Utc.timestamp_opt(mtime as i64, 0)
        .single()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stargz::{read_toc, read_toc_json};
    use flate2::read::{GzDecoder, MultiGzDecoder};

    enum Item<'a> {
        Dir(&'a str),
        File(&'a str, &'a [u8]),
        Link(&'a str, &'a str),
    }

    fn build_tar(items: &[Item<'_>]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for item in items {
            let mut header = tar::Header::new_gnu();
            header.set_mtime(1_600_000_000);
            match item {
                Item::Dir(name) => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    builder
                        .append_data(&mut header, name, std::io::empty())
                        .unwrap();
                }
                Item::File(name, data) => {
                    header.set_entry_type(EntryType::Regular);
                    header.set_mode(0o644);
                    header.set_size(data.len() as u64);
                    builder.append_data(&mut header, name, *data).unwrap();
                }
                Item::Link(name, target) => {
                    header.set_entry_type(EntryType::Link);
                    header.set_mode(0o644);
                    header.set_size(0);
                    header.set_link_name(target).unwrap();
                    builder
                        .append_data(&mut header, name, std::io::empty())
                        .unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    fn encode(encoder: &StargzEncoder, tar: &[u8], prioritize: &[&str]) -> EncodedLayer {
        let prioritize: Vec<String> = prioritize.iter().map(|s| s.to_string()).collect();
        encoder.encode(&mut &tar[..], &prioritize).unwrap()
    }

    fn decompress(blob: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        MultiGzDecoder::new(blob).read_to_end(&mut out).unwrap();
        out
    }

    fn sample() -> Vec<u8> {
        build_tar(&[
            Item::Dir("etc/"),
            Item::File("etc/hosts", b"127.0.0.1 localhost"),
            Item::Dir("bin/"),
            Item::File("bin/sh", b"#!shell"),
            Item::Dir("usr/"),
        ])
    }

    #[test]
    fn test_clean_entry_name() {
        assert_eq!(clean_entry_name("/bin/sh"), "bin/sh");
        assert_eq!(clean_entry_name("./etc/"), "etc");
        assert_eq!(clean_entry_name("a/./b/../c"), "a/c");
        assert_eq!(clean_entry_name("../../x"), "x");
        assert_eq!(clean_entry_name("./"), "");
    }

    #[test]
    fn test_prioritized_files_move_to_front() {
        let encoded = encode(&StargzEncoder::new(), &sample(), &["/bin/sh", "/nope"]);
        let toc = read_toc(encoded.layer.blob()).unwrap();

        assert_eq!(
            toc.names(),
            vec!["bin", "bin/sh", PREFETCH_LANDMARK, "etc", "etc/hosts", "usr"]
        );
        assert_eq!(encoded.missing, vec!["/nope".to_string()]);
    }

    #[test]
    fn test_pax_global_header_is_skipped() {
        let records = b"21 comment=generated\n";
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(EntryType::XGlobalHeader);
        header.set_mode(0o644);
        header.set_size(records.len() as u64);
        builder
            .append_data(&mut header, "pax_global_header", &records[..])
            .unwrap();
        let mut tar = builder.into_inner().unwrap();
        // drop the end-of-archive blocks and continue with regular entries
        tar.truncate(tar.len() - 1024);
        tar.extend_from_slice(&sample());

        let encoded = encode(&StargzEncoder::new(), &tar, &["bin/sh"]);
        let toc = read_toc(encoded.layer.blob()).unwrap();

        assert_eq!(toc.names()[..3], ["bin", "bin/sh", PREFETCH_LANDMARK]);
        assert!(!toc.names().contains(&"pax_global_header"));
        assert!(encoded.missing.is_empty());
    }

    #[test]
    fn test_no_priorities_adds_no_prefetch_landmark() {
        let encoded = encode(&StargzEncoder::new(), &sample(), &[]);
        let toc = read_toc(encoded.layer.blob()).unwrap();
        assert_eq!(toc.names()[0], NO_PREFETCH_LANDMARK);
        assert!(!toc.names().contains(&PREFETCH_LANDMARK));
        assert!(encoded.missing.is_empty());
    }

    #[test]
    fn test_all_missing_adds_no_prefetch_landmark() {
        let encoded = encode(&StargzEncoder::new(), &sample(), &["a", "b"]);
        let toc = read_toc(encoded.layer.blob()).unwrap();
        assert_eq!(toc.names()[0], NO_PREFETCH_LANDMARK);
        assert_eq!(encoded.missing, vec!["a", "b"]);
    }

    #[test]
    fn test_output_is_valid_tar_with_same_content() {
        let encoded = encode(&StargzEncoder::new(), &sample(), &["etc/hosts"]);
        let raw = decompress(encoded.layer.blob());
        let mut archive = tar::Archive::new(raw.as_slice());
        let mut contents = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            contents.insert(name, data);
        }
        assert_eq!(contents["etc/hosts"], b"127.0.0.1 localhost");
        assert_eq!(contents["bin/sh"], b"#!shell");
        assert_eq!(contents[PREFETCH_LANDMARK], vec![LANDMARK_CONTENTS]);
        assert!(contents.contains_key(TOC_TAR_NAME));
    }

    #[test]
    fn test_layer_annotations_and_diff_id() {
        let encoded = encode(&StargzEncoder::new(), &sample(), &[]);
        let layer = &encoded.layer;
        let raw = decompress(layer.blob());
        let annotations = layer.annotations().unwrap();

        assert_eq!(layer.diff_id(), Some(sha256_digest(&raw).as_str()));
        assert_eq!(
            annotations[UNCOMPRESSED_SIZE_ANNOTATION],
            raw.len().to_string()
        );
        assert_eq!(
            annotations[TOC_DIGEST_ANNOTATION],
            sha256_digest(&read_toc_json(layer.blob()).unwrap())
        );
        assert_eq!(layer.media_type(), MediaType::ImageLayerGzip.to_string());
    }

    #[test]
    fn test_chunks_are_independently_decompressible() {
        let data = b"0123456789";
        let tar = build_tar(&[Item::File("big.bin", data)]);
        let encoder = StargzEncoder::new().with_chunk_size(4);
        let encoded = encode(&encoder, &tar, &["big.bin"]);
        let blob = encoded.layer.blob();
        let toc = read_toc(blob).unwrap();

        let pieces: Vec<&TocEntry> = toc.entries.iter().filter(|e| e.name == "big.bin").collect();
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].entry_type, "reg");
        assert_eq!(pieces[0].size, 10);
        assert_eq!(pieces[0].digest, sha256_digest(data));
        assert_eq!(pieces[1].entry_type, "chunk");
        assert_eq!(
            pieces.iter().map(|e| e.chunk_offset).collect::<Vec<_>>(),
            vec![0, 4, 8]
        );
        assert_eq!(
            pieces.iter().map(|e| e.chunk_size).collect::<Vec<_>>(),
            vec![4, 4, 0]
        );

        for piece in pieces {
            let start = piece.chunk_offset as usize;
            let len = if piece.chunk_size == 0 { data.len() - start } else { piece.chunk_size as usize };
            let mut chunk = vec![0u8; len];
            GzDecoder::new(&blob[piece.offset as usize..])
                .read_exact(&mut chunk)
                .unwrap();
            assert_eq!(chunk, &data[start..start + len]);
            assert_eq!(piece.chunk_digest, sha256_digest(&chunk));
        }
    }

    #[test]
    fn test_later_duplicates_win_and_landmarks_dropped() {
        let tar = build_tar(&[
            Item::File(".prefetch.landmark", &[LANDMARK_CONTENTS]),
            Item::File("a.txt", b"old"),
            Item::File("b.txt", b"b"),
            Item::File("./a.txt", b"new"),
        ]);
        let encoded = encode(&StargzEncoder::new(), &tar, &[]);
        let toc = read_toc(encoded.layer.blob()).unwrap();
        assert_eq!(toc.names(), vec![NO_PREFETCH_LANDMARK, "b.txt", "a.txt"]);
        assert_eq!(toc.entry("a.txt").unwrap().digest, sha256_digest(b"new"));
    }

    #[test]
    fn test_hard_link_target_moves_first() {
        let tar = build_tar(&[
            Item::File("data/target", b"payload"),
            Item::Link("data/link", "data/target"),
            Item::File("other", b"o"),
        ]);
        let encoded = encode(&StargzEncoder::new(), &tar, &["data/link"]);
        let toc = read_toc(encoded.layer.blob()).unwrap();
        assert_eq!(
            toc.names(),
            vec!["data/target", "data/link", PREFETCH_LANDMARK, "other"]
        );
        assert_eq!(toc.entry("data/link").unwrap().link_name, "data/target");
        assert_eq!(toc.entry("data/link").unwrap().entry_type, "hardlink");
    }

    #[test]
    fn test_long_names_survive() {
        let long = format!("deep/{}/file.txt", "d".repeat(120));
        let tar = build_tar(&[Item::File(&long, b"x")]);
        let encoded = encode(&StargzEncoder::new(), &tar, &[long.as_str()]);
        assert!(encoded.missing.is_empty());

        let raw = decompress(encoded.layer.blob());
        let mut archive = tar::Archive::new(raw.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names[0], long);
    }

    #[test]
    fn test_modtime_rfc3339() {
        assert_eq!(format_mod_time(0), "1970-01-01T00:00:00Z");
        let encoded = encode(&StargzEncoder::new(), &sample(), &[]);
        let toc = read_toc(encoded.layer.blob()).unwrap();
        assert_eq!(toc.entry("etc/hosts").unwrap().mod_time, "2020-09-13T12:26:40Z");
    }

    #[test]
    fn test_pax_record_length_counts_itself() {
        let mut out = Vec::new();
        pax_record(&mut out, "SCHILY.xattr.user.k", b"v");
        let text = String::from_utf8(out.clone()).unwrap();
        let (len, _) = text.split_once(' ').unwrap();
        assert_eq!(len.parse::<usize>().unwrap(), out.len());
    }

    #[test]
    fn test_from_config() {
        let config = OptimizeConfig {
            compression_level: 3,
            chunk_size: 1024,
            ..Default::default()
        };
        let encoder = StargzEncoder::from_config(&config);
        assert_eq!(encoder.compression_level(), 3);
        assert_eq!(encoder.chunk_size(), 1024);
    }
}
