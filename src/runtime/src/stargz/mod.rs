//! eStargz layer encoding.
//!
//! An eStargz blob is a gzip-compressed tar whose entries live in separately
//! decompressible gzip members, followed by a table of contents and a footer
//! locating it. Files named by the caller are moved to the front so that a
//! lazy-pulling snapshotter can prefetch them.

mod encoder;
pub mod toc;

use std::io::Read;

use a3s_stargz_core::error::Result;

use crate::oci::Layer;

pub use encoder::StargzEncoder;
pub use toc::{read_toc, read_toc_json, Toc, TocEntry};

/// Name of the tar entry holding the TOC.
pub const TOC_TAR_NAME: &str = "stargz.index.json";

/// Marks the end of the prioritized files.
pub const PREFETCH_LANDMARK: &str = ".prefetch.landmark";

/// Marks a layer with nothing to prefetch.
pub const NO_PREFETCH_LANDMARK: &str = ".no.prefetch.landmark";

/// Payload of both landmark files.
pub const LANDMARK_CONTENTS: u8 = 0x0f;

/// Layer annotation carrying the digest of the TOC JSON.
pub const TOC_DIGEST_ANNOTATION: &str = "containerd.io/snapshot/stargz/toc.digest";

/// Layer annotation carrying the size of the uncompressed layer.
pub const UNCOMPRESSED_SIZE_ANNOTATION: &str = "io.containers.estargz.uncompressed-size";

/// Output of a layer encoder.
#[derive(Debug, Clone)]
pub struct EncodedLayer {
    /// The re-encoded layer
    pub layer: Layer,
    /// Requested paths not present in the input, as given by the caller
    pub missing: Vec<String>,
}

/// Re-encodes an uncompressed layer tar with some paths prioritized.
pub trait LayerEncoder: Send + Sync {
    fn encode(&self, tar: &mut dyn Read, prioritize: &[String]) -> Result<EncodedLayer>;
}
