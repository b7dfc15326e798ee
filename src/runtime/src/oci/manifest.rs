//! OCI / Docker manifest wire types.
//!
//! These mirror the JSON documents exchanged with registries closely enough
//! that unknown fields of an image config survive a parse/serialize cycle.

use std::collections::BTreeMap;

use a3s_stargz_core::error::{OptimizeError, Result};
use oci_spec::image::MediaType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Docker media types (not covered by `oci_spec::image::MediaType`).
pub mod media_types {
    pub const DOCKER_MANIFEST_SCHEMA1: &str =
        "application/vnd.docker.distribution.manifest.v1+json";
    pub const DOCKER_MANIFEST_SCHEMA1_SIGNED: &str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";
    pub const DOCKER_MANIFEST_SCHEMA2: &str =
        "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
    pub const DOCKER_FOREIGN_LAYER: &str =
        "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";
    pub const DOCKER_UNCOMPRESSED_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar";
}

use media_types::*;

/// How a fetched manifest should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// OCI image index or Docker manifest list.
    Index,
    /// Docker schema 1 manifest, signed or not.
    LegacySchema1,
    /// Anything else, including an absent or unrecognized media type.
    Image,
}

impl ManifestKind {
    /// Classify a declared media type.
    ///
    /// Unknown types are treated as images since some registries report
    /// wrong or empty media types for valid images.
    pub fn from_media_type(media_type: Option<&str>) -> Self {
        match media_type {
            None => Self::Image,
            Some(DOCKER_MANIFEST_LIST) => Self::Index,
            Some(DOCKER_MANIFEST_SCHEMA1) | Some(DOCKER_MANIFEST_SCHEMA1_SIGNED) => {
                Self::LegacySchema1
            }
            Some(other) => match MediaType::from(other) {
                MediaType::ImageIndex => Self::Index,
                _ => Self::Image,
            },
        }
    }
}

/// The OCI image manifest media type.
pub fn oci_manifest_media_type() -> String {
    MediaType::ImageManifest.to_string()
}

/// The OCI image index media type.
pub fn oci_index_media_type() -> String {
    MediaType::ImageIndex.to_string()
}

/// Fields used to work out what kind of manifest a raw body is.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestProbe {
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    signatures: Option<serde_json::Value>,
    #[serde(default)]
    manifests: Option<serde_json::Value>,
}

/// Determine the declared media type of a raw manifest body.
///
/// Prefers the `mediaType` field; schema 1 and bare OCI documents carry none,
/// so those are recognized by shape.
pub fn sniff_media_type(raw: &[u8]) -> Result<Option<String>> {
    let probe: ManifestProbe = serde_json::from_slice(raw)?;
    if let Some(media_type) = probe.media_type.filter(|m| !m.is_empty()) {
        return Ok(Some(media_type));
    }
    let sniffed = match probe.schema_version {
        Some(1) if probe.signatures.is_some() => Some(DOCKER_MANIFEST_SCHEMA1_SIGNED.to_string()),
        Some(1) => Some(DOCKER_MANIFEST_SCHEMA1.to_string()),
        Some(2) if probe.manifests.is_some() => Some(oci_index_media_type()),
        Some(2) => Some(oci_manifest_media_type()),
        _ => None,
    };
    Ok(sniffed)
}

/// `sha256:<hex>` digest of a byte slice.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Target platform of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

impl Platform {
    /// Parse `os/arch[/variant]`, e.g. `linux/arm64/v8`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() < 2 || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(OptimizeError::ConfigError(format!(
                "Invalid platform '{}': expected os/arch[/variant]",
                s
            )));
        }
        Ok(Self {
            os: parts[0].to_string(),
            architecture: parts[1].to_string(),
            variant: parts.get(2).map(|v| v.to_string()),
            os_version: None,
            os_features: None,
            features: None,
        })
    }

    /// Whether `candidate` satisfies this platform filter.
    ///
    /// OS and architecture must match; the variant only when the filter names one.
    pub fn matches(&self, candidate: &Platform) -> bool {
        self.os == candidate.os
            && self.architecture == candidate.architecture
            && match &self.variant {
                Some(v) => candidate.variant.as_deref() == Some(v.as_str()),
                None => true,
            }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// Image manifest (OCI or Docker schema 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Manifest {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| {
            OptimizeError::ImageReadError(format!("Failed to parse image manifest: {}", e))
        })
    }
}

/// Image index (OCI index or Docker manifest list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl IndexManifest {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| {
            OptimizeError::ImageReadError(format!("Failed to parse image index: {}", e))
        })
    }
}

/// Root filesystem section of an image config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

/// One build step recorded in an image config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
}

/// Image configuration.
///
/// Fields the optimizer does not touch are kept verbatim, including any
/// keys not modelled here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Container runtime settings (Env, Cmd, Entrypoint, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub rootfs: RootFs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<History>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConfigFile {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| {
            OptimizeError::ImageReadError(format!("Failed to parse image config: {}", e))
        })
    }
}
