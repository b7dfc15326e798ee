//! In-memory images and indexes.
//!
//! Source images are read-only views over fetched blobs. Optimized images
//! are assembled with [`Image::new`] and [`Image::append`] and are owned by
//! the optimize call until published.

use a3s_stargz_core::error::{OptimizeError, Result};

use super::layers::Layer;
use super::manifest::{media_types, sha256_digest, ConfigFile, Descriptor, IndexManifest, Manifest};

/// A container image: config plus ordered layers (bottom to top).
#[derive(Debug, Clone)]
pub struct Image {
    /// Manifest media type
    media_type: String,

    /// Config blob media type
    config_media_type: String,

    /// Config blob as fetched or as built
    raw_config: Vec<u8>,

    /// Layers in order, bottom to top
    layers: Vec<Layer>,
}

impl Image {
    /// Create an empty Docker schema 2 image seeded with `config`.
    pub fn new(config: &ConfigFile) -> Result<Self> {
        Ok(Self {
            media_type: media_types::DOCKER_MANIFEST_SCHEMA2.to_string(),
            config_media_type: media_types::DOCKER_CONFIG.to_string(),
            raw_config: serde_json::to_vec(config)?,
            layers: Vec::new(),
        })
    }

    /// Assemble an image from fetched parts.
    pub fn from_parts(
        media_type: impl Into<String>,
        config_media_type: impl Into<String>,
        raw_config: Vec<u8>,
        layers: Vec<Layer>,
    ) -> Self {
        Self {
            media_type: media_type.into(),
            config_media_type: config_media_type.into(),
            raw_config,
            layers,
        }
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Parse the image configuration.
    pub fn config_file(&self) -> Result<ConfigFile> {
        ConfigFile::from_slice(&self.raw_config)
    }

    /// Layers in order, bottom to top.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Append a layer on top.
    pub fn append(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    /// The config blob as it is published.
    ///
    /// When every layer knows its diff-ID (layers produced by an encoder),
    /// `rootfs.diff_ids` is rendered from the layers so the published config
    /// describes exactly the published layers. Otherwise the stored config is
    /// returned byte for byte.
    pub fn config_blob(&self) -> Result<Vec<u8>> {
        let diff_ids: Option<Vec<String>> = self
            .layers
            .iter()
            .map(|l| l.diff_id().map(str::to_string))
            .collect();

        match diff_ids {
            Some(diff_ids) if !self.layers.is_empty() => {
                let mut config = self.config_file()?;
                config.rootfs.diff_ids = diff_ids;
                Ok(serde_json::to_vec(&config)?)
            }
            _ => Ok(self.raw_config.clone()),
        }
    }

    /// Build the manifest describing this image.
    pub fn manifest(&self) -> Result<Manifest> {
        let config_blob = self.config_blob()?;
        Ok(Manifest {
            schema_version: 2,
            media_type: Some(self.media_type.clone()),
            config: Descriptor {
                media_type: self.config_media_type.clone(),
                digest: sha256_digest(&config_blob),
                size: config_blob.len() as u64,
                urls: None,
                annotations: None,
                platform: None,
            },
            layers: self.layers.iter().map(Layer::descriptor).collect(),
            annotations: None,
        })
    }

    /// Serialized manifest, exactly as pushed.
    pub fn raw_manifest(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.manifest()?)?)
    }

    /// Digest of the serialized manifest.
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.raw_manifest()?))
    }
}

/// One child of a built index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Per-child metadata carried over from the source index
    pub descriptor: Descriptor,
    pub image: Image,
}

/// A freshly built image index.
#[derive(Debug, Clone)]
pub struct ImageIndex {
    media_type: String,
    entries: Vec<IndexEntry>,
}

impl ImageIndex {
    /// Create an empty index with the given media type.
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            entries: Vec::new(),
        }
    }

    /// Add `image` as a child.
    ///
    /// Only urls, media type, annotations and platform are taken from
    /// `source`; digest and size always come from `image`.
    pub fn push(&mut self, source: &Descriptor, image: Image) -> Result<()> {
        let raw = image.raw_manifest()?;
        let descriptor = Descriptor {
            media_type: source.media_type.clone(),
            digest: sha256_digest(&raw),
            size: raw.len() as u64,
            urls: source.urls.clone(),
            annotations: source.annotations.clone(),
            platform: source.platform.clone(),
        };
        self.entries.push(IndexEntry { descriptor, image });
        Ok(())
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn manifest(&self) -> IndexManifest {
        IndexManifest {
            schema_version: 2,
            media_type: Some(self.media_type.clone()),
            manifests: self.entries.iter().map(|e| e.descriptor.clone()).collect(),
            annotations: None,
        }
    }

    pub fn raw_manifest(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.manifest()).map_err(OptimizeError::from)
    }

    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.raw_manifest()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::manifest::{History, Platform};
    use std::collections::BTreeMap;

    fn config() -> ConfigFile {
        ConfigFile::from_slice(
            br#"{"architecture":"amd64","os":"linux","rootfs":{"type":"layers","diff_ids":["sha256:old"]},"history":[{"created_by":"ADD"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_new_image_is_empty_docker_image() {
        let image = Image::new(&config()).unwrap();
        assert_eq!(image.media_type(), media_types::DOCKER_MANIFEST_SCHEMA2);
        assert!(image.layers().is_empty());
        assert_eq!(image.config_file().unwrap(), config());
    }

    #[test]
    fn test_config_blob_renders_new_diff_ids() {
        let mut cfg = config();
        cfg.history = Vec::<History>::new();
        cfg.rootfs.diff_ids.clear();
        let mut image = Image::new(&cfg).unwrap();
        image.append(Layer::from_blob(media_types::DOCKER_LAYER, b"one".to_vec()).with_diff_id("sha256:d1"));
        image.append(Layer::from_blob(media_types::DOCKER_LAYER, b"two".to_vec()).with_diff_id("sha256:d2"));

        // The stored config keeps the stripped lists
        assert!(image.config_file().unwrap().rootfs.diff_ids.is_empty());

        let published = ConfigFile::from_slice(&image.config_blob().unwrap()).unwrap();
        assert_eq!(published.rootfs.diff_ids, vec!["sha256:d1", "sha256:d2"]);
        assert!(published.history.is_empty());
    }

    #[test]
    fn test_config_blob_verbatim_for_source_images() {
        let raw = br#"{"os":"linux","architecture":"amd64","rootfs":{"type":"layers","diff_ids":[]}}"#.to_vec();
        let image = Image::from_parts(
            media_types::DOCKER_MANIFEST_SCHEMA2,
            media_types::DOCKER_CONFIG,
            raw.clone(),
            vec![Layer::from_blob(media_types::DOCKER_LAYER, b"x".to_vec())],
        );
        assert_eq!(image.config_blob().unwrap(), raw);
    }

    #[test]
    fn test_manifest_describes_layers() {
        let mut image = Image::new(&config()).unwrap();
        image.append(Layer::from_blob(media_types::DOCKER_LAYER, b"abc".to_vec()).with_diff_id("sha256:d"));
        let manifest = image.manifest().unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.config.media_type, media_types::DOCKER_CONFIG);
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].size, 3);
        assert_eq!(image.digest().unwrap(), sha256_digest(&image.raw_manifest().unwrap()));
    }

    #[test]
    fn test_index_push_keeps_metadata_replaces_digest() {
        let source = Descriptor {
            media_type: media_types::DOCKER_MANIFEST_SCHEMA2.to_string(),
            digest: "sha256:source".to_string(),
            size: 999,
            urls: Some(vec!["https://example.com/m".to_string()]),
            annotations: Some(BTreeMap::from([("a".to_string(), "b".to_string())])),
            platform: Some(Platform::parse("linux/arm64/v8").unwrap()),
        };
        let image = Image::new(&config()).unwrap();
        let expected_digest = image.digest().unwrap();

        let mut index = ImageIndex::new("application/vnd.oci.image.index.v1+json");
        index.push(&source, image).unwrap();

        let child = &index.manifest().manifests[0];
        assert_eq!(child.media_type, source.media_type);
        assert_eq!(child.urls, source.urls);
        assert_eq!(child.annotations, source.annotations);
        assert_eq!(child.platform, source.platform);
        assert_eq!(child.digest, expected_digest);
        assert_ne!(child.size, 999);
        assert_eq!(
            index.manifest().media_type.as_deref(),
            Some("application/vnd.oci.image.index.v1+json")
        );
    }
}
