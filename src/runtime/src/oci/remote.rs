//! Registry collaborator seams.
//!
//! The optimizer only talks to registries through [`Fetcher`] and
//! [`Publisher`]; [`super::registry::RegistryClient`] implements both.

use async_trait::async_trait;

use a3s_stargz_core::error::{OptimizeError, Result};

use super::image::{Image, ImageIndex};
use super::manifest::{oci_index_media_type, Descriptor, IndexManifest, Manifest, ManifestKind, Platform};
use super::reference::ImageReference;

/// Result of a successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    /// Digest of the pushed manifest
    pub digest: String,
    /// URL of the pushed manifest
    pub manifest_url: String,
}

/// Reads manifests and blobs from a registry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the manifest `reference` points at, without resolving anything below it.
    async fn get(&self, reference: &ImageReference) -> Result<RemoteDescriptor>;

    /// Pull the config and layer blobs an image manifest refers to.
    async fn image(&self, reference: &ImageReference, manifest: &Manifest) -> Result<Image>;
}

/// Writes images and indexes to a registry.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn write_image(&self, reference: &ImageReference, image: &Image) -> Result<PushResult>;

    async fn write_index(&self, reference: &ImageReference, index: &ImageIndex) -> Result<PushResult>;
}

/// A fetched manifest and what it declares itself to be.
#[derive(Debug, Clone)]
pub struct RemoteDescriptor {
    /// Reference the manifest was fetched from
    pub reference: ImageReference,
    /// Declared media type, if any
    pub media_type: Option<String>,
    /// Manifest digest
    pub digest: String,
    /// Raw manifest body
    pub manifest: Vec<u8>,
}

impl RemoteDescriptor {
    pub fn kind(&self) -> ManifestKind {
        ManifestKind::from_media_type(self.media_type.as_deref())
    }

    /// Resolve this descriptor to a single image.
    ///
    /// An index is narrowed to the child matching `platform`; an index
    /// without a platform filter cannot be resolved to one image.
    pub async fn image<F>(&self, fetcher: &F, platform: Option<&Platform>) -> Result<Image>
    where
        F: Fetcher + ?Sized,
    {
        match self.kind() {
            ManifestKind::Index => {
                let platform = platform.ok_or_else(|| {
                    OptimizeError::ImageReadError(format!(
                        "{} is an index; a platform is required to select an image",
                        self.reference
                    ))
                })?;
                let index = self.index()?;
                let child = index.child_for_platform(platform)?;
                tracing::debug!(
                    reference = %self.reference,
                    platform = %platform,
                    digest = %child.digest,
                    "Selected image from index"
                );
                let child_desc = fetcher.get(&self.reference.with_digest(&child.digest)).await?;
                let manifest = Manifest::from_slice(&child_desc.manifest)?;
                fetcher.image(&child_desc.reference, &manifest).await
            }
            ManifestKind::LegacySchema1 => Err(OptimizeError::UnsupportedFormat(
                "docker schema 1 images are not supported".to_string(),
            )),
            ManifestKind::Image => {
                let manifest = Manifest::from_slice(&self.manifest)?;
                fetcher.image(&self.reference, &manifest).await
            }
        }
    }

    /// View this descriptor as an index.
    pub fn index(&self) -> Result<RemoteIndex> {
        Ok(RemoteIndex {
            reference: self.reference.clone(),
            media_type: self.media_type.clone(),
            manifest: IndexManifest::from_slice(&self.manifest)?,
        })
    }
}

/// A source index whose children are resolved on demand.
#[derive(Debug, Clone)]
pub struct RemoteIndex {
    reference: ImageReference,
    media_type: Option<String>,
    manifest: IndexManifest,
}

impl RemoteIndex {
    pub fn new(reference: ImageReference, media_type: Option<String>, manifest: IndexManifest) -> Self {
        Self {
            reference,
            media_type,
            manifest,
        }
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    /// Declared media type of the index itself, defaulting to the OCI index type.
    pub fn media_type(&self) -> String {
        self.media_type
            .clone()
            .or_else(|| self.manifest.media_type.clone())
            .unwrap_or_else(oci_index_media_type)
    }

    pub fn index_manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// Fetch the child image described by `child`.
    pub async fn image<F>(&self, fetcher: &F, child: &Descriptor) -> Result<Image>
    where
        F: Fetcher + ?Sized,
    {
        let child_ref = self.reference.with_digest(&child.digest);
        let desc = fetcher.get(&child_ref).await?;
        if desc.kind() != ManifestKind::Image {
            return Err(OptimizeError::UnsupportedFormat(format!(
                "child {} of index {} is not an image manifest",
                child.digest, self.reference
            )));
        }
        let manifest = Manifest::from_slice(&desc.manifest)?;
        fetcher.image(&desc.reference, &manifest).await
    }

    fn child_for_platform(&self, platform: &Platform) -> Result<&Descriptor> {
        self.manifest
            .manifests
            .iter()
            .find(|d| d.platform.as_ref().is_some_and(|p| platform.matches(p)))
            .ok_or_else(|| {
                OptimizeError::ImageReadError(format!(
                    "no image for platform {} in index {}",
                    platform, self.reference
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::manifest::media_types;

    fn descriptor(media_type: Option<&str>, body: &str) -> RemoteDescriptor {
        RemoteDescriptor {
            reference: ImageReference::parse("example.com/app:v1").unwrap(),
            media_type: media_type.map(str::to_string),
            digest: "sha256:top".to_string(),
            manifest: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_kind_follows_media_type() {
        assert_eq!(
            descriptor(Some(media_types::DOCKER_MANIFEST_LIST), "{}").kind(),
            ManifestKind::Index
        );
        assert_eq!(descriptor(None, "{}").kind(), ManifestKind::Image);
    }

    #[test]
    fn test_index_view() {
        let body = r#"{"schemaVersion":2,"manifests":[
            {"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"sha256:a","size":1,
             "platform":{"architecture":"amd64","os":"linux"}},
            {"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"sha256:b","size":1,
             "platform":{"architecture":"arm64","os":"linux","variant":"v8"}}
        ]}"#;
        let index = descriptor(Some(media_types::DOCKER_MANIFEST_LIST), body)
            .index()
            .unwrap();
        assert_eq!(index.media_type(), media_types::DOCKER_MANIFEST_LIST);
        assert_eq!(index.index_manifest().manifests.len(), 2);

        let arm = index
            .child_for_platform(&Platform::parse("linux/arm64").unwrap())
            .unwrap();
        assert_eq!(arm.digest, "sha256:b");
        assert!(index
            .child_for_platform(&Platform::parse("windows/amd64").unwrap())
            .is_err());
    }

    #[test]
    fn test_index_media_type_defaults_to_oci() {
        let index = RemoteIndex::new(
            ImageReference::parse("example.com/app").unwrap(),
            None,
            IndexManifest::from_slice(br#"{"schemaVersion":2,"manifests":[]}"#).unwrap(),
        );
        assert_eq!(index.media_type(), oci_index_media_type());
    }
}
