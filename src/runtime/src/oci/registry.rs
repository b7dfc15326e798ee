//! OCI registry client for fetching and publishing images.
//!
//! Uses the `oci-distribution` crate to interact with container registries
//! (Docker Hub, GHCR, etc.). Manifests are moved as raw bytes so digests
//! computed locally match what the registry stores.

use a3s_stargz_core::error::{OptimizeError, Result};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::image::{Image, ImageIndex};
use super::layers::Layer;
use super::manifest::{
    media_types, oci_index_media_type, oci_manifest_media_type, sha256_digest, sniff_media_type,
    Descriptor, Manifest,
};
use super::reference::ImageReference;
use super::remote::{Fetcher, PushResult, Publisher, RemoteDescriptor};

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Manifest types accepted when fetching. Schema 1 is accepted only so it
/// can be recognized and rejected with a clear error.
const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.oci.image.index.v1+json",
    media_types::DOCKER_MANIFEST_SCHEMA2,
    media_types::DOCKER_MANIFEST_LIST,
    media_types::DOCKER_MANIFEST_SCHEMA1_SIGNED,
    media_types::DOCKER_MANIFEST_SCHEMA1,
];

/// Registry client implementing both [`Fetcher`] and [`Publisher`].
pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryClient {
    /// Create a client with anonymous authentication over HTTPS.
    pub fn new() -> Self {
        Self::with_auth(RegistryAuth::anonymous(), &[])
    }

    /// Create a client with the given authentication.
    ///
    /// Registries listed in `insecure_registries` are reached over plain HTTP.
    pub fn with_auth(auth: RegistryAuth, insecure_registries: &[String]) -> Self {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries.to_vec())
        };
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    /// Upload config, layers and manifest of `image` under `reference`.
    async fn push_image_content(
        &self,
        oci_ref: &Reference,
        reference: &ImageReference,
        image: &Image,
    ) -> Result<String> {
        let publish_err = |message: String| OptimizeError::PublishError {
            reference: reference.to_string(),
            message,
        };

        let config_blob = image.config_blob()?;
        let config_digest = sha256_digest(&config_blob);
        self.client
            .push_blob(oci_ref, &config_blob, &config_digest)
            .await
            .map_err(|e| publish_err(format!("Failed to push config blob: {}", e)))?;

        for layer in image.layers() {
            tracing::debug!(
                digest = %layer.digest(),
                size = layer.size(),
                "Pushing layer"
            );
            self.client
                .push_blob(oci_ref, layer.blob(), layer.digest())
                .await
                .map_err(|e| publish_err(format!("Failed to push layer {}: {}", layer.digest(), e)))?;
        }

        let raw = image.raw_manifest()?;
        self.client
            .push_manifest_raw(
                oci_ref,
                raw,
                image
                    .media_type()
                    .parse()
                    .map_err(|e| publish_err(format!("Invalid manifest media type: {}", e)))?,
            )
            .await
            .map_err(|e| publish_err(format!("Failed to push manifest: {}", e)))
    }

    async fn authenticate_push(&self, oci_ref: &Reference, reference: &ImageReference) -> Result<()> {
        self.client
            .auth(oci_ref, &self.auth.to_oci_auth(), RegistryOperation::Push)
            .await
            .map_err(|e| OptimizeError::PublishError {
                reference: reference.to_string(),
                message: format!("Authentication failed: {}", e),
            })?;
        Ok(())
    }

    /// Convert an ImageReference to an oci-distribution Reference.
    fn to_oci_reference(&self, reference: &ImageReference) -> Result<Reference> {
        let ref_str = match (&reference.tag, &reference.digest) {
            (Some(tag), Some(digest)) => format!(
                "{}/{}:{}@{}",
                reference.registry, reference.repository, tag, digest
            ),
            (None, Some(digest)) => {
                format!("{}/{}@{}", reference.registry, reference.repository, digest)
            }
            (Some(tag), None) => format!("{}/{}:{}", reference.registry, reference.repository, tag),
            (None, None) => format!("{}/{}:latest", reference.registry, reference.repository),
        };

        ref_str
            .parse::<Reference>()
            .map_err(|e| OptimizeError::ReferenceError {
                reference: ref_str.clone(),
                message: e.to_string(),
            })
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for RegistryClient {
    async fn get(&self, reference: &ImageReference) -> Result<RemoteDescriptor> {
        let oci_ref = self.to_oci_reference(reference)?;
        let auth = self.auth.to_oci_auth();

        let (manifest, digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &auth, ACCEPTED_MANIFEST_TYPES)
            .await
            .map_err(|e| OptimizeError::FetchError {
                reference: reference.to_string(),
                message: format!("Failed to pull manifest: {}", e),
            })?;

        let media_type = sniff_media_type(&manifest).map_err(|e| OptimizeError::FetchError {
            reference: reference.to_string(),
            message: format!("Unreadable manifest: {}", e),
        })?;

        tracing::debug!(
            reference = %reference,
            digest = %digest,
            media_type = media_type.as_deref().unwrap_or("<none>"),
            "Fetched manifest"
        );

        Ok(RemoteDescriptor {
            reference: reference.clone(),
            media_type,
            digest,
            manifest,
        })
    }

    async fn image(&self, reference: &ImageReference, manifest: &Manifest) -> Result<Image> {
        let oci_ref = self.to_oci_reference(reference)?;
        let fetch_err = |message: String| OptimizeError::FetchError {
            reference: reference.to_string(),
            message,
        };

        let mut config_data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &to_oci_descriptor(&manifest.config), &mut config_data)
            .await
            .map_err(|e| fetch_err(format!("Failed to pull config blob: {}", e)))?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for desc in &manifest.layers {
            tracing::debug!(
                digest = %desc.digest,
                size = desc.size,
                "Pulling layer"
            );

            let mut layer_data: Vec<u8> = Vec::new();
            self.client
                .pull_blob(&oci_ref, &to_oci_descriptor(desc), &mut layer_data)
                .await
                .map_err(|e| fetch_err(format!("Failed to pull layer {}: {}", desc.digest, e)))?;

            layers.push(Layer::from_blob(desc.media_type.clone(), layer_data));
        }

        Ok(Image::from_parts(
            manifest
                .media_type
                .clone()
                .unwrap_or_else(oci_manifest_media_type),
            manifest.config.media_type.clone(),
            config_data,
            layers,
        ))
    }
}

#[async_trait]
impl Publisher for RegistryClient {
    async fn write_image(&self, reference: &ImageReference, image: &Image) -> Result<PushResult> {
        let oci_ref = self.to_oci_reference(reference)?;

        tracing::info!(
            reference = %reference,
            layers = image.layers().len(),
            "Pushing image to registry"
        );

        self.authenticate_push(&oci_ref, reference).await?;
        let manifest_url = self.push_image_content(&oci_ref, reference, image).await?;
        let digest = image.digest()?;

        tracing::info!(
            reference = %reference,
            digest = %digest,
            "Image pushed successfully"
        );

        Ok(PushResult {
            digest,
            manifest_url,
        })
    }

    async fn write_index(&self, reference: &ImageReference, index: &ImageIndex) -> Result<PushResult> {
        let oci_ref = self.to_oci_reference(reference)?;

        tracing::info!(
            reference = %reference,
            images = index.entries().len(),
            "Pushing index to registry"
        );

        self.authenticate_push(&oci_ref, reference).await?;

        // Children go up by digest first so the index never points at a missing manifest.
        for entry in index.entries() {
            let child_ref = reference.with_digest(&entry.descriptor.digest);
            let child_oci_ref = self.to_oci_reference(&child_ref)?;
            self.push_image_content(&child_oci_ref, &child_ref, &entry.image)
                .await?;
        }

        let raw = index.raw_manifest()?;
        let digest = sha256_digest(&raw);
        let media_type = if index.media_type().is_empty() {
            oci_index_media_type()
        } else {
            index.media_type().to_string()
        };
        let manifest_url = self
            .client
            .push_manifest_raw(
                &oci_ref,
                raw,
                media_type.parse().map_err(|e| OptimizeError::PublishError {
                    reference: reference.to_string(),
                    message: format!("Invalid index media type: {}", e),
                })?,
            )
            .await
            .map_err(|e| OptimizeError::PublishError {
                reference: reference.to_string(),
                message: format!("Failed to push index: {}", e),
            })?;

        tracing::info!(
            reference = %reference,
            digest = %digest,
            "Index pushed successfully"
        );

        Ok(PushResult {
            digest,
            manifest_url,
        })
    }
}

fn to_oci_descriptor(desc: &Descriptor) -> OciDescriptor {
    OciDescriptor {
        media_type: desc.media_type.clone(),
        digest: desc.digest.clone(),
        size: desc.size as i64,
        urls: desc.urls.clone(),
        ..Default::default()
    }
}
