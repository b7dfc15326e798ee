//! Image reference resolution.
//!
//! Turns strings like `ghcr.io/org/app:v1` into registry coordinates.

use a3s_stargz_core::error::{OptimizeError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, optionally with port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx")
    pub repository: String,
    /// Tag (e.g., "latest", "v0.1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `localhost:5000/image@sha256:abc...` → digest reference
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |message: String| OptimizeError::ReferenceError {
            reference: reference.to_string(),
            message,
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty image reference".to_string()));
        }

        let (name_tag, digest) = match trimmed.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(invalid("invalid digest, expected algorithm:hex".to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (trimmed, None),
        };

        let (name, tag) = split_tag(name_tag);
        if let Some(ref t) = tag {
            if t.is_empty() {
                return Err(invalid("empty tag".to_string()));
            }
        }

        let (registry, repository) = split_registry(name).map_err(invalid)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The same repository, addressed by `digest` instead of a tag.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// Tag or digest used when addressing the manifest.
    pub fn manifest_ref(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split `name[:tag]`. A colon before the last `/` belongs to a registry port.
fn split_tag(name_tag: &str) -> (&str, Option<String>) {
    let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    match name_tag[last_segment_start..].rfind(':') {
        Some(colon) => {
            let colon = last_segment_start + colon;
            let candidate = &name_tag[colon + 1..];
            // `host:5000` with no repository path is a port, not a tag
            if last_segment_start == 0
                && !candidate.is_empty()
                && candidate.chars().all(|c| c.is_ascii_digit())
            {
                (name_tag, None)
            } else {
                (&name_tag[..colon], Some(candidate.to_string()))
            }
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository.
///
/// The first component is a registry when it contains a dot or a colon, or
/// is `localhost`.
fn split_registry(name: &str) -> std::result::Result<(String, String), String> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err("empty repository".to_string());
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    Ok((DEFAULT_REGISTRY.to_string(), repository))
}
