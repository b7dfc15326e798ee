//! Routing a fetched manifest to the right optimization path.

use crate::oci::ManifestKind;

/// Where a fetched manifest goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Optimize a single image. For an index this means the child matching
    /// the requested platform.
    Image,
    /// Optimize every image of an index.
    Index,
    /// Refuse: Docker schema 1.
    Unsupported,
}

/// Pick the path for a manifest of `kind`.
pub fn route(kind: ManifestKind, has_platform: bool) -> Route {
    match kind {
        ManifestKind::Index if has_platform => Route::Image,
        ManifestKind::Index => Route::Index,
        ManifestKind::LegacySchema1 => Route::Unsupported,
        ManifestKind::Image => Route::Image,
    }
}
