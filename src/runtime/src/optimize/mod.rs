//! Image and index optimization.
//!
//! ```text
//! Optimizer::optimize
//!   ├─ route(kind, platform)
//!   ├─ image path:  optimize_and_publish_image → optimize_image → optimize_layer
//!   └─ index path:  optimize_and_publish_index → optimize_index → optimize_image → ...
//! ```
//!
//! Missing priority paths flow upward as an intersection at every level: a
//! path found in any layer satisfies the image, a path found in any image
//! satisfies the index. Nothing is published while that set is non-empty.

mod dispatch;
mod image;
mod index;
mod layer;

use a3s_stargz_core::error::{OptimizeError, Result, ResultExt};
use a3s_stargz_core::paths::PrioritySet;

use crate::oci::{Fetcher, ImageReference, Platform, PushResult, Publisher};
use crate::stargz::LayerEncoder;

pub use dispatch::{route, Route};
pub use image::{optimize_and_publish_image, optimize_image};
pub use index::{optimize_and_publish_index, optimize_index};
pub use layer::optimize_layer;

/// Optimizes a remote image or index from one reference to another.
pub struct Optimizer<E> {
    encoder: E,
    platform: Option<Platform>,
}

impl<E: LayerEncoder> Optimizer<E> {
    pub fn new(encoder: E) -> Self {
        Self {
            encoder,
            platform: None,
        }
    }

    /// Only optimize the image for `platform` when the source is an index.
    pub fn with_platform(mut self, platform: Option<Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> Option<&Platform> {
        self.platform.as_ref()
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Optimize `src` and publish the result to `dst`.
    ///
    /// Fails with `MissingPriorityFiles` when a path in `prioritize` is not
    /// present anywhere in the source, in which case nothing is published.
    pub async fn optimize<F, P>(
        &self,
        fetcher: &F,
        publisher: &P,
        src: &str,
        dst: &str,
        prioritize: &PrioritySet,
    ) -> Result<PushResult>
    where
        F: Fetcher + ?Sized,
        P: Publisher + ?Sized,
    {
        let src_ref = ImageReference::parse(src).context(|| format!("parsing reference {:?}", src))?;
        let dst_ref =
            ImageReference::parse(dst).context(|| format!("parsing reference for {:?}", dst))?;

        tracing::info!("Optimizing from {} to {}", src_ref, dst_ref);

        let desc = fetcher
            .get(&src_ref)
            .await
            .context(|| format!("fetching {:?}", src))?;

        let result = match route(desc.kind(), self.platform.is_some()) {
            Route::Index => {
                let index = desc.index().context(|| "failed to optimize index")?;
                optimize_and_publish_index(
                    fetcher,
                    publisher,
                    &self.encoder,
                    &index,
                    &dst_ref,
                    prioritize,
                )
                .await
                .context(|| "failed to optimize index")?
            }
            Route::Unsupported => {
                return Err(OptimizeError::UnsupportedFormat(
                    "docker schema 1 images are not supported".to_string(),
                ))
            }
            Route::Image => optimize_and_publish_image(
                fetcher,
                publisher,
                &self.encoder,
                &desc,
                self.platform.as_ref(),
                &dst_ref,
                prioritize,
            )
            .await
            .context(|| "failed to optimize image")?,
        };

        tracing::info!(
            reference = %dst_ref,
            digest = %result.digest,
            "Optimized image published"
        );

        Ok(result)
    }
}
