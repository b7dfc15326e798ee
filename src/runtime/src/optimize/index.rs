//! Index optimization and the index publish path.

use a3s_stargz_core::error::{MissingScope, OptimizeError, Result, ResultExt};
use a3s_stargz_core::paths::{MissingSet, PrioritySet};

use super::image::optimize_image;
use crate::oci::{Fetcher, ImageIndex, ImageReference, PushResult, Publisher, RemoteIndex};
use crate::stargz::LayerEncoder;

/// Optimize every child image of `index`, in order.
///
/// A priority path counts as missing only if it is missing from every child.
/// Each output child keeps the source child's urls, media type, annotations
/// and platform; the output index keeps the source index media type.
pub async fn optimize_index<F, E>(
    fetcher: &F,
    encoder: &E,
    index: &RemoteIndex,
    prioritize: &PrioritySet,
) -> Result<(MissingSet, ImageIndex)>
where
    F: Fetcher + ?Sized,
    E: LayerEncoder + ?Sized,
{
    let mut missing = prioritize.clone();
    let mut optimized = ImageIndex::new(index.media_type());

    for (i, child) in index.index_manifest().manifests.iter().enumerate() {
        let image = index
            .image(fetcher, child)
            .await
            .context(|| format!("reading image {} ({})", i, child.digest))?;
        let (image_missing, image) = optimize_image(encoder, &image, prioritize)
            .context(|| format!("optimizing image {} ({})", i, child.digest))?;

        tracing::debug!(
            image = i,
            digest = %child.digest,
            missing = image_missing.len(),
            "Optimized image"
        );

        missing = missing.intersection(&image_missing);
        optimized.push(child, image)?;
    }

    Ok((missing, optimized))
}

/// Optimize the index behind `desc` and publish it to `dst`.
///
/// Nothing is published when any priority path is missing from all images.
pub async fn optimize_and_publish_index<F, P, E>(
    fetcher: &F,
    publisher: &P,
    encoder: &E,
    index: &RemoteIndex,
    dst: &ImageReference,
    prioritize: &PrioritySet,
) -> Result<PushResult>
where
    F: Fetcher + ?Sized,
    P: Publisher + ?Sized,
    E: LayerEncoder + ?Sized,
{
    let (missing, optimized) = optimize_index(fetcher, encoder, index, prioritize).await?;

    if !missing.is_empty() {
        return Err(OptimizeError::MissingPriorityFiles {
            scope: MissingScope::Index,
            paths: missing.to_vec(),
        });
    }

    publisher.write_index(dst, &optimized).await
}
