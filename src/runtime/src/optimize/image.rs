//! Whole-image optimization and the image publish path.

use a3s_stargz_core::error::{MissingScope, OptimizeError, Result, ResultExt};
use a3s_stargz_core::paths::{MissingSet, PrioritySet};

use super::layer::optimize_layer;
use crate::oci::{Fetcher, Image, ImageReference, Platform, PushResult, Publisher, RemoteDescriptor};
use crate::stargz::LayerEncoder;

/// Rewrite every layer of `image` as eStargz.
///
/// The new image starts from a copy of the source config with build history
/// and diff-IDs cleared. A priority path counts as missing only if no layer
/// contains it. A non-empty missing set is returned, not raised.
pub fn optimize_image<E>(
    encoder: &E,
    image: &Image,
    prioritize: &PrioritySet,
) -> Result<(MissingSet, Image)>
where
    E: LayerEncoder + ?Sized,
{
    let mut config = image.config_file().context(|| "reading image config")?;
    config.history.clear();
    config.rootfs.diff_ids.clear();

    let mut optimized = Image::new(&config)?;
    let mut missing = prioritize.clone();

    for (i, layer) in image.layers().iter().enumerate() {
        let (new_layer, layer_missing) = optimize_layer(encoder, layer, prioritize)
            .context(|| format!("optimizing layer {} ({})", i, layer.digest()))?;

        tracing::debug!(
            layer = i,
            digest = %layer.digest(),
            missing = layer_missing.len(),
            "Optimized layer"
        );

        missing = missing.intersection(&layer_missing);
        optimized.append(new_layer);
    }

    Ok((missing, optimized))
}

/// Resolve `desc` to an image, optimize it and publish it to `dst`.
///
/// Nothing is published when any priority path is missing from the image.
pub async fn optimize_and_publish_image<F, P, E>(
    fetcher: &F,
    publisher: &P,
    encoder: &E,
    desc: &RemoteDescriptor,
    platform: Option<&Platform>,
    dst: &ImageReference,
    prioritize: &PrioritySet,
) -> Result<PushResult>
where
    F: Fetcher + ?Sized,
    P: Publisher + ?Sized,
    E: LayerEncoder + ?Sized,
{
    let image = desc.image(fetcher, platform).await?;
    let (missing, optimized) = optimize_image(encoder, &image, prioritize)?;

    if !missing.is_empty() {
        return Err(OptimizeError::MissingPriorityFiles {
            scope: MissingScope::Image,
            paths: missing.to_vec(),
        });
    }

    publisher.write_image(dst, &optimized).await
}
