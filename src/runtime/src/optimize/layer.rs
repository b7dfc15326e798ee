//! Single-layer optimization.

use a3s_stargz_core::error::Result;
use a3s_stargz_core::paths::{MissingSet, PrioritySet};

use crate::oci::{media_types, Layer};
use crate::stargz::LayerEncoder;

/// Re-encode one layer with `prioritize` moved to the front.
///
/// Returns the new layer, tagged with the Docker gzip layer media type, and
/// the priority paths the encoder could not find in this layer. Paths the
/// encoder reports that were never asked for are dropped.
pub fn optimize_layer<E>(
    encoder: &E,
    layer: &Layer,
    prioritize: &PrioritySet,
) -> Result<(Layer, MissingSet)>
where
    E: LayerEncoder + ?Sized,
{
    let paths = prioritize.to_vec();
    let encoded = {
        let mut reader = layer.uncompressed()?;
        encoder.encode(&mut *reader, &paths)?
    };

    let missing: MissingSet = encoded
        .missing
        .into_iter()
        .filter(|p| prioritize.contains(p))
        .collect();

    Ok((encoded.layer.with_media_type(media_types::DOCKER_LAYER), missing))
}
