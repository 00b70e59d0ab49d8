//! Quick-then-full metadata extraction.

use std::path::Path;

use tracing::{debug, warn};
use vprep_media::{MediaResult, MetadataExtractor};
use vprep_models::VideoMetadata;

/// Try the quick probe, then the full probe.
///
/// The error from the full probe is returned when both fail.
pub async fn extract_metadata(extractor: &dyn MetadataExtractor, path: &Path) -> MediaResult<VideoMetadata> {
    match extractor.extract_quick(path).await {
        Ok(metadata) => Ok(metadata),
        Err(quick_err) => {
            debug!(path = %path.display(), error = %quick_err, "Quick probe failed, running full probe");
            extractor.extract_full(path).await.map_err(|e| {
                warn!(path = %path.display(), error = %e, "Metadata extraction failed");
                e
            })
        }
    }
}
