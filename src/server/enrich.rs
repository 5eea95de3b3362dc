//! Object coordinate enrichment.

use std::path::Path;

use crate::protocol::ObjectInfo;
use crate::vision::ObjectDetector;

/// Localize every object in `frame` concurrently and attach the first box
/// found for each.
///
/// Objects without detections are left untouched. Per-object failures are
/// logged and do not affect the other objects. Returns `true` if at least one
/// object got coordinates.
pub async fn enrich_objects(
    detector: &dyn ObjectDetector,
    frame: &Path,
    objects: &mut [ObjectInfo],
) -> bool {
    let futures: Vec<_> = objects
        .iter()
        .map(|object| detector.detect(frame, &object.title))
        .collect();
    let results = futures::future::join_all(futures).await;

    let mut located = false;
    for (object, result) in objects.iter_mut().zip(results) {
        match result {
            Ok(boxes) => match boxes.into_iter().next() {
                Some(bbox) => {
                    object.locate(bbox);
                    located = true;
                }
                None => {
                    tracing::debug!(object = %object.title, frame = %frame.display(), "Object not found");
                }
            },
            Err(e) => {
                tracing::warn!(object = %object.title, error = %e, "Object detection failed");
            }
        }
    }
    located
}
