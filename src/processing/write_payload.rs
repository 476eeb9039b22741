//! Aggregated historian write payload

use crate::protocol::messages::{FlatOutput, WritePayload, WriteTag};
use std::collections::HashMap;
use tracing::{info, warn};

/// Collect the outputs that qualify for a historian write
///
/// An output qualifies when its sensor identifier has a non-empty tag id in
/// `tag_ids` and its status is true. Returns `None` when nothing qualifies.
pub fn build_write_payload(
    outputs: &[FlatOutput],
    tag_ids: &HashMap<String, String>,
    historian_id: &str,
) -> Option<WritePayload> {
    let mut tags = Vec::new();

    for output in outputs {
        let Some(tag_id) = tag_ids.get(&output.sensor).filter(|t| !t.is_empty()) else {
            warn!(sensor = %output.sensor, "Missing tag id mapping; skipping tag");
            continue;
        };

        if !output.status {
            info!(sensor = %output.sensor, "Status is false; skipping tag");
            continue;
        }

        tags.push(WriteTag {
            tag_id: tag_id.clone(),
            sensor_id: output.sensor.clone(),
            historian_id: historian_id.to_string(),
            value: output.value.clone(),
        });
    }

    if tags.is_empty() {
        None
    } else {
        Some(WritePayload::new(tags))
    }
}
