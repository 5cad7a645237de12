use super::run_transition;
use crate::handler::RequestHandler;
use async_trait::async_trait;
use sluice_core::error::{Result, SluiceError};
use sluice_core::traits::MetadataStore;
use sluice_core::types::stream::RANGE_EPSILON;
use sluice_core::types::{
    KeyRange, OperationKind, OperationPayload, OperationRequest, ScaleDirection, Segment,
    StreamRecord, TaskOutcome,
};
use std::sync::Arc;

/// SCALING -> ACTIVE with a new segment layout (manual scale).
pub struct ScaleHandler {
    store: Arc<dyn MetadataStore>,
}

impl ScaleHandler {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestHandler for ScaleHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Scale
    }

    async fn process(&self, request: &OperationRequest) -> TaskOutcome {
        run_transition(self.store.as_ref(), request, plan_scale).await
    }
}

/// SCALING -> ACTIVE after a split or merge triggered by load.
pub struct AutoScaleHandler {
    store: Arc<dyn MetadataStore>,
}

impl AutoScaleHandler {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestHandler for AutoScaleHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::AutoScale
    }

    async fn process(&self, request: &OperationRequest) -> TaskOutcome {
        run_transition(self.store.as_ref(), request, plan_auto_scale).await
    }
}

pub fn plan_scale(record: &StreamRecord, request: &OperationRequest) -> Result<StreamRecord> {
    let OperationPayload::Scale(scale) = &request.payload else {
        return Err(SluiceError::InvalidArgument(format!(
            "scale handler received {}",
            request.kind()
        )));
    };
    apply_scale(record, &scale.sealed_segments, &scale.new_ranges)
}

/// Translate a split or merge of one segment into a scale.
///
/// Rejected when the stream's scaling policy is fixed.
pub fn plan_auto_scale(record: &StreamRecord, request: &OperationRequest) -> Result<StreamRecord> {
    let OperationPayload::AutoScale { segment, direction } = &request.payload else {
        return Err(SluiceError::InvalidArgument(format!(
            "auto-scale handler received {}",
            request.kind()
        )));
    };
    if record.configuration.scaling_policy.is_fixed() {
        return Err(SluiceError::InvalidArgument(format!(
            "stream {} has a fixed scaling policy",
            record.id
        )));
    }
    let target = record
        .segment(*segment)
        .ok_or_else(|| SluiceError::InvalidArgument(format!("segment {segment} is not active")))?;

    match direction {
        ScaleDirection::Split { into } => {
            direction.validate()?;
            apply_scale(record, &[target.number], &target.range.split(*into))
        }
        ScaleDirection::Merge => {
            let min_segments = record.configuration.scaling_policy.min_segments() as usize;
            if record.segments.len() <= min_segments {
                return Err(SluiceError::InvalidArgument(format!(
                    "merge would drop below {min_segments} segments"
                )));
            }
            let neighbour = record
                .segments
                .iter()
                .find(|s| (s.range.start - target.range.end).abs() < RANGE_EPSILON)
                .ok_or_else(|| {
                    SluiceError::InvalidArgument(format!(
                        "segment {segment} has no right-hand neighbour"
                    ))
                })?;
            let merged = KeyRange::new(target.range.start, neighbour.range.end);
            apply_scale(record, &[target.number, neighbour.number], &[merged])
        }
    }
}

/// Replace `sealed` with segments for `new_ranges` in a new epoch.
///
/// The new ranges must cover exactly the key space of the sealed segments.
fn apply_scale(
    record: &StreamRecord,
    sealed: &[u64],
    new_ranges: &[KeyRange],
) -> Result<StreamRecord> {
    if sealed.is_empty() || new_ranges.is_empty() {
        return Err(SluiceError::InvalidArgument(
            "scale needs segments to seal and ranges to create".into(),
        ));
    }

    let mut sealed_ranges = Vec::with_capacity(sealed.len());
    for (i, number) in sealed.iter().enumerate() {
        if sealed[..i].contains(number) {
            return Err(SluiceError::InvalidArgument(format!(
                "segment {number} listed twice"
            )));
        }
        let segment = record.segment(*number).ok_or_else(|| {
            SluiceError::InvalidArgument(format!("segment {number} is not active"))
        })?;
        sealed_ranges.push(segment.range);
    }
    if let Some(bad) = new_ranges.iter().find(|r| !r.is_valid()) {
        return Err(SluiceError::InvalidArgument(format!(
            "invalid key range [{}, {})",
            bad.start, bad.end
        )));
    }

    let sealed_span = contiguous_span(&mut sealed_ranges).ok_or_else(|| {
        SluiceError::InvalidArgument("sealed segments are not contiguous".into())
    })?;
    let mut created = new_ranges.to_vec();
    let new_span = contiguous_span(&mut created).ok_or_else(|| {
        SluiceError::InvalidArgument("new key ranges overlap or leave gaps".into())
    })?;
    if (sealed_span.start - new_span.start).abs() > RANGE_EPSILON
        || (sealed_span.end - new_span.end).abs() > RANGE_EPSILON
    {
        return Err(SluiceError::InvalidArgument(format!(
            "new ranges cover [{}, {}) but sealed segments cover [{}, {})",
            new_span.start, new_span.end, sealed_span.start, sealed_span.end
        )));
    }

    let mut next = record.clone();
    next.epoch += 1;
    next.segments.retain(|s| !sealed.contains(&s.number));
    for range in created {
        next.segments.push(Segment {
            number: next.next_segment_number,
            range,
            epoch: next.epoch,
        });
        next.next_segment_number += 1;
    }
    next.segments
        .sort_by(|a, b| a.range.start.total_cmp(&b.range.start));
    Ok(next)
}

/// Sort `ranges` and return their union if it has no gaps or overlaps.
fn contiguous_span(ranges: &mut [KeyRange]) -> Option<KeyRange> {
    ranges.sort_by(|a, b| a.start.total_cmp(&b.start));
    let first = ranges.first()?;
    let mut end = first.end;
    for range in &ranges[1..] {
        if (range.start - end).abs() > RANGE_EPSILON {
            return None;
        }
        end = range.end;
    }
    Some(KeyRange::new(first.start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{active_record, claimed};
    use sluice_core::types::{
        ScaleRequest, ScalingPolicy, StreamConfiguration, StreamState, TaskResult,
    };
    use sluice_store::InMemoryMetadataStore;

    fn scalable(segments: u32) -> StreamRecord {
        let mut record = active_record(segments);
        record.configuration = StreamConfiguration::new(ScalingPolicy::ByEventRate {
            target_rate: 100,
            scale_factor: 2,
            min_segments: 1,
        });
        record
    }

    fn scale(sealed: Vec<u64>, new_ranges: Vec<KeyRange>) -> OperationPayload {
        OperationPayload::Scale(ScaleRequest {
            sealed_segments: sealed,
            new_ranges,
        })
    }

    #[test]
    fn manual_scale_replaces_segments_in_new_epoch() {
        let record = active_record(2);
        let request = OperationRequest::new(
            record.id.clone(),
            scale(
                vec![1],
                vec![KeyRange::new(0.5, 0.75), KeyRange::new(0.75, 1.0)],
            ),
        );

        let planned = plan_scale(&record, &request).unwrap();
        assert_eq!(planned.epoch, 1);
        let numbers: Vec<_> = planned.segments.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![0, 2, 3]);
        assert_eq!(planned.next_segment_number, 4);
        assert!(planned.segments[1..].iter().all(|s| s.epoch == 1));
    }

    #[test]
    fn manual_scale_must_cover_sealed_key_space() {
        let record = active_record(2);
        let gap = OperationRequest::new(
            record.id.clone(),
            scale(vec![1], vec![KeyRange::new(0.5, 0.7), KeyRange::new(0.8, 1.0)]),
        );
        assert!(plan_scale(&record, &gap).is_err());

        let short = OperationRequest::new(
            record.id.clone(),
            scale(vec![1], vec![KeyRange::new(0.5, 0.9)]),
        );
        assert!(plan_scale(&record, &short).is_err());

        let unknown = OperationRequest::new(
            record.id.clone(),
            scale(vec![7], vec![KeyRange::new(0.5, 1.0)]),
        );
        assert!(plan_scale(&record, &unknown).is_err());
    }

    #[test]
    fn auto_scale_split_and_merge() {
        let record = scalable(2);
        let split = OperationRequest::new(
            record.id.clone(),
            OperationPayload::AutoScale {
                segment: 0,
                direction: ScaleDirection::Split { into: 2 },
            },
        );
        let planned = plan_auto_scale(&record, &split).unwrap();
        assert_eq!(planned.segments.len(), 3);
        assert_eq!(planned.segments[0].range, KeyRange::new(0.0, 0.25));

        let merge = OperationRequest::new(
            record.id.clone(),
            OperationPayload::AutoScale {
                segment: 0,
                direction: ScaleDirection::Merge,
            },
        );
        let merged = plan_auto_scale(&record, &merge).unwrap();
        assert_eq!(merged.segments.len(), 1);
        assert_eq!(merged.segments[0].range, KeyRange::new(0.0, 1.0));
    }

    #[test]
    fn auto_scale_split_beyond_bound_is_rejected() {
        let record = scalable(1);
        let request = OperationRequest::new(
            record.id.clone(),
            OperationPayload::AutoScale {
                segment: 0,
                direction: ScaleDirection::Split { into: u32::MAX },
            },
        );
        let err = plan_auto_scale(&record, &request).unwrap_err();
        assert!(matches!(err, SluiceError::InvalidArgument(_)));
    }

    #[test]
    fn auto_scale_merge_of_last_segment_has_no_neighbour() {
        let record = scalable(2);
        let request = OperationRequest::new(
            record.id.clone(),
            OperationPayload::AutoScale {
                segment: 1,
                direction: ScaleDirection::Merge,
            },
        );
        assert!(plan_auto_scale(&record, &request).is_err());
    }

    #[tokio::test]
    async fn auto_scale_on_fixed_policy_fails_and_releases() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let request = claimed(
            &store,
            active_record(2),
            OperationPayload::AutoScale {
                segment: 0,
                direction: ScaleDirection::Split { into: 2 },
            },
        )
        .await;

        let outcome = AutoScaleHandler::new(store.clone()).process(&request).await;
        assert!(matches!(outcome.result, TaskResult::Failed(ref r) if r.contains("fixed")));
        let after = store.get_stream(&request.stream).await.unwrap().unwrap();
        assert_eq!(after.state, StreamState::Active);
        assert_eq!(after.segments.len(), 2);
    }
}
