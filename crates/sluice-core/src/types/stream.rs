use crate::error::{Result, SluiceError};
use crate::types::request::{OperationRequest, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tolerance used when comparing key-range boundaries.
pub const RANGE_EPSILON: f64 = 1e-9;

/// Most segments a stream configuration or a single scale may create.
pub const MAX_SEGMENTS: u32 = 1024;

/// Stable identity of a stream: a `(scope, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub scope: String,
    pub name: String,
}

impl StreamId {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Key used for per-stream notification and ordering maps.
    pub fn key(&self) -> String {
        format!("{}/{}", self.scope, self.name)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("scope", &self.scope), ("name", &self.name)] {
            if value.is_empty() {
                return Err(SluiceError::InvalidArgument(format!(
                    "stream {field} must not be empty"
                )));
            }
            if value.contains('/') {
                return Err(SluiceError::InvalidArgument(format!(
                    "stream {field} '{value}' must not contain '/'"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// Administrative lifecycle state of a stream, owned by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    Creating,
    Active,
    Updating,
    Scaling,
    Truncating,
    Sealing,
    Sealed,
    Deleting,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Creating => "CREATING",
            StreamState::Active => "ACTIVE",
            StreamState::Updating => "UPDATING",
            StreamState::Scaling => "SCALING",
            StreamState::Truncating => "TRUNCATING",
            StreamState::Sealing => "SEALING",
            StreamState::Sealed => "SEALED",
            StreamState::Deleting => "DELETING",
        }
    }

    /// States held while a pipeline handler owns the stream.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            StreamState::Updating
                | StreamState::Scaling
                | StreamState::Truncating
                | StreamState::Sealing
                | StreamState::Deleting
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the number of segments of a stream may change over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScalingPolicy {
    /// Segment count never changes automatically.
    Fixed { min_segments: u32 },
    /// Scale on events per second per segment.
    ByEventRate {
        target_rate: u32,
        scale_factor: u32,
        min_segments: u32,
    },
    /// Scale on kilobytes per second per segment.
    ByDataRate {
        target_kbps: u32,
        scale_factor: u32,
        min_segments: u32,
    },
}

impl ScalingPolicy {
    pub fn fixed(min_segments: u32) -> Self {
        ScalingPolicy::Fixed { min_segments }
    }

    pub fn min_segments(&self) -> u32 {
        match self {
            ScalingPolicy::Fixed { min_segments }
            | ScalingPolicy::ByEventRate { min_segments, .. }
            | ScalingPolicy::ByDataRate { min_segments, .. } => *min_segments,
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, ScalingPolicy::Fixed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetentionPolicy {
    ByTime { millis: u64 },
    BySize { bytes: u64 },
}

/// User-supplied stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    pub scaling_policy: ScalingPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policy: Option<RetentionPolicy>,
}

impl StreamConfiguration {
    pub fn new(scaling_policy: ScalingPolicy) -> Self {
        Self {
            scaling_policy,
            retention_policy: None,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention_policy = Some(retention);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.scaling_policy.min_segments() == 0 {
            return Err(SluiceError::InvalidArgument(
                "min_segments must be at least 1".into(),
            ));
        }
        if self.scaling_policy.min_segments() > MAX_SEGMENTS {
            return Err(SluiceError::InvalidArgument(format!(
                "min_segments must be at most {MAX_SEGMENTS}"
            )));
        }
        match &self.scaling_policy {
            ScalingPolicy::ByEventRate {
                target_rate: target,
                scale_factor,
                ..
            }
            | ScalingPolicy::ByDataRate {
                target_kbps: target,
                scale_factor,
                ..
            } if *target == 0 || *scale_factor == 0 => Err(SluiceError::InvalidArgument(
                "rate based scaling needs a non-zero target and scale factor".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Half-open key range `[start, end)` within `[0.0, 1.0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: f64,
    pub end: f64,
}

impl KeyRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start >= 0.0 && self.end <= 1.0 + RANGE_EPSILON && self.start < self.end
    }

    /// Split into `parts` equal, contiguous ranges.
    pub fn split(&self, parts: u32) -> Vec<KeyRange> {
        let width = (self.end - self.start) / f64::from(parts);
        (0..parts)
            .map(|i| {
                let start = self.start + width * f64::from(i);
                let end = if i + 1 == parts {
                    self.end
                } else {
                    start + width
                };
                KeyRange::new(start, end)
            })
            .collect()
    }

    /// Ranges of `count` segments evenly covering the whole key space.
    pub fn uniform(count: u32) -> Vec<KeyRange> {
        KeyRange::new(0.0, 1.0).split(count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub number: u64,
    pub range: KeyRange,
    /// Epoch in which the segment was created.
    pub epoch: u32,
}

/// Position within a stream: segment number -> offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCut {
    pub positions: BTreeMap<u64, u64>,
}

impl StreamCut {
    pub fn new(positions: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            positions: positions.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Everything the metadata store holds for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub id: StreamId,
    pub state: StreamState,
    pub configuration: StreamConfiguration,
    pub segments: Vec<Segment>,
    pub epoch: u32,
    pub next_segment_number: u64,
    pub truncation: Option<StreamCut>,
    /// Request currently owning the transitional state, if any.
    pub active_request: Option<OperationRequest>,
    /// Most recently committed request.
    pub last_applied: Option<RequestId>,
    /// Bumped by the store on every successful write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl StreamRecord {
    /// New record in `CREATING` with `min_segments` uniform segments.
    pub fn new(id: StreamId, configuration: StreamConfiguration) -> Self {
        let segments: Vec<Segment> = KeyRange::uniform(configuration.scaling_policy.min_segments())
            .into_iter()
            .enumerate()
            .map(|(i, range)| Segment {
                number: i as u64,
                range,
                epoch: 0,
            })
            .collect();
        let next_segment_number = segments.len() as u64;

        Self {
            id,
            state: StreamState::Creating,
            configuration,
            segments,
            epoch: 0,
            next_segment_number,
            truncation: None,
            active_request: None,
            last_applied: None,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn segment(&self, number: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.number == number)
    }

    /// Whether `request` is the one that put the stream in its current state.
    pub fn is_owned_by(&self, request_id: &RequestId) -> bool {
        self.active_request
            .as_ref()
            .is_some_and(|r| &r.request_id == request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_ranges_cover_key_space() {
        let ranges = KeyRange::uniform(3);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].start, 0.0);
        assert_eq!(ranges[2].end, 1.0);
        for pair in ranges.windows(2) {
            assert!((pair[0].end - pair[1].start).abs() < RANGE_EPSILON);
        }
    }

    #[test]
    fn new_record_lays_out_min_segments() {
        let record = StreamRecord::new(
            StreamId::new("scope", "s"),
            StreamConfiguration::new(ScalingPolicy::fixed(2)),
        );
        assert_eq!(record.state, StreamState::Creating);
        assert_eq!(record.segments.len(), 2);
        assert_eq!(record.next_segment_number, 2);
        assert!(record.segment(1).is_some());
        assert!(record.segment(2).is_none());
    }

    #[test]
    fn stream_id_validation() {
        assert!(StreamId::new("scope", "name").validate().is_ok());
        assert!(StreamId::new("", "name").validate().is_err());
        assert!(StreamId::new("scope", "a/b").validate().is_err());
    }

    #[test]
    fn configuration_validation() {
        assert!(StreamConfiguration::new(ScalingPolicy::fixed(0))
            .validate()
            .is_err());
        let by_rate = ScalingPolicy::ByEventRate {
            target_rate: 100,
            scale_factor: 0,
            min_segments: 1,
        };
        assert!(StreamConfiguration::new(by_rate).validate().is_err());
        assert!(StreamConfiguration::new(ScalingPolicy::fixed(1))
            .validate()
            .is_ok());
    }

    #[test]
    fn state_serializes_screaming_case() {
        let json = serde_json::to_string(&StreamState::Sealing).unwrap();
        assert_eq!(json, "\"SEALING\"");
        assert!(StreamState::Deleting.is_transitional());
        assert!(!StreamState::Sealed.is_transitional());
    }
}
