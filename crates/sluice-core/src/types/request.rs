use crate::error::SluiceError;
use crate::types::stream::{KeyRange, StreamConfiguration, StreamCut, StreamId, StreamState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of an operation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Kind of control-plane operation; the pipeline dispatches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Update,
    Scale,
    AutoScale,
    Seal,
    Truncate,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Update,
        OperationKind::AutoScale,
        OperationKind::Scale,
        OperationKind::Seal,
        OperationKind::Truncate,
        OperationKind::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Update => "update",
            OperationKind::Scale => "scale",
            OperationKind::AutoScale => "auto_scale",
            OperationKind::Seal => "seal",
            OperationKind::Truncate => "truncate",
            OperationKind::Delete => "delete",
        }
    }

    /// State the gateway moves the stream into before enqueuing.
    pub fn transitional_state(&self) -> StreamState {
        match self {
            OperationKind::Update => StreamState::Updating,
            OperationKind::Scale | OperationKind::AutoScale => StreamState::Scaling,
            OperationKind::Seal => StreamState::Sealing,
            OperationKind::Truncate => StreamState::Truncating,
            OperationKind::Delete => StreamState::Deleting,
        }
    }

    /// States from which the gateway may start this operation.
    pub fn allowed_from(&self, state: StreamState) -> bool {
        match self {
            OperationKind::Update
            | OperationKind::Scale
            | OperationKind::AutoScale
            | OperationKind::Seal => state == StreamState::Active,
            OperationKind::Truncate => {
                matches!(state, StreamState::Active | StreamState::Sealed)
            }
            OperationKind::Delete => state == StreamState::Sealed,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manual scale: seal some segments and replace them with new key ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub sealed_segments: Vec<u64>,
    pub new_ranges: Vec<KeyRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScaleDirection {
    /// Split one segment into `into` equal parts.
    Split { into: u32 },
    /// Merge the segment with its right-hand neighbour.
    Merge,
}

impl ScaleDirection {
    /// Most parts a single split may produce.
    pub const MAX_SPLIT_PARTS: u32 = 64;

    pub fn validate(&self) -> crate::error::Result<()> {
        match self {
            ScaleDirection::Split { into } if !(2..=Self::MAX_SPLIT_PARTS).contains(into) => {
                Err(SluiceError::InvalidArgument(format!(
                    "a split needs 2 to {} parts, got {into}",
                    Self::MAX_SPLIT_PARTS
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Operation-specific data carried by a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationPayload {
    Update {
        configuration: StreamConfiguration,
    },
    Scale(ScaleRequest),
    AutoScale {
        segment: u64,
        direction: ScaleDirection,
    },
    Seal,
    Truncate {
        cut: StreamCut,
        /// State restored once the truncation commits.
        resume_state: StreamState,
    },
    Delete,
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::Update { .. } => OperationKind::Update,
            OperationPayload::Scale(_) => OperationKind::Scale,
            OperationPayload::AutoScale { .. } => OperationKind::AutoScale,
            OperationPayload::Seal => OperationKind::Seal,
            OperationPayload::Truncate { .. } => OperationKind::Truncate,
            OperationPayload::Delete => OperationKind::Delete,
        }
    }
}

/// A control operation recorded on the durable request queue.
///
/// Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub request_id: RequestId,
    pub stream: StreamId,
    pub payload: OperationPayload,
    pub submitted_at: DateTime<Utc>,
}

impl OperationRequest {
    pub fn new(stream: StreamId, payload: OperationPayload) -> Self {
        Self {
            request_id: RequestId::new(),
            stream,
            payload,
            submitted_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    pub fn transitional_state(&self) -> StreamState {
        self.kind().transitional_state()
    }

    /// State the stream holds once the request commits.
    ///
    /// `None` for deletes: the record is removed.
    pub fn terminal_state(&self) -> Option<StreamState> {
        match &self.payload {
            OperationPayload::Update { .. }
            | OperationPayload::Scale(_)
            | OperationPayload::AutoScale { .. } => Some(StreamState::Active),
            OperationPayload::Seal => Some(StreamState::Sealed),
            OperationPayload::Truncate { resume_state, .. } => Some(*resume_state),
            OperationPayload::Delete => None,
        }
    }

    /// State the stream held before the gateway moved it to the transitional
    /// state. Used to release the stream when the request is rolled back.
    pub fn prior_state(&self) -> StreamState {
        match &self.payload {
            OperationPayload::Truncate { resume_state, .. } => *resume_state,
            OperationPayload::Delete => StreamState::Sealed,
            _ => StreamState::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::stream::ScalingPolicy;

    #[test]
    fn state_table() {
        use OperationKind::*;
        use StreamState::*;

        assert!(Update.allowed_from(Active));
        assert!(!Update.allowed_from(Sealed));
        assert!(Truncate.allowed_from(Sealed));
        assert!(Truncate.allowed_from(Active));
        assert!(Delete.allowed_from(Sealed));
        assert!(!Delete.allowed_from(Active));
        assert!(!Seal.allowed_from(Scaling));

        assert_eq!(AutoScale.transitional_state(), Scaling);
        assert_eq!(Delete.transitional_state(), Deleting);
    }

    #[test]
    fn terminal_states_follow_payload() {
        let id = StreamId::new("scope", "s");
        let update = OperationRequest::new(
            id.clone(),
            OperationPayload::Update {
                configuration: StreamConfiguration::new(ScalingPolicy::fixed(3)),
            },
        );
        assert_eq!(update.terminal_state(), Some(StreamState::Active));

        let truncate = OperationRequest::new(
            id.clone(),
            OperationPayload::Truncate {
                cut: StreamCut::new([(0, 10)]),
                resume_state: StreamState::Sealed,
            },
        );
        assert_eq!(truncate.terminal_state(), Some(StreamState::Sealed));

        let delete = OperationRequest::new(id, OperationPayload::Delete);
        assert_eq!(delete.terminal_state(), None);
    }

    #[test]
    fn request_json_is_self_describing() {
        let request = OperationRequest::new(StreamId::new("scope", "s"), OperationPayload::Seal);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["payload"]["op"], "seal");
        let back: OperationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn split_parts_are_bounded() {
        assert!(ScaleDirection::Split { into: 2 }.validate().is_ok());
        assert!(ScaleDirection::Split { into: ScaleDirection::MAX_SPLIT_PARTS }
            .validate()
            .is_ok());
        assert!(ScaleDirection::Split { into: 1 }.validate().is_err());
        assert!(ScaleDirection::Split { into: u32::MAX }.validate().is_err());
        assert!(ScaleDirection::Merge.validate().is_ok());
    }
}
