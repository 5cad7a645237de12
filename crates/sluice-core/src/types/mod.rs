pub mod outcome;
pub mod request;
pub mod stream;

pub use outcome::{TaskOutcome, TaskResult};
pub use request::{
    OperationKind, OperationPayload, OperationRequest, RequestId, ScaleDirection, ScaleRequest,
};
pub use stream::{
    KeyRange, RetentionPolicy, ScalingPolicy, Segment, StreamConfiguration, StreamCut, StreamId,
    StreamRecord, StreamState, MAX_SEGMENTS, RANGE_EPSILON,
};
