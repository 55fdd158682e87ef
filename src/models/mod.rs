pub mod consumption;
pub mod meter;
pub mod reading;
pub mod snapshot;

pub use consumption::ConsumptionBucket;
pub use meter::{
    AuthConfig, CameraConfig, DialOrientation, EndpointKind, Meter, MeterKind, MeterType,
    VisionConfig, VisionTarget,
};
pub use reading::{Confidence, Reading, ReadingComponents, ReadingFormat};
pub use snapshot::{SnapshotRef, SnapshotSidecar};
