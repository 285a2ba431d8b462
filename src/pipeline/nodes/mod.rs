//! Built-in node implementations.

pub mod blob_detector;
pub mod sink;
pub mod source;
pub mod threshold;

pub use blob_detector::{detect_blobs, BlobDetectorNode};
pub use sink::StateSinkNode;
pub use source::FrameSourceNode;
pub use threshold::ThresholdNode;
