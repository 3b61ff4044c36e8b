pub mod delta;

pub use delta::{ChannelDelta, DeltaEventKind, DeltaPublisher};
