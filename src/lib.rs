// Cellseq - Real-time pattern sequencing and musical transport
// Block-accurate transport, sample-accurate cell transitions

pub mod cell;
pub mod link;
pub mod processor;
pub mod section;
pub mod sink;
pub mod timeline;

// Re-export commonly used types for convenience
pub use cell::{
    Advance, Cell, CellEvent, CellHandle, JumpTo, RandomJump, Repeat, RuleHandle, Sequence,
    TransitionRule,
};
pub use link::{TransportLink, TransportSnapshot};
pub use processor::Processor;
pub use section::Section;
pub use sink::{Destination, DestinationHandle, EventSink, PatchError, TimedEvent};
pub use timeline::Tempo;
