// Event sink - Per-lane, per-block queue of timestamped control events
// Sinks are filled by the section's scheduling pass and flushed to whatever
// destination is attached at patch time.

use std::sync::{Arc, Mutex};

/// A control event placed at a sample offset inside the current block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    pub value: f32,
    /// Offset from the start of the block, in samples
    pub offset: u32,
}

/// Errors raised by patch-time wiring
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("lane {lane} out of range (section has {lanes} outputs)")]
    LaneOutOfRange { lane: usize, lanes: usize },
}

/// Consumer of one lane's event stream
///
/// A destination receives the lane's events once per block. The engine is
/// agnostic to their interpretation; `receive` runs on the rendering thread
/// and must not block or allocate unboundedly.
pub trait Destination: Send {
    /// Deliver this block's events, ordered by sample offset
    fn receive(&mut self, events: &[TimedEvent], block_size: usize);

    /// Gate consumers get an all-events-off message (value 0.0) on pattern
    /// changes and when the transport pauses
    fn is_gate(&self) -> bool {
        false
    }
}

/// Shared handle to a destination, owned by the surrounding application
pub type DestinationHandle = Arc<Mutex<dyn Destination>>;

/// Ordered queue of events for one lane and one block
#[derive(Default)]
pub struct EventSink {
    events: Vec<TimedEvent>,
    destination: Option<DestinationHandle>,
    gated: bool,
}

impl EventSink {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            destination: None,
            gated: false,
        }
    }

    pub(crate) fn append(&mut self, value: f32, offset: u32) {
        self.events.push(TimedEvent { value, offset });
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }

    /// Deliver the queued events to the attached destination, if any
    pub(crate) fn flush(&mut self, block_size: usize) {
        if let Some(destination) = &self.destination {
            if let Ok(mut destination) = destination.lock() {
                destination.receive(&self.events, block_size);
            }
        }
    }

    pub(crate) fn attach(&mut self, destination: DestinationHandle) {
        self.gated = destination.lock().map(|d| d.is_gate()).unwrap_or(false);
        self.destination = Some(destination);
    }

    pub(crate) fn detach(&mut self) {
        self.destination = None;
        self.gated = false;
    }

    pub(crate) fn is_gated(&self) -> bool {
        self.gated
    }

    /// Events queued for the current block
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }
}
