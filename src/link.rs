// Transport link - Lock-free transport broadcast
// Single writer (the processor's tick), any number of readers.
// Floats are stored as raw bits so every read is tear-free.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Thread-safe f32 using atomic operations
/// Converts f32 to u32 bits for atomic storage
#[derive(Debug)]
pub(crate) struct AtomicF32 {
    inner: AtomicU32,
}

impl AtomicF32 {
    pub(crate) fn new(value: f32) -> Self {
        Self {
            inner: AtomicU32::new(value.to_bits()),
        }
    }

    pub(crate) fn set(&self, value: f32) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> f32 {
        f32::from_bits(self.inner.load(Ordering::Relaxed))
    }
}

/// Thread-safe f64 using atomic operations
#[derive(Debug)]
pub(crate) struct AtomicF64 {
    inner: AtomicU64,
}

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self {
            inner: AtomicU64::new(value.to_bits()),
        }
    }

    pub(crate) fn set(&self, value: f64) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> f64 {
        f64::from_bits(self.inner.load(Ordering::Relaxed))
    }
}

/// Snapshot of the shared transport state at one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
    pub playing: bool,
    pub bar_position: f64,
    pub tempo: f64,
}

/// Shared transport context published once per tick by the processor
///
/// Collaborators that need to stay synchronized with the transport (LFOs,
/// delays, meters) hold a clone of the `Arc<TransportLink>` and poll
/// `snapshot()`. Only the owning processor writes to it.
#[derive(Debug)]
pub struct TransportLink {
    playing: AtomicBool,
    bar_position: AtomicF64,
    tempo: AtomicF64,
}

impl TransportLink {
    pub(crate) fn new(tempo: f64) -> Self {
        Self {
            playing: AtomicBool::new(false),
            bar_position: AtomicF64::new(0.0),
            tempo: AtomicF64::new(tempo),
        }
    }

    pub(crate) fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    pub(crate) fn set_bar_position(&self, bars: f64) {
        self.bar_position.set(bars);
    }

    pub(crate) fn set_tempo(&self, bpm: f64) {
        self.tempo.set(bpm);
    }

    /// Current transport state, safe to call from any thread
    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            playing: self.playing.load(Ordering::Relaxed),
            bar_position: self.bar_position.get(),
            tempo: self.tempo.get(),
        }
    }

    /// Whether the transport is running
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Bar position published at the last tick
    pub fn bar_position(&self) -> f64 {
        self.bar_position.get()
    }

    /// Tempo in BPM
    pub fn tempo(&self) -> f64 {
        self.tempo.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f32_roundtrip() {
        let value = AtomicF32::new(0.25);
        assert_eq!(value.get(), 0.25);

        value.set(-3.75);
        assert_eq!(value.get(), -3.75);
    }

    #[test]
    fn test_atomic_f64_roundtrip() {
        let value = AtomicF64::new(1.0e-5);
        assert_eq!(value.get(), 1.0e-5);

        value.set(31999.999);
        assert_eq!(value.get(), 31999.999);
    }

    #[test]
    fn test_link_snapshot() {
        let link = TransportLink::new(120.0);

        let snap = link.snapshot();
        assert!(!snap.playing);
        assert_eq!(snap.bar_position, 0.0);
        assert_eq!(snap.tempo, 120.0);

        link.set_playing(true);
        link.set_bar_position(4.5);
        link.set_tempo(140.0);

        let snap = link.snapshot();
        assert!(snap.playing);
        assert_eq!(snap.bar_position, 4.5);
        assert_eq!(snap.tempo, 140.0);
    }
}
