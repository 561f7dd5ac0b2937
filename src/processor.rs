// Processor - Global transport and section orchestration
// Owns the bar-based clock and a fixed, ordered list of sections. The
// rendering thread calls tick() once per block; control-rate callers mutate
// tempo and transport state asynchronously.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::link::{AtomicF64, TransportLink};
use crate::section::Section;
use crate::timeline::Tempo;

/// Bars before the playhead wraps back to zero
const DEFAULT_MAX_BARS: f64 = 32000.0;

/// Idle blocks ticked after pause/stop so buffered destinations observe the
/// all-events-off message
const DRAIN_TICKS: u8 = 2;

struct TransportState {
    tempo: Tempo,
    sample_rate: f64,
    bars_per_sample: f64,
    play_head: f64,
    play_head_end: f64,
    max_bars: f64,
}

/// Drives the transport and ticks sections in declared order
///
/// The processor is shared by `Arc` between the rendering thread (tick) and
/// control threads (everything else). Sections are created once at
/// construction; earlier sections' shared-collaborator side effects are
/// visible to later ones within the same tick.
pub struct Processor {
    transport: Mutex<TransportState>,
    playing: AtomicBool,
    drain_ticks: AtomicU8,
    sections: Vec<Section>,
    link: Arc<TransportLink>,
    meter_playhead: AtomicF64,
}

impl Processor {
    /// Create a processor with a fixed number of sections
    ///
    /// Non-positive sample rates are a caller precondition.
    pub fn new(section_count: usize, sample_rate: f64) -> Self {
        let tempo = Tempo::default();
        Self {
            transport: Mutex::new(TransportState {
                tempo,
                sample_rate,
                bars_per_sample: tempo.bars_per_sample(sample_rate),
                play_head: 0.0,
                play_head_end: 0.0,
                max_bars: DEFAULT_MAX_BARS,
            }),
            playing: AtomicBool::new(false),
            drain_ticks: AtomicU8::new(0),
            sections: (0..section_count).map(|_| Section::new()).collect(),
            link: Arc::new(TransportLink::new(tempo.bpm())),
            meter_playhead: AtomicF64::new(0.0),
        }
    }

    /// Section at the given index
    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    /// All sections, in tick order
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Shared transport context for collaborators that follow the clock
    pub fn link(&self) -> Arc<TransportLink> {
        Arc::clone(&self.link)
    }

    /// Set the tempo; effective from the next tick
    pub fn set_tempo(&self, tempo: Tempo) {
        let mut transport = self.transport.lock().unwrap();
        transport.tempo = tempo;
        transport.bars_per_sample = tempo.bars_per_sample(transport.sample_rate);
        self.link.set_tempo(tempo.bpm());
    }

    /// Current tempo
    pub fn tempo(&self) -> Tempo {
        self.transport.lock().unwrap().tempo
    }

    /// Recompute timing after an audio device change
    pub fn set_sample_rate(&self, sample_rate: f64) {
        let mut transport = self.transport.lock().unwrap();
        transport.sample_rate = sample_rate;
        transport.bars_per_sample = transport.tempo.bars_per_sample(sample_rate);
    }

    /// Set the wrap point of the playhead, in bars
    pub fn set_max_bars(&self, max_bars: f64) {
        let mut transport = self.transport.lock().unwrap();
        transport.max_bars = max_bars;
        while transport.play_head > max_bars {
            transport.play_head -= max_bars;
        }
    }

    /// Relocate the playhead, in bars; takes effect on the next tick
    pub fn seek(&self, bars: f64) {
        let mut transport = self.transport.lock().unwrap();
        transport.play_head_end = bars;
        self.meter_playhead.set(bars);
    }

    /// Start the transport
    pub fn play(&self) {
        self.playing.store(true, Ordering::Relaxed);
        self.link.set_playing(true);
    }

    /// Pause, keeping the playhead; sections drain over the next two ticks
    pub fn pause(&self) {
        self.drain_ticks.store(DRAIN_TICKS, Ordering::Relaxed);
        self.playing.store(false, Ordering::Relaxed);
        self.link.set_playing(false);
    }

    /// Stop, rewinding the playhead and every section's local state
    ///
    /// Each section's active pattern is relaunched from the top and primed
    /// again, so the next play starts identical to a fresh run.
    pub fn stop(&self) {
        self.drain_ticks.store(DRAIN_TICKS, Ordering::Relaxed);
        self.playing.store(false, Ordering::Relaxed);
        self.link.set_playing(false);
        self.seek(0.0);

        for section in &self.sections {
            section.reset_and_relaunch();
        }
    }

    /// Whether the transport is running
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Playhead position in bars published at the last tick, lock-free
    pub fn playhead(&self) -> f64 {
        self.meter_playhead.get()
    }

    /// Advance the transport by one block and run every section
    ///
    /// Called by the rendering thread once per fixed-size block. While
    /// paused or stopped, sections are drained for two blocks and then the
    /// call does nothing.
    pub fn tick(&self, block_size: usize) {
        if self.playing.load(Ordering::Relaxed) {
            let (start, end, delta, max_bars, bars_per_sample) = {
                let Ok(mut transport) = self.transport.lock() else {
                    return;
                };
                transport.play_head = transport.play_head_end;
                // Repeated subtraction keeps continuity near the wrap point
                while transport.play_head > transport.max_bars {
                    transport.play_head -= transport.max_bars;
                }
                let delta = block_size as f64 * transport.bars_per_sample;
                transport.play_head_end = transport.play_head + delta;
                (
                    transport.play_head,
                    transport.play_head_end,
                    delta,
                    transport.max_bars,
                    transport.bars_per_sample,
                )
            };

            self.meter_playhead.set(start);
            self.link.set_bar_position(start);

            for section in &self.sections {
                section.tick(start, end, delta, max_bars, bars_per_sample, block_size);
            }
        } else {
            let remaining = self.drain_ticks.load(Ordering::Relaxed);
            if remaining > 0 {
                let send_all_off = remaining == DRAIN_TICKS;
                for section in &self.sections {
                    section.drain_idle(send_all_off, block_size);
                }
                self.drain_ticks.store(remaining - 1, Ordering::Relaxed);
            }
        }
    }
}
