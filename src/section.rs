// Section - Plays one cell at a time and sequences cell transitions
// A section owns a table of pattern slots and per-lane event sinks; its
// scheduling pass runs once per block under the section lock. Sections
// inside a processor are ticked in declared order, so data generated by an
// earlier section can influence later ones within the same block.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::cell::{CellEvent, CellHandle, RuleHandle};
use crate::link::AtomicF32;
use crate::sink::{DestinationHandle, EventSink, PatchError};

/// Events reserved per sink and per score buffer to keep the scheduling
/// pass allocation-free for typical patterns
const EVENT_RESERVE: usize = 128;

/// One entry of the pattern table
struct PatternSlot {
    cell: Option<CellHandle>,
    rule: Option<RuleHandle>,
    length: f64,
    quantize_launch: bool,
    quantize_grid: f64,
}

impl Default for PatternSlot {
    fn default() -> Self {
        Self {
            cell: None,
            rule: None,
            length: 1.0,
            quantize_launch: false,
            quantize_grid: 0.0,
        }
    }
}

/// Scheduling target of a section
///
/// Replaces the sign-sentinel encoding of pending launches with explicit
/// states: a pending launch is resolved into `Armed` at the start of the
/// tick that observes it.
#[derive(Debug, Clone, Copy, PartialEq)]
enum LaunchState {
    /// Nothing scheduled
    Idle,
    /// Resolve to the window start on the next tick
    PendingImmediate,
    /// Resolve to the next multiple of the grid on the next tick
    PendingQuantized { grid: f64 },
    /// Resolved transition time, in bars
    Armed { at: f64 },
}

/// Next multiple of `grid` strictly after `from` (up to one full grid later
/// when `from` already sits on the grid)
fn next_grid_multiple(from: f64, grid: f64) -> f64 {
    ((from + grid) / grid).floor() * grid
}

struct SectionState {
    slots: Vec<PatternSlot>,

    launch: LaunchState,
    scheduled_index: i32,
    active_index: i32,

    /// Position inside the active cell's generated score, in bars
    local_play_head: f64,
    event_cursor: usize,

    running: bool,
    draining: bool,
    legato_pending: bool,
    clear_on_change: bool,

    /// Score of the active play-through, filled by `Cell::generate`
    score: Vec<CellEvent>,
    outputs: Vec<EventSink>,
}

impl SectionState {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            launch: LaunchState::Idle,
            scheduled_index: -1,
            active_index: -1,
            local_play_head: 0.0,
            event_cursor: 0,
            running: false,
            draining: true,
            legato_pending: false,
            clear_on_change: true,
            score: Vec::with_capacity(EVENT_RESERVE),
            outputs: vec![EventSink::with_capacity(EVENT_RESERVE)],
        }
    }

    fn clear_sinks(&mut self) {
        for sink in &mut self.outputs {
            sink.clear();
        }
    }

    fn flush_sinks(&mut self, block_size: usize) {
        for sink in &mut self.outputs {
            sink.flush(block_size);
        }
    }

    /// Append an all-events-off message (value 0.0) to every gated lane
    fn all_events_off(&mut self, offset_bars: f64, inv_bars_per_sample: f64) {
        let sample = (offset_bars * inv_bars_per_sample) as u32;
        for sink in &mut self.outputs {
            if sink.is_gated() {
                sink.append(0.0, sample);
            }
        }
    }

    /// Emit score events for `[local_play_head, local_play_head + range - offset)`
    ///
    /// The local playhead always advances to the processed boundary, so
    /// silent ranges and slots without a cell advance correctly.
    fn play_score(&mut self, range: f64, offset: f64, inv_bars_per_sample: f64) {
        let boundary = self.local_play_head + range - offset;

        let emitting = self.active_index >= 0
            && self
                .slots
                .get(self.active_index as usize)
                .is_some_and(|slot| slot.cell.is_some());

        if emitting {
            while self.event_cursor < self.score.len()
                && self.score[self.event_cursor].time < boundary
            {
                let event = self.score[self.event_cursor];
                if event.time >= self.local_play_head && event.lane < self.outputs.len() {
                    let sample =
                        ((event.time - self.local_play_head + offset) * inv_bars_per_sample) as u32;
                    self.outputs[event.lane].append(event.value, sample);
                }
                self.event_cursor += 1;
            }
        }

        self.local_play_head = boundary;
    }

    /// Commit the scheduled transition and arm the one after it
    fn commit_transition(&mut self, meter_active: &AtomicI32, meter_next: &AtomicI32) {
        let LaunchState::Armed { at } = self.launch else {
            return;
        };

        self.event_cursor = 0;

        // The table may have shrunk since the launch was scheduled
        let count = self.slots.len() as i32;
        if self.scheduled_index >= count {
            self.scheduled_index = count - 1;
        }
        self.active_index = self.scheduled_index;

        let generated = if self.active_index >= 0 {
            let index = self.active_index as usize;
            let (cell, length) = {
                let slot = &self.slots[index];
                (slot.cell.clone(), slot.length)
            };
            match cell {
                Some(cell) => {
                    if let Ok(mut cell) = cell.lock() {
                        cell.generate(length, &mut self.score);
                    }
                    meter_active.store(self.active_index, Ordering::Relaxed);
                    true
                }
                None => false,
            }
        } else {
            false
        };

        if !generated {
            // Silence: no score to play, drain once more and go idle
            meter_active.store(-1, Ordering::Relaxed);
            self.running = false;
            self.draining = true;
        }

        // Arm the next transition via the active slot's rule
        if self.active_index >= 0 {
            let index = self.active_index as usize;
            let active_length = self.slots[index].length;
            let next = self
                .slots[index]
                .rule
                .as_ref()
                .and_then(|rule| rule.next(index, self.slots.len()));

            match next {
                Some(next) => {
                    let next = next.min(self.slots.len() - 1);
                    self.scheduled_index = next as i32;
                    meter_next.store(next as i32, Ordering::Relaxed);

                    let (cell, length, quantize, grid) = {
                        let slot = &self.slots[next];
                        (
                            slot.cell.clone(),
                            slot.length,
                            slot.quantize_launch,
                            slot.quantize_grid,
                        )
                    };
                    if let Some(cell) = cell {
                        if let Ok(mut cell) = cell.lock() {
                            cell.prepare(length);
                        }
                    }

                    let at = if quantize && grid > 0.0 {
                        next_grid_multiple(at, grid)
                    } else {
                        at + active_length
                    };
                    self.launch = LaunchState::Armed { at };
                }
                None => {
                    // Halt: finish the active play-through, then stop
                    meter_next.store(-1, Ordering::Relaxed);
                    self.scheduled_index = -1;
                    self.launch = LaunchState::Armed {
                        at: at + active_length,
                    };
                }
            }
        }

        // Legato is a one-shot: rule-driven transitions never inherit it
        if self.legato_pending {
            self.legato_pending = false;
        } else {
            self.local_play_head = 0.0;
        }
    }

    fn prepare_slot(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            if let Some(cell) = &slot.cell {
                let length = slot.length;
                if let Ok(mut cell) = cell.lock() {
                    cell.prepare(length);
                }
            }
        }
    }
}

/// Plays a single cell at a time and sequences cell transitions
///
/// Control-rate callers mutate the pattern table and request launches; the
/// processor ticks the section once per block. Every operation takes the
/// section lock and performs work bounded by the pattern count.
pub struct Section {
    state: Mutex<SectionState>,
    meter_active: AtomicI32,
    meter_next: AtomicI32,
    meter_playhead: AtomicF32,
}

impl Default for Section {
    fn default() -> Self {
        Self::new()
    }
}

impl Section {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SectionState::new()),
            meter_active: AtomicI32::new(-1),
            meter_next: AtomicI32::new(-1),
            meter_playhead: AtomicF32::new(0.0),
        }
    }

    /// Set the number of pattern slots
    ///
    /// New slots start empty (no cell, no rule, one bar long). Shrinking
    /// below the active index clamps it; shrinking to zero stops playback
    /// after one more drained block.
    pub fn resize_slots(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        if count < state.slots.len() && state.active_index >= count as i32 {
            let clamped = (count as i32 - 1).max(0);
            log::warn!(
                "pattern table shrunk below active slot, clamping {} -> {}",
                state.active_index,
                clamped
            );
            state.active_index = clamped;
        }
        state.slots.resize_with(count, PatternSlot::default);
        if count == 0 && state.running {
            state.running = false;
            state.draining = true;
        }
    }

    /// Set the number of output lanes, default is 1
    pub fn set_outputs(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        state
            .outputs
            .resize_with(count, || EventSink::with_capacity(EVENT_RESERVE));
    }

    /// Number of output lanes
    pub fn outputs(&self) -> usize {
        self.state.lock().unwrap().outputs.len()
    }

    /// Number of pattern slots
    pub fn slot_count(&self) -> usize {
        self.state.lock().unwrap().slots.len()
    }

    /// Set the cell and transition rule at the given slot
    ///
    /// The table auto-grows to fit the index. A `None` cell plays silence;
    /// a `None` rule halts automatic progression after the slot plays.
    pub fn set_cell(&self, index: usize, cell: Option<CellHandle>, rule: Option<RuleHandle>) {
        let mut state = self.state.lock().unwrap();
        if index >= state.slots.len() {
            state.slots.resize_with(index + 1, PatternSlot::default);
        }
        state.slots[index].cell = cell;
        state.slots[index].rule = rule;
    }

    /// Set the timing options of the given slot
    ///
    /// `length` is the play-through length in bars; when `quantize_launch`
    /// is set, rule-driven transitions into this slot round up to the next
    /// multiple of `quantize_grid` bars instead of waiting out the previous
    /// slot's length. The table auto-grows to fit the index.
    pub fn set_cell_timing(&self, index: usize, length: f64, quantize_launch: bool, grid: f64) {
        let mut state = self.state.lock().unwrap();
        if index >= state.slots.len() {
            state.slots.resize_with(index + 1, PatternSlot::default);
        }
        state.slots[index].length = length;
        state.slots[index].quantize_launch = quantize_launch;
        state.slots[index].quantize_grid = grid;
    }

    /// Request a transition to the given slot
    ///
    /// `None` schedules a stop of the section. With `quantize` the launch is
    /// rounded up to the next multiple of the grid, otherwise it happens at
    /// the next block. `legato` carries the local playhead across the
    /// transition instead of resetting it. The target cell's `prepare` runs
    /// eagerly, ahead of the switch instant.
    pub fn launch_cell(&self, index: Option<usize>, legato: bool, quantize: Option<f64>) {
        let mut state = self.state.lock().unwrap();

        let count = state.slots.len();
        let scheduled = match index {
            None => -1,
            Some(i) if i < count => i as i32,
            Some(i) => {
                log::warn!("launch index {i} out of range, clamping to last slot");
                count as i32 - 1
            }
        };

        state.launch = match quantize {
            Some(grid) => LaunchState::PendingQuantized { grid },
            None => LaunchState::PendingImmediate,
        };
        if legato {
            state.legato_pending = true;
        }
        state.scheduled_index = scheduled;
        self.meter_next.store(scheduled, Ordering::Relaxed);

        if scheduled >= 0 {
            state.prepare_slot(scheduled as usize);
        }
    }

    /// Toggle all-events-off insertion on pattern changes, default on
    pub fn set_clear_on_change(&self, active: bool) {
        self.state.lock().unwrap().clear_on_change = active;
    }

    /// Attach a destination to the given lane
    pub fn attach_destination(
        &self,
        lane: usize,
        destination: DestinationHandle,
    ) -> Result<(), PatchError> {
        let mut state = self.state.lock().unwrap();
        let lanes = state.outputs.len();
        match state.outputs.get_mut(lane) {
            Some(sink) => {
                sink.attach(destination);
                Ok(())
            }
            None => Err(PatchError::LaneOutOfRange { lane, lanes }),
        }
    }

    /// Detach the destination of the given lane
    pub fn detach_destination(&self, lane: usize) -> Result<(), PatchError> {
        let mut state = self.state.lock().unwrap();
        let lanes = state.outputs.len();
        match state.outputs.get_mut(lane) {
            Some(sink) => {
                sink.detach();
                Ok(())
            }
            None => Err(PatchError::LaneOutOfRange { lane, lanes }),
        }
    }

    /// Active slot index, lock-free
    pub fn active_cell(&self) -> Option<usize> {
        let index = self.meter_active.load(Ordering::Relaxed);
        (index >= 0).then_some(index as usize)
    }

    /// Next scheduled slot index, lock-free
    pub fn next_cell(&self) -> Option<usize> {
        let index = self.meter_next.load(Ordering::Relaxed);
        (index >= 0).then_some(index as usize)
    }

    /// Local playhead inside the active play-through in bars, lock-free
    pub fn playhead(&self) -> f32 {
        self.meter_playhead.get()
    }

    /// Run the scheduling pass for one block window `[start, end)`
    pub(crate) fn tick(
        &self,
        start: f64,
        end: f64,
        delta: f64,
        max_bars: f64,
        bars_per_sample: f64,
        block_size: usize,
    ) {
        let Ok(mut guard) = self.state.lock() else {
            return;
        };
        let state = &mut *guard;

        // Wrap the armed time once it drifts past the transport wrap point
        if let LaunchState::Armed { at } = &mut state.launch {
            while *at >= max_bars + delta {
                *at -= max_bars;
            }
        }

        // Resolve pending launches into an armed time
        match state.launch {
            LaunchState::PendingImmediate => {
                state.launch = LaunchState::Armed { at: start };
                state.running = true;
            }
            LaunchState::PendingQuantized { grid } => {
                // The very first tick starts everything at zero regardless
                let at = if start != 0.0 && grid > 0.0 {
                    next_grid_multiple(start, grid)
                } else {
                    start
                };
                state.launch = LaunchState::Armed { at };
                state.running = true;
            }
            _ => {}
        }

        if state.running && !state.slots.is_empty() {
            state.clear_sinks();
            let inv = 1.0 / bars_per_sample;
            let at = match state.launch {
                LaunchState::Armed { at } => at,
                _ => f64::INFINITY,
            };

            if at >= end {
                // Not due: play the active cell for the whole block
                state.play_score(delta, 0.0, inv);
            } else if at <= start {
                // Due now: transition at offset 0
                state.commit_transition(&self.meter_active, &self.meter_next);
                if state.clear_on_change {
                    state.all_events_off(0.0, inv);
                }
                state.play_score(delta, 0.0, inv);
            } else {
                // Due inside the block: splice at the exact bar boundary
                let split = at - start;
                state.play_score(split, 0.0, inv);
                state.commit_transition(&self.meter_active, &self.meter_next);
                if state.clear_on_change {
                    state.all_events_off(split, inv);
                }
                state.play_score(delta, split, inv);
            }

            state.flush_sinks(block_size);
        } else if state.draining {
            // One empty flush so buffered destinations observe the stop
            state.clear_sinks();
            state.flush_sinks(block_size);
            state.draining = false;
        }

        self.meter_playhead.set(state.local_play_head as f32);
    }

    /// Idle tick while the transport is paused or stopped
    ///
    /// Clears and flushes without running the scheduler; the first drained
    /// tick sends all-events-off at sample 0 to gated lanes.
    pub(crate) fn drain_idle(&self, send_all_off: bool, block_size: usize) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.clear_sinks();
        if send_all_off {
            state.all_events_off(0.0, 0.0);
        }
        state.flush_sinks(block_size);
    }

    /// Rewind local state and relaunch the active pattern, used by stop
    pub(crate) fn reset_and_relaunch(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.event_cursor = 0;
        state.local_play_head = 0.0;
        self.meter_playhead.set(0.0);

        let scheduled = state.active_index;
        state.launch = LaunchState::PendingImmediate;
        state.scheduled_index = scheduled;
        self.meter_next.store(scheduled, Ordering::Relaxed);
        if scheduled >= 0 {
            state.prepare_slot(scheduled as usize);
        }
    }
}
