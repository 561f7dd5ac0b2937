// Cell - Reusable pattern sources and transition rules
// A cell produces timestamped events for one play-through; a transition rule
// decides which slot a section plays next.

use std::sync::{Arc, Mutex};

use rand::Rng;

/// One generated event inside a cell's play-through
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellEvent {
    /// Position inside the play-through, in bars, within `[0, length)`
    pub time: f64,
    /// Output lane of the owning section
    pub lane: usize,
    pub value: f32,
}

impl CellEvent {
    pub fn new(time: f64, lane: usize, value: f32) -> Self {
        Self { time, lane, value }
    }
}

/// Stateful pattern source
///
/// `prepare` primes generative state ahead of a scheduled switch; `generate`
/// is called exactly at the switch instant and must fill `score` with a
/// finite, time-ordered event list for the upcoming play-through. Both run
/// on the rendering thread, so `generate` must not block or allocate beyond
/// the buffer it is given.
pub trait Cell: Send {
    /// Prime generative state for a play-through of the given length
    fn prepare(&mut self, _length_bars: f64) {}

    /// Materialize the event list for a play-through of the given length
    ///
    /// The buffer is section-owned and pre-reserved; implementations clear
    /// it and fill it with events sorted by time, `time < length_bars`.
    fn generate(&mut self, length_bars: f64, score: &mut Vec<CellEvent>);
}

/// Shared handle to a cell; cells may be referenced by several sections
pub type CellHandle = Arc<Mutex<dyn Cell>>;

/// Decides the slot played after the current one
///
/// Pure and side-effect free. `None` halts automatic progression after the
/// current play-through; the section stays silent until re-launched.
pub trait TransitionRule: Send + Sync {
    fn next(&self, current: usize, count: usize) -> Option<usize>;
}

/// Shared handle to a transition rule
pub type RuleHandle = Arc<dyn TransitionRule>;

impl<F> TransitionRule for F
where
    F: Fn(usize, usize) -> Option<usize> + Send + Sync,
{
    fn next(&self, current: usize, count: usize) -> Option<usize> {
        self(current, count)
    }
}

/// Loops the current slot forever
pub struct Repeat;

impl TransitionRule for Repeat {
    fn next(&self, current: usize, _count: usize) -> Option<usize> {
        Some(current)
    }
}

/// Steps to the next slot, wrapping at the end of the table
pub struct Advance;

impl TransitionRule for Advance {
    fn next(&self, current: usize, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some((current + 1) % count)
    }
}

/// Always jumps to a fixed slot
pub struct JumpTo(pub usize);

impl TransitionRule for JumpTo {
    fn next(&self, _current: usize, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(self.0.min(count - 1))
    }
}

/// Jumps to a uniformly random slot
pub struct RandomJump;

impl TransitionRule for RandomJump {
    fn next(&self, _current: usize, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..count))
    }
}

/// Ready-made cell holding a sorted event list
///
/// Content is built programmatically with `insert`, or regenerated each
/// play-through by an optional generator closure run at `prepare` time.
#[derive(Default)]
pub struct Sequence {
    events: Vec<CellEvent>,
    generator: Option<Box<dyn FnMut(f64) -> Vec<CellEvent> + Send>>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an event list; events are sorted by time
    pub fn from_events(mut events: Vec<CellEvent>) -> Self {
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            events,
            generator: None,
        }
    }

    /// Insert an event, keeping the list sorted by time
    pub fn insert(&mut self, time: f64, lane: usize, value: f32) {
        let event = CellEvent::new(time, lane, value);
        let insert_pos = self
            .events
            .binary_search_by(|e| e.time.total_cmp(&event.time))
            .unwrap_or_else(|pos| pos);
        self.events.insert(insert_pos, event);
    }

    /// Remove all events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Regenerate content at every `prepare` call
    ///
    /// The closure receives the play-through length in bars and returns the
    /// new event list; it runs ahead of the switch instant, never at it.
    pub fn set_generator<F>(&mut self, generator: F)
    where
        F: FnMut(f64) -> Vec<CellEvent> + Send + 'static,
    {
        self.generator = Some(Box::new(generator));
    }

    pub fn events(&self) -> &[CellEvent] {
        &self.events
    }

    /// Wrap into a shared handle for use in pattern slots
    pub fn into_handle(self) -> CellHandle {
        Arc::new(Mutex::new(self))
    }
}

impl Cell for Sequence {
    fn prepare(&mut self, length_bars: f64) {
        if let Some(generator) = &mut self.generator {
            self.events = generator(length_bars);
            self.events.sort_by(|a, b| a.time.total_cmp(&b.time));
        }
    }

    fn generate(&mut self, length_bars: f64, score: &mut Vec<CellEvent>) {
        score.clear();
        score.extend(self.events.iter().copied().filter(|e| e.time < length_bars));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_insert_keeps_order() {
        let mut seq = Sequence::new();
        seq.insert(0.75, 0, 0.3);
        seq.insert(0.0, 0, 1.0);
        seq.insert(0.5, 1, 0.6);

        let times: Vec<f64> = seq.events().iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 0.5, 0.75]);
    }

    #[test]
    fn test_sequence_generate_respects_length() {
        let mut seq = Sequence::from_events(vec![
            CellEvent::new(0.0, 0, 1.0),
            CellEvent::new(0.5, 0, 0.5),
            CellEvent::new(1.5, 0, 0.2),
        ]);

        let mut score = Vec::new();
        seq.generate(1.0, &mut score);
        assert_eq!(score.len(), 2);
        assert!(score.iter().all(|e| e.time < 1.0));
    }

    #[test]
    fn test_sequence_generator_runs_at_prepare() {
        let mut seq = Sequence::new();
        seq.set_generator(|length| {
            vec![
                CellEvent::new(length / 2.0, 0, 0.5),
                CellEvent::new(0.0, 0, 1.0),
            ]
        });

        seq.prepare(2.0);
        let mut score = Vec::new();
        seq.generate(2.0, &mut score);

        // Generator output is re-sorted by time
        assert_eq!(score.len(), 2);
        assert_eq!(score[0].time, 0.0);
        assert_eq!(score[1].time, 1.0);
    }

    #[test]
    fn test_repeat_rule() {
        assert_eq!(Repeat.next(3, 8), Some(3));
    }

    #[test]
    fn test_advance_rule_wraps() {
        assert_eq!(Advance.next(0, 4), Some(1));
        assert_eq!(Advance.next(3, 4), Some(0));
        assert_eq!(Advance.next(0, 0), None);
    }

    #[test]
    fn test_jump_to_clamps() {
        assert_eq!(JumpTo(10).next(0, 4), Some(3));
        assert_eq!(JumpTo(2).next(0, 4), Some(2));
        assert_eq!(JumpTo(0).next(0, 0), None);
    }

    #[test]
    fn test_random_jump_in_range() {
        for _ in 0..100 {
            let next = RandomJump.next(0, 5).unwrap();
            assert!(next < 5);
        }
        assert_eq!(RandomJump.next(0, 0), None);
    }

    #[test]
    fn test_closure_rule() {
        let rule = |current: usize, count: usize| -> Option<usize> {
            if current + 1 < count { Some(current + 1) } else { None }
        };
        assert_eq!(rule.next(0, 2), Some(1));
        assert_eq!(rule.next(1, 2), None);
    }
}
