// Timeline - Musical time representation
// The root time unit is the bar; positions are fractional f64 bar values.

use std::fmt;

/// Tempo in BPM (Beats Per Minute)
///
/// Non-positive BPM values are a caller precondition and are not
/// runtime-validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    /// Creates a new tempo
    pub fn new(bpm: f64) -> Self {
        Self { bpm }
    }

    /// Get BPM value
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Duration of one beat in seconds
    pub fn beat_duration_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Bars advanced by a single sample at the given sample rate
    ///
    /// One bar is four beats, so a bar lasts `240 / bpm` seconds and a
    /// sample advances the playhead by `bpm / (240 * sample_rate)` bars.
    pub fn bars_per_sample(&self, sample_rate: f64) -> f64 {
        self.bpm / (240.0 * sample_rate)
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo() {
        let tempo = Tempo::new(120.0);
        assert_eq!(tempo.bpm(), 120.0);
        assert_eq!(tempo.beat_duration_seconds(), 0.5);
        assert_eq!(tempo.to_string(), "120.0 BPM");
    }

    #[test]
    fn test_bars_per_sample() {
        // 120 BPM at 44100 Hz: 120 / (240 * 44100) ≈ 1.1338e-5 bars/sample
        let tempo = Tempo::new(120.0);
        let bps = tempo.bars_per_sample(44100.0);
        assert!((bps - 1.1337868e-5).abs() < 1e-10);

        // One 512-sample block advances the playhead by ≈ 0.005805 bars
        let advance = 512.0 * bps;
        assert!((advance - 0.005805).abs() < 1e-5);
    }

    #[test]
    fn test_default_tempo() {
        assert_eq!(Tempo::default().bpm(), 120.0);
    }
}
