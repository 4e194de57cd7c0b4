use serde::{Deserialize, Serialize};

use crate::device::constants::{MAX_AMPLITUDE, MAX_PAUSE_MS, MAX_PULSE_MS};

/// One pulse/pause/amplitude step. Stored on disk as a `[pulse, pause, amplitude]` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u16; 3]", into = "[u16; 3]")]
pub struct PatternFrame {
    pub pulse_ms: u8,
    pub pause_ms: u16,
    pub amplitude: u8,
}

impl PatternFrame {
    pub fn new(pulse_ms: u16, pause_ms: u16, amplitude: u16) -> Result<Self, String> {
        if pulse_ms > MAX_PULSE_MS as u16 {
            return Err(format!("pulse {} exceeds {} ms", pulse_ms, MAX_PULSE_MS));
        }
        if pause_ms > MAX_PAUSE_MS {
            return Err(format!("pause {} exceeds {} ms", pause_ms, MAX_PAUSE_MS));
        }
        if amplitude > MAX_AMPLITUDE as u16 {
            return Err(format!("amplitude {} exceeds {}", amplitude, MAX_AMPLITUDE));
        }

        Ok(PatternFrame { pulse_ms: pulse_ms as u8, pause_ms, amplitude: amplitude as u8 })
    }

    pub(crate) const fn fixed(pulse_ms: u8, pause_ms: u16, amplitude: u8) -> Self {
        PatternFrame { pulse_ms, pause_ms, amplitude }
    }
}

impl TryFrom<[u16; 3]> for PatternFrame {
    type Error = String;

    fn try_from([pulse, pause, amplitude]: [u16; 3]) -> Result<Self, Self::Error> {
        PatternFrame::new(pulse, pause, amplitude)
    }
}

impl From<PatternFrame> for [u16; 3] {
    fn from(frame: PatternFrame) -> Self {
        [frame.pulse_ms as u16, frame.pause_ms, frame.amplitude as u16]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern {
    frames: Vec<PatternFrame>,
}

impl Pattern {
    pub fn new(frames: Vec<PatternFrame>) -> Self {
        Pattern { frames }
    }

    pub fn frames(&self) -> &[PatternFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sum of all pulses and pauses.
    pub fn duration_ms(&self) -> u32 {
        self.frames.iter().map(|frame| frame.pulse_ms as u32 + frame.pause_ms as u32).sum()
    }

    pub(crate) fn extend(&mut self, frames: Vec<PatternFrame>) {
        self.frames.extend(frames);
    }
}

/// A pattern argument, either looked up in the store or given inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSource {
    ByName(String),
    Literal(Pattern),
}

impl From<&str> for PatternSource {
    fn from(name: &str) -> Self {
        PatternSource::ByName(name.to_string())
    }
}

impl From<Pattern> for PatternSource {
    fn from(pattern: Pattern) -> Self {
        PatternSource::Literal(pattern)
    }
}

/// The two patterns stored under the empty name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPattern {
    /// 10 ms pulse, 90 ms pause, amplitude 10.
    Simple,
    /// Twenty frames with a slowly shrinking pause.
    Varied,
}
