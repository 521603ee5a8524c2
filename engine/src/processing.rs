//! Contract with the echo-cancel / noise-suppression / gain-control stage.
//!
//! The session hands the processor one 10 ms window at a time: playback
//! windows go to `analyze_playback` as the far-end reference, capture
//! windows go through `process_capture` and come back cleaned.

use serde::{Deserialize, Serialize};

pub const FRAME_MS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

/// Layouts for the near-end capture input, the far-end reference and the
/// processed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayouts {
    pub capture: ChannelLayout,
    pub reverse: ChannelLayout,
    pub output: ChannelLayout,
}

impl StreamLayouts {
    pub fn stereo() -> Self {
        Self {
            capture: ChannelLayout::Stereo,
            reverse: ChannelLayout::Stereo,
            output: ChannelLayout::Stereo,
        }
    }
}

/// One 10 ms window of interleaved 16-bit audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub id: i32,
    pub sample_rate_hz: u32,
    pub num_channels: usize,
    pub samples_per_channel: usize,
    pub data: Vec<i16>,
}

impl AudioFrame {
    pub fn new(sample_rate_hz: u32, layout: ChannelLayout) -> Self {
        let samples_per_channel = (sample_rate_hz * FRAME_MS / 1000) as usize;
        let num_channels = layout.channels();
        Self {
            id: 0,
            sample_rate_hz,
            num_channels,
            samples_per_channel,
            data: vec![0; samples_per_channel * num_channels],
        }
    }

    /// Fills the payload from little-endian bytes. Short input leaves the
    /// tail silent; extra input is ignored.
    pub fn load_le_bytes(&mut self, bytes: &[u8]) {
        self.data.fill(0);
        for (sample, chunk) in self.data.iter_mut().zip(bytes.chunks_exact(2)) {
            *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
    }

    /// Copies the payload back out, as much as fits in `bytes`.
    pub fn store_le_bytes(&self, bytes: &mut [u8]) {
        for (chunk, sample) in bytes.chunks_exact_mut(2).zip(&self.data) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
    }
}

pub trait AudioProcessor: Send {
    fn initialize(&mut self, sample_rate_hz: u32, layouts: StreamLayouts) -> i32;
    fn set_stream_delay_ms(&mut self, delay_ms: u32) -> i32;
    fn set_stream_analog_level(&mut self, level: i32);
    fn stream_analog_level(&self) -> i32;
    fn process_capture(&mut self, frame: &mut AudioFrame) -> i32;
    fn analyze_playback(&mut self, frame: &AudioFrame) -> i32;
}

/// Leaves audio untouched and echoes the analog level back.
#[derive(Debug, Default)]
pub struct PassthroughProcessor {
    level: i32,
}

impl AudioProcessor for PassthroughProcessor {
    fn initialize(&mut self, _sample_rate_hz: u32, _layouts: StreamLayouts) -> i32 {
        0
    }

    fn set_stream_delay_ms(&mut self, _delay_ms: u32) -> i32 {
        0
    }

    fn set_stream_analog_level(&mut self, level: i32) {
        self.level = level;
    }

    fn stream_analog_level(&self) -> i32 {
        self.level
    }

    fn process_capture(&mut self, _frame: &mut AudioFrame) -> i32 {
        0
    }

    fn analyze_playback(&mut self, _frame: &AudioFrame) -> i32 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_ms_window() {
        let frame = AudioFrame::new(48_000, ChannelLayout::Stereo);
        assert_eq!(frame.samples_per_channel, 480);
        assert_eq!(frame.data.len(), 960);
    }

    #[test]
    fn bytes_in_and_out() {
        let mut frame = AudioFrame::new(8_000, ChannelLayout::Mono);
        frame.load_le_bytes(&[0x01, 0x00, 0xff, 0xff]);
        assert_eq!(&frame.data[..3], &[1, -1, 0]);
        let mut out = [0u8; 4];
        frame.store_le_bytes(&mut out);
        assert_eq!(out, [0x01, 0x00, 0xff, 0xff]);
    }

    #[test]
    fn passthrough_keeps_level() {
        let mut p = PassthroughProcessor::default();
        p.set_stream_analog_level(117);
        assert_eq!(p.stream_analog_level(), 117);
    }
}
