use super::asound::{
    SNDRV_PCM_FORMAT_S8, SNDRV_PCM_FORMAT_S16_LE, SNDRV_PCM_FORMAT_S24_LE, SNDRV_PCM_FORMAT_S32_LE,
};
use crate::error::{PcmError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcmFormat {
    S8,
    #[default]
    S16Le,
    /// 24 significant bits in a little-endian 32-bit container.
    S24Le,
    S32Le,
}

impl PcmFormat {
    pub fn to_alsa(self) -> u32 {
        match self {
            PcmFormat::S8 => SNDRV_PCM_FORMAT_S8,
            PcmFormat::S16Le => SNDRV_PCM_FORMAT_S16_LE,
            PcmFormat::S24Le => SNDRV_PCM_FORMAT_S24_LE,
            PcmFormat::S32Le => SNDRV_PCM_FORMAT_S32_LE,
        }
    }

    pub fn from_alsa(format: u32) -> Option<Self> {
        match format {
            SNDRV_PCM_FORMAT_S8 => Some(PcmFormat::S8),
            SNDRV_PCM_FORMAT_S16_LE => Some(PcmFormat::S16Le),
            SNDRV_PCM_FORMAT_S24_LE => Some(PcmFormat::S24Le),
            SNDRV_PCM_FORMAT_S32_LE => Some(PcmFormat::S32Le),
            _ => None,
        }
    }

    /// Physical width of one sample in memory.
    pub fn bits(self) -> u32 {
        match self {
            PcmFormat::S8 => 8,
            PcmFormat::S16Le => 16,
            PcmFormat::S24Le | PcmFormat::S32Le => 32,
        }
    }

    pub fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }
}

bitflags::bitflags! {
    /// Open flags. The bit values are part of the public ABI.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PcmFlags: u32 {
        const IN = 0x1000_0000;
        const MMAP = 0x0000_0001;
        const NOIRQ = 0x0000_0002;
        const NORESTART = 0x0000_0004;
        const MONOTONIC = 0x0000_0008;
    }
}

impl PcmFlags {
    pub const OUT: PcmFlags = PcmFlags::empty();

    pub fn direction(self) -> Direction {
        if self.contains(PcmFlags::IN) {
            Direction::Capture
        } else {
            Direction::Playback
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Playback,
    Capture,
}

impl Direction {
    pub fn is_capture(self) -> bool {
        self == Direction::Capture
    }

    /// Device node suffix under `/dev/snd`.
    pub fn node_suffix(self) -> char {
        match self {
            Direction::Playback => 'p',
            Direction::Capture => 'c',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Playback => "playback",
            Direction::Capture => "capture",
        }
    }

    pub fn flags(self) -> PcmFlags {
        match self {
            Direction::Playback => PcmFlags::OUT,
            Direction::Capture => PcmFlags::IN,
        }
    }
}

/// Requested stream geometry. Zero thresholds mean "pick the default";
/// the handle writes the chosen values back into its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcmConfig {
    pub channels: u32,
    pub rate: u32,
    pub period_size: u32,
    pub period_count: u32,
    pub format: PcmFormat,
    pub start_threshold: u32,
    pub stop_threshold: u32,
    pub silence_threshold: u32,
    pub avail_min: u32,
    /// Application channel count for capture; `Some(1)` runs the hardware
    /// in stereo and downmixes on read.
    pub requested_channels: Option<u32>,
}

impl Default for PcmConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            rate: 48_000,
            period_size: 1024,
            period_count: 4,
            format: PcmFormat::S16Le,
            start_threshold: 0,
            stop_threshold: 0,
            silence_threshold: 0,
            avail_min: 0,
            requested_channels: None,
        }
    }
}

impl PcmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(PcmError::InvalidConfig("zero channels".into()));
        }
        if self.period_size == 0 || self.period_count == 0 {
            return Err(PcmError::InvalidConfig(format!(
                "empty period geometry {}x{}",
                self.period_size, self.period_count
            )));
        }
        let frames = self
            .buffer_frames()
            .filter(|frames| *frames <= i32::MAX as u32)
            .ok_or_else(|| {
                PcmError::InvalidConfig(format!(
                    "buffer of {} periods of {} frames exceeds the platform ceiling",
                    self.period_count, self.period_size
                ))
            })?;
        // Mono capture runs the hardware in stereo.
        let channels = match self.requested_channels {
            Some(1) => self.channels.max(2),
            _ => self.channels,
        };
        let frame_bits = self.format.bits().checked_mul(channels).ok_or_else(|| {
            PcmError::InvalidConfig(format!("{channels} channels overflow the frame width"))
        })?;
        frames
            .checked_mul(frame_bits / 8)
            .ok_or_else(|| {
                PcmError::InvalidConfig(format!(
                    "buffer of {frames} frames of {} bytes overflows",
                    frame_bits / 8
                ))
            })?;
        Ok(())
    }

    pub fn buffer_frames(&self) -> Option<u32> {
        self.period_size.checked_mul(self.period_count)
    }

    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes()
    }
}
