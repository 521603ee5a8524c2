use super::Pcm;
use crate::error::{PcmError, Result};

impl Pcm {
    /// Ties this stream to `other` so the kernel starts and stops them together.
    pub fn link(&mut self, other: &Pcm) -> Result<()> {
        let other_fd = other.device_fd().ok_or(PcmError::NotReady)?;
        self.kernel("cannot link PCM", |d| d.link(other_fd))
    }

    pub fn unlink(&mut self) -> Result<()> {
        self.kernel("cannot unlink PCM", |d| d.unlink())
    }

    /// Frames between the application pointer and the DAC/ADC. Failure reads as 0.
    pub fn delay(&mut self) -> u64 {
        self.device_mut()
            .ok()
            .and_then(|d| d.delay().ok())
            .map(|frames| frames.max(0) as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::{MockCall, MockConfig, MockDevice};
    use crate::hw::options::{PcmConfig, PcmFlags};

    #[test]
    fn link_passes_the_other_descriptor() {
        let (cap_dev, cap) = MockDevice::new(MockConfig {
            fd: 41,
            ..MockConfig::capture()
        });
        let (play_dev, _) = MockDevice::new(MockConfig {
            fd: 42,
            ..MockConfig::playback()
        });
        let cfg = PcmConfig::default();
        let mut capture = Pcm::open_with(Box::new(cap_dev), PcmFlags::IN, &cfg, None);
        let playback = Pcm::open_with(Box::new(play_dev), PcmFlags::OUT, &cfg, None);
        capture.link(&playback).unwrap();
        capture.unlink().unwrap();
        let calls = cap.calls();
        assert!(calls.contains(&MockCall::Link(42)));
        assert!(calls.contains(&MockCall::Unlink));
    }

    #[test]
    fn link_failure_is_recorded_on_the_first_handle() {
        let (dev, handle) = MockDevice::new(MockConfig::capture());
        let (other, _) = MockDevice::new(MockConfig::playback());
        let cfg = PcmConfig::default();
        let mut capture = Pcm::open_with(Box::new(dev), PcmFlags::IN, &cfg, None);
        let playback = Pcm::open_with(Box::new(other), PcmFlags::OUT, &cfg, None);
        handle.fail_link();
        assert!(capture.link(&playback).is_err());
        assert!(capture.error().starts_with("cannot link PCM"));
    }

    #[test]
    fn delay_failure_reads_zero() {
        let (dev, _) = MockDevice::new(MockConfig::playback());
        let mut pcm = Pcm::open_with(Box::new(dev), PcmFlags::OUT, &PcmConfig::default(), None);
        assert_eq!(pcm.delay(), 0);

        let (dev, _) = MockDevice::new(MockConfig {
            delay: Some(512),
            ..MockConfig::playback()
        });
        let mut pcm = Pcm::open_with(Box::new(dev), PcmFlags::OUT, &PcmConfig::default(), None);
        assert_eq!(pcm.delay(), 512);
    }
}
