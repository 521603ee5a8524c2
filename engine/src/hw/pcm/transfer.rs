use super::Pcm;
use super::convert::correct_channels;
use crate::error::{PcmError, Result};
use crate::hw::asound::{
    SNDRV_PCM_STATE_DISCONNECTED, SNDRV_PCM_STATE_SUSPENDED, SNDRV_PCM_STATE_XRUN,
};
use crate::hw::error_fmt::pcm_error_message;
use crate::hw::io_util::MmapArea;
use crate::hw::latency::noirq_wait_ms;
use crate::hw::options::{Direction, PcmFlags};
use nix::libc;
use std::io;
use tracing::warn;

fn is_epipe(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EPIPE)
}

impl Pcm {
    fn expect_direction(&self, direction: Direction) -> Result<()> {
        if !self.is_ready() {
            return Err(PcmError::NotReady);
        }
        if self.direction() != direction {
            return Err(PcmError::InvalidDirection);
        }
        Ok(())
    }

    fn hw_frame_bytes(&self) -> usize {
        self.config.frame_bytes()
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.kernel("cannot prepare channel", |d| d.prepare())
    }

    pub fn start(&mut self) -> Result<()> {
        self.prepare()?;
        if self.flags.contains(PcmFlags::MMAP) {
            self.sync_ptr(0)?;
        }
        self.kernel("cannot start channel", |d| d.start())?;
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.kernel("cannot stop channel", |d| d.drop_stream())?;
        self.running = false;
        Ok(())
    }

    /// Plays interleaved frames, blocking until the kernel has taken them.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.expect_direction(Direction::Playback)?;
        if self.flags.contains(PcmFlags::MMAP) {
            self.mmap_write(data)?;
            return Ok(());
        }
        let frames = data.len() / self.hw_frame_bytes();
        loop {
            if !self.running {
                self.prepare()?;
                self.kernel("cannot write initial data", |d| d.writei(data, frames))?;
                self.running = true;
                return Ok(());
            }
            let res = self.device_mut()?.writei(data, frames);
            match res {
                Ok(_) => return Ok(()),
                Err(e) => {
                    self.running = false;
                    if is_epipe(&e) {
                        self.underruns += 1;
                        warn!(underruns = self.underruns, "playback underrun");
                        if self.flags.contains(PcmFlags::NORESTART) {
                            return Err(PcmError::Xrun);
                        }
                        continue;
                    }
                    return Err(self.oops("cannot write stream data", e));
                }
            }
        }
    }

    /// Captures into `data`, downmixing when the application asked for mono.
    pub fn read(&mut self, data: &mut [u8]) -> Result<()> {
        self.expect_direction(Direction::Capture)?;
        let sample_bytes = self.config.format.bytes();
        let logical = self.logical_channels as usize;
        let hw_channels = self.config.channels as usize;
        let frames = data.len() / (logical * sample_bytes);
        let hw_bytes = frames * hw_channels * sample_bytes;

        let mut scratch = std::mem::take(&mut self.scratch);
        if scratch.len() < hw_bytes {
            scratch.resize(hw_bytes, 0);
        }
        let res = self.read_frames(&mut scratch[..hw_bytes], frames);
        if res.is_ok() {
            correct_channels(
                self.config.format,
                hw_channels,
                logical,
                &scratch[..hw_bytes],
                data,
            );
        }
        self.scratch = scratch;
        res
    }

    /// Captures raw hardware frames with no channel correction.
    pub fn read_ex(&mut self, data: &mut [u8]) -> Result<()> {
        self.expect_direction(Direction::Capture)?;
        let frames = data.len() / self.hw_frame_bytes();
        self.read_frames(data, frames)
    }

    fn read_frames(&mut self, buf: &mut [u8], frames: usize) -> Result<()> {
        if self.flags.contains(PcmFlags::MMAP) {
            self.mmap_read(buf)?;
            return Ok(());
        }
        loop {
            if !self.running {
                self.start()?;
            }
            let res = self.device_mut()?.readi(buf, frames);
            match res {
                Ok(_) => return Ok(()),
                Err(e) => {
                    self.running = false;
                    if is_epipe(&e) {
                        // Capture recovers from overruns regardless of NORESTART.
                        self.underruns += 1;
                        warn!(overruns = self.underruns, "capture overrun");
                        continue;
                    }
                    return Err(self.oops("cannot read stream data", e));
                }
            }
        }
    }

    /// Blocks until the stream can move data. `Ok(false)` means timeout.
    pub fn wait(&mut self, timeout_ms: i32) -> Result<bool> {
        let ready = if self.direction().is_capture() {
            libc::POLLIN
        } else {
            libc::POLLOUT
        };
        let events = ready | libc::POLLERR | libc::POLLNVAL;
        loop {
            let res = self.device_mut()?.poll(events, timeout_ms);
            let revents = match res {
                Ok(0) => return Ok(false),
                Ok(revents) => revents,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.oops("poll failed", e)),
            };
            if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                let err = match self.state()? {
                    SNDRV_PCM_STATE_XRUN => PcmError::Xrun,
                    SNDRV_PCM_STATE_SUSPENDED => PcmError::Suspended,
                    SNDRV_PCM_STATE_DISCONNECTED => PcmError::Disconnected,
                    _ => PcmError::io("poll error", io::Error::from_raw_os_error(libc::EIO)),
                };
                self.error =
                    pcm_error_message("wait error", &io::Error::from_raw_os_error(err.errno()));
                return Err(err);
            }
            if revents & (libc::POLLIN | libc::POLLOUT) != 0 {
                return Ok(true);
            }
        }
    }

    pub fn mmap_write(&mut self, data: &[u8]) -> Result<u32> {
        if !self.flags.contains(PcmFlags::MMAP) || self.direction().is_capture() {
            return Err(PcmError::Unsupported("mmap_write"));
        }
        let frame_bytes = self.hw_frame_bytes();
        let frames = (data.len() / frame_bytes) as u32;
        self.mmap_transfer(frames, |area, area_offset, user_offset, len| {
            area.write_bytes(area_offset, &data[user_offset..user_offset + len]);
        })
    }

    pub fn mmap_read(&mut self, data: &mut [u8]) -> Result<u32> {
        if !self.flags.contains(PcmFlags::MMAP) || !self.direction().is_capture() {
            return Err(PcmError::Unsupported("mmap_read"));
        }
        let frame_bytes = self.hw_frame_bytes();
        let frames = (data.len() / frame_bytes) as u32;
        self.mmap_transfer(frames, |area, area_offset, user_offset, len| {
            area.read_bytes(area_offset, &mut data[user_offset..user_offset + len]);
        })
    }

    /// Moves `frames` frames through the ring, starting the stream once the
    /// start threshold is met and sleeping for avail_min when starved.
    fn mmap_transfer(
        &mut self,
        frames: u32,
        mut copy: impl FnMut(&mut MmapArea, usize, usize, usize),
    ) -> Result<u32> {
        let frame_bytes = self.hw_frame_bytes();
        let mut remaining = frames;
        let mut done = 0u32;
        while remaining > 0 {
            let avail = self.avail_update()?;

            if !self.running
                && u64::from(self.buffer_size).saturating_sub(avail)
                    >= u64::from(self.config.start_threshold)
            {
                self.start()?;
                self.wait_for_avail_min = false;
            }

            if self.running {
                if u64::from(remaining) > avail {
                    self.wait_for_avail_min = true;
                }
                let avail_min = u64::from(self.config.avail_min);
                if self.wait_for_avail_min && avail < avail_min {
                    self.wait_for_avail_min = false;
                    let timeout = if self.flags.contains(PcmFlags::NOIRQ) {
                        noirq_wait_ms(avail_min, avail, self.noirq_frames_per_msec)
                    } else {
                        -1
                    };
                    if let Err(e) = self.wait(timeout) {
                        self.running = false;
                        let what = format!("wait error: hw {} app {}", self.hw_ptr(), self.appl_ptr());
                        self.error =
                            pcm_error_message(&what, &io::Error::from_raw_os_error(e.errno()));
                        self.set_appl_ptr(0);
                        return Err(e);
                    }
                    continue;
                }
            }

            let mut chunk = u64::from(remaining).min(avail) as u32;
            if chunk == 0 {
                break;
            }
            while chunk > 0 {
                let region = self.mmap_begin(chunk)?;
                if region.frames == 0 {
                    break;
                }
                if let Some(area) = self.data.as_mut() {
                    copy(
                        area,
                        region.offset as usize * frame_bytes,
                        done as usize * frame_bytes,
                        region.frames as usize * frame_bytes,
                    );
                }
                let committed = self.mmap_commit(region.offset, region.frames)?;
                done += committed;
                remaining -= committed;
                chunk -= committed;
            }
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::{MockCall, MockConfig, MockDevice, MockHandle};
    use crate::hw::options::PcmConfig;

    fn config() -> PcmConfig {
        PcmConfig {
            channels: 2,
            rate: 48_000,
            period_size: 480,
            period_count: 4,
            ..PcmConfig::default()
        }
    }

    fn open(mock: MockConfig, flags: PcmFlags) -> (Pcm, MockHandle) {
        let (dev, handle) = MockDevice::new(mock);
        let pcm = Pcm::open_with(Box::new(dev), flags, &config(), None);
        assert!(pcm.is_ready(), "{}", pcm.error());
        (pcm, handle)
    }

    #[test]
    fn first_write_prepares_then_streams() {
        let (mut pcm, handle) = open(MockConfig::playback(), PcmFlags::OUT);
        let buf = vec![1u8; 1920];
        pcm.write(&buf).unwrap();
        pcm.write(&buf).unwrap();
        assert!(pcm.is_running());
        let calls = handle.calls();
        let prepare = calls.iter().position(|c| *c == MockCall::Prepare).unwrap();
        assert!(matches!(calls[prepare + 1], MockCall::WriteI(480)));
        assert_eq!(handle.written().len(), 3840);
    }

    #[test]
    fn write_underrun_is_retried() {
        let (mut pcm, handle) = open(MockConfig::playback(), PcmFlags::OUT);
        let buf = vec![0u8; 1920];
        pcm.write(&buf).unwrap();
        handle.inject_xruns(1);
        pcm.write(&buf).unwrap();
        assert_eq!(pcm.underruns(), 1);
        assert!(pcm.is_running());
        assert_eq!(handle.written().len(), 3840);
    }

    #[test]
    fn norestart_surfaces_underrun() {
        let (mut pcm, handle) = open(MockConfig::playback(), PcmFlags::NORESTART);
        let buf = vec![0u8; 1920];
        pcm.write(&buf).unwrap();
        handle.inject_xruns(1);
        assert!(matches!(pcm.write(&buf), Err(PcmError::Xrun)));
        assert_eq!(pcm.underruns(), 1);
        assert!(!pcm.is_running());
    }

    #[test]
    fn capture_overrun_retries_even_with_norestart() {
        let (mut pcm, handle) = open(MockConfig::capture(), PcmFlags::IN | PcmFlags::NORESTART);
        let mut buf = vec![0u8; 1920];
        pcm.read(&mut buf).unwrap();
        handle.inject_xruns(1);
        pcm.read(&mut buf).unwrap();
        assert_eq!(pcm.underruns(), 1);
    }

    #[test]
    fn read_starts_stream_first() {
        let (mut pcm, handle) = open(MockConfig::capture(), PcmFlags::IN);
        let mut buf = vec![0u8; 1920];
        pcm.read(&mut buf).unwrap();
        let calls = handle.calls();
        let start = calls.iter().position(|c| *c == MockCall::Start).unwrap();
        assert!(matches!(calls[start + 1], MockCall::ReadI(480)));
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let (mut pcm, _) = open(MockConfig::playback(), PcmFlags::OUT);
        let mut buf = vec![0u8; 64];
        assert!(matches!(pcm.read(&mut buf), Err(PcmError::InvalidDirection)));
        assert!(matches!(pcm.mmap_write(&buf), Err(PcmError::Unsupported(_))));
    }

    #[test]
    fn mono_capture_downmixes() {
        let (dev, handle) = MockDevice::new(MockConfig::capture());
        let cfg = PcmConfig {
            requested_channels: Some(1),
            ..config()
        };
        let mut pcm = Pcm::open_with(Box::new(dev), PcmFlags::IN, &cfg, None);
        handle.set_capture_pattern(&[0x00, 0x40, 0x00, 0x20]);
        let mut mono = vec![0u8; 960];
        pcm.read(&mut mono).unwrap();
        let s = i16::from_le_bytes([mono[0], mono[1]]);
        assert_eq!(s, (0x4000 >> 1) + (0x2000 >> 1));
        let mut raw = vec![0u8; 8];
        pcm.read_ex(&mut raw).unwrap();
        assert_eq!(raw, [0x00, 0x40, 0x00, 0x20, 0x00, 0x40, 0x00, 0x20]);
    }

    #[test]
    fn poll_error_maps_kernel_state() {
        for (state, expect) in [
            (SNDRV_PCM_STATE_XRUN, "xrun"),
            (SNDRV_PCM_STATE_SUSPENDED, "suspended"),
            (SNDRV_PCM_STATE_DISCONNECTED, "disconnected"),
            (crate::hw::asound::SNDRV_PCM_STATE_SETUP, "io"),
        ] {
            let (mut pcm, handle) = open(MockConfig::playback(), PcmFlags::MMAP);
            handle.fail_next_poll(state);
            let err = pcm.wait(10).unwrap_err();
            let got = match err {
                PcmError::Xrun => "xrun",
                PcmError::Suspended => "suspended",
                PcmError::Disconnected => "disconnected",
                PcmError::Io { .. } => "io",
                _ => "other",
            };
            assert_eq!(got, expect);
        }
    }

    #[test]
    fn mmap_playback_starts_at_threshold_and_drains() {
        let (mut pcm, handle) = open(MockConfig::playback(), PcmFlags::MMAP);
        let period = vec![7u8; 1920];
        for _ in 0..2 {
            assert_eq!(pcm.mmap_write(&period).unwrap(), 480);
            assert!(!pcm.is_running());
        }
        assert_eq!(pcm.mmap_write(&period).unwrap(), 480);
        assert!(pcm.is_running());
        for _ in 0..5 {
            assert_eq!(pcm.mmap_write(&period).unwrap(), 480);
        }
        assert!(handle.written().len() >= 4 * 1920);
        assert!(handle.written().iter().all(|b| *b == 7));
    }

    #[test]
    fn mmap_capture_round() {
        let (mut pcm, handle) = open(MockConfig::capture(), PcmFlags::IN | PcmFlags::MMAP);
        handle.set_capture_pattern(&[1, 2, 3, 4]);
        let mut buf = vec![0u8; 1920 * 3];
        assert_eq!(pcm.mmap_read(&mut buf).unwrap(), 480 * 3);
        assert!(pcm.is_running());
        assert_eq!(&buf[..8], &[1, 2, 3, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn failed_wait_resets_application_pointer() {
        let (mut pcm, handle) = open(MockConfig::capture(), PcmFlags::IN | PcmFlags::MMAP);
        let mut buf = vec![0u8; 1920];
        pcm.mmap_read(&mut buf).unwrap();
        handle.fail_next_poll(SNDRV_PCM_STATE_XRUN);
        assert!(matches!(pcm.mmap_read(&mut buf), Err(PcmError::Xrun)));
        assert!(!pcm.is_running());
        assert_eq!(pcm.appl_ptr(), 0);
        assert!(pcm.error().starts_with("wait error: hw "), "{}", pcm.error());
        let epipe = io::Error::from_raw_os_error(libc::EPIPE).to_string();
        assert!(pcm.error().ends_with(&epipe), "{}", pcm.error());
    }

    #[test]
    fn disconnected_wait_records_error_text() {
        let (mut pcm, handle) = open(MockConfig::playback(), PcmFlags::MMAP);
        assert!(pcm.error().is_empty());
        handle.fail_next_poll(SNDRV_PCM_STATE_DISCONNECTED);
        assert!(matches!(pcm.wait(10), Err(PcmError::Disconnected)));
        let enodev = io::Error::from_raw_os_error(libc::ENODEV).to_string();
        assert_eq!(pcm.error(), format!("wait error: {enodev}"));
    }

    #[test]
    fn mapped_pointer_pages_transfer() {
        let (mut pcm, handle) = open(
            MockConfig {
                map_pointer_pages: true,
                ..MockConfig::playback()
            },
            PcmFlags::MMAP,
        );
        assert!(!handle.calls().iter().any(|c| matches!(c, MockCall::SyncPtr(_))));
        let period = vec![3u8; 1920];
        for _ in 0..8 {
            assert_eq!(pcm.mmap_write(&period).unwrap(), 480);
        }
        assert!(handle.written().len() >= 4 * 1920);
    }

    #[test]
    fn noirq_wait_uses_bounded_timeout() {
        let (mut pcm, handle) = open(MockConfig::playback(), PcmFlags::MMAP | PcmFlags::NOIRQ);
        let period = vec![0u8; 1920];
        for _ in 0..6 {
            pcm.mmap_write(&period).unwrap();
        }
        assert!(handle.calls().contains(&MockCall::Poll(10)));
        pcm.set_avail_min(96).unwrap();
        assert_eq!(pcm.config().avail_min, 96);
    }

    #[test]
    fn set_avail_min_requires_noirq_mmap() {
        let (mut pcm, _) = open(MockConfig::playback(), PcmFlags::MMAP);
        assert!(matches!(pcm.set_avail_min(64), Err(PcmError::Unsupported(_))));
    }
}
