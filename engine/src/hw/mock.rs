//! In-memory stand-in for a PCM character device.
//!
//! The mock keeps the kernel side of a stream: negotiated geometry, the
//! hardware and application pointers, the state machine and the shared data
//! buffer. The hardware pointer only moves inside `poll`, by one period per
//! call, so tests decide exactly when the "DAC" consumes or the "ADC"
//! produces frames.
//!
//! ```
//! use tinypcm_engine::hw::mock::{MockConfig, MockDevice};
//! use tinypcm_engine::hw::options::{PcmConfig, PcmFlags};
//! use tinypcm_engine::hw::pcm::Pcm;
//!
//! let (device, handle) = MockDevice::new(MockConfig::playback());
//! let mut pcm = Pcm::open_with(Box::new(device), PcmFlags::OUT, &PcmConfig::default(), None);
//! pcm.write(&vec![0u8; 4096]).unwrap();
//! assert_eq!(handle.written().len(), 4096);
//! ```

use super::asound::{
    SNDRV_PCM_MMAP_OFFSET_CONTROL, SNDRV_PCM_MMAP_OFFSET_DATA, SNDRV_PCM_MMAP_OFFSET_STATUS,
    SNDRV_PCM_STATE_OPEN, SNDRV_PCM_STATE_PREPARED, SNDRV_PCM_STATE_RUNNING,
    SNDRV_PCM_STATE_SETUP, SNDRV_PCM_STATE_XRUN, SNDRV_PCM_SYNC_PTR_APPL,
    SNDRV_PCM_SYNC_PTR_AVAIL_MIN, SndPcmInfo, SndPcmMmapControl, SndPcmMmapStatus,
    SndPcmSwParams, SndPcmSyncPtr, SndTimespec,
};
use super::io_util::{MmapArea, SharedRegion};
use super::options::Direction;
use super::params::{HwParam, HwParams};
use super::traits::PcmDevice;
use nix::libc;
use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Info,
    HwRefine,
    HwParams(u32),
    SwParams,
    TstampType(i32),
    Prepare,
    Start,
    Drop,
    Delay,
    SyncPtr(u32),
    WriteI(usize),
    ReadI(usize),
    Link(RawFd),
    Unlink,
    Poll(i32),
    Map(i64),
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub direction: Direction,
    /// Rates HW_PARAMS accepts; `None` accepts any.
    pub accepted_rates: Option<Vec<u32>>,
    /// Allow mapping the status/control pages instead of SYNC_PTR.
    pub map_pointer_pages: bool,
    /// Value DELAY reports; `None` makes the ioctl fail.
    pub delay: Option<i64>,
    pub fd: RawFd,
}

impl MockConfig {
    pub fn playback() -> Self {
        Self {
            direction: Direction::Playback,
            accepted_rates: None,
            map_pointer_pages: false,
            delay: None,
            fd: 3,
        }
    }

    pub fn capture() -> Self {
        Self {
            direction: Direction::Capture,
            fd: 4,
            ..Self::playback()
        }
    }
}

#[derive(Debug)]
struct MockState {
    cfg: MockConfig,
    calls: Vec<MockCall>,
    closed: bool,
    hw: Option<HwParams>,
    sw: Option<SndPcmSwParams>,
    period_size: u64,
    buffer_size: u64,
    boundary: u64,
    frame_bytes: usize,
    hw_ptr: u64,
    appl_ptr: u64,
    avail_min: u64,
    state: i32,
    tstamp: SndTimespec,
    pending_xruns: u32,
    poll_error: Option<i32>,
    fail_link: bool,
    data: Option<Arc<SharedRegion>>,
    status_page: Option<Arc<SharedRegion>>,
    control_page: Option<Arc<SharedRegion>>,
    written: Vec<u8>,
    capture_pattern: Vec<u8>,
    capture_pos: usize,
    linked: Option<RawFd>,
}

fn err(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

impl MockState {
    fn new(cfg: MockConfig) -> Self {
        Self {
            cfg,
            calls: Vec::new(),
            closed: false,
            hw: None,
            sw: None,
            period_size: 0,
            buffer_size: 0,
            boundary: 0,
            frame_bytes: 0,
            hw_ptr: 0,
            appl_ptr: 0,
            avail_min: 1,
            state: SNDRV_PCM_STATE_OPEN,
            tstamp: SndTimespec::default(),
            pending_xruns: 0,
            poll_error: None,
            fail_link: false,
            data: None,
            status_page: None,
            control_page: None,
            written: Vec::new(),
            capture_pattern: (0..=255).collect(),
            capture_pos: 0,
            linked: None,
        }
    }

    fn capture(&self) -> bool {
        self.cfg.direction.is_capture()
    }

    /// Picks up what userspace wrote into the mapped control page.
    fn pull(&mut self) {
        if let Some(page) = &self.control_page {
            let control: SndPcmMmapControl = page.read_value(0);
            self.appl_ptr = control.appl_ptr as u64;
            self.avail_min = control.avail_min as u64;
        }
    }

    /// Publishes the kernel view into the mapped status page.
    fn publish(&mut self) {
        if let Some(page) = &self.status_page {
            page.write_value(0, self.status());
        }
        if let Some(page) = &self.control_page {
            page.write_value(
                0,
                SndPcmMmapControl {
                    appl_ptr: self.appl_ptr as libc::c_ulong,
                    avail_min: self.avail_min as libc::c_ulong,
                },
            );
        }
    }

    fn status(&self) -> SndPcmMmapStatus {
        SndPcmMmapStatus {
            state: self.state,
            hw_ptr: self.hw_ptr as libc::c_ulong,
            tstamp: self.tstamp,
            ..SndPcmMmapStatus::default()
        }
    }

    fn wrap(&self, ptr: u64) -> u64 {
        if self.boundary > 0 { ptr % self.boundary } else { ptr }
    }

    fn distance(&self, from: u64, to: u64) -> u64 {
        if to >= from {
            to - from
        } else if self.boundary > 0 {
            to + self.boundary - from
        } else {
            0
        }
    }

    fn fill_capture(&mut self, dst: &mut [u8]) {
        let len = self.capture_pattern.len().max(1);
        for (i, b) in dst.iter_mut().enumerate() {
            *b = self
                .capture_pattern
                .get((self.capture_pos + i) % len)
                .copied()
                .unwrap_or(0);
        }
        self.capture_pos += dst.len();
    }

    fn take_xrun(&mut self) -> bool {
        if self.state == SNDRV_PCM_STATE_RUNNING && self.pending_xruns > 0 {
            self.pending_xruns -= 1;
            self.state = SNDRV_PCM_STATE_XRUN;
            return true;
        }
        self.state == SNDRV_PCM_STATE_XRUN
    }

    /// Moves the hardware pointer one period through the data buffer.
    fn advance(&mut self) -> bool {
        let limit = if self.capture() {
            self.appl_ptr + self.buffer_size
        } else {
            self.appl_ptr
        };
        let room = self.distance(self.hw_ptr, self.wrap(limit));
        let step = self.period_size.min(room);
        if step == 0 || self.buffer_size == 0 {
            return false;
        }
        let bytes = step as usize * self.frame_bytes;
        let offset = (self.hw_ptr % self.buffer_size) as usize * self.frame_bytes;
        let mut chunk = vec![0u8; bytes];
        if let Some(data) = self.data.clone() {
            if self.capture() {
                self.fill_capture(&mut chunk);
                data.write_bytes(offset, &chunk);
            } else {
                data.read_bytes(offset, &mut chunk);
                self.written.extend_from_slice(&chunk);
            }
        }
        self.hw_ptr = self.wrap(self.hw_ptr + step);
        self.tstamp = SndTimespec {
            tv_sec: 1,
            tv_nsec: self.hw_ptr as libc::c_long,
        };
        true
    }
}

/// A simulated PCM device; clone the returned [`MockHandle`] to inspect it.
#[derive(Debug)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Arc<Mutex<MockState>>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockDevice {
    pub fn new(cfg: MockConfig) -> (MockDevice, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::new(cfg)));
        (
            MockDevice {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }

    fn with<T>(&self, call: MockCall, f: impl FnOnce(&mut MockState) -> io::Result<T>) -> io::Result<T> {
        let mut st = lock(&self.state);
        st.calls.push(call);
        st.pull();
        let res = f(&mut st);
        st.publish();
        res
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        lock(&self.state).closed = true;
    }
}

impl MockHandle {
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    /// Bytes the simulated DAC has consumed, in order.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn sw_params(&self) -> Option<SndPcmSwParams> {
        lock(&self.state).sw
    }

    pub fn negotiated_rate(&self) -> Option<u32> {
        lock(&self.state).hw.as_ref().map(|p| p.get_int(HwParam::Rate))
    }

    pub fn negotiated_channels(&self) -> Option<u32> {
        lock(&self.state)
            .hw
            .as_ref()
            .map(|p| p.get_int(HwParam::Channels))
    }

    /// The next `count` transfers of a running stream fail with EPIPE.
    pub fn inject_xruns(&self, count: u32) {
        lock(&self.state).pending_xruns = count;
    }

    /// The next poll reports POLLERR with the stream in `state`.
    pub fn fail_next_poll(&self, state: i32) {
        lock(&self.state).poll_error = Some(state);
    }

    pub fn fail_link(&self) {
        lock(&self.state).fail_link = true;
    }

    pub fn set_capture_pattern(&self, pattern: &[u8]) {
        let mut st = lock(&self.state);
        st.capture_pattern = pattern.to_vec();
        st.capture_pos = 0;
    }

    pub fn hw_ptr(&self) -> u64 {
        lock(&self.state).hw_ptr
    }

    pub fn appl_ptr(&self) -> u64 {
        let mut st = lock(&self.state);
        st.pull();
        st.appl_ptr
    }

    pub fn linked(&self) -> Option<RawFd> {
        lock(&self.state).linked
    }
}

impl PcmDevice for MockDevice {
    fn fd(&self) -> RawFd {
        lock(&self.state).cfg.fd
    }

    fn info(&mut self) -> io::Result<SndPcmInfo> {
        self.with(MockCall::Info, |st| {
            let mut info = SndPcmInfo::new();
            info.stream = if st.capture() { 1 } else { 0 };
            info.id[..4].copy_from_slice(b"Mock");
            info.name[..8].copy_from_slice(b"Mock PCM");
            info.subdevices_count = 1;
            info.subdevices_avail = 1;
            Ok(info)
        })
    }

    fn hw_refine(&mut self, params: &mut HwParams) -> io::Result<()> {
        self.with(MockCall::HwRefine, |_| {
            let mut refined = HwParams::any();
            for (param, min, max) in [
                (HwParam::SampleBits, 8, 32),
                (HwParam::FrameBits, 8, 256),
                (HwParam::Channels, 1, 8),
                (HwParam::Rate, 8_000, 192_000),
                (HwParam::PeriodSize, 16, 65_536),
                (HwParam::Periods, 2, 32),
                (HwParam::BufferSize, 32, 1 << 20),
            ] {
                refined.set_min(param, min);
                refined.set_max(param, max);
            }
            *params = refined;
            Ok(())
        })
    }

    fn hw_params(&mut self, params: &mut HwParams) -> io::Result<()> {
        let rate = params.get_min(HwParam::Rate);
        self.with(MockCall::HwParams(rate), |st| {
            if let Some(rates) = &st.cfg.accepted_rates {
                if !rates.contains(&rate) {
                    return Err(err(libc::EINVAL));
                }
            }
            for param in HwParam::INTERVALS {
                if let Some(i) = params.interval(param).copied() {
                    let value = if i.max == u32::MAX { i.min } else { i.max };
                    params.set_int(param, value);
                }
            }
            let period = params.get_int(HwParam::PeriodSize);
            let periods = params.get_int(HwParam::Periods);
            let channels = params.get_int(HwParam::Channels);
            let bits = params.get_int(HwParam::SampleBits);
            params.set_int(HwParam::BufferSize, period * periods);
            st.period_size = u64::from(period);
            st.buffer_size = u64::from(period) * u64::from(periods);
            st.frame_bytes = (bits / 8 * channels) as usize;
            st.state = SNDRV_PCM_STATE_SETUP;
            st.hw = Some(params.clone());
            Ok(())
        })
    }

    fn sw_params(&mut self, params: &mut SndPcmSwParams) -> io::Result<()> {
        self.with(MockCall::SwParams, |st| {
            st.boundary = params.boundary as u64;
            st.avail_min = params.avail_min as u64;
            st.sw = Some(*params);
            Ok(())
        })
    }

    fn set_tstamp_type(&mut self, kind: i32) -> io::Result<()> {
        self.with(MockCall::TstampType(kind), |_| Ok(()))
    }

    fn prepare(&mut self) -> io::Result<()> {
        self.with(MockCall::Prepare, |st| {
            if st.state == SNDRV_PCM_STATE_OPEN {
                return Err(err(libc::EBADFD));
            }
            st.state = SNDRV_PCM_STATE_PREPARED;
            Ok(())
        })
    }

    fn start(&mut self) -> io::Result<()> {
        self.with(MockCall::Start, |st| {
            if st.state != SNDRV_PCM_STATE_PREPARED {
                return Err(err(libc::EBADFD));
            }
            st.state = SNDRV_PCM_STATE_RUNNING;
            st.tstamp = SndTimespec {
                tv_sec: 1,
                tv_nsec: 0,
            };
            Ok(())
        })
    }

    fn drop_stream(&mut self) -> io::Result<()> {
        self.with(MockCall::Drop, |st| {
            st.state = SNDRV_PCM_STATE_SETUP;
            Ok(())
        })
    }

    fn delay(&mut self) -> io::Result<i64> {
        self.with(MockCall::Delay, |st| st.cfg.delay.ok_or_else(|| err(libc::EIO)))
    }

    fn sync_ptr(&mut self, sync: &mut SndPcmSyncPtr) -> io::Result<()> {
        let flags = sync.flags;
        self.with(MockCall::SyncPtr(flags), |st| {
            if flags & SNDRV_PCM_SYNC_PTR_APPL == 0 {
                st.appl_ptr = sync.control().appl_ptr as u64;
            } else {
                sync.control_mut().appl_ptr = st.appl_ptr as libc::c_ulong;
            }
            if flags & SNDRV_PCM_SYNC_PTR_AVAIL_MIN == 0 {
                st.avail_min = sync.control().avail_min as u64;
            } else {
                sync.control_mut().avail_min = st.avail_min as libc::c_ulong;
            }
            *sync.status_mut() = st.status();
            Ok(())
        })
    }

    fn writei(&mut self, data: &[u8], frames: usize) -> io::Result<usize> {
        self.with(MockCall::WriteI(frames), |st| {
            if st.take_xrun() {
                return Err(err(libc::EPIPE));
            }
            if st.state != SNDRV_PCM_STATE_PREPARED && st.state != SNDRV_PCM_STATE_RUNNING {
                return Err(err(libc::EBADFD));
            }
            let bytes = (frames * st.frame_bytes).min(data.len());
            st.written.extend_from_slice(&data[..bytes]);
            st.appl_ptr = st.wrap(st.appl_ptr + frames as u64);
            st.hw_ptr = st.appl_ptr;
            st.state = SNDRV_PCM_STATE_RUNNING;
            Ok(frames)
        })
    }

    fn readi(&mut self, data: &mut [u8], frames: usize) -> io::Result<usize> {
        self.with(MockCall::ReadI(frames), |st| {
            if st.take_xrun() {
                return Err(err(libc::EPIPE));
            }
            if st.state != SNDRV_PCM_STATE_PREPARED && st.state != SNDRV_PCM_STATE_RUNNING {
                return Err(err(libc::EBADFD));
            }
            let bytes = (frames * st.frame_bytes).min(data.len());
            st.fill_capture(&mut data[..bytes]);
            st.appl_ptr = st.wrap(st.appl_ptr + frames as u64);
            st.hw_ptr = st.appl_ptr;
            st.state = SNDRV_PCM_STATE_RUNNING;
            Ok(frames)
        })
    }

    fn link(&mut self, other_fd: RawFd) -> io::Result<()> {
        self.with(MockCall::Link(other_fd), |st| {
            if st.fail_link {
                return Err(err(libc::EALREADY));
            }
            st.linked = Some(other_fd);
            Ok(())
        })
    }

    fn unlink(&mut self) -> io::Result<()> {
        self.with(MockCall::Unlink, |st| {
            st.linked = None;
            Ok(())
        })
    }

    fn poll(&mut self, events: i16, timeout_ms: i32) -> io::Result<i16> {
        self.with(MockCall::Poll(timeout_ms), |st| {
            if let Some(state) = st.poll_error.take() {
                st.state = state;
                return Ok(libc::POLLERR);
            }
            let ready = events & (libc::POLLIN | libc::POLLOUT);
            match st.state {
                SNDRV_PCM_STATE_RUNNING => {
                    if st.advance() {
                        Ok(ready)
                    } else {
                        st.state = SNDRV_PCM_STATE_XRUN;
                        Ok(libc::POLLERR)
                    }
                }
                SNDRV_PCM_STATE_PREPARED if !st.capture() => Ok(ready),
                SNDRV_PCM_STATE_XRUN => Ok(libc::POLLERR),
                _ => Ok(0),
            }
        })
    }

    fn map(&mut self, len: usize, offset: i64, _writable: bool) -> io::Result<MmapArea> {
        self.with(MockCall::Map(offset), |st| {
            let region = SharedRegion::new(len)?;
            match offset {
                SNDRV_PCM_MMAP_OFFSET_DATA => st.data = Some(region.clone()),
                SNDRV_PCM_MMAP_OFFSET_STATUS if st.cfg.map_pointer_pages => {
                    st.status_page = Some(region.clone())
                }
                SNDRV_PCM_MMAP_OFFSET_CONTROL if st.cfg.map_pointer_pages => {
                    st.control_page = Some(region.clone())
                }
                _ => return Err(err(libc::ENXIO)),
            }
            Ok(MmapArea::from_shared(region))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refine_reports_capability_ranges() {
        let (mut dev, handle) = MockDevice::new(MockConfig::playback());
        let mut params = HwParams::any();
        dev.hw_refine(&mut params).unwrap();
        assert_eq!(params.get_min(HwParam::Channels), 1);
        assert_eq!(params.get_max(HwParam::Channels), 8);
        assert_eq!(params.get_min(HwParam::Rate), 8_000);
        assert_eq!(handle.calls(), [MockCall::HwRefine]);
    }

    #[test]
    fn sync_ptr_honours_appl_direction() {
        let (mut dev, _) = MockDevice::new(MockConfig::playback());
        let mut sync = SndPcmSyncPtr::new();
        sync.control_mut().appl_ptr = 77;
        dev.sync_ptr(&mut sync).unwrap();
        sync.control_mut().appl_ptr = 5;
        sync.flags = SNDRV_PCM_SYNC_PTR_APPL;
        dev.sync_ptr(&mut sync).unwrap();
        assert_eq!(sync.control().appl_ptr, 77);
    }

    #[test]
    fn dropping_marks_closed() {
        let (dev, handle) = MockDevice::new(MockConfig::capture());
        assert!(!handle.is_closed());
        drop(dev);
        assert!(handle.is_closed());
    }

    #[test]
    fn unknown_map_offsets_fail() {
        let (mut dev, _) = MockDevice::new(MockConfig::playback());
        assert!(dev.map(4096, SNDRV_PCM_MMAP_OFFSET_STATUS, false).is_err());
        assert!(dev.map(4096, SNDRV_PCM_MMAP_OFFSET_DATA, true).is_ok());
    }
}
