//! The PCM device handle: open/negotiate, geometry accessors and teardown.
//!
//! A handle always exists after `open`. When the open fails the handle keeps
//! the error message, owns no device and reports `is_ready() == false`;
//! every other operation on it returns [`PcmError::NotReady`].

use super::alsa::SndPcmNode;
use super::config::{env_flag, pcm_node_path, FORCE_SYNC_PTR_ENV};
use super::error_fmt::pcm_error_message;
use super::options::{Direction, PcmConfig, PcmFlags};
use super::traits::PcmDevice;
use crate::error::{PcmError, Result};
use std::io;
use tracing::debug;

mod convert;
mod negotiate;
mod ring;
mod sync;
mod transfer;

pub use self::convert::{correct_channels, downmix_stereo};
pub use self::negotiate::{RATE_TABLE, compute_boundary, rate_candidates, start_rate_index};
pub use self::ring::{MmapRegion, ring_avail};

use self::ring::PointerPages;
use super::io_util::MmapArea;

pub struct Pcm {
    device: Option<Box<dyn PcmDevice>>,
    flags: PcmFlags,
    config: PcmConfig,
    running: bool,
    underruns: u32,
    buffer_size: u32,
    boundary: u64,
    error: String,
    failure: Option<PcmError>,
    pages: Option<PointerPages>,
    data: Option<MmapArea>,
    noirq_frames_per_msec: u32,
    wait_for_avail_min: bool,
    logical_channels: u32,
    scratch: Vec<u8>,
}

impl std::fmt::Debug for Pcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pcm")
            .field("ready", &self.is_ready())
            .field("flags", &self.flags)
            .field("config", &self.config)
            .field("running", &self.running)
            .field("underruns", &self.underruns)
            .field("buffer_size", &self.buffer_size)
            .field("boundary", &self.boundary)
            .field("error", &self.error)
            .finish()
    }
}

impl Pcm {
    fn unopened(flags: PcmFlags, config: &PcmConfig) -> Self {
        Self {
            device: None,
            flags,
            config: config.clone(),
            running: false,
            underruns: 0,
            buffer_size: 0,
            boundary: 0,
            error: String::new(),
            failure: None,
            pages: None,
            data: None,
            noirq_frames_per_msec: 0,
            wait_for_avail_min: false,
            logical_channels: config.channels,
            scratch: Vec::new(),
        }
    }

    /// Opens `card`/`device` and negotiates `config.rate` exactly.
    pub fn open(card: u32, device: u32, flags: PcmFlags, config: &PcmConfig) -> Pcm {
        Self::open_node(card, device, flags, config, None)
    }

    /// Opens `card`/`device`, walking the rate table from `requested_rate`
    /// until the hardware accepts one.
    pub fn open_req(
        card: u32,
        device: u32,
        flags: PcmFlags,
        config: &PcmConfig,
        requested_rate: u32,
    ) -> Pcm {
        Self::open_node(card, device, flags, config, Some(requested_rate))
    }

    fn open_node(
        card: u32,
        device: u32,
        flags: PcmFlags,
        config: &PcmConfig,
        requested_rate: Option<u32>,
    ) -> Pcm {
        let path = pcm_node_path(card, device, flags.direction());
        match SndPcmNode::open(&path) {
            Ok(node) => Self::open_with(Box::new(node), flags, config, requested_rate),
            Err(e) => {
                let mut pcm = Self::unopened(flags, config);
                pcm.error = e.to_string();
                pcm.failure = Some(e);
                pcm
            }
        }
    }

    /// Runs the full open sequence on an already opened device.
    pub fn open_with(
        device: Box<dyn PcmDevice>,
        flags: PcmFlags,
        config: &PcmConfig,
        requested_rate: Option<u32>,
    ) -> Pcm {
        let mut pcm = Self::unopened(flags, config);
        pcm.device = Some(device);
        if let Err(e) = pcm.setup(requested_rate) {
            if pcm.error.is_empty() {
                pcm.error = e.to_string();
            }
            debug!(error = %pcm.error, "pcm open failed");
            pcm.release();
            pcm.failure = Some(e);
        }
        pcm
    }

    fn setup(&mut self, requested_rate: Option<u32>) -> Result<()> {
        self.config.validate()?;
        if self.flags.contains(PcmFlags::NOIRQ) && !self.flags.contains(PcmFlags::MMAP) {
            return Err(PcmError::ConfigRejected(
                "noirq only currently supported with mmap()".into(),
            ));
        }

        self.logical_channels = self.config.channels;
        if self.direction().is_capture() && self.config.requested_channels == Some(1) {
            self.logical_channels = 1;
            self.config.channels = 2;
        }

        let info = self.kernel("cannot get info", |d| d.info())?;
        debug!(id = %info.id_str(), name = %info.name_str(), "pcm info");

        let rates: Vec<u32> = match requested_rate {
            Some(rate) => rate_candidates(rate).collect(),
            None => vec![self.config.rate],
        };
        let flags = self.flags;
        let config = self.config.clone();
        let (params, rate) = {
            let device = self.device_mut()?;
            negotiate::negotiate_hw(device, &config, flags, &rates)
        }
        .inspect_err(|e| self.error = e.to_string())?;
        self.config.rate = rate;
        if flags.contains(PcmFlags::NOIRQ) {
            self.noirq_frames_per_msec = rate / 1000;
        }
        negotiate::read_back_geometry(&params, &mut self.config);
        self.buffer_size = self
            .config
            .buffer_frames()
            .ok_or_else(|| PcmError::InvalidConfig("refined buffer overflows".into()))?;

        if flags.contains(PcmFlags::MMAP) {
            let len = self.frames_to_bytes(self.buffer_size) as usize;
            let area = self.kernel("failed to mmap buffer", |d| {
                d.map(len, super::asound::SNDRV_PCM_MMAP_OFFSET_DATA, true)
            })?;
            self.data = Some(area);
        }

        let mut sw = negotiate::build_sw_params(&mut self.config, flags, self.buffer_size);
        self.boundary = sw.boundary as u64;
        self.kernel("cannot set sw params", |d| d.sw_params(&mut sw))?;

        let force_sync = env_flag(FORCE_SYNC_PTR_ENV);
        self.map_pointer_pages(force_sync)?;

        if flags.contains(PcmFlags::MONOTONIC) {
            self.kernel("cannot set timestamp type", |d| {
                d.set_tstamp_type(super::asound::SNDRV_PCM_TSTAMP_TYPE_MONOTONIC)
            })?;
        }

        debug!(
            direction = self.direction().as_str(),
            rate = self.config.rate,
            channels = self.config.channels,
            period_size = self.config.period_size,
            period_count = self.config.period_count,
            boundary = self.boundary,
            "pcm opened"
        );
        Ok(())
    }

    /// Runs one kernel call, recording any failure as this handle's error.
    pub(crate) fn kernel<T>(
        &mut self,
        what: &str,
        f: impl FnOnce(&mut dyn PcmDevice) -> io::Result<T>,
    ) -> Result<T> {
        let res = f(self.device_mut()?);
        res.map_err(|e| self.oops(what, e))
    }

    pub(crate) fn oops(&mut self, what: &str, source: io::Error) -> PcmError {
        self.error = pcm_error_message(what, &source);
        PcmError::io(what, source)
    }

    pub(crate) fn device_mut(&mut self) -> Result<&mut dyn PcmDevice> {
        match self.device.as_mut() {
            Some(device) => Ok(device.as_mut()),
            None => Err(PcmError::NotReady),
        }
    }

    fn release(&mut self) {
        self.pages = None;
        self.data = None;
        self.device = None;
        self.running = false;
        self.scratch = Vec::new();
    }

    /// Tears the handle down. A handle that never opened closes trivially.
    pub fn close(&mut self) -> Result<()> {
        if self.device.is_none() {
            return Ok(());
        }
        self.pages = None;
        if self.flags.contains(PcmFlags::MMAP) {
            let _ = self.stop();
            self.data = None;
        }
        self.release();
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.device.is_some()
    }

    /// Converts a failed open into its error.
    pub fn ready(mut self) -> Result<Pcm> {
        if self.is_ready() {
            return Ok(self);
        }
        Err(self
            .failure
            .take()
            .unwrap_or(PcmError::ConfigRejected(self.error.clone())))
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn config(&self) -> &PcmConfig {
        &self.config
    }

    pub fn flags(&self) -> PcmFlags {
        self.flags
    }

    pub fn direction(&self) -> Direction {
        self.flags.direction()
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn boundary(&self) -> u64 {
        self.boundary
    }

    pub fn underruns(&self) -> u32 {
        self.underruns
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Channels the application sees; differs from the hardware count only
    /// for downmixed mono capture.
    pub fn logical_channels(&self) -> u32 {
        self.logical_channels
    }

    /// Saturates instead of wrapping; `validate` keeps real geometries in range.
    pub fn frames_to_bytes(&self, frames: u32) -> u32 {
        frames
            .saturating_mul(self.config.channels)
            .saturating_mul(self.config.format.bytes() as u32)
    }

    pub fn bytes_to_frames(&self, bytes: u32) -> u32 {
        let frame = self
            .config
            .channels
            .saturating_mul(self.config.format.bytes() as u32);
        if frame == 0 { 0 } else { bytes / frame }
    }

    pub(crate) fn device_fd(&self) -> Option<std::os::fd::RawFd> {
        self.device.as_ref().map(|d| d.fd())
    }
}

impl Drop for Pcm {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
