use super::Pcm;
use crate::error::{PcmError, Result};
use crate::hw::asound::{
    SNDRV_PCM_MMAP_OFFSET_CONTROL, SNDRV_PCM_MMAP_OFFSET_STATUS, SNDRV_PCM_STATE_DRAINING,
    SNDRV_PCM_STATE_RUNNING, SNDRV_PCM_SYNC_PTR_APPL, SNDRV_PCM_SYNC_PTR_HWSYNC,
    SndPcmMmapControl, SndPcmMmapStatus, SndPcmSyncPtr, SndTimespec,
};
use crate::hw::io_util::MmapArea;
use crate::hw::options::{Direction, PcmFlags};
use nix::libc;
use std::io;
use tracing::debug;

/// Where the hardware and application pointers live.
pub(super) enum PointerPages {
    /// Status (read-only) and control (read-write) pages shared with the kernel.
    Mapped {
        status: MmapArea,
        control: MmapArea,
    },
    /// Private copy refreshed through the SYNC_PTR ioctl.
    Synced(Box<SndPcmSyncPtr>),
}

impl PointerPages {
    fn status(&self) -> SndPcmMmapStatus {
        match self {
            PointerPages::Mapped { status, .. } => status.read_value(0),
            PointerPages::Synced(sync) => *sync.status(),
        }
    }

    fn control(&self) -> SndPcmMmapControl {
        match self {
            PointerPages::Mapped { control, .. } => control.read_value(0),
            PointerPages::Synced(sync) => *sync.control(),
        }
    }

    fn set_control(&mut self, value: SndPcmMmapControl) {
        match self {
            PointerPages::Mapped { control, .. } => {
                control.write_value(0, value);
            }
            PointerPages::Synced(sync) => *sync.control_mut() = value,
        }
    }
}

/// A contiguous run of the ring, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapRegion {
    pub offset: u32,
    pub frames: u32,
}

/// Frames the application may transfer given both pointers.
pub fn ring_avail(direction: Direction, hw_ptr: u64, appl_ptr: u64, buffer_size: u64, boundary: u64) -> u64 {
    let hw = i128::from(hw_ptr);
    let appl = i128::from(appl_ptr);
    let boundary = i128::from(boundary);
    let mut avail = match direction {
        Direction::Playback => hw + i128::from(buffer_size) - appl,
        Direction::Capture => hw - appl,
    };
    if avail < 0 {
        avail += boundary;
    } else if boundary > 0 && avail >= boundary {
        avail -= boundary;
    }
    avail.max(0) as u64
}

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as usize }
}

impl Pcm {
    pub(super) fn map_pointer_pages(&mut self, force_sync: bool) -> Result<()> {
        let avail_min = if self.flags.contains(PcmFlags::MMAP) {
            self.config.avail_min
        } else {
            1
        };
        let page = page_size();
        let mapped = if force_sync {
            None
        } else {
            let device = self.device_mut()?;
            match device.map(page, SNDRV_PCM_MMAP_OFFSET_STATUS, false) {
                Ok(status) => match device.map(page, SNDRV_PCM_MMAP_OFFSET_CONTROL, true) {
                    Ok(control) => Some(PointerPages::Mapped { status, control }),
                    Err(e) => {
                        debug!(error = %e, "control page not mappable");
                        None
                    }
                },
                Err(e) => {
                    debug!(error = %e, "status page not mappable");
                    None
                }
            }
        };
        let mut pages = match mapped {
            Some(pages) => pages,
            None => PointerPages::Synced(Box::default()),
        };
        let mut control = pages.control();
        control.avail_min = avail_min as libc::c_ulong;
        pages.set_control(control);
        let synced = matches!(pages, PointerPages::Synced(_));
        self.pages = Some(pages);
        if synced {
            self.sync_ptr(0)?;
        }
        Ok(())
    }

    /// Exchanges pointers with the kernel. A no-op when the pages are mapped.
    pub(crate) fn sync_ptr(&mut self, flags: u32) -> Result<()> {
        let Some(PointerPages::Synced(sync)) = self.pages.as_mut() else {
            return Ok(());
        };
        sync.flags = flags;
        let device = match self.device.as_mut() {
            Some(device) => device,
            None => return Err(PcmError::NotReady),
        };
        match device.sync_ptr(sync) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.oops("cannot sync pointers", e)),
        }
    }

    fn pages(&self) -> Result<&PointerPages> {
        self.pages.as_ref().ok_or(PcmError::NotReady)
    }

    pub fn hw_ptr(&self) -> u64 {
        self.pages
            .as_ref()
            .map(|p| p.status().hw_ptr as u64)
            .unwrap_or(0)
    }

    pub fn appl_ptr(&self) -> u64 {
        self.pages
            .as_ref()
            .map(|p| p.control().appl_ptr as u64)
            .unwrap_or(0)
    }

    pub(crate) fn set_appl_ptr(&mut self, appl_ptr: u64) {
        if let Some(pages) = self.pages.as_mut() {
            let mut control = pages.control();
            control.appl_ptr = appl_ptr as libc::c_ulong;
            pages.set_control(control);
        }
    }

    fn appl_forward(&mut self, frames: u32) {
        let mut appl = self.appl_ptr() + u64::from(frames);
        if self.boundary > 0 && appl >= self.boundary {
            appl -= self.boundary;
        }
        self.set_appl_ptr(appl);
    }

    /// Avail from the pointers as last seen, without talking to the kernel.
    pub(crate) fn cached_avail(&self) -> u64 {
        ring_avail(
            self.direction(),
            self.hw_ptr(),
            self.appl_ptr(),
            u64::from(self.buffer_size),
            self.boundary,
        )
    }

    /// Refreshes the hardware pointer and returns the frames available.
    pub fn avail_update(&mut self) -> Result<u64> {
        self.sync_ptr(SNDRV_PCM_SYNC_PTR_HWSYNC)?;
        Ok(self.cached_avail())
    }

    /// Kernel stream state (`SNDRV_PCM_STATE_*`).
    pub fn state(&mut self) -> Result<i32> {
        self.sync_ptr(0)?;
        Ok(self.pages()?.status().state)
    }

    /// Reserves up to `frames` contiguous frames of the data buffer.
    pub fn mmap_begin(&mut self, frames: u32) -> Result<MmapRegion> {
        if self.data.is_none() {
            return Err(PcmError::Unsupported("mmap_begin"));
        }
        let buffer = u64::from(self.buffer_size);
        let avail = self.avail_update()?.min(buffer);
        let offset = if buffer == 0 {
            0
        } else {
            self.appl_ptr() % buffer
        };
        let continuous = buffer - offset;
        let frames = u64::from(frames).min(avail).min(continuous);
        Ok(MmapRegion {
            offset: offset as u32,
            frames: frames as u32,
        })
    }

    /// Publishes `frames` frames at `offset` to the kernel.
    pub fn mmap_commit(&mut self, _offset: u32, frames: u32) -> Result<u32> {
        self.appl_forward(frames);
        self.sync_ptr(0)?;
        Ok(frames)
    }

    pub fn mmap_area(&self) -> Option<&MmapArea> {
        self.data.as_ref()
    }

    pub fn mmap_area_mut(&mut self) -> Option<&mut MmapArea> {
        self.data.as_mut()
    }

    /// Frames available plus the timestamp of the last hardware pointer update.
    pub fn htimestamp(&mut self) -> Result<(u64, SndTimespec)> {
        self.sync_ptr(SNDRV_PCM_SYNC_PTR_APPL | SNDRV_PCM_SYNC_PTR_HWSYNC)?;
        let status = self.pages()?.status();
        if status.state != SNDRV_PCM_STATE_RUNNING && status.state != SNDRV_PCM_STATE_DRAINING {
            return Err(PcmError::BadState(status.state));
        }
        if status.tstamp.is_zero() {
            return Err(PcmError::io(
                "no timestamp yet",
                io::Error::from_raw_os_error(libc::EAGAIN),
            ));
        }
        Ok((self.cached_avail(), status.tstamp))
    }

    /// Changes the wake-up threshold of a no-irq mmap stream.
    pub fn set_avail_min(&mut self, avail_min: u32) -> Result<()> {
        if !self.flags.contains(PcmFlags::MMAP | PcmFlags::NOIRQ) {
            return Err(PcmError::Unsupported("set_avail_min"));
        }
        let pages = self.pages.as_mut().ok_or(PcmError::NotReady)?;
        let mut control = pages.control();
        control.avail_min = avail_min as libc::c_ulong;
        pages.set_control(control);
        self.config.avail_min = avail_min;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn playback_avail_is_free_space() {
        assert_eq!(ring_avail(Direction::Playback, 0, 0, 1024, 1 << 20), 1024);
        assert_eq!(ring_avail(Direction::Playback, 100, 612, 1024, 1 << 20), 512);
        assert_eq!(ring_avail(Direction::Playback, 100, 1124, 1024, 1 << 20), 0);
    }

    #[test]
    fn capture_avail_is_unread_data() {
        assert_eq!(ring_avail(Direction::Capture, 0, 0, 1024, 1 << 20), 0);
        assert_eq!(ring_avail(Direction::Capture, 700, 200, 1024, 1 << 20), 500);
    }

    #[test]
    fn avail_wraps_at_boundary() {
        let boundary = 4096;
        assert_eq!(ring_avail(Direction::Capture, 10, 4090, 1024, boundary), 16);
        assert_eq!(ring_avail(Direction::Playback, 4090, 10, 1024, boundary), 1008);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn playback_avail_matches_unfilled(
            buffer in 1u64..8192,
            doublings in 0u32..8,
            hw_frac in 0.0f64..1.0,
            filled_frac in 0.0f64..=1.0,
        ) {
            let boundary = buffer << doublings;
            let hw = ((boundary as f64) * hw_frac) as u64 % boundary;
            let filled = ((buffer as f64) * filled_frac) as u64;
            let appl = (hw + filled) % boundary;
            let avail = ring_avail(Direction::Playback, hw, appl, buffer, boundary);
            prop_assert!(avail <= buffer);
            if doublings > 0 {
                prop_assert_eq!(avail, buffer - filled);
            }
        }

        #[test]
        fn capture_avail_matches_produced(
            buffer in 1u64..8192,
            doublings in 1u32..8,
            appl_frac in 0.0f64..1.0,
            produced_frac in 0.0f64..=1.0,
        ) {
            let boundary = buffer << doublings;
            let appl = ((boundary as f64) * appl_frac) as u64 % boundary;
            let produced = ((buffer as f64) * produced_frac) as u64;
            let hw = (appl + produced) % boundary;
            prop_assert_eq!(ring_avail(Direction::Capture, hw, appl, buffer, boundary), produced);
        }
    }
}
