use super::asound::*;
use super::error_fmt::device_open_error;
use super::io_util::MmapArea;
use super::params::HwParams;
use super::traits::PcmDevice;
use crate::error::PcmError;
use nix::libc;
use std::{
    fs::File,
    io,
    os::fd::{AsRawFd, RawFd},
    os::unix::fs::OpenOptionsExt,
};
use tracing::debug;

fn errno(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// A `/dev/snd/pcmC*D*[cp]` character device.
#[derive(Debug)]
pub struct SndPcmNode {
    file: File,
}

impl SndPcmNode {
    pub fn open(path: &str) -> Result<Self, PcmError> {
        let file = File::options()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(|source| {
                debug!("{}", device_open_error(path, &source));
                PcmError::Open {
                    path: path.to_string(),
                    source,
                }
            })?;
        debug!(path, "pcm node opened");
        Ok(Self { file })
    }
}

impl PcmDevice for SndPcmNode {
    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn info(&mut self) -> io::Result<SndPcmInfo> {
        let mut info = SndPcmInfo::new();
        unsafe { snd_pcm_info(self.fd(), &mut info) }.map_err(errno)?;
        Ok(info)
    }

    fn hw_refine(&mut self, params: &mut HwParams) -> io::Result<()> {
        let mut raw = params.to_raw();
        unsafe { snd_pcm_hw_refine(self.fd(), &mut raw) }.map_err(errno)?;
        *params = HwParams::from_raw(&raw);
        Ok(())
    }

    fn hw_params(&mut self, params: &mut HwParams) -> io::Result<()> {
        let mut raw = params.to_raw();
        unsafe { snd_pcm_hw_params(self.fd(), &mut raw) }.map_err(errno)?;
        *params = HwParams::from_raw(&raw);
        Ok(())
    }

    fn sw_params(&mut self, params: &mut SndPcmSwParams) -> io::Result<()> {
        unsafe { snd_pcm_sw_params(self.fd(), params) }
            .map(|_| ())
            .map_err(errno)
    }

    fn set_tstamp_type(&mut self, kind: i32) -> io::Result<()> {
        unsafe { snd_pcm_ttstamp(self.fd(), &kind) }
            .map(|_| ())
            .map_err(errno)
    }

    fn prepare(&mut self) -> io::Result<()> {
        unsafe { snd_pcm_prepare(self.fd()) }
            .map(|_| ())
            .map_err(errno)
    }

    fn start(&mut self) -> io::Result<()> {
        unsafe { snd_pcm_start(self.fd()) }
            .map(|_| ())
            .map_err(errno)
    }

    fn drop_stream(&mut self) -> io::Result<()> {
        unsafe { snd_pcm_drop(self.fd()) }
            .map(|_| ())
            .map_err(errno)
    }

    fn delay(&mut self) -> io::Result<i64> {
        let mut frames: libc::c_long = 0;
        unsafe { snd_pcm_delay(self.fd(), &mut frames) }.map_err(errno)?;
        Ok(frames as i64)
    }

    fn sync_ptr(&mut self, sync: &mut SndPcmSyncPtr) -> io::Result<()> {
        unsafe { snd_pcm_sync_ptr(self.fd(), sync) }
            .map(|_| ())
            .map_err(errno)
    }

    fn writei(&mut self, data: &[u8], frames: usize) -> io::Result<usize> {
        let mut xfer = SndXferi {
            result: 0,
            buf: data.as_ptr() as *mut libc::c_void,
            frames: frames as libc::c_ulong,
        };
        // The kernel writes `result` back through the pointer.
        unsafe { snd_pcm_writei_frames(self.fd(), &raw mut xfer) }.map_err(errno)?;
        Ok(xfer.result.max(0) as usize)
    }

    fn readi(&mut self, data: &mut [u8], frames: usize) -> io::Result<usize> {
        let mut xfer = SndXferi {
            result: 0,
            buf: data.as_mut_ptr() as *mut libc::c_void,
            frames: frames as libc::c_ulong,
        };
        unsafe { snd_pcm_readi_frames(self.fd(), &mut xfer) }.map_err(errno)?;
        Ok(xfer.result.max(0) as usize)
    }

    fn link(&mut self, other_fd: RawFd) -> io::Result<()> {
        unsafe { snd_pcm_link(self.fd(), other_fd as _) }
            .map(|_| ())
            .map_err(errno)
    }

    fn unlink(&mut self) -> io::Result<()> {
        unsafe { snd_pcm_unlink(self.fd()) }
            .map(|_| ())
            .map_err(errno)
    }

    fn poll(&mut self, events: i16, timeout_ms: i32) -> io::Result<i16> {
        let mut pfd = libc::pollfd {
            fd: self.fd(),
            events,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        if rc == 0 {
            return Ok(0);
        }
        Ok(pfd.revents)
    }

    fn map(&mut self, len: usize, offset: i64, writable: bool) -> io::Result<MmapArea> {
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                self.fd(),
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        unsafe { MmapArea::from_raw_mapping(ptr, len) }
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))
    }
}
