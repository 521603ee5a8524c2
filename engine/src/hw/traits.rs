use super::asound::{SndPcmInfo, SndPcmSwParams, SndPcmSyncPtr};
use super::io_util::MmapArea;
use super::params::HwParams;
use std::io;
use std::os::fd::RawFd;

/// Everything the PCM handle asks of the kernel. `SndPcmNode` talks to a
/// real `/dev/snd` node; `MockDevice` simulates one in memory.
pub trait PcmDevice: Send {
    /// Descriptor handed to another device's `link`.
    fn fd(&self) -> RawFd;

    fn info(&mut self) -> io::Result<SndPcmInfo>;
    fn hw_refine(&mut self, params: &mut HwParams) -> io::Result<()>;
    fn hw_params(&mut self, params: &mut HwParams) -> io::Result<()>;
    fn sw_params(&mut self, params: &mut SndPcmSwParams) -> io::Result<()>;
    fn set_tstamp_type(&mut self, kind: i32) -> io::Result<()>;

    fn prepare(&mut self) -> io::Result<()>;
    fn start(&mut self) -> io::Result<()>;
    fn drop_stream(&mut self) -> io::Result<()>;
    fn delay(&mut self) -> io::Result<i64>;
    fn sync_ptr(&mut self, sync: &mut SndPcmSyncPtr) -> io::Result<()>;

    /// Interleaved transfer of `frames` frames; returns frames moved.
    fn writei(&mut self, data: &[u8], frames: usize) -> io::Result<usize>;
    fn readi(&mut self, data: &mut [u8], frames: usize) -> io::Result<usize>;

    fn link(&mut self, other_fd: RawFd) -> io::Result<()>;
    fn unlink(&mut self) -> io::Result<()>;

    /// Returns the ready events, or 0 on timeout. A negative timeout blocks.
    fn poll(&mut self, events: i16, timeout_ms: i32) -> io::Result<i16>;

    fn map(&mut self, len: usize, offset: i64, writable: bool) -> io::Result<MmapArea>;
}
