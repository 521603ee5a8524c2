//! Bit-exact mirrors of the kernel PCM structures from `<sound/asound.h>`
//! and the ioctl wrappers that move them across the character device.

use nix::libc;

pub const SNDRV_PCM_IOCTL_MAGIC: u8 = b'A';

pub const SNDRV_PCM_IOCTL_INFO: u8 = 0x01;
pub const SNDRV_PCM_IOCTL_TTSTAMP: u8 = 0x03;
pub const SNDRV_PCM_IOCTL_HW_REFINE: u8 = 0x10;
pub const SNDRV_PCM_IOCTL_HW_PARAMS: u8 = 0x11;
pub const SNDRV_PCM_IOCTL_SW_PARAMS: u8 = 0x13;
pub const SNDRV_PCM_IOCTL_DELAY: u8 = 0x21;
pub const SNDRV_PCM_IOCTL_SYNC_PTR: u8 = 0x23;
pub const SNDRV_PCM_IOCTL_PREPARE: u8 = 0x40;
pub const SNDRV_PCM_IOCTL_START: u8 = 0x42;
pub const SNDRV_PCM_IOCTL_DROP: u8 = 0x43;
pub const SNDRV_PCM_IOCTL_WRITEI_FRAMES: u8 = 0x50;
pub const SNDRV_PCM_IOCTL_READI_FRAMES: u8 = 0x51;
pub const SNDRV_PCM_IOCTL_LINK: u8 = 0x60;
pub const SNDRV_PCM_IOCTL_UNLINK: u8 = 0x61;

pub const SNDRV_PCM_ACCESS_MMAP_INTERLEAVED: u32 = 0;
pub const SNDRV_PCM_ACCESS_RW_INTERLEAVED: u32 = 3;

pub const SNDRV_PCM_FORMAT_S8: u32 = 0;
pub const SNDRV_PCM_FORMAT_S16_LE: u32 = 2;
pub const SNDRV_PCM_FORMAT_S24_LE: u32 = 6;
pub const SNDRV_PCM_FORMAT_S32_LE: u32 = 10;

pub const SNDRV_PCM_SUBFORMAT_STD: u32 = 0;

pub const SNDRV_PCM_HW_PARAMS_NO_PERIOD_WAKEUP: u32 = 1 << 2;

pub const SNDRV_PCM_TSTAMP_ENABLE: i32 = 1;
pub const SNDRV_PCM_TSTAMP_TYPE_MONOTONIC: i32 = 1;

pub const SNDRV_PCM_MMAP_OFFSET_DATA: i64 = 0x0000_0000;
pub const SNDRV_PCM_MMAP_OFFSET_STATUS: i64 = 0x8000_0000;
pub const SNDRV_PCM_MMAP_OFFSET_CONTROL: i64 = 0x8100_0000;

pub const SNDRV_PCM_SYNC_PTR_HWSYNC: u32 = 1 << 0;
pub const SNDRV_PCM_SYNC_PTR_APPL: u32 = 1 << 1;
pub const SNDRV_PCM_SYNC_PTR_AVAIL_MIN: u32 = 1 << 2;

pub const SNDRV_PCM_STATE_OPEN: i32 = 0;
pub const SNDRV_PCM_STATE_SETUP: i32 = 1;
pub const SNDRV_PCM_STATE_PREPARED: i32 = 2;
pub const SNDRV_PCM_STATE_RUNNING: i32 = 3;
pub const SNDRV_PCM_STATE_XRUN: i32 = 4;
pub const SNDRV_PCM_STATE_DRAINING: i32 = 5;
pub const SNDRV_PCM_STATE_PAUSED: i32 = 6;
pub const SNDRV_PCM_STATE_SUSPENDED: i32 = 7;
pub const SNDRV_PCM_STATE_DISCONNECTED: i32 = 8;

pub const SNDRV_MASK_MAX: usize = 256;
pub const SNDRV_MASK_WORDS: usize = SNDRV_MASK_MAX / 32;

pub const SNDRV_PCM_HW_PARAM_FIRST_MASK: usize = 0;
pub const SNDRV_PCM_HW_PARAM_LAST_MASK: usize = 2;
pub const SNDRV_PCM_HW_PARAM_FIRST_INTERVAL: usize = 8;
pub const SNDRV_PCM_HW_PARAM_LAST_INTERVAL: usize = 19;

const MASK_SLOTS: usize = SNDRV_PCM_HW_PARAM_LAST_MASK - SNDRV_PCM_HW_PARAM_FIRST_MASK + 1;
const INTERVAL_SLOTS: usize =
    SNDRV_PCM_HW_PARAM_LAST_INTERVAL - SNDRV_PCM_HW_PARAM_FIRST_INTERVAL + 1;

pub const SNDRV_INTERVAL_OPENMIN: u32 = 1 << 0;
pub const SNDRV_INTERVAL_OPENMAX: u32 = 1 << 1;
pub const SNDRV_INTERVAL_INTEGER: u32 = 1 << 2;
pub const SNDRV_INTERVAL_EMPTY: u32 = 1 << 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SndMask {
    pub bits: [u32; SNDRV_MASK_WORDS],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SndInterval {
    pub min: libc::c_uint,
    pub max: libc::c_uint,
    pub flags: libc::c_uint,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SndPcmHwParams {
    pub flags: libc::c_uint,
    pub masks: [SndMask; MASK_SLOTS],
    pub mres: [SndMask; 5],
    pub intervals: [SndInterval; INTERVAL_SLOTS],
    pub ires: [SndInterval; 9],
    pub rmask: libc::c_uint,
    pub cmask: libc::c_uint,
    pub info: libc::c_uint,
    pub msbits: libc::c_uint,
    pub rate_num: libc::c_uint,
    pub rate_den: libc::c_uint,
    pub fifo_size: libc::c_ulong,
    pub reserved: [u8; 64],
}

impl SndPcmHwParams {
    pub fn new() -> Self {
        Self {
            flags: 0,
            masks: [SndMask::default(); MASK_SLOTS],
            mres: [SndMask::default(); 5],
            intervals: [SndInterval::default(); INTERVAL_SLOTS],
            ires: [SndInterval::default(); 9],
            rmask: 0,
            cmask: 0,
            info: 0,
            msbits: 0,
            rate_num: 0,
            rate_den: 0,
            fifo_size: 0,
            reserved: [0; 64],
        }
    }
}

impl Default for SndPcmHwParams {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SndPcmSwParams {
    pub tstamp_mode: libc::c_int,
    pub period_step: libc::c_uint,
    pub sleep_min: libc::c_uint,
    pub avail_min: libc::c_ulong,
    pub xfer_align: libc::c_ulong,
    pub start_threshold: libc::c_ulong,
    pub stop_threshold: libc::c_ulong,
    pub silence_threshold: libc::c_ulong,
    pub silence_size: libc::c_ulong,
    pub boundary: libc::c_ulong,
    pub proto: libc::c_uint,
    pub tstamp_type: libc::c_uint,
    pub reserved: [u8; 56],
}

impl SndPcmSwParams {
    pub fn new() -> Self {
        Self {
            tstamp_mode: 0,
            period_step: 0,
            sleep_min: 0,
            avail_min: 0,
            xfer_align: 0,
            start_threshold: 0,
            stop_threshold: 0,
            silence_threshold: 0,
            silence_size: 0,
            boundary: 0,
            proto: 0,
            tstamp_type: 0,
            reserved: [0; 56],
        }
    }
}

impl Default for SndPcmSwParams {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SndTimespec {
    pub tv_sec: libc::c_long,
    pub tv_nsec: libc::c_long,
}

impl SndTimespec {
    pub fn is_zero(&self) -> bool {
        self.tv_sec == 0 && self.tv_nsec == 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SndPcmMmapStatus {
    pub state: libc::c_int,
    pub pad1: libc::c_int,
    pub hw_ptr: libc::c_ulong,
    pub tstamp: SndTimespec,
    pub suspended_state: libc::c_int,
    pub audio_tstamp: SndTimespec,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SndPcmMmapControl {
    pub appl_ptr: libc::c_ulong,
    pub avail_min: libc::c_ulong,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union SyncPtrStatus {
    pub status: SndPcmMmapStatus,
    pub reserved: [u8; 64],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union SyncPtrControl {
    pub control: SndPcmMmapControl,
    pub reserved: [u8; 64],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SndPcmSyncPtr {
    pub flags: libc::c_uint,
    pub s: SyncPtrStatus,
    pub c: SyncPtrControl,
}

impl SndPcmSyncPtr {
    pub fn new() -> Self {
        Self {
            flags: 0,
            s: SyncPtrStatus { reserved: [0; 64] },
            c: SyncPtrControl { reserved: [0; 64] },
        }
    }

    pub fn status(&self) -> &SndPcmMmapStatus {
        // Both union arms are plain integers; every bit pattern is valid.
        unsafe { &self.s.status }
    }

    pub fn status_mut(&mut self) -> &mut SndPcmMmapStatus {
        unsafe { &mut self.s.status }
    }

    pub fn control(&self) -> &SndPcmMmapControl {
        unsafe { &self.c.control }
    }

    pub fn control_mut(&mut self) -> &mut SndPcmMmapControl {
        unsafe { &mut self.c.control }
    }
}

impl Default for SndPcmSyncPtr {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SndPcmSyncPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SndPcmSyncPtr")
            .field("flags", &self.flags)
            .field("status", self.status())
            .field("control", self.control())
            .finish()
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SndXferi {
    pub result: libc::c_long,
    pub buf: *mut libc::c_void,
    pub frames: libc::c_ulong,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SndPcmInfo {
    pub device: libc::c_uint,
    pub subdevice: libc::c_uint,
    pub stream: libc::c_int,
    pub card: libc::c_int,
    pub id: [u8; 64],
    pub name: [u8; 80],
    pub subname: [u8; 32],
    pub dev_class: libc::c_int,
    pub dev_subclass: libc::c_int,
    pub subdevices_count: libc::c_uint,
    pub subdevices_avail: libc::c_uint,
    pub sync: [u8; 16],
    pub reserved: [u8; 64],
}

impl SndPcmInfo {
    pub fn new() -> Self {
        Self {
            device: 0,
            subdevice: 0,
            stream: 0,
            card: 0,
            id: [0; 64],
            name: [0; 80],
            subname: [0; 32],
            dev_class: 0,
            dev_subclass: 0,
            subdevices_count: 0,
            subdevices_avail: 0,
            sync: [0; 16],
            reserved: [0; 64],
        }
    }

    pub fn id_str(&self) -> String {
        cstr_fixed_prefix(&self.id)
    }

    pub fn name_str(&self) -> String {
        cstr_fixed_prefix(&self.name)
    }
}

impl Default for SndPcmInfo {
    fn default() -> Self {
        Self::new()
    }
}

fn cstr_fixed_prefix<const N: usize>(raw: &[u8; N]) -> String {
    let len = raw.iter().position(|b| *b == 0).unwrap_or(N);
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

nix::ioctl_read!(snd_pcm_info, SNDRV_PCM_IOCTL_MAGIC, SNDRV_PCM_IOCTL_INFO, SndPcmInfo);
nix::ioctl_write_ptr!(
    snd_pcm_ttstamp,
    SNDRV_PCM_IOCTL_MAGIC,
    SNDRV_PCM_IOCTL_TTSTAMP,
    libc::c_int
);
nix::ioctl_readwrite!(
    snd_pcm_hw_refine,
    SNDRV_PCM_IOCTL_MAGIC,
    SNDRV_PCM_IOCTL_HW_REFINE,
    SndPcmHwParams
);
nix::ioctl_readwrite!(
    snd_pcm_hw_params,
    SNDRV_PCM_IOCTL_MAGIC,
    SNDRV_PCM_IOCTL_HW_PARAMS,
    SndPcmHwParams
);
nix::ioctl_readwrite!(
    snd_pcm_sw_params,
    SNDRV_PCM_IOCTL_MAGIC,
    SNDRV_PCM_IOCTL_SW_PARAMS,
    SndPcmSwParams
);
nix::ioctl_read!(snd_pcm_delay, SNDRV_PCM_IOCTL_MAGIC, SNDRV_PCM_IOCTL_DELAY, libc::c_long);
nix::ioctl_readwrite!(
    snd_pcm_sync_ptr,
    SNDRV_PCM_IOCTL_MAGIC,
    SNDRV_PCM_IOCTL_SYNC_PTR,
    SndPcmSyncPtr
);
nix::ioctl_none!(snd_pcm_prepare, SNDRV_PCM_IOCTL_MAGIC, SNDRV_PCM_IOCTL_PREPARE);
nix::ioctl_none!(snd_pcm_start, SNDRV_PCM_IOCTL_MAGIC, SNDRV_PCM_IOCTL_START);
nix::ioctl_none!(snd_pcm_drop, SNDRV_PCM_IOCTL_MAGIC, SNDRV_PCM_IOCTL_DROP);
nix::ioctl_write_ptr!(
    snd_pcm_writei_frames,
    SNDRV_PCM_IOCTL_MAGIC,
    SNDRV_PCM_IOCTL_WRITEI_FRAMES,
    SndXferi
);
nix::ioctl_read!(
    snd_pcm_readi_frames,
    SNDRV_PCM_IOCTL_MAGIC,
    SNDRV_PCM_IOCTL_READI_FRAMES,
    SndXferi
);
nix::ioctl_write_int!(snd_pcm_link, SNDRV_PCM_IOCTL_MAGIC, SNDRV_PCM_IOCTL_LINK);
nix::ioctl_none!(snd_pcm_unlink, SNDRV_PCM_IOCTL_MAGIC, SNDRV_PCM_IOCTL_UNLINK);

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn kernel_struct_sizes_match_64bit_abi() {
        assert_eq!(std::mem::size_of::<SndMask>(), 32);
        assert_eq!(std::mem::size_of::<SndInterval>(), 12);
        assert_eq!(std::mem::size_of::<SndPcmHwParams>(), 608);
        assert_eq!(std::mem::size_of::<SndPcmSwParams>(), 136);
        assert_eq!(std::mem::size_of::<SndPcmSyncPtr>(), 136);
        assert_eq!(std::mem::size_of::<SndXferi>(), 24);
        assert_eq!(std::mem::size_of::<SndPcmInfo>(), 288);
    }

    #[test]
    fn info_strings_stop_at_nul() {
        let mut info = SndPcmInfo::new();
        info.id[..5].copy_from_slice(b"HDMI\0");
        info.name[..3].copy_from_slice(b"PCM");
        assert_eq!(info.id_str(), "HDMI");
        assert_eq!(info.name_str(), "PCM");
    }
}
