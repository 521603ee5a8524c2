//! Typed view of the kernel hardware parameter space.
//!
//! The kernel layout keeps masks and intervals in two parallel arrays that
//! are addressed by one shared numbering. Here every parameter owns one
//! tagged slot, and the split layout only exists in [`HwParams::to_raw`] /
//! [`HwParams::from_raw`] at the ioctl boundary.

use super::asound::{
    SNDRV_INTERVAL_EMPTY, SNDRV_INTERVAL_INTEGER, SNDRV_INTERVAL_OPENMAX,
    SNDRV_INTERVAL_OPENMIN, SNDRV_MASK_MAX, SNDRV_MASK_WORDS, SNDRV_PCM_HW_PARAM_FIRST_INTERVAL,
    SNDRV_PCM_HW_PARAM_FIRST_MASK, SndInterval, SndMask, SndPcmHwParams,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HwParam {
    Access,
    Format,
    Subformat,
    SampleBits,
    FrameBits,
    Channels,
    Rate,
    PeriodTime,
    PeriodSize,
    PeriodBytes,
    Periods,
    BufferTime,
    BufferSize,
    BufferBytes,
    TickTime,
}

const SLOT_COUNT: usize = 15;

impl HwParam {
    pub const ALL: [HwParam; SLOT_COUNT] = [
        HwParam::Access,
        HwParam::Format,
        HwParam::Subformat,
        HwParam::SampleBits,
        HwParam::FrameBits,
        HwParam::Channels,
        HwParam::Rate,
        HwParam::PeriodTime,
        HwParam::PeriodSize,
        HwParam::PeriodBytes,
        HwParam::Periods,
        HwParam::BufferTime,
        HwParam::BufferSize,
        HwParam::BufferBytes,
        HwParam::TickTime,
    ];

    pub const INTERVALS: [HwParam; 12] = [
        HwParam::SampleBits,
        HwParam::FrameBits,
        HwParam::Channels,
        HwParam::Rate,
        HwParam::PeriodTime,
        HwParam::PeriodSize,
        HwParam::PeriodBytes,
        HwParam::Periods,
        HwParam::BufferTime,
        HwParam::BufferSize,
        HwParam::BufferBytes,
        HwParam::TickTime,
    ];

    /// Kernel parameter number (`SNDRV_PCM_HW_PARAM_*`).
    pub fn kernel_id(self) -> usize {
        match self {
            HwParam::Access => 0,
            HwParam::Format => 1,
            HwParam::Subformat => 2,
            HwParam::SampleBits => 8,
            HwParam::FrameBits => 9,
            HwParam::Channels => 10,
            HwParam::Rate => 11,
            HwParam::PeriodTime => 12,
            HwParam::PeriodSize => 13,
            HwParam::PeriodBytes => 14,
            HwParam::Periods => 15,
            HwParam::BufferTime => 16,
            HwParam::BufferSize => 17,
            HwParam::BufferBytes => 18,
            HwParam::TickTime => 19,
        }
    }

    pub fn is_mask(self) -> bool {
        matches!(self, HwParam::Access | HwParam::Format | HwParam::Subformat)
    }

    fn slot(self) -> usize {
        let id = self.kernel_id();
        if self.is_mask() {
            id - SNDRV_PCM_HW_PARAM_FIRST_MASK
        } else {
            3 + id - SNDRV_PCM_HW_PARAM_FIRST_INTERVAL
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mask {
    bits: [u32; SNDRV_MASK_WORDS],
}

impl Mask {
    pub fn all() -> Self {
        Self {
            bits: [!0; SNDRV_MASK_WORDS],
        }
    }

    pub fn none() -> Self {
        Self {
            bits: [0; SNDRV_MASK_WORDS],
        }
    }

    /// Mask with exactly one bit set. Out-of-range bits yield an empty mask.
    pub fn only(bit: u32) -> Self {
        let mut mask = Self::none();
        mask.set(bit);
        mask
    }

    pub fn set(&mut self, bit: u32) {
        if (bit as usize) < SNDRV_MASK_MAX {
            self.bits[(bit >> 5) as usize] |= 1 << (bit & 31);
        }
    }

    pub fn test(&self, bit: u32) -> bool {
        (bit as usize) < SNDRV_MASK_MAX && self.bits[(bit >> 5) as usize] & (1 << (bit & 31)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..SNDRV_MASK_MAX as u32).filter(move |bit| self.test(*bit))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub min: u32,
    pub max: u32,
    pub openmin: bool,
    pub openmax: bool,
    pub integer: bool,
    pub empty: bool,
}

impl Interval {
    pub fn any() -> Self {
        Self {
            min: 0,
            max: u32::MAX,
            openmin: false,
            openmax: false,
            integer: false,
            empty: false,
        }
    }

    pub fn exact(value: u32) -> Self {
        Self {
            min: value,
            max: value,
            openmin: false,
            openmax: false,
            integer: true,
            empty: false,
        }
    }

    pub fn contains(&self, value: u32) -> bool {
        !self.empty
            && (value > self.min || (value == self.min && !self.openmin))
            && (value < self.max || (value == self.max && !self.openmax))
    }

    fn to_raw(self) -> SndInterval {
        let mut flags = 0;
        if self.openmin {
            flags |= SNDRV_INTERVAL_OPENMIN;
        }
        if self.openmax {
            flags |= SNDRV_INTERVAL_OPENMAX;
        }
        if self.integer {
            flags |= SNDRV_INTERVAL_INTEGER;
        }
        if self.empty {
            flags |= SNDRV_INTERVAL_EMPTY;
        }
        SndInterval {
            min: self.min,
            max: self.max,
            flags,
        }
    }

    fn from_raw(raw: &SndInterval) -> Self {
        Self {
            min: raw.min,
            max: raw.max,
            openmin: raw.flags & SNDRV_INTERVAL_OPENMIN != 0,
            openmax: raw.flags & SNDRV_INTERVAL_OPENMAX != 0,
            integer: raw.flags & SNDRV_INTERVAL_INTEGER != 0,
            empty: raw.flags & SNDRV_INTERVAL_EMPTY != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSlot {
    Mask(Mask),
    Interval(Interval),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwParams {
    slots: [ParamSlot; SLOT_COUNT],
    pub flags: u32,
    pub rmask: u32,
    pub cmask: u32,
    pub info: u32,
    pub msbits: u32,
    pub rate_num: u32,
    pub rate_den: u32,
    pub fifo_size: u64,
}

impl HwParams {
    /// The unconstrained space: every mask bit set, every interval open wide.
    pub fn any() -> Self {
        let slots = HwParam::ALL.map(|p| {
            if p.is_mask() {
                ParamSlot::Mask(Mask::all())
            } else {
                ParamSlot::Interval(Interval::any())
            }
        });
        Self {
            slots,
            flags: 0,
            rmask: !0,
            cmask: 0,
            info: !0,
            msbits: 0,
            rate_num: 0,
            rate_den: 0,
            fifo_size: 0,
        }
    }

    pub fn slot(&self, param: HwParam) -> &ParamSlot {
        &self.slots[param.slot()]
    }

    pub fn mask(&self, param: HwParam) -> Option<&Mask> {
        match self.slot(param) {
            ParamSlot::Mask(m) => Some(m),
            ParamSlot::Interval(_) => None,
        }
    }

    pub fn interval(&self, param: HwParam) -> Option<&Interval> {
        match self.slot(param) {
            ParamSlot::Interval(i) => Some(i),
            ParamSlot::Mask(_) => None,
        }
    }

    fn interval_mut(&mut self, param: HwParam) -> Option<&mut Interval> {
        match &mut self.slots[param.slot()] {
            ParamSlot::Interval(i) => Some(i),
            ParamSlot::Mask(_) => None,
        }
    }

    /// Restricts a mask parameter to exactly `bit`. No-op on interval params.
    pub fn set_mask(&mut self, param: HwParam, bit: u32) {
        if let ParamSlot::Mask(m) = &mut self.slots[param.slot()] {
            *m = Mask::only(bit);
        }
    }

    pub fn set_min(&mut self, param: HwParam, value: u32) {
        if let Some(i) = self.interval_mut(param) {
            i.min = value;
        }
    }

    pub fn set_max(&mut self, param: HwParam, value: u32) {
        if let Some(i) = self.interval_mut(param) {
            i.max = value;
        }
    }

    pub fn set_int(&mut self, param: HwParam, value: u32) {
        if let Some(i) = self.interval_mut(param) {
            *i = Interval::exact(value);
        }
    }

    pub fn get_min(&self, param: HwParam) -> u32 {
        self.interval(param).map(|i| i.min).unwrap_or(0)
    }

    pub fn get_max(&self, param: HwParam) -> u32 {
        self.interval(param).map(|i| i.max).unwrap_or(0)
    }

    /// Value of an interval the kernel has collapsed to an integer, else 0.
    pub fn get_int(&self, param: HwParam) -> u32 {
        match self.interval(param) {
            Some(i) if i.integer => i.max,
            _ => 0,
        }
    }

    pub fn to_raw(&self) -> SndPcmHwParams {
        let mut raw = SndPcmHwParams::new();
        raw.flags = self.flags;
        for param in HwParam::ALL {
            let id = param.kernel_id();
            match self.slot(param) {
                ParamSlot::Mask(m) => {
                    raw.masks[id - SNDRV_PCM_HW_PARAM_FIRST_MASK] = SndMask { bits: m.bits };
                }
                ParamSlot::Interval(i) => {
                    raw.intervals[id - SNDRV_PCM_HW_PARAM_FIRST_INTERVAL] = i.to_raw();
                }
            }
        }
        raw.rmask = self.rmask;
        raw.cmask = self.cmask;
        raw.info = self.info;
        raw.msbits = self.msbits;
        raw.rate_num = self.rate_num;
        raw.rate_den = self.rate_den;
        raw.fifo_size = self.fifo_size as _;
        raw
    }

    pub fn from_raw(raw: &SndPcmHwParams) -> Self {
        let slots = HwParam::ALL.map(|p| {
            let id = p.kernel_id();
            if p.is_mask() {
                ParamSlot::Mask(Mask {
                    bits: raw.masks[id - SNDRV_PCM_HW_PARAM_FIRST_MASK].bits,
                })
            } else {
                ParamSlot::Interval(Interval::from_raw(
                    &raw.intervals[id - SNDRV_PCM_HW_PARAM_FIRST_INTERVAL],
                ))
            }
        });
        Self {
            slots,
            flags: raw.flags,
            rmask: raw.rmask,
            cmask: raw.cmask,
            info: raw.info,
            msbits: raw.msbits,
            rate_num: raw.rate_num,
            rate_den: raw.rate_den,
            fifo_size: raw.fifo_size as u64,
        }
    }
}

impl Default for HwParams {
    fn default() -> Self {
        Self::any()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_space_is_fully_open() {
        let p = HwParams::any();
        assert_eq!(p.rmask, !0);
        assert_eq!(p.cmask, 0);
        assert_eq!(p.info, !0);
        for param in HwParam::ALL {
            match p.slot(param) {
                ParamSlot::Mask(m) => assert!(m.test(0) && m.test(255)),
                ParamSlot::Interval(i) => {
                    assert_eq!((i.min, i.max), (0, u32::MAX));
                    assert!(!i.integer);
                }
            }
        }
    }

    #[test]
    fn slots_land_at_kernel_offsets() {
        let mut p = HwParams::any();
        p.set_mask(HwParam::Format, 2);
        p.set_int(HwParam::Rate, 44100);
        p.set_min(HwParam::PeriodSize, 256);
        let raw = p.to_raw();
        assert_eq!(raw.masks[1].bits[0], 1 << 2);
        assert_eq!(raw.masks[1].bits[1..], [0; 7]);
        assert_eq!(raw.intervals[11 - 8].min, 44100);
        assert_eq!(raw.intervals[11 - 8].max, 44100);
        assert_eq!(raw.intervals[11 - 8].flags, SNDRV_INTERVAL_INTEGER);
        assert_eq!(raw.intervals[13 - 8].min, 256);
        assert_eq!(raw.intervals[13 - 8].max, u32::MAX);
        assert_eq!(HwParams::from_raw(&raw), p);
    }

    #[test]
    fn get_int_requires_integer_flag() {
        let mut p = HwParams::any();
        p.set_min(HwParam::Periods, 4);
        assert_eq!(p.get_int(HwParam::Periods), 0);
        p.set_int(HwParam::Periods, 4);
        assert_eq!(p.get_int(HwParam::Periods), 4);
    }

    #[test]
    fn interval_ops_ignore_mask_params() {
        let mut p = HwParams::any();
        p.set_int(HwParam::Format, 7);
        assert_eq!(p.mask(HwParam::Format), Some(&Mask::all()));
        assert_eq!(p.get_max(HwParam::Access), 0);
    }

    #[test]
    fn interval_contains_honours_open_bounds() {
        let mut i = Interval::exact(10);
        assert!(i.contains(10));
        i.openmin = true;
        assert!(!i.contains(10));
        i = Interval::any();
        i.empty = true;
        assert!(!i.contains(1));
    }
}
