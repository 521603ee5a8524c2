use crate::error::{PcmError, Result};
use crate::hw::asound::{
    SNDRV_PCM_ACCESS_MMAP_INTERLEAVED, SNDRV_PCM_ACCESS_RW_INTERLEAVED,
    SNDRV_PCM_HW_PARAMS_NO_PERIOD_WAKEUP, SNDRV_PCM_SUBFORMAT_STD, SNDRV_PCM_TSTAMP_ENABLE,
    SndPcmSwParams,
};
use crate::hw::error_fmt::pcm_error_message;
use crate::hw::options::{PcmConfig, PcmFlags};
use crate::hw::params::{HwParam, HwParams};
use crate::hw::traits::PcmDevice;
use nix::libc;
use tracing::debug;

pub const RATE_TABLE: [u32; 9] = [
    8_000, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000,
];

/// Index of `rate` in the table, else of the nearest lower entry, else 0.
pub fn start_rate_index(rate: u32) -> usize {
    RATE_TABLE.iter().rposition(|r| *r <= rate).unwrap_or(0)
}

/// Every table rate once, beginning at [`start_rate_index`] and wrapping.
pub fn rate_candidates(rate: u32) -> impl Iterator<Item = u32> {
    let start = start_rate_index(rate);
    (0..RATE_TABLE.len()).map(move |i| RATE_TABLE[(start + i) % RATE_TABLE.len()])
}

pub(super) fn build_hw_params(
    config: &PcmConfig,
    flags: PcmFlags,
    rate: u32,
) -> HwParams {
    let bits = config.format.bits();
    let mut params = HwParams::any();
    params.set_mask(HwParam::Format, config.format.to_alsa());
    params.set_mask(HwParam::Subformat, SNDRV_PCM_SUBFORMAT_STD);
    params.set_min(HwParam::PeriodSize, config.period_size);
    params.set_int(HwParam::SampleBits, bits);
    params.set_int(HwParam::FrameBits, bits.saturating_mul(config.channels));
    params.set_int(HwParam::Channels, config.channels);
    params.set_int(HwParam::Periods, config.period_count);
    params.set_int(HwParam::Rate, rate);
    if flags.contains(PcmFlags::NOIRQ) {
        params.flags |= SNDRV_PCM_HW_PARAMS_NO_PERIOD_WAKEUP;
    }
    let access = if flags.contains(PcmFlags::MMAP) {
        SNDRV_PCM_ACCESS_MMAP_INTERLEAVED
    } else {
        SNDRV_PCM_ACCESS_RW_INTERLEAVED
    };
    params.set_mask(HwParam::Access, access);
    params
}

/// Tries HW_PARAMS once per candidate rate; returns the refined space and
/// the rate that was accepted.
pub(super) fn negotiate_hw(
    device: &mut dyn PcmDevice,
    config: &PcmConfig,
    flags: PcmFlags,
    rates: &[u32],
) -> Result<(HwParams, u32)> {
    let mut last_err = None;
    for &rate in rates {
        let mut params = build_hw_params(config, flags, rate);
        match device.hw_params(&mut params) {
            Ok(()) => {
                debug!(rate, "hw params accepted");
                return Ok((params, rate));
            }
            Err(e) => {
                debug!(rate, error = %e, "hw params refused");
                last_err = Some(e);
            }
        }
    }
    let detail = last_err
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no candidate rate".to_string());
    Err(PcmError::ConfigRejected(pcm_error_message(
        "cannot set hw params",
        detail,
    )))
}

/// Copies the geometry the kernel settled on back into `config`.
pub(super) fn read_back_geometry(params: &HwParams, config: &mut PcmConfig) {
    let period_size = params.get_int(HwParam::PeriodSize);
    let periods = params.get_int(HwParam::Periods);
    if period_size != 0 {
        config.period_size = period_size;
    }
    if periods != 0 {
        config.period_count = periods;
    }
}

pub fn compute_boundary(buffer_size: u64, ceiling: u64) -> u64 {
    let mut boundary = buffer_size;
    if boundary == 0 {
        return 0;
    }
    let limit = ceiling.saturating_sub(buffer_size);
    while boundary.saturating_mul(2) <= limit {
        boundary *= 2;
    }
    boundary
}

/// Fills in the software parameters, writing chosen defaults back into
/// `config`.
pub(super) fn build_sw_params(
    config: &mut PcmConfig,
    flags: PcmFlags,
    buffer_size: u32,
) -> SndPcmSwParams {
    let capture = flags.direction().is_capture();
    let mut sw = SndPcmSwParams::new();
    sw.tstamp_mode = SNDRV_PCM_TSTAMP_ENABLE;
    sw.period_step = 1;

    if config.start_threshold == 0 {
        config.start_threshold = if capture { 1 } else { buffer_size / 2 };
    }
    if config.stop_threshold == 0 {
        config.stop_threshold = if capture {
            buffer_size.saturating_mul(10)
        } else {
            buffer_size
        };
    }
    // Replaces any threshold chosen above.
    config.stop_threshold = 4u32
        .saturating_mul(config.period_count.saturating_sub(1))
        .saturating_mul(config.period_size);
    if config.avail_min == 0 {
        config.avail_min = if flags.contains(PcmFlags::MMAP) {
            config.period_size
        } else {
            1
        };
    }

    sw.start_threshold = config.start_threshold as libc::c_ulong;
    sw.stop_threshold = config.stop_threshold as libc::c_ulong;
    sw.avail_min = config.avail_min as libc::c_ulong;
    sw.xfer_align = (config.period_size / 2) as libc::c_ulong;
    sw.silence_size = 0;
    sw.silence_threshold = config.silence_threshold as libc::c_ulong;
    sw.boundary = compute_boundary(u64::from(buffer_size), libc::c_long::MAX as u64) as libc::c_ulong;
    sw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::options::PcmFormat;
    use proptest::prelude::*;

    #[test]
    fn start_index_exact_lower_and_below() {
        assert_eq!(start_rate_index(8_000), 0);
        assert_eq!(start_rate_index(44_100), 7);
        assert_eq!(start_rate_index(44_000), 6);
        assert_eq!(start_rate_index(96_000), 8);
        assert_eq!(start_rate_index(4_000), 0);
    }

    #[test]
    fn candidates_wrap_through_the_whole_table() {
        let rates: Vec<u32> = rate_candidates(44_100).collect();
        assert_eq!(rates.len(), RATE_TABLE.len());
        assert_eq!(&rates[..3], &[44_100, 48_000, 8_000]);
        assert_eq!(*rates.last().unwrap(), 32_000);
    }

    #[test]
    fn hw_params_pin_every_field() {
        let cfg = PcmConfig {
            channels: 2,
            format: PcmFormat::S24Le,
            period_size: 256,
            period_count: 3,
            ..PcmConfig::default()
        };
        let p = build_hw_params(&cfg, PcmFlags::MMAP | PcmFlags::NOIRQ, 32_000);
        assert_eq!(p.get_int(HwParam::SampleBits), 32);
        assert_eq!(p.get_int(HwParam::FrameBits), 64);
        assert_eq!(p.get_int(HwParam::Channels), 2);
        assert_eq!(p.get_int(HwParam::Periods), 3);
        assert_eq!(p.get_int(HwParam::Rate), 32_000);
        assert_eq!(p.get_min(HwParam::PeriodSize), 256);
        assert_eq!(p.get_int(HwParam::PeriodSize), 0);
        assert!(p.mask(HwParam::Access).unwrap().test(SNDRV_PCM_ACCESS_MMAP_INTERLEAVED));
        assert!(p.mask(HwParam::Format).unwrap().test(6));
        assert_ne!(p.flags & SNDRV_PCM_HW_PARAMS_NO_PERIOD_WAKEUP, 0);
    }

    #[test]
    fn sw_defaults_follow_direction() {
        let mut cfg = PcmConfig {
            period_size: 1024,
            period_count: 4,
            ..PcmConfig::default()
        };
        let sw = build_sw_params(&mut cfg, PcmFlags::IN, 4096);
        assert_eq!(sw.start_threshold, 1);
        assert_eq!(sw.stop_threshold, 4 * 3 * 1024);
        assert_eq!(sw.avail_min, 1);
        assert_eq!(sw.xfer_align, 512);
        assert_eq!(sw.tstamp_mode, SNDRV_PCM_TSTAMP_ENABLE);
        assert_eq!(cfg.start_threshold, 1);

        let mut cfg = PcmConfig {
            start_threshold: 100,
            avail_min: 64,
            ..PcmConfig::default()
        };
        let sw = build_sw_params(&mut cfg, PcmFlags::MMAP, 4096);
        assert_eq!(sw.start_threshold, 100);
        assert_eq!(sw.avail_min, 64);
    }

    #[test]
    fn single_period_stop_threshold_is_zero() {
        let mut cfg = PcmConfig {
            period_count: 1,
            ..PcmConfig::default()
        };
        build_sw_params(&mut cfg, PcmFlags::OUT, 1024);
        assert_eq!(cfg.stop_threshold, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn boundary_is_largest_doubling_under_ceiling(buffer in 1u64..(1 << 31)) {
            let ceiling = libc::c_long::MAX as u64;
            let b = compute_boundary(buffer, ceiling);
            prop_assert!(b >= buffer);
            prop_assert_eq!(b % buffer, 0);
            prop_assert!((b / buffer).is_power_of_two());
            prop_assert!(b.saturating_mul(2) > ceiling - buffer);
        }

        #[test]
        fn every_table_rate_starts_at_itself(idx in 0usize..RATE_TABLE.len()) {
            prop_assert_eq!(rate_candidates(RATE_TABLE[idx]).next(), Some(RATE_TABLE[idx]));
        }
    }
}
