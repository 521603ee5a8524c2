/// Milliseconds of audio held in `frames` at `rate`.
pub fn frames_to_ms(frames: u64, rate: u32) -> u32 {
    if rate == 0 {
        return 0;
    }
    (frames.saturating_mul(1000) / u64::from(rate)).min(u64::from(u32::MAX)) as u32
}

/// Echo path delay from the measured playback and capture queue depths.
pub fn echo_path_delay_ms(playback_frames: u64, capture_frames: u64, rate: u32) -> u32 {
    frames_to_ms(playback_frames.saturating_add(capture_frames), rate)
}

/// Timeout for a no-irq wait: time until `avail_min` frames accumulate.
pub fn noirq_wait_ms(avail_min: u64, avail: u64, frames_per_ms: u32) -> i32 {
    if frames_per_ms == 0 {
        return -1;
    }
    (avail_min.saturating_sub(avail) / u64::from(frames_per_ms)).min(i32::MAX as u64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_at_rate() {
        assert_eq!(frames_to_ms(480, 48_000), 10);
        assert_eq!(frames_to_ms(1, 0), 0);
        assert_eq!(echo_path_delay_ms(960, 240, 48_000), 25);
    }

    #[test]
    fn noirq_timeout() {
        assert_eq!(noirq_wait_ms(480, 0, 48), 10);
        assert_eq!(noirq_wait_ms(480, 600, 48), 0);
        assert_eq!(noirq_wait_ms(480, 0, 0), -1);
    }
}
