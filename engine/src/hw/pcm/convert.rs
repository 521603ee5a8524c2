use crate::hw::options::PcmFormat;
use byteorder::{ByteOrder, LittleEndian};

fn read_sample(format: PcmFormat, src: &[u8]) -> i32 {
    match format {
        PcmFormat::S8 => src[0] as i8 as i32,
        PcmFormat::S16Le => LittleEndian::read_i16(src) as i32,
        PcmFormat::S24Le | PcmFormat::S32Le => LittleEndian::read_i32(src),
    }
}

fn write_sample(format: PcmFormat, dst: &mut [u8], value: i32) {
    match format {
        PcmFormat::S8 => dst[0] = value as i8 as u8,
        PcmFormat::S16Le => LittleEndian::write_i16(dst, value as i16),
        PcmFormat::S24Le | PcmFormat::S32Le => LittleEndian::write_i32(dst, value),
    }
}

/// Folds interleaved stereo into mono as `(L >> 1) + (R >> 1)`.
/// Returns the number of mono samples produced.
pub fn downmix_stereo(format: PcmFormat, src: &[u8], dst: &mut [u8]) -> usize {
    let bps = format.bytes();
    let frames = (src.len() / (2 * bps)).min(dst.len() / bps);
    for i in 0..frames {
        let o = i * 2 * bps;
        let left = read_sample(format, &src[o..o + bps]);
        let right = read_sample(format, &src[o + bps..o + 2 * bps]);
        write_sample(format, &mut dst[i * bps..(i + 1) * bps], (left >> 1) + (right >> 1));
    }
    frames
}

/// Converts captured hardware frames to the application channel layout.
pub fn correct_channels(
    format: PcmFormat,
    hw_channels: usize,
    app_channels: usize,
    src: &[u8],
    dst: &mut [u8],
) {
    if app_channels == 1 && hw_channels == 2 {
        downmix_stereo(format, src, dst);
        return;
    }
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn s16_extremes() {
        let src = s16(&[i16::MAX, i16::MAX, i16::MIN, i16::MIN, i16::MIN, i16::MAX, -1, -1]);
        let mut dst = vec![0u8; 8];
        assert_eq!(downmix_stereo(PcmFormat::S16Le, &src, &mut dst), 4);
        let out: Vec<i16> = dst
            .chunks(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(out, [i16::MAX - 1, i16::MIN, -1, -2]);
    }

    #[test]
    fn s32_and_s8_use_the_same_rule() {
        let mut src = Vec::new();
        src.extend_from_slice(&i32::MAX.to_le_bytes());
        src.extend_from_slice(&3i32.to_le_bytes());
        let mut dst = [0u8; 4];
        downmix_stereo(PcmFormat::S32Le, &src, &mut dst);
        assert_eq!(i32::from_le_bytes(dst), (i32::MAX >> 1) + 1);

        let src = [(-128i8) as u8, 127u8];
        let mut dst = [0u8; 1];
        downmix_stereo(PcmFormat::S8, &src, &mut dst);
        assert_eq!(dst[0] as i8, -64 + 63);
    }

    #[test]
    fn matching_layouts_copy_straight() {
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        correct_channels(PcmFormat::S16Le, 2, 2, &src, &mut dst);
        assert_eq!(dst, src);
    }
}
