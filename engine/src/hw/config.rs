/// Path of a shared library providing an alternate PCM transport.
pub const TRANSPORT_PLUGIN_ENV: &str = "TINYPCM_TRANSPORT_PLUGIN";
/// Skip mapping the status/control pages and keep pointers in sync via ioctl.
pub const FORCE_SYNC_PTR_ENV: &str = "TINYPCM_FORCE_SYNC_PTR";
/// Symbol a transport plugin exports.
pub const TRANSPORT_PLUGIN_SYMBOL: &[u8] = b"tinypcm_transport_create\0";

pub const SYSFS_SOUND_CLASS: &str = "/sys/class/sound";
pub const DEV_SND_DIR: &str = "/dev/snd";

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}

pub fn env_path(key: &str) -> Option<std::path::PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(std::path::PathBuf::from)
}

pub fn pcm_node_path(card: u32, device: u32, direction: super::options::Direction) -> String {
    format!(
        "{DEV_SND_DIR}/pcmC{card}D{device}{}",
        direction.node_suffix()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::options::Direction;

    #[test]
    fn node_paths() {
        assert_eq!(pcm_node_path(0, 0, Direction::Playback), "/dev/snd/pcmC0D0p");
        assert_eq!(pcm_node_path(2, 7, Direction::Capture), "/dev/snd/pcmC2D7c");
    }

    #[test]
    fn unset_flag_is_false() {
        assert!(!env_flag("TINYPCM_TEST_SURELY_UNSET_FLAG"));
        assert!(env_path("TINYPCM_TEST_SURELY_UNSET_PATH").is_none());
    }
}
