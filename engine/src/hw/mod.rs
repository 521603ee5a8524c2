pub mod alsa;
pub mod asound;
pub mod card;
pub mod config;
pub mod error_fmt;
pub mod io_util;
pub mod latency;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod options;
pub mod params;
pub mod pcm;
pub mod traits;
