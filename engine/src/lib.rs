pub mod error;
pub mod hw;
pub mod processing;
pub mod session;
pub mod transport;

pub use error::{PcmError, Result};
pub use hw::options::{Direction, PcmConfig, PcmFlags, PcmFormat};
pub use hw::pcm::Pcm;
pub use processing::{AudioFrame, AudioProcessor, PassthroughProcessor};
pub use session::{Session, SessionOptions, StreamDelay, StreamId};
pub use transport::{PcmTransport, Transport};
