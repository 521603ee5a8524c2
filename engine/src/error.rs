use std::io;

/// Failure classes surfaced by the PCM layer.
#[derive(Debug, thiserror::Error)]
pub enum PcmError {
    /// The hardware refused every candidate configuration.
    #[error("{0}")]
    ConfigRejected(String),

    /// The configuration is unusable before any kernel call is made.
    #[error("invalid pcm config: {0}")]
    InvalidConfig(String),

    /// Buffer underrun (playback) or overrun (capture).
    #[error("pcm xrun")]
    Xrun,

    /// The device node could not be opened.
    #[error("cannot open device '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A kernel call failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("pcm stream suspended")]
    Suspended,

    #[error("pcm device disconnected")]
    Disconnected,

    /// The kernel reported a state the operation cannot handle.
    #[error("pcm in unexpected state {0}")]
    BadState(i32),

    /// Read issued on a playback handle, or write on a capture handle.
    #[error("operation does not match stream direction")]
    InvalidDirection,

    /// The handle was not opened with the flags the operation needs.
    #[error("{0} not supported by this handle")]
    Unsupported(&'static str),

    /// Operation attempted on a handle whose open failed or that was closed.
    #[error("pcm handle is not ready")]
    NotReady,

    #[error("unknown stream id")]
    UnknownStream,
}

impl PcmError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        PcmError::Io {
            context: context.into(),
            source,
        }
    }

    /// Nearest errno, for callers that speak the C convention.
    pub fn errno(&self) -> i32 {
        use nix::libc;
        match self {
            PcmError::ConfigRejected(_) | PcmError::InvalidConfig(_) => libc::EINVAL,
            PcmError::Xrun => libc::EPIPE,
            PcmError::Open { source, .. } | PcmError::Io { source, .. } => {
                source.raw_os_error().unwrap_or(libc::EIO)
            }
            PcmError::Suspended => libc::ESTRPIPE,
            PcmError::Disconnected => libc::ENODEV,
            PcmError::BadState(_) => libc::EBADFD,
            PcmError::InvalidDirection => libc::EINVAL,
            PcmError::Unsupported(_) => libc::ENOSYS,
            PcmError::NotReady => libc::EBADF,
            PcmError::UnknownStream => libc::ENOENT,
        }
    }

    pub fn is_xrun(&self) -> bool {
        match self {
            PcmError::Xrun => true,
            PcmError::Io { source, .. } => source.raw_os_error() == Some(nix::libc::EPIPE),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PcmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_follows_kernel_conventions() {
        use nix::libc;
        assert_eq!(PcmError::Xrun.errno(), libc::EPIPE);
        assert_eq!(PcmError::Suspended.errno(), libc::ESTRPIPE);
        assert_eq!(PcmError::Disconnected.errno(), libc::ENODEV);
        assert_eq!(PcmError::Unsupported("mmap_write").errno(), libc::ENOSYS);
        let e = PcmError::io("cannot prepare channel", io::Error::from_raw_os_error(libc::EBUSY));
        assert_eq!(e.errno(), libc::EBUSY);
    }

    #[test]
    fn epipe_io_counts_as_xrun() {
        let e = PcmError::io("x", io::Error::from_raw_os_error(nix::libc::EPIPE));
        assert!(e.is_xrun());
        assert!(!PcmError::NotReady.is_xrun());
    }
}
