use crate::error::{PcmError, Result};
use crate::hw::config::{TRANSPORT_PLUGIN_ENV, TRANSPORT_PLUGIN_SYMBOL, env_path};
use crate::hw::options::{PcmConfig, PcmFlags};
use crate::hw::pcm::Pcm;
use libloading::Library;
use std::ffi::c_void;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The open/read/write/close entry points a session moves audio through.
/// Every method defaults to the built-in handle operation, so an
/// implementation only overrides what it changes.
pub trait PcmTransport: Send {
    fn open_req(
        &mut self,
        card: u32,
        device: u32,
        flags: PcmFlags,
        config: &PcmConfig,
        requested_rate: u32,
    ) -> Pcm {
        Pcm::open_req(card, device, flags, config, requested_rate)
    }

    fn open(&mut self, card: u32, device: u32, flags: PcmFlags, config: &PcmConfig) -> Pcm {
        Pcm::open(card, device, flags, config)
    }

    fn read(&mut self, pcm: &mut Pcm, data: &mut [u8]) -> Result<()> {
        pcm.read(data)
    }

    fn write(&mut self, pcm: &mut Pcm, data: &[u8]) -> Result<()> {
        pcm.write(data)
    }

    fn close(&mut self, pcm: &mut Pcm) -> Result<()> {
        pcm.close()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTransport;

impl PcmTransport for BuiltinTransport {}

/// Signature of the plugin constructor. It returns a
/// `Box<Box<dyn PcmTransport>>` turned into a raw pointer, or null.
pub type TransportCreateFn = unsafe extern "C" fn() -> *mut c_void;

// Field order matters: the transport must drop before its library unloads.
struct PluginTransport {
    transport: Box<dyn PcmTransport>,
    path: PathBuf,
    _library: Library,
}

impl PcmTransport for PluginTransport {
    fn open_req(
        &mut self,
        card: u32,
        device: u32,
        flags: PcmFlags,
        config: &PcmConfig,
        requested_rate: u32,
    ) -> Pcm {
        self.transport
            .open_req(card, device, flags, config, requested_rate)
    }

    fn open(&mut self, card: u32, device: u32, flags: PcmFlags, config: &PcmConfig) -> Pcm {
        self.transport.open(card, device, flags, config)
    }

    fn read(&mut self, pcm: &mut Pcm, data: &mut [u8]) -> Result<()> {
        self.transport.read(pcm, data)
    }

    fn write(&mut self, pcm: &mut Pcm, data: &[u8]) -> Result<()> {
        self.transport.write(pcm, data)
    }

    fn close(&mut self, pcm: &mut Pcm) -> Result<()> {
        self.transport.close(pcm)
    }
}

pub enum Transport {
    Builtin,
    Injected(Box<dyn PcmTransport>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Builtin => f.write_str("Builtin"),
            Transport::Injected(_) => f.write_str("Injected(<transport>)"),
        }
    }
}

impl Transport {
    /// Picks the transport once, from `TINYPCM_TRANSPORT_PLUGIN`. Anything
    /// that goes wrong while loading falls back to the built-in path.
    pub fn resolve() -> Self {
        Self::resolve_from(env_path(TRANSPORT_PLUGIN_ENV).as_deref())
    }

    pub fn resolve_from(plugin: Option<&Path>) -> Self {
        let Some(path) = plugin else {
            return Transport::Builtin;
        };
        match Self::load(path) {
            Ok(transport) => transport,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "using built-in transport");
                Transport::Builtin
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let context = format!("cannot load transport '{}'", path.display());
        // SAFETY: loading a library runs its initialisers; the path is the
        // operator's explicit choice.
        let library = unsafe { Library::new(path) }
            .map_err(|e| PcmError::io(context.clone(), io::Error::other(e)))?;
        // SAFETY: the symbol is declared with `TransportCreateFn`'s signature.
        let create = unsafe {
            match library.get::<TransportCreateFn>(TRANSPORT_PLUGIN_SYMBOL) {
                Ok(sym) => *sym,
                Err(e) => return Err(PcmError::io(context, io::Error::other(e))),
            }
        };
        // SAFETY: constructor resolved above.
        let raw = unsafe { create() };
        if raw.is_null() {
            return Err(PcmError::io(
                context,
                io::Error::other("transport constructor returned null"),
            ));
        }
        // SAFETY: the plugin hands over ownership of a boxed transport.
        let transport = unsafe { *Box::from_raw(raw as *mut Box<dyn PcmTransport>) };
        debug!(path = %path.display(), "transport plugin loaded");
        Ok(Transport::Injected(Box::new(PluginTransport {
            transport,
            path: path.to_path_buf(),
            _library: library,
        })))
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Transport::Builtin)
    }

    fn with<R>(&mut self, f: impl FnOnce(&mut dyn PcmTransport) -> R) -> R {
        match self {
            Transport::Builtin => f(&mut BuiltinTransport),
            Transport::Injected(t) => f(t.as_mut()),
        }
    }

    pub fn open_req(
        &mut self,
        card: u32,
        device: u32,
        flags: PcmFlags,
        config: &PcmConfig,
        requested_rate: u32,
    ) -> Pcm {
        self.with(|t| t.open_req(card, device, flags, config, requested_rate))
    }

    pub fn open(&mut self, card: u32, device: u32, flags: PcmFlags, config: &PcmConfig) -> Pcm {
        self.with(|t| t.open(card, device, flags, config))
    }

    pub fn read(&mut self, pcm: &mut Pcm, data: &mut [u8]) -> Result<()> {
        self.with(|t| t.read(pcm, data))
    }

    pub fn write(&mut self, pcm: &mut Pcm, data: &[u8]) -> Result<()> {
        self.with(|t| t.write(pcm, data))
    }

    pub fn close(&mut self, pcm: &mut Pcm) -> Result<()> {
        self.with(|t| t.close(pcm))
    }
}

impl std::fmt::Debug for PluginTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginTransport")
            .field("path", &self.path)
            .finish()
    }
}
