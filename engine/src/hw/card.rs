use super::alsa::SndPcmNode;
use super::config::{SYSFS_SOUND_CLASS, pcm_node_path};
use super::error_fmt::pcm_error_message;
use super::options::{PcmFlags, PcmFormat};
use super::params::{HwParam, HwParams};
use super::traits::PcmDevice;
use crate::error::{PcmError, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;

const MAX_CARDS: u32 = 10;

/// Index of the sound card whose sysfs `id` equals `name`.
pub fn card_index_by_id(name: &str) -> Option<u32> {
    card_index_by_id_in(Path::new(SYSFS_SOUND_CLASS), name)
}

pub fn card_index_by_id_in(root: &Path, name: &str) -> Option<u32> {
    (0..MAX_CARDS).find(|index| {
        fs::read_to_string(root.join(format!("card{index}")).join("id"))
            .map(|id| id.trim_end_matches(['\n', '\r']) == name)
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamRange {
    pub param: HwParam,
    pub min: u32,
    pub max: u32,
}

/// What a PCM node is able to do before any configuration is chosen.
#[derive(Debug, Clone, Serialize)]
pub struct PcmParams {
    pub ranges: Vec<ParamRange>,
    pub formats: Vec<PcmFormat>,
    #[serde(skip)]
    refined: HwParams,
}

impl PcmParams {
    pub fn query(card: u32, device: u32, flags: PcmFlags) -> Result<Self> {
        let path = pcm_node_path(card, device, flags.direction());
        let mut node = SndPcmNode::open(&path)?;
        Self::query_device(&mut node)
    }

    /// Refines an unconstrained parameter set against `device`.
    pub fn query_device(device: &mut dyn PcmDevice) -> Result<Self> {
        let mut refined = HwParams::any();
        device.hw_refine(&mut refined).map_err(|e| {
            PcmError::ConfigRejected(pcm_error_message("SNDRV_PCM_IOCTL_HW_REFINE error", e))
        })?;
        let ranges = HwParam::INTERVALS
            .iter()
            .map(|&param| ParamRange {
                param,
                min: refined.get_min(param),
                max: refined.get_max(param),
            })
            .collect();
        let formats = refined
            .mask(HwParam::Format)
            .map(|mask| mask.iter().filter_map(PcmFormat::from_alsa).collect())
            .unwrap_or_default();
        debug!(?formats, "refined hw params");
        Ok(Self {
            ranges,
            formats,
            refined,
        })
    }

    pub fn min(&self, param: HwParam) -> u32 {
        self.refined.get_min(param)
    }

    pub fn max(&self, param: HwParam) -> u32 {
        self.refined.get_max(param)
    }

    pub fn supports_format(&self, format: PcmFormat) -> bool {
        self.formats.contains(&format)
    }
}
