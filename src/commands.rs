use crate::config::Config;
use anyhow::{Context, bail};
use std::path::Path;
use tinypcm_engine::hw::card::{PcmParams, card_index_by_id};
use tinypcm_engine::{
    Direction, PassthroughProcessor, PcmConfig, PcmFlags, PcmFormat, Session, Transport,
};
use tracing::{debug, error, info, warn};
use wavers::Wav;

fn session(cfg: &Config) -> Session {
    let transport = Transport::resolve();
    debug!(builtin = transport.is_builtin(), "transport resolved");
    Session::new(
        transport,
        Box::new(PassthroughProcessor::default()),
        cfg.session.clone(),
    )
}

fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn bytes_to_samples(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
}

fn require_s16(config: &PcmConfig) -> anyhow::Result<()> {
    if config.format != PcmFormat::S16Le {
        bail!("only s16_le streams can be moved to or from WAV files");
    }
    Ok(())
}

pub fn play(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    let mut wav = Wav::<i16>::from_path(path)
        .map_err(|e| anyhow::anyhow!("cannot open WAV '{}': {e}", path.display()))?;
    let channels = u32::from(wav.n_channels().max(1));
    let rate = wav.sample_rate() as u32;
    let samples: wavers::Samples<i16> = wav
        .read()
        .map_err(|e| anyhow::anyhow!("WAV read error '{}': {e}", path.display()))?;

    let config = PcmConfig {
        channels,
        rate,
        ..cfg.playback.clone()
    };
    require_s16(&config)?;
    let mut session = session(cfg);
    let id = session
        .open_req(cfg.card, cfg.device, PcmFlags::OUT, &config, rate)
        .with_context(|| format!("cannot open playback on card {} device {}", cfg.card, cfg.device))?;
    let negotiated = session.stream(id).map(|p| p.config().clone()).unwrap_or(config);
    if negotiated.rate != rate {
        warn!(file = rate, device = negotiated.rate, "playing at a different rate");
    }
    info!(
        path = %path.display(),
        channels,
        rate = negotiated.rate,
        frames = samples.len() / channels as usize,
        "playing"
    );

    let chunk = negotiated.period_size as usize * channels as usize;
    for window in samples.chunks(chunk) {
        session.write(id, &samples_to_bytes(window))?;
    }
    session.close(id)?;
    Ok(())
}

pub fn cap(cfg: &Config, path: &Path, seconds: f64) -> anyhow::Result<()> {
    require_s16(&cfg.capture)?;
    let mut session = session(cfg);
    let id = session
        .open(cfg.card, cfg.device, PcmFlags::IN, &cfg.capture)
        .with_context(|| format!("cannot open capture on card {} device {}", cfg.card, cfg.device))?;
    let (rate, channels, period) = match session.stream(id) {
        Some(pcm) => (pcm.config().rate, pcm.logical_channels(), pcm.config().period_size),
        None => bail!("capture stream vanished"),
    };

    let total = (seconds * f64::from(rate)) as usize;
    let mut window = vec![0u8; period as usize * channels as usize * 2];
    let mut samples: Vec<i16> = Vec::with_capacity(total * channels as usize);
    let mut frames = 0;
    info!(path = %path.display(), rate, channels, frames = total, "capturing");
    while frames < total {
        if let Err(e) = session.read(id, &mut window) {
            error!(error = %e, "capture failed");
            break;
        }
        samples.extend(bytes_to_samples(&window));
        frames += period as usize;
    }
    samples.truncate(total * channels as usize);
    session.close(id)?;

    wavers::write::<i16, _>(path, &samples, rate as i32, channels as u16)
        .map_err(|e| anyhow::anyhow!("cannot write '{}': {e}", path.display()))?;
    info!(frames = samples.len() / channels as usize, "captured");
    Ok(())
}

pub fn duplex(cfg: &Config, seconds: f64) -> anyhow::Result<()> {
    require_s16(&cfg.capture)?;
    let (card, device) = (cfg.session.echo_card, cfg.session.echo_device);
    let mut session = session(cfg);
    let cap = session
        .open(card, device, PcmFlags::IN, &cfg.capture)
        .context("cannot open echo capture")?;
    let play = session
        .open(card, device, PcmFlags::OUT, &cfg.playback)
        .context("cannot open echo playback")?;
    if let Err(e) = session.link(cap, play) {
        warn!(error = %e, "streams not linked");
    }

    let (rate, period, channels) = match session.stream(cap) {
        Some(pcm) => (pcm.config().rate, pcm.config().period_size, pcm.logical_channels()),
        None => bail!("capture stream vanished"),
    };
    let total = (seconds * f64::from(rate)) as u64;
    let mut window = vec![0u8; period as usize * channels as usize * 2];
    let mut frames = 0u64;
    info!(rate, period, "duplex loop running");
    while frames < total {
        session.read(cap, &mut window)?;
        session.write(play, &window)?;
        frames += u64::from(period);
    }
    info!(
        analog_level = session.analog_level(),
        processing = session.is_processing(),
        "duplex loop done"
    );
    session.close(cap)?;
    session.close(play)?;
    Ok(())
}

pub fn params(cfg: &Config, direction: Direction) -> anyhow::Result<()> {
    let params = PcmParams::query(cfg.card, cfg.device, direction.flags()).with_context(|| {
        format!(
            "cannot query {} on card {} device {}",
            direction.as_str(),
            cfg.card,
            cfg.device
        )
    })?;
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}

pub fn card(id: &str) -> anyhow::Result<()> {
    match card_index_by_id(id) {
        Some(index) => {
            println!("{index}");
            Ok(())
        }
        None => bail!("no sound card with id '{id}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_bytes_are_little_endian() {
        let bytes = samples_to_bytes(&[1, -2]);
        assert_eq!(bytes, [0x01, 0x00, 0xfe, 0xff]);
        assert_eq!(bytes_to_samples(&bytes).collect::<Vec<_>>(), [1, -2]);
    }

    #[test]
    fn wav_streams_must_be_16_bit() {
        let config = PcmConfig {
            format: PcmFormat::S32Le,
            ..PcmConfig::default()
        };
        assert!(require_s16(&config).is_err());
        assert!(require_s16(&PcmConfig::default()).is_ok());
    }
}
