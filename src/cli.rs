use anyhow::{Context, bail};
use std::path::PathBuf;
use tinypcm_engine::Direction;

pub const USAGE: &str = "\
Usage: tinypcm [--config FILE] [-v...] <command>

Commands:
  play <wav>               play a 16-bit WAV file
  cap <wav> <seconds>      record the capture stream to a WAV file
  duplex <seconds>         loop echo-device capture back to playback
  params [capture|playback]  print hardware parameter ranges as JSON
  card <id>                print the index of the card named <id>";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play { path: PathBuf },
    Cap { path: PathBuf, seconds: f64 },
    Duplex { seconds: f64 },
    Params { direction: Direction },
    Card { id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub verbosity: u8,
    pub command: Command,
}

fn seconds(arg: Option<String>) -> anyhow::Result<f64> {
    let arg = arg.context("missing duration in seconds")?;
    let secs: f64 = arg
        .parse()
        .with_context(|| format!("invalid duration '{arg}'"))?;
    if !secs.is_finite() || secs <= 0.0 {
        bail!("duration must be positive, got {arg}");
    }
    Ok(secs)
}

impl Cli {
    pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut config = None;
        let mut verbosity = 0u8;
        let mut positional = Vec::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = Some(PathBuf::from(args.next().context("--config needs a file")?));
                }
                "-h" | "--help" => bail!("{USAGE}"),
                flag if flag.starts_with("-v") && flag[1..].chars().all(|c| c == 'v') => {
                    verbosity = verbosity.saturating_add((flag.len() - 1) as u8);
                }
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let name = positional.next().with_context(|| format!("missing command\n\n{USAGE}"))?;
        let command = match name.as_str() {
            "play" => Command::Play {
                path: positional.next().context("play needs a WAV file")?.into(),
            },
            "cap" => Command::Cap {
                path: positional.next().context("cap needs a WAV file")?.into(),
                seconds: seconds(positional.next())?,
            },
            "duplex" => Command::Duplex {
                seconds: seconds(positional.next())?,
            },
            "params" => Command::Params {
                direction: match positional.next().as_deref() {
                    None | Some("playback") => Direction::Playback,
                    Some("capture") => Direction::Capture,
                    Some(other) => bail!("unknown stream direction '{other}'"),
                },
            },
            "card" => Command::Card {
                id: positional.next().context("card needs an id")?,
            },
            other => bail!("unknown command '{other}'\n\n{USAGE}"),
        };
        if let Some(extra) = positional.next() {
            bail!("unexpected argument '{extra}'");
        }
        Ok(Self {
            config,
            verbosity,
            command,
        })
    }
}
