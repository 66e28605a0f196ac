//! Command-line configuration for the daemon.

use std::path::PathBuf;

use spworker::options::{EnvOptions, OptionsError};
use spworker::pool::{EnvKind, EnvPool, PoolError};
use spworker::ScriptHost;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_MAX_FRAME_MB: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("help requested")]
    Help,
    #[error("missing port argument")]
    MissingPort,
    #[error("flag {0} expects a value")]
    MissingValue(String),
    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },
    #[error("unexpected argument '{0}'")]
    Unexpected(String),
    #[error("--count given without --env")]
    CountWithoutEnv,
    #[error(transparent)]
    Kind(#[from] PoolError),
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad options file {}: {source}", .path.display())]
    Options { path: PathBuf, source: OptionsError },
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    pub max_frame_len: usize,
    /// Pool to build before the first client connects.
    pub preload: Option<(EnvKind, usize)>,
    pub options: EnvOptions,
}

impl DaemonConfig {
    /// `[--host H] [--max-frame-mb N] [--env KIND [--count N]] [--options FILE.json] <port>`
    pub fn from_args<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut host = DEFAULT_HOST.to_string();
        let mut max_frame_mb = DEFAULT_MAX_FRAME_MB;
        let mut kind: Option<EnvKind> = None;
        let mut count: Option<usize> = None;
        let mut options_path: Option<PathBuf> = None;
        let mut port: Option<u16> = None;

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
            };
            match arg.as_str() {
                "-h" | "--help" => return Err(ConfigError::Help),
                "--host" => host = value("--host")?,
                "--max-frame-mb" => {
                    max_frame_mb = parse_flag("--max-frame-mb", value("--max-frame-mb")?)?
                }
                "--env" => kind = Some(value("--env")?.parse()?),
                "--count" => count = Some(parse_flag("--count", value("--count")?)?),
                "--options" => options_path = Some(PathBuf::from(value("--options")?)),
                other if other.starts_with("--") => {
                    return Err(ConfigError::Unexpected(other.to_string()))
                }
                other if port.is_none() => port = Some(parse_flag("port", other.to_string())?),
                other => return Err(ConfigError::Unexpected(other.to_string())),
            }
        }

        let port = port.ok_or(ConfigError::MissingPort)?;
        if max_frame_mb == 0 {
            return Err(ConfigError::InvalidValue {
                flag: "--max-frame-mb".to_string(),
                value: "0".to_string(),
            });
        }
        let preload = match (kind, count) {
            (Some(kind), count) => Some((kind, count.unwrap_or(1))),
            (None, Some(_)) => return Err(ConfigError::CountWithoutEnv),
            (None, None) => None,
        };
        let options = match options_path {
            Some(path) => load_options(path)?,
            None => EnvOptions::default(),
        };

        Ok(Self {
            host,
            port,
            max_frame_len: max_frame_mb << 20,
            preload,
            options,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The script host the daemon starts with, with its pool if one was preloaded.
    pub fn build_host(&self) -> Result<ScriptHost, PoolError> {
        match self.preload {
            Some((kind, count)) => {
                let pool = EnvPool::new(kind, count, &self.options)?;
                Ok(ScriptHost::with_pool(pool))
            }
            None => Ok(ScriptHost::new()),
        }
    }
}

fn parse_flag<T: std::str::FromStr>(flag: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

fn load_options(path: PathBuf) -> Result<EnvOptions, ConfigError> {
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    EnvOptions::from_json_str(&text).map_err(|source| ConfigError::Options { path, source })
}
