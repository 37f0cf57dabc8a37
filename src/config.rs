use std::io;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::http::Uri;
use clap::Args;
use clap::Command;
use clap::CommandFactory;
use clap::Parser;
use clap::ValueHint;
use clap_complete::Generator;
use clap_complete::Shell;
use clap_complete::generate;
use clap_verbosity_flag::InfoLevel;
use clap_verbosity_flag::Verbosity;

use crate::utils::setup_tracing;

/// Origin of the paired front-end during local development
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Uploads of this many bytes, or more, are rejected
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 200_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid CORS origin \"{0}\"")]
    InvalidCorsOrigin(String),

    #[error("Invalid public URL \"{0}\"")]
    InvalidPublicUrl(String),

    #[error("Invalid video extension \"{0}\"")]
    InvalidVideoExtension(String),

    #[error("Maximum upload size must be larger than zero")]
    InvalidMaxUploadSize,
}

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
struct CliConfig {
    /// The verbosity of the output
    ///
    /// With a minimum of `info` level
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// The actual config for vidsrv
    #[command(flatten)]
    config: Config,

    /// Generate shell completions
    #[arg(long, value_enum, hide = true)]
    generate_shell_completions: Option<Shell>,
}

/// Upload, list and stream videos over HTTP
#[derive(Args, Clone, Debug)]
pub struct Config {
    /// The directory videos are stored in, created when missing
    #[arg(default_value = "videos", value_hint = ValueHint::DirPath)]
    pub storage_dir: PathBuf,

    /// The address to run vidsrv on, defaults to 127.0.0.1:8080
    #[arg(long, short)]
    pub address: Option<String>,

    /// The port to run vidsrv on, defaults to 8080 (overrides `address`)
    #[arg(long, short)]
    pub port: Option<u16>,

    /// The only origin allowed to call the API from a browser
    #[arg(long, default_value = DEFAULT_CORS_ORIGIN)]
    pub cors_origin: String,

    /// Uploads of this many bytes, or more, are rejected
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_SIZE)]
    pub max_upload_size: u64,

    /// Base of the playback URLs handed out by the listing, defaults to `http://<address>`
    #[arg(long, value_hint = ValueHint::Url)]
    pub public_url: Option<String>,

    /// File extensions recognized as videos when listing
    #[arg(
        long = "video-extension",
        value_name = "EXT",
        value_delimiter = ',',
        default_values_t = [String::from("mp4"), String::from("avi")]
    )]
    pub video_extensions: Vec<String>,

    /// Give up on request and response bodies that stall this long, e.g. `30s`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
}

/// Print the completions for vidsrv and `exit(0)`
fn print_completions<G: Generator>(generator: G, cmd: &mut Command) -> ! {
    generate(generator, cmd, cmd.get_name().to_string(), &mut io::stdout());
    exit(0);
}

impl Config {
    /// Create a config from the environment
    pub fn from_env() -> anyhow::Result<Self> {
        let cli_config = CliConfig::parse();

        if let Some(generate_shell_completions) = cli_config.generate_shell_completions {
            let mut cli_command = CliConfig::command();
            print_completions(generate_shell_completions, &mut cli_command);
        }

        setup_tracing(cli_config.verbosity);

        let mut config = cli_config.config;
        config.normalize()?;

        Ok(config)
    }

    /// Validate the values clap can't check on its own and bring them in canonical form
    fn normalize(&mut self) -> Result<(), ConfigError> {
        if self.max_upload_size == 0 {
            return Err(ConfigError::InvalidMaxUploadSize);
        }

        HeaderValue::from_str(&self.cors_origin)
            .map_err(|_| ConfigError::InvalidCorsOrigin(self.cors_origin.clone()))?;

        if let Some(public_url) = &mut self.public_url {
            let uri = public_url
                .parse::<Uri>()
                .map_err(|_| ConfigError::InvalidPublicUrl(public_url.clone()))?;

            if uri.scheme().is_none() || uri.authority().is_none() {
                return Err(ConfigError::InvalidPublicUrl(public_url.clone()));
            }

            // URLs are built by appending `/videos/...`
            while public_url.ends_with('/') {
                public_url.pop();
            }
        }

        for extension in &mut self.video_extensions {
            let normalized = extension.trim().trim_start_matches('.').to_ascii_lowercase();

            if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::InvalidVideoExtension(extension.clone()));
            }

            *extension = normalized;
        }

        Ok(())
    }

    /// Is the file name one of the recognized video types
    pub fn is_video_file_name(&self, file_name: &str) -> bool {
        let Some((_, extension)) = file_name.rsplit_once('.') else {
            return false;
        };

        self.video_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
    }
}

#[cfg(test)]
impl Config {
    /// Config with the defaults, storing into `storage_dir`
    pub fn for_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            address: None,
            port: None,
            cors_origin: String::from(DEFAULT_CORS_ORIGIN),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            public_url: Some(String::from("http://localhost:8080")),
            video_extensions: vec![String::from("mp4"), String::from("avi")],
            timeout: None,
        }
    }
}
