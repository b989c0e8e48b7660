use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::types::PullPolicy;
use crate::sandbox::Mount;

#[derive(Parser, Debug)]
#[clap(name = "dockerbox")]
#[clap(version, about = "Run untrusted commands in disposable containers")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "DOCKERBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command in a fresh container and report its result
    Run(RunArgs),

    /// Check that the Docker daemon is reachable
    Ping,

    /// Initialize a new dockerbox configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image to run (defaults to execution.default_image)
    #[clap(long, short = 'i')]
    pub image: Option<String>,

    /// Mount host directories into the container (host_path:guest_path[:ro])
    #[clap(long = "mount", short = 'm', value_parser = parse_mount)]
    pub mounts: Vec<Mount>,

    /// Environment variables to set in the container (KEY=VALUE)
    #[clap(long = "env", short = 'e', value_parser = parse_env_var)]
    pub env_vars: Vec<(String, String)>,

    /// Working directory inside the container
    #[clap(long, short = 'w')]
    pub workdir: Option<String>,

    /// Maximum number of processes inside the container
    #[clap(long)]
    pub pids_limit: Option<i64>,

    /// Wall-clock limit (e.g. "500ms", "30s", "5m"; bare numbers are seconds)
    #[clap(long, short = 't', value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Override the configured image pull policy
    #[clap(long, value_enum)]
    pub pull: Option<PullPolicy>,

    /// Command and arguments (after `--`); the image default when omitted
    #[clap(last = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

fn parse_mount(s: &str) -> Result<Mount, String> {
    // Format: host_path:guest_path[:ro]
    let parts: Vec<&str> = s.split(':').collect();
    match parts.len() {
        2 => Ok(Mount {
            host_path: PathBuf::from(parts[0]),
            guest_path: parts[1].to_string(),
            readonly: false,
        }),
        3 if parts[2] == "ro" => Ok(Mount {
            host_path: PathBuf::from(parts[0]),
            guest_path: parts[1].to_string(),
            readonly: true,
        }),
        _ => Err("Mount format: host_path:guest_path[:ro]".to_string()),
    }
}

fn parse_env_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| "Environment variable format: KEY=VALUE".to_string())
}

/// Parse "500ms", "30s", "5m", "1h"; no suffix means seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    if s.is_empty() {
        return Err("Empty duration".to_string());
    }

    let (num_str, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (s.as_str(), 1_000)
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid duration: {}", s))?;
    if num == 0 {
        return Err("Duration must be greater than zero".to_string());
    }

    num.checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration too large: {}", s))
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
