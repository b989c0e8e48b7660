use std::io::Write;
use std::sync::Arc;

use tracing::info;

use crate::cli::args::{ConfigAction, ConfigArgs, InitArgs, OutputFormat, RunArgs};
use crate::config::loader::{default_config_toml, get_config_path};
use crate::config::types::DockerboxConfig;
use crate::error::{DockerboxError, Result};
use crate::sandbox::{DockerBackend, ExecutionSpec, RunResult, StreamTag, Supervisor};

/// Process exit code reported when the run hit its deadline, as timeout(1) does.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

// ============================================================================
// Run Commands
// ============================================================================

/// Run one command in a fresh container. Returns the exit code to report.
pub async fn run(args: RunArgs, mut config: DockerboxConfig, format: OutputFormat) -> Result<i32> {
    if let Some(pull) = args.pull {
        config.docker.pull_policy = pull;
    }

    let spec = build_spec(args, &config);
    info!(image = %spec.image, command = ?spec.command, "Executing one-shot command");

    let backend = DockerBackend::connect(&config.docker).await?;
    let supervisor = Supervisor::from_config(Arc::new(backend), &config);
    let result = supervisor.execute(spec).await?;

    output_run_result(&result, format)?;
    Ok(exit_code(&result))
}

/// Check that the daemon answers.
pub async fn ping(config: DockerboxConfig, format: OutputFormat) -> Result<()> {
    let backend = DockerBackend::connect(&config.docker).await?;

    match format {
        OutputFormat::Text => {
            println!("Docker daemon reachable at {}", backend.socket_path().display());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "reachable": true,
                    "socket": backend.socket_path(),
                })
            );
        }
    }
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&config_path, default_config_toml()?)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Run a command with a 5 second limit");
    println!("  dockerbox run --image alpine --timeout 5s -- echo hello");
    println!();
    println!("  # Mount a directory read-only and get JSON back");
    println!("  dockerbox run -m ./src:/src:ro --format json -- ls /src");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: DockerboxConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| DockerboxError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn build_spec(args: RunArgs, config: &DockerboxConfig) -> ExecutionSpec {
    ExecutionSpec {
        image: args
            .image
            .unwrap_or_else(|| config.execution.default_image.clone()),
        command: args.command,
        env: args.env_vars,
        pids_limit: args.pids_limit.or(config.execution.default_pids_limit),
        mounts: args.mounts,
        workdir: args.workdir,
        timeout: args.timeout,
    }
}

fn exit_code(result: &RunResult) -> i32 {
    if result.timed_out {
        return TIMEOUT_EXIT_CODE;
    }
    result
        .status_code
        .and_then(|code| i32::try_from(code).ok())
        .unwrap_or(1)
}

fn output_run_result(result: &RunResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let mut stdout = std::io::stdout().lock();
            let mut stderr = std::io::stderr().lock();
            for entry in &result.logs {
                match entry.stream {
                    StreamTag::Stdout => stdout.write_all(&entry.payload)?,
                    StreamTag::Stderr => stderr.write_all(&entry.payload)?,
                }
            }
            stdout.flush()?;

            for warning in &result.warnings {
                writeln!(stderr, "warning: {}", warning)?;
            }
            writeln!(stderr, "{}", summary(result))?;
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
    }
    Ok(())
}

fn summary(result: &RunResult) -> String {
    let status = match (result.timed_out, result.status_code) {
        (true, _) => "timed out".to_string(),
        (false, Some(code)) => format!("exit {}", code),
        (false, None) => "exit unknown".to_string(),
    };
    format!(
        "[{}] time={}ms cpu={}ms mem={}KiB",
        status,
        result.elapsed_millis,
        result.cpu_time_nanos / 1_000_000,
        result.memory_bytes / 1024
    )
}
