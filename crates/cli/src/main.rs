//! sigcatch command-line tool.
//!
//! Waits for a signal or a duration, raises signals at processes, runs a
//! demo of ticking loopers that stop together on Ctrl+C, and generates or
//! validates settings files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sigcatch_core::{
    raise, raise_to, Catcher, CatcherSettings, Closer, CloserRegistry, EnvState, Signal,
    WakeEvent,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// sigcatch command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "sigcatch",
    version,
    about = "Wait for signals and shut long-running tasks down cleanly"
)]
struct Cli {
    /// Path to a TOML settings file with a `[catcher]` table.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log filter, e.g. `debug` or `sigcatch_core=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wait for a duration or a signal, whichever comes first.
    Wait {
        /// Seconds to wait. Without it, waits for a signal only.
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Prompt printed once armed.
        #[arg(short, long)]
        prompt: Option<String>,

        /// Signal to listen for (repeatable), e.g. `SIGTERM` or `usr1`.
        #[arg(long = "signal")]
        signals: Vec<Signal>,
    },

    /// Send a signal to this process or another one.
    Raise {
        /// Signal name, e.g. `SIGUSR1`.
        signal: Signal,

        /// Target process. Defaults to this process.
        #[arg(long)]
        pid: Option<u32>,
    },

    /// Run ticking loopers until interrupted.
    Demo {
        /// Number of loopers besides the main one.
        #[arg(short, long, default_value_t = 3)]
        loopers: usize,

        /// Tick interval in milliseconds.
        #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
        tick_ms: u64,
    },

    /// Generate a default settings file.
    Init {
        /// Output path for the generated file.
        #[arg(short, long, default_value = "./sigcatch.toml")]
        output: PathBuf,
    },

    /// Validate the settings file given with `--config`.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = EnvState::from_env();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(cli.log_level.as_deref(), &env, &settings);

    match run(cli, env, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, env: EnvState, settings: CatcherSettings) -> Result<()> {
    match cli.command {
        Commands::Wait {
            seconds,
            prompt,
            signals,
        } => cmd_wait(&settings, &env, seconds, prompt, signals).await,
        Commands::Raise { signal, pid } => cmd_raise(signal, pid),
        Commands::Demo { loopers, tick_ms } => cmd_demo(&settings, &env, loopers, tick_ms).await,
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(cli.config.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn load_settings(path: Option<&str>) -> Result<CatcherSettings> {
    match path {
        Some(path) => {
            let resolved = expand_tilde(path);
            CatcherSettings::load_and_validate(&resolved)
                .with_context(|| format!("failed to load settings from {resolved}"))
        }
        None => Ok(CatcherSettings::default()),
    }
}

/// `--log-level` wins, then the environment flags, then the settings file.
fn init_tracing(cli_level: Option<&str>, env: &EnvState, settings: &CatcherSettings) {
    let level = cli_level
        .or(env.log_level())
        .unwrap_or(settings.log_level.as_str());
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!env.no_color)
        .init();
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}

/// Apply the prompt and verbosity shared by every waiting subcommand.
fn configure(catcher: Catcher, prompt: Option<String>, env: &EnvState) -> Catcher {
    // No prompt given means nothing is printed.
    let catcher = match prompt {
        Some(prompt) => catcher.with_prompt([prompt]),
        None => catcher,
    };
    if env.verbose && !env.quiet {
        catcher.with_verbose_fn(|msg| eprintln!("[sigcatch] {msg}"))
    } else {
        catcher
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_wait(
    settings: &CatcherSettings,
    env: &EnvState,
    seconds: Option<u64>,
    prompt: Option<String>,
    signals: Vec<Signal>,
) -> Result<()> {
    let duration = seconds.or(settings.wait_seconds).map(Duration::from_secs);
    let signals = if signals.is_empty() {
        settings.effective_signals()
    } else {
        signals
    };
    debug!(?duration, ?signals, "starting wait");

    let catcher = configure(
        Catcher::new().with_signals(signals),
        prompt.or_else(|| settings.prompt.clone()),
        env,
    );

    let start = Instant::now();
    let report = catcher
        .wait_for_duration(CancellationToken::new(), duration)
        .await
        .context("wait failed")?;

    match report.trigger {
        Some(WakeEvent::Os(sig)) => println!("Stopped by {sig} after {:.2?}", start.elapsed()),
        _ => println!("Waited {:.2?}", start.elapsed()),
    }
    Ok(())
}

fn cmd_raise(signal: Signal, pid: Option<u32>) -> Result<()> {
    match pid {
        Some(pid) => {
            raise_to(pid, signal).with_context(|| format!("failed to send {signal} to {pid}"))?;
            println!("Sent {signal} to process {pid}");
        }
        None => {
            println!("Raising {signal} at process {}", std::process::id());
            raise(signal).with_context(|| format!("failed to raise {signal}"))?;
        }
    }
    Ok(())
}

async fn cmd_demo(
    settings: &CatcherSettings,
    env: &EnvState,
    loopers: usize,
    tick_ms: u64,
) -> Result<()> {
    let every = Duration::from_millis(tick_ms);
    CloserRegistry::global().register_callback(|| println!("Demo resources released"));

    let ctx = CancellationToken::new();
    let cancel = ctx.clone();
    let mut catcher = configure(
        Catcher::new().with_signals(settings.effective_signals()),
        settings.prompt.clone(),
        env,
    )
    .with_on_signal_caught(move |_, event, pending| {
        if !event.is_soft() {
            info!(remaining = pending.remaining(), "stopping loopers");
            cancel.cancel();
        }
    });

    for id in 0..loopers {
        catcher = catcher.with_looper(move |ctx: CancellationToken, closer: Closer| {
            ticker(id, every, ctx, closer)
        });
    }

    let report = catcher
        .wait_for(ctx, |ctx: CancellationToken, closer: Closer| async move {
            ctx.cancelled().await;
            closer.close();
        })
        .await
        .context("demo failed")?;

    println!();
    println!("Demo summary:");
    println!("  Loopers stopped : {}/{}", report.acknowledged, report.loopers);
    println!("  Panicked        : {}", report.panicked.len());
    println!("  Teardown units  : {}", report.global_close.ran);
    if !report.global_close.is_clean() {
        anyhow::bail!(
            "{} teardown unit(s) failed",
            report.global_close.failures.len()
        );
    }
    Ok(())
}

async fn ticker(id: usize, every: Duration, ctx: CancellationToken, closer: Closer) {
    let mut interval = tokio::time::interval(every);
    let mut ticks = 0u64;
    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            _ = interval.tick() => {
                ticks += 1;
                debug!(looper = id, ticks, "tick");
            }
        }
    }
    info!(looper = id, ticks, "looper stopping");
    closer.close();
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_settings = r#"# sigcatch settings

[catcher]
# Signals to listen for. Empty means SIGINT, SIGTERM and SIGHUP.
signals = ["SIGINT", "SIGTERM", "SIGHUP"]
prompt = "Press CTRL-C to quit..."
# wait_seconds = 30
log_level = "info"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_settings).context("failed to write settings file")?;

    println!("Default settings written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Adjust the signal set and prompt");
    println!(
        "  2. Validate with: sigcatch validate --config {}",
        output.display()
    );
    println!(
        "  3. Try it out: sigcatch wait --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: Option<&str>) -> Result<()> {
    let path = config_path.context("no settings file given, pass --config <path>")?;
    let resolved = expand_tilde(path);
    println!("Validating settings: {resolved}");
    println!();

    let settings =
        CatcherSettings::load_from_file(&resolved).context("failed to parse settings")?;
    println!("  [OK] TOML structure is valid");

    match settings.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("settings validation failed");
        }
    }

    let signals: Vec<String> = settings
        .effective_signals()
        .iter()
        .map(ToString::to_string)
        .collect();

    println!();
    println!("Settings summary:");
    println!("  Signals      : {}", signals.join(", "));
    println!(
        "  Prompt       : {}",
        settings.prompt.as_deref().unwrap_or("(none)")
    );
    println!(
        "  Wait         : {}",
        settings
            .wait_seconds
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "until signalled".to_string())
    );
    println!("  Log level    : {}", settings.log_level);
    println!();
    println!("Settings are valid.");

    Ok(())
}
