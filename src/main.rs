use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use channel_rotator::channels::ChannelCatalog;
use channel_rotator::config::Config;
use channel_rotator::monitor::{MonitorMode, DEFAULT_PLAYER};
use channel_rotator::postprocess::{JobDispatcher, RemoteTargets, ShellSteps};
use channel_rotator::scheduler::{RunSummary, Scheduler, SchedulerOptions, StopCause};
use channel_rotator::segment;
use channel_rotator::stop::{self, StopFlag};

/// Default channels file looked up in the working directory.
const DEFAULT_CHANNELS_FILE: &str = "dvb_channel.conf";

/// Parse and validate the rotation interval in seconds (must be > 0)
fn parse_interval(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number of seconds", s))?;
    if secs == 0 {
        return Err("Rotation interval must be greater than 0".to_string());
    }
    Ok(secs)
}

/// Parse the tuner settle wait in milliseconds
fn parse_settle(s: &str) -> Result<u64, String> {
    s.parse()
        .map_err(|_| format!("'{}' is not a valid number of milliseconds", s))
}

/// channel-rotator: rotating broadcast channel recorder
#[derive(Parser)]
#[command(name = "channel-rotator")]
#[command(version, about = "Rotating broadcast channel recorder")]
#[command(long_about = "Continuously capture a live broadcast transport stream, rotating \
    through a configured channel list. Each finished segment is converted, \
    compressed, uploaded to remote storage and removed from local disk while \
    the next channel is already recording.")]
#[command(after_help = "EXAMPLES:
    # Record using ./dvb_channel.conf, rotating every 30 minutes
    channel-rotator start

    # Custom channel list and a 10 minute rotation
    channel-rotator start --channels channels.conf --interval 600

    # Headless capture without the live playback window
    channel-rotator start --no-monitor

    # Show the channels that would be recorded
    channel-rotator list-channels --channels channels.conf")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the configured channels in rotation
    #[command(after_help = "EXAMPLES:
    channel-rotator start
    channel-rotator start --channels channels.conf --interval 600
    channel-rotator start --workdir /var/spool/ts --no-monitor

KEYS (while running):
    q       Stop after closing the current segment
    Ctrl+C  Same as q")]
    Start {
        /// Channels file with one `NAME:FREQUENCY` record per line
        /// (default: ./dvb_channel.conf)
        #[arg(long, short = 'c')]
        channels: Option<PathBuf>,

        /// Rotation interval in seconds (default: 1800, or from config file)
        #[arg(long, short = 'i', value_parser = parse_interval)]
        interval: Option<u64>,

        /// Tuner settle wait in milliseconds (default: 5000)
        #[arg(long, value_parser = parse_settle)]
        settle: Option<u64>,

        /// Working directory for segment files (default: tsSaveBackup)
        #[arg(long, short = 'w')]
        workdir: Option<PathBuf>,

        /// Disable the live playback monitor
        #[arg(long)]
        no_monitor: bool,

        /// Custom config file path (default: ~/.config/channel-rotator/config.toml)
        #[arg(long, short = 'C')]
        config: Option<PathBuf>,
    },

    /// List the channels in the channels file
    ListChannels {
        /// Channels file with one `NAME:FREQUENCY` record per line
        #[arg(long, short = 'c')]
        channels: Option<PathBuf>,
    },
}

/// Display formatted startup status showing current settings
fn print_startup_status(
    catalog: &ChannelCatalog,
    interval_secs: u64,
    settle_ms: u64,
    workdir: &std::path::Path,
    targets: &RemoteTargets,
    monitor: Option<&str>,
) {
    println!();
    println!("┌─────────────────────────────────────────┐");
    println!("│        channel-rotator v{}          │", env!("CARGO_PKG_VERSION"));
    println!("├─────────────────────────────────────────┤");
    println!(
        "│  Channels: {:<28} │",
        format!("{} (first: {})", catalog.len(), catalog.current().name)
    );
    println!("│  Interval: {:<28} │", format!("{} s", interval_secs));
    println!("│  Settle:   {:<28} │", format!("{} ms", settle_ms));
    println!("│  Workdir:  {:<28} │", workdir.display().to_string());
    println!(
        "│  Remote:   {:<28} │",
        format!("{}:{}", targets.remote, targets.raw_path)
    );
    println!("│  Monitor:  {:<28} │", monitor.unwrap_or("disabled"));
    println!("├─────────────────────────────────────────┤");
    println!("│  Press q (or Ctrl+C) to stop            │");
    println!("└─────────────────────────────────────────┘");
    println!();
}

/// Format bytes as human-readable string (KB, MB, GB)
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config, String> {
    // An explicitly requested config file must exist; the default path may
    // be absent, in which case built-in defaults apply.
    match path {
        Some(path) => Config::load_from_explicit(path).map_err(|e| e.to_string()),
        None => Config::load(None).map_err(|e| e.to_string()),
    }
}

/// Run the list-channels command
fn run_list_channels(channels: Option<PathBuf>) -> Result<(), String> {
    let path = channels.unwrap_or_else(|| PathBuf::from(DEFAULT_CHANNELS_FILE));
    let catalog = ChannelCatalog::load(&path).map_err(|e| e.to_string())?;

    println!("Channels in '{}':", path.display());
    for (idx, channel) in catalog.iter().enumerate() {
        println!("  [{}] {} ({} Hz)", idx, channel.name, channel.frequency);
    }
    Ok(())
}

/// Run the start command: load everything, then hand control to the scheduler
fn run_start(
    channels: Option<PathBuf>,
    interval: Option<u64>,
    settle: Option<u64>,
    workdir: Option<PathBuf>,
    no_monitor: bool,
    config_path: Option<PathBuf>,
) -> Result<RunSummary, String> {
    let cfg = load_config(config_path)?;

    // Merge settings: CLI args > config file > built-in defaults
    let interval_secs = interval.or(cfg.rotation.interval_secs).unwrap_or(1800);
    let settle_ms = settle.or(cfg.capture.settle_ms).unwrap_or(5000);
    let workdir = workdir
        .or(cfg.storage.workdir)
        .unwrap_or_else(|| PathBuf::from("tsSaveBackup"));
    let buffer_size = cfg.capture.buffer_size.unwrap_or(4096);

    let targets = RemoteTargets {
        remote: cfg.remote.name.unwrap_or_else(|| "tsSaver".to_string()),
        raw_path: cfg
            .remote
            .raw_path
            .unwrap_or_else(|| "tsSaveBackup".to_string()),
        audio_path: cfg
            .remote
            .audio_path
            .unwrap_or_else(|| "tsSaveBackup/Audio".to_string()),
    };

    // Monitor: --no-monitor wins over config
    let monitor_enabled = !no_monitor && cfg.monitor.enabled.unwrap_or(true);
    let player = cfg
        .monitor
        .player
        .unwrap_or_else(|| DEFAULT_PLAYER.to_string());

    let channels_path = channels.unwrap_or_else(|| PathBuf::from(DEFAULT_CHANNELS_FILE));
    let catalog = ChannelCatalog::load(&channels_path).map_err(|e| e.to_string())?;

    // Leftover segments from a previous run are discarded, not resumed.
    let removed = segment::prepare_workdir(&workdir).map_err(|e| e.to_string())?;
    if removed > 0 {
        log::info!("cleared {} leftover file(s) from {}", removed, workdir.display());
    }

    print_startup_status(
        &catalog,
        interval_secs,
        settle_ms,
        &workdir,
        &targets,
        monitor_enabled.then_some(player.as_str()),
    );

    let stop = StopFlag::new();
    if let Err(e) = stop::install_ctrlc(&stop) {
        eprintln!("Warning: Could not set up Ctrl+C handler: {}", e);
    }
    let _raw_guard = match stop::spawn_key_listener(&stop) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: keystroke control unavailable ({}); use Ctrl+C to stop.", e);
            None
        }
    };

    #[cfg(not(unix))]
    {
        return Err("channel capture requires the Linux DVB device interface".to_string());
    }

    #[cfg(unix)]
    {
        use channel_rotator::dvb::{AdapterPaths, DvbTuner};

        let mut paths = AdapterPaths::default();
        if let Some(frontend) = cfg.capture.frontend {
            paths.frontend = frontend;
        }
        if let Some(demux) = cfg.capture.demux {
            paths.demux = demux;
        }
        if let Some(dvr) = cfg.capture.dvr {
            paths.dvr = dvr;
        }

        let monitor = if monitor_enabled {
            MonitorMode::Player { command: player }
        } else {
            MonitorMode::Disabled
        };

        let steps = ShellSteps {
            aac_bitrate: cfg.audio.bitrate.unwrap_or_else(|| "192k".to_string()),
        };

        let opts = SchedulerOptions {
            workdir,
            settle: Duration::from_millis(settle_ms),
            rotate_every: Duration::from_secs(interval_secs),
            read_buffer: buffer_size,
            ..SchedulerOptions::default()
        };

        let scheduler = Scheduler::new(
            catalog,
            DvbTuner::new(paths),
            monitor,
            JobDispatcher::new(steps, targets),
            stop,
            opts,
        );

        return scheduler.run().map_err(|e| e.to_string());
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::ListChannels { channels }) => {
            if let Err(e) = run_list_channels(channels) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Start {
            channels,
            interval,
            settle,
            workdir,
            no_monitor,
            config,
        }) => match run_start(channels, interval, settle, workdir, no_monitor, config) {
            Ok(summary) => {
                match summary.cause {
                    StopCause::Requested => println!("Stopped."),
                    StopCause::SessionIo => {
                        println!("Stopped after a capture I/O error; recorded data was kept.")
                    }
                }
                println!(
                    "Recorded {} segment(s), {} rotation(s), {} captured.",
                    summary.segments,
                    summary.rotations,
                    format_size(summary.bytes_captured)
                );
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            // Show brief help when no command is provided
            println!("channel-rotator {}", env!("CARGO_PKG_VERSION"));
            println!("Rotating broadcast channel recorder\n");
            println!("USAGE:");
            println!("    channel-rotator <COMMAND>\n");
            println!("COMMANDS:");
            println!("    start          Record the configured channels in rotation");
            println!("    list-channels  List the channels in the channels file");
            println!("    help           Print this message or the help of a subcommand\n");
            println!("Run 'channel-rotator --help' for more details and examples.");
        }
    }
}
