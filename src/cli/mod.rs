//! # CLI Module
//!
//! Command-line interface for batch detector integration.
//!
//! The only engine bundled with the binary is the synthetic one, so runs
//! need `--synthetic` and produce demo outputs.
//!
//! ## Usage
//! ```bash
//! # Integrate selected files
//! lambda-batch process --synthetic scan_m1.nxs scan_m2.nxs scan_m3.nxs -c ceo2.poni -d processed
//!
//! # Every .nxs/.h5 file in a folder
//! lambda-batch process-dir --synthetic /data/visit --format chi --format xy
//!
//! # Keep processing files as the detector writes them
//! lambda-batch watch --synthetic /data/visit --window 2 --interval 1
//!
//! # Remember defaults
//! lambda-batch settings save -c ceo2.poni -d processed --azimuth-bins 72
//! ```

mod settings;

use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use lambda_batch::core::batch::{BatchEngine, CancellationToken, RunSummary};
use lambda_batch::core::engine::{PatternFormat, SyntheticEngine};
use lambda_batch::core::watcher::{WatchSession, WatcherConfig};
use lambda_batch::error::{ConfigError, Result};
use lambda_batch::events::{BatchEvent, Event, EventChannel, EventReceiver, WatchEvent};
use settings::Settings;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Tile geometry of the bundled engine (one detector module)
const DETECTOR_TILE: (usize, usize) = (195, 487);

/// Lambda Batch - Idempotent batch integration of detector files
#[derive(Parser, Debug)]
#[command(name = "lambda-batch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short, long, default_value = "pretty", global = true)]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run the bundled synthetic engine; it writes generated demo data, not
    /// integrations of the input files
    #[arg(long, global = true)]
    synthetic: bool,

    /// Images per file reported by the synthetic engine
    #[arg(long, default_value = "1", global = true)]
    frames: usize,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    settings_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Integrate the given detector files
    Process {
        /// Files to process; module tiles are grouped automatically
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        integration: IntegrationArgs,
    },
    /// Integrate every .nxs/.h5 file directly inside a directory
    ProcessDir {
        directory: PathBuf,

        #[command(flatten)]
        integration: IntegrationArgs,
    },
    /// Watch a directory and integrate files once they are complete
    Watch {
        directory: PathBuf,

        #[command(flatten)]
        integration: IntegrationArgs,

        /// Seconds without writes before a file counts as complete
        #[arg(long, default_value = "2.0")]
        window: f64,

        /// Seconds between completion polls
        #[arg(long, default_value = "1.0")]
        interval: f64,

        /// Stop after this many seconds (runs until killed otherwise)
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Show or store default settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the stored settings
    Show,
    /// Store the given flags as defaults
    Save {
        #[command(flatten)]
        integration: IntegrationArgs,
    },
}

/// Flags that override stored settings
#[derive(Args, Debug, Clone, Default)]
struct IntegrationArgs {
    /// Calibration (.poni) file
    #[arg(short, long)]
    calibration: Option<PathBuf>,

    /// Output directory
    #[arg(short = 'd', long)]
    output_dir: Option<PathBuf>,

    /// Detector mask file
    #[arg(short, long)]
    mask: Option<PathBuf>,

    /// Radial points for 1-D patterns (cakes use twice as many)
    #[arg(long)]
    points: Option<usize>,

    /// Azimuth bins for cakes
    #[arg(long)]
    azimuth_bins: Option<usize>,

    /// Pattern formats to export (repeatable)
    #[arg(short, long = "format")]
    formats: Vec<Format>,

    /// Do not export cakes
    #[arg(long)]
    no_cake: bool,

    /// Apply the mask to cakes
    #[arg(long)]
    mask_cake: bool,

    /// Do not apply the mask to 1-D patterns
    #[arg(long)]
    no_mask_pattern: bool,

    /// Regenerate outputs that already exist
    #[arg(long)]
    overwrite: bool,
}

impl IntegrationArgs {
    /// Layer explicit flags over stored settings
    fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(path) = &self.calibration {
            settings.calibration_file = Some(path.clone());
        }
        if let Some(path) = &self.output_dir {
            settings.output_dir = Some(path.clone());
        }
        if let Some(path) = &self.mask {
            settings.mask_file = Some(path.clone());
        }
        if let Some(points) = self.points {
            settings.points = points;
        }
        if let Some(bins) = self.azimuth_bins {
            settings.azimuth_bins = bins;
        }
        if !self.formats.is_empty() {
            settings.patterns = self.formats.iter().map(|f| (*f).into()).collect();
        }
        if self.no_cake {
            settings.cake = false;
        }
        if self.mask_cake {
            settings.mask_cake = true;
        }
        if self.no_mask_pattern {
            settings.mask_pattern = false;
        }
        if self.overwrite {
            settings.overwrite = true;
        }
        settings
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// 2-theta / intensity with a 4-line header
    Chi,
    /// Two columns with a comment header
    Xy,
    /// Two columns, no header
    Dat,
}

impl From<Format> for PatternFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Chi => PatternFormat::Chi,
            Format::Xy => PatternFormat::Xy,
            Format::Dat => PatternFormat::Dat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
}

enum Input {
    Paths(Vec<PathBuf>),
    Directory(PathBuf),
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    lambda_batch::init_tracing(if cli.verbose { "debug" } else { "warn" });

    let settings_path = cli.settings_file.clone().unwrap_or_else(Settings::default_path);

    match &cli.command {
        Commands::Process { paths, integration } => {
            run_batch(&cli, Input::Paths(paths.clone()), integration, &settings_path)
        }
        Commands::ProcessDir {
            directory,
            integration,
        } => run_batch(
            &cli,
            Input::Directory(directory.clone()),
            integration,
            &settings_path,
        ),
        Commands::Watch {
            directory,
            integration,
            window,
            interval,
            duration,
        } => {
            let watch = WatcherConfig {
                stability_window: seconds("window", *window)?,
                poll_interval: seconds("interval", *interval)?,
                recursive: true,
            };
            let duration = duration.map(|d| seconds("duration", d)).transpose()?;
            run_watch(&cli, directory.clone(), integration, &settings_path, watch, duration)
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show => show_settings(&cli, &settings_path),
            SettingsAction::Save { integration } => {
                save_settings(&cli, integration, &settings_path)
            }
        },
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ConfigError::InvalidParameter(format!("--{} must be a non-negative number", name)).into()
    })
}

fn build_engine(
    cli: &Cli,
    integration: &IntegrationArgs,
    settings_path: &std::path::Path,
) -> Result<BatchEngine<SyntheticEngine>> {
    if !cli.synthetic {
        return Err(ConfigError::InvalidParameter(
            "no detector reader is built in; pass --synthetic to write demo outputs".to_string(),
        )
        .into());
    }
    let settings = integration.apply(Settings::load(settings_path)?);
    let config = settings.to_config()?;
    let engine = SyntheticEngine::new(cli.frames, DETECTOR_TILE);
    Ok(BatchEngine::new(config, engine)?)
}

fn run_batch(
    cli: &Cli,
    input: Input,
    integration: &IntegrationArgs,
    settings_path: &std::path::Path,
) -> Result<()> {
    let term = Term::stderr();
    print_header(&term, cli.output);

    let mut batch = build_engine(cli, integration, settings_path)?;

    let (sender, receiver) = EventChannel::new();
    let progress = progress_bar(cli.output);
    let event_thread = spawn_event_thread(receiver, progress, cli.verbose);

    let cancel = CancellationToken::new();
    let summary = match input {
        Input::Paths(paths) => batch.process_selection(paths, &sender, &cancel),
        Input::Directory(directory) => batch.process_directory(&directory, &sender, &cancel)?,
    };

    // Drop sender to signal event thread to finish
    drop(sender);
    event_thread.join().ok();

    print_summary(&term, cli, &summary)
}

fn run_watch(
    cli: &Cli,
    directory: PathBuf,
    integration: &IntegrationArgs,
    settings_path: &std::path::Path,
    watch: WatcherConfig,
    duration: Option<Duration>,
) -> Result<()> {
    let term = Term::stderr();
    print_header(&term, cli.output);

    let batch = build_engine(cli, integration, settings_path)?;

    let (sender, receiver) = EventChannel::new();
    let progress = progress_bar(cli.output);
    let event_thread = spawn_event_thread(receiver, progress, cli.verbose);

    let mut session = WatchSession::new(batch, directory, watch, sender)?;
    let cancel = CancellationToken::new();
    if let Some(duration) = duration {
        let timer = cancel.clone();
        thread::spawn(move || {
            thread::sleep(duration);
            timer.cancel();
        });
    }

    let mut summary = RunSummary::new();
    summary.sets = session.run(&cancel)?;
    summary.cancelled = true;

    drop(session);
    event_thread.join().ok();

    print_summary(&term, cli, &summary)
}

fn show_settings(cli: &Cli, settings_path: &std::path::Path) -> Result<()> {
    let settings = Settings::load(settings_path)?;
    match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&settings)?),
        OutputFormat::Pretty => {
            let term = Term::stdout();
            term.write_line(&format!(
                "{} {}",
                style("Settings").bold(),
                style(settings_path.display()).dim()
            ))
            .ok();
            term.write_line(&serde_json::to_string_pretty(&settings)?).ok();
        }
    }
    Ok(())
}

fn save_settings(
    cli: &Cli,
    integration: &IntegrationArgs,
    settings_path: &std::path::Path,
) -> Result<()> {
    let settings = integration.apply(Settings::load(settings_path)?);
    settings.save(settings_path)?;

    if cli.output == OutputFormat::Pretty {
        Term::stderr()
            .write_line(&format!(
                "{} Saved settings to {}",
                style("✓").green().bold(),
                settings_path.display()
            ))
            .ok();
    }
    Ok(())
}

fn print_header(term: &Term, output: OutputFormat) {
    if output == OutputFormat::Pretty {
        term.write_line(&format!(
            "{} {}",
            style("Lambda Batch").bold().cyan(),
            style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
        ))
        .ok();
        term.write_line("").ok();
    }
}

fn progress_bar(output: OutputFormat) -> Option<ProgressBar> {
    if output != OutputFormat::Pretty {
        return None;
    }
    let pb = ProgressBar::new(0);
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("█▓░"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(bar_style);
    Some(pb)
}

/// Handle events in a separate thread; ends when every sender is dropped
fn spawn_event_thread(
    receiver: EventReceiver,
    progress: Option<ProgressBar>,
    verbose: bool,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let Some(pb) = progress else {
            // drain so senders never block on a bounded channel
            for _ in receiver.iter() {}
            return;
        };

        for event in receiver.iter() {
            match event {
                Event::Batch(BatchEvent::SetStarted { name, total_images }) => {
                    pb.set_length(total_images as u64);
                    pb.set_position(0);
                    pb.set_message(name);
                }
                Event::Batch(BatchEvent::Progress(p)) => {
                    pb.set_position(p.current as u64);
                    if verbose {
                        pb.set_message(p.message);
                    }
                }
                Event::Batch(BatchEvent::ImageFailed {
                    name,
                    index,
                    message,
                }) => {
                    pb.println(format!(
                        "  {} {} image {}: {}",
                        style("✗").red(),
                        name,
                        index,
                        message
                    ));
                }
                Event::Batch(BatchEvent::SetCompleted(stats)) => {
                    pb.println(format!(
                        "  {} {} {}/{} processed ({} skipped, {} failed)",
                        style("✓").green(),
                        style(&stats.name).bold(),
                        stats.processed,
                        stats.total_images,
                        stats.skipped,
                        stats.failed
                    ));
                }
                Event::Batch(BatchEvent::Error { message }) => {
                    pb.println(format!("  {} {}", style("!").red().bold(), message));
                }
                Event::Batch(BatchEvent::RunCompleted(_)) => {
                    pb.finish_and_clear();
                }
                Event::Watch(WatchEvent::Started { path }) => {
                    pb.println(format!(
                        "  {} {}",
                        style("Watching").cyan(),
                        path.display()
                    ));
                }
                Event::Watch(WatchEvent::FileReady { path }) if verbose => {
                    pb.println(format!("  {} {}", style("ready").dim(), path.display()));
                }
                Event::Watch(WatchEvent::WaitingForTiles { base, missing }) => {
                    pb.println(format!(
                        "  {} {} (missing {})",
                        style("waiting").yellow(),
                        base.display(),
                        missing.join(", ")
                    ));
                }
                Event::Watch(WatchEvent::Error { message }) => {
                    pb.println(format!("  {} {}", style("!").red().bold(), message));
                }
                Event::Watch(WatchEvent::Stopped { .. }) => {
                    pb.finish_and_clear();
                }
                _ => {}
            }
        }
    })
}

fn print_summary(term: &Term, cli: &Cli, summary: &RunSummary) -> Result<()> {
    match cli.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Pretty => print_pretty_summary(term, summary, cli.verbose),
    }
    Ok(())
}

fn print_pretty_summary(term: &Term, summary: &RunSummary, verbose: bool) {
    term.write_line("").ok();
    term.write_line(&format!("{} Run Complete", style("✓").green().bold()))
        .ok();
    term.write_line("").ok();

    term.write_line(&format!(
        "  {} file set(s), {} image(s) in {:.1}s",
        style(summary.sets.len()).cyan(),
        style(summary.total_images()).cyan(),
        summary.duration_ms as f64 / 1000.0
    ))
    .ok();
    term.write_line(&format!(
        "  {} processed ({} reused)",
        style(summary.total_processed()).cyan(),
        style(summary.total_skipped()).dim()
    ))
    .ok();

    if summary.total_failed() > 0 {
        term.write_line(&format!(
            "  {} failed",
            style(summary.total_failed()).red().bold()
        ))
        .ok();
    }

    if !summary.dropped_groups.is_empty() {
        term.write_line("").ok();
        term.write_line(&format!(
            "{}",
            style("Incomplete module groups (not processed):").yellow()
        ))
        .ok();
        for group in &summary.dropped_groups {
            term.write_line(&format!("  {}", group.describe())).ok();
        }
    }

    if verbose {
        for stats in summary.sets.iter().filter(|s| s.failed > 0) {
            term.write_line("").ok();
            term.write_line(&format!("{}", style(&stats.name).bold().underlined()))
                .ok();
            for failure in &stats.failures {
                term.write_line(&format!(
                    "  {} image {}: {}",
                    style("✗").red(),
                    failure.index,
                    failure.message
                ))
                .ok();
            }
        }
    }

    if summary.cancelled {
        term.write_line("").ok();
        term.write_line(&format!("{}", style("Stopped before completion.").dim()))
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_stored_settings() {
        let stored = Settings {
            calibration_file: Some("/cal/old.poni".into()),
            points: 1000,
            ..Settings::default()
        };
        let args = IntegrationArgs {
            calibration: Some("/cal/new.poni".into()),
            formats: vec![Format::Xy, Format::Dat],
            no_cake: true,
            ..IntegrationArgs::default()
        };

        let merged = args.apply(stored);

        assert_eq!(merged.calibration_file, Some(PathBuf::from("/cal/new.poni")));
        assert_eq!(merged.points, 1000);
        assert!(!merged.cake);
        assert!(merged.patterns.contains(&PatternFormat::Xy));
        assert!(!merged.patterns.contains(&PatternFormat::Chi));
    }

    #[test]
    fn absent_flags_keep_stored_settings() {
        let stored = Settings {
            mask_cake: true,
            overwrite: true,
            ..Settings::default()
        };
        let merged = IntegrationArgs::default().apply(stored.clone());
        assert_eq!(merged, stored);
    }

    #[test]
    fn engine_needs_explicit_synthetic_flag() {
        let dir = tempfile::tempdir().unwrap();
        let calibration = dir.path().join("cal.poni");
        std::fs::write(&calibration, "Distance: 0.3\n").unwrap();
        let args = IntegrationArgs {
            calibration: Some(calibration),
            output_dir: Some(dir.path().join("processed")),
            ..IntegrationArgs::default()
        };
        let settings_path = dir.path().join("settings.json");

        let real = Cli::try_parse_from(["lambda-batch", "process", "scan.nxs"]).unwrap();
        assert!(build_engine(&real, &args, &settings_path).is_err());
        assert!(!dir.path().join("processed").exists());

        let demo =
            Cli::try_parse_from(["lambda-batch", "process", "scan.nxs", "--synthetic"]).unwrap();
        assert!(build_engine(&demo, &args, &settings_path).is_ok());
    }

    #[test]
    fn negative_durations_are_rejected() {
        assert!(seconds("window", -1.0).is_err());
        assert_eq!(seconds("window", 2.0).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn cli_parses_watch_command() {
        let cli = Cli::try_parse_from([
            "lambda-batch",
            "watch",
            "/data/visit",
            "--window",
            "3",
            "-c",
            "/cal/ceo2.poni",
            "--output",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Watch {
                directory, window, ..
            } => {
                assert_eq!(directory, PathBuf::from("/data/visit"));
                assert_eq!(window, 3.0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
