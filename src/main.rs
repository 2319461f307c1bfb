use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use stack_alignment::config::Config;
use stack_alignment::logging::init_logging;
use stack_alignment::*;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "align")]
#[command(about = "Landmark and feature based alignment of large multi-series image stacks")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the series of an image file and the one used for editing
    Inspect {
        file: PathBuf,
    },

    /// Align images from landmark correspondences
    Manual {
        /// Input files, in stack order
        #[arg(short, long, num_args = 1.., required = true)]
        image: Vec<PathBuf>,

        /// JSON array with one landmark list per image, in working pixels
        #[arg(short, long)]
        landmarks: PathBuf,

        /// Allow rotation and shear [default: registration.rotate]
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        rotate: Option<bool>,

        /// Also emit untransformed pixels for every moving image
        /// [default: composite.keep_original_pixels]
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        keep_original: Option<bool>,

        /// Multi-page TIFF to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Align images from detected features
    Auto {
        #[arg(short, long, num_args = 1.., required = true)]
        image: Vec<PathBuf>,

        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        rotate: Option<bool>,

        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        keep_original: Option<bool>,

        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load_from_file(path)?;
            if let Err(errors) = config.validate() {
                bail!("invalid configuration {}: {}", path.display(), errors.join("; "));
            }
            config
        }
        None => Config::default(),
    };
    let _guard = init_logging(&config.logging.clone().with_verbosity(cli.verbose))?;

    match cli.command {
        Commands::Inspect { file } => handle_inspect(&config, &file),
        Commands::Manual {
            image,
            landmarks,
            rotate,
            keep_original,
            output,
        } => {
            let sets = read_landmarks(&landmarks)?;
            let request = request_for(AlignmentMode::Manual, &config, rotate, keep_original);
            run_alignment(config, image, Some(sets), request, &output)
        }
        Commands::Auto {
            image,
            rotate,
            keep_original,
            output,
        } => {
            let request = request_for(AlignmentMode::Auto, &config, rotate, keep_original);
            run_alignment(config, image, None, request, &output)
        }
    }
}

/// Switches given on the command line win over the configuration.
fn request_for(mode: AlignmentMode, config: &Config, rotate: Option<bool>, keep_original: Option<bool>) -> AlignmentRequest {
    let mut request = AlignmentRequest::from_config(mode, config);
    if let Some(rotate) = rotate {
        request.rotate = rotate;
    }
    if let Some(keep) = keep_original {
        request.keep_original_pixels = keep;
    }
    request
}

fn handle_inspect(config: &Config, file: &Path) -> anyhow::Result<()> {
    let mut manager = ImageSourceManager::new(config.source.clone());
    let source = manager
        .open(file)
        .with_context(|| format!("opening {}", file.display()))?;
    let check = manager.check_memory(file)?;

    println!("{} ({})", file.display(), source.format_name());
    println!("{:<8} {:>10} {:>10} {:>9} {:>8}", "series", "width", "height", "channels", "images");
    for (index, series) in source.series().iter().enumerate() {
        let marker = if index == source.working_series() { "*" } else { "" };
        println!(
            "{:<8} {:>10} {:>10} {:>9} {:>8}",
            format!("{index}{marker}"),
            series.width,
            series.height,
            series.channels,
            series.image_count
        );
    }
    println!("working series: {}", source.working_series());
    println!("reduced: {}", source.is_reduced());
    println!(
        "estimated memory: {:.1} MiB of {:.1} MiB budget",
        check.estimated as f64 / (1024.0 * 1024.0),
        check.budget as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

fn read_landmarks(path: &Path) -> anyhow::Result<Vec<LandmarkSet>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading landmarks {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing landmarks {}", path.display()))
}

/// Drains worker events until the current job finishes. Returns the first
/// error and any finished alignment.
fn drain(events: &mpsc::Receiver<Event>) -> anyhow::Result<(Option<AlignError>, Option<AlignmentOutcome>)> {
    let mut first_error = None;
    let mut outcome = None;
    loop {
        match events.recv().context("worker stopped unexpectedly")? {
            Event::LoadingStarted => {}
            Event::LoadingFinished => return Ok((first_error, outcome)),
            Event::Warning(warning) => eprintln!("warning: {warning}"),
            Event::Error(error) => {
                eprintln!("error: {error}");
                first_error.get_or_insert(error);
            }
            Event::AlignmentFinished(result) => outcome = Some(result),
            Event::ImageReplaced { .. } | Event::CompositeReused { .. } => {}
        }
    }
}

fn run_alignment(
    config: Config,
    images: Vec<PathBuf>,
    landmarks: Option<Vec<LandmarkSet>>,
    request: AlignmentRequest,
    output: &Path,
) -> anyhow::Result<()> {
    let delay = Duration::from_millis(config.composite.loading_delay_ms);
    let session = Arc::new(Mutex::new(AlignmentSession::new(config)));
    let (tx, rx) = mpsc::channel();
    let mut worker = Worker::spawn(session.clone(), tx, delay);

    worker.submit(Job::Load(images))?;
    if let (Some(error), _) = drain(&rx)? {
        if session.lock().image_count() < 2 {
            return Err(error.into());
        }
    }

    if let Some(sets) = landmarks {
        let mut session = session.lock();
        if sets.len() != session.image_count() {
            bail!(
                "{} landmark lists given for {} images",
                sets.len(),
                session.image_count()
            );
        }
        for (image, set) in sets.iter().enumerate() {
            for &point in set.points() {
                session.apply_edit(LandmarkEdit::Add { image, point })?;
            }
        }
    }

    worker.submit(Job::Align(request))?;
    let (error, outcome) = drain(&rx)?;
    worker.shutdown();

    let outcome = match (outcome, error) {
        (Some(outcome), _) => outcome,
        (None, Some(error)) => return Err(error.into()),
        (None, None) => bail!("alignment produced no result"),
    };
    for failure in &outcome.failures {
        eprintln!("skipped: {failure}");
    }
    outcome
        .stack
        .save_tiff(output)
        .with_context(|| format!("writing {}", output.display()))?;

    let (width, height) = outcome.stack.dimensions();
    println!(
        "{} slices, {}x{} canvas, reference image {} -> {}",
        outcome.stack.len(),
        width,
        height,
        outcome.reference,
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switches(args: &[&str]) -> (Option<bool>, Option<bool>) {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Auto { rotate, keep_original, .. } => (rotate, keep_original),
            _ => panic!("expected the auto command"),
        }
    }

    #[test]
    fn test_switches_fall_back_to_config() {
        let mut config = Config::default();
        config.registration.rotate = false;
        config.composite.keep_original_pixels = false;

        let (rotate, keep) = switches(&["align", "auto", "-i", "a.png", "b.png", "-o", "out.tiff"]);
        assert_eq!((rotate, keep), (None, None));
        let request = request_for(AlignmentMode::Auto, &config, rotate, keep);
        assert!(!request.rotate && !request.keep_original_pixels);

        let (rotate, keep) = switches(&["align", "auto", "-i", "a.png", "--rotate", "--keep-original=false", "-o", "out.tiff"]);
        let request = request_for(AlignmentMode::Auto, &Config::default(), rotate, keep);
        assert!(request.rotate);
        assert!(!request.keep_original_pixels);
    }
}
