//! Sonde command-line driver
//!
//! Assembles a render program, runs it on a target and logs what the
//! analysis stages found.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sonde_core::{
    AutoGain, BandSpacing, BandSplitter, Command, Cycle, DcRemove, Fft, NullSink, OnsetDetector,
    Pacing, PitchDetector, RenderProgram, RenderTarget, Stage, TargetConfig, TargetEvent,
    ToneSource, WindowShape,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze(args) => run_analyze(config, &args),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        #[cfg(feature = "device")]
        Commands::Play(args) => run_play(config, &args),
        #[cfg(feature = "device")]
        Commands::Devices => {
            for device in sonde_core::OutputDevice::list()? {
                println!("{}", serde_json::to_string(&device)?);
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sonde=info")),
        )
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<TargetConfig> {
    match path {
        Some(path) => TargetConfig::load(path)
            .with_context(|| format!("loading target config {}", path.display())),
        None => Ok(TargetConfig::default()),
    }
}

/// Analysis chain shared by every subcommand
struct Analysis {
    program: Stage<RenderProgram>,
    tone: Stage<ToneSource>,
    fft: Stage<Fft>,
    bands: Stage<BandSplitter>,
    pitch: Stage<PitchDetector>,
    onsets: Stage<OnsetDetector>,
}

impl Analysis {
    fn new(args: &ToneArgs) -> Result<Self> {
        let tone = Stage::source(
            ToneSource::new(args.frequency, args.amplitude, Some(args.duration))
                .with_harmonics(args.harmonics),
        );
        let fft = Stage::new(Fft::new(args.window, args.shape.into()));
        let bands = Stage::new(BandSplitter::new(
            &fft,
            args.low,
            args.high,
            args.bands,
            args.spacing.into(),
        ));
        let pitch = Stage::new(PitchDetector::new(&fft));
        let onsets = Stage::new(OnsetDetector::new(&fft));

        let program = Stage::new(RenderProgram::new(&tone));
        program.add_last(&Stage::new(DcRemove::new()))?;
        program.add_last(&Stage::new(AutoGain::new()))?;
        program.add_last(&fft)?;
        program.add_last(&bands)?;
        program.add_last(&pitch)?;
        program.add_last(&onsets)?;

        Ok(Self {
            program,
            tone,
            fft,
            bands,
            pitch,
            onsets,
        })
    }

    fn report(&self, target: &RenderTarget) -> Result<()> {
        let centers = self.bands.centers(target)?;
        let powers = self.bands.powers(target)?;
        for (band, (center, power)) in centers.iter().zip(powers.iter()).enumerate() {
            info!(band, center_hz = *center, power = *power, "band");
        }
        if let Some(band) = self.bands.loudest(target)? {
            info!(band, center_hz = centers[band], "loudest band");
        }
        if let Some(peak) = self.fft.peak_frequency(target)? {
            info!(peak_hz = peak, "spectrum peak");
        }
        match self.pitch.fundamental(target)? {
            Some(pitch) => info!(
                frequency_hz = pitch.frequency,
                salience = pitch.salience,
                "fundamental"
            ),
            None => info!("no pitch detected"),
        }
        info!(onsets = self.onsets.onsets(target)?, "onsets");
        Ok(())
    }
}

fn run_analyze(mut config: TargetConfig, args: &AnalyzeArgs) -> Result<()> {
    if !args.realtime {
        config.pacing = Pacing::Freewheel;
    }
    let analysis = Analysis::new(&args.tone)?;
    let mut target = RenderTarget::new(config, NullSink)?;
    let events = target.events();
    target.use_program(&analysis.program);

    info!(
        frequency_hz = args.tone.frequency,
        seconds = args.tone.duration,
        source = analysis.tone.name(),
        "analyzing tone"
    );

    if args.threaded {
        target.start()?;
        target.join();
        for event in events.try_iter() {
            if let TargetEvent::Error { message } = event {
                bail!("render failed: {}", message);
            }
        }
    } else {
        while target.run_one_cycle()? == Cycle::Rendered {}
    }

    info!(
        cycles = target.cycles(),
        overruns = target.overruns(),
        "render finished"
    );
    analysis.report(&target)
}

#[cfg(feature = "device")]
fn run_play(config: TargetConfig, args: &ToneArgs) -> Result<()> {
    let analysis = Analysis::new(args)?;
    let info = sonde_core::TargetInfo::new(&config.name, config.sample_rate, config.channels);
    let (output, sink) = sonde_core::DeviceOutput::open_default(&info)?;
    let mut target = RenderTarget::new(config, sink)?;
    target.use_program(&analysis.program);

    target.start()?;
    target.join();
    if output.underruns() > 0 {
        tracing::warn!(underruns = output.underruns(), "device ran short of audio");
    }
    analysis.report(&target)
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Pull-based audio render pipeline", long_about = None)]
struct Cli {
    /// Target configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a test tone through the analysis chain and log the results.
    Analyze(AnalyzeArgs),
    /// Print the effective target configuration.
    Config,
    /// Play a test tone on the default output device while analyzing it.
    #[cfg(feature = "device")]
    Play(ToneArgs),
    /// List output devices.
    #[cfg(feature = "device")]
    Devices,
}

#[derive(clap::Args, Debug)]
struct AnalyzeArgs {
    #[command(flatten)]
    tone: ToneArgs,

    /// Render on the target's own thread instead of cycling inline
    #[arg(long)]
    threaded: bool,

    /// Keep real-time pacing from the config instead of freewheeling
    #[arg(long)]
    realtime: bool,
}

#[derive(clap::Args, Debug)]
struct ToneArgs {
    /// Tone frequency in Hz
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f32,

    /// Peak amplitude
    #[arg(short, long, default_value_t = 0.5)]
    amplitude: f32,

    /// Tone length in seconds
    #[arg(short, long, default_value_t = 1.0)]
    duration: f64,

    /// Overtones added above the fundamental
    #[arg(long, default_value_t = 0)]
    harmonics: usize,

    /// FFT window in milliseconds
    #[arg(long, default_value_t = 25.0)]
    window: f32,

    #[arg(long, value_enum, default_value_t = Shape::Hann)]
    shape: Shape,

    /// Lower edge of the first band in Hz
    #[arg(long, default_value_t = 80.0)]
    low: f32,

    /// Upper edge of the last band in Hz
    #[arg(long, default_value_t = 10000.0)]
    high: f32,

    #[arg(long, default_value_t = 10)]
    bands: usize,

    #[arg(long, value_enum, default_value_t = Spacing::Logarithmic)]
    spacing: Spacing,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Shape {
    Hann,
    Hamming,
    Blackman,
    Rectangular,
}

impl From<Shape> for WindowShape {
    fn from(shape: Shape) -> Self {
        match shape {
            Shape::Hann => WindowShape::Hann,
            Shape::Hamming => WindowShape::Hamming,
            Shape::Blackman => WindowShape::Blackman,
            Shape::Rectangular => WindowShape::Rectangular,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Spacing {
    Linear,
    Logarithmic,
}

impl From<Spacing> for BandSpacing {
    fn from(spacing: Spacing) -> Self {
        match spacing {
            Spacing::Linear => BandSpacing::Linear,
            Spacing::Logarithmic => BandSpacing::Logarithmic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_analyze_defaults() {
        let cli = Cli::parse_from(["sonde", "analyze"]);
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.tone.frequency, 440.0);
                assert_eq!(args.tone.bands, 10);
                assert!(!args.threaded);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_analysis_finds_tone() {
        let cli = Cli::parse_from(["sonde", "analyze", "--harmonics", "3", "--window", "100"]);
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let config = TargetConfig::offline();
        let analysis = Analysis::new(&args.tone).unwrap();
        let mut target = RenderTarget::new(config, NullSink).unwrap();
        target.use_program(&analysis.program);
        while target.run_one_cycle().unwrap() == Cycle::Rendered {}

        let pitch = analysis.pitch.fundamental(&target).unwrap().unwrap();
        assert!((pitch.frequency - 440.0).abs() < 10.0, "pitch {}", pitch.frequency);
        analysis.report(&target).unwrap();
    }

    #[test]
    fn test_threaded_analysis_completes() {
        let cli = Cli::parse_from(["sonde", "analyze", "--threaded", "--duration", "0.25"]);
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        run_analyze(TargetConfig::offline(), &args).unwrap();
    }
}
