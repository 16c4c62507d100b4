use clap::{Args, Parser, Subcommand};
use filterlink_core::metrics::{normalize_peak, to_amplitudes, QualityReport, PLAYBACK_PEAK};
use filterlink_core::resample::prepare;
use filterlink_core::{
    CancelFlag, Connector, FilterMode, Handshake, LinkConfig, LinkError, LinkSession,
    Orchestrator, Sample, SerialConnector, SimulatedConnector, StreamResult, DEVICE_SAMPLE_RATE,
};
use hound::{SampleFormat, WavSpec};
use log::{error, info, warn};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "filterlink")]
#[command(about = "Stream audio through a serial FIR/IIR filter board and collect the result")]
struct Cli {
    /// Log debug traffic (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the link: handshake, then select every filter mode
    Probe {
        #[command(flatten)]
        link: LinkArgs,
    },

    /// Filter a WAV file through the device
    Process {
        /// Input WAV file (any rate, any channel count)
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Filtered output, 16-bit mono at the device rate
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Filter to run on the device (bypass, fir, iir)
        #[arg(short, long, default_value = "fir")]
        filter: FilterMode,

        /// Write a JSON session report
        #[arg(long, value_name = "FILE.JSON")]
        report: Option<PathBuf>,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Run all three filter modes on the same input and compare them
    Compare {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        #[command(flatten)]
        link: LinkArgs,
    },
}

#[derive(Args, Clone)]
struct LinkArgs {
    /// Serial port of the filter board
    #[arg(short, long, default_value = "/dev/ttyACM0")]
    port: String,

    #[arg(short, long, default_value_t = filterlink_core::BAUD_RATE)]
    baud: u32,

    /// Samples per capture cycle (1-600)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Delay after every sample line, in milliseconds
    #[arg(long)]
    pacing_ms: Option<u64>,

    /// Collection budget per batch, in milliseconds
    #[arg(long)]
    budget_ms: Option<u64>,

    /// Abort when the board never confirms the handshake
    #[arg(long)]
    strict_handshake: bool,

    /// Use the in-process simulated board instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Simulated board stays silent for this zero-based batch (repeatable)
    #[arg(long, value_name = "BATCH", requires = "simulate")]
    simulate_silent_batch: Vec<usize>,
}

impl LinkArgs {
    fn config(&self) -> LinkConfig {
        let mut config = if self.simulate {
            LinkConfig::without_delays().with_port("simulated")
        } else {
            LinkConfig::new(self.port.clone())
        };
        config.baud_rate = self.baud;
        config.strict_handshake = self.strict_handshake;
        if let Some(size) = self.batch_size {
            config = config.with_batch_capacity(size);
        }
        if let Some(ms) = self.pacing_ms {
            config = config.with_sample_pacing(Duration::from_millis(ms));
        }
        if let Some(ms) = self.budget_ms {
            config = config.with_collect_budget(Duration::from_millis(ms));
        }
        config
    }

    fn simulated(&self) -> SimulatedConnector {
        self.simulate_silent_batch
            .iter()
            .fold(SimulatedConnector::new(), |c, &batch| c.with_silent_batch(batch))
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported WAV format: {0}")]
    UnsupportedFormat(String),

    #[error("{0} contains no audio")]
    EmptyInput(PathBuf),
}

type CliResult<T> = std::result::Result<T, CliError>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Probe { link } => {
            if link.simulate {
                probe_command(link.simulated(), link.config())
            } else {
                probe_command(SerialConnector, link.config())
            }
        }
        Commands::Process { input, output, filter, report, link } => {
            let samples = load_samples(&input)?;
            let cancel = interrupt_flag();
            let result = if link.simulate {
                stream(link.simulated(), link.config(), &samples, filter, &cancel)?
            } else {
                stream(SerialConnector, link.config(), &samples, filter, &cancel)?
            };
            process_command(&input, &output, report.as_deref(), &result)
        }
        Commands::Compare { input, link } => {
            let samples = load_samples(&input)?;
            let cancel = interrupt_flag();
            let mut results = Vec::with_capacity(FilterMode::ALL.len());
            for mode in FilterMode::ALL {
                if cancel.is_cancelled() {
                    break;
                }
                let result = if link.simulate {
                    stream(link.simulated(), link.config(), &samples, mode, &cancel)?
                } else {
                    stream(SerialConnector, link.config(), &samples, mode, &cancel)?
                };
                results.push(result);
            }
            compare_command(&results);
            Ok(())
        }
    }
}

fn probe_command<C: Connector>(connector: C, config: LinkConfig) -> CliResult<()> {
    config.validate()?;
    let mut session = LinkSession::new(connector, config);

    let handshake = match session.connect() {
        Ok(handshake) => handshake,
        Err(e) => {
            session.disconnect();
            return Err(e.into());
        }
    };
    println!("Port: {}", session.config().port);
    println!("Handshake: {}", describe_handshake(&handshake));

    for mode in FilterMode::ALL {
        match session.select_filter(mode) {
            Ok(Some(ack)) => println!("  {:<6} -> {}", mode, ack),
            Ok(None) => println!("  {:<6} -> (no acknowledgement)", mode),
            Err(e) => {
                session.disconnect();
                return Err(e.into());
            }
        }
    }

    session.disconnect();
    Ok(())
}

/// Cancel flag set by Ctrl-C; the running session stops at its next read or
/// write and keeps what it has collected
fn interrupt_flag() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        warn!("interrupted, closing the link");
        flag.cancel();
    });
    if let Err(e) = installed {
        warn!("Ctrl-C handler not installed: {}", e);
    }
    cancel
}

fn stream<C: Connector>(
    connector: C,
    config: LinkConfig,
    samples: &[Sample],
    mode: FilterMode,
    cancel: &CancelFlag,
) -> CliResult<StreamResult> {
    let mut orchestrator = Orchestrator::new(connector, config)?.with_cancel_flag(cancel.clone());
    Ok(orchestrator.run_session(samples, mode)?)
}

fn process_command(
    input_path: &Path,
    output_path: &Path,
    report_path: Option<&Path>,
    result: &StreamResult,
) -> CliResult<()> {
    let quality = QualityReport::measure(&result.entrada, &result.salida);
    write_wav(output_path, &normalize_peak(&to_amplitudes(&result.salida), PLAYBACK_PEAK))?;

    println!("Handshake: {}", describe_handshake(&result.handshake));
    println!("Filter: {}", result.mode);
    println!(
        "Batches: {}/{} successful ({:.1}%)",
        result.successful_batches,
        result.total_batches,
        result.success_ratio() * 100.0
    );
    if result.cancelled {
        println!("Session cancelled after {} batches", result.batches.len());
    }
    print_quality(&quality);
    println!("Wrote {} samples to {}", result.len(), output_path.display());

    if let Some(path) = report_path {
        let report = SessionReport::new(input_path, output_path, result, &quality);
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!("report written to {}", path.display());
    }
    Ok(())
}

fn compare_command(results: &[StreamResult]) {
    println!(
        "{:<8} {:>9} {:>10} {:>10} {:>12} {:>10}",
        "filter", "success", "P_in", "P_out", "reduction", "rms diff"
    );
    for result in results {
        let quality = QualityReport::measure(&result.entrada, &result.salida);
        println!(
            "{:<8} {:>8.1}% {:>10.5} {:>10.5} {:>9.2} dB {:>9.4}V",
            result.mode.name(),
            result.success_ratio() * 100.0,
            quality.input_power,
            quality.output_power,
            quality.power_reduction_db,
            quality.rms_difference
        );
    }
}

fn print_quality(quality: &QualityReport) {
    println!("Input power: {:.6} V²", quality.input_power);
    println!("Output power: {:.6} V²", quality.output_power);
    println!("Power reduction: {:.2} dB", quality.power_reduction_db);
    println!("RMS difference: {:.4} V", quality.rms_difference);
}

fn describe_handshake(handshake: &Handshake) -> String {
    match handshake {
        Handshake::Confirmed { reply } => format!("confirmed ({})", reply),
        Handshake::Unconfirmed { lines_seen } => {
            format!("unconfirmed ({} lines without confirmation)", lines_seen)
        }
    }
}

/// Read a WAV file and prepare it for the device: mono, 8 kHz, ADC samples
fn load_samples(path: &Path) -> CliResult<Vec<Sample>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    info!(
        "read {}: {} Hz, {} channels, {} bits",
        path.display(),
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (format, bits) => {
            return Err(CliError::UnsupportedFormat(format!("{:?} {} bit", format, bits)));
        }
    };

    let samples = prepare(&interleaved, spec.channels as usize, spec.sample_rate);
    if samples.is_empty() {
        return Err(CliError::EmptyInput(path.to_path_buf()));
    }
    info!("{} samples at {} Hz", samples.len(), DEVICE_SAMPLE_RATE);
    Ok(samples)
}

fn write_wav(path: &Path, samples: &[f32]) -> CliResult<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: DEVICE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(File::create(path)?, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

#[derive(Serialize)]
struct SessionReport {
    input: String,
    output: String,
    filter: String,
    handshake_confirmed: bool,
    filter_ack: Option<String>,
    samples: usize,
    total_batches: usize,
    successful_batches: usize,
    success_ratio: f64,
    cancelled: bool,
    input_power: f64,
    output_power: f64,
    power_reduction_db: f64,
    rms_difference: f64,
    batches: Vec<BatchReport>,
}

#[derive(Serialize)]
struct BatchReport {
    index: usize,
    len: usize,
    collected: usize,
    outcome: String,
    end: String,
}

impl SessionReport {
    fn new(input: &Path, output: &Path, result: &StreamResult, quality: &QualityReport) -> Self {
        Self {
            input: input.display().to_string(),
            output: output.display().to_string(),
            filter: result.mode.name().to_string(),
            handshake_confirmed: result.handshake.is_confirmed(),
            filter_ack: result.filter_ack.clone(),
            samples: result.len(),
            total_batches: result.total_batches,
            successful_batches: result.successful_batches,
            success_ratio: result.success_ratio(),
            cancelled: result.cancelled,
            input_power: quality.input_power,
            output_power: quality.output_power,
            power_reduction_db: quality.power_reduction_db,
            rms_difference: quality.rms_difference,
            batches: result
                .batches
                .iter()
                .map(|b| BatchReport {
                    index: b.index,
                    len: b.len,
                    collected: b.collected,
                    outcome: format!("{:?}", b.outcome),
                    end: format!("{:?}", b.end),
                })
                .collect(),
        }
    }
}
