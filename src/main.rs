//! grainbow CLI: analyze a sample, render notes offline or play it live

use clap::{Parser, Subcommand};
use grainbow::analysis::{AnalysisEvent, AnalysisPipeline, AnalysisResult};
use grainbow::audio::AudioEngine;
use grainbow::config::EngineConfig;
use grainbow::midi_input::MidiInputHandler;
use grainbow::parameters::{Parameters, ParametersState};
use grainbow::pitch_class::PitchClass;
use grainbow::render::{self, RenderConfig};
use grainbow::sample_loader::{load_wav, resample};
use grainbow::synth::{GranularSynth, SourceSlot, SynthCommand};
use grainbow::{GrainError, GrainResult};
use arc_swap::ArcSwapOption;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "grainbow")]
#[command(about = "Pitch-aware granular synthesizer", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a WAV file and print pitches, transients and candidates
    Analyze {
        input: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render held notes to a WAV file
    Render {
        input: PathBuf,

        output: PathBuf,

        /// Comma separated notes, by name (C, F#) or MIDI number
        #[arg(short, long, default_value = "C")]
        notes: String,

        /// Length in seconds
        #[arg(short, long, default_value = "2.0")]
        duration: f32,

        /// Release all notes at this time in seconds
        #[arg(long)]
        release_at: Option<f32>,

        /// Parameter preset to restore before rendering
        #[arg(short, long)]
        preset: Option<PathBuf>,

        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Play a sample live from MIDI input
    Play {
        input: PathBuf,

        /// MIDI device name (partial match)
        #[arg(short, long)]
        midi_device: Option<String>,

        /// Notes to hold when no MIDI device is used
        #[arg(short, long)]
        notes: Option<String>,

        /// Parameter preset to restore
        #[arg(short, long)]
        preset: Option<PathBuf>,
    },

    /// List MIDI input devices
    Devices,

    /// Print or write the default configuration
    Config {
        /// Write to this path instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;

    match cli.command {
        Commands::Analyze { input, json } => {
            let result = analyze_file(&input, &config, None, None, None)?;
            if json {
                println!("{}", analysis_json(&result)?);
            } else {
                print_analysis(&result);
            }
        }

        Commands::Render {
            input,
            output,
            notes,
            duration,
            release_at,
            preset,
            seed,
        } => {
            let params = Arc::new(Parameters::new());
            let source: SourceSlot = Arc::new(ArcSwapOption::empty());
            let result = analyze_file(&input, &config, Some(Arc::clone(&params)), Some(Arc::clone(&source)), None)?;
            if let Some(preset) = preset {
                restore_preset(&params, &preset)?;
            }

            let mut synth_config = config.synth.clone();
            if seed.is_some() {
                synth_config.seed = seed;
            }
            // Render at the sample's own rate so grain positions line up
            let sample_rate = result.sample_rate as u32;
            let render_config = RenderConfig {
                sample_rate,
                channels: config.audio.channels,
                block_size: config.audio.block_size,
                duration,
                release_at,
                notes: render::parse_notes(&notes)?,
                velocity: 1.0,
            };
            let mut synth = GranularSynth::new(
                params,
                source,
                &synth_config,
                sample_rate as f32,
                render_config.channels,
                render_config.block_size,
            );
            println!("Rendering {} to {}", input.display(), output.display());
            let stats = render::render_to_file(&mut synth, &render_config, &output)?;
            stats.print_summary();
        }

        Commands::Play {
            input,
            midi_device,
            notes,
            preset,
        } => play(&input, &config, midi_device, notes, preset)?,

        Commands::Devices => {
            let devices = MidiInputHandler::list_devices()?;
            if devices.is_empty() {
                println!("No MIDI input devices found");
            }
            for device in devices {
                println!("{}: {}", device.index, device.name);
            }
        }

        Commands::Config { out } => match out {
            Some(path) => {
                EngineConfig::default().save(&path)?;
                println!("Wrote {}", path.display());
            }
            None => print!("{}", EngineConfig::default().to_toml()?),
        },
    }

    Ok(())
}

/// Run the analysis pipeline on a WAV file and wait for it
///
/// With `target_rate` the sample is first converted to that rate, so the
/// published source matches the synth it feeds.
fn analyze_file(
    path: &Path,
    config: &EngineConfig,
    params: Option<Arc<Parameters>>,
    source: Option<SourceSlot>,
    target_rate: Option<u32>,
) -> GrainResult<Arc<AnalysisResult>> {
    let buffer = load_wav(path)?;
    info!(
        "{}: {:.2}s, {} channels",
        path.display(),
        buffer.duration_seconds(),
        buffer.num_channels()
    );

    let mut pipeline = AnalysisPipeline::new(config.analysis.clone());
    if let Some(params) = params {
        pipeline = pipeline.with_parameters(params);
    }
    if let Some(source) = source {
        pipeline = pipeline.with_source(source);
    }
    let events = pipeline.events();
    let (samples, sample_rate) = match target_rate {
        Some(rate) if rate != buffer.sample_rate => {
            info!("Resampling {} Hz to {} Hz", buffer.sample_rate, rate);
            (resample(&buffer.mono(), buffer.sample_rate, rate)?, rate)
        }
        _ => (buffer.mono(), buffer.sample_rate),
    };
    let run = pipeline.start(samples, sample_rate as f32)?;

    for event in events.iter() {
        match event {
            AnalysisEvent::Finished { run: r, .. } if r == run => break,
            AnalysisEvent::Failed { run: r, error } if r == run => {
                return Err(GrainError::Config(format!("Analysis failed: {}", error)))
            }
            AnalysisEvent::Cancelled { run: r } if r == run => return Err(GrainError::Cancelled),
            AnalysisEvent::Progress { stage, progress, .. } => {
                tracing::debug!("{}: {:.0}%", stage.name(), progress * 100.0)
            }
            _ => {}
        }
    }
    pipeline
        .result()
        .ok_or_else(|| GrainError::Config("Analysis produced no result".to_string()))
}

fn restore_preset(params: &Parameters, path: &Path) -> GrainResult<()> {
    let state = ParametersState::load(path)?;
    params.restore(&state)?;
    info!("Restored preset {}", path.display());
    Ok(())
}

fn play(
    input: &Path,
    config: &EngineConfig,
    midi_device: Option<String>,
    notes: Option<String>,
    preset: Option<PathBuf>,
) -> GrainResult<()> {
    let params = Arc::new(Parameters::new());
    let source: SourceSlot = Arc::new(ArcSwapOption::empty());
    let engine = AudioEngine::new(Arc::clone(&params), Arc::clone(&source), config)?;

    // The synth runs at the device rate, so the source must too
    analyze_file(
        input,
        config,
        Some(Arc::clone(&params)),
        Some(source),
        Some(engine.sample_rate()),
    )?;
    // After publishing, so the preset's candidates win over the analysis
    if let Some(preset) = preset {
        restore_preset(&params, &preset)?;
    }

    let mut midi = MidiInputHandler::new();
    match (&midi_device, &notes) {
        (Some(device), _) => midi.connect(device, engine.commands())?,
        (None, Some(notes)) => {
            for note in render::parse_notes(notes)? {
                engine.send(SynthCommand::NoteOn { note, velocity: 1.0 });
            }
        }
        (None, None) => {
            if MidiInputHandler::list_devices().is_ok_and(|d| !d.is_empty()) {
                midi.connect_by_index(0, engine.commands())?;
            } else {
                println!("No MIDI input found, holding {}", PitchClass::C);
                engine.send(SynthCommand::NoteOn { note: 60, velocity: 1.0 });
            }
        }
    }

    println!("Playing at {} Hz. Press Enter to stop.", engine.sample_rate());
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    engine.send(SynthCommand::AllNotesOff);
    midi.disconnect();
    Ok(())
}

fn print_analysis(result: &AnalysisResult) {
    println!(
        "{} samples at {} Hz, {} spectrogram frames",
        result.samples.len(),
        result.sample_rate,
        result.spectrogram.len()
    );

    println!("\nPitches ({}):", result.pitches.len());
    for pitch in result.pitches.iter() {
        println!(
            "  {:<2} at {:.3}  duration {:.3}  confidence {:.2}",
            pitch.pitch_class.display_name(),
            pitch.pos_ratio,
            pitch.duration,
            pitch.gain
        );
    }

    println!("\nTransients ({}):", result.transients.len());
    for transient in &result.transients {
        println!("  at {:.3}", transient.pos_ratio);
    }

    println!("\nCandidates:");
    for pc in PitchClass::ALL {
        let list = &result.candidates[pc.index()];
        let rates: Vec<String> = list.iter().map(|c| format!("{:.3}@{:.2}", c.pb_rate, c.pos_ratio)).collect();
        println!("  {:<2} {}", pc.display_name(), rates.join(" "));
    }
}

fn analysis_json(result: &AnalysisResult) -> GrainResult<String> {
    let candidates: serde_json::Map<String, serde_json::Value> = PitchClass::ALL
        .iter()
        .map(|pc| {
            let list = serde_json::to_value(&result.candidates[pc.index()]).unwrap_or_default();
            (pc.name().to_string(), list)
        })
        .collect();
    let value = serde_json::json!({
        "sample_rate": result.sample_rate,
        "samples": result.samples.len(),
        "pitches": result.pitches.iter().collect::<Vec<_>>(),
        "transients": result.transients,
        "candidates": candidates,
    });
    serde_json::to_string_pretty(&value).map_err(|e| GrainError::Serde(e.to_string()))
}
