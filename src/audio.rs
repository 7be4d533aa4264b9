//! Real-time audio output using cpal
//!
//! The output callback owns the [`GranularSynth`]. Other threads talk to it
//! only through the bounded command channel, which the callback drains at
//! the start of every buffer. The callback renders into a scratch buffer
//! sized up front and converts to the device sample format.

use crate::config::EngineConfig;
use crate::error::{GrainError, GrainResult};
use crate::parameters::Parameters;
use crate::synth::{GrainEvent, GranularSynth, SourceSlot, SynthCommand};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct AudioEngine {
    sample_rate: u32,
    channels: usize,
    commands: Sender<SynthCommand>,
    grain_events: Receiver<GrainEvent>,
    _stream: cpal::Stream,
}

/// State moved into the output callback
struct CallbackState {
    synth: GranularSynth,
    commands: Receiver<SynthCommand>,
    scratch: Vec<f32>,
    channels: usize,
}

impl AudioEngine {
    /// Open the default output device and start playing
    ///
    /// The device's own sample rate and channel count win over the
    /// configured ones.
    pub fn new(params: Arc<Parameters>, source: SourceSlot, config: &EngineConfig) -> GrainResult<Self> {
        let host = cpal::default_host();
        info!("Audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or_else(|| GrainError::Audio("No audio output device found".to_string()))?;
        info!(
            "Audio device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let supported = device
            .default_output_config()
            .map_err(|e| GrainError::Audio(e.to_string()))?;
        info!("Audio config: {:?}", supported);

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        if sample_rate != config.audio.sample_rate || channels != config.audio.channels {
            warn!(
                "Device runs at {} Hz / {} channels, configured {} Hz / {} channels",
                sample_rate, channels, config.audio.sample_rate, config.audio.channels
            );
        }

        let block_size = config.audio.block_size.max(1);
        let synth = GranularSynth::new(
            params,
            source,
            &config.synth,
            sample_rate as f32,
            channels,
            block_size,
        );
        let grain_events = synth.grain_events();
        let (commands, command_rx) = GranularSynth::command_channel();
        let state = CallbackState {
            synth,
            commands: command_rx,
            scratch: vec![0.0; block_size * channels],
            channels,
        };

        let stream_config: cpal::StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &stream_config, state),
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &stream_config, state),
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &stream_config, state),
            other => {
                return Err(GrainError::Audio(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        }?;

        stream.play().map_err(|e| GrainError::Audio(e.to_string()))?;
        info!("Audio stream started at {} Hz", sample_rate);

        Ok(Self {
            sample_rate,
            channels,
            commands,
            grain_events,
            _stream: stream,
        })
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut state: CallbackState,
    ) -> GrainResult<cpal::Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| state.render(data),
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| GrainError::Audio(e.to_string()))
    }

    /// Sender for note and bend commands; usable from any thread
    pub fn commands(&self) -> Sender<SynthCommand> {
        self.commands.clone()
    }

    /// Queue a command, dropping it when the queue is full
    pub fn send(&self, command: SynthCommand) {
        if let Err(TrySendError::Full(command)) = self.commands.try_send(command) {
            warn!("Command queue full, dropped {:?}", command);
        }
    }

    pub fn grain_events(&self) -> Receiver<GrainEvent> {
        self.grain_events.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl CallbackState {
    fn render<T>(&mut self, output: &mut [T])
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        self.synth.drain_commands(&self.commands);

        // Whole frames only; the scratch buffer bounds each synth block
        let frame_len = self.channels.max(1);
        for chunk in output.chunks_mut(self.scratch.len().max(frame_len)) {
            let len = chunk.len() - chunk.len() % frame_len;
            let scratch = &mut self.scratch[..len];
            self.synth.process_block(scratch);
            for (out, &sample) in chunk.iter_mut().zip(scratch.iter()) {
                *out = T::from_sample(sample);
            }
            for out in &mut chunk[len..] {
                *out = T::from_sample(0.0f32);
            }
        }
    }
}
