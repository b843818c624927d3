use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::Parser;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use gemini_live::auxiliary::{AuxOutcome, AuxiliaryTaskCoordinator, GeminiTextClient};
use gemini_live::config::Config;
use gemini_live::playback::{PlaybackSink, PlaybackUnit};
use gemini_live::session::{CaptureDevice, CaptureError};
use gemini_live::transcript::{Message, Role};
use gemini_live::types::audio::INPUT_SAMPLE_RATE;
use gemini_live::{GeminiConnector, SessionEvent, SessionManager};
use gemini_live_utils as utils;
use gemini_live_utils::audio::StreamResampler;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const INPUT_CHUNK_SIZE: usize = 1024;
const OUTPUT_CHUNK_SIZE: usize = 1024;
const OUTPUT_LATENCY_MS: usize = 1000;

/// Talk to a Gemini live model through the default microphone and speakers.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Print the available audio devices and exit.
    #[arg(long)]
    list_devices: bool,
    /// Input device name.
    #[arg(long)]
    input: Option<String>,
    /// Output device name.
    #[arg(long)]
    output: Option<String>,
    /// Do not translate assistant messages.
    #[arg(long)]
    no_bilingual: bool,
    /// Ask for reply suggestions after every assistant message.
    #[arg(long)]
    suggestions: bool,
}

/// Owns the cpal input stream on a thread of its own; streams are not `Send`.
struct MicrophoneCapture {
    device_name: Option<String>,
    worker: Option<(std::sync::mpsc::Sender<()>, std::thread::JoinHandle<()>)>,
}

impl MicrophoneCapture {
    fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: None,
        }
    }
}

fn open_input(
    device_name: Option<&str>,
    frames: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, CaptureError> {
    let input = utils::device::get_or_default_input(device_name)
        .map_err(|e| CaptureError::Unavailable(format!("{:#}", e)))?;
    let default_config = input
        .default_input_config()
        .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
    let input_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    tracing::info!("input: device={:?}, config={:?}", input.name(), &input_config);

    let channels = input_config.channels as usize;
    let mut resampler = StreamResampler::new(
        input_config.sample_rate.0,
        INPUT_SAMPLE_RATE,
        INPUT_CHUNK_SIZE,
    )
    .map_err(|e| CaptureError::Stream(format!("{:#}", e)))?;

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let mono = utils::audio::downmix_to_mono(data, channels);
        let samples = resampler.push(&mono);
        if samples.is_empty() {
            return;
        }
        if let Err(e) = frames.try_send(samples) {
            tracing::warn!("failed to queue captured audio: {}", e);
        }
    };
    let stream = input
        .build_input_stream(
            &input_config,
            input_data_fn,
            move |err| tracing::error!("an error occurred on input stream: {}", err),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::Unavailable(e.to_string())
            }
            other => CaptureError::Stream(other.to_string()),
        })?;
    stream
        .play()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    Ok(stream)
}

impl CaptureDevice for MicrophoneCapture {
    fn acquire(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let device_name = self.device_name.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let worker = std::thread::spawn(move || match open_input(device_name.as_deref(), frames) {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                // Blocks until release drops the sender.
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        });

        ready_rx
            .recv()
            .map_err(|_| CaptureError::Stream("capture thread exited".to_string()))??;
        self.worker = Some((stop_tx, worker));
        Ok(())
    }

    fn release(&mut self) {
        if let Some((stop, worker)) = self.worker.take() {
            drop(stop);
            // Joining waits on cpal teardown; keep it off the session loop.
            tokio::task::spawn_blocking(move || {
                if worker.join().is_err() {
                    tracing::error!("capture thread panicked");
                }
            });
        }
    }
}

/// Resamples scheduled units into the ring buffer the output stream drains.
struct SpeakerSink {
    producer: HeapProd<f32>,
    output_rate: u32,
    resampler: Option<(u32, StreamResampler)>,
    flush: Arc<AtomicBool>,
}

impl PlaybackSink for SpeakerSink {
    fn play(&mut self, unit: &PlaybackUnit) {
        let rate = unit.sample_rate();
        if self.resampler.as_ref().map(|(r, _)| *r) != Some(rate) {
            match StreamResampler::new(rate, self.output_rate, OUTPUT_CHUNK_SIZE) {
                Ok(resampler) => self.resampler = Some((rate, resampler)),
                Err(e) => {
                    tracing::error!("failed to create output resampler: {:#}", e);
                    return;
                }
            }
        }
        let Some((_, resampler)) = self.resampler.as_mut() else {
            return;
        };
        let samples = resampler.push(unit.samples());
        let pushed = self.producer.push_slice(&samples);
        if pushed < samples.len() {
            tracing::warn!("output buffer full, dropped {} samples", samples.len() - pushed);
        }
    }

    fn halt(&mut self) {
        self.flush.store(true, Ordering::Release);
        if let Some((_, resampler)) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

fn open_output(
    device_name: Option<&str>,
) -> anyhow::Result<(cpal::Stream, HeapProd<f32>, u32, Arc<AtomicBool>)> {
    let output = utils::device::get_or_default_output(device_name)?;
    let default_config = output
        .default_output_config()
        .context("failed to get default output config")?;
    let output_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    tracing::info!("output: device={:?}, config={:?}", output.name(), &output_config);

    let output_rate = output_config.sample_rate.0;
    let channels = output_config.channels as usize;
    let buffer = utils::audio::shared_buffer(output_rate as usize * OUTPUT_LATENCY_MS / 1000);
    let (producer, mut consumer): (HeapProd<f32>, HeapCons<f32>) = buffer.split();
    let flush = Arc::new(AtomicBool::new(false));

    let flush_requested = flush.clone();
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        if flush_requested.swap(false, Ordering::Acquire) {
            consumer.clear();
        }
        for frame in data.chunks_mut(channels) {
            let sample = consumer.try_pop().unwrap_or(0.0);
            utils::audio::fan_out(sample, frame);
        }
    };
    let stream = output
        .build_output_stream(
            &output_config,
            output_data_fn,
            move |err| tracing::error!("an error occurred on output stream: {}", err),
            None,
        )
        .context("failed to build output stream")?;
    stream.play().context("failed to play output stream")?;
    Ok((stream, producer, output_rate, flush))
}

fn print_message(message: &Message) {
    let speaker = match message.role() {
        Role::User => "you",
        Role::Assistant => "gemini",
    };
    println!("[{}] {}: {}", message.id(), speaker, message.text());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.as_str().to_lowercase()))
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    if args.list_devices {
        println!("Available inputs: {}", utils::device::get_available_inputs()?);
        println!("Available outputs: {}", utils::device::get_available_outputs()?);
        return Ok(());
    }

    let (_output_stream, producer, output_rate, flush) = open_output(args.output.as_deref())?;
    let sink = SpeakerSink {
        producer,
        output_rate,
        resampler: None,
        flush,
    };

    let (manager, session, mut events) = SessionManager::builder(config.session_config())
        .with_policy(config.reconnect)
        .build(
            Box::new(GeminiConnector::new(config.client_config())),
            Box::new(MicrophoneCapture::new(args.input.clone())),
            Box::new(sink),
        );
    let session_loop = tokio::spawn(manager.run());

    let mut settings = config.aux_settings();
    settings.bilingual = !args.no_bilingual;
    let settings = Arc::new(RwLock::new(settings));
    let (coordinator, mut outcomes) = match &config.api_key {
        Some(api_key) => {
            let generator = GeminiTextClient::new(api_key.clone(), &config.text_model);
            let (coordinator, outcomes) = AuxiliaryTaskCoordinator::new(Arc::new(generator), settings);
            (Some(coordinator), outcomes)
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    session.start().await?;
    println!("Listening. Press Ctrl-C to stop.");

    let mut status = session.status();
    let mut history: Vec<Message> = Vec::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.stop().await?;
                break;
            }
            Ok(()) = status.changed() => {
                println!("status: {}", *status.borrow_and_update());
            }
            Some(event) = events.recv() => match event {
                SessionEvent::Message(message) => {
                    print_message(&message);
                    if let Some(coordinator) = &coordinator {
                        coordinator.on_message(&message);
                        if args.suggestions && message.role() == Role::Assistant {
                            coordinator.suggest(&history, None);
                        }
                    }
                    history.push(message);
                }
                SessionEvent::Retrying { attempt, max, reason } => {
                    println!("connection lost ({}), reconnecting {}/{}", reason, attempt, max);
                }
                SessionEvent::Error(e) => {
                    eprintln!("{}", e);
                    break;
                }
            },
            Some(outcome) = outcomes.recv() => match outcome {
                AuxOutcome::Translation { message, text } => {
                    if let Some(entry) = history.iter_mut().find(|m| m.id() == message) {
                        entry.attach_translation(text.clone());
                    }
                    println!("[{}] translation: {}", message, text);
                }
                AuxOutcome::Suggestions(suggestions) => {
                    for suggestion in suggestions {
                        println!("  {:?}: {} / {}", suggestion.label, suggestion.target, suggestion.native);
                    }
                }
                AuxOutcome::Failed { task, error } => {
                    tracing::warn!("{:?} failed: {}", task, error);
                }
            },
        }
    }

    println!("stats: {:?}", session.stats());
    drop(session);
    session_loop.await.context("session loop panicked")?;
    Ok(())
}
