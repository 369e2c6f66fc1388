//! Audio output sinks.
//!
//! A sink owns the device side of playback. It pulls samples from a
//! [`PlaybackMonitor`] on its own clock; the only thing the player asks of it
//! is [`AudioSink::prime`], the silent first play used to unlock audio.

use crate::audio::player::PlaybackMonitor;
use crate::config::{AudioConfig, OutputBackend};
use crate::error::{AvatarError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Device side of streaming playback.
pub trait AudioSink: Send {
    /// Start the output at zero volume. Called once, from the unlock gate.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be started.
    fn prime(&mut self) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Open the sink selected by `config.output`, rendering from `monitor`.
///
/// # Errors
///
/// Returns an error if the cpal device thread cannot be spawned.
pub fn open_sink(config: &AudioConfig, monitor: PlaybackMonitor) -> Result<Box<dyn AudioSink>> {
    match config.output {
        OutputBackend::Cpal => Ok(Box::new(CpalOutput::new(config, monitor)?)),
        OutputBackend::Null => Ok(Box::new(NullSink::realtime(monitor, config.sample_rate))),
    }
}

enum DeviceCommand {
    Prime(crossbeam_channel::Sender<Result<()>>),
    Shutdown,
}

/// Audio output to system speakers via cpal.
///
/// The cpal stream lives on a dedicated thread so the sink itself stays
/// `Send`; the stream is only built when the sink is primed.
pub struct CpalOutput {
    cmd_tx: crossbeam_channel::Sender<DeviceCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Create a cpal sink that renders from `monitor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device thread cannot be spawned.
    pub fn new(config: &AudioConfig, monitor: PlaybackMonitor) -> Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<DeviceCommand>();
        let config = config.clone();
        let thread = std::thread::Builder::new()
            .name("visage-output".into())
            .spawn(move || run_device_thread(&config, &monitor, &cmd_rx))?;
        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }
}

impl AudioSink for CpalOutput {
    fn prime(&mut self) -> Result<()> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(DeviceCommand::Prime(reply_tx))
            .map_err(|e| AvatarError::Channel(format!("output thread gone: {e}")))?;
        reply_rx
            .recv()
            .map_err(|e| AvatarError::Channel(format!("output thread dropped reply: {e}")))?
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(DeviceCommand::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("output thread panicked");
        }
    }
}

fn run_device_thread(
    config: &AudioConfig,
    monitor: &PlaybackMonitor,
    cmd_rx: &crossbeam_channel::Receiver<DeviceCommand>,
) {
    let mut stream: Option<cpal::Stream> = None;
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            DeviceCommand::Prime(reply) => {
                let outcome = match stream.as_ref() {
                    Some(s) => s
                        .play()
                        .map_err(|e| AvatarError::Audio(format!("failed to resume output: {e}"))),
                    None => open_stream(config, monitor.clone()).map(|s| {
                        stream = Some(s);
                    }),
                };
                let _ = reply.send(outcome);
            }
            DeviceCommand::Shutdown => break,
        }
    }
    drop(stream);
}

fn open_stream(config: &AudioConfig, monitor: PlaybackMonitor) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(ref name) = config.output_device {
        host.output_devices()
            .map_err(|e| AvatarError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| AvatarError::Audio(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| AvatarError::Audio("no default output device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: config.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                monitor.render(data);
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| AvatarError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| AvatarError::Audio(format!("failed to start output stream: {e}")))?;
    Ok(stream)
}

/// Deviceless sink.
///
/// [`NullSink::manual`] does nothing on prime; the caller pulls samples
/// through [`PlaybackMonitor::render`] itself (tests, offline tools).
/// [`NullSink::realtime`] starts a thread that consumes audio at the
/// configured sample rate, standing in for a device on headless hosts.
pub struct NullSink {
    primes: Arc<AtomicUsize>,
    clock: Option<(PlaybackMonitor, u32)>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NullSink {
    #[must_use]
    pub fn manual() -> Self {
        Self {
            primes: Arc::new(AtomicUsize::new(0)),
            clock: None,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    #[must_use]
    pub fn realtime(monitor: PlaybackMonitor, sample_rate: u32) -> Self {
        let mut sink = Self::manual();
        sink.clock = Some((monitor, sample_rate));
        sink
    }

    /// Shared counter of prime calls.
    #[must_use]
    pub fn prime_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.primes)
    }
}

impl AudioSink for NullSink {
    fn prime(&mut self) -> Result<()> {
        self.primes.fetch_add(1, Ordering::SeqCst);
        let Some((monitor, sample_rate)) = self.clock.clone() else {
            return Ok(());
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let running = Arc::clone(&self.running);
        let thread = std::thread::Builder::new()
            .name("visage-null-output".into())
            .spawn(move || {
                const TICK: Duration = Duration::from_millis(10);
                let block = (sample_rate as usize / 100).max(1);
                let mut buf = vec![0.0_f32; block];
                let mut next = Instant::now();
                while running.load(Ordering::SeqCst) {
                    monitor.render(&mut buf);
                    next += TICK;
                    if let Some(wait) = next.checked_duration_since(Instant::now()) {
                        std::thread::sleep(wait);
                    }
                }
            })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

impl Drop for NullSink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::audio::player::StreamingPlayer;
    use crate::audio::stream::StreamState;
    use crate::audio::unlock::AudioUnlock;

    fn audio_config() -> AudioConfig {
        AudioConfig {
            sample_rate: 1000,
            min_start_ms: 10,
            output: OutputBackend::Null,
            ..AudioConfig::default()
        }
    }

    #[test]
    fn realtime_sink_plays_out_after_prime() {
        let config = audio_config();
        let mut player = StreamingPlayer::new(&config, Arc::new(AudioUnlock::new()), None);
        let mut sink = NullSink::realtime(player.monitor(), config.sample_rate);
        let primes = sink.prime_counter();

        player.enqueue("u1", &[500_i16; 50]);
        player.complete("u1");
        assert_eq!(player.state(), Some(StreamState::Buffering));

        sink.prime().unwrap();
        sink.prime().unwrap();
        assert_eq!(primes.load(Ordering::SeqCst), 2);
        player.gate().unlock_with(|| Ok(())).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while player.state() != Some(StreamState::Completed) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(player.state(), Some(StreamState::Completed));
        assert!((player.elapsed_secs() - 0.05).abs() < 1e-9);
        drop(sink);
    }

    #[test]
    fn manual_sink_only_counts_primes() {
        let mut sink = NullSink::manual();
        let primes = sink.prime_counter();
        sink.prime().unwrap();
        assert_eq!(primes.load(Ordering::SeqCst), 1);
        assert!(sink.thread.is_none());
        assert_eq!(sink.name(), "null");
    }

    #[test]
    fn null_backend_opens_without_a_device() {
        let config = audio_config();
        let player = StreamingPlayer::new(&config, Arc::new(AudioUnlock::unlocked()), None);
        let sink = open_sink(&config, player.monitor()).unwrap();
        assert_eq!(sink.name(), "null");
    }
}
