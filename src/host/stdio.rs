//! Stdin/stdout NDJSON bridge for the avatar host.
//!
//! Reads agent events and UI commands as newline-delimited JSON from stdin,
//! feeds them to the [`AvatarPipeline`], and writes runtime events and
//! outbound dispatches as [`EventEnvelope`] lines to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::audio::unlock::AudioUnlock;
use crate::config::AvatarConfig;
use crate::error::{AvatarError, Result};
use crate::events::AgentEvent;
use crate::host::contract::{EventEnvelope, Inbound, parse_inbound};
use crate::pipeline::coordinator::AvatarPipeline;
use crate::pipeline::messages::PipelineCommand;
use crate::scene::MemoryScene;
use crate::session::ChannelDispatcher;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Agent event channel capacity between the reader and the pipeline.
const AGENT_EVENT_CAPACITY: usize = 256;

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Run the bridge on the process's stdin and stdout until stdin closes and
/// queued speech has played out, or until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the scene cannot be loaded, the audio output cannot
/// be opened, or stdin/stdout fail.
pub async fn run_stdio_bridge(config: AvatarConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; shutting down");
            ctrl_c.cancel();
        }
    });
    run_bridge(
        config,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        cancel,
    )
    .await
}

/// Run the bridge over arbitrary line input and output.
///
/// Four tasks cooperate:
///
/// 1. **Reader** -- parses inbound lines and routes agent events and UI
///    commands into the pipeline; rejected lines are answered with a
///    `host.error` envelope.
/// 2. **Pipeline** -- arbitration, playback and dispatch.
/// 3. **Frame loop** -- animator and idle sequencer at `render.frame_rate`.
/// 4. **Forwarder** -- writes runtime events and dispatches to the output.
///
/// # Errors
///
/// Returns an error if the scene cannot be loaded, the audio output cannot
/// be opened, or reading/writing fails.
pub async fn run_bridge<R, W>(
    config: AvatarConfig,
    input: R,
    output: W,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let scene = match &config.render.scene_path {
        Some(path) => MemoryScene::load(path)?,
        None => MemoryScene::default(),
    };

    let (dispatcher, dispatch_rx) = ChannelDispatcher::new();
    let pipeline = AvatarPipeline::new(config.clone(), Arc::new(AudioUnlock::new()))
        .with_dispatcher(Arc::new(dispatcher))
        .with_output()?;
    let frames = pipeline.frame_loop(scene);
    let runtime_rx = pipeline.subscribe();
    let pipeline_cancel = pipeline.cancel_token();

    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::new(output)));

    let forward_handle = tokio::spawn(forward_events(
        runtime_rx,
        dispatch_rx,
        Arc::clone(&writer),
    ));

    let frame_cancel = CancellationToken::new();
    let frame_handle = tokio::spawn(frames.run(config.render.frame_rate, frame_cancel.clone()));

    let (agent_tx, agent_rx) = mpsc::channel::<AgentEvent>(AGENT_EVENT_CAPACITY);
    let (command_tx, command_rx) = mpsc::unbounded_channel::<PipelineCommand>();
    let pipeline_handle = tokio::spawn(pipeline.run(agent_rx, command_rx));

    let reader_result = tokio::select! {
        result = run_reader(input, agent_tx, command_tx, Arc::clone(&writer)) => result,
        () = cancel.cancelled() => Ok(()),
    };
    if cancel.is_cancelled() {
        pipeline_cancel.cancel();
    }

    let pipeline_result = tokio::select! {
        joined = pipeline_handle => joined
            .map_err(|e| AvatarError::Channel(format!("pipeline task failed: {e}")))
            .and_then(|r| r),
        () = cancel.cancelled() => {
            pipeline_cancel.cancel();
            Ok(())
        }
    };

    // The frame loop and the pipeline hold the last runtime senders; once
    // both are gone the forwarder drains and exits.
    frame_cancel.cancel();
    let _ = frame_handle.await;
    let _ = forward_handle.await;

    reader_result.and(pipeline_result)
}

/// Read lines, route them, and answer rejected lines on the output.
async fn run_reader<R, W>(
    mut input: R,
    agent_tx: mpsc::Sender<AgentEvent>,
    command_tx: mpsc::UnboundedSender<PipelineCommand>,
    writer: SharedWriter<W>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    let mut rejected: u64 = 0;

    loop {
        line.clear();
        let bytes_read = input
            .read_line(&mut line)
            .await
            .map_err(|e| AvatarError::Channel(format!("failed to read from stdin: {e}")))?;

        // EOF
        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); draining avatar pipeline");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_inbound(trimmed) {
            Ok(Inbound::Agent(event)) => {
                if agent_tx.send(event).await.is_err() {
                    tracing::warn!("pipeline stopped; no longer reading stdin");
                    break;
                }
            }
            Ok(Inbound::Command(command)) => {
                if command_tx.send(command).is_err() {
                    tracing::warn!("pipeline stopped; no longer reading stdin");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "rejected inbound line");
                rejected += 1;
                let envelope = EventEnvelope::error(format!("rejected-{rejected}"), &e);
                write_envelope(&writer, &envelope).await?;
            }
        }
    }

    Ok(())
}

/// Forward runtime events and dispatches until both sources close.
async fn forward_events<W: AsyncWrite + Unpin>(
    mut runtime_rx: broadcast::Receiver<crate::runtime::RuntimeEvent>,
    mut dispatch_rx: mpsc::UnboundedReceiver<crate::session::UserSaid>,
    writer: SharedWriter<W>,
) {
    let mut runtime_open = true;
    let mut dispatch_open = true;

    while runtime_open || dispatch_open {
        let envelope = tokio::select! {
            event = runtime_rx.recv(), if runtime_open => match event {
                Ok(event) => EventEnvelope::from_runtime(uuid::Uuid::new_v4().to_string(), &event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    runtime_open = false;
                    continue;
                }
            },
            message = dispatch_rx.recv(), if dispatch_open => match message {
                Some(message) => EventEnvelope::dispatch(uuid::Uuid::new_v4().to_string(), &message),
                None => {
                    dispatch_open = false;
                    continue;
                }
            },
        };

        match envelope {
            Ok(envelope) => {
                if let Err(e) = write_envelope(&writer, &envelope).await {
                    tracing::warn!(error = %e, "failed to write event to stdout; stopping event forwarder");
                    break;
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize event; skipping"),
        }
    }
}

async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    envelope: &EventEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(envelope)?;
    let mut w = writer.lock().await;
    write_line(&mut w, &json).await
}

/// Write a single JSON line to the buffered writer and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut BufWriter<W>, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| AvatarError::Channel(format!("failed to write to stdout: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| AvatarError::Channel(format!("failed to write newline to stdout: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| AvatarError::Channel(format!("failed to flush stdout: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::host::contract::ERROR_EVENT;

    #[tokio::test]
    async fn rejected_lines_are_answered() {
        let (agent_tx, _agent_rx) = mpsc::channel(4);
        let (command_tx, _command_rx) = mpsc::unbounded_channel();
        let (mut client, server) = tokio::io::duplex(4096);
        let writer = Arc::new(Mutex::new(BufWriter::new(server)));

        let input: &[u8] = b"{\"kind\":\"moonwalk\"}\n\n";
        run_reader(input, agent_tx, command_tx, writer).await.unwrap();

        let mut out = String::new();
        let mut reader = BufReader::new(&mut client);
        reader.read_line(&mut out).await.unwrap();
        let envelope: EventEnvelope = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(envelope.event, ERROR_EVENT);
    }

    #[tokio::test]
    async fn reader_routes_events_and_commands() {
        let (agent_tx, mut agent_rx) = mpsc::channel(4);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (_client, server) = tokio::io::duplex(4096);
        let writer = Arc::new(Mutex::new(BufWriter::new(server)));

        let input: &[u8] =
            b"{\"kind\":\"presence\",\"count\":2}\n{\"kind\":\"stop\"}\n";
        run_reader(input, agent_tx, command_tx, writer).await.unwrap();

        assert_eq!(agent_rx.recv().await, Some(AgentEvent::Presence { count: 2 }));
        assert_eq!(command_rx.recv().await, Some(PipelineCommand::Stop));
    }
}
