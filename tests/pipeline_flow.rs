#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Playback arbitration and unlock behaviour through the public pipeline API.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;
use visage::audio::pcm::{encode_base64_chunk, sample_to_f32};
use visage::audio::{AudioUnlock, Gesture, NullSink, StreamState};
use visage::pipeline::messages::PipelineCommand;
use visage::{AgentEvent, AvatarConfig, AvatarPipeline, RuntimeEvent};

fn config() -> AvatarConfig {
    let mut config = AvatarConfig::default();
    config.audio.sample_rate = 1000;
    config.audio.min_start_ms = 10;
    config
}

fn chunk(stream_id: &str, value: i16, n: usize) -> AgentEvent {
    AgentEvent::AudioChunk {
        stream_id: stream_id.into(),
        chunk_base64: encode_base64_chunk(&vec![value; n]),
    }
}

fn lifecycle(rx: &mut broadcast::Receiver<RuntimeEvent>) -> Vec<RuntimeEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if !matches!(event, RuntimeEvent::AudioLevel { .. }) {
            out.push(event);
        }
    }
    out
}

#[test]
fn only_the_newest_stream_is_heard() {
    let mut pipeline = AvatarPipeline::new(config(), Arc::new(AudioUnlock::unlocked()));
    let mut rx = pipeline.subscribe();
    let monitor = pipeline.monitor();

    pipeline.handle_agent_event(chunk("a", 1000, 20));
    pipeline.handle_agent_event(chunk("a", 1000, 20));
    pipeline.handle_agent_event(chunk("b", 2000, 20));
    pipeline.handle_agent_event(chunk("a", 3000, 20));
    assert_eq!(pipeline.active_stream(), Some("a"));

    let mut out = vec![0.0_f32; 40];
    monitor.render(&mut out);
    let expected = sample_to_f32(3000);
    assert!(out[..20].iter().all(|s| (*s - expected).abs() < 1e-6));
    assert!(out[20..].iter().all(|s| *s == 0.0));

    pipeline.drain_playback_events();
    let seen = lifecycle(&mut rx);
    assert!(seen.contains(&RuntimeEvent::StreamPreempted {
        previous: "a".into(),
        stream_id: "b".into()
    }));
    assert!(seen.contains(&RuntimeEvent::StreamPreempted {
        previous: "b".into(),
        stream_id: "a".into()
    }));
}

#[test]
fn stale_completion_leaves_active_stream_alone() {
    let mut pipeline = AvatarPipeline::new(config(), Arc::new(AudioUnlock::unlocked()));
    pipeline.handle_agent_event(chunk("a", 1000, 20));
    pipeline.handle_agent_event(chunk("b", 1000, 20));
    pipeline.handle_agent_event(AgentEvent::AudioComplete {
        stream_id: "a".into(),
    });
    assert_eq!(pipeline.active_stream(), Some("b"));
    assert_eq!(pipeline.monitor().state(), Some(StreamState::Playing));
}

#[tokio::test]
async fn deferred_playback_replays_exactly_once() {
    let sink = NullSink::manual();
    let primes = sink.prime_counter();
    let mut pipeline =
        AvatarPipeline::new(config(), Arc::new(AudioUnlock::new())).with_sink(Box::new(sink));
    let mut rx = pipeline.subscribe();
    let monitor = pipeline.monitor();

    pipeline.handle_agent_event(chunk("u1", 1000, 20));
    pipeline.handle_agent_event(AgentEvent::AudioComplete {
        stream_id: "u1".into(),
    });
    let mut silent = vec![1.0_f32; 20];
    monitor.render(&mut silent);
    assert!(silent.iter().all(|s| *s == 0.0), "nothing plays while locked");

    pipeline
        .handle_command(PipelineCommand::Gesture(Gesture::Touch))
        .await;
    pipeline
        .handle_command(PipelineCommand::Gesture(Gesture::Pointer))
        .await;
    assert_eq!(primes.load(Ordering::SeqCst), 1);

    let mut out = vec![0.0_f32; 40];
    monitor.render(&mut out);
    let heard = out.iter().filter(|s| **s != 0.0).count();
    assert_eq!(heard, 20);

    pipeline.drain_playback_events();
    assert_eq!(pipeline.active_stream(), None);
    let seen = lifecycle(&mut rx);
    let started = seen
        .iter()
        .filter(|e| matches!(e, RuntimeEvent::StreamStarted { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(
        seen.iter()
            .filter(|e| **e == RuntimeEvent::AudioUnlocked)
            .count(),
        1
    );
    assert!(seen.iter().any(|e| matches!(
        e,
        RuntimeEvent::StreamCompleted { stream_id, .. } if stream_id == "u1"
    )));
}

#[test]
fn agent_text_is_logged_in_order() {
    let mut pipeline = AvatarPipeline::new(config(), Arc::new(AudioUnlock::unlocked()));
    pipeline.handle_agent_event(AgentEvent::Said {
        id: None,
        text: "first".into(),
    });
    pipeline.handle_agent_event(chunk("u1", 1000, 20));
    pipeline.handle_agent_event(AgentEvent::Presence { count: 3 });

    let log = pipeline.log();
    assert_eq!(log.len(), 2, "audio chunks are not logged");
    let ids: Vec<u64> = log.since(0).map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(pipeline.presence(), 3);
}
