// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pipelines on the system clock. Timing assertions use generous tolerances.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use streamsync::prelude::*;
use streamsync::{
    LatePolicy, LeakyPolicy, PipelineContext, QueueConfig, SyncSinkConfig, TestSourceConfig,
};

fn add_chain(
    pipeline: &Pipeline,
    source: TestSourceConfig,
    queue: QueueConfig,
    sink: SyncSinkConfig,
) -> (Arc<Queue>, Arc<SyncSink>, Arc<RecordingRenderer>) {
    let ctx: PipelineContext = pipeline.context().clone();
    let renderer = RecordingRenderer::new();
    let queue = Queue::new("queue", queue, &ctx);
    let sink = SyncSink::new("sink", sink, renderer.clone(), &ctx);

    pipeline
        .add(TestSource::new("src", source, &ctx).unwrap())
        .unwrap();
    pipeline.add(queue.clone()).unwrap();
    pipeline.add(sink.clone()).unwrap();
    pipeline.link_many(&["src", "queue", "sink"]).unwrap();
    (queue, sink, renderer)
}

#[test]
fn buffers_render_no_earlier_than_their_running_time() {
    let pipeline = Pipeline::new("realtime");
    let (_queue, sink, renderer) = add_chain(
        &pipeline,
        TestSourceConfig {
            fps: 20.0,
            num_buffers: Some(6),
            payload_size: 8,
            ..Default::default()
        },
        QueueConfig::default(),
        SyncSinkConfig {
            max_lateness: None,
            ..Default::default()
        },
    );

    let started = Instant::now();
    pipeline.set_state(State::Playing).unwrap();
    assert!(wait_for_eos(pipeline.bus(), TIMEOUT));
    let elapsed = started.elapsed();

    // Six frames at 20 fps: the last one is due 250 ms after base time.
    assert!(elapsed >= Duration::from_millis(240), "finished too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "finished too late: {elapsed:?}");

    let rendered = renderer.rendered.lock().clone();
    assert_eq!(rendered.len(), 6);
    for frame in &rendered {
        let due = frame.pts.unwrap().as_duration();
        let at = frame.at.duration_since(started);
        assert!(
            at + Duration::from_millis(10) >= due,
            "frame {:?} rendered at {at:?}, due {due:?}",
            frame.offset
        );
    }
    assert_eq!(sink.stats().rendered, 6);

    pipeline.set_state(State::Stopped).unwrap();
}

#[test]
fn sync_disabled_renders_as_fast_as_possible() {
    let pipeline = Pipeline::new("unsynced");
    let (_queue, sink, renderer) = add_chain(
        &pipeline,
        TestSourceConfig {
            fps: 1.0,
            num_buffers: Some(5),
            payload_size: 8,
            ..Default::default()
        },
        QueueConfig::default(),
        SyncSinkConfig {
            sync: false,
            ..Default::default()
        },
    );

    let started = Instant::now();
    pipeline.set_state(State::Playing).unwrap();
    // Five seconds of stream time, rendered without waiting.
    assert!(wait_for_eos(pipeline.bus(), Duration::from_secs(2)));
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(renderer.rendered.lock().len(), 5);
    let stats = sink.stats();
    assert_eq!(stats.rendered, 5);
    assert_eq!(stats.total_wait, ClockTime::ZERO);

    pipeline.set_state(State::Stopped).unwrap();
}

#[test]
fn leaky_queue_drops_oldest_and_marks_discont() {
    let pipeline = Pipeline::new("leaky");
    let (queue, sink, renderer) = add_chain(
        &pipeline,
        TestSourceConfig {
            fps: 100.0,
            num_buffers: Some(50),
            payload_size: 8,
            ..Default::default()
        },
        QueueConfig {
            max_count: 5,
            max_bytes: 0,
            max_time: None,
            leaky: LeakyPolicy::Downstream,
        },
        SyncSinkConfig {
            max_lateness: None,
            late_policy: LatePolicy::Render,
            ..Default::default()
        },
    );

    pipeline.set_state(State::Playing).unwrap();
    let mut overrun = false;
    let eos = pipeline
        .bus()
        .timed_pop_filtered(TIMEOUT, |m| {
            overrun |= matches!(m, BusMessage::Overrun { .. });
            matches!(m, BusMessage::Eos { .. })
        })
        .is_some();
    assert!(eos);
    assert!(overrun);

    let stats = queue.stats();
    assert!(stats.dropped > 0);
    assert_eq!(stats.pushed, stats.popped + stats.dropped);

    let rendered = renderer.rendered.lock().clone();
    assert_eq!(rendered.len() as u64, stats.popped);
    assert_eq!(sink.stats().rendered, stats.popped);

    // Survivors keep their order; a gap is flagged on the buffer after it.
    let offsets: Vec<u64> = rendered.iter().filter_map(|r| r.offset).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    for pair in rendered.windows(2) {
        let (prev, next) = (pair[0].offset.unwrap(), pair[1].offset.unwrap());
        if next != prev + 1 {
            assert!(
                pair[1].flags.contains(BufferFlags::DISCONT),
                "gap {prev} -> {next} without DISCONT"
            );
        }
    }

    pipeline.set_state(State::Stopped).unwrap();
}
