//! Asynchronous engine behaviour: batching, ordering, failure policy,
//! flush semantics, pool conservation.

mod common;

use std::time::Duration;

use common::{drain, make_frame, StubConfig, StubModel};
use vidnn_core::{DataType, InferError, InferParams, PixelFormat};
use vidnn_dnn::{InferenceEngine, PollStatus};

fn params(async_infer: bool, nireq: usize, batch_size: usize) -> InferParams {
    let mut params = InferParams::new("stub.model", "x", "y");
    params.async_infer = async_infer;
    params.nireq = nireq;
    params.batch_size = batch_size;
    params
}

fn ready_pts(results: &[Result<vidnn_core::VideoFrame, i64>]) -> Vec<i64> {
    results
        .iter()
        .map(|r| match r {
            Ok(frame) => frame.pts,
            Err(pts) => *pts,
        })
        .collect()
}

#[test]
fn batch_saturation_preserves_submission_order() {
    // nireq=2, batch_size=4, 9 frames: two full batches plus a remainder
    // that only the flush dispatches.
    let model = Box::new(StubModel::identity(DataType::Float32, 1));
    let engine =
        InferenceEngine::new(model, &params(true, 2, 4), PixelFormat::GrayF32, 8, 8).unwrap();

    for pts in 0..9 {
        engine
            .submit(make_frame(PixelFormat::GrayF32, 8, 8, pts))
            .unwrap();
    }
    engine.flush();

    let results = drain(&engine);
    assert_eq!(ready_pts(&results), (0..9).collect::<Vec<_>>());
    for (pts, result) in results.iter().enumerate() {
        let out = result.as_ref().expect("frame should be delivered");
        let reference = make_frame(PixelFormat::GrayF32, 8, 8, pts as i64);
        assert_eq!(out.plane(0), reference.plane(0), "payload for pts {pts}");
    }
    assert!(engine.is_empty());
    assert_eq!(engine.idle_requests(), 2, "pool must be whole after flush");
}

#[test]
fn out_of_order_completions_deliver_in_order() {
    // Even-numbered dispatches finish 20 ms late; output order must not care.
    let model = Box::new(StubModel::new(StubConfig {
        delay: Some(Box::new(|ordinal| {
            if ordinal % 2 == 0 {
                Duration::from_millis(20)
            } else {
                Duration::ZERO
            }
        })),
        ..StubConfig::default()
    }));
    let engine =
        InferenceEngine::new(model, &params(true, 4, 1), PixelFormat::GrayF32, 8, 8).unwrap();

    for pts in 0..8 {
        engine
            .submit(make_frame(PixelFormat::GrayF32, 8, 8, pts))
            .unwrap();
    }
    engine.flush();

    let results = drain(&engine);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(ready_pts(&results), (0..8).collect::<Vec<_>>());
}

#[test]
fn midstream_dispatch_failure_drops_only_that_frame() {
    // The third dispatch fails at submission time; pts 2 comes back as a
    // gap at its position and the stream continues.
    let model = Box::new(StubModel::new(StubConfig {
        fail_dispatch_at: Some(2),
        ..StubConfig::default()
    }));
    let engine =
        InferenceEngine::new(model, &params(true, 1, 1), PixelFormat::GrayF32, 8, 8).unwrap();

    for pts in 0..6 {
        engine
            .submit(make_frame(PixelFormat::GrayF32, 8, 8, pts))
            .unwrap();
    }
    engine.flush();

    let results = drain(&engine);
    assert_eq!(results.len(), 6);
    for (i, result) in results.iter().enumerate() {
        if i == 2 {
            assert_eq!(*result.as_ref().unwrap_err(), 2);
        } else {
            assert_eq!(result.as_ref().unwrap().pts, i as i64);
        }
    }
    let metrics = engine.metrics();
    assert!(metrics.validate());
    assert_eq!(
        metrics
            .frames_dropped
            .load(std::sync::atomic::Ordering::Acquire),
        1
    );
}

#[test]
fn callback_time_failure_drops_the_whole_batch() {
    // Second dispatched batch (pts 2 and 3) fails on the worker thread.
    let model = Box::new(StubModel::new(StubConfig {
        fail_execution_at: Some(1),
        ..StubConfig::default()
    }));
    let engine =
        InferenceEngine::new(model, &params(true, 2, 2), PixelFormat::GrayF32, 8, 8).unwrap();

    for pts in 0..6 {
        engine
            .submit(make_frame(PixelFormat::GrayF32, 8, 8, pts))
            .unwrap();
    }
    engine.flush();

    let results = drain(&engine);
    let outcome: Vec<bool> = results.iter().map(|r| r.is_ok()).collect();
    assert_eq!(outcome, [true, true, false, false, true, true]);
    assert_eq!(ready_pts(&results), (0..6).collect::<Vec<_>>());
    assert_eq!(engine.idle_requests(), 2);
}

#[test]
fn submit_returns_immediately_when_every_slot_is_dispatched() {
    // One slot, slow completions: after the first dispatch the pool is
    // empty, and further submits must queue instead of waiting for the
    // callback.
    let model = Box::new(StubModel::new(StubConfig {
        delay: Some(Box::new(|_| Duration::from_millis(150))),
        ..StubConfig::default()
    }));
    let engine =
        InferenceEngine::new(model, &params(true, 1, 1), PixelFormat::GrayF32, 8, 8).unwrap();

    let start = std::time::Instant::now();
    for pts in 0..4 {
        engine
            .submit(make_frame(PixelFormat::GrayF32, 8, 8, pts))
            .unwrap();
    }
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "submit must not wait for a free slot"
    );

    engine.flush();
    let results = drain(&engine);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(ready_pts(&results), (0..4).collect::<Vec<_>>());
    assert!(engine.is_empty());
    assert_eq!(engine.idle_requests(), 1);
}

#[test]
fn sync_and_async_modes_produce_identical_streams() {
    let frames: Vec<_> = (0..10)
        .map(|pts| make_frame(PixelFormat::Gray8, 12, 10, pts))
        .collect();

    let sync_model = Box::new(StubModel::identity_sync(DataType::Uint8, 1));
    let sync_engine =
        InferenceEngine::new(sync_model, &params(false, 1, 1), PixelFormat::Gray8, 12, 10).unwrap();
    for frame in &frames {
        sync_engine.submit(frame.clone()).unwrap();
    }
    let reference = drain(&sync_engine);
    assert_eq!(reference.len(), 10);

    for (nireq, batch_size) in [(1, 1), (2, 4), (3, 2)] {
        let model = Box::new(StubModel::identity(DataType::Uint8, 1));
        let engine = InferenceEngine::new(
            model,
            &params(true, nireq, batch_size),
            PixelFormat::Gray8,
            12,
            10,
        )
        .unwrap();
        for frame in &frames {
            engine.submit(frame.clone()).unwrap();
        }
        engine.flush();
        let results = drain(&engine);
        assert_eq!(results.len(), reference.len(), "nireq={nireq} batch={batch_size}");
        for (a, b) in results.iter().zip(&reference) {
            let (a, b) = (a.as_ref().unwrap(), b.as_ref().unwrap());
            assert_eq!(a.pts, b.pts);
            assert_eq!(a.data, b.data);
        }
    }
}

#[test]
fn flush_is_idempotent_and_delivers_partial_batches() {
    let model = Box::new(StubModel::identity(DataType::Float32, 1));
    let engine =
        InferenceEngine::new(model, &params(true, 2, 4), PixelFormat::GrayF32, 8, 8).unwrap();

    for pts in 0..3 {
        engine
            .submit(make_frame(PixelFormat::GrayF32, 8, 8, pts))
            .unwrap();
    }
    engine.flush();
    engine.flush();

    let results = drain(&engine);
    assert_eq!(ready_pts(&results), vec![0, 1, 2]);
    engine.flush();
    assert!(engine.is_empty());
    assert!(matches!(engine.poll(), PollStatus::Empty));
}

#[test]
fn super_resolution_doubles_geometry_and_keeps_pts() {
    let model = Box::new(StubModel::new(StubConfig {
        fixed_size: Some((320, 240)),
        scale: 2,
        ..StubConfig::default()
    }));
    let engine =
        InferenceEngine::new(model, &params(true, 1, 1), PixelFormat::GrayF32, 320, 240).unwrap();
    assert_eq!(engine.output_size(), (640, 480));

    let mut frame = make_frame(PixelFormat::GrayF32, 320, 240, 77);
    frame.metadata.insert("source".into(), "cam0".into());
    engine.submit(frame).unwrap();
    engine.flush();

    match engine.poll() {
        PollStatus::Ready(out) => {
            assert_eq!((out.width, out.height), (640, 480));
            assert_eq!(out.format, PixelFormat::GrayF32);
            assert_eq!(out.pts, 77);
            assert_eq!(out.metadata.get("source").map(String::as_str), Some("cam0"));
        }
        _ => panic!("expected one output frame"),
    }
}

#[test]
fn async_request_falls_back_to_sync_when_unsupported() {
    let model = Box::new(StubModel::identity_sync(DataType::Float32, 1));
    let engine =
        InferenceEngine::new(model, &params(true, 4, 4), PixelFormat::GrayF32, 8, 8).unwrap();
    // No pool in sync fallback.
    assert_eq!(engine.idle_requests(), 0);

    engine
        .submit(make_frame(PixelFormat::GrayF32, 8, 8, 0))
        .unwrap();
    // Sync mode completes on the submitting thread; no flush needed.
    assert!(matches!(engine.poll(), PollStatus::Ready(_)));
    assert!(engine.is_empty());
}

#[test]
fn channel_mismatch_is_rejected_at_configuration() {
    let model = Box::new(StubModel::identity(DataType::Float32, 1));
    let err = InferenceEngine::new(model, &params(true, 1, 1), PixelFormat::Rgb24, 8, 8)
        .unwrap_err();
    assert!(matches!(err, InferError::ChannelMismatch { channels: 1, .. }));
    assert_eq!(err.error_code(), 101);
}
