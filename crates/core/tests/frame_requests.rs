//! End-to-end frame requests through `ClipSession` against the synthetic engine.
//!
//! Every test drives the full path: dispatcher, read job, callback handler,
//! decode job and completion signal, on the engine's own worker threads.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use rawbridge_core::engine::domain::decode_engine::DecodeEngine;
use rawbridge_core::engine::infrastructure::synthetic_engine::{
    FailurePlan, FailureStage, SyntheticEngine, SyntheticEngineConfig,
};
use rawbridge_core::request::frame_error::FrameError;
use rawbridge_core::session::clip_session::ClipSession;
use rawbridge_core::session::session_config::SessionConfig;
use rawbridge_core::shared::resource_format::ResourceFormat;

const WIDTH: u32 = 16;
const HEIGHT: u32 = 9;
const FRAMES: u64 = 10;

fn engine(failures: FailurePlan) -> Arc<SyntheticEngine> {
    Arc::new(SyntheticEngine::new(SyntheticEngineConfig {
        width: WIDTH,
        height: HEIGHT,
        frame_count: FRAMES,
        worker_threads: 3,
        failures,
        ..SyntheticEngineConfig::default()
    }))
}

fn open(engine: &Arc<SyntheticEngine>, bit_depth: u32, config: SessionConfig) -> ClipSession {
    let engine: Arc<dyn DecodeEngine> = engine.clone();
    ClipSession::open(engine, "A001_C002.braw", bit_depth, config).unwrap()
}

fn assert_all_jobs_released(engine: &SyntheticEngine) {
    engine.flush_jobs();
    let stats = engine.stats();
    assert_eq!(stats.jobs_pending, 0);
    assert_eq!(
        stats.jobs_created, stats.jobs_released,
        "every created job is released exactly once: {stats:?}"
    );
}

#[rstest]
#[case::bgra(8, ResourceFormat::BgraU8)]
#[case::planar_u16(16, ResourceFormat::RgbU16Planar)]
#[case::planar_f32(32, ResourceFormat::RgbF32Planar)]
fn test_every_frame_round_trips(#[case] bit_depth: u32, #[case] format: ResourceFormat) {
    let engine = engine(FailurePlan::default());
    let session = open(&engine, bit_depth, SessionConfig::default());
    let frame_size = format.frame_size_bytes(WIDTH, HEIGHT);
    assert_eq!(session.frame_size_bytes(), frame_size);

    let mut buffer = vec![0u8; frame_size];
    for index in 0..FRAMES {
        let written = session.read_frame(index, &mut buffer).unwrap();
        assert_eq!(written, frame_size);
        assert_eq!(buffer, engine.expected_frame(index, format), "frame {index}");
    }

    assert_eq!(session.jobs_in_flight(), 0);
    assert_all_jobs_released(&engine);
    assert_eq!(engine.stats().jobs_created, 2 * FRAMES as usize);
}

#[rstest]
#[case::read_job_creation(FailureStage::CreateReadJob)]
#[case::read_submission(FailureStage::SubmitRead)]
#[case::read(FailureStage::Read)]
#[case::set_format(FailureStage::SetFormat)]
#[case::decode_job_creation(FailureStage::CreateProcessJob)]
#[case::decode_submission(FailureStage::SubmitProcess)]
#[case::process(FailureStage::Process)]
#[case::truncated_image(FailureStage::TruncatedImage)]
#[case::lost_read_job(FailureStage::LoseReadJob)]
#[case::lost_decode_job(FailureStage::LoseProcessJob)]
fn test_failed_request_completes_once_and_leaves_buffer_untouched(#[case] stage: FailureStage) {
    let engine = engine(FailurePlan::default().fail_frame(4, stage));
    let session = open(&engine, 8, SessionConfig::default());

    let sentinel = vec![0xa5u8; session.frame_size_bytes()];
    let mut buffer = sentinel.clone();
    let err = session.read_frame(4, &mut buffer).unwrap_err();

    let expected = match stage {
        FailureStage::CreateReadJob => matches!(err, FrameError::JobCreation { .. }),
        FailureStage::SubmitRead | FailureStage::SubmitProcess => {
            matches!(err, FrameError::Submission { .. })
        }
        FailureStage::Read => matches!(err, FrameError::Read { .. }),
        FailureStage::SetFormat
        | FailureStage::CreateProcessJob
        | FailureStage::Process
        | FailureStage::TruncatedImage => matches!(err, FrameError::Process { .. }),
        FailureStage::LoseReadJob | FailureStage::LoseProcessJob => {
            matches!(err, FrameError::Abandoned { frame_index: 4 })
        }
    };
    assert!(expected, "{stage:?} produced {err:?}");
    assert_eq!(buffer, sentinel, "a failed request writes nothing");
    assert_eq!(session.jobs_in_flight(), 0);
    assert_all_jobs_released(&engine);

    // Neighbouring frames are unaffected.
    let written = session.read_frame(5, &mut buffer).unwrap();
    assert_eq!(written, buffer.len());
    assert_eq!(buffer, engine.expected_frame(5, ResourceFormat::BgraU8));
}

#[test]
fn test_frame_five_then_six() {
    let engine = engine(FailurePlan::default());
    let session = open(&engine, 16, SessionConfig::default());
    let format = ResourceFormat::RgbU16Planar;

    let mut first = vec![0u8; session.frame_size_bytes()];
    let mut second = vec![0u8; session.frame_size_bytes()];
    session.read_frame(5, &mut first).unwrap();
    let snapshot = first.clone();
    session.read_frame(6, &mut second).unwrap();

    assert_eq!(first, engine.expected_frame(5, format));
    assert_eq!(second, engine.expected_frame(6, format));
    assert_eq!(first, snapshot, "second request must not touch the first buffer");
    assert_ne!(first, second);
}

#[test]
fn test_concurrent_requests_route_to_their_own_buffers() {
    let engine = engine(FailurePlan::default());
    let session = open(&engine, 8, SessionConfig::default());
    let frame_size = session.frame_size_bytes();

    let signals: Vec<_> = (0..FRAMES)
        .rev()
        .map(|index| session.fetch_frame(index, vec![0u8; frame_size]).unwrap())
        .collect();

    for signal in signals {
        let index = signal.frame_index();
        let outcome = signal.wait();
        assert_eq!(outcome.frame_index, index);
        assert_eq!(outcome.result, Ok(frame_size));
        assert_eq!(
            outcome.buffer,
            engine.expected_frame(index, ResourceFormat::BgraU8)
        );
    }
    assert_all_jobs_released(&engine);
}

#[test]
fn test_concurrent_callers_on_shared_session() {
    let engine = engine(FailurePlan::default());
    let session = Arc::new(open(&engine, 32, SessionConfig::default()));

    let handles: Vec<_> = (0..4u64)
        .map(|worker| {
            let session = session.clone();
            std::thread::spawn(move || {
                let mut buffer = vec![0u8; session.frame_size_bytes()];
                let mut frames = Vec::new();
                for index in (worker..FRAMES).step_by(4) {
                    session.read_frame(index, &mut buffer).unwrap();
                    frames.push((index, buffer.clone()));
                }
                frames
            })
        })
        .collect();

    for handle in handles {
        for (index, pixels) in handle.join().unwrap() {
            assert_eq!(pixels, engine.expected_frame(index, ResourceFormat::RgbF32Planar));
        }
    }
}

#[test]
fn test_poll_is_sticky_once_ready() {
    let engine = engine(FailurePlan::default());
    let session = open(&engine, 8, SessionConfig::default());

    let mut signal = session
        .fetch_frame(2, vec![0u8; session.frame_size_bytes()])
        .unwrap();
    while !signal.poll() {
        std::thread::yield_now();
    }
    assert!(signal.poll());
    let outcome = signal.wait();
    assert!(outcome.is_ok());
    assert_eq!(outcome.buffer, engine.expected_frame(2, ResourceFormat::BgraU8));
}

#[test]
fn test_backpressure_rejects_beyond_limit() {
    let engine = Arc::new(SyntheticEngine::new(SyntheticEngineConfig {
        width: WIDTH,
        height: HEIGHT,
        frame_count: FRAMES,
        job_delay: Duration::from_millis(50),
        ..SyntheticEngineConfig::default()
    }));
    let session = open(
        &engine,
        8,
        SessionConfig::default().with_max_jobs_in_flight(2),
    );
    let frame_size = session.frame_size_bytes();

    let first = session.fetch_frame(0, vec![0u8; frame_size]).unwrap();
    let second = session.fetch_frame(1, vec![0u8; frame_size]).unwrap();
    assert_eq!(session.jobs_in_flight(), 2);

    let rejected = session.fetch_frame(2, vec![7u8; frame_size]).unwrap_err();
    assert_eq!(
        rejected.error(),
        &FrameError::Backpressure {
            in_flight: 2,
            limit: 2
        }
    );
    let (_, buffer) = rejected.into_parts();
    assert_eq!(buffer, vec![7u8; frame_size]);

    assert!(first.wait().is_ok());
    assert!(second.wait().is_ok());
    assert_eq!(session.jobs_in_flight(), 0);
    assert!(session.fetch_frame(2, vec![0u8; frame_size]).unwrap().wait().is_ok());
}

#[test]
fn test_timed_out_request_still_completes() {
    let engine = Arc::new(SyntheticEngine::new(SyntheticEngineConfig {
        width: WIDTH,
        height: HEIGHT,
        frame_count: FRAMES,
        job_delay: Duration::from_millis(100),
        ..SyntheticEngineConfig::default()
    }));
    let session = open(
        &engine,
        8,
        SessionConfig::default().with_frame_timeout(Duration::from_millis(10)),
    );

    let mut buffer = vec![0u8; session.frame_size_bytes()];
    let err = session.read_frame(3, &mut buffer).unwrap_err();
    assert!(matches!(err, FrameError::Timeout { frame_index: 3, .. }));

    assert_all_jobs_released(&engine);
    assert_eq!(session.jobs_in_flight(), 0);
}

#[test]
fn test_dropping_session_waits_for_outstanding_jobs() {
    let engine = Arc::new(SyntheticEngine::new(SyntheticEngineConfig {
        width: WIDTH,
        height: HEIGHT,
        frame_count: FRAMES,
        job_delay: Duration::from_millis(20),
        ..SyntheticEngineConfig::default()
    }));
    let session = open(&engine, 8, SessionConfig::default());
    let signals: Vec<_> = (0..4)
        .map(|i| {
            session
                .fetch_frame(i, vec![0u8; session.frame_size_bytes()])
                .unwrap()
        })
        .collect();

    drop(session);

    assert_eq!(engine.stats().jobs_pending, 0);
    for mut signal in signals {
        assert!(signal.poll(), "frame {} still pending", signal.frame_index());
        assert!(signal.wait().is_ok());
    }
}

#[test]
fn test_sessions_sharing_an_engine_keep_their_own_format() {
    let engine = engine(FailurePlan::default());
    let planar = open(&engine, 32, SessionConfig::default());
    let packed = open(&engine, 8, SessionConfig::default());

    let mut planar_buffer = vec![0u8; planar.frame_size_bytes()];
    let mut packed_buffer = vec![0u8; packed.frame_size_bytes()];
    for index in [1, 4, 2] {
        let written = planar.read_frame(index, &mut planar_buffer).unwrap();
        assert_eq!(written, planar.frame_size_bytes());
        assert_eq!(
            planar_buffer,
            engine.expected_frame(index, ResourceFormat::RgbF32Planar),
            "planar frame {index}"
        );

        let written = packed.read_frame(index, &mut packed_buffer).unwrap();
        assert_eq!(written, packed.frame_size_bytes());
        assert_eq!(
            packed_buffer,
            engine.expected_frame(index, ResourceFormat::BgraU8),
            "packed frame {index}"
        );
    }

    // Both sessions in flight on the same workers at once.
    let planar_signal = planar
        .fetch_frame(7, vec![0u8; planar.frame_size_bytes()])
        .unwrap();
    let packed_signal = packed
        .fetch_frame(7, vec![0u8; packed.frame_size_bytes()])
        .unwrap();
    let planar_outcome = planar_signal.wait();
    let packed_outcome = packed_signal.wait();
    assert_eq!(planar_outcome.result, Ok(planar.frame_size_bytes()));
    assert_eq!(
        planar_outcome.buffer,
        engine.expected_frame(7, ResourceFormat::RgbF32Planar)
    );
    assert_eq!(packed_outcome.result, Ok(packed.frame_size_bytes()));
    assert_eq!(
        packed_outcome.buffer,
        engine.expected_frame(7, ResourceFormat::BgraU8)
    );

    drop(planar);
    drop(packed);
    assert_all_jobs_released(&engine);
}

#[test]
fn test_long_clip_frames_stay_distinct_past_256() {
    let engine = Arc::new(SyntheticEngine::new(SyntheticEngineConfig {
        width: 4,
        height: 2,
        frame_count: 600,
        ..SyntheticEngineConfig::default()
    }));
    let session = open(&engine, 8, SessionConfig::default());

    let mut buffer = vec![0u8; session.frame_size_bytes()];
    session.read_frame(3, &mut buffer).unwrap();
    let early = buffer.clone();
    session.read_frame(259, &mut buffer).unwrap();

    assert_eq!(early, engine.expected_frame(3, ResourceFormat::BgraU8));
    assert_eq!(buffer, engine.expected_frame(259, ResourceFormat::BgraU8));
    assert_ne!(early, buffer);
}
