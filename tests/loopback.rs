use std::time::Duration;

use bulkloop::{
    report::{Outcome, Report},
    sim::SimTransport,
    verify::Verdict,
    Direction, ErrorKind, LoopbackConfig, LoopbackSession, Pattern, PipelineState, TransferError,
};

fn config(chunks: usize) -> LoopbackConfig {
    LoopbackConfig {
        chunk_size: 64,
        total_bytes: 64 * chunks,
        cancel_grace: Duration::from_millis(100),
        ..Default::default()
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn random_pattern_loops_back() {
    init_logging();
    let mut report = Report::default();
    let mut sim = SimTransport::loopback();
    let mut session =
        LoopbackSession::with_pattern(config(10), Pattern::Random(42), &mut report).unwrap();
    let summary = session.run(&mut sim);

    assert_eq!(summary.outcome(), Outcome::Match);
    assert_eq!(summary.verdict, Some(Verdict::Match { len: 640 }));
    assert_eq!(session.source(), &Pattern::Random(42).fill(640)[..]);
    assert_eq!(sim.max_in_flight(0x01), 1);
    assert_eq!(sim.max_in_flight(0x82), 1);
    assert_eq!(sim.pending(), 0);

    drop(session);
    assert!(report.failures.is_empty());
    assert_eq!(report.summary.map(|s| s.outcome()), Some(Outcome::Match));
}

#[test]
fn corrupted_chunk_is_located() {
    init_logging();
    let mut sim = SimTransport::loopback().flip_bit(4, 0, 0);
    let mut session =
        LoopbackSession::with_pattern(config(8), Pattern::Zeros, Report::default()).unwrap();
    let summary = session.run(&mut sim);

    assert_eq!(summary.in_state, PipelineState::Done);
    assert_eq!(summary.outcome(), Outcome::Mismatch);
    assert_eq!(
        summary.verdict,
        Some(Verdict::Mismatch {
            offset: 256,
            block: 4,
            mismatched_blocks: 1
        })
    );
    assert_eq!(session.in_pipeline().reassembly().chunk(4)[0], 0x01);
}

#[test]
fn lost_echo_times_out_its_own_chunk() {
    init_logging();
    for k in 0..5 {
        let mut sim = SimTransport::loopback().drop_echo(k);
        let mut session =
            LoopbackSession::with_pattern(config(5), Pattern::Incrementing, Report::default())
                .unwrap();
        let summary = session.run(&mut sim);

        assert_eq!(summary.in_state, PipelineState::Failed);
        assert_eq!(summary.outcome(), Outcome::TransferFailed);
        assert_eq!(summary.verdict, None);
        assert_eq!(summary.in_bytes, 64 * k);
        assert_eq!(summary.abandoned, 0);
        assert!(!session.gate().is_set());

        let failure = session.in_pipeline().failure().unwrap();
        assert_eq!(failure.direction, Direction::In);
        assert_eq!(failure.chunk, k);
        assert_eq!(failure.status(), Some(TransferError::Timeout));

        // Chunks before the lost one arrived intact and in place.
        let received = session.in_pipeline().reassembly();
        for i in 0..k {
            assert_eq!(received.chunk(i), &session.source()[64 * i..64 * (i + 1)]);
        }
        assert_eq!(sim.pending(), 0);
    }
}

#[test]
fn out_stall_cancels_in() {
    init_logging();
    let mut sim = SimTransport::loopback().fail_out(1, TransferError::Stall);
    let mut session =
        LoopbackSession::with_pattern(config(4), Pattern::Ones, Report::default()).unwrap();
    let summary = session.run(&mut sim);

    assert_eq!(summary.out_state, PipelineState::Failed);
    assert_eq!(summary.in_state, PipelineState::Running);
    assert_eq!(summary.out_bytes, 64);
    assert_eq!(summary.in_bytes, 64);
    assert_eq!(summary.abandoned, 0);
    assert_eq!(sim.cancelled(0x82), 1);
    assert_eq!(sim.pending(), 0);

    let report = session.into_sink();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].endpoint, 0x01);
    assert_eq!(report.failures[0].status(), Some(TransferError::Stall));
}

#[test]
fn transport_failure_is_fatal() {
    init_logging();
    let mut sim = SimTransport::loopback().fatal_at(3);
    let mut session =
        LoopbackSession::with_pattern(config(4), Pattern::Incrementing, Report::default())
            .unwrap();
    let summary = session.run(&mut sim);

    assert_eq!(summary.outcome(), Outcome::Fatal);
    assert_eq!(summary.fatal.as_ref().map(|e| e.kind()), Some(ErrorKind::Other));
    assert!(summary.failures.is_empty());
    assert_eq!(sim.cancelled(0x01), 1);
    assert_eq!(sim.cancelled(0x82), 1);
    assert_eq!(summary.abandoned, 0);
}

#[test]
fn invalid_config_is_rejected_before_io() {
    let res = LoopbackSession::with_pattern(
        LoopbackConfig {
            total_bytes: 100,
            ..config(1)
        },
        Pattern::Zeros,
        Report::default(),
    );
    assert!(res.is_err());
}
