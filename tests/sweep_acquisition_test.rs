//! Integration tests for bulk and incremental sweep acquisition

use te300x_daq::adapters::MockTransport;
use te300x_daq::config::SweepDefaults;
use te300x_daq::error::AnalyserError;
use te300x_daq::hardware::mock::{Fault, SimulatedAnalyser};
use te300x_daq::hardware::{AcquisitionMode, CancelToken, Te300x, TracePoint};

fn session_with_points(device: &SimulatedAnalyser, points: u32) -> Te300x<MockTransport> {
    let defaults = SweepDefaults {
        fmin_hz: 1e6,
        fmax_hz: 10e6,
        points,
        ..Default::default()
    };
    Te300x::with_transport("sim", device.transport(), &defaults).unwrap()
}

fn ignore(_: &[TracePoint]) {}

// =============================================================================
// Bulk mode
// =============================================================================

#[test]
fn test_bulk_sweep_matches_device_trace() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 201);

    let sweep = session.acquire_sweep().unwrap();
    assert!(sweep.is_complete());
    assert_eq!(sweep.requested_points, 201);
    assert_eq!(sweep.points, device.expected_trace());
    assert_eq!(sweep.frequencies()[0], 1e6);
    assert_eq!(*sweep.frequencies().last().unwrap(), 10e6);
}

#[test]
fn test_bulk_sweep_across_partial_reads() {
    let device = SimulatedAnalyser::new();
    let transport = device.transport().with_chunk_size(7);
    let defaults = SweepDefaults {
        points: 50,
        ..Default::default()
    };
    let mut session = Te300x::with_transport("sim", transport, &defaults).unwrap();

    let sweep = session.acquire_sweep().unwrap();
    assert_eq!(sweep.points, device.expected_trace());
}

#[test]
fn test_bulk_early_sentinel_reports_incomplete() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 20);

    device.inject(Fault::EarlySentinel { points: 12 });
    let sweep = session.acquire_sweep().unwrap();
    assert_eq!(sweep.len(), 12);
    assert!(!sweep.is_complete());
    assert_eq!(sweep.points[..], device.expected_trace()[..12]);
}

#[test]
fn test_bulk_empty_sweep() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 5);

    device.inject(Fault::EarlySentinel { points: 0 });
    let sweep = session.acquire_sweep().unwrap();
    assert!(sweep.is_empty());
}

#[test]
fn test_bulk_malformed_point_discards_sweep() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 10);

    device.inject(Fault::CorruptPoint { index: 4 });
    assert!(matches!(
        session.acquire_sweep(),
        Err(AnalyserError::MalformedResponse { .. })
    ));
    assert!(session.is_connected());
    assert_eq!(session.read_version().unwrap(), "TE3001 simulator v1.0");

    // Next sweep is clean
    assert!(session.acquire_sweep().unwrap().is_complete());
}

#[test]
fn test_bulk_without_sentinel_times_out() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 10);

    device.inject(Fault::NoSentinel { extra_lines: 0 });
    assert!(matches!(
        session.acquire_sweep(),
        Err(AnalyserError::Timeout(_))
    ));
    session.set_averaging(4).unwrap();
    assert_eq!(session.state().averaging, 4);
}

#[test]
fn test_bulk_missing_header_drops_first_point() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 10);

    device.inject(Fault::NoHeader);
    let sweep = session.acquire_sweep().unwrap();
    assert_eq!(sweep.len(), 9);
    assert_eq!(sweep.points[..], device.expected_trace()[1..]);
}

// =============================================================================
// Incremental mode
// =============================================================================

#[test]
fn test_incremental_reports_every_point() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 25);

    let mut seen = Vec::new();
    let mut observer = |trace: &[TracePoint]| seen.push(*trace.last().unwrap());
    let sweep = session
        .acquire_sweep_incremental(&mut observer, &CancelToken::new())
        .unwrap();

    assert!(sweep.is_complete());
    assert_eq!(sweep.points, device.expected_trace());
    assert_eq!(seen, sweep.points);
}

#[test]
fn test_incremental_overrun_is_capped() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 10);

    device.inject(Fault::NoSentinel { extra_lines: 5 });
    let err = session
        .acquire_sweep_incremental(&mut ignore, &CancelToken::new())
        .unwrap_err();

    assert!(matches!(
        err.root(),
        AnalyserError::AcquisitionOverrun { limit: 11 }
    ));
    let partial = err.partial_trace().unwrap();
    assert_eq!(partial.len(), 11);
    assert!(session.is_connected());

    // The unread tail of the stream is gone
    assert_eq!(session.read_version().unwrap(), "TE3001 simulator v1.0");
}

#[test]
fn test_incremental_accepts_one_extra_point() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 10);

    // Ten points configured, eleven sent, no sentinel
    device.inject(Fault::NoSentinel { extra_lines: 1 });
    let err = session
        .acquire_sweep_incremental(&mut ignore, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err.root(), AnalyserError::Timeout(_)));
    assert_eq!(err.partial_trace().unwrap().len(), 11);

    session.set_averaging(8).unwrap();
    assert_eq!(session.state().averaging, 8);
}

#[test]
fn test_incremental_malformed_keeps_partial_trace() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 10);

    device.inject(Fault::CorruptPoint { index: 3 });
    let err = session
        .acquire_sweep_incremental(&mut ignore, &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, AnalyserError::IncompleteSweep { .. }));
    assert!(matches!(
        err.root(),
        AnalyserError::MalformedResponse { .. }
    ));
    assert_eq!(
        err.partial_trace().unwrap().points[..],
        device.expected_trace()[..3]
    );

    // Settings and sweeps work again straight away
    session.set_averaging(8).unwrap();
    assert_eq!(session.state().averaging, 8);
    let sweep = session
        .acquire_sweep_incremental(&mut ignore, &CancelToken::new())
        .unwrap();
    assert_eq!(sweep.points, device.expected_trace());
}

#[test]
fn test_incremental_cancel_from_observer() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 30);

    let cancel = CancelToken::new();
    let token = cancel.clone();
    let mut observer = move |trace: &[TracePoint]| {
        if trace.len() == 4 {
            token.cancel();
        }
    };
    let err = session
        .acquire_sweep_incremental(&mut observer, &cancel)
        .unwrap_err();

    assert!(matches!(err.root(), AnalyserError::Cancelled));
    assert_eq!(err.partial_trace().unwrap().len(), 4);

    // The rest of the cancelled stream was discarded
    let sweep = session
        .acquire_sweep_incremental(&mut ignore, &CancelToken::new())
        .unwrap();
    assert!(sweep.is_complete());
}

#[test]
fn test_incremental_link_loss_disconnects() {
    let device = SimulatedAnalyser::new();
    let transport = device.transport();
    let probe = transport.probe();
    let defaults = SweepDefaults {
        points: 10,
        ..Default::default()
    };
    let mut session = Te300x::with_transport("sim", transport, &defaults).unwrap();

    let mut observer = |trace: &[TracePoint]| {
        if trace.len() == 2 {
            probe.disconnect();
        }
    };
    let err = session
        .acquire_sweep_incremental(&mut observer, &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err.root(), AnalyserError::Disconnected(_)));
    assert_eq!(err.partial_trace().unwrap().len(), 2);
    assert!(!session.is_connected());
}

#[test]
fn test_incremental_empty_sweep() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 5);

    device.inject(Fault::EarlySentinel { points: 0 });
    let sweep = session
        .acquire_sweep_incremental(&mut ignore, &CancelToken::new())
        .unwrap();
    assert!(sweep.is_empty());
    assert!(!sweep.is_complete());
}

#[test]
fn test_acquire_dispatches_on_mode() {
    let device = SimulatedAnalyser::new();
    let mut session = session_with_points(&device, 8);

    let mut count = 0;
    let mut observer = |_: &[TracePoint]| count += 1;
    let incremental = session
        .acquire(AcquisitionMode::Incremental, &mut observer, &CancelToken::new())
        .unwrap();
    let bulk = session
        .acquire(AcquisitionMode::Bulk, &mut ignore, &CancelToken::new())
        .unwrap();

    assert_eq!(incremental.points, bulk.points);
    assert_eq!(count, 8);
}
