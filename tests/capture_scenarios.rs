use std::time::Duration;

use panorama_rig::domain::bracket::BracketMode;
use panorama_rig::domain::models::{AbortReason, Lens, RunOutcome, RunPhase, TurntableEvent};
use panorama_rig::domain::sequencer::SequencerConfig;
use panorama_rig::testing::{FeedbackEntry, SequencerHarness};

const FIRST_SHOT_DELAY: Duration = Duration::from_millis(500);

fn config(use_gyro: bool, bracket: u8) -> SequencerConfig {
    SequencerConfig {
        use_gyro,
        bracket_mode: BracketMode::new(bracket).expect("valid bracket mode"),
        lens: Lens::Wide,
        ..Default::default()
    }
}

/// Start a run and finish the first burst at 0°
fn through_first_burst(rig: &mut SequencerHarness) {
    rig.start();
    rig.advance(FIRST_SHOT_DELAY);
    rig.complete_burst();
}

#[test]
fn full_revolution_without_gyro_takes_twelve_bursts() {
    let mut rig = SequencerHarness::new(config(false, 0));
    through_first_burst(&mut rig);

    for target in (30..360).step_by(30) {
        rig.report_angle(target);
        assert!(
            rig.sequencer.has_burst_in_flight(),
            "arriving at {target}° should trigger a burst"
        );
        rig.complete_burst();
    }
    assert!(rig.sequencer.is_running(), "run ends only once back at 0°");
    rig.report_angle(0);

    let indices: Vec<u32> = rig.camera.requests().iter().map(|r| r.file_index).collect();
    assert_eq!(indices, (0..12).collect::<Vec<_>>());
    assert_eq!(rig.turntable.commands, vec![30; 12]);
    assert_eq!(
        rig.sequencer.last_outcome(),
        Some(&RunOutcome::Completed { bursts: 12 })
    );
    assert_eq!(rig.sequencer.phase(), RunPhase::Idle);
    assert_eq!(rig.feedback.count(&FeedbackEntry::CompleteCue), 1);
    assert!(!rig.motion.log().running, "motion sensor stops on completion");
}

#[test]
fn intermediate_angles_do_not_trigger_capture() {
    let mut rig = SequencerHarness::new(config(false, 0));
    through_first_burst(&mut rig);

    for angle in 1..30 {
        rig.report_angle(angle);
    }
    assert_eq!(rig.camera.requests().len(), 1);

    rig.report_angle(30);
    assert_eq!(rig.camera.requests().len(), 2);
}

#[test]
fn disconnect_mid_run_aborts_and_ignores_later_events() {
    let mut rig = SequencerHarness::new(config(false, 0));
    through_first_burst(&mut rig);
    for target in (30..150).step_by(30) {
        rig.report_angle(target);
        rig.complete_burst();
    }
    let requests_before = rig.camera.requests().len();
    let commands_before = rig.turntable.commands.len();

    rig.turntable_event(TurntableEvent::Disconnected);
    assert_eq!(rig.sequencer.phase(), RunPhase::Idle);
    assert_eq!(
        rig.sequencer.last_outcome(),
        Some(&RunOutcome::Aborted(AbortReason::Disconnected))
    );

    rig.report_angle(150);
    rig.report_angle(180);
    rig.complete_burst();

    assert_eq!(rig.camera.requests().len(), requests_before);
    assert_eq!(rig.turntable.commands.len(), commands_before);
    assert!(rig
        .feedback
        .messages()
        .iter()
        .any(|m| m.contains("Capture aborted")));
}

#[test]
fn bracket_fires_all_offsets_before_advancing() {
    let mut rig = SequencerHarness::new(config(false, 2));
    through_first_burst(&mut rig);
    rig.report_angle(30);

    let request = rig.camera.last_request().expect("bracket requested");
    assert_eq!(request.ev_offsets(), vec![0, -2, -1, 1, 2]);
    assert_eq!(request.shots[1].file_name, "1_EV-2.jpg");

    let events = rig.camera.successes_for_last();
    for event in &events[..4] {
        rig.sequencer
            .on_camera_event(event.clone(), &mut rig.turntable);
        assert_eq!(
            rig.sequencer.rotation_plan().map(|p| p.target_angle_sum()),
            Some(30),
            "target must hold until every offset is captured"
        );
    }
    assert_eq!(rig.turntable.commands.len(), 1);

    rig.sequencer
        .on_camera_event(events[4].clone(), &mut rig.turntable);
    assert_eq!(
        rig.sequencer.rotation_plan().map(|p| p.target_angle_sum()),
        Some(60)
    );
    assert_eq!(rig.turntable.commands, vec![30, 30]);
}

#[test]
fn bracket_failure_discards_step_and_aborts() {
    let mut rig = SequencerHarness::new(config(false, 2));
    through_first_burst(&mut rig);
    rig.report_angle(30);

    let events = rig.camera.successes_for_last();
    for event in &events[..2] {
        rig.sequencer
            .on_camera_event(event.clone(), &mut rig.turntable);
    }
    rig.fail_shot(2, "sensor timeout");

    assert!(matches!(
        rig.sequencer.last_outcome(),
        Some(RunOutcome::Aborted(AbortReason::CaptureFailed(reason))) if reason == "sensor timeout"
    ));
    assert_eq!(rig.turntable.commands, vec![30], "no rotate after a failed step");

    // Late successes for the discarded shots change nothing
    for event in &events[3..] {
        rig.sequencer
            .on_camera_event(event.clone(), &mut rig.turntable);
    }
    assert_eq!(rig.turntable.commands, vec![30]);
    assert_eq!(rig.sequencer.phase(), RunPhase::Idle);
}

#[test]
fn unsettled_arrival_waits_for_next_angle_event() {
    let mut rig = SequencerHarness::new(config(true, 0));
    through_first_burst(&mut rig);

    rig.shake();
    rig.report_angle(30);
    assert_eq!(
        rig.camera.requests().len(),
        1,
        "no capture while the platform is still moving"
    );
    assert_eq!(rig.turntable.commands, vec![30], "no re-command while waiting");

    rig.settle();
    assert_eq!(rig.camera.requests().len(), 1, "the gate is not polled");

    rig.report_angle(30);
    rig.report_angle(30);
    assert_eq!(rig.camera.requests().len(), 2, "exactly one capture once settled");
}

#[test]
fn operator_can_restart_after_abort() {
    let mut rig = SequencerHarness::new(config(false, 0));
    through_first_burst(&mut rig);
    rig.turntable_event(TurntableEvent::ConnectionFailed("link lost".to_string()));
    assert!(!rig.sequencer.is_running());

    rig.turntable.angle = 0;
    rig.run_full_revolution();
    assert_eq!(
        rig.sequencer.last_outcome(),
        Some(&RunOutcome::Completed { bursts: 12 })
    );
}
