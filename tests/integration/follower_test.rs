//! Integration tests for the secondary loop.
//!
//! The callback scenarios run the follower on its own thread against a
//! scripted input line: the clip plays to its end, then the test delivers
//! the primary's pulse as a pair of edges.

use crate::rig::{secondary_config, wait_until, Rig};
use pisync::journal::SimEvent;
use pisync::playback::{MediaBackend, PlayerCall, PlayerState};
use pisync::sync_io::Edge;
use pisync::Shutdown;
use std::time::Duration;

const CLIP: Duration = Duration::from_secs(10);

/// Player calls journaled after the first `EdgeFired` for `edge`.
fn calls_after_edge(rig: &Rig, edge: Edge) -> Vec<PlayerCall> {
    let entries = rig.journal.entries();
    let fired = entries
        .iter()
        .position(|e| matches!(e.event, SimEvent::EdgeFired { edge: fired, .. } if fired == edge))
        .expect("edge fired");
    entries[fired..]
        .iter()
        .filter_map(|e| match &e.event {
            SimEvent::Player(call) => Some(call.clone()),
            _ => None,
        })
        .collect()
}

/// Let the clip run out, then deliver `first` and `second` with `gap` of
/// virtual time between them. Returns the rig once the follower has drained.
fn run_callback_scenario(trigger_edge: &str, first: Edge, second: Edge, gap: Duration) -> Rig {
    let rig = Rig::new(CLIP);
    let (io, script) = rig.scripted_io();
    let config = secondary_config(|file| {
        file.playback.repeat_count = 2;
        file.follower.mode = "callback".to_string();
        file.follower.trigger_edge = trigger_edge.to_string();
    });

    let runner = {
        let rig = rig.clone();
        std::thread::spawn(move || rig.run(&config, io, Shutdown::new()))
    };

    wait_until("clip end", || {
        rig.player.state().ok() == Some(PlayerState::Stopped)
    });

    assert!(script.send(first));
    wait_until("first edge", || {
        rig.journal
            .count(|e| matches!(e, SimEvent::EdgeFired { .. }))
            == 1
    });
    rig.clock.advance(gap);
    assert!(script.send(second));

    let summary = runner.join().unwrap().unwrap();
    assert_eq!(summary.completed(), 2);
    assert!(!summary.interrupted);
    rig
}

#[test]
fn test_rising_then_falling_restarts_then_resumes() {
    let rig = run_callback_scenario("rising", Edge::Rising, Edge::Falling, Duration::ZERO);

    assert_eq!(
        calls_after_edge(&rig, Edge::Rising),
        vec![
            PlayerCall::Seek(Duration::ZERO),
            PlayerCall::Play,
            PlayerCall::Stop,
            PlayerCall::Release,
        ]
    );
    assert_eq!(rig.journal.count(|e| matches!(e, SimEvent::EdgeWait { .. })), 0);
}

#[test]
fn test_long_gap_between_edges_changes_nothing() {
    let rig = run_callback_scenario(
        "rising",
        Edge::Rising,
        Edge::Falling,
        Duration::from_secs(3600),
    );

    let calls = calls_after_edge(&rig, Edge::Rising);
    assert_eq!(&calls[..2], &[PlayerCall::Seek(Duration::ZERO), PlayerCall::Play]);
    assert_eq!(
        calls.iter().filter(|c| **c == PlayerCall::Seek(Duration::ZERO)).count(),
        1
    );
    assert_eq!(rig.journal.count(|e| matches!(e, SimEvent::EdgeWait { .. })), 0);
}

#[test]
fn test_falling_trigger_swaps_edge_roles() {
    let rig = run_callback_scenario("falling", Edge::Falling, Edge::Rising, Duration::ZERO);

    assert_eq!(
        calls_after_edge(&rig, Edge::Falling),
        vec![
            PlayerCall::Seek(Duration::ZERO),
            PlayerCall::Play,
            PlayerCall::Stop,
            PlayerCall::Release,
        ]
    );
}

#[test]
fn test_poll_mode_waits_for_trigger_edges() {
    let rig = Rig::new(CLIP);
    let (io, script) = rig.scripted_io();
    let config = secondary_config(|file| {
        file.playback.repeat_count = 2;
        file.follower.mode = "poll".to_string();
    });

    script.send(Edge::Rising);
    script.send(Edge::Falling);
    script.send(Edge::Rising);

    let summary = rig.run(&config, io, Shutdown::new()).unwrap();

    assert_eq!(summary.completed(), 2);
    assert_eq!(
        rig.journal
            .count(|e| *e == SimEvent::EdgeWait { pin: 4, edge: Edge::Rising }),
        2
    );
    assert_eq!(rig.journal.count(|e| matches!(e, SimEvent::EdgeRegistered { .. })), 0);
    for cycle in &summary.cycles {
        assert!(cycle.end_position >= Duration::from_secs(9));
    }
}

#[test]
fn test_closed_edge_source_still_drains() {
    let rig = Rig::new(CLIP);
    let (io, script) = rig.scripted_io();
    let config = secondary_config(|file| {
        file.playback.repeat_count = 2;
        file.follower.mode = "poll".to_string();
    });
    drop(script);

    let result = rig.run(&config, io, Shutdown::new());

    assert!(matches!(result, Err(pisync::SessionError::Sync(_))));
    assert_eq!(rig.calls(PlayerCall::Release), 1);
    assert_eq!(rig.journal.count(|e| *e == SimEvent::Teardown), 1);
}

#[test]
fn test_follower_never_drives_lines() {
    let rig = Rig::new(CLIP);
    let config = secondary_config(|file| {
        file.playback.repeat_count = 3;
        file.follower.mode = "poll".to_string();
    });

    rig.run(&config, rig.idle_io(Duration::from_secs(2)), Shutdown::new())
        .unwrap();

    assert_eq!(rig.journal.count(|e| matches!(e, SimEvent::Line { .. })), 0);
    assert_eq!(rig.journal.count(|e| matches!(e, SimEvent::EdgeWait { .. })), 3);
}
