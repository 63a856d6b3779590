//! Integration tests for the primary loop.
//!
//! Runs the emitter on a simulated 10 s clip with a virtual clock and checks
//! cycle counts, signal ordering and that a polling follower always sees the
//! pulse.

use crate::rig::{primary_config, wait_until, Rig};
use pisync::journal::{JournalEntry, SimEvent};
use pisync::playback::PlayerCall;
use pisync::sync_io::{Level, LineMonitor};
use pisync::Shutdown;
use std::time::Duration;

const CLIP: Duration = Duration::from_secs(10);

/// Timestamps of the events that make up each cycle, in journal order.
#[derive(Debug)]
struct CycleTrace {
    high: Duration,
    restart: Duration,
    low: Duration,
    resume: Duration,
}

/// Walk the journal for `pin` and pair every high with the restart seek,
/// the following low and the resume that come after it.
fn cycle_traces(entries: &[JournalEntry], pin: u32) -> Vec<CycleTrace> {
    let mut traces = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        if entries[i].event != (SimEvent::Line { pin, level: Level::High }) {
            i += 1;
            continue;
        }
        let high = i;
        let restart = (high..entries.len())
            .find(|&j| entries[j].event == SimEvent::Player(PlayerCall::Seek(Duration::ZERO)))
            .expect("restart after high");
        let low = (restart..entries.len())
            .find(|&j| entries[j].event == (SimEvent::Line { pin, level: Level::Low }))
            .expect("low after restart");
        let resume = (low..entries.len())
            .find(|&j| entries[j].event == SimEvent::Player(PlayerCall::Play))
            .expect("resume after low");

        traces.push(CycleTrace {
            high: entries[high].at,
            restart: entries[restart].at,
            low: entries[low].at,
            resume: entries[resume].at,
        });
        i = resume + 1;
    }
    traces
}

#[test]
fn test_three_cycle_scenario() {
    let rig = Rig::new(CLIP);
    let config = primary_config(|file| {
        file.playback.repeat_count = 3;
        file.emitter.hold_secs = 2.0;
        file.timing.poll_interval_ms = 200;
        file.emitter.end_guard_ms = 600;
    });

    let summary = rig
        .run(&config, rig.idle_io(Duration::from_secs(1)), Shutdown::new())
        .unwrap();

    assert_eq!(summary.completed(), 3);
    assert!(!summary.interrupted);
    for cycle in &summary.cycles {
        assert!(
            cycle.end_position >= Duration::from_millis(9400),
            "cycle {} ended early at {:?}",
            cycle.index,
            cycle.end_position
        );
        assert!(cycle.end_position <= CLIP);
    }

    assert_eq!(rig.calls(PlayerCall::Release), 1);
    let entries = rig.journal.entries();
    let last_low = entries
        .iter()
        .rposition(|e| matches!(e.event, SimEvent::Line { level: Level::Low, .. }))
        .unwrap();
    let release = entries
        .iter()
        .position(|e| e.event == SimEvent::Player(PlayerCall::Release))
        .unwrap();
    assert!(release > last_low);
    assert_eq!(release, entries.len() - 2, "teardown follows release");
    assert_eq!(entries.last().unwrap().event, SimEvent::Teardown);
}

#[test]
fn test_exactly_n_cycles_then_one_release() {
    for n in 1..=5 {
        let rig = Rig::new(CLIP);
        let config = primary_config(|file| {
            file.playback.repeat_count = n;
            file.emitter.output_pins = vec![17, 27, 22];
        });

        let summary = rig
            .run(&config, rig.idle_io(Duration::from_secs(1)), Shutdown::new())
            .unwrap();

        assert_eq!(summary.completed(), n, "repeat_count {}", n);
        assert_eq!(
            rig.journal
                .count(|e| *e == SimEvent::Line { pin: 27, level: Level::High }),
            n as usize
        );
        // One rewind while measuring, then one per cycle.
        assert_eq!(rig.calls(PlayerCall::Seek(Duration::ZERO)), n as usize + 1);
        assert_eq!(rig.calls(PlayerCall::Release), 1);
        assert_eq!(rig.journal.count(|e| *e == SimEvent::Teardown), 1);
    }
}

#[test]
fn test_signal_brackets_restart() {
    let rig = Rig::new(CLIP);
    let hold = Duration::from_millis(1500);
    let config = primary_config(|file| {
        file.playback.repeat_count = 3;
        file.emitter.output_pins = vec![17, 27];
        file.emitter.hold_secs = hold.as_secs_f64();
    });

    rig.run(&config, rig.idle_io(Duration::from_secs(1)), Shutdown::new())
        .unwrap();

    let traces = cycle_traces(&rig.journal.entries(), 27);
    assert_eq!(traces.len(), 3);
    for trace in &traces {
        assert!(trace.high <= trace.restart);
        assert!(trace.restart + hold <= trace.low, "{:?}", trace);
        assert!(trace.low <= trace.resume);
    }
}

#[test]
fn test_signal_lead_delays_restart() {
    let rig = Rig::new(CLIP);
    let config = primary_config(|file| {
        file.playback.repeat_count = 1;
        file.emitter.output_pins = vec![17];
        file.emitter.signal_lead_secs = 0.5;
    });

    rig.run(&config, rig.idle_io(Duration::from_secs(1)), Shutdown::new())
        .unwrap();

    let traces = cycle_traces(&rig.journal.entries(), 17);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].restart - traces[0].high, Duration::from_millis(500));
}

#[test]
fn test_start_up_pulse_precedes_settle() {
    let rig = Rig::new(CLIP);
    let config = primary_config(|file| {
        file.playback.repeat_count = 1;
        file.emitter.output_pins = vec![17];
        file.emitter.init_pulse_secs = 0.5;
        file.emitter.init_pulse_settle_secs = 2.0;
    });

    rig.run(&config, rig.idle_io(Duration::from_secs(1)), Shutdown::new())
        .unwrap();

    let entries = rig.journal.entries();
    let first_high = entries
        .iter()
        .position(|e| e.event == SimEvent::Line { pin: 17, level: Level::High })
        .unwrap();
    let first_play = entries
        .iter()
        .position(|e| e.event == SimEvent::Player(PlayerCall::Play))
        .unwrap();
    assert!(first_high < first_play);
    assert_eq!(entries[first_play].at, Duration::from_millis(2500));
    assert_eq!(
        rig.journal
            .count(|e| *e == SimEvent::Line { pin: 17, level: Level::High }),
        2
    );
}

/// Does a follower reading `pin` every `poll`, starting at `offset`, see
/// every pulse?
fn follower_sees_every_pulse(monitor: &LineMonitor, pin: u32, poll: Duration, offset: Duration) -> bool {
    monitor
        .transitions()
        .iter()
        .filter(|t| t.pin == pin && t.level == Level::High)
        .all(|t| {
            let mut sample = offset;
            while sample < t.at {
                sample += poll;
            }
            monitor.level_at(pin, sample) == Level::High
        })
}

#[test]
fn test_hold_covers_follower_poll_interval() {
    let cases = [(2000, 200), (1000, 1000), (500, 499), (500, 500), (250, 125), (375, 375)];

    for (hold_ms, poll_ms) in cases {
        let hold = Duration::from_millis(hold_ms);
        let poll = Duration::from_millis(poll_ms);
        let rig = Rig::new(CLIP);
        let io = rig.idle_io(Duration::from_secs(1));
        let monitor = io.monitor();
        let config = primary_config(|file| {
            file.playback.repeat_count = 2;
            file.emitter.output_pins = vec![17];
            file.emitter.hold_secs = hold.as_secs_f64();
        });

        rig.run(&config, io, Shutdown::new()).unwrap();

        for step in 0..4 {
            let offset = poll * step / 4;
            assert!(
                follower_sees_every_pulse(&monitor, 17, poll, offset),
                "H={:?} P={:?} offset={:?}",
                hold,
                poll,
                offset
            );
        }
    }
}

#[test]
fn test_hold_shorter_than_poll_can_be_missed() {
    let hold = Duration::from_millis(125);
    let poll = Duration::from_millis(1000);
    let rig = Rig::new(CLIP);
    let io = rig.idle_io(Duration::from_secs(1));
    let monitor = io.monitor();
    let config = primary_config(|file| {
        file.playback.repeat_count = 1;
        file.emitter.output_pins = vec![17];
        file.emitter.hold_secs = hold.as_secs_f64();
    });

    rig.run(&config, io, Shutdown::new()).unwrap();

    let start = monitor
        .transitions()
        .iter()
        .find(|t| t.pin == 17 && t.level == Level::High)
        .unwrap()
        .at;
    // First sample lands exactly as the line drops.
    let offset = Duration::from_nanos(((start + hold).as_nanos() % poll.as_nanos()) as u64);
    assert!(!follower_sees_every_pulse(&monitor, 17, poll, offset));
}

#[test]
fn test_interrupt_drains_forever_loop() {
    let rig = Rig::new(CLIP);
    let io = rig.idle_io(Duration::from_secs(1));
    let monitor = io.monitor();
    let config = primary_config(|file| {
        file.playback.loop_forever = true;
        file.emitter.output_pins = vec![17];
    });
    let shutdown = Shutdown::new();

    let runner = {
        let rig = rig.clone();
        let shutdown = shutdown.clone();
        std::thread::spawn(move || rig.run(&config, io, shutdown))
    };

    wait_until("two cycles", || {
        rig.journal
            .count(|e| *e == SimEvent::Line { pin: 17, level: Level::High })
            >= 2
    });
    shutdown.trigger();

    let summary = runner.join().unwrap().unwrap();
    assert!(summary.interrupted);
    assert!(summary.completed() >= 1);
    assert_eq!(rig.calls(PlayerCall::Release), 1);
    assert_eq!(rig.journal.count(|e| *e == SimEvent::Teardown), 1);
    assert_eq!(monitor.level(17), Some(Level::Low));
}
