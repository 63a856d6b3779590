//! Near-end wait tests over a sweep of guard bands and poll intervals.

use pisync::clock::{Clock, ManualClock};
use pisync::playback::{near_end_threshold, PlaybackController, SimulatedPlayer, WaitOutcome};
use pisync::Shutdown;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_wait_stops_between_threshold_and_clip_end() {
    let clip = Duration::from_secs(10);
    let guards = [0, 100, 600, 1000, 3000];
    let polls = [10, 50, 200, 333, 1000];

    for guard_ms in guards {
        for poll_ms in polls {
            let guard = Duration::from_millis(guard_ms);
            let poll = Duration::from_millis(poll_ms);
            let clock = Arc::new(ManualClock::new());
            let player = Arc::new(SimulatedPlayer::new(clock.clone(), clip));
            let controller =
                PlaybackController::load(player, clock.clone(), Path::new("clip.mp4"), false)
                    .unwrap();

            controller.resume().unwrap();
            let outcome = controller
                .wait_until_near_end(clip, guard, poll, &Shutdown::new())
                .unwrap();

            let WaitOutcome::NearEnd(position) = outcome else {
                panic!("guard {:?} poll {:?}: {:?}", guard, poll, outcome);
            };
            let threshold = near_end_threshold(clip, guard, poll);
            assert!(position >= threshold, "guard {:?} poll {:?}", guard, poll);
            assert!(
                clock.now() < threshold + poll,
                "guard {:?} poll {:?} overshot to {:?}",
                guard,
                poll,
                clock.now()
            );
            assert!(clock.now() <= clip, "guard {:?} poll {:?}", guard, poll);
        }
    }
}

#[test]
fn test_threshold_never_inside_three_polls_of_end() {
    let clip = Duration::from_secs(10);
    for poll_ms in [1, 200, 1000, 4000] {
        let poll = Duration::from_millis(poll_ms);
        let threshold = near_end_threshold(clip, Duration::ZERO, poll);
        assert_eq!(threshold, clip.saturating_sub(poll * 3));
    }
}
