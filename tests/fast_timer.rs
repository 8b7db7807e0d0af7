#![allow(missing_docs)]
//! Host-level tests for the deadline multiplexer driving longer schedules
//! than the unit tests cover.

use motion_kit::fast_timer::FastTimer;

#[test]
fn two_repeating_entries_interleave_without_drift() {
    let mut timer = FastTimer::<2>::new();
    timer.start(0, 0, 300, true);
    timer.start(1, 0, 700, true);

    let mut fired = Vec::new();
    let mut now = 0;
    while now < 10_000 {
        now = timer.next_deadline().unwrap();
        for id in timer.advance(now) {
            fired.push((now, id));
        }
    }

    // entry 0 every 300 µs, entry 1 every 700 µs, coinciding at 2100 µs
    for (at, id) in &fired {
        let period = if *id == 0 { 300 } else { 700 };
        assert_eq!(at % period, 0, "entry {id} fired off-cadence at {at}");
    }
    let count0 = fired.iter().filter(|(_, id)| *id == 0).count();
    let count1 = fired.iter().filter(|(_, id)| *id == 1).count();
    assert_eq!(count0, 34); // 300, 600, ..., 10_200
    assert_eq!(count1, 14); // 700, 1400, ..., 9_800
}

#[test]
fn coinciding_deadlines_fire_together_in_id_order() {
    let mut timer = FastTimer::<3>::new();
    timer.start(0, 0, 600, false);
    timer.start(1, 0, 200, true);
    timer.start(2, 0, 300, true);
    assert_eq!(timer.advance(600).as_slice(), &[0, 1, 2]);
    // the one-shot is done; the repeaters rearm from the deadlines they met
    // (entry 1 fired its 200 µs deadline late, so its next is 400)
    assert_eq!(timer.next_deadline(), Some(400));
}

#[test]
fn late_service_fires_once_and_keeps_the_original_cadence() {
    let mut timer = FastTimer::<1>::new();
    timer.start(0, 0, 1_000, true);
    // serviced 400 µs late
    assert_eq!(timer.advance(1_400).as_slice(), &[0]);
    // the next deadline counts from 1_000, not from 1_400
    assert_eq!(timer.next_deadline(), Some(2_000));
}

#[test]
fn rearm_from_callback_builds_an_alternating_schedule() {
    // the servo pulse pattern: alternate a short and a long period by
    // reprogramming the entry inside each service window
    let mut timer = FastTimer::<1>::new();
    timer.start(0, 0, 2_000, true);
    let mut deadlines = Vec::new();
    let mut short_phase = true;
    for _ in 0..8 {
        let now = timer.next_deadline().unwrap();
        deadlines.push(now);
        for _ in timer.advance(now) {
            let next = if short_phase { 1_500 } else { 2_430 };
            timer.set_period(0, next);
            short_phase = !short_phase;
        }
    }
    // each short+long pair spans exactly 3930 µs
    for pair in deadlines.chunks(2) {
        if let [start, end] = pair {
            assert_eq!(end - start, 1_500);
        }
    }
    for window in deadlines.windows(3).step_by(2) {
        assert_eq!(window[2] - window[0], 3_930);
    }
}

#[test]
fn stopping_one_entry_leaves_the_others_running() {
    let mut timer = FastTimer::<2>::new();
    timer.start(0, 0, 100, true);
    timer.start(1, 0, 250, true);
    timer.stop(0);
    assert_eq!(timer.next_deadline(), Some(250));
    assert_eq!(timer.advance(250).as_slice(), &[1]);
}
