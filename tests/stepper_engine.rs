#![allow(missing_docs)]
//! Host-level scenario tests for the stepper engine: convergence, clamping,
//! refcounting, and the coil patterns actually committed to the bus.

use motion_kit::step_pattern::{PortWrite, StepBus};
use motion_kit::stepper::{STEP_TICK_US, StepperEngine};

/// Records every commit with the timestamp the engine was serviced at.
#[derive(Default)]
struct RecordingBus {
    commits: Vec<(u64, PortWrite)>,
    now: u64,
}

impl StepBus for RecordingBus {
    fn commit(&mut self, write: PortWrite) {
        self.commits.push((self.now, write));
    }
}

/// Service the engine at each pending deadline until it goes idle.
fn run_to_idle(engine: &mut StepperEngine, bus: &mut RecordingBus) {
    let mut guard = 0;
    while let Some(deadline) = engine.next_deadline() {
        bus.now = deadline;
        engine.service(deadline, bus);
        guard += 1;
        assert!(guard < 10_000, "engine failed to converge");
    }
}

#[test]
fn speed_ten_covers_one_hundred_steps_in_ten_ticks() {
    let mut engine = StepperEngine::new();
    let mut bus = RecordingBus::default();
    engine.enable(0).unwrap();
    engine.set_position_now(0, 0, 0).unwrap();
    engine.set_speed(0, 10).unwrap();
    engine.set_position(0, 100, 0).unwrap();
    run_to_idle(&mut engine, &mut bus);
    assert_eq!(bus.commits.len(), 10);
    assert_eq!(engine.position(0).unwrap(), 100);
    // ticks arrive on the 1 ms cadence with no drift
    for (tick, (at, _)) in bus.commits.iter().enumerate() {
        assert_eq!(*at, u64::from(STEP_TICK_US) * (tick as u64 + 1));
    }
}

#[test]
fn single_stepping_walks_the_four_step_cycle() {
    let mut engine = StepperEngine::new();
    let mut bus = RecordingBus::default();
    engine.enable(0).unwrap();
    engine.set_position_now(0, 0, 0).unwrap();
    engine.set_speed(0, 1).unwrap();
    engine.set_position(0, 8, 0).unwrap();
    run_to_idle(&mut engine, &mut bus);
    assert_eq!(bus.commits.len(), 8);
    // bipolar full-step: positions 1..=8 wrap a 4-entry table, so commits
    // 4 apart are identical and neighbors differ
    for window in bus.commits.windows(2) {
        assert_ne!(window[0].1, window[1].1);
    }
    for offset in 0..4 {
        assert_eq!(bus.commits[offset].1, bus.commits[offset + 4].1);
    }
}

#[test]
fn every_commit_drives_all_four_lines_of_the_channel() {
    let mut engine = StepperEngine::new();
    let mut bus = RecordingBus::default();
    engine.enable(0).unwrap();
    engine.set_position_now(0, 0, 0).unwrap();
    engine.set_speed(0, 3).unwrap();
    engine.set_position(0, 17, 0).unwrap();
    run_to_idle(&mut engine, &mut bus);
    for (_, write) in &bus.commits {
        assert_eq!(write.set & write.clear, 0);
        // channel 0 owns port bits 0..4
        assert_eq!(write.set | write.clear, 0b1111);
    }
}

#[test]
fn second_channel_commits_land_on_its_own_port_bits() {
    let mut engine = StepperEngine::new();
    let mut bus = RecordingBus::default();
    engine.enable(1).unwrap();
    engine.set_position_now(1, 0, 0).unwrap();
    engine.set_speed(1, 1).unwrap();
    engine.set_position(1, 3, 0).unwrap();
    run_to_idle(&mut engine, &mut bus);
    assert_eq!(bus.commits.len(), 3);
    for (_, write) in &bus.commits {
        // channel 1 owns port bits 4..8
        assert_eq!(write.set | write.clear, 0b1111_0000);
    }
}

#[test]
fn half_step_mode_needs_twice_the_ticks_per_cycle() {
    let mut engine = StepperEngine::new();
    let mut bus = RecordingBus::default();
    engine.enable(0).unwrap();
    engine.set_position_now(0, 0, 0).unwrap();
    engine.set_speed(0, 1).unwrap();
    engine.set_half_step(0, true).unwrap();
    engine.set_position(0, 8, 0).unwrap();
    run_to_idle(&mut engine, &mut bus);
    assert_eq!(bus.commits.len(), 8);
    // 8-entry table: one full electrical cycle, no repeats inside it
    for first in 0..8 {
        for second in (first + 1)..8 {
            assert_ne!(bus.commits[first].1, bus.commits[second].1);
        }
    }
}

#[test]
fn mode_change_applies_on_the_next_tick_not_retroactively() {
    let mut engine = StepperEngine::new();
    let mut bus = RecordingBus::default();
    engine.enable(0).unwrap();
    engine.set_position_now(0, 0, 0).unwrap();
    engine.set_speed(0, 1).unwrap();
    engine.set_position(0, 2, 0).unwrap();
    let first_deadline = engine.next_deadline().unwrap();
    bus.now = first_deadline;
    engine.service(first_deadline, &mut bus);

    // switch windings between ticks; the next commit uses the new table
    engine.set_bipolar(0, false).unwrap();
    let deadline = engine.next_deadline().unwrap();
    bus.now = deadline;
    engine.service(deadline, &mut bus);
    // position 2, unipolar full-step: only line 2 high
    let (_, write) = bus.commits.last().unwrap();
    assert_eq!(write.set, 0b0100);
    assert_eq!(write.clear, 0b1011);
}

#[test]
fn wild_position_command_snaps_to_safe_range() {
    let mut engine = StepperEngine::new();
    engine.enable(0).unwrap();
    engine.set_position(0, 10_000, 0).unwrap();
    assert_eq!(engine.destination(0).unwrap(), 1023);
    engine.set_position(0, i32::MIN, 0).unwrap();
    assert_eq!(engine.destination(0).unwrap(), 0);
}

#[test]
fn balanced_enables_and_disables_restore_the_idle_state() {
    let mut engine = StepperEngine::new();
    let mut bus = RecordingBus::default();
    for _ in 0..3 {
        engine.enable(0).unwrap();
    }
    engine.set_position_now(0, 0, 0).unwrap();
    engine.set_position(0, 50, 0).unwrap();
    for _ in 0..3 {
        engine.disable(0, 0).unwrap();
    }
    assert!(!engine.active(0).unwrap());
    // the last disable leaves one release firing, which de-energizes the
    // channel's lines and takes the engine idle
    run_to_idle(&mut engine, &mut bus);
    let (_, release) = bus.commits.last().unwrap();
    assert_eq!(release.set, 0);
    assert_eq!(release.clear, 0b1111);
    assert_eq!(engine.next_deadline(), None);
}

#[test]
fn reenabling_resets_the_channel_to_its_neutral_state() {
    let mut engine = StepperEngine::new();
    engine.enable(0).unwrap();
    engine.set_position_now(0, 77, 0).unwrap();
    engine.set_speed(0, 5).unwrap();
    engine.disable(0, 0).unwrap();
    engine.enable(0).unwrap();
    assert_eq!(engine.next_deadline(), None); // pending release cancelled
    assert_eq!(engine.position(0).unwrap(), 512);
    assert_eq!(engine.speed(0).unwrap(), 1023);
    assert_eq!(engine.duty(0).unwrap(), 1023);
    assert!(engine.bipolar(0).unwrap());
    assert!(!engine.half_step(0).unwrap());
}
