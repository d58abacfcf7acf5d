//! MIDI control scenarios: CC interpretation, pick-up behavior, and
//! feedback emission, driven through the full stack.

mod common;

use approx::assert_relative_eq;
use common::{rig, MockCycle, Rig};
use mixboard_core::{ChannelHandle, MidiBehavior, MidiEvent, MixerConfig, Scale};

fn input_with_cc(rig: &Rig, cc: u8) -> ChannelHandle {
    let channel = rig.mixer.add_channel("in1", false).unwrap();
    channel.set_midi_scale(Scale::standard());
    channel.set_volume_midi_cc(cc).unwrap();
    channel
}

/// Expected feedback byte for a volume in dBFS under the standard scale.
fn volume_cc_value(db: f64) -> u8 {
    (127.0 * Scale::standard().db_to_norm(db)).round() as u8
}

#[test]
fn volume_cc_drives_target() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = input_with_cc(&rig, 7);

    // CC 127 is 0 dBFS on the standard scale.
    let mut cycle = MockCycle::new(64).cc(7, 127);
    rig.engine.run_cycle(&mut cycle);
    assert_relative_eq!(channel.volume(), 0.0, epsilon = 1e-4);

    // CC 0 is the bottom of the scale: -inf dB, 0 linear.
    let mut cycle = MockCycle::new(64).cc(7, 0);
    rig.engine.run_cycle(&mut cycle);
    assert_eq!(channel.volume(), f32::NEG_INFINITY);

    assert!(channel.midi_in_got_events());
    assert!(!channel.midi_in_got_events());
}

#[test]
fn volume_cc_without_scale_is_ignored() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = rig.mixer.add_channel("in1", false).unwrap();
    channel.set_volume_midi_cc(7).unwrap();
    channel.set_volume(-6.0);

    let mut cycle = MockCycle::new(64).cc(7, 127);
    rig.engine.run_cycle(&mut cycle);
    assert_relative_eq!(channel.volume(), -6.0, epsilon = 1e-4);
}

#[test]
fn pickup_requires_catch_up() {
    let mut rig = rig(MixerConfig::new("test"));
    rig.mixer.set_midi_behavior(MidiBehavior::PickUp);
    let channel = input_with_cc(&rig, 7);

    channel.set_volume(-6.0);
    rig.settle();

    let expected_cc = volume_cc_value(-6.0);

    // A value far from the fader does not take control.
    let mut cycle = MockCycle::new(64).cc(7, 40);
    rig.engine.run_cycle(&mut cycle);
    assert_relative_eq!(channel.volume(), -6.0, epsilon = 1e-3);
    assert!(!channel.midi_cc_volume_picked_up());

    // The matching value latches and starts driving.
    let mut cycle = MockCycle::new(64).cc(7, expected_cc);
    rig.engine.run_cycle(&mut cycle);
    assert!(channel.midi_cc_volume_picked_up());

    // From here the controller owns the fader.
    let mut cycle = MockCycle::new(64).cc(7, 0);
    rig.engine.run_cycle(&mut cycle);
    assert_eq!(channel.volume(), f32::NEG_INFINITY);
}

#[test]
fn balance_pickup_latches_within_dead_zone() {
    let mut rig = rig(MixerConfig::new("test"));
    rig.mixer.set_midi_behavior(MidiBehavior::PickUp);
    let channel = rig.mixer.add_channel("in1", false).unwrap();
    channel.set_balance_midi_cc(30).unwrap();
    channel.set_balance(0.5);

    // Hard-left is nowhere near the knob: ignored.
    let mut cycle = MockCycle::new(16).cc(30, 0);
    rig.engine.run_cycle(&mut cycle);
    assert_relative_eq!(channel.balance(), 0.5, epsilon = 1e-6);
    assert!(!channel.midi_cc_balance_picked_up());

    // A value within 1/64 of the current balance latches and writes.
    let matching = mixboard_core::balance_to_cc(0.5);
    let mut cycle = MockCycle::new(16).cc(30, matching);
    rig.engine.run_cycle(&mut cycle);
    assert!(channel.midi_cc_balance_picked_up());

    let mut cycle = MockCycle::new(16).cc(30, 0);
    rig.engine.run_cycle(&mut cycle);
    assert_relative_eq!(channel.balance(), -1.0, epsilon = 1e-6);
}

#[test]
fn external_write_drops_pickup_latch() {
    let mut rig = rig(MixerConfig::new("test"));
    rig.mixer.set_midi_behavior(MidiBehavior::PickUp);
    let channel = input_with_cc(&rig, 7);
    channel.set_midi_cc_volume_picked_up(true);

    channel.set_volume(-12.0);
    assert!(!channel.midi_cc_volume_picked_up());
}

#[test]
fn midi_out_echoes_control_side_volume_change() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = rig.mixer.add_channel("in1", false).unwrap();
    channel.set_midi_scale(Scale::standard());
    channel.set_volume_midi_cc(11).unwrap();

    channel.set_volume(-3.0);

    let mut cycle = MockCycle::new(64);
    rig.engine.run_cycle(&mut cycle);

    assert_eq!(cycle.midi_out, vec![[0xB0, 11, volume_cc_value(-3.0)]]);

    // Unchanged state produces no further feedback.
    let mut cycle = MockCycle::new(64);
    rig.engine.run_cycle(&mut cycle);
    assert!(cycle.midi_out.is_empty());
}

#[test]
fn repeated_cc_value_echoes_at_most_once() {
    let mut rig = rig(MixerConfig::new("test"));
    let _channel = input_with_cc(&rig, 20);

    let mut cycle = MockCycle::new(64).cc(20, 100).cc(20, 100);
    rig.engine.run_cycle(&mut cycle);

    let echoes = cycle
        .midi_out
        .iter()
        .filter(|msg| msg[1] == 20)
        .count();
    assert_eq!(echoes, 1);
}

#[test]
fn balance_cc_mapping_endpoints() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = rig.mixer.add_channel("in1", false).unwrap();
    channel.set_balance_midi_cc(30).unwrap();

    for (cc_value, expected) in [
        (0u8, -1.0f32),
        (63, -1.0 / 64.0),
        (64, 0.0),
        (127, 1.0),
    ] {
        let mut cycle = MockCycle::new(16).cc(30, cc_value);
        rig.engine.run_cycle(&mut cycle);
        assert_relative_eq!(channel.balance(), expected, epsilon = 1e-6);
    }
}

#[test]
fn mute_and_solo_ccs_toggle_state() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = rig.mixer.add_channel("in1", false).unwrap();
    channel.set_mute_midi_cc(40).unwrap();
    channel.set_solo_midi_cc(41).unwrap();

    let mut cycle = MockCycle::new(16).cc(40, 127).cc(41, 127);
    rig.engine.run_cycle(&mut cycle);
    assert!(channel.is_muted());
    assert!(channel.is_soloed());

    let mut cycle = MockCycle::new(16).cc(40, 0).cc(41, 0);
    rig.engine.run_cycle(&mut cycle);
    assert!(!channel.is_muted());
    assert!(!channel.is_soloed());
}

#[test]
fn mute_flip_emits_feedback_with_state() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = rig.mixer.add_channel("in1", false).unwrap();
    channel.set_mute_midi_cc(40).unwrap();

    channel.mute();
    let mut cycle = MockCycle::new(16);
    rig.engine.run_cycle(&mut cycle);
    assert_eq!(cycle.midi_out, vec![[0xB0, 40, 127]]);

    channel.unmute();
    let mut cycle = MockCycle::new(16);
    rig.engine.run_cycle(&mut cycle);
    assert_eq!(cycle.midi_out, vec![[0xB0, 40, 0]]);
}

#[test]
fn last_midi_cc_tracks_any_valid_cc() {
    let mut rig = rig(MixerConfig::new("test"));
    assert_eq!(rig.mixer.last_midi_cc(), -1);

    // Unbound CCs still update the learn source.
    let mut cycle = MockCycle::new(16).cc(99, 5);
    rig.engine.run_cycle(&mut cycle);
    assert_eq!(rig.mixer.last_midi_cc(), 99);
}

#[test]
fn malformed_midi_is_skipped() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = input_with_cc(&rig, 7);

    let mut cycle = MockCycle::new(16);
    // Wrong status nibble.
    cycle.midi_in.push(MidiEvent {
        time: 0,
        len: 3,
        data: [0x90, 7, 100],
    });
    // Wrong length.
    cycle.midi_in.push(MidiEvent {
        time: 0,
        len: 2,
        data: [0xB0, 7, 0],
    });
    rig.engine.run_cycle(&mut cycle);

    assert_eq!(rig.mixer.last_midi_cc(), -1);
    assert!(!channel.midi_in_got_events());
}

#[test]
fn channel_nibble_is_ignored() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = input_with_cc(&rig, 7);

    let mut cycle = MockCycle::new(16);
    cycle.midi_in.push(MidiEvent {
        time: 0,
        len: 3,
        data: [0xB5, 7, 127],
    });
    rig.engine.run_cycle(&mut cycle);

    assert_relative_eq!(channel.volume(), 0.0, epsilon = 1e-4);
}

#[test]
fn autoset_assigns_and_feedback_uses_it() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = rig.mixer.add_channel("in1", false).unwrap();
    channel.set_midi_scale(Scale::standard());

    let cc = channel.autoset_volume_midi_cc().unwrap();
    assert_eq!(cc, 11);
    assert_eq!(channel.volume_midi_cc(), Some(11));

    channel.set_volume(0.0);
    let mut cycle = MockCycle::new(16);
    rig.engine.run_cycle(&mut cycle);
    assert_eq!(cycle.midi_out, vec![[0xB0, 11, 127]]);
}

#[test]
fn rebinding_moves_dispatch() {
    let mut rig = rig(MixerConfig::new("test"));
    let channel = input_with_cc(&rig, 7);
    channel.set_volume_midi_cc(8).unwrap();

    // The old slot no longer drives the channel.
    let mut cycle = MockCycle::new(16).cc(7, 127);
    rig.engine.run_cycle(&mut cycle);
    assert_eq!(channel.volume(), f32::NEG_INFINITY);

    let mut cycle = MockCycle::new(16).cc(8, 127);
    rig.engine.run_cycle(&mut cycle);
    assert_relative_eq!(channel.volume(), 0.0, epsilon = 1e-4);
}
