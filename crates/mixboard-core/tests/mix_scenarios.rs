//! Mixing scenarios driven through the full stack: control handles on one
//! side, fabricated process cycles on the other.

mod common;

use approx::assert_relative_eq;
use common::{rig, MockCycle, Rig};
use mixboard_core::{MeterMode, MixerConfig};

fn stereo_main(rig: &Rig) -> mixboard_core::OutputChannelHandle {
    let main = rig
        .mixer
        .add_output_channel("MAIN", true, false)
        .expect("output channel");
    main.channel().set_volume(0.0);
    main.channel().set_balance(0.0);
    main
}

#[test]
fn mono_passthrough() {
    let mut rig = rig(MixerConfig::new("test"));
    let _main = stereo_main(&rig);
    let in1 = rig.mixer.add_channel("in1", false).unwrap();
    in1.set_volume(0.0);
    in1.set_balance(0.0);

    // Let both volume ramps reach unity before measuring.
    rig.settle();

    let pattern = [0.5, -0.5, 0.25, 0.0];
    let mut cycle = MockCycle::new(4).feed(rig.port("in1"), &pattern);
    rig.engine.run_cycle(&mut cycle);

    let left = cycle.played(rig.port("MAIN L"));
    let right = cycle.played(rig.port("MAIN R"));
    for i in 0..4 {
        assert_relative_eq!(left[i], pattern[i], epsilon = 1e-6);
        assert_relative_eq!(right[i], pattern[i], epsilon = 1e-6);
    }
}

#[test]
fn balance_hard_left_on_output() {
    let mut rig = rig(MixerConfig::new("test"));
    let main = stereo_main(&rig);
    main.channel().set_balance(-1.0);
    let in1 = rig.mixer.add_channel("in1", false).unwrap();
    in1.set_volume(0.0);

    rig.settle();

    let mut cycle = MockCycle::new(16).feed_constant(rig.port("in1"), 1.0);
    rig.engine.run_cycle(&mut cycle);

    assert_relative_eq!(cycle.played(rig.port("MAIN L"))[8], 1.0, epsilon = 1e-6);
    assert_relative_eq!(cycle.played(rig.port("MAIN R"))[8], 0.0, epsilon = 1e-6);
}

#[test]
fn global_solo_excludes_other_inputs() {
    let mut rig = rig(MixerConfig::new("test"));
    let _main = stereo_main(&rig);
    let a = rig.mixer.add_channel("A", false).unwrap();
    let b = rig.mixer.add_channel("B", false).unwrap();
    a.set_volume(0.0);
    b.set_volume(0.0);
    a.solo();
    assert!(a.is_soloed());

    rig.settle();

    let mut cycle = MockCycle::new(16)
        .feed_constant(rig.port("A"), 1.0)
        .feed_constant(rig.port("B"), 1.0);
    rig.engine.run_cycle(&mut cycle);

    // Only the soloed input is audible.
    assert_relative_eq!(cycle.played(rig.port("MAIN L"))[8], 1.0, epsilon = 1e-6);
}

#[test]
fn system_output_bypasses_global_solo() {
    let mut rig = rig(MixerConfig::new("test"));
    let monitor = rig.mixer.add_output_channel("monitor", true, true).unwrap();
    monitor.channel().set_volume(0.0);
    let a = rig.mixer.add_channel("A", false).unwrap();
    let b = rig.mixer.add_channel("B", false).unwrap();
    a.set_volume(0.0);
    b.set_volume(0.0);
    a.solo();

    // System outputs are skipped while unconnected, so every cycle here
    // marks the monitor ports connected.
    let mut warmup = MockCycle::new(common::BUFFER_SIZE as usize).connect(rig.port("monitor L"));
    rig.engine.run_cycle(&mut warmup);

    let mut cycle = MockCycle::new(16)
        .feed_constant(rig.port("A"), 1.0)
        .feed_constant(rig.port("B"), 1.0)
        .connect(rig.port("monitor L"));
    rig.engine.run_cycle(&mut cycle);

    // Both inputs mix: global solo does not route to system outputs.
    assert_relative_eq!(cycle.played(rig.port("monitor L"))[8], 2.0, epsilon = 1e-6);
}

#[test]
fn system_output_skipped_when_unconnected() {
    let mut rig = rig(MixerConfig::new("test"));
    let _monitor = rig.mixer.add_output_channel("monitor", true, true).unwrap();

    let mut cycle = MockCycle::new(16);
    rig.engine.run_cycle(&mut cycle);

    assert!(!cycle.was_played(rig.port("monitor L")));
}

#[test]
fn muted_output_plays_silence() {
    let mut rig = rig(MixerConfig::new("test"));
    let main = stereo_main(&rig);
    let in1 = rig.mixer.add_channel("in1", false).unwrap();
    in1.set_volume(0.0);
    main.channel().mute();

    rig.settle();

    let mut cycle = MockCycle::new(16).feed_constant(rig.port("in1"), 1.0);
    rig.engine.run_cycle(&mut cycle);

    assert!(cycle.played(rig.port("MAIN L")).iter().all(|&s| s == 0.0));
    assert!(cycle.played(rig.port("MAIN R")).iter().all(|&s| s == 0.0));
}

#[test]
fn muted_input_is_excluded() {
    let mut rig = rig(MixerConfig::new("test"));
    let _main = stereo_main(&rig);
    let a = rig.mixer.add_channel("A", false).unwrap();
    let b = rig.mixer.add_channel("B", false).unwrap();
    a.set_volume(0.0);
    b.set_volume(0.0);
    b.mute();

    rig.settle();

    let mut cycle = MockCycle::new(16)
        .feed_constant(rig.port("A"), 0.25)
        .feed_constant(rig.port("B"), 0.5);
    rig.engine.run_cycle(&mut cycle);

    assert_relative_eq!(cycle.played(rig.port("MAIN L"))[8], 0.25, epsilon = 1e-6);
}

#[test]
fn per_output_solo_wins_over_silence() {
    let mut rig = rig(MixerConfig::new("test"));
    let main = stereo_main(&rig);
    let a = rig.mixer.add_channel("A", false).unwrap();
    let b = rig.mixer.add_channel("B", false).unwrap();
    a.set_volume(0.0);
    b.set_volume(0.0);
    main.set_solo(&a, true);
    assert!(main.is_solo(&a));

    rig.settle();

    let mut cycle = MockCycle::new(16)
        .feed_constant(rig.port("A"), 0.25)
        .feed_constant(rig.port("B"), 0.5);
    rig.engine.run_cycle(&mut cycle);

    assert_relative_eq!(cycle.played(rig.port("MAIN L"))[8], 0.25, epsilon = 1e-6);
}

#[test]
fn prefader_member_bypasses_input_fader() {
    let mut rig = rig(MixerConfig::new("test"));
    let main = stereo_main(&rig);
    let a = rig.mixer.add_channel("A", false).unwrap();
    // Input fader left at -inf: the post-fader path would be silent.
    main.set_in_prefader(&a, true);
    assert!(main.is_in_prefader(&a));

    rig.settle();

    let mut cycle = MockCycle::new(16).feed_constant(rig.port("A"), 0.5);
    rig.engine.run_cycle(&mut cycle);

    assert_relative_eq!(cycle.played(rig.port("MAIN L"))[8], 0.5, epsilon = 1e-6);
}

#[test]
fn silence_is_preserved() {
    let mut rig = rig(MixerConfig::new("test"));
    let main = stereo_main(&rig);
    let a = rig.mixer.add_channel("A", false).unwrap();
    let b = rig.mixer.add_channel("B", false).unwrap();
    // All faders at 0 linear gain and no input signal.
    main.channel().set_volume(f32::NEG_INFINITY);
    let _ = (a, b);

    let mut cycle = MockCycle::new(64);
    rig.engine.run_cycle(&mut cycle);

    assert!(cycle.played(rig.port("MAIN L")).iter().all(|&s| s == 0.0));
    assert!(cycle.played(rig.port("MAIN R")).iter().all(|&s| s == 0.0));
}

#[test]
fn meters_publish_on_cadence() {
    let mut rig = rig(MixerConfig::new("test"));
    let _main = stereo_main(&rig);
    let in1 = rig.mixer.add_channel("in1", false).unwrap();
    in1.set_volume(0.0);

    rig.settle();

    // Nothing published yet below the cadence threshold.
    let chunk = mixboard_core::PEAK_FRAMES_CHUNK as usize;
    let mut cycle = MockCycle::new(chunk).feed_constant(rig.port("in1"), 0.8);
    rig.engine.run_cycle(&mut cycle);

    let (pre_left, _) = in1.meter(MeterMode::PreFader);
    assert_relative_eq!(pre_left, 20.0 * 0.8f32.log10(), epsilon = 1e-4);
}

#[test]
fn nan_input_latches_abspeak() {
    let mut rig = rig(MixerConfig::new("test"));
    let _main = stereo_main(&rig);
    let in1 = rig.mixer.add_channel("in1", false).unwrap();
    in1.set_volume(0.0);

    rig.settle();

    let mut cycle = MockCycle::new(4).feed(rig.port("in1"), &[0.5, f32::NAN, 0.5, 0.5]);
    rig.engine.run_cycle(&mut cycle);

    assert!(in1.abspeak(MeterMode::PostFader).is_nan());

    // Reset clears the latch and the accumulator.
    in1.abspeak_reset(MeterMode::PostFader);
    let mut cycle = MockCycle::new(4).feed(rig.port("in1"), &[0.1; 4]);
    rig.engine.run_cycle(&mut cycle);
    assert!(!in1.abspeak(MeterMode::PostFader).is_nan());
}

#[test]
fn removed_channel_goes_silent_and_frees_slot() {
    let mut rig = rig(MixerConfig::new("test"));
    let _main = stereo_main(&rig);
    let in1 = rig.mixer.add_channel("in1", false).unwrap();
    in1.set_volume(0.0);
    rig.settle();
    assert_eq!(rig.mixer.channels_count(), 1);

    let port = rig.port("in1");
    in1.remove();
    assert_eq!(rig.mixer.channels_count(), 0);

    let mut cycle = MockCycle::new(16).feed_constant(port, 1.0);
    rig.engine.run_cycle(&mut cycle);
    assert_relative_eq!(cycle.played(rig.port("MAIN L"))[8], 0.0);

    // The name and the slot are reusable immediately.
    let again = rig.mixer.add_channel("in1", false);
    assert!(again.is_ok());
}
