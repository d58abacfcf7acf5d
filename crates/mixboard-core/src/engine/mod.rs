//! The audio-side engine: everything that runs inside the host's process
//! callback.
//!
//! One [`run_cycle`](Engine::run_cycle) call handles a full period: drain
//! the serialized command stream, pull shared targets, interpret incoming
//! MIDI, compute per-input frames, mix every output, and emit CC feedback.
//! Nothing in this module allocates, blocks, or takes a lock on the audio
//! path; removed channels are shipped back to the control plane for
//! teardown.

mod strip;

pub use strip::{MAX_BLOCK_SIZE, PEAK_FRAMES_CHUNK};
pub(crate) use strip::{split_gain, OutputStrip, Strip};

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::channel::{MixerShared, StripRef, MAX_CHANNELS};
use crate::command::{Command, Reclaim, RoutingKind};
use crate::fade::{db_to_value, value_to_db};
use crate::graph::{MidiEvent, ProcessCycle};
use crate::midi::{self, CcParam, MidiBehavior};
use crate::registry::Binding;

/// The realtime mixer engine.
///
/// Owned by the host backend after launch; the backend invokes
/// [`run_cycle`](Engine::run_cycle) once per period and forwards host
/// notifications through [`apply_buffer_size`](Engine::apply_buffer_size)
/// and the shared state's sample-rate request.
pub struct Engine {
    inputs: Vec<Option<Box<Strip>>>,
    outputs: Vec<Option<Box<OutputStrip>>>,
    /// Input-slot bitmask of globally soloed channels.
    global_solo: u64,
    /// Audio-side CC dispatch table, kept consistent by the command stream.
    cc_map: [Option<Binding>; 128],
    commands: Receiver<Command>,
    reclaim: Sender<Reclaim>,
    shared: Arc<MixerShared>,
    sample_rate: u32,
    buffer_size: u32,
}

impl Engine {
    pub(crate) fn new(
        commands: Receiver<Command>,
        reclaim: Sender<Reclaim>,
        shared: Arc<MixerShared>,
    ) -> Self {
        Self {
            inputs: (0..MAX_CHANNELS).map(|_| None).collect(),
            outputs: (0..MAX_CHANNELS).map(|_| None).collect(),
            global_solo: 0,
            cc_map: [None; 128],
            commands,
            reclaim,
            shared,
            sample_rate: 48000,
            buffer_size: 1024,
        }
    }

    /// Mixer-wide shared state; backends keep a clone for host
    /// notifications.
    pub fn shared(&self) -> Arc<MixerShared> {
        Arc::clone(&self.shared)
    }

    /// Record the host's actual rates. Called by the backend between client
    /// creation and activation.
    pub fn init_timing(&mut self, sample_rate: u32, buffer_size: u32) {
        self.sample_rate = sample_rate;
        self.buffer_size = buffer_size;
    }

    /// React to a host period-size change. Safe to call between process
    /// cycles; re-derives the K-meter ballistics of every channel.
    pub fn apply_buffer_size(&mut self, buffer_size: u32) {
        self.buffer_size = buffer_size;
        let sample_rate = self.sample_rate;
        for strip in self.strips_mut() {
            strip.apply_buffer_size(buffer_size, sample_rate);
        }
    }

    fn apply_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        let buffer_size = self.buffer_size;
        for strip in self.strips_mut() {
            strip.apply_sample_rate(sample_rate, buffer_size);
        }
    }

    /// Process one host period.
    pub fn run_cycle(&mut self, cycle: &mut dyn ProcessCycle) {
        if let Some(rate) = self.shared.take_pending_sample_rate() {
            self.apply_sample_rate(rate);
        }

        while let Ok(command) = self.commands.try_recv() {
            self.apply_command(command);
        }

        let nframes = cycle.frames().min(MAX_BLOCK_SIZE);
        let kmetering = self.shared.kmetering();

        self.sync_strips();

        for i in 0..cycle.midi_in().len() {
            let event = cycle.midi_in()[i];
            self.handle_midi_event(event);
        }

        // Per-input pre/post-fader frames and channel metering.
        for strip in self.inputs.iter_mut().flatten() {
            let left = cycle.capture(strip.port_left);
            match strip.port_right {
                Some(port) => {
                    let right = cycle.capture(port);
                    strip.copy_input(nframes, left, Some(right));
                }
                None => strip.copy_input(nframes, left, None),
            }
            strip.compute_frames(nframes, kmetering);
        }

        // Per-output mix-down.
        let inputs = &self.inputs;
        let global_solo = self.global_solo;
        for output in self.outputs.iter_mut().flatten() {
            if output.system && !output_connected(output, cycle) {
                continue;
            }

            mix_output(output, inputs, global_solo, nframes, kmetering);

            if output.base.out_mute {
                cycle.silence(output.base.port_left);
                if let Some(port) = output.base.port_right {
                    cycle.silence(port);
                }
            } else {
                cycle.playback(output.base.port_left, &output.tmp_left[..nframes]);
                if let Some(port) = output.base.port_right {
                    cycle.playback(port, &output.tmp_right[..nframes]);
                }
            }
        }

        self.emit_midi_out(cycle);
    }

    fn strips_mut(&mut self) -> impl Iterator<Item = &mut Strip> + '_ {
        self.inputs
            .iter_mut()
            .flatten()
            .map(|strip| strip.as_mut())
            .chain(
                self.outputs
                    .iter_mut()
                    .flatten()
                    .map(|output| &mut output.base),
            )
    }

    fn strip_mut(&mut self, target: StripRef) -> Option<&mut Strip> {
        match target {
            StripRef::Input(slot) => self
                .inputs
                .get_mut(slot)
                .and_then(|s| s.as_mut())
                .map(|s| s.as_mut()),
            StripRef::Output(slot) => self
                .outputs
                .get_mut(slot)
                .and_then(|s| s.as_mut())
                .map(|o| &mut o.base),
        }
    }

    fn sync_strips(&mut self) {
        let mut solo_mask = self.global_solo;
        for strip in self.inputs.iter_mut().flatten() {
            if strip.sync_targets() {
                let bit = 1u64 << strip.slot;
                if strip.solo {
                    solo_mask |= bit;
                } else {
                    solo_mask &= !bit;
                }
            }
        }
        self.global_solo = solo_mask;
        for output in self.outputs.iter_mut().flatten() {
            output.base.sync_targets();
        }
    }

    /// Interpret one incoming MIDI event per the CC dispatch table.
    fn handle_midi_event(&mut self, event: MidiEvent) {
        if event.len != 3
            || event.data[0] & 0xF0 != 0xB0
            || event.data[1] > 127
            || event.data[2] > 127
        {
            return;
        }
        let cc = event.data[1];
        let value = event.data[2];

        self.shared.set_last_midi_cc(cc as i8);

        let Some(binding) = self.cc_map[cc as usize] else {
            return;
        };
        let behavior = self.shared.midi_behavior();

        let mut solo_flip: Option<bool> = None;
        {
            let Some(strip) = self.strip_mut(binding.target) else {
                return;
            };

            match binding.param {
                CcParam::Volume => {
                    if let Some(scale) = strip.shared.midi_scale() {
                        let db = scale.norm_to_db(value as f64 / 127.0);
                        let target = db_to_value(db as f32);
                        if behavior == MidiBehavior::PickUp && !strip.shared.volume_picked_up() {
                            let current_cc = (127.0
                                * scale.db_to_norm(value_to_db(strip.volume.current()) as f64))
                            .round() as i64;
                            if value as i64 == current_cc {
                                strip.shared.set_volume_picked_up(true);
                            }
                        }
                        if behavior == MidiBehavior::JumpToValue
                            || strip.shared.volume_picked_up()
                        {
                            strip.write_volume_from_midi(target);
                        }
                    }
                }
                CcParam::Balance => {
                    let target = midi::cc_to_balance(value);
                    if behavior == MidiBehavior::PickUp
                        && !strip.shared.balance_picked_up()
                        && (strip.balance.target() - target).abs() < midi::BALANCE_DEAD_ZONE
                    {
                        strip.shared.set_balance_picked_up(true);
                    }
                    if behavior == MidiBehavior::JumpToValue || strip.shared.balance_picked_up() {
                        strip.write_balance_from_midi(target);
                    }
                }
                CcParam::Mute => {
                    strip.write_mute_from_midi(value >= 64);
                }
                CcParam::Solo => {
                    let on = value >= 64;
                    if strip.solo != on {
                        strip.solo = on;
                        strip.shared.set_solo(on);
                        strip.midi_out_bits |= CcParam::Solo.bit();
                        solo_flip = Some(on);
                    }
                }
            }

            strip.shared.note_midi_event();
            if let Some(observer) = &strip.observer {
                observer.midi_changed();
            }
        }

        if let (Some(on), StripRef::Input(slot)) = (solo_flip, binding.target) {
            let bit = 1u64 << slot;
            if on {
                self.global_solo |= bit;
            } else {
                self.global_solo &= !bit;
            }
        }
    }

    /// Echo CC feedback for every parameter changed this period.
    fn emit_midi_out(&mut self, cycle: &mut dyn ProcessCycle) {
        let inputs = self.inputs.iter_mut().flatten().map(|s| s.as_mut());
        let outputs = self
            .outputs
            .iter_mut()
            .flatten()
            .map(|output| &mut output.base);

        for strip in inputs.chain(outputs) {
            if strip.midi_out_bits == 0 {
                continue;
            }

            if strip.midi_out_bits & CcParam::Volume.bit() != 0 {
                if let (Some(cc), Some(scale)) =
                    (strip.cc_index[CcParam::Volume.index()], strip.shared.midi_scale())
                {
                    let norm = scale.db_to_norm(value_to_db(strip.volume.target()) as f64);
                    let value = (127.0 * norm).round().clamp(0.0, 127.0) as u8;
                    cycle.midi_out([0xB0, cc, value]);
                }
            }
            if strip.midi_out_bits & CcParam::Balance.bit() != 0 {
                if let Some(cc) = strip.cc_index[CcParam::Balance.index()] {
                    cycle.midi_out([0xB0, cc, midi::balance_to_cc(strip.balance.target())]);
                }
            }
            if strip.midi_out_bits & CcParam::Mute.bit() != 0 {
                if let Some(cc) = strip.cc_index[CcParam::Mute.index()] {
                    cycle.midi_out([0xB0, cc, if strip.out_mute { 127 } else { 0 }]);
                }
            }
            if strip.midi_out_bits & CcParam::Solo.bit() != 0 {
                if let Some(cc) = strip.cc_index[CcParam::Solo.index()] {
                    cycle.midi_out([0xB0, cc, if strip.solo { 127 } else { 0 }]);
                }
            }

            strip.midi_out_bits = 0;
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::AddInput(strip) => {
                let slot = strip.slot;
                debug_assert!(self.inputs[slot].is_none(), "input slot {slot} occupied");
                self.inputs[slot] = Some(strip);
            }
            Command::AddOutput(output) => {
                let slot = output.base.slot;
                debug_assert!(self.outputs[slot].is_none(), "output slot {slot} occupied");
                self.outputs[slot] = Some(output);
            }
            Command::RemoveInput(slot) => {
                if let Some(strip) = self.inputs[slot].take() {
                    self.global_solo &= !(1u64 << slot);
                    for output in self.outputs.iter_mut().flatten() {
                        output.clear_input(slot);
                    }
                    self.scrub_cc_map(StripRef::Input(slot));
                    let _ = self.reclaim.try_send(Reclaim::Input(strip));
                }
            }
            Command::RemoveOutput(slot) => {
                if let Some(output) = self.outputs[slot].take() {
                    self.scrub_cc_map(StripRef::Output(slot));
                    let _ = self.reclaim.try_send(Reclaim::Output(output));
                }
            }
            Command::SetCcSlot { cc, binding } => {
                if let Some(old) = self.cc_map[cc as usize] {
                    if let Some(strip) = self.strip_mut(old.target) {
                        if strip.cc_index[old.param.index()] == Some(cc) {
                            strip.cc_index[old.param.index()] = None;
                        }
                    }
                }
                self.cc_map[cc as usize] = binding;
                if let Some(binding) = binding {
                    if let Some(strip) = self.strip_mut(binding.target) {
                        strip.cc_index[binding.param.index()] = Some(cc);
                    }
                }
            }
            Command::SetRouting {
                output,
                input,
                kind,
                on,
            } => {
                if let Some(output) = self.outputs[output].as_mut() {
                    let bit = 1u64 << input;
                    let mask = match kind {
                        RoutingKind::Solo => &mut output.soloed,
                        RoutingKind::Mute => &mut output.muted,
                        RoutingKind::Prefader => &mut output.prefader_members,
                    };
                    if on {
                        *mask |= bit;
                    } else {
                        *mask &= !bit;
                    }
                }
            }
            Command::SetOutputPrefader { output, on } => {
                if let Some(output) = self.outputs[output].as_mut() {
                    output.prefader = on;
                }
            }
            Command::SetObserver { strip, observer } => {
                if let Some(strip) = self.strip_mut(strip) {
                    let old = core::mem::replace(&mut strip.observer, observer);
                    if let Some(old) = old {
                        let _ = self.reclaim.try_send(Reclaim::Observer(old));
                    }
                }
            }
        }
    }

    /// Drop any dispatch-table references to a removed channel.
    fn scrub_cc_map(&mut self, target: StripRef) {
        for slot in self.cc_map.iter_mut() {
            if matches!(slot, Some(binding) if binding.target == target) {
                *slot = None;
            }
        }
    }
}

fn output_connected(output: &OutputStrip, cycle: &dyn ProcessCycle) -> bool {
    if cycle.connected(output.base.port_left) {
        return true;
    }
    match output.base.port_right {
        Some(port) => cycle.connected(port),
        None => false,
    }
}

/// Sum the routed inputs into one output channel and run its fader stage
/// and meters.
fn mix_output(
    output: &mut OutputStrip,
    inputs: &[Option<Box<Strip>>],
    global_solo: u64,
    nframes: usize,
    kmetering: bool,
) {
    let stereo = output.base.stereo;

    output.tmp_left[..nframes].fill(0.0);
    if stereo {
        output.tmp_right[..nframes].fill(0.0);
    }

    for strip in inputs.iter().flatten() {
        let bit = 1u64 << strip.slot;

        // Skip inputs muted for this output, or muted at the channel.
        if output.muted & bit != 0 || strip.out_mute {
            continue;
        }

        // An input is audible on this output when no applicable solo set
        // is active, when it is globally soloed, or when it is soloed for
        // this output specifically. System outputs ignore global solo.
        let global_active = global_solo != 0 && !output.system;
        let audible = (!global_active && output.soloed == 0)
            || (global_active && global_solo & bit != 0)
            || (output.soloed & bit != 0);
        if !audible {
            continue;
        }

        let use_prefader = output.prefader || output.prefader_members & bit != 0;
        let (src_left, src_right) = if use_prefader {
            (&strip.prefader_left, &strip.prefader_right)
        } else {
            (&strip.frames_left, &strip.frames_right)
        };

        for i in 0..nframes {
            let frame_left = src_left[i];
            if frame_left.is_nan() {
                break;
            }
            output.tmp_left[i] += frame_left;

            if stereo {
                let frame_right = src_right[i];
                if frame_right.is_nan() {
                    break;
                }
                output.tmp_right[i] += frame_right;
            }
        }
    }

    // Pre-fader tap of the output is the raw sum.
    output.base.prefader_left[..nframes].copy_from_slice(&output.tmp_left[..nframes]);
    if stereo {
        output.base.prefader_right[..nframes].copy_from_slice(&output.tmp_right[..nframes]);
    }

    let steps = output.base.transition_steps();
    for i in 0..nframes {
        if !output.prefader {
            let vol = output.base.volume.value(steps);
            let bal = output.base.balance.value(steps);
            let (vol_l, vol_r) = split_gain(vol, bal, stereo);
            output.tmp_left[i] *= vol_l;
            if stereo {
                output.tmp_right[i] *= vol_r;
            }
        }

        let post_left = output.tmp_left[i].abs();
        let pre_left = output.base.prefader_left[i].abs();
        if stereo {
            let post_right = output.tmp_right[i].abs();
            let pre_right = output.base.prefader_right[i].abs();
            output
                .base
                .track_peaks(post_left, Some(post_right), pre_left, Some(pre_right));
        } else {
            output.base.track_peaks(post_left, None, pre_left, None);
        }

        output.base.volume.advance(steps);
        output.base.balance.advance(steps);
    }

    output.base.publish_abspeaks();

    if kmetering {
        let (tmp_left, tmp_right) = (&output.tmp_left, &output.tmp_right);
        output.base.process_kmeters(
            nframes,
            &tmp_left[..nframes],
            stereo.then(|| &tmp_right[..nframes]),
        );
        output.base.publish_kmeters();
    }
}
