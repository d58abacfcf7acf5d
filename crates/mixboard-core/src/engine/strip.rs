//! Audio-side channel strips.
//!
//! A [`Strip`] is the engine's private view of one channel: ramp state,
//! peak/K-meter accumulators, scratch buffers, and CC bookkeeping. Output
//! channels compose a strip with routing masks and mix scratch. Everything
//! here runs on the audio thread; the only way in is the shared atomic
//! block and the command stream, the only way out is publication through
//! the same shared block.

use std::sync::Arc;

use crate::channel::{ChannelShared, MeterMode, MidiChangeObserver};
use crate::fade::{transition_steps, Curve, Ramp};
use crate::graph::PortId;
use crate::kmeter::Kmeter;
use crate::midi::CcParam;

/// Largest host period the engine accepts; scratch buffers are sized for
/// this at channel creation so the callback never allocates.
pub const MAX_BLOCK_SIZE: usize = 4 * 4096;

/// Samples between publications of the "meter" read surface. Gives the UI
/// a stable refresh independent of the host period.
pub const PEAK_FRAMES_CHUNK: u32 = 4800;

pub(crate) struct Strip {
    pub(crate) slot: usize,
    pub(crate) stereo: bool,
    pub(crate) port_left: PortId,
    pub(crate) port_right: Option<PortId>,
    pub(crate) shared: Arc<ChannelShared>,

    pub(crate) volume: Ramp,
    pub(crate) balance: Ramp,
    steps: u32,
    pub(crate) out_mute: bool,
    pub(crate) solo: bool,

    peak_frames: u32,
    peak_left_prefader: f32,
    peak_left_postfader: f32,
    peak_right_prefader: f32,
    peak_right_postfader: f32,
    abspeak_prefader: f32,
    abspeak_postfader: f32,

    kmeter_post_left: Kmeter,
    kmeter_post_right: Kmeter,
    kmeter_pre_left: Kmeter,
    kmeter_pre_right: Kmeter,

    /// Post-fader frames of the current period.
    pub(crate) frames_left: Vec<f32>,
    pub(crate) frames_right: Vec<f32>,
    /// Raw (pre-fader) frames of the current period.
    pub(crate) prefader_left: Vec<f32>,
    pub(crate) prefader_right: Vec<f32>,

    /// CC numbers bound to volume/balance/mute/solo, by `CcParam::index()`.
    pub(crate) cc_index: [Option<u8>; 4],
    /// `CcParam` bits still to be echoed as CC feedback this period.
    pub(crate) midi_out_bits: u8,
    pub(crate) observer: Option<Box<dyn MidiChangeObserver>>,
}

impl Strip {
    pub(crate) fn new(
        slot: usize,
        stereo: bool,
        port_left: PortId,
        port_right: Option<PortId>,
        shared: Arc<ChannelShared>,
        sample_rate: u32,
        buffer_size: u32,
    ) -> Self {
        Self {
            slot,
            stereo,
            port_left,
            port_right,
            shared,
            volume: Ramp::new(Curve::Db, 0.0),
            balance: Ramp::new(Curve::Linear, 0.0),
            steps: transition_steps(sample_rate),
            out_mute: false,
            solo: false,
            peak_frames: 0,
            peak_left_prefader: 0.0,
            peak_left_postfader: 0.0,
            peak_right_prefader: 0.0,
            peak_right_postfader: 0.0,
            abspeak_prefader: 0.0,
            abspeak_postfader: 0.0,
            kmeter_post_left: Kmeter::new(buffer_size, sample_rate),
            kmeter_post_right: Kmeter::new(buffer_size, sample_rate),
            kmeter_pre_left: Kmeter::new(buffer_size, sample_rate),
            kmeter_pre_right: Kmeter::new(buffer_size, sample_rate),
            frames_left: vec![0.0; MAX_BLOCK_SIZE],
            frames_right: vec![0.0; MAX_BLOCK_SIZE],
            prefader_left: vec![0.0; MAX_BLOCK_SIZE],
            prefader_right: vec![0.0; MAX_BLOCK_SIZE],
            cc_index: [None; 4],
            midi_out_bits: 0,
            observer: None,
        }
    }

    /// Pull targets published by control threads into the ramp state and
    /// service meter reset requests. Returns whether the solo flag flipped
    /// (the engine keeps the global solo mask).
    pub(crate) fn sync_targets(&mut self) -> bool {
        let volume = self.shared.volume();
        if volume != self.volume.target() && self.volume.retarget(volume, self.steps) {
            self.midi_out_bits |= CcParam::Volume.bit();
        }

        let balance = self.shared.balance();
        if balance != self.balance.target() && self.balance.retarget(balance, self.steps) {
            self.midi_out_bits |= CcParam::Balance.bit();
        }

        let mute = self.shared.is_muted();
        if mute != self.out_mute {
            self.out_mute = mute;
            self.midi_out_bits |= CcParam::Mute.bit();
        }

        let solo = self.shared.is_soloed();
        let solo_changed = solo != self.solo;
        if solo_changed {
            self.solo = solo;
            self.midi_out_bits |= CcParam::Solo.bit();
        }

        if self.shared.meter.take_reset(MeterMode::PreFader) {
            self.abspeak_prefader = 0.0;
            self.shared.meter.publish_abspeak(MeterMode::PreFader, 0.0);
            self.shared.set_nan_detected(false);
        }
        if self.shared.meter.take_reset(MeterMode::PostFader) {
            self.abspeak_postfader = 0.0;
            self.shared.meter.publish_abspeak(MeterMode::PostFader, 0.0);
            self.shared.set_nan_detected(false);
        }

        if self.shared.kmeter_post_left.take_reset() {
            self.kmeter_post_left.reset_rms();
        }
        if self.shared.kmeter_post_right.take_reset() {
            self.kmeter_post_right.reset_rms();
        }
        if self.shared.kmeter_pre_left.take_reset() {
            self.kmeter_pre_left.reset_rms();
        }
        if self.shared.kmeter_pre_right.take_reset() {
            self.kmeter_pre_right.reset_rms();
        }

        solo_changed
    }

    /// Write a volume target from the MIDI path, mirroring it out to the
    /// shared block and flagging CC feedback on change.
    pub(crate) fn write_volume_from_midi(&mut self, value: f32) {
        if self.volume.retarget(value, self.steps) {
            self.midi_out_bits |= CcParam::Volume.bit();
        }
        self.shared.set_volume(value, true);
    }

    pub(crate) fn write_balance_from_midi(&mut self, value: f32) {
        if self.balance.retarget(value, self.steps) {
            self.midi_out_bits |= CcParam::Balance.bit();
        }
        self.shared.set_balance(value, true);
    }

    pub(crate) fn write_mute_from_midi(&mut self, on: bool) {
        if self.out_mute != on {
            self.out_mute = on;
            self.midi_out_bits |= CcParam::Mute.bit();
        }
        self.shared.set_mute(on);
    }

    /// Recompute every rate-derived constant.
    pub(crate) fn apply_sample_rate(&mut self, sample_rate: u32, buffer_size: u32) {
        self.steps = transition_steps(sample_rate);
        self.kmeter_post_left.set_sample_rate(buffer_size, sample_rate);
        self.kmeter_post_right.set_sample_rate(buffer_size, sample_rate);
        self.kmeter_pre_left.set_sample_rate(buffer_size, sample_rate);
        self.kmeter_pre_right.set_sample_rate(buffer_size, sample_rate);
    }

    /// Recompute the period-derived K-meter ballistics.
    pub(crate) fn apply_buffer_size(&mut self, buffer_size: u32, sample_rate: u32) {
        self.kmeter_post_left.set_period(buffer_size, sample_rate);
        self.kmeter_post_right.set_period(buffer_size, sample_rate);
        self.kmeter_pre_left.set_period(buffer_size, sample_rate);
        self.kmeter_pre_right.set_period(buffer_size, sample_rate);
    }

    /// Copy the host capture buffers into the pre-fader scratch. Mono
    /// channels mirror the left lane so pre-fader taps stay stereo-safe.
    pub(crate) fn copy_input(&mut self, nframes: usize, left: &[f32], right: Option<&[f32]>) {
        let n = nframes.min(left.len());
        self.prefader_left[..n].copy_from_slice(&left[..n]);
        self.prefader_left[n..nframes].fill(0.0);

        match right {
            Some(right) => {
                let n = nframes.min(right.len());
                self.prefader_right[..n].copy_from_slice(&right[..n]);
                self.prefader_right[n..nframes].fill(0.0);
            }
            None => {
                let (left, right) = (&self.prefader_left, &mut self.prefader_right);
                right[..nframes].copy_from_slice(&left[..nframes]);
            }
        }
    }

    /// Compute post-fader frames, peaks, and K-meters for one period.
    ///
    /// A non-finite input sample latches NaN detection, poisons the frame,
    /// and stops processing this channel for the rest of the block.
    pub(crate) fn compute_frames(&mut self, nframes: usize, kmetering: bool) {
        let steps = self.steps;

        for i in 0..nframes {
            let in_left = self.prefader_left[i];
            if !in_left.is_finite() {
                self.shared.set_nan_detected(true);
                self.frames_left[i] = f32::NAN;
                break;
            }

            let vol = self.volume.value(steps);
            let bal = self.balance.value(steps);
            let (vol_l, vol_r) = split_gain(vol, bal, self.stereo);

            let frame_left = in_left * vol_l;
            let frame_right;
            if self.stereo {
                let in_right = self.prefader_right[i];
                if !in_right.is_finite() {
                    self.shared.set_nan_detected(true);
                    self.frames_right[i] = f32::NAN;
                    break;
                }
                frame_right = in_right * vol_r;
            } else {
                frame_right = in_left * vol_r;
            }
            self.frames_left[i] = frame_left;
            self.frames_right[i] = frame_right;

            if self.stereo {
                let in_right = self.prefader_right[i];
                self.track_peaks(
                    frame_left.abs(),
                    Some(frame_right.abs()),
                    in_left.abs(),
                    Some(in_right.abs()),
                );
            } else {
                // Mono strips meter the combined post-fader energy of both
                // derived lanes in the left slot.
                let post = (frame_left.abs() + frame_right.abs()) / 2.0;
                self.track_peaks(post, None, in_left.abs(), None);
            }

            self.volume.advance(steps);
            self.balance.advance(steps);
        }

        self.publish_abspeaks();

        if kmetering {
            self.kmeter_post_left.process(&self.frames_left[..nframes]);
            self.kmeter_pre_left.process(&self.prefader_left[..nframes]);
            if self.stereo {
                self.kmeter_post_right.process(&self.frames_right[..nframes]);
                self.kmeter_pre_right.process(&self.prefader_right[..nframes]);
            }
            self.publish_kmeters();
        }
    }

    /// Fold one sample into the peak accumulators and publish the meter
    /// mirrors every `PEAK_FRAMES_CHUNK` samples.
    pub(crate) fn track_peaks(
        &mut self,
        post_left: f32,
        post_right: Option<f32>,
        pre_left: f32,
        pre_right: Option<f32>,
    ) {
        if self.peak_left_prefader < pre_left {
            self.peak_left_prefader = pre_left;
        }
        if self.peak_left_postfader < post_left {
            self.peak_left_postfader = post_left;
        }
        if post_left > self.abspeak_postfader {
            self.abspeak_postfader = post_left;
        }
        if pre_left > self.abspeak_prefader {
            self.abspeak_prefader = pre_left;
        }

        if let Some(post_right) = post_right {
            let pre_right = pre_right.unwrap_or(0.0);
            if self.peak_right_prefader < pre_right {
                self.peak_right_prefader = pre_right;
            }
            if self.peak_right_postfader < post_right {
                self.peak_right_postfader = post_right;
            }
            if post_right > self.abspeak_postfader {
                self.abspeak_postfader = post_right;
            }
            if pre_right > self.abspeak_prefader {
                self.abspeak_prefader = pre_right;
            }
        }

        self.peak_frames += 1;
        if self.peak_frames >= PEAK_FRAMES_CHUNK {
            self.shared.meter.publish_meter(
                MeterMode::PreFader,
                self.peak_left_prefader,
                self.peak_right_prefader,
            );
            self.shared.meter.publish_meter(
                MeterMode::PostFader,
                self.peak_left_postfader,
                self.peak_right_postfader,
            );
            self.peak_left_prefader = 0.0;
            self.peak_left_postfader = 0.0;
            self.peak_right_prefader = 0.0;
            self.peak_right_postfader = 0.0;
            self.peak_frames = 0;
        }
    }

    pub(crate) fn publish_abspeaks(&self) {
        self.shared
            .meter
            .publish_abspeak(MeterMode::PreFader, self.abspeak_prefader);
        self.shared
            .meter
            .publish_abspeak(MeterMode::PostFader, self.abspeak_postfader);
    }

    /// Feed the output-stage K-meters: post-fader from the mixed buffers,
    /// pre-fader from this strip's own scratch.
    pub(crate) fn process_kmeters(
        &mut self,
        nframes: usize,
        post_left: &[f32],
        post_right: Option<&[f32]>,
    ) {
        self.kmeter_post_left.process(post_left);
        if let Some(post_right) = post_right {
            self.kmeter_post_right.process(post_right);
        }
        self.kmeter_pre_left.process(&self.prefader_left[..nframes]);
        if self.stereo {
            self.kmeter_pre_right.process(&self.prefader_right[..nframes]);
        }
    }

    pub(crate) fn publish_kmeters(&self) {
        self.shared
            .kmeter_post_left
            .publish(self.kmeter_post_left.dpk(), self.kmeter_post_left.rms());
        self.shared
            .kmeter_pre_left
            .publish(self.kmeter_pre_left.dpk(), self.kmeter_pre_left.rms());
        if self.stereo {
            self.shared
                .kmeter_post_right
                .publish(self.kmeter_post_right.dpk(), self.kmeter_post_right.rms());
            self.shared
                .kmeter_pre_right
                .publish(self.kmeter_pre_right.dpk(), self.kmeter_pre_right.rms());
        }
    }

    #[inline]
    pub(crate) fn transition_steps(&self) -> u32 {
        self.steps
    }
}

/// Derive per-lane gains from volume and balance.
///
/// Stereo strips attenuate the far side only; mono strips pan the single
/// source across both derived lanes.
#[inline]
pub(crate) fn split_gain(vol: f32, bal: f32, stereo: bool) -> (f32, f32) {
    if stereo {
        if bal > 0.0 {
            (vol * (1.0 - bal), vol)
        } else {
            (vol, vol * (1.0 + bal))
        }
    } else {
        (vol * (1.0 - bal), vol * (1.0 + bal))
    }
}

/// An output channel: a strip plus routing masks and mix scratch.
pub(crate) struct OutputStrip {
    pub(crate) base: Strip,
    /// Intermediate mix buffers, post-fader after the output stage runs.
    pub(crate) tmp_left: Vec<f32>,
    pub(crate) tmp_right: Vec<f32>,
    /// Input-slot bitmasks for this output's private routing sets.
    pub(crate) soloed: u64,
    pub(crate) muted: u64,
    pub(crate) prefader_members: u64,
    /// Feeds a downstream device; skipped when unconnected and exempt from
    /// global solo.
    pub(crate) system: bool,
    /// Tap pre-fader for every input and bypass the output fader stage.
    pub(crate) prefader: bool,
}

impl OutputStrip {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        slot: usize,
        stereo: bool,
        port_left: PortId,
        port_right: Option<PortId>,
        shared: Arc<ChannelShared>,
        sample_rate: u32,
        buffer_size: u32,
        system: bool,
    ) -> Self {
        Self {
            base: Strip::new(
                slot,
                stereo,
                port_left,
                port_right,
                shared,
                sample_rate,
                buffer_size,
            ),
            tmp_left: vec![0.0; MAX_BLOCK_SIZE],
            tmp_right: vec![0.0; MAX_BLOCK_SIZE],
            soloed: 0,
            muted: 0,
            prefader_members: 0,
            system,
            prefader: false,
        }
    }

    pub(crate) fn clear_input(&mut self, slot: usize) {
        let bit = 1u64 << slot;
        self.soloed &= !bit;
        self.muted &= !bit;
        self.prefader_members &= !bit;
    }
}
