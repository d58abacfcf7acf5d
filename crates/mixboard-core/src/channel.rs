//! Shared channel state: the atomic blocks visible to both the control
//! plane and the audio thread.
//!
//! Each channel owns one [`ChannelShared`] block. Control handles write
//! parameter targets into it; the engine reads the targets at the top of
//! every period and publishes meter values back through it. All fields are
//! single-word atomics, so neither side ever takes a lock.

use arc_swap::ArcSwapOption;
use core::sync::atomic::{AtomicI8, AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;

use crate::lockfree::{AtomicFlag, AtomicFloat};
use crate::midi::MidiBehavior;
use crate::scale::Scale;

/// Maximum input channels and maximum output channels per mixer.
///
/// Channels live in fixed-capacity slabs and routing sets are slot
/// bitmasks, so the audio thread never allocates when membership changes.
pub const MAX_CHANNELS: usize = 64;

/// Reference to a channel slot, tagged by kind.
///
/// The audio loop dispatches on the tag; there is no pointer casting
/// between input and output channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StripRef {
    Input(usize),
    Output(usize),
}

/// Which tap of the channel a meter read refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterMode {
    PreFader,
    PostFader,
}

/// Observer invoked when incoming MIDI changes a channel parameter.
///
/// Runs on the audio thread, inside the process callback: implementations
/// must not block, allocate, or touch locks. Push a flag into a channel or
/// atomic and drain it from a control thread instead.
pub trait MidiChangeObserver: Send {
    fn midi_changed(&self);
}

/// Published state of one K-meter (peak + RMS pair).
#[derive(Debug, Default)]
pub struct KmeterShared {
    dpk: AtomicFloat,
    rms: AtomicFloat,
    /// Set by readers; the engine zeroes the RMS accumulator on seeing it.
    reset: AtomicFlag,
}

impl KmeterShared {
    /// Audio side: publish the meter values for this period.
    pub(crate) fn publish(&self, dpk: f32, rms: f32) {
        self.dpk.set(dpk);
        self.rms.set(rms);
    }

    pub(crate) fn take_reset(&self) -> bool {
        self.reset.take()
    }

    /// Control side: read `(dpk, rms)` and request an RMS reset.
    pub fn read(&self) -> (f32, f32) {
        self.reset.set(true);
        (self.dpk.get(), self.rms.get())
    }

    /// Request an RMS reset without consuming the values.
    pub fn reset(&self) {
        self.reset.set(true);
    }
}

/// Published peak-meter state of one channel.
#[derive(Debug, Default)]
pub struct MeterShared {
    pre_left: AtomicFloat,
    pre_right: AtomicFloat,
    post_left: AtomicFloat,
    post_right: AtomicFloat,
    abspeak_pre: AtomicFloat,
    abspeak_post: AtomicFloat,
    reset_pre: AtomicFlag,
    reset_post: AtomicFlag,
}

impl MeterShared {
    pub(crate) fn publish_meter(&self, mode: MeterMode, left: f32, right: f32) {
        match mode {
            MeterMode::PreFader => {
                self.pre_left.set(left);
                self.pre_right.set(right);
            }
            MeterMode::PostFader => {
                self.post_left.set(left);
                self.post_right.set(right);
            }
        }
    }

    pub(crate) fn publish_abspeak(&self, mode: MeterMode, value: f32) {
        match mode {
            MeterMode::PreFader => self.abspeak_pre.set(value),
            MeterMode::PostFader => self.abspeak_post.set(value),
        }
    }

    pub(crate) fn take_reset(&self, mode: MeterMode) -> bool {
        match mode {
            MeterMode::PreFader => self.reset_pre.take(),
            MeterMode::PostFader => self.reset_post.take(),
        }
    }

    /// Latest published `(left, right)` peak pair, linear.
    pub fn peaks(&self, mode: MeterMode) -> (f32, f32) {
        match mode {
            MeterMode::PreFader => (self.pre_left.get(), self.pre_right.get()),
            MeterMode::PostFader => (self.post_left.get(), self.post_right.get()),
        }
    }

    /// Absolute peak since the last reset, linear.
    pub fn abspeak(&self, mode: MeterMode) -> f32 {
        match mode {
            MeterMode::PreFader => self.abspeak_pre.get(),
            MeterMode::PostFader => self.abspeak_post.get(),
        }
    }

    /// Request an absolute-peak reset, applied at the next period boundary.
    pub fn request_reset(&self, mode: MeterMode) {
        match mode {
            MeterMode::PreFader => self.reset_pre.set(true),
            MeterMode::PostFader => self.reset_post.set(true),
        }
    }
}

/// Atomic state shared between one channel's control handle and the engine.
#[derive(Debug)]
pub struct ChannelShared {
    stereo: bool,
    /// Target volume as linear gain.
    volume: AtomicFloat,
    /// Target balance in `[-1, +1]`.
    balance: AtomicFloat,
    mute: AtomicFlag,
    solo: AtomicFlag,
    volume_picked_up: AtomicFlag,
    balance_picked_up: AtomicFlag,
    midi_scale: ArcSwapOption<Scale>,
    midi_in_got_events: AtomicFlag,
    nan_detected: AtomicFlag,
    pub meter: MeterShared,
    pub kmeter_post_left: KmeterShared,
    pub kmeter_post_right: KmeterShared,
    pub kmeter_pre_left: KmeterShared,
    pub kmeter_pre_right: KmeterShared,
}

impl ChannelShared {
    pub(crate) fn new(stereo: bool) -> Self {
        Self {
            stereo,
            volume: AtomicFloat::new(0.0),
            balance: AtomicFloat::new(0.0),
            mute: AtomicFlag::new(false),
            solo: AtomicFlag::new(false),
            volume_picked_up: AtomicFlag::new(false),
            balance_picked_up: AtomicFlag::new(false),
            midi_scale: ArcSwapOption::from(None),
            midi_in_got_events: AtomicFlag::new(false),
            nan_detected: AtomicFlag::new(false),
            meter: MeterShared::default(),
            kmeter_post_left: KmeterShared::default(),
            kmeter_post_right: KmeterShared::default(),
            kmeter_pre_left: KmeterShared::default(),
            kmeter_pre_right: KmeterShared::default(),
        }
    }

    #[inline]
    pub fn is_stereo(&self) -> bool {
        self.stereo
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Publish a new volume target (linear). Non-MIDI writers drop the
    /// pick-up latch so controllers have to catch up again.
    pub(crate) fn set_volume(&self, value: f32, from_midi: bool) {
        self.volume.set(value);
        if !from_midi {
            self.volume_picked_up.set(false);
        }
    }

    #[inline]
    pub fn balance(&self) -> f32 {
        self.balance.get()
    }

    pub(crate) fn set_balance(&self, value: f32, from_midi: bool) {
        self.balance.set(value);
        if !from_midi {
            self.balance_picked_up.set(false);
        }
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.mute.get()
    }

    pub(crate) fn set_mute(&self, on: bool) {
        self.mute.set(on);
    }

    #[inline]
    pub fn is_soloed(&self) -> bool {
        self.solo.get()
    }

    pub(crate) fn set_solo(&self, on: bool) {
        self.solo.set(on);
    }

    pub fn volume_picked_up(&self) -> bool {
        self.volume_picked_up.get()
    }

    pub(crate) fn set_volume_picked_up(&self, status: bool) {
        self.volume_picked_up.set(status);
    }

    pub fn balance_picked_up(&self) -> bool {
        self.balance_picked_up.get()
    }

    pub(crate) fn set_balance_picked_up(&self, status: bool) {
        self.balance_picked_up.set(status);
    }

    pub(crate) fn set_midi_scale(&self, scale: Option<Arc<Scale>>) {
        self.midi_scale.store(scale);
    }

    pub(crate) fn midi_scale(&self) -> Option<Arc<Scale>> {
        self.midi_scale.load_full()
    }

    pub(crate) fn note_midi_event(&self) {
        self.midi_in_got_events.set(true);
    }

    /// One-shot read: whether MIDI touched this channel since the last call.
    pub fn take_midi_in_got_events(&self) -> bool {
        self.midi_in_got_events.take()
    }

    #[inline]
    pub fn nan_detected(&self) -> bool {
        self.nan_detected.get()
    }

    pub(crate) fn set_nan_detected(&self, on: bool) {
        self.nan_detected.set(on);
    }
}

/// Mixer-wide atomic state.
#[derive(Debug)]
pub struct MixerShared {
    /// CC number of the most recently received control change, -1 if none.
    last_midi_cc: AtomicI8,
    midi_behavior: AtomicU8,
    kmetering: AtomicFlag,
    /// Sample-rate change reported by the host, 0 when none is pending.
    pending_sample_rate: AtomicU32,
}

impl MixerShared {
    pub(crate) fn new(behavior: MidiBehavior, kmetering: bool) -> Self {
        Self {
            last_midi_cc: AtomicI8::new(-1),
            midi_behavior: AtomicU8::new(behavior as u8),
            kmetering: AtomicFlag::new(kmetering),
            pending_sample_rate: AtomicU32::new(0),
        }
    }

    pub fn last_midi_cc(&self) -> i8 {
        self.last_midi_cc.load(Ordering::Acquire)
    }

    pub fn set_last_midi_cc(&self, cc: i8) {
        self.last_midi_cc.store(cc, Ordering::Release);
    }

    pub fn midi_behavior(&self) -> MidiBehavior {
        MidiBehavior::from_u8(self.midi_behavior.load(Ordering::Acquire))
    }

    pub fn set_midi_behavior(&self, behavior: MidiBehavior) {
        self.midi_behavior.store(behavior as u8, Ordering::Release);
    }

    pub fn kmetering(&self) -> bool {
        self.kmetering.get()
    }

    pub fn set_kmetering(&self, on: bool) {
        self.kmetering.set(on);
    }

    /// Report a host sample-rate change; consumed by the engine at the top
    /// of the next period.
    pub fn request_sample_rate(&self, sample_rate: u32) {
        self.pending_sample_rate
            .store(sample_rate, Ordering::Release);
    }

    pub(crate) fn take_pending_sample_rate(&self) -> Option<u32> {
        match self.pending_sample_rate.swap(0, Ordering::AcqRel) {
            0 => None,
            rate => Some(rate),
        }
    }
}
