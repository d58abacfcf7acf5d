//! Control -> audio command stream and the audio -> control reclaim path.
//!
//! Structural mutations (channel add/remove, routing membership, CC
//! bindings) are serialized through a bounded channel drained at the top of
//! the audio callback; every application is allocation-free. Removed
//! channels travel back over the reclaim channel so their buffers are
//! dropped on a control thread, never in the callback.

use crate::channel::{MidiChangeObserver, StripRef, MAX_CHANNELS};
use crate::engine::{OutputStrip, Strip};
use crate::registry::Binding;

pub(crate) const COMMAND_QUEUE_CAPACITY: usize = 256;
pub(crate) const RECLAIM_QUEUE_CAPACITY: usize = 2 * MAX_CHANNELS + 8;

/// Which per-output routing set a membership change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoutingKind {
    Solo,
    Mute,
    Prefader,
}

pub(crate) enum Command {
    AddInput(Box<Strip>),
    AddOutput(Box<OutputStrip>),
    RemoveInput(usize),
    RemoveOutput(usize),
    SetCcSlot {
        cc: u8,
        binding: Option<Binding>,
    },
    SetRouting {
        output: usize,
        input: usize,
        kind: RoutingKind,
        on: bool,
    },
    SetOutputPrefader {
        output: usize,
        on: bool,
    },
    SetObserver {
        strip: StripRef,
        observer: Option<Box<dyn MidiChangeObserver>>,
    },
}

/// A resource shipped back for control-side teardown.
pub(crate) enum Reclaim {
    Input(Box<Strip>),
    Output(Box<OutputStrip>),
    Observer(Box<dyn MidiChangeObserver>),
}
