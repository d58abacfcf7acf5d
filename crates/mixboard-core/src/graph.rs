//! Contracts towards the host audio-graph client.
//!
//! The engine never talks to JACK directly. The control plane manages ports
//! through [`GraphClient`], and the audio callback reaches buffers and MIDI
//! through [`ProcessCycle`]. A backend crate binds both to a real client;
//! tests bind them to in-memory buffers.

use crate::engine::Engine;
use crate::error::Result;

/// Audio sample type of the host graph.
pub type Sample = f32;

/// Stable identifier for a registered host port.
///
/// Allocated by the [`GraphClient`]; the engine stores these in channel
/// records and hands them back during the process cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub u32);

/// Direction of an audio port, from the mixer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    /// Host -> mixer (an input channel's source).
    Capture,
    /// Mixer -> host (an output channel's sink).
    Playback,
}

/// One raw MIDI event delivered by the host for the current period.
///
/// Only the first three bytes are retained; `len` carries the original wire
/// length so oversized events can be rejected during parsing.
#[derive(Debug, Clone, Copy)]
pub struct MidiEvent {
    /// Frame offset of the event within the period.
    pub time: u32,
    /// Original event length in bytes.
    pub len: u8,
    pub data: [u8; 3],
}

impl MidiEvent {
    /// A 3-byte control change message on MIDI channel 1.
    pub fn control_change(cc: u8, value: u8) -> Self {
        Self {
            time: 0,
            len: 3,
            data: [0xB0, cc, value],
        }
    }
}

/// Control-plane operations of the host client.
///
/// Never called from the audio thread. Implementations may block.
pub trait GraphClient: Send {
    /// Register an audio port. The returned id stays valid until
    /// [`unregister_port`](GraphClient::unregister_port).
    fn register_port(&mut self, name: &str, direction: PortDirection) -> Result<PortId>;

    /// Release a port. Best-effort; the id must not be reused afterwards.
    fn unregister_port(&mut self, port: PortId);

    /// Rename a port in place.
    fn rename_port(&mut self, port: PortId, name: &str) -> Result<()>;

    fn sample_rate(&self) -> u32;

    fn buffer_size(&self) -> u32;
}

/// Audio-plane view of one process period.
///
/// Everything here is called from the audio callback and must be
/// allocation-free and non-blocking.
pub trait ProcessCycle {
    /// Frame count of this period.
    fn frames(&self) -> usize;

    /// Capture buffer of an input port. An unknown id yields silence.
    fn capture(&self, port: PortId) -> &[Sample];

    /// Copy `data` into the playback buffer of an output port.
    fn playback(&mut self, port: PortId, data: &[Sample]);

    /// Write silence into the playback buffer of an output port.
    fn silence(&mut self, port: PortId);

    /// Whether a port has at least one external connection.
    fn connected(&self, port: PortId) -> bool;

    /// MIDI events received this period, in time order.
    fn midi_in(&self) -> &[MidiEvent];

    /// Queue a 3-byte MIDI message for output this period.
    ///
    /// Returns `false` when the host buffer has no room; feedback is
    /// best-effort and dropped events are not retried.
    fn midi_out(&mut self, data: [u8; 3]) -> bool;
}

/// Factory binding an [`Engine`] to a host client.
///
/// The backend owns the engine after `launch`: it must arrange for
/// [`Engine::run_cycle`] to be invoked once per host period, forward
/// buffer-size changes through [`Engine::apply_buffer_size`], and report
/// sample-rate changes through the engine's shared state.
pub trait GraphBackend {
    type Client: GraphClient + 'static;

    fn launch(self, client_name: &str, engine: Engine) -> Result<Self::Client>;
}
