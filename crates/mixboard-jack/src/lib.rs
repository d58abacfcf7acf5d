//! # mixboard-jack
//!
//! JACK driver for the mixboard engine: binds the core's
//! [`GraphClient`](mixboard_core::GraphClient) and
//! [`ProcessCycle`](mixboard_core::ProcessCycle) contracts to a real JACK
//! client.
//!
//! Port ownership is split by thread. Owned `jack::Port` values live on the
//! process side, where buffer access needs them; the control side keeps
//! unowned clones for rename and connection queries, and ships owned ports
//! to and from the process thread over bounded channels so neither side
//! ever blocks the audio callback.
//!
//! ```no_run
//! use mixboard_core::{Mixer, MixerConfig};
//! use mixboard_jack::JackBackend;
//!
//! let mixer = Mixer::new(MixerConfig::new("console"), JackBackend).unwrap();
//! let main = mixer.add_output_channel("MAIN", true, false).unwrap();
//! ```

mod client;
mod process;

pub use client::JackGraph;

use log::debug;
use mixboard_core::{Engine, Error, GraphBackend, Result};

use crate::process::MixerProcess;

/// Largest number of MIDI events consumed per period; the rest are
/// dropped. Generous for a control surface sweeping every fader at once.
const MAX_MIDI_EVENTS: usize = 256;

/// Hard cap on simultaneously registered audio ports.
const MAX_PORTS: usize = 512;

/// Launches the mixer engine inside a JACK client.
pub struct JackBackend;

impl GraphBackend for JackBackend {
    type Client = JackGraph;

    fn launch(self, client_name: &str, mut engine: Engine) -> Result<JackGraph> {
        let (client, _status) =
            jack::Client::new(client_name, jack::ClientOptions::NO_START_SERVER)
                .map_err(|_| Error::JackClientCreate)?;

        let midi_in = client
            .register_port("midi in", jack::MidiIn::default())
            .map_err(|_| Error::JackMidiInCreate)?;
        let midi_out = client
            .register_port("midi out", jack::MidiOut::default())
            .map_err(|_| Error::JackMidiOutCreate)?;

        let sample_rate = client.sample_rate() as u32;
        let buffer_size = client.buffer_size();
        engine.init_timing(sample_rate, buffer_size);
        debug!(
            "JACK client \"{}\" at {sample_rate} Hz, period {buffer_size}",
            client.name()
        );

        let (port_tx, port_rx) = crossbeam_channel::bounded(MAX_PORTS);
        let (port_reclaim_tx, port_reclaim_rx) = crossbeam_channel::bounded(MAX_PORTS);

        let handler = MixerProcess::new(engine, midi_in, midi_out, port_rx, port_reclaim_tx);
        let active = client
            .activate_async((), handler)
            .map_err(|_| Error::JackActivate)?;

        Ok(JackGraph::new(active, port_tx, port_reclaim_rx))
    }
}
