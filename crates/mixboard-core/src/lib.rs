//! # mixboard-core
//!
//! Realtime mixer engine: named input/output channels with per-input
//! fader, balance, mute, solo, and pre/post-fader routing; MIDI CC control
//! with motorized-surface feedback; peak and K-meter metering on every
//! channel, pre- and post-fader.
//!
//! The crate is host-agnostic: the audio graph client (JACK in practice)
//! is consumed through the [`graph`] contracts, and a backend crate binds
//! them to the real client. The engine half runs inside the host's process
//! callback without allocating, blocking, or locking; the control half is
//! the [`Mixer`] and its channel handles, which communicate with the
//! engine through single-word atomics and a serialized command stream.
//!
//! ## Quick start
//!
//! ```ignore
//! use mixboard_core::{Mixer, MixerConfig, Scale};
//!
//! let mixer = Mixer::new(MixerConfig::new("console"), backend)?;
//! let main = mixer.add_output_channel("MAIN", true, false)?;
//! let vocal = mixer.add_channel("vocal", false)?;
//!
//! vocal.set_midi_scale(Scale::standard());
//! vocal.autoset_volume_midi_cc()?;
//! vocal.set_volume(-6.0);
//! ```

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fade;
pub mod graph;
pub mod kmeter;
pub mod midi;
pub mod mixer;
pub mod registry;
pub mod scale;

mod command;
mod lockfree;

pub use channel::{
    ChannelShared, KmeterShared, MeterMode, MeterShared, MidiChangeObserver, MixerShared,
    StripRef, MAX_CHANNELS,
};
pub use config::MixerConfig;
pub use engine::{Engine, MAX_BLOCK_SIZE, PEAK_FRAMES_CHUNK};
pub use error::{Error, Result};
pub use fade::{db_to_value, interpolate, value_to_db, VOLUME_TRANSITION_SECONDS};
pub use graph::{
    GraphBackend, GraphClient, MidiEvent, PortDirection, PortId, ProcessCycle, Sample,
};
pub use kmeter::Kmeter;
pub use lockfree::{AtomicFlag, AtomicFloat};
pub use midi::{balance_to_cc, cc_to_balance, CcParam, MidiBehavior, BALANCE_DEAD_ZONE};
pub use mixer::{ChannelHandle, KmeterDb, Mixer, OutputChannelHandle};
pub use registry::{Binding, CcRegistry};
pub use scale::Scale;
