//! # Mixboard - Realtime JACK Audio Mixer
//!
//! A mixer engine that runs as a JACK client: named mono/stereo input and
//! output channels, per-input fader/balance/mute/solo with pre/post-fader
//! routing, MIDI CC control with motorized-surface feedback, and peak +
//! K-meter metering on every channel.
//!
//! The umbrella crate ties together:
//! - **mixboard-core** - the host-agnostic engine (channels, mixing,
//!   metering, MIDI interpretation, CC registry)
//! - **mixboard-jack** - the JACK driver binding the engine to a live
//!   client (behind the `jack` feature, on by default)
//!
//! ## Quick Start
//!
//! ```ignore
//! use mixboard::prelude::*;
//!
//! let mixer = Mixer::new(MixerConfig::new("console"), JackBackend)?;
//!
//! let main = mixer.add_output_channel("MAIN", true, false)?;
//! let vocal = mixer.add_channel("vocal", false)?;
//!
//! vocal.set_midi_scale(Scale::standard());
//! vocal.autoset_volume_midi_cc()?;
//! vocal.set_volume(-6.0);
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - engine core + JACK driver
//! - `jack` - the JACK binding; disable to embed the core against another
//!   backend without linking libjack

/// Re-export of mixboard-core for direct access
pub use mixboard_core as core;

pub use mixboard_core::{
    // Channel surface
    ChannelHandle, KmeterDb, MeterMode, MidiChangeObserver, Mixer, MixerConfig,
    OutputChannelHandle,

    // MIDI control
    CcParam, MidiBehavior, Scale,

    // Host contracts for alternative backends
    Engine, GraphBackend, GraphClient, MidiEvent, PortDirection, PortId, ProcessCycle,

    // Error
    Error, Result,
};

#[cfg(feature = "jack")]
pub use mixboard_jack::{JackBackend, JackGraph};

/// Common imports for building a mixer front-end.
pub mod prelude {
    pub use mixboard_core::{
        ChannelHandle, Error, KmeterDb, MeterMode, MidiBehavior, MidiChangeObserver, Mixer,
        MixerConfig, OutputChannelHandle, Result, Scale,
    };

    #[cfg(feature = "jack")]
    pub use mixboard_jack::JackBackend;
}
