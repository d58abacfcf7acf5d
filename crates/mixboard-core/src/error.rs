//! Error types for mixboard-core.

use thiserror::Error;

/// Error type for mixer construction and mutation operations.
///
/// The kinds mirror the failure points of the engine exactly: host client
/// setup, port management, channel bookkeeping, and CC binding. Runtime
/// anomalies inside the audio callback (NaN input samples, dropped MIDI
/// feedback) are never surfaced through this type; they are latched into
/// channel state instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("could not create JACK client; is the JACK daemon running?")]
    JackClientCreate,

    #[error("could not create JACK MIDI in port")]
    JackMidiInCreate,

    #[error("could not create JACK MIDI out port")]
    JackMidiOutCreate,

    #[error("could not set JACK process callback")]
    JackSetProcessCallback,

    #[error("could not set JACK buffer size callback")]
    JackSetBufferSizeCallback,

    #[error("could not activate JACK client")]
    JackActivate,

    #[error("could not allocate a channel slot")]
    ChannelAlloc,

    #[error("could not allocate channel name")]
    ChannelNameAlloc,

    #[error("could not register JACK port for channel")]
    PortRegister,

    #[error("could not register JACK port for left channel")]
    PortRegisterLeft,

    #[error("could not register JACK port for right channel")]
    PortRegisterRight,

    #[error("could not rename JACK port for channel")]
    JackRenamePort,

    #[error("could not rename JACK port for left channel")]
    JackRenamePortLeft,

    #[error("could not rename JACK port for right channel")]
    JackRenamePortRight,

    #[error("could not allocate port name")]
    PortNameAlloc,

    #[error("control change number out of range")]
    InvalidCC,

    #[error("no free control change number")]
    NoFreeCC,
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
