//! Mixer configuration.

use crate::midi::MidiBehavior;

/// Constructor options for a [`Mixer`](crate::Mixer).
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Name the mixer registers with the host graph.
    pub client_name: String,
    /// Accepted for session compatibility; the engine core ignores it.
    pub stereo_main: bool,
    /// Initial CC behavior; can be changed at runtime.
    pub midi_behavior: MidiBehavior,
    /// Whether K-meters are computed. On by default.
    pub kmetering: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            client_name: "mixboard".into(),
            stereo_main: false,
            midi_behavior: MidiBehavior::JumpToValue,
            kmetering: true,
        }
    }
}

impl MixerConfig {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MixerConfig::default();
        assert!(config.kmetering);
        assert_eq!(config.midi_behavior, MidiBehavior::JumpToValue);
    }
}
