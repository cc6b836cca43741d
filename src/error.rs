use thiserror::Error;

use crate::host::ParamName;

#[derive(Debug, Error)]
pub enum SynthKitError {
    /// A start/stop time that is not a number. Usually means the node was
    /// never connected to a context and the caller computed a time from a
    /// missing clock.
    #[error("cannot schedule {node}: time {time} is not a finite number (is it connected?)")]
    InvalidTime { node: String, time: f64 },

    #[error("invalid contour stage {index}: {reason}")]
    InvalidContour { index: usize, reason: String },

    #[error("{node} has no parameter `{param}`")]
    UnknownParam { node: String, param: ParamName },

    #[error("memoized node requires a non-empty id")]
    MissingMemoId,

    #[error("invalid graph: {0}")]
    Graph(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("instrument has no synth to build a voice from a value")]
    NoSynth,

    #[error("host audio engine error: {0}")]
    Host(String),

    #[cfg(feature = "catalog")]
    #[error("soundfont error: {0}")]
    Soundfont(String),

    #[cfg(feature = "catalog")]
    #[error("cannot decode audio: {0}")]
    Decode(String),

    #[cfg(feature = "catalog")]
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

impl SynthKitError {
    pub fn host(message: impl Into<String>) -> Self {
        SynthKitError::Host(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_time_names_the_node() {
        let err = SynthKitError::InvalidTime { node: "Oscillator#3".into(), time: f64::NAN };
        let msg = format!("{err}");
        assert!(msg.contains("Oscillator#3"), "got {msg}");
        assert!(msg.contains("NaN"), "got {msg}");
    }

    #[test]
    fn unknown_param_uses_param_name() {
        let err = SynthKitError::UnknownParam { node: "Gain#1".into(), param: ParamName::Frequency };
        assert_eq!(format!("{err}"), "Gain#1 has no parameter `frequency`");
    }
}
