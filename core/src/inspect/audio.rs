//! Curated property lists for audio-capability objects.
//!
//! Their state lives behind non-enumerable prototype accessors, so plain
//! enumeration shows nothing useful. Objects whose constructor name appears
//! here read the listed properties instead; any other `*Node` falls back to
//! the generic node properties.

use std::collections::BTreeMap;

/// Properties every audio node exposes.
pub const GENERIC_NODE_PROPERTIES: &[&str] = &[
    "numberOfInputs",
    "numberOfOutputs",
    "channelCount",
    "channelCountMode",
    "channelInterpretation",
];

const CONTEXT_PROPERTIES: &[&str] = &[
    "sampleRate",
    "currentTime",
    "state",
    "baseLatency",
    "destination",
    "listener",
];

static AUDIO_TYPES: &[(&str, &[&str])] = &[
    ("AudioContext", CONTEXT_PROPERTIES),
    ("BaseAudioContext", CONTEXT_PROPERTIES),
    ("OfflineAudioContext", &[
        "sampleRate",
        "currentTime",
        "state",
        "length",
        "destination",
        "listener",
    ]),
    ("AudioBuffer", &["sampleRate", "length", "duration", "numberOfChannels"]),
    ("AudioParam", &["value", "defaultValue", "minValue", "maxValue", "automationRate"]),
    ("GainNode", &["gain"]),
    ("OscillatorNode", &["type", "frequency", "detune"]),
    ("BiquadFilterNode", &["type", "frequency", "detune", "Q", "gain"]),
    ("AudioBufferSourceNode", &[
        "buffer",
        "playbackRate",
        "detune",
        "loop",
        "loopStart",
        "loopEnd",
    ]),
    ("DelayNode", &["delayTime"]),
    ("AnalyserNode", &[
        "fftSize",
        "frequencyBinCount",
        "minDecibels",
        "maxDecibels",
        "smoothingTimeConstant",
    ]),
    ("StereoPannerNode", &["pan"]),
    ("DynamicsCompressorNode", &[
        "threshold",
        "knee",
        "ratio",
        "reduction",
        "attack",
        "release",
    ]),
    ("ConvolverNode", &["buffer", "normalize"]),
    ("WaveShaperNode", &["curve", "oversample"]),
    ("ConstantSourceNode", &["offset"]),
    ("PannerNode", &[
        "panningModel",
        "distanceModel",
        "positionX",
        "positionY",
        "positionZ",
        "refDistance",
        "maxDistance",
        "rolloffFactor",
    ]),
    ("AudioDestinationNode", &["maxChannelCount"]),
];

/// Properties to read for an object of `type_name`, if it is an audio type.
///
/// Node types get their own list followed by the generic node properties.
pub fn curated_properties(type_name: &str) -> Option<Vec<&'static str>> {
    let specific = AUDIO_TYPES
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(_, props)| *props);

    let is_node = type_name.ends_with("Node") && type_name.len() > "Node".len();

    match (specific, is_node) {
        (Some(props), true) => Some(props.iter().chain(GENERIC_NODE_PROPERTIES).copied().collect()),
        (Some(props), false) => Some(props.to_vec()),
        (None, true) => Some(GENERIC_NODE_PROPERTIES.to_vec()),
        (None, false) => None,
    }
}

/// The per-type lists, for engines that inspect values outside this crate.
pub fn curated_table() -> BTreeMap<&'static str, &'static [&'static str]> {
    AUDIO_TYPES.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_lists_include_generic_properties() {
        let props = curated_properties("GainNode").unwrap();
        assert_eq!(props[0], "gain");
        assert!(props.contains(&"channelCount"));
    }

    #[test]
    fn test_unknown_node_falls_back_to_generic() {
        let props = curated_properties("MediaElementAudioSourceNode").unwrap();
        assert_eq!(props, GENERIC_NODE_PROPERTIES.to_vec());
    }

    #[test]
    fn test_non_audio_types() {
        assert!(curated_properties("Object").is_none());
        assert!(curated_properties("Node").is_none());
        let table = curated_table();
        assert!(!table.contains_key("Map"));
        assert_eq!(table["DelayNode"], &["delayTime"]);
    }
}
