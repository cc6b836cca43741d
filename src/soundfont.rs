//! MIDI.js soundfonts.
//!
//! A MIDI.js soundfont is a JavaScript file assigning an object of
//! base64 data URIs, keyed by note name, to `MIDI.Soundfont.<name>`. The
//! prerendered General MIDI sets are served from the gleitz mirror.

use std::collections::BTreeMap;
use std::rc::Rc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::host::Context;
use crate::instrument::Instrument;
pub use crate::load::decode_mp3;
use crate::node::Node;
use crate::node::buffer::{AudioBuffer, source};
use crate::node::envelope::{AdsrConfig, adsr};
use crate::node::filter::FilterConfig;
use crate::node::routing::series_of;
use crate::node::signal::gain;
use crate::units::note_to_midi;

pub const GLEITZ: &str = "https://gleitz.github.io/midi-js-soundfonts/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Library {
    #[serde(rename = "FluidR3_GM")]
    FluidR3,
    #[default]
    MusyngKite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Mp3,
    Ogg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    #[serde(rename = "soundfont")]
    pub library: Library,
    pub format: Format,
}

/// URL of a named General MIDI soundfont. Names ending in `.js` are taken to
/// be URLs already.
pub fn soundfont_url(name: &str, library: Library, format: Format) -> String {
    let path = name.split('?').next().unwrap_or(name);
    if path.to_ascii_lowercase().ends_with(".js") {
        return name.to_string();
    }
    let library = match library {
        Library::FluidR3 => "FluidR3_GM/",
        Library::MusyngKite => "MusyngKite/",
    };
    let suffix = match format {
        Format::Mp3 => "-mp3",
        Format::Ogg => "-ogg",
    };
    let file = name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("_");
    format!("{GLEITZ}{library}{file}{suffix}.js")
}

/// Extract the encoded audio of every note in a MIDI.js file.
///
/// Keys that are not note names are skipped with a warning.
pub fn parse_midijs(text: &str) -> Result<BTreeMap<u8, Vec<u8>>, SynthKitError> {
    let invalid = || SynthKitError::Soundfont("invalid MIDI.js soundfont".into());
    let header = text.find("MIDI.Soundfont.").ok_or_else(invalid)?;
    let open = text[header..].find('{').map(|i| header + i).ok_or_else(invalid)?;
    let close = text.rfind('}').filter(|close| *close > open).ok_or_else(invalid)?;
    let body = text[open + 1..close].trim_end();
    let body = body.strip_suffix(',').unwrap_or(body);
    let entries: BTreeMap<String, String> = serde_json::from_str(&format!("{{{body}}}"))
        .map_err(|e| SynthKitError::Soundfont(format!("invalid MIDI.js soundfont: {e}")))?;

    let mut notes = BTreeMap::new();
    for (name, uri) in entries {
        let Some(midi) = note_to_midi(&name).and_then(|m| u8::try_from(m).ok()) else {
            log::warn!("skipping soundfont entry `{name}`: not a note name");
            continue;
        };
        let data = uri.split_once(',').map_or(uri.as_str(), |(_, data)| data);
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| SynthKitError::Soundfont(format!("note {name}: {e}")))?;
        notes.insert(midi, bytes);
    }
    Ok(notes)
}

/// Voice settings for a soundfont instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundfontVoice {
    pub gain: f64,
    pub filter: FilterConfig,
    #[serde(flatten)]
    pub envelope: AdsrConfig,
}

impl Default for SoundfontVoice {
    fn default() -> Self {
        SoundfontVoice {
            gain: 1.0,
            filter: FilterConfig { frequency: 22000.0, ..FilterConfig::default() },
            envelope: AdsrConfig { release: 0.4, ..AdsrConfig::default() },
        }
    }
}

/// Decoded note samples of one soundfont.
#[derive(Debug, Clone)]
pub struct Soundfont {
    name: String,
    buffers: Rc<BTreeMap<u8, Rc<AudioBuffer>>>,
}

impl Soundfont {
    pub fn new(name: &str, buffers: BTreeMap<u8, AudioBuffer>) -> Self {
        Soundfont {
            name: name.to_string(),
            buffers: Rc::new(buffers.into_iter().map(|(k, v)| (k, Rc::new(v))).collect()),
        }
    }

    /// Decode an already fetched MIDI.js file.
    pub fn from_midijs(name: &str, text: &str) -> Result<Self, SynthKitError> {
        Ok(Soundfont::new(name, decode_all(parse_midijs(text)?)?))
    }

    /// Fetch and decode a soundfont. Decoding runs on the blocking pool.
    pub async fn load(name: &str, options: &LoadOptions) -> Result<Self, SynthKitError> {
        if options.format != Format::Mp3 {
            return Err(SynthKitError::Soundfont("only mp3 soundfonts can be decoded".into()));
        }
        let url = soundfont_url(name, options.library, options.format);
        log::debug!("fetching soundfont {url}");
        let text = reqwest::get(&url).await?.error_for_status()?.text().await?;
        let encoded = parse_midijs(&text)?;
        let decoded = tokio::task::spawn_blocking(move || decode_all(encoded))
            .await
            .map_err(|e| SynthKitError::Soundfont(format!("decoder task failed: {e}")))??;
        log::debug!("soundfont {name}: {} notes", decoded.len());
        Ok(Soundfont::new(name, decoded))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self, midi: u8) -> Option<Rc<AudioBuffer>> {
        self.buffers.get(&midi).cloned()
    }

    pub fn notes(&self) -> impl Iterator<Item = u8> + '_ {
        self.buffers.keys().copied()
    }

    /// An instrument playing MIDI note numbers: sample, filter, envelope,
    /// gain.
    pub fn instrument(
        &self,
        ctx: &Context,
        destination: Option<Node>,
        voice: SoundfontVoice,
    ) -> Instrument<u8> {
        let buffers = self.buffers.clone();
        let name = self.name.clone();
        let inst = Instrument::new(ctx).with_synth(move |ctx: &Context, midi: u8| {
            let buffer = buffers.get(&midi).cloned();
            if buffer.is_none() {
                log::warn!("soundfont `{name}` has no sample for note {midi}");
            }
            series_of(
                source(ctx, buffer, false, None)?,
                vec![voice.filter.build(ctx)?, adsr(ctx, &voice.envelope)?, gain(ctx, voice.gain)?],
            )
        });
        match destination {
            Some(destination) => inst.with_destination(destination),
            None => inst.with_destination(Node::destination(ctx)),
        }
    }
}

fn decode_all(encoded: BTreeMap<u8, Vec<u8>>) -> Result<BTreeMap<u8, AudioBuffer>, SynthKitError> {
    encoded.into_iter().map(|(midi, bytes)| Ok((midi, decode_mp3(&bytes)?))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::offline;

    #[test]
    fn gleitz_urls() {
        assert_eq!(
            soundfont_url("Acoustic Grand Piano", Library::MusyngKite, Format::Mp3),
            "https://gleitz.github.io/midi-js-soundfonts/MusyngKite/acoustic_grand_piano-mp3.js"
        );
        assert_eq!(
            soundfont_url("marimba", Library::FluidR3, Format::Ogg),
            "https://gleitz.github.io/midi-js-soundfonts/FluidR3_GM/marimba-ogg.js"
        );
        assert_eq!(
            soundfont_url("https://example.com/piano.js?v=2", Library::MusyngKite, Format::Mp3),
            "https://example.com/piano.js?v=2"
        );
    }

    #[test]
    fn parses_midijs_entries() {
        let text = r#"if (typeof(MIDI) === 'undefined') var MIDI = {};
MIDI.Soundfont.marimba = {
"A0": "data:audio/mp3;base64,AAEC",
"Bb0": "data:audio/mp3;base64,AwQF",
"junk": "data:audio/mp3;base64,AAAA",
}
"#;
        let notes = parse_midijs(text).unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[&21], vec![0, 1, 2]);
        assert_eq!(notes[&22], vec![3, 4, 5]);
    }

    #[test]
    fn rejects_other_scripts() {
        assert!(parse_midijs("var x = {}").is_err());
        assert!(parse_midijs("MIDI.Soundfont.x = {\"A0\": \"data:,!!\"}").is_err());
    }

    #[test]
    fn voice_defaults() {
        let voice: SoundfontVoice = serde_json::from_str(r#"{"release": 1.0}"#).unwrap();
        assert_eq!(voice.envelope.release, 1.0);
        assert_eq!(voice.filter.frequency, 22000.0);
    }

    #[test]
    fn instrument_plays_loaded_notes() {
        let (ctx, engine) = offline();
        let mut buffers = BTreeMap::new();
        buffers.insert(60, AudioBuffer::mono(44100.0, vec![0.1; 4410]));
        let font = Soundfont::new("test", buffers);
        let piano = font.instrument(&ctx, None, SoundfontVoice::default());
        let voice = piano.play(60).unwrap();
        assert_eq!(voice.id(), Some(0));
        assert_eq!(engine.starts().len(), 1);
        // a missing note still plays, silently
        assert!(piano.play(61).is_ok());
        assert_eq!(font.notes().collect::<Vec<_>>(), vec![60]);
    }
}
