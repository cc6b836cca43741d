//! Ready-made voices: subtractive, additive and a drawbar organ.
//!
//! Each synth takes a frequency plus a serde config, so it plugs straight
//! into [`Instrument::with_synth`](crate::instrument::Instrument::with_synth).

use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::host::{Context, FilterType, Waveform};
use crate::node::Node;
use crate::node::envelope::{AdsrConfig, adsr, freq_env};
use crate::node::filter::filter;
use crate::node::oscillator::osc;
use crate::node::param::ParamValue;
use crate::node::routing::series_of;
use crate::node::signal::gain;
use crate::units::db_to_gain;

pub use crate::node::oscillator::{OscBankConfig as AdditiveConfig, osc_bank as additive};

/// Cutoff either fixed or tracking the played frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cutoff {
    Hz(f64),
    Follow(Follow),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Follow {
    Follow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtractiveFilter {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    /// No cutoff means no filter.
    pub frequency: Option<Cutoff>,
    #[serde(rename = "Q", alias = "q")]
    pub q: Option<f64>,
    /// When set, the cutoff sweeps up `octaves` octaves along this envelope.
    pub envelope: Option<AdsrConfig>,
    pub octaves: f64,
}

impl Default for SubtractiveFilter {
    fn default() -> Self {
        SubtractiveFilter {
            filter_type: FilterType::Lowpass,
            frequency: None,
            q: None,
            envelope: None,
            octaves: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtractiveConfig {
    pub frequency: f64,
    #[serde(rename = "type")]
    pub waveform: Waveform,
    #[serde(rename = "adsr")]
    pub envelope: AdsrConfig,
    pub filter: SubtractiveFilter,
    pub gain: f64,
}

impl Default for SubtractiveConfig {
    fn default() -> Self {
        SubtractiveConfig {
            frequency: 440.0,
            waveform: Waveform::Sawtooth,
            envelope: AdsrConfig::from_array([0.01, 0.1, 0.8, 1.0]),
            filter: SubtractiveFilter::default(),
            gain: 1.0,
        }
    }
}

/// Source, amplitude envelope, optional filter, optional output gain.
///
/// `source` replaces the config's oscillator when given.
pub fn subtractive(
    ctx: &Context,
    config: &SubtractiveConfig,
    source: Option<Node>,
) -> Result<Node, SynthKitError> {
    let source = match source {
        Some(source) => source,
        None => osc(ctx, config.waveform, config.frequency, None)?,
    };
    let mut chain = vec![adsr(ctx, &config.envelope)?];
    if let Some(cutoff) = config.filter.frequency {
        let cutoff = match cutoff {
            Cutoff::Hz(hz) => hz,
            Cutoff::Follow(_) => config.frequency,
        };
        let frequency: ParamValue = match &config.filter.envelope {
            Some(sweep) => freq_env(ctx, cutoff, config.filter.octaves, sweep)?.into(),
            None => cutoff.into(),
        };
        chain.push(filter(
            ctx,
            config.filter.filter_type,
            frequency,
            config.filter.q.map(ParamValue::from),
            None,
        )?);
    }
    if config.gain != 1.0 {
        chain.push(gain(ctx, config.gain)?);
    }
    series_of(source, chain)
}

/// A synth function playing `config` at whatever frequency it is given.
pub fn subtractive_synth(
    config: SubtractiveConfig,
) -> impl Fn(&Context, f64) -> Result<Node, SynthKitError> {
    move |ctx: &Context, frequency: f64| {
        subtractive(ctx, &SubtractiveConfig { frequency, ..config.clone() }, None)
    }
}

/// Tonewheel ratios of the nine drawbars, 16' through 1'.
pub const DRAWBAR_RATIOS: [f64; 9] =
    [0.5, 1.498823530, 1.0, 2.0, 2.997647060, 4.0, 5.040941178, 5.995294120, 8.0];

/// A drawbar registration such as `"88 8000 008"`: nine digits 0-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration([u8; 9]);

impl Registration {
    /// Whitespace is ignored; missing trailing drawbars are pushed in.
    pub fn parse(text: &str) -> Result<Self, SynthKitError> {
        let mut bars = [0u8; 9];
        let digits = text.chars().filter(|c| !c.is_whitespace());
        for (i, c) in digits.enumerate() {
            let value = c
                .to_digit(10)
                .filter(|d| *d <= 8)
                .ok_or_else(|| SynthKitError::Config(format!("bad drawbar `{c}` in `{text}`")))?;
            if i >= bars.len() {
                return Err(SynthKitError::Config(format!("too many drawbars in `{text}`")));
            }
            bars[i] = value as u8;
        }
        Ok(Registration(bars))
    }

    pub fn preset(name: &str) -> Option<Self> {
        let text = match name {
            "gospel" => "88 8000 008",
            "blues" => "88 8800 000",
            "bluesB" => "88 5324 588",
            "booker" => "88 8630 000",
            "onions" => "80 8800 008",
            "smith" => "88 8000 000",
            "mcgriff" => "86 8600 006",
            "errol" => "80 0008 888",
            "genesis" => "33 6866 330",
            _ => return None,
        };
        Registration::parse(text).ok()
    }

    /// Each step below 8 is -3 dB; a pushed-in drawbar is silent.
    pub fn gains(&self) -> Vec<f64> {
        self.0
            .iter()
            .map(|&n| if n == 0 { 0.0 } else { db_to_gain(-3.0 * (8 - n) as f64) })
            .collect()
    }
}

/// A tonewheel-organ tone: nine sine partials weighted by the drawbars.
pub fn b3(ctx: &Context, registration: &Registration, frequency: f64) -> Result<Node, SynthKitError> {
    let config = AdditiveConfig {
        frequency,
        gains: registration.gains(),
        waveforms: vec![Waveform::Sine],
        normalize: true,
    };
    additive(ctx, &DRAWBAR_RATIOS, &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ParamName;
    use crate::instrument::Instrument;
    use crate::node::tests::offline;
    use pretty_assertions::assert_eq;

    #[test]
    fn config_defaults_and_aliases() {
        let config: SubtractiveConfig = serde_json::from_str(
            r#"{"type": "square", "filter": {"type": "hipass", "frequency": "follow"}}"#,
        )
        .unwrap();
        assert_eq!(config.waveform, Waveform::Square);
        assert_eq!(config.filter.filter_type, FilterType::Highpass);
        assert_eq!(config.filter.frequency, Some(Cutoff::Follow(Follow::Follow)));
        assert_eq!(config.envelope, AdsrConfig::from_array([0.01, 0.1, 0.8, 1.0]));
        assert_eq!(config.gain, 1.0);
    }

    #[test]
    fn subtractive_without_filter_is_osc_and_envelope() {
        let (ctx, engine) = offline();
        let voice = subtractive(&ctx, &SubtractiveConfig::default(), None).unwrap();
        assert_eq!(voice.dependents().len(), 1);
        assert_eq!(voice.release(), Some(1.0));
        voice.start(0.0).unwrap();
        assert_eq!(engine.starts().len(), 1);
    }

    #[test]
    fn follow_uses_played_frequency() {
        let (ctx, engine) = offline();
        let mut config = SubtractiveConfig::default();
        config.filter.frequency = Some(Cutoff::Follow(Follow::Follow));
        let play = subtractive_synth(config);
        let voice = play(&ctx, 220.0).unwrap();
        let cutoff = voice.dependents()[1].output_host();
        assert_eq!(engine.param(cutoff, ParamName::Frequency), Some(220.0));
    }

    #[test]
    fn filter_envelope_modulates_cutoff() {
        let (ctx, engine) = offline();
        let mut config = SubtractiveConfig::default();
        config.filter.frequency = Some(Cutoff::Hz(300.0));
        config.filter.envelope = Some(AdsrConfig::default());
        let voice = subtractive(&ctx, &config, None).unwrap();
        let cutoff = voice.dependents()[1].output_host();
        assert_eq!(engine.param(cutoff, ParamName::Frequency), Some(0.0));
        voice.start(0.0).unwrap();
        // oscillator plus the two constants of the sweep
        assert_eq!(engine.starts().len(), 3);
    }

    #[test]
    fn synth_drives_an_instrument() {
        let (ctx, engine) = offline();
        let inst = Instrument::master(&ctx).with_synth(subtractive_synth(SubtractiveConfig::default()));
        inst.start(crate::instrument::Play::Value(330.0), None, None, Some(0.5)).unwrap();
        assert_eq!(engine.stops().len(), 1);
        assert_eq!(engine.stops()[0].1, 1.5);
    }

    #[test]
    fn registration_parses_and_weights() {
        let reg = Registration::parse("88 8000 008").unwrap();
        let gains = reg.gains();
        assert_eq!(gains[0], 1.0);
        assert_eq!(gains[3], 0.0);
        assert_eq!(Registration::parse("12").unwrap(), Registration::parse("120000000").unwrap());
        assert!(Registration::parse("9").is_err());
        assert!(Registration::parse("8888888888").is_err());
        assert_eq!(Registration::preset("gospel"), Some(reg));
        assert_eq!(Registration::preset("nope"), None);
    }

    #[test]
    fn b3_sums_nine_partials() {
        let (ctx, engine) = offline();
        let organ = b3(&ctx, &Registration::preset("smith").unwrap(), 110.0).unwrap();
        organ.start(0.0).unwrap();
        assert_eq!(engine.starts().len(), 9);
    }
}
