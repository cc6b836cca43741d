//! Oscillator sources.

use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::host::{Context, NodeKind, ParamName, Waveform};

use super::Node;
use super::param::ParamValue;
use super::routing::{parallel_of, series_of};
use super::signal::{gain, mult};

/// An oscillator; `frequency` and `detune` (cents) may be literals or nodes.
pub fn osc(
    ctx: &Context,
    waveform: Waveform,
    frequency: impl Into<ParamValue>,
    detune: Option<ParamValue>,
) -> Result<Node, SynthKitError> {
    Node::leaf(
        ctx,
        NodeKind::Oscillator(waveform),
        vec![(ParamName::Frequency, Some(frequency.into())), (ParamName::Detune, detune)],
    )
}

pub fn sine(ctx: &Context, frequency: impl Into<ParamValue>) -> Result<Node, SynthKitError> {
    osc(ctx, Waveform::Sine, frequency, None)
}

pub fn saw(ctx: &Context, frequency: impl Into<ParamValue>) -> Result<Node, SynthKitError> {
    osc(ctx, Waveform::Sawtooth, frequency, None)
}

pub fn square(ctx: &Context, frequency: impl Into<ParamValue>) -> Result<Node, SynthKitError> {
    osc(ctx, Waveform::Square, frequency, None)
}

pub fn triangle(ctx: &Context, frequency: impl Into<ParamValue>) -> Result<Node, SynthKitError> {
    osc(ctx, Waveform::Triangle, frequency, None)
}

/// Low frequency oscillator swinging `±amplitude`.
pub fn lfo(
    ctx: &Context,
    waveform: Waveform,
    rate: f64,
    amplitude: f64,
) -> Result<Node, SynthKitError> {
    mult(amplitude, osc(ctx, waveform, rate, None)?)
}

/// Partials for an oscillator bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscBankConfig {
    /// Multiplied into every partial frequency.
    pub frequency: f64,
    /// Per-partial gain, cycled when shorter than the partial list.
    pub gains: Vec<f64>,
    /// Per-partial waveform, cycled likewise.
    pub waveforms: Vec<Waveform>,
    /// Divide the summed output by the number of partials.
    pub normalize: bool,
}

impl Default for OscBankConfig {
    fn default() -> Self {
        OscBankConfig {
            frequency: 1.0,
            gains: vec![1.0],
            waveforms: vec![Waveform::Sine],
            normalize: true,
        }
    }
}

/// A bank of summed oscillators, one per entry in `partials`.
pub fn osc_bank(
    ctx: &Context,
    partials: &[f64],
    config: &OscBankConfig,
) -> Result<Node, SynthKitError> {
    if partials.is_empty() {
        return Err(SynthKitError::Config("oscillator bank needs at least one partial".into()));
    }
    let mut voices = Vec::with_capacity(partials.len());
    for (i, partial) in partials.iter().enumerate() {
        let waveform = cycle(&config.waveforms, i).unwrap_or_default();
        let level = cycle(&config.gains, i).unwrap_or(1.0);
        let tone = osc(ctx, waveform, partial * config.frequency, None)?;
        voices.push(series_of(tone, vec![gain(ctx, level)?])?);
    }
    let level = if config.normalize { 1.0 / partials.len() as f64 } else { 1.0 };
    let mut voices = voices.into_iter();
    let first = voices.next().ok_or_else(|| SynthKitError::Config("empty bank".into()))?;
    series_of(parallel_of(first, voices.collect())?, vec![gain(ctx, level)?])
}

fn cycle<T: Copy>(items: &[T], index: usize) -> Option<T> {
    if items.is_empty() { None } else { Some(items[index % items.len()]) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::offline;

    #[test]
    fn osc_sets_frequency_and_waveform() {
        let (ctx, engine) = offline();
        let node = osc(&ctx, Waveform::Triangle, 330.0, Some(7.0.into())).unwrap();
        assert_eq!(engine.param(node.output_host(), ParamName::Frequency), Some(330.0));
        assert_eq!(engine.param(node.output_host(), ParamName::Detune), Some(7.0));
        assert!(node.is_startable());
        assert!(node.emits_ended());
    }

    #[test]
    fn frequency_can_be_a_node() {
        let (ctx, engine) = offline();
        let vibrato = lfo(&ctx, Waveform::Sine, 5.0, 10.0).unwrap();
        let tone = sine(&ctx, vibrato.clone()).unwrap();
        assert_eq!(engine.param(tone.output_host(), ParamName::Frequency), Some(0.0));
        tone.start(0.0).unwrap();
        assert_eq!(engine.starts().len(), 2);
    }

    #[test]
    fn bank_normalizes_partials() {
        let (ctx, engine) = offline();
        let config = OscBankConfig { frequency: 110.0, ..OscBankConfig::default() };
        let bank = osc_bank(&ctx, &[1.0, 2.0, 3.0, 4.0], &config).unwrap();
        assert_eq!(engine.param(bank.output_host(), ParamName::Gain), Some(0.25));
        bank.start(0.0).unwrap();
        let mut started: Vec<f64> = engine
            .starts()
            .iter()
            .filter_map(|(host, _)| engine.param(*host, ParamName::Frequency))
            .collect();
        started.sort_by(f64::total_cmp);
        assert_eq!(started, vec![110.0, 220.0, 330.0, 440.0]);
    }

    #[test]
    fn empty_bank_is_an_error() {
        let (ctx, _) = offline();
        assert!(osc_bank(&ctx, &[], &OscBankConfig::default()).is_err());
    }
}
