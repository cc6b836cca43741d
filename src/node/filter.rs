//! Biquad filters.

use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::host::{Context, FilterType, NodeKind, ParamName};

use super::Node;
use super::param::ParamValue;

pub fn filter(
    ctx: &Context,
    filter_type: FilterType,
    frequency: impl Into<ParamValue>,
    q: Option<ParamValue>,
    detune: Option<ParamValue>,
) -> Result<Node, SynthKitError> {
    Node::leaf(
        ctx,
        NodeKind::BiquadFilter(filter_type),
        vec![
            (ParamName::Frequency, Some(frequency.into())),
            (ParamName::Q, q),
            (ParamName::Detune, detune),
        ],
    )
}

pub fn lowpass(ctx: &Context, frequency: impl Into<ParamValue>) -> Result<Node, SynthKitError> {
    filter(ctx, FilterType::Lowpass, frequency, None, None)
}

pub fn highpass(ctx: &Context, frequency: impl Into<ParamValue>) -> Result<Node, SynthKitError> {
    filter(ctx, FilterType::Highpass, frequency, None, None)
}

pub fn bandpass(
    ctx: &Context,
    frequency: impl Into<ParamValue>,
    q: f64,
) -> Result<Node, SynthKitError> {
    filter(ctx, FilterType::Bandpass, frequency, Some(q.into()), None)
}

/// Filter settings as they appear in synth configs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub frequency: f64,
    #[serde(rename = "Q", alias = "q", skip_serializing_if = "Option::is_none")]
    pub q: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detune: Option<f64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig { filter_type: FilterType::Lowpass, frequency: 350.0, q: None, detune: None }
    }
}

impl FilterConfig {
    pub fn build(&self, ctx: &Context) -> Result<Node, SynthKitError> {
        filter(
            ctx,
            self.filter_type,
            self.frequency,
            self.q.map(ParamValue::from),
            self.detune.map(ParamValue::from),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::envelope::{AdsrConfig, freq_env};
    use crate::node::tests::offline;
    use float_cmp::approx_eq;

    #[test]
    fn filter_binds_params() {
        let (ctx, engine) = offline();
        let node = bandpass(&ctx, 800.0, 4.0).unwrap();
        assert_eq!(engine.kind_of(node.output_host()), Some("BiquadFilter"));
        assert_eq!(engine.param(node.output_host(), ParamName::Frequency), Some(800.0));
        assert_eq!(engine.param(node.output_host(), ParamName::Q), Some(4.0));
        assert!(!node.is_startable());
    }

    #[test]
    fn cutoff_envelope_makes_filter_startable() {
        let (ctx, _) = offline();
        let sweep = freq_env(&ctx, 200.0, 3.0, &AdsrConfig::default()).unwrap();
        let node = lowpass(&ctx, sweep).unwrap();
        assert!(node.is_startable());
        assert_eq!(node.dependents().len(), 1);
    }

    #[test]
    fn swept_filter_releases_with_its_envelope() {
        let (ctx, _) = offline();
        let sweep = freq_env(&ctx, 200.0, 2.0, &AdsrConfig::default()).unwrap();
        let node = lowpass(&ctx, sweep).unwrap();
        assert!(approx_eq!(f64, node.release().unwrap(), 0.3, epsilon = 1e-9));
        assert_eq!(lowpass(&ctx, 800.0).unwrap().release(), None);
    }

    #[test]
    fn config_reads_type_and_q() {
        let config: FilterConfig =
            serde_json::from_str(r#"{"type": "hipass", "frequency": 1200, "Q": 2}"#).unwrap();
        assert_eq!(config.filter_type, FilterType::Highpass);
        assert_eq!(config.q, Some(2.0));
        let (ctx, engine) = offline();
        let node = config.build(&ctx).unwrap();
        assert_eq!(engine.param(node.output_host(), ParamName::Frequency), Some(1200.0));
    }
}
