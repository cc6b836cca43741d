//! Graph literals.
//!
//! A graph can be written as JSON instead of code. Every object carries a
//! `"type"` tag; parameters are either numbers or nested nodes, which then
//! modulate the parameter. `connect` nests other nodes serially or in
//! parallel, and `memoize` lets one subtree be shared by id.
//!
//! ```json
//! { "type": "connect", "nodes": [
//!     { "type": "oscillator", "waveform": "saw", "frequency": 110 },
//!     { "type": "biquadFilter", "frequency": { "type": "constant", "value": 800 } },
//!     { "type": "envelope", "attack": [["set", 0, 0], ["lin", 1, 0.01], ["exp", 0, 0.4]] }
//! ] }
//! ```

use std::collections::HashMap;

use ariadne::{Config, IndexType, Label, Report, ReportKind, Source};
use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::host::{Context, FilterType, Waveform};
use crate::node::Node;
use crate::node::buffer::{impulse_response, white};
use crate::node::contour::Contour;
use crate::node::effects::{convolver, delay, dly};
use crate::node::envelope::envelope;
use crate::node::filter::filter;
use crate::node::oscillator::osc;
use crate::node::param::ParamValue;
use crate::node::routing::{parallel_of, series_of};
use crate::node::signal::{bypass, constant, gain};

// ── Graph literal ───────────────────────────────────────────

/// A node in a graph literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GraphNode {
    Connect {
        #[serde(default)]
        route: Route,
        #[serde(default)]
        nodes: Vec<GraphNode>,
    },
    Gain {
        #[serde(default = "unity")]
        gain: ParamSpec,
    },
    Oscillator {
        #[serde(default)]
        waveform: Waveform,
        #[serde(default = "concert_a")]
        frequency: ParamSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detune: Option<ParamSpec>,
    },
    BiquadFilter {
        #[serde(default)]
        filter_type: FilterType,
        #[serde(default = "default_cutoff")]
        frequency: ParamSpec,
        #[serde(default, rename = "Q", alias = "q", skip_serializing_if = "Option::is_none")]
        q: Option<ParamSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detune: Option<ParamSpec>,
    },
    Envelope {
        #[serde(default)]
        attack: Contour,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        release: Option<Contour>,
    },
    Delay {
        delay_time: ParamSpec,
        /// Feedback gain; no feedback loop when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<f64>,
    },
    Constant {
        value: f64,
    },
    Noise {
        #[serde(default = "one_second")]
        duration: f64,
        #[serde(default)]
        looping: bool,
    },
    /// Convolution over a generated decaying-noise impulse.
    Convolver {
        #[serde(default = "one_second")]
        duration: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decay: Option<f64>,
        #[serde(default)]
        reverse: bool,
    },
    /// Build `node` once per builder and reuse it wherever `id` appears.
    Memoize {
        id: String,
        node: Box<GraphNode>,
    },
    Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    #[default]
    Serial,
    Parallel,
}

/// A parameter: a number, or a node modulating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec {
    Value(f64),
    Node(Box<GraphNode>),
}

fn unity() -> ParamSpec {
    ParamSpec::Value(1.0)
}

fn concert_a() -> ParamSpec {
    ParamSpec::Value(440.0)
}

fn default_cutoff() -> ParamSpec {
    ParamSpec::Value(350.0)
}

fn one_second() -> f64 {
    1.0
}

/// Parse a graph literal.
pub fn parse(source: &str) -> Result<GraphNode, SynthKitError> {
    Ok(serde_json::from_str(source)?)
}

/// Parse and build a graph literal in one go.
pub fn build(ctx: &Context, source: &str) -> Result<Node, SynthKitError> {
    GraphBuilder::new(ctx).build(&parse(source)?)
}

// ── Builder ─────────────────────────────────────────────────

/// Turns graph literals into nodes. Memoized subtrees live as long as the
/// builder.
pub struct GraphBuilder {
    ctx: Context,
    memo: HashMap<String, Node>,
}

impl GraphBuilder {
    pub fn new(ctx: &Context) -> Self {
        GraphBuilder { ctx: ctx.clone(), memo: HashMap::new() }
    }

    /// Number of memoized subtrees built so far.
    pub fn memoized(&self) -> usize {
        self.memo.len()
    }

    pub fn build(&mut self, node: &GraphNode) -> Result<Node, SynthKitError> {
        let ctx = self.ctx.clone();
        match node {
            GraphNode::Connect { route, nodes } => {
                let mut built = Vec::with_capacity(nodes.len());
                for child in nodes {
                    built.push(self.build(child)?);
                }
                let mut built = built.into_iter();
                let Some(first) = built.next() else {
                    return bypass(&ctx);
                };
                match route {
                    Route::Serial => series_of(first, built.collect()),
                    Route::Parallel => parallel_of(first, built.collect()),
                }
            }
            GraphNode::Gain { gain: level } => {
                let level = self.param(level)?;
                gain(&ctx, level)
            }
            GraphNode::Oscillator { waveform, frequency, detune } => {
                let frequency = self.param(frequency)?;
                let detune = self.optional(detune)?;
                osc(&ctx, *waveform, frequency, detune)
            }
            GraphNode::BiquadFilter { filter_type, frequency, q, detune } => {
                let frequency = self.param(frequency)?;
                let q = self.optional(q)?;
                let detune = self.optional(detune)?;
                filter(&ctx, *filter_type, frequency, q, detune)
            }
            GraphNode::Envelope { attack, release } => {
                envelope(&ctx, attack.clone(), release.clone())
            }
            GraphNode::Delay { delay_time, feedback } => {
                let time = self.param(delay_time)?;
                match feedback {
                    Some(amount) => delay(&ctx, time, None, *amount),
                    None => dly(&ctx, time),
                }
            }
            GraphNode::Constant { value } => constant(&ctx, *value),
            GraphNode::Noise { duration, looping } => white(&ctx, Some(*duration), *looping),
            GraphNode::Convolver { duration, decay, reverse } => {
                let seed = (duration * 1000.0) as u64;
                let ir = impulse_response(&ctx, *duration, *decay, *reverse, seed);
                convolver(&ctx, Some(std::rc::Rc::new(ir)), true)
            }
            GraphNode::Memoize { id, node } => {
                if id.is_empty() {
                    return Err(SynthKitError::MissingMemoId);
                }
                if let Some(cached) = self.memo.get(id) {
                    log::trace!("reusing memoized `{id}`");
                    return Ok(cached.clone());
                }
                let built = self.build(node)?;
                self.memo.insert(id.clone(), built.clone());
                Ok(built)
            }
            GraphNode::Destination => Ok(Node::destination(&ctx)),
        }
    }

    fn param(&mut self, spec: &ParamSpec) -> Result<ParamValue, SynthKitError> {
        match spec {
            ParamSpec::Value(value) => Ok(ParamValue::Literal(*value)),
            ParamSpec::Node(node) => Ok(ParamValue::Source(self.build(node)?)),
        }
    }

    fn optional(&mut self, spec: &Option<ParamSpec>) -> Result<Option<ParamValue>, SynthKitError> {
        spec.as_ref().map(|spec| self.param(spec)).transpose()
    }
}

// ── Diagnostics ─────────────────────────────────────────────

/// Render a parse error against its source as a plain-text diagnostic.
pub fn report(source: &str, err: &serde_json::Error) -> String {
    let offset = byte_offset(source, err.line(), err.column());
    let span = offset..(offset + 1).min(source.len()).max(offset);
    let mut out = Vec::new();
    let written = Report::build(ReportKind::Error, span.clone())
        .with_config(Config::default().with_color(false).with_index_type(IndexType::Byte))
        .with_message("invalid graph")
        .with_label(Label::new(span).with_message(err.to_string()))
        .finish()
        .write(Source::from(source), &mut out);
    match written {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(_) => format!("invalid graph: {err}"),
    }
}

/// serde_json positions are 1-based line and column.
fn byte_offset(source: &str, line: usize, column: usize) -> usize {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(source.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Endpoint, ParamName};
    use crate::node::tests::offline;
    use pretty_assertions::assert_eq;

    const VOICE: &str = r#"{
        "type": "connect",
        "nodes": [
            { "type": "oscillator", "waveform": "saw", "frequency": 110 },
            { "type": "biquadFilter", "frequency": { "type": "constant", "value": 800 } },
            { "type": "envelope", "attack": [["set", 0, 0], ["lin", 1, 0.01], ["exp", 0, 0.4]] }
        ]
    }"#;

    #[test]
    fn parses_nested_literal() {
        let graph = parse(VOICE).unwrap();
        let GraphNode::Connect { route, nodes } = &graph else {
            panic!("expected connect, got {graph:?}");
        };
        assert_eq!(*route, Route::Serial);
        assert_eq!(
            nodes[0],
            GraphNode::Oscillator {
                waveform: Waveform::Sawtooth,
                frequency: ParamSpec::Value(110.0),
                detune: None,
            }
        );
        let GraphNode::BiquadFilter { frequency, filter_type, .. } = &nodes[1] else {
            panic!("expected filter");
        };
        assert_eq!(*filter_type, FilterType::Lowpass);
        assert!(matches!(frequency, ParamSpec::Node(_)));
    }

    #[test]
    fn round_trips_through_json() {
        let graph = parse(VOICE).unwrap();
        let text = serde_json::to_string(&graph).unwrap();
        assert_eq!(parse(&text).unwrap(), graph);
    }

    #[test]
    fn builds_a_playable_voice() {
        let (ctx, engine) = offline();
        let voice = build(&ctx, VOICE).unwrap();
        assert!((voice.duration().unwrap() - 0.41).abs() < 1e-9);
        voice.connect(crate::node::Target::Destination).unwrap();
        voice.start(0.0).unwrap();
        // oscillator plus the constant driving the cutoff
        assert_eq!(engine.starts().len(), 2);
        let filter = voice.dependents()[0].output_host();
        assert_eq!(engine.param(filter, ParamName::Frequency), Some(0.0));
    }

    #[test]
    fn parallel_route() {
        let (ctx, engine) = offline();
        let mix = build(
            &ctx,
            r#"{"type": "connect", "route": "parallel", "nodes": [
                {"type": "gain", "gain": 0.5}, {"type": "delay", "delayTime": 0.2}
            ]}"#,
        )
        .unwrap();
        for branch in mix.dependents() {
            assert!(engine.is_connected(mix.input_host(), Endpoint::Node(branch.input_host())));
        }
    }

    #[test]
    fn empty_connect_is_bypass() {
        let (ctx, engine) = offline();
        let node = build(&ctx, r#"{"type": "connect"}"#).unwrap();
        assert_eq!(engine.param(node.output_host(), ParamName::Gain), Some(1.0));
    }

    #[test]
    fn memoize_builds_once() {
        let (ctx, _) = offline();
        let verb = r#"{"type": "memoize", "id": "plate", "node": {"type": "convolver", "duration": 0.1}}"#;
        let graph = parse(verb).unwrap();
        let mut builder = GraphBuilder::new(&ctx);
        let a = builder.build(&graph).unwrap();
        let b = builder.build(&graph).unwrap();
        assert!(Node::ptr_eq(&a, &b));
        assert_eq!(builder.memoized(), 1);
    }

    #[test]
    fn memoize_requires_id() {
        let (ctx, _) = offline();
        let empty = r#"{"type": "memoize", "id": "", "node": {"type": "gain"}}"#;
        assert!(matches!(build(&ctx, empty), Err(SynthKitError::MissingMemoId)));
        let missing = r#"{"type": "memoize", "node": {"type": "gain"}}"#;
        assert!(matches!(parse(missing), Err(SynthKitError::Graph(_))));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        assert!(matches!(parse(r#"{"type": "theremin"}"#), Err(SynthKitError::Graph(_))));
        assert!(parse(r#"{"type": "connect", "route": "diagonal"}"#).is_err());
    }

    #[test]
    fn report_points_at_the_error() {
        let source = "{\n  \"type\": \"gain\"\n  \"gain\": 1\n}";
        let err = serde_json::from_str::<GraphNode>(source).unwrap_err();
        assert_eq!(err.line(), 3);
        let text = report(source, &err);
        assert!(text.contains("invalid graph"), "{text}");
        assert!(text.contains("\"gain\": 1"), "{text}");
    }

    #[test]
    fn offsets_follow_lines() {
        assert_eq!(byte_offset("ab\ncd", 2, 2), 4);
        assert_eq!(byte_offset("ab", 1, 0), 0);
        assert_eq!(byte_offset("ab", 9, 9), 2);
    }
}
