//! Gains, constant signals and signal arithmetic.

use std::rc::Rc;

use crate::error::SynthKitError;
use crate::host::{Context, NodeKind, ParamName};
use crate::units::db_to_gain;

use super::Node;
use super::buffer::{AudioBuffer, source};
use super::param::ParamValue;
use super::routing::{parallel_of, series_of};

pub fn gain(ctx: &Context, value: impl Into<ParamValue>) -> Result<Node, SynthKitError> {
    Node::leaf(ctx, NodeKind::Gain, vec![(ParamName::Gain, Some(value.into()))])
}

/// Gain expressed in decibels.
pub fn gain_db(ctx: &Context, db: f64) -> Result<Node, SynthKitError> {
    gain(ctx, db_to_gain(db))
}

/// Unity gain pass-through.
pub fn bypass(ctx: &Context) -> Result<Node, SynthKitError> {
    gain(ctx, 1.0)
}

/// A looping two-sample buffer holding `value`.
pub fn constant(ctx: &Context, value: f64) -> Result<Node, SynthKitError> {
    let buffer = AudioBuffer::mono(ctx.sample_rate(), vec![value as f32; 2]);
    source(ctx, Some(Rc::new(buffer)), true, None)
}

/// A constant 1 scaled by `value`, which may itself be a node.
pub fn signal(ctx: &Context, value: impl Into<ParamValue>) -> Result<Node, SynthKitError> {
    series_of(constant(ctx, 1.0)?, vec![gain(ctx, value)?])
}

/// `source` multiplied by `value`.
pub fn mult(value: impl Into<ParamValue>, source: Node) -> Result<Node, SynthKitError> {
    let amount = gain(source.context(), value)?;
    series_of(source, vec![amount])
}

/// Map a `0..1` signal onto `min..max`.
///
/// A source that takes input is fed a constant 1 first, so an envelope can be
/// scaled directly.
pub fn scale(min: f64, max: f64, source: Node) -> Result<Node, SynthKitError> {
    let ctx = source.context().clone();
    let source = if source.number_of_inputs() > 0 {
        series_of(constant(&ctx, 1.0)?, vec![source])?
    } else {
        source
    };
    parallel_of(constant(&ctx, min)?, vec![mult(max - min, source)?])
}
