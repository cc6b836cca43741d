//! Delay, feedback, dry/wet mixing and reverb.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::host::{Context, NodeKind, ParamName, Waveform};

use super::buffer::{AudioBuffer, impulse_response};
use super::oscillator::osc;
use super::param::ParamValue;
use super::routing::{parallel_of, series_of};
use super::signal::{bypass, gain};
use super::{Node, lifecycle};

/// Longest delay a delay line is allocated for, in seconds.
pub const MAX_DELAY: f64 = 5.0;

/// A bare delay line.
pub fn dly(ctx: &Context, time: impl Into<ParamValue>) -> Result<Node, SynthKitError> {
    Node::leaf(
        ctx,
        NodeKind::Delay { max_delay: MAX_DELAY },
        vec![(ParamName::DelayTime, Some(time.into()))],
    )
}

/// Route `node`'s output back into its input through a gain of `amount`.
pub fn feedback(amount: f64, node: Node) -> Result<Node, SynthKitError> {
    let ctx = node.context().clone();
    let feed = gain(&ctx, amount)?;
    node.connect(&feed)?;
    feed.connect(&node)?;
    Ok(lifecycle(node, vec![feed]))
}

/// Feedback delay, optionally filtering each repeat.
pub fn delay(
    ctx: &Context,
    time: impl Into<ParamValue>,
    filter: Option<Node>,
    amount: f64,
) -> Result<Node, SynthKitError> {
    let line = dly(ctx, time)?;
    let color = match filter {
        Some(filter) => filter,
        None => bypass(ctx)?,
    };
    let repeat = series_of(color, vec![gain(ctx, amount)?])?;
    line.connect(&repeat)?;
    repeat.connect(&line)?;
    Ok(lifecycle(line, vec![repeat]))
}

/// Blend `fx` with the dry signal. `wet` defaults to one half; with
/// `normalize` the dry level is `1 - wet`.
pub fn mix(fx: Node, wet: Option<f64>, normalize: bool) -> Result<Node, SynthKitError> {
    let ctx = fx.context().clone();
    let wet = wet.unwrap_or(0.5);
    let dry = if normalize { 1.0 - wet } else { 1.0 };
    let wet_path = series_of(fx, vec![gain(&ctx, wet)?])?;
    parallel_of(gain(&ctx, dry)?, vec![wet_path])
}

/// Amplitude modulation at `rate` Hz.
pub fn tremolo(ctx: &Context, rate: f64, waveform: Waveform) -> Result<Node, SynthKitError> {
    gain(ctx, osc(ctx, waveform, rate, None)?)
}

pub fn convolver(
    ctx: &Context,
    buffer: Option<Rc<AudioBuffer>>,
    normalize: bool,
) -> Result<Node, SynthKitError> {
    if buffer.is_none() {
        log::warn!("impulse response not ready, convolver will be silent");
    }
    Node::leaf(ctx, NodeKind::Convolver { buffer, normalize }, Vec::new())
}

/// Reverb settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbConfig {
    /// Wet level.
    pub amount: f64,
    /// Impulse length in seconds.
    pub duration: f64,
    pub decay: Option<f64>,
    pub reverse: bool,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        ReverbConfig { amount: 0.3, duration: 2.0, decay: None, reverse: false }
    }
}

/// Convolution reverb over generated decaying noise, mixed with the dry path.
pub fn reverb(ctx: &Context, config: &ReverbConfig) -> Result<Node, SynthKitError> {
    let seed = (config.duration * 1000.0) as u64;
    let ir = impulse_response(ctx, config.duration, config.decay, config.reverse, seed);
    mix(convolver(ctx, Some(Rc::new(ir)), true)?, Some(config.amount), false)
}
