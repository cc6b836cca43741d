//! Piecewise parameter automation.
//!
//! A contour is a list of stages. Each stage moves a parameter to a target
//! value: instantly (`set`), or along a linear or exponential ramp that ends
//! `duration` seconds after the previous stage ended.

use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::host::{Automation, Context, HostId, ParamName};

use super::Node;

/// Exponential ramps cannot reach zero; a zero target is replaced by this.
pub const EXP_RAMP_EPSILON: f64 = 0.00001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum StageKind {
    Set,
    Linear,
    Exponential,
}

impl StageKind {
    /// Accepts `set`, `linear`/`lin` and `exponential`/`exp`. Anything else
    /// is scheduled as a linear ramp.
    pub fn parse(name: &str) -> StageKind {
        match name {
            "set" => StageKind::Set,
            "linear" | "lin" => StageKind::Linear,
            "exponential" | "exp" => StageKind::Exponential,
            other => {
                log::warn!("unknown contour stage type `{other}`, ramping linearly");
                StageKind::Linear
            }
        }
    }
}

impl From<String> for StageKind {
    fn from(name: String) -> Self {
        StageKind::parse(&name)
    }
}

/// One contour step, serialized as `[kind, value, duration]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(StageKind, f64, f64)", into = "(StageKind, f64, f64)")]
pub struct Stage {
    pub kind: StageKind,
    /// Target value.
    pub value: f64,
    /// Seconds after the previous stage's end.
    pub duration: f64,
}

impl Stage {
    pub fn set(value: f64) -> Self {
        Stage { kind: StageKind::Set, value, duration: 0.0 }
    }

    pub fn linear(value: f64, duration: f64) -> Self {
        Stage { kind: StageKind::Linear, value, duration }
    }

    pub fn exponential(value: f64, duration: f64) -> Self {
        Stage { kind: StageKind::Exponential, value, duration }
    }

    fn target(&self) -> f64 {
        if self.kind == StageKind::Exponential && self.value == 0.0 {
            EXP_RAMP_EPSILON
        } else {
            self.value
        }
    }
}

impl From<(StageKind, f64, f64)> for Stage {
    fn from((kind, value, duration): (StageKind, f64, f64)) -> Self {
        Stage { kind, value, duration }
    }
}

impl From<Stage> for (StageKind, f64, f64) {
    fn from(stage: Stage) -> Self {
        (stage.kind, stage.value, stage.duration)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Stage>", into = "Vec<Stage>")]
pub struct Contour {
    stages: Vec<Stage>,
}

impl Contour {
    pub fn new(stages: Vec<Stage>) -> Result<Self, SynthKitError> {
        for (index, stage) in stages.iter().enumerate() {
            if !stage.value.is_finite() {
                return Err(SynthKitError::InvalidContour {
                    index,
                    reason: format!("value {} is not finite", stage.value),
                });
            }
            if !stage.duration.is_finite() || stage.duration < 0.0 {
                return Err(SynthKitError::InvalidContour {
                    index,
                    reason: format!("duration {} must be a non-negative number", stage.duration),
                });
            }
        }
        Ok(Contour { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> f64 {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Schedule every stage on `param` of `host`, starting at `time`
    /// (clamped to the engine clock).
    pub fn apply(
        &self,
        ctx: &Context,
        host: HostId,
        param: ParamName,
        time: f64,
    ) -> Result<(), SynthKitError> {
        let mut at = ctx.when(Some(time), None);
        for stage in &self.stages {
            at += stage.duration;
            ctx.engine().schedule(
                host,
                param,
                Automation { kind: stage.kind, value: stage.target(), time: at },
            )?;
        }
        log::trace!("{} stages on {host}.{param} until {at:.4}", self.stages.len());
        Ok(())
    }

    /// Bind the contour to one parameter of `node` for repeated triggering.
    pub fn compile(&self, node: &Node, param: ParamName) -> Result<CompiledContour, SynthKitError> {
        Ok(CompiledContour {
            ctx: node.context().clone(),
            host: node.param_host(param)?,
            param,
            contour: self.clone(),
        })
    }
}

impl TryFrom<Vec<Stage>> for Contour {
    type Error = SynthKitError;

    fn try_from(stages: Vec<Stage>) -> Result<Self, Self::Error> {
        Contour::new(stages)
    }
}

impl From<Contour> for Vec<Stage> {
    fn from(contour: Contour) -> Self {
        contour.stages
    }
}

/// A contour already resolved to a host parameter.
#[derive(Debug, Clone)]
pub struct CompiledContour {
    ctx: Context,
    host: HostId,
    param: ParamName,
    contour: Contour,
}

impl CompiledContour {
    pub fn invoke(&self, time: f64) -> Result<(), SynthKitError> {
        self.contour.apply(&self.ctx, self.host, self.param, time)
    }

    pub fn duration(&self) -> f64 {
        self.contour.total_duration()
    }
}
