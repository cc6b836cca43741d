//! Gain envelopes.
//!
//! An envelope is a gain node (initially silent) whose gain follows an attack
//! contour on start and an optional release contour on stop. Without a
//! release the envelope stops itself when the attack finishes.

use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::host::{Context, NodeKind, ParamName};

use super::contour::{Contour, Stage};
use super::signal::scale;
use super::{Node, Parts, Shape};

pub fn envelope(
    ctx: &Context,
    attack: Contour,
    release: Option<Contour>,
) -> Result<Node, SynthKitError> {
    let host = ctx.engine().create_node(&NodeKind::Gain)?;
    ctx.engine().set_param(host, ParamName::Gain, 0.0)?;
    let duration = match release {
        None => Some(attack.total_duration()),
        Some(_) => None,
    };
    let release_time = release.as_ref().map(Contour::total_duration);
    Ok(Node::from_parts(
        ctx,
        Parts {
            label: format!("Envelope{host}"),
            shape: Shape::Envelope { host, attack, release },
            dependents: Vec::new(),
            duration,
            release: release_time,
        },
    ))
}

/// Percussive attack/decay with no sustain.
pub fn perc(ctx: &Context, attack: Option<f64>, decay: Option<f64>) -> Result<Node, SynthKitError> {
    let attack = Contour::new(vec![
        Stage::set(0.0),
        Stage::linear(1.0, attack.unwrap_or(0.01)),
        Stage::exponential(0.0, decay.unwrap_or(0.2)),
    ])?;
    envelope(ctx, attack, None)
}

/// Attack, hold, then decay back down.
pub fn ad(
    ctx: &Context,
    attack: f64,
    hold: f64,
    decay: f64,
    max: f64,
    min: f64,
) -> Result<Node, SynthKitError> {
    let attack = Contour::new(vec![
        Stage::set(min),
        Stage::linear(max, attack),
        Stage::set(max),
        Stage::linear(max, hold),
        Stage::linear(min, decay),
    ])?;
    envelope(ctx, attack, None)
}

/// ADSR times in seconds and the sustain level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsrConfig {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for AdsrConfig {
    fn default() -> Self {
        AdsrConfig { attack: 0.01, decay: 0.1, sustain: 0.8, release: 0.3 }
    }
}

impl AdsrConfig {
    pub fn from_array([attack, decay, sustain, release]: [f64; 4]) -> Self {
        AdsrConfig { attack, decay, sustain, release }
    }

    pub fn attack_contour(&self) -> Result<Contour, SynthKitError> {
        Contour::new(vec![
            Stage::set(0.0),
            Stage::linear(1.0, self.attack),
            Stage::exponential(self.sustain, self.decay),
        ])
    }

    pub fn release_contour(&self) -> Result<Contour, SynthKitError> {
        Contour::new(vec![Stage::set(self.sustain), Stage::exponential(0.0, self.release)])
    }
}

pub fn adsr(ctx: &Context, config: &AdsrConfig) -> Result<Node, SynthKitError> {
    envelope(ctx, config.attack_contour()?, Some(config.release_contour()?))
}

/// An ADSR sweeping from `frequency` up `octaves` octaves, for modulating
/// filter or oscillator frequencies.
pub fn freq_env(
    ctx: &Context,
    frequency: f64,
    octaves: f64,
    config: &AdsrConfig,
) -> Result<Node, SynthKitError> {
    scale(frequency, frequency * 2f64.powf(octaves), adsr(ctx, config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Automation;
    use crate::node::contour::{EXP_RAMP_EPSILON, StageKind};
    use crate::node::tests::offline;
    use float_cmp::approx_eq;

    #[test]
    fn starts_silent() {
        let (ctx, engine) = offline();
        let env = adsr(&ctx, &AdsrConfig::default()).unwrap();
        assert_eq!(engine.param(env.output_host(), ParamName::Gain), Some(0.0));
        assert!(env.is_startable());
        assert!(!env.emits_ended());
    }

    #[test]
    fn attack_rises_then_decays_to_sustain() {
        let (ctx, engine) = offline();
        let env = adsr(&ctx, &AdsrConfig::from_array([0.01, 0.1, 0.7, 0.3])).unwrap();
        env.start(0.0).unwrap();
        let events = engine.automation(env.output_host(), ParamName::Gain);
        assert_eq!(events[0], Automation { kind: StageKind::Set, value: 0.0, time: 0.0 });
        assert_eq!(events[1], Automation { kind: StageKind::Linear, value: 1.0, time: 0.01 });
        assert_eq!(events[2].kind, StageKind::Exponential);
        assert_eq!(events[2].value, 0.7);
        assert!(approx_eq!(f64, events[2].time, 0.11, epsilon = 1e-9));
    }

    #[test]
    fn release_falls_from_sustain() {
        let (ctx, engine) = offline();
        let env = adsr(&ctx, &AdsrConfig::default()).unwrap();
        env.start(0.0).unwrap();
        env.stop(2.0).unwrap();
        let events = engine.automation(env.output_host(), ParamName::Gain);
        assert_eq!(events.len(), 5);
        assert_eq!(events[3], Automation { kind: StageKind::Set, value: 0.8, time: 2.0 });
        assert_eq!(events[4].value, EXP_RAMP_EPSILON);
        assert!(approx_eq!(f64, events[4].time, 2.3, epsilon = 1e-9));
    }

    #[test]
    fn adsr_is_open_ended() {
        let (ctx, _) = offline();
        let env = adsr(&ctx, &AdsrConfig::default()).unwrap();
        assert_eq!(env.duration(), None);
        assert!(approx_eq!(f64, env.release().unwrap(), 0.3, epsilon = 1e-9));
    }

    #[test]
    fn perc_has_fixed_duration() {
        let (ctx, _) = offline();
        let env = perc(&ctx, None, None).unwrap();
        assert!(approx_eq!(f64, env.duration().unwrap(), 0.21, epsilon = 1e-9));
        assert_eq!(env.release(), None);
    }

    #[test]
    fn zero_length_envelope_has_no_duration() {
        let (ctx, _) = offline();
        let env = envelope(&ctx, Contour::default(), None).unwrap();
        assert_eq!(env.duration(), None);
    }

    #[test]
    fn ad_holds_at_max() {
        let (ctx, _) = offline();
        let env = ad(&ctx, 0.1, 0.5, 0.2, 1.0, 0.0).unwrap();
        assert!(approx_eq!(f64, env.duration().unwrap(), 0.8, epsilon = 1e-9));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: AdsrConfig = serde_json::from_str(r#"{"release": 1.5}"#).unwrap();
        assert_eq!(config, AdsrConfig { release: 1.5, ..AdsrConfig::default() });
    }

    #[test]
    fn freq_env_sweeps_octaves() {
        let (ctx, engine) = offline();
        let sweep = freq_env(&ctx, 100.0, 2.0, &AdsrConfig::default()).unwrap();
        sweep.start(0.0).unwrap();
        // two constants: the floor and the one driving the envelope
        assert_eq!(engine.starts().len(), 2);
    }
}
