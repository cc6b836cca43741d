//! The host audio engine boundary.
//!
//! Everything audible happens inside an [`Engine`]: the browser's Web Audio
//! graph (`web` feature) or the [`offline::OfflineEngine`] used by tests. This
//! crate only creates host nodes, wires them together and hands the engine
//! absolute timestamps. The engine interface is deliberately small: a clock,
//! a node factory, connections, start/stop, late buffer assignment and three
//! parameter automation primitives.

pub mod offline;
#[cfg(feature = "web")]
pub mod web;

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::node::buffer::AudioBuffer;
use crate::node::contour::StageKind;
use crate::time;

/// Opaque handle to a node living inside the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u32);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Oscillator waveform shapes supported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    #[serde(alias = "saw")]
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Triangle => "triangle",
        }
    }
}

/// Biquad filter response types (the Web Audio set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    Lowpass,
    #[serde(alias = "hipass")]
    Highpass,
    Bandpass,
    Lowshelf,
    Highshelf,
    Peaking,
    Notch,
    Allpass,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Lowpass => "lowpass",
            FilterType::Highpass => "highpass",
            FilterType::Bandpass => "bandpass",
            FilterType::Lowshelf => "lowshelf",
            FilterType::Highshelf => "highshelf",
            FilterType::Peaking => "peaking",
            FilterType::Notch => "notch",
            FilterType::Allpass => "allpass",
        }
    }
}

/// Named control inputs of host nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamName {
    Gain,
    Frequency,
    Detune,
    Q,
    DelayTime,
    Offset,
    PlaybackRate,
}

impl ParamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamName::Gain => "gain",
            ParamName::Frequency => "frequency",
            ParamName::Detune => "detune",
            ParamName::Q => "Q",
            ParamName::DelayTime => "delayTime",
            ParamName::Offset => "offset",
            ParamName::PlaybackRate => "playbackRate",
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the host is asked to create.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Gain,
    Oscillator(Waveform),
    BiquadFilter(FilterType),
    Delay { max_delay: f64 },
    BufferSource { buffer: Option<Rc<AudioBuffer>>, looping: bool },
    ConstantSource,
    Convolver { buffer: Option<Rc<AudioBuffer>>, normalize: bool },
    WaveShaper { curve: Vec<f32> },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Gain => "Gain",
            NodeKind::Oscillator(_) => "Oscillator",
            NodeKind::BiquadFilter(_) => "BiquadFilter",
            NodeKind::Delay { .. } => "Delay",
            NodeKind::BufferSource { .. } => "BufferSource",
            NodeKind::ConstantSource => "ConstantSource",
            NodeKind::Convolver { .. } => "Convolver",
            NodeKind::WaveShaper { .. } => "WaveShaper",
        }
    }

    /// Scheduled sources have a native start/stop and fire `ended`.
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            NodeKind::Oscillator(_) | NodeKind::BufferSource { .. } | NodeKind::ConstantSource
        )
    }

    /// Parameters the host exposes for this kind.
    pub fn params(&self) -> &'static [ParamName] {
        match self {
            NodeKind::Gain => &[ParamName::Gain],
            NodeKind::Oscillator(_) => &[ParamName::Frequency, ParamName::Detune],
            NodeKind::BiquadFilter(_) => {
                &[ParamName::Frequency, ParamName::Detune, ParamName::Q, ParamName::Gain]
            }
            NodeKind::Delay { .. } => &[ParamName::DelayTime],
            NodeKind::BufferSource { .. } => &[ParamName::Detune, ParamName::PlaybackRate],
            NodeKind::ConstantSource => &[ParamName::Offset],
            NodeKind::Convolver { .. } | NodeKind::WaveShaper { .. } => &[],
        }
    }

    /// Number of audio inputs the host node accepts.
    pub fn inputs(&self) -> usize {
        if self.is_source() { 0 } else { 1 }
    }
}

/// Where a connection lands: a node's audio input or one of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Node(HostId),
    Param(HostId, ParamName),
}

/// One automation instruction against a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Automation {
    pub kind: StageKind,
    pub value: f64,
    pub time: f64,
}

/// The host audio engine.
///
/// Methods take `&self`: the engine handle is shared, ambient state and
/// implementations keep their bookkeeping behind interior mutability.
pub trait Engine {
    /// Monotonic clock, in seconds.
    fn current_time(&self) -> f64;

    fn sample_rate(&self) -> f64;

    /// The final output node.
    fn destination(&self) -> HostId;

    fn create_node(&self, kind: &NodeKind) -> Result<HostId, SynthKitError>;

    fn number_of_inputs(&self, node: HostId) -> usize;

    fn connect(&self, from: HostId, to: Endpoint) -> Result<(), SynthKitError>;

    fn disconnect(&self, node: HostId) -> Result<(), SynthKitError>;

    fn start(&self, node: HostId, time: f64) -> Result<(), SynthKitError>;

    fn stop(&self, node: HostId, time: f64) -> Result<(), SynthKitError>;

    /// Assign a parameter's current value.
    fn set_param(&self, node: HostId, param: ParamName, value: f64) -> Result<(), SynthKitError>;

    /// Set-at-time, linear ramp or exponential ramp.
    fn schedule(
        &self,
        node: HostId,
        param: ParamName,
        event: Automation,
    ) -> Result<(), SynthKitError>;

    /// Hand a buffer to a buffer source or convolver after creation.
    fn set_buffer(&self, node: HostId, buffer: Rc<AudioBuffer>) -> Result<(), SynthKitError>;

    /// Register a one-shot callback for when a source node finishes.
    fn on_ended(&self, node: HostId, callback: Box<dyn FnMut()>);
}

/// Explicit handle to the engine, threaded through every constructor.
#[derive(Clone)]
pub struct Context {
    engine: Rc<dyn Engine>,
}

impl Context {
    pub fn new(engine: Rc<dyn Engine>) -> Self {
        Context { engine }
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn now(&self) -> f64 {
        self.engine.current_time()
    }

    pub fn sample_rate(&self) -> f64 {
        self.engine.sample_rate()
    }

    /// See [`time::when`].
    pub fn when(&self, time: Option<f64>, delay: Option<f64>) -> f64 {
        time::when(time, delay, self.now())
    }

    pub fn after(&self, delay: f64) -> f64 {
        time::after(delay, self.now())
    }

    pub fn seconds_to_samples(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate()).round().max(0.0) as usize
    }

    pub fn same(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.engine, &other.engine)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("now", &self.now())
            .field("sample_rate", &self.sample_rate())
            .finish()
    }
}
