//! The browser backend: an [`Engine`] over a Web Audio `AudioContext`.
//!
//! Host nodes live in a table indexed by [`HostId`]; slot 0 is the context's
//! destination. Disconnecting a node releases its slot for reuse, so the
//! table only holds nodes that are still wired up.

use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{
    AudioBufferSourceNode, AudioContext, AudioNode, AudioParam, AudioScheduledSourceNode,
    BiquadFilterNode, BiquadFilterType, ConstantSourceNode, ConvolverNode, DelayNode, GainNode,
    OscillatorNode, OscillatorType,
};

use crate::error::SynthKitError;
use crate::graph;
use crate::instrument::{Instrument, Play};
use crate::node::buffer::AudioBuffer;
use crate::node::contour::StageKind;
use crate::synth::{SubtractiveConfig, subtractive_synth};

use super::{Automation, Context, Endpoint, Engine, HostId, NodeKind, ParamName, Waveform};

fn js_err(e: JsValue) -> SynthKitError {
    SynthKitError::host(format!("{e:?}"))
}

fn oscillator_type(waveform: Waveform) -> OscillatorType {
    match waveform {
        Waveform::Sine => OscillatorType::Sine,
        Waveform::Square => OscillatorType::Square,
        Waveform::Sawtooth => OscillatorType::Sawtooth,
        Waveform::Triangle => OscillatorType::Triangle,
    }
}

fn filter_type(filter: super::FilterType) -> BiquadFilterType {
    use super::FilterType::*;
    match filter {
        Lowpass => BiquadFilterType::Lowpass,
        Highpass => BiquadFilterType::Highpass,
        Bandpass => BiquadFilterType::Bandpass,
        Lowshelf => BiquadFilterType::Lowshelf,
        Highshelf => BiquadFilterType::Highshelf,
        Peaking => BiquadFilterType::Peaking,
        Notch => BiquadFilterType::Notch,
        Allpass => BiquadFilterType::Allpass,
    }
}

struct WebNode {
    node: AudioNode,
    kind: &'static str,
}

pub struct WebAudioEngine {
    ctx: AudioContext,
    nodes: RefCell<Vec<Option<WebNode>>>,
    free: RefCell<Vec<u32>>,
}

impl WebAudioEngine {
    pub fn new() -> Result<Self, SynthKitError> {
        let ctx = AudioContext::new().map_err(js_err)?;
        Ok(WebAudioEngine::with_context(ctx))
    }

    pub fn with_context(ctx: AudioContext) -> Self {
        let destination = WebNode { node: ctx.destination().into(), kind: "Destination" };
        WebAudioEngine {
            ctx,
            nodes: RefCell::new(vec![Some(destination)]),
            free: RefCell::new(Vec::new()),
        }
    }

    pub fn audio_context(&self) -> &AudioContext {
        &self.ctx
    }

    /// Number of live host nodes, the destination included.
    pub fn live_nodes(&self) -> usize {
        self.nodes.borrow().iter().flatten().count()
    }

    fn entry(&self, id: HostId) -> Result<(AudioNode, &'static str), SynthKitError> {
        self.nodes
            .borrow()
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .map(|n| (n.node.clone(), n.kind))
            .ok_or_else(|| SynthKitError::host(format!("unknown or released host node {id}")))
    }

    fn node(&self, id: HostId) -> Result<AudioNode, SynthKitError> {
        self.entry(id).map(|(node, _)| node)
    }

    fn scheduled(&self, id: HostId) -> Result<AudioScheduledSourceNode, SynthKitError> {
        self.node(id)?
            .dyn_into::<AudioScheduledSourceNode>()
            .map_err(|_| SynthKitError::host(format!("host node {id} is not a source")))
    }

    fn audio_param(&self, id: HostId, param: ParamName) -> Result<AudioParam, SynthKitError> {
        let (node, kind) = self.entry(id)?;
        let found = match (kind, param) {
            ("Gain", ParamName::Gain) => Some(node.unchecked_ref::<GainNode>().gain()),
            ("Oscillator", ParamName::Frequency) => {
                Some(node.unchecked_ref::<OscillatorNode>().frequency())
            }
            ("Oscillator", ParamName::Detune) => Some(node.unchecked_ref::<OscillatorNode>().detune()),
            ("BiquadFilter", p) => {
                let filter = node.unchecked_ref::<BiquadFilterNode>();
                match p {
                    ParamName::Frequency => Some(filter.frequency()),
                    ParamName::Detune => Some(filter.detune()),
                    ParamName::Q => Some(filter.q()),
                    ParamName::Gain => Some(filter.gain()),
                    _ => None,
                }
            }
            ("Delay", ParamName::DelayTime) => Some(node.unchecked_ref::<DelayNode>().delay_time()),
            ("BufferSource", ParamName::Detune) => {
                Some(node.unchecked_ref::<AudioBufferSourceNode>().detune())
            }
            ("BufferSource", ParamName::PlaybackRate) => {
                Some(node.unchecked_ref::<AudioBufferSourceNode>().playback_rate())
            }
            ("ConstantSource", ParamName::Offset) => {
                Some(node.unchecked_ref::<ConstantSourceNode>().offset())
            }
            _ => None,
        };
        found.ok_or_else(|| SynthKitError::UnknownParam { node: format!("{kind}{id}"), param })
    }

    fn to_web_buffer(&self, buffer: &AudioBuffer) -> Result<web_sys::AudioBuffer, SynthKitError> {
        let web = self
            .ctx
            .create_buffer(
                buffer.number_of_channels() as u32,
                buffer.len().max(1) as u32,
                buffer.sample_rate() as f32,
            )
            .map_err(js_err)?;
        for index in 0..buffer.number_of_channels() {
            if let Some(channel) = buffer.channel(index) {
                let mut data = channel.to_vec();
                web.copy_to_channel(&mut data, index as i32).map_err(js_err)?;
            }
        }
        Ok(web)
    }

    fn build(&self, kind: &NodeKind) -> Result<AudioNode, SynthKitError> {
        let ctx = &self.ctx;
        let node: AudioNode = match kind {
            NodeKind::Gain => ctx.create_gain().map_err(js_err)?.into(),
            NodeKind::Oscillator(waveform) => {
                let osc = ctx.create_oscillator().map_err(js_err)?;
                osc.set_type(oscillator_type(*waveform));
                osc.into()
            }
            NodeKind::BiquadFilter(filter) => {
                let biquad = ctx.create_biquad_filter().map_err(js_err)?;
                biquad.set_type(filter_type(*filter));
                biquad.into()
            }
            NodeKind::Delay { max_delay } => {
                ctx.create_delay_with_max_delay_time(*max_delay).map_err(js_err)?.into()
            }
            NodeKind::BufferSource { buffer, looping } => {
                let source = ctx.create_buffer_source().map_err(js_err)?;
                if let Some(buffer) = buffer {
                    source.set_buffer(Some(&self.to_web_buffer(buffer)?));
                }
                source.set_loop(*looping);
                source.into()
            }
            NodeKind::ConstantSource => ctx.create_constant_source().map_err(js_err)?.into(),
            NodeKind::Convolver { buffer, normalize } => {
                let convolver: ConvolverNode = ctx.create_convolver().map_err(js_err)?;
                convolver.set_normalize(*normalize);
                if let Some(buffer) = buffer {
                    convolver.set_buffer(Some(&self.to_web_buffer(buffer)?));
                }
                convolver.into()
            }
            NodeKind::WaveShaper { curve } => {
                let shaper = ctx.create_wave_shaper().map_err(js_err)?;
                let array = js_sys::Float32Array::from(curve.as_slice());
                js_sys::Reflect::set(&shaper, &JsValue::from_str("curve"), &array)
                    .map_err(js_err)?;
                shaper.into()
            }
        };
        Ok(node)
    }
}

impl Engine for WebAudioEngine {
    fn current_time(&self) -> f64 {
        self.ctx.current_time()
    }

    fn sample_rate(&self) -> f64 {
        self.ctx.sample_rate() as f64
    }

    fn destination(&self) -> HostId {
        HostId(0)
    }

    fn create_node(&self, kind: &NodeKind) -> Result<HostId, SynthKitError> {
        let entry = Some(WebNode { node: self.build(kind)?, kind: kind.name() });
        let mut nodes = self.nodes.borrow_mut();
        match self.free.borrow_mut().pop() {
            Some(slot) => {
                nodes[slot as usize] = entry;
                Ok(HostId(slot))
            }
            None => {
                nodes.push(entry);
                Ok(HostId(nodes.len() as u32 - 1))
            }
        }
    }

    fn number_of_inputs(&self, node: HostId) -> usize {
        self.node(node).map(|n| n.number_of_inputs() as usize).unwrap_or(0)
    }

    fn connect(&self, from: HostId, to: Endpoint) -> Result<(), SynthKitError> {
        let source = self.node(from)?;
        match to {
            Endpoint::Node(target) => {
                source.connect_with_audio_node(&self.node(target)?).map_err(js_err)?;
            }
            Endpoint::Param(target, param) => {
                source.connect_with_audio_param(&self.audio_param(target, param)?).map_err(js_err)?;
            }
        }
        Ok(())
    }

    fn disconnect(&self, node: HostId) -> Result<(), SynthKitError> {
        self.node(node)?.disconnect().map_err(js_err)?;
        if node != self.destination() {
            if let Some(slot) = self.nodes.borrow_mut().get_mut(node.0 as usize) {
                *slot = None;
            }
            self.free.borrow_mut().push(node.0);
        }
        Ok(())
    }

    fn start(&self, node: HostId, time: f64) -> Result<(), SynthKitError> {
        self.scheduled(node)?.start_with_when(time).map_err(js_err)
    }

    fn stop(&self, node: HostId, time: f64) -> Result<(), SynthKitError> {
        self.scheduled(node)?.stop_with_when(time).map_err(js_err)
    }

    fn set_buffer(&self, node: HostId, buffer: Rc<AudioBuffer>) -> Result<(), SynthKitError> {
        let (host, kind) = self.entry(node)?;
        let web = self.to_web_buffer(&buffer)?;
        match kind {
            "Convolver" => host.unchecked_ref::<ConvolverNode>().set_buffer(Some(&web)),
            "BufferSource" => host.unchecked_ref::<AudioBufferSourceNode>().set_buffer(Some(&web)),
            _ => return Err(SynthKitError::host(format!("{kind} {node} holds no buffer"))),
        }
        Ok(())
    }

    fn set_param(&self, node: HostId, param: ParamName, value: f64) -> Result<(), SynthKitError> {
        self.audio_param(node, param)?.set_value(value as f32);
        Ok(())
    }

    fn schedule(
        &self,
        node: HostId,
        param: ParamName,
        event: Automation,
    ) -> Result<(), SynthKitError> {
        let param = self.audio_param(node, param)?;
        let value = event.value as f32;
        match event.kind {
            StageKind::Set => param.set_value_at_time(value, event.time),
            StageKind::Linear => param.linear_ramp_to_value_at_time(value, event.time),
            StageKind::Exponential => param.exponential_ramp_to_value_at_time(value, event.time),
        }
        .map(|_| ())
        .map_err(js_err)
    }

    fn on_ended(&self, node: HostId, mut callback: Box<dyn FnMut()>) {
        let Ok(source) = self.scheduled(node) else {
            log::warn!("ended listener on {node}, which never ends");
            return;
        };
        let listener = Closure::once_into_js(move || callback());
        if let Err(e) = source.add_event_listener_with_callback("ended", listener.unchecked_ref()) {
            log::warn!("could not listen for ended on {node}: {e:?}");
        }
    }
}

/// A subtractive synth playing straight into the speakers.
#[wasm_bindgen]
pub struct Player {
    engine: Rc<WebAudioEngine>,
    ctx: Context,
    instrument: Instrument<f64>,
}

#[wasm_bindgen]
impl Player {
    /// `config` is a subtractive synth config object; `undefined` takes the
    /// defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue, max_voices: Option<u32>) -> Result<Player, JsValue> {
        let config: SubtractiveConfig = if config.is_undefined() || config.is_null() {
            SubtractiveConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config).map_err(|e| JsValue::from_str(&format!("{e}")))?
        };
        let engine = Rc::new(WebAudioEngine::new().map_err(|e| JsValue::from_str(&format!("{e}")))?);
        let ctx = Context::new(engine.clone());
        let instrument = Instrument::master(&ctx)
            .with_synth(subtractive_synth(config))
            .with_max_voices(max_voices.unwrap_or(0) as usize);
        Ok(Player { engine, ctx, instrument })
    }

    /// Browsers start audio contexts suspended until a user gesture.
    pub fn resume(&self) -> Result<js_sys::Promise, JsValue> {
        self.engine.audio_context().resume()
    }

    pub fn now(&self) -> f64 {
        self.ctx.now()
    }

    /// Play `frequency`; returns the voice id.
    pub fn play(
        &self,
        frequency: f64,
        time: Option<f64>,
        duration: Option<f64>,
    ) -> Result<f64, JsValue> {
        let node = self
            .instrument
            .start(Play::Value(frequency), time, None, duration)
            .map_err(|e| JsValue::from_str(&format!("{e}")))?;
        Ok(node.id().unwrap_or_default() as f64)
    }

    /// Build a JSON graph description, route it to the output and start it.
    #[wasm_bindgen(js_name = playGraph)]
    pub fn play_graph(&self, json: &str, time: Option<f64>, duration: Option<f64>) -> Result<f64, JsValue> {
        let node = graph::build(&self.ctx, json).map_err(|e| match &e {
            SynthKitError::Graph(err) => JsValue::from_str(&graph::report(json, err)),
            _ => JsValue::from_str(&format!("{e}")),
        })?;
        let node = self
            .instrument
            .start(node, time, None, duration)
            .map_err(|e| JsValue::from_str(&format!("{e}")))?;
        Ok(node.id().unwrap_or_default() as f64)
    }

    /// Stop one voice, or every voice when `id` is omitted.
    pub fn stop(&self, id: Option<f64>, time: Option<f64>) -> Result<(), JsValue> {
        let ids = id.map(|id| [id as u64]);
        self.instrument
            .stop(ids.as_ref().map(|ids| &ids[..]), time, None)
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    pub fn voices(&self) -> usize {
        self.instrument.len()
    }
}
