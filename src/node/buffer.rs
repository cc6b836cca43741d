//! Sample buffers and buffer-playing sources.

use std::cell::RefCell;
use std::rc::Rc;

use oorandom::Rand32;
use serde::{Deserialize, Serialize};

use crate::error::SynthKitError;
use crate::host::{Context, NodeKind, ParamName};

use super::Node;
use super::param::ParamValue;

/// Multi-channel PCM held outside the host until a source plays it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: f64,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// All channels must have the same length.
    pub fn new(sample_rate: f64, channels: Vec<Vec<f32>>) -> Result<Self, SynthKitError> {
        if let Some(first) = channels.first() {
            if channels.iter().any(|c| c.len() != first.len()) {
                return Err(SynthKitError::Config("buffer channels differ in length".into()));
            }
        }
        Ok(AudioBuffer { sample_rate, channels })
    }

    pub fn mono(sample_rate: f64, data: Vec<f32>) -> Self {
        AudioBuffer { sample_rate, channels: vec![data] }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate > 0.0 { self.len() as f64 / self.sample_rate } else { 0.0 }
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }
}

/// Per-channel sample generators for synthetic buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generator {
    Silence,
    /// A single full-scale sample at the start.
    Pulse,
    White,
}

impl Generator {
    fn sample(&self, index: usize, rng: &mut Rand32) -> f32 {
        match self {
            Generator::Silence => 0.0,
            Generator::Pulse => {
                if index == 0 {
                    1.0
                } else {
                    0.0
                }
            }
            Generator::White => rng.rand_float() * 2.0 - 1.0,
        }
    }
}

/// Build a buffer with one channel per generator.
pub fn generate(ctx: &Context, generators: &[Generator], frames: usize, seed: u64) -> AudioBuffer {
    let mut rng = Rand32::new(seed);
    let channels = generators
        .iter()
        .map(|g| (0..frames).map(|i| g.sample(i, &mut rng)).collect())
        .collect();
    AudioBuffer { sample_rate: ctx.sample_rate(), channels }
}

/// Stereo decaying noise, usable as a convolution reverb impulse.
pub fn impulse_response(
    ctx: &Context,
    duration: f64,
    decay: Option<f64>,
    reverse: bool,
    seed: u64,
) -> AudioBuffer {
    let frames = ctx.seconds_to_samples(duration).max(1);
    let decay = decay.unwrap_or(duration / 1.2).max(f64::EPSILON);
    let mut buffer = generate(ctx, &[Generator::White, Generator::White], frames, seed);
    for channel in buffer.channels.iter_mut() {
        for (i, sample) in channel.iter_mut().enumerate() {
            let position = i as f64 / frames as f64;
            *sample *= (1.0 - position).powf(decay) as f32;
        }
        if reverse {
            channel.reverse();
        }
    }
    buffer
}

/// A buffer slot that is filled once its audio arrives.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    slot: Rc<RefCell<Option<Rc<AudioBuffer>>>>,
}

impl Sample {
    pub fn new() -> Self {
        Sample::default()
    }

    pub fn ready(buffer: AudioBuffer) -> Self {
        let sample = Sample::new();
        sample.fill(buffer);
        sample
    }

    pub fn fill(&self, buffer: AudioBuffer) {
        *self.slot.borrow_mut() = Some(Rc::new(buffer));
    }

    pub fn get(&self) -> Option<Rc<AudioBuffer>> {
        self.slot.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Fetch and decode a WAV or MP3 file into this slot.
    #[cfg(feature = "catalog")]
    pub async fn load(&self, url: &str) -> Result<Rc<AudioBuffer>, SynthKitError> {
        let buffer = Rc::new(crate::load::fetch_audio(url).await?);
        *self.slot.borrow_mut() = Some(buffer.clone());
        Ok(buffer)
    }
}

/// A node playing `buffer`. A missing buffer still yields a (silent) source.
pub fn source(
    ctx: &Context,
    buffer: Option<Rc<AudioBuffer>>,
    looping: bool,
    detune: Option<ParamValue>,
) -> Result<Node, SynthKitError> {
    if buffer.is_none() {
        log::warn!("buffer not ready, source will be silent");
    }
    Node::leaf(ctx, NodeKind::BufferSource { buffer, looping }, vec![(ParamName::Detune, detune)])
}

pub fn sample_source(
    ctx: &Context,
    sample: &Sample,
    looping: bool,
    detune: Option<ParamValue>,
) -> Result<Node, SynthKitError> {
    source(ctx, sample.get(), looping, detune)
}

/// White noise. `duration` defaults to one second.
pub fn white(ctx: &Context, duration: Option<f64>, looping: bool) -> Result<Node, SynthKitError> {
    let frames = ctx.seconds_to_samples(duration.unwrap_or(1.0)).max(2);
    let buffer = generate(ctx, &[Generator::White], frames, frames as u64);
    source(ctx, Some(Rc::new(buffer)), looping, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::offline;

    #[test]
    fn duration_from_frames() {
        let buffer = AudioBuffer::mono(48000.0, vec![0.0; 24000]);
        assert_eq!(buffer.duration(), 0.5);
        assert_eq!(buffer.number_of_channels(), 1);
    }

    #[test]
    fn mismatched_channels_rejected() {
        assert!(AudioBuffer::new(44100.0, vec![vec![0.0; 3], vec![0.0; 2]]).is_err());
    }

    #[test]
    fn white_noise_stays_in_range() {
        let (ctx, _) = offline();
        let buffer = generate(&ctx, &[Generator::White, Generator::Pulse], 1000, 7);
        let noise = buffer.channel(0).unwrap();
        assert!(noise.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(noise.iter().any(|s| *s != 0.0));
        let pulse = buffer.channel(1).unwrap();
        assert_eq!(pulse[0], 1.0);
        assert!(pulse[1..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn impulse_response_decays() {
        let (ctx, _) = offline();
        let ir = impulse_response(&ctx, 1.0, Some(3.0), false, 11);
        assert_eq!(ir.number_of_channels(), 2);
        let data = ir.channel(0).unwrap();
        let head: f32 = data[..4410].iter().map(|s| s.abs()).sum();
        let tail: f32 = data[data.len() - 4410..].iter().map(|s| s.abs()).sum();
        assert!(head > tail * 10.0, "head {head} tail {tail}");

        let reversed = impulse_response(&ctx, 1.0, Some(3.0), true, 11);
        assert_eq!(reversed.channel(0).unwrap()[0], data[data.len() - 1]);
    }

    #[test]
    fn sample_slot_fills_later() {
        let sample = Sample::new();
        assert!(!sample.is_ready());
        let (ctx, engine) = offline();
        let early = sample_source(&ctx, &sample, false, None).unwrap();
        assert_eq!(early.duration(), None);

        sample.fill(AudioBuffer::mono(44100.0, vec![0.5; 44100]));
        let node = sample_source(&ctx, &sample, false, None).unwrap();
        assert_eq!(node.duration(), Some(1.0));
        node.start(0.0).unwrap();
        assert_eq!(engine.stops(), vec![(node.output_host(), 1.0)]);
    }

    #[test]
    fn looping_source_has_no_duration() {
        let (ctx, _) = offline();
        let node = white(&ctx, Some(0.5), true).unwrap();
        assert_eq!(node.duration(), None);
        assert_eq!(white(&ctx, Some(0.5), false).unwrap().duration(), Some(0.5));
    }
}
