//! Fetching and decoding audio files.
//!
//! WAV goes through hound, MP3 through minimp3. Anything that does not start
//! with a RIFF header is treated as MP3.

use std::io::Cursor;

use crate::error::SynthKitError;
use crate::node::buffer::AudioBuffer;

/// Decode a WAV file, integer or float, into one channel per WAV channel.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer, SynthKitError> {
    let decode = |e: hound::Error| SynthKitError::Decode(format!("wav: {e}"));
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(decode)?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>().map_err(decode)?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(decode)?
        }
    };
    let width = usize::from(spec.channels.max(1));
    let mut channels = vec![Vec::with_capacity(interleaved.len() / width); width];
    for (i, sample) in interleaved.into_iter().enumerate() {
        channels[i % width].push(sample);
    }
    AudioBuffer::new(f64::from(spec.sample_rate), channels)
}

/// Decode an MP3 into a buffer, one channel per MP3 channel.
pub fn decode_mp3(bytes: &[u8]) -> Result<AudioBuffer, SynthKitError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut channels: Vec<Vec<f32>> = Vec::new();
    let mut sample_rate = 0;
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if channels.is_empty() {
                    channels = vec![Vec::new(); frame.channels.max(1)];
                    sample_rate = frame.sample_rate;
                }
                let width = channels.len();
                for (i, sample) in frame.data.iter().enumerate() {
                    channels[i % width].push(*sample as f32 / 32768.0);
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => return Err(SynthKitError::Decode(format!("mp3: {e:?}"))),
        }
    }
    if channels.is_empty() {
        return Err(SynthKitError::Decode("mp3 contained no audio frames".into()));
    }
    AudioBuffer::new(sample_rate as f64, channels)
}

pub fn decode_audio(bytes: &[u8]) -> Result<AudioBuffer, SynthKitError> {
    if bytes.starts_with(b"RIFF") { decode_wav(bytes) } else { decode_mp3(bytes) }
}

/// Fetch an audio file and decode it on the blocking pool.
pub async fn fetch_audio(url: &str) -> Result<AudioBuffer, SynthKitError> {
    log::debug!("fetching {url}");
    let bytes = reqwest::get(url).await?.error_for_status()?.bytes().await?;
    let buffer = tokio::task::spawn_blocking(move || decode_audio(&bytes))
        .await
        .map_err(|e| SynthKitError::Decode(format!("decoder task failed: {e}")))??;
    log::debug!("{url}: {} frames at {} Hz", buffer.len(), buffer.sample_rate());
    Ok(buffer)
}
