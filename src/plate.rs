//! EMT 140 plate reverb impulse responses.

use std::rc::Rc;

use crate::error::SynthKitError;
use crate::host::Context;
use crate::node::Node;
use crate::node::buffer::{AudioBuffer, Sample};
use crate::node::effects::convolver;

pub const EMT140_URL: &str = "https://danigb.github.io/sampled/IR/EMT140-Plate/samples/";

pub const EMT140_DEFAULT: &str = "Emt 140 Medium 2";

pub const EMT140_NAMES: [&str; 15] = [
    "Emt 140 Bright 1",
    "Emt 140 Bright 2",
    "Emt 140 Bright 3",
    "Emt 140 Bright 4",
    "Emt 140 Bright 5",
    "Emt 140 Dark 1",
    "Emt 140 Dark 2",
    "Emt 140 Dark 3",
    "Emt 140 Dark 4",
    "Emt 140 Dark 5",
    "Emt 140 Medium 1",
    "Emt 140 Medium 2",
    "Emt 140 Medium 3",
    "Emt 140 Medium 4",
    "Emt 140 Medium 5",
];

/// Location of a plate impulse: lowercase, whitespace runs become `_`.
pub fn emt140_url(name: Option<&str>) -> String {
    let name = name.unwrap_or(EMT140_DEFAULT).to_lowercase();
    let file = name.split_whitespace().collect::<Vec<_>>().join("_");
    format!("{EMT140_URL}{file}.wav")
}

/// A convolver waiting on a plate impulse. It passes no sound until the
/// impulse is loaded.
#[derive(Debug, Clone)]
pub struct Emt140 {
    node: Node,
    sample: Sample,
    url: String,
}

pub fn emt140(ctx: &Context, name: Option<&str>) -> Result<Emt140, SynthKitError> {
    Ok(Emt140 { node: convolver(ctx, None, true)?, sample: Sample::new(), url: emt140_url(name) })
}

impl Emt140 {
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_ready(&self) -> bool {
        self.sample.is_ready()
    }

    /// Hand the convolver an impulse that was fetched some other way.
    pub fn fill(&self, impulse: AudioBuffer) -> Result<(), SynthKitError> {
        self.sample.fill(impulse);
        self.attach()
    }

    /// Fetch the impulse and hand it to the convolver.
    pub async fn load(&self) -> Result<&Node, SynthKitError> {
        self.sample.load(&self.url).await?;
        self.attach()?;
        log::info!("reverb ready: {}", self.url);
        Ok(&self.node)
    }

    fn attach(&self) -> Result<(), SynthKitError> {
        let impulse: Option<Rc<AudioBuffer>> = self.sample.get();
        match impulse {
            Some(impulse) => self.node.set_buffer(impulse),
            None => Err(SynthKitError::Config(format!("{} is not loaded", self.url))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::offline;

    #[test]
    fn impulse_urls() {
        assert_eq!(
            emt140_url(None),
            "https://danigb.github.io/sampled/IR/EMT140-Plate/samples/emt_140_medium_2.wav"
        );
        assert_eq!(
            emt140_url(Some("Emt 140  Dark 3")),
            "https://danigb.github.io/sampled/IR/EMT140-Plate/samples/emt_140_dark_3.wav"
        );
        assert!(EMT140_NAMES.contains(&EMT140_DEFAULT));
    }

    #[test]
    fn silent_until_the_impulse_arrives() {
        let (ctx, engine) = offline();
        let reverb = emt140(&ctx, Some("Emt 140 Bright 1")).unwrap();
        let host = reverb.node().output_host();
        assert!(!reverb.is_ready());
        assert!(!engine.has_buffer(host));

        reverb.fill(AudioBuffer::mono(44100.0, vec![1.0, 0.5, 0.25])).unwrap();
        assert!(reverb.is_ready());
        assert!(engine.has_buffer(host));
        assert!(reverb.url().ends_with("emt_140_bright_1.wav"));
    }
}
