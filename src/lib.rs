pub mod error;
pub mod graph;
pub mod host;
pub mod instrument;
#[cfg(feature = "catalog")]
pub mod load;
pub mod node;
#[cfg(feature = "catalog")]
pub mod plate;
#[cfg(feature = "catalog")]
pub mod soundfont;
pub mod synth;
pub mod time;
pub mod units;

pub use error::SynthKitError;
pub use host::{Context, Engine};
pub use instrument::{Instrument, Play};
pub use node::Node;

use crate::node::contour::Contour;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the synth_kit version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Total duration in seconds of a JSON contour such as
/// `[["set", 0, 0], ["linear", 1, 0.1]]`.
pub fn contour_seconds(json: &str) -> Result<f64, SynthKitError> {
    let contour: Contour = serde_json::from_str(json)
        .map_err(|e| SynthKitError::Config(format!("contour: {e}")))?;
    Ok(contour.total_duration())
}

/// WASM-exposed: validate a JSON contour and return its duration.
#[wasm_bindgen]
pub fn contour_duration(json: &str) -> Result<f64, JsValue> {
    contour_seconds(json).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: parse a JSON graph description into its normalised form.
/// Syntax errors come back as a rendered diagnostic pointing into `json`.
#[wasm_bindgen]
pub fn parse_graph(json: &str) -> Result<JsValue, JsValue> {
    let graph = graph::parse(json).map_err(|e| match &e {
        SynthKitError::Graph(err) => JsValue::from_str(&graph::report(json, err)),
        _ => JsValue::from_str(&format!("{e}")),
    })?;
    serde_wasm_bindgen::to_value(&graph).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: frequency of a note name at A4 = 440 Hz.
#[wasm_bindgen]
pub fn note_frequency(note: &str) -> Option<f64> {
    units::note_to_frequency(note)
}
