// THEORY:
// This file is the main entry point for the `sprout_vision` library crate.
//
// The public face of the engine is `PlantPipeline` and its result type: one call per
// frame segments the scene into individual plants, classifies each one as a sprout
// or a grown plant, measures shape, skeleton topology, vegetation indices and
// disease markers, and compares the scene against a rolling baseline. The algorithms
// live in `core_modules`; results leave the engine through `telemetry` over the
// publish-only `transport`, and through the file-based AI `handoff`.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod handoff;
pub mod pipeline;
pub mod telemetry;
pub mod transport;

pub use config::VisionConfig;
pub use error::{TransportError, VisionError};
pub use pipeline::{PlantAnalysisResult, PlantPipeline};
