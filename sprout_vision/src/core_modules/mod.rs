pub mod change_detector;
pub mod classifier;
pub mod color_health;
pub mod geometry;
pub mod instance;
pub mod mask;
pub mod morphology;
pub mod pixel;
pub mod segmenter;
pub mod watershed;
