pub mod config;
pub mod error;
pub mod helper;
pub mod modules;
pub mod pipeline;
pub mod utils;

pub use error::LipstickError;
pub use modules::lipstick_renderer::{apply_lipstick, LipstickRenderer};
pub use modules::texture::Texture;
pub use pipeline::lipstick::LipstickSpec;
pub use pipeline::pipeline::LipstickPipeline;
