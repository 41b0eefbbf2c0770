pub mod color;
pub mod contrast;
pub mod face_detector;
pub mod landmark_provider;
pub mod lip_mask;
pub mod lipstick_renderer;
pub mod texture;
