pub mod lipstick;
pub mod pipeline;
