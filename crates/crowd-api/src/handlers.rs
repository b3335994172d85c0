//! Request handlers.

pub mod detect;
pub mod health;
pub mod video;

pub use detect::*;
pub use health::*;
pub use video::*;
