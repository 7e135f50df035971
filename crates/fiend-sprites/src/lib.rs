//! Sprite-backed widget state.
//!
//! Provides:
//! - `SpriteLibrary`: a `TargetController` over a `bases/` + `faces/` sprite directory
//! - `spawn_rotation`: periodic random image changes

pub mod library;
pub mod rotation;

pub use library::SpriteLibrary;
pub use rotation::spawn_rotation;
