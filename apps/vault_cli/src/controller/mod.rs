//! Controller layer: terminal events, notification rendering, and command orchestration.

pub mod events;
pub mod orchestration;
