mod hold;

pub use hold::{GesturePhase, HoldGesture};
