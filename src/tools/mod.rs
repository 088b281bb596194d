//! Example toolkits served by the bundled tool servers.
//!
//! - Math: integer `add`/`multiply` and expression `evaluate`
//! - Weather: a fixed forecast for any location

pub mod math;
pub mod weather;

pub use math::{evaluate, math_toolkit, EvalError};
pub use weather::{weather_toolkit, FORECAST};
