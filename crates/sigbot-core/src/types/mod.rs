//! Core data types: signals, order plans, exchange-facing structs, tracked
//! positions and pipeline events.

pub mod enums;
pub mod event;
pub mod plan;
pub mod position;
pub mod signal;
pub mod symbol;
pub mod trading;

pub use enums::*;
pub use event::*;
pub use plan::*;
pub use position::*;
pub use signal::*;
pub use symbol::*;
pub use trading::*;
