//! SwapSettle Common Types
//!
//! Shared types for the SwapSettle exchange core: identifiers, assets and
//! pairs, fixed-point amounts, exchange orders and the error type.

pub mod amount;
pub mod asset;
pub mod error;
pub mod identifiers;
pub mod order;
pub mod time;

pub use amount::*;
pub use asset::*;
pub use error::*;
pub use identifiers::*;
pub use order::*;
pub use time::*;
