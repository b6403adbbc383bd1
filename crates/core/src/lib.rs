//! tilesync core - fundamental types shared by every crate

mod error;
mod types;
mod coord;

pub use error::*;
pub use types::*;
pub use coord::*;
