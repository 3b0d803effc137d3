//! Protocol adapters.
//!
//! One module per database generation, each providing a source and a target
//! struct that satisfy the [`crate::backend`] capability traits. The engine
//! never depends on anything below this module's public surface.

pub mod influx1;
pub mod influx2;
pub mod influx3;
pub mod lineproto;

pub use influx1::{Influx1Config, Influx1Source, Influx1Target};
pub use influx2::{Influx2Config, Influx2Source, Influx2Target};
pub use influx3::{Influx3Source, Influx3Target};
