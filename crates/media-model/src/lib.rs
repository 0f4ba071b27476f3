//! Veneer Media Model
//!
//! Defines the data contracts shared by every pipeline stage:
//! - **Descriptor:** the immutable description of the source video track
//! - **Geometry:** the macroblock-aligned output size and the overlay
//!   cover-crop rule
//! - **Overlay:** the straight-alpha RGBA image composited on every frame
//! - **Tracks:** track bindings and compressed samples handed to the muxer
//!
//! Timestamps are microseconds throughout.

pub mod descriptor;
pub mod geometry;
pub mod overlay;
pub mod settings;
pub mod track;

pub use descriptor::*;
pub use geometry::*;
pub use overlay::*;
pub use settings::*;
pub use track::*;
