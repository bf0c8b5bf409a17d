//! # Core Module
//!
//! Geometry of periodic simulation cells. Every consumer that measures a
//! distance between particles, wraps a position back into the box, or sums
//! over periodic images goes through the types defined here.
//!
//! ## Overview
//!
//! A [`boundary::Boundary`] owns one cell and exposes two hot-path
//! primitives:
//!
//! - **`nearest_image`** - reduces a displacement to the displacement between
//!   the nearest periodic images of its two endpoints (minimum-image
//!   convention)
//! - **`central_image`** - returns the translation that brings a position
//!   into the canonical copy of the primary cell
//!
//! ## Key Components
//!
//! - [`boundary`] - The `Boundary` type, its `Cell` variants and state snapshots
//! - [`rectangular`] - Orthogonal cells with per-axis periodicity
//! - [`deformable`] - Triclinic cells with the transform-vector reduction
//! - [`events`] - Change notifications for shape and size mutations
//! - [`linalg`] - Thin fixed-dimension helpers on top of `nalgebra`
//! - [`error`] - Errors raised by mutating operations
//!
//! ## Usage
//!
//! ```ignore
//! use cellwrap::core::boundary::Boundary3;
//! use nalgebra::Vector3;
//!
//! let boundary = Boundary3::deformable([
//!     Vector3::new(10.0, 0.0, 0.0),
//!     Vector3::new(3.0, 9.0, 0.0),
//!     Vector3::new(0.0, 0.0, 10.0),
//! ])?;
//! let mut dr = Vector3::new(8.0, 1.0, 0.0);
//! boundary.nearest_image(&mut dr);
//! ```

pub mod boundary;
pub mod deformable;
pub mod error;
pub mod events;
pub mod linalg;
pub mod rectangular;
