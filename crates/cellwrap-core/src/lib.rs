//! # cellwrap
//!
//! Periodic boundary conditions for particle simulations: minimum-image
//! displacements and central-image wrapping for rectangular and arbitrarily
//! skewed (triclinic) cells in two and three dimensions.
//!
//! ## Layout
//!
//! - **[`core`]: The Geometry.** Cell shapes, the `Boundary` type that
//!   consumers hold per simulation cell, its change notifications and
//!   errors. Reads are allocation free and safe to share across threads;
//!   mutations are validated and atomic.
//!
//! - **[`config`]: The Description.** A serde-backed, TOML-loadable
//!   description of a boundary, for building cells from input files.
//!
//! ## Features
//!
//! - `parallel` - evaluates `Boundary::nearest_images` batches with rayon.

pub mod config;
pub mod core;
