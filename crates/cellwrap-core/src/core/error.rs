use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("Unsupported dimension {0}: only 2D and 3D cells are supported")]
    UnsupportedDimension(usize),

    #[error("Box size must be positive along every axis, got {value} on axis {axis}")]
    NonPositiveSize { axis: usize, value: f64 },

    #[error("Degenerate cell: edge vectors span a volume of {volume:e}")]
    DegenerateCell { volume: f64 },

    #[error("Non-finite value supplied for {0}")]
    NonFinite(&'static str),

    #[error("Index {index} is out of range for a {dimension}D cell")]
    IndexOutOfRange { index: usize, dimension: usize },

    #[error("Operation '{0}' requires a deformable cell")]
    NotDeformable(&'static str),

    #[error("Invalid truncation radius {0}: must be positive (or infinite to disable)")]
    InvalidTruncationRadius(f64),

    #[error("Invalid tolerance '{name}' = {value}")]
    InvalidTolerance { name: &'static str, value: f64 },

    #[error("Invalid boundary state: {0}")]
    InvalidState(String),

    #[error("Boundary configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },
}
