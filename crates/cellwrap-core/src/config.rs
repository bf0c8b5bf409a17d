//! # Boundary Configuration
//!
//! Declarative description of a simulation-cell boundary, loadable from TOML
//! or assembled with [`BoundaryConfigBuilder`], and turned into a live
//! boundary with [`Boundary::from_config`](crate::core::boundary::Boundary::from_config).
//!
//! ```toml
//! kind = "deformable"
//! dimension = 3
//! edges = [[10.0, 0.0, 0.0], [3.0, 9.0, 0.0], [0.0, 0.0, 10.0]]
//! truncation_radius = 4.0
//!
//! [tolerances]
//! half_tol = 0.50000000001
//! ```

use crate::core::boundary::BoundaryKind;
use crate::core::deformable::Tolerances;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Configuration describes a {found}D boundary, expected {expected}D")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundaryConfig {
    pub kind: BoundaryKind,
    pub dimension: usize,
    /// Axis lengths, for rectangular kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_size: Option<Vec<f64>>,
    /// One entry per edge vector, for the deformable kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<Vec<f64>>>,
    /// Non-periodic axis of a slit, or the periodic axis of a pore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerances: Option<Tolerances>,
}

impl BoundaryConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<inline>")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    fn parse(content: &str, path: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Toml {
            path: path.to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::InvalidValue {
            field: "config",
            reason: e.to_string(),
        })
    }

    /// Checks that the fields required by `kind` are present and sized for
    /// `dimension`. Geometric validity (positive sizes, non-degenerate edges)
    /// is checked when the boundary is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dim = self.dimension;
        if !(2..=3).contains(&dim) {
            return Err(ConfigError::InvalidValue {
                field: "dimension",
                reason: format!("{dim} is not 2 or 3"),
            });
        }

        match self.kind {
            BoundaryKind::Deformable => {
                let edges = self
                    .edges
                    .as_ref()
                    .ok_or(ConfigError::MissingParameter("edges"))?;
                if edges.len() != dim || edges.iter().any(|e| e.len() != dim) {
                    return Err(ConfigError::InvalidValue {
                        field: "edges",
                        reason: format!("expected {dim} edge vectors of length {dim}"),
                    });
                }
                if self.box_size.is_some() {
                    return Err(ConfigError::InvalidValue {
                        field: "box_size",
                        reason: "deformable boundaries are described by their edges".to_string(),
                    });
                }
            }
            kind => {
                let size = self
                    .box_size
                    .as_ref()
                    .ok_or(ConfigError::MissingParameter("box_size"))?;
                if size.len() != dim {
                    return Err(ConfigError::InvalidValue {
                        field: "box_size",
                        reason: format!("expected {dim} components, found {}", size.len()),
                    });
                }
                if self.edges.is_some() {
                    return Err(ConfigError::InvalidValue {
                        field: "edges",
                        reason: format!("{kind} boundaries are described by box_size"),
                    });
                }
                if self.truncation_radius.is_some() || self.tolerances.is_some() {
                    return Err(ConfigError::InvalidValue {
                        field: "truncation_radius",
                        reason: "truncation and tolerances only apply to deformable boundaries"
                            .to_string(),
                    });
                }
            }
        }

        match (self.kind, self.axis) {
            (BoundaryKind::Slit | BoundaryKind::Pore, None) => {
                Err(ConfigError::MissingParameter("axis"))
            }
            (BoundaryKind::Slit | BoundaryKind::Pore, Some(axis)) if axis >= dim => {
                Err(ConfigError::InvalidValue {
                    field: "axis",
                    reason: format!("axis {axis} out of range for a {dim}D boundary"),
                })
            }
            (BoundaryKind::Slit | BoundaryKind::Pore, Some(_)) | (_, None) => Ok(()),
            (kind, Some(_)) => Err(ConfigError::InvalidValue {
                field: "axis",
                reason: format!("{kind} boundaries do not take an axis"),
            }),
        }
    }
}

#[derive(Default)]
pub struct BoundaryConfigBuilder {
    kind: Option<BoundaryKind>,
    dimension: Option<usize>,
    box_size: Option<Vec<f64>>,
    edges: Option<Vec<Vec<f64>>>,
    axis: Option<usize>,
    truncation_radius: Option<f64>,
    tolerances: Option<Tolerances>,
}

impl BoundaryConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: BoundaryKind) -> Self {
        self.kind = Some(kind);
        self
    }
    pub fn dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }
    pub fn box_size(mut self, size: Vec<f64>) -> Self {
        self.box_size = Some(size);
        self
    }
    pub fn edges(mut self, edges: Vec<Vec<f64>>) -> Self {
        self.edges = Some(edges);
        self
    }
    pub fn axis(mut self, axis: usize) -> Self {
        self.axis = Some(axis);
        self
    }
    pub fn truncation_radius(mut self, radius: f64) -> Self {
        self.truncation_radius = Some(radius);
        self
    }
    pub fn tolerances(mut self, tolerances: Tolerances) -> Self {
        self.tolerances = Some(tolerances);
        self
    }

    pub fn build(self) -> Result<BoundaryConfig, ConfigError> {
        let config = BoundaryConfig {
            kind: self.kind.ok_or(ConfigError::MissingParameter("kind"))?,
            dimension: self
                .dimension
                .ok_or(ConfigError::MissingParameter("dimension"))?,
            box_size: self.box_size,
            edges: self.edges,
            axis: self.axis,
            truncation_radius: self.truncation_radius,
            tolerances: self.tolerances,
        };
        config.validate()?;
        Ok(config)
    }
}
