//! Error types for tiled coverage reads.

use thiserror::Error;

/// Errors that can occur while mapping, caching or rendering tiles.
#[derive(Error, Debug)]
pub enum CoverageError {
    /// A coordinate or index does not fit in 64-bit integers.
    #[error("integer overflow while computing {0}")]
    Overflow(&'static str),

    /// The caller supplied a malformed argument (e.g. `low > high`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request is well formed but does not intersect the available data.
    #[error("requested extent {requested} does not intersect available extent {available}")]
    Disjoint {
        requested: String,
        available: String,
    },

    /// The request shape is not supported (only 2-D slices can be rendered).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Geometry computation or the tile decoder failed during a render.
    #[error("cannot render coverage \"{coverage}\"")]
    RenderFailure {
        coverage: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CoverageError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a Disjoint error.
    pub fn disjoint(requested: impl Into<String>, available: impl Into<String>) -> Self {
        Self::Disjoint {
            requested: requested.into(),
            available: available.into(),
        }
    }

    /// Create an Unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Wrap a failure into a RenderFailure for the given coverage.
    pub fn render_failure(coverage: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::RenderFailure {
            coverage: coverage.into(),
            source: source.into(),
        }
    }

    /// Whether this error only reports an empty intersection.
    pub fn is_disjoint(&self) -> bool {
        matches!(self, Self::Disjoint { .. })
    }
}

/// Result type for coverage operations.
pub type Result<T> = std::result::Result<T, CoverageError>;
