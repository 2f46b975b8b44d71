//! Engine error type.
//!
//! Nothing in the per-frame path returns these to the host as a hard failure:
//! resource errors degrade to "no geometry", context misuse is logged and
//! ignored. The variants exist so callers that *want* to react (e.g. a mesh
//! attach that failed) can.

use thiserror::Error;

use crate::resources::{AssetId, AssetKind};

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The identifier has no backing data.
    #[error("{kind} '{id}' not found")]
    ResourceNotFound { kind: AssetKind, id: AssetId },
    /// Data was present but could not be parsed or constructed.
    #[error("{kind} '{id}' is malformed: {reason}")]
    ResourceMalformed {
        kind: AssetKind,
        id: AssetId,
        reason: String,
    },
    /// Renderer used before initialization, or a required dependency is gone.
    #[error("context precondition violated: {0}")]
    ContextPrecondition(String),
    /// Batching bookkeeping would have been corrupted.
    #[error("batch invariant violated: {0}")]
    BatchInvariant(String),
    #[error("unknown scene object {0}")]
    UnknownObject(u64),
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn malformed(kind: AssetKind, id: &AssetId, err: anyhow::Error) -> Self {
        EngineError::ResourceMalformed {
            kind,
            id: id.clone(),
            reason: format!("{err:#}"),
        }
    }

    /// Resource errors are recoverable: the object simply renders without it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::ResourceNotFound { .. } | EngineError::ResourceMalformed { .. }
        )
    }
}
