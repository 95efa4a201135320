// crates/framecut-engine/src/error.rs
//
// Engine error taxonomy. Every variant maps to one recovery policy:
//
//   transient decode   → reset the decoder, keep going (recoverable)
//   invariant breach   → abort the current operation, state stays coherent
//   resource pressure  → evict, then fail the op recoverably if still short
//   protocol misuse    → ignore the command, emit a Warning event
//   fatal config       → Error{recoverable:false}, engine drops to Idle

use thiserror::Error;

use framecut_core::model::ModelError;
use framecut_core::sample::SampleTableError;

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("model: {0}")]
    Model(#[from] ModelError),

    #[error("sample table: {0}")]
    SampleTable(#[from] SampleTableError),

    #[error("source not loaded: {0}")]
    SourceNotLoaded(uuid::Uuid),

    #[error("no sync sample reachable for seek target")]
    NoReachableKeyframe,

    #[error("sprite cache budget exhausted ({needed} bytes needed, {budget} budget)")]
    CacheBudgetExhausted { needed: usize, budget: usize },

    #[error("export cancelled")]
    Cancelled,

    #[error("{0}")]
    Snapshot(String),
}

impl EngineError {
    /// Whether the engine keeps running after surfacing this error.
    ///
    /// This is the decision table behind `Error{recoverable}` events:
    /// configuration and unknown-codec failures kill the operation for good,
    /// everything else resets and continues.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Codec(c) => c.is_recoverable(),
            EngineError::Model(_)
            | EngineError::SampleTable(_)
            | EngineError::SourceNotLoaded(_)
            | EngineError::NoReachableKeyframe
            | EngineError::CacheBudgetExhausted { .. }
            | EngineError::Cancelled
            | EngineError::Snapshot(_) => true,
        }
    }
}
