use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level error categories surfaced by the page adapter.
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
pub enum PortErrorKind {
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("script evaluation failed")]
    EvalFailed,
    #[error("no attached page session")]
    NoSession,
    #[error("command timed out")]
    Timeout,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to the core loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortError {
    pub kind: PortErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for PortError {}

impl PortError {
    pub fn new(kind: PortErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }
}
