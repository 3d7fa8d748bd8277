use std::path::PathBuf;

use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum EsErrorKind {
    #[error("cannot open {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },
    #[error("write to {path} failed: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
    #[error("record could not be serialised: {0}")]
    Serialize(String),
    #[error("log writer is gone")]
    WriterGone,
}

#[derive(Clone, Debug, Error)]
#[error(transparent)]
pub struct EsError(pub EsErrorKind);

impl EsError {
    pub fn new(kind: EsErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &EsErrorKind {
        &self.0
    }

    pub(crate) fn open(path: &std::path::Path, err: std::io::Error) -> Self {
        Self(EsErrorKind::OpenFailed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    pub(crate) fn write(path: &std::path::Path, err: std::io::Error) -> Self {
        Self(EsErrorKind::WriteFailed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }
}

impl From<EsErrorKind> for EsError {
    fn from(kind: EsErrorKind) -> Self {
        EsError(kind)
    }
}

impl From<serde_json::Error> for EsError {
    fn from(err: serde_json::Error) -> Self {
        EsError(EsErrorKind::Serialize(err.to_string()))
    }
}
