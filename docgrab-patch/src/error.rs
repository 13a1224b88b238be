use std::path::PathBuf;

use thiserror::Error;

/// Errors that can be returned by docgrab-patch operations.
#[derive(Debug, Error)]
pub enum PatchError {
    /// A file under the extractor root could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The browser source file has no `async launch()` method to replace.
    #[error("no `async launch()` routine found in {path}")]
    LaunchNotFound { path: PathBuf },

    /// The browser host would not be a safe JavaScript string literal.
    #[error("invalid browser host {0:?}: expected letters, digits, '.', '-' or '_'")]
    InvalidHost(String),
}

impl PatchError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| PatchError::Io { path, source }
    }
}
