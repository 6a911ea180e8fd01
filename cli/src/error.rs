//! CLI-facing error type: wraps runtime/config/IO failures behind one enum
//! so `main` has a single place to format and set the exit code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Runtime(#[from] shuttle::ShuttleError),
    #[error("config error: {0}")]
    Config(#[from] config::LoadError),
    #[error("reading {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path} as JSON: {source}")]
    ParseJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
