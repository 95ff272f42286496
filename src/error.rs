use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the whole crate.
///
/// `Feed` errors are fatal to the session. `Frame` errors are logged by the
/// feed reader and the stream continues. `Net` errors are surfaced inline and
/// retried only by the user. `Data` errors mean a feature is unavailable
/// (missing reference profile, unreadable routine file).
#[derive(Error, Debug)]
pub enum TaisoError {
    #[error("detector feed unavailable: {0}")]
    Feed(#[from] std::io::Error),

    #[error("malformed landmark frame: {0}")]
    Frame(String),

    #[error("network error: {0}")]
    Net(#[from] reqwest::Error),

    #[error("control channel error: {0}")]
    Control(#[from] tungstenite::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("unexpected scoring response: status {status}")]
    ScoreResponse { status: u16 },

    #[error("reference profile missing exercise {0}")]
    MissingReference(String),

    #[error("not enough frames to score (have {have}, need {need})")]
    TooFewFrames { have: usize, need: usize },

    #[error("bad data file {path}: {reason}")]
    DataFile { path: PathBuf, reason: String },

    #[error("history database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, TaisoError>;
