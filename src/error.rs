//! Typed errors for session path parsing.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("path {0:?} has fewer than four components (subject/meet/state/file)")]
    TooShallow(PathBuf),

    #[error("path {0:?} is not valid UTF-8")]
    NonUtf8(PathBuf),

    #[error("malformed subject folder {0:?}: expected a numeric subject id")]
    Subject(String),

    #[error("malformed meeting folder {0:?}: expected `meet <N>`")]
    Meeting(String),

    #[error("unknown state folder {0:?}: expected baseline, therapy or recovery")]
    State(String),
}
