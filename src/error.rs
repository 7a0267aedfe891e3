use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument ({0})")]
    InvalidArgument(String),

    #[error("Value out of range ({0})")]
    OutOfRange(String),

    #[error("Duplicate identifier '{0}'")]
    Duplicate(String),

    #[error("Enumeration mapping '{0}' overlaps an existing range")]
    Overlap(String),

    #[error("Attempted to modify a frozen schema object")]
    Frozen,

    #[error("Attempted to read or serialize an unset {0} field")]
    Unset(&'static str),

    #[error("Variant tag value {0} does not select any declared label")]
    InvalidTag(i64),

    #[error(
        "Encountered an IO error while writing the trace ({})",
        .0.kind()
    )]
    Io(#[from] io::Error),

    #[error("Parent object is no longer alive")]
    ParentGone,
}

impl Error {
    pub(crate) fn invalid_argument<S: AsRef<str>>(what: S) -> Self {
        Error::InvalidArgument(what.as_ref().to_owned())
    }

    pub(crate) fn out_of_range<S: AsRef<str>>(what: S) -> Self {
        Error::OutOfRange(what.as_ref().to_owned())
    }
}
