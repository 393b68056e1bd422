use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The kernel object targeted by an add already exists. Callers on add
    /// paths treat this as success.
    #[error("object exists")]
    ObjectExists,

    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("entry {entry} is not valid for set {set}")]
    InvalidEntry { set: String, entry: String },

    #[error("interface {0} not found")]
    MissingInterface(String),

    #[error("failed to parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
