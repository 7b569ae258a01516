use thiserror::Error;

#[derive(Error, Debug)]
pub enum RingcapError {
    #[error("truncated block: need {needed} bytes but only {available} available")]
    TruncatedBlock { needed: usize, available: usize },
    #[error("unknown byte-order magic: {magic:#010x}")]
    UnknownMagic { magic: u32 },
    #[error("corrupt capture stream: {e}")]
    StreamCorrupt { e: String },
    #[error("write output file {path} error: {e}")]
    OutputWrite { path: String, e: std::io::Error },
    #[error("unable to open output file {path}: {e}")]
    RotationFailure { path: String, e: std::io::Error },
    #[error("no capture source given")]
    NoSources,
    #[error("invalid condition: {c}")]
    InvalidCondition { c: String },
    #[error("unable to open source {s}: {e}")]
    UnableOpenSource { s: String, e: std::io::Error },
    #[error("unhandled channel type")]
    UnhandledChannelType,
    #[error("unable to create channel: {e}")]
    UnableCreateChannel { e: String },
    #[error("unable to found interface: {i}")]
    UnableFoundInterface { i: String },
    #[error("capture writer thread panicked")]
    WriterPanicked,
    #[error("get system info error")]
    GetSystemInfoError,
    #[error("io error")]
    IOError(#[from] std::io::Error),
    #[error("bincode read file error")]
    BincodeReadError(#[from] bincode::error::DecodeError),
    #[error("bincode write file error")]
    BincodeWriteError(#[from] bincode::error::EncodeError),
    #[error("get system time error")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

impl RingcapError {
    pub(crate) fn corrupt(e: impl ToString) -> Self {
        RingcapError::StreamCorrupt { e: e.to_string() }
    }
}
