use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An I/O failure on the input or output file.
    #[error("input/output failure: {0}")]
    Io(#[from] std::io::Error),

    /// A cross reference problem.
    #[error("malformed cross reference table: {0}")]
    Xref(#[from] XrefError),

    /// A byte offset pointed outside the file or outside a fetched window.
    #[error("invalid file offset: {0}")]
    Offset(u64),

    /// The grammar could not parse where it expected to.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A typed accessor was used on a value of a different type.
    #[error("unexpected object type; expected {expected}, found {found}")]
    ObjectType {
        expected: &'static str,
        found: &'static str,
    },

    /// A dictionary lookup failed.
    #[error("missing dictionary key {0}")]
    DictKey(String),

    /// The object id is free or beyond the cross reference table.
    #[error("object {0} not found")]
    ObjectNotFound(u32),

    /// A filter was registered for an object the parser already wrote.
    #[error("object {0} has already been written to the output")]
    ObjectAlreadyWritten(u32),

    /// A stream declares a filter the crate cannot apply.
    #[error("unsupported stream filter {0}")]
    UnsupportedFilter(String),

    /// Stream content did not decode through its declared filter chain.
    #[error("stream decode failure: {0}")]
    Decode(String),

    /// An object inside an encrypted document was asked to decode.
    #[error("cannot decode streams in an encrypted document")]
    Encrypted,

    /// A task reported failure, aborting the pipe.
    #[error("a task aborted the pipe")]
    TaskFailed,
}

#[derive(Debug, Error)]
pub enum XrefError {
    #[error("could not parse a cross reference entry")]
    Parse,
    #[error("the startxref marker was not found")]
    Start,
    #[error("an invalid Prev offset was encountered")]
    PrevStart,
    #[error("an invalid XRefStm offset was encountered")]
    StreamStart,
}

pub type Result<T> = std::result::Result<T, Error>;
