use d3dfx_shader::{PreshaderError, SymbolType};
use thiserror::Error;

/// Fatal problems found while reading an effect container.
///
/// Any of these aborts the whole parse; nothing partially built is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EffectError {
    #[error("not an effects file")]
    NotAnEffectsFile,
    #[error("unexpected EOF while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("object index {index} is out of range ({count} objects)")]
    BadObjectIndex { index: u32, count: usize },
    #[error("parameter {0:?} not found")]
    ParameterNotFound(String),
    #[error("bad reference: {0}")]
    BadReference(String),
    #[error("{table} object {index} has unexpected type {ty:?}")]
    UnexpectedObjectType {
        table: &'static str,
        index: u32,
        ty: SymbolType,
    },
    #[error("malformed effect value: {0}")]
    Malformed(String),
    #[error("invalid standalone preshader: {0}")]
    Preshader(#[from] PreshaderError),
}

impl EffectError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub(crate) fn bad_reference(message: impl Into<String>) -> Self {
        Self::BadReference(message.into())
    }
}

/// Misuse of the effect API: a handle or name that does not belong to the effect, or a pass
/// cursor operation out of order. None of these can happen for a well-formed effect driven in
/// begin/pass/end order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectApiError {
    #[error("no parameter named {0:?}")]
    UnknownParameter(String),
    #[error("parameter {index} is out of range ({count} parameters)")]
    ParameterOutOfRange { index: usize, count: usize },
    #[error("{len} bytes at offset {offset} overflow a {size}-byte value")]
    ValueOverflow {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("technique {index} is out of range ({count} techniques)")]
    TechniqueOutOfRange { index: usize, count: usize },
    #[error("effect has no current technique")]
    NoTechnique,
    #[error("pass {pass} is out of range ({count} passes)")]
    PassOutOfRange { pass: usize, count: usize },
    #[error("pass {0} is still active")]
    PassActive(usize),
    #[error("no pass is active")]
    NoActivePass,
    #[error("value holds {found}, not {expected}")]
    WrongValueKind {
        expected: &'static str,
        found: &'static str,
    },
}
