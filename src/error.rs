use thiserror::Error;

use crate::host::HostError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("unterminated tree block")]
    UnterminatedTree,
    #[error("`tree.end` without an open tree block")]
    UnbalancedTree,
    #[error("`{0}` without a matching `sif`")]
    UnbalancedConditional(&'static str),
    #[error("unterminated conditional block")]
    UnterminatedConditional,
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("malformed numeric literal `{0}`")]
    BadNumber(String),
    #[error("unknown data width `{0}`")]
    BadWidth(String),
    #[error("malformed `{keyword}` declaration: {reason}")]
    BadDeclaration {
        keyword: &'static str,
        reason: &'static str,
    },
}

/// Syntactic failure, fatal for the whole import.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

/// Structural failure while building the semantic model, fatal for the
/// whole import.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("`{0}` declaration outside of any tree block")]
    OutsideTree(&'static str),
    #[error("`{0}` with no preceding register declaration")]
    DanglingAnnotation(&'static str),
    #[error(
        "register `{name}`: span of {span:#x} bytes is not a multiple of \
         its {width}-bit width"
    )]
    MisalignedArray { name: String, span: u64, width: u32 },
    #[error("peripheral `{0}` declares relative registers but no base address")]
    NoBase(String),
}

/// Failure scoped to a single peripheral. The orchestrator records it
/// and keeps going with the rest of the file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeripheralError {
    #[error("registers `{first}` and `{second}` overlap")]
    Overlap { first: String, second: String },
    #[error("duplicate register name `{0}`")]
    DuplicateRegister(String),
    #[error("register `{register}` at {address:#x} lies below the base address {base:#x}")]
    RegisterBelowBase {
        register: String,
        address: u64,
        base: u64,
    },
    #[error("register `{register}`: bitfields `{first}` and `{second}` overlap")]
    BitfieldOverlap {
        register: String,
        first: String,
        second: String,
    },
    #[error("register `{register}`: bitfield `{field}` exceeds the {width}-bit width")]
    BitfieldRange {
        register: String,
        field: String,
        width: u32,
    },
    #[error("base address {base:#x} is not aligned to {granule:#x}")]
    UnalignedBase { base: u64, granule: u64 },
    #[error("name already declared at {existing:#x}")]
    DuplicateName { existing: u64 },
    #[error(
        "segment at {found_base:#x}..{found_end:#x} conflicts with the \
         expected {base:#x}..{end:#x}"
    )]
    MappingConflict {
        base: u64,
        end: u64,
        found_base: u64,
        found_end: u64,
    },
    #[error(transparent)]
    Host(#[from] HostError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Model(#[from] ModelError),
}
