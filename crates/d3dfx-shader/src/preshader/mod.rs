//! Preshaders: host-side constant expressions that D3DX hoists out of shaders.
//!
//! A preshader is stored either in a `PRES` comment block of a shader (computing derived
//! constants for that shader) or as a standalone effect object (computing a selector index into an
//! array of shaders). Both forms share one token stream:
//!
//! ```text
//! 0x4658_02xx                      version ('FX')
//! comment { 'CTAB' ... }           input symbols
//! comment { 'CLIT' count f64... }  literal pool
//! comment { 'FXLC' count insts }   instructions
//! comment { 'PRSI' ... }           output register map (optional)
//! 0x0000_FFFF                      end (optional)
//! ```

mod parse;
mod run;

use thiserror::Error;

use crate::ctab::CtabError;
use crate::types::Symbol;

#[doc(hidden)]
pub use parse::builder;
pub use parse::{parse_preshader, PRESHADER_FOURCC};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreshaderError {
    #[error("unsupported preshader version 0x{0:08x}")]
    UnsupportedVersion(u32),
    #[error("bogus preshader data: {0}")]
    Malformed(String),
    #[error("multiple {0} preshader blocks")]
    DuplicateBlock(&'static str),
    #[error("no {0} block in preshader")]
    MissingBlock(&'static str),
    #[error("unknown preshader opcode 0x{0:04x}")]
    UnknownOpcode(u32),
    #[error("preshader opcode {opcode:?} takes {expected} sources, found {found}")]
    BadArity {
        opcode: PreshaderOpcode,
        expected: usize,
        found: usize,
    },
    #[error("invalid preshader CTAB: {0}")]
    Ctab(#[from] CtabError),
    #[error("preshader opcode {0:?} is not handled")]
    UnhandledOpcode(PreshaderOpcode),
    #[error("preshader {file} register {index} is out of range")]
    RegisterOutOfRange { file: &'static str, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PreshaderOpcode {
    Nop,
    Mov,
    Neg,
    Rcp,
    Frc,
    Exp,
    Log,
    Rsq,
    Sin,
    Cos,
    Asin,
    Acos,
    Atan,
    Min,
    Max,
    Lt,
    Ge,
    Add,
    Mul,
    Atan2,
    Div,
    Cmp,
    Movc,
    Dot,
    Noise,
    MinScalar,
    MaxScalar,
    LtScalar,
    GeScalar,
    AddScalar,
    MulScalar,
    Atan2Scalar,
    DivScalar,
    DotScalar,
    NoiseScalar,
}

impl PreshaderOpcode {
    /// First opcode of the range whose operand 0 is a scalar broadcast to every lane.
    pub const SCALAR_OPS: PreshaderOpcode = PreshaderOpcode::MinScalar;

    /// Decodes the high half of an `FXLC` opcode token.
    pub fn from_fxlc(raw: u32) -> Option<Self> {
        Some(match raw {
            0x1000 => Self::Mov,
            0x1010 => Self::Neg,
            0x1030 => Self::Rcp,
            0x1040 => Self::Frc,
            0x1050 => Self::Exp,
            0x1060 => Self::Log,
            0x1070 => Self::Rsq,
            0x1080 => Self::Sin,
            0x1090 => Self::Cos,
            0x10A0 => Self::Asin,
            0x10B0 => Self::Acos,
            0x10C0 => Self::Atan,
            0x2000 => Self::Min,
            0x2010 => Self::Max,
            0x2020 => Self::Lt,
            0x2030 => Self::Ge,
            0x2040 => Self::Add,
            0x2050 => Self::Mul,
            0x2060 => Self::Atan2,
            0x2080 => Self::Div,
            0x3000 => Self::Cmp,
            0x3010 => Self::Movc,
            0x5000 => Self::Dot,
            0x5020 => Self::Noise,
            0xA000 => Self::MinScalar,
            0xA010 => Self::MaxScalar,
            0xA020 => Self::LtScalar,
            0xA030 => Self::GeScalar,
            0xA040 => Self::AddScalar,
            0xA050 => Self::MulScalar,
            0xA060 => Self::Atan2Scalar,
            0xA080 => Self::DivScalar,
            0xD000 => Self::DotScalar,
            0xD020 => Self::NoiseScalar,
            _ => return None,
        })
    }

    pub fn fxlc(self) -> u32 {
        match self {
            Self::Nop => 0,
            Self::Mov => 0x1000,
            Self::Neg => 0x1010,
            Self::Rcp => 0x1030,
            Self::Frc => 0x1040,
            Self::Exp => 0x1050,
            Self::Log => 0x1060,
            Self::Rsq => 0x1070,
            Self::Sin => 0x1080,
            Self::Cos => 0x1090,
            Self::Asin => 0x10A0,
            Self::Acos => 0x10B0,
            Self::Atan => 0x10C0,
            Self::Min => 0x2000,
            Self::Max => 0x2010,
            Self::Lt => 0x2020,
            Self::Ge => 0x2030,
            Self::Add => 0x2040,
            Self::Mul => 0x2050,
            Self::Atan2 => 0x2060,
            Self::Div => 0x2080,
            Self::Cmp => 0x3000,
            Self::Movc => 0x3010,
            Self::Dot => 0x5000,
            Self::Noise => 0x5020,
            Self::MinScalar => 0xA000,
            Self::MaxScalar => 0xA010,
            Self::LtScalar => 0xA020,
            Self::GeScalar => 0xA030,
            Self::AddScalar => 0xA040,
            Self::MulScalar => 0xA050,
            Self::Atan2Scalar => 0xA060,
            Self::DivScalar => 0xA080,
            Self::DotScalar => 0xD000,
            Self::NoiseScalar => 0xD020,
        }
    }

    pub fn is_scalar(self) -> bool {
        self >= Self::SCALAR_OPS
    }

    /// Number of source operands (the destination is not counted).
    pub fn arity(self) -> usize {
        match self {
            Self::Nop => 0,
            Self::Mov
            | Self::Neg
            | Self::Rcp
            | Self::Frc
            | Self::Exp
            | Self::Log
            | Self::Rsq
            | Self::Sin
            | Self::Cos
            | Self::Asin
            | Self::Acos
            | Self::Atan
            | Self::Noise
            | Self::NoiseScalar => 1,
            Self::Cmp | Self::Movc => 3,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreshaderOperandType {
    Input,
    Output,
    Literal,
    Temp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreshaderOperand {
    pub ty: PreshaderOperandType,
    /// Scalar register index (`register * 4 + component`).
    pub index: u32,
    /// Input registers chased to compute a dynamic array index.
    pub array_registers: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreshaderInstruction {
    pub opcode: PreshaderOpcode,
    /// Lanes processed, 1-4.
    pub element_count: u32,
    /// Sources followed by the destination.
    pub operands: Vec<PreshaderOperand>,
}

impl PreshaderInstruction {
    pub fn destination(&self) -> Option<&PreshaderOperand> {
        self.operands.last()
    }

    pub fn sources(&self) -> &[PreshaderOperand] {
        match self.operands.split_last() {
            Some((_, sources)) => sources,
            None => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preshader {
    pub literals: Vec<f64>,
    pub temp_count: u32,
    pub symbols: Vec<Symbol>,
    pub instructions: Vec<PreshaderInstruction>,
    /// Input register file, `register_count * 4` floats. Callers copy parameter values here
    /// before [`Preshader::run`].
    pub registers: Vec<f32>,
}

impl Preshader {
    /// Number of vec4 input registers.
    pub fn register_count(&self) -> usize {
        self.registers.len() / 4
    }
}
