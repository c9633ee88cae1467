use tracing::debug;

use super::{
    Preshader, PreshaderError, PreshaderInstruction, PreshaderOpcode, PreshaderOperand,
    PreshaderOperandType,
};
use crate::ctab::{fourcc, parse_constant_table, CTAB_FOURCC};
use crate::shader_limits::MAX_PRESHADER_INSTRUCTIONS;
use crate::types::SymbolRegisterSet;

/// Tag of the shader comment block that carries an embedded preshader.
pub const PRESHADER_FOURCC: u32 = fourcc(b"PRES");
const CLIT_FOURCC: u32 = fourcc(b"CLIT");
const FXLC_FOURCC: u32 = fourcc(b"FXLC");
const PRSI_FOURCC: u32 = fourcc(b"PRSI");

const VERSION_MAGIC: u32 = 0x4658_0000;
const MIN_VERSION: u32 = VERSION_MAGIC | 0x0200;
const MAX_VERSION: u32 = VERSION_MAGIC | 0x0201;

const COMMENT_OPCODE: u32 = 0xFFFE;
const END_TOKEN: u32 = 0x0000_FFFF;

#[derive(Default)]
struct Blocks<'a> {
    ctab: Option<&'a [u32]>,
    clit: Option<&'a [u32]>,
    fxlc: Option<&'a [u32]>,
    prsi: Option<&'a [u32]>,
}

fn malformed(message: impl Into<String>) -> PreshaderError {
    PreshaderError::Malformed(message.into())
}

/// Parses a preshader token stream beginning with its `FX` version token.
pub fn parse_preshader(tokens: &[u32]) -> Result<Preshader, PreshaderError> {
    let (&version, mut rest) = tokens
        .split_first()
        .ok_or_else(|| malformed("empty token stream"))?;
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return Err(PreshaderError::UnsupportedVersion(version));
    }

    // Every section is its own comment block; collect them first so order does not matter.
    let mut blocks = Blocks::default();
    while let Some((&token, tail)) = rest.split_first() {
        if token == END_TOKEN {
            break;
        }
        if token & 0xFFFF != COMMENT_OPCODE {
            return Err(malformed(format!("unexpected token 0x{token:08x}")));
        }
        let len = ((token >> 16) & 0x7FFF) as usize;
        if len > tail.len() {
            return Err(malformed("comment block overruns the stream"));
        }
        let (block, after) = tail.split_at(len);
        rest = after;
        let Some(&tag) = block.first() else {
            continue;
        };
        let (slot, name) = match tag {
            CTAB_FOURCC => (&mut blocks.ctab, "CTAB"),
            CLIT_FOURCC => (&mut blocks.clit, "CLIT"),
            FXLC_FOURCC => (&mut blocks.fxlc, "FXLC"),
            PRSI_FOURCC => (&mut blocks.prsi, "PRSI"),
            other => return Err(malformed(format!("unknown section 0x{other:08x}"))),
        };
        if slot.replace(block).is_some() {
            return Err(PreshaderError::DuplicateBlock(name));
        }
    }

    let ctab = blocks.ctab.ok_or(PreshaderError::MissingBlock("CTAB"))?;
    let clit = blocks.clit.ok_or(PreshaderError::MissingBlock("CLIT"))?;
    let fxlc = blocks.fxlc.ok_or(PreshaderError::MissingBlock("FXLC"))?;

    let literals = parse_literals(clit)?;
    let output_map = match blocks.prsi {
        Some(prsi) => Some(parse_output_map(prsi)?),
        None => None,
    };
    let symbols = parse_constant_table(ctab)?.symbols;
    if let Some(sym) = symbols
        .iter()
        .find(|s| s.register_set != SymbolRegisterSet::Float4)
    {
        return Err(malformed(format!(
            "input {:?} is not in the float4 register set",
            sym.name
        )));
    }

    let register_count = symbols
        .iter()
        .map(|s| s.register_index + s.register_count)
        .max()
        .unwrap_or(0);

    let mut preshader = Preshader {
        literals,
        temp_count: 0,
        symbols,
        instructions: Vec::new(),
        registers: vec![0.0; register_count as usize * 4],
    };
    parse_instructions(fxlc, &mut preshader, output_map.as_deref())?;

    debug!(
        instructions = preshader.instructions.len(),
        literals = preshader.literals.len(),
        temps = preshader.temp_count,
        registers = register_count,
        "parsed preshader"
    );
    Ok(preshader)
}

fn parse_literals(clit: &[u32]) -> Result<Vec<f64>, PreshaderError> {
    let count = *clit.get(1).ok_or_else(|| malformed("CLIT block is empty"))? as usize;
    let words = &clit[2..];
    if count > words.len() / 2 {
        return Err(malformed("CLIT count exceeds block length"));
    }
    Ok(words
        .chunks_exact(2)
        .take(count)
        .map(|pair| f64::from_bits(u64::from(pair[0]) | (u64::from(pair[1]) << 32)))
        .collect())
}

/// `PRSI`: eight header words, the output mapping count at `[7]`, then (register, count) pairs.
fn parse_output_map(prsi: &[u32]) -> Result<Vec<(u32, u32)>, PreshaderError> {
    if prsi.len() < 8 {
        return Err(malformed("PRSI block too short"));
    }
    let count = prsi[7] as usize;
    let pairs = &prsi[8..];
    if count > pairs.len() / 2 {
        return Err(malformed("PRSI count exceeds block length"));
    }
    Ok(pairs
        .chunks_exact(2)
        .take(count)
        .map(|p| (p[0], p[1]))
        .collect())
}

/// `FXLC`: instruction count, then per instruction the opcode token (`opcode << 16 | elements`),
/// the source count, and `sources + 1` operands. Each operand is `[array_count, type, index]`
/// followed by `array_count` `(type, register)` pairs for dynamic indexing.
fn parse_instructions(
    fxlc: &[u32],
    preshader: &mut Preshader,
    output_map: Option<&[(u32, u32)]>,
) -> Result<(), PreshaderError> {
    let count = *fxlc.get(1).ok_or_else(|| malformed("FXLC block is empty"))?;
    let mut tokens = &fxlc[2..];
    if count > MAX_PRESHADER_INSTRUCTIONS || count as usize > tokens.len() / 2 {
        return Err(malformed("FXLC instruction count exceeds block length"));
    }


    for _ in 0..count {
        let head = take(&mut tokens, 2)?;
        let opcode_raw = head[0] >> 16;
        let opcode = PreshaderOpcode::from_fxlc(opcode_raw)
            .ok_or(PreshaderError::UnknownOpcode(opcode_raw))?;
        let element_count = head[0] & 0xFF;
        if !(1..=4).contains(&element_count) {
            return Err(malformed(format!("element count {element_count}")));
        }
        let source_count = head[1] as usize;
        if source_count != opcode.arity() {
            return Err(PreshaderError::BadArity {
                opcode,
                expected: opcode.arity(),
                found: source_count,
            });
        }

        let mut operands = Vec::with_capacity(source_count + 1);
        for slot in 0..=source_count {
            let op = take(&mut tokens, 3)?;
            let (array_count, raw_type, index) = (op[0] as usize, op[1], op[2]);
            let is_dest = slot == source_count;
            let lanes = if opcode.is_scalar() && slot == 0 {
                1
            } else {
                element_count
            };
            let ty = match raw_type {
                1 => {
                    if index as usize + lanes as usize > preshader.literals.len() {
                        return Err(malformed(format!("literal index {index}")));
                    }
                    PreshaderOperandType::Literal
                }
                2 => {
                    let covered = preshader.symbols.iter().any(|s| {
                        let base = s.register_index * 4;
                        let end = base + s.register_count * 4;
                        base <= index && index + lanes <= end
                    });
                    if array_count == 0 && !covered {
                        return Err(malformed(format!("input index {index}")));
                    }
                    PreshaderOperandType::Input
                }
                4 => {
                    if let Some(map) = output_map {
                        let mapped = map.iter().any(|&(reg, n)| {
                            reg * 4 <= index && index + lanes <= (reg + n) * 4
                        });
                        if !mapped {
                            return Err(malformed(format!("output index {index}")));
                        }
                    }
                    PreshaderOperandType::Output
                }
                7 => {
                    preshader.temp_count = preshader.temp_count.max(index + lanes);
                    PreshaderOperandType::Temp
                }
                other => return Err(malformed(format!("operand type {other}"))),
            };
            if is_dest && !matches!(ty, PreshaderOperandType::Temp | PreshaderOperandType::Output)
            {
                return Err(malformed("destination must be a temp or output register"));
            }
            let array_registers = if array_count > 0 {
                if ty != PreshaderOperandType::Input {
                    return Err(malformed("array indexing on a non-input operand"));
                }
                take(&mut tokens, array_count * 2)?
                    .chunks_exact(2)
                    .map(|pair| pair[1])
                    .collect()
            } else {
                Vec::new()
            };
            operands.push(PreshaderOperand {
                ty,
                index,
                array_registers,
            });
        }

        preshader.instructions.push(PreshaderInstruction {
            opcode,
            element_count,
            operands,
        });
    }
    Ok(())
}

fn take<'a>(tokens: &mut &'a [u32], n: usize) -> Result<&'a [u32], PreshaderError> {
    if n > tokens.len() {
        return Err(malformed("FXLC block truncated"));
    }
    let (head, tail) = tokens.split_at(n);
    *tokens = tail;
    Ok(head)
}

/// Builds preshader token streams; used by tests across the workspace.
#[doc(hidden)]
pub mod builder {
    use super::{CLIT_FOURCC, FXLC_FOURCC, MAX_VERSION, PRSI_FOURCC};
    use crate::preshader::{PreshaderOpcode, PreshaderOperandType};

    pub struct Op {
        pub ty: PreshaderOperandType,
        pub index: u32,
        pub array_registers: Vec<u32>,
    }

    impl Op {
        pub fn literal(index: u32) -> Self {
            Self::new(PreshaderOperandType::Literal, index)
        }
        pub fn input(index: u32) -> Self {
            Self::new(PreshaderOperandType::Input, index)
        }
        pub fn output(index: u32) -> Self {
            Self::new(PreshaderOperandType::Output, index)
        }
        pub fn temp(index: u32) -> Self {
            Self::new(PreshaderOperandType::Temp, index)
        }
        fn new(ty: PreshaderOperandType, index: u32) -> Self {
            Self {
                ty,
                index,
                array_registers: Vec::new(),
            }
        }
    }

    pub struct Inst {
        pub opcode: PreshaderOpcode,
        pub elements: u32,
        /// Sources then destination.
        pub operands: Vec<Op>,
    }

    fn comment(payload: &[u32]) -> Vec<u32> {
        let mut out = vec![0xFFFE | ((payload.len() as u32) << 16)];
        out.extend_from_slice(payload);
        out
    }

    /// Token stream starting at the version token. `ctab` is a full `CTAB` payload.
    pub fn build(ctab: &[u32], literals: &[f64], insts: &[Inst], outputs: &[(u32, u32)]) -> Vec<u32> {
        let mut out = vec![MAX_VERSION];
        out.extend(comment(ctab));

        let mut clit = vec![CLIT_FOURCC, literals.len() as u32];
        for lit in literals {
            let bits = lit.to_bits();
            clit.push(bits as u32);
            clit.push((bits >> 32) as u32);
        }
        out.extend(comment(&clit));

        let mut fxlc = vec![FXLC_FOURCC, insts.len() as u32];
        for inst in insts {
            fxlc.push((inst.opcode.fxlc() << 16) | inst.elements);
            fxlc.push(inst.operands.len() as u32 - 1);
            for op in &inst.operands {
                let ty = match op.ty {
                    PreshaderOperandType::Literal => 1,
                    PreshaderOperandType::Input => 2,
                    PreshaderOperandType::Output => 4,
                    PreshaderOperandType::Temp => 7,
                };
                fxlc.extend([op.array_registers.len() as u32, ty, op.index]);
                for reg in &op.array_registers {
                    fxlc.extend([2, *reg]);
                }
            }
        }
        out.extend(comment(&fxlc));

        if !outputs.is_empty() {
            let mut prsi = vec![PRSI_FOURCC, 0, 0, 0, 0, 0, 0, outputs.len() as u32];
            for (reg, count) in outputs {
                prsi.extend([*reg, *count]);
            }
            out.extend(comment(&prsi));
        }
        out.push(0x0000_FFFF);
        out
    }
}
