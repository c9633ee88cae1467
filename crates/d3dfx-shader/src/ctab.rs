//! `CTAB` constant table embedded in a shader comment block.
//!
//! The table maps HLSL-level names onto register ranges. Effects bind parameters to shaders
//! through it, and preshaders use it to locate their input registers.

use thiserror::Error;

use crate::shader_limits::{MAX_CTAB_CONSTANTS, MAX_CTAB_TYPE_DEPTH};
use crate::types::{
    StructMember, Symbol, SymbolClass, SymbolRegisterSet, SymbolType, SymbolTypeInfo,
};

pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

pub const CTAB_FOURCC: u32 = fourcc(b"CTAB");

/// Size of the `D3DXSHADER_CONSTANTTABLE` header.
const CTAB_HEADER_SIZE: u32 = 28;
const CONSTANT_INFO_SIZE: usize = 20;
const TYPE_INFO_SIZE: usize = 16;
const MEMBER_INFO_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CtabError {
    #[error("comment block is not a CTAB")]
    NotConstantTable,
    #[error("CTAB header size {0} is invalid")]
    BadHeaderSize(u32),
    #[error("CTAB {what} at offset {offset} is out of bounds")]
    OutOfBounds { what: &'static str, offset: usize },
    #[error("CTAB declares {0} constants")]
    TooManyConstants(u32),
    #[error("CTAB constant {name:?} uses unknown register set {raw}")]
    BadRegisterSet { name: String, raw: u32 },
    #[error("CTAB type uses unknown class {0}")]
    BadClass(u32),
    #[error("CTAB struct members nest deeper than {MAX_CTAB_TYPE_DEPTH}")]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConstantTable {
    pub creator: String,
    pub target: String,
    pub symbols: Vec<Symbol>,
}

/// Parses a comment payload (first word `CTAB`) into symbols.
pub fn parse_constant_table(comment: &[u32]) -> Result<ConstantTable, CtabError> {
    if comment.first() != Some(&CTAB_FOURCC) {
        return Err(CtabError::NotConstantTable);
    }
    // Offsets in the table are relative to the byte after the fourcc.
    let bytes: Vec<u8> = comment[1..].iter().flat_map(|w| w.to_le_bytes()).collect();
    let view = ByteView(&bytes);

    let size = view.u32_at(0, "header")?;
    if size != CTAB_HEADER_SIZE {
        return Err(CtabError::BadHeaderSize(size));
    }
    let creator = view.cstr_at(view.u32_at(4, "header")? as usize, "creator")?;
    let count = view.u32_at(12, "header")?;
    let info_offset = view.u32_at(16, "header")? as usize;
    let target = view.cstr_at(view.u32_at(24, "header")? as usize, "target")?;

    if count > MAX_CTAB_CONSTANTS
        || (count as usize).saturating_mul(CONSTANT_INFO_SIZE) > bytes.len()
    {
        return Err(CtabError::TooManyConstants(count));
    }

    let mut symbols = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let at = info_offset + i * CONSTANT_INFO_SIZE;
        let name = view.cstr_at(view.u32_at(at, "constant info")? as usize, "name")?;
        let set_raw = u32::from(view.u16_at(at + 4, "constant info")?);
        let register_set = SymbolRegisterSet::from_raw(set_raw).ok_or_else(|| {
            CtabError::BadRegisterSet {
                name: name.clone(),
                raw: set_raw,
            }
        })?;
        let register_index = u32::from(view.u16_at(at + 6, "constant info")?);
        let register_count = u32::from(view.u16_at(at + 8, "constant info")?);
        let type_offset = view.u32_at(at + 12, "constant info")? as usize;
        let info = parse_type_info(&view, type_offset, 0)?;
        symbols.push(Symbol {
            name,
            register_set,
            register_index,
            register_count,
            info,
        });
    }

    Ok(ConstantTable {
        creator,
        target,
        symbols,
    })
}

fn parse_type_info(
    view: &ByteView<'_>,
    at: usize,
    depth: u32,
) -> Result<SymbolTypeInfo, CtabError> {
    if depth > MAX_CTAB_TYPE_DEPTH {
        return Err(CtabError::TooDeep);
    }
    view.slice(at, TYPE_INFO_SIZE, "type info")?;
    let class_raw = u32::from(view.u16_at(at, "type info")?);
    let class = SymbolClass::from_raw(class_raw).ok_or(CtabError::BadClass(class_raw))?;
    let ty = SymbolType::from_raw(u32::from(view.u16_at(at + 2, "type info")?));
    let rows = u32::from(view.u16_at(at + 4, "type info")?);
    let columns = u32::from(view.u16_at(at + 6, "type info")?);
    let elements = u32::from(view.u16_at(at + 8, "type info")?);
    let member_count = usize::from(view.u16_at(at + 10, "type info")?);
    let member_offset = view.u32_at(at + 12, "type info")? as usize;

    if member_count.saturating_mul(MEMBER_INFO_SIZE) > view.0.len() {
        return Err(CtabError::OutOfBounds {
            what: "struct members",
            offset: member_offset,
        });
    }
    let mut members = Vec::with_capacity(member_count);
    for m in 0..member_count {
        let mat = member_offset + m * MEMBER_INFO_SIZE;
        let name = view.cstr_at(view.u32_at(mat, "member info")? as usize, "member name")?;
        let type_at = view.u32_at(mat + 4, "member info")? as usize;
        members.push(StructMember {
            name,
            info: parse_type_info(view, type_at, depth + 1)?,
        });
    }

    Ok(SymbolTypeInfo {
        class,
        ty,
        rows,
        columns,
        elements,
        members,
    })
}

struct ByteView<'a>(&'a [u8]);

impl ByteView<'_> {
    fn slice(&self, offset: usize, len: usize, what: &'static str) -> Result<&[u8], CtabError> {
        offset
            .checked_add(len)
            .and_then(|end| self.0.get(offset..end))
            .ok_or(CtabError::OutOfBounds { what, offset })
    }

    fn u16_at(&self, offset: usize, what: &'static str) -> Result<u16, CtabError> {
        let b = self.slice(offset, 2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_at(&self, offset: usize, what: &'static str) -> Result<u32, CtabError> {
        let b = self.slice(offset, 4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr_at(&self, offset: usize, what: &'static str) -> Result<String, CtabError> {
        let tail = self
            .0
            .get(offset..)
            .ok_or(CtabError::OutOfBounds { what, offset })?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(CtabError::OutOfBounds { what, offset })?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }
}

/// Builds `CTAB` comment payloads; used by tests across the workspace.
#[doc(hidden)]
pub mod builder {
    use crate::types::{SymbolRegisterSet, SymbolTypeInfo};

    pub struct CtabConstant<'a> {
        pub name: &'a str,
        pub register_set: SymbolRegisterSet,
        pub register_index: u16,
        pub register_count: u16,
        pub info: SymbolTypeInfo,
    }

    /// Returns the comment payload, fourcc included.
    pub fn build(constants: &[CtabConstant<'_>]) -> Vec<u32> {
        // Layout: header, constant infos, type infos, then a string pool.
        let mut out = vec![0u8; 28];
        let info_at = out.len();
        out.resize(info_at + constants.len() * 20, 0);

        let mut type_offsets = Vec::new();
        for c in constants {
            type_offsets.push(push_type(&mut out, &c.info));
        }

        let creator_at = push_str(&mut out, "d3dfx");
        let target_at = push_str(&mut out, "vs_3_0");
        for (i, c) in constants.iter().enumerate() {
            let name_at = push_str(&mut out, c.name);
            let at = info_at + i * 20;
            put_u32(&mut out, at, name_at);
            put_u16(&mut out, at + 4, match c.register_set {
                SymbolRegisterSet::Bool => 0,
                SymbolRegisterSet::Int4 => 1,
                SymbolRegisterSet::Float4 => 2,
                SymbolRegisterSet::Sampler => 3,
            });
            put_u16(&mut out, at + 6, c.register_index);
            put_u16(&mut out, at + 8, c.register_count);
            put_u32(&mut out, at + 12, type_offsets[i]);
        }

        put_u32(&mut out, 0, 28);
        put_u32(&mut out, 4, creator_at);
        put_u32(&mut out, 8, 0xFFFE_0300);
        put_u32(&mut out, 12, constants.len() as u32);
        put_u32(&mut out, 16, info_at as u32);
        put_u32(&mut out, 24, target_at);

        while out.len() % 4 != 0 {
            out.push(0);
        }
        let mut words = vec![super::CTAB_FOURCC];
        words.extend(
            out.chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        words
    }

    fn push_type(out: &mut Vec<u8>, info: &SymbolTypeInfo) -> u32 {
        let at = out.len();
        out.resize(at + 16, 0);
        put_u16(out, at, info.class.raw() as u16);
        put_u16(out, at + 2, info.ty.raw() as u16);
        put_u16(out, at + 4, info.rows as u16);
        put_u16(out, at + 6, info.columns as u16);
        put_u16(out, at + 8, info.elements as u16);
        put_u16(out, at + 10, info.members.len() as u16);
        if !info.members.is_empty() {
            let members_at = out.len();
            out.resize(members_at + info.members.len() * 8, 0);
            for (i, m) in info.members.iter().enumerate() {
                let type_at = push_type(out, &m.info);
                let name_at = push_str(out, &m.name);
                put_u32(out, members_at + i * 8, name_at);
                put_u32(out, members_at + i * 8 + 4, type_at);
            }
            put_u32(out, at + 12, members_at as u32);
        }
        at as u32
    }

    fn push_str(out: &mut Vec<u8>, s: &str) -> u32 {
        let at = out.len() as u32;
        out.extend_from_slice(s.as_bytes());
        out.push(0);
        at
    }

    fn put_u16(out: &mut [u8], at: usize, v: u16) {
        out[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(out: &mut [u8], at: usize, v: u32) {
        out[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }
}
