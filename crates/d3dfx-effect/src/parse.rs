//! Effect container parsing.
//!
//! Layout of a compiled effect:
//!
//! ```text
//! [0xBCF00BCF size]          optional XNA4 compiler preamble, `size` bytes long
//! 0xFEFF0901                 magic
//! offset                     TOC position relative to the base (the byte after this field)
//! ...                        type descriptors, values and strings, addressed from the base
//! TOC:
//!   params techniques unknown objects
//!   params[]      typeoff valoff flags annos annotations[] (typeoff valoff)
//!   techniques[]  nameoff annos passes annotations[] passes[]
//!   passes[]      nameoff annos states annotations[] states[] (type unknown typeoff valoff)
//!   small_count large_count
//!   small[]       index length bytes (padded to 4)
//!   large[]       technique index unknown state type length bytes (padded to 4)
//! ```

use d3dfx_shader::{ShaderCache, StructMember, SymbolClass, SymbolType, SymbolTypeInfo};
use tracing::{debug, warn};

use crate::effect::Effect;
use crate::error::EffectError;
use crate::reader::{read_bytes, read_string, read_u32_le, Cursor};
use crate::resolve::Resolver;
use crate::states::{RenderStateType, SamplerStateType};
use crate::types::{
    Annotation, EffectObject, EffectValue, Param, Pass, SamplerState, State, Technique, ValueData,
};
use crate::EffectOptions;

const EFFECT_MAGIC: u32 = 0xFEFF_0901;
const XNA4_PREAMBLE_MAGIC: u32 = 0xBCF0_0BCF;

/// Upper bound on the object table, which is sized from an untrusted count before anything
/// references it.
const MAX_EFFECT_OBJECTS: usize = 1 << 16;
/// Upper bound on the words a single value may allocate.
const MAX_VALUE_WORDS: u64 = 1 << 20;
/// Sampler states nest values; valid effects go one level deep.
const MAX_VALUE_DEPTH: u32 = 4;

/// Sampler state types carry two flag bits that are not part of the state number.
const SAMPLER_STATE_FLAGS: u32 = 0xA0;

/// Parses an effect, translating its shaders with a private [`ShaderCache`].
pub fn parse_effect(bytes: &[u8], options: &EffectOptions) -> Result<Effect, EffectError> {
    let mut cache = ShaderCache::new();
    parse_effect_with_cache(bytes, options, &mut cache)
}

/// Parses an effect, translating its shaders through `cache` so repeated loads of the same
/// effect reuse earlier translations.
pub fn parse_effect_with_cache(
    bytes: &[u8],
    options: &EffectOptions,
    cache: &mut ShaderCache,
) -> Result<Effect, EffectError> {
    if bytes.len() < 8 {
        return Err(EffectError::UnexpectedEof("effect header"));
    }

    let mut cursor = Cursor::new(bytes);
    let mut header = cursor.read_u32("effect header")?;
    if header == XNA4_PREAMBLE_MAGIC {
        // The preamble's size counts the magic and the size field themselves.
        let size = cursor.read_u32("XNA4 preamble size")?;
        let skip = size
            .checked_sub(8)
            .ok_or_else(|| EffectError::malformed(format!("XNA4 preamble size {size}")))?;
        cursor.skip(skip as usize, "XNA4 preamble")?;
        header = cursor.read_u32("effect header")?;
    }
    if header != EFFECT_MAGIC {
        return Err(EffectError::NotAnEffectsFile);
    }

    let offset = cursor.read_u32("TOC offset")?;
    let base = &bytes[cursor.position()..];
    let mut toc = Cursor::new(base);
    toc.skip(offset as usize, "TOC offset")?;

    if toc.remaining() < 16 {
        return Err(EffectError::UnexpectedEof("structure counts"));
    }
    let param_count = toc.read_u32("parameter count")?;
    let technique_count = toc.read_u32("technique count")?;
    let _unknown = toc.read_u32("structure counts")?;
    let object_count = toc.read_u32("object count")? as usize;

    // Every object is referenced by at least one 4-byte index somewhere in the blob.
    if object_count > MAX_EFFECT_OBJECTS || object_count > base.len() / 4 {
        return Err(EffectError::OutOfMemory(format!(
            "{object_count} effect objects"
        )));
    }

    let mut values = ValueReader {
        base,
        objects: vec![EffectObject::default(); object_count],
    };
    let params = values.read_params(&mut toc, param_count)?;
    let techniques = values.read_techniques(&mut toc, technique_count)?;
    let mut objects = values.objects;

    if toc.remaining() < 8 {
        return Err(EffectError::UnexpectedEof("object counts"));
    }
    let small_count = toc.read_u32("small object count")?;
    let large_count = toc.read_u32("large object count")?;

    let mut resolver = Resolver::new(options, cache, &params, &techniques);
    resolver.read_small_objects(&mut toc, small_count, &mut objects)?;
    resolver.read_large_objects(&mut toc, large_count, &mut objects)?;
    let errors = resolver.into_errors();

    debug!(
        profile = %options.profile,
        params = params.len(),
        techniques = techniques.len(),
        objects = objects.len(),
        small_objects = small_count,
        large_objects = large_count,
        translation_errors = errors.len(),
        "parsed effect"
    );

    Ok(Effect::new(
        options.profile,
        errors,
        params,
        techniques,
        objects,
    ))
}

/// Reads base-relative type descriptors and values, recording object types as it goes.
struct ValueReader<'a> {
    base: &'a [u8],
    objects: Vec<EffectObject>,
}

impl ValueReader<'_> {
    fn u32_at(&self, offset: usize, what: &'static str) -> Result<u32, EffectError> {
        read_u32_le(self.base, offset, what)
    }

    fn string_at(&self, offset: u32) -> Result<Option<String>, EffectError> {
        read_string(self.base, offset as usize)
    }

    fn type_object(&mut self, index: u32, ty: SymbolType) -> Result<(), EffectError> {
        let count = self.objects.len();
        let object = self
            .objects
            .get_mut(index as usize)
            .ok_or(EffectError::BadObjectIndex { index, count })?;
        object.ty = ty;
        Ok(())
    }

    fn read_params(&mut self, toc: &mut Cursor<'_>, count: u32) -> Result<Vec<Param>, EffectError> {
        let mut params = Vec::new();
        for _ in 0..count {
            let type_offset = toc.read_u32("parameter")?;
            let value_offset = toc.read_u32("parameter")?;
            let _flags = toc.read_u32("parameter")?;
            let annotation_count = toc.read_u32("parameter")?;
            let annotations = self.read_annotations(toc, annotation_count)?;
            let value = self.read_value(type_offset, value_offset, 0)?;
            params.push(Param { value, annotations });
        }
        Ok(params)
    }

    fn read_annotations(
        &mut self,
        toc: &mut Cursor<'_>,
        count: u32,
    ) -> Result<Vec<Annotation>, EffectError> {
        let mut annotations = Vec::new();
        for _ in 0..count {
            let type_offset = toc.read_u32("annotation")?;
            let value_offset = toc.read_u32("annotation")?;
            annotations.push(self.read_value(type_offset, value_offset, 0)?);
        }
        Ok(annotations)
    }

    fn read_techniques(
        &mut self,
        toc: &mut Cursor<'_>,
        count: u32,
    ) -> Result<Vec<Technique>, EffectError> {
        let mut techniques = Vec::new();
        for _ in 0..count {
            let name_offset = toc.read_u32("technique")?;
            let annotation_count = toc.read_u32("technique")?;
            let pass_count = toc.read_u32("technique")?;
            let name = self.string_at(name_offset)?;
            let annotations = self.read_annotations(toc, annotation_count)?;
            let mut passes = Vec::new();
            for _ in 0..pass_count {
                passes.push(self.read_pass(toc)?);
            }
            techniques.push(Technique {
                name,
                passes,
                annotations,
            });
        }
        Ok(techniques)
    }

    fn read_pass(&mut self, toc: &mut Cursor<'_>) -> Result<Pass, EffectError> {
        let name_offset = toc.read_u32("pass")?;
        let annotation_count = toc.read_u32("pass")?;
        let state_count = toc.read_u32("pass")?;
        let name = self.string_at(name_offset)?;
        let annotations = self.read_annotations(toc, annotation_count)?;
        let mut states = Vec::new();
        for _ in 0..state_count {
            let raw_type = toc.read_u32("render state")?;
            let _unknown = toc.read_u32("render state")?;
            let type_offset = toc.read_u32("render state")?;
            let value_offset = toc.read_u32("render state")?;
            let value = self.read_value(type_offset, value_offset, 0)?;
            if RenderStateType::from_raw(raw_type).is_none() {
                warn!(raw_type, "unknown render state");
            }
            states.push(State { raw_type, value });
        }
        Ok(Pass {
            name,
            states,
            annotations,
        })
    }

    fn read_value(
        &mut self,
        type_offset: u32,
        value_offset: u32,
        depth: u32,
    ) -> Result<EffectValue, EffectError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(EffectError::malformed("sampler states nest too deeply"));
        }
        let t = type_offset as usize;
        let v = value_offset as usize;
        let raw_type = self.u32_at(t, "value type")?;
        let raw_class = self.u32_at(t + 4, "value class")?;
        let name = self.string_at(self.u32_at(t + 8, "value name")?)?;
        let semantic = self.string_at(self.u32_at(t + 12, "value semantic")?)?;
        let elements = self.u32_at(t + 16, "value elements")?;

        let ty = SymbolType::from_raw(raw_type);
        let class = SymbolClass::from_raw(raw_class)
            .ok_or_else(|| EffectError::malformed(format!("unknown value class {raw_class}")))?;
        let mut info = SymbolTypeInfo {
            class,
            ty,
            rows: 0,
            columns: 0,
            elements,
            members: Vec::new(),
        };

        let data = match class {
            SymbolClass::Scalar
            | SymbolClass::Vector
            | SymbolClass::MatrixRows
            | SymbolClass::MatrixColumns => {
                if !ty.is_numeric() {
                    return Err(EffectError::malformed(format!(
                        "{class:?} value of type {ty:?}"
                    )));
                }
                info.columns = self.u32_at(t + 20, "value columns")?;
                info.rows = self.u32_at(t + 24, "value rows")?;
                let registers = value_words(info.rows, elements)? / 4;
                ValueData::Registers(self.read_registers(v, info.columns, registers)?)
            }
            SymbolClass::Object if ty.is_sampler() => {
                ValueData::SamplerStates(self.read_sampler_states(v, ty, depth)?)
            }
            SymbolClass::Object => {
                if !(SymbolType::String.raw()..=SymbolType::VertexShader.raw()).contains(&raw_type)
                {
                    return Err(EffectError::malformed(format!("object value of type {ty:?}")));
                }
                let count = elements.max(1) as usize;
                let raw = read_bytes(self.base, v, count * 4, "object indices")?;
                let indices: Vec<u32> = raw
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                for &index in &indices {
                    self.type_object(index, ty)?;
                }
                ValueData::Objects(indices)
            }
            SymbolClass::Struct => {
                let member_count = self.u32_at(t + 20, "struct member count")?;
                ValueData::Registers(self.read_struct(&mut info, t + 24, member_count)?)
            }
        };

        Ok(EffectValue {
            name,
            semantic,
            info,
            data,
        })
    }

    /// Copies `columns` words per register into vec4-aligned rows, zero padding the rest.
    fn read_registers(
        &self,
        offset: usize,
        columns: u32,
        registers: usize,
    ) -> Result<Vec<u32>, EffectError> {
        if columns > 4 {
            return Err(EffectError::malformed(format!("{columns} columns")));
        }
        let stride = columns as usize * 4;
        let mut words = vec![0u32; registers * 4];
        for (i, row) in words.chunks_exact_mut(4).enumerate() {
            let src = read_bytes(self.base, offset + i * stride, stride, "value data")?;
            for (dst, c) in row.iter_mut().zip(src.chunks_exact(4)) {
                *dst = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            }
        }
        Ok(words)
    }

    fn read_sampler_states(
        &mut self,
        offset: usize,
        sampler_type: SymbolType,
        depth: u32,
    ) -> Result<Vec<SamplerState>, EffectError> {
        let count = self.u32_at(offset, "sampler state count")? as usize;
        let mut states = Vec::new();
        for i in 0..count {
            let at = offset + 4 + i * 16;
            let raw_type = self.u32_at(at, "sampler state")? & !SAMPLER_STATE_FLAGS;
            let type_offset = self.u32_at(at + 8, "sampler state")?;
            let value_offset = self.u32_at(at + 12, "sampler state")?;
            let value = self.read_value(type_offset, value_offset, depth + 1)?;
            if SamplerStateType::from_raw(raw_type).is_none() {
                warn!(raw_type, "unknown sampler state");
            }
            if raw_type == SamplerStateType::Texture.raw() {
                // The texture bound to a sampler takes the sampler's own type.
                let index = value
                    .first_word()
                    .ok_or_else(|| EffectError::malformed("texture state without a value"))?;
                self.type_object(index, sampler_type)?;
            }
            states.push(SamplerState { raw_type, value });
        }
        Ok(states)
    }

    /// Reads member descriptors at `offset` and the member data that follows them.
    ///
    /// Struct data is not at the value offset: it sits right after the last member descriptor,
    /// one member after another, repeated per array element.
    fn read_struct(
        &self,
        info: &mut SymbolTypeInfo,
        offset: usize,
        member_count: u32,
    ) -> Result<Vec<u32>, EffectError> {
        let mut at = offset;
        let mut struct_words = 0u64;
        for _ in 0..member_count {
            let raw_type = self.u32_at(at, "struct member")?;
            let raw_class = self.u32_at(at + 4, "struct member")?;
            let name_offset = self.u32_at(at + 8, "struct member")?;
            let elements = self.u32_at(at + 16, "struct member")?;
            let columns = self.u32_at(at + 20, "struct member")?;
            let rows = self.u32_at(at + 24, "struct member")?;
            at += 28;

            // Only flat numeric members; nested structs are not supported.
            let ty = SymbolType::from_raw(raw_type);
            let class = match SymbolClass::from_raw(raw_class) {
                Some(class @ (SymbolClass::Scalar | SymbolClass::Vector)) if ty.is_numeric() => class,
                _ => {
                    return Err(EffectError::malformed(format!(
                        "struct member of class {raw_class} and type {ty:?}"
                    )))
                }
            };
            if columns > 4 {
                return Err(EffectError::malformed(format!("{columns} columns")));
            }
            struct_words += value_words(rows, elements)? as u64;
            info.members.push(StructMember {
                name: self.string_at(name_offset)?.unwrap_or_default(),
                info: SymbolTypeInfo {
                    class,
                    ty,
                    rows,
                    columns,
                    elements,
                    members: Vec::new(),
                },
            });
        }

        let total = struct_words * u64::from(info.elements.max(1));
        if total > MAX_VALUE_WORDS {
            return Err(EffectError::OutOfMemory(format!("{total}-word struct value")));
        }
        info.columns = struct_words as u32;
        info.rows = 1;

        let mut words = vec![0u32; total as usize];
        let mut dst = 0;
        let mut src = at;
        for _ in 0..info.elements.max(1) {
            for member in &info.members {
                let stride = member.info.columns as usize * 4;
                for _ in 0..member.info.rows * member.info.elements.max(1) {
                    let raw = read_bytes(self.base, src, stride, "struct data")?;
                    for (k, c) in raw.chunks_exact(4).enumerate() {
                        words[dst + k] = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                    }
                    dst += 4;
                    src += stride;
                }
            }
        }
        Ok(words)
    }
}

/// Words backing `rows` registers per element, with a zero element count meaning one.
fn value_words(rows: u32, elements: u32) -> Result<usize, EffectError> {
    let words = 4 * u64::from(rows) * u64::from(elements.max(1));
    if words > MAX_VALUE_WORDS {
        return Err(EffectError::OutOfMemory(format!("{words}-word value")));
    }
    Ok(words as usize)
}
