//! Assembles effect binaries; used by tests across the workspace.

use d3dfx_shader::{SymbolClass, SymbolType};

const EFFECT_MAGIC: u32 = 0xFEFF_0901;
const XNA4_PREAMBLE_MAGIC: u32 = 0xBCF0_0BCF;

/// A type descriptor and value pair in the data region.
#[derive(Debug, Clone, Copy)]
pub struct ValueRef {
    pub type_offset: u32,
    pub value_offset: u32,
}

pub struct PassDesc {
    pub name: &'static str,
    /// `(raw render state, value)`
    pub states: Vec<(u32, ValueRef)>,
}

struct ParamDesc {
    value: ValueRef,
    annotations: Vec<ValueRef>,
}

struct TechniqueDesc {
    name: u32,
    passes: Vec<(u32, Vec<(u32, ValueRef)>)>,
}

struct LargeObject {
    technique: u32,
    index: u32,
    state: u32,
    kind: u32,
    bytes: Vec<u8>,
}

pub struct EffectBuilder {
    data: Vec<u8>,
    params: Vec<ParamDesc>,
    techniques: Vec<TechniqueDesc>,
    object_count: u32,
    small: Vec<(u32, Vec<u8>)>,
    large: Vec<LargeObject>,
}

impl Default for EffectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn push_words(out: &mut Vec<u8>, words: &[u32]) {
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Little-endian bytes of a token stream.
pub fn token_bytes(tokens: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    push_words(&mut out, tokens);
    out
}

impl EffectBuilder {
    pub fn new() -> Self {
        // Offset 0 holds a zero length, so a zero name offset reads as "no string".
        Self {
            data: vec![0; 4],
            params: Vec::new(),
            techniques: Vec::new(),
            object_count: 0,
            small: Vec::new(),
            large: Vec::new(),
        }
    }

    pub fn objects(&mut self, count: u32) -> &mut Self {
        self.object_count = count;
        self
    }

    pub fn string(&mut self, s: &str) -> u32 {
        let at = self.data.len() as u32;
        push_words(&mut self.data, &[s.len() as u32 + 1]);
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        pad4(&mut self.data);
        at
    }

    pub fn words(&mut self, words: &[u32]) -> u32 {
        let at = self.data.len() as u32;
        push_words(&mut self.data, words);
        at
    }

    fn type_header(&mut self, ty: SymbolType, class: SymbolClass, name: &str, elements: u32) -> u32 {
        let name = if name.is_empty() { 0 } else { self.string(name) };
        self.words(&[ty.raw(), class.raw(), name, 0, elements])
    }

    /// Numeric value; `values` is laid out `columns` words per row, as stored in the file.
    pub fn numeric(
        &mut self,
        ty: SymbolType,
        class: SymbolClass,
        name: &str,
        rows: u32,
        columns: u32,
        elements: u32,
        values: &[u32],
    ) -> ValueRef {
        let type_offset = self.type_header(ty, class, name, elements);
        self.words(&[columns, rows]);
        let value_offset = self.words(values);
        ValueRef {
            type_offset,
            value_offset,
        }
    }

    pub fn float_value(&mut self, name: &str, rows: u32, columns: u32, values: &[f32]) -> ValueRef {
        let class = match (rows, columns) {
            (1, 1) => SymbolClass::Scalar,
            (1, _) => SymbolClass::Vector,
            _ => SymbolClass::MatrixRows,
        };
        let bits: Vec<u32> = values.iter().map(|f| f.to_bits()).collect();
        self.numeric(SymbolType::Float, class, name, rows, columns, 0, &bits)
    }

    pub fn int_value(&mut self, value: u32) -> ValueRef {
        self.numeric(SymbolType::Int, SymbolClass::Scalar, "", 1, 1, 0, &[value])
    }

    /// Object-class value holding object indices (`elements` is zero for a single index).
    pub fn object_value(&mut self, ty: SymbolType, name: &str, indices: &[u32]) -> ValueRef {
        let elements = if indices.len() == 1 { 0 } else { indices.len() as u32 };
        let type_offset = self.type_header(ty, SymbolClass::Object, name, elements);
        let value_offset = self.words(indices);
        ValueRef {
            type_offset,
            value_offset,
        }
    }

    /// Sampler parameter value; `states` are `(raw sampler state, value)`.
    pub fn sampler_value(&mut self, ty: SymbolType, name: &str, states: &[(u32, ValueRef)]) -> ValueRef {
        let type_offset = self.type_header(ty, SymbolClass::Object, name, 0);
        let value_offset = self.words(&[states.len() as u32]);
        for (state, value) in states {
            self.words(&[*state, 0, value.type_offset, value.value_offset]);
        }
        ValueRef {
            type_offset,
            value_offset,
        }
    }

    /// Struct value of float vector members `(name, rows, columns)`. The member data follows
    /// the descriptors in the type block.
    pub fn struct_value(&mut self, name: &str, members: &[(&str, u32, u32)], data: &[f32]) -> ValueRef {
        let member_names: Vec<u32> = members.iter().map(|(n, _, _)| self.string(n)).collect();
        let type_offset = self.type_header(SymbolType::Void, SymbolClass::Struct, name, 0);
        self.words(&[members.len() as u32]);
        for ((_, rows, columns), name) in members.iter().zip(member_names) {
            let class = if *columns == 1 {
                SymbolClass::Scalar
            } else {
                SymbolClass::Vector
            };
            self.words(&[SymbolType::Float.raw(), class.raw(), name, 0, 1, *columns, *rows]);
        }
        let bits: Vec<u32> = data.iter().map(|f| f.to_bits()).collect();
        self.words(&bits);
        ValueRef {
            type_offset,
            value_offset: 0,
        }
    }

    pub fn param(&mut self, value: ValueRef) -> u32 {
        self.params.push(ParamDesc {
            value,
            annotations: Vec::new(),
        });
        self.params.len() as u32 - 1
    }

    pub fn annotate(&mut self, param: u32, annotation: ValueRef) -> &mut Self {
        self.params[param as usize].annotations.push(annotation);
        self
    }

    pub fn technique(&mut self, name: &str, passes: Vec<PassDesc>) -> u32 {
        let name = self.string(name);
        let passes = passes
            .into_iter()
            .map(|p| (self.string(p.name), p.states))
            .collect();
        self.techniques.push(TechniqueDesc { name, passes });
        self.techniques.len() as u32 - 1
    }

    pub fn small_object(&mut self, index: u32, bytes: Vec<u8>) -> &mut Self {
        self.small.push((index, bytes));
        self
    }

    /// `technique` is `u32::MAX` for objects owned by a sampler parameter.
    pub fn large_object(
        &mut self,
        technique: u32,
        index: u32,
        state: u32,
        kind: u32,
        bytes: Vec<u8>,
    ) -> &mut Self {
        self.large.push(LargeObject {
            technique,
            index,
            state,
            kind,
            bytes,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut toc = Vec::new();
        push_words(
            &mut toc,
            &[
                self.params.len() as u32,
                self.techniques.len() as u32,
                0,
                self.object_count,
            ],
        );
        for p in &self.params {
            push_words(
                &mut toc,
                &[
                    p.value.type_offset,
                    p.value.value_offset,
                    0,
                    p.annotations.len() as u32,
                ],
            );
            for a in &p.annotations {
                push_words(&mut toc, &[a.type_offset, a.value_offset]);
            }
        }
        for t in &self.techniques {
            push_words(&mut toc, &[t.name, 0, t.passes.len() as u32]);
            for (name, states) in &t.passes {
                push_words(&mut toc, &[*name, 0, states.len() as u32]);
                for (state, value) in states {
                    push_words(&mut toc, &[*state, 0, value.type_offset, value.value_offset]);
                }
            }
        }
        push_words(&mut toc, &[self.small.len() as u32, self.large.len() as u32]);
        for (index, bytes) in &self.small {
            push_words(&mut toc, &[*index, bytes.len() as u32]);
            toc.extend_from_slice(bytes);
            pad4(&mut toc);
        }
        for o in &self.large {
            push_words(
                &mut toc,
                &[o.technique, o.index, 0, o.state, o.kind, o.bytes.len() as u32],
            );
            toc.extend_from_slice(&o.bytes);
            pad4(&mut toc);
        }

        let mut out = Vec::new();
        push_words(&mut out, &[EFFECT_MAGIC, self.data.len() as u32]);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&toc);
        out
    }

    /// The same effect behind an XNA4 compiler preamble of `junk` extra bytes.
    pub fn build_xna(&self, junk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        push_words(&mut out, &[XNA4_PREAMBLE_MAGIC, 8 + junk as u32]);
        out.resize(out.len() + junk, 0xCD);
        out.extend(self.build());
        out
    }
}

/// Payload of a standalone preshader large object: the shader array name, then the preshader
/// tokens.
pub fn standalone_preshader(array: &str, tokens: &[u32]) -> Vec<u8> {
    // The tokens start right after the stored name, so the name carries its own padding.
    let mut name = array.as_bytes().to_vec();
    name.push(0);
    pad4(&mut name);
    let mut out = Vec::new();
    push_words(&mut out, &[name.len() as u32]);
    out.extend_from_slice(&name);
    push_words(&mut out, tokens);
    out
}
