//! Register, declaration and uniform analysis shared by every code generator.
//!
//! One pass over the decoded instruction stream records which registers are touched, resolves
//! relative-addressing ranges against the constant table, and lays out the packed uniform arrays
//! the runtime uploads. The emitters only format text from this data, so GLSL and assembly output
//! always agree with the [`crate::ParseData`] metadata the runtime binds against.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::decode::{
    DclUsage, DecodedInstruction, DecodedShader, Opcode, RegisterFile, RegisterRef, TextureType,
};
use crate::profile::Profile;
use crate::types::{
    Attribute, Constant, ConstantValue, ParseError, SamplerType, ShaderStage, ShaderVersion,
    Symbol, SymbolRegisterSet, Uniform, UniformType, Usage,
};
use crate::TranslateOptions;

/// Maximum nesting of `if`/`loop`/`rep` blocks.
const MAX_FLOW_CONTROL_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("{what} is not supported by the {profile} profile")]
    Unsupported { what: String, profile: Profile },
    #[error("{0}")]
    Invalid(String),
}

pub(crate) fn invalid(message: impl Into<String>) -> CodegenError {
    CodegenError::Invalid(message.into())
}

pub(crate) fn unsupported(what: impl Into<String>, profile: Profile) -> CodegenError {
    CodegenError::Unsupported {
        what: what.into(),
        profile,
    }
}

/// A relatively addressed `c#` range, uploaded as one array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConstArray {
    pub base: u32,
    pub count: u32,
    /// Every register in the range comes from `def`; the array is filled once at link time.
    pub constant: bool,
    /// First packed slot, for ranges fed from the register file.
    pub slot: Option<u32>,
}

impl ConstArray {
    pub fn contains(&self, register: u32) -> bool {
        (self.base..self.base + self.count).contains(&register)
    }

    pub fn name(&self, stage: ShaderStage) -> String {
        if self.constant {
            format!("{}_const_array_{}_{}", stage.prefix(), self.base, self.count)
        } else {
            format!("{}_c{}_array", stage.prefix(), self.base)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SamplerInfo {
    pub ty: SamplerType,
    pub texbem: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Features {
    pub lit: bool,
    pub tex_lod: bool,
    pub tex_grad: bool,
    pub derivatives: bool,
    pub depth_out: bool,
    pub multiple_render_targets: bool,
    pub max_loop_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    If,
    Loop,
    Rep,
}

pub(crate) fn varying_name(usage: Usage, index: u32) -> String {
    format!("v_{}{}", usage.name(), index)
}

pub(crate) struct ShaderAnalysis<'a> {
    pub version: ShaderVersion,
    pub profile: Profile,
    pub instructions: &'a [DecodedInstruction],
    pub options: &'a TranslateOptions,

    pub temps: BTreeSet<u32>,
    pub addrs: BTreeSet<u32>,
    pub uses_predicate: bool,
    /// Pixel `t#` registers.
    pub textures: BTreeSet<u32>,
    /// Pixel `v#` registers before ps_3_0 (interpolated colors).
    pub colors: BTreeSet<u32>,
    /// Declared `v#` registers: vertex attributes, or ps_3_0 varyings.
    pub inputs: BTreeMap<u32, (Usage, u32)>,
    pub outputs: BTreeMap<(RegisterFile, u32), (Usage, u32)>,
    /// `vPos` (0) and `vFace` (1).
    pub misc: BTreeSet<u32>,

    pub float_defs: BTreeMap<u32, [f32; 4]>,
    pub int_defs: BTreeMap<u32, [i32; 4]>,
    pub bool_defs: BTreeMap<u32, bool>,
    pub float_used: BTreeSet<u32>,
    pub int_used: BTreeSet<u32>,
    pub bool_used: BTreeSet<u32>,
    pub float_arrays: Vec<ConstArray>,

    pub samplers: BTreeMap<u32, SamplerInfo>,
    pub labels: BTreeSet<u32>,
    pub features: Features,

    pub uniforms: Vec<Uniform>,
    float_slots: BTreeMap<u32, u32>,
    int_slots: BTreeMap<u32, u32>,
    bool_slots: BTreeMap<u32, u32>,
    pub float4_count: u32,
    pub int4_count: u32,
    pub bool_count: u32,
    /// Sampler index to texbem ordinal; slot pair `float4_count + 2 * k` holds its bump matrix.
    pub texbem: BTreeMap<u32, u32>,

    pub errors: Vec<ParseError>,
}

impl<'a> ShaderAnalysis<'a> {
    pub fn new(
        shader: &'a DecodedShader,
        profile: Profile,
        symbols: &[Symbol],
        options: &'a TranslateOptions,
    ) -> Self {
        let mut a = ShaderAnalysis {
            version: shader.version,
            profile,
            instructions: &shader.instructions,
            options,
            temps: BTreeSet::new(),
            addrs: BTreeSet::new(),
            uses_predicate: false,
            textures: BTreeSet::new(),
            colors: BTreeSet::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            misc: BTreeSet::new(),
            float_defs: BTreeMap::new(),
            int_defs: BTreeMap::new(),
            bool_defs: BTreeMap::new(),
            float_used: BTreeSet::new(),
            int_used: BTreeSet::new(),
            bool_used: BTreeSet::new(),
            float_arrays: Vec::new(),
            samplers: BTreeMap::new(),
            labels: BTreeSet::new(),
            features: Features::default(),
            uniforms: Vec::new(),
            float_slots: BTreeMap::new(),
            int_slots: BTreeMap::new(),
            bool_slots: BTreeMap::new(),
            float4_count: 0,
            int4_count: 0,
            bool_count: 0,
            texbem: BTreeMap::new(),
            errors: Vec::new(),
        };

        // Declarations come first in the stream, but scan them up front anyway so that register
        // validation never depends on instruction order.
        for inst in a.instructions {
            if inst.opcode == Opcode::Dcl {
                if let Err(e) = a.declare(inst) {
                    a.error(inst, e);
                }
            }
        }

        if a.version.stage == ShaderStage::Pixel && a.version.is_sm1() {
            // ps_1_x writes its color through r0.
            a.temps.insert(0);
            a.outputs
                .insert((RegisterFile::ColorOut, 0), (Usage::Color, 0));
        }

        let mut relative = Vec::new();
        let mut calls = Vec::new();
        let mut blocks: Vec<Block> = Vec::new();

        for inst in a.instructions {
            let result = a.scan(inst, &mut relative, &mut calls, &mut blocks);
            if let Err(e) = result {
                a.error(inst, e);
            }
        }
        if !blocks.is_empty() {
            a.errors.push(ParseError {
                message: format!("{} unterminated flow control block(s)", blocks.len()),
                position: None,
            });
        }
        for (label, at) in calls {
            if !a.labels.contains(&label) {
                a.errors.push(ParseError {
                    message: format!("call to undefined label l{label}"),
                    position: Some(at),
                });
            }
        }

        a.build_arrays(symbols, &relative);
        a.build_uniforms();
        a
    }

    fn error(&mut self, inst: &DecodedInstruction, e: CodegenError) {
        self.errors.push(ParseError {
            message: e.to_string(),
            position: Some(inst.location.token_index),
        });
    }

    pub fn stage(&self) -> ShaderStage {
        self.version.stage
    }

    pub fn prefix(&self) -> &'static str {
        self.version.stage.prefix()
    }

    fn declare(&mut self, inst: &DecodedInstruction) -> Result<(), CodegenError> {
        let (Some(dst), Some(dcl)) = (inst.dst(), inst.dcl) else {
            return Err(invalid("dcl without a destination"));
        };
        let reg = &dst.reg;
        match (dcl.usage, reg.file) {
            (DclUsage::TextureType(ty), RegisterFile::Sampler) => {
                let ty = match ty {
                    TextureType::Texture2D => SamplerType::TwoD,
                    TextureType::TextureCube => SamplerType::Cube,
                    TextureType::Texture3D => SamplerType::Volume,
                };
                self.samplers
                    .insert(reg.index, SamplerInfo { ty, texbem: false });
            }
            (DclUsage::Usage(usage), RegisterFile::Input) => {
                let semantic = (usage, u32::from(dcl.usage_index));
                match self.version.stage {
                    ShaderStage::Vertex => {
                        self.inputs.insert(reg.index, semantic);
                    }
                    ShaderStage::Pixel if self.version.is_sm3() => {
                        self.inputs.insert(reg.index, semantic);
                    }
                    // ps_2_x `dcl v0` only marks an interpolated color as live.
                    ShaderStage::Pixel => {
                        self.colors.insert(reg.index);
                    }
                }
            }
            (DclUsage::Usage(_), RegisterFile::Texture) => {
                self.textures.insert(reg.index);
            }
            (DclUsage::Usage(usage), RegisterFile::Output) => {
                self.outputs.insert(
                    (RegisterFile::Output, reg.index),
                    (usage, u32::from(dcl.usage_index)),
                );
            }
            (DclUsage::Usage(_), RegisterFile::MiscType) => {
                self.misc.insert(reg.index);
            }
            (usage, file) => {
                return Err(invalid(format!("cannot declare {file:?} with {usage:?}")));
            }
        }
        Ok(())
    }

    fn scan(
        &mut self,
        inst: &DecodedInstruction,
        relative: &mut Vec<u32>,
        calls: &mut Vec<(u32, usize)>,
        blocks: &mut Vec<Block>,
    ) -> Result<(), CodegenError> {
        let at = inst.location.token_index;
        let imm = || inst.immediates().collect::<Vec<u32>>();
        match inst.opcode {
            Opcode::Comment | Opcode::End | Opcode::Phase | Opcode::Nop | Opcode::Dcl => {
                return Ok(())
            }
            Opcode::Def => {
                let index = dst_index(inst)?;
                let v = imm();
                self.float_defs.insert(
                    index,
                    [
                        f32::from_bits(v[0]),
                        f32::from_bits(v[1]),
                        f32::from_bits(v[2]),
                        f32::from_bits(v[3]),
                    ],
                );
                return Ok(());
            }
            Opcode::DefI => {
                let index = dst_index(inst)?;
                let v = imm();
                self.int_defs
                    .insert(index, [v[0] as i32, v[1] as i32, v[2] as i32, v[3] as i32]);
                return Ok(());
            }
            Opcode::DefB => {
                let index = dst_index(inst)?;
                self.bool_defs.insert(index, imm()[0] != 0);
                return Ok(());
            }
            Opcode::Label => {
                if !blocks.is_empty() {
                    return Err(invalid("label inside a flow control block"));
                }
                let label = src_index(inst, 0)?;
                if !self.labels.insert(label) {
                    return Err(invalid(format!("label l{label} defined twice")));
                }
                return Ok(());
            }
            Opcode::Call | Opcode::CallNz => {
                calls.push((src_index(inst, 0)?, at));
            }
            Opcode::If | Opcode::Ifc => blocks.push(Block::If),
            Opcode::Else => {
                if blocks.last() != Some(&Block::If) {
                    return Err(invalid("else without if"));
                }
            }
            Opcode::EndIf => pop_block(blocks, Block::If, "endif")?,
            Opcode::Loop => {
                blocks.push(Block::Loop);
                let depth = blocks.iter().filter(|b| **b == Block::Loop).count();
                self.features.max_loop_depth = self.features.max_loop_depth.max(depth);
            }
            Opcode::Rep => blocks.push(Block::Rep),
            Opcode::EndLoop => pop_block(blocks, Block::Loop, "endloop")?,
            Opcode::EndRep => pop_block(blocks, Block::Rep, "endrep")?,
            Opcode::Break | Opcode::Breakc | Opcode::BreakP => {
                if !blocks.iter().any(|b| matches!(b, Block::Loop | Block::Rep)) {
                    return Err(invalid("break outside of a loop"));
                }
            }
            Opcode::Lit => self.features.lit = true,
            Opcode::Dsx | Opcode::Dsy => self.features.derivatives = true,
            Opcode::TexLdl => self.features.tex_lod = true,
            Opcode::TexLdd => self.features.tex_grad = true,
            Opcode::Unknown(raw) => return Err(invalid(format!("unknown opcode {raw}"))),
            _ => {}
        }
        if blocks.len() > MAX_FLOW_CONTROL_DEPTH {
            return Err(invalid("flow control nests too deeply"));
        }

        self.scan_samplers(inst)?;

        if let Some(pred) = &inst.predicate {
            self.note_register(&pred.reg, false, relative)?;
        }
        for op in &inst.operands {
            match op {
                crate::decode::Operand::Dst(dst) => self.note_register(&dst.reg, true, relative)?,
                crate::decode::Operand::Src(src) => self.note_register(&src.reg, false, relative)?,
                crate::decode::Operand::Imm32(_) => {}
            }
        }
        // `m4x4` and friends read consecutive registers after the named one.
        let extra = match inst.opcode {
            Opcode::M4x4 | Opcode::M3x4 => 3,
            Opcode::M4x3 | Opcode::M3x3 => 2,
            Opcode::M3x2 => 1,
            _ => 0,
        };
        if let Some(src) = inst.src(1) {
            for k in 1..=extra {
                let mut reg = src.reg.clone();
                reg.index += k;
                self.note_register(&reg, false, relative)?;
            }
        }
        Ok(())
    }

    fn scan_samplers(&mut self, inst: &DecodedInstruction) -> Result<(), CodegenError> {
        let ps_1_x = self.version.stage == ShaderStage::Pixel && self.version.is_sm1();
        match inst.opcode {
            Opcode::Tex | Opcode::TexLdl | Opcode::TexLdd if !ps_1_x => {
                let sampler = src_index(inst, 1)?;
                if !self.samplers.contains_key(&sampler) {
                    return Err(invalid(format!("sampler s{sampler} used without dcl")));
                }
            }
            Opcode::Tex
            | Opcode::TexBem
            | Opcode::TexBemL
            | Opcode::TexReg2Ar
            | Opcode::TexReg2Gb
            | Opcode::TexReg2Rgb
            | Opcode::TexM3x2Tex
            | Opcode::TexM3x3Tex
            | Opcode::TexM3x3Spec
            | Opcode::TexM3x3VSpec
            | Opcode::TexDp3Tex => {
                let stage = dst_index(inst)?;
                let default = match inst.opcode {
                    Opcode::TexM3x3Tex | Opcode::TexM3x3Spec | Opcode::TexM3x3VSpec => {
                        SamplerType::Cube
                    }
                    _ => SamplerType::TwoD,
                };
                let ty = self
                    .options
                    .sampler_map
                    .iter()
                    .find(|m| m.index == stage)
                    .map(|m| m.ty)
                    .unwrap_or(default);
                let texbem = matches!(inst.opcode, Opcode::TexBem | Opcode::TexBemL);
                let entry = self
                    .samplers
                    .entry(stage)
                    .or_insert(SamplerInfo { ty, texbem: false });
                entry.texbem |= texbem;
            }
            _ => {}
        }
        Ok(())
    }

    fn note_register(
        &mut self,
        reg: &RegisterRef,
        write: bool,
        relative: &mut Vec<u32>,
    ) -> Result<(), CodegenError> {
        let stage = self.version.stage;
        let index = reg.index;
        if let Some(rel) = &reg.relative {
            match rel.file {
                RegisterFile::Addr => {
                    self.addrs.insert(rel.index);
                }
                RegisterFile::Loop => {}
                other => return Err(invalid(format!("relative addressing through {other:?}"))),
            }
            if reg.file != RegisterFile::Const {
                return Err(unsupported(
                    format!("relative addressing of {:?} registers", reg.file),
                    self.profile,
                ));
            }
        }
        match reg.file {
            RegisterFile::Temp => {
                self.temps.insert(index);
            }
            RegisterFile::Input => match stage {
                ShaderStage::Vertex if !self.inputs.contains_key(&index) => {
                    return Err(invalid(format!("input v{index} used without dcl")));
                }
                ShaderStage::Pixel if self.version.is_sm3() && !self.inputs.contains_key(&index) => {
                    return Err(invalid(format!("input v{index} used without dcl")));
                }
                ShaderStage::Pixel if !self.version.is_sm3() => {
                    self.colors.insert(index);
                }
                _ => {}
            },
            RegisterFile::Const => {
                if reg.relative.is_some() {
                    relative.push(index);
                } else {
                    self.float_used.insert(index);
                }
            }
            RegisterFile::Addr => {
                self.addrs.insert(index);
            }
            RegisterFile::Texture => {
                self.textures.insert(index);
            }
            RegisterFile::RastOut => {
                let usage = match index {
                    0 => Usage::Position,
                    1 => Usage::Fog,
                    2 => Usage::PointSize,
                    _ => return Err(invalid(format!("unknown rasterizer output {index}"))),
                };
                self.outputs.insert((reg.file, index), (usage, 0));
            }
            RegisterFile::AttrOut => {
                self.outputs.insert((reg.file, index), (Usage::Color, index));
            }
            RegisterFile::TexCoordOut => {
                self.outputs
                    .insert((reg.file, index), (Usage::TexCoord, index));
            }
            RegisterFile::Output => {
                if !self.outputs.contains_key(&(reg.file, index)) {
                    return Err(invalid(format!("output o{index} used without dcl")));
                }
            }
            RegisterFile::ColorOut => {
                if index > 0 {
                    self.features.multiple_render_targets = true;
                }
                self.outputs.insert((reg.file, index), (Usage::Color, index));
            }
            RegisterFile::DepthOut => {
                self.features.depth_out = true;
                self.outputs.insert((reg.file, index), (Usage::Depth, 0));
            }
            RegisterFile::ConstInt => {
                self.int_used.insert(index);
            }
            RegisterFile::ConstBool => {
                self.bool_used.insert(index);
            }
            RegisterFile::Predicate => self.uses_predicate = true,
            RegisterFile::MiscType => {
                self.misc.insert(index);
            }
            RegisterFile::Sampler | RegisterFile::Loop | RegisterFile::Label => {}
        }
        if write
            && matches!(
                reg.file,
                RegisterFile::Const | RegisterFile::ConstInt | RegisterFile::ConstBool
            )
        {
            return Err(invalid("constant registers are read-only"));
        }
        Ok(())
    }

    /// Highest `c#` count addressable by the shader model, used when no constant-table symbol
    /// bounds a relative access.
    fn float_register_count(&self) -> u32 {
        match (self.version.stage, self.version.major) {
            (ShaderStage::Vertex, 1) => 96,
            (ShaderStage::Vertex, _) => 256,
            (ShaderStage::Pixel, 3) => 224,
            (ShaderStage::Pixel, 2) => 32,
            (ShaderStage::Pixel, _) => 8,
        }
    }

    fn build_arrays(&mut self, symbols: &[Symbol], relative: &[u32]) {
        let mut ranges: Vec<(u32, u32)> = relative
            .iter()
            .map(|&index| {
                symbols
                    .iter()
                    .find(|s| {
                        s.register_set == SymbolRegisterSet::Float4
                            && (s.register_index..s.register_index + s.register_count)
                                .contains(&index)
                    })
                    .map(|s| (s.register_index, s.register_count))
                    .unwrap_or_else(|| (0, self.float_register_count().max(index + 1)))
            })
            .collect();
        ranges.sort_unstable();

        let mut merged: Vec<(u32, u32)> = Vec::new();
        for (base, count) in ranges {
            match merged.last_mut() {
                Some((b, c)) if base <= *b + *c => *c = (*c).max(base + count - *b),
                _ => merged.push((base, count)),
            }
        }

        self.float_arrays = merged
            .into_iter()
            .map(|(base, count)| ConstArray {
                base,
                count,
                constant: (base..base + count).all(|r| self.float_defs.contains_key(&r)),
                slot: None,
            })
            .collect();
    }

    fn build_uniforms(&mut self) {
        let prefix = self.prefix();

        let mut floats: Vec<Uniform> = self
            .float_used
            .iter()
            .filter(|r| !self.float_defs.contains_key(r))
            .filter(|r| !self.float_arrays.iter().any(|a| a.contains(**r)))
            .map(|&index| Uniform {
                ty: UniformType::Float,
                index,
                array_count: 0,
                constant: false,
                name: format!("{prefix}_c{index}"),
            })
            .collect();
        floats.extend(self.float_arrays.iter().map(|a| Uniform {
            ty: UniformType::Float,
            index: a.base,
            array_count: a.count,
            constant: a.constant,
            name: a.name(self.version.stage),
        }));
        floats.sort_by_key(|u| u.index);

        let mut slot = 0;
        for u in &floats {
            if u.constant {
                continue;
            }
            if u.array_count == 0 {
                self.float_slots.insert(u.index, slot);
                slot += 1;
            } else {
                if let Some(a) = self.float_arrays.iter_mut().find(|a| a.base == u.index) {
                    a.slot = Some(slot);
                }
                slot += u.array_count;
            }
        }
        self.float4_count = slot;

        let ints: Vec<Uniform> = self
            .int_used
            .iter()
            .filter(|r| !self.int_defs.contains_key(r))
            .map(|&index| Uniform {
                ty: UniformType::Int,
                index,
                array_count: 0,
                constant: false,
                name: format!("{prefix}_i{index}"),
            })
            .collect();
        for (slot, u) in ints.iter().enumerate() {
            self.int_slots.insert(u.index, slot as u32);
        }
        self.int4_count = ints.len() as u32;

        let bools: Vec<Uniform> = self
            .bool_used
            .iter()
            .filter(|r| !self.bool_defs.contains_key(r))
            .map(|&index| Uniform {
                ty: UniformType::Bool,
                index,
                array_count: 0,
                constant: false,
                name: format!("{prefix}_b{index}"),
            })
            .collect();
        for (slot, u) in bools.iter().enumerate() {
            self.bool_slots.insert(u.index, slot as u32);
        }
        self.bool_count = bools.len() as u32;

        self.texbem = self
            .samplers
            .iter()
            .filter(|(_, s)| s.texbem)
            .enumerate()
            .map(|(k, (&index, _))| (index, k as u32))
            .collect();

        self.uniforms = floats;
        self.uniforms.extend(ints);
        self.uniforms.extend(bools);
    }

    /// Packed `vec4` slot that holds `c{register}`, when it is fed from the register file.
    pub fn float_slot(&self, register: u32) -> Option<u32> {
        if let Some(&slot) = self.float_slots.get(&register) {
            return Some(slot);
        }
        self.float_arrays
            .iter()
            .find(|a| a.contains(register))
            .and_then(|a| a.slot.map(|s| s + register - a.base))
    }

    pub fn int_slot(&self, register: u32) -> Option<u32> {
        self.int_slots.get(&register).copied()
    }

    pub fn bool_slot(&self, register: u32) -> Option<u32> {
        self.bool_slots.get(&register).copied()
    }

    pub fn array_containing(&self, register: u32) -> Option<&ConstArray> {
        self.float_arrays.iter().find(|a| a.contains(register))
    }

    /// Packed slot of the bump matrix for `sampler`; the luminance pair follows it.
    pub fn texbem_slot(&self, sampler: u32) -> Option<u32> {
        self.texbem
            .get(&sampler)
            .map(|k| self.float4_count + 2 * k)
    }

    pub fn is_ps_1_x(&self) -> bool {
        self.version.stage == ShaderStage::Pixel && self.version.is_sm1()
    }

    /// Whether a pixel `t#` read names the interpolated coordinate rather than a loaded value.
    pub fn texture_is_varying(&self) -> bool {
        !(self.is_ps_1_x() && self.version.minor < 4)
    }

    pub fn constants(&self) -> Vec<Constant> {
        let floats = self.float_defs.iter().map(|(&index, &v)| Constant {
            index,
            value: ConstantValue::Float(v),
        });
        let ints = self.int_defs.iter().map(|(&index, &v)| Constant {
            index,
            value: ConstantValue::Int(v),
        });
        let bools = self.bool_defs.iter().map(|(&index, &v)| Constant {
            index,
            value: ConstantValue::Bool(v),
        });
        floats.chain(ints).chain(bools).collect()
    }

    /// Shader inputs: vertex attributes, or the varyings a pixel shader consumes.
    pub fn attributes(&self) -> Vec<Attribute> {
        let mut out: Vec<Attribute> = self
            .inputs
            .iter()
            .map(|(&register, &(usage, index))| Attribute {
                usage,
                index,
                register,
                name: match self.version.stage {
                    ShaderStage::Vertex => format!("vs_v{register}"),
                    ShaderStage::Pixel => varying_name(usage, index),
                },
            })
            .collect();
        if self.version.stage == ShaderStage::Pixel && !self.version.is_sm3() {
            out.extend(self.colors.iter().map(|&register| Attribute {
                usage: Usage::Color,
                index: register,
                register,
                name: varying_name(Usage::Color, register),
            }));
            out.extend(self.textures.iter().map(|&register| Attribute {
                usage: Usage::TexCoord,
                index: register,
                register,
                name: varying_name(Usage::TexCoord, register),
            }));
        }
        out
    }

    pub fn output_attributes(&self) -> Vec<Attribute> {
        self.outputs
            .iter()
            .map(|(&(file, register), &(usage, index))| Attribute {
                usage,
                index,
                register,
                name: self.output_binding(file, register, usage, index),
            })
            .collect()
    }

    /// GLSL name the output is finally written to.
    pub fn output_binding(&self, file: RegisterFile, register: u32, usage: Usage, index: u32) -> String {
        match (file, usage) {
            (RegisterFile::ColorOut, _) if self.features.multiple_render_targets => {
                format!("gl_FragData[{register}]")
            }
            (RegisterFile::ColorOut, _) => "gl_FragColor".to_owned(),
            (RegisterFile::DepthOut, _) if self.profile == Profile::GlslEs => {
                "gl_FragDepthEXT".to_owned()
            }
            (RegisterFile::DepthOut, _) => "gl_FragDepth".to_owned(),
            (_, Usage::Position) if index == 0 => "gl_Position".to_owned(),
            (_, Usage::PointSize) => "gl_PointSize".to_owned(),
            _ => varying_name(usage, index),
        }
    }
}

fn dst_index(inst: &DecodedInstruction) -> Result<u32, CodegenError> {
    inst.dst()
        .map(|d| d.reg.index)
        .ok_or_else(|| invalid(format!("{} without a destination", inst.opcode.name())))
}

fn src_index(inst: &DecodedInstruction, n: usize) -> Result<u32, CodegenError> {
    inst.src(n)
        .map(|s| s.reg.index)
        .ok_or_else(|| invalid(format!("{} is missing source {n}", inst.opcode.name())))
}

fn pop_block(blocks: &mut Vec<Block>, want: Block, name: &str) -> Result<(), CodegenError> {
    match blocks.pop() {
        Some(b) if b == want => Ok(()),
        _ => Err(invalid(format!("{name} without a matching opener"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_u32_tokens;
    use pretty_assertions::assert_eq;

    fn reg_token(regtype: u32, index: u32) -> u32 {
        0x8000_0000 | ((regtype & 7) << 28) | ((regtype & 0x18) << 8) | index
    }

    #[test]
    fn relative_range_without_symbols_covers_the_register_file() {
        // vs_2_0: mova a0.x, c0.x ; mov oPos, c4[a0.x] ; mov oD0, c2
        let tokens = [
            0xFFFE_0200,
            0x2E | (2 << 24),
            reg_token(3, 0) | (0x1 << 16),
            reg_token(2, 0),
            0x01 | (3 << 24),
            reg_token(4, 0) | (0xF << 16),
            reg_token(2, 4) | (0xE4 << 16) | 0x2000,
            reg_token(3, 0),
            0x01 | (2 << 24),
            reg_token(5, 0) | (0xF << 16),
            reg_token(2, 2) | (0xE4 << 16),
            0x0000_FFFF,
        ];
        let shader = decode_u32_tokens(&tokens).unwrap();
        let options = TranslateOptions::default();
        let a = ShaderAnalysis::new(&shader, Profile::Glsl, &[], &options);
        assert!(a.errors.is_empty(), "{:?}", a.errors);
        assert_eq!(a.float_arrays.len(), 1);
        assert_eq!(a.float_arrays[0].count, 256);
        // c0 and c2 fall inside the array, so only one float uniform exists.
        assert_eq!(a.uniforms.len(), 1);
        assert_eq!(a.float_slot(2), Some(2));
        assert_eq!(a.float4_count, 256);
    }

    #[test]
    fn unbalanced_flow_control_is_reported() {
        // vs_2_0: endif ; end
        let tokens = [0xFFFE_0200, 0x2B, 0x0000_FFFF];
        let shader = decode_u32_tokens(&tokens).unwrap();
        let options = TranslateOptions::default();
        let a = ShaderAnalysis::new(&shader, Profile::Glsl, &[], &options);
        assert_eq!(a.errors.len(), 1);
        assert!(a.errors[0].message.contains("endif"));
    }
}
