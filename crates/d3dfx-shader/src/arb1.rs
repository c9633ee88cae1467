//! Assembly emitter for `arb1` and the NV option profiles (`nv2`, `nv3`, `nv4`).
//!
//! Float constants live in `program.local[]`, packed in the same slot order the GLSL emitter uses
//! for its uniform array, followed by two slots per texbem sampler. `def` constants are baked into
//! the program text. Flow control, integer and boolean registers have no ARB1 equivalent and are
//! reported as unsupported.

use std::fmt::Write;

use crate::analysis::{invalid, unsupported, CodegenError, ShaderAnalysis};
use crate::decode::{
    DecodedInstruction, Opcode, RegisterFile, RegisterRef, ResultShift, SrcModifier, SrcOperand,
    Swizzle, SwizzleComponent,
};
use crate::glsl::format_f32;
use crate::profile::Profile;
use crate::types::{ParseError, SamplerType, ShaderStage, Usage};

/// Scratch temporaries used to expand source modifiers and multi-step opcodes.
const SCRATCH_COUNT: usize = 6;
/// Holds the unmodified result when a shift or vertex saturate has to be applied separately.
const RESULT_SCRATCH: usize = 4;
/// Working register for opcodes that expand into several instructions.
const WORK_SCRATCH: usize = 5;

fn splat(v: f32) -> String {
    let v = format_f32(v);
    format!("{{{v}, {v}, {v}, {v}}}")
}

/// A source operand after modifier expansion.
struct ArbOperand {
    negate: bool,
    base: String,
    swizzle: Swizzle,
}

impl ArbOperand {
    fn vector(&self) -> String {
        let neg = if self.negate { "-" } else { "" };
        if self.swizzle.is_identity() {
            format!("{neg}{}", self.base)
        } else {
            let s: String = self.swizzle.0.iter().map(|c| c.letter()).collect();
            format!("{neg}{}.{s}", self.base)
        }
    }

    fn scalar(&self) -> String {
        let neg = if self.negate { "-" } else { "" };
        format!("{neg}{}.{}", self.base, self.swizzle.0[0].letter())
    }
}

struct ArbWriter<'a, 'b> {
    a: &'b ShaderAnalysis<'a>,
    p: &'static str,
    body: String,
    errors: Vec<ParseError>,
}

pub(crate) fn emit(a: &ShaderAnalysis<'_>) -> (String, Vec<ParseError>) {
    let mut w = ArbWriter {
        a,
        p: a.prefix(),
        body: String::new(),
        errors: Vec::new(),
    };

    let header = match w.header() {
        Ok(header) => header,
        Err(e) => {
            w.errors.push(ParseError {
                message: e.to_string(),
                position: None,
            });
            String::new()
        }
    };
    for inst in a.instructions {
        if let Err(e) = w.instruction(inst) {
            w.errors.push(ParseError {
                message: e.to_string(),
                position: Some(inst.location.token_index),
            });
        }
    }
    w.epilogue();
    w.body.push_str("END\n");

    let mut out = header;
    out.push_str(&w.body);
    (out, w.errors)
}

impl ArbWriter<'_, '_> {
    fn line(&mut self, text: impl AsRef<str>) {
        self.body.push_str(text.as_ref());
        self.body.push_str(";\n");
    }

    fn profile(&self) -> Profile {
        self.a.profile
    }

    fn is_pixel(&self) -> bool {
        self.a.stage() == ShaderStage::Pixel
    }

    fn scratch(&self, n: usize) -> String {
        format!("{}_scratch{n}", self.p)
    }

    fn header(&self) -> Result<String, CodegenError> {
        let a = self.a;
        let p = self.p;
        let profile = self.profile();
        let mut h = String::new();
        match (profile, a.stage()) {
            (Profile::Nv4, ShaderStage::Vertex) => h.push_str("!!NVvp4.0\n"),
            (Profile::Nv4, ShaderStage::Pixel) => h.push_str("!!NVfp4.0\n"),
            (_, ShaderStage::Vertex) => h.push_str("!!ARBvp1.0\n"),
            (_, ShaderStage::Pixel) => h.push_str("!!ARBfp1.0\n"),
        }
        match (profile, a.stage()) {
            (Profile::Nv2, ShaderStage::Vertex) => h.push_str("OPTION NV_vertex_program2;\n"),
            (Profile::Nv3, ShaderStage::Vertex) => h.push_str("OPTION NV_vertex_program3;\n"),
            (Profile::Nv2 | Profile::Nv3, ShaderStage::Pixel) => {
                h.push_str("OPTION NV_fragment_program2;\n")
            }
            _ => {}
        }
        if a.features.multiple_render_targets {
            h.push_str("OPTION ARB_draw_buffers;\n");
        }

        if !a.int_used.is_empty() {
            return Err(unsupported("integer constants", profile));
        }
        if !a.bool_used.is_empty() {
            return Err(unsupported("boolean constants", profile));
        }

        let locals = a.float4_count + 2 * a.texbem.len() as u32;
        if locals > 0 {
            let _ = writeln!(
                h,
                "PARAM {p}_uniforms[{locals}] = {{ program.local[0..{}] }};",
                locals - 1
            );
        }
        for &r in &a.float_used {
            if let Some(v) = a.float_defs.get(&r) {
                let _ = writeln!(
                    h,
                    "PARAM {p}_c{r} = {{ {}, {}, {}, {} }};",
                    format_f32(v[0]),
                    format_f32(v[1]),
                    format_f32(v[2]),
                    format_f32(v[3])
                );
            }
        }
        for array in a.float_arrays.iter().filter(|arr| arr.constant) {
            let rows: Vec<String> = (array.base..array.base + array.count)
                .map(|r| {
                    let v = a.float_defs.get(&r).copied().unwrap_or_default();
                    format!(
                        "{{ {}, {}, {}, {} }}",
                        format_f32(v[0]),
                        format_f32(v[1]),
                        format_f32(v[2]),
                        format_f32(v[3])
                    )
                })
                .collect();
            let _ = writeln!(
                h,
                "PARAM {}[{}] = {{ {} }};",
                array.name(a.stage()),
                array.count,
                rows.join(", ")
            );
        }

        if a.stage() == ShaderStage::Vertex {
            for register in a.inputs.keys() {
                let _ = writeln!(h, "ATTRIB {p}_v{register} = vertex.attrib[{register}];");
            }
        }
        for &(file, register) in a.outputs.keys() {
            if a.is_ps_1_x() || file == RegisterFile::DepthOut {
                continue;
            }
            let name = self.output_name(file, register)?;
            let result = self.output_binding(file, register)?;
            let _ = writeln!(h, "OUTPUT {name} = {result};");
        }

        let mut temps: Vec<String> = a.temps.iter().map(|r| format!("{p}_r{r}")).collect();
        if !a.texture_is_varying() {
            temps.extend(a.textures.iter().map(|r| format!("{p}_t{r}")));
        }
        if a.outputs.contains_key(&(RegisterFile::DepthOut, 0)) {
            temps.push(format!("{p}_oDepth"));
        }
        temps.extend((0..SCRATCH_COUNT).map(|n| self.scratch(n)));
        let _ = writeln!(h, "TEMP {};", temps.join(", "));

        if !a.addrs.is_empty() {
            if self.is_pixel() {
                return Err(unsupported("relative addressing in fragment programs", profile));
            }
            let addrs: Vec<String> = a.addrs.iter().map(|r| format!("{p}_a{r}")).collect();
            let _ = writeln!(h, "ADDRESS {};", addrs.join(", "));
        }
        Ok(h)
    }

    fn epilogue(&mut self) {
        let p = self.p;
        if self.a.is_ps_1_x() {
            self.line(format!("MOV result.color, {p}_r0"));
        } else if self.a.outputs.contains_key(&(RegisterFile::DepthOut, 0)) {
            self.line(format!("MOV result.depth.z, {p}_oDepth.x"));
        }
    }

    fn output_name(&self, file: RegisterFile, register: u32) -> Result<String, CodegenError> {
        let p = self.p;
        Ok(match file {
            RegisterFile::RastOut => match register {
                0 => format!("{p}_oPos"),
                1 => format!("{p}_oFog"),
                _ => format!("{p}_oPts"),
            },
            RegisterFile::AttrOut => format!("{p}_oD{register}"),
            RegisterFile::TexCoordOut => format!("{p}_oT{register}"),
            RegisterFile::Output => format!("{p}_o{register}"),
            RegisterFile::ColorOut => format!("{p}_oC{register}"),
            RegisterFile::DepthOut => format!("{p}_oDepth"),
            other => return Err(invalid(format!("{other:?} is not an output"))),
        })
    }

    fn output_binding(&self, file: RegisterFile, register: u32) -> Result<String, CodegenError> {
        let usage = self
            .a
            .outputs
            .get(&(file, register))
            .copied()
            .unwrap_or((Usage::Color, register));
        let color = |index: u32| match index {
            0 => Ok("result.color.primary".to_owned()),
            1 => Ok("result.color.secondary".to_owned()),
            _ => Err(unsupported(format!("color output {index}"), self.profile())),
        };
        match (file, usage) {
            (RegisterFile::ColorOut, _) if self.a.features.multiple_render_targets => {
                Ok(format!("result.color[{register}]"))
            }
            (RegisterFile::ColorOut, _) => Ok("result.color".to_owned()),
            (RegisterFile::AttrOut, _) => color(register),
            (RegisterFile::TexCoordOut, _) => Ok(format!("result.texcoord[{register}]")),
            (_, (Usage::Position, 0)) => Ok("result.position".to_owned()),
            (_, (Usage::Fog, _)) => Ok("result.fogcoord".to_owned()),
            (_, (Usage::PointSize, _)) => Ok("result.pointsize".to_owned()),
            (_, (Usage::Color, index)) => color(index),
            (_, (Usage::TexCoord, index)) => Ok(format!("result.texcoord[{index}]")),
            (_, (usage, index)) => Err(unsupported(
                format!("{}{index} output", usage.name()),
                self.profile(),
            )),
        }
    }

    fn input_binding(&self, register: u32) -> Result<String, CodegenError> {
        let (usage, index) = self
            .a
            .inputs
            .get(&register)
            .copied()
            .unwrap_or((Usage::Color, register));
        match (usage, index) {
            (Usage::Color, 0) => Ok("fragment.color.primary".to_owned()),
            (Usage::Color, 1) => Ok("fragment.color.secondary".to_owned()),
            (Usage::TexCoord, index) => Ok(format!("fragment.texcoord[{index}]")),
            (Usage::Fog, _) => Ok("fragment.fogcoord".to_owned()),
            (usage, index) => Err(unsupported(
                format!("{}{index} input", usage.name()),
                self.profile(),
            )),
        }
    }

    fn reg_name(&self, reg: &RegisterRef) -> Result<String, CodegenError> {
        let a = self.a;
        let p = self.p;
        let index = reg.index;
        if let Some(rel) = &reg.relative {
            if rel.file != RegisterFile::Addr {
                return Err(unsupported("loop-relative addressing", self.profile()));
            }
            if rel.component != SwizzleComponent::X && !self.profile().has_nv_extensions() {
                return Err(unsupported("address components other than x", self.profile()));
            }
            let addr = format!("{p}_a{}.{}", rel.index, rel.component.letter());
            let array = a
                .array_containing(index)
                .ok_or_else(|| invalid(format!("c{index} is not in a relative range")))?;
            let offset = index - array.base;
            return Ok(match array.slot {
                Some(slot) => format!("{p}_uniforms[{addr} + {}]", slot + offset),
                None => format!("{}[{addr} + {offset}]", array.name(a.stage())),
            });
        }
        Ok(match reg.file {
            RegisterFile::Temp => format!("{p}_r{index}"),
            RegisterFile::Input => match a.stage() {
                ShaderStage::Vertex => format!("{p}_v{index}"),
                ShaderStage::Pixel => self.input_binding(index)?,
            },
            RegisterFile::Const if a.float_defs.contains_key(&index) => format!("{p}_c{index}"),
            RegisterFile::Const => {
                let slot = a
                    .float_slot(index)
                    .ok_or_else(|| invalid(format!("c{index} has no uniform slot")))?;
                format!("{p}_uniforms[{slot}]")
            }
            RegisterFile::Addr => format!("{p}_a{index}"),
            RegisterFile::Texture if a.texture_is_varying() => {
                format!("fragment.texcoord[{index}]")
            }
            RegisterFile::Texture => format!("{p}_t{index}"),
            RegisterFile::MiscType if index == 0 => "fragment.position".to_owned(),
            RegisterFile::MiscType if self.profile().has_nv_extensions() => {
                "fragment.facing".to_owned()
            }
            RegisterFile::RastOut
            | RegisterFile::AttrOut
            | RegisterFile::TexCoordOut
            | RegisterFile::Output
            | RegisterFile::ColorOut
            | RegisterFile::DepthOut => self.output_name(reg.file, index)?,
            other => {
                return Err(unsupported(
                    format!("{} registers", other.short_name()),
                    self.profile(),
                ))
            }
        })
    }

    /// Resolves a source, expanding modifiers ARB has no syntax for into `scratch{slot}`.
    fn src(&mut self, src: &SrcOperand, slot: usize) -> Result<ArbOperand, CodegenError> {
        let base = self.reg_name(&src.reg)?;
        let mut swizzle = src.swizzle;
        if src.reg.file == RegisterFile::Input && self.a.stage() == ShaderStage::Vertex {
            if let Some(&(usage, index)) = self.a.inputs.get(&src.reg.index) {
                let remap = self
                    .a
                    .options
                    .swizzles
                    .iter()
                    .find(|s| s.usage == usage && s.index == index);
                if let Some(remap) = remap {
                    let attr = Swizzle(remap.swizzles.map(SwizzleComponent::from_index));
                    swizzle = attr.then(swizzle);
                }
            }
        }
        let plain = ArbOperand {
            negate: false,
            base,
            swizzle,
        };
        let s = self.scratch(slot);
        let v = plain.vector();
        let scratch = |negate| ArbOperand {
            negate,
            base: s.clone(),
            swizzle: Swizzle::identity(),
        };
        Ok(match src.modifier {
            SrcModifier::None => plain,
            SrcModifier::Negate => ArbOperand {
                negate: true,
                ..plain
            },
            SrcModifier::Bias | SrcModifier::BiasNegate => {
                self.line(format!("SUB {s}, {v}, {}", splat(0.5)));
                scratch(src.modifier == SrcModifier::BiasNegate)
            }
            SrcModifier::Sign | SrcModifier::SignNegate => {
                // Two steps: an instruction may reference only one inline constant.
                self.line(format!("ADD {s}, {v}, {v}"));
                self.line(format!("SUB {s}, {s}, {}", splat(1.0)));
                scratch(src.modifier == SrcModifier::SignNegate)
            }
            SrcModifier::Comp => {
                self.line(format!("SUB {s}, {}, {v}", splat(1.0)));
                scratch(false)
            }
            SrcModifier::X2 | SrcModifier::X2Negate => {
                self.line(format!("ADD {s}, {v}, {v}"));
                scratch(src.modifier == SrcModifier::X2Negate)
            }
            SrcModifier::Abs | SrcModifier::AbsNegate => {
                self.line(format!("ABS {s}, {v}"));
                scratch(src.modifier == SrcModifier::AbsNegate)
            }
            SrcModifier::Dz | SrcModifier::Dw | SrcModifier::Not => {
                return Err(unsupported(
                    format!("source modifier {:?}", src.modifier),
                    self.profile(),
                ))
            }
        })
    }

    fn srcs(&mut self, inst: &DecodedInstruction, count: usize) -> Result<Vec<ArbOperand>, CodegenError> {
        (0..count).map(|n| self.src_at(inst, n)).collect()
    }

    fn src_at(&mut self, inst: &DecodedInstruction, n: usize) -> Result<ArbOperand, CodegenError> {
        let src = inst
            .src(n)
            .ok_or_else(|| invalid(format!("{} is missing source {n}", inst.opcode.name())))?;
        self.src(src, n)
    }

    /// `texture[n], TARGET` for the sampler in source 1 of a texld-family instruction.
    fn sampler_operand(&self, inst: &DecodedInstruction) -> Result<String, CodegenError> {
        let sampler = inst
            .src(1)
            .ok_or_else(|| invalid(format!("{} without a sampler", inst.opcode.name())))?;
        self.texture_target(sampler.reg.index)
    }

    fn dst(&self, inst: &DecodedInstruction) -> Result<String, CodegenError> {
        let dst = inst
            .dst()
            .ok_or_else(|| invalid(format!("{} without a destination", inst.opcode.name())))?;
        let name = self.reg_name(&dst.reg)?;
        Ok(if dst.mask.is_all() {
            name
        } else {
            format!("{name}.{}", dst.mask.suffix())
        })
    }

    /// Emits `opcode dst, operands` honoring the instruction's result modifiers.
    fn write(&mut self, inst: &DecodedInstruction, opcode: &str, operands: &[String]) -> Result<(), CodegenError> {
        if inst.predicate.is_some() {
            return Err(unsupported("predicated instructions", self.profile()));
        }
        let dst = self.dst(inst)?;
        let ops = operands.join(", ");
        let m = inst.result_modifier;
        let scale = match m.shift {
            ResultShift::None => None,
            ResultShift::Mul2 => Some(2.0),
            ResultShift::Mul4 => Some(4.0),
            ResultShift::Mul8 => Some(8.0),
            ResultShift::Div2 => Some(0.5),
            ResultShift::Div4 => Some(0.25),
            ResultShift::Div8 => Some(0.125),
        };
        if scale.is_none() && (!m.saturate || self.is_pixel()) {
            let sat = if m.saturate { "_SAT" } else { "" };
            self.line(format!("{opcode}{sat} {dst}, {ops}"));
            return Ok(());
        }

        let s = self.scratch(RESULT_SCRATCH);
        self.line(format!("{opcode} {s}, {ops}"));
        if let Some(scale) = scale {
            self.line(format!("MUL {s}, {s}, {}", splat(scale)));
        }
        match (m.saturate, self.is_pixel()) {
            (true, true) => self.line(format!("MOV_SAT {dst}, {s}")),
            (true, false) => {
                self.line(format!("MAX {s}, {s}, {}", splat(0.0)));
                self.line(format!("MIN {dst}, {s}, {}", splat(1.0)));
            }
            (false, _) => self.line(format!("MOV {dst}, {s}")),
        }
        Ok(())
    }

    fn texture_target(&self, sampler: u32) -> Result<String, CodegenError> {
        let info = self
            .a
            .samplers
            .get(&sampler)
            .ok_or_else(|| invalid(format!("sampler s{sampler} is not declared")))?;
        let target = match info.ty {
            SamplerType::TwoD => "2D",
            SamplerType::Cube => "CUBE",
            SamplerType::Volume => "3D",
        };
        Ok(format!("texture[{sampler}], {target}"))
    }

    fn need_nv(&self, what: &str) -> Result<(), CodegenError> {
        if self.profile().has_nv_extensions() {
            Ok(())
        } else {
            Err(unsupported(what, self.profile()))
        }
    }

    fn need_pixel(&self, what: &str) -> Result<(), CodegenError> {
        if self.is_pixel() {
            Ok(())
        } else {
            Err(unsupported(format!("{what} in vertex programs"), self.profile()))
        }
    }

    fn texcoord(stage: u32) -> String {
        format!("fragment.texcoord[{stage}]")
    }

    fn dst_index(inst: &DecodedInstruction) -> Result<u32, CodegenError> {
        inst.dst()
            .map(|d| d.reg.index)
            .ok_or_else(|| invalid(format!("{} without a destination", inst.opcode.name())))
    }

    fn instruction(&mut self, inst: &DecodedInstruction) -> Result<(), CodegenError> {
        let p = self.p;
        let ps_1_x = self.a.is_ps_1_x();
        let work = self.scratch(WORK_SCRATCH);

        let simple = |opcode: Opcode| -> Option<(&'static str, usize)> {
            Some(match opcode {
                Opcode::Mov => ("MOV", 1),
                Opcode::Add => ("ADD", 2),
                Opcode::Sub => ("SUB", 2),
                Opcode::Mad => ("MAD", 3),
                Opcode::Mul => ("MUL", 2),
                Opcode::Dp3 => ("DP3", 2),
                Opcode::Dp4 => ("DP4", 2),
                Opcode::Min => ("MIN", 2),
                Opcode::Max => ("MAX", 2),
                Opcode::Slt => ("SLT", 2),
                Opcode::Sge => ("SGE", 2),
                Opcode::Lit => ("LIT", 1),
                Opcode::Dst => ("DST", 2),
                Opcode::Frc => ("FRC", 1),
                Opcode::Abs => ("ABS", 1),
                Opcode::Crs => ("XPD", 2),
                _ => return None,
            })
        };
        let scalar = |opcode: Opcode, vertex: bool| -> Option<(&'static str, usize)> {
            Some(match opcode {
                Opcode::Rcp => ("RCP", 1),
                Opcode::Rsq => ("RSQ", 1),
                Opcode::Exp => ("EX2", 1),
                Opcode::ExpP if vertex => ("EXP", 1),
                Opcode::ExpP => ("EX2", 1),
                Opcode::Log => ("LG2", 1),
                Opcode::LogP if vertex => ("LOG", 1),
                Opcode::LogP => ("LG2", 1),
                Opcode::Pow => ("POW", 2),
                _ => return None,
            })
        };

        if let Some((opcode, count)) = simple(inst.opcode) {
            if inst.opcode == Opcode::Mov && inst.dst().map(|d| d.reg.file) == Some(RegisterFile::Addr) {
                let s = self.srcs(inst, 1)?;
                let dst = self.dst(inst)?;
                self.line(format!("ARL {dst}, {}", s[0].scalar()));
                return Ok(());
            }
            let ops: Vec<String> = self.srcs(inst, count)?.iter().map(ArbOperand::vector).collect();
            return self.write(inst, opcode, &ops);
        }
        if let Some((opcode, count)) = scalar(inst.opcode, !self.is_pixel()) {
            let ops: Vec<String> = self.srcs(inst, count)?.iter().map(ArbOperand::scalar).collect();
            return self.write(inst, opcode, &ops);
        }

        match inst.opcode {
            Opcode::Comment
            | Opcode::End
            | Opcode::Phase
            | Opcode::Nop
            | Opcode::Dcl
            | Opcode::Def
            | Opcode::DefI
            | Opcode::DefB => Ok(()),

            Opcode::Mova => {
                let s = self.srcs(inst, 1)?;
                let dst = self.dst(inst)?;
                if self.profile().has_nv_extensions() {
                    self.line(format!("ARR {dst}, {}", s[0].vector()));
                } else {
                    self.line(format!("ADD {work}, {}, {}", s[0].vector(), splat(0.5)));
                    self.line(format!("ARL {dst}, {work}.x"));
                }
                Ok(())
            }
            Opcode::Lrp => {
                let s = self.srcs(inst, 3)?;
                if self.is_pixel() {
                    let ops: Vec<String> = s.iter().map(ArbOperand::vector).collect();
                    return self.write(inst, "LRP", &ops);
                }
                self.line(format!("SUB {work}, {}, {}", s[1].vector(), s[2].vector()));
                self.write(
                    inst,
                    "MAD",
                    &[s[0].vector(), work.clone(), s[2].vector()],
                )
            }
            Opcode::M4x4 | Opcode::M4x3 | Opcode::M3x4 | Opcode::M3x3 | Opcode::M3x2 => {
                let (rows, dp) = match inst.opcode {
                    Opcode::M4x4 => (4, "DP4"),
                    Opcode::M4x3 => (3, "DP4"),
                    Opcode::M3x4 => (4, "DP3"),
                    Opcode::M3x3 => (3, "DP3"),
                    _ => (2, "DP3"),
                };
                let v = self.srcs(inst, 1)?;
                let matrix = inst
                    .src(1)
                    .ok_or_else(|| invalid(format!("{} is missing its matrix", inst.opcode.name())))?;
                for k in 0..rows {
                    let mut row = matrix.clone();
                    row.reg.index += k;
                    let row = self.src(&row, 1)?;
                    let c = SwizzleComponent::from_index(k as u8).letter();
                    self.line(format!("{dp} {work}.{c}, {}, {}", v[0].vector(), row.vector()));
                }
                self.write(inst, "MOV", &[work])
            }
            Opcode::Sgn => {
                let s = self.srcs(inst, 1)?;
                if self.profile().has_nv_extensions() {
                    return self.write(inst, "SSG", &[s[0].vector()]);
                }
                let lo = self.scratch(3);
                self.line(format!("SLT {work}, {}, {}", splat(0.0), s[0].vector()));
                self.line(format!("SLT {lo}, {}, {}", s[0].vector(), splat(0.0)));
                self.write(inst, "SUB", &[work, lo])
            }
            Opcode::Nrm => {
                let s = self.srcs(inst, 1)?;
                let v = s[0].vector();
                self.line(format!("DP3 {work}.w, {v}, {v}"));
                self.line(format!("RSQ {work}.w, {work}.w"));
                self.write(inst, "MUL", &[v, format!("{work}.w")])
            }
            Opcode::SinCos => {
                let s = self.srcs(inst, 1)?;
                if self.is_pixel() {
                    return self.write(inst, "SCS", &[s[0].scalar()]);
                }
                self.need_nv("sincos")?;
                self.line(format!("COS {work}.x, {}", s[0].scalar()));
                self.line(format!("SIN {work}.y, {}", s[0].scalar()));
                self.write(inst, "MOV", &[work])
            }
            Opcode::Cmp => {
                let s = self.srcs(inst, 3)?;
                if self.is_pixel() {
                    return self.write(
                        inst,
                        "CMP",
                        &[s[0].vector(), s[2].vector(), s[1].vector()],
                    );
                }
                let diff = self.scratch(3);
                self.line(format!("SGE {work}, {}, {}", s[0].vector(), splat(0.0)));
                self.line(format!("SUB {diff}, {}, {}", s[1].vector(), s[2].vector()));
                self.write(inst, "MAD", &[work, diff, s[2].vector()])
            }
            Opcode::Cnd => {
                self.need_pixel("cnd")?;
                let s = self.srcs(inst, 3)?;
                self.line(format!("SUB {work}, {}, {}", s[0].vector(), splat(0.5)));
                self.write(inst, "CMP", &[work, s[2].vector(), s[1].vector()])
            }
            Opcode::Dp2Add => {
                let s = self.srcs(inst, 3)?;
                self.line(format!("MUL {work}, {}, {}", s[0].vector(), s[1].vector()));
                self.line(format!("ADD {work}.x, {work}.x, {work}.y"));
                self.write(inst, "ADD", &[format!("{work}.x"), s[2].scalar()])
            }
            Opcode::Dsx | Opcode::Dsy => {
                self.need_nv("derivatives")?;
                let s = self.srcs(inst, 1)?;
                let op = if inst.opcode == Opcode::Dsx { "DDX" } else { "DDY" };
                self.write(inst, op, &[s[0].vector()])
            }
            Opcode::TexKill => {
                let dst = inst
                    .dst()
                    .ok_or_else(|| invalid("texkill without a register"))?;
                let reg = self.reg_name(&dst.reg)?;
                self.line(format!("KIL {reg}.xyzz"));
                Ok(())
            }

            // Source 1 is the sampler; it becomes the `texture[n]` operand, never a register.
            Opcode::Tex if !ps_1_x => {
                let coord = self.src_at(inst, 0)?.vector();
                let target = self.sampler_operand(inst)?;
                if !self.is_pixel() {
                    self.need_nv("vertex texture fetch")?;
                    self.line(format!("MOV {work}, {coord}"));
                    self.line(format!("MOV {work}.w, {}", splat(0.0)));
                    return self.write(inst, "TXL", &[work, target]);
                }
                let op = match inst.specific & 0x3 {
                    1 => "TXP",
                    2 => "TXB",
                    _ => "TEX",
                };
                self.write(inst, op, &[coord, target])
            }
            Opcode::TexLdl => {
                self.need_nv("texldl")?;
                let coord = self.src_at(inst, 0)?.vector();
                let target = self.sampler_operand(inst)?;
                self.write(inst, "TXL", &[coord, target])
            }
            Opcode::TexLdd => {
                self.need_nv("texldd")?;
                let coord = self.src_at(inst, 0)?.vector();
                let ddx = self.src_at(inst, 2)?.vector();
                let ddy = self.src_at(inst, 3)?.vector();
                let target = self.sampler_operand(inst)?;
                self.write(inst, "TXD", &[coord, ddx, ddy, target])
            }

            Opcode::Tex | Opcode::TexCoord => {
                let stage = Self::dst_index(inst)?;
                let coord = match inst.src(0) {
                    Some(src) => self.src(src, 0)?.vector(),
                    None => Self::texcoord(stage),
                };
                if inst.opcode == Opcode::TexCoord {
                    let op = if self.a.version.minor < 4 { "MOV_SAT" } else { "MOV" };
                    let dst = self.dst(inst)?;
                    self.line(format!("{op} {dst}, {coord}"));
                    return Ok(());
                }
                let target = self.texture_target(stage)?;
                self.write(inst, "TEX", &[coord, target])
            }
            Opcode::TexBem | Opcode::TexBemL => {
                let stage = Self::dst_index(inst)?;
                let s = self.srcs(inst, 1)?;
                let src = s[0].base.clone();
                let slot = self
                    .a
                    .texbem_slot(stage)
                    .ok_or_else(|| invalid(format!("sampler s{stage} has no bump environment")))?;
                let mat = format!("{p}_uniforms[{slot}]");
                let target = self.texture_target(stage)?;
                self.line(format!(
                    "MAD {work}, {src}.xxxx, {mat}.xyxy, {}",
                    Self::texcoord(stage)
                ));
                self.line(format!("MAD {work}, {src}.yyyy, {mat}.zwzw, {work}"));
                if inst.opcode == Opcode::TexBem {
                    return self.write(inst, "TEX", &[work, target]);
                }
                let lum = format!("{p}_uniforms[{}]", slot + 1);
                let scale = self.scratch(3);
                self.line(format!("TEX {work}, {work}, {target}"));
                self.line(format!("MAD_SAT {scale}.x, {src}.z, {lum}.x, {lum}.y"));
                self.line(format!("MUL {work}.xyz, {work}, {scale}.x"));
                self.write(inst, "MOV", &[work])
            }
            Opcode::TexReg2Ar | Opcode::TexReg2Gb | Opcode::TexReg2Rgb => {
                let stage = Self::dst_index(inst)?;
                let s = self.srcs(inst, 1)?;
                let swz = match inst.opcode {
                    Opcode::TexReg2Ar => "wxxx",
                    Opcode::TexReg2Gb => "yzzz",
                    _ => "xyzz",
                };
                let target = self.texture_target(stage)?;
                self.write(inst, "TEX", &[format!("{}.{swz}", s[0].base), target])
            }
            Opcode::TexM3x2Pad | Opcode::TexM3x3Pad | Opcode::TexDp3 => {
                let stage = Self::dst_index(inst)?;
                let s = self.srcs(inst, 1)?;
                self.write(inst, "DP3", &[Self::texcoord(stage), s[0].vector()])
            }
            Opcode::TexM3x2Tex | Opcode::TexM3x3Tex | Opcode::TexM3x3 | Opcode::TexDp3Tex => {
                let stage = Self::dst_index(inst)?;
                let s = self.srcs(inst, 1)?;
                let last = match inst.opcode {
                    Opcode::TexM3x2Tex => "y",
                    Opcode::TexDp3Tex => "x",
                    _ => "z",
                };
                self.line(format!("MOV {work}, {}", splat(0.0)));
                match inst.opcode {
                    Opcode::TexM3x2Tex if stage >= 1 => {
                        self.line(format!("MOV {work}.x, {p}_t{}.x", stage - 1));
                    }
                    Opcode::TexM3x3Tex | Opcode::TexM3x3 if stage >= 2 => {
                        self.line(format!("MOV {work}.x, {p}_t{}.x", stage - 2));
                        self.line(format!("MOV {work}.y, {p}_t{}.x", stage - 1));
                    }
                    Opcode::TexDp3Tex => {}
                    _ => return Err(invalid("matrix texture op without its pad rows")),
                }
                self.line(format!(
                    "DP3 {work}.{last}, {}, {}",
                    Self::texcoord(stage),
                    s[0].vector()
                ));
                if inst.opcode == Opcode::TexM3x3 {
                    self.line(format!("MOV {work}.w, {}", splat(1.0)));
                    return self.write(inst, "MOV", &[work]);
                }
                let target = self.texture_target(stage)?;
                self.write(inst, "TEX", &[work, target])
            }

            Opcode::TexM3x3Spec
            | Opcode::TexM3x3VSpec
            | Opcode::TexM3x2Depth
            | Opcode::TexDepth
            | Opcode::Bem
            | Opcode::Setp
            | Opcode::If
            | Opcode::Ifc
            | Opcode::Else
            | Opcode::EndIf
            | Opcode::Loop
            | Opcode::EndLoop
            | Opcode::Rep
            | Opcode::EndRep
            | Opcode::Break
            | Opcode::Breakc
            | Opcode::BreakP
            | Opcode::Call
            | Opcode::CallNz
            | Opcode::Label
            | Opcode::Ret => Err(unsupported(inst.opcode.name(), self.profile())),
            Opcode::Unknown(raw) => Err(invalid(format!("unknown opcode {raw}"))),
            other => Err(invalid(format!("unhandled opcode {}", other.name()))),
        }
    }
}
