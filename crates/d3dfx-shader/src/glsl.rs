//! GLSL emitter for the `glsl`, `glsl120` and `glsles` profiles.
//!
//! Registers become globals named `{stage}_{register}` so that subroutines (`label`/`call`) can
//! share them. Float, int and bool constants are packed into one uniform array per type; the
//! runtime copies register-file values into those arrays before each draw.

use std::fmt::Write;

use crate::analysis::{invalid, unsupported, varying_name, CodegenError, ShaderAnalysis};
use crate::decode::{
    CompareOp, DecodedInstruction, DstOperand, Opcode, RegisterFile, RegisterRef, RelativeAddress,
    ResultModifier, ResultShift, SrcModifier, SrcOperand, Swizzle,
};
use crate::profile::Profile;
use crate::types::{ParseError, SamplerType, ShaderStage, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueTy {
    Float,
    Int,
    Bool,
}

fn reg_value_ty(file: RegisterFile) -> ValueTy {
    match file {
        RegisterFile::Addr | RegisterFile::ConstInt | RegisterFile::Loop => ValueTy::Int,
        RegisterFile::ConstBool | RegisterFile::Predicate => ValueTy::Bool,
        _ => ValueTy::Float,
    }
}

fn vec4_ty(ty: ValueTy) -> &'static str {
    match ty {
        ValueTy::Float => "vec4",
        ValueTy::Int => "ivec4",
        ValueTy::Bool => "bvec4",
    }
}

/// `.xyzw`-style suffix, omitted for the identity swizzle.
fn swizzle_suffix(swizzle: Swizzle) -> String {
    if swizzle.is_identity() {
        String::new()
    } else {
        let s: String = swizzle.0.iter().map(|c| c.letter()).collect();
        format!(".{s}")
    }
}

pub(crate) fn format_f32(v: f32) -> String {
    if v.is_nan() {
        return "(0.0 / 0.0)".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "(1.0 / 0.0)" } else { "(-1.0 / 0.0)" }.to_owned();
    }
    let mut s = format!("{v:.8}");
    if let Some(dot) = s.find('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.len() == dot + 1 {
            s.push('0');
        }
    }
    s
}

fn compare_op(op: CompareOp) -> Result<(&'static str, &'static str), CodegenError> {
    // (scalar operator, vector builtin)
    Ok(match op {
        CompareOp::Gt => (">", "greaterThan"),
        CompareOp::Eq => ("==", "equal"),
        CompareOp::Ge => (">=", "greaterThanEqual"),
        CompareOp::Lt => ("<", "lessThan"),
        CompareOp::Ne => ("!=", "notEqual"),
        CompareOp::Le => ("<=", "lessThanEqual"),
        CompareOp::Unknown(raw) => return Err(invalid(format!("unknown comparison {raw}"))),
    })
}

fn apply_result_modifiers(expr: String, modifier: ResultModifier) -> String {
    let mut out = match modifier.shift {
        ResultShift::None => expr,
        ResultShift::Mul2 => format!("({expr} * 2.0)"),
        ResultShift::Mul4 => format!("({expr} * 4.0)"),
        ResultShift::Mul8 => format!("({expr} * 8.0)"),
        ResultShift::Div2 => format!("({expr} * 0.5)"),
        ResultShift::Div4 => format!("({expr} * 0.25)"),
        ResultShift::Div8 => format!("({expr} * 0.125)"),
    };
    if modifier.saturate {
        out = format!("clamp({out}, 0.0, 1.0)");
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TexVariant {
    Plain,
    Project,
    Bias,
    Lod,
    Grad,
}

enum OpenLoop {
    Loop { depth: usize, step: String },
    Rep,
}

struct GlslWriter<'a, 'b> {
    a: &'b ShaderAnalysis<'a>,
    p: &'static str,
    body: String,
    indent: usize,
    loops: Vec<OpenLoop>,
    loop_depth: usize,
    rep_depth: usize,
    /// Open `if` blocks in the current function, used to tell a final `ret` from an early one.
    open_blocks: usize,
    main_open: bool,
    function_open: bool,
    errors: Vec<ParseError>,
}

pub(crate) fn emit(a: &ShaderAnalysis<'_>) -> (String, Vec<ParseError>) {
    let mut w = GlslWriter {
        a,
        p: a.prefix(),
        body: String::new(),
        indent: 1,
        loops: Vec::new(),
        loop_depth: 0,
        rep_depth: 0,
        open_blocks: 0,
        main_open: true,
        function_open: false,
        errors: Vec::new(),
    };

    let _ = writeln!(w.body, "void {}()", a.options.mainfn);
    w.body.push_str("{\n");
    w.prologue();
    for inst in a.instructions {
        if let Err(e) = w.instruction(inst) {
            w.errors.push(ParseError {
                message: e.to_string(),
                position: Some(inst.location.token_index),
            });
        }
    }
    w.close_segment();

    let mut out = w.header();
    out.push_str(&w.body);
    let mainfn = a.options.mainfn.as_str();
    if mainfn != "main" {
        let _ = write!(out, "\nvoid main()\n{{\n    {mainfn}();\n}}\n");
    }
    (out, w.errors)
}

impl GlslWriter<'_, '_> {
    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.body.push_str("    ");
        }
        self.body.push_str(text.as_ref());
        self.body.push('\n');
    }

    fn profile(&self) -> Profile {
        self.a.profile
    }

    fn is_pixel(&self) -> bool {
        self.a.stage() == ShaderStage::Pixel
    }

    fn header(&self) -> String {
        let a = self.a;
        let p = self.p;
        let mut h = String::new();
        let es = self.profile() == Profile::GlslEs;
        let _ = writeln!(
            h,
            "#version {}",
            match self.profile() {
                Profile::Glsl120 => "120",
                Profile::GlslEs => "100",
                _ => "110",
            }
        );
        if es && self.is_pixel() && a.features.derivatives {
            h.push_str("#extension GL_OES_standard_derivatives : enable\n");
        }
        if (a.features.tex_lod && self.is_pixel()) || a.features.tex_grad {
            if es {
                h.push_str("#extension GL_EXT_shader_texture_lod : enable\n");
            } else {
                h.push_str("#extension GL_ARB_shader_texture_lod : enable\n");
            }
        }
        if es && a.features.depth_out {
            h.push_str("#extension GL_EXT_frag_depth : enable\n");
        }
        if es && a.features.multiple_render_targets {
            h.push_str("#extension GL_EXT_draw_buffers : require\n");
        }
        if es {
            match a.stage() {
                ShaderStage::Vertex => h.push_str("precision highp float;\n"),
                ShaderStage::Pixel => h.push_str("precision mediump float;\n"),
            }
            h.push_str("precision mediump int;\n");
        }

        let float_slots = a.float4_count + 2 * a.texbem.len() as u32;
        if float_slots > 0 {
            let _ = writeln!(h, "uniform vec4 {p}_uniforms_vec4[{float_slots}];");
        }
        if a.int4_count > 0 {
            let _ = writeln!(h, "uniform ivec4 {p}_uniforms_ivec4[{}];", a.int4_count);
        }
        if a.bool_count > 0 {
            let _ = writeln!(h, "uniform bool {p}_uniforms_bool[{}];", a.bool_count);
        }
        for &r in &a.float_used {
            if let Some(v) = a.float_defs.get(&r) {
                let _ = writeln!(
                    h,
                    "const vec4 {p}_c{r} = vec4({}, {}, {}, {});",
                    format_f32(v[0]),
                    format_f32(v[1]),
                    format_f32(v[2]),
                    format_f32(v[3])
                );
            } else if let Some(slot) = a.float_slot(r) {
                let _ = writeln!(h, "#define {p}_c{r} {p}_uniforms_vec4[{slot}]");
            }
        }
        for array in a.float_arrays.iter().filter(|arr| arr.constant) {
            let _ = writeln!(
                h,
                "uniform vec4 {}[{}];",
                array.name(a.stage()),
                array.count
            );
        }
        for &r in &a.int_used {
            if let Some(v) = a.int_defs.get(&r) {
                let _ = writeln!(
                    h,
                    "const ivec4 {p}_i{r} = ivec4({}, {}, {}, {});",
                    v[0], v[1], v[2], v[3]
                );
            } else if let Some(slot) = a.int_slot(r) {
                let _ = writeln!(h, "#define {p}_i{r} {p}_uniforms_ivec4[{slot}]");
            }
        }
        for &r in &a.bool_used {
            if let Some(v) = a.bool_defs.get(&r) {
                let _ = writeln!(h, "const bool {p}_b{r} = {v};");
            } else if let Some(slot) = a.bool_slot(r) {
                let _ = writeln!(h, "#define {p}_b{r} {p}_uniforms_bool[{slot}]");
            }
        }
        for (index, sampler) in &a.samplers {
            let ty = match sampler.ty {
                SamplerType::TwoD => "sampler2D",
                SamplerType::Cube => "samplerCube",
                SamplerType::Volume => "sampler3D",
            };
            let _ = writeln!(h, "uniform {ty} {p}_s{index};");
        }

        match a.stage() {
            ShaderStage::Vertex => {
                for register in a.inputs.keys() {
                    let _ = writeln!(h, "attribute vec4 vs_v{register};");
                }
                for (&(file, register), &(usage, index)) in &a.outputs {
                    let binding = a.output_binding(file, register, usage, index);
                    if !binding.starts_with("gl_") {
                        let _ = writeln!(h, "varying vec4 {binding};");
                    }
                }
            }
            ShaderStage::Pixel => {
                for attr in a.attributes() {
                    let _ = writeln!(h, "varying vec4 {};", attr.name);
                }
            }
        }

        for r in &a.temps {
            let _ = writeln!(h, "vec4 {p}_r{r};");
        }
        for r in &a.addrs {
            let _ = writeln!(h, "ivec4 {p}_a{r};");
        }
        if a.uses_predicate {
            let _ = writeln!(h, "bvec4 {p}_p0;");
        }
        if !a.texture_is_varying() {
            for r in &a.textures {
                let _ = writeln!(h, "vec4 ps_t{r};");
            }
        }
        if !a.is_ps_1_x() {
            for &(file, register) in a.outputs.keys() {
                if let Ok(name) = self.output_register_name(file, register) {
                    let _ = writeln!(h, "vec4 {name};");
                }
            }
        }
        if a.features.lit {
            h.push_str(concat!(
                "vec4 LIT(const vec4 src)\n",
                "{\n",
                "    float power = clamp(src.w, -127.9961, 127.9961);\n",
                "    vec4 result;\n",
                "    result.x = 1.0;\n",
                "    result.y = max(src.x, 0.0);\n",
                "    result.z = (src.x > 0.0 && src.y > 0.0) ? pow(src.y, power) : 0.0;\n",
                "    result.w = 1.0;\n",
                "    return result;\n",
                "}\n",
            ));
        }
        for label in &a.labels {
            let _ = writeln!(h, "void {p}_l{label}();");
        }
        h.push('\n');
        h
    }

    fn prologue(&mut self) {
        // Outputs start at zero so partially written varyings are still defined.
        if !self.a.is_ps_1_x() {
            let names: Vec<String> = self
                .a
                .outputs
                .keys()
                .filter_map(|&(file, register)| self.output_register_name(file, register).ok())
                .collect();
            for name in names {
                self.line(format!("{name} = vec4(0.0);"));
            }
        }
    }

    fn epilogue(&mut self) {
        let a = self.a;
        let copies: Vec<String> = a
            .outputs
            .iter()
            .map(|(&(file, register), &(usage, index))| {
                let binding = a.output_binding(file, register, usage, index);
                let source = if a.is_ps_1_x() {
                    "ps_r0".to_owned()
                } else {
                    self.output_register_name(file, register)
                        .unwrap_or_else(|_| "vec4(0.0)".to_owned())
                };
                match (file, usage) {
                    (RegisterFile::DepthOut, _) | (_, Usage::PointSize) => {
                        format!("{binding} = {source}.x;")
                    }
                    _ => format!("{binding} = {source};"),
                }
            })
            .collect();
        for copy in copies {
            self.line(copy);
        }
    }

    /// Closes whichever function is still open at a `label` or at the end of the stream.
    fn close_segment(&mut self) {
        if self.main_open {
            self.epilogue();
            self.body.push_str("}\n");
            self.main_open = false;
        } else if self.function_open {
            self.body.push_str("}\n");
            self.function_open = false;
        }
        self.indent = 1;
        self.open_blocks = 0;
    }

    fn output_register_name(&self, file: RegisterFile, register: u32) -> Result<String, CodegenError> {
        let p = self.p;
        Ok(match file {
            RegisterFile::RastOut => match register {
                0 => "vs_oPos".to_owned(),
                1 => "vs_oFog".to_owned(),
                _ => "vs_oPts".to_owned(),
            },
            RegisterFile::AttrOut => format!("vs_oD{register}"),
            RegisterFile::TexCoordOut => format!("vs_oT{register}"),
            RegisterFile::Output => format!("vs_o{register}"),
            RegisterFile::ColorOut => format!("{p}_oC{register}"),
            RegisterFile::DepthOut => format!("{p}_oDepth"),
            other => return Err(invalid(format!("{other:?} is not an output"))),
        })
    }

    fn relative_index(&self, rel: &RelativeAddress) -> Result<String, CodegenError> {
        let p = self.p;
        match rel.file {
            RegisterFile::Addr => Ok(format!("{p}_a{}.{}", rel.index, rel.component.letter())),
            RegisterFile::Loop if self.loop_depth > 0 => Ok(format!("{p}_aL{}", self.loop_depth - 1)),
            RegisterFile::Loop => Err(invalid("aL used outside of a loop")),
            other => Err(invalid(format!("relative addressing through {other:?}"))),
        }
    }

    fn reg_name(&self, reg: &RegisterRef) -> Result<String, CodegenError> {
        let a = self.a;
        let p = self.p;
        let index = reg.index;
        if let Some(rel) = &reg.relative {
            let rel = self.relative_index(rel)?;
            let array = a
                .array_containing(index)
                .ok_or_else(|| invalid(format!("c{index} is not in a relative range")))?;
            let offset = index - array.base;
            return Ok(match array.slot {
                Some(slot) => format!("{p}_uniforms_vec4[{} + {rel}]", slot + offset),
                None => format!("{}[{offset} + {rel}]", array.name(a.stage())),
            });
        }
        Ok(match reg.file {
            RegisterFile::Temp => format!("{p}_r{index}"),
            RegisterFile::Input => match a.stage() {
                ShaderStage::Vertex => {
                    let mut name = format!("vs_v{index}");
                    if let Some(&(usage, usage_index)) = a.inputs.get(&index) {
                        let swizzle = a
                            .options
                            .swizzles
                            .iter()
                            .find(|s| s.usage == usage && s.index == usage_index);
                        if let Some(s) = swizzle {
                            if s.swizzles != [0, 1, 2, 3] {
                                name.push('.');
                                name.extend(s.swizzles.iter().map(|c| b"xyzw"[usize::from(*c & 3)] as char));
                            }
                        }
                    }
                    name
                }
                ShaderStage::Pixel => match a.inputs.get(&index) {
                    Some(&(usage, usage_index)) => varying_name(usage, usage_index),
                    None => varying_name(Usage::Color, index),
                },
            },
            RegisterFile::Const => format!("{p}_c{index}"),
            RegisterFile::Addr => format!("{p}_a{index}"),
            RegisterFile::Texture if a.texture_is_varying() => varying_name(Usage::TexCoord, index),
            RegisterFile::Texture => format!("ps_t{index}"),
            RegisterFile::ConstInt => format!("{p}_i{index}"),
            RegisterFile::ConstBool => format!("{p}_b{index}"),
            RegisterFile::Sampler => format!("{p}_s{index}"),
            RegisterFile::Predicate => format!("{p}_p{index}"),
            RegisterFile::Label => format!("{p}_l{index}"),
            RegisterFile::Loop if self.loop_depth > 0 => format!("{p}_aL{}", self.loop_depth - 1),
            RegisterFile::Loop => return Err(invalid("aL used outside of a loop")),
            RegisterFile::MiscType => match index {
                0 => "gl_FragCoord".to_owned(),
                _ => "vec4(gl_FrontFacing ? 1.0 : -1.0)".to_owned(),
            },
            file => self.output_register_name(file, index)?,
        })
    }

    fn src(&self, src: &SrcOperand) -> Result<String, CodegenError> {
        let ty = reg_value_ty(src.reg.file);
        let mut e = self.reg_name(&src.reg)?;
        e.push_str(&swizzle_suffix(src.swizzle));
        Ok(match (ty, src.modifier) {
            (_, SrcModifier::None) => e,
            (ValueTy::Float | ValueTy::Int, SrcModifier::Negate) => format!("-{e}"),
            (ValueTy::Bool, SrcModifier::Not) => format!("!{e}"),
            (ValueTy::Float, SrcModifier::Bias) => format!("({e} - vec4(0.5))"),
            (ValueTy::Float, SrcModifier::BiasNegate) => format!("-({e} - vec4(0.5))"),
            (ValueTy::Float, SrcModifier::Sign) => format!("(({e} * 2.0) - vec4(1.0))"),
            (ValueTy::Float, SrcModifier::SignNegate) => format!("-(({e} * 2.0) - vec4(1.0))"),
            (ValueTy::Float, SrcModifier::Comp) => format!("(vec4(1.0) - {e})"),
            (ValueTy::Float, SrcModifier::X2) => format!("({e} * 2.0)"),
            (ValueTy::Float, SrcModifier::X2Negate) => format!("-({e} * 2.0)"),
            (ValueTy::Float, SrcModifier::Dz) => format!("({e} / {e}.z)"),
            (ValueTy::Float, SrcModifier::Dw) => format!("({e} / {e}.w)"),
            (ValueTy::Float | ValueTy::Int, SrcModifier::Abs) => format!("abs({e})"),
            (ValueTy::Float | ValueTy::Int, SrcModifier::AbsNegate) => format!("-abs({e})"),
            (ty, modifier) => {
                return Err(invalid(format!("source modifier {modifier:?} on {ty:?} register")))
            }
        })
    }

    /// First selected component of a source, for the scalar opcodes.
    fn src_x(&self, src: &SrcOperand) -> Result<String, CodegenError> {
        Ok(format!("({}).x", self.src(src)?))
    }

    /// Boolean condition from a `b#` or predicate source.
    fn condition(&self, src: &SrcOperand) -> Result<String, CodegenError> {
        let name = self.reg_name(&src.reg)?;
        let negate = if src.modifier == SrcModifier::Not { "!" } else { "" };
        match src.reg.file {
            RegisterFile::ConstBool => Ok(format!("{negate}{name}")),
            RegisterFile::Predicate => Ok(format!("{negate}{name}.{}", src.swizzle.0[0].letter())),
            other => Err(invalid(format!("{other:?} register used as a condition"))),
        }
    }

    fn src_n(&self, inst: &DecodedInstruction, n: usize) -> Result<String, CodegenError> {
        let src = inst
            .src(n)
            .ok_or_else(|| invalid(format!("{} is missing source {n}", inst.opcode.name())))?;
        self.src(src)
    }

    fn dst(inst: &DecodedInstruction) -> Result<&DstOperand, CodegenError> {
        inst.dst()
            .ok_or_else(|| invalid(format!("{} without a destination", inst.opcode.name())))
    }

    fn assign(&mut self, inst: &DecodedInstruction, value: String) -> Result<(), CodegenError> {
        let dst = Self::dst(inst)?;
        let ty = reg_value_ty(dst.reg.file);
        let value = match ty {
            ValueTy::Float => apply_result_modifiers(value, inst.result_modifier),
            _ => value,
        };
        let name = self.reg_name(&dst.reg)?;
        let mask = dst.mask;

        if let Some(pred) = &inst.predicate {
            let pname = self.reg_name(&pred.reg)?;
            let negate = if pred.modifier == SrcModifier::Not { "!" } else { "" };
            self.line("{");
            self.indent += 1;
            self.line(format!("{} tmp = {value};", vec4_ty(ty)));
            for c in mask.components() {
                let pc = pred.swizzle.0[usize::from(c.index())].letter();
                let c = c.letter();
                self.line(format!("if ({negate}{pname}.{pc}) {name}.{c} = tmp.{c};"));
            }
            self.indent -= 1;
            self.line("}");
        } else if mask.is_all() {
            self.line(format!("{name} = {value};"));
        } else {
            let m = mask.suffix();
            self.line(format!("{name}.{m} = ({value}).{m};"));
        }
        Ok(())
    }

    fn tex_function(&self, ty: SamplerType, variant: TexVariant) -> Result<String, CodegenError> {
        let es = self.profile() == Profile::GlslEs;
        let base = match ty {
            SamplerType::TwoD => "texture2D",
            SamplerType::Cube => "textureCube",
            SamplerType::Volume if es => {
                return Err(unsupported("volume texture sampling", self.profile()))
            }
            SamplerType::Volume => "texture3D",
        };
        Ok(match variant {
            TexVariant::Plain | TexVariant::Bias => base.to_owned(),
            TexVariant::Project => format!("{base}Proj"),
            TexVariant::Lod if es && self.is_pixel() => format!("{base}LodEXT"),
            TexVariant::Lod => format!("{base}Lod"),
            TexVariant::Grad if es => format!("{base}GradEXT"),
            TexVariant::Grad => format!("{base}GradARB"),
        })
    }

    fn coord_suffix(ty: SamplerType) -> &'static str {
        match ty {
            SamplerType::TwoD => ".xy",
            SamplerType::Cube | SamplerType::Volume => ".xyz",
        }
    }

    fn sampler_type(&self, index: u32) -> Result<SamplerType, CodegenError> {
        self.a
            .samplers
            .get(&index)
            .map(|s| s.ty)
            .ok_or_else(|| invalid(format!("sampler s{index} is not declared")))
    }

    fn sample(
        &self,
        sampler: u32,
        coord: &str,
        variant: TexVariant,
        extra: &[String],
    ) -> Result<String, CodegenError> {
        let ty = self.sampler_type(sampler)?;
        let f = self.tex_function(ty, variant)?;
        let s = format!("{}_s{sampler}", self.p);
        let c = Self::coord_suffix(ty);
        Ok(match variant {
            TexVariant::Plain => format!("{f}({s}, ({coord}){c})"),
            TexVariant::Project if ty == SamplerType::Cube => {
                format!("{f}({s}, ({coord}).xyz / ({coord}).w)")
            }
            TexVariant::Project => format!("{f}({s}, {coord})"),
            TexVariant::Bias | TexVariant::Lod => format!("{f}({s}, ({coord}){c}, ({coord}).w)"),
            TexVariant::Grad => format!(
                "{f}({s}, ({coord}){c}, ({}){c}, ({}){c})",
                extra.first().map(String::as_str).unwrap_or("vec4(0.0)"),
                extra.get(1).map(String::as_str).unwrap_or("vec4(0.0)")
            ),
        })
    }

    fn matrix(&self, inst: &DecodedInstruction, rows: u32, dp: &str) -> Result<String, CodegenError> {
        let src0 = self.src_n(inst, 0)?;
        let row_src = inst
            .src(1)
            .ok_or_else(|| invalid(format!("{} is missing its matrix", inst.opcode.name())))?;
        let mut parts = Vec::new();
        for k in 0..rows {
            let mut row = row_src.clone();
            row.reg.index += k;
            let row = self.src(&row)?;
            parts.push(match dp {
                "dp3" => format!("dot(({src0}).xyz, ({row}).xyz)"),
                _ => format!("dot({src0}, {row})"),
            });
        }
        while parts.len() < 4 {
            parts.push("0.0".to_owned());
        }
        Ok(format!("vec4({})", parts.join(", ")))
    }

    fn open(&mut self, text: String) {
        self.line(text);
        self.indent += 1;
        self.open_blocks += 1;
    }

    fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.open_blocks = self.open_blocks.saturating_sub(1);
        self.line("}");
    }

    fn instruction(&mut self, inst: &DecodedInstruction) -> Result<(), CodegenError> {
        let p = self.p;
        let ps_1_x = self.a.is_ps_1_x();
        match inst.opcode {
            Opcode::Comment
            | Opcode::End
            | Opcode::Phase
            | Opcode::Nop
            | Opcode::Dcl
            | Opcode::Def
            | Opcode::DefI
            | Opcode::DefB => Ok(()),

            Opcode::Mov if inst.dst().map(|d| d.reg.file) == Some(RegisterFile::Addr) => {
                let s = self.src_n(inst, 0)?;
                self.assign(inst, format!("ivec4(floor({s}))"))
            }
            Opcode::Mov => {
                let s = self.src_n(inst, 0)?;
                self.assign(inst, s)
            }
            Opcode::Mova => {
                let s = self.src_n(inst, 0)?;
                self.assign(inst, format!("ivec4(floor(abs({s}) + vec4(0.5)) * sign({s}))"))
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul => {
                let op = match inst.opcode {
                    Opcode::Add => "+",
                    Opcode::Sub => "-",
                    _ => "*",
                };
                let (a, b) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?);
                self.assign(inst, format!("({a} {op} {b})"))
            }
            Opcode::Mad => {
                let (a, b, c) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?, self.src_n(inst, 2)?);
                self.assign(inst, format!("(({a} * {b}) + {c})"))
            }
            Opcode::Rcp => {
                let a = self.src_x(self.source(inst, 0)?)?;
                self.assign(inst, format!("vec4(1.0 / {a})"))
            }
            Opcode::Rsq => {
                let a = self.src_x(self.source(inst, 0)?)?;
                self.assign(inst, format!("vec4(inversesqrt({a}))"))
            }
            Opcode::Dp3 => {
                let (a, b) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?);
                self.assign(inst, format!("vec4(dot(({a}).xyz, ({b}).xyz))"))
            }
            Opcode::Dp4 => {
                let (a, b) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?);
                self.assign(inst, format!("vec4(dot({a}, {b}))"))
            }
            Opcode::Min | Opcode::Max => {
                let f = if inst.opcode == Opcode::Min { "min" } else { "max" };
                let (a, b) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?);
                self.assign(inst, format!("{f}({a}, {b})"))
            }
            Opcode::Slt | Opcode::Sge => {
                let f = if inst.opcode == Opcode::Slt {
                    "lessThan"
                } else {
                    "greaterThanEqual"
                };
                let (a, b) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?);
                self.assign(inst, format!("vec4({f}({a}, {b}))"))
            }
            Opcode::Exp | Opcode::ExpP => {
                let a = self.src_x(self.source(inst, 0)?)?;
                self.assign(inst, format!("vec4(exp2({a}))"))
            }
            Opcode::Log | Opcode::LogP => {
                let a = self.src_x(self.source(inst, 0)?)?;
                self.assign(inst, format!("vec4(log2(abs({a})))"))
            }
            Opcode::Lit => {
                let a = self.src_n(inst, 0)?;
                self.assign(inst, format!("LIT({a})"))
            }
            Opcode::Dst => {
                let (a, b) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?);
                self.assign(
                    inst,
                    format!("vec4(1.0, ({a}).y * ({b}).y, ({a}).z, ({b}).w)"),
                )
            }
            Opcode::Lrp => {
                let (a, b, c) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?, self.src_n(inst, 2)?);
                self.assign(inst, format!("mix({c}, {b}, {a})"))
            }
            Opcode::Frc => {
                let a = self.src_n(inst, 0)?;
                self.assign(inst, format!("fract({a})"))
            }
            Opcode::M4x4 => {
                let v = self.matrix(inst, 4, "dp4")?;
                self.assign(inst, v)
            }
            Opcode::M4x3 => {
                let v = self.matrix(inst, 3, "dp4")?;
                self.assign(inst, v)
            }
            Opcode::M3x4 => {
                let v = self.matrix(inst, 4, "dp3")?;
                self.assign(inst, v)
            }
            Opcode::M3x3 => {
                let v = self.matrix(inst, 3, "dp3")?;
                self.assign(inst, v)
            }
            Opcode::M3x2 => {
                let v = self.matrix(inst, 2, "dp3")?;
                self.assign(inst, v)
            }
            Opcode::Pow => {
                let a = self.src_x(self.source(inst, 0)?)?;
                let b = self.src_x(self.source(inst, 1)?)?;
                self.assign(inst, format!("vec4(pow(abs({a}), {b}))"))
            }
            Opcode::Crs => {
                let (a, b) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?);
                self.assign(inst, format!("vec4(cross(({a}).xyz, ({b}).xyz), 0.0)"))
            }
            Opcode::Sgn => {
                let a = self.src_n(inst, 0)?;
                self.assign(inst, format!("sign({a})"))
            }
            Opcode::Abs => {
                let a = self.src_n(inst, 0)?;
                self.assign(inst, format!("abs({a})"))
            }
            Opcode::Nrm => {
                let a = self.src_n(inst, 0)?;
                self.assign(
                    inst,
                    format!("({a} * inversesqrt(dot(({a}).xyz, ({a}).xyz)))"),
                )
            }
            Opcode::SinCos => {
                let a = self.src_x(self.source(inst, 0)?)?;
                self.assign(inst, format!("vec4(cos({a}), sin({a}), 0.0, 0.0)"))
            }
            Opcode::Cmp => {
                let (a, b, c) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?, self.src_n(inst, 2)?);
                self.assign(
                    inst,
                    format!("mix({c}, {b}, vec4(greaterThanEqual({a}, vec4(0.0))))"),
                )
            }
            Opcode::Cnd => {
                let (a, b, c) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?, self.src_n(inst, 2)?);
                self.assign(
                    inst,
                    format!("mix({c}, {b}, vec4(greaterThan({a}, vec4(0.5))))"),
                )
            }
            Opcode::Dp2Add => {
                let (a, b) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?);
                let c = self.src_x(self.source(inst, 2)?)?;
                self.assign(
                    inst,
                    format!("vec4(dot(({a}).xy, ({b}).xy) + {c})"),
                )
            }
            Opcode::Dsx | Opcode::Dsy => {
                let f = if inst.opcode == Opcode::Dsx { "dFdx" } else { "dFdy" };
                let a = self.src_n(inst, 0)?;
                self.assign(inst, format!("{f}({a})"))
            }
            Opcode::Setp => {
                let (_, f) = compare_op(inst.compare())?;
                let (a, b) = (self.src_n(inst, 0)?, self.src_n(inst, 1)?);
                self.assign(inst, format!("{f}({a}, {b})"))
            }
            Opcode::TexKill => {
                let reg = self.reg_name(&Self::dst(inst)?.reg)?;
                self.line(format!("if (any(lessThan(({reg}).xyz, vec3(0.0)))) discard;"));
                Ok(())
            }

            // Texture sampling, shader model 2 and up.
            Opcode::Tex if !ps_1_x => {
                let coord = self.src_n(inst, 0)?;
                let sampler = self.source(inst, 1)?.reg.index;
                let variant = match (self.a.stage(), inst.specific & 0x3) {
                    (ShaderStage::Vertex, _) => TexVariant::Lod,
                    (_, 1) => TexVariant::Project,
                    (_, 2) => TexVariant::Bias,
                    _ => TexVariant::Plain,
                };
                let coord = if variant == TexVariant::Lod {
                    format!("vec4(({coord}).xyz, 0.0)")
                } else {
                    coord
                };
                let v = self.sample(sampler, &coord, variant, &[])?;
                self.assign(inst, v)
            }
            Opcode::TexLdl => {
                let coord = self.src_n(inst, 0)?;
                let sampler = self.source(inst, 1)?.reg.index;
                let v = self.sample(sampler, &coord, TexVariant::Lod, &[])?;
                self.assign(inst, v)
            }
            Opcode::TexLdd => {
                let coord = self.src_n(inst, 0)?;
                let sampler = self.source(inst, 1)?.reg.index;
                let grads = [self.src_n(inst, 2)?, self.src_n(inst, 3)?];
                let v = self.sample(sampler, &coord, TexVariant::Grad, &grads)?;
                self.assign(inst, v)
            }

            // ps_1_x texture addressing.
            Opcode::Tex | Opcode::TexCoord => {
                let stage = Self::dst(inst)?.reg.index;
                let coord = match inst.src(0) {
                    Some(src) => self.src(src)?,
                    None => varying_name(Usage::TexCoord, stage),
                };
                let v = if inst.opcode == Opcode::TexCoord {
                    if self.a.version.minor < 4 {
                        format!("clamp({coord}, 0.0, 1.0)")
                    } else {
                        coord
                    }
                } else {
                    self.sample(stage, &coord, TexVariant::Plain, &[])?
                };
                self.assign(inst, v)
            }
            Opcode::TexBem | Opcode::TexBemL => {
                let stage = Self::dst(inst)?.reg.index;
                let src = self.src_n(inst, 0)?;
                let slot = self
                    .a
                    .texbem_slot(stage)
                    .ok_or_else(|| invalid(format!("sampler s{stage} has no bump environment")))?;
                let mat = format!("{p}_uniforms_vec4[{slot}]");
                let tc = varying_name(Usage::TexCoord, stage);
                let coord = format!(
                    "vec4(({tc}).xy + vec2(dot(({src}).xy, {mat}.xz), dot(({src}).xy, {mat}.yw)), 0.0, 0.0)"
                );
                let mut v = self.sample(stage, &coord, TexVariant::Plain, &[])?;
                if inst.opcode == Opcode::TexBemL {
                    let lum = format!("{p}_uniforms_vec4[{}]", slot + 1);
                    v = format!(
                        "({v} * vec4(vec3(clamp(({src}).z * {lum}.x + {lum}.y, 0.0, 1.0)), 1.0))"
                    );
                }
                self.assign(inst, v)
            }
            Opcode::TexReg2Ar | Opcode::TexReg2Gb | Opcode::TexReg2Rgb => {
                let stage = Self::dst(inst)?.reg.index;
                let src = self.src_n(inst, 0)?;
                let swz = match inst.opcode {
                    Opcode::TexReg2Ar => "wxxx",
                    Opcode::TexReg2Gb => "yzzz",
                    _ => "xyzz",
                };
                let v = self.sample(stage, &format!("({src}).{swz}"), TexVariant::Plain, &[])?;
                self.assign(inst, v)
            }
            Opcode::TexM3x2Pad | Opcode::TexM3x3Pad | Opcode::TexDp3 => {
                let stage = Self::dst(inst)?.reg.index;
                let src = self.src_n(inst, 0)?;
                let tc = varying_name(Usage::TexCoord, stage);
                self.assign(inst, format!("vec4(dot(({tc}).xyz, ({src}).xyz))"))
            }
            Opcode::TexM3x2Tex | Opcode::TexM3x3Tex | Opcode::TexM3x3 | Opcode::TexDp3Tex => {
                let stage = Self::dst(inst)?.reg.index;
                let src = self.src_n(inst, 0)?;
                let tc = varying_name(Usage::TexCoord, stage);
                let last = format!("dot(({tc}).xyz, ({src}).xyz)");
                let coord = match inst.opcode {
                    Opcode::TexM3x2Tex if stage >= 1 => {
                        format!("vec4(ps_t{}.x, {last}, 0.0, 0.0)", stage - 1)
                    }
                    Opcode::TexM3x3Tex | Opcode::TexM3x3 if stage >= 2 => format!(
                        "vec4(ps_t{}.x, ps_t{}.x, {last}, 1.0)",
                        stage - 2,
                        stage - 1
                    ),
                    Opcode::TexDp3Tex => format!("vec4({last}, 0.0, 0.0, 0.0)"),
                    _ => return Err(invalid("matrix texture op without its pad rows")),
                };
                let v = if inst.opcode == Opcode::TexM3x3 {
                    coord
                } else {
                    self.sample(stage, &coord, TexVariant::Plain, &[])?
                };
                self.assign(inst, v)
            }
            Opcode::TexM3x3Spec
            | Opcode::TexM3x3VSpec
            | Opcode::TexM3x2Depth
            | Opcode::TexDepth
            | Opcode::Bem => Err(unsupported(inst.opcode.name(), self.profile())),

            // Flow control.
            Opcode::If => {
                let c = self.condition(self.source(inst, 0)?)?;
                self.open(format!("if ({c}) {{"));
                Ok(())
            }
            Opcode::Ifc => {
                let (op, _) = compare_op(inst.compare())?;
                let a = self.src_x(self.source(inst, 0)?)?;
                let b = self.src_x(self.source(inst, 1)?)?;
                self.open(format!("if ({a} {op} {b}) {{"));
                Ok(())
            }
            Opcode::Else => {
                self.indent = self.indent.saturating_sub(1);
                self.line("} else {");
                self.indent += 1;
                Ok(())
            }
            Opcode::EndIf => {
                self.close();
                Ok(())
            }
            Opcode::Loop => {
                let counter = self.src_n(inst, 1)?;
                let depth = self.loop_depth;
                self.open("{".to_owned());
                self.line(format!("int {p}_aL{depth} = ({counter}).y;"));
                self.line(format!(
                    "for (int {p}_lc{depth} = 0; {p}_lc{depth} < ({counter}).x; {p}_lc{depth}++) {{"
                ));
                self.indent += 1;
                self.loops.push(OpenLoop::Loop {
                    depth,
                    step: format!("({counter}).z"),
                });
                self.loop_depth += 1;
                Ok(())
            }
            Opcode::EndLoop => match self.loops.pop() {
                Some(OpenLoop::Loop { depth, step }) => {
                    self.line(format!("{p}_aL{depth} += {step};"));
                    self.indent = self.indent.saturating_sub(1);
                    self.line("}");
                    self.close();
                    self.loop_depth -= 1;
                    Ok(())
                }
                _ => Err(invalid("endloop without loop")),
            },
            Opcode::Rep => {
                let count = self.src_n(inst, 0)?;
                let depth = self.rep_depth;
                self.open(format!(
                    "for (int {p}_rc{depth} = 0; {p}_rc{depth} < ({count}).x; {p}_rc{depth}++) {{"
                ));
                self.loops.push(OpenLoop::Rep);
                self.rep_depth += 1;
                Ok(())
            }
            Opcode::EndRep => match self.loops.pop() {
                Some(OpenLoop::Rep) => {
                    self.close();
                    self.rep_depth -= 1;
                    Ok(())
                }
                _ => Err(invalid("endrep without rep")),
            },
            Opcode::Break => {
                self.line("break;");
                Ok(())
            }
            Opcode::Breakc => {
                let (op, _) = compare_op(inst.compare())?;
                let a = self.src_x(self.source(inst, 0)?)?;
                let b = self.src_x(self.source(inst, 1)?)?;
                self.line(format!("if ({a} {op} {b}) {{ break; }}"));
                Ok(())
            }
            Opcode::BreakP => {
                let c = self.condition(self.source(inst, 0)?)?;
                self.line(format!("if ({c}) {{ break; }}"));
                Ok(())
            }
            Opcode::Call => {
                let label = self.source(inst, 0)?.reg.index;
                self.line(format!("{p}_l{label}();"));
                Ok(())
            }
            Opcode::CallNz => {
                let label = self.source(inst, 0)?.reg.index;
                let c = self.condition(self.source(inst, 1)?)?;
                self.line(format!("if ({c}) {{ {p}_l{label}(); }}"));
                Ok(())
            }
            Opcode::Label => {
                let label = self.source(inst, 0)?.reg.index;
                self.close_segment();
                let _ = writeln!(self.body, "void {p}_l{label}()");
                self.body.push_str("{\n");
                self.function_open = true;
                Ok(())
            }
            Opcode::Ret => {
                if self.open_blocks > 0 {
                    if self.main_open {
                        self.epilogue();
                    }
                    self.line("return;");
                } else {
                    self.close_segment();
                }
                Ok(())
            }
            Opcode::Unknown(raw) => Err(invalid(format!("unknown opcode {raw}"))),
        }
    }

    fn source<'i>(&self, inst: &'i DecodedInstruction, n: usize) -> Result<&'i SrcOperand, CodegenError> {
        inst.src(n)
            .ok_or_else(|| invalid(format!("{} is missing source {n}", inst.opcode.name())))
    }
}
