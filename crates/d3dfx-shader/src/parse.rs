//! Top-level shader translation: decode, collect metadata, emit profile source.

use tracing::debug;

use crate::analysis::ShaderAnalysis;
use crate::ctab::{parse_constant_table, CTAB_FOURCC};
use crate::decode::decode_u8_le_bytes;
use crate::preshader::{parse_preshader, Preshader, PRESHADER_FOURCC};
use crate::profile::Profile;
use crate::types::{
    Attribute, AttributeSwizzle, Constant, ParseError, Sampler, ShaderStage, ShaderVersion,
    Symbol, Uniform, UniformType, Usage,
};
use crate::{arb1, glsl, TranslateOptions};

/// Everything known about one translated shader.
///
/// [`parse`] never fails outright: problems are collected in [`ParseData::errors`], and `output`
/// is empty whenever that list is not.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseData {
    pub errors: Vec<ParseError>,
    pub profile: Profile,
    /// Generated GLSL or assembly text.
    pub output: String,
    pub instruction_count: usize,
    /// `None` when the version token itself could not be decoded.
    pub version: Option<ShaderVersion>,
    pub mainfn: String,
    pub uniforms: Vec<Uniform>,
    pub constants: Vec<Constant>,
    pub samplers: Vec<Sampler>,
    pub attributes: Vec<Attribute>,
    pub outputs: Vec<Attribute>,
    pub swizzles: Vec<AttributeSwizzle>,
    pub symbols: Vec<Symbol>,
    pub preshader: Option<Preshader>,
}

impl ParseData {
    fn empty(profile: Profile, options: &TranslateOptions) -> Self {
        Self {
            errors: Vec::new(),
            profile,
            output: String::new(),
            instruction_count: 0,
            version: None,
            mainfn: options.mainfn.clone(),
            uniforms: Vec::new(),
            constants: Vec::new(),
            samplers: Vec::new(),
            attributes: Vec::new(),
            outputs: Vec::new(),
            swizzles: options.swizzles.clone(),
            symbols: Vec::new(),
            preshader: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn stage(&self) -> Option<ShaderStage> {
        self.version.map(|v| v.stage)
    }

    fn slots(&self, ty: UniformType) -> u32 {
        self.uniforms
            .iter()
            .filter(|u| u.ty == ty && !u.constant)
            .map(|u| u.array_count.max(1))
            .sum()
    }

    /// Packed vec4 slots fed from the float register file (texbem slots excluded).
    pub fn float4_count(&self) -> u32 {
        self.slots(UniformType::Float)
    }

    pub fn int4_count(&self) -> u32 {
        self.slots(UniformType::Int)
    }

    pub fn bool_count(&self) -> u32 {
        self.slots(UniformType::Bool)
    }

    pub fn texbem_count(&self) -> u32 {
        self.samplers.iter().filter(|s| s.texbem).count() as u32
    }

    pub fn uses_pointsize(&self) -> bool {
        self.outputs.iter().any(|o| o.usage == Usage::PointSize)
    }
}

/// Translates D3D9 bytecode into source for `profile`.
pub fn parse(profile: Profile, bytes: &[u8], options: &TranslateOptions) -> ParseData {
    let mut data = ParseData::empty(profile, options);

    let shader = match decode_u8_le_bytes(bytes) {
        Ok(shader) => shader,
        Err(e) => {
            data.errors.push(ParseError {
                message: e.message,
                position: Some(e.token_index),
            });
            return data;
        }
    };
    data.version = Some(shader.version);
    data.instruction_count = shader.instruction_count();

    for comment in shader.comments() {
        match comment.first() {
            Some(&CTAB_FOURCC) => match parse_constant_table(comment) {
                Ok(table) => data.symbols = table.symbols,
                Err(e) => data.errors.push(ParseError {
                    message: e.to_string(),
                    position: None,
                }),
            },
            Some(&PRESHADER_FOURCC) => match parse_preshader(&comment[1..]) {
                Ok(preshader) => data.preshader = Some(preshader),
                Err(e) => data.errors.push(ParseError {
                    message: e.to_string(),
                    position: None,
                }),
            },
            _ => {}
        }
    }

    let mut analysis = ShaderAnalysis::new(&shader, profile, &data.symbols, options);
    data.errors.append(&mut analysis.errors);

    if data.errors.is_empty() {
        let (output, mut errors) = if profile.is_glsl() {
            glsl::emit(&analysis)
        } else {
            arb1::emit(&analysis)
        };
        data.output = output;
        data.errors.append(&mut errors);
    }

    let prefix = shader.version.stage.prefix();
    data.uniforms = analysis.uniforms.clone();
    data.constants = analysis.constants();
    data.samplers = analysis
        .samplers
        .iter()
        .map(|(&index, info)| Sampler {
            ty: info.ty,
            index,
            name: format!("{prefix}_s{index}"),
            texbem: info.texbem,
        })
        .collect();
    data.attributes = analysis.attributes();
    data.outputs = analysis.output_attributes();

    if !data.errors.is_empty() {
        data.output.clear();
    }
    debug!(
        version = %shader.version,
        %profile,
        instructions = data.instruction_count,
        uniforms = data.uniforms.len(),
        errors = data.errors.len(),
        "translated shader"
    );
    data
}
