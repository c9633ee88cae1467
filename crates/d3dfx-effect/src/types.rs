//! Effect data model: parameters, techniques, passes and the object table.

use d3dfx_shader::{ParseData, Preshader, SymbolClass, SymbolType, SymbolTypeInfo};

use crate::error::EffectApiError;
use crate::states::{RenderStateType, SamplerStateType};

/// Storage behind an [`EffectValue`], tagged by what the value's class/type pair holds.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    /// Scalar, vector, matrix and struct data: four 32-bit words per register row, read as
    /// floats or ints depending on the symbol type.
    Registers(Vec<u32>),
    /// Indices into [`crate::Effect::objects`] (strings, textures, shaders).
    Objects(Vec<u32>),
    /// The state block of a sampler parameter.
    SamplerStates(Vec<SamplerState>),
}

fn wrong_kind(expected: &'static str, found: &'static str) -> EffectApiError {
    EffectApiError::WrongValueKind { expected, found }
}

impl ValueData {
    fn kind(&self) -> &'static str {
        match self {
            Self::Registers(_) => "registers",
            Self::Objects(_) => "objects",
            Self::SamplerStates(_) => "sampler states",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectValue {
    pub name: Option<String>,
    pub semantic: Option<String>,
    pub info: SymbolTypeInfo,
    pub data: ValueData,
}

impl EffectValue {
    /// Number of scalars, object indices or sampler states held.
    pub fn value_count(&self) -> usize {
        match &self.data {
            ValueData::Registers(words) => words.len(),
            ValueData::Objects(objects) => objects.len(),
            ValueData::SamplerStates(states) => states.len(),
        }
    }

    fn wrong_kind(&self, expected: &'static str) -> EffectApiError {
        wrong_kind(expected, self.data.kind())
    }

    pub fn words(&self) -> Result<&[u32], EffectApiError> {
        match &self.data {
            ValueData::Registers(words) => Ok(words),
            _ => Err(self.wrong_kind("registers")),
        }
    }

    pub fn floats(&self) -> Result<&[f32], EffectApiError> {
        self.words().map(bytemuck::cast_slice)
    }

    pub fn ints(&self) -> Result<&[i32], EffectApiError> {
        self.words().map(bytemuck::cast_slice)
    }

    pub fn words_mut(&mut self) -> Result<&mut [u32], EffectApiError> {
        let found = self.data.kind();
        match &mut self.data {
            ValueData::Registers(words) => Ok(words),
            _ => Err(wrong_kind("registers", found)),
        }
    }

    pub fn floats_mut(&mut self) -> Result<&mut [f32], EffectApiError> {
        self.words_mut().map(bytemuck::cast_slice_mut)
    }

    pub fn ints_mut(&mut self) -> Result<&mut [i32], EffectApiError> {
        self.words_mut().map(bytemuck::cast_slice_mut)
    }

    pub fn objects(&self) -> Result<&[u32], EffectApiError> {
        match &self.data {
            ValueData::Objects(objects) => Ok(objects),
            _ => Err(self.wrong_kind("objects")),
        }
    }

    pub fn sampler_states(&self) -> Result<&[SamplerState], EffectApiError> {
        match &self.data {
            ValueData::SamplerStates(states) => Ok(states),
            _ => Err(self.wrong_kind("sampler states")),
        }
    }

    /// Raw bytes of register or object data, the view `set_raw_value` writes through.
    pub fn bytes_mut(&mut self) -> Result<&mut [u8], EffectApiError> {
        let found = self.data.kind();
        match &mut self.data {
            ValueData::Registers(words) | ValueData::Objects(words) => {
                Ok(bytemuck::cast_slice_mut(words))
            }
            ValueData::SamplerStates(_) => Err(wrong_kind("registers", found)),
        }
    }

    /// First word of register or object data: the object index of a shader/texture state or
    /// the integer value of a scalar state.
    pub fn first_word(&self) -> Option<u32> {
        match &self.data {
            ValueData::Registers(words) | ValueData::Objects(words) => words.first().copied(),
            ValueData::SamplerStates(_) => None,
        }
    }

    pub fn class(&self) -> SymbolClass {
        self.info.class
    }

    pub fn ty(&self) -> SymbolType {
        self.info.ty
    }
}

pub type Annotation = EffectValue;

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: EffectValue,
    pub annotations: Vec<Annotation>,
}

/// One render state assignment in a pass. `raw_type` keeps states the catalogue does not know.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub raw_type: u32,
    pub value: EffectValue,
}

impl State {
    pub fn ty(&self) -> Option<RenderStateType> {
        RenderStateType::from_raw(self.raw_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerState {
    pub raw_type: u32,
    pub value: EffectValue,
}

impl SamplerState {
    pub fn ty(&self) -> Option<SamplerStateType> {
        SamplerStateType::from_raw(self.raw_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pass {
    pub name: Option<String>,
    pub states: Vec<State>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Technique {
    pub name: Option<String>,
    pub passes: Vec<Pass>,
    pub annotations: Vec<Annotation>,
}

/// Links a sampler register of a shader object to the sampler parameter that configures it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerStateRegister {
    pub name: String,
    pub register: u32,
    /// Index into [`crate::Effect::params`]; its value holds the sampler states.
    pub param: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShaderCode {
    Shader(Box<ParseData>),
    /// Standalone preshader choosing one element of a shader array parameter at commit time.
    Preshader(Box<Preshader>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectShader {
    /// Technique and pass owning the object; `None` for small objects, which any pass may use.
    pub technique: Option<u32>,
    pub pass: Option<u32>,
    pub code: ShaderCode,
    /// Parameter feeding each CTAB symbol of the shader, in symbol order. For a standalone
    /// preshader, the single shader array parameter it indexes.
    pub params: Vec<usize>,
    /// Parameter feeding each input symbol of the (embedded or standalone) preshader.
    pub preshader_params: Vec<usize>,
    pub samplers: Vec<SamplerStateRegister>,
}

impl EffectShader {
    pub fn is_preshader(&self) -> bool {
        matches!(self.code, ShaderCode::Preshader(_))
    }

    pub fn parse_data(&self) -> Option<&ParseData> {
        match &self.code {
            ShaderCode::Shader(data) => Some(data),
            ShaderCode::Preshader(_) => None,
        }
    }

    /// The preshader run at commit time: the standalone selector, or the one embedded in the
    /// shader.
    pub fn preshader(&self) -> Option<&Preshader> {
        match &self.code {
            ShaderCode::Shader(data) => data.preshader.as_ref(),
            ShaderCode::Preshader(preshader) => Some(preshader),
        }
    }

    pub fn preshader_mut(&mut self) -> Option<&mut Preshader> {
        match &mut self.code {
            ShaderCode::Shader(data) => data.preshader.as_mut(),
            ShaderCode::Preshader(preshader) => Some(preshader),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ObjectData {
    #[default]
    None,
    String(String),
    /// Texture or sampler object: the name the runtime binds it under.
    Mapping(String),
    Shader(EffectShader),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectObject {
    pub ty: SymbolType,
    pub data: ObjectData,
}

impl Default for EffectObject {
    fn default() -> Self {
        Self {
            ty: SymbolType::Void,
            data: ObjectData::None,
        }
    }
}

impl EffectObject {
    pub fn shader(&self) -> Option<&EffectShader> {
        match &self.data {
            ObjectData::Shader(shader) => Some(shader),
            _ => None,
        }
    }

    pub fn shader_mut(&mut self) -> Option<&mut EffectShader> {
        match &mut self.data {
            ObjectData::Shader(shader) => Some(shader),
            _ => None,
        }
    }
}
