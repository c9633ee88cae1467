//! Object table resolution: translating shader blobs and cross-linking them to parameters.

use d3dfx_shader::{
    parse_preshader, ParseData, ParseError, ShaderCache, SymbolRegisterSet, SymbolType, TranslateOptions,
};
use tracing::{debug, warn};

use crate::error::EffectError;
use crate::reader::{c_string, read_string, Cursor};
use crate::types::{
    EffectObject, EffectShader, ObjectData, Param, SamplerStateRegister, ShaderCode, Technique,
};
use crate::EffectOptions;

/// Large-object `type` marking a standalone preshader instead of shader bytecode.
const LARGE_OBJECT_PRESHADER: u32 = 2;
/// Large-object `technique` meaning the object belongs to a sampler parameter.
const SAMPLER_OWNED: u32 = u32::MAX;

fn entry_point(object_index: u32) -> String {
    format!("ShaderFunction{object_index}")
}

pub(crate) fn find_parameter(params: &[Param], name: &str) -> Result<usize, EffectError> {
    params
        .iter()
        .position(|p| p.value.name.as_deref() == Some(name))
        .ok_or_else(|| EffectError::ParameterNotFound(name.to_owned()))
}

fn object_mut(objects: &mut [EffectObject], index: u32) -> Result<&mut EffectObject, EffectError> {
    let count = objects.len();
    objects
        .get_mut(index as usize)
        .ok_or(EffectError::BadObjectIndex { index, count })
}

pub(crate) struct Resolver<'a> {
    options: &'a EffectOptions,
    cache: &'a mut ShaderCache,
    params: &'a [Param],
    techniques: &'a [Technique],
    errors: Vec<ParseError>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        options: &'a EffectOptions,
        cache: &'a mut ShaderCache,
        params: &'a [Param],
        techniques: &'a [Technique],
    ) -> Self {
        Self {
            options,
            cache,
            params,
            techniques,
            errors: Vec::new(),
        }
    }

    /// Translation problems of the embedded shaders; they do not fail the effect.
    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }

    /// Small objects are referenced by object index and not tied to a pass: strings, texture
    /// names and shaders shared between passes.
    pub fn read_small_objects(
        &mut self,
        toc: &mut Cursor<'_>,
        count: u32,
        objects: &mut [EffectObject],
    ) -> Result<(), EffectError> {
        for _ in 0..count {
            let index = toc.read_u32("small object")?;
            let length = toc.read_u32("small object")?;
            let block = toc.read_block(length, "small object")?;

            let object = object_mut(objects, index)?;
            match object.ty {
                SymbolType::String => {
                    if !block.is_empty() {
                        object.data = ObjectData::String(c_string(block));
                    }
                }
                ty if ty.is_texture() || ty.is_sampler() => {
                    if !block.is_empty() {
                        object.data = ObjectData::Mapping(c_string(block));
                    }
                }
                ty if ty.is_shader() => {
                    let shader = self.translate_shader(block, index, None, None)?;
                    object.data = ObjectData::Shader(shader);
                }
                ty => {
                    return Err(EffectError::UnexpectedObjectType {
                        table: "small",
                        index,
                        ty,
                    })
                }
            }
        }
        Ok(())
    }

    /// Large objects belong to one state: a render state of a technique pass, or a sampler
    /// state of a parameter.
    pub fn read_large_objects(
        &mut self,
        toc: &mut Cursor<'_>,
        count: u32,
        objects: &mut [EffectObject],
    ) -> Result<(), EffectError> {
        for _ in 0..count {
            let technique = toc.read_u32("large object")?;
            let index = toc.read_u32("large object")?;
            let _unknown = toc.read_u32("large object")?;
            let state = toc.read_u32("large object")?;
            let kind = toc.read_u32("large object")?;
            let length = toc.read_u32("large object")?;
            let block = toc.read_block(length, "large object")?;

            let object_index = self.owning_state_object(technique, index, state)?;
            let owner = (technique != SAMPLER_OWNED).then_some(technique);
            let object = object_mut(objects, object_index)?;
            match object.ty {
                ty if ty.is_shader() => {
                    let shader = if kind == LARGE_OBJECT_PRESHADER {
                        self.standalone_preshader(block, owner, Some(index))?
                    } else {
                        self.translate_shader(block, object_index, owner, Some(index))?
                    };
                    object.data = ObjectData::Shader(shader);
                }
                ty if ty.is_texture() || ty.is_sampler() => {
                    if !block.is_empty() {
                        object.data = ObjectData::Mapping(c_string(block));
                    }
                }
                SymbolType::Void => {
                    debug!(object = object_index, length, "skipping large object of type void");
                }
                ty => {
                    return Err(EffectError::UnexpectedObjectType {
                        table: "large",
                        index: object_index,
                        ty,
                    })
                }
            }
        }
        Ok(())
    }

    /// Object index stored in the state a large object is attached to.
    fn owning_state_object(
        &self,
        technique: u32,
        index: u32,
        state: u32,
    ) -> Result<u32, EffectError> {
        let value = if technique == SAMPLER_OWNED {
            let param = self.params.get(index as usize).ok_or_else(|| {
                EffectError::bad_reference(format!("large object names parameter {index}"))
            })?;
            let states = param.value.sampler_states().map_err(|_| {
                EffectError::bad_reference(format!("parameter {index} is not a sampler"))
            })?;
            states.get(state as usize).map(|s| &s.value).ok_or_else(|| {
                EffectError::bad_reference(format!("sampler state {state} of parameter {index}"))
            })?
        } else {
            self.techniques
                .get(technique as usize)
                .and_then(|t| t.passes.get(index as usize))
                .and_then(|p| p.states.get(state as usize))
                .map(|s| &s.value)
                .ok_or_else(|| {
                    EffectError::bad_reference(format!(
                        "technique {technique} pass {index} state {state}"
                    ))
                })?
        };
        value
            .first_word()
            .ok_or_else(|| EffectError::bad_reference("state without an object index"))
    }

    fn translate_shader(
        &mut self,
        bytecode: &[u8],
        object_index: u32,
        technique: Option<u32>,
        pass: Option<u32>,
    ) -> Result<EffectShader, EffectError> {
        let options = TranslateOptions {
            mainfn: entry_point(object_index),
            ..self.options.translate.clone()
        };
        let data = self
            .cache
            .get_or_translate(self.options.profile, bytecode, &options);
        for error in &data.errors {
            warn!(object = object_index, %error, "effect shader failed to translate");
        }
        self.errors.extend(data.errors.iter().cloned());
        let data = Box::new(ParseData::clone(&data));

        let mut params = Vec::with_capacity(data.symbols.len());
        let mut samplers = Vec::new();
        for symbol in &data.symbols {
            let param = find_parameter(self.params, &symbol.name)?;
            params.push(param);
            if symbol.register_set == SymbolRegisterSet::Sampler {
                samplers.push(SamplerStateRegister {
                    name: self.params[param].value.name.clone().unwrap_or_default(),
                    register: symbol.register_index,
                    param,
                });
            }
        }
        let preshader_params = match &data.preshader {
            Some(preshader) => preshader
                .symbols
                .iter()
                .map(|s| find_parameter(self.params, &s.name))
                .collect::<Result<_, _>>()?,
            None => Vec::new(),
        };

        Ok(EffectShader {
            technique,
            pass,
            code: ShaderCode::Shader(data),
            params,
            preshader_params,
            samplers,
        })
    }

    /// A pass whose shader is picked from an array parameter at commit time stores the array's
    /// name followed by the preshader computing the index.
    fn standalone_preshader(
        &mut self,
        block: &[u8],
        technique: Option<u32>,
        pass: Option<u32>,
    ) -> Result<EffectShader, EffectError> {
        let array = read_string(block, 0)?
            .ok_or_else(|| EffectError::malformed("standalone preshader without an array name"))?;
        let name_len = block
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .unwrap_or_default();
        let tokens: Vec<u32> = block
            .get(4 + name_len..)
            .unwrap_or_default()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let preshader = parse_preshader(&tokens)?;

        let params = vec![find_parameter(self.params, &array)?];
        let preshader_params = preshader
            .symbols
            .iter()
            .map(|s| find_parameter(self.params, &s.name))
            .collect::<Result<_, _>>()?;
        debug!(
            array = %array,
            inputs = preshader.symbols.len(),
            "standalone preshader"
        );

        Ok(EffectShader {
            technique,
            pass,
            code: ShaderCode::Preshader(Box::new(preshader)),
            params,
            preshader_params,
            samplers: Vec::new(),
        })
    }
}
