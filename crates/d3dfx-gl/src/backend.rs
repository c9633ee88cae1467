//! Profile backends: how GLSL and ARB assembly programs are compiled, linked and fed.

use d3dfx_shader::{Attribute, ParseData, Profile, Sampler, ShaderStage, UniformType};
use tracing::debug;

use crate::api::{gl, GLenum, GLint, GLuint, GlApi};
use crate::caps::{GlCaps, GlExtensions};
use crate::error::GlError;
use crate::program::{stage_slot, ArrayLocations, GlProgram, ProgramHandles};

fn stage_of(data: &ParseData) -> Result<ShaderStage, GlError> {
    data.stage()
        .ok_or_else(|| GlError::Translate("shader has no version token".to_owned()))
}

/// Operations that differ between the GLSL and the ARB assembly runtime paths.
pub(crate) trait ProfileBackend {
    /// `def` arrays need uploading at link time (GLSL declares them as uniforms).
    fn must_push_constant_arrays(&self) -> bool;
    /// Sampler uniforms need their texture unit set at link time.
    fn must_push_samplers(&self) -> bool;
    fn max_uniforms(&self, api: &mut dyn GlApi, stage: ShaderStage) -> i32;
    fn compile_shader(&self, api: &mut dyn GlApi, data: &ParseData) -> Result<GLuint, GlError>;
    fn delete_shader(&self, api: &mut dyn GlApi, shader: GLuint);
    fn link_program(
        &mut self,
        api: &mut dyn GlApi,
        vertex: Option<GLuint>,
        pixel: Option<GLuint>,
    ) -> Result<GLuint, GlError>;
    fn delete_program(&self, api: &mut dyn GlApi, program: GLuint);
    /// Resolves anything needed before the first upload.
    fn final_init_program(&self, api: &mut dyn GlApi, program: &mut GlProgram);
    fn use_program(&self, api: &mut dyn GlApi, program: Option<ProgramHandles>);
    fn sampler_location(&self, api: &mut dyn GlApi, program: GLuint, sampler: &Sampler) -> GLint;
    fn attrib_location(&self, api: &mut dyn GlApi, program: GLuint, attribute: &Attribute) -> GLint;
    fn push_constant_array(&self, api: &mut dyn GlApi, program: GLuint, name: &str, values: &[f32]);
    fn push_sampler(&self, api: &mut dyn GlApi, location: GLint, unit: GLuint);
    /// Uploads the program's uniform arrays; it must be the one in use.
    fn push_uniforms(&self, api: &mut dyn GlApi, program: &GlProgram);
}

pub(crate) struct GlslBackend;

impl ProfileBackend for GlslBackend {
    fn must_push_constant_arrays(&self) -> bool {
        true
    }

    fn must_push_samplers(&self) -> bool {
        true
    }

    fn max_uniforms(&self, api: &mut dyn GlApi, stage: ShaderStage) -> i32 {
        api.get_integer(match stage {
            ShaderStage::Vertex => gl::MAX_VERTEX_UNIFORM_COMPONENTS,
            ShaderStage::Pixel => gl::MAX_FRAGMENT_UNIFORM_COMPONENTS,
        })
    }

    fn compile_shader(&self, api: &mut dyn GlApi, data: &ParseData) -> Result<GLuint, GlError> {
        let ty = match stage_of(data)? {
            ShaderStage::Vertex => gl::VERTEX_SHADER,
            ShaderStage::Pixel => gl::FRAGMENT_SHADER,
        };
        let shader = api.create_shader(ty);
        api.shader_source(shader, &data.output);
        api.compile_shader(shader);
        if !api.shader_compile_status(shader) {
            let log = api.shader_info_log(shader);
            api.delete_shader(shader);
            return Err(GlError::Compile(log));
        }
        Ok(shader)
    }

    fn delete_shader(&self, api: &mut dyn GlApi, shader: GLuint) {
        api.delete_shader(shader);
    }

    fn link_program(
        &mut self,
        api: &mut dyn GlApi,
        vertex: Option<GLuint>,
        pixel: Option<GLuint>,
    ) -> Result<GLuint, GlError> {
        let program = api.create_program();
        for shader in vertex.into_iter().chain(pixel) {
            api.attach_shader(program, shader);
        }
        api.link_program(program);
        if !api.program_link_status(program) {
            let log = api.program_info_log(program);
            api.delete_program(program);
            return Err(GlError::Link(log));
        }
        Ok(program)
    }

    fn delete_program(&self, api: &mut dyn GlApi, program: GLuint) {
        api.delete_program(program);
    }

    fn final_init_program(&self, api: &mut dyn GlApi, program: &mut GlProgram) {
        let handle = program.handles.program;
        for stage in [ShaderStage::Vertex, ShaderStage::Pixel] {
            let p = stage.prefix();
            program.locations[stage_slot(stage)] = ArrayLocations {
                float4: api.get_uniform_location(handle, &format!("{p}_uniforms_vec4")),
                int4: api.get_uniform_location(handle, &format!("{p}_uniforms_ivec4")),
                bool: api.get_uniform_location(handle, &format!("{p}_uniforms_bool")),
            };
        }
    }

    fn use_program(&self, api: &mut dyn GlApi, program: Option<ProgramHandles>) {
        api.use_program(program.map_or(0, |p| p.program));
    }

    fn sampler_location(&self, api: &mut dyn GlApi, program: GLuint, sampler: &Sampler) -> GLint {
        api.get_uniform_location(program, &sampler.name)
    }

    fn attrib_location(&self, api: &mut dyn GlApi, program: GLuint, attribute: &Attribute) -> GLint {
        api.get_attrib_location(program, &attribute.name)
    }

    fn push_constant_array(&self, api: &mut dyn GlApi, program: GLuint, name: &str, values: &[f32]) {
        let location = api.get_uniform_location(program, name);
        if location >= 0 {
            api.uniform_4fv(location, values);
        }
    }

    fn push_sampler(&self, api: &mut dyn GlApi, location: GLint, unit: GLuint) {
        api.uniform_1i(location, unit as GLint);
    }

    fn push_uniforms(&self, api: &mut dyn GlApi, program: &GlProgram) {
        let values = program.uniform_values.borrow();
        for stage in [ShaderStage::Vertex, ShaderStage::Pixel] {
            let slot = stage_slot(stage);
            let locations = program.locations[slot];
            let values = &values[slot];
            if locations.float4 >= 0 && !values.float4.is_empty() {
                api.uniform_4fv(locations.float4, &values.float4);
            }
            if locations.int4 >= 0 && !values.int4.is_empty() {
                api.uniform_4iv(locations.int4, &values.int4);
            }
            if locations.bool >= 0 && !values.bool.is_empty() {
                api.uniform_1iv(locations.bool, &values.bool);
            }
        }
    }
}

/// ARB_vertex_program/ARB_fragment_program, optionally with the NV extensions.
pub(crate) struct ArbBackend {
    /// Integer locals through `NV_gpu_program4`; plain ARB only takes floats.
    integer_locals: bool,
    /// Assembly programs are never linked; programs are counters identifying a pair.
    next_program: GLuint,
}

impl ArbBackend {
    pub fn new(integer_locals: bool) -> Self {
        Self {
            integer_locals,
            next_program: 0,
        }
    }

    fn target(stage: ShaderStage) -> GLenum {
        match stage {
            ShaderStage::Vertex => gl::VERTEX_PROGRAM_ARB,
            ShaderStage::Pixel => gl::FRAGMENT_PROGRAM_ARB,
        }
    }

    fn push_ints(&self, api: &mut dyn GlApi, target: GLenum, location: GLuint, v: [i32; 4]) {
        if self.integer_locals {
            api.program_local_parameter_i4iv_nv(target, location, &v);
        } else {
            api.program_local_parameter_4fv_arb(target, location, &v.map(|i| i as f32));
        }
    }
}

impl ProfileBackend for ArbBackend {
    fn must_push_constant_arrays(&self) -> bool {
        false
    }

    fn must_push_samplers(&self) -> bool {
        false
    }

    fn max_uniforms(&self, api: &mut dyn GlApi, stage: ShaderStage) -> i32 {
        api.get_program_iv_arb(Self::target(stage), gl::MAX_PROGRAM_PARAMETERS_ARB)
    }

    fn compile_shader(&self, api: &mut dyn GlApi, data: &ParseData) -> Result<GLuint, GlError> {
        let target = Self::target(stage_of(data)?);
        let program = api.gen_program_arb();
        while api.get_error() != gl::NO_ERROR {}
        api.bind_program_arb(target, program);
        api.program_string_arb(target, gl::PROGRAM_FORMAT_ASCII_ARB, &data.output);
        if api.get_error() == gl::INVALID_OPERATION {
            let position = api.get_integer(gl::PROGRAM_ERROR_POSITION_ARB);
            let message = api
                .get_string(gl::PROGRAM_ERROR_STRING_ARB)
                .unwrap_or_default();
            api.bind_program_arb(target, 0);
            api.delete_program_arb(program);
            return Err(GlError::Arb1Compile { position, message });
        }
        Ok(program)
    }

    fn delete_shader(&self, api: &mut dyn GlApi, shader: GLuint) {
        api.delete_program_arb(shader);
    }

    fn link_program(
        &mut self,
        _api: &mut dyn GlApi,
        _vertex: Option<GLuint>,
        _pixel: Option<GLuint>,
    ) -> Result<GLuint, GlError> {
        self.next_program = self.next_program.wrapping_add(1).max(1);
        Ok(self.next_program)
    }

    fn delete_program(&self, _api: &mut dyn GlApi, _program: GLuint) {}

    fn final_init_program(&self, _api: &mut dyn GlApi, _program: &mut GlProgram) {}

    fn use_program(&self, api: &mut dyn GlApi, program: Option<ProgramHandles>) {
        let handles = program.unwrap_or_default();
        for (target, handle) in [
            (gl::VERTEX_PROGRAM_ARB, handles.vertex),
            (gl::FRAGMENT_PROGRAM_ARB, handles.pixel),
        ] {
            if handle == 0 {
                api.disable(target);
            } else {
                api.enable(target);
            }
            api.bind_program_arb(target, handle);
        }
    }

    fn sampler_location(&self, _api: &mut dyn GlApi, _program: GLuint, sampler: &Sampler) -> GLint {
        sampler.index as GLint
    }

    /// Vertex inputs are read from `vertex.attrib[]` at their input register.
    fn attrib_location(&self, _api: &mut dyn GlApi, _program: GLuint, attribute: &Attribute) -> GLint {
        attribute.register as GLint
    }

    fn push_constant_array(&self, _api: &mut dyn GlApi, _program: GLuint, _name: &str, _values: &[f32]) {}

    fn push_sampler(&self, _api: &mut dyn GlApi, _location: GLint, _unit: GLuint) {}

    fn push_uniforms(&self, api: &mut dyn GlApi, program: &GlProgram) {
        let values = program.uniform_values.borrow();
        let mut stage = None;
        // Local parameter slot, restarting for each stage, and the next element per array.
        let (mut location, mut f, mut i, mut b) = (0u32, 0usize, 0usize, 0usize);

        for map in &program.uniforms {
            if stage != Some(map.stage) {
                stage = Some(map.stage);
                (location, f, i, b) = (0, 0, 0, 0);
            }
            let target = Self::target(map.stage);
            let src = &values[stage_slot(map.stage)];
            for _ in 0..map.uniform.array_count.max(1) {
                match map.uniform.ty {
                    UniformType::Float => {
                        let mut v = [0.0; 4];
                        if let Some(s) = src.float4.get(f..f + 4) {
                            v.copy_from_slice(s);
                        }
                        api.program_local_parameter_4fv_arb(target, location, &v);
                        f += 4;
                    }
                    UniformType::Int => {
                        let mut v = [0; 4];
                        if let Some(s) = src.int4.get(i..i + 4) {
                            v.copy_from_slice(s);
                        }
                        self.push_ints(api, target, location, v);
                        i += 4;
                    }
                    UniformType::Bool => {
                        let bit = i32::from(src.bool.get(b).is_some_and(|v| *v != 0));
                        self.push_ints(api, target, location, [bit; 4]);
                        b += 1;
                    }
                }
                location += 1;
            }
        }

        if program.texbem_count > 0 {
            let pixel = &values[stage_slot(ShaderStage::Pixel)];
            let base = pixel.texbem_base(program.texbem_count);
            for slot in base..pixel.float4.len() / 4 {
                let mut v = [0.0; 4];
                v.copy_from_slice(&pixel.float4[slot * 4..slot * 4 + 4]);
                api.program_local_parameter_4fv_arb(gl::FRAGMENT_PROGRAM_ARB, slot as GLuint, &v);
            }
        }
        debug!(program = program.handles.program, "pushed ARB program locals");
    }
}

pub(crate) fn backend_for(profile: Profile, caps: &GlCaps) -> Box<dyn ProfileBackend> {
    if profile.is_glsl() {
        Box::new(GlslBackend)
    } else {
        Box::new(ArbBackend::new(caps.has(GlExtensions::NV_GPU_PROGRAM4)))
    }
}
