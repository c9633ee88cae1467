use std::fmt;
use std::rc::Rc;

use d3dfx_shader::{
    ConstantValue, ParseData, Profile, ShaderCache, ShaderStage, TranslateOptions, Uniform, Usage,
};
use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use crate::api::{gl, GLenum, GLint, GLuint, GlApi};
use crate::backend::{backend_for, ProfileBackend};
use crate::caps::{GlCaps, GlExtensions};
use crate::error::GlError;
use crate::program::{
    GlProgram, GlShader, ProgramHandles, ReleaseQueue, Released, UniformMap,
};
use crate::registers::{read_vec4, write_vec4, RegisterFiles, MAX_TEXBEMS};

/// Vertex attribute arrays the context tracks enable state for.
pub const MAX_VERTEX_ATTRIBS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlContextConfig {
    pub profile: Profile,
    /// Vertex shader samplers use the texture units after the 16 pixel samplers, as XNA 4 does.
    pub xna4_vertex_textures: bool,
    /// Size of the attribute enable tables; clamped to [`MAX_VERTEX_ATTRIBS`].
    pub max_vertex_attribs: usize,
}

impl Default for GlContextConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Glsl,
            xna4_vertex_textures: false,
            max_vertex_attribs: MAX_VERTEX_ATTRIBS,
        }
    }
}

impl GlContextConfig {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    pub fn from_profile_name(name: &str) -> Result<Self, GlError> {
        Ok(Self::new(name.parse::<Profile>()?))
    }
}

/// Component type of a vertex attribute array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttributeType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Float,
    Double,
    HalfFloat,
}

/// Link cache key: the GL names of the paired shaders, zero for an absent stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LinkKey {
    vertex: GLuint,
    pixel: GLuint,
}

fn shader_name(shader: Option<&Rc<GlShader>>) -> GLuint {
    shader.map_or(0, |s| s.handle())
}

/// `def` values covering registers `base..base + count`, packed four floats per register.
fn constant_array(data: &ParseData, uniform: &Uniform) -> Vec<f32> {
    let count = uniform.array_count.max(1);
    let mut values = vec![0.0; count as usize * 4];
    for constant in &data.constants {
        if let ConstantValue::Float(v) = constant.value {
            if let Some(slot) = constant.index.checked_sub(uniform.index).filter(|s| *s < count) {
                let at = slot as usize * 4;
                values[at..at + 4].copy_from_slice(&v);
            }
        }
    }
    values
}

/// Owns the GL state a D3D9-style renderer drives: register files, the bound program, the
/// link cache and vertex attribute enables.
pub struct GlContext<A: GlApi> {
    api: A,
    caps: GlCaps,
    profile: Profile,
    backend: Box<dyn ProfileBackend>,
    shader_cache: ShaderCache,
    vertex_sampler_offset: GLuint,
    registers: RegisterFiles,
    /// Bumped on every register write; programs refresh when theirs is older.
    generation: u64,
    bound_program: Option<Rc<GlProgram>>,
    link_cache: HashMap<LinkKey, Rc<GlProgram>>,
    want_attr: Vec<bool>,
    have_attr: Vec<bool>,
    divisors: Vec<GLuint>,
    /// One past the highest attribute array that may be enabled.
    max_attrs: usize,
    pointsize_enabled: bool,
    last_error: String,
    release: ReleaseQueue,
}

impl<A: GlApi> GlContext<A> {
    pub fn new(mut api: A, config: GlContextConfig) -> Result<Self, GlError> {
        let caps = GlCaps::detect(&mut api)?;
        caps.check_profile(config.profile)?;

        let vertex_sampler_offset = if config.xna4_vertex_textures {
            let max_textures = api.get_integer(gl::MAX_TEXTURE_IMAGE_UNITS);
            let max_vertex_textures = (max_textures - 16).min(4);
            (max_textures - max_vertex_textures).max(0) as GLuint
        } else {
            0
        };

        let attribs = config.max_vertex_attribs.min(MAX_VERTEX_ATTRIBS);
        let mut ctx = Self {
            backend: backend_for(config.profile, &caps),
            api,
            caps,
            profile: config.profile,
            shader_cache: ShaderCache::new(),
            vertex_sampler_offset,
            registers: RegisterFiles::default(),
            generation: 0,
            bound_program: None,
            link_cache: HashMap::new(),
            want_attr: vec![false; attribs],
            have_attr: vec![false; attribs],
            divisors: vec![0; attribs],
            max_attrs: 0,
            pointsize_enabled: false,
            last_error: String::new(),
            release: ReleaseQueue::default(),
        };
        ctx.backend.use_program(&mut ctx.api, None);
        debug!(profile = %ctx.profile, vertex_sampler_offset, "created GL context");
        Ok(ctx)
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn caps(&self) -> &GlCaps {
        &self.caps
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    /// Message of the most recent failed operation.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn fail<T>(&mut self, error: GlError) -> Result<T, GlError> {
        warn!(%error, "GL operation failed");
        self.last_error = error.to_string();
        Err(error)
    }

    /// Deletes GL objects whose last handle was dropped.
    fn collect_released(&mut self) {
        for released in self.release.drain() {
            match released {
                Released::Shader(shader) => {
                    trace!(shader, "deleting shader");
                    self.backend.delete_shader(&mut self.api, shader);
                }
                Released::Program(program) => {
                    trace!(program, "deleting program");
                    self.backend.delete_program(&mut self.api, program);
                }
            }
        }
    }

    /// Uniform components the driver allows for `stage`.
    pub fn max_uniforms(&mut self, stage: ShaderStage) -> i32 {
        self.backend.max_uniforms(&mut self.api, stage)
    }

    /// Translates `bytecode` for the context's profile (through the shader cache) and compiles it.
    pub fn compile_shader(
        &mut self,
        bytecode: &[u8],
        options: &TranslateOptions,
    ) -> Result<Rc<GlShader>, GlError> {
        let data = self
            .shader_cache
            .get_or_translate(self.profile, bytecode, options);
        let data = Rc::new(ParseData::clone(&data));
        self.compile_parsed(data)
    }

    /// Compiles an already translated shader.
    pub fn compile_parsed(&mut self, data: Rc<ParseData>) -> Result<Rc<GlShader>, GlError> {
        self.collect_released();
        if let Some(error) = data.errors.first() {
            return self.fail(GlError::Translate(error.to_string()));
        }
        if data.profile != self.profile {
            return self.fail(GlError::Translate(format!(
                "shader was translated for {}, context uses {}",
                data.profile, self.profile
            )));
        }
        match self.backend.compile_shader(&mut self.api, &data) {
            Ok(handle) => {
                debug!(handle, stage = ?data.stage(), "compiled shader");
                Ok(Rc::new(GlShader::new(handle, data, self.release.clone())))
            }
            Err(error) => self.fail(error),
        }
    }

    /// Drops the caller's handle and evicts every cached program using the shader. The GL
    /// object goes away once no program holds it either.
    pub fn delete_shader(&mut self, shader: Rc<GlShader>) {
        let before = self.link_cache.len();
        self.link_cache.retain(|_, program| !program.uses(&shader));
        debug!(
            handle = shader.handle(),
            evicted = before - self.link_cache.len(),
            "deleting shader"
        );
        drop(shader);
        self.collect_released();
    }

    pub fn delete_program(&mut self, program: Rc<GlProgram>) {
        drop(program);
        self.collect_released();
    }

    /// Links a program outside the cache. Either stage may be absent, not both.
    pub fn link_program(
        &mut self,
        vertex: Option<&Rc<GlShader>>,
        pixel: Option<&Rc<GlShader>>,
    ) -> Result<Rc<GlProgram>, GlError> {
        match self.link(vertex, pixel) {
            Ok(program) => Ok(program),
            Err(error) => self.fail(error),
        }
    }

    fn link(
        &mut self,
        vertex: Option<&Rc<GlShader>>,
        pixel: Option<&Rc<GlShader>>,
    ) -> Result<Rc<GlProgram>, GlError> {
        if vertex.is_none() && pixel.is_none() {
            return Err(GlError::NothingToLink);
        }
        let handles = ProgramHandles {
            program: self.backend.link_program(
                &mut self.api,
                vertex.map(|s| s.handle()),
                pixel.map(|s| s.handle()),
            )?,
            vertex: shader_name(vertex),
            pixel: shader_name(pixel),
        };
        let mut program = GlProgram::new(
            handles,
            vertex.cloned(),
            pixel.cloned(),
            self.generation.wrapping_sub(1),
            self.release.clone(),
        );
        let mut bound = false;

        let result = self.lookup_program(&mut program, vertex, pixel, &mut bound);
        if bound {
            let previous = self.bound_program.as_ref().map(|p| p.handles);
            self.backend.use_program(&mut self.api, previous);
        }
        // On failure the program drops here and queues its deletion.
        result?;

        self.backend.final_init_program(&mut self.api, &mut program);
        debug!(
            program = handles.program,
            vertex = handles.vertex,
            pixel = handles.pixel,
            uniforms = program.uniforms.len(),
            texbem = program.texbem_count,
            "linked program"
        );
        Ok(Rc::new(program))
    }

    /// Records attribute locations, uniform maps and sampler units of a fresh program.
    fn lookup_program(
        &mut self,
        program: &mut GlProgram,
        vertex: Option<&Rc<GlShader>>,
        pixel: Option<&Rc<GlShader>>,
        bound: &mut bool,
    ) -> Result<(), GlError> {
        let handle = program.handles.program;

        if let Some(vertex) = vertex {
            for attribute in &vertex.parse_data().attributes {
                let location = self.backend.attrib_location(&mut self.api, handle, attribute);
                if location >= 0 && location as usize >= MAX_VERTEX_ATTRIBS {
                    return Err(GlError::AttributeLocation(location));
                }
                if let Some(slot) = program.attrib_locations[attribute.usage as usize]
                    .get_mut(attribute.index as usize)
                {
                    *slot = location.max(-1);
                }
            }
        }

        for shader in vertex.into_iter().chain(pixel) {
            let data = shader.parse_data();
            let Some(stage) = data.stage() else {
                continue;
            };
            for uniform in &data.uniforms {
                if !uniform.constant {
                    program.uniforms.push(UniformMap {
                        stage,
                        uniform: uniform.clone(),
                    });
                } else if self.backend.must_push_constant_arrays() {
                    let values = constant_array(data, uniform);
                    self.use_during_link(program, bound);
                    self.backend
                        .push_constant_array(&mut self.api, handle, &uniform.name, &values);
                }
            }
            if stage == ShaderStage::Pixel {
                program.texbem_count += data.texbem_count();
            }

            if !data.samplers.is_empty() && self.backend.must_push_samplers() {
                self.use_during_link(program, bound);
                let offset = match stage {
                    ShaderStage::Vertex => self.vertex_sampler_offset,
                    ShaderStage::Pixel => 0,
                };
                for sampler in &data.samplers {
                    let location = self.backend.sampler_location(&mut self.api, handle, sampler);
                    if location >= 0 {
                        self.backend
                            .push_sampler(&mut self.api, location, sampler.index + offset);
                    }
                }
            }
        }

        program.uses_pointsize = vertex.is_some_and(|v| v.parse_data().uses_pointsize());
        Ok(())
    }

    fn use_during_link(&mut self, program: &GlProgram, bound: &mut bool) {
        if !*bound {
            self.backend.use_program(&mut self.api, Some(program.handles));
            *bound = true;
        }
    }

    pub fn bound_program(&self) -> Option<&Rc<GlProgram>> {
        self.bound_program.as_ref()
    }

    /// Makes `program` current. Attribute arrays are re-declared per draw, so the wanted set
    /// starts empty.
    pub fn bind_program(&mut self, program: Option<Rc<GlProgram>>) {
        let same = match (&program, &self.bound_program) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }

        let max = self.max_attrs;
        self.want_attr[..max].fill(false);
        if program.is_none() {
            self.update_enabled_arrays();
        }
        self.backend
            .use_program(&mut self.api, program.as_ref().map(|p| p.handles));
        self.bound_program = program;
        self.collect_released();
    }

    /// Binds the program linking `vertex` and `pixel`, linking it on first use.
    pub fn bind_shaders(
        &mut self,
        vertex: Option<&Rc<GlShader>>,
        pixel: Option<&Rc<GlShader>>,
    ) -> Result<(), GlError> {
        if vertex.is_none() && pixel.is_none() {
            self.bind_program(None);
            return Ok(());
        }
        let key = LinkKey {
            vertex: shader_name(vertex),
            pixel: shader_name(pixel),
        };
        let program = match self.link_cache.get(&key) {
            Some(program) => {
                trace!(vertex = key.vertex, pixel = key.pixel, "link cache hit");
                program.clone()
            }
            None => {
                let program = self.link_program(vertex, pixel)?;
                self.link_cache.insert(key, program.clone());
                program
            }
        };
        self.bind_program(Some(program));
        Ok(())
    }

    /// Looks up the linked program for a shader pair without linking.
    pub fn cached_program(
        &self,
        vertex: Option<&Rc<GlShader>>,
        pixel: Option<&Rc<GlShader>>,
    ) -> Option<&Rc<GlProgram>> {
        self.link_cache.get(&LinkKey {
            vertex: shader_name(vertex),
            pixel: shader_name(pixel),
        })
    }

    pub fn registers(&self) -> &RegisterFiles {
        &self.registers
    }

    /// Direct register file access; callers must [`Self::touch`] after writing.
    pub(crate) fn registers_mut(&mut self) -> &mut RegisterFiles {
        &mut self.registers
    }

    /// Marks the register files as changed.
    pub(crate) fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Writes `values.len() / 4` float registers starting at `c{start}`.
    pub fn set_uniform_f(&mut self, stage: ShaderStage, start: usize, values: &[f32]) {
        write_vec4(&mut self.registers.stage_mut(stage).f, start, values);
        self.touch();
    }

    pub fn uniform_f(&self, stage: ShaderStage, start: usize, values: &mut [f32]) -> usize {
        read_vec4(&self.registers.stage(stage).f, start, values)
    }

    /// Writes `values.len() / 4` integer registers starting at `i{start}`.
    pub fn set_uniform_i(&mut self, stage: ShaderStage, start: usize, values: &[i32]) {
        write_vec4(&mut self.registers.stage_mut(stage).i, start, values);
        self.touch();
    }

    pub fn uniform_i(&self, stage: ShaderStage, start: usize, values: &mut [i32]) -> usize {
        read_vec4(&self.registers.stage(stage).i, start, values)
    }

    /// Writes boolean registers starting at `b{start}`; any nonzero value reads back as 1.
    pub fn set_uniform_b(&mut self, stage: ShaderStage, start: usize, values: &[i32]) {
        let file = &mut self.registers.stage_mut(stage).b;
        for (dst, v) in file.iter_mut().skip(start).zip(values) {
            *dst = u8::from(*v != 0);
        }
        self.touch();
    }

    pub fn uniform_b(&self, stage: ShaderStage, start: usize, values: &mut [i32]) -> usize {
        let file = &self.registers.stage(stage).b;
        let mut count = 0;
        for (dst, v) in values.iter_mut().zip(file.iter().skip(start)) {
            *dst = i32::from(*v);
            count += 1;
        }
        count
    }

    /// Sets the bump environment `texbem` reads for texture stage `stage` (1..=3): the 2x2
    /// matrix in row order, then luminance scale and offset.
    pub fn set_legacy_bump_map_env(
        &mut self,
        stage: usize,
        matrix: [f32; 4],
        luminance_scale: f32,
        luminance_offset: f32,
    ) {
        if !(1..=MAX_TEXBEMS).contains(&stage) {
            debug!(stage, "ignoring bump environment of a stage texbem cannot use");
            return;
        }
        let env = &mut self.registers.texbem[6 * (stage - 1)..6 * stage];
        env[..4].copy_from_slice(&matrix);
        env[4] = luminance_scale;
        env[5] = luminance_offset;
        self.touch();
    }

    /// Attribute location the bound program's vertex shader uses for `usage`/`index`.
    pub fn vertex_attrib_location(&self, usage: Usage, index: u32) -> Option<GLuint> {
        let program = self.bound_program.as_ref()?;
        program.vertex_shader()?;
        let location = program.attrib_location(usage, index);
        (location >= 0).then_some(location as GLuint)
    }

    fn attrib_type(&self, ty: VertexAttributeType) -> GLenum {
        match ty {
            VertexAttributeType::Byte => gl::BYTE,
            VertexAttributeType::UnsignedByte => gl::UNSIGNED_BYTE,
            VertexAttributeType::Short => gl::SHORT,
            VertexAttributeType::UnsignedShort => gl::UNSIGNED_SHORT,
            VertexAttributeType::Int => gl::INT,
            VertexAttributeType::UnsignedInt => gl::UNSIGNED_INT,
            VertexAttributeType::Float => gl::FLOAT,
            VertexAttributeType::Double => gl::DOUBLE,
            VertexAttributeType::HalfFloat => {
                if self.caps.has(GlExtensions::NV_HALF_FLOAT) {
                    gl::HALF_FLOAT_NV
                } else if self.caps.has(GlExtensions::ARB_HALF_FLOAT_VERTEX) {
                    gl::HALF_FLOAT_ARB
                } else if self.caps.has(GlExtensions::OES_VERTEX_HALF_FLOAT) {
                    gl::HALF_FLOAT_OES
                } else {
                    gl::HALF_FLOAT_ARB
                }
            }
        }
    }

    /// Points the bound program's input for `usage`/`index` at the current vertex buffer and
    /// wants its array enabled at the next [`Self::program_ready`]. Inputs the program does not
    /// read are ignored.
    #[allow(clippy::too_many_arguments)]
    pub fn set_vertex_attribute(
        &mut self,
        usage: Usage,
        index: u32,
        size: GLint,
        ty: VertexAttributeType,
        normalized: bool,
        stride: GLint,
        offset: usize,
    ) {
        let Some(location) = self.vertex_attrib_location(usage, index) else {
            return;
        };
        let slot = location as usize;
        if slot >= self.want_attr.len() {
            return;
        }
        let gl_type = self.attrib_type(ty);
        self.api
            .vertex_attrib_pointer(location, size, gl_type, normalized, stride, offset);
        self.want_attr[slot] = true;
        self.max_attrs = self.max_attrs.max(slot + 1);
    }

    /// Instancing divisor of the input for `usage`/`index`; unchanged values are not resent.
    pub fn set_vertex_attrib_divisor(
        &mut self,
        usage: Usage,
        index: u32,
        divisor: GLuint,
    ) -> Result<(), GlError> {
        if !self.caps.has(GlExtensions::ARB_INSTANCED_ARRAYS) {
            return self.fail(GlError::MissingExtension("GL_ARB_instanced_arrays"));
        }
        let Some(location) = self.vertex_attrib_location(usage, index) else {
            return Ok(());
        };
        if let Some(current) = self.divisors.get_mut(location as usize) {
            if *current != divisor {
                *current = divisor;
                self.api.vertex_attrib_divisor(location, divisor);
            }
        }
        Ok(())
    }

    /// Enables wanted arrays, disables stale ones and shrinks the tracked range.
    fn update_enabled_arrays(&mut self) {
        let mut highest = None;
        for i in 0..self.max_attrs {
            let want = self.want_attr[i];
            if want != self.have_attr[i] {
                if want {
                    self.api.enable_vertex_attrib_array(i as GLuint);
                } else {
                    self.api.disable_vertex_attrib_array(i as GLuint);
                }
                self.have_attr[i] = want;
            }
            if want {
                highest = Some(i);
            }
        }
        self.max_attrs = highest.map_or(0, |i| i + 1);
    }

    /// Flushes pending state before a draw: attribute arrays, point size, and uniforms whose
    /// registers changed since the program last uploaded them.
    pub fn program_ready(&mut self) {
        let Some(program) = self.bound_program.clone() else {
            return;
        };
        self.update_enabled_arrays();

        if program.uses_pointsize != self.pointsize_enabled {
            if program.uses_pointsize {
                self.api.enable(gl::PROGRAM_POINT_SIZE);
            } else {
                self.api.disable(gl::PROGRAM_POINT_SIZE);
            }
            self.pointsize_enabled = program.uses_pointsize;
        }

        if program.has_uniforms() && program.generation.get() != self.generation {
            let changed = program.refresh(&self.registers);
            program.generation.set(self.generation);
            if changed {
                trace!(program = program.handles.program, "pushing uniforms");
                self.backend.push_uniforms(&mut self.api, &program);
            }
        }
    }
}

impl<A: GlApi> fmt::Debug for GlContext<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlContext")
            .field("profile", &self.profile)
            .field("caps", &self.caps)
            .field("generation", &self.generation)
            .field("bound_program", &self.bound_program.as_ref().map(|p| p.handle()))
            .field("linked_programs", &self.link_cache.len())
            .finish()
    }
}

impl<A: GlApi> Drop for GlContext<A> {
    fn drop(&mut self) {
        self.bind_program(None);
        self.link_cache.clear();
        self.collect_released();
    }
}
