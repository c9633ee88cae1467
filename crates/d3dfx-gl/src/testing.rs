//! An in-memory [`GlApi`] that records calls, for tests of the runtime and its embedders.

use hashbrown::HashMap;

use crate::api::{gl, GLenum, GLint, GLuint, GlApi};

/// A state-changing GL call, as [`RecordingGl`] saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Enable(GLenum),
    Disable(GLenum),
    CreateShader(GLenum, GLuint),
    ShaderSource(GLuint, String),
    DeleteShader(GLuint),
    CreateProgram(GLuint),
    AttachShader(GLuint, GLuint),
    LinkProgram(GLuint),
    DeleteProgram(GLuint),
    UseProgram(GLuint),
    Uniform1i(GLint, GLint),
    Uniform4fv(GLint, Vec<f32>),
    Uniform4iv(GLint, Vec<i32>),
    Uniform1iv(GLint, Vec<i32>),
    GenProgramArb(GLuint),
    BindProgramArb(GLenum, GLuint),
    ProgramStringArb(GLenum, String),
    DeleteProgramArb(GLuint),
    LocalParameter4fv(GLenum, GLuint, [f32; 4]),
    LocalParameterI4iv(GLenum, GLuint, [i32; 4]),
    EnableVertexAttribArray(GLuint),
    DisableVertexAttribArray(GLuint),
    VertexAttribPointer {
        index: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        stride: GLint,
        offset: usize,
    },
    VertexAttribDivisor(GLuint, GLuint),
}

/// Pretends to be a driver: strings and integers come from its fields, object names count up
/// from 1, and every state change lands in `calls`.
#[derive(Debug, Default)]
pub struct RecordingGl {
    pub version: String,
    /// `None` makes `SHADING_LANGUAGE_VERSION` raise `INVALID_ENUM`.
    pub glsl_version: Option<String>,
    pub extensions: Vec<String>,
    /// Answer extension queries through `GetStringi` instead of the legacy string.
    pub indexed_extensions: bool,
    pub integers: HashMap<GLenum, GLint>,
    /// Uniform and attribute locations by name; anything missing is -1.
    pub uniform_locations: HashMap<String, GLint>,
    pub attrib_locations: HashMap<String, GLint>,
    pub fail_compile: Option<String>,
    pub fail_link: Option<String>,
    /// Error position and message the next `ProgramStringARB` reports.
    pub arb_error: Option<(GLint, String)>,
    pub calls: Vec<Call>,
    pending_error: Option<GLenum>,
    next_name: GLuint,
}

impl RecordingGl {
    pub fn new(version: &str, glsl_version: Option<&str>, extensions: &[&str]) -> Self {
        let mut integers = HashMap::new();
        integers.insert(gl::MAX_TEXTURE_IMAGE_UNITS, 16);
        integers.insert(gl::MAX_VERTEX_UNIFORM_COMPONENTS, 1024);
        integers.insert(gl::MAX_FRAGMENT_UNIFORM_COMPONENTS, 1024);
        Self {
            version: version.to_owned(),
            glsl_version: glsl_version.map(str::to_owned),
            extensions: extensions.iter().map(|e| (*e).to_owned()).collect(),
            integers,
            ..Self::default()
        }
    }

    /// A GL 2.1 driver with GLSL 1.20.
    pub fn gl2() -> Self {
        Self::new("2.1 Mesa", Some("1.20"), &[])
    }

    /// A core 4.6 driver listing extensions through `GetStringi`.
    pub fn modern() -> Self {
        let mut api = Self::new(
            "4.6.0 NVIDIA",
            Some("4.60 NVIDIA"),
            &["GL_ARB_instanced_arrays", "GL_ARB_vertex_program", "GL_ARB_fragment_program"],
        );
        api.indexed_extensions = true;
        api
    }

    /// A fixed-function era driver with only the ARB assembly extensions.
    pub fn arb() -> Self {
        Self::new(
            "1.5",
            None,
            &["GL_ARB_vertex_program", "GL_ARB_fragment_program"],
        )
    }

    pub fn with_uniform(mut self, name: &str, location: GLint) -> Self {
        self.uniform_locations.insert(name.to_owned(), location);
        self
    }

    pub fn with_attrib(mut self, name: &str, location: GLint) -> Self {
        self.attrib_locations.insert(name.to_owned(), location);
        self
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    fn name(&mut self) -> GLuint {
        self.next_name += 1;
        self.next_name
    }
}

impl GlApi for RecordingGl {
    fn get_error(&mut self) -> GLenum {
        self.pending_error.take().unwrap_or(gl::NO_ERROR)
    }

    fn get_string(&mut self, name: GLenum) -> Option<String> {
        match name {
            gl::VERSION => Some(self.version.clone()),
            gl::EXTENSIONS if !self.indexed_extensions => Some(self.extensions.join(" ")),
            gl::SHADING_LANGUAGE_VERSION => {
                if self.glsl_version.is_none() {
                    self.pending_error = Some(gl::INVALID_ENUM);
                }
                self.glsl_version.clone()
            }
            gl::PROGRAM_ERROR_STRING_ARB => self.arb_error.as_ref().map(|(_, m)| m.clone()),
            _ => None,
        }
    }

    fn get_string_i(&mut self, name: GLenum, index: GLuint) -> Option<String> {
        match name {
            gl::EXTENSIONS => self.extensions.get(index as usize).cloned(),
            _ => None,
        }
    }

    fn get_integer(&mut self, pname: GLenum) -> GLint {
        match pname {
            gl::NUM_EXTENSIONS => self.extensions.len() as GLint,
            gl::PROGRAM_ERROR_POSITION_ARB => self.arb_error.as_ref().map_or(-1, |(p, _)| *p),
            _ => self.integers.get(&pname).copied().unwrap_or(0),
        }
    }

    fn enable(&mut self, cap: GLenum) {
        self.calls.push(Call::Enable(cap));
    }

    fn disable(&mut self, cap: GLenum) {
        self.calls.push(Call::Disable(cap));
    }

    fn create_shader(&mut self, ty: GLenum) -> GLuint {
        let shader = self.name();
        self.calls.push(Call::CreateShader(ty, shader));
        shader
    }

    fn shader_source(&mut self, shader: GLuint, source: &str) {
        self.calls.push(Call::ShaderSource(shader, source.to_owned()));
    }

    fn compile_shader(&mut self, _shader: GLuint) {}

    fn shader_compile_status(&mut self, _shader: GLuint) -> bool {
        self.fail_compile.is_none()
    }

    fn shader_info_log(&mut self, _shader: GLuint) -> String {
        self.fail_compile.clone().unwrap_or_default()
    }

    fn delete_shader(&mut self, shader: GLuint) {
        self.calls.push(Call::DeleteShader(shader));
    }

    fn create_program(&mut self) -> GLuint {
        let program = self.name();
        self.calls.push(Call::CreateProgram(program));
        program
    }

    fn attach_shader(&mut self, program: GLuint, shader: GLuint) {
        self.calls.push(Call::AttachShader(program, shader));
    }

    fn link_program(&mut self, program: GLuint) {
        self.calls.push(Call::LinkProgram(program));
    }

    fn program_link_status(&mut self, _program: GLuint) -> bool {
        self.fail_link.is_none()
    }

    fn program_info_log(&mut self, _program: GLuint) -> String {
        self.fail_link.clone().unwrap_or_default()
    }

    fn delete_program(&mut self, program: GLuint) {
        self.calls.push(Call::DeleteProgram(program));
    }

    fn use_program(&mut self, program: GLuint) {
        self.calls.push(Call::UseProgram(program));
    }

    fn get_uniform_location(&mut self, _program: GLuint, name: &str) -> GLint {
        self.uniform_locations.get(name).copied().unwrap_or(-1)
    }

    fn get_attrib_location(&mut self, _program: GLuint, name: &str) -> GLint {
        self.attrib_locations.get(name).copied().unwrap_or(-1)
    }

    fn uniform_1i(&mut self, location: GLint, value: GLint) {
        self.calls.push(Call::Uniform1i(location, value));
    }

    fn uniform_4fv(&mut self, location: GLint, values: &[f32]) {
        self.calls.push(Call::Uniform4fv(location, values.to_vec()));
    }

    fn uniform_4iv(&mut self, location: GLint, values: &[i32]) {
        self.calls.push(Call::Uniform4iv(location, values.to_vec()));
    }

    fn uniform_1iv(&mut self, location: GLint, values: &[i32]) {
        self.calls.push(Call::Uniform1iv(location, values.to_vec()));
    }

    fn gen_program_arb(&mut self) -> GLuint {
        let program = self.name();
        self.calls.push(Call::GenProgramArb(program));
        program
    }

    fn bind_program_arb(&mut self, target: GLenum, program: GLuint) {
        self.calls.push(Call::BindProgramArb(target, program));
    }

    fn program_string_arb(&mut self, target: GLenum, _format: GLenum, source: &str) {
        if self.arb_error.is_some() {
            self.pending_error = Some(gl::INVALID_OPERATION);
        }
        self.calls.push(Call::ProgramStringArb(target, source.to_owned()));
    }

    fn delete_program_arb(&mut self, program: GLuint) {
        self.calls.push(Call::DeleteProgramArb(program));
    }

    fn get_program_iv_arb(&mut self, _target: GLenum, pname: GLenum) -> GLint {
        self.integers.get(&pname).copied().unwrap_or(0)
    }

    fn program_local_parameter_4fv_arb(&mut self, target: GLenum, index: GLuint, values: &[f32; 4]) {
        self.calls.push(Call::LocalParameter4fv(target, index, *values));
    }

    fn program_local_parameter_i4iv_nv(&mut self, target: GLenum, index: GLuint, values: &[i32; 4]) {
        self.calls.push(Call::LocalParameterI4iv(target, index, *values));
    }

    fn enable_vertex_attrib_array(&mut self, index: GLuint) {
        self.calls.push(Call::EnableVertexAttribArray(index));
    }

    fn disable_vertex_attrib_array(&mut self, index: GLuint) {
        self.calls.push(Call::DisableVertexAttribArray(index));
    }

    fn vertex_attrib_pointer(
        &mut self,
        index: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        stride: GLint,
        offset: usize,
    ) {
        self.calls.push(Call::VertexAttribPointer {
            index,
            size,
            ty,
            normalized,
            stride,
            offset,
        });
    }

    fn vertex_attrib_divisor(&mut self, index: GLuint, divisor: GLuint) {
        self.calls.push(Call::VertexAttribDivisor(index, divisor));
    }
}
