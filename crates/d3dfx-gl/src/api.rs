//! The slice of OpenGL the runtime drives.
//!
//! Entry point loading stays with the embedder: an implementation of [`GlApi`] forwards to
//! whichever functions the driver exposes (GL 2.0 core, `ARB_shader_objects`, ES 2.0).

pub type GLenum = u32;
pub type GLuint = u32;
pub type GLint = i32;

/// Enumerants used by the runtime.
pub mod gl {
    use super::GLenum;

    pub const NO_ERROR: GLenum = 0;
    pub const INVALID_ENUM: GLenum = 0x0500;
    pub const INVALID_OPERATION: GLenum = 0x0502;

    pub const VERSION: GLenum = 0x1F02;
    pub const EXTENSIONS: GLenum = 0x1F03;
    pub const NUM_EXTENSIONS: GLenum = 0x821D;
    pub const SHADING_LANGUAGE_VERSION: GLenum = 0x8B8C;

    pub const BYTE: GLenum = 0x1400;
    pub const UNSIGNED_BYTE: GLenum = 0x1401;
    pub const SHORT: GLenum = 0x1402;
    pub const UNSIGNED_SHORT: GLenum = 0x1403;
    pub const INT: GLenum = 0x1404;
    pub const UNSIGNED_INT: GLenum = 0x1405;
    pub const FLOAT: GLenum = 0x1406;
    pub const DOUBLE: GLenum = 0x140A;
    pub const HALF_FLOAT_ARB: GLenum = 0x140B;
    pub const HALF_FLOAT_NV: GLenum = 0x140B;
    pub const HALF_FLOAT_OES: GLenum = 0x8D61;

    pub const VERTEX_SHADER: GLenum = 0x8B31;
    pub const FRAGMENT_SHADER: GLenum = 0x8B30;
    pub const MAX_VERTEX_UNIFORM_COMPONENTS: GLenum = 0x8B4A;
    pub const MAX_FRAGMENT_UNIFORM_COMPONENTS: GLenum = 0x8B49;
    pub const MAX_TEXTURE_IMAGE_UNITS: GLenum = 0x8872;
    pub const PROGRAM_POINT_SIZE: GLenum = 0x8642;

    pub const VERTEX_PROGRAM_ARB: GLenum = 0x8620;
    pub const FRAGMENT_PROGRAM_ARB: GLenum = 0x8804;
    pub const PROGRAM_FORMAT_ASCII_ARB: GLenum = 0x8875;
    pub const PROGRAM_ERROR_POSITION_ARB: GLenum = 0x864B;
    pub const PROGRAM_ERROR_STRING_ARB: GLenum = 0x8874;
    pub const MAX_PROGRAM_PARAMETERS_ARB: GLenum = 0x88A9;
}

/// OpenGL calls made by the runtime, with Rust-side buffers in place of raw pointers.
///
/// Methods mirror their GL namesakes one to one; status queries (`GetShaderiv` with
/// `COMPILE_STATUS` and friends) are folded into boolean helpers.
pub trait GlApi {
    fn get_error(&mut self) -> GLenum;
    fn get_string(&mut self, name: GLenum) -> Option<String>;
    fn get_string_i(&mut self, name: GLenum, index: GLuint) -> Option<String>;
    fn get_integer(&mut self, pname: GLenum) -> GLint;
    fn enable(&mut self, cap: GLenum);
    fn disable(&mut self, cap: GLenum);

    // GLSL shader objects.
    fn create_shader(&mut self, ty: GLenum) -> GLuint;
    fn shader_source(&mut self, shader: GLuint, source: &str);
    fn compile_shader(&mut self, shader: GLuint);
    fn shader_compile_status(&mut self, shader: GLuint) -> bool;
    fn shader_info_log(&mut self, shader: GLuint) -> String;
    fn delete_shader(&mut self, shader: GLuint);
    fn create_program(&mut self) -> GLuint;
    fn attach_shader(&mut self, program: GLuint, shader: GLuint);
    fn link_program(&mut self, program: GLuint);
    fn program_link_status(&mut self, program: GLuint) -> bool;
    fn program_info_log(&mut self, program: GLuint) -> String;
    fn delete_program(&mut self, program: GLuint);
    fn use_program(&mut self, program: GLuint);
    fn get_uniform_location(&mut self, program: GLuint, name: &str) -> GLint;
    fn get_attrib_location(&mut self, program: GLuint, name: &str) -> GLint;
    fn uniform_1i(&mut self, location: GLint, value: GLint);
    /// `values.len() / 4` vectors.
    fn uniform_4fv(&mut self, location: GLint, values: &[f32]);
    fn uniform_4iv(&mut self, location: GLint, values: &[i32]);
    fn uniform_1iv(&mut self, location: GLint, values: &[i32]);

    // ARB assembly programs.
    fn gen_program_arb(&mut self) -> GLuint;
    fn bind_program_arb(&mut self, target: GLenum, program: GLuint);
    fn program_string_arb(&mut self, target: GLenum, format: GLenum, source: &str);
    fn delete_program_arb(&mut self, program: GLuint);
    fn get_program_iv_arb(&mut self, target: GLenum, pname: GLenum) -> GLint;
    fn program_local_parameter_4fv_arb(&mut self, target: GLenum, index: GLuint, values: &[f32; 4]);
    /// `NV_gpu_program4` integer locals.
    fn program_local_parameter_i4iv_nv(&mut self, target: GLenum, index: GLuint, values: &[i32; 4]);

    // Vertex arrays.
    fn enable_vertex_attrib_array(&mut self, index: GLuint);
    fn disable_vertex_attrib_array(&mut self, index: GLuint);
    fn vertex_attrib_pointer(
        &mut self,
        index: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        stride: GLint,
        offset: usize,
    );
    fn vertex_attrib_divisor(&mut self, index: GLuint, divisor: GLuint);
}
