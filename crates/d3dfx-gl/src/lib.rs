//! OpenGL runtime for translated Direct3D 9 shaders and effects.
//!
//! A [`GlContext`] compiles [`d3dfx_shader`] output for one profile, links vertex/pixel pairs
//! on demand (caching the result), mirrors the D3D constant register files and uploads only
//! what changed before each draw. [`GlEffect`] plays back [`d3dfx_effect`] passes on top of it.
//!
//! The embedder supplies GL through the [`GlApi`] trait.

pub mod api;
mod backend;
pub mod caps;
mod context;
mod effect;
pub mod error;
mod program;
pub mod registers;
#[doc(hidden)]
pub mod testing;

pub use api::{gl, GLenum, GLint, GLuint, GlApi};
pub use caps::{available_profiles, best_profile, GlCaps, GlExtensions};
pub use context::{GlContext, GlContextConfig, VertexAttributeType, MAX_VERTEX_ATTRIBS};
pub use effect::{copy_parameter_data, EffectStateChanges, GlEffect};
pub use error::GlError;
pub use program::{ArrayLocations, GlProgram, GlShader, ProgramHandles, StageUniforms, MAX_USAGE_INDEX};
pub use registers::{RegisterFiles, StageRegisters};
