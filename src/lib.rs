//! Direct3D 9 shaders and effects on OpenGL.
//!
//! The work is split across three crates, re-exported here:
//!
//! - [`shader`]: bytecode decoding, constant tables, preshaders, and GLSL/ARB code generation.
//! - [`effect`]: effect containers, their parameters, techniques and passes.
//! - [`gl`]: the runtime that compiles, links and feeds translated shaders through a [`GlApi`].
//!
//! A typical embedder picks a profile with [`best_profile`], builds a [`GlContext`] for it,
//! parses effects with the same profile and plays them back through [`GlEffect`].

pub use d3dfx_effect as effect;
pub use d3dfx_gl as gl;
pub use d3dfx_shader as shader;

pub use d3dfx_effect::{parse_effect, Effect, EffectApiError, EffectError, EffectOptions};
pub use d3dfx_gl::{best_profile, GlApi, GlContext, GlContextConfig, GlEffect, GlError};
pub use d3dfx_shader::{parse, ParseData, Profile, ShaderCache, TranslateOptions};
