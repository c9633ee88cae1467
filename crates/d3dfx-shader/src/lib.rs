//! Direct3D 9 shader bytecode translation.
//!
//! [`parse`] decodes an SM1-SM3 token stream, reads its `CTAB` constant table and embedded
//! preshader, and emits GLSL or ARB assembly for a [`Profile`]. The returned [`ParseData`] carries
//! everything a GL runtime needs to bind the result: packed uniform layout, samplers, attributes
//! and `def` constants.

mod analysis;
mod arb1;
pub mod cache;
pub mod ctab;
pub mod decode;
mod glsl;
pub mod parse;
pub mod preshader;
pub mod profile;
pub mod types;

mod shader_limits;

pub use analysis::CodegenError;
pub use cache::{ShaderCache, ShaderCacheLookup, ShaderCacheLookupSource};
pub use ctab::{parse_constant_table, ConstantTable, CtabError};
pub use decode::{decode_u32_tokens, decode_u8_le_bytes, DecodeError, DecodedShader};
pub use parse::{parse, ParseData};
pub use preshader::{parse_preshader, Preshader, PreshaderError};
pub use profile::{Profile, UnknownProfile};
pub use types::*;

/// Caller-controlled translation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Name of the generated entry point (GLSL profiles only).
    pub mainfn: String,
    pub swizzles: Vec<AttributeSwizzle>,
    pub sampler_map: Vec<SamplerMap>,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            mainfn: "main".to_owned(),
            swizzles: Vec::new(),
            sampler_map: Vec::new(),
        }
    }
}
