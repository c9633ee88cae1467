//! Direct3D 9 effect containers (`.fxb`, XNA `.xnb` effect payloads).
//!
//! [`parse_effect`] reads parameters, techniques and passes, then resolves the object table:
//! shader blobs are translated with `d3dfx-shader` for the requested profile and cross-linked to
//! the parameters feeding their constants and samplers. The resulting [`Effect`] carries the
//! technique/pass cursor used for playback.

#[doc(hidden)]
pub mod builder;
mod effect;
pub mod error;
mod parse;
mod reader;
mod resolve;
pub mod states;
pub mod types;

use d3dfx_shader::{Profile, TranslateOptions};

pub use effect::Effect;
pub use error::{EffectApiError, EffectError};
pub use parse::{parse_effect, parse_effect_with_cache};
pub use states::{RenderStateType, SamplerStateType};
pub use types::*;

/// How embedded shaders are translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectOptions {
    pub profile: Profile,
    /// Swizzles and sampler map passed to every shader; `mainfn` is replaced per object.
    pub translate: TranslateOptions,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self {
            profile: Profile::Glsl,
            translate: TranslateOptions::default(),
        }
    }
}

impl EffectOptions {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }
}
