use d3dfx_effect::EffectApiError;
use d3dfx_shader::{PreshaderError, Profile, UnknownProfile};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GlError {
    #[error("missing basic OpenGL entry points")]
    MissingCoreOpenGl,
    #[error("{profile} profile needs {requirement}")]
    ProfileNeeds {
        profile: Profile,
        requirement: &'static str,
    },
    #[error("no profiles available")]
    NoProfiles,
    #[error(transparent)]
    UnknownProfile(#[from] UnknownProfile),
    #[error("{0} is not available")]
    MissingExtension(&'static str),
    /// The shader was translated for another profile, or never translated successfully.
    #[error("{0}")]
    Translate(String),
    /// Driver info log of a failed GLSL compile.
    #[error("{0}")]
    Compile(String),
    #[error("ARB1 compile error at position {position}: {message}")]
    Arb1Compile { position: i32, message: String },
    /// Driver info log of a failed link.
    #[error("{0}")]
    Link(String),
    #[error("no shaders to link")]
    NothingToLink,
    #[error("vertex attribute location {0} is out of range")]
    AttributeLocation(i32),
    #[error("shader selector {selector} is out of range for {count} shaders")]
    SelectorOutOfRange { selector: f32, count: usize },
    #[error("effect object {0} is not a shader")]
    NotAShader(u32),
    #[error(transparent)]
    Effect(#[from] EffectApiError),
    #[error("preshader failed: {0}")]
    Preshader(#[from] PreshaderError),
}
