//! Driver capability probing and profile selection.

use bitflags::bitflags;
use d3dfx_shader::Profile;
use tracing::debug;

use crate::api::{gl, GlApi};
use crate::error::GlError;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct GlExtensions: u32 {
        const ARB_VERTEX_PROGRAM = 1 << 0;
        const ARB_FRAGMENT_PROGRAM = 1 << 1;
        const NV_VERTEX_PROGRAM2_OPTION = 1 << 2;
        const NV_FRAGMENT_PROGRAM2 = 1 << 3;
        const NV_VERTEX_PROGRAM3 = 1 << 4;
        const NV_GPU_PROGRAM4 = 1 << 5;
        const ARB_SHADER_OBJECTS = 1 << 6;
        const ARB_VERTEX_SHADER = 1 << 7;
        const ARB_FRAGMENT_SHADER = 1 << 8;
        const ARB_SHADING_LANGUAGE_100 = 1 << 9;
        const NV_HALF_FLOAT = 1 << 10;
        const ARB_HALF_FLOAT_VERTEX = 1 << 11;
        const OES_VERTEX_HALF_FLOAT = 1 << 12;
        const ARB_INSTANCED_ARRAYS = 1 << 13;
    }
}

const EXTENSION_NAMES: &[(&str, GlExtensions)] = &[
    ("GL_ARB_vertex_program", GlExtensions::ARB_VERTEX_PROGRAM),
    ("GL_ARB_fragment_program", GlExtensions::ARB_FRAGMENT_PROGRAM),
    ("GL_NV_vertex_program2_option", GlExtensions::NV_VERTEX_PROGRAM2_OPTION),
    ("GL_NV_fragment_program2", GlExtensions::NV_FRAGMENT_PROGRAM2),
    ("GL_NV_vertex_program3", GlExtensions::NV_VERTEX_PROGRAM3),
    ("GL_NV_gpu_program4", GlExtensions::NV_GPU_PROGRAM4),
    ("GL_ARB_shader_objects", GlExtensions::ARB_SHADER_OBJECTS),
    ("GL_ARB_vertex_shader", GlExtensions::ARB_VERTEX_SHADER),
    ("GL_ARB_fragment_shader", GlExtensions::ARB_FRAGMENT_SHADER),
    ("GL_ARB_shading_language_100", GlExtensions::ARB_SHADING_LANGUAGE_100),
    ("GL_NV_half_float", GlExtensions::NV_HALF_FLOAT),
    ("GL_ARB_half_float_vertex", GlExtensions::ARB_HALF_FLOAT_VERTEX),
    ("GL_OES_vertex_half_float", GlExtensions::OES_VERTEX_HALF_FLOAT),
    ("GL_ARB_instanced_arrays", GlExtensions::ARB_INSTANCED_ARRAYS),
];

impl GlExtensions {
    /// The flag for a `GL_*` extension name, if it is one the runtime cares about.
    pub fn from_extension_name(name: &str) -> Option<Self> {
        EXTENSION_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, flag)| *flag)
    }
}

/// Profiles in the order [`best_profile`] prefers them.
const PROFILE_PRIORITY: [Profile; 6] = [
    Profile::Glsl120,
    Profile::Glsl,
    Profile::Nv4,
    Profile::Nv3,
    Profile::Nv2,
    Profile::Arb1,
];

const GLSL_EXTENSIONS: GlExtensions = GlExtensions::ARB_SHADER_OBJECTS
    .union(GlExtensions::ARB_VERTEX_SHADER)
    .union(GlExtensions::ARB_FRAGMENT_SHADER)
    .union(GlExtensions::ARB_SHADING_LANGUAGE_100);

/// What the current driver offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlCaps {
    /// `(major, minor)` of `GL_VERSION`.
    pub version: (u32, u32),
    pub es: bool,
    /// `None` when GLSL is unavailable.
    pub glsl_version: Option<(u32, u32)>,
    pub extensions: GlExtensions,
}

/// Leading `major.minor` of a version string; anything unparsable reads as `0.0`.
fn parse_version(s: &str) -> (u32, u32) {
    let mut parts = s.split(|c: char| !c.is_ascii_digit());
    let mut next = || parts.next().and_then(|p| p.parse().ok());
    match (next(), next()) {
        (Some(major), Some(minor)) => (major, minor),
        _ => (0, 0),
    }
}

impl GlCaps {
    pub fn detect(api: &mut dyn GlApi) -> Result<Self, GlError> {
        let version_string = api
            .get_string(gl::VERSION)
            .ok_or(GlError::MissingCoreOpenGl)?;
        let (es, version) = match version_string.strip_prefix("OpenGL ES ") {
            Some(rest) => (true, parse_version(rest)),
            None => (false, parse_version(&version_string)),
        };

        let mut extensions = GlExtensions::empty();
        let mut add = |name: &str| {
            if let Some(flag) = GlExtensions::from_extension_name(name) {
                extensions |= flag;
            }
        };
        if version >= (3, 0) {
            let count = api.get_integer(gl::NUM_EXTENSIONS).max(0) as u32;
            for i in 0..count {
                if let Some(name) = api.get_string_i(gl::EXTENSIONS, i) {
                    add(&name);
                }
            }
        } else if let Some(list) = api.get_string(gl::EXTENSIONS) {
            list.split_whitespace().for_each(add);
        }

        // Core since 3.0 and 3.3 respectively, whether or not the extension string says so.
        if !es && version >= (3, 0) {
            extensions |= GlExtensions::ARB_HALF_FLOAT_VERTEX;
        }
        if !es && version >= (3, 3) {
            extensions |= GlExtensions::ARB_INSTANCED_ARRAYS;
        }

        let has_glsl = version >= (2, 0) || extensions.contains(GLSL_EXTENSIONS);
        let glsl_version = if has_glsl {
            // Drain stale errors so an INVALID_ENUM below is ours.
            while api.get_error() != gl::NO_ERROR {}
            let s = api.get_string(gl::SHADING_LANGUAGE_VERSION);
            if api.get_error() == gl::INVALID_ENUM {
                None
            } else {
                s.map(|s| {
                    let s = s.strip_prefix("OpenGL ES GLSL ").unwrap_or(&s);
                    let s = s.strip_prefix("ES ").unwrap_or(s);
                    parse_version(s)
                })
            }
        } else {
            None
        };

        let caps = Self {
            version,
            es,
            glsl_version,
            extensions,
        };
        debug!(?caps, "detected OpenGL capabilities");
        Ok(caps)
    }

    pub fn has(&self, extensions: GlExtensions) -> bool {
        self.extensions.contains(extensions)
    }

    fn glsl_at_least(&self, version: (u32, u32)) -> bool {
        self.glsl_version.is_some_and(|v| v >= version)
    }

    /// Whether `profile` can run here, naming what is missing when it cannot.
    pub fn check_profile(&self, profile: Profile) -> Result<(), GlError> {
        let needs = |requirement| GlError::ProfileNeeds {
            profile,
            requirement,
        };
        let require = |ext: GlExtensions, name| {
            if self.has(ext) {
                Ok(())
            } else {
                Err(needs(name))
            }
        };
        let glsl = |version| {
            if self.glsl_at_least(version) {
                Ok(())
            } else {
                Err(needs("missing GLSL support"))
            }
        };

        match profile {
            Profile::GlslEs => glsl((1, 0)),
            Profile::Glsl => glsl((1, 10)),
            Profile::Glsl120 => glsl((1, 20)),
            Profile::Arb1 => {
                require(GlExtensions::ARB_VERTEX_PROGRAM, "GL_ARB_vertex_program")?;
                require(GlExtensions::ARB_FRAGMENT_PROGRAM, "GL_ARB_fragment_program")
            }
            Profile::Nv2 => {
                require(GlExtensions::ARB_VERTEX_PROGRAM, "GL_ARB_vertex_program")?;
                require(GlExtensions::ARB_FRAGMENT_PROGRAM, "GL_ARB_fragment_program")?;
                require(
                    GlExtensions::NV_VERTEX_PROGRAM2_OPTION,
                    "GL_NV_vertex_program2_option",
                )?;
                require(GlExtensions::NV_FRAGMENT_PROGRAM2, "GL_NV_fragment_program2")
            }
            Profile::Nv3 => {
                require(GlExtensions::ARB_VERTEX_PROGRAM, "GL_ARB_vertex_program")?;
                require(GlExtensions::ARB_FRAGMENT_PROGRAM, "GL_ARB_fragment_program")?;
                require(GlExtensions::NV_VERTEX_PROGRAM3, "GL_NV_vertex_program3")?;
                require(GlExtensions::NV_FRAGMENT_PROGRAM2, "GL_NV_fragment_program2")
            }
            Profile::Nv4 => require(GlExtensions::NV_GPU_PROGRAM4, "GL_NV_gpu_program4"),
        }
    }

    /// Usable profiles, best first. ES contexts only ever get GLSL ES.
    pub fn available_profiles(&self) -> Vec<Profile> {
        if self.es {
            return vec![Profile::GlslEs];
        }
        PROFILE_PRIORITY
            .into_iter()
            .filter(|p| self.check_profile(*p).is_ok())
            .collect()
    }
}

pub fn available_profiles(api: &mut dyn GlApi) -> Result<Vec<Profile>, GlError> {
    Ok(GlCaps::detect(api)?.available_profiles())
}

pub fn best_profile(api: &mut dyn GlApi) -> Result<Profile, GlError> {
    available_profiles(api)?
        .into_iter()
        .next()
        .ok_or(GlError::NoProfiles)
}
