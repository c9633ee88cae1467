//! Target profiles the code generators can emit.

use std::fmt;
use std::str::FromStr;

pub const PROFILE_GLSL: &str = "glsl";
pub const PROFILE_GLSL120: &str = "glsl120";
pub const PROFILE_GLSLES: &str = "glsles";
pub const PROFILE_ARB1: &str = "arb1";
pub const PROFILE_NV2: &str = "nv2";
pub const PROFILE_NV3: &str = "nv3";
pub const PROFILE_NV4: &str = "nv4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Profile {
    /// GLSL 1.10.
    Glsl,
    /// GLSL 1.20.
    Glsl120,
    /// GLSL ES 1.00.
    GlslEs,
    /// `ARB_vertex_program` / `ARB_fragment_program`.
    Arb1,
    /// ARB1 with `NV_vertex_program2_option` / `NV_fragment_program2`.
    Nv2,
    /// ARB1 with `NV_vertex_program3` / `NV_fragment_program2`.
    Nv3,
    /// `NV_gpu_program4`.
    Nv4,
}

impl Profile {
    pub const ALL: [Profile; 7] = [
        Profile::Glsl,
        Profile::Glsl120,
        Profile::GlslEs,
        Profile::Arb1,
        Profile::Nv2,
        Profile::Nv3,
        Profile::Nv4,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Profile::Glsl => PROFILE_GLSL,
            Profile::Glsl120 => PROFILE_GLSL120,
            Profile::GlslEs => PROFILE_GLSLES,
            Profile::Arb1 => PROFILE_ARB1,
            Profile::Nv2 => PROFILE_NV2,
            Profile::Nv3 => PROFILE_NV3,
            Profile::Nv4 => PROFILE_NV4,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn is_glsl(self) -> bool {
        matches!(self, Profile::Glsl | Profile::Glsl120 | Profile::GlslEs)
    }

    /// Assembly-style profiles: constants are baked into the program text.
    pub fn is_arb(self) -> bool {
        !self.is_glsl()
    }

    /// NV extensions layered on top of ARB1 that unlock extra opcodes (`SIN`/`COS` in vertex
    /// programs, `DDX`/`DDY`, `TXL`/`TXD`).
    pub fn has_nv_extensions(self) -> bool {
        matches!(self, Profile::Nv2 | Profile::Nv3 | Profile::Nv4)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown or unsupported profile {0:?}")]
pub struct UnknownProfile(pub String);

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Profile::from_name(s).ok_or_else(|| UnknownProfile(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for profile in Profile::ALL {
            assert_eq!(profile.name().parse::<Profile>(), Ok(profile));
        }
        assert!("hlsl".parse::<Profile>().is_err());
        assert!(Profile::Nv3.is_arb());
        assert!(!Profile::Arb1.has_nv_extensions());
    }
}
