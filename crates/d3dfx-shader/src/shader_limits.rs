//! Centralized limits for D3D9 shader and preshader decoding.
//!
//! Bytecode arrives from effect files and game content and is treated as untrusted input. These
//! limits bound memory usage so that a corrupt blob cannot trigger large allocations.

/// Maximum accepted D3D9 shader bytecode length in bytes.
///
/// Real-world SM1-SM3 shaders are a few KiB. Effect files can embed dozens of them, so this cap is
/// per blob rather than per effect.
pub(crate) const MAX_SHADER_BYTECODE_BYTES: usize = 256 * 1024; // 256 KiB

/// Maximum accepted shader token count (DWORDs / `u32`s).
pub(crate) const MAX_SHADER_TOKEN_COUNT: usize = MAX_SHADER_BYTECODE_BYTES / 4;

/// Largest register index accepted in any register file.
///
/// The token encoding reaches 2047. GL register files are sized to 2048 vec4 slots
/// (`MAX_REG_FILE_F / 4`), so anything above is rejected during decode.
pub(crate) const MAX_SHADER_REGISTER_INDEX: u32 = 2047;

/// Largest `t#`/`oT#` index for the texture coordinate interpolators.
pub(crate) const MAX_TEXCOORD_REGISTER_INDEX: u32 = 7;

/// Largest `s#` sampler index.
pub(crate) const MAX_SAMPLER_REGISTER_INDEX: u32 = 15;

/// Largest `r#` temporary index (ps_3_0 and vs_3_0 expose 32).
pub(crate) const MAX_TEMP_REGISTER_INDEX: u32 = 31;

/// Upper bound on preshader instruction counts read from an `FXLC` block.
///
/// The count is checked against the block length before allocating, this keeps a hostile count
/// from reserving gigabytes even when the block claims to be huge.
pub(crate) const MAX_PRESHADER_INSTRUCTIONS: u32 = 64 * 1024;

/// Upper bound on constant-table entries read from a `CTAB` block.
pub(crate) const MAX_CTAB_CONSTANTS: u32 = 4096;

/// Maximum nesting depth of struct members in a constant table type description.
pub(crate) const MAX_CTAB_TYPE_DEPTH: u32 = 16;
