//! Per-stage constant register files, the D3D-side view of shader uniforms.

use d3dfx_shader::ShaderStage;

/// `c#` registers per stage.
pub const MAX_REG_FILE_F: usize = 8192;
/// `i#` registers per stage.
pub const MAX_REG_FILE_I: usize = 2047;
/// `b#` registers per stage.
pub const MAX_REG_FILE_B: usize = 2047;
/// ps_1_x has four texture stages and `texbem` cannot sample t0.
pub const MAX_TEXBEMS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct StageRegisters {
    /// Four floats per register.
    pub f: Vec<f32>,
    /// Four ints per register.
    pub i: Vec<i32>,
    /// One 0/1 byte per register.
    pub b: Vec<u8>,
}

impl Default for StageRegisters {
    fn default() -> Self {
        Self {
            f: vec![0.0; MAX_REG_FILE_F * 4],
            i: vec![0; MAX_REG_FILE_I * 4],
            b: vec![0; MAX_REG_FILE_B],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterFiles {
    pub vertex: StageRegisters,
    pub pixel: StageRegisters,
    /// Bump environment of texture stages 1..=MAX_TEXBEMS: the 2x2 matrix, then luminance
    /// scale and offset.
    pub texbem: [f32; MAX_TEXBEMS * 6],
}

impl Default for RegisterFiles {
    fn default() -> Self {
        Self {
            vertex: StageRegisters::default(),
            pixel: StageRegisters::default(),
            texbem: [0.0; MAX_TEXBEMS * 6],
        }
    }
}

impl RegisterFiles {
    pub fn stage(&self, stage: ShaderStage) -> &StageRegisters {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Pixel => &self.pixel,
        }
    }

    pub fn stage_mut(&mut self, stage: ShaderStage) -> &mut StageRegisters {
        match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Pixel => &mut self.pixel,
        }
    }
}

/// Copies whole vec4 registers from `src` into `file` starting at register `start`, clamped to
/// the file. Returns the number of registers written.
pub(crate) fn write_vec4<T: Copy>(file: &mut [T], start: usize, src: &[T]) -> usize {
    let capacity = (file.len() / 4).saturating_sub(start);
    let count = (src.len() / 4).min(capacity);
    if count > 0 {
        file[start * 4..(start + count) * 4].copy_from_slice(&src[..count * 4]);
    }
    count
}

/// Reads whole vec4 registers into `dst`, clamped like [`write_vec4`].
pub(crate) fn read_vec4<T: Copy>(file: &[T], start: usize, dst: &mut [T]) -> usize {
    let capacity = (file.len() / 4).saturating_sub(start);
    let count = (dst.len() / 4).min(capacity);
    if count > 0 {
        dst[..count * 4].copy_from_slice(&file[start * 4..(start + count) * 4]);
    }
    count
}
