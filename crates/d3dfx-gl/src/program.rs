//! Compiled shaders, linked programs and the uniform arrays a program uploads.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use d3dfx_shader::{ParseData, ShaderStage, Uniform, UniformType, Usage};

use crate::api::{GLint, GLuint};
use crate::registers::{RegisterFiles, MAX_TEXBEMS};

/// Usage indices tracked per vertex attribute semantic (`TEXCOORD0..15`).
pub const MAX_USAGE_INDEX: usize = 16;

/// GL objects whose last handle went away; the context deletes them on its next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    Shader(GLuint),
    Program(GLuint),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ReleaseQueue(Rc<RefCell<Vec<Released>>>);

impl ReleaseQueue {
    fn push(&self, released: Released) {
        self.0.borrow_mut().push(released);
    }

    pub fn drain(&self) -> Vec<Released> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// A shader compiled for the context's profile.
///
/// Shared through `Rc`: linked programs hold their shaders, so the GL object is deleted only
/// once no program and no caller refers to it.
pub struct GlShader {
    handle: GLuint,
    data: Rc<ParseData>,
    release: ReleaseQueue,
}

impl GlShader {
    pub(crate) fn new(handle: GLuint, data: Rc<ParseData>, release: ReleaseQueue) -> Self {
        Self {
            handle,
            data,
            release,
        }
    }

    pub fn handle(&self) -> GLuint {
        self.handle
    }

    pub fn parse_data(&self) -> &ParseData {
        &self.data
    }

    pub fn stage(&self) -> Option<ShaderStage> {
        self.data.stage()
    }
}

impl fmt::Debug for GlShader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlShader")
            .field("handle", &self.handle)
            .field("stage", &self.stage())
            .finish()
    }
}

impl Drop for GlShader {
    fn drop(&mut self) {
        self.release.push(Released::Shader(self.handle));
    }
}

/// GL names a bound program is made of; zero for an absent stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramHandles {
    pub program: GLuint,
    pub vertex: GLuint,
    pub pixel: GLuint,
}

/// A non-constant uniform fed from a stage's register file.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UniformMap {
    pub stage: ShaderStage,
    pub uniform: Uniform,
}

/// Locations of a GLSL program's `{vs,ps}_uniforms_*` arrays; -1 when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLocations {
    pub float4: GLint,
    pub int4: GLint,
    pub bool: GLint,
}

impl Default for ArrayLocations {
    fn default() -> Self {
        Self {
            float4: -1,
            int4: -1,
            bool: -1,
        }
    }
}

/// The packed uniform arrays one stage of a program uploads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageUniforms {
    /// Four floats per slot; a pixel stage ends with two bump-environment slots per texbem
    /// sampler.
    pub float4: Vec<f32>,
    pub int4: Vec<i32>,
    pub bool: Vec<i32>,
}

impl StageUniforms {
    pub(crate) fn sized_for(data: &ParseData) -> Self {
        let float4 = data.float4_count() + 2 * data.texbem_count();
        Self {
            float4: vec![0.0; float4 as usize * 4],
            int4: vec![0; data.int4_count() as usize * 4],
            bool: vec![0; data.bool_count() as usize],
        }
    }

    /// Slots of the float array that come from the register file.
    pub fn texbem_base(&self, texbem_count: u32) -> usize {
        (self.float4.len() / 4).saturating_sub(2 * texbem_count as usize)
    }
}

pub(crate) fn stage_slot(stage: ShaderStage) -> usize {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Pixel => 1,
    }
}

/// Copies `src` over `dst` when they differ.
fn sync<T: Copy + PartialEq>(dst: Option<&mut [T]>, src: Option<&[T]>) -> bool {
    match (dst, src) {
        (Some(dst), Some(src)) if dst != src => {
            dst.copy_from_slice(src);
            true
        }
        _ => false,
    }
}

/// A linked vertex/pixel pair with its uniform layout and attribute bindings.
pub struct GlProgram {
    pub(crate) handles: ProgramHandles,
    vertex: Option<Rc<GlShader>>,
    pixel: Option<Rc<GlShader>>,
    /// Vertex uniforms first, then pixel, each in the shader's uniform order.
    pub(crate) uniforms: Vec<UniformMap>,
    pub(crate) attrib_locations: [[GLint; MAX_USAGE_INDEX]; Usage::COUNT],
    pub(crate) uses_pointsize: bool,
    pub(crate) texbem_count: u32,
    pub(crate) locations: [ArrayLocations; 2],
    /// Context generation the uniform arrays were last refreshed at.
    pub(crate) generation: Cell<u64>,
    pub(crate) uniform_values: RefCell<[StageUniforms; 2]>,
    release: ReleaseQueue,
}

impl GlProgram {
    pub(crate) fn new(
        handles: ProgramHandles,
        vertex: Option<Rc<GlShader>>,
        pixel: Option<Rc<GlShader>>,
        generation: u64,
        release: ReleaseQueue,
    ) -> Self {
        let sized = |shader: &Option<Rc<GlShader>>| {
            shader
                .as_ref()
                .map(|s| StageUniforms::sized_for(s.parse_data()))
                .unwrap_or_default()
        };
        let uniform_values = RefCell::new([sized(&vertex), sized(&pixel)]);
        Self {
            handles,
            vertex,
            pixel,
            uniforms: Vec::new(),
            attrib_locations: [[-1; MAX_USAGE_INDEX]; Usage::COUNT],
            uses_pointsize: false,
            texbem_count: 0,
            locations: [ArrayLocations::default(); 2],
            generation: Cell::new(generation),
            uniform_values,
            release,
        }
    }

    pub fn handle(&self) -> GLuint {
        self.handles.program
    }

    pub fn handles(&self) -> ProgramHandles {
        self.handles
    }

    pub fn vertex_shader(&self) -> Option<&Rc<GlShader>> {
        self.vertex.as_ref()
    }

    pub fn pixel_shader(&self) -> Option<&Rc<GlShader>> {
        self.pixel.as_ref()
    }

    pub fn uses(&self, shader: &Rc<GlShader>) -> bool {
        let same = |s: &Option<Rc<GlShader>>| s.as_ref().is_some_and(|s| Rc::ptr_eq(s, shader));
        same(&self.vertex) || same(&self.pixel)
    }

    pub fn uses_pointsize(&self) -> bool {
        self.uses_pointsize
    }

    pub fn texbem_count(&self) -> u32 {
        self.texbem_count
    }

    pub fn array_locations(&self, stage: ShaderStage) -> ArrayLocations {
        self.locations[stage_slot(stage)]
    }

    /// Snapshot of the arrays last uploaded (or about to be) for `stage`.
    pub fn uniform_values(&self, stage: ShaderStage) -> StageUniforms {
        self.uniform_values.borrow()[stage_slot(stage)].clone()
    }

    pub fn attrib_location(&self, usage: Usage, index: u32) -> GLint {
        self.attrib_locations[usage as usize]
            .get(index as usize)
            .copied()
            .unwrap_or(-1)
    }

    pub(crate) fn has_uniforms(&self) -> bool {
        !self.uniforms.is_empty() || self.texbem_count > 0
    }

    /// Pulls register file values into the uniform arrays. Returns whether anything changed.
    pub(crate) fn refresh(&self, registers: &RegisterFiles) -> bool {
        let mut values = self.uniform_values.borrow_mut();
        let mut changed = false;
        // Next float/int/bool slot per stage.
        let mut cursors = [[0usize; 3]; 2];

        for map in &self.uniforms {
            let slot = stage_slot(map.stage);
            let src = registers.stage(map.stage);
            let dst = &mut values[slot];
            let cursor = &mut cursors[slot];
            let count = map.uniform.array_count.max(1) as usize;
            let index = map.uniform.index as usize;
            match map.uniform.ty {
                UniformType::Float => {
                    let at = cursor[0] * 4;
                    changed |= sync(
                        dst.float4.get_mut(at..at + count * 4),
                        src.f.get(index * 4..(index + count) * 4),
                    );
                    cursor[0] += count;
                }
                UniformType::Int => {
                    let at = cursor[1] * 4;
                    changed |= sync(
                        dst.int4.get_mut(at..at + count * 4),
                        src.i.get(index * 4..(index + count) * 4),
                    );
                    cursor[1] += count;
                }
                UniformType::Bool => {
                    let at = cursor[2];
                    let dst = dst.bool.iter_mut().skip(at).take(count);
                    for (d, s) in dst.zip(src.b.iter().skip(index)) {
                        if *d != i32::from(*s) {
                            *d = i32::from(*s);
                            changed = true;
                        }
                    }
                    cursor[2] += count;
                }
            }
        }

        if let Some(pixel) = self.pixel.as_ref().filter(|_| self.texbem_count > 0) {
            let dst = &mut values[stage_slot(ShaderStage::Pixel)];
            let mut at = dst.texbem_base(self.texbem_count) * 4;
            for sampler in pixel.parse_data().samplers.iter().filter(|s| s.texbem) {
                let stage = sampler.index as usize;
                if !(1..=MAX_TEXBEMS).contains(&stage) {
                    continue;
                }
                let mut env = [0.0f32; 8];
                env[..6].copy_from_slice(&registers.texbem[6 * (stage - 1)..6 * stage]);
                changed |= sync(dst.float4.get_mut(at..at + 8), Some(&env[..]));
                at += 8;
            }
        }

        changed
    }
}

impl fmt::Debug for GlProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlProgram")
            .field("handles", &self.handles)
            .field("uniforms", &self.uniforms.len())
            .field("texbem_count", &self.texbem_count)
            .field("generation", &self.generation.get())
            .finish()
    }
}

impl Drop for GlProgram {
    fn drop(&mut self) {
        self.release.push(Released::Program(self.handles.program));
    }
}
