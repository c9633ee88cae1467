//! Effect playback: binding pass shaders and feeding them parameter values.

use std::rc::Rc;

use d3dfx_effect::{Effect, Param, RenderStateType, SamplerStateRegister, ShaderCode, State};
use d3dfx_shader::{ShaderStage, Symbol, SymbolClass, SymbolRegisterSet, SymbolType};
use tracing::{debug, warn};

use crate::api::GlApi;
use crate::context::GlContext;
use crate::error::GlError;
use crate::program::{GlProgram, GlShader};

const STAGES: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Pixel];

/// Overwrites `dst[start..]` with `src`, stopping at whichever ends first.
fn fill<T>(dst: &mut [T], start: usize, src: impl Iterator<Item = T>) {
    for (d, s) in dst.iter_mut().skip(start).zip(src) {
        *d = s;
    }
}

/// Copies the parameter feeding each symbol into the register files the symbol lives in.
///
/// `param_indices[i]` is the parameter behind `symbols[i]`. Float parameters are copied
/// verbatim, as are structs; int and bool parameters bound to float registers are converted
/// per column. Files passed as `None` are left alone.
pub fn copy_parameter_data(
    params: &[Param],
    param_indices: &[usize],
    symbols: &[Symbol],
    f: &mut [f32],
    mut i: Option<&mut [i32]>,
    mut b: Option<&mut [u8]>,
) {
    for (symbol, &param) in symbols.iter().zip(param_indices) {
        let Some(value) = params.get(param).map(|p| &p.value) else {
            continue;
        };
        let Ok(words) = value.words() else {
            continue;
        };
        let start = symbol.register_index as usize * 4;
        let count = symbol.register_count as usize;
        let columns = (value.info.columns as usize).clamp(1, 4);

        if value.ty() == SymbolType::Float
            || (symbol.register_set == SymbolRegisterSet::Float4
                && value.class() == SymbolClass::Struct)
        {
            fill(f, start, words.iter().take(count * 4).map(|w| f32::from_bits(*w)));
            continue;
        }

        match symbol.register_set {
            SymbolRegisterSet::Float4 => {
                for row in 0..count {
                    let src = words.iter().skip(row * 4).take(columns);
                    fill(f, start + row * 4, src.map(|w| *w as i32 as f32));
                }
            }
            SymbolRegisterSet::Int4 => {
                if let Some(i) = i.as_deref_mut() {
                    fill(i, start, words.iter().take(count * 4).map(|w| *w as i32));
                }
            }
            SymbolRegisterSet::Bool => {
                let Some(b) = b.as_deref_mut() else {
                    continue;
                };
                // Bool registers are scalars: each row of the value fills up to `columns`
                // consecutive registers.
                let base = start / 4;
                let mut register = 0;
                let mut row = 0;
                'rows: while register < count {
                    let mut column = 0;
                    loop {
                        let Some(word) = words.get(row * 4 + column) else {
                            break 'rows;
                        };
                        if let Some(dst) = b.get_mut(base + register + column) {
                            *dst = u8::from(*word != 0);
                        }
                        column += 1;
                        if column >= columns || register + column >= count {
                            break;
                        }
                    }
                    register += column;
                    row += 1;
                }
            }
            SymbolRegisterSet::Sampler => {}
        }
    }
}

/// What a pass changes besides shaders, for the caller to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectStateChanges<'a> {
    pub render_states: &'a [State],
    pub vertex_samplers: &'a [SamplerStateRegister],
    pub pixel_samplers: &'a [SamplerStateRegister],
}

#[derive(Debug)]
struct CompiledObject {
    object: u32,
    shader: Rc<GlShader>,
}

/// An effect whose shaders are compiled for a [`GlContext`].
#[derive(Debug)]
pub struct GlEffect {
    effect: Effect,
    shaders: Vec<CompiledObject>,
    /// Objects holding a standalone preshader that picks a shader at commit time.
    preshaders: Vec<u32>,
    current: [Option<Rc<GlShader>>; 2],
    /// Shader objects the current pass names, standalone preshaders included.
    raw: [Option<u32>; 2],
    /// Shader objects in use after preshader selection.
    selected: [Option<u32>; 2],
    previous_program: Option<Rc<GlProgram>>,
    restore_program: bool,
    active: bool,
}

impl GlEffect {
    /// Compiles every shader object of `effect`. Nothing stays compiled if one fails.
    pub fn compile<A: GlApi>(ctx: &mut GlContext<A>, effect: Effect) -> Result<Self, GlError> {
        let mut shaders: Vec<CompiledObject> = Vec::new();
        let mut preshaders = Vec::new();

        for (index, object) in effect.objects.iter().enumerate() {
            if !object.ty.is_shader() {
                continue;
            }
            let Some(shader) = object.shader() else {
                continue;
            };
            let index = index as u32;
            let Some(data) = shader.parse_data() else {
                preshaders.push(index);
                continue;
            };
            match ctx.compile_parsed(Rc::new(data.clone())) {
                Ok(compiled) => shaders.push(CompiledObject {
                    object: index,
                    shader: compiled,
                }),
                Err(error) => {
                    for compiled in shaders {
                        ctx.delete_shader(compiled.shader);
                    }
                    return Err(error);
                }
            }
        }

        debug!(
            shaders = shaders.len(),
            preshaders = preshaders.len(),
            "compiled effect"
        );
        Ok(Self {
            effect,
            shaders,
            preshaders,
            current: [None, None],
            raw: [None, None],
            selected: [None, None],
            previous_program: None,
            restore_program: false,
            active: false,
        })
    }

    /// Releases the compiled shaders and evicts programs linked from them.
    pub fn delete<A: GlApi>(self, ctx: &mut GlContext<A>) {
        for compiled in self.shaders {
            ctx.delete_shader(compiled.shader);
        }
    }

    pub fn effect(&self) -> &Effect {
        &self.effect
    }

    /// Parameters and the technique cursor are edited through the effect.
    pub fn effect_mut(&mut self) -> &mut Effect {
        &mut self.effect
    }

    /// The compiled shader of effect object `object`.
    pub fn shader(&self, object: u32) -> Option<&Rc<GlShader>> {
        self.shaders
            .iter()
            .find(|c| c.object == object)
            .map(|c| &c.shader)
    }

    /// Starts rendering with the current technique and returns its pass count. With
    /// `save_shader_state`, [`Self::end`] rebinds the program bound now.
    pub fn begin<A: GlApi>(&mut self, ctx: &GlContext<A>, save_shader_state: bool) -> usize {
        self.restore_program = save_shader_state;
        if save_shader_state {
            self.previous_program = ctx.bound_program().cloned();
        }
        self.active = true;
        self.effect.pass_count()
    }

    pub fn begin_pass<A: GlApi>(&mut self, ctx: &mut GlContext<A>, pass: usize) -> Result<(), GlError> {
        // Stages the pass leaves alone keep what is bound.
        if let Some(program) = ctx.bound_program() {
            self.current = [
                program.vertex_shader().cloned(),
                program.pixel_shader().cloned(),
            ];
        }

        let pass = self.effect.begin_pass(pass)?;
        let mut has_preshader = false;
        for state in &pass.states {
            let slot = match state.ty() {
                Some(RenderStateType::VertexShader) => 0,
                Some(RenderStateType::PixelShader) => 1,
                _ => continue,
            };
            let Some(object) = state.value.first_word() else {
                continue;
            };
            if let Some(compiled) = self.shaders.iter().find(|c| c.object == object) {
                self.raw[slot] = Some(object);
                self.current[slot] = Some(compiled.shader.clone());
            } else if self.preshaders.contains(&object) {
                self.raw[slot] = Some(object);
                has_preshader = true;
            }
        }

        // Shader arrays are resolved, and bound, by the commit below.
        if !has_preshader {
            ctx.bind_shaders(self.current[0].as_ref(), self.current[1].as_ref())?;
        }
        self.commit_changes(ctx)
    }

    /// Runs shader selectors, then copies parameter values (and embedded preshader results)
    /// into the context's register files.
    pub fn commit_changes<A: GlApi>(&mut self, ctx: &mut GlContext<A>) -> Result<(), GlError> {
        let mut selector_ran = false;
        for slot in 0..2 {
            let Some(raw) = self.raw[slot] else {
                self.selected[slot] = None;
                continue;
            };
            if !self.preshaders.contains(&raw) {
                self.selected[slot] = Some(raw);
                continue;
            }
            let object = run_selector(&mut self.effect, raw)?;
            self.selected[slot] = Some(object);
            if let Some(compiled) = self.shaders.iter().find(|c| c.object == object) {
                self.current[slot] = Some(compiled.shader.clone());
            }
            selector_ran = true;
        }
        if selector_ran {
            ctx.bind_shaders(self.current[0].as_ref(), self.current[1].as_ref())?;
        }

        for (slot, stage) in STAGES.into_iter().enumerate() {
            let Some(object) = self.selected[slot] else {
                continue;
            };
            let params = &self.effect.params;
            let Some(shader) = self
                .effect
                .objects
                .get_mut(object as usize)
                .and_then(|o| o.shader_mut())
            else {
                continue;
            };
            let ShaderCode::Shader(data) = &mut shader.code else {
                continue;
            };

            let registers = ctx.registers_mut().stage_mut(stage);
            copy_parameter_data(
                params,
                &shader.params,
                &data.symbols,
                &mut registers.f,
                Some(&mut registers.i),
                Some(&mut registers.b),
            );
            if let Some(preshader) = data.preshader.as_mut() {
                copy_parameter_data(
                    params,
                    &shader.preshader_params,
                    &preshader.symbols,
                    &mut preshader.registers,
                    None,
                    None,
                );
                preshader
                    .run(&mut registers.f)
                    .inspect_err(|error| warn!(%error, "shader preshader failed"))?;
            }
        }

        ctx.touch();
        Ok(())
    }

    pub fn end_pass(&mut self) -> Result<(), GlError> {
        self.effect.end_pass()?;
        Ok(())
    }

    pub fn end<A: GlApi>(&mut self, ctx: &mut GlContext<A>) {
        if self.restore_program {
            self.restore_program = false;
            ctx.bind_program(self.previous_program.take());
        }
        self.active = false;
    }

    fn samplers(&self, slot: usize) -> &[SamplerStateRegister] {
        self.selected[slot]
            .and_then(|o| self.effect.objects.get(o as usize))
            .and_then(|o| o.shader())
            .map_or(&[][..], |s| s.samplers.as_slice())
    }

    /// Render and sampler states of the current pass, between [`Self::begin`] and
    /// [`Self::end`].
    pub fn state_changes(&self) -> Option<EffectStateChanges<'_>> {
        if !self.active {
            return None;
        }
        Some(EffectStateChanges {
            render_states: self
                .effect
                .current_pass()
                .map_or(&[][..], |p| p.states.as_slice()),
            vertex_samplers: self.samplers(0),
            pixel_samplers: self.samplers(1),
        })
    }
}

/// Runs the standalone preshader of object `raw` and returns the shader object it picks from
/// its array parameter.
fn run_selector(effect: &mut Effect, raw: u32) -> Result<u32, GlError> {
    let params = &effect.params;
    let shader = effect
        .objects
        .get_mut(raw as usize)
        .and_then(|o| o.shader_mut())
        .ok_or(GlError::NotAShader(raw))?;
    let ShaderCode::Preshader(preshader) = &mut shader.code else {
        return Err(GlError::NotAShader(raw));
    };

    for (symbol, &param) in preshader.symbols.iter().zip(&shader.preshader_params) {
        let Some(param) = params.get(param) else {
            continue;
        };
        let words = param.value.words()?;
        let columns = (param.value.info.columns as usize).min(4);
        for row in 0..words.len() / 4 {
            let at = (symbol.register_index as usize + row) * 4;
            for (c, word) in words[row * 4..row * 4 + columns].iter().enumerate() {
                if let Some(dst) = preshader.registers.get_mut(at + c) {
                    *dst = f32::from_bits(*word);
                }
            }
        }
    }

    let mut out = [0.0f32; 4];
    preshader
        .run(&mut out)
        .inspect_err(|error| warn!(%error, "selector preshader failed"))?;
    let selector = out[0];

    let array = shader
        .params
        .first()
        .and_then(|p| params.get(*p))
        .ok_or(GlError::NotAShader(raw))?
        .value
        .objects()?;
    let object = array
        .get(selector as usize)
        .copied()
        .ok_or(GlError::SelectorOutOfRange {
            selector,
            count: array.len(),
        })?;
    debug!(selector, object, "preshader selected shader");
    Ok(object)
}
