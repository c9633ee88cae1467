use d3dfx_shader::{ParseError, Profile};
use tracing::debug;

use crate::error::EffectApiError;
use crate::types::{EffectObject, Param, Pass, SamplerState, SamplerStateRegister, Technique};

/// A parsed effect: parameters, techniques and the resolved object table, plus the
/// technique/pass cursor driven during playback.
#[derive(Debug, PartialEq)]
pub struct Effect {
    pub profile: Profile,
    /// Translation errors of embedded shaders. Fatal container errors never get this far.
    pub errors: Vec<ParseError>,
    pub params: Vec<Param>,
    pub techniques: Vec<Technique>,
    pub objects: Vec<EffectObject>,
    current_technique: Option<usize>,
    current_pass: Option<usize>,
}

/// A clone starts outside of any pass, whatever the state of the original.
impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            profile: self.profile,
            errors: self.errors.clone(),
            params: self.params.clone(),
            techniques: self.techniques.clone(),
            objects: self.objects.clone(),
            current_technique: self.current_technique,
            current_pass: None,
        }
    }
}

impl Effect {
    pub(crate) fn new(
        profile: Profile,
        errors: Vec<ParseError>,
        params: Vec<Param>,
        techniques: Vec<Technique>,
        objects: Vec<EffectObject>,
    ) -> Self {
        let current_technique = (!techniques.is_empty()).then_some(0);
        Self {
            profile,
            errors,
            params,
            techniques,
            objects,
            current_technique,
            current_pass: None,
        }
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params
            .iter()
            .position(|p| p.value.name.as_deref() == Some(name))
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.param_index(name).map(|i| &self.params[i])
    }

    /// Copies `data` into the value bytes of parameter `param`, starting `offset` bytes in.
    pub fn set_raw_value_handle(
        &mut self,
        param: usize,
        data: &[u8],
        offset: usize,
    ) -> Result<(), EffectApiError> {
        let count = self.params.len();
        let value = &mut self
            .params
            .get_mut(param)
            .ok_or(EffectApiError::ParameterOutOfRange {
                index: param,
                count,
            })?
            .value;
        let bytes = value.bytes_mut()?;
        let size = bytes.len();
        let dst = offset
            .checked_add(data.len())
            .and_then(|end| bytes.get_mut(offset..end))
            .ok_or(EffectApiError::ValueOverflow {
                offset,
                len: data.len(),
                size,
            })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    pub fn set_raw_value_name(
        &mut self,
        name: &str,
        data: &[u8],
        offset: usize,
    ) -> Result<(), EffectApiError> {
        let param = self
            .param_index(name)
            .ok_or_else(|| EffectApiError::UnknownParameter(name.to_owned()))?;
        self.set_raw_value_handle(param, data, offset)
    }

    pub fn current_technique_index(&self) -> Option<usize> {
        self.current_technique
    }

    pub fn current_technique(&self) -> Option<&Technique> {
        self.current_technique.and_then(|i| self.techniques.get(i))
    }

    pub fn set_technique(&mut self, index: usize) -> Result<(), EffectApiError> {
        if index >= self.techniques.len() {
            return Err(EffectApiError::TechniqueOutOfRange {
                index,
                count: self.techniques.len(),
            });
        }
        self.current_technique = Some(index);
        Ok(())
    }

    /// Technique after `after`, or the first one when `after` is `None`. Returns `None` past
    /// the last technique.
    pub fn find_next_valid_technique(&self, after: Option<usize>) -> Option<usize> {
        let next = after.map_or(0, |i| i + 1);
        (next < self.techniques.len()).then_some(next)
    }

    /// Passes of the current technique.
    pub fn pass_count(&self) -> usize {
        self.current_technique().map_or(0, |t| t.passes.len())
    }

    pub fn current_pass_index(&self) -> Option<usize> {
        self.current_pass
    }

    pub fn current_pass(&self) -> Option<&Pass> {
        let pass = self.current_pass?;
        self.current_technique()?.passes.get(pass)
    }

    /// Moves the cursor onto `pass` of the current technique.
    pub fn begin_pass(&mut self, pass: usize) -> Result<&Pass, EffectApiError> {
        if let Some(active) = self.current_pass {
            return Err(EffectApiError::PassActive(active));
        }
        let technique = self
            .current_technique
            .and_then(|i| self.techniques.get(i))
            .ok_or(EffectApiError::NoTechnique)?;
        let count = technique.passes.len();
        let selected = technique
            .passes
            .get(pass)
            .ok_or(EffectApiError::PassOutOfRange { pass, count })?;
        debug!(technique = ?technique.name, pass, states = selected.states.len(), "begin pass");
        self.current_pass = Some(pass);
        Ok(selected)
    }

    pub fn end_pass(&mut self) -> Result<(), EffectApiError> {
        self.current_pass
            .take()
            .map(|_| ())
            .ok_or(EffectApiError::NoActivePass)
    }

    /// The sampler states a shader's sampler register is configured with.
    pub fn sampler_states(&self, register: &SamplerStateRegister) -> &[SamplerState] {
        self.params
            .get(register.param)
            .and_then(|p| p.value.sampler_states().ok())
            .unwrap_or_default()
    }
}
