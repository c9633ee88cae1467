use super::{Preshader, PreshaderError, PreshaderOpcode, PreshaderOperand, PreshaderOperandType};

fn out_of_range(file: &'static str, index: usize) -> PreshaderError {
    PreshaderError::RegisterOutOfRange { file, index }
}

fn read(values: &[f64], file: &'static str, index: usize) -> Result<f64, PreshaderError> {
    values.get(index).copied().ok_or(out_of_range(file, index))
}

impl Preshader {
    /// Evaluates every instruction against [`Preshader::registers`], writing results to
    /// `outregs` (a flat float array of vec4 registers).
    ///
    /// Arithmetic runs in `f64`; outputs are narrowed to `f32` on store.
    pub fn run(&self, outregs: &mut [f32]) -> Result<(), PreshaderError> {
        let regs_i: &[i32] = bytemuck::cast_slice(self.registers.as_slice());
        let mut temps = vec![0.0f64; self.temp_count as usize];

        for inst in &self.instructions {
            let elems = (inst.element_count as usize).min(4);
            let scalar = inst.opcode.is_scalar();
            let mut src = [[0.0f64; 4]; 3];

            for (slot, operand) in inst.sources().iter().take(3).enumerate() {
                let lanes = &mut src[slot];
                let index = operand.index as usize;
                match operand.ty {
                    PreshaderOperandType::Literal => {
                        if scalar && slot == 0 {
                            let v = read(&self.literals, "literal", index)?;
                            lanes[..elems].fill(v);
                        } else {
                            for (i, lane) in lanes[..elems].iter_mut().enumerate() {
                                *lane = read(&self.literals, "literal", index + i)?;
                            }
                        }
                    }
                    PreshaderOperandType::Input if !operand.array_registers.is_empty() => {
                        lanes[0] = f64::from(self.dynamic_index(regs_i, operand)?);
                    }
                    PreshaderOperandType::Input => {
                        let count = if scalar && slot == 0 { 1 } else { elems };
                        for (i, lane) in lanes[..count].iter_mut().enumerate() {
                            *lane = self
                                .registers
                                .get(index + i)
                                .copied()
                                .map(f64::from)
                                .ok_or(out_of_range("input", index + i))?;
                        }
                    }
                    PreshaderOperandType::Output => {
                        let count = if scalar && slot == 0 { 1 } else { elems };
                        for (i, lane) in lanes[..count].iter_mut().enumerate() {
                            *lane = outregs
                                .get(index + i)
                                .copied()
                                .map(f64::from)
                                .ok_or(out_of_range("output", index + i))?;
                        }
                    }
                    PreshaderOperandType::Temp => {
                        let count = if scalar && slot == 0 { 1 } else { elems };
                        for (i, lane) in lanes[..count].iter_mut().enumerate() {
                            *lane = read(&temps, "temp", index + i)?;
                        }
                    }
                }
            }

            let mut dst = [0.0f64; 4];
            evaluate(inst.opcode, elems, &src, &mut dst)?;

            let Some(dest) = inst.destination() else {
                continue;
            };
            let base = dest.index as usize;
            match dest.ty {
                PreshaderOperandType::Temp => {
                    let slots = temps
                        .get_mut(base..base + elems)
                        .ok_or(out_of_range("temp", base))?;
                    slots.copy_from_slice(&dst[..elems]);
                }
                PreshaderOperandType::Output => {
                    let slots = outregs
                        .get_mut(base..base + elems)
                        .ok_or(out_of_range("output", base))?;
                    for (slot, value) in slots.iter_mut().zip(dst) {
                        *slot = value as f32;
                    }
                }
                PreshaderOperandType::Input | PreshaderOperandType::Literal => {
                    return Err(PreshaderError::Malformed(
                        "destination must be a temp or output register".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolves an array index by chasing integer register contents: the operand's own register
    /// selects a starting value, then each array register offsets into the file again.
    fn dynamic_index(&self, regs_i: &[i32], operand: &PreshaderOperand) -> Result<i32, PreshaderError> {
        let index = operand.index as usize;
        let start = ((index >> 4) * 4) + ((index >> 2) & 3);
        let mut value = *regs_i.get(start).ok_or(out_of_range("input", start))?;
        for &reg in &operand.array_registers {
            let at = reg as i64 + i64::from(value);
            let slot = usize::try_from(at).map_err(|_| out_of_range("input", reg as usize))?;
            value = *regs_i.get(slot).ok_or(out_of_range("input", slot))?;
        }
        Ok(value)
    }
}

fn evaluate(
    opcode: PreshaderOpcode,
    elems: usize,
    src: &[[f64; 4]; 3],
    dst: &mut [f64; 4],
) -> Result<(), PreshaderError> {
    let [s0, s1, s2] = src;
    let unary = |dst: &mut [f64; 4], f: fn(f64) -> f64| {
        for i in 0..elems {
            dst[i] = f(s0[i]);
        }
    };
    let binary = |dst: &mut [f64; 4], lhs_scalar: bool, f: fn(f64, f64) -> f64| {
        for i in 0..elems {
            let a = if lhs_scalar { s0[0] } else { s0[i] };
            dst[i] = f(a, s1[i]);
        }
    };
    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    use PreshaderOpcode::*;
    match opcode {
        Mov => unary(dst, |x| x),
        Neg => unary(dst, |x| -x),
        Rcp => unary(dst, |x| 1.0 / x),
        Frc => unary(dst, |x| x - x.floor()),
        Exp => unary(dst, f64::exp),
        Log => unary(dst, f64::ln),
        Rsq => unary(dst, |x| 1.0 / x.sqrt()),
        Sin => unary(dst, f64::sin),
        Cos => unary(dst, f64::cos),
        Asin => unary(dst, f64::asin),
        Acos => unary(dst, f64::acos),
        Atan => unary(dst, f64::atan),

        Min | MinScalar => binary(dst, opcode == MinScalar, |a, b| if a < b { a } else { b }),
        Max | MaxScalar => binary(dst, opcode == MaxScalar, |a, b| if a > b { a } else { b }),
        Lt | LtScalar => {
            for i in 0..elems {
                let a = if opcode == LtScalar { s0[0] } else { s0[i] };
                dst[i] = flag(a < s1[i]);
            }
        }
        Ge | GeScalar => {
            for i in 0..elems {
                let a = if opcode == GeScalar { s0[0] } else { s0[i] };
                dst[i] = flag(a >= s1[i]);
            }
        }
        Add | AddScalar => binary(dst, opcode == AddScalar, |a, b| a + b),
        Mul | MulScalar => binary(dst, opcode == MulScalar, |a, b| a * b),
        Atan2 | Atan2Scalar => binary(dst, opcode == Atan2Scalar, f64::atan2),
        Div | DivScalar => binary(dst, opcode == DivScalar, |a, b| a / b),

        Cmp => {
            for i in 0..elems {
                dst[i] = if s0[i] >= 0.0 { s1[i] } else { s2[i] };
            }
        }
        Dot => {
            let sum: f64 = (0..elems).map(|i| s0[i] * s1[i]).sum();
            dst[..elems].fill(sum);
        }

        Nop | Movc | Noise | DotScalar | NoiseScalar => {
            return Err(PreshaderError::UnhandledOpcode(opcode));
        }
    }
    Ok(())
}
