/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    catalog::ext_186.rs

    Instructions added by the 80186 and shared by the NEC V20/V30.

*/

use crate::{
    biu::TransferSize,
    catalog::{adjust_sp, base_8086::push_value, handler, signed, SIZE16},
    cpu_common::{CpuException, ProcessorGeneration},
    exec::{
        context::{InstructionContext, RmOperand},
        handler::{ExecEnv, StepOutcome, StepResult},
        resolver::OpcodeCatalog,
    },
    registers::Register16,
    segmentation::AccessKind,
    step_ready,
};

pub fn register(catalog: &mut OpcodeCatalog) {
    use ProcessorGeneration::NecV30 as GEN;

    catalog.register(GEN, 0x60, SIZE16, handler("PUSHA", op_pusha));
    catalog.register(GEN, 0x61, SIZE16, handler("POPA", op_popa));
    catalog.register(GEN, 0x62, SIZE16, handler("BOUND", op_bound));
    catalog.register(GEN, 0x68, SIZE16, handler("PUSH", op_push_imm));
    catalog.register(GEN, 0x6A, SIZE16, handler("PUSH", op_push_imm8));
}

/// 60: PUSHA. Pushes AX, CX, DX, BX, the original SP, BP, SI and DI.
pub(crate) fn op_pusha(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    ic.check_push_frame(env, 8, size.into())?;
    for reg in 0..8u8 {
        let value = env.regs.get_reg(reg, size);
        step_ready!(ic.push_slot(env, reg, reg as u16 + 1, size.into(), value)?);
    }
    adjust_sp(env, -8 * size.bytes() as i32);
    Ok(StepOutcome::Completed)
}

/// 61: POPA. The stored SP is read but discarded.
pub(crate) fn op_popa(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    let mut values = [0u32; 8];
    for (slot, value) in values.iter_mut().enumerate() {
        *value = step_ready!(ic.pop_slot(env, slot as u8, slot as u16, size.into())?);
    }

    adjust_sp(env, 8 * size.bytes() as i32);
    for (slot, value) in values.iter().enumerate() {
        let reg = 7 - slot as u8;
        if reg != Register16::SP as u8 {
            env.regs.set_reg(reg, size, *value);
        }
    }
    Ok(StepOutcome::Completed)
}

/// 62: BOUND r, m. Raises #BR if the signed register value is outside [lower, upper].
pub(crate) fn op_bound(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    let width: TransferSize = size.into();
    let reg = ic.modrm_reg()?;

    let (segment, offset) = match ic.i.modrm.map(|m| m.rm) {
        Some(RmOperand::Memory { segment, offset }) => (segment, offset),
        _ => return Err(CpuException::InvalidOpcode),
    };

    let mut bounds = [0u32; 2];
    for (step, bound) in bounds.iter_mut().enumerate() {
        let step = step as u8;
        let offset = offset.wrapping_add(step as u32 * width.bytes());
        if !ic.modrm.is_done(step) {
            env.check(segment, offset, width, AccessKind::Read)?;
        }
        let address = env.seg_addr(segment, offset);
        *bound = step_ready!(ic.modrm.read(step, env.bus, width, address));
    }

    let value = signed(size, env.regs.get_reg(reg, size));
    if value < signed(size, bounds[0]) || value > signed(size, bounds[1]) {
        return Err(CpuException::BoundRange);
    }
    Ok(StepOutcome::Completed)
}

/// 68: PUSH imm
pub(crate) fn op_push_imm(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let value = ic.i.immediate & ic.operand_size().mask();
    push_value(ic, env, value)
}

/// 6A: PUSH imm8, sign-extended to the operand size.
pub(crate) fn op_push_imm8(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let value = (ic.i.immediate as u8 as i8 as i32 as u32) & ic.operand_size().mask();
    push_value(ic, env, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        biu::wait_state_bus::BusKind,
        catalog::harness::{self, STACK_TOP},
        cpu_common::OperandSize,
        exec::DecodedInstruction,
        registers::SegmentRegister,
    };

    #[test]
    fn test_pusha_popa() {
        let mut core = harness::core(ProcessorGeneration::NecV30);
        for reg in 0..8u8 {
            if reg != Register16::SP as u8 {
                core.regs_mut().set_reg(reg, OperandSize::Size16, 0x1110 * (reg as u32 + 1));
            }
        }
        harness::run(&mut core, DecodedInstruction::new(0x60, OperandSize::Size16));
        assert_eq!(core.regs().sp(), STACK_TOP - 16);
        // AX is pushed first, DI last.
        assert_eq!(core.bus().peek_u16((STACK_TOP - 2) as u32), 0x1110);
        assert_eq!(core.bus().peek_u16((STACK_TOP - 10) as u32), STACK_TOP);
        assert_eq!(core.bus().peek_u16((STACK_TOP - 16) as u32), 0x8880);

        for reg in 0..8u8 {
            if reg != Register16::SP as u8 {
                core.regs_mut().set_reg(reg, OperandSize::Size16, 0);
            }
        }
        harness::run(&mut core, DecodedInstruction::new(0x61, OperandSize::Size16));
        assert_eq!(core.regs().sp(), STACK_TOP);
        assert_eq!(core.regs().get16(Register16::AX), 0x1110);
        assert_eq!(core.regs().get16(Register16::DI), 0x8880);
    }

    #[test]
    fn test_pusha_frame_fault_writes_nothing() {
        let mut core = harness::core(ProcessorGeneration::Intel80286);
        core.bus_mut().poke_u16(0x0C * 4, 0x0900);
        core.regs_mut().set16(Register16::SP, 0x0009);
        core.regs_mut().set16(Register16::BX, 0xB0B0);

        // AX, CX, DX and BX fit below SP; the fifth slot wraps past the segment.
        harness::run(&mut core, DecodedInstruction::new(0x60, OperandSize::Size16).at(0x0040, 1));

        assert_eq!(core.stats().faults, 1);
        assert_eq!(core.regs().eip, 0x0900);
        assert_eq!(core.bus().peek_u16(0x0001), 0);
        assert_eq!(core.bus().issue_count(BusKind::Write, 0x0001), 0);
        // Only the #SS frame reached the stack.
        let writes: Vec<u32> = core
            .bus()
            .transactions()
            .iter()
            .filter(|t| t.kind == BusKind::Write)
            .map(|t| t.linear)
            .collect();
        assert_eq!(writes, vec![0x0007, 0x0005, 0x0003]);
        assert_eq!(core.bus().peek_u16(0x0003), 0x0040);
        assert_eq!(core.regs().get16(Register16::BX), 0xB0B0);
    }

    #[test]
    fn test_pusha_unhandled_on_8086() {
        let mut core = harness::core(ProcessorGeneration::Intel8086);
        harness::run(&mut core, DecodedInstruction::new(0x60, OperandSize::Size16));
        assert_eq!(core.regs().sp(), STACK_TOP);
    }

    #[test]
    fn test_bound_in_range() {
        let mut core = harness::core(ProcessorGeneration::NecV30);
        core.bus_mut().poke_u16(0x0400, 0xFFF0);
        core.bus_mut().poke_u16(0x0402, 0x0010);
        core.regs_mut().set16(Register16::BX, 0xFFF8);

        let i = DecodedInstruction::new(0x62, OperandSize::Size16).with_modrm(
            3,
            RmOperand::Memory {
                segment: SegmentRegister::DS,
                offset: 0x0400,
            },
        );
        harness::run(&mut core, i);
        assert_eq!(core.stats().faults, 0);
    }

    #[test]
    fn test_bound_raises_br() {
        let mut core = harness::core(ProcessorGeneration::Intel80286);
        core.bus_mut().poke_u16(5 * 4, 0x0900);
        core.bus_mut().poke_u16(0x0400, 0x0000);
        core.bus_mut().poke_u16(0x0402, 0x0010);
        core.regs_mut().set16(Register16::BX, 0x0011);

        let i = DecodedInstruction::new(0x62, OperandSize::Size16)
            .with_modrm(
                3,
                RmOperand::Memory {
                    segment: SegmentRegister::DS,
                    offset: 0x0400,
                },
            )
            .at(0x0040, 4);
        harness::run(&mut core, i);

        assert_eq!(core.stats().faults, 1);
        assert_eq!(core.regs().eip, 0x0900);
        // The 80286 reports the address of the BOUND itself.
        assert_eq!(core.bus().peek_u16((STACK_TOP - 6) as u32), 0x0040);
    }

    #[test]
    fn test_push_imm8_sign_extends() {
        let mut core = harness::core(ProcessorGeneration::NecV30);
        harness::run(
            &mut core,
            DecodedInstruction::new(0x6A, OperandSize::Size16).with_immediate(0x80),
        );
        assert_eq!(core.bus().peek_u16((STACK_TOP - 2) as u32), 0xFF80);

        harness::run(
            &mut core,
            DecodedInstruction::new(0x68, OperandSize::Size16).with_immediate(0x1234),
        );
        assert_eq!(core.bus().peek_u16((STACK_TOP - 4) as u32), 0x1234);
    }
}
