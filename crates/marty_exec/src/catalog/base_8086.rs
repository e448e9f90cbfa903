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

    catalog::base_8086.rs

    Handlers introduced by the 8086. Later generations inherit these through
    resolution, and the 80386 registers most of them again at Size32.

    Handlers never modify registers before their last bus transfer has been
    acknowledged. A handler may be invoked any number of times before it
    completes.

*/

use crate::{
    biu::TransferSize,
    catalog::{adjust_sp, alu, handler, register_range, SIZE16},
    cpu_common::{error::VECTOR_BREAKPOINT, ProcessorGeneration},
    exec::{
        context::InstructionContext,
        handler::{ExecEnv, InterruptRequest, StepOutcome, StepResult},
        resolver::OpcodeCatalog,
    },
    registers::{Register16, SegmentRegister, FLAG_DIRECTION},
    segmentation::AccessKind,
    step_ready,
};

pub fn register(catalog: &mut OpcodeCatalog) {
    use ProcessorGeneration::Intel8086 as GEN;

    catalog.register(GEN, 0x01, SIZE16, handler("ADD", op_add_rm_reg));
    catalog.register(GEN, 0x05, SIZE16, handler("ADD", op_add_acc_imm));
    register_range(catalog, false, GEN, 0x40..=0x47, SIZE16, "INC", op_inc_reg);
    register_range(catalog, false, GEN, 0x50..=0x57, SIZE16, "PUSH", op_push_reg);
    register_range(catalog, false, GEN, 0x58..=0x5F, SIZE16, "POP", op_pop_reg);
    catalog.register(GEN, 0x89, SIZE16, handler("MOV", op_mov_rm_reg));
    catalog.register(GEN, 0x8B, SIZE16, handler("MOV", op_mov_reg_rm));
    catalog.register(GEN, 0x90, SIZE16, handler("NOP", op_nop));
    catalog.register(GEN, 0x9A, SIZE16, handler("CALLF", op_call_far));
    catalog.register(GEN, 0xA5, SIZE16, handler("MOVSW", op_movs));
    catalog.register(GEN, 0xCC, SIZE16, handler("INT3", op_int3));
    catalog.register(GEN, 0xCD, SIZE16, handler("INT", op_int_imm));
    catalog.register(GEN, 0xEA, SIZE16, handler("JMPF", op_jmp_far));
}

/// Push one value at the operand size, then commit SP.
pub(crate) fn push_value(ic: &mut InstructionContext, env: &mut ExecEnv<'_>, value: u32) -> StepResult {
    let size = ic.operand_size();
    step_ready!(ic.push_slot(env, 0, 1, size.into(), value)?);
    adjust_sp(env, -(size.bytes() as i32));
    Ok(StepOutcome::Completed)
}

/// 01: ADD r/m, r
pub(crate) fn op_add_rm_reg(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    let dst = step_ready!(ic.read_rm(env, 0)?);
    let src = env.regs.get_reg(ic.modrm_reg()?, size);
    let (result, flags) = alu::add(env.regs.eflags, size, dst, src);
    ic.oper1 = dst;
    ic.oper2 = src;

    step_ready!(ic.write_rm(env, 1, result)?);
    env.regs.eflags = flags;
    ic.result = result;
    Ok(StepOutcome::Completed)
}

/// 05: ADD AX/EAX, imm
pub(crate) fn op_add_acc_imm(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    ic.oper1 = env.regs.get_reg(Register16::AX as u8, size);
    ic.oper2 = ic.i.immediate & size.mask();
    let (result, flags) = alu::add(env.regs.eflags, size, ic.oper1, ic.oper2);
    env.regs.set_reg(Register16::AX as u8, size, result);
    env.regs.eflags = flags;
    ic.result = result;
    Ok(StepOutcome::Completed)
}

/// 40-47: INC r
pub(crate) fn op_inc_reg(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    let reg = ic.opcode() & 0x07;
    let (result, flags) = alu::inc(env.regs.eflags, size, env.regs.get_reg(reg, size));
    env.regs.set_reg(reg, size, result);
    env.regs.eflags = flags;
    Ok(StepOutcome::Completed)
}

/// 50-57: PUSH r
pub(crate) fn op_push_reg(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    let reg = ic.opcode() & 0x07;
    let mut value = env.regs.get_reg(reg, size);
    if reg == Register16::SP as u8 && env.generation < ProcessorGeneration::Intel80286 {
        // PUSH SP stores the already decremented SP before the 80286.
        value = value.wrapping_sub(size.bytes()) & size.mask();
    }
    push_value(ic, env, value)
}

/// 58-5F: POP r
pub(crate) fn op_pop_reg(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    let value = step_ready!(ic.pop_slot(env, 0, 0, size.into())?);
    adjust_sp(env, size.bytes() as i32);
    env.regs.set_reg(ic.opcode() & 0x07, size, value);
    Ok(StepOutcome::Completed)
}

/// 89: MOV r/m, r
pub(crate) fn op_mov_rm_reg(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let value = env.regs.get_reg(ic.modrm_reg()?, ic.operand_size());
    step_ready!(ic.write_rm(env, 0, value)?);
    Ok(StepOutcome::Completed)
}

/// 8B: MOV r, r/m
pub(crate) fn op_mov_reg_rm(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let value = step_ready!(ic.read_rm(env, 0)?);
    env.regs.set_reg(ic.modrm_reg()?, ic.operand_size(), value);
    Ok(StepOutcome::Completed)
}

pub(crate) fn op_nop(_ic: &mut InstructionContext, _env: &mut ExecEnv<'_>) -> StepResult {
    Ok(StepOutcome::Completed)
}

/// 9A: CALL ptr16:16/32. Real-mode form: push CS and the return IP, then load CS:IP.
pub(crate) fn op_call_far(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    let cs = env.regs.sreg(SegmentRegister::CS) as u32;
    let ip = env.regs.eip & size.mask();

    ic.check_push_frame(env, 2, size.into())?;
    step_ready!(ic.push_slot(env, 0, 1, size.into(), cs)?);
    step_ready!(ic.push_slot(env, 1, 2, size.into(), ip)?);

    adjust_sp(env, -2 * size.bytes() as i32);
    env.regs.set_sreg(SegmentRegister::CS, ic.i.immediate2 as u16);
    env.regs.eip = ic.i.immediate & size.mask();
    Ok(StepOutcome::Completed)
}

/// EA: JMP ptr16:16/32, real-mode form.
pub(crate) fn op_jmp_far(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    env.regs.set_sreg(SegmentRegister::CS, ic.i.immediate2 as u16);
    env.regs.eip = ic.i.immediate & ic.operand_size().mask();
    Ok(StepOutcome::Completed)
}

/// A5: MOVSW/MOVSD. Copies [seg:SI] to [ES:DI] and steps both by the operand size.
pub(crate) fn op_movs(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    let width: TransferSize = size.into();
    let segment = ic.i.segment;
    let si = env.regs.get16(Register16::SI);
    let di = env.regs.get16(Register16::DI);

    if !ic.instruction.is_done(0) {
        env.check(segment, si as u32, width, AccessKind::Read)?;
    }
    let src = env.seg_addr(segment, si as u32);
    let value = step_ready!(ic.instruction.read(0, env.bus, width, src));

    if !ic.instruction.is_done(1) {
        env.check(SegmentRegister::ES, di as u32, width, AccessKind::Write)?;
    }
    let dst = env.seg_addr(SegmentRegister::ES, di as u32);
    step_ready!(ic.instruction.write(1, env.bus, width, dst, value));

    let delta = if env.regs.flag(FLAG_DIRECTION) {
        (size.bytes() as u16).wrapping_neg()
    }
    else {
        size.bytes() as u16
    };
    env.regs.set16(Register16::SI, si.wrapping_add(delta));
    env.regs.set16(Register16::DI, di.wrapping_add(delta));
    Ok(StepOutcome::Completed)
}

/// CC: INT3
pub(crate) fn op_int3(_ic: &mut InstructionContext, _env: &mut ExecEnv<'_>) -> StepResult {
    Ok(StepOutcome::Interrupt(InterruptRequest::software(VECTOR_BREAKPOINT)))
}

/// CD: INT imm8
pub(crate) fn op_int_imm(ic: &mut InstructionContext, _env: &mut ExecEnv<'_>) -> StepResult {
    Ok(StepOutcome::Interrupt(InterruptRequest::software(ic.i.immediate as u8)))
}
