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

    catalog::ext_386.rs

    80386 registrations. The generic handlers already work at either operand
    size, so the 386 binds them again at Size32 and adds the FS/GS stack
    instructions.

*/

use crate::{
    catalog::{adjust_sp, base_8086, ext_186, handler, prot_286, register_range, ALL_SIZES, SIZE32},
    cpu_common::ProcessorGeneration,
    exec::{
        context::InstructionContext,
        handler::{ExecEnv, StepOutcome, StepResult},
        resolver::OpcodeCatalog,
    },
    registers::SegmentRegister,
    step_ready,
};

pub fn register(catalog: &mut OpcodeCatalog) {
    use ProcessorGeneration::Intel80386 as GEN;

    catalog.register(GEN, 0x01, SIZE32, handler("ADD", base_8086::op_add_rm_reg));
    catalog.register(GEN, 0x05, SIZE32, handler("ADD", base_8086::op_add_acc_imm));
    register_range(catalog, false, GEN, 0x40..=0x47, SIZE32, "INC", base_8086::op_inc_reg);
    register_range(catalog, false, GEN, 0x50..=0x57, SIZE32, "PUSH", base_8086::op_push_reg);
    register_range(catalog, false, GEN, 0x58..=0x5F, SIZE32, "POP", base_8086::op_pop_reg);
    catalog.register(GEN, 0x60, SIZE32, handler("PUSHAD", ext_186::op_pusha));
    catalog.register(GEN, 0x61, SIZE32, handler("POPAD", ext_186::op_popa));
    catalog.register(GEN, 0x62, SIZE32, handler("BOUND", ext_186::op_bound));
    catalog.register(GEN, 0x68, SIZE32, handler("PUSH", ext_186::op_push_imm));
    catalog.register(GEN, 0x6A, SIZE32, handler("PUSH", ext_186::op_push_imm8));
    catalog.register(GEN, 0x89, SIZE32, handler("MOV", base_8086::op_mov_rm_reg));
    catalog.register(GEN, 0x8B, SIZE32, handler("MOV", base_8086::op_mov_reg_rm));
    catalog.register(GEN, 0x9A, SIZE32, handler("CALLF", prot_286::op_call_far));
    catalog.register(GEN, 0xA5, SIZE32, handler("MOVSD", base_8086::op_movs));
    catalog.register(GEN, 0xEA, SIZE32, handler("JMPF", prot_286::op_jmp_far));

    catalog.register_0f(GEN, 0xA0, ALL_SIZES, handler("PUSH FS", op_push_fs_gs));
    catalog.register_0f(GEN, 0xA1, ALL_SIZES, handler("POP FS", op_pop_fs_gs));
    catalog.register_0f(GEN, 0xA8, ALL_SIZES, handler("PUSH GS", op_push_fs_gs));
    catalog.register_0f(GEN, 0xA9, ALL_SIZES, handler("POP GS", op_pop_fs_gs));
}

fn fs_or_gs(opcode: u8) -> SegmentRegister {
    if opcode & 0x08 == 0 {
        SegmentRegister::FS
    }
    else {
        SegmentRegister::GS
    }
}

/// 0F A0 / 0F A8: PUSH FS / PUSH GS
fn op_push_fs_gs(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let value = env.regs.sreg(fs_or_gs(ic.opcode())) as u32;
    base_8086::push_value(ic, env, value)
}

/// 0F A1 / 0F A9: POP FS / POP GS
fn op_pop_fs_gs(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let size = ic.operand_size();
    let value = step_ready!(ic.pop_slot(env, 0, 0, size.into())?);
    adjust_sp(env, size.bytes() as i32);
    env.regs.set_sreg(fs_or_gs(ic.opcode()), value as u16);
    Ok(StepOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::harness::{self, STACK_TOP},
        cpu_common::OperandSize,
        exec::DecodedInstruction,
        registers::Register16,
    };

    #[test]
    fn test_add_acc_imm_32() {
        let mut core = harness::core(ProcessorGeneration::Intel80386);
        core.regs_mut().set32(Register16::AX, 0x0000_FFFF);
        harness::run(
            &mut core,
            DecodedInstruction::new(0x05, OperandSize::Size32).with_immediate(0x0001_0001),
        );
        assert_eq!(core.regs().get32(Register16::AX), 0x0002_0000);
    }

    #[test]
    fn test_push_pop_32() {
        let mut core = harness::core(ProcessorGeneration::Intel80386);
        core.regs_mut().set32(Register16::BX, 0xDEAD_BEEF);
        harness::run(&mut core, DecodedInstruction::new(0x53, OperandSize::Size32));
        assert_eq!(core.regs().sp(), STACK_TOP - 4);
        assert_eq!(core.bus().peek_u32((STACK_TOP - 4) as u32), 0xDEAD_BEEF);

        harness::run(&mut core, DecodedInstruction::new(0x58, OperandSize::Size32));
        assert_eq!(core.regs().get32(Register16::AX), 0xDEAD_BEEF);
        assert_eq!(core.regs().sp(), STACK_TOP);
    }

    #[test]
    fn test_push_pop_fs_gs() {
        let mut core = harness::core(ProcessorGeneration::Intel80386);
        core.regs_mut().set_sreg(SegmentRegister::FS, 0x1234);
        harness::run(&mut core, DecodedInstruction::new_0f(0xA0, OperandSize::Size16));
        harness::run(&mut core, DecodedInstruction::new_0f(0xA9, OperandSize::Size16));
        assert_eq!(core.regs().sreg(SegmentRegister::GS), 0x1234);
        assert_eq!(core.regs().sp(), STACK_TOP);
    }

    #[test]
    fn test_size32_on_286_falls_back() {
        // A 286 never sees Size32, but the resolver still answers with the 16-bit handler.
        let core = harness::core(ProcessorGeneration::Intel80286);
        assert_eq!(core.dispatch().mnemonic(0xA5, OperandSize::Size32, false), "MOVSW");
        let core = harness::core(ProcessorGeneration::Intel80386);
        assert_eq!(core.dispatch().mnemonic(0xA5, OperandSize::Size32, false), "MOVSD");
    }
}
