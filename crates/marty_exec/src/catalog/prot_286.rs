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

    catalog::prot_286.rs

    80286 protection-aware overrides. Far transfers check whether their
    selector names a TSS or task gate and hand the core to a task switch
    when it does; the machine status word gets its 0F instructions.

*/

use crate::{
    catalog::{base_8086, handler, SIZE16},
    cpu_common::{CpuException, ProcessorGeneration},
    exec::{
        context::InstructionContext,
        handler::{ExecEnv, StepOutcome, StepResult, TaskSwitchRequest, TaskSwitchSource},
        resolver::OpcodeCatalog,
    },
    registers::{MSW_PROTECTED_MODE, MSW_TASK_SWITCHED},
    segmentation::{DescriptorKind, SegmentDescriptor},
    step_ready,
};

pub fn register(catalog: &mut OpcodeCatalog) {
    use ProcessorGeneration::Intel80286 as GEN;

    catalog.register(GEN, 0x9A, SIZE16, handler("CALLF", op_call_far));
    catalog.register(GEN, 0xEA, SIZE16, handler("JMPF", op_jmp_far));
    catalog.register_0f(GEN, 0x01, SIZE16, handler("GRP7", op_group7));
    catalog.register_0f(GEN, 0x06, SIZE16, handler("CLTS", op_clts));
}

/// Resolve a far transfer selector to a task switch target, following task gates.
/// Returns None when the selector is an ordinary segment or protection is off.
pub(crate) fn task_target(
    env: &ExecEnv<'_>,
    selector: u16,
) -> Result<Option<(u16, SegmentDescriptor, bool)>, CpuException> {
    if !env.regs.protected_mode() {
        return Ok(None);
    }
    let Some(descriptor) = env.load_descriptor(selector)? else {
        return Ok(None);
    };

    match descriptor.kind {
        DescriptorKind::Tss { .. } => Ok(Some((selector, descriptor, false))),
        DescriptorKind::TaskGate { tss_selector } => Ok(Some((tss_selector, env.task_gate_target(tss_selector)?, true))),
        _ => Ok(None),
    }
}

fn far_transfer(
    ic: &mut InstructionContext,
    env: &mut ExecEnv<'_>,
    source: TaskSwitchSource,
) -> Result<Option<StepOutcome>, CpuException> {
    // Descriptor checks happen before any stack traffic.
    if ic.instruction.position() > 0 {
        return Ok(None);
    }
    Ok(task_target(env, ic.i.immediate2 as u16)?.map(|(selector, descriptor, gated)| {
        StepOutcome::TaskSwitch(TaskSwitchRequest {
            selector,
            descriptor,
            source,
            gated,
            error_code: None,
        })
    }))
}

/// 9A: CALL ptr16:16/32
pub(crate) fn op_call_far(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    if let Some(switch) = far_transfer(ic, env, TaskSwitchSource::Call)? {
        return Ok(switch);
    }
    base_8086::op_call_far(ic, env)
}

/// EA: JMP ptr16:16/32
pub(crate) fn op_jmp_far(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    if let Some(switch) = far_transfer(ic, env, TaskSwitchSource::Jump)? {
        return Ok(switch);
    }
    base_8086::op_jmp_far(ic, env)
}

/// 0F 01: group 7. Only SMSW (/4) and LMSW (/6) are implemented; the descriptor table forms
/// raise #UD.
pub(crate) fn op_group7(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    match ic.modrm_reg()? {
        4 => {
            let msw = env.regs.msw as u32;
            step_ready!(ic.write_rm(env, 0, msw)?);
        }
        6 => {
            let value = step_ready!(ic.read_rm(env, 0)?) as u16;
            // LMSW can set PE but never clear it.
            let pe = env.regs.msw & MSW_PROTECTED_MODE;
            env.regs.msw = (env.regs.msw & !0x000F) | (value & 0x000F) | pe;
        }
        reg => {
            log::warn!("0F 01 /{} is not implemented", reg);
            return Err(CpuException::InvalidOpcode);
        }
    }
    Ok(StepOutcome::Completed)
}

/// 0F 06: CLTS
pub(crate) fn op_clts(_ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    env.regs.msw &= !MSW_TASK_SWITCHED;
    Ok(StepOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::harness::{self, STACK_TOP},
        cpu_common::OperandSize,
        exec::{DecodedInstruction, PhaseKind, RmOperand},
        registers::{RegisterFile, SegmentRegister, TssFormat, FLAG_NESTED_TASK},
        segmentation::{SegmentAccess, Segmentation},
    };

    const TSS_SELECTOR: u16 = 0x0030;
    const GATE_SELECTOR: u16 = 0x0038;
    const TSS_BASE: u32 = 0x3000;
    /// #GP is handled by its own task.
    const TASK_VECTOR: u8 = 0x0D;

    /// A protected-mode descriptor table holding one TSS and a task gate to it.
    struct TaskTable;

    impl Segmentation for TaskTable {
        fn check_access(
            &self,
            _generation: ProcessorGeneration,
            _regs: &RegisterFile,
            _access: &SegmentAccess,
        ) -> Result<(), CpuException> {
            Ok(())
        }

        fn load_descriptor(&self, _regs: &RegisterFile, selector: u16) -> Result<Option<SegmentDescriptor>, CpuException> {
            let descriptor = match selector & 0xFFFC {
                TSS_SELECTOR => SegmentDescriptor {
                    base: TSS_BASE,
                    limit: 0x2B,
                    kind: DescriptorKind::Tss {
                        format: TssFormat::Tss16,
                        busy: false,
                    },
                    present: true,
                },
                GATE_SELECTOR => SegmentDescriptor {
                    base: 0,
                    limit: 0,
                    kind: DescriptorKind::TaskGate {
                        tss_selector: TSS_SELECTOR,
                    },
                    present: true,
                },
                _ => SegmentDescriptor {
                    base: (selector as u32) << 4,
                    limit: 0xFFFF,
                    kind: DescriptorKind::Code,
                    present: true,
                },
            };
            Ok(Some(descriptor))
        }

        fn load_interrupt_gate(&self, regs: &RegisterFile, vector: u8) -> Result<Option<SegmentDescriptor>, CpuException> {
            match vector {
                TASK_VECTOR => self.load_descriptor(regs, GATE_SELECTOR),
                _ => Ok(None),
            }
        }
    }

    fn protected_core() -> crate::exec::ExecCore<crate::biu::WaitStateBus> {
        let mut core = harness::core(ProcessorGeneration::Intel80286);
        core.set_segmentation(Box::new(TaskTable));
        let regs = core.regs_mut();
        regs.msw |= MSW_PROTECTED_MODE;
        regs.tr = 0x0028;
        regs.tr_base = 0x2000;
        regs.tr_limit = 0x2B;
        regs.tr_format = TssFormat::Tss16;
        core
    }

    #[test]
    fn test_call_through_task_gate() {
        let mut core = protected_core();
        core.bus_mut().poke_u16(TSS_BASE + 0x0E, 0x0100);
        core.bus_mut().poke_u16(TSS_BASE + 0x24, 0x0050);
        core.bus_mut().set_wait_states(1);

        let i = DecodedInstruction::new(0x9A, OperandSize::Size16)
            .with_far_pointer(GATE_SELECTOR, 0)
            .at(0x0010, 5);
        core.start_normal(i).unwrap();
        core.tick();
        // The CALL completed and handed over to the task switch without touching the stack.
        assert_eq!(core.active_phase(), Some(PhaseKind::TaskSwitch));
        assert_eq!(core.stats().instructions, 1);

        while core.is_busy() {
            core.tick();
        }
        assert_eq!(core.regs().tr, TSS_SELECTOR);
        assert_eq!(core.regs().eip, 0x0100);
        assert_eq!(core.regs().sreg(SegmentRegister::CS), 0x0050);
        assert!(core.regs().flag(FLAG_NESTED_TASK));
        // Return address saved in the outgoing TSS, nothing pushed.
        assert_eq!(core.bus().peek_u16(0x2000 + 0x0E), 0x0015);
        assert_eq!(core.regs().sp(), 0);
        assert_eq!(core.stats().task_switches, 1);
    }

    #[test]
    fn test_interrupt_through_task_gate() {
        let mut core = protected_core();
        core.bus_mut().poke_u16(TSS_BASE + 0x0E, 0x0300);
        core.bus_mut().poke_u16(TSS_BASE + 0x1A, 0x0800);
        core.bus_mut().poke_u16(TSS_BASE + 0x24, 0x0060);
        core.bus_mut().set_wait_states(1);
        core.regs_mut().eip = 0x0123;

        core.start_interrupt(CpuException::GeneralProtection(0x0018).into())
            .unwrap();
        // The gate lookup completes the Interrupt phase without touching the current stack.
        assert_eq!(core.active_phase(), Some(PhaseKind::TaskSwitch));
        assert_eq!(core.stats().interrupts, 1);
        assert_eq!(core.stats().task_switches, 1);

        while core.is_busy() {
            core.tick();
        }
        assert_eq!(core.regs().tr, TSS_SELECTOR);
        assert_eq!(core.regs().sreg(SegmentRegister::CS), 0x0060);
        assert_eq!(core.regs().eip, 0x0300);
        assert!(core.regs().flag(FLAG_NESTED_TASK));
        // Back link to the interrupted task, error code on the new task's stack.
        assert_eq!(core.bus().peek_u16(TSS_BASE), 0x0028);
        assert_eq!(core.regs().sp(), 0x07FE);
        assert_eq!(core.bus().peek_u16(0x07FE), 0x0018);
        assert_eq!(core.bus().peek_u16(0x2000 + 0x0E), 0x0123);
        assert_eq!(core.bus().peek_u16((STACK_TOP - 2) as u32), 0);
    }

    #[test]
    fn test_fault_through_task_gate() {
        let mut core = protected_core();
        core.bus_mut().poke_u16(TSS_BASE + 0x0E, 0x0300);
        core.bus_mut().poke_u16(TSS_BASE + 0x1A, 0x0800);
        core.bus_mut().poke_u16(TSS_BASE + 0x24, 0x0060);
        // Any other vector still goes through the vector table.
        core.bus_mut().poke_u16(0x06 * 4, 0x0700);

        // 0F 01 /5 is not implemented and raises #UD.
        let ud = DecodedInstruction::new_0f(0x01, OperandSize::Size16).with_modrm(5, RmOperand::Register(0));
        harness::run(&mut core, ud);
        assert_eq!(core.stats().task_switches, 0);
        assert_eq!(core.regs().eip, 0x0700);
        assert_eq!(core.regs().sp(), STACK_TOP - 6);
    }

    #[test]
    fn test_call_to_code_segment_is_plain_call() {
        let mut core = protected_core();
        let i = DecodedInstruction::new(0x9A, OperandSize::Size16).with_far_pointer(0x0100, 0x0020);
        harness::run(&mut core, i);
        assert_eq!(core.stats().task_switches, 0);
        assert_eq!(core.regs().sreg(SegmentRegister::CS), 0x0100);
        assert_eq!(core.regs().sp(), STACK_TOP - 4);
    }

    #[test]
    fn test_real_mode_ignores_descriptors() {
        let mut core = harness::core(ProcessorGeneration::Intel80286);
        core.set_segmentation(Box::new(TaskTable));
        let i = DecodedInstruction::new(0xEA, OperandSize::Size16).with_far_pointer(TSS_SELECTOR, 0x0044);
        harness::run(&mut core, i);
        assert_eq!(core.regs().sreg(SegmentRegister::CS), TSS_SELECTOR);
        assert_eq!(core.regs().eip, 0x0044);
    }

    #[test]
    fn test_smsw_lmsw_clts() {
        let mut core = harness::core(ProcessorGeneration::Intel80286);
        core.regs_mut().msw = MSW_TASK_SWITCHED;

        let smsw = DecodedInstruction::new_0f(0x01, OperandSize::Size16).with_modrm(4, RmOperand::Register(0));
        harness::run(&mut core, smsw);
        assert_eq!(core.regs().get_reg(0, OperandSize::Size16), MSW_TASK_SWITCHED as u32);

        harness::run(&mut core, DecodedInstruction::new_0f(0x06, OperandSize::Size16));
        assert_eq!(core.regs().msw & MSW_TASK_SWITCHED, 0);

        // Set PE, then try to clear it again.
        core.regs_mut().set_reg(1, OperandSize::Size16, 0x0001);
        let lmsw = DecodedInstruction::new_0f(0x01, OperandSize::Size16).with_modrm(6, RmOperand::Register(1));
        harness::run(&mut core, lmsw);
        assert!(core.regs().protected_mode());
        core.regs_mut().set_reg(1, OperandSize::Size16, 0x0000);
        harness::run(&mut core, lmsw);
        assert!(core.regs().protected_mode());
    }

    #[test]
    fn test_0f_unknown_before_286() {
        let mut core = harness::core(ProcessorGeneration::NecV30);
        harness::run(&mut core, DecodedInstruction::new_0f(0x06, OperandSize::Size16));
        assert_eq!(core.dispatch().mnemonic(0x06, OperandSize::Size16, true), "(unknown 0F)");
    }
}
