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

    exec::task.rs

    Hardware task switching through 16-bit (80286) and 32-bit (80386) TSS
    segments.

    The switch runs as three counted sequences: save the outgoing state into
    the current TSS, load the incoming state from the target TSS, then write
    the back link and error code. Nothing is committed to the register file
    until all of them have completed.

*/

use crate::{
    biu::{BusAddress, TransferSize},
    cpu_common::{CpuException, ProcessorGeneration},
    exec::{
        context::{InstructionContext, StepTrack, STEP_LATCH_LEN},
        handler::{ExecEnv, StepOutcome, StepResult, TaskSwitchRequest, TaskSwitchSource},
        phase::{PhaseKind, PhaseStep},
        resolver::DispatchTable,
    },
    registers::{
        Register16,
        RegisterFile,
        SegmentRegister,
        TssFormat,
        FLAG_NESTED_TASK,
        MSW_TASK_SWITCHED,
        SREGISTER_LUT,
    },
    segmentation::DescriptorKind,
    step_ready,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TssField {
    Ip,
    Flags,
    Gpr(u8),
    Sreg(SegmentRegister),
}

impl TssField {
    fn get(&self, regs: &RegisterFile) -> u32 {
        match *self {
            TssField::Ip => regs.eip,
            TssField::Flags => regs.eflags,
            TssField::Gpr(n) => regs.get32(GPR_ORDER[n as usize]),
            TssField::Sreg(s) => regs.sreg(s) as u32,
        }
    }

    fn set(&self, regs: &mut RegisterFile, width: TransferSize, value: u32) {
        match *self {
            TssField::Ip => regs.eip = value & width.mask(),
            TssField::Flags => regs.eflags = (regs.eflags & !width.mask()) | (value & width.mask()),
            TssField::Gpr(n) => match width {
                TransferSize::Dword => regs.set32(GPR_ORDER[n as usize], value),
                _ => regs.set16(GPR_ORDER[n as usize], value as u16),
            },
            TssField::Sreg(s) => regs.set_sreg(s, value as u16),
        }
    }
}

const GPR_ORDER: [Register16; 8] = [
    Register16::AX,
    Register16::CX,
    Register16::DX,
    Register16::BX,
    Register16::SP,
    Register16::BP,
    Register16::SI,
    Register16::DI,
];

/// Field offsets of a TSS format.
#[derive(Debug)]
pub struct TssLayout {
    ip: u32,
    flags: u32,
    gpr: u32,
    sreg: u32,
    sreg_count: usize,
    width: TransferSize,
    /// Smallest descriptor limit that holds every field.
    pub min_limit: u32,
}

pub const TSS16_LAYOUT: TssLayout = TssLayout {
    ip: 0x0E,
    flags: 0x10,
    gpr: 0x12,
    sreg: 0x22,
    sreg_count: 4,
    width: TransferSize::Word,
    min_limit: 0x2B,
};

pub const TSS32_LAYOUT: TssLayout = TssLayout {
    ip: 0x20,
    flags: 0x24,
    gpr: 0x28,
    sreg: 0x48,
    sreg_count: 6,
    width: TransferSize::Dword,
    min_limit: 0x67,
};

impl TssLayout {
    pub fn of(format: TssFormat) -> &'static TssLayout {
        match format {
            TssFormat::Tss16 => &TSS16_LAYOUT,
            TssFormat::Tss32 => &TSS32_LAYOUT,
        }
    }

    fn field_count(&self) -> usize {
        2 + GPR_ORDER.len() + self.sreg_count
    }

    /// Field `n` in transfer order with its offset and width. Selectors are always words.
    fn field(&self, n: usize) -> (TssField, u32, TransferSize) {
        let stride = self.width.bytes();
        match n {
            0 => (TssField::Ip, self.ip, self.width),
            1 => (TssField::Flags, self.flags, self.width),
            2..=9 => {
                let reg = (n - 2) as u32;
                (TssField::Gpr(reg as u8), self.gpr + reg * stride, self.width)
            }
            _ => {
                let sreg = n - 10;
                (
                    TssField::Sreg(SREGISTER_LUT[sreg]),
                    self.sreg + sreg as u32 * stride,
                    TransferSize::Word,
                )
            }
        }
    }

    fn field_index(&self, field: TssField) -> usize {
        (0..self.field_count())
            .find(|&n| self.field(n).0 == field)
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskSwitchPhase {
    pub request: TaskSwitchRequest,
    save: StepTrack,
    load: StepTrack,
    link: StepTrack,
}

impl TaskSwitchPhase {
    pub fn new(request: TaskSwitchRequest) -> Self {
        Self {
            request,
            save: StepTrack::default(),
            load: StepTrack::default(),
            link: StepTrack::default(),
        }
    }

    /// Check that the switch can proceed and return the format of the incoming TSS.
    fn validate(&self, env: &ExecEnv<'_>) -> Result<TssFormat, CpuException> {
        let request = &self.request;
        let selector = request.selector & 0xFFFC;

        if env.generation < ProcessorGeneration::Intel80286 {
            return Err(CpuException::InvalidOpcode);
        }
        if env.regs.tr & 0xFFFC == 0 {
            return Err(CpuException::InvalidTss(env.regs.tr));
        }

        let (format, busy) = match request.descriptor.kind {
            DescriptorKind::Tss { format, busy } => (format, busy),
            _ => return Err(CpuException::GeneralProtection(selector)),
        };
        if format == TssFormat::Tss32 && !env.generation.has_32bit_operands() {
            return Err(CpuException::GeneralProtection(selector));
        }
        if !request.descriptor.present {
            return Err(CpuException::SegmentNotPresent(selector));
        }
        if busy {
            return Err(CpuException::GeneralProtection(selector));
        }
        if request.descriptor.limit < TssLayout::of(format).min_limit {
            return Err(CpuException::InvalidTss(selector));
        }
        Ok(format)
    }
}

impl PhaseStep for TaskSwitchPhase {
    #[inline]
    fn kind(&self) -> PhaseKind {
        PhaseKind::TaskSwitch
    }

    fn step(&mut self, _ic: &mut InstructionContext, env: &mut ExecEnv<'_>, _dispatch: &DispatchTable) -> StepResult {
        let format = self.validate(env)?;
        let request = self.request;
        let outgoing = TssLayout::of(env.regs.tr_format);
        let incoming = TssLayout::of(format);
        let new_base = request.descriptor.base;

        for n in 0..outgoing.field_count() {
            let (field, offset, width) = outgoing.field(n);
            let address = BusAddress::Linear(env.regs.tr_base.wrapping_add(offset));
            step_ready!(self.save.write(n as u8, env.bus, width, address, field.get(env.regs)));
        }

        let mut loaded = [0u32; STEP_LATCH_LEN];
        for (n, slot) in loaded.iter_mut().enumerate().take(incoming.field_count()) {
            let (_, offset, width) = incoming.field(n);
            let address = BusAddress::Linear(new_base.wrapping_add(offset));
            *slot = step_ready!(self.load.read(n as u8, env.bus, width, address));
        }

        let nesting = matches!(request.source, TaskSwitchSource::Call | TaskSwitchSource::Interrupt);
        let mut step = 0;
        if nesting {
            let back_link = env.regs.tr as u32;
            step_ready!(self
                .link
                .write(step, env.bus, TransferSize::Word, BusAddress::Linear(new_base), back_link));
            step += 1;
        }

        let new_ss = loaded[incoming.field_index(TssField::Sreg(SegmentRegister::SS))] as u16;
        let new_sp = loaded[incoming.field_index(TssField::Gpr(Register16::SP as u8))] as u16;
        let mut pushed = 0u16;
        if let Some(code) = request.error_code {
            pushed = incoming.width.bytes() as u16;
            let address = BusAddress::Segmented(new_ss, new_sp.wrapping_sub(pushed) as u32);
            step_ready!(self.link.write(step, env.bus, incoming.width, address, code));
        }

        let old_tr = env.regs.tr;
        for (n, value) in loaded.iter().enumerate().take(incoming.field_count()) {
            let (field, _, width) = incoming.field(n);
            field.set(env.regs, width, *value);
        }
        if pushed > 0 {
            env.regs.set16(Register16::SP, new_sp.wrapping_sub(pushed));
        }
        if nesting {
            env.regs.set_flag_state(FLAG_NESTED_TASK, true);
        }
        env.regs.tr = request.selector;
        env.regs.tr_base = new_base;
        env.regs.tr_limit = request.descriptor.limit;
        env.regs.tr_format = format;
        env.regs.msw |= MSW_TASK_SWITCHED;

        log::debug!(
            "Task switch ({:?}) {:04X} -> {:04X}, entering {:04X}:{:08X}",
            request.source,
            old_tr,
            request.selector,
            env.regs.sreg(SegmentRegister::CS),
            env.regs.eip
        );
        Ok(StepOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        biu::{wait_state_bus::BusKind, WaitStateBus},
        exec::{handler::ExecOptions, resolver::OpcodeCatalog},
        segmentation::{RealModeSegmentation, SegmentDescriptor},
    };
    use std::sync::Arc;

    const OLD_TSS: u32 = 0x1000;
    const NEW_TSS: u32 = 0x2000;

    fn tss_request(format: TssFormat, limit: u32, source: TaskSwitchSource) -> TaskSwitchRequest {
        TaskSwitchRequest {
            selector: 0x0030,
            descriptor: SegmentDescriptor {
                base: NEW_TSS,
                limit,
                kind: DescriptorKind::Tss { format, busy: false },
                present: true,
            },
            source,
            gated: false,
            error_code: None,
        }
    }

    fn current_task(regs: &mut RegisterFile, format: TssFormat) {
        regs.tr = 0x0028;
        regs.tr_base = OLD_TSS;
        regs.tr_limit = TssLayout::of(format).min_limit;
        regs.tr_format = format;
    }

    fn run_to_completion(
        phase: &mut TaskSwitchPhase,
        generation: ProcessorGeneration,
        regs: &mut RegisterFile,
        bus: &mut WaitStateBus,
    ) -> StepResult {
        let table = DispatchTable::resolve(&Arc::new(OpcodeCatalog::new()), generation);
        let mut ic = InstructionContext::new();
        loop {
            let mut env = ExecEnv {
                regs: &mut *regs,
                bus: &mut *bus,
                segmentation: &RealModeSegmentation,
                generation,
                options: ExecOptions::default(),
                tsc: 0,
            };
            match phase.step(&mut ic, &mut env, &table) {
                Ok(StepOutcome::Suspended) => continue,
                other => return other,
            }
        }
    }

    #[test]
    fn test_tss16_call_nests() {
        let mut bus = WaitStateBus::new(0x10000, ProcessorGeneration::Intel80286).with_wait_states(1);
        let mut regs = RegisterFile::new();
        current_task(&mut regs, TssFormat::Tss16);
        regs.eip = 0x0105;
        regs.set16(Register16::AX, 0xAAAA);

        // Incoming task state.
        bus.poke_u16(NEW_TSS + 0x0E, 0x0200);
        bus.poke_u16(NEW_TSS + 0x12, 0x5555);
        bus.poke_u16(NEW_TSS + 0x1A, 0x0400);
        bus.poke_u16(NEW_TSS + 0x24, 0x0070);

        let mut phase = TaskSwitchPhase::new(tss_request(TssFormat::Tss16, 0x2B, TaskSwitchSource::Call));
        assert_eq!(
            run_to_completion(&mut phase, ProcessorGeneration::Intel80286, &mut regs, &mut bus),
            Ok(StepOutcome::Completed)
        );

        // Outgoing state saved.
        assert_eq!(bus.peek_u16(OLD_TSS + 0x0E), 0x0105);
        assert_eq!(bus.peek_u16(OLD_TSS + 0x12), 0xAAAA);
        // Incoming state loaded.
        assert_eq!(regs.eip, 0x0200);
        assert_eq!(regs.get16(Register16::AX), 0x5555);
        assert_eq!(regs.sp(), 0x0400);
        assert_eq!(regs.sreg(SegmentRegister::CS), 0x0070);
        // Back link and nesting.
        assert_eq!(bus.peek_u16(NEW_TSS), 0x0028);
        assert!(regs.flag(FLAG_NESTED_TASK));
        assert_eq!(regs.tr, 0x0030);
        assert_eq!(regs.tr_base, NEW_TSS);
        assert_ne!(regs.msw & MSW_TASK_SWITCHED, 0);
        // Every transfer issued exactly once despite the wait states.
        assert_eq!(bus.issue_count(BusKind::Write, OLD_TSS + 0x0E), 1);
        assert_eq!(bus.issue_count(BusKind::Read, NEW_TSS + 0x0E), 1);
    }

    #[test]
    fn test_tss32_jump_pushes_error_code() {
        let mut bus = WaitStateBus::new(0x10000, ProcessorGeneration::Intel80386);
        let mut regs = RegisterFile::new();
        current_task(&mut regs, TssFormat::Tss32);
        regs.set32(Register16::SI, 0x1234_5678);

        bus.poke_u32(NEW_TSS + 0x20, 0x0001_0000);
        bus.poke_u32(NEW_TSS + 0x38, 0x0000_0800);
        bus.poke_u16(NEW_TSS + 0x50, 0x0000);

        let mut request = tss_request(TssFormat::Tss32, 0x67, TaskSwitchSource::Jump);
        request.error_code = Some(0x0018);
        let mut phase = TaskSwitchPhase::new(request);
        assert_eq!(
            run_to_completion(&mut phase, ProcessorGeneration::Intel80386, &mut regs, &mut bus),
            Ok(StepOutcome::Completed)
        );

        assert_eq!(bus.peek_u32(OLD_TSS + 0x40), 0x1234_5678);
        assert_eq!(regs.eip, 0x0001_0000);
        assert_eq!(regs.sp(), 0x07FC);
        assert_eq!(bus.peek_u32(0x07FC), 0x0018);
        assert!(!regs.flag(FLAG_NESTED_TASK));
        // No back link for a jump.
        assert_eq!(bus.peek_u16(NEW_TSS), 0);
        assert_eq!(regs.tr_format, TssFormat::Tss32);
    }

    #[test]
    fn test_validation_faults() {
        let mut bus = WaitStateBus::new(0x10000, ProcessorGeneration::Intel80286);
        let mut regs = RegisterFile::new();
        current_task(&mut regs, TssFormat::Tss16);

        let mut phase = TaskSwitchPhase::new(tss_request(TssFormat::Tss16, 0x20, TaskSwitchSource::Jump));
        assert_eq!(
            run_to_completion(&mut phase, ProcessorGeneration::Intel80286, &mut regs, &mut bus),
            Err(CpuException::InvalidTss(0x0030))
        );

        let mut request = tss_request(TssFormat::Tss16, 0x2B, TaskSwitchSource::Jump);
        request.descriptor.present = false;
        let mut phase = TaskSwitchPhase::new(request);
        assert_eq!(
            run_to_completion(&mut phase, ProcessorGeneration::Intel80286, &mut regs, &mut bus),
            Err(CpuException::SegmentNotPresent(0x0030))
        );

        // 32-bit TSS on a 286.
        let mut phase = TaskSwitchPhase::new(tss_request(TssFormat::Tss32, 0x67, TaskSwitchSource::Jump));
        assert_eq!(
            run_to_completion(&mut phase, ProcessorGeneration::Intel80286, &mut regs, &mut bus),
            Err(CpuException::GeneralProtection(0x0030))
        );

        // Nothing was written.
        assert!(bus.transactions().is_empty());
        assert_eq!(regs.tr, 0x0028);
    }
}
