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

    exec::interrupt.rs

    Interrupt delivery. In protected mode a vector whose gate is a task
    gate hands the core to a TaskSwitch phase; every other vector is
    delivered through the real-mode interrupt vector table.

*/

use crate::{
    biu::{BusAddress, TransferSize},
    cpu_common::CpuException,
    exec::{
        context::{InstructionContext, StepTrack},
        handler::{ExecEnv, InterruptRequest, StepOutcome, StepResult, TaskSwitchRequest, TaskSwitchSource},
        phase::{PhaseKind, PhaseStep},
        resolver::DispatchTable,
    },
    registers::{Register16, SegmentRegister, FLAG_INTERRUPT, FLAG_TRAP},
    segmentation::DescriptorKind,
    step_ready,
};

/// Size in bytes of the FLAGS, CS, IP frame.
pub const INTERRUPT_FRAME_LEN: u16 = 6;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InterruptPhase {
    pub request: InterruptRequest,
}

impl InterruptPhase {
    pub fn new(request: InterruptRequest) -> Self {
        Self { request }
    }
}

impl PhaseStep for InterruptPhase {
    #[inline]
    fn kind(&self) -> PhaseKind {
        PhaseKind::Interrupt
    }

    fn step(&mut self, ic: &mut InstructionContext, env: &mut ExecEnv<'_>, _dispatch: &DispatchTable) -> StepResult {
        if ic.internal_interrupt.position() == 0 {
            if let Some(switch) = task_gate_switch(&self.request, env)? {
                return Ok(StepOutcome::TaskSwitch(switch));
            }
        }
        deliver_real_mode(&self.request, &mut ic.internal_interrupt, env)
    }
}

/// Resolve `request` to a task switch if protection is on and its gate is a task gate.
pub fn task_gate_switch(
    request: &InterruptRequest,
    env: &ExecEnv<'_>,
) -> Result<Option<TaskSwitchRequest>, CpuException> {
    if !env.regs.protected_mode() {
        return Ok(None);
    }
    let Some(gate) = env.load_interrupt_gate(request.vector)? else {
        return Ok(None);
    };
    let DescriptorKind::TaskGate { tss_selector } = gate.kind else {
        return Ok(None);
    };
    if !gate.present {
        return Err(CpuException::SegmentNotPresent(((request.vector as u16) << 3) | 0x02));
    }

    let descriptor = env.task_gate_target(tss_selector)?;
    log::trace!("INT {:02X} through task gate to {:04X}", request.vector, tss_selector);
    Ok(Some(TaskSwitchRequest {
        selector: tss_selector,
        descriptor,
        source: TaskSwitchSource::Interrupt,
        gated: true,
        error_code: request.error_code,
    }))
}

/// Vector through the IVT: fetch the new CS:IP, push FLAGS, CS and IP, then commit.
///
/// The whole frame is validated before the IVT is read. Registers are not modified until the
/// last push has been acknowledged, so the sequence can be re-run from the top any number of
/// times. Error codes are not pushed in real mode.
pub fn deliver_real_mode(request: &InterruptRequest, track: &mut StepTrack, env: &mut ExecEnv<'_>) -> StepResult {
    if track.position() == 0 {
        env.check_push_frame(INTERRUPT_FRAME_LEN / 2, TransferSize::Word)?;
    }

    let entry = (request.vector as u32) << 2;
    let new_ip = step_ready!(track.read(0, env.bus, TransferSize::Word, BusAddress::Linear(entry)));
    let new_cs = step_ready!(track.read(1, env.bus, TransferSize::Word, BusAddress::Linear(entry + 2)));

    let sp = env.regs.sp();
    let frame = [
        env.regs.eflags & 0xFFFF,
        env.regs.sreg(SegmentRegister::CS) as u32,
        env.regs.eip & 0xFFFF,
    ];

    for (slot, value) in frame.iter().enumerate() {
        let step = 2 + slot as u8;
        let offset = sp.wrapping_sub(2 * (slot as u16 + 1)) as u32;
        let address = env.seg_addr(SegmentRegister::SS, offset);
        step_ready!(track.write(step, env.bus, TransferSize::Word, address, *value));
    }

    env.regs.set16(Register16::SP, sp.wrapping_sub(INTERRUPT_FRAME_LEN));
    env.regs.set_flag_state(FLAG_INTERRUPT, false);
    env.regs.set_flag_state(FLAG_TRAP, false);
    env.regs.set_sreg(SegmentRegister::CS, new_cs as u16);
    env.regs.eip = new_ip;

    log::trace!(
        "Vectored INT {:02X} ({:?}) to {:04X}:{:04X}",
        request.vector,
        request.kind,
        new_cs,
        new_ip
    );
    Ok(StepOutcome::Completed)
}
