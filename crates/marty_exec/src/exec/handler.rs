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

    exec::handler.rs

    The instruction handler contract and the environment a step runs in.

*/

use std::fmt;

use crate::{
    biu::{BusAddress, BusPort, TransferSize},
    cpu_common::{CpuException, ProcessorGeneration},
    exec::context::InstructionContext,
    registers::{RegisterFile, SegmentRegister},
    segmentation::{AccessKind, DescriptorKind, SegmentAccess, SegmentDescriptor, Segmentation},
};

/// Behavior switches that affect how steps and phases react to faults and unknown opcodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExecOptions {
    /// Raise #UD for opcodes with no handler (80186 and later) instead of treating them as NOPs.
    pub unhandled_raises_ud: bool,
    /// Report the faulting instruction's address on every generation, not just 80286+.
    pub fault_restarts_instruction: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            unhandled_raises_ud: false,
            fault_restarts_instruction: false,
        }
    }
}

/// Everything outside the InstructionContext that a step may touch.
pub struct ExecEnv<'a> {
    pub regs: &'a mut RegisterFile,
    pub bus: &'a mut dyn BusPort,
    pub segmentation: &'a dyn Segmentation,
    pub generation: ProcessorGeneration,
    pub options: ExecOptions,
    /// Ticks elapsed on this core, used as the time stamp counter.
    pub tsc: u64,
}

impl ExecEnv<'_> {
    #[inline]
    pub fn check(
        &self,
        segment: SegmentRegister,
        offset: u32,
        size: TransferSize,
        kind: AccessKind,
    ) -> Result<(), CpuException> {
        let access = SegmentAccess {
            segment,
            offset,
            size,
            kind,
        };
        self.segmentation.check_access(self.generation, &*self.regs, &access)
    }

    /// Validate a frame of `slots` pushes of `size` below SP, one check per slot. Multi-push
    /// sequences call this before their first write so a frame that runs off the stack segment
    /// faults with nothing written.
    pub fn check_push_frame(&self, slots: u16, size: TransferSize) -> Result<(), CpuException> {
        let sp = self.regs.sp();
        for slot in 1..=slots {
            let offset = sp.wrapping_sub(slot.wrapping_mul(size.bytes() as u16)) as u32;
            self.check(SegmentRegister::SS, offset, size, AccessKind::Write)?;
        }
        Ok(())
    }

    #[inline]
    pub fn seg_addr(&self, segment: SegmentRegister, offset: u32) -> BusAddress {
        BusAddress::Segmented(self.regs.sreg(segment), offset)
    }

    #[inline]
    pub fn load_descriptor(&self, selector: u16) -> Result<Option<SegmentDescriptor>, CpuException> {
        self.segmentation.load_descriptor(&*self.regs, selector)
    }

    #[inline]
    pub fn load_interrupt_gate(&self, vector: u8) -> Result<Option<SegmentDescriptor>, CpuException> {
        self.segmentation.load_interrupt_gate(&*self.regs, vector)
    }

    /// Follow a task gate to the TSS it names. Anything other than a TSS raises #GP.
    pub fn task_gate_target(&self, tss_selector: u16) -> Result<SegmentDescriptor, CpuException> {
        match self.load_descriptor(tss_selector)? {
            Some(tss) if matches!(tss.kind, DescriptorKind::Tss { .. }) => Ok(tss),
            _ => Err(CpuException::GeneralProtection(tss_selector & 0xFFFC)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterruptKind {
    /// Delivered by the interrupt controller between instructions.
    Hardware,
    /// INT n / INT3.
    Software,
    /// Raised by a fault.
    Exception,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InterruptRequest {
    pub vector: u8,
    pub kind: InterruptKind,
    pub error_code: Option<u32>,
}

impl InterruptRequest {
    pub fn software(vector: u8) -> Self {
        Self {
            vector,
            kind: InterruptKind::Software,
            error_code: None,
        }
    }

    pub fn hardware(vector: u8) -> Self {
        Self {
            vector,
            kind: InterruptKind::Hardware,
            error_code: None,
        }
    }
}

impl From<CpuException> for InterruptRequest {
    fn from(exception: CpuException) -> Self {
        Self {
            vector: exception.vector(),
            kind: InterruptKind::Exception,
            error_code: exception.error_code(),
        }
    }
}

/// How a task switch was reached. Calls and interrupts nest (back link + NT), jumps do not.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskSwitchSource {
    Jump,
    Call,
    Interrupt,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TaskSwitchRequest {
    /// Selector of the destination TSS.
    pub selector: u16,
    /// Descriptor of the destination TSS.
    pub descriptor: SegmentDescriptor,
    pub source: TaskSwitchSource,
    /// True when reached through a task gate.
    pub gated: bool,
    /// Error code to push on the new task's stack.
    pub error_code: Option<u32>,
}

/// Result of one invocation of a step function.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Waiting on the BIU. Invoke again next tick.
    Suspended,
    Completed,
    /// The instruction is done and hands the core to an Interrupt phase.
    Interrupt(InterruptRequest),
    /// The instruction is done and hands the core to a TaskSwitch phase.
    TaskSwitch(TaskSwitchRequest),
}

pub type StepResult = Result<StepOutcome, CpuException>;

pub type HandlerFn = fn(&mut InstructionContext, &mut ExecEnv<'_>) -> StepResult;

pub trait InstructionHandler: Send + Sync {
    fn mnemonic(&self) -> &'static str;
    /// Run the instruction from wherever its step counters say it left off.
    fn step(&self, ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult;
}

/// A handler backed by a plain function.
pub struct FnHandler {
    mnemonic: &'static str,
    func: HandlerFn,
}

impl FnHandler {
    pub fn new(mnemonic: &'static str, func: HandlerFn) -> Self {
        Self { mnemonic, func }
    }
}

impl InstructionHandler for FnHandler {
    #[inline]
    fn mnemonic(&self) -> &'static str {
        self.mnemonic
    }

    #[inline]
    fn step(&self, ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
        (self.func)(ic, env)
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnHandler({})", self.mnemonic)
    }
}
