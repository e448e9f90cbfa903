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

    exec::context.rs

    Per-core instruction context and the step tracking that makes every
    instruction resumable.

    A step function is re-run from the top every time it is invoked. Each
    bus transfer it performs is numbered; a StepTrack remembers how many of
    those transfers have been acknowledged. Transfers already acknowledged
    are answered from the latch without touching the bus, the transfer at
    the current position is (re)issued, and nothing past it is reached until
    the BIU reports it complete.

*/

use std::{cmp::Ordering, task::Poll};

use crate::{
    biu::{BusAddress, BusPort, BusResponse, TransferSize},
    cpu_common::{CpuException, OperandSize},
    exec::handler::ExecEnv,
    registers::SegmentRegister,
    segmentation::AccessKind,
};

/// Number of bus steps a single StepTrack can latch.
pub const STEP_LATCH_LEN: usize = 16;

/// Suspend the current step function if a step helper returned Poll::Pending.
#[macro_export]
macro_rules! step_ready {
    ($e:expr) => {
        match $e {
            ::std::task::Poll::Ready(v) => v,
            ::std::task::Poll::Pending => return Ok($crate::exec::StepOutcome::Suspended),
        }
    };
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepTrack {
    step:  u8,
    latch: [u32; STEP_LATCH_LEN],
}

impl StepTrack {
    pub fn reset(&mut self) {
        self.step = 0;
        self.latch = [0; STEP_LATCH_LEN];
    }

    /// Number of steps completed since the last reset.
    #[inline]
    pub fn position(&self) -> u8 {
        self.step
    }

    #[inline]
    pub fn is_done(&self, step: u8) -> bool {
        self.step > step
    }

    fn ahead_of(&self, step: u8) -> bool {
        if self.step < step {
            // A step can only be reached once every earlier step has returned Ready.
            log::error!("StepTrack: step {} requested at position {}", step, self.step);
            debug_assert!(false, "step issued out of order");
            return true;
        }
        false
    }

    /// Read `size` bytes at `address` as step number `step`.
    pub fn read(&mut self, step: u8, bus: &mut dyn BusPort, size: TransferSize, address: BusAddress) -> Poll<u32> {
        debug_assert!((step as usize) < STEP_LATCH_LEN);
        match self.step.cmp(&step) {
            Ordering::Greater => Poll::Ready(self.latch[step as usize]),
            Ordering::Less => {
                self.ahead_of(step);
                Poll::Pending
            }
            Ordering::Equal => match bus.request_read(size, address) {
                BusResponse::Pending => Poll::Pending,
                BusResponse::Ready(data) => {
                    let data = data & size.mask();
                    if let Some(slot) = self.latch.get_mut(step as usize) {
                        *slot = data;
                    }
                    self.step += 1;
                    Poll::Ready(data)
                }
            },
        }
    }

    /// Write `value` to `address` as step number `step`.
    pub fn write(
        &mut self,
        step: u8,
        bus: &mut dyn BusPort,
        size: TransferSize,
        address: BusAddress,
        value: u32,
    ) -> Poll<()> {
        match self.step.cmp(&step) {
            Ordering::Greater => Poll::Ready(()),
            Ordering::Less => {
                self.ahead_of(step);
                Poll::Pending
            }
            Ordering::Equal => match bus.request_write(size, address, value & size.mask()) {
                BusResponse::Pending => Poll::Pending,
                BusResponse::Ready(_) => {
                    self.step += 1;
                    Poll::Ready(())
                }
            },
        }
    }
}

/// The r/m operand of a ModR/M byte, with the effective address already computed by the decoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RmOperand {
    Register(u8),
    Memory { segment: SegmentRegister, offset: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModRm {
    pub reg: u8,
    pub rm:  RmOperand,
}

/// An instruction as handed over by the external fetch/decode stage.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DecodedInstruction {
    pub opcode: u8,
    pub extended: bool,
    pub operand_size: OperandSize,
    pub modrm: Option<ModRm>,
    pub immediate: u32,
    /// Second immediate: the segment of a far pointer.
    pub immediate2: u32,
    /// Data segment after any override prefix.
    pub segment: SegmentRegister,
    /// Address of the first byte of the instruction, prefixes included.
    pub ip: u32,
    pub length: u8,
}

impl DecodedInstruction {
    pub fn new(opcode: u8, operand_size: OperandSize) -> Self {
        Self {
            opcode,
            operand_size,
            segment: SegmentRegister::DS,
            ..Default::default()
        }
    }

    pub fn new_0f(opcode: u8, operand_size: OperandSize) -> Self {
        Self {
            extended: true,
            ..Self::new(opcode, operand_size)
        }
    }

    pub fn with_modrm(mut self, reg: u8, rm: RmOperand) -> Self {
        self.modrm = Some(ModRm { reg, rm });
        self
    }

    pub fn with_immediate(mut self, immediate: u32) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn with_far_pointer(mut self, segment: u16, offset: u32) -> Self {
        self.immediate = offset;
        self.immediate2 = segment as u32;
        self
    }

    pub fn with_segment(mut self, segment: SegmentRegister) -> Self {
        self.segment = segment;
        self
    }

    pub fn at(mut self, ip: u32, length: u8) -> Self {
        self.ip = ip;
        self.length = length;
        self
    }

    #[inline]
    pub fn next_ip(&self) -> u32 {
        self.ip.wrapping_add(self.length as u32)
    }
}

/// Scratch state of one virtual CPU core. Owned by the core and only touched by the active
/// phase and the handler it runs.
#[derive(Clone, Debug, Default)]
pub struct InstructionContext {
    pub instruction: StepTrack,
    pub modrm: StepTrack,
    pub internal_instruction: StepTrack,
    pub internal_modrm: StepTrack,
    pub internal_interrupt: StepTrack,
    /// Set when the active phase has completed.
    pub executed: bool,
    pub oper1: u32,
    pub oper2: u32,
    pub result: u32,
    pub i: DecodedInstruction,
}

impl InstructionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset everything owned by a Normal phase for a new instruction.
    pub fn begin_instruction(&mut self, i: DecodedInstruction) {
        self.instruction.reset();
        self.modrm.reset();
        self.internal_instruction.reset();
        self.internal_modrm.reset();
        self.oper1 = 0;
        self.oper2 = 0;
        self.result = 0;
        self.executed = false;
        self.i = i;
    }

    pub fn begin_interrupt(&mut self) {
        self.internal_interrupt.reset();
        self.executed = false;
    }

    #[inline]
    pub fn opcode(&self) -> u8 {
        self.i.opcode
    }

    #[inline]
    pub fn operand_size(&self) -> OperandSize {
        self.i.operand_size
    }

    #[inline]
    pub fn extended(&self) -> bool {
        self.i.extended
    }

    fn rm(&self) -> Result<ModRm, CpuException> {
        match self.i.modrm {
            Some(modrm) => Ok(modrm),
            None => {
                log::error!("Opcode {:02X} requires a ModR/M operand but none was decoded", self.i.opcode);
                Err(CpuException::InvalidOpcode)
            }
        }
    }

    /// The reg field of the ModR/M byte.
    pub fn modrm_reg(&self) -> Result<u8, CpuException> {
        self.rm().map(|m| m.reg)
    }

    /// Read the r/m operand at the instruction's operand size, as ModR/M step `step`.
    pub fn read_rm(&mut self, env: &mut ExecEnv<'_>, step: u8) -> Result<Poll<u32>, CpuException> {
        let size = self.i.operand_size;
        match self.rm()?.rm {
            RmOperand::Register(reg) => Ok(Poll::Ready(env.regs.get_reg(reg, size))),
            RmOperand::Memory { segment, offset } => {
                if !self.modrm.is_done(step) {
                    env.check(segment, offset, size.into(), AccessKind::Read)?;
                }
                let address = env.seg_addr(segment, offset);
                Ok(self.modrm.read(step, env.bus, size.into(), address))
            }
        }
    }

    /// Write the r/m operand, as ModR/M step `step`. Register destinations are written
    /// immediately, so this must be the last thing a handler does.
    pub fn write_rm(&mut self, env: &mut ExecEnv<'_>, step: u8, value: u32) -> Result<Poll<()>, CpuException> {
        let size = self.i.operand_size;
        match self.rm()?.rm {
            RmOperand::Register(reg) => {
                env.regs.set_reg(reg, size, value);
                Ok(Poll::Ready(()))
            }
            RmOperand::Memory { segment, offset } => {
                if !self.modrm.is_done(step) {
                    env.check(segment, offset, size.into(), AccessKind::Write)?;
                }
                let address = env.seg_addr(segment, offset);
                Ok(self.modrm.write(step, env.bus, size.into(), address, value))
            }
        }
    }

    /// Write `value` into stack slot `slot` below SP (slot 1 is the first push) as instruction
    /// step `step`. SP itself is left for the handler to commit.
    pub fn push_slot(
        &mut self,
        env: &mut ExecEnv<'_>,
        step: u8,
        slot: u16,
        size: TransferSize,
        value: u32,
    ) -> Result<Poll<()>, CpuException> {
        let offset = env.regs.sp().wrapping_sub(slot.wrapping_mul(size.bytes() as u16)) as u32;
        if !self.instruction.is_done(step) {
            env.check(SegmentRegister::SS, offset, size, AccessKind::Write)?;
        }
        let address = env.seg_addr(SegmentRegister::SS, offset);
        Ok(self.instruction.write(step, env.bus, size, address, value))
    }

    /// Validate all `slots` pushes of a frame before the instruction's first bus step.
    pub fn check_push_frame(&self, env: &ExecEnv<'_>, slots: u16, size: TransferSize) -> Result<(), CpuException> {
        if self.instruction.position() > 0 {
            return Ok(());
        }
        env.check_push_frame(slots, size)
    }

    /// Read stack slot `slot` above SP (slot 0 is the top of stack) as instruction step `step`.
    pub fn pop_slot(
        &mut self,
        env: &mut ExecEnv<'_>,
        step: u8,
        slot: u16,
        size: TransferSize,
    ) -> Result<Poll<u32>, CpuException> {
        let offset = env.regs.sp().wrapping_add(slot.wrapping_mul(size.bytes() as u16)) as u32;
        if !self.instruction.is_done(step) {
            env.check(SegmentRegister::SS, offset, size, AccessKind::Read)?;
        }
        let address = env.seg_addr(SegmentRegister::SS, offset);
        Ok(self.instruction.read(step, env.bus, size, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        biu::{wait_state_bus::BusKind, WaitStateBus},
        cpu_common::ProcessorGeneration,
    };

    #[test]
    fn test_track_latches_completed_reads() {
        let mut bus = WaitStateBus::new(0x1000, ProcessorGeneration::Intel8086);
        bus.poke_u16(0x10, 0x1111);
        bus.poke_u16(0x20, 0x2222);
        bus.script_wait_states(0);
        bus.script_wait_states(1);

        let mut track = StepTrack::default();
        let a = BusAddress::Linear(0x10);
        let b = BusAddress::Linear(0x20);

        assert_eq!(track.read(0, &mut bus, TransferSize::Word, a), Poll::Ready(0x1111));
        assert_eq!(track.read(1, &mut bus, TransferSize::Word, b), Poll::Pending);

        // Re-invocation: step 0 comes from the latch, step 1 is polled again.
        bus.poke_u16(0x10, 0xFFFF);
        assert_eq!(track.read(0, &mut bus, TransferSize::Word, a), Poll::Ready(0x1111));
        assert_eq!(track.read(1, &mut bus, TransferSize::Word, b), Poll::Ready(0x2222));
        assert_eq!(track.position(), 2);
        assert_eq!(bus.issue_count(BusKind::Read, 0x10), 1);
        assert_eq!(bus.issue_count(BusKind::Read, 0x20), 1);
    }

    #[test]
    fn test_track_write_not_repeated() {
        let mut bus = WaitStateBus::new(0x1000, ProcessorGeneration::Intel8086);
        let mut track = StepTrack::default();
        let a = BusAddress::Linear(0x40);
        assert_eq!(track.write(0, &mut bus, TransferSize::Byte, a, 0x1AA), Poll::Ready(()));
        assert_eq!(bus.peek_u8(0x40), 0xAA);
        bus.poke_u8(0x40, 0);
        assert_eq!(track.write(0, &mut bus, TransferSize::Byte, a, 0xAA), Poll::Ready(()));
        assert_eq!(bus.peek_u8(0x40), 0);
        track.reset();
        assert_eq!(track.position(), 0);
    }

    #[test]
    fn test_begin_instruction_resets_counters() {
        let mut bus = WaitStateBus::new(0x1000, ProcessorGeneration::Intel8086);
        let mut ic = InstructionContext::new();
        let _ = ic.instruction.read(0, &mut bus, TransferSize::Word, BusAddress::Linear(0));
        let _ = ic.internal_interrupt.read(0, &mut bus, TransferSize::Word, BusAddress::Linear(0));
        ic.executed = true;

        ic.begin_instruction(DecodedInstruction::new(0x90, OperandSize::Size16));
        assert_eq!(ic.instruction.position(), 0);
        assert!(!ic.executed);
        assert_eq!(ic.opcode(), 0x90);
        // The interrupt counter belongs to the Interrupt phase.
        assert_eq!(ic.internal_interrupt.position(), 1);
    }
}
