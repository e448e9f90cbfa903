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

    segmentation.rs

    The segmentation / protection collaborator. Instruction steps ask it
    whether an access is legal before they put the access on the bus, and
    far control transfers ask it for the descriptor behind a selector.

*/

use crate::{
    biu::TransferSize,
    cpu_common::{CpuException, ProcessorGeneration},
    registers::{RegisterFile, SegmentRegister, TssFormat},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

/// A memory access to be validated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentAccess {
    pub segment: SegmentRegister,
    pub offset: u32,
    pub size: TransferSize,
    pub kind: AccessKind,
}

impl SegmentAccess {
    /// Offset of the last byte touched, without wrapping.
    #[inline]
    pub fn last_offset(&self) -> u64 {
        self.offset as u64 + self.size.bytes() as u64 - 1
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorKind {
    Code,
    Data,
    Tss { format: TssFormat, busy: bool },
    TaskGate { tss_selector: u16 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub base: u32,
    pub limit: u32,
    pub kind: DescriptorKind,
    pub present: bool,
}

pub trait Segmentation {
    /// Validate an access. Must be free of side effects; steps call it again every time they
    /// are re-invoked.
    fn check_access(
        &self,
        generation: ProcessorGeneration,
        regs: &RegisterFile,
        access: &SegmentAccess,
    ) -> Result<(), CpuException>;

    /// Look up the descriptor for a selector. Ok(None) means there is no descriptor table in
    /// effect and the selector is a real-mode segment value.
    fn load_descriptor(&self, regs: &RegisterFile, selector: u16) -> Result<Option<SegmentDescriptor>, CpuException>;

    /// Look up the interrupt descriptor table gate for `vector`. Ok(None) means interrupts are
    /// delivered through the real-mode vector table.
    fn load_interrupt_gate(&self, _regs: &RegisterFile, _vector: u8) -> Result<Option<SegmentDescriptor>, CpuException> {
        Ok(None)
    }
}

/// Real-mode segmentation. The 8086 and V30 wrap offsets silently; later CPUs fault on an
/// access that runs past the 64K segment limit.
#[derive(Copy, Clone, Debug, Default)]
pub struct RealModeSegmentation;

impl Segmentation for RealModeSegmentation {
    fn check_access(
        &self,
        generation: ProcessorGeneration,
        _regs: &RegisterFile,
        access: &SegmentAccess,
    ) -> Result<(), CpuException> {
        if generation < ProcessorGeneration::Intel80286 {
            return Ok(());
        }

        if access.last_offset() > 0xFFFF {
            return match access.segment {
                SegmentRegister::SS => Err(CpuException::StackFault(0)),
                _ => Err(CpuException::GeneralProtection(0)),
            };
        }
        Ok(())
    }

    fn load_descriptor(&self, _regs: &RegisterFile, _selector: u16) -> Result<Option<SegmentDescriptor>, CpuException> {
        Ok(None)
    }
}
