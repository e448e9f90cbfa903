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

    cpu_common::error.rs

    This module defines the engine error type and the CPU exceptions that
    instruction steps raise.

*/

use crate::{cpu_common::ProcessorGeneration, exec::PhaseKind};
use thiserror::Error;

pub const VECTOR_DIVIDE_ERROR: u8 = 0x00;
pub const VECTOR_BREAKPOINT: u8 = 0x03;
pub const VECTOR_BOUND_RANGE: u8 = 0x05;
pub const VECTOR_INVALID_OPCODE: u8 = 0x06;
pub const VECTOR_DOUBLE_FAULT: u8 = 0x08;
pub const VECTOR_INVALID_TSS: u8 = 0x0A;
pub const VECTOR_SEGMENT_NOT_PRESENT: u8 = 0x0B;
pub const VECTOR_STACK_FAULT: u8 = 0x0C;
pub const VECTOR_GENERAL_PROTECTION: u8 = 0x0D;

/// Errors reported to the driver calling into an ExecCore. These are contract violations or
/// terminal states, never instruction faults.
#[derive(Debug, Error, PartialEq)]
pub enum CpuError {
    #[error("a {active:?} phase is already active")]
    PhaseBusy { active: PhaseKind },
    #[error("the dispatch table cannot be replaced while a phase is active")]
    DispatchBusy,
    #[error("dispatch table was built for {table}, core emulates {core}")]
    GenerationMismatch {
        table: ProcessorGeneration,
        core:  ProcessorGeneration,
    },
    #[error("the CPU is in shutdown")]
    Shutdown,
}

/// A fault raised by an instruction, interrupt or task switch step. Returning one of these from
/// a step redirects the core into the Interrupt phase.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum CpuException {
    #[error("divide error")]
    DivideError,
    #[error("bound range exceeded")]
    BoundRange,
    #[error("invalid opcode")]
    InvalidOpcode,
    #[error("double fault")]
    DoubleFault,
    #[error("invalid TSS ({0:04X})")]
    InvalidTss(u16),
    #[error("segment not present ({0:04X})")]
    SegmentNotPresent(u16),
    #[error("stack fault ({0:04X})")]
    StackFault(u16),
    #[error("general protection fault ({0:04X})")]
    GeneralProtection(u16),
}

impl CpuException {
    pub fn vector(&self) -> u8 {
        match self {
            CpuException::DivideError => VECTOR_DIVIDE_ERROR,
            CpuException::BoundRange => VECTOR_BOUND_RANGE,
            CpuException::InvalidOpcode => VECTOR_INVALID_OPCODE,
            CpuException::DoubleFault => VECTOR_DOUBLE_FAULT,
            CpuException::InvalidTss(_) => VECTOR_INVALID_TSS,
            CpuException::SegmentNotPresent(_) => VECTOR_SEGMENT_NOT_PRESENT,
            CpuException::StackFault(_) => VECTOR_STACK_FAULT,
            CpuException::GeneralProtection(_) => VECTOR_GENERAL_PROTECTION,
        }
    }

    /// The error code pushed by the exception, if it has one.
    pub fn error_code(&self) -> Option<u32> {
        match self {
            CpuException::DivideError | CpuException::BoundRange | CpuException::InvalidOpcode => None,
            CpuException::DoubleFault => Some(0),
            CpuException::InvalidTss(code)
            | CpuException::SegmentNotPresent(code)
            | CpuException::StackFault(code)
            | CpuException::GeneralProtection(code) => Some(*code as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_vectors() {
        assert_eq!(CpuException::GeneralProtection(0).vector(), 13);
        assert_eq!(CpuException::GeneralProtection(0x28).error_code(), Some(0x28));
        assert_eq!(CpuException::InvalidOpcode.error_code(), None);
        assert_eq!(CpuException::DoubleFault.error_code(), Some(0));
        assert_eq!(CpuException::StackFault(0).vector(), VECTOR_STACK_FAULT);
    }
}
