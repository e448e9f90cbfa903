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

    registers.rs

    Architectural register file of one virtual CPU core.

*/

use crate::cpu_common::OperandSize;

pub const FLAG_CARRY: u32 = 0b0000_0000_0000_0001;
pub const FLAG_RESERVED1: u32 = 0b0000_0000_0000_0010;
pub const FLAG_PARITY: u32 = 0b0000_0000_0000_0100;
pub const FLAG_AUX_CARRY: u32 = 0b0000_0000_0001_0000;
pub const FLAG_ZERO: u32 = 0b0000_0000_0100_0000;
pub const FLAG_SIGN: u32 = 0b0000_0000_1000_0000;
pub const FLAG_TRAP: u32 = 0b0000_0001_0000_0000;
pub const FLAG_INTERRUPT: u32 = 0b0000_0010_0000_0000;
pub const FLAG_DIRECTION: u32 = 0b0000_0100_0000_0000;
pub const FLAG_OVERFLOW: u32 = 0b0000_1000_0000_0000;
pub const FLAG_NESTED_TASK: u32 = 0b0100_0000_0000_0000;

pub const MSW_PROTECTED_MODE: u16 = 0b0000_0000_0000_0001;
pub const MSW_TASK_SWITCHED: u16 = 0b0000_0000_0000_1000;

/// Register numbering follows the x86 encoding order used by ModR/M and the +r opcodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Register16 {
    AX,
    CX,
    DX,
    BX,
    SP,
    BP,
    SI,
    DI,
}

pub const REGISTER16_LUT: [Register16; 8] = [
    Register16::AX,
    Register16::CX,
    Register16::DX,
    Register16::BX,
    Register16::SP,
    Register16::BP,
    Register16::SI,
    Register16::DI,
];

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentRegister {
    ES,
    #[default]
    CS,
    SS,
    DS,
    FS,
    GS,
}

pub const SREGISTER_LUT: [SegmentRegister; 6] = [
    SegmentRegister::ES,
    SegmentRegister::CS,
    SegmentRegister::SS,
    SegmentRegister::DS,
    SegmentRegister::FS,
    SegmentRegister::GS,
];

/// The format of the TSS referenced by TR.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TssFormat {
    #[default]
    Tss16,
    Tss32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegisterFile {
    gpr: [u32; 8],
    sreg: [u16; 6],
    pub eip: u32,
    pub eflags: u32,
    pub msw: u16,
    pub tr: u16,
    pub tr_base: u32,
    pub tr_limit: u32,
    pub tr_format: TssFormat,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            gpr: [0; 8],
            sreg: [0; 6],
            eip: 0,
            eflags: FLAG_RESERVED1,
            msw: 0,
            tr: 0,
            tr_base: 0,
            tr_limit: 0,
            tr_format: TssFormat::Tss16,
        }
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get16(&self, reg: Register16) -> u16 {
        self.gpr[reg as usize] as u16
    }

    #[inline]
    pub fn set16(&mut self, reg: Register16, value: u16) {
        let r = &mut self.gpr[reg as usize];
        *r = (*r & 0xFFFF_0000) | value as u32;
    }

    #[inline]
    pub fn get32(&self, reg: Register16) -> u32 {
        self.gpr[reg as usize]
    }

    #[inline]
    pub fn set32(&mut self, reg: Register16, value: u32) {
        self.gpr[reg as usize] = value;
    }

    /// Read a general register by encoding number at the given operand size.
    #[inline]
    pub fn get_reg(&self, idx: u8, size: OperandSize) -> u32 {
        self.gpr[(idx & 0x07) as usize] & size.mask()
    }

    /// Write a general register by encoding number. 16-bit writes preserve the upper half.
    #[inline]
    pub fn set_reg(&mut self, idx: u8, size: OperandSize, value: u32) {
        match size {
            OperandSize::Size16 => self.set16(REGISTER16_LUT[(idx & 0x07) as usize], value as u16),
            OperandSize::Size32 => self.gpr[(idx & 0x07) as usize] = value,
        }
    }

    #[inline]
    pub fn sreg(&self, reg: SegmentRegister) -> u16 {
        self.sreg[reg as usize]
    }

    #[inline]
    pub fn set_sreg(&mut self, reg: SegmentRegister, value: u16) {
        self.sreg[reg as usize] = value;
    }

    #[inline]
    pub fn flag(&self, flag: u32) -> bool {
        self.eflags & flag != 0
    }

    #[inline]
    pub fn set_flag_state(&mut self, flag: u32, state: bool) {
        if state {
            self.eflags |= flag;
        }
        else {
            self.eflags &= !flag;
        }
    }

    #[inline]
    pub fn protected_mode(&self) -> bool {
        self.msw & MSW_PROTECTED_MODE != 0
    }

    /// Stack pointer at the current stack size. Only 16-bit stacks are modelled.
    #[inline]
    pub fn sp(&self) -> u16 {
        self.get16(Register16::SP)
    }
}
