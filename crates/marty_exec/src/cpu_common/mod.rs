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

    cpu_common::mod.rs

    Types shared by every part of the execution core: the emulated processor
    generation, operand size and trace mode.

*/

pub mod builder;
pub mod error;

use std::str::FromStr;

use serde_with::DeserializeFromStr;
use strum::{EnumCount as _, IntoEnumIterator};
use strum_macros::{Display, EnumCount, EnumIter, EnumString};

pub use builder::ExecCoreBuilder;
pub use error::{CpuError, CpuException};

/// The processor generations the core can emulate, in release order. The derived ordering is
/// the "earlier/later" relation used by opcode resolution.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
    EnumCount,
    EnumString,
    DeserializeFromStr,
)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum ProcessorGeneration {
    #[default]
    #[strum(to_string = "8086", serialize = "intel8086", serialize = "8088", serialize = "intel8088")]
    Intel8086,
    #[strum(to_string = "V30", serialize = "necv30", serialize = "80186", serialize = "intel80186")]
    NecV30,
    #[strum(to_string = "80286", serialize = "intel80286", serialize = "286")]
    Intel80286,
    #[strum(to_string = "80386", serialize = "intel80386", serialize = "386")]
    Intel80386,
    #[strum(to_string = "80486", serialize = "intel80486", serialize = "486")]
    Intel80486,
    #[strum(to_string = "Pentium", serialize = "586")]
    Pentium,
    #[strum(to_string = "PentiumPro", serialize = "686")]
    PentiumPro,
    #[strum(to_string = "PentiumII", serialize = "pentium2")]
    PentiumII,
}

impl ProcessorGeneration {
    pub const EARLIEST: ProcessorGeneration = ProcessorGeneration::Intel8086;
    /// The first generation with a 0F opcode table.
    pub const FIRST_0F: ProcessorGeneration = ProcessorGeneration::Intel80286;

    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(idx: usize) -> Option<ProcessorGeneration> {
        if idx >= ProcessorGeneration::COUNT {
            return None;
        }
        ProcessorGeneration::iter().nth(idx)
    }

    /// The generation immediately before this one, or None for the 8086.
    #[inline]
    pub fn previous(&self) -> Option<ProcessorGeneration> {
        match self.index() {
            0 => None,
            idx => ProcessorGeneration::from_index(idx - 1),
        }
    }

    #[inline]
    pub fn has_0f_table(&self) -> bool {
        *self >= ProcessorGeneration::FIRST_0F
    }

    #[inline]
    pub fn has_32bit_operands(&self) -> bool {
        *self >= ProcessorGeneration::Intel80386
    }

    /// Faults on these generations report the address of the faulting instruction.
    #[inline]
    pub fn restarts_faulting_instruction(&self) -> bool {
        *self >= ProcessorGeneration::Intel80286
    }

    /// Width of the physical address bus.
    pub fn address_mask(&self) -> u32 {
        match self {
            ProcessorGeneration::Intel8086 | ProcessorGeneration::NecV30 => 0x000F_FFFF,
            ProcessorGeneration::Intel80286 => 0x00FF_FFFF,
            _ => 0xFFFF_FFFF,
        }
    }
}

/// Operand size of the current instruction. Size32 orders above Size16; opcode resolution
/// searches the larger size first and falls back to the smaller one.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumCount)]
pub enum OperandSize {
    #[default]
    Size16,
    Size32,
}

impl OperandSize {
    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The next size down in the resolution search order.
    #[inline]
    pub fn smaller(&self) -> Option<OperandSize> {
        match self {
            OperandSize::Size32 => Some(OperandSize::Size16),
            OperandSize::Size16 => None,
        }
    }

    #[inline]
    pub fn bytes(&self) -> u32 {
        match self {
            OperandSize::Size16 => 2,
            OperandSize::Size32 => 4,
        }
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        match self {
            OperandSize::Size16 => 0xFFFF,
            OperandSize::Size32 => 0xFFFF_FFFF,
        }
    }

    #[inline]
    pub fn sign_bit(&self) -> u32 {
        match self {
            OperandSize::Size16 => 0x8000,
            OperandSize::Size32 => 0x8000_0000,
        }
    }
}

#[derive(Copy, Clone, Debug, DeserializeFromStr, PartialEq, Default)]
pub enum TraceMode {
    #[default]
    None,
    Instruction,
}

impl FromStr for TraceMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String>
    where
        Self: Sized,
    {
        match s.to_lowercase().as_str() {
            "none" => Ok(TraceMode::None),
            "instruction" => Ok(TraceMode::Instruction),
            _ => Err("Bad value for tracemode".to_string()),
        }
    }
}
