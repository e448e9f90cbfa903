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

    catalog::mod.rs

    The built-in instruction handler set, registered per generation. Each
    generation's module only registers what that generation introduces or
    changes; everything else is inherited through opcode resolution.

*/

use std::ops::RangeInclusive;

use crate::{
    cpu_common::{OperandSize, ProcessorGeneration},
    exec::{
        handler::{FnHandler, HandlerFn, InstructionHandler},
        resolver::{HandlerId, OpcodeCatalog},
        ExecEnv,
    },
    registers::Register16,
};

pub mod alu;
pub mod base_8086;
pub mod ext_186;
pub mod ext_386;
pub mod ext_486;
pub mod pentium;
pub mod prot_286;

pub const SIZE16: &[OperandSize] = &[OperandSize::Size16];
pub const SIZE32: &[OperandSize] = &[OperandSize::Size32];
pub const ALL_SIZES: &[OperandSize] = &[OperandSize::Size16, OperandSize::Size32];

/// Build a catalog containing every built-in handler.
pub fn build_catalog() -> OpcodeCatalog {
    let mut catalog = OpcodeCatalog::new();
    base_8086::register(&mut catalog);
    ext_186::register(&mut catalog);
    prot_286::register(&mut catalog);
    ext_386::register(&mut catalog);
    ext_486::register(&mut catalog);
    pentium::register(&mut catalog);
    log::debug!("Built opcode catalog with {} handlers", catalog.len());
    catalog
}

#[inline]
pub(crate) fn handler(mnemonic: &'static str, func: HandlerFn) -> Box<dyn InstructionHandler> {
    Box::new(FnHandler::new(mnemonic, func))
}

/// Register one handler for a run of opcodes, such as the +r register forms.
pub(crate) fn register_range(
    catalog: &mut OpcodeCatalog,
    extended: bool,
    generation: ProcessorGeneration,
    opcodes: RangeInclusive<u8>,
    sizes: &[OperandSize],
    mnemonic: &'static str,
    func: HandlerFn,
) -> HandlerId {
    let id = catalog.add_handler(handler(mnemonic, func));
    for opcode in opcodes {
        for size in sizes {
            catalog.bind(extended, generation, opcode, *size, id);
        }
    }
    id
}

/// Move SP by `delta` bytes. Only 16-bit stacks are modelled.
#[inline]
pub(crate) fn adjust_sp(env: &mut ExecEnv<'_>, delta: i32) {
    let sp = env.regs.sp().wrapping_add(delta as u16);
    env.regs.set16(Register16::SP, sp);
}

/// Sign-interpret a value at the operand size.
#[inline]
pub(crate) fn signed(size: OperandSize, value: u32) -> i32 {
    match size {
        OperandSize::Size16 => value as u16 as i16 as i32,
        OperandSize::Size32 => value as i32,
    }
}
