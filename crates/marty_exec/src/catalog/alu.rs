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

    catalog::alu.rs

    Arithmetic helpers shared by the instruction handlers. Flags are
    computed into a new EFLAGS value instead of being written to the
    register file, so a handler can commit them together with its result
    once the final bus transfer has been acknowledged.

*/

use crate::{
    cpu_common::OperandSize,
    registers::{FLAG_AUX_CARRY, FLAG_CARRY, FLAG_OVERFLOW, FLAG_PARITY, FLAG_SIGN, FLAG_ZERO},
};

// The parity flag is calculated from the lower 8 bits of an alu operation regardless
// of the operand width.
pub const PARITY_TABLE: [bool; 256] = {
    let mut table = [false; 256];
    let mut index = 0;
    loop {
        table[index] = index.count_ones() % 2 == 0;
        index += 1;

        if index == 256 {
            break;
        }
    }
    table
};

pub trait AluAdd<Rhs = Self>: Sized {
    fn alu_add(self, rhs: Rhs) -> (Self, bool, bool, bool);
}

macro_rules! impl_add {
    ($prim:ty) => {
        impl AluAdd for $prim {
            /// Addition
            ///
            /// Carry flag is set if Unsigned overflow occurred
            /// Overflow flag is set if Signed overflow occurred
            /// AF flag is set if carry out of the low nibble
            fn alu_add(self, rhs: Self) -> (Self, bool, bool, bool) {
                let (result, carry) = self.overflowing_add(rhs);
                let overflow = (self ^ result) & (rhs ^ result) & (1 << (<$prim>::BITS - 1)) != 0;
                let aux_carry = ((self ^ rhs ^ result) & 0x10) != 0;
                (result, carry, overflow, aux_carry)
            }
        }
    };
}

impl_add!(u16);
impl_add!(u32);

#[inline]
fn with_flag(eflags: u32, flag: u32, state: bool) -> u32 {
    if state {
        eflags | flag
    }
    else {
        eflags & !flag
    }
}

/// Apply sign, zero and parity for `result` at `size`.
pub fn szp_flags(eflags: u32, size: OperandSize, result: u32) -> u32 {
    let mut flags = with_flag(eflags, FLAG_SIGN, result & size.sign_bit() != 0);
    flags = with_flag(flags, FLAG_ZERO, result & size.mask() == 0);
    with_flag(flags, FLAG_PARITY, PARITY_TABLE[(result & 0xFF) as usize])
}

/// ADD at the given operand size. Returns the result and the updated flags.
pub fn add(eflags: u32, size: OperandSize, lhs: u32, rhs: u32) -> (u32, u32) {
    let (result, carry, overflow, aux_carry) = match size {
        OperandSize::Size16 => {
            let (r, c, o, a) = (lhs as u16).alu_add(rhs as u16);
            (r as u32, c, o, a)
        }
        OperandSize::Size32 => lhs.alu_add(rhs),
    };
    let mut flags = with_flag(eflags, FLAG_CARRY, carry);
    flags = with_flag(flags, FLAG_OVERFLOW, overflow);
    flags = with_flag(flags, FLAG_AUX_CARRY, aux_carry);
    (result, szp_flags(flags, size, result))
}

/// INC: ADD 1 with the carry flag preserved.
pub fn inc(eflags: u32, size: OperandSize, value: u32) -> (u32, u32) {
    let (result, flags) = add(eflags, size, value, 1);
    (result, with_flag(flags, FLAG_CARRY, eflags & FLAG_CARRY != 0))
}

/// Evaluate the condition encoded in the low nibble of a Jcc/SETcc/CMOVcc opcode.
pub fn condition(eflags: u32, cc: u8) -> bool {
    let cf = eflags & FLAG_CARRY != 0;
    let zf = eflags & FLAG_ZERO != 0;
    let sf = eflags & FLAG_SIGN != 0;
    let of = eflags & FLAG_OVERFLOW != 0;
    let pf = eflags & FLAG_PARITY != 0;

    let test = match (cc >> 1) & 0x07 {
        0 => of,
        1 => cf,
        2 => zf,
        3 => cf || zf,
        4 => sf,
        5 => pf,
        6 => sf != of,
        _ => zf || (sf != of),
    };
    // Odd condition codes are the negation of the even ones.
    test != (cc & 1 != 0)
}
