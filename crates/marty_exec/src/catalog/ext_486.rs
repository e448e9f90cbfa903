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

    catalog::ext_486.rs

    80486 additions.

*/

use crate::{
    catalog::{register_range, SIZE32},
    cpu_common::ProcessorGeneration,
    exec::{
        context::InstructionContext,
        handler::{ExecEnv, StepOutcome, StepResult},
        resolver::OpcodeCatalog,
    },
};

pub fn register(catalog: &mut OpcodeCatalog) {
    // BSWAP with a 16-bit operand is undefined; leave that cell unhandled.
    register_range(
        catalog,
        true,
        ProcessorGeneration::Intel80486,
        0xC8..=0xCF,
        SIZE32,
        "BSWAP",
        op_bswap,
    );
}

/// 0F C8+r: BSWAP r32
fn op_bswap(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let reg = ic.opcode() & 0x07;
    let size = ic.operand_size();
    let value = env.regs.get_reg(reg, size);
    env.regs.set_reg(reg, size, value.swap_bytes());
    Ok(StepOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::harness,
        cpu_common::OperandSize,
        exec::DecodedInstruction,
        registers::Register16,
    };

    #[test]
    fn test_bswap() {
        let mut core = harness::core(ProcessorGeneration::Intel80486);
        core.regs_mut().set32(Register16::SI, 0x1122_3344);
        harness::run(&mut core, DecodedInstruction::new_0f(0xCE, OperandSize::Size32));
        assert_eq!(core.regs().get32(Register16::SI), 0x4433_2211);
    }

    #[test]
    fn test_bswap_missing_on_386() {
        let core = harness::core(ProcessorGeneration::Intel80386);
        assert_eq!(core.dispatch().mnemonic(0xC8, OperandSize::Size32, true), "(unhandled)");
        let core = harness::core(ProcessorGeneration::Pentium);
        assert_eq!(core.dispatch().mnemonic(0xC8, OperandSize::Size32, true), "BSWAP");
    }
}
