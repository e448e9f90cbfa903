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

    catalog::pentium.rs

    Pentium and P6 additions: CPUID, RDTSC and the CMOVcc family.
    The Pentium II inherits everything here and reports its own CPUID
    signature.

*/

use crate::{
    catalog::{alu, handler, ALL_SIZES},
    cpu_common::ProcessorGeneration,
    exec::{
        context::InstructionContext,
        handler::{ExecEnv, StepOutcome, StepResult},
        resolver::OpcodeCatalog,
    },
    registers::Register16,
    step_ready,
};

/// "GenuineIntel", split across EBX, EDX, ECX.
const VENDOR_EBX: u32 = u32::from_le_bytes(*b"Genu");
const VENDOR_EDX: u32 = u32::from_le_bytes(*b"ineI");
const VENDOR_ECX: u32 = u32::from_le_bytes(*b"ntel");

const CMOV_MNEMONICS: [&str; 16] = [
    "CMOVO", "CMOVNO", "CMOVB", "CMOVAE", "CMOVE", "CMOVNE", "CMOVBE", "CMOVA", "CMOVS", "CMOVNS", "CMOVP",
    "CMOVNP", "CMOVL", "CMOVGE", "CMOVLE", "CMOVG",
];

pub fn register(catalog: &mut OpcodeCatalog) {
    catalog.register_0f(ProcessorGeneration::Pentium, 0xA2, ALL_SIZES, handler("CPUID", op_cpuid));
    catalog.register_0f(ProcessorGeneration::Pentium, 0x31, ALL_SIZES, handler("RDTSC", op_rdtsc));

    for (cc, mnemonic) in CMOV_MNEMONICS.into_iter().enumerate() {
        catalog.register_0f(
            ProcessorGeneration::PentiumPro,
            0x40 + cc as u8,
            ALL_SIZES,
            handler(mnemonic, op_cmovcc),
        );
    }
}

/// Family/model/stepping and EDX feature flags reported by CPUID leaf 1.
fn cpuid_signature(generation: ProcessorGeneration) -> (u32, u32) {
    match generation {
        ProcessorGeneration::PentiumPro => (0x0617, 0x0000_F3FF),
        ProcessorGeneration::PentiumII => (0x0634, 0x0080_FBFF),
        _ => (0x0513, 0x0000_01BF),
    }
}

/// 0F A2: CPUID
fn op_cpuid(_ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let leaf = env.regs.get32(Register16::AX);
    let (eax, ebx, ecx, edx) = match leaf {
        0 => (1, VENDOR_EBX, VENDOR_ECX, VENDOR_EDX),
        1 => {
            let (signature, features) = cpuid_signature(env.generation);
            (signature, 0, 0, features)
        }
        _ => {
            log::trace!("CPUID leaf {:08X} is not reported", leaf);
            (0, 0, 0, 0)
        }
    };
    env.regs.set32(Register16::AX, eax);
    env.regs.set32(Register16::BX, ebx);
    env.regs.set32(Register16::CX, ecx);
    env.regs.set32(Register16::DX, edx);
    Ok(StepOutcome::Completed)
}

/// 0F 31: RDTSC
fn op_rdtsc(_ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    env.regs.set32(Register16::AX, env.tsc as u32);
    env.regs.set32(Register16::DX, (env.tsc >> 32) as u32);
    Ok(StepOutcome::Completed)
}

/// 0F 40+cc: CMOVcc r, r/m. The source is read whether or not the move happens.
fn op_cmovcc(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    let value = step_ready!(ic.read_rm(env, 0)?);
    if alu::condition(env.regs.eflags, ic.opcode() & 0x0F) {
        env.regs.set_reg(ic.modrm_reg()?, ic.operand_size(), value);
    }
    Ok(StepOutcome::Completed)
}
