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

    exec::resolver.rs

    Opcode resolution. The catalog holds handlers only for the generation
    that introduced (or changed) them; resolving flattens that sparse
    catalog into a complete dispatch table for one emulated generation.

*/

use std::{fmt, sync::Arc};

use fxhash::FxHashMap;
use strum::EnumCount;

use crate::{
    cpu_common::{CpuException, OperandSize, ProcessorGeneration},
    exec::{
        context::InstructionContext,
        handler::{ExecEnv, FnHandler, InstructionHandler, StepOutcome, StepResult},
    },
};

/// Index of a handler in the catalog arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u16);

pub const UNHANDLED: HandlerId = HandlerId(0);
pub const UNKNOWN_0F: HandlerId = HandlerId(1);

const OPCODE_CT: usize = 256;
const SIZE_CT: usize = OperandSize::COUNT;
const TABLE_CT: usize = 2;
const CELL_CT: usize = OPCODE_CT * SIZE_CT * TABLE_CT;

type SparseKey = (ProcessorGeneration, u8, OperandSize);

pub struct OpcodeCatalog {
    handlers: Vec<Box<dyn InstructionHandler>>,
    base: FxHashMap<SparseKey, HandlerId>,
    extended: FxHashMap<SparseKey, HandlerId>,
}

impl OpcodeCatalog {
    /// An empty catalog containing only the two fallback stubs.
    pub fn new() -> Self {
        let mut catalog = Self {
            handlers: Vec::new(),
            base: FxHashMap::default(),
            extended: FxHashMap::default(),
        };
        catalog.add_handler(Box::new(FnHandler::new("(unhandled)", op_unhandled)));
        catalog.add_handler(Box::new(FnHandler::new("(unknown 0F)", op_unknown_0f)));
        catalog
    }

    /// Add a handler to the arena without binding it to any opcode.
    pub fn add_handler(&mut self, handler: Box<dyn InstructionHandler>) -> HandlerId {
        let id = HandlerId(self.handlers.len() as u16);
        self.handlers.push(handler);
        id
    }

    /// Bind a handler to a base-table opcode for each of `sizes` at `generation`.
    pub fn register(
        &mut self,
        generation: ProcessorGeneration,
        opcode: u8,
        sizes: &[OperandSize],
        handler: Box<dyn InstructionHandler>,
    ) -> HandlerId {
        let id = self.add_handler(handler);
        for size in sizes {
            self.bind(false, generation, opcode, *size, id);
        }
        id
    }

    /// Bind a handler to a 0F-table opcode for each of `sizes` at `generation`.
    pub fn register_0f(
        &mut self,
        generation: ProcessorGeneration,
        opcode: u8,
        sizes: &[OperandSize],
        handler: Box<dyn InstructionHandler>,
    ) -> HandlerId {
        let id = self.add_handler(handler);
        for size in sizes {
            self.bind(true, generation, opcode, *size, id);
        }
        id
    }

    /// Bind an existing handler to a cell.
    pub fn bind(&mut self, extended: bool, generation: ProcessorGeneration, opcode: u8, size: OperandSize, id: HandlerId) {
        if extended && !generation.has_0f_table() {
            log::warn!(
                "0F{:02X} registered for {}, which has no 0F table. It will never resolve.",
                opcode,
                generation
            );
        }
        let table = if extended { &mut self.extended } else { &mut self.base };
        if let Some(old) = table.insert((generation, opcode, size), id) {
            log::warn!(
                "Opcode {}{:02X} ({}, {}) rebound: {} -> {}",
                if extended { "0F" } else { "" },
                opcode,
                generation,
                size,
                self.handlers[old.0 as usize].mnemonic(),
                self.handlers[id.0 as usize].mnemonic()
            );
        }
    }

    /// The handler registered exactly at this cell, without any fallback.
    pub fn sparse(&self, extended: bool, generation: ProcessorGeneration, opcode: u8, size: OperandSize) -> Option<HandlerId> {
        let table = if extended { &self.extended } else { &self.base };
        table.get(&(generation, opcode, size)).copied()
    }

    #[inline]
    pub fn handler(&self, id: HandlerId) -> &dyn InstructionHandler {
        match self.handlers.get(id.0 as usize) {
            Some(handler) => handler.as_ref(),
            None => self.handlers[UNHANDLED.0 as usize].as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if nothing beyond the fallback stubs has been added.
    pub fn is_empty(&self) -> bool {
        self.handlers.len() <= 2
    }

    /// Search backwards from `emulated` to `floor` at `size`, then at each smaller size.
    fn search(
        &self,
        extended: bool,
        emulated: ProcessorGeneration,
        floor: ProcessorGeneration,
        opcode: u8,
        size: OperandSize,
    ) -> Option<HandlerId> {
        let mut search_size = Some(size);
        while let Some(size) = search_size {
            let mut generation = emulated;
            loop {
                if let Some(id) = self.sparse(extended, generation, opcode, size) {
                    return Some(id);
                }
                match generation.previous() {
                    Some(previous) if generation > floor => generation = previous,
                    _ => break,
                }
            }
            search_size = size.smaller();
        }
        None
    }
}

/// A complete dispatch table for one emulated generation. Immutable once built; cores share it
/// through an Arc and a rebuild produces a new table.
pub struct DispatchTable {
    generation: ProcessorGeneration,
    catalog: Arc<OpcodeCatalog>,
    cells: Box<[HandlerId]>,
}

impl DispatchTable {
    #[inline]
    fn cell_index(opcode: u8, size: OperandSize, extended: bool) -> usize {
        ((extended as usize * OPCODE_CT) + opcode as usize) * SIZE_CT + size.index()
    }

    /// Resolve every (opcode, size, table) cell for `generation`.
    pub fn resolve(catalog: &Arc<OpcodeCatalog>, generation: ProcessorGeneration) -> DispatchTable {
        let mut cells = vec![UNHANDLED; CELL_CT].into_boxed_slice();

        for extended in [false, true] {
            for opcode in 0..=255u8 {
                for size in [OperandSize::Size32, OperandSize::Size16] {
                    let id = if extended && !generation.has_0f_table() {
                        UNKNOWN_0F
                    }
                    else {
                        let floor = if extended {
                            ProcessorGeneration::FIRST_0F
                        }
                        else {
                            ProcessorGeneration::EARLIEST
                        };
                        catalog
                            .search(extended, generation, floor, opcode, size)
                            .unwrap_or(UNHANDLED)
                    };
                    cells[DispatchTable::cell_index(opcode, size, extended)] = id;
                }
            }
        }

        log::debug!(
            "Resolved dispatch table for {} ({} handlers in catalog)",
            generation,
            catalog.len()
        );

        DispatchTable {
            generation,
            catalog: catalog.clone(),
            cells,
        }
    }

    #[inline]
    pub fn generation(&self) -> ProcessorGeneration {
        self.generation
    }

    #[inline]
    pub fn catalog(&self) -> &Arc<OpcodeCatalog> {
        &self.catalog
    }

    #[inline]
    pub fn lookup(&self, opcode: u8, size: OperandSize, extended: bool) -> HandlerId {
        self.cells[DispatchTable::cell_index(opcode, size, extended)]
    }

    #[inline]
    pub fn handler(&self, id: HandlerId) -> &dyn InstructionHandler {
        self.catalog.handler(id)
    }

    pub fn mnemonic(&self, opcode: u8, size: OperandSize, extended: bool) -> &'static str {
        self.handler(self.lookup(opcode, size, extended)).mnemonic()
    }
}

impl PartialEq for DispatchTable {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && Arc::ptr_eq(&self.catalog, &other.catalog) && self.cells == other.cells
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("generation", &self.generation)
            .field("bound", &self.cells.iter().filter(|id| **id != UNHANDLED && **id != UNKNOWN_0F).count())
            .finish()
    }
}

fn unhandled_common(ic: &mut InstructionContext, env: &mut ExecEnv<'_>, what: &str) -> StepResult {
    log::warn!(
        "{} instruction: {}{:02X} ({}) at [{:04X}:{:04X}] on {}",
        what,
        if ic.extended() { "0F" } else { "" },
        ic.opcode(),
        ic.operand_size(),
        env.regs.sreg(crate::registers::SegmentRegister::CS),
        ic.i.ip,
        env.generation
    );
    if env.options.unhandled_raises_ud && env.generation > ProcessorGeneration::Intel8086 {
        return Err(CpuException::InvalidOpcode);
    }
    Ok(StepOutcome::Completed)
}

fn op_unhandled(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    unhandled_common(ic, env, "Unhandled")
}

fn op_unknown_0f(ic: &mut InstructionContext, env: &mut ExecEnv<'_>) -> StepResult {
    unhandled_common(ic, env, "Unknown 0F")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_common::OperandSize::{Size16, Size32};
    use strum::IntoEnumIterator;

    fn nop(_ic: &mut InstructionContext, _env: &mut ExecEnv<'_>) -> StepResult {
        Ok(StepOutcome::Completed)
    }

    fn h(name: &'static str) -> Box<dyn InstructionHandler> {
        Box::new(FnHandler::new(name, nop))
    }

    fn test_catalog() -> Arc<OpcodeCatalog> {
        let mut catalog = OpcodeCatalog::new();
        catalog.register(ProcessorGeneration::Intel8086, 0x05, &[Size16], h("add16"));
        catalog.register(ProcessorGeneration::Intel80386, 0x05, &[Size32], h("add32"));
        catalog.register(ProcessorGeneration::Intel8086, 0x40, &[Size16], h("inc16"));
        catalog.register(ProcessorGeneration::NecV30, 0x60, &[Size16], h("pusha"));
        catalog.register(ProcessorGeneration::Intel80286, 0xEA, &[Size16], h("jmpf286"));
        catalog.register(ProcessorGeneration::Intel8086, 0xEA, &[Size16], h("jmpf"));
        catalog.register_0f(ProcessorGeneration::Intel80286, 0x06, &[Size16], h("clts"));
        catalog.register_0f(ProcessorGeneration::Intel80486, 0xC8, &[Size32], h("bswap"));
        Arc::new(catalog)
    }

    #[test]
    fn test_direct_binding() {
        let catalog = test_catalog();
        let table = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel80386);
        assert_eq!(table.mnemonic(0x05, Size32, false), "add32");
        assert_eq!(table.mnemonic(0x05, Size16, false), "add16");
    }

    #[test]
    fn test_generation_fallback() {
        let catalog = test_catalog();
        let table = DispatchTable::resolve(&catalog, ProcessorGeneration::Pentium);
        assert_eq!(table.mnemonic(0x40, Size16, false), "inc16");
        assert_eq!(table.mnemonic(0xEA, Size16, false), "jmpf286");

        let table = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel8086);
        assert_eq!(table.mnemonic(0xEA, Size16, false), "jmpf");
    }

    #[test]
    fn test_never_binds_later_generation() {
        let catalog = test_catalog();
        let table = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel8086);
        assert_eq!(table.lookup(0x60, Size16, false), UNHANDLED);
        // No 32-bit ADD before the 386: Size32 falls back to the 16-bit handler.
        let table = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel80286);
        assert_eq!(table.mnemonic(0x05, Size32, false), "add16");
    }

    #[test]
    fn test_size16_does_not_search_size32() {
        let catalog = test_catalog();
        let table = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel80486);
        assert_eq!(table.mnemonic(0xC8, Size32, true), "bswap");
        assert_eq!(table.lookup(0xC8, Size16, true), UNHANDLED);
    }

    #[test]
    fn test_0f_before_286() {
        let catalog = test_catalog();
        for generation in [ProcessorGeneration::Intel8086, ProcessorGeneration::NecV30] {
            let table = DispatchTable::resolve(&catalog, generation);
            for opcode in 0..=255u8 {
                assert_eq!(table.lookup(opcode, Size16, true), UNKNOWN_0F);
                assert_eq!(table.lookup(opcode, Size32, true), UNKNOWN_0F);
            }
        }
        let table = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel80286);
        assert_eq!(table.mnemonic(0x06, Size16, true), "clts");
        assert_eq!(table.lookup(0x07, Size16, true), UNHANDLED);
    }

    #[test]
    fn test_fallback_matches_greatest_earlier_registration() {
        let catalog = test_catalog();
        for generation in ProcessorGeneration::iter() {
            let table = DispatchTable::resolve(&catalog, generation);
            for opcode in 0..=255u8 {
                for size in [Size32, Size16] {
                    let mut expected = None;
                    'sizes: for s in [size, Size16].into_iter().filter(|s| *s <= size) {
                        for g in ProcessorGeneration::iter().rev().filter(|g| *g <= generation) {
                            if let Some(id) = catalog.sparse(false, g, opcode, s) {
                                expected = Some(id);
                                break 'sizes;
                            }
                        }
                    }
                    assert_eq!(table.lookup(opcode, size, false), expected.unwrap_or(UNHANDLED));
                }
            }
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let catalog = test_catalog();
        let direct = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel80386);
        let _ = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel80486);
        let _ = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel8086);
        let again = DispatchTable::resolve(&catalog, ProcessorGeneration::Intel80386);
        assert_eq!(direct, again);
    }
}
