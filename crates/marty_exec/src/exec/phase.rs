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

    exec::phase.rs

    Execution phases. At most one phase is active on a core at a time; the
    engine invokes the active phase once per tick until it completes.

*/

use enum_dispatch::enum_dispatch;

use crate::exec::{
    context::InstructionContext,
    handler::{ExecEnv, StepResult},
    interrupt::InterruptPhase,
    resolver::{DispatchTable, HandlerId},
    task::TaskSwitchPhase,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PhaseKind {
    Normal,
    Interrupt,
    TaskSwitch,
}

/// Executes the handler resolved for the current opcode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NormalPhase {
    pub handler: HandlerId,
}

impl NormalPhase {
    pub fn new(handler: HandlerId) -> Self {
        Self { handler }
    }
}

impl PhaseStep for NormalPhase {
    #[inline]
    fn kind(&self) -> PhaseKind {
        PhaseKind::Normal
    }

    #[inline]
    fn step(&mut self, ic: &mut InstructionContext, env: &mut ExecEnv<'_>, dispatch: &DispatchTable) -> StepResult {
        dispatch.handler(self.handler).step(ic, env)
    }
}

#[enum_dispatch]
#[derive(Clone, Debug)]
pub enum ExecutionPhase {
    NormalPhase,
    InterruptPhase,
    TaskSwitchPhase,
}

#[enum_dispatch(ExecutionPhase)]
pub trait PhaseStep {
    fn kind(&self) -> PhaseKind;
    /// Invoke the phase once. Suspended means invoke again next tick.
    fn step(&mut self, ic: &mut InstructionContext, env: &mut ExecEnv<'_>, dispatch: &DispatchTable) -> StepResult;
}
