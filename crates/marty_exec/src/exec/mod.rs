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

    exec::mod.rs

    The resumable execution core: opcode resolution, the step protocol
    handlers run under, and the phase engine that drives them.

*/

pub mod context;
pub mod engine;
pub mod handler;
pub mod interrupt;
pub mod phase;
pub mod resolver;
pub mod task;

pub use context::{DecodedInstruction, InstructionContext, ModRm, RmOperand, StepTrack};
pub use engine::{ExecCore, ExecStats};
pub use handler::{
    ExecEnv,
    ExecOptions,
    FnHandler,
    InstructionHandler,
    InterruptKind,
    InterruptRequest,
    StepOutcome,
    StepResult,
    TaskSwitchRequest,
    TaskSwitchSource,
};
pub use phase::{ExecutionPhase, PhaseKind, PhaseStep};
pub use resolver::{DispatchTable, HandlerId, OpcodeCatalog, UNHANDLED, UNKNOWN_0F};
