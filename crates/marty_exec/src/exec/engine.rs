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

    exec::engine.rs

    The execution phase engine. An ExecCore owns one virtual CPU core: its
    register file, instruction context and BIU port, plus the shared
    dispatch table for the emulated generation. The external scheduler
    starts phases and calls tick(); the core invokes the active phase once
    per tick until it completes.

    Phase transitions:

        Idle -> Normal       start_normal()
        Idle -> Interrupt    start_interrupt(), or a fault / INT from Normal
        Idle -> TaskSwitch   start_task_switch(), a far transfer to a TSS, or an
                             interrupt whose gate is a task gate
        * -> Idle            the active phase completes

    A fault while delivering an interrupt escalates to a double fault on
    the 80286 and later. A fault while delivering a double fault, or any
    fault during delivery on the 8086 and V30, shuts the core down.

*/

use std::sync::Arc;

use crate::{
    biu::BusPort,
    cpu_common::{CpuError, CpuException, ProcessorGeneration, TraceMode},
    exec::{
        context::{DecodedInstruction, InstructionContext},
        handler::{ExecEnv, ExecOptions, InterruptKind, InterruptRequest, StepOutcome, TaskSwitchRequest},
        interrupt::InterruptPhase,
        phase::{ExecutionPhase, NormalPhase, PhaseKind, PhaseStep},
        resolver::{DispatchTable, OpcodeCatalog},
        task::TaskSwitchPhase,
    },
    registers::{RegisterFile, SegmentRegister},
    segmentation::{RealModeSegmentation, Segmentation},
    tracelogger::TraceLogger,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Calls to tick(), busy or not.
    pub ticks: u64,
    /// Phase invocations, including the one performed when a phase starts.
    pub invocations: u64,
    /// Invocations that ended suspended on the BIU.
    pub stalls: u64,
    pub instructions: u64,
    pub interrupts: u64,
    pub task_switches: u64,
    pub faults: u64,
}

pub struct ExecCore<B: BusPort> {
    generation: ProcessorGeneration,
    dispatch: Arc<DispatchTable>,
    bus: B,
    regs: RegisterFile,
    ic: InstructionContext,
    phase: Option<ExecutionPhase>,
    segmentation: Box<dyn Segmentation>,
    options: ExecOptions,
    trace_mode: TraceMode,
    trace_logger: TraceLogger,
    stats: ExecStats,
    shutdown: bool,
}

impl<B: BusPort> ExecCore<B> {
    /// Create an idle core emulating the generation `dispatch` was resolved for.
    pub fn new(dispatch: Arc<DispatchTable>, bus: B) -> Self {
        Self {
            generation: dispatch.generation(),
            dispatch,
            bus,
            regs: RegisterFile::new(),
            ic: InstructionContext::new(),
            phase: None,
            segmentation: Box::new(RealModeSegmentation),
            options: ExecOptions::default(),
            trace_mode: TraceMode::None,
            trace_logger: TraceLogger::None,
            stats: ExecStats::default(),
            shutdown: false,
        }
    }

    pub fn set_segmentation(&mut self, segmentation: Box<dyn Segmentation>) {
        self.segmentation = segmentation;
    }

    pub fn set_options(&mut self, options: ExecOptions) {
        self.options = options;
    }

    pub fn set_trace(&mut self, trace_mode: TraceMode, trace_logger: TraceLogger) {
        self.trace_mode = trace_mode;
        self.trace_logger = trace_logger;
    }

    pub fn options(&self) -> ExecOptions {
        self.options
    }

    pub fn generation(&self) -> ProcessorGeneration {
        self.generation
    }

    pub fn dispatch(&self) -> &Arc<DispatchTable> {
        &self.dispatch
    }

    pub fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn context(&self) -> &InstructionContext {
        &self.ic
    }

    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    /// True whenever a phase is active. A new opcode may only be fetched while this is false.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.phase.is_some()
    }

    pub fn active_phase(&self) -> Option<PhaseKind> {
        self.phase.as_ref().map(|p| p.kind())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Return the core to power-on state. The dispatch table, BIU and options are kept.
    pub fn reset(&mut self) {
        if self.phase.is_some() {
            self.bus.terminate_access();
        }
        self.phase = None;
        self.regs = RegisterFile::new();
        self.ic = InstructionContext::new();
        self.stats = ExecStats::default();
        self.shutdown = false;
    }

    /// Swap in a dispatch table resolved elsewhere. The core takes on the table's generation.
    pub fn install_dispatch(&mut self, dispatch: Arc<DispatchTable>) -> Result<(), CpuError> {
        if self.phase.is_some() {
            log::error!("install_dispatch(): a phase is active");
            return Err(CpuError::DispatchBusy);
        }
        log::debug!(
            "Installing dispatch table for {} (was {})",
            dispatch.generation(),
            self.generation
        );
        self.generation = dispatch.generation();
        self.dispatch = dispatch;
        Ok(())
    }

    /// Resolve `catalog` for `generation` and install the result.
    pub fn set_generation(
        &mut self,
        generation: ProcessorGeneration,
        catalog: &Arc<OpcodeCatalog>,
    ) -> Result<(), CpuError> {
        if self.phase.is_some() {
            log::error!("set_generation(): a phase is active");
            return Err(CpuError::DispatchBusy);
        }
        self.install_dispatch(Arc::new(DispatchTable::resolve(catalog, generation)))
    }

    /// Arm a Normal phase for a decoded instruction. The first invocation happens on the next
    /// tick(). EIP is advanced past the instruction before any step runs.
    pub fn start_normal(&mut self, instruction: DecodedInstruction) -> Result<(), CpuError> {
        self.check_idle()?;
        let handler = self
            .dispatch
            .lookup(instruction.opcode, instruction.operand_size, instruction.extended);

        self.ic.begin_instruction(instruction);
        self.regs.eip = instruction.next_ip();
        self.phase = Some(NormalPhase::new(handler).into());
        Ok(())
    }

    /// Start delivering an interrupt. The phase is invoked once before returning.
    pub fn start_interrupt(&mut self, request: InterruptRequest) -> Result<(), CpuError> {
        self.check_idle()?;
        self.enter_interrupt(request);
        Ok(())
    }

    /// Start a task switch. The phase is invoked once before returning.
    pub fn start_task_switch(&mut self, request: TaskSwitchRequest) -> Result<(), CpuError> {
        self.check_idle()?;
        self.enter_task_switch(request);
        Ok(())
    }

    pub fn tick(&mut self) {
        self.stats.ticks += 1;
        if self.shutdown {
            return;
        }
        self.invoke();
    }

    fn check_idle(&self) -> Result<(), CpuError> {
        if self.shutdown {
            return Err(CpuError::Shutdown);
        }
        if let Some(phase) = &self.phase {
            let active = phase.kind();
            log::error!("Attempted to start a phase while {:?} is active", active);
            return Err(CpuError::PhaseBusy { active });
        }
        Ok(())
    }

    fn enter_interrupt(&mut self, request: InterruptRequest) {
        self.ic.begin_interrupt();
        self.stats.interrupts += 1;
        self.phase = Some(InterruptPhase::new(request).into());
        self.invoke();
    }

    fn enter_task_switch(&mut self, request: TaskSwitchRequest) {
        self.ic.executed = false;
        self.stats.task_switches += 1;
        self.phase = Some(TaskSwitchPhase::new(request).into());
        self.invoke();
    }

    /// Invoke the active phase once and act on the outcome.
    fn invoke(&mut self) {
        let Some(mut phase) = self.phase.take() else {
            return;
        };
        self.stats.invocations += 1;

        let result = {
            let mut env = ExecEnv {
                regs: &mut self.regs,
                bus: &mut self.bus,
                segmentation: self.segmentation.as_ref(),
                generation: self.generation,
                options: self.options,
                tsc: self.stats.ticks,
            };
            phase.step(&mut self.ic, &mut env, &self.dispatch)
        };

        match result {
            Ok(StepOutcome::Suspended) => {
                self.ic.executed = false;
                self.stats.stalls += 1;
                log::trace!("{:?} phase suspended on BIU", phase.kind());
                self.phase = Some(phase);
            }
            Ok(StepOutcome::Completed) => {
                self.finish(&phase);
            }
            Ok(StepOutcome::Interrupt(request)) => {
                self.finish(&phase);
                self.enter_interrupt(request);
            }
            Ok(StepOutcome::TaskSwitch(request)) => {
                self.finish(&phase);
                self.enter_task_switch(request);
            }
            Err(exception) => {
                self.raise(&phase, exception);
            }
        }
    }

    fn finish(&mut self, phase: &ExecutionPhase) {
        self.ic.executed = true;
        self.bus.terminate_access();
        if matches!(phase, ExecutionPhase::NormalPhase(_)) {
            self.stats.instructions += 1;
        }
        log::trace!("{:?} phase complete", phase.kind());

        if self.trace_mode == TraceMode::Instruction && self.trace_logger.is_some() {
            let line = self.trace_line(phase);
            self.trace_logger.println(line);
        }
    }

    fn trace_line(&self, phase: &ExecutionPhase) -> String {
        let cs = self.regs.sreg(SegmentRegister::CS);
        match phase {
            ExecutionPhase::NormalPhase(normal) => format!(
                "{:04X}:{:08X} {:<8} -> {:08X}",
                cs,
                self.ic.i.ip,
                self.dispatch.handler(normal.handler).mnemonic(),
                self.regs.eip
            ),
            ExecutionPhase::InterruptPhase(int) => format!(
                "{:04X}:{:08X} INT {:02X} ({:?})",
                cs, self.regs.eip, int.request.vector, int.request.kind
            ),
            ExecutionPhase::TaskSwitchPhase(ts) => format!(
                "{:04X}:{:08X} TASK {:04X} ({:?})",
                cs, self.regs.eip, ts.request.selector, ts.request.source
            ),
        }
    }

    /// Redirect the core after a fault in `phase`.
    fn raise(&mut self, phase: &ExecutionPhase, exception: CpuException) {
        self.stats.faults += 1;
        self.bus.terminate_access();

        match phase {
            ExecutionPhase::InterruptPhase(int) => {
                let delivering_df =
                    int.request.kind == InterruptKind::Exception && int.request.vector == CpuException::DoubleFault.vector();

                if delivering_df || !self.generation.restarts_faulting_instruction() {
                    log::error!(
                        "{} while delivering INT {:02X}: CPU shutdown",
                        exception,
                        int.request.vector
                    );
                    self.shutdown = true;
                    return;
                }
                log::debug!(
                    "{} while delivering INT {:02X}: raising double fault",
                    exception,
                    int.request.vector
                );
                self.enter_interrupt(CpuException::DoubleFault.into());
            }
            ExecutionPhase::NormalPhase(_) => {
                if self.generation.restarts_faulting_instruction() || self.options.fault_restarts_instruction {
                    self.regs.eip = self.ic.i.ip;
                }
                log::debug!("{} in opcode {:02X}, IP {:08X}", exception, self.ic.i.opcode, self.regs.eip);
                self.enter_interrupt(exception.into());
            }
            ExecutionPhase::TaskSwitchPhase(ts) => {
                log::debug!("{} during task switch to {:04X}", exception, ts.request.selector);
                self.enter_interrupt(exception.into());
            }
        }
    }
}

impl<B: BusPort> Drop for ExecCore<B> {
    fn drop(&mut self) {
        self.trace_logger.flush();
    }
}
