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

    cpu_common::builder.rs

    Assembles an ExecCore from explicit settings or a CoreConfig.

*/
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::{
    biu::BusPort,
    catalog::build_catalog,
    config::CoreConfig,
    cpu_common::{CpuError, ProcessorGeneration, TraceMode},
    exec::{DispatchTable, ExecCore, ExecOptions, OpcodeCatalog},
    segmentation::Segmentation,
    tracelogger::TraceLogger,
};

#[derive(Default)]
pub struct ExecCoreBuilder {
    generation: Option<ProcessorGeneration>,
    catalog: Option<Arc<OpcodeCatalog>>,
    dispatch: Option<Arc<DispatchTable>>,
    segmentation: Option<Box<dyn Segmentation>>,
    options: ExecOptions,
    trace_mode: TraceMode,
    trace_logger: Option<TraceLogger>,
}

impl ExecCoreBuilder {
    pub fn new() -> ExecCoreBuilder {
        ExecCoreBuilder { ..Default::default() }
    }

    pub fn build<B: BusPort>(&mut self, bus: B) -> Result<ExecCore<B>> {
        let Some(generation) = self.generation else {
            bail!("Processor generation is required.");
        };

        let dispatch = match self.dispatch.take() {
            Some(dispatch) if dispatch.generation() != generation => {
                return Err(CpuError::GenerationMismatch {
                    table: dispatch.generation(),
                    core:  generation,
                }
                .into());
            }
            Some(dispatch) => dispatch,
            None => {
                let catalog = self.catalog.take().unwrap_or_else(|| Arc::new(build_catalog()));
                Arc::new(DispatchTable::resolve(&catalog, generation))
            }
        };

        let mut core = ExecCore::new(dispatch, bus);
        if let Some(segmentation) = self.segmentation.take() {
            core.set_segmentation(segmentation);
        }
        core.set_options(self.options);
        core.set_trace(self.trace_mode, self.trace_logger.take().unwrap_or_default());
        log::debug!("Built execution core for {}", generation);
        Ok(core)
    }

    /// Take generation, options and tracing from a config.
    pub fn with_config(mut self, config: &CoreConfig) -> Self {
        self.generation = Some(config.generation);
        self.options = config.options();
        self.trace_mode = config.trace_mode;
        self.trace_logger = Some(config.trace_logger());
        self
    }

    pub fn with_generation(mut self, generation: ProcessorGeneration) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Resolve from this catalog instead of the built-in one.
    pub fn with_catalog(mut self, catalog: Arc<OpcodeCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Share an already resolved table. It must match the builder's generation.
    pub fn with_dispatch(mut self, dispatch: Arc<DispatchTable>) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn with_segmentation(mut self, segmentation: Box<dyn Segmentation>) -> Self {
        self.segmentation = Some(segmentation);
        self
    }

    pub fn with_options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_trace_mode(mut self, trace_mode: TraceMode) -> Self {
        self.trace_mode = trace_mode;
        self
    }

    pub fn with_trace_logger(mut self, trace_logger: TraceLogger) -> Self {
        self.trace_logger = Some(trace_logger);
        self
    }
}
