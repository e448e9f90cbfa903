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

    config.rs

    TOML configuration for an execution core.

    [core]
    generation = "80386"
    trace_mode = "instruction"
    trace_file = "trace.log"
    unhandled_raises_ud = false
    fault_restarts_instruction = false
    wait_states = 1

*/

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_derive::Deserialize;

use crate::{
    biu::WaitStateBus,
    cpu_common::{ProcessorGeneration, TraceMode},
    exec::ExecOptions,
    tracelogger::TraceLogger,
};

const fn _default_false() -> bool {
    false
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CoreConfig {
    pub generation: ProcessorGeneration,
    #[serde(default)]
    pub trace_mode: TraceMode,
    pub trace_file: Option<PathBuf>,
    #[serde(default = "_default_false")]
    pub unhandled_raises_ud: bool,
    /// 80286 and later always restart; this extends the behavior to the 8086 and V30.
    #[serde(default = "_default_false")]
    pub fault_restarts_instruction: bool,
    /// Wait states inserted by the reference bus on every transfer.
    #[serde(default)]
    pub wait_states: u32,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    core: CoreConfig,
}

impl CoreConfig {
    pub fn from_toml_str(toml_string: impl AsRef<str>) -> Result<CoreConfig> {
        let file: ConfigFile = toml::from_str(toml_string.as_ref())?;
        log::debug!("Read core config: {:?}", file.core);
        Ok(file.core)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<CoreConfig> {
        let path = path.as_ref();
        let toml_string = std::fs::read_to_string(path)
            .with_context(|| format!("Couldn't read core config {}", path.display()))?;
        CoreConfig::from_toml_str(toml_string).with_context(|| format!("Bad core config {}", path.display()))
    }

    pub fn options(&self) -> ExecOptions {
        ExecOptions {
            unhandled_raises_ud: self.unhandled_raises_ud,
            fault_restarts_instruction: self.fault_restarts_instruction,
        }
    }

    /// Open the configured trace destination. Tracing without a file goes to the console.
    pub fn trace_logger(&self) -> TraceLogger {
        match (self.trace_mode, &self.trace_file) {
            (TraceMode::None, _) => TraceLogger::None,
            (_, Some(path)) => TraceLogger::from_filename(path),
            (_, None) => TraceLogger::Console,
        }
    }

    /// A reference bus of `size` bytes using the configured wait states.
    pub fn reference_bus(&self, size: usize) -> WaitStateBus {
        WaitStateBus::new(size, self.generation).with_wait_states(self.wait_states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::from_toml_str("[core]\ngeneration = \"pentium2\"\n").unwrap();
        assert_eq!(config.generation, ProcessorGeneration::PentiumII);
        assert_eq!(config.trace_mode, TraceMode::None);
        assert_eq!(config.trace_file, None);
        assert_eq!(config.options(), ExecOptions::default());
        assert_eq!(config.wait_states, 0);
        assert!(!config.trace_logger().is_some());
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            [core]
            generation = "V30"
            trace_mode = "instruction"
            unhandled_raises_ud = true
            fault_restarts_instruction = true
            wait_states = 2
        "#;
        let config = CoreConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.generation, ProcessorGeneration::NecV30);
        assert_eq!(config.trace_mode, TraceMode::Instruction);
        assert!(config.options().unhandled_raises_ud);
        assert!(config.options().fault_restarts_instruction);
        assert!(matches!(config.trace_logger(), TraceLogger::Console));
        assert_eq!(config.reference_bus(0x100).transactions().len(), 0);
    }

    #[test]
    fn test_bad_generation() {
        assert!(CoreConfig::from_toml_str("[core]\ngeneration = \"z80\"\n").is_err());
        assert!(CoreConfig::from_toml_str("[core]\ntrace_mode = \"none\"\n").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = CoreConfig::load("/nonexistent/marty_exec.toml").unwrap_err();
        assert!(err.to_string().contains("Couldn't read core config"));
    }
}
