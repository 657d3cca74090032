// crates/core/src/loader/pipeline.rs

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::runtime::Handle;
use wasmtime::{Config, Engine, Instance, Linker, Module, Store};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1;
use wasmtime_wasi::WasiCtxBuilder;

use crate::config::RuntimeConfig;
use crate::environment::Environment;
use crate::error::{LoadStage, ShimError, ShimResult};
use crate::loader::descriptor::{self, AgentModuleDescriptor};
use crate::loader::host_functions::{self, AgentState};
use crate::loader::translate::{self, SourceDialect};

/// Exports tried, in order, as the agent's entry point.
const ENTRY_EXPORTS: [&str; 2] = ["default", "_start"];

const STDOUT_CAPACITY: usize = 1024 * 1024;
const STDERR_CAPACITY: usize = 64 * 1024;

/// Outcome of one agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentRunReport {
    pub entry: PathBuf,
    /// False when the entry module exports no entry function.
    pub invoked: bool,
    pub stdout: String,
    pub stderr: String,
    /// Capability calls that failed inside the agent (reported to the
    /// guest as `ERR_CAPABILITY`).
    pub capability_errors: Vec<String>,
}

/// Translate, persist, load and invoke an agent.
///
/// Contract:
/// - the entry module is the source file named `agent`
/// - sibling modules are importable under their file stem
/// - the entry's `default` export (or `_start`) is called with no arguments
#[derive(Debug, Clone)]
pub struct AgentPipeline {
    scratch_dir: PathBuf,
    max_fuel: Option<u64>,
}

impl AgentPipeline {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            max_fuel: None,
        }
    }

    /// Bound guest execution; exhausting the fuel fails the run.
    pub fn with_fuel(mut self, max_fuel: u64) -> Self {
        self.max_fuel = Some(max_fuel);
        self
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        let pipeline = Self::new(config.scratch_dir());
        match config.max_fuel {
            Some(fuel) => pipeline.with_fuel(fuel),
            None => pipeline,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Descriptors whose artifacts go straight into the scratch dir. Callers
    /// driving the stages themselves own that directory for the run.
    pub fn discover(&self, entry_path: &Path) -> ShimResult<Vec<AgentModuleDescriptor>> {
        descriptor::discover(entry_path, &self.scratch_dir)
    }

    /// Write each module's native form to its `compiled_path`.
    pub fn prepare(&self, modules: &[AgentModuleDescriptor]) -> ShimResult<()> {
        for module in modules {
            if let Some(dir) = module.compiled_path.parent() {
                fs::create_dir_all(dir)
                    .map_err(|e| ShimError::agent_load(dir, LoadStage::Persist, e))?;
            }
            let bytes = native_bytes(module)?;
            fs::write(&module.compiled_path, &bytes).map_err(|e| {
                ShimError::agent_load(&module.source_path, LoadStage::Persist, e)
            })?;
            tracing::debug!(
                source = %module.source_path.display(),
                compiled = %module.compiled_path.display(),
                bytes = bytes.len(),
                "agent module prepared"
            );
        }
        Ok(())
    }

    /// Load prepared modules and invoke the entry.
    ///
    /// The guest runs on a blocking thread; capability calls made by the
    /// guest are driven on the current tokio runtime.
    pub async fn run(
        &self,
        modules: Vec<AgentModuleDescriptor>,
        env: Environment,
    ) -> ShimResult<AgentRunReport> {
        let entry = entry_of(&modules)?.source_path.clone();
        let runtime = Handle::current();
        let max_fuel = self.max_fuel;

        tokio::task::spawn_blocking(move || execute(&modules, env, runtime, max_fuel))
            .await
            .map_err(|e| ShimError::agent_load(entry, LoadStage::Invoke, e))?
    }

    /// Discover, prepare and run in one step.
    ///
    /// Artifacts go to a fresh `run-*` directory under the scratch dir,
    /// removed when the run ends, so concurrent runs sharing a scratch dir
    /// never load each other's modules.
    pub async fn prepare_and_run(
        &self,
        entry_path: &Path,
        env: Environment,
    ) -> ShimResult<AgentRunReport> {
        let run_dir = self.run_dir(entry_path)?;
        let modules = descriptor::discover(entry_path, run_dir.path())?;
        self.prepare(&modules)?;
        let report = self.run(modules, env).await;

        let path = run_dir.path().to_path_buf();
        if let Err(error) = run_dir.close() {
            tracing::warn!(dir = %path.display(), %error, "failed to remove run directory");
        }
        report
    }

    fn run_dir(&self, entry_path: &Path) -> ShimResult<TempDir> {
        fs::create_dir_all(&self.scratch_dir).map_err(|e| {
            ShimError::agent_load(&self.scratch_dir, LoadStage::Persist, e)
        })?;
        tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| ShimError::agent_load(entry_path, LoadStage::Persist, e))
    }
}

fn entry_of(modules: &[AgentModuleDescriptor]) -> ShimResult<&AgentModuleDescriptor> {
    modules.iter().find(|m| m.is_entry).ok_or_else(|| {
        let file = modules
            .first()
            .map(|m| m.source_path.clone())
            .unwrap_or_default();
        ShimError::agent_load(file, LoadStage::Source, "no entry module")
    })
}

fn native_bytes(module: &AgentModuleDescriptor) -> ShimResult<Vec<u8>> {
    let path = &module.source_path;
    match module.dialect() {
        Some(SourceDialect::Text) => {
            let source = fs::read_to_string(path)
                .map_err(|e| ShimError::agent_load(path, LoadStage::Source, e))?;
            translate::translate(&source)
                .map_err(|e| ShimError::agent_load(path, LoadStage::Translate, e))
        }
        Some(SourceDialect::Binary) => {
            let bytes =
                fs::read(path).map_err(|e| ShimError::agent_load(path, LoadStage::Source, e))?;
            if !translate::is_native(&bytes) {
                return Err(ShimError::agent_load(
                    path,
                    LoadStage::Translate,
                    "not a WebAssembly binary",
                ));
            }
            Ok(bytes)
        }
        None => Err(ShimError::agent_load(
            path,
            LoadStage::Source,
            "unsupported agent source extension",
        )),
    }
}

fn execute(
    modules: &[AgentModuleDescriptor],
    env: Environment,
    runtime: Handle,
    max_fuel: Option<u64>,
) -> ShimResult<AgentRunReport> {
    let entry = entry_of(modules)?;
    let load_error = |module: &AgentModuleDescriptor, e: anyhow::Error| {
        ShimError::agent_load(&module.source_path, LoadStage::Load, format!("{e:#}"))
    };

    let mut config = Config::new();
    config.consume_fuel(max_fuel.is_some());
    let engine = Engine::new(&config).map_err(|e| load_error(entry, e))?;

    let stdout_pipe = MemoryOutputPipe::new(STDOUT_CAPACITY);
    let stderr_pipe = MemoryOutputPipe::new(STDERR_CAPACITY);
    let wasi_ctx = WasiCtxBuilder::new()
        .stdin(MemoryInputPipe::new(bytes::Bytes::new()))
        .stdout(stdout_pipe.clone())
        .stderr(stderr_pipe.clone())
        .build_p1();

    let mut store = Store::new(&engine, AgentState::new(wasi_ctx, env, runtime));
    if let Some(fuel) = max_fuel {
        store.set_fuel(fuel).map_err(|e| load_error(entry, e))?;
    }

    let mut linker: Linker<AgentState> = Linker::new(&engine);
    preview1::add_to_linker_sync(&mut linker, |state: &mut AgentState| &mut state.wasi)
        .map_err(|e| load_error(entry, e))?;
    host_functions::add_host_functions(&mut linker).map_err(|e| load_error(entry, e))?;

    // Dependencies are registered under their module name before the
    // entry is instantiated, so its imports resolve against them.
    for module in modules.iter().filter(|m| !m.is_entry) {
        let compiled =
            Module::from_file(&engine, &module.compiled_path).map_err(|e| load_error(module, e))?;
        let instance = linker
            .instantiate(&mut store, &compiled)
            .map_err(|e| load_error(module, e))?;
        linker
            .instance(&mut store, &module.module_name(), instance)
            .map_err(|e| load_error(module, e))?;
    }

    let compiled =
        Module::from_file(&engine, &entry.compiled_path).map_err(|e| load_error(entry, e))?;
    let instance = linker
        .instantiate(&mut store, &compiled)
        .map_err(|e| load_error(entry, e))?;

    let outcome = invoke_entry(&mut store, &instance, entry);

    let capability_errors = store.into_data().into_capability_errors();
    let stdout_bytes = stdout_pipe.try_into_inner().unwrap_or_default();
    let stderr_bytes = stderr_pipe.try_into_inner().unwrap_or_default();
    let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

    let invoked = outcome.map_err(|message| {
        let message = if stderr.trim().is_empty() {
            message
        } else {
            format!("{message}: {}", stderr.trim())
        };
        ShimError::agent_load(&entry.source_path, LoadStage::Invoke, message)
    })?;

    Ok(AgentRunReport {
        entry: entry.source_path.clone(),
        invoked,
        stdout,
        stderr,
        capability_errors,
    })
}

/// Call the entry export. `Ok(false)` when there is nothing to call.
fn invoke_entry(
    store: &mut Store<AgentState>,
    instance: &Instance,
    entry: &AgentModuleDescriptor,
) -> Result<bool, String> {
    let Some((name, func)) = ENTRY_EXPORTS
        .iter()
        .find_map(|name| instance.get_func(&mut *store, name).map(|f| (*name, f)))
    else {
        tracing::info!(
            entry = %entry.source_path.display(),
            "agent module has no default export; nothing to invoke"
        );
        return Ok(false);
    };

    let typed = func
        .typed::<(), ()>(&*store)
        .map_err(|e| format!("export `{name}` must take and return nothing: {e}"))?;

    tracing::debug!(export = name, "invoking agent");
    match typed.call(&mut *store, ()) {
        Ok(()) => Ok(true),
        Err(e) => match e.downcast_ref::<wasmtime_wasi::I32Exit>() {
            Some(exit) if exit.0 == 0 => Ok(true),
            Some(exit) => Err(format!("agent exited with code {}", exit.0)),
            None => Err(format!("{e:#}")),
        },
    }
}
