// crates/core/src/loader/descriptor.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LoadStage, ShimError, ShimResult};
use crate::loader::host_functions::{HOST_MODULE, WASI_MODULE};
use crate::loader::translate::{SourceDialect, NATIVE_EXTENSION};

/// Module name of the agent entry point.
pub const ENTRY_MODULE_NAME: &str = "agent";

/// One agent module: where its source lives and where its native artifact
/// goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentModuleDescriptor {
    pub source_path: PathBuf,
    pub compiled_path: PathBuf,
    pub is_entry: bool,
}

impl AgentModuleDescriptor {
    pub fn new(source_path: PathBuf, scratch_dir: &Path) -> Self {
        let name = module_name(&source_path);
        Self {
            compiled_path: scratch_dir.join(format!("{name}.{NATIVE_EXTENSION}")),
            is_entry: name == ENTRY_MODULE_NAME,
            source_path,
        }
    }

    /// Import namespace other modules use to reach this one.
    pub fn module_name(&self) -> String {
        module_name(&self.source_path)
    }

    pub fn dialect(&self) -> Option<SourceDialect> {
        SourceDialect::from_path(&self.source_path)
    }
}

fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Module names the linker already provides; a sibling may not shadow them.
const RESERVED_MODULE_NAMES: [&str; 2] = [HOST_MODULE, WASI_MODULE];

/// Collect the entry module and its sibling modules.
///
/// When both `name.wat` and `name.wasm` exist the text source wins; the
/// binary is treated as a stale artifact. The result is sorted by source
/// path and holds exactly one entry.
pub fn discover(entry_path: &Path, scratch_dir: &Path) -> ShimResult<Vec<AgentModuleDescriptor>> {
    let source_error =
        |message: String| ShimError::agent_load(entry_path, LoadStage::Source, message);

    if !entry_path.is_file() {
        return Err(source_error("agent source not found".into()));
    }
    if SourceDialect::from_path(entry_path).is_none() {
        return Err(source_error("unsupported agent source extension".into()));
    }
    if module_name(entry_path) != ENTRY_MODULE_NAME {
        return Err(source_error(format!(
            "entry module must be named `{ENTRY_MODULE_NAME}`"
        )));
    }

    let dir = match entry_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let listing = fs::read_dir(dir).map_err(|e| source_error(e.to_string()))?;

    let mut by_name: BTreeMap<String, PathBuf> = BTreeMap::new();
    for dir_entry in listing {
        let path = dir_entry.map_err(|e| source_error(e.to_string()))?.path();
        if SourceDialect::from_path(&path).is_none() || !path.is_file() {
            continue;
        }
        let name = module_name(&path);
        if RESERVED_MODULE_NAMES.contains(&name.as_str()) {
            return Err(ShimError::agent_load(
                &path,
                LoadStage::Source,
                format!("module name `{name}` is reserved"),
            ));
        }
        let existing_dialect = by_name.get(&name).and_then(|p| SourceDialect::from_path(p));
        if existing_dialect == Some(SourceDialect::Text) {
            tracing::debug!(skipped = %path.display(), "text source shadows binary module");
        } else if let Some(stale) = by_name.insert(name, path) {
            tracing::debug!(skipped = %stale.display(), "text source shadows binary module");
        }
    }

    let mut descriptors: Vec<AgentModuleDescriptor> = by_name
        .into_values()
        .map(|path| AgentModuleDescriptor::new(path, scratch_dir))
        .collect();
    descriptors.sort_by(|a, b| a.source_path.cmp(&b.source_path));

    let entries = descriptors.iter().filter(|d| d.is_entry).count();
    if entries != 1 {
        return Err(source_error(format!(
            "expected exactly one `{ENTRY_MODULE_NAME}` module, found {entries}"
        )));
    }

    Ok(descriptors)
}
