//! Sandbox configuration and the module table.

use crate::error::{SandboxError, SandboxResult};
use crate::registry::MatchRule;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Version of `@cardellini/ts-result` served to snippets by default
pub const TS_RESULT_VERSION: &str = "0.3.1";

const JSDELIVR: &str = "https://cdn.jsdelivr.net";

/// One row of the module table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Canonical import string
    pub name: String,
    pub rule: MatchRule,
    /// Location of the library code (https:// or file://)
    pub code: String,
    /// Location of the type declarations
    pub types: String,
    /// Global name the library exposes itself under
    pub binding: String,
}

/// The table the documentation site ships with: the result library and its
/// functional helpers, which live on a sub-path the base family must not swallow.
pub fn default_modules() -> Vec<ModuleSpec> {
    let dist = format!("{}/npm/@cardellini/ts-result@{}/dist", JSDELIVR, TS_RESULT_VERSION);
    vec![
        ModuleSpec {
            name: "@cardellini/ts-result".to_string(),
            rule: MatchRule::Family {
                base: "@cardellini/ts-result".to_string(),
                exclude: vec!["fn".to_string()],
            },
            code: format!("{}/result.min.js", dist),
            types: format!("{}/result.d.ts", dist),
            binding: "Result".to_string(),
        },
        ModuleSpec {
            name: "@cardellini/ts-result/fn".to_string(),
            rule: MatchRule::Exact("@cardellini/ts-result/fn".to_string()),
            code: format!("{}/fn.min.js", dist),
            types: format!("{}/fn.d.ts", dist),
            binding: "ResultFn".to_string(),
        },
    ]
}

/// Read a module table from a JSON file holding an array of [`ModuleSpec`].
pub fn load_module_table(path: impl AsRef<Path>) -> SandboxResult<Vec<ModuleSpec>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        SandboxError::Config(format!("Failed to read '{}': {}", path.display(), e))
    })?;
    parse_module_table(&text)
}

pub fn parse_module_table(json: &str) -> SandboxResult<Vec<ModuleSpec>> {
    let specs: Vec<ModuleSpec> = serde_json::from_str(json)?;
    for spec in &specs {
        if spec.name.is_empty() || spec.binding.is_empty() {
            return Err(SandboxError::Config(format!(
                "Module entry needs a name and a binding: {:?}",
                spec
            )));
        }
    }
    Ok(specs)
}

/// Configuration for the snippet sandbox
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Modules intercepted by `require`/`import`, in match order
    pub modules: Vec<ModuleSpec>,
    /// Origins artifacts may be fetched from (empty = network fetches disabled)
    pub allowed_origins: Vec<String>,
    /// Whether `file://` artifact locations may be read
    pub allow_file_urls: bool,
    /// Directory relative imports may load from (None = only registry modules)
    pub local_modules_dir: Option<PathBuf>,
    /// Maximum heap size in bytes (default: 64MB, None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Maximum time for a single snippet in milliseconds (default: 5000ms, None = unlimited)
    pub timeout_ms: Option<u64>,
    /// Maximum time for fetching one artifact in milliseconds (default: 30000ms, None = unlimited)
    pub fetch_timeout_ms: Option<u64>,
}

impl SandboxConfig {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            modules: default_modules(),
            allowed_origins: vec![JSDELIVR.to_string()],
            allow_file_urls: false,
            local_modules_dir: None,
            max_heap_size: Some(64 * 1024 * 1024), // 64MB default
            timeout_ms: Some(5_000),
            fetch_timeout_ms: Some(30_000),
        }
    }
}
