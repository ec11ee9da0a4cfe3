//! Loading registered modules: library code into the isolate, type
//! declarations into the editor's ambient type service.
//!
//! All artifact fetches run concurrently and each is settled when it
//! completes; a failing or stalled entry is logged and left unresolved
//! without holding back the others.

use crate::error::{SandboxError, SandboxResult};
use crate::fetch::ArtifactFetcher;
use crate::registry::{ModuleEntry, ModuleRegistry};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::time::Duration;

/// Evaluates fetched library code in an isolated scope and extracts the
/// value the library bound to its global name.
pub trait ModuleInstantiator {
    type Value;

    fn instantiate(&mut self, module: &str, code: String, binding: &str) -> SandboxResult<Self::Value>;
}

/// Editor-side ambient type-checking service.
pub trait DeclarationSink {
    /// Register declaration `text` under `module_name`. Fire-and-forget.
    fn register_declaration(&mut self, text: String, module_name: &str);
}

/// In-process stand-in for the editor's type service: the latest
/// declaration registered for each module name.
#[derive(Debug, Default, Clone)]
pub struct TypeDeclarations {
    libs: BTreeMap<String, String>,
}

impl TypeDeclarations {
    pub fn get(&self, module_name: &str) -> Option<&str> {
        self.libs.get(module_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.libs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.libs.iter().map(|(name, text)| (name.as_str(), text.as_str()))
    }
}

impl DeclarationSink for TypeDeclarations {
    fn register_declaration(&mut self, text: String, module_name: &str) {
        self.libs.insert(module_name.to_string(), text);
    }
}

/// Wrap raw declaration text so it describes the module `module_name`.
pub fn wrap_declaration(module_name: &str, text: &str) -> String {
    format!("declare module \"{}\" {{\n{}\n}}\n", module_name, text.trim_end())
}

/// What happened to one artifact of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// Already loaded or another load in flight; nothing was fetched
    Skipped,
    Failed(String),
}

impl LoadOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, LoadOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    pub module: String,
    pub library: LoadOutcome,
    pub types: LoadOutcome,
}

/// Per-entry summary of a [`load_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub entries: Vec<EntryReport>,
}

impl LoadReport {
    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.library.is_failed() as usize + entry.types.is_failed() as usize)
            .sum()
    }

    pub fn entry(&self, module: &str) -> Option<&EntryReport> {
        self.entries.iter().find(|entry| entry.module == module)
    }
}

/// Fetch and instantiate one entry's library. Failures are logged and
/// leave the entry unresolved; calling again after success is a no-op.
pub async fn load_library<I: ModuleInstantiator>(
    entry: &ModuleEntry<I::Value>,
    fetcher: &dyn ArtifactFetcher,
    host: &mut I,
) -> LoadOutcome {
    if !entry.begin_load() {
        return LoadOutcome::Skipped;
    }
    let code = fetcher.fetch_text(&entry.code).await;
    settle_library(entry, code, host)
}

/// Fetch one entry's declarations and register them under the entry name.
pub async fn load_type_declarations<E>(
    entry: &ModuleEntry<E>,
    fetcher: &dyn ArtifactFetcher,
    sink: &mut dyn DeclarationSink,
) -> LoadOutcome {
    let types = fetcher.fetch_text(&entry.types).await;
    settle_types(entry, types, sink)
}

#[derive(Debug, Clone, Copy)]
enum Artifact {
    Code,
    Types,
}

/// Load libraries and declarations for every entry. Each artifact is
/// settled as soon as its own fetch completes, so a slow entry never holds
/// back the others. With `fetch_timeout` set, every fetch is bounded and the
/// call always resolves.
pub async fn load_all<I: ModuleInstantiator>(
    registry: &ModuleRegistry<I::Value>,
    fetcher: &dyn ArtifactFetcher,
    host: &mut I,
    sink: &mut dyn DeclarationSink,
    fetch_timeout: Option<Duration>,
) -> LoadReport {
    let entries = registry.entries();
    let mut outcomes = vec![(LoadOutcome::Skipped, LoadOutcome::Skipped); entries.len()];

    let mut pending = FuturesUnordered::new();
    for (index, entry) in entries.iter().enumerate() {
        if entry.begin_load() {
            pending.push(fetch_artifact(fetcher, index, Artifact::Code, &entry.code, fetch_timeout));
        }
        pending.push(fetch_artifact(fetcher, index, Artifact::Types, &entry.types, fetch_timeout));
    }

    // Instantiation needs the isolate, so it runs here, one artifact at a
    // time in completion order.
    while let Some((index, artifact, fetched)) = pending.next().await {
        let entry = &entries[index];
        match artifact {
            Artifact::Code => outcomes[index].0 = settle_library(entry, fetched, host),
            Artifact::Types => outcomes[index].1 = settle_types(entry, fetched, sink),
        }
    }

    let report = LoadReport {
        entries: entries
            .iter()
            .zip(outcomes)
            .map(|(entry, (library, types))| EntryReport {
                module: entry.name.clone(),
                library,
                types,
            })
            .collect(),
    };

    tracing::info!(
        modules = report.entries.len(),
        failures = report.failures(),
        "module loading finished"
    );
    report
}

async fn fetch_artifact(
    fetcher: &dyn ArtifactFetcher,
    index: usize,
    artifact: Artifact,
    location: &str,
    limit: Option<Duration>,
) -> (usize, Artifact, SandboxResult<String>) {
    let fetch = fetcher.fetch_text(location);
    let fetched = match limit {
        Some(limit) => tokio::time::timeout(limit, fetch).await.unwrap_or_else(|_| {
            Err(SandboxError::Fetch {
                location: location.to_string(),
                reason: format!("timed out after {}ms", limit.as_millis()),
            })
        }),
        None => fetch.await,
    };
    (index, artifact, fetched)
}

fn settle_library<I: ModuleInstantiator>(
    entry: &ModuleEntry<I::Value>,
    code: SandboxResult<String>,
    host: &mut I,
) -> LoadOutcome {
    let value = code.and_then(|code| host.instantiate(&entry.name, code, &entry.binding));
    match value {
        Ok(value) => {
            entry.finish_load(Some(value));
            tracing::info!(module = %entry.name, binding = %entry.binding, "library loaded");
            LoadOutcome::Loaded
        }
        Err(e) => {
            entry.finish_load(None);
            tracing::warn!(module = %entry.name, error = %e, "library failed to load");
            LoadOutcome::Failed(e.to_string())
        }
    }
}

fn settle_types<E>(
    entry: &ModuleEntry<E>,
    types: SandboxResult<String>,
    sink: &mut dyn DeclarationSink,
) -> LoadOutcome {
    match types {
        Ok(text) => {
            sink.register_declaration(wrap_declaration(&entry.name, &text), &entry.name);
            LoadOutcome::Loaded
        }
        Err(e) => {
            tracing::warn!(module = %entry.name, error = %e, "type declarations failed to load");
            LoadOutcome::Failed(e.to_string())
        }
    }
}
