//! Snippet runtime - executes documentation snippets in a V8 isolate whose
//! `console` and `require`/`import` are replaced by the sandbox layer.
//!
//! Provides only what snippets need:
//! - console.log/info/debug/warn/error (formatted into the output surface)
//! - require() and static imports of registry modules
//! - unsafe`...` for pre-escaped markup
//! - Relative imports from an optional local directory
//! - No fs, net, env, or other system access

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::fetch::{ArtifactFetcher, FetchConfig, HttpFetcher};
use crate::format::{escape, format_value};
use crate::loader::SandboxedLoader;
use crate::modules::{self, DeclarationSink, LoadReport, ModuleInstantiator};
use crate::registry::{ModuleRegistry, Resolution};
use crate::surface::{ConsoleLevel, OutputBlock, OutputSurface};
use crate::transpile::strip_types;
use crate::value::ValueGraph;
use deno_core::anyhow::Error;
use deno_core::{op2, v8, JsRuntime, OpState, PollEventLoopOptions, RuntimeOptions};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Stash for a freshly instantiated library between the two isolation scripts
const PENDING: &str = "__sandbox_pending__";

/// A library value loaded into the isolate.
#[derive(Clone)]
pub struct ResolvedModule {
    pub value: v8::Global<v8::Value>,
    /// Own enumerable keys, re-exported as named ES exports
    pub exports: Vec<String>,
}

impl std::fmt::Debug for ResolvedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModule")
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

type SharedRegistry = Rc<ModuleRegistry<ResolvedModule>>;

/// Fallback consulted by `require` for names no registry entry matches.
#[derive(Clone)]
pub struct HostResolver(pub Rc<dyn Fn(&str) -> Option<ResolvedModule>>);

/// How snippet source is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetKind {
    /// ES module; `import` statements are intercepted by the loader
    Module,
    /// Classic script with CommonJS-style `exports`/`module`/`require`
    Script,
}

impl SnippetKind {
    /// Treat the source as a module when any line starts with `import` or `export`.
    pub fn detect(source: &str) -> Self {
        let is_module = source.lines().map(str::trim_start).any(|line| {
            line.starts_with("import ") || line.starts_with("import{") || line.starts_with("export ")
        });
        if is_module {
            SnippetKind::Module
        } else {
            SnippetKind::Script
        }
    }
}

/// Result of one snippet run
#[derive(Debug, Clone)]
pub struct SnippetOutcome {
    /// Blocks appended during this run, in call order
    pub blocks: Vec<OutputBlock>,
    /// Uncaught error or timeout, also appended as an error block
    pub error: Option<String>,
}

// ============================================================================
// Console Ops
// ============================================================================

#[op2]
fn op_console_emit(state: &mut OpState, #[string] level: String, #[serde] args: Vec<ValueGraph>) {
    let parts: Vec<String> = args.iter().map(format_value).collect();
    if let Some(surface) = state.try_borrow_mut::<OutputSurface>() {
        surface.append(ConsoleLevel::from_method(&level), &parts, Instant::now());
    }
}

// ============================================================================
// Module Ops
// ============================================================================

fn resolve_in(state: &OpState, name: &str) -> Resolution<ResolvedModule> {
    let registry = state.borrow::<SharedRegistry>();
    let host = state
        .try_borrow::<HostResolver>()
        .map(|host| host.0.as_ref());
    registry.decorate(host)(name)
}

#[op2]
#[string]
fn op_sandbox_module_status(state: &mut OpState, #[string] name: String) -> String {
    let status = match resolve_in(state, &name) {
        Resolution::Loaded(_) => "loaded",
        Resolution::Unavailable { .. } => "unavailable",
        Resolution::NotFound => "missing",
    };
    tracing::debug!(module = %name, status, "require");
    status.to_string()
}

#[op2]
fn op_sandbox_module_value<'s>(
    scope: &mut v8::HandleScope<'s>,
    state: &OpState,
    #[string] name: String,
) -> Option<v8::Local<'s, v8::Value>> {
    resolve_in(state, &name)
        .into_value()
        .map(|module| v8::Local::new(scope, &module.value))
}

deno_core::extension!(
    snippet_sandbox,
    ops = [
        op_console_emit,
        op_sandbox_module_status,
        op_sandbox_module_value,
    ],
    esm_entry_point = "ext:snippet_sandbox/bootstrap.js",
    esm = ["ext:snippet_sandbox/bootstrap.js" = "src/bootstrap.js"],
);

// ============================================================================
// Library instantiation
// ============================================================================

/// Evaluates library code in the isolate with the ambient module hooks
/// (`define`, `module`, `exports`) shadowed, so UMD bundles fall back to
/// assigning their global instead of registering with a loader.
struct IsolateInstantiator<'a> {
    runtime: &'a mut JsRuntime,
}

impl ModuleInstantiator for IsolateInstantiator<'_> {
    type Value = ResolvedModule;

    fn instantiate(&mut self, module: &str, code: String, binding: &str) -> SandboxResult<ResolvedModule> {
        let evaluation_error = |e: Error| SandboxError::Evaluation {
            module: module.to_string(),
            reason: e.to_string(),
        };

        let keys_global = self
            .runtime
            .execute_script("<sandbox-module>", isolation_script(&code, binding)?)
            .map_err(evaluation_error)?;
        let keys_json = {
            let scope = &mut self.runtime.handle_scope();
            let local = v8::Local::new(scope, &keys_global);
            local.to_rust_string_lossy(scope)
        };
        if keys_json.is_empty() {
            return Err(SandboxError::MissingBinding {
                module: module.to_string(),
                binding: binding.to_string(),
            });
        }
        let exports: Vec<String> = serde_json::from_str(&keys_json).unwrap_or_default();

        let take = format!(
            "(() => {{ const value = globalThis.{p}; delete globalThis.{p}; return value; }})()",
            p = PENDING
        );
        let value = self
            .runtime
            .execute_script("<sandbox-module>", take)
            .map_err(evaluation_error)?;

        Ok(ResolvedModule { value, exports })
    }
}

/// Script that runs `code` inside `with (scope)`, stores the bound value in
/// a stash global and evaluates to the JSON list of its keys, or `""` when
/// the binding is missing. The library's own global stays in place, so later
/// bundles can build on it.
fn isolation_script(code: &str, binding: &str) -> SandboxResult<String> {
    let key = serde_json::to_string(binding)?;
    let lookup = if is_identifier(binding) {
        format!(
            "typeof {b} !== \"undefined\" ? {b} : globalThis[{k}]",
            b = binding,
            k = key
        )
    } else {
        format!("globalThis[{}]", key)
    };

    Ok(format!(
        r#"globalThis.{p} = (function (__sandbox_scope__) {{ with (__sandbox_scope__) {{
{code}
;return {lookup};
}} }}).call(globalThis, {{ define: undefined, module: undefined, exports: undefined }});
globalThis.{p} === undefined ? "" : JSON.stringify(Object.keys(Object(globalThis.{p})));"#,
        p = PENDING,
        code = code,
        lookup = lookup,
    ))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

/// A run counts as timed out only when it failed after the timer fired;
/// a run that finished just before the timer keeps its own result.
fn timeout_outcome(result: Result<(), Error>, fired: bool, ms: u64) -> SandboxResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(_) if fired => Err(SandboxError::Timeout { ms }),
        Err(e) => Err(SandboxError::from(e)),
    }
}

/// CommonJS-style wrapper for script snippets
fn script_wrapper(source: &str) -> String {
    format!(
        "(function () {{ const module = {{ exports: {{}} }}; (function (exports, module, require) {{\n{}\n}}).call(module.exports, module.exports, module, globalThis.__sandbox__.require); }})();",
        source
    )
}

// ============================================================================
// Sandbox
// ============================================================================

/// A sandboxed runtime plus the registry and output surface it works with.
pub struct Sandbox {
    runtime: JsRuntime,
    op_state: Rc<RefCell<OpState>>,
    registry: SharedRegistry,
    config: SandboxConfig,
    loader: Rc<SandboxedLoader>,
    snippets_run: usize,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> SandboxResult<Self> {
        let registry: SharedRegistry = Rc::new(ModuleRegistry::new(config.modules.clone()));
        let loader = Rc::new(SandboxedLoader::new(
            registry.clone(),
            config.local_modules_dir.as_deref(),
        )?);

        // Configure V8 heap limits if specified
        let create_params = config
            .max_heap_size
            .map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes));

        let mut runtime = JsRuntime::new(RuntimeOptions {
            module_loader: Some(loader.clone()),
            extensions: vec![snippet_sandbox::init_ops_and_esm()],
            create_params,
            ..Default::default()
        });

        if config.max_heap_size.is_some() {
            runtime.add_near_heap_limit_callback(|current, initial| {
                // Don't increase the limit - let V8 terminate gracefully
                tracing::warn!(
                    current_mb = current / (1024 * 1024),
                    initial_mb = initial / (1024 * 1024),
                    "near heap limit"
                );
                current
            });
        }

        let op_state = runtime.op_state();
        {
            let mut state = op_state.borrow_mut();
            state.put(OutputSurface::new());
            state.put(registry.clone());
        }

        Ok(Self {
            runtime,
            op_state,
            registry,
            config,
            loader,
            snippets_run: 0,
        })
    }

    /// Consult `resolver` for `require` names no registry entry matches.
    pub fn set_host_resolver(&mut self, resolver: impl Fn(&str) -> Option<ResolvedModule> + 'static) {
        self.op_state
            .borrow_mut()
            .put(HostResolver(Rc::new(resolver)));
    }

    pub fn registry(&self) -> &ModuleRegistry<ResolvedModule> {
        &self.registry
    }

    /// The resolver snippets see through `require`, usable from Rust.
    pub fn resolve(&self, name: &str) -> Resolution<ResolvedModule> {
        resolve_in(&self.op_state.borrow(), name)
    }

    /// Fetcher honouring this sandbox's origin allowlist.
    pub fn http_fetcher(&self) -> SandboxResult<HttpFetcher> {
        HttpFetcher::new(FetchConfig {
            allowed_origins: self.config.allowed_origins.clone(),
            allow_file_urls: self.config.allow_file_urls,
            timeout: self.config.fetch_timeout(),
        })
    }

    /// Load every registered library into the isolate and feed the type
    /// declarations to `declarations`. Never fails as a whole; each fetch is
    /// bounded by `fetch_timeout_ms`.
    pub async fn load_all(
        &mut self,
        fetcher: &dyn ArtifactFetcher,
        declarations: &mut dyn DeclarationSink,
    ) -> LoadReport {
        let registry = self.registry.clone();
        let mut host = IsolateInstantiator {
            runtime: &mut self.runtime,
        };
        let fetch_timeout = self.config.fetch_timeout();
        modules::load_all(&registry, fetcher, &mut host, declarations, fetch_timeout).await
    }

    /// Run one snippet. Uncaught errors and timeouts are rendered into the
    /// output as error blocks rather than returned.
    pub async fn run_snippet(&mut self, source: &str, kind: SnippetKind) -> SandboxResult<SnippetOutcome> {
        let before = self.with_output(|surface| surface.len());
        self.snippets_run += 1;
        let specifier = self.loader.snippet_specifier(self.snippets_run)?;

        let result = match self.config.timeout_ms {
            Some(ms) => {
                // Get a handle to terminate execution if needed
                let isolate_handle = self.runtime.v8_isolate().thread_safe_handle();
                let fired = Arc::new(AtomicBool::new(false));
                let fired_flag = fired.clone();

                let timeout_handle = tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                    fired_flag.store(true, Ordering::SeqCst);
                    isolate_handle.terminate_execution();
                });

                let result = self.execute(source, kind, &specifier).await;
                timeout_handle.abort();

                let fired = fired.load(Ordering::SeqCst);
                if fired {
                    // a late termination request must not hit the next run
                    self.runtime.v8_isolate().cancel_terminate_execution();
                }
                timeout_outcome(result, fired, ms)
            }
            None => self.execute(source, kind, &specifier).await.map_err(SandboxError::from),
        };

        let error = result.err().map(|e| e.to_string());
        if let Some(message) = &error {
            tracing::debug!(snippet = %specifier, error = %message, "snippet failed");
            self.append_error(message);
        }

        Ok(SnippetOutcome {
            blocks: self.blocks_since(before),
            error,
        })
    }

    /// Strip TypeScript types from `source`, then run it as [`run_snippet`]
    /// does. Syntax errors are reported the same way as runtime errors.
    ///
    /// [`run_snippet`]: Sandbox::run_snippet
    pub async fn run_typescript(&mut self, source: &str) -> SandboxResult<SnippetOutcome> {
        match strip_types(source) {
            Ok(code) => self.run_snippet(&code, SnippetKind::detect(&code)).await,
            Err(e) => {
                let before = self.with_output(|surface| surface.len());
                let message = e.to_string();
                tracing::debug!(error = %message, "snippet failed to transpile");
                self.append_error(&message);
                Ok(SnippetOutcome {
                    blocks: self.blocks_since(before),
                    error: Some(message),
                })
            }
        }
    }

    fn append_error(&self, message: &str) {
        let markup = format!(r#"<span class="error">{}</span>"#, escape(message));
        self.with_output(|surface| surface.append(ConsoleLevel::Error, &[markup], Instant::now()));
    }

    fn blocks_since(&self, before: usize) -> Vec<OutputBlock> {
        self.with_output(|surface| surface.blocks()[before..].to_vec())
    }

    async fn execute(
        &mut self,
        source: &str,
        kind: SnippetKind,
        specifier: &deno_core::ModuleSpecifier,
    ) -> Result<(), Error> {
        match kind {
            SnippetKind::Module => {
                let id = self
                    .runtime
                    .load_side_es_module_from_code(specifier, source.to_string())
                    .await?;
                let evaluation = self.runtime.mod_evaluate(id);
                self.runtime
                    .run_event_loop(PollEventLoopOptions::default())
                    .await?;
                evaluation.await?;
            }
            SnippetKind::Script => {
                self.runtime
                    .execute_script("<snippet>", script_wrapper(source))?;
                self.runtime
                    .run_event_loop(PollEventLoopOptions::default())
                    .await?;
            }
        }
        Ok(())
    }

    pub fn with_output<R>(&self, f: impl FnOnce(&mut OutputSurface) -> R) -> R {
        let mut state = self.op_state.borrow_mut();
        f(state.borrow_mut::<OutputSurface>())
    }

    /// Wait for the debounced wiring pass and run it.
    pub async fn settle_output(&self) {
        if let Some(deadline) = self.with_output(|surface| surface.wiring_deadline()) {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            self.with_output(|surface| surface.wire_pending(Instant::now()));
        }
    }

    /// Rendered output of every run so far.
    pub fn render_output(&self) -> String {
        self.with_output(|surface| surface.render())
    }

    /// Drop all rendered output.
    pub fn clear_output(&self) {
        self.with_output(OutputSurface::clear);
    }
}
