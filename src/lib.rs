//! # Snippet Sandbox
//!
//! Support layer for running documentation snippets in an isolated
//! deno_core runtime.
//!
//! ## What it provides
//!
//! - **Module registry**: an ordered table of interceptable library names;
//!   `require` and `import` of those names resolve to values loaded once
//!   into the isolate
//! - **Module loading**: library code and type declarations fetched
//!   concurrently from allowlisted origins; a failing entry never blocks the
//!   others
//! - **Safe console**: `console.*` arguments are snapshotted and rendered to
//!   escaped, cycle-safe markup with collapsible object blocks
//! - **No system access**: no fs, net, env or process APIs inside snippets
//!
//! ## Usage
//!
//! ```rust,ignore
//! use snippet_sandbox::{Sandbox, SandboxConfig, SnippetKind, TypeDeclarations};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut sandbox = Sandbox::new(SandboxConfig::default()).unwrap();
//!     let fetcher = sandbox.http_fetcher().unwrap();
//!     let mut types = TypeDeclarations::default();
//!     sandbox.load_all(&fetcher, &mut types).await;
//!
//!     let source = "import { ok } from '@cardellini/ts-result';\nconsole.log(ok(1));";
//!     sandbox.run_snippet(source, SnippetKind::detect(source)).await.unwrap();
//!
//!     // typed snippets have their annotations stripped first
//!     sandbox.run_typescript("const n: number = 2;\nconsole.log(n);").await.unwrap();
//!     sandbox.settle_output().await;
//!
//!     println!("{}", sandbox.render_output());
//! }
//! ```

mod config;
mod error;
mod fetch;
mod format;
mod loader;
mod modules;
mod registry;
mod runtime;
mod share;
mod surface;
mod transpile;
mod value;

pub use config::{default_modules, load_module_table, parse_module_table, ModuleSpec, SandboxConfig};
pub use error::{SandboxError, SandboxResult};
pub use fetch::{ArtifactFetcher, FetchConfig, HttpFetcher};
pub use format::{escape, format, format_value, PREVIEW_CHARS};
pub use loader::{module_shim, SandboxedLoader};
pub use modules::{
    load_all, load_library, load_type_declarations, wrap_declaration, DeclarationSink,
    EntryReport, LoadOutcome, LoadReport, ModuleInstantiator, TypeDeclarations,
};
pub use registry::{MatchRule, ModuleEntry, ModuleRegistry, Resolution};
pub use runtime::{ResolvedModule, Sandbox, SnippetKind, SnippetOutcome};
pub use share::{decode_share, encode_share, extract_code};
pub use surface::{ConsoleLevel, OutputBlock, OutputSurface, WIRING_DELAY};
pub use transpile::strip_types;
pub use value::{HeapObject, Property, PropertyKey, Slot, ValueGraph};
