//! Type stripping for TypeScript snippets.
//!
//! Documentation snippets are written in TypeScript; the isolate only runs
//! JavaScript, so annotations, interfaces and type-only imports are removed
//! before execution. No type checking happens here.

use crate::error::{SandboxError, SandboxResult};
use deno_ast::{
    EmitOptions, MediaType, ModuleSpecifier, ParseParams, SourceMapOption, TranspileOptions,
};

const SNIPPET_URL: &str = "file:///__sandbox__/snippet.ts";

/// Strip TypeScript syntax from `source`, keeping its runtime behaviour.
pub fn strip_types(source: &str) -> SandboxResult<String> {
    let specifier = ModuleSpecifier::parse(SNIPPET_URL)
        .map_err(|e| SandboxError::Transpile(e.to_string()))?;

    let parsed = deno_ast::parse_module(ParseParams {
        specifier,
        text: source.into(),
        media_type: MediaType::TypeScript,
        capture_tokens: false,
        scope_analysis: false,
        maybe_syntax: None,
    })
    .map_err(|e| SandboxError::Transpile(e.to_string()))?;

    let emitted = parsed
        .transpile(
            &TranspileOptions::default(),
            &EmitOptions {
                source_map: SourceMapOption::None,
                ..Default::default()
            },
        )
        .map_err(|e| SandboxError::Transpile(e.to_string()))?
        .into_source()
        .into_string()
        .map_err(|e| SandboxError::Transpile(e.to_string()))?;

    Ok(emitted.text)
}
