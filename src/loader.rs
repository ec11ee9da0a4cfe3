//! Module loader for snippets: registry modules are intercepted and served
//! from the values the registry loaded; everything else is either read from
//! an optional local directory or rejected.
//!
//! Intercepted names resolve to `sandbox:<name>` specifiers whose source is a
//! small shim re-exporting the loaded value.

use crate::registry::{ModuleRegistry, Resolution};
use crate::runtime::ResolvedModule;
use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const SANDBOX_SCHEME: &str = "sandbox";

/// Referrer used for snippets when no local directory is configured
const DEFAULT_SNIPPET_BASE: &str = "file:///__sandbox__/";

const SNIPPET_PREFIX: &str = "__snippet_";

pub struct SandboxedLoader {
    registry: Rc<ModuleRegistry<ResolvedModule>>,
    /// Canonical directory relative imports may read from
    allowed_dir: Option<PathBuf>,
    /// Directory URL snippet modules are named under
    snippet_base: ModuleSpecifier,
}

impl SandboxedLoader {
    pub fn new(
        registry: Rc<ModuleRegistry<ResolvedModule>>,
        allowed_dir: Option<&Path>,
    ) -> Result<Self, Error> {
        let allowed_dir = match allowed_dir {
            Some(dir) => {
                let canonical = dir
                    .canonicalize()
                    .map_err(|e| anyhow!("Failed to canonicalize local modules dir: {}", e))?;
                if !canonical.is_dir() {
                    return Err(anyhow!("local modules dir must be a directory"));
                }
                Some(canonical)
            }
            None => None,
        };

        let snippet_base = match &allowed_dir {
            Some(dir) => ModuleSpecifier::from_directory_path(dir)
                .map_err(|_| anyhow!("Invalid local modules dir: {}", dir.display()))?,
            None => ModuleSpecifier::parse(DEFAULT_SNIPPET_BASE)?,
        };

        Ok(Self {
            registry,
            allowed_dir,
            snippet_base,
        })
    }

    /// Specifier of the `index`-th snippet run. Snippet sources are handed to
    /// the runtime directly; relative imports resolve against this URL.
    pub fn snippet_specifier(&self, index: usize) -> Result<ModuleSpecifier, Error> {
        Ok(self
            .snippet_base
            .join(&format!("{}{}__.js", SNIPPET_PREFIX, index))?)
    }

    fn is_snippet(&self, specifier: &str) -> bool {
        specifier
            .strip_prefix(self.snippet_base.as_str())
            .is_some_and(|file| file.starts_with(SNIPPET_PREFIX) && !file.contains('/'))
    }

    /// Check if a path is within the allowed directory.
    /// Uses canonicalization to resolve symlinks and prevent traversal.
    fn is_path_allowed(&self, path: &Path) -> bool {
        match (&self.allowed_dir, path.canonicalize()) {
            (Some(dir), Ok(canonical)) => canonical.starts_with(dir),
            _ => false,
        }
    }

    /// Validate file extension is allowed (.js or .mjs only)
    fn is_extension_allowed(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("js") | Some("mjs")
        )
    }

    fn resolve_local(&self, specifier: &str, referrer: &str) -> Result<ModuleSpecifier, Error> {
        let Some(dir) = &self.allowed_dir else {
            return Err(anyhow!("Cannot find module '{}'", specifier));
        };

        let resolved = if specifier.starts_with("./") || specifier.starts_with("../") {
            let referrer_url = ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("Invalid referrer '{}': {}", referrer, e))?;
            referrer_url
                .join(specifier)
                .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e))?
        } else if specifier.starts_with("file://") {
            ModuleSpecifier::parse(specifier)
                .map_err(|e| anyhow!("Invalid file URL '{}': {}", specifier, e))?
        } else if specifier.starts_with('/') {
            ModuleSpecifier::from_file_path(specifier)
                .map_err(|_| anyhow!("Invalid absolute path: {}", specifier))?
        } else {
            // Bare specifier that no registry entry claimed
            return Err(anyhow!("Cannot find module '{}'", specifier));
        };

        if resolved.scheme() != "file" {
            return Err(anyhow!("Only file:// URLs allowed, got: {}", resolved.scheme()));
        }

        let path = resolved
            .to_file_path()
            .map_err(|_| anyhow!("Failed to convert URL to path: {}", resolved))?;

        if !self.is_path_allowed(&path) {
            return Err(anyhow!(
                "Access denied: '{}' is outside '{}'",
                path.display(),
                dir.display()
            ));
        }

        if !Self::is_extension_allowed(&path) {
            return Err(anyhow!(
                "Only .js and .mjs files allowed, got: {}",
                path.display()
            ));
        }

        Ok(resolved)
    }

    fn load_registry_module(&self, specifier: &ModuleSpecifier) -> Result<ModuleSource, Error> {
        let name = specifier.path();
        match self.registry.resolve(name) {
            Resolution::Loaded(module) => Ok(ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String(module_shim(name, &module.exports).into()),
                specifier,
                None,
            )),
            Resolution::Unavailable { module } => Err(anyhow!(
                "Module '{}' is not available: it failed to load or is still loading",
                module
            )),
            Resolution::NotFound => Err(anyhow!("Cannot find module '{}'", name)),
        }
    }

    fn load_local_module(&self, specifier: &ModuleSpecifier) -> Result<ModuleSource, Error> {
        let path = specifier
            .to_file_path()
            .map_err(|_| anyhow!("Invalid file path: {}", specifier))?;

        // Re-check, load() may be reached without resolve()
        if !self.is_path_allowed(&path) {
            return Err(anyhow!("Access denied: {}", path.display()));
        }
        if !Self::is_extension_allowed(&path) {
            return Err(anyhow!("Invalid extension: {}", path.display()));
        }

        let code = std::fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))?;

        Ok(ModuleSource::new(
            ModuleType::JavaScript,
            ModuleSourceCode::String(code.into()),
            specifier,
            None,
        ))
    }
}

impl ModuleLoader for SandboxedLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        if let Some(entry) = self.registry.find(specifier) {
            tracing::debug!(specifier, module = %entry.name, "import intercepted");
            return ModuleSpecifier::parse(&format!("{}:{}", SANDBOX_SCHEME, specifier))
                .map_err(|e| anyhow!("Invalid module name '{}': {}", specifier, e));
        }

        if self.is_snippet(specifier) {
            return Ok(ModuleSpecifier::parse(specifier)?);
        }

        // Block all remote URLs
        if specifier.starts_with("http://")
            || specifier.starts_with("https://")
            || specifier.starts_with("data:")
            || specifier.starts_with("blob:")
        {
            return Err(anyhow!("Remote imports are forbidden: {}", specifier));
        }

        self.resolve_local(specifier, referrer)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let source = if module_specifier.scheme() == SANDBOX_SCHEME {
            self.load_registry_module(module_specifier)
        } else {
            self.load_local_module(module_specifier)
        };
        ModuleLoadResponse::Sync(source)
    }
}

/// ES module source re-exporting a registry value: the value itself as the
/// default export and each listed key as a named export.
pub fn module_shim(name: &str, exports: &[String]) -> String {
    let quote = |text: &str| serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());

    let mut source = format!(
        "const __module__ = globalThis.__sandbox__.require({});\nexport default __module__;\n",
        quote(name)
    );
    for (index, key) in exports.iter().filter(|key| key.as_str() != "default").enumerate() {
        source.push_str(&format!(
            "const __export_{index}__ = __module__[{key}];\nexport {{ __export_{index}__ as {key} }};\n",
            index = index,
            key = quote(key),
        ));
    }
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_modules;
    use std::fs;
    use tempfile::tempdir;

    fn registry() -> Rc<ModuleRegistry<ResolvedModule>> {
        Rc::new(ModuleRegistry::new(default_modules()))
    }

    #[test]
    fn test_intercepts_registry_modules() {
        let loader = SandboxedLoader::new(registry(), None).unwrap();
        let referrer = loader.snippet_specifier(1).unwrap();

        let resolved = loader
            .resolve("@cardellini/ts-result/fn", referrer.as_str(), ResolutionKind::Import)
            .unwrap();
        assert_eq!(resolved.as_str(), "sandbox:@cardellini/ts-result/fn");
        assert_eq!(resolved.path(), "@cardellini/ts-result/fn");
    }

    #[test]
    fn test_unloaded_registry_module_fails_to_load() {
        let loader = SandboxedLoader::new(registry(), None).unwrap();
        let specifier = ModuleSpecifier::parse("sandbox:@cardellini/ts-result").unwrap();

        let response = loader.load(&specifier, None, false, RequestedModuleType::None);
        match response {
            ModuleLoadResponse::Sync(Err(e)) => assert!(e.to_string().contains("not available")),
            _ => panic!("expected a synchronous error"),
        }
    }

    #[test]
    fn test_unknown_bare_specifier_not_found() {
        let loader = SandboxedLoader::new(registry(), None).unwrap();

        let result = loader.resolve("left-pad", DEFAULT_SNIPPET_BASE, ResolutionKind::Import);
        assert!(result.unwrap_err().to_string().contains("Cannot find module 'left-pad'"));
    }

    #[test]
    fn test_blocks_remote_urls() {
        let loader = SandboxedLoader::new(registry(), None).unwrap();

        let result = loader.resolve("https://evil.com/payload.js", DEFAULT_SNIPPET_BASE, ResolutionKind::Import);
        assert!(result.unwrap_err().to_string().contains("Remote imports are forbidden"));
    }

    #[test]
    fn test_snippet_specifiers_resolve_without_local_dir() {
        let loader = SandboxedLoader::new(registry(), None).unwrap();
        let snippet = loader.snippet_specifier(3).unwrap();

        assert_eq!(snippet.as_str(), "file:///__sandbox__/__snippet_3__.js");
        assert_eq!(
            loader.resolve(snippet.as_str(), ".", ResolutionKind::Import).unwrap(),
            snippet
        );
        assert!(loader
            .resolve("file:///__sandbox__/other.js", ".", ResolutionKind::Import)
            .is_err());
    }

    #[test]
    fn test_relative_imports_need_local_dir() {
        let loader = SandboxedLoader::new(registry(), None).unwrap();

        let result = loader.resolve("./helper.js", DEFAULT_SNIPPET_BASE, ResolutionKind::Import);
        assert!(result.is_err());
    }

    #[test]
    fn test_local_dir_imports() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("helper.js"), "export const two = 2;").unwrap();
        fs::write(dir.path().join("data.json"), "{}").unwrap();
        let loader = SandboxedLoader::new(registry(), Some(dir.path())).unwrap();
        let referrer = loader.snippet_specifier(1).unwrap();

        // the snippet itself resolves even though no file backs it
        let resolved = loader
            .resolve(referrer.as_str(), ".", ResolutionKind::MainModule)
            .unwrap();
        assert_eq!(resolved, referrer);

        let helper = loader
            .resolve("./helper.js", referrer.as_str(), ResolutionKind::Import)
            .unwrap();
        assert!(matches!(
            loader.load(&helper, None, false, RequestedModuleType::None),
            ModuleLoadResponse::Sync(Ok(_))
        ));

        let result = loader.resolve("./data.json", referrer.as_str(), ResolutionKind::Import);
        assert!(result.unwrap_err().to_string().contains("Only .js and .mjs"));

        let result = loader.resolve("../../../etc/passwd", referrer.as_str(), ResolutionKind::Import);
        assert!(result.is_err());
    }

    #[test]
    fn test_module_shim() {
        let shim = module_shim(
            "@cardellini/ts-result",
            &["ok".to_string(), "default".to_string(), "err".to_string()],
        );

        assert_eq!(
            shim,
            concat!(
                "const __module__ = globalThis.__sandbox__.require(\"@cardellini/ts-result\");\n",
                "export default __module__;\n",
                "const __export_0__ = __module__[\"ok\"];\n",
                "export { __export_0__ as \"ok\" };\n",
                "const __export_1__ = __module__[\"err\"];\n",
                "export { __export_1__ as \"err\" };\n",
            )
        );
    }
}
