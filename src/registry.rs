//! Registry of library modules that sandboxed snippets may import.
//!
//! Each entry describes one interceptable module name (or a family of
//! sub-paths), where its code and type declarations live, and the global
//! binding the code exposes once evaluated. The loaded value is kept in a
//! write-once slot owned by the entry; resolution reads it, loading is the
//! only writer.

use crate::config::ModuleSpec;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, OnceCell};

/// How a module name is matched against an entry.
///
/// Rules are evaluated in registration order and the first match wins, so a
/// family can carve out a sub-path that a later, dedicated entry serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// The module name must equal this string.
    Exact(String),
    /// `base` itself or any `base/<rest>` whose `rest` is not an excluded sub-path.
    Family {
        base: String,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

impl MatchRule {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            MatchRule::Exact(exact) => name == exact,
            MatchRule::Family { base, exclude } => {
                let Some(rest) = name.strip_prefix(base.as_str()) else {
                    return false;
                };
                if rest.is_empty() {
                    return true;
                }
                let Some(sub) = rest.strip_prefix('/') else {
                    return false;
                };
                !sub.is_empty() && !exclude.iter().any(|excluded| is_under(sub, excluded))
            }
        }
    }
}

/// `sub` is the excluded path itself or nested beneath it.
fn is_under(sub: &str, excluded: &str) -> bool {
    match sub.strip_prefix(excluded) {
        Some(tail) => tail.is_empty() || tail.starts_with('/'),
        None => false,
    }
}

/// One interceptable module.
#[derive(Debug)]
pub struct ModuleEntry<V> {
    /// Canonical import string, also the key for type declarations
    pub name: String,
    pub rule: MatchRule,
    /// Location of the library code artifact
    pub code: String,
    /// Location of the type declaration artifact
    pub types: String,
    /// Global name the library assigns itself to when evaluated
    pub binding: String,
    resolved: OnceCell<V>,
    loading: Cell<bool>,
}

impl<V> ModuleEntry<V> {
    pub fn new(spec: ModuleSpec) -> Self {
        Self {
            name: spec.name,
            rule: spec.rule,
            code: spec.code,
            types: spec.types,
            binding: spec.binding,
            resolved: OnceCell::new(),
            loading: Cell::new(false),
        }
    }

    /// The loaded module value, absent until a load succeeded.
    pub fn resolved(&self) -> Option<&V> {
        self.resolved.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.resolved.get().is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.get()
    }

    /// Claim the entry for loading. Returns `false` when it is already
    /// loaded or another load is in flight.
    pub(crate) fn begin_load(&self) -> bool {
        if self.is_loaded() || self.loading.get() {
            return false;
        }
        self.loading.set(true);
        true
    }

    /// Release the claim taken by [`begin_load`](Self::begin_load), storing
    /// the value if the load succeeded. A stored value is never replaced.
    pub(crate) fn finish_load(&self, value: Option<V>) {
        if let Some(value) = value {
            let _ = self.resolved.set(value);
        }
        self.loading.set(false);
    }
}

/// Outcome of resolving a module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<V> {
    Loaded(V),
    /// A registry entry matched but its value is not available (still
    /// loading, or loading failed).
    Unavailable { module: String },
    /// No entry matched and the host resolver had nothing either.
    NotFound,
}

impl<V> Resolution<V> {
    pub fn into_value(self) -> Option<V> {
        match self {
            Resolution::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Resolution::NotFound)
    }
}

/// Ordered table of module entries. The registry is the sole owner of the
/// resolved slots.
#[derive(Debug)]
pub struct ModuleRegistry<V> {
    entries: Vec<ModuleEntry<V>>,
}

impl<V> ModuleRegistry<V> {
    pub fn new(specs: impl IntoIterator<Item = ModuleSpec>) -> Self {
        Self {
            entries: specs.into_iter().map(ModuleEntry::new).collect(),
        }
    }

    pub fn entries(&self) -> &[ModuleEntry<V>] {
        &self.entries
    }

    /// First entry, in registration order, whose rule matches `name`.
    pub fn find(&self, name: &str) -> Option<&ModuleEntry<V>> {
        self.entries.iter().find(|entry| entry.rule.matches(name))
    }

    /// Resolve against the registry only.
    pub fn resolve(&self, name: &str) -> Resolution<V>
    where
        V: Clone,
    {
        self.decorate(None::<fn(&str) -> Option<V>>)(name)
    }

    /// Wrap a host resolver: registry entries take precedence, unmatched names
    /// fall through to `host`, and with no host an explicit
    /// [`Resolution::NotFound`] is returned.
    pub fn decorate<'r, H>(&'r self, host: Option<H>) -> impl Fn(&str) -> Resolution<V> + 'r
    where
        H: Fn(&str) -> Option<V> + 'r,
        V: Clone,
    {
        move |name: &str| match self.find(name) {
            Some(entry) => match entry.resolved() {
                Some(value) => Resolution::Loaded(value.clone()),
                None => Resolution::Unavailable {
                    module: entry.name.clone(),
                },
            },
            None => match host.as_ref().and_then(|host| host(name)) {
                Some(value) => Resolution::Loaded(value),
                None => Resolution::NotFound,
            },
        }
    }
}
