//! Snapshot of runtime values logged by sandboxed code.
//!
//! `bootstrap.js` walks each console argument once and ships it across the
//! op boundary as a [`ValueGraph`]: a root slot plus an arena of heap
//! objects. Object identity is kept through [`ObjectId`]s, so cyclic and
//! shared structures arrive intact and the formatter decides how to cut them.

use serde::{Deserialize, Serialize};

/// Index of an object in [`ValueGraph::objects`].
pub type ObjectId = usize;

/// A value as seen from a property, element or console argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum Slot {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Decimal digits, without the `n` suffix
    BigInt(String),
    String(String),
    /// Pre-escaped markup, emitted verbatim
    Unsafe(String),
    /// Symbol description
    Symbol(String),
    /// Function source text
    Function(String),
    /// Reading the property threw; carries the thrown value as text
    Thrown(String),
    Ref(ObjectId),
}

/// Own property key, in the order the runtime enumerates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum PropertyKey {
    Name(String),
    Symbol(String),
}

impl PropertyKey {
    /// Text shown as the key label
    pub fn label(&self) -> String {
        match self {
            PropertyKey::Name(name) => name.clone(),
            PropertyKey::Symbol(description) => format!("Symbol({})", description),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: PropertyKey,
    pub value: Slot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HeapObject {
    Array {
        items: Vec<Slot>,
    },
    Error {
        name: String,
        message: String,
        #[serde(default)]
        stack: String,
        #[serde(default)]
        cause: Option<Slot>,
    },
    Date {
        /// Milliseconds since the epoch; NaN for an invalid date
        epoch: f64,
    },
    Object {
        /// Constructor name, absent for plain objects
        #[serde(default)]
        constructor: Option<String>,
        properties: Vec<Property>,
    },
}

/// One logged value and every object reachable from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueGraph {
    pub root: Slot,
    #[serde(default)]
    pub objects: Vec<HeapObject>,
}

impl ValueGraph {
    /// A graph holding a single primitive.
    pub fn primitive(root: Slot) -> Self {
        Self {
            root,
            objects: Vec::new(),
        }
    }

    /// An empty graph whose root is filled in by the caller.
    pub fn new() -> Self {
        Self::primitive(Slot::Undefined)
    }

    /// Add an object to the arena and return a slot referring to it.
    pub fn alloc(&mut self, object: HeapObject) -> Slot {
        self.objects.push(object);
        Slot::Ref(self.objects.len() - 1)
    }

    pub fn object(&self, id: ObjectId) -> Option<&HeapObject> {
        self.objects.get(id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut HeapObject> {
        self.objects.get_mut(id)
    }

    /// Append a property to the plain object `id`. Does nothing for other kinds.
    pub fn push_property(&mut self, id: ObjectId, key: &str, value: Slot) {
        if let Some(HeapObject::Object { properties, .. }) = self.objects.get_mut(id) {
            properties.push(Property {
                key: PropertyKey::Name(key.to_string()),
                value,
            });
        }
    }
}

impl Default for ValueGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for an object with named properties.
pub fn object(constructor: Option<&str>, properties: Vec<(&str, Slot)>) -> HeapObject {
    HeapObject::Object {
        constructor: constructor.map(str::to_string),
        properties: properties
            .into_iter()
            .map(|(key, value)| Property {
                key: PropertyKey::Name(key.to_string()),
                value,
            })
            .collect(),
    }
}
