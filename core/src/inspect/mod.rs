//! # Value Inspector
//!
//! Turns arbitrary runtime values into a [`SerializedValue`]: a JSON-safe,
//! cycle-free, depth-bounded tree.
//!
//! ## Rules (in priority order)
//!
//! 1. Deeper than [`MAX_DEPTH`] → `MaxDepth`
//! 2. Primitives map to themselves; non-integral finite numbers keep their
//!    decimal text (`Decimal`)
//! 3. Functions, symbols, errors and promises are leaves
//! 4. A reference already on the current path → `Circular`
//! 5. Arrays keep [`MAX_ARRAY_ITEMS`] items plus a `Truncated` marker
//! 6. Recognized audio objects read a curated property list ([`audio`])
//! 7. Other objects use own enumerable keys, then inherited keys, then the
//!    prototype under [`PROTOTYPE_KEY`] when that carries more
//!
//! Engines plug in by implementing [`Inspectable`], a closed view over a
//! small fixed set of value kinds.

pub mod audio;
mod display;
mod wire;


use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Nesting deeper than this is replaced by `MaxDepth`.
pub const MAX_DEPTH: usize = 10;

/// Array items kept before the `Truncated` marker.
pub const MAX_ARRAY_ITEMS: usize = 100;

/// Reserved property holding the prototype's data.
pub const PROTOTYPE_KEY: &str = "[[Prototype]]";

pub const DEFAULT_OBJECT_NAME: &str = "Object";

const ANONYMOUS_FUNCTION: &str = "anonymous";

/* ===================== Value tree ===================== */

#[derive(Debug, Clone, PartialEq)]
pub enum SerializedValue {
    Null,
    Bool(bool),
    /// Integers and non-finite numbers
    Number(f64),
    /// Finite non-integral numbers, kept as their decimal text
    Decimal(String),
    String(String),
    Undefined,
    Function { name: String },
    Symbol { description: String },
    Circular { name: String },
    MaxDepth,
    Truncated { count: usize },
    Error { message: String },
    Promise { state: PromiseState },
    Array { length: usize, items: Vec<SerializedValue> },
    Object { name: String, props: IndexMap<String, SerializedValue> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

impl PromiseState {
    pub fn as_str(self) -> &'static str {
        match self {
            PromiseState::Pending => "pending",
            PromiseState::Fulfilled => "fulfilled",
            PromiseState::Rejected => "rejected",
        }
    }
}

impl SerializedValue {
    /// Placeholder used where reading a value failed.
    pub fn unserializable(reason: impl AsRef<str>) -> Self {
        SerializedValue::String(format!("[Unserializable: {}]", reason.as_ref()))
    }

    /// Classify a JavaScript number.
    pub fn from_number(value: f64) -> Self {
        if !value.is_finite() || value.fract() == 0.0 {
            SerializedValue::Number(value)
        } else {
            SerializedValue::Decimal(js_number_text(value))
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, SerializedValue::Undefined)
    }
}

/// Decimal text the way JavaScript prints a finite non-integral number.
fn js_number_text(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-6..1e21).contains(&magnitude) {
        format!("{value:e}")
    } else {
        value.to_string()
    }
}

/* ===================== Engine view ===================== */

/// The closed set of value kinds the inspector distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Arbitrary-precision integer, as decimal digits
    BigInt(String),
    String(String),
    Symbol(Option<String>),
    Function(Option<String>),
    Error { name: String, message: String },
    Promise(PromiseState),
    Array(usize),
    Object,
}

/// Read-only view of a runtime value.
///
/// Property reads are fallible because engines run accessors; a failed read
/// becomes an `[Unserializable: ...]` placeholder rather than an error.
pub trait Inspectable: Clone {
    fn kind(&self) -> ValueKind;

    /// Identity comparison for objects.
    fn same_reference(&self, other: &Self) -> bool;

    fn constructor_name(&self) -> Option<String>;

    /// Own enumerable string keys, in property order.
    fn own_keys(&self) -> Vec<String>;

    /// Prototype, or `None` at the root object prototype.
    fn prototype(&self) -> Option<Self>;

    /// Read a property (array elements use their index as key).
    /// `Ok(None)` means the property does not exist.
    fn property(&self, key: &str) -> Result<Option<Self>, String>;

    /// Enumerable keys found along the prototype chain.
    fn inherited_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let mut current = self.prototype();
        while let Some(proto) = current {
            for key in proto.own_keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            current = proto.prototype();
        }
        keys
    }
}

/* ===================== Inspector ===================== */

/// Serialize `value` into a tagged tree.
pub fn inspect<V: Inspectable>(value: &V) -> SerializedValue {
    Inspector { ancestors: Vec::new() }.visit(value, 0)
}

struct Inspector<V> {
    /// References on the path from the root to the current value
    ancestors: Vec<V>,
}

impl<V: Inspectable> Inspector<V> {
    fn visit(&mut self, value: &V, depth: usize) -> SerializedValue {
        if depth > MAX_DEPTH {
            return SerializedValue::MaxDepth;
        }

        match value.kind() {
            ValueKind::Undefined => SerializedValue::Undefined,
            ValueKind::Null => SerializedValue::Null,
            ValueKind::Bool(b) => SerializedValue::Bool(b),
            ValueKind::Number(n) => SerializedValue::from_number(n),
            ValueKind::BigInt(digits) => SerializedValue::Decimal(digits),
            ValueKind::String(s) => SerializedValue::String(s),
            ValueKind::Symbol(description) => SerializedValue::Symbol {
                description: description.unwrap_or_default(),
            },
            ValueKind::Function(name) => SerializedValue::Function {
                name: name
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| ANONYMOUS_FUNCTION.to_string()),
            },
            ValueKind::Error { name, message } => SerializedValue::Error {
                message: format_error(&name, &message),
            },
            ValueKind::Promise(state) => SerializedValue::Promise { state },
            ValueKind::Array(length) => self.enter(value, |this| this.visit_array(value, length, depth)),
            ValueKind::Object => self.enter(value, |this| this.visit_object(value, depth)),
        }
    }

    /// Run `body` with `value` marked as an ancestor, or emit `Circular`.
    fn enter(&mut self, value: &V, body: impl FnOnce(&mut Self) -> SerializedValue) -> SerializedValue {
        if self.ancestors.iter().any(|seen| seen.same_reference(value)) {
            return SerializedValue::Circular {
                name: value
                    .constructor_name()
                    .unwrap_or_else(|| DEFAULT_OBJECT_NAME.to_string()),
            };
        }
        self.ancestors.push(value.clone());
        let serialized = body(self);
        self.ancestors.pop();
        serialized
    }

    fn visit_array(&mut self, value: &V, length: usize, depth: usize) -> SerializedValue {
        let kept = length.min(MAX_ARRAY_ITEMS);
        let mut items = Vec::with_capacity(kept + 1);
        for index in 0..kept {
            items.push(self.read(value, &index.to_string(), depth));
        }
        if length > MAX_ARRAY_ITEMS {
            items.push(SerializedValue::Truncated {
                count: length - MAX_ARRAY_ITEMS,
            });
        }
        SerializedValue::Array { length, items }
    }

    fn visit_object(&mut self, value: &V, depth: usize) -> SerializedValue {
        let name = value
            .constructor_name()
            .unwrap_or_else(|| DEFAULT_OBJECT_NAME.to_string());

        if let Some(curated) = audio::curated_properties(&name) {
            let props = self.read_all(value, curated.iter().copied(), depth, true);
            if !props.is_empty() {
                return SerializedValue::Object { name, props };
            }
        }

        let mut props = self.read_all(value, value.own_keys(), depth, false);
        if props.is_empty() {
            props = self.read_all(value, value.inherited_keys(), depth, false);
        }

        if let Some(proto) = value.prototype() {
            if let SerializedValue::Object { props: proto_props, .. } = self.visit(&proto, depth + 1) {
                if proto_props.len() > props.len() {
                    props.insert(
                        PROTOTYPE_KEY.to_string(),
                        SerializedValue::Object {
                            name: proto
                                .constructor_name()
                                .unwrap_or_else(|| DEFAULT_OBJECT_NAME.to_string()),
                            props: proto_props,
                        },
                    );
                }
            }
        }

        SerializedValue::Object { name, props }
    }

    fn read_all<K: AsRef<str>>(
        &mut self,
        value: &V,
        keys: impl IntoIterator<Item = K>,
        depth: usize,
        skip_missing: bool,
    ) -> IndexMap<String, SerializedValue> {
        let mut props = IndexMap::new();
        for key in keys {
            let key = key.as_ref();
            if props.contains_key(key) {
                continue;
            }
            let serialized = match value.property(key) {
                Ok(Some(child)) => self.visit(&child, depth + 1),
                Ok(None) if skip_missing => continue,
                Ok(None) => SerializedValue::Undefined,
                Err(reason) => SerializedValue::unserializable(reason),
            };
            props.insert(key.to_string(), serialized);
        }
        props
    }

    fn read(&mut self, value: &V, key: &str, depth: usize) -> SerializedValue {
        match value.property(key) {
            Ok(Some(child)) => self.visit(&child, depth + 1),
            Ok(None) => SerializedValue::Undefined,
            Err(reason) => SerializedValue::unserializable(reason),
        }
    }
}

/// `Kind: message`, or just the message when the error has no name.
pub fn format_error(name: &str, message: &str) -> String {
    match (name.is_empty(), message.is_empty()) {
        (true, _) => message.to_string(),
        (false, true) => name.to_string(),
        (false, false) => format!("{name}: {message}"),
    }
}
