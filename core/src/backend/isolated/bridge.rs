//! QuickJS values as [`Inspectable`].
//!
//! Every fallible read clears the pending exception it leaves on the
//! context, so inspection never leaks an error into user code.

use rquickjs::{CaughtError, CaughtResult, CatchResultExt, Coerced, Ctx, Object, Type, Value};

use crate::inspect::{self, format_error, Inspectable, PromiseState, ValueKind};

impl<'js> Inspectable for Value<'js> {
    fn kind(&self) -> ValueKind {
        match self.type_of() {
            Type::Uninitialized | Type::Undefined => ValueKind::Undefined,
            Type::Null => ValueKind::Null,
            Type::Bool => ValueKind::Bool(self.as_bool().unwrap_or(false)),
            Type::Int | Type::Float => ValueKind::Number(self.as_number().unwrap_or(f64::NAN)),
            Type::BigInt => ValueKind::BigInt(
                caught(self.ctx(), self.get::<Coerced<String>>())
                    .map(|digits| digits.0)
                    .unwrap_or_default(),
            ),
            Type::String => ValueKind::String(
                self.as_string()
                    .and_then(|s| s.to_string().ok())
                    .unwrap_or_default(),
            ),
            Type::Symbol => ValueKind::Symbol(
                self.as_symbol()
                    .and_then(|symbol| caught(self.ctx(), symbol.description()).ok())
                    .and_then(|description| description.as_string().and_then(|s| s.to_string().ok())),
            ),
            Type::Function | Type::Constructor => ValueKind::Function(string_property(self, "name")),
            Type::Exception => ValueKind::Error {
                name: string_property(self, "name").unwrap_or_default(),
                message: string_property(self, "message").unwrap_or_default(),
            },
            Type::Promise => ValueKind::Promise(promise_state(self)),
            Type::Array => ValueKind::Array(self.as_array().map(|array| array.len()).unwrap_or(0)),
            _ if self.is_object() => ValueKind::Object,
            _ => ValueKind::Undefined,
        }
    }

    fn same_reference(&self, other: &Self) -> bool {
        self == other
    }

    fn constructor_name(&self) -> Option<String> {
        let object = self.as_object()?;
        let constructor: Object = caught(self.ctx(), object.get::<_, Option<Object>>("constructor"))
            .ok()
            .flatten()?;
        caught(self.ctx(), constructor.get::<_, Option<String>>("name"))
            .ok()
            .flatten()
            .filter(|name| !name.is_empty())
    }

    fn own_keys(&self) -> Vec<String> {
        let Some(object) = self.as_object() else {
            return Vec::new();
        };
        object
            .keys::<String>()
            .filter_map(|key| caught(self.ctx(), key).ok())
            .collect()
    }

    fn prototype(&self) -> Option<Self> {
        let proto = self.as_object()?.get_prototype()?;
        // Object.prototype itself carries nothing worth showing
        proto.get_prototype()?;
        Some(proto.into_value())
    }

    fn property(&self, key: &str) -> Result<Option<Self>, String> {
        let Some(object) = self.as_object() else {
            return Ok(None);
        };
        if !caught(self.ctx(), object.contains_key(key)).map_err(|e| describe_caught(&e))? {
            return Ok(None);
        }
        caught(self.ctx(), object.get::<_, Value>(key))
            .map(Some)
            .map_err(|e| describe_caught(&e))
    }
}

fn caught<'js, T>(ctx: &Ctx<'js>, result: rquickjs::Result<T>) -> CaughtResult<'js, T> {
    result.catch(ctx)
}

fn string_property(value: &Value<'_>, key: &str) -> Option<String> {
    let object = value.as_object()?;
    caught(value.ctx(), object.get::<_, Option<String>>(key)).ok().flatten()
}

fn promise_state(value: &Value<'_>) -> PromiseState {
    let Some(promise) = value.as_promise() else {
        return PromiseState::Pending;
    };
    match promise.result::<Value>() {
        None => PromiseState::Pending,
        Some(Ok(_)) => PromiseState::Fulfilled,
        Some(Err(error)) => {
            // Reading a rejection rethrows it; swallow it again
            let _ = caught(value.ctx(), Err::<(), _>(error));
            PromiseState::Rejected
        }
    }
}

/// `Kind: message` for a caught throw. Non-error throws are shown through
/// the inspector.
pub(super) fn describe_caught(error: &CaughtError<'_>) -> String {
    match error {
        CaughtError::Exception(exception) => {
            let object = exception.as_object();
            let name = caught(object.ctx(), object.get::<_, Option<String>>("name"))
                .ok()
                .flatten()
                .unwrap_or_default();
            format_error(&name, &exception.message().unwrap_or_default())
        }
        CaughtError::Value(value) => format!("Uncaught: {}", inspect::inspect(value)),
        CaughtError::Error(error) => error.to_string(),
    }
}
