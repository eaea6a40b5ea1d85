//! REPL-style rendering used by the CLI.

use std::fmt::{self, Display, Write};

use super::{SerializedValue, DEFAULT_OBJECT_NAME};

impl Display for SerializedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Top-level strings print bare, like console.log
            SerializedValue::String(s) => f.write_str(s),
            other => other.render(f),
        }
    }
}

impl SerializedValue {
    fn render<W: Write>(&self, out: &mut W) -> fmt::Result {
        match self {
            SerializedValue::Null => out.write_str("null"),
            SerializedValue::Bool(b) => write!(out, "{b}"),
            SerializedValue::Number(n) => write_number(out, *n),
            SerializedValue::Decimal(text) => out.write_str(text),
            SerializedValue::String(s) => write!(out, "'{}'", s.replace('\'', "\\'")),
            SerializedValue::Undefined => out.write_str("undefined"),
            SerializedValue::Function { name } => write!(out, "[Function: {name}]"),
            SerializedValue::Symbol { description } => write!(out, "Symbol({description})"),
            SerializedValue::Circular { name } => write!(out, "[Circular *{name}]"),
            SerializedValue::MaxDepth => out.write_str("[MaxDepth]"),
            SerializedValue::Truncated { count } => write!(out, "... {count} more items"),
            SerializedValue::Error { message } => out.write_str(message),
            SerializedValue::Promise { state } => write!(out, "Promise {{ <{}> }}", state.as_str()),
            SerializedValue::Array { items, .. } => {
                if items.is_empty() {
                    return out.write_str("[]");
                }
                out.write_str("[ ")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        out.write_str(", ")?;
                    }
                    item.render(out)?;
                }
                out.write_str(" ]")
            }
            SerializedValue::Object { name, props } => {
                if name != DEFAULT_OBJECT_NAME {
                    write!(out, "{name} ")?;
                }
                if props.is_empty() {
                    return out.write_str("{}");
                }
                out.write_str("{ ")?;
                for (index, (key, value)) in props.iter().enumerate() {
                    if index > 0 {
                        out.write_str(", ")?;
                    }
                    write!(out, "{key}: ")?;
                    value.render(out)?;
                }
                out.write_str(" }")
            }
        }
    }
}

fn write_number<W: Write>(out: &mut W, n: f64) -> fmt::Result {
    if n.is_nan() {
        out.write_str("NaN")
    } else if n.is_infinite() {
        out.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        write!(out, "{n:.0}")
    } else {
        write!(out, "{n}")
    }
}
