// Helpers for extracting values from KDL nodes.
//
// A setting may be written either as a property (`reconnect max-delay-ms=5000`)
// or as a child node (`reconnect { max-delay-ms 5000 }`); both forms are read.

use kdl::{KdlNode, KdlValue};

use crate::{ConfigError, ConfigResult};

pub(crate) fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn setting<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlValue> {
    if let Some(value) = node.get(name) {
        return Some(value);
    }

    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)?
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

pub(crate) fn string_setting(node: &KdlNode, name: &str) -> ConfigResult<Option<String>> {
    match setting(node, name) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| invalid(name, "expected a string")),
    }
}

pub(crate) fn u64_setting(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    match setting(node, name) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|n| u64::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid(name, "expected a non-negative integer")),
    }
}

pub(crate) fn f64_setting(node: &KdlNode, name: &str) -> ConfigResult<Option<f64>> {
    match setting(node, name) {
        None => Ok(None),
        Some(value) => value
            .as_float()
            .or_else(|| value.as_integer().map(|n| n as f64))
            .map(Some)
            .ok_or_else(|| invalid(name, "expected a number")),
    }
}

pub(crate) fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}
