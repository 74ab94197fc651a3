//! Helper modules importable from code blocks.

use rhai::{Array, Dynamic, EvalAltResult, Module, Position, INT};

pub(crate) const JSON: &str = "json";
pub(crate) const TEXT: &str = "text";

/// Runtime error that scripts can catch with `try`/`catch`.
pub(crate) fn script_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(message.into()),
        Position::NONE,
    ))
}

/// Build a helper module by name.
pub(crate) fn build(name: &str) -> Option<Module> {
    match name {
        JSON => Some(json_module()),
        TEXT => Some(text_module()),
        _ => None,
    }
}

fn json_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("parse", |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| script_error(format!("json.parse: {e}")))?;
        rhai::serde::to_dynamic(value)
    });
    module.set_native_fn(
        "stringify",
        |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
            let value: serde_json::Value = rhai::serde::from_dynamic(&value)?;
            serde_json::to_string(&value)
                .map_err(|e| script_error(format!("json.stringify: {e}")))
        },
    );
    module
}

fn text_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("lines", |text: &str| -> Result<Array, Box<EvalAltResult>> {
        Ok(text.lines().map(|l| Dynamic::from(l.to_string())).collect())
    });
    module.set_native_fn("words", |text: &str| -> Result<Array, Box<EvalAltResult>> {
        Ok(text
            .split_whitespace()
            .map(|w| Dynamic::from(w.to_string()))
            .collect())
    });
    module.set_native_fn(
        "truncate",
        |text: &str, max_chars: INT| -> Result<String, Box<EvalAltResult>> {
            let max_chars = usize::try_from(max_chars).unwrap_or(0);
            Ok(text.chars().take(max_chars).collect())
        },
    );
    module
}
