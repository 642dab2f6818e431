//! Built-in `expr` language backed by evalexpr.
//!
//! All `expr` cells of one environment share a variable context, so
//! `total = 6 * 7` in one cell makes `total` visible to later cells.

use std::sync::{Arc, Mutex, PoisonError};

use evalexpr::{HashMapContext, Value};

use super::{EvalContext, Environment, Evaluator};
use crate::error::EvaluationError;
use crate::language::LanguageDefinition;

/// Language id of the built-in expression language.
pub const EXPR_LANGUAGE: &str = "expr";
const EXPR_MODULE: &str = "nova_expr";
const EXPR_EVALUATOR: &str = "evaluate";

/// Registry entry for the `expr` language.
pub fn expr_definition() -> LanguageDefinition {
    LanguageDefinition {
        language_id: EXPR_LANGUAGE.to_string(),
        display_name: "Expressions".to_string(),
        url: None,
        module: EXPR_MODULE.to_string(),
        evaluator: EXPR_EVALUATOR.to_string(),
        keybinding: Some("e".to_string()),
        code_mirror_mode: None,
    }
}

/// Install every built-in evaluator into `env`.
pub fn install(env: &Environment) {
    env.install_evaluator(EXPR_MODULE, EXPR_EVALUATOR, expr_evaluator());
}

fn expr_evaluator() -> Evaluator {
    let context = Arc::new(Mutex::new(HashMapContext::new()));
    Arc::new(move |code: &str, _ctx: &EvalContext| {
        let mut context = context.lock().unwrap_or_else(PoisonError::into_inner);
        evalexpr::eval_with_context_mut(code, &mut *context)
            .map(to_json)
            .map_err(|e| EvaluationError::with_name("ExprError", e.to_string()))
    })
}

fn to_json(value: Value) -> serde_json::Value {
    match value {
        Value::String(s) => serde_json::Value::String(s),
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Int(i) => serde_json::Value::from(i),
        Value::Boolean(b) => serde_json::Value::Bool(b),
        Value::Tuple(values) => serde_json::Value::Array(values.into_iter().map(to_json).collect()),
        Value::Empty => serde_json::Value::Null,
    }
}
