//! Transformation script evaluation.
//!
//! The model only depends on the [`Evaluator`] trait. [`ExprEvaluator`] is the
//! built-in implementation: a small JavaScript-expression dialect with
//! declarations, operators, and a fixed set of built-ins, evaluated under a
//! step budget.

pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;

use interp::Interpreter;
use parser::{parse_program, Program};
use value::ScriptValue;


/// Named values visible to a script: `self` plus one entry per parameter.
pub type Bindings = serde_json::Map<String, Value>;

/// Default evaluation budget, in expression nodes visited.
pub const DEFAULT_STEP_LIMIT: u64 = 100_000;


#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("syntax error at offset {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("{0} is not defined")]
    Reference(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("evaluation exceeded {0} steps")]
    StepLimitExceeded(u64),

    #[error("script produced a non-JSON result: {0}")]
    NonJsonResult(String),

    #[error("{0}")]
    Failed(String),
}

impl ScriptError {
    pub fn parse(pos: usize, message: impl Into<String>) -> Self {
        ScriptError::Parse { pos, message: message.into() }
    }
}


/// Evaluates a transformation's implementation text against bindings.
///
/// Implementations must be deterministic for equal inputs; the transform
/// engine memoizes results.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expression: &str, bindings: &Bindings) -> Result<Value, ScriptError>;
}


/// Built-in expression evaluator with a parse cache.
pub struct ExprEvaluator {
    step_limit: u64,
    programs: Mutex<HashMap<String, Arc<Program>>>,
}

impl ExprEvaluator {
    pub fn new(step_limit: u64) -> Self {
        ExprEvaluator {
            step_limit,
            programs: Mutex::new(HashMap::new()),
        }
    }

    pub fn step_limit(&self) -> u64 {
        self.step_limit
    }

    fn program(&self, source: &str) -> Result<Arc<Program>, ScriptError> {
        let mut programs = self
            .programs
            .lock()
            .map_err(|_| ScriptError::Failed("parse cache poisoned".into()))?;
        if let Some(p) = programs.get(source) {
            return Ok(Arc::clone(p));
        }
        let parsed = Arc::new(parse_program(source)?);
        programs.insert(source.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }
}

impl Default for ExprEvaluator {
    fn default() -> Self {
        ExprEvaluator::new(DEFAULT_STEP_LIMIT)
    }
}

impl Evaluator for ExprEvaluator {
    fn evaluate(&self, expression: &str, bindings: &Bindings) -> Result<Value, ScriptError> {
        let program = self.program(expression)?;
        let globals: HashMap<String, ScriptValue> = bindings
            .iter()
            .map(|(k, v)| (k.clone(), ScriptValue::from_json(v)))
            .collect();
        let result = Interpreter::new(&globals, self.step_limit).run(&program)?;
        result.to_json()
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(pairs: &[(&str, Value)]) -> Bindings {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn sums_parameters_to_integer() {
        let ev = ExprEvaluator::default();
        let b = bindings(&[("north", json!(120000)), ("south", json!(290000))]);
        assert_eq!(ev.evaluate("north + south", &b).unwrap(), json!(410000));
    }

    #[test]
    fn formats_self_as_currency() {
        let ev = ExprEvaluator::default();
        let b = bindings(&[("self", json!(65000))]);
        assert_eq!(ev.evaluate("\"$\" + self + \".00\"", &b).unwrap(), json!("$65000.00"));
    }

    #[test]
    fn object_results_are_json() {
        let ev = ExprEvaluator::default();
        let b = bindings(&[("self", json!({"a": 2}))]);
        assert_eq!(
            ev.evaluate("({doubled: self.a * 2, label: 'x'})", &b).unwrap(),
            json!({"doubled": 4, "label": "x"})
        );
    }

    #[test]
    fn undefined_result_is_an_error() {
        let ev = ExprEvaluator::default();
        let err = ev.evaluate("self", &Bindings::new()).unwrap_err();
        assert!(matches!(err, ScriptError::NonJsonResult(_)));
    }

    #[test]
    fn parse_errors_surface() {
        let ev = ExprEvaluator::default();
        assert!(matches!(ev.evaluate("1 +", &Bindings::new()), Err(ScriptError::Parse { .. })));
    }

    #[test]
    fn parsed_programs_are_cached() {
        let ev = ExprEvaluator::default();
        let b = bindings(&[("x", json!(1))]);
        ev.evaluate("x + 1", &b).unwrap();
        ev.evaluate("x + 1", &bindings(&[("x", json!(5))])).unwrap();
        assert_eq!(ev.programs.lock().unwrap().len(), 1);
    }

    #[test]
    fn deep_expressions_fail_on_a_worker_sized_stack() {
        let worker = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let ev = ExprEvaluator::default();
                let deep = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
                let deep_result = ev.evaluate(&deep, &Bindings::new());
                let tall = vec!["x"; super::parser::MAX_TREE_HEIGHT].join(" + ");
                let tall_result = ev.evaluate(&tall, &bindings(&[("x", json!(1))]));
                (deep_result, tall_result)
            })
            .unwrap();
        let (deep, tall) = worker.join().unwrap();
        assert!(matches!(deep, Err(ScriptError::Parse { .. })));
        assert_eq!(tall.unwrap(), json!(super::parser::MAX_TREE_HEIGHT));
    }

    #[test]
    fn step_limit_applies_per_evaluation() {
        let ev = ExprEvaluator::new(5);
        let err = ev.evaluate("1 + 2 + 3 + 4 + 5 + 6", &Bindings::new()).unwrap_err();
        assert!(matches!(err, ScriptError::StepLimitExceeded(5)));
        assert_eq!(ev.evaluate("1", &Bindings::new()).unwrap(), json!(1));
    }
}
