//! Tree-walking interpreter for parsed transformation programs.
//!
//! Every node visit costs one step; a program that exceeds its step budget
//! fails with `StepLimitExceeded` instead of blocking the model lock.

use std::collections::{BTreeMap, HashMap};

use super::parser::{BinaryOp, Expr, LogicalOp, Program, UnaryOp};
use super::value::{format_number, string_to_number, ScriptValue};
use super::ScriptError;


/// Global namespaces exposed to programs.
const GLOBAL_NAMESPACES: &[&str] = &["Math", "JSON"];

/// Global functions callable by bare name.
const GLOBAL_FUNCTIONS: &[&str] = &[
    "Number", "String", "Boolean", "parseInt", "parseFloat", "isNaN",
];


pub struct Interpreter<'a> {
    globals: &'a HashMap<String, ScriptValue>,
    locals: HashMap<String, ScriptValue>,
    steps_left: u64,
    step_limit: u64,
}

/// A callee resolved from a call expression's target.
enum Callee {
    Global(String),
    Method(ScriptValue, String),
}

impl<'a> Interpreter<'a> {
    pub fn new(globals: &'a HashMap<String, ScriptValue>, step_limit: u64) -> Self {
        Interpreter {
            globals,
            locals: HashMap::new(),
            steps_left: step_limit,
            step_limit,
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<ScriptValue, ScriptError> {
        for decl in &program.declarations {
            let value = self.eval(&decl.init)?;
            self.locals.insert(decl.name.clone(), value);
        }
        self.eval(&program.result)
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        if self.steps_left == 0 {
            return Err(ScriptError::StepLimitExceeded(self.step_limit));
        }
        self.steps_left -= 1;
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<ScriptValue, ScriptError> {
        self.tick()?;
        match expr {
            Expr::Number(n) => Ok(ScriptValue::Number(*n)),
            Expr::Str(s) => Ok(ScriptValue::Str(s.clone())),
            Expr::Bool(b) => Ok(ScriptValue::Bool(*b)),
            Expr::Null => Ok(ScriptValue::Null),
            Expr::Undefined => Ok(ScriptValue::Undefined),
            Expr::Ident(name) => self.lookup(name),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(ScriptValue::Array(out))
            }
            Expr::Object(entries) => {
                let mut out = BTreeMap::new();
                for (key, value) in entries {
                    let v = self.eval(value)?;
                    out.insert(key.clone(), v);
                }
                Ok(ScriptValue::Object(out))
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Neg => ScriptValue::Number(-v.to_number()),
                    UnaryOp::Plus => ScriptValue::Number(v.to_number()),
                    UnaryOp::Not => ScriptValue::Bool(!v.truthy()),
                    UnaryOp::TypeOf => ScriptValue::Str(v.type_name().to_string()),
                })
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                Ok(binary(*op, &a, &b))
            }
            Expr::Logical(op, lhs, rhs) => {
                let a = self.eval(lhs)?;
                let short_circuit = match op {
                    LogicalOp::And => !a.truthy(),
                    LogicalOp::Or => a.truthy(),
                    LogicalOp::Nullish => !a.is_nullish(),
                };
                if short_circuit {
                    Ok(a)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Conditional(cond, then, otherwise) => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Member(object, property) => {
                if let Expr::Ident(ns) = object.as_ref() {
                    if self.is_global_namespace(ns) {
                        let key = self.eval(property)?.to_js_string();
                        return global_constant(ns, &key);
                    }
                }
                let target = self.eval(object)?;
                let key = self.eval(property)?;
                member(&target, &key)
            }
            Expr::Call(callee, args) => {
                let callee = self.resolve_callee(callee)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                match callee {
                    Callee::Global(name) => call_global(&name, &values),
                    Callee::Method(receiver, name) => call_method(&receiver, &name, &values),
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<ScriptValue, ScriptError> {
        if let Some(v) = self.locals.get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        match name {
            // Unbound `self` means the transformation's own path has no raw value.
            "self" => Ok(ScriptValue::Undefined),
            "NaN" => Ok(ScriptValue::Number(f64::NAN)),
            "Infinity" => Ok(ScriptValue::Number(f64::INFINITY)),
            _ => Err(ScriptError::Reference(name.to_string())),
        }
    }

    fn is_global_namespace(&self, name: &str) -> bool {
        GLOBAL_NAMESPACES.contains(&name)
            && !self.locals.contains_key(name)
            && !self.globals.contains_key(name)
    }

    fn resolve_callee(&mut self, callee: &Expr) -> Result<Callee, ScriptError> {
        match callee {
            Expr::Ident(name)
                if GLOBAL_FUNCTIONS.contains(&name.as_str())
                    && !self.locals.contains_key(name)
                    && !self.globals.contains_key(name) =>
            {
                Ok(Callee::Global(name.clone()))
            }
            Expr::Member(object, property) => {
                if let Expr::Ident(ns) = object.as_ref() {
                    if self.is_global_namespace(ns) {
                        let method = self.eval(property)?.to_js_string();
                        return Ok(Callee::Global(format!("{}.{}", ns, method)));
                    }
                }
                let receiver = self.eval(object)?;
                let method = self.eval(property)?.to_js_string();
                Ok(Callee::Method(receiver, method))
            }
            other => {
                let v = self.eval(other)?;
                Err(ScriptError::Type(format!("{} is not a function", v.to_js_string())))
            }
        }
    }
}


// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn binary(op: BinaryOp, a: &ScriptValue, b: &ScriptValue) -> ScriptValue {
    use ScriptValue::{Bool, Number, Str};
    match op {
        BinaryOp::Add => {
            let a_prim = to_primitive(a);
            let b_prim = to_primitive(b);
            if matches!(a_prim, Str(_)) || matches!(b_prim, Str(_)) {
                Str(format!("{}{}", a_prim.to_js_string(), b_prim.to_js_string()))
            } else {
                Number(a_prim.to_number() + b_prim.to_number())
            }
        }
        BinaryOp::Sub => Number(a.to_number() - b.to_number()),
        BinaryOp::Mul => Number(a.to_number() * b.to_number()),
        BinaryOp::Div => Number(a.to_number() / b.to_number()),
        BinaryOp::Rem => Number(a.to_number() % b.to_number()),
        BinaryOp::Lt => Bool(compare(a, b, |o| o == std::cmp::Ordering::Less)),
        BinaryOp::LtEq => Bool(compare(a, b, |o| o != std::cmp::Ordering::Greater)),
        BinaryOp::Gt => Bool(compare(a, b, |o| o == std::cmp::Ordering::Greater)),
        BinaryOp::GtEq => Bool(compare(a, b, |o| o != std::cmp::Ordering::Less)),
        BinaryOp::LooseEq => Bool(a.loose_eq(b)),
        BinaryOp::LooseNotEq => Bool(!a.loose_eq(b)),
        BinaryOp::StrictEq => Bool(a.strict_eq(b)),
        BinaryOp::StrictNotEq => Bool(!a.strict_eq(b)),
    }
}

/// Composites turn into their string form before `+` and comparisons.
fn to_primitive(v: &ScriptValue) -> ScriptValue {
    match v {
        ScriptValue::Array(_) | ScriptValue::Object(_) => ScriptValue::Str(v.to_js_string()),
        other => other.clone(),
    }
}

/// Relational comparison: strings compare lexically, everything else
/// numerically; any NaN makes the comparison false.
fn compare(a: &ScriptValue, b: &ScriptValue, pred: fn(std::cmp::Ordering) -> bool) -> bool {
    let a = to_primitive(a);
    let b = to_primitive(b);
    if let (ScriptValue::Str(x), ScriptValue::Str(y)) = (&a, &b) {
        return pred(x.cmp(y));
    }
    match a.to_number().partial_cmp(&b.to_number()) {
        Some(ordering) => pred(ordering),
        None => false,
    }
}


// ---------------------------------------------------------------------------
// Member access
// ---------------------------------------------------------------------------

fn member(target: &ScriptValue, key: &ScriptValue) -> Result<ScriptValue, ScriptError> {
    let name = key.to_js_string();
    match target {
        ScriptValue::Undefined | ScriptValue::Null => Err(ScriptError::Type(format!(
            "cannot read property '{}' of {}",
            name,
            target.to_js_string()
        ))),
        ScriptValue::Object(map) => Ok(map.get(&name).cloned().unwrap_or(ScriptValue::Undefined)),
        ScriptValue::Array(items) => {
            if name == "length" {
                return Ok(ScriptValue::Number(items.len() as f64));
            }
            Ok(array_index(&name)
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(ScriptValue::Undefined))
        }
        ScriptValue::Str(s) => {
            if name == "length" {
                return Ok(ScriptValue::Number(s.chars().count() as f64));
            }
            Ok(array_index(&name)
                .and_then(|i| s.chars().nth(i))
                .map(|c| ScriptValue::Str(c.to_string()))
                .unwrap_or(ScriptValue::Undefined))
        }
        ScriptValue::Bool(_) | ScriptValue::Number(_) => Ok(ScriptValue::Undefined),
    }
}

fn array_index(name: &str) -> Option<usize> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    name.parse::<usize>().ok()
}


// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

fn global_constant(ns: &str, key: &str) -> Result<ScriptValue, ScriptError> {
    match (ns, key) {
        ("Math", "PI") => Ok(ScriptValue::Number(std::f64::consts::PI)),
        ("Math", "E") => Ok(ScriptValue::Number(std::f64::consts::E)),
        _ => Ok(ScriptValue::Undefined),
    }
}

fn arg(args: &[ScriptValue], i: usize) -> ScriptValue {
    args.get(i).cloned().unwrap_or(ScriptValue::Undefined)
}

fn num_arg(args: &[ScriptValue], i: usize) -> f64 {
    arg(args, i).to_number()
}

fn call_global(name: &str, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
    use ScriptValue::{Bool, Number, Str};
    let value = match name {
        "Math.abs" => Number(num_arg(args, 0).abs()),
        "Math.ceil" => Number(num_arg(args, 0).ceil()),
        "Math.floor" => Number(num_arg(args, 0).floor()),
        // JavaScript rounds halves toward +Infinity.
        "Math.round" => Number((num_arg(args, 0) + 0.5).floor()),
        "Math.sqrt" => Number(num_arg(args, 0).sqrt()),
        "Math.pow" => Number(num_arg(args, 0).powf(num_arg(args, 1))),
        "Math.min" => Number(fold_numbers(args, f64::INFINITY, f64::min)),
        "Math.max" => Number(fold_numbers(args, f64::NEG_INFINITY, f64::max)),
        "Number" => Number(if args.is_empty() { 0.0 } else { num_arg(args, 0) }),
        "String" => Str(if args.is_empty() { String::new() } else { arg(args, 0).to_js_string() }),
        "Boolean" => Bool(arg(args, 0).truthy()),
        "isNaN" => Bool(num_arg(args, 0).is_nan()),
        "parseFloat" => Number(parse_float_prefix(&arg(args, 0).to_js_string())),
        "parseInt" => Number(parse_int_prefix(&arg(args, 0).to_js_string())),
        "JSON.stringify" => {
            let v = arg(args, 0);
            match v.to_json() {
                Ok(json) => Str(serde_json::to_string(&json).map_err(|e| ScriptError::Type(e.to_string()))?),
                Err(_) => ScriptValue::Undefined,
            }
        }
        "JSON.parse" => {
            let text = arg(args, 0).to_js_string();
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| ScriptError::Type(format!("JSON.parse: {}", e)))?;
            ScriptValue::from_json(&json)
        }
        other => return Err(ScriptError::Type(format!("{} is not a function", other))),
    };
    Ok(value)
}

fn fold_numbers(args: &[ScriptValue], init: f64, f: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for a in args {
        let n = a.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = f(acc, n);
    }
    acc
}

fn call_method(receiver: &ScriptValue, name: &str, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
    use ScriptValue::{Bool, Number, Str};
    let value = match (receiver, name) {
        (Str(s), "toUpperCase") => Str(s.to_uppercase()),
        (Str(s), "toLowerCase") => Str(s.to_lowercase()),
        (Str(s), "trim") => Str(s.trim().to_string()),
        (Str(s), "includes") => Bool(s.contains(&arg(args, 0).to_js_string())),
        (Str(s), "startsWith") => Bool(s.starts_with(&arg(args, 0).to_js_string())),
        (Str(s), "endsWith") => Bool(s.ends_with(&arg(args, 0).to_js_string())),
        (Str(s), "indexOf") => Number(
            s.find(&arg(args, 0).to_js_string())
                .map(|byte| s[..byte].chars().count() as f64)
                .unwrap_or(-1.0),
        ),
        (Number(n), "toFixed") => {
            let digits = num_arg(args, 0);
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            Str(format!("{:.*}", digits, n))
        }
        (Number(n), "toString") => Str(format_number(*n)),
        (ScriptValue::Array(items), "includes") => {
            let needle = arg(args, 0);
            let needle_is_nan = matches!(needle, Number(x) if x.is_nan());
            Bool(items
                .iter()
                .any(|v| v.strict_eq(&needle) || (needle_is_nan && matches!(v, Number(x) if x.is_nan()))))
        }
        (ScriptValue::Array(items), "indexOf") => {
            let needle = arg(args, 0);
            Number(items.iter().position(|v| v.strict_eq(&needle)).map(|i| i as f64).unwrap_or(-1.0))
        }
        (ScriptValue::Array(items), "join") => {
            let sep = match arg(args, 0) {
                ScriptValue::Undefined => ",".to_string(),
                other => other.to_js_string(),
            };
            Str(items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                .collect::<Vec<_>>()
                .join(&sep))
        }
        (v, "toString") => Str(v.to_js_string()),
        (v, method) => {
            return Err(ScriptError::Type(format!(
                "{}.{} is not a function",
                v.type_name(),
                method
            )))
        }
    };
    Ok(value)
}

/// Longest numeric prefix, as `parseFloat` reads it.
fn parse_float_prefix(s: &str) -> f64 {
    let t = s.trim_start();
    let numeric_len = t
        .bytes()
        .take_while(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
        .count();
    (1..=numeric_len)
        .rev()
        .find_map(|i| t[..i].parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Leading optionally-signed decimal integer, as `parseInt(s, 10)` reads it.
fn parse_int_prefix(s: &str) -> f64 {
    let t = s.trim_start();
    let (sign, digits) = match t.as_bytes().first() {
        Some(b'-') => (-1.0, &t[1..]),
        Some(b'+') => (1.0, &t[1..]),
        _ => (1.0, t),
    };
    let len = digits.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return f64::NAN;
    }
    sign * string_to_number(&digits[..len])
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;

    fn run_with(src: &str, globals: &[(&str, ScriptValue)]) -> Result<ScriptValue, ScriptError> {
        let globals: HashMap<String, ScriptValue> =
            globals.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let program = parse_program(src).unwrap();
        Interpreter::new(&globals, 10_000).run(&program)
    }

    fn run(src: &str) -> ScriptValue {
        run_with(src, &[]).unwrap()
    }

    fn n(v: f64) -> ScriptValue {
        ScriptValue::Number(v)
    }

    fn s(v: &str) -> ScriptValue {
        ScriptValue::Str(v.to_string())
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run("1 + 2 * 3"), n(7.0));
        assert_eq!(run("(1 + 2) * 3"), n(9.0));
        assert_eq!(run("7 % 4"), n(3.0));
        assert_eq!(run("-2 - -3"), n(1.0));
    }

    #[test]
    fn string_concatenation_with_numbers() {
        assert_eq!(
            run_with("\"$\" + self + \".00\"", &[("self", n(65000.0))]).unwrap(),
            s("$65000.00")
        );
        assert_eq!(run("1 + 2 + 'x'"), s("3x"));
        assert_eq!(run("'x' + 1 + 2"), s("x12"));
    }

    #[test]
    fn unbound_self_is_undefined() {
        assert_eq!(run("typeof self"), s("undefined"));
        assert_eq!(run("self ?? 0"), n(0.0));
    }

    #[test]
    fn unknown_identifier_is_reference_error() {
        match run_with("north + 1", &[]) {
            Err(ScriptError::Reference(name)) => assert_eq!(name, "north"),
            other => panic!("expected Reference error, got {:?}", other),
        }
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(run("3 > 2 && 2 >= 2"), ScriptValue::Bool(true));
        assert_eq!(run("'b' > 'a'"), ScriptValue::Bool(true));
        assert_eq!(run("0 || 'fallback'"), s("fallback"));
        assert_eq!(run("1 == '1'"), ScriptValue::Bool(true));
        assert_eq!(run("1 === '1'"), ScriptValue::Bool(false));
        assert_eq!(run("null ?? 5"), n(5.0));
        assert_eq!(run("0 ?? 5"), n(0.0));
    }

    #[test]
    fn short_circuit_skips_errors() {
        assert_eq!(run("false && missing"), ScriptValue::Bool(false));
        assert_eq!(run("true ? 1 : missing"), n(1.0));
    }

    #[test]
    fn member_access() {
        let obj = ScriptValue::from_json(&serde_json::json!({"north": 10, "list": [1, 2, 3]}));
        assert_eq!(run_with("self.north", &[("self", obj.clone())]).unwrap(), n(10.0));
        assert_eq!(run_with("self['list'][1]", &[("self", obj.clone())]).unwrap(), n(2.0));
        assert_eq!(run_with("self.list.length", &[("self", obj.clone())]).unwrap(), n(3.0));
        assert_eq!(run_with("self.missing", &[("self", obj)]).unwrap(), ScriptValue::Undefined);
        assert_eq!(run("'abc'.length"), n(3.0));
    }

    #[test]
    fn member_of_null_is_type_error() {
        assert!(matches!(
            run_with("self.x", &[("self", ScriptValue::Null)]),
            Err(ScriptError::Type(_))
        ));
    }

    #[test]
    fn math_builtins() {
        assert_eq!(run("Math.round(2.5)"), n(3.0));
        assert_eq!(run("Math.round(-2.5)"), n(-2.0));
        assert_eq!(run("Math.max(1, 7, 3)"), n(7.0));
        assert_eq!(run("Math.min()"), n(f64::INFINITY));
        assert_eq!(run("Math.pow(2, 10)"), n(1024.0));
        assert_eq!(run("Math.floor(Math.PI)"), n(3.0));
    }

    #[test]
    fn conversion_builtins() {
        assert_eq!(run("Number('42')"), n(42.0));
        assert_eq!(run("String(5) + 1"), s("51"));
        assert_eq!(run("parseInt('12px')"), n(12.0));
        assert_eq!(run("parseFloat('3.5kg')"), n(3.5));
        assert_eq!(run("isNaN('abc')"), ScriptValue::Bool(true));
        assert_eq!(run("Boolean('')"), ScriptValue::Bool(false));
    }

    #[test]
    fn json_builtins() {
        assert_eq!(run("JSON.stringify({a: 1, b: [true, null]})"), s("{\"a\":1,\"b\":[true,null]}"));
        assert_eq!(run("JSON.parse('{\"x\": 2}').x"), n(2.0));
        assert!(run_with("JSON.parse('{')", &[]).is_err());
    }

    #[test]
    fn string_and_array_methods() {
        assert_eq!(run("'Gator'.toUpperCase()"), s("GATOR"));
        assert_eq!(run("'  x '.trim()"), s("x"));
        assert_eq!(run("'sales/north'.startsWith('sales')"), ScriptValue::Bool(true));
        assert_eq!(run("[1, 2, 3].join('-')"), s("1-2-3"));
        assert_eq!(run("[1, 2, 3].includes(2)"), ScriptValue::Bool(true));
        assert_eq!(run("['a', 'b'].indexOf('b')"), n(1.0));
        assert_eq!(run("(1234.5678).toFixed(2)"), s("1234.57"));
    }

    #[test]
    fn unknown_method_is_type_error() {
        assert!(matches!(run_with("'x'.frobnicate()", &[]), Err(ScriptError::Type(_))));
        assert!(matches!(run_with("nosuch(1)", &[]), Err(ScriptError::Reference(_))));
    }

    #[test]
    fn declarations_are_visible_later() {
        assert_eq!(run("let a = 2; let b = a * 3; return a + b;"), n(8.0));
    }

    #[test]
    fn bindings_shadow_builtins() {
        let math = ScriptValue::from_json(&serde_json::json!({"round": 1}));
        assert_eq!(run_with("Math.round", &[("Math", math)]).unwrap(), n(1.0));
    }

    #[test]
    fn step_limit_is_enforced() {
        let globals = HashMap::new();
        let src = (0..200).map(|i| i.to_string()).collect::<Vec<_>>().join(" + ");
        let program = parse_program(&src).unwrap();
        match Interpreter::new(&globals, 50).run(&program) {
            Err(ScriptError::StepLimitExceeded(limit)) => assert_eq!(limit, 50),
            other => panic!("expected StepLimitExceeded, got {:?}", other),
        }
    }
}
