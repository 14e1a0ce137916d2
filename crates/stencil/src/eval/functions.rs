use crate::value::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("want {expected} arguments, got {found}")]
    Arity { expected: &'static str, found: usize },
    #[error("{0}")]
    Invalid(String),
}

/// Functions callable from template pipelines.
///
/// `and` and `or` are listed here so templates naming them compile, but the
/// evaluator short-circuits them itself and never calls these entries.
#[derive(Clone)]
pub struct Functions {
    table: Arc<HashMap<String, Function>>,
}

impl Functions {
    pub fn empty() -> Self {
        Self {
            table: Arc::default(),
        }
    }

    /// The builtin table, built once per process.
    pub fn builtins() -> &'static Functions {
        static BUILTINS: OnceLock<Functions> = OnceLock::new();
        BUILTINS.get_or_init(|| {
            let mut functions = Functions::empty();
            functions
                .register("and", and)
                .register("or", or)
                .register("not", not)
                .register("len", len)
                .register("index", index)
                .register("eq", eq)
                .register("ne", ne)
                .register("lt", |arguments| ordered(arguments, Ordering::is_lt))
                .register("le", |arguments| ordered(arguments, Ordering::is_le))
                .register("gt", |arguments| ordered(arguments, Ordering::is_gt))
                .register("ge", |arguments| ordered(arguments, Ordering::is_ge))
                .register("print", |arguments| Ok(Value::string(sprint(arguments))))
                .register("println", println)
                .register("printf", printf)
                .register("html", |arguments| Ok(Value::string(escape_html(&sprint(arguments)))))
                .register("urlquery", |arguments| Ok(Value::string(escape_query(&sprint(arguments)))));
            functions
        })
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        function: impl Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    ) -> &mut Self {
        Arc::make_mut(&mut self.table).insert(name.into(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.table.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

impl Default for Functions {
    fn default() -> Self {
        Self::builtins().clone()
    }
}

impl fmt::Debug for Functions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_set().entries(names).finish()
    }
}

fn exactly(arguments: &[Value], count: usize, expected: &'static str) -> Result<(), FunctionError> {
    if arguments.len() == count {
        Ok(())
    } else {
        Err(FunctionError::Arity {
            expected,
            found: arguments.len(),
        })
    }
}

fn at_least(arguments: &[Value], count: usize, expected: &'static str) -> Result<(), FunctionError> {
    if arguments.len() >= count {
        Ok(())
    } else {
        Err(FunctionError::Arity {
            expected,
            found: arguments.len(),
        })
    }
}

fn and(arguments: &[Value]) -> Result<Value, FunctionError> {
    at_least(arguments, 1, "at least 1")?;
    Ok(arguments
        .iter()
        .find(|argument| !argument.is_truthy())
        .or(arguments.last())
        .cloned()
        .unwrap_or_default())
}

fn or(arguments: &[Value]) -> Result<Value, FunctionError> {
    at_least(arguments, 1, "at least 1")?;
    Ok(arguments
        .iter()
        .find(|argument| argument.is_truthy())
        .or(arguments.last())
        .cloned()
        .unwrap_or_default())
}

fn not(arguments: &[Value]) -> Result<Value, FunctionError> {
    exactly(arguments, 1, "1")?;
    Ok(Value::Bool(!arguments[0].is_truthy()))
}

fn len(arguments: &[Value]) -> Result<Value, FunctionError> {
    exactly(arguments, 1, "1")?;
    let length = match &arguments[0] {
        Value::String(text) => text.len(),
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.len(),
        other => {
            return Err(FunctionError::Invalid(format!(
                "len of type {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(length as i64))
}

fn index(arguments: &[Value]) -> Result<Value, FunctionError> {
    at_least(arguments, 1, "at least 1")?;
    let mut current = arguments[0].clone();
    for key in &arguments[1..] {
        current = match (&current, key) {
            (Value::List(items), Value::Int(position)) => usize::try_from(*position)
                .ok()
                .and_then(|position| items.get(position))
                .cloned()
                .ok_or_else(|| FunctionError::Invalid(format!("index out of range: {position}")))?,
            (Value::Map(entries), Value::String(key)) => {
                entries.get(&**key).cloned().unwrap_or_default()
            }
            (Value::Null, _) => {
                return Err(FunctionError::Invalid("index of untyped nil".to_owned()));
            }
            (collection, key) => {
                return Err(FunctionError::Invalid(format!(
                    "can't index item of type {} with {}",
                    collection.type_name(),
                    key.type_name()
                )));
            }
        };
    }
    Ok(current)
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, FunctionError> {
    match (left, right) {
        (Value::Int(left), Value::Int(right)) => Ok(left.cmp(right)),
        (Value::String(left), Value::String(right)) => Ok(left.cmp(right)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => left
            .as_f64()
            .zip(right.as_f64())
            .and_then(|(left, right)| left.partial_cmp(&right))
            .ok_or_else(|| FunctionError::Invalid("NaN is not ordered".to_owned())),
        _ => Err(incompatible(left, right)),
    }
}

fn equal(left: &Value, right: &Value) -> Result<bool, FunctionError> {
    match (left, right) {
        (Value::List(_) | Value::Map(_), _) | (_, Value::List(_) | Value::Map(_)) => Err(
            FunctionError::Invalid("non-comparable type".to_owned()),
        ),
        (Value::Null, other) | (other, Value::Null) => Ok(matches!(other, Value::Null)),
        (Value::Bool(left), Value::Bool(right)) => Ok(left == right),
        _ => compare(left, right).map(Ordering::is_eq),
    }
}

fn incompatible(left: &Value, right: &Value) -> FunctionError {
    FunctionError::Invalid(format!(
        "incompatible types for comparison: {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

fn eq(arguments: &[Value]) -> Result<Value, FunctionError> {
    at_least(arguments, 2, "at least 2")?;
    let (first, others) = (&arguments[0], &arguments[1..]);
    for other in others {
        if equal(first, other)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn ne(arguments: &[Value]) -> Result<Value, FunctionError> {
    exactly(arguments, 2, "2")?;
    Ok(Value::Bool(!equal(&arguments[0], &arguments[1])?))
}

fn ordered(arguments: &[Value], accept: fn(Ordering) -> bool) -> Result<Value, FunctionError> {
    exactly(arguments, 2, "2")?;
    compare(&arguments[0], &arguments[1]).map(|ordering| Value::Bool(accept(ordering)))
}

/// Concatenates operands, adding a space between two that are not strings.
fn sprint(arguments: &[Value]) -> String {
    let mut output = String::new();
    for (position, argument) in arguments.iter().enumerate() {
        let spaced = position > 0
            && !matches!(argument, Value::String(_))
            && !matches!(arguments[position - 1], Value::String(_));
        if spaced {
            output.push(' ');
        }
        output.push_str(&argument.to_string());
    }
    output
}

fn println(arguments: &[Value]) -> Result<Value, FunctionError> {
    let mut output = arguments
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    output.push('\n');
    Ok(Value::string(output))
}

fn printf(arguments: &[Value]) -> Result<Value, FunctionError> {
    at_least(arguments, 1, "at least 1")?;
    let format = arguments[0]
        .as_str()
        .ok_or_else(|| FunctionError::Invalid("format must be a string".to_owned()))?;
    let mut values = arguments[1..].iter();
    let mut output = String::with_capacity(format.len());
    let mut characters = format.chars().peekable();
    while let Some(character) = characters.next() {
        if character != '%' {
            output.push(character);
            continue;
        }
        let mut precision = None;
        if characters.next_if_eq(&'.').is_some() {
            let mut digits = String::new();
            while let Some(digit) = characters.next_if(char::is_ascii_digit) {
                digits.push(digit);
            }
            precision = Some(parse_precision(&digits)?);
        }
        let verb = match characters.next() {
            Some('%') => {
                output.push('%');
                continue;
            }
            Some(verb) => verb,
            None => return Err(FunctionError::Invalid("format ends with %".to_owned())),
        };
        let value = values
            .next()
            .ok_or_else(|| FunctionError::Invalid(format!("missing argument for %{verb}")))?;
        let mismatch = || FunctionError::Invalid(format!("%{verb} of {}", value.type_name()));
        match verb {
            'v' | 's' => output.push_str(&value.to_string()),
            'd' => output.push_str(&value.as_i64().ok_or_else(mismatch)?.to_string()),
            'f' => {
                let number = value.as_f64().ok_or_else(mismatch)?;
                output.push_str(&format!("{number:.*}", precision.unwrap_or(6)));
            }
            't' => output.push_str(&value.as_bool().ok_or_else(mismatch)?.to_string()),
            'q' => output.push_str(&format!("{:?}", value.to_string())),
            other => return Err(FunctionError::Invalid(format!("unsupported verb %{other}"))),
        }
    }
    if values.next().is_some() {
        return Err(FunctionError::Invalid("too many arguments for format".to_owned()));
    }
    Ok(Value::string(output))
}

// Rust's formatter rejects precisions wider than `u16`.
fn parse_precision(digits: &str) -> Result<usize, FunctionError> {
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse::<u16>()
        .map(usize::from)
        .map_err(|_| FunctionError::Invalid("precision out of range".to_owned()))
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&#34;"),
            '\'' => output.push_str("&#39;"),
            other => output.push(other),
        }
    }
    output
}

fn escape_query(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                output.push(char::from(byte));
            }
            b' ' => output.push('+'),
            other => output.push_str(&format!("%{other:02X}")),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: &[Value]) -> Result<Value, FunctionError> {
        let function = Functions::builtins().get(name).unwrap();
        function(arguments)
    }

    fn text(name: &str, arguments: &[Value]) -> String {
        call(name, arguments).unwrap().to_string()
    }

    #[test]
    fn printf_verbs() {
        assert_eq!(
            text(
                "printf",
                &["%s=%d (%.2f) %t %q 100%%".into(), "a".into(), 7.into(), 1.5.into(), true.into(), "x".into()]
            ),
            "a=7 (1.50) true \"x\" 100%"
        );
        assert_eq!(text("printf", &["%v|%f".into(), Value::list([1.into()]), 2.into()]), "[1]|2.000000");
        assert!(call("printf", &["%d".into(), "x".into()]).is_err());
        assert!(call("printf", &["%s".into()]).is_err());
        assert!(call("printf", &["".into(), 1.into()]).is_err());
    }

    #[test]
    fn printf_precision_limits() {
        assert_eq!(text("printf", &["%.f|%.0f".into(), 1.4.into(), 2.6.into()]), "1|3");
        assert_eq!(text("printf", &["%.3f".into(), 1.0.into()]).len(), 5);
        for format in ["%.100000f", "%.99999999999999999999f"] {
            assert_eq!(
                call("printf", &[format.into(), 1.5.into()]),
                Err(FunctionError::Invalid("precision out of range".to_owned()))
            );
        }
    }

    #[test]
    fn comparisons() {
        assert_eq!(call("eq", &[1.into(), 2.into(), 1.into()]).unwrap(), Value::Bool(true));
        assert_eq!(call("eq", &["a".into(), "b".into()]).unwrap(), Value::Bool(false));
        assert_eq!(call("eq", &[Value::Null, Value::Null]).unwrap(), Value::Bool(true));
        assert_eq!(call("ne", &[1.into(), 1.5.into()]).unwrap(), Value::Bool(true));
        assert_eq!(call("lt", &[1.into(), 2.into()]).unwrap(), Value::Bool(true));
        assert_eq!(call("ge", &["b".into(), "a".into()]).unwrap(), Value::Bool(true));
        assert!(call("lt", &[1.into(), "a".into()]).is_err());
        assert!(call("eq", &[true.into(), 1.into()]).is_err());
        assert!(call("eq", &[Value::list([]), Value::list([])]).is_err());
        assert!(matches!(
            call("ne", &[1.into()]),
            Err(FunctionError::Arity { found: 1, .. })
        ));
    }

    #[test]
    fn eager_logic() {
        assert_eq!(call("and", &[1.into(), 0.into(), 2.into()]).unwrap(), Value::Int(0));
        assert_eq!(call("and", &[1.into(), 2.into()]).unwrap(), Value::Int(2));
        assert_eq!(call("or", &[0.into(), "".into()]).unwrap(), Value::from(""));
        assert_eq!(call("or", &[0.into(), "x".into()]).unwrap(), Value::from("x"));
        assert_eq!(call("not", &[Value::Null]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn collections() {
        let list = Value::list(["a".into(), "b".into()]);
        let map = Value::map([("k", list.clone())]);
        assert_eq!(call("len", &[list.clone()]).unwrap(), Value::Int(2));
        assert_eq!(call("len", &["héllo".into()]).unwrap(), Value::Int(6));
        assert!(call("len", &[3.into()]).is_err());
        assert_eq!(call("index", &[map.clone(), "k".into(), 1.into()]).unwrap(), Value::from("b"));
        assert_eq!(call("index", &[map, "missing".into()]).unwrap(), Value::Null);
        assert!(call("index", &[list, 5.into()]).is_err());
    }

    #[test]
    fn printing_and_escaping() {
        assert_eq!(text("print", &[1.into(), 2.into(), "a".into(), 3.into()]), "1 2a3");
        assert_eq!(text("println", &["a".into(), 1.into()]), "a 1\n");
        assert_eq!(text("html", &["<a href=\"x\">&'".into()]), "&lt;a href=&#34;x&#34;&gt;&amp;&#39;");
        assert_eq!(text("urlquery", &["a b&c=é".into()]), "a+b%26c%3D%C3%A9");
    }

    #[test]
    fn registered_functions_extend_a_copy() {
        let mut functions = Functions::default();
        functions.register("shout", |arguments| {
            Ok(Value::string(sprint(arguments).to_uppercase()))
        });
        assert!(functions.contains("shout"));
        assert!(functions.contains("printf"));
        assert!(!Functions::builtins().contains("shout"));
    }
}
