//! Best-effort, restricted code interpreter for the reasoning engine's
//! `<python>` steps. Not a sandbox — it merely has no filesystem, network, or
//! process primitives wired in, which is an advisory restriction, not an
//! isolation boundary (§9).

use serde_json::Value;
use std::collections::HashMap;

/// Evaluates a tiny line-oriented expression language: assignment, `print`,
/// and `+ - * /` over numbers and strings. Variable bindings persist across
/// calls to `run` until `reset`.
pub struct Interpreter {
    vars: HashMap<String, Value>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self { vars: HashMap::new() }
    }

    /// Clears all bindings. Called exactly once per reasoning-loop run.
    pub fn reset(&mut self) {
        self.vars.clear();
    }

    /// Runs a block of code and returns the captured output (or a formatted
    /// error trace, never a panic).
    pub fn run(&mut self, code: &str) -> String {
        let mut output = String::new();
        for (idx, raw_line) in code.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.run_line(line) {
                Ok(Some(text)) => {
                    output.push_str(&text);
                    output.push('\n');
                }
                Ok(None) => {}
                Err(err) => {
                    output.push_str(&format!("Traceback (line {}): {}\n", idx + 1, err));
                    return output;
                }
            }
        }
        output
    }

    fn run_line(&mut self, line: &str) -> Result<Option<String>, String> {
        if let Some(inner) = line.strip_prefix("print(").and_then(|s| s.strip_suffix(')')) {
            let value = self.eval(inner)?;
            return Ok(Some(render(&value)));
        }

        if let Some(eq_idx) = find_assignment(line) {
            let name = line[..eq_idx].trim();
            let expr = line[eq_idx + 1..].trim();
            if is_identifier(name) {
                let value = self.eval(expr)?;
                self.vars.insert(name.to_string(), value);
                return Ok(None);
            }
        }

        Err(format!("unsupported statement: {}", line))
    }

    fn eval(&self, expr: &str) -> Result<Value, String> {
        let tokens = tokenize(expr)?;
        let (value, rest) = parse_sum(&tokens, self)?;
        if !rest.is_empty() {
            return Err(format!("unexpected trailing tokens near '{}'", expr));
        }
        Ok(value)
    }

    fn lookup(&self, name: &str) -> Result<Value, String> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| format!("name '{}' is not defined", name))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn find_assignment(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'=' {
            let next_is_eq = bytes.get(i + 1) == Some(&b'=');
            let prev_is_cmp = i > 0 && matches!(bytes[i - 1], b'!' | b'<' | b'>' | b'=');
            if !next_is_eq && !prev_is_cmp {
                return Some(i);
            }
        }
    }
    None
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false)
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[derive(Debug, Clone)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| format!("invalid number literal '{}'", text))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

fn parse_sum<'a>(tokens: &'a [Token], interp: &Interpreter) -> Result<(Value, &'a [Token]), String> {
    let (mut left, mut rest) = parse_term(tokens, interp)?;
    loop {
        match rest.first() {
            Some(Token::Plus) => {
                let (right, next) = parse_term(&rest[1..], interp)?;
                left = add(left, right)?;
                rest = next;
            }
            Some(Token::Minus) => {
                let (right, next) = parse_term(&rest[1..], interp)?;
                left = Value::from(as_number(&left)? - as_number(&right)?);
                rest = next;
            }
            _ => break,
        }
    }
    Ok((left, rest))
}

fn parse_term<'a>(tokens: &'a [Token], interp: &Interpreter) -> Result<(Value, &'a [Token]), String> {
    let (mut left, mut rest) = parse_atom(tokens, interp)?;
    loop {
        match rest.first() {
            Some(Token::Star) => {
                let (right, next) = parse_atom(&rest[1..], interp)?;
                left = Value::from(as_number(&left)? * as_number(&right)?);
                rest = next;
            }
            Some(Token::Slash) => {
                let (right, next) = parse_atom(&rest[1..], interp)?;
                let divisor = as_number(&right)?;
                if divisor == 0.0 {
                    return Err("division by zero".to_string());
                }
                left = Value::from(as_number(&left)? / divisor);
                rest = next;
            }
            _ => break,
        }
    }
    Ok((left, rest))
}

fn parse_atom<'a>(tokens: &'a [Token], interp: &Interpreter) -> Result<(Value, &'a [Token]), String> {
    match tokens.split_first() {
        Some((Token::Number(n), rest)) => Ok((Value::from(*n), rest)),
        Some((Token::Str(s), rest)) => Ok((Value::from(s.clone()), rest)),
        Some((Token::Ident(name), rest)) => Ok((interp.lookup(name)?, rest)),
        Some((Token::Minus, rest)) => {
            let (value, next) = parse_atom(rest, interp)?;
            Ok((Value::from(-as_number(&value)?), next))
        }
        Some(_) => Err("unexpected token".to_string()),
        None => Err("unexpected end of expression".to_string()),
    }
}

fn add(a: Value, b: Value) -> Result<Value, String> {
    if a.is_string() || b.is_string() {
        return Ok(Value::from(format!("{}{}", render(&a), render(&b))));
    }
    Ok(Value::from(as_number(&a)? + as_number(&b)?))
}

fn as_number(v: &Value) -> Result<f64, String> {
    v.as_f64().ok_or_else(|| format!("expected a number, got {}", render(v)))
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_and_prints_numbers() {
        let mut interp = Interpreter::new();
        let output = interp.run("x = 2 + 3\nprint(x * 2)");
        assert_eq!(output.trim(), "10");
    }

    #[test]
    fn persists_variables_across_calls() {
        let mut interp = Interpreter::new();
        interp.run("total = 10");
        let output = interp.run("print(total + 5)");
        assert_eq!(output.trim(), "15");
    }

    #[test]
    fn reset_clears_bindings() {
        let mut interp = Interpreter::new();
        interp.run("x = 1");
        interp.reset();
        let output = interp.run("print(x)");
        assert!(output.contains("not defined"));
    }

    #[test]
    fn concatenates_strings() {
        let mut interp = Interpreter::new();
        let output = interp.run(r#"print("a" + "b")"#);
        assert_eq!(output.trim(), "ab");
    }

    #[test]
    fn reports_division_by_zero_without_panicking() {
        let mut interp = Interpreter::new();
        let output = interp.run("x = 1 / 0");
        assert!(output.contains("division by zero"));
    }
}
