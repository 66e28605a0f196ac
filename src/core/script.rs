//! Controller command language.
//!
//! The controller drives the worker with short call expressions such as
//!
//! ```text
//! rllab_worker.init("SPMountainCar", 16, {nminds = 2, sp_test_rate = 0.1})
//! rllab_worker.step(TENSORLIST[0], TENSORLIST[1], 4)
//! ```
//!
//! Only the commands registered in [`ScriptHost`] can be called; there is no
//! general-purpose evaluator behind this. Accepted syntax: calls with
//! positional and keyword arguments and an optional dotted module prefix,
//! literals (`nil`/`None`, `true`/`false`/`True`/`False`, integers, doubles,
//! quoted strings), `[..]`/`(..)` lists, `{k: v}`/`{k = v}` tables and
//! `TENSORLIST[i]` references. Statements are separated by `;` or newlines;
//! `import x` statements are accepted and ignored.

use thiserror::Error;
use tracing::info;

use crate::dispatch::Handler;
use crate::env::Mind;
use crate::options::{EnvOptions, OptionsError};
use crate::pool::{EnvKind, EnvPool, PoolError, MAX_POOL_SIZE, MAX_REPEAT};
use crate::wire::{Tensor, Value, WireError, TENSOR_PLACEHOLDER};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("syntax error at byte {offset}: {reason}")]
    Syntax { offset: usize, reason: String },
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{command}: {reason}")]
    Argument { command: String, reason: String },
    #[error("TENSORLIST[{index}] is out of range ({available} tensors attached)")]
    MissingTensor { index: usize, available: usize },
    #[error("no environment pool; call init(kind, count, options) first")]
    NotInitialized,
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

// ═══════════════════════════════════════════════════════════════════════════
// Lexer
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Open(char),
    Close(char),
    Comma,
    Colon,
    Assign,
    Dot,
    /// Statement separator: `;` or a newline.
    End,
}

fn syntax(offset: usize, reason: impl Into<String>) -> ScriptError {
    ScriptError::Syntax {
        offset,
        reason: reason.into(),
    }
}

fn lex(src: &str) -> Result<Vec<(usize, Tok)>, ScriptError> {
    let bytes = src.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\r' => i += 1,
            b'\n' | b';' => {
                toks.push((start, Tok::End));
                i += 1;
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'(' | b'[' | b'{' => {
                toks.push((start, Tok::Open(c as char)));
                i += 1;
            }
            b')' | b']' | b'}' => {
                toks.push((start, Tok::Close(c as char)));
                i += 1;
            }
            b',' => {
                toks.push((start, Tok::Comma));
                i += 1;
            }
            b':' => {
                toks.push((start, Tok::Colon));
                i += 1;
            }
            b'=' => {
                toks.push((start, Tok::Assign));
                i += 1;
            }
            b'"' | b'\'' => {
                i += 1;
                while i < bytes.len() && bytes[i] != c {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(syntax(start, "unterminated string"));
                }
                toks.push((start, Tok::Str(src[start + 1..i].to_string())));
                i += 1;
            }
            b'.' if !bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                toks.push((start, Tok::Dot));
                i += 1;
            }
            b'-' | b'+' | b'.' | b'0'..=b'9' => {
                i += 1;
                while i < bytes.len() {
                    let d = bytes[i];
                    let exp_sign = (d == b'-' || d == b'+') && matches!(bytes[i - 1], b'e' | b'E');
                    if d.is_ascii_digit() || matches!(d, b'.' | b'e' | b'E') || exp_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                toks.push((start, number(&src[start..i], start)?));
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                toks.push((start, Tok::Ident(src[start..i].to_string())));
            }
            other => {
                return Err(syntax(start, format!("unexpected character '{}'", other as char)));
            }
        }
    }
    Ok(toks)
}

fn number(text: &str, offset: usize) -> Result<Tok, ScriptError> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Tok::Int(i));
    }
    text.parse::<f64>()
        .map(Tok::Float)
        .map_err(|_| syntax(offset, format!("bad number '{text}'")))
}

// ═══════════════════════════════════════════════════════════════════════════
// Parser
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    List(Vec<Expr>),
    /// Table entries; `None` keys are positional.
    Table(Vec<(Option<Expr>, Expr)>),
    TensorRef(usize),
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Import,
    Expr(Expr),
}

/// Deepest nesting of lists, tables and calls a command may use.
pub const MAX_DEPTH: usize = 64;

struct Parser {
    toks: Vec<(usize, Tok)>,
    pos: usize,
    len: usize,
    depth: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, ScriptError> {
        Ok(Self {
            toks: lex(src)?,
            pos: 0,
            len: src.len(),
            depth: 0,
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, n: usize) -> Option<&Tok> {
        self.toks.get(self.pos + n).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.toks.get(self.pos).map_or(self.len, |(o, _)| *o)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), ScriptError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(syntax(self.offset(), format!("expected {tok:?}")))
        }
    }

    fn program(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Tok::End) {}
            if self.peek().is_none() {
                return Ok(stmts);
            }
            stmts.push(self.statement()?);
            match self.peek() {
                None | Some(Tok::End) => {}
                Some(_) => return Err(syntax(self.offset(), "expected end of statement")),
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        if matches!(self.peek(), Some(Tok::Ident(w)) if w == "import") {
            self.pos += 1;
            self.dotted()?;
            return Ok(Stmt::Import);
        }
        Ok(Stmt::Expr(self.expr()?))
    }

    /// `a.b.c`, returning the last segment.
    fn dotted(&mut self) -> Result<String, ScriptError> {
        let at = self.offset();
        let Some(Tok::Ident(mut name)) = self.next() else {
            return Err(syntax(at, "expected a name"));
        };
        while self.eat(&Tok::Dot) {
            let at = self.offset();
            match self.next() {
                Some(Tok::Ident(seg)) => name = seg,
                _ => return Err(syntax(at, "expected a name after '.'")),
            }
        }
        Ok(name)
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        if self.depth >= MAX_DEPTH {
            return Err(syntax(self.offset(), format!("nesting deeper than {MAX_DEPTH}")));
        }
        self.depth += 1;
        let expr = self.term();
        self.depth -= 1;
        expr
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let at = self.offset();
        match self.peek().cloned() {
            Some(Tok::Int(i)) => {
                self.pos += 1;
                Ok(Expr::Lit(Value::from(i)))
            }
            Some(Tok::Float(f)) => {
                self.pos += 1;
                Ok(Expr::Lit(Value::from(f)))
            }
            Some(Tok::Str(s)) => {
                self.pos += 1;
                Ok(Expr::Lit(Value::Str(s)))
            }
            Some(Tok::Open('[')) | Some(Tok::Open('(')) => self.list(),
            Some(Tok::Open('{')) => self.table(),
            Some(Tok::Ident(word)) => match word.as_str() {
                "nil" | "None" => {
                    self.pos += 1;
                    Ok(Expr::Lit(Value::Nil))
                }
                "true" | "True" => {
                    self.pos += 1;
                    Ok(Expr::Lit(Value::Bool(true)))
                }
                "false" | "False" => {
                    self.pos += 1;
                    Ok(Expr::Lit(Value::Bool(false)))
                }
                w if w == TENSOR_PLACEHOLDER => {
                    self.pos += 1;
                    self.expect(Tok::Open('['))?;
                    let at = self.offset();
                    let index = match self.next() {
                        Some(Tok::Int(i)) if i >= 0 => i as usize,
                        _ => return Err(syntax(at, "expected a tensor index")),
                    };
                    self.expect(Tok::Close(']'))?;
                    Ok(Expr::TensorRef(index))
                }
                _ => self.call(),
            },
            _ => Err(syntax(at, "expected an expression")),
        }
    }

    fn call(&mut self) -> Result<Expr, ScriptError> {
        let name = self.dotted()?;
        let at = self.offset();
        if !self.eat(&Tok::Open('(')) {
            return Err(syntax(at, format!("'{name}' is not a call")));
        }
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.eat(&Tok::Close(')')) {
            if let (Some(Tok::Ident(key)), Some(Tok::Assign)) = (self.peek(), self.peek_at(1)) {
                let key = key.clone();
                self.pos += 2;
                kwargs.push((key, self.expr()?));
            } else if kwargs.is_empty() {
                args.push(self.expr()?);
            } else {
                return Err(syntax(self.offset(), "positional argument after keyword argument"));
            }
            if !self.eat(&Tok::Comma) {
                self.expect(Tok::Close(')'))?;
                break;
            }
        }
        Ok(Expr::Call { name, args, kwargs })
    }

    fn list(&mut self) -> Result<Expr, ScriptError> {
        let close = match self.next() {
            Some(Tok::Open('(')) => ')',
            _ => ']',
        };
        let mut items = Vec::new();
        while !self.eat(&Tok::Close(close)) {
            items.push(self.expr()?);
            if !self.eat(&Tok::Comma) {
                self.expect(Tok::Close(close))?;
                break;
            }
        }
        Ok(Expr::List(items))
    }

    fn table(&mut self) -> Result<Expr, ScriptError> {
        self.pos += 1;
        let mut entries = Vec::new();
        while !self.eat(&Tok::Close('}')) {
            let bare_key = match (self.peek(), self.peek_at(1)) {
                (Some(Tok::Ident(k)), Some(Tok::Assign | Tok::Colon)) => Some(k.clone()),
                _ => None,
            };
            if let Some(k) = bare_key {
                self.pos += 2;
                entries.push((Some(Expr::Lit(Value::Str(k))), self.expr()?));
            } else if self.peek() == Some(&Tok::Open('[')) && self.is_bracket_key() {
                // Lua-style `[key] = value`.
                self.pos += 1;
                let key = self.expr()?;
                self.expect(Tok::Close(']'))?;
                self.expect(Tok::Assign)?;
                entries.push((Some(key), self.expr()?));
            } else {
                let first = self.expr()?;
                if self.eat(&Tok::Colon) || self.eat(&Tok::Assign) {
                    entries.push((Some(first), self.expr()?));
                } else {
                    entries.push((None, first));
                }
            }
            if !self.eat(&Tok::Comma) {
                self.expect(Tok::Close('}'))?;
                break;
            }
        }
        Ok(Expr::Table(entries))
    }

    /// Whether the `[` at the cursor opens a `[key] =` entry rather than a list.
    fn is_bracket_key(&self) -> bool {
        let mut depth = 0usize;
        for (i, (_, t)) in self.toks[self.pos..].iter().enumerate() {
            match t {
                Tok::Open(_) => depth += 1,
                Tok::Close(_) => {
                    depth -= 1;
                    if depth == 0 {
                        return self.peek_at(i + 1) == Some(&Tok::Assign);
                    }
                }
                _ => {}
            }
        }
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Argument helpers
// ═══════════════════════════════════════════════════════════════════════════

struct Args {
    command: String,
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl Args {
    fn err(&self, reason: impl Into<String>) -> ScriptError {
        ScriptError::Argument {
            command: self.command.clone(),
            reason: reason.into(),
        }
    }

    /// Positional `idx` or keyword `name`.
    fn get(&self, idx: usize, name: &str) -> Option<&Value> {
        self.keyword
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .or_else(|| self.positional.get(idx))
    }

    fn required(&self, idx: usize, name: &str) -> Result<&Value, ScriptError> {
        self.get(idx, name)
            .ok_or_else(|| self.err(format!("missing argument '{name}'")))
    }

    /// Non-negative integer no larger than `max`.
    fn count(&self, idx: usize, name: &str, max: usize) -> Result<usize, ScriptError> {
        let v = self.required(idx, name)?;
        let n = v
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
            .ok_or_else(|| self.err(format!("'{name}' must be a non-negative integer, got {}", v.kind())))?;
        if n > max as f64 {
            return Err(self.err(format!("'{name}' must be at most {max}, got {n}")));
        }
        Ok(n as usize)
    }

    fn flag(&self, idx: usize, name: &str) -> Result<bool, ScriptError> {
        match self.get(idx, name) {
            None => Ok(false),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| self.err(format!("'{name}' must be a boolean"))),
        }
    }

    fn text(&self, idx: usize, name: &str) -> Result<&str, ScriptError> {
        let v = self.required(idx, name)?;
        v.as_str()
            .ok_or_else(|| self.err(format!("'{name}' must be a string, got {}", v.kind())))
    }

    /// One action row per pool member.
    fn rows(&self, idx: usize, name: &str) -> Result<Vec<Vec<f64>>, ScriptError> {
        match self.required(idx, name)? {
            Value::Tensor(t) if t.shape().len() == 1 => Ok(t.data().iter().map(|&x| vec![x]).collect()),
            Value::Tensor(t) => Ok(t.rows()),
            Value::Seq(items) => items
                .iter()
                .map(|item| self.flat(item, name))
                .collect(),
            other => Err(self.err(format!("'{name}' must be a tensor or list, got {}", other.kind()))),
        }
    }

    fn flat(&self, v: &Value, name: &str) -> Result<Vec<f64>, ScriptError> {
        match v {
            Value::Tensor(t) => Ok(t.data().to_vec()),
            Value::Seq(items) => items
                .iter()
                .map(|x| x.as_f64().ok_or_else(|| self.err(format!("'{name}' must hold numbers"))))
                .collect(),
            other => other
                .as_f64()
                .map(|x| vec![x])
                .ok_or_else(|| self.err(format!("'{name}' must hold numbers"))),
        }
    }

    fn numbers(&self, idx: usize, name: &str) -> Result<Vec<f64>, ScriptError> {
        let v = self.required(idx, name)?;
        self.flat(v, name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Host
// ═══════════════════════════════════════════════════════════════════════════

/// Registered command names, aliases included.
pub const COMMANDS: &[&str] = &[
    "init",
    "reset",
    "reset_all",
    "step",
    "reward_terminal",
    "render",
    "obs_shape",
    "observation_shape",
    "num_actions",
    "action_count",
    "get_stat",
    "reward_terminal_mind",
    "current_mind",
    "kinds",
    "pool_size",
    "action_from_key",
];

/// Owns the environment pool and runs controller commands against it.
#[derive(Default)]
pub struct ScriptHost {
    pool: Option<EnvPool>,
}

impl ScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a pool already built (the daemon's `--env` preload).
    pub fn with_pool(pool: EnvPool) -> Self {
        Self { pool: Some(pool) }
    }

    pub fn pool(&self) -> Option<&EnvPool> {
        self.pool.as_ref()
    }

    fn pool_mut(&mut self) -> Result<&mut EnvPool, ScriptError> {
        self.pool.as_mut().ok_or(ScriptError::NotInitialized)
    }

    /// Parse and run every statement; the value of the last one is returned.
    pub fn run(&mut self, text: &str, tensors: &[Tensor]) -> Result<Value, ScriptError> {
        let stmts = Parser::new(text)?.program()?;
        let mut last = Value::Nil;
        for stmt in stmts {
            last = match stmt {
                Stmt::Import => Value::Nil,
                Stmt::Expr(e) => self.eval(e, tensors)?,
            };
        }
        Ok(last)
    }

    fn eval(&mut self, expr: Expr, tensors: &[Tensor]) -> Result<Value, ScriptError> {
        Ok(match expr {
            Expr::Lit(v) => v,
            Expr::TensorRef(index) => tensors
                .get(index)
                .cloned()
                .map(Value::Tensor)
                .ok_or(ScriptError::MissingTensor {
                    index,
                    available: tensors.len(),
                })?,
            Expr::List(items) => Value::Seq(
                items
                    .into_iter()
                    .map(|e| self.eval(e, tensors))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Table(entries) => {
                if entries.iter().all(|(k, _)| k.is_none()) {
                    Value::Seq(
                        entries
                            .into_iter()
                            .map(|(_, v)| self.eval(v, tensors))
                            .collect::<Result<_, _>>()?,
                    )
                } else {
                    let mut out = Vec::with_capacity(entries.len());
                    let mut next_index = 1i64;
                    for (k, v) in entries {
                        let key = match k {
                            Some(k) => self.eval(k, tensors)?,
                            None => {
                                next_index += 1;
                                Value::from(next_index - 1)
                            }
                        };
                        out.push((key, self.eval(v, tensors)?));
                    }
                    Value::Map(out)
                }
            }
            Expr::Call { name, args, kwargs } => {
                let args = Args {
                    positional: args
                        .into_iter()
                        .map(|e| self.eval(e, tensors))
                        .collect::<Result<_, _>>()?,
                    keyword: kwargs
                        .into_iter()
                        .map(|(k, e)| Ok((k, self.eval(e, tensors)?)))
                        .collect::<Result<_, ScriptError>>()?,
                    command: name,
                };
                self.call(args)?
            }
        })
    }

    fn call(&mut self, args: Args) -> Result<Value, ScriptError> {
        match args.command.as_str() {
            "init" => {
                let kind: EnvKind = args.text(0, "kind")?.parse()?;
                let count = args.count(1, "count", MAX_POOL_SIZE)?;
                let opts = match args.get(2, "options") {
                    Some(v) => EnvOptions::from_value(v)?,
                    None => EnvOptions::default(),
                };
                // Drop the old pool before building the new one.
                self.pool = None;
                self.pool = Some(EnvPool::new(kind, count, &opts)?);
                info!("pool initialised: {count} x {kind}");
                Ok(Value::Nil)
            }
            "reset" | "reset_all" => {
                let obs = self.pool_mut()?.reset_all()?;
                Ok(obs.into_iter().map(Value::from).collect())
            }
            "step" => {
                let actions = args.rows(0, "actions")?;
                let active: Vec<bool> = args
                    .numbers(1, "active")?
                    .into_iter()
                    .map(|x| x != 0.0)
                    .collect();
                let repeat = match args.get(2, "steps") {
                    Some(_) => args.count(2, "steps", MAX_REPEAT)?,
                    None => 1,
                };
                let batch = self.pool_mut()?.step_all(&actions, &active, repeat)?;
                Ok(Value::from(batch))
            }
            "reward_terminal" => {
                let r = self.pool_mut()?.reward_terminal_all();
                Ok(r.into_iter().map(Value::from).collect())
            }
            "render" => {
                let want = args.flag(0, "get_image")?;
                Ok(Value::from(self.pool_mut()?.render_first(want)?))
            }
            "obs_shape" | "observation_shape" => {
                let shape = self.pool_mut()?.observation_shape()?;
                Ok(shape.into_iter().map(Value::from).collect())
            }
            "num_actions" | "action_count" => Ok(Value::from(self.pool_mut()?.action_count()?)),
            "get_stat" => {
                let stats = self.pool_mut()?.get_stat_all();
                Ok(stats.into_iter().map(Value::from).collect())
            }
            "reward_terminal_mind" => {
                let minds = args
                    .numbers(0, "mind")?
                    .into_iter()
                    .map(|m| {
                        Mind::from_index(m as i64)
                            .filter(|_| m.fract() == 0.0)
                            .ok_or_else(|| args.err(format!("mind must be 1 or 2, got {m}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let r = self.pool_mut()?.reward_terminal_mind_all(&minds)?;
                Ok(r.into_iter().map(Value::from).collect())
            }
            "current_mind" => {
                let minds = self.pool_mut()?.current_mind_all();
                Ok(minds
                    .into_iter()
                    .map(|m| m.map(|m| u32::from(m.index())))
                    .collect())
            }
            "kinds" => Ok(EnvKind::ALL.into_iter().map(|k| Value::from(k.name())).collect()),
            "pool_size" => Ok(Value::from(self.pool.as_ref().map_or(0, EnvPool::len))),
            "action_from_key" => {
                let key = args.text(0, "key")?;
                Ok(Value::from(self.pool_mut()?.action_from_key(key)?))
            }
            other => Err(ScriptError::UnknownCommand(other.to_string())),
        }
    }
}

impl Handler for ScriptHost {
    type Error = ScriptError;

    fn evaluate(&mut self, text: &str, tensors: Vec<Tensor>) -> Result<Value, ScriptError> {
        self.run(text, &tensors)
    }

    fn execute(&mut self, text: &str, tensors: Vec<Tensor>) -> Result<(), ScriptError> {
        self.run(text, &tensors).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Vec<Stmt> {
        Parser::new(src).unwrap().program().unwrap()
    }

    fn host_with(kind: &str, count: usize) -> ScriptHost {
        let mut host = ScriptHost::new();
        host.run(
            &format!("rllab_worker.init(\"{kind}\", {count}, {{seed = 7}})"),
            &[],
        )
        .unwrap();
        host
    }

    #[test]
    fn parses_calls_literals_and_tables() {
        let stmts = parse("import rllab_worker; a.b.f(1, -2.5e-1, 'x', nil, True, k=[1, (2, 3)])");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], Stmt::Import);
        let Stmt::Expr(Expr::Call { name, args, kwargs }) = &stmts[1] else {
            panic!("expected a call");
        };
        assert_eq!(name, "f");
        assert_eq!(
            args,
            &vec![
                Expr::Lit(Value::from(1i64)),
                Expr::Lit(Value::from(-0.25)),
                Expr::Lit(Value::from("x")),
                Expr::Lit(Value::Nil),
                Expr::Lit(Value::Bool(true)),
            ]
        );
        assert_eq!(kwargs.len(), 1);
        assert_eq!(kwargs[0].0, "k");
    }

    #[test]
    fn tables_accept_lua_and_python_forms() {
        let mut host = ScriptHost::new();
        let lua = host.run("kinds()\n", &[]).unwrap();
        assert!(matches!(lua, Value::Seq(ref v) if v.len() == 3));

        let mut p = Parser::new("{a = 1, \"b\": 2, [3] = 4, 5}").unwrap();
        let expr = p.expr().unwrap();
        let value = host.eval(expr, &[]).unwrap();
        assert_eq!(
            value,
            Value::Map(vec![
                (Value::from("a"), Value::from(1i64)),
                (Value::from("b"), Value::from(2i64)),
                (Value::from(3i64), Value::from(4i64)),
                (Value::from(1i64), Value::from(5i64)),
            ])
        );
        let list = host.eval(Parser::new("{[1, 2], 3}").unwrap().expr().unwrap(), &[]);
        assert!(matches!(list, Ok(Value::Seq(ref v)) if v.len() == 2));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut host = ScriptHost::new();
        for bad in ["f(", "f(1 2)", "f(k=1, 2)", "\"open", "x", "f() g()", "TENSORLIST[a]"] {
            assert!(
                matches!(host.run(bad, &[]), Err(ScriptError::Syntax { .. })),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn only_registered_commands_run() {
        let mut host = ScriptHost::new();
        assert!(matches!(
            host.run("os.system('rm -rf /')", &[]),
            Err(ScriptError::UnknownCommand(name)) if name == "system"
        ));
        assert!(matches!(host.run("reset()", &[]), Err(ScriptError::NotInitialized)));
        assert_eq!(host.run("pool_size()", &[]).unwrap(), Value::from(0usize));
        assert!(matches!(
            host.run("init('Swimmer', 2)", &[]),
            Err(ScriptError::Pool(PoolError::UnknownKind(_)))
        ));
        assert!(matches!(
            host.run("init('Point', 'two')", &[]),
            Err(ScriptError::Argument { .. })
        ));
        for name in COMMANDS {
            assert!(!matches!(
                host.run(&format!("{name}()"), &[]),
                Err(ScriptError::UnknownCommand(_))
            ));
        }
    }

    #[test]
    fn full_episode_over_the_command_surface() {
        let mut host = host_with("SPMountainCar", 2);
        assert_eq!(host.run("pool_size()", &[]).unwrap(), Value::from(2usize));
        assert_eq!(host.run("obs_shape()", &[]).unwrap(), Value::Seq(vec![Value::from(6usize)]));
        assert_eq!(host.run("num_actions()", &[]).unwrap(), Value::from(2usize));

        let Value::Seq(obs) = host.run("reset()", &[]).unwrap() else {
            panic!("reset should return a list");
        };
        assert_eq!(obs.len(), 2);

        let actions = Tensor::new(vec![2, 2], vec![1.0, 0.0, -1.0, 0.0]).unwrap();
        let active = Tensor::from_vec(vec![1.0, 0.0]);
        let reply = host
            .run("step(TENSORLIST[0], TENSORLIST[1], 3)", &[actions, active])
            .unwrap();
        let Value::Seq(parts) = reply else {
            panic!("step should return four lists");
        };
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[2], Value::Seq(vec![Value::Bool(false), Value::Bool(true)]));

        assert_eq!(
            host.run("current_mind()", &[]).unwrap(),
            Value::Seq(vec![Value::from(1u32), Value::from(1u32)])
        );
        let r = host.run("reward_terminal_mind({1, 2})", &[]).unwrap();
        assert!(matches!(r, Value::Seq(ref v) if v.len() == 2));
        assert!(host.run("reward_terminal_mind({1, 3})", &[]).is_err());
        assert_eq!(
            host.run("reward_terminal()", &[]).unwrap(),
            Value::Seq(vec![Value::from(0.0), Value::from(0.0)])
        );
        let Value::Seq(stats) = host.run("get_stat()", &[]).unwrap() else {
            panic!("get_stat should return a list");
        };
        assert_eq!(stats[0].get("type"), Some(&Value::from("self_play")));

        assert_eq!(host.run("render()", &[]).unwrap(), Value::Nil);
        let Value::Tensor(img) = host.run("render(get_image=True)", &[]).unwrap() else {
            panic!("render(get_image=True) should return a tensor");
        };
        assert_eq!(img.shape().len(), 3);
        assert_eq!(
            host.run("action_from_key('right')", &[]).unwrap(),
            Value::from(vec![1.0, 0.0])
        );
    }

    #[test]
    fn plain_kind_reports_neutral_values() {
        let mut host = host_with("Point", 1);
        host.run("reset_all()", &[]).unwrap();
        assert_eq!(host.run("current_mind()", &[]).unwrap(), Value::Seq(vec![Value::Nil]));
        assert_eq!(
            host.run("get_stat()", &[]).unwrap(),
            Value::Seq(vec![Value::Map(Vec::new())])
        );
        assert_eq!(host.run("action_from_key('up')", &[]).unwrap(), Value::Nil);
        assert_eq!(host.run("render(get_image=True)", &[]).unwrap(), Value::Nil);
        let reply = host
            .run("step({{1, 0}}, {1}, 1)", &[])
            .unwrap();
        let Value::Seq(parts) = reply else {
            panic!("step should return four lists");
        };
        assert_eq!(parts[1], Value::Seq(vec![Value::from(0.5)]));
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let mut host = ScriptHost::new();
        for (open, close) in [("[", "]"), ("{", "}"), ("(", ")"), ("f(", ")")] {
            let n = MAX_DEPTH + 1;
            let deep = format!("kinds({}{})", open.repeat(n), close.repeat(n));
            assert!(
                matches!(host.run(&deep, &[]), Err(ScriptError::Syntax { .. })),
                "{open} nesting should be rejected"
            );
        }
        let shallow = format!("f({}{})", "[".repeat(8), "]".repeat(8));
        assert!(matches!(
            host.run(&shallow, &[]),
            Err(ScriptError::UnknownCommand(_))
        ));
    }

    #[test]
    fn dispatcher_survives_a_million_open_brackets() {
        use crate::dispatch::{Dispatcher, Reply};

        let mut dispatcher = Dispatcher::new(ScriptHost::new());
        for open in [b'[', b'{', b'('] {
            let mut request = vec![b'e'];
            request.resize(1_000_001, open);
            assert_eq!(dispatcher.handle(&request), Reply::Send(b"nil".to_vec()));
        }
        assert_eq!(
            dispatcher.handle(b"ekinds()"),
            Reply::Send(b"{\"SPMountainCar\",\"SPPointGather\",\"Point\"}".to_vec())
        );
    }

    #[test]
    fn oversized_counts_are_rejected() {
        let mut host = ScriptHost::new();
        assert!(matches!(
            host.run("init('Point', 1e300)", &[]),
            Err(ScriptError::Argument { .. })
        ));
        assert!(matches!(
            host.run(&format!("init('Point', {})", MAX_POOL_SIZE + 1), &[]),
            Err(ScriptError::Argument { .. })
        ));
        assert!(host.pool().is_none());

        let mut host = host_with("Point", 1);
        assert!(matches!(
            host.run("step({{1, 0}}, {1}, 1e18)", &[]),
            Err(ScriptError::Argument { .. })
        ));
        assert!(host.run(&format!("step({{{{1, 0}}}}, {{1}}, {MAX_REPEAT})"), &[]).is_ok());
    }

    #[test]
    fn missing_tensor_reference_is_an_error() {
        let mut host = host_with("Point", 1);
        assert!(matches!(
            host.run("step(TENSORLIST[0], TENSORLIST[1])", &[]),
            Err(ScriptError::MissingTensor { index: 0, available: 0 })
        ));
    }

    #[test]
    fn execute_runs_every_statement() {
        let mut host = ScriptHost::new();
        host.execute("import rllab_worker\nrllab_worker.init('Point', 3); reset()", Vec::new())
            .unwrap();
        assert_eq!(host.pool().map(EnvPool::len), Some(3));
    }
}
