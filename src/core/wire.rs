//! Value codec for the worker protocol.
//!
//! Values travel as Lua-style table literals (`{1,2.5,["k"]="v"}`) with raw
//! `f64` tensors spliced in as binary segments. A tensor is written as the
//! marker `TENSOR_BYTES`, an 8-byte little-endian block length, then the block:
//!
//! ```text
//! +--------+-------------+--------+----------------+
//! | ndim   | shape[ndim] | count  | payload[count] |
//! | i64 LE | i64 LE      | i64 LE | f64 LE         |
//! +--------+-------------+--------+----------------+
//! ```
//!
//! Requests carry the same tensor segments inside command text; the decoder
//! swaps each one for a `TENSORLIST[i]` placeholder.

use std::fmt;
use std::fmt::Write as _;

use thiserror::Error;

pub const TENSOR_MARKER: &[u8] = b"TENSOR_BYTES";
pub const TENSOR_PLACEHOLDER: &str = "TENSORLIST";
pub const NIL: &[u8] = b"nil";

/// Deepest table nesting `decode_value` accepts.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    #[error("unsupported value: {0}")]
    UnsupportedType(&'static str),
    #[error("truncated input at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("tensor of shape {shape:?} holds {expected} elements, {found} declared")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        found: usize,
    },
    #[error("malformed input at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Integer view; doubles qualify only when they hold an exact integer.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            Number::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                Some(f as i64)
            }
            Number::Float(_) => None,
        }
    }
}

/// Dense row-major `f64` array. The payload length always equals the shape product.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, WireError> {
        let expected = shape_product(&shape).ok_or(WireError::Malformed {
            offset: 0,
            reason: format!("shape {shape:?} overflows"),
        })?;
        if expected != data.len() {
            return Err(WireError::ShapeMismatch {
                shape,
                expected,
                found: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Split along the leading axis. A 0-d tensor is a single row.
    pub fn rows(&self) -> Vec<Vec<f64>> {
        match self.shape.first() {
            None => vec![self.data.clone()],
            Some(&0) => Vec::new(),
            Some(&n) => {
                let width = self.data.len() / n;
                if width == 0 {
                    return vec![Vec::new(); n];
                }
                self.data.chunks(width).map(<[f64]>::to_vec).collect()
            }
        }
    }
}

fn shape_product(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Str(String),
    Number(Number),
    Tensor(Tensor),
    Seq(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Number(_) => "number",
            Value::Tensor(_) => "tensor",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "map",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n.as_f64()),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Tensor(t) if t.len() == 1 => Some(t.data()[0]),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness as the controller sees it: numbers are true when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(n.as_f64() != 0.0),
            Value::Nil => Some(false),
            _ => None,
        }
    }

    /// Look up a string key in a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Str(k.into()), v))
                .collect(),
        )
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(Number::Int(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Number(Number::Int(v as i64))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(Number::Int(v as i64))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(Number::Float(v))
    }
}

impl From<Tensor> for Value {
    fn from(v: Tensor) -> Self {
        Value::Tensor(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Tensor(Tensor::from_vec(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Value::Seq(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "\"{s}\""),
            Value::Number(Number::Int(i)) => write!(f, "{i}"),
            Value::Number(Number::Float(x)) => write!(f, "{x:?}"),
            Value::Tensor(t) => write!(f, "<tensor {:?}>", t.shape()),
            Value::Seq(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "[{k}]={v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────

pub fn encode(value: &Value) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    encode_into(value, &mut out)?;
    Ok(out)
}

pub fn encode_into(value: &Value, out: &mut Vec<u8>) -> Result<(), WireError> {
    match value {
        Value::Nil => out.extend_from_slice(NIL),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Str(s) => {
            // No escaping: callers keep quotes out of strings.
            out.push(b'"');
            out.extend_from_slice(s.as_bytes());
            out.push(b'"');
        }
        Value::Number(n) => write_number(*n, out),
        Value::Tensor(t) => write_tensor(t, out),
        Value::Map(entries) => {
            out.push(b'{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.push(b'[');
                encode_key(k, out)?;
                out.extend_from_slice(b"]=");
                encode_into(v, out)?;
            }
            out.push(b'}');
        }
        Value::Seq(items) => {
            out.push(b'{');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                encode_into(item, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn encode_key(key: &Value, out: &mut Vec<u8>) -> Result<(), WireError> {
    match key {
        Value::Str(_) | Value::Number(_) | Value::Bool(_) => encode_into(key, out),
        Value::Nil => Err(WireError::UnsupportedType("nil table key")),
        Value::Tensor(_) => Err(WireError::UnsupportedType("tensor table key")),
        Value::Seq(_) | Value::Map(_) => Err(WireError::UnsupportedType("table as table key")),
    }
}

fn write_number(n: Number, out: &mut Vec<u8>) {
    match n {
        Number::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
        // Non-finite values are spelled as expressions the controller evaluates.
        Number::Float(f) if f.is_nan() => out.extend_from_slice(b"0/0"),
        Number::Float(f) if f == f64::INFINITY => out.extend_from_slice(b"1/0"),
        Number::Float(f) if f == f64::NEG_INFINITY => out.extend_from_slice(b"-1/0"),
        // Debug keeps a fraction or exponent, so doubles never come back as integers.
        Number::Float(f) => out.extend_from_slice(format!("{f:?}").as_bytes()),
    }
}

fn write_i64(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_tensor(t: &Tensor, out: &mut Vec<u8>) {
    let block_len = 8 * (2 + t.shape.len() + t.data.len());
    out.reserve(TENSOR_MARKER.len() + 8 + block_len);
    out.extend_from_slice(TENSOR_MARKER);
    write_i64(out, block_len as i64);
    write_i64(out, t.shape.len() as i64);
    for &d in &t.shape {
        write_i64(out, d as i64);
    }
    write_i64(out, t.data.len() as i64);
    for &x in &t.data {
        out.extend_from_slice(&x.to_le_bytes());
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────

/// Bounds-checked cursor; every read past the end is a `TruncatedInput`.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            base: 0,
        }
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if n > self.remaining() {
            return Err(WireError::TruncatedInput {
                offset: self.offset(),
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_i64(&mut self) -> Result<i64, WireError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    fn read_size(&mut self, what: &str) -> Result<usize, WireError> {
        let at = self.offset();
        let v = self.read_i64()?;
        usize::try_from(v).map_err(|_| WireError::Malformed {
            offset: at,
            reason: format!("negative {what} ({v})"),
        })
    }

    fn malformed(&self, reason: impl Into<String>) -> WireError {
        WireError::Malformed {
            offset: self.offset(),
            reason: reason.into(),
        }
    }
}

/// Read one tensor segment; the cursor sits just past the marker.
fn read_tensor(r: &mut Reader<'_>) -> Result<Tensor, WireError> {
    let block_len = r.read_size("tensor block length")?;
    let block_offset = r.offset();
    let mut b = Reader {
        buf: r.take(block_len)?,
        pos: 0,
        base: block_offset,
    };

    let ndim = b.read_size("dimension count")?;
    if ndim > b.remaining() / 8 {
        return Err(WireError::TruncatedInput {
            offset: b.offset(),
            needed: ndim.saturating_mul(8),
            available: b.remaining(),
        });
    }
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        shape.push(b.read_size("axis extent")?);
    }
    let count = b.read_size("element count")?;
    let expected = shape_product(&shape).ok_or_else(|| b.malformed("tensor shape overflows"))?;
    if count != expected {
        return Err(WireError::ShapeMismatch {
            shape,
            expected,
            found: count,
        });
    }
    let payload_len = count
        .checked_mul(8)
        .ok_or_else(|| b.malformed("tensor payload overflows"))?;
    let payload = b.take(payload_len)?;
    let data = payload
        .chunks_exact(8)
        .map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            f64::from_le_bytes(raw)
        })
        .collect();
    // Bytes left inside the declared block are padding.
    Ok(Tensor { shape, data })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn push_text(command: &mut String, segment: &[u8], offset: usize) -> Result<(), WireError> {
    let text = std::str::from_utf8(segment).map_err(|e| WireError::Malformed {
        offset: offset + e.valid_up_to(),
        reason: "command text is not valid utf-8".to_string(),
    })?;
    command.push_str(text);
    Ok(())
}

/// Pull the tensors out of a request body.
///
/// Returns the command text with every tensor segment replaced by
/// `TENSORLIST[i]` (in order of appearance) and the decoded tensors.
pub fn decode_request(bytes: &[u8]) -> Result<(String, Vec<Tensor>), WireError> {
    let mut command = String::with_capacity(bytes.len());
    let mut tensors = Vec::new();
    let mut r = Reader::new(bytes);

    loop {
        let rest = r.rest();
        let Some(at) = find(rest, TENSOR_MARKER) else {
            push_text(&mut command, rest, r.offset())?;
            break;
        };
        push_text(&mut command, &rest[..at], r.offset())?;
        r.take(at + TENSOR_MARKER.len())?;
        tensors.push(read_tensor(&mut r)?);
        // Writing to a String cannot fail.
        let _ = write!(command, "{}[{}]", TENSOR_PLACEHOLDER, tensors.len() - 1);
    }

    Ok((command, tensors))
}

/// Parse one encoded value, e.g. a reply from the worker.
pub fn decode_value(bytes: &[u8]) -> Result<Value, WireError> {
    let mut r = Reader::new(bytes);
    skip_ws(&mut r);
    let value = parse_value(&mut r, 0)?;
    skip_ws(&mut r);
    if r.remaining() > 0 {
        return Err(r.malformed("trailing bytes after value"));
    }
    Ok(value)
}

fn skip_ws(r: &mut Reader<'_>) {
    while matches!(r.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
        r.pos += 1;
    }
}

fn eat_word(r: &mut Reader<'_>, word: &[u8]) -> bool {
    if !r.rest().starts_with(word) {
        return false;
    }
    let after = r.rest().get(word.len()).copied();
    if after.is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
        return false;
    }
    r.pos += word.len();
    true
}

fn parse_value(r: &mut Reader<'_>, depth: usize) -> Result<Value, WireError> {
    if r.rest().starts_with(TENSOR_MARKER) {
        r.take(TENSOR_MARKER.len())?;
        return read_tensor(r).map(Value::Tensor);
    }
    if eat_word(r, b"nil") {
        return Ok(Value::Nil);
    }
    if eat_word(r, b"true") {
        return Ok(Value::Bool(true));
    }
    if eat_word(r, b"false") {
        return Ok(Value::Bool(false));
    }
    for (spelling, v) in [
        (&b"0/0"[..], f64::NAN),
        (&b"1/0"[..], f64::INFINITY),
        (&b"-1/0"[..], f64::NEG_INFINITY),
    ] {
        if eat_word(r, spelling) {
            return Ok(Value::Number(Number::Float(v)));
        }
    }

    match r.peek() {
        Some(b'"') => {
            r.pos += 1;
            let start = r.offset();
            let Some(len) = r.rest().iter().position(|&c| c == b'"') else {
                return Err(r.malformed("unterminated string"));
            };
            let raw = r.take(len)?;
            r.pos += 1;
            let s = std::str::from_utf8(raw).map_err(|e| WireError::Malformed {
                offset: start + e.valid_up_to(),
                reason: "string is not valid utf-8".to_string(),
            })?;
            Ok(Value::Str(s.to_string()))
        }
        Some(b'{') if depth >= MAX_DEPTH => {
            Err(r.malformed(format!("tables nested deeper than {MAX_DEPTH}")))
        }
        Some(b'{') => parse_table(r, depth + 1),
        Some(c) if c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.') => parse_number(r),
        Some(c) => Err(r.malformed(format!("unexpected byte {:?}", c as char))),
        None => Err(WireError::TruncatedInput {
            offset: r.offset(),
            needed: 1,
            available: 0,
        }),
    }
}

fn parse_number(r: &mut Reader<'_>) -> Result<Value, WireError> {
    let start = r.offset();
    let len = r
        .rest()
        .iter()
        .position(|c| !(c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.' | b'e' | b'E')))
        .unwrap_or(r.remaining());
    let raw = r.take(len)?;
    // Only ASCII digits and signs were consumed.
    let text = std::str::from_utf8(raw).unwrap_or_default();
    let is_float = text.contains(['.', 'e', 'E']);
    if !is_float {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::Number(Number::Int(i)));
        }
    }
    text.parse::<f64>()
        .map(|f| Value::Number(Number::Float(f)))
        .map_err(|_| WireError::Malformed {
            offset: start,
            reason: format!("bad number {text:?}"),
        })
}

fn expect(r: &mut Reader<'_>, c: u8) -> Result<(), WireError> {
    skip_ws(r);
    if r.peek() == Some(c) {
        r.pos += 1;
        Ok(())
    } else {
        Err(r.malformed(format!("expected {:?}", c as char)))
    }
}

fn parse_table(r: &mut Reader<'_>, depth: usize) -> Result<Value, WireError> {
    expect(r, b'{')?;
    let mut items = Vec::new();
    let mut entries = Vec::new();

    loop {
        skip_ws(r);
        if r.peek() == Some(b'}') {
            r.pos += 1;
            break;
        }
        if r.peek() == Some(b'[') {
            r.pos += 1;
            skip_ws(r);
            let key = parse_value(r, depth)?;
            expect(r, b']')?;
            expect(r, b'=')?;
            skip_ws(r);
            entries.push((key, parse_value(r, depth)?));
        } else {
            items.push(parse_value(r, depth)?);
        }
        if !items.is_empty() && !entries.is_empty() {
            return Err(r.malformed("table mixes keyed and positional entries"));
        }
        skip_ws(r);
        match r.peek() {
            Some(b',') => r.pos += 1,
            Some(b'}') => {}
            _ => return Err(r.malformed("expected ',' or '}'")),
        }
    }

    if entries.is_empty() {
        Ok(Value::Seq(items))
    } else {
        Ok(Value::Map(entries))
    }
}
