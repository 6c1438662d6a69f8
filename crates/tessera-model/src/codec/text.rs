//! Text encoding
//!
//! ```text
//! key {
//!   id: "jd"
//! }
//! name: "John Doe"
//! nicknames: "JD"
//! nicknames: "Johnny"
//! score: -inf
//! ```
//!
//! Scalars are `name: value`, messages are `name { ... }` (a colon before the
//! brace is accepted), repeated fields repeat the line. Strings and bytes are
//! double-quoted with C-style escapes and `\xHH` for other bytes. `#` starts a
//! comment that runs to the end of the line.

use crate::model::Model;
use crate::schema::{FieldDescriptor, FieldType, Schema};
use crate::value::Value;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::CharIndices;
use std::sync::Arc;
use tessera_common::{Error, Result};

const INDENT: &str = "  ";

// ---- Printing ----

pub(crate) fn encode(model: &Model) -> String {
    let mut out = String::new();
    print_message(&mut out, model, 0);
    out
}

fn print_message(out: &mut String, model: &Model, depth: usize) {
    for (field, value) in model.fields() {
        match value {
            Value::List(items) => {
                for item in items {
                    print_field(out, field.name(), item, depth);
                }
            }
            value => print_field(out, field.name(), value, depth),
        }
    }
}

fn print_field(out: &mut String, name: &str, value: &Value, depth: usize) {
    let indent = INDENT.repeat(depth);
    match value {
        Value::Message(nested) => {
            out.push_str(&format!("{indent}{name} {{\n"));
            print_message(out, nested, depth + 1);
            out.push_str(&format!("{indent}}}\n"));
        }
        scalar => {
            out.push_str(&format!("{indent}{name}: {}\n", scalar_text(scalar)));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Double(d) if d.is_nan() => "nan".to_string(),
        Value::Double(d) if d.is_infinite() => {
            if d.is_sign_positive() { "inf" } else { "-inf" }.to_string()
        }
        Value::Double(d) => format!("{d:?}"),
        Value::String(s) => {
            let mut out = String::from('"');
            for c in s.chars() {
                match u8::try_from(c) {
                    Ok(b) if c.is_ascii() => push_escaped(&mut out, b),
                    _ => out.push(c),
                }
            }
            out.push('"');
            out
        }
        Value::Bytes(b) => {
            let mut out = String::from('"');
            for &byte in b {
                push_escaped(&mut out, byte);
            }
            out.push('"');
            out
        }
        Value::Message(_) | Value::List(_) => String::new(),
    }
}

fn push_escaped(out: &mut String, b: u8) {
    match b {
        b'"' => out.push_str("\\\""),
        b'\\' => out.push_str("\\\\"),
        b'\n' => out.push_str("\\n"),
        b'\r' => out.push_str("\\r"),
        b'\t' => out.push_str("\\t"),
        0x20..=0x7e => out.push(char::from(b)),
        _ => out.push_str(&format!("\\x{b:02x}")),
    }
}

// ---- Tokenizing ----

#[derive(Debug, PartialEq)]
enum Token {
    /// Field name or bare scalar (numbers, `true`, `inf`, ...)
    Word(String),
    /// Unescaped contents of a quoted literal
    Quoted(Vec<u8>),
    Colon,
    Open,
    Close,
}

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> std::result::Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        while let Some(&(start, c)) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '#' => {
                    while self.chars.next_if(|&(_, c)| c != '\n').is_some() {}
                }
                ':' => {
                    self.chars.next();
                    tokens.push(Token::Colon);
                }
                '{' => {
                    self.chars.next();
                    tokens.push(Token::Open);
                }
                '}' => {
                    self.chars.next();
                    tokens.push(Token::Close);
                }
                '"' => {
                    self.chars.next();
                    tokens.push(Token::Quoted(self.quoted(start)?));
                }
                c if is_word_char(c) => {
                    let mut end = start;
                    while let Some((i, c)) = self.chars.next_if(|&(_, c)| is_word_char(c)) {
                        end = i + c.len_utf8();
                    }
                    tokens.push(Token::Word(self.source[start..end].to_string()));
                }
                other => return Err(format!("unexpected '{other}' at offset {start}")),
            }
        }
        Ok(tokens)
    }

    fn quoted(&mut self, start: usize) -> std::result::Result<Vec<u8>, String> {
        let mut bytes = Vec::new();
        loop {
            let Some((_, c)) = self.chars.next() else {
                return Err(format!("unterminated string starting at offset {start}"));
            };
            match c {
                '"' => return Ok(bytes),
                '\\' => {
                    let escaped = match self.chars.next().map(|(_, c)| c) {
                        Some('n') => b'\n',
                        Some('r') => b'\r',
                        Some('t') => b'\t',
                        Some('"') => b'"',
                        Some('\'') => b'\'',
                        Some('\\') => b'\\',
                        Some('x') => self.hex_byte(start)?,
                        other => return Err(format!("bad escape {other:?} in string at offset {start}")),
                    };
                    bytes.push(escaped);
                }
                c => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    fn hex_byte(&mut self, start: usize) -> std::result::Result<u8, String> {
        let mut value = 0u8;
        for _ in 0..2 {
            let digit = self
                .chars
                .next()
                .and_then(|(_, c)| c.to_digit(16))
                .ok_or_else(|| format!("bad \\x escape in string at offset {start}"))?;
            value = value * 16 + u8::try_from(digit).unwrap_or_default();
        }
        Ok(value)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '+')
}

// ---- Parsing ----

pub(crate) fn decode(schema: &Arc<Schema>, source: &str) -> Result<Model> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|msg| Error::inflate(schema.full_name(), msg))?;
    let mut tokens = tokens.into_iter().peekable();
    parse_message(schema, &mut tokens, false)
}

fn parse_message(
    schema: &Arc<Schema>,
    tokens: &mut Peekable<std::vec::IntoIter<Token>>,
    nested: bool,
) -> Result<Model> {
    let fail = |msg: String| Error::inflate(schema.full_name(), msg);
    let mut singles: BTreeMap<String, Value> = BTreeMap::new();
    let mut lists: BTreeMap<String, Vec<Value>> = BTreeMap::new();

    loop {
        let name = match tokens.next() {
            None if nested => return Err(fail("missing '}'".into())),
            None => break,
            Some(Token::Close) if nested => break,
            Some(Token::Word(name)) => name,
            Some(other) => return Err(fail(format!("expected a field name, got {other:?}"))),
        };
        let field = schema
            .field(&name)
            .ok_or_else(|| fail(format!("unknown field '{name}'")))?;
        if tokens.next_if_eq(&Token::Colon).is_some() && tokens.peek() != Some(&Token::Open) {
            let token = tokens
                .next()
                .ok_or_else(|| fail(format!("missing value for '{name}'")))?;
            let value = scalar_value(field, token).map_err(fail)?;
            record(&mut singles, &mut lists, field, value).map_err(fail)?;
        } else if tokens.next_if_eq(&Token::Open).is_some() {
            let nested_schema = field
                .ty()
                .message_schema()
                .ok_or_else(|| fail(format!("'{name}' is not a message field")))?;
            let value = Value::Message(parse_message(nested_schema, tokens, true)?);
            record(&mut singles, &mut lists, field, value).map_err(fail)?;
        } else {
            return Err(fail(format!("expected ':' or '{{' after '{name}'")));
        }
    }

    let mut model = Model::new(schema);
    for (name, value) in singles {
        model = super::set_decoded(&model, &name, value)?;
    }
    for (name, items) in lists {
        model = super::set_decoded(&model, &name, Value::List(items))?;
    }
    Ok(model)
}

fn record(
    singles: &mut BTreeMap<String, Value>,
    lists: &mut BTreeMap<String, Vec<Value>>,
    field: &FieldDescriptor,
    value: Value,
) -> std::result::Result<(), String> {
    if field.is_repeated() {
        lists.entry(field.name().to_string()).or_default().push(value);
        Ok(())
    } else if singles.insert(field.name().to_string(), value).is_some() {
        Err(format!("'{}' appears more than once", field.name()))
    } else {
        Ok(())
    }
}

fn scalar_value(field: &FieldDescriptor, token: Token) -> std::result::Result<Value, String> {
    let expected = || format!("'{}' expects {}", field.name(), field.ty().name());
    match (field.ty(), token) {
        (FieldType::String, Token::Quoted(bytes)) => String::from_utf8(bytes)
            .map(Value::String)
            .map_err(|_| format!("'{}' is not valid UTF-8", field.name())),
        (FieldType::Bytes, Token::Quoted(bytes)) => Ok(Value::Bytes(bytes)),
        (FieldType::Bool, Token::Word(word)) => match word.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(expected()),
        },
        (FieldType::Int64, Token::Word(word)) => {
            word.parse().map(Value::Int).map_err(|_| expected())
        }
        (FieldType::UInt64, Token::Word(word)) => {
            word.parse().map(Value::UInt).map_err(|_| expected())
        }
        (FieldType::Double, Token::Word(word)) => match word.to_ascii_lowercase().as_str() {
            "inf" | "infinity" => Ok(Value::Double(f64::INFINITY)),
            "-inf" | "-infinity" => Ok(Value::Double(f64::NEG_INFINITY)),
            "nan" => Ok(Value::Double(f64::NAN)),
            _ => word.parse().map(Value::Double).map_err(|_| expected()),
        },
        _ => Err(expected()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{john_doe, person_schema};

    #[test]
    fn test_layout() {
        let text = encode(&john_doe());
        assert_eq!(
            text,
            "name: \"John Doe\"\n\
             contact_info {\n  email_address: \"john@doe.com\"\n  phone_e164: \"+12345678910\"\n}\n\
             nicknames: \"JD\"\n"
        );
    }

    #[test]
    fn test_escapes_control_bytes() {
        let model = Model::new(&person_schema())
            .with("avatar", vec![0x00u8, b'\t', b'"', 0x7f, b'a'])
            .unwrap();
        let text = encode(&model);
        assert_eq!(text, "avatar: \"\\x00\\t\\\"\\x7fa\"\n");
        assert_eq!(decode(&person_schema(), &text).unwrap(), model);
    }

    #[test]
    fn test_parses_hand_written_text() {
        let source = r#"
            # a comment
            name: "J\x44"   # trailing comment
            contact_info: { email_address: "a@b.c" }
            nicknames: "one"
            nicknames: "two"
            age: 7
            score: -Infinity
            avatar: "\x00\xff\""
            verified: true
        "#;
        let model = decode(&person_schema(), source).unwrap();
        assert_eq!(model.get("name").and_then(Value::as_str), Some("JD"));
        assert_eq!(model.get("age").and_then(Value::as_u64), Some(7));
        assert_eq!(
            model.get("score").and_then(Value::as_f64),
            Some(f64::NEG_INFINITY)
        );
        assert_eq!(
            model.get("avatar").and_then(Value::as_bytes),
            Some(&[0x00, 0xff, b'"'][..])
        );
        assert_eq!(model.get("nicknames").and_then(Value::as_list).map(<[_]>::len), Some(2));
        assert_eq!(model.get("verified").and_then(Value::as_bool), Some(true));
    }

    #[test]
    fn test_rejects_malformed_text() {
        let schema = person_schema();
        for source in [
            "name \"x\"",
            "name: \"unterminated",
            "name: \"a\" name: \"b\"",
            "contact_info { email_address: \"x\"",
            "unknown: 1",
            "age: -1",
            "name: 5",
            "name: \"\\q\"",
            "}",
            "age: @",
        ] {
            assert!(
                matches!(decode(&schema, source), Err(Error::ModelInflate { .. })),
                "accepted {source:?}"
            );
        }
    }

    #[test]
    fn test_unicode_survives() {
        let model = john_doe().with("name", "Jöhn Døe ✓").unwrap();
        let text = encode(&model);
        assert!(text.contains("Jöhn Døe ✓"));
        assert_eq!(decode(&person_schema(), &text).unwrap(), model);
    }
}
