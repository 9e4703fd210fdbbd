//! Parser for the Python literal syntax the listing helper prints.
//!
//! The helper prints `str()` of a list of dicts, so we need strings (with optional `u`/`b`
//! prefixes), integers (with an optional Python 2 `L` suffix), floats, `None`, booleans, lists,
//! tuples and dicts. Nothing is ever evaluated; the result is a [`serde_json::Value`] so the
//! usual serde machinery can type it.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Why a literal failed to parse.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid literal at byte {offset}: {reason}")]
pub struct LiteralError {
    /// Byte offset of the problem.
    pub offset: usize,
    /// What went wrong.
    pub reason: &'static str,
}

/// Parse one literal, rejecting trailing garbage.
pub fn parse(src: &str) -> Result<Value, LiteralError> {
    let mut parser = Parser { src, pos: 0 };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos != src.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &'static str) -> LiteralError {
        LiteralError {
            offset: self.pos,
            reason,
        }
    }

    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        self.skip_ws();
        match self.peek() {
            Some('[') => self.sequence('[', ']'),
            Some('(') => self.sequence('(', ')'),
            Some('{') => self.dict(),
            Some('\'' | '"') => self.string().map(Value::String),
            Some('u' | 'U' | 'b' | 'B')
                if self.rest()[1..].starts_with(['\'', '"']) =>
            {
                self.pos += 1;
                self.string().map(Value::String)
            }
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Value, LiteralError> {
        debug_assert!(self.peek() == Some(open));
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            if self.eat(close) {
                return Ok(Value::Array(items));
            }
            if !self.eat(',') {
                return Err(self.error("expected ',' between items"));
            }
        }
    }

    fn dict(&mut self) -> Result<Value, LiteralError> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            if self.eat('}') {
                return Ok(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => return Err(self.error("dict keys must be strings or numbers")),
            };
            if !self.eat(':') {
                return Err(self.error("expected ':' after dict key"));
            }
            let value = self.value()?;
            map.insert(key, value);
            if self.eat('}') {
                return Ok(Value::Object(map));
            }
            if !self.eat(',') {
                return Err(self.error("expected ',' between dict entries"));
            }
        }
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let Some(quote) = self.bump() else {
            return Err(self.error("unexpected end of input"));
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), LiteralError> {
        match self.bump() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('x') => out.push(self.hex_char(2)?),
            Some('u') => out.push(self.hex_char(4)?),
            Some('U') => out.push(self.hex_char(8)?),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return Err(self.error("unterminated escape")),
        }
        Ok(())
    }

    fn hex_char(&mut self, digits: usize) -> Result<char, LiteralError> {
        let hex = self
            .rest()
            .get(..digits)
            .ok_or_else(|| self.error("truncated hex escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid hex escape"))?;
        self.pos += digits;
        char::from_u32(code).ok_or_else(|| self.error("escape is not a valid character"))
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        if matches!(self.peek(), Some('L' | 'l')) {
            self.pos += 1;
        }

        if let Ok(int) = text.parse::<i64>() {
            return Ok(Value::Number(int.into()));
        }
        if let Ok(int) = text.parse::<u64>() {
            return Ok(Value::Number(int.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(LiteralError {
                offset: start,
                reason: "invalid number",
            })
    }

    fn keyword(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        match &self.src[start..self.pos] {
            "None" => Ok(Value::Null),
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            _ => Err(LiteralError {
                offset: start,
                reason: "unknown identifier",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn python2_datafile_listing() {
        let src = "[{'filename': u'scan.dat', 'directory': None, 'created_time': \
                   '2014-03-01 10:00:00+00:00', 'modification_time': '2014-03-02 11:00:00', \
                   'id': 9L, 'size': u'1024'}, {'id': 10, 'directory': u'raw/2014', \
                   'filename': u'it\\'s.txt', 'size': 5L}]";
        let value = parse(src).unwrap();
        assert_eq!(
            value,
            json!([
                {
                    "filename": "scan.dat",
                    "directory": null,
                    "created_time": "2014-03-01 10:00:00+00:00",
                    "modification_time": "2014-03-02 11:00:00",
                    "id": 9,
                    "size": "1024"
                },
                {"id": 10, "directory": "raw/2014", "filename": "it's.txt", "size": 5}
            ])
        );
    }

    #[test]
    fn scalars_and_containers() {
        assert_eq!(parse("None").unwrap(), Value::Null);
        assert_eq!(parse(" True ").unwrap(), json!(true));
        assert_eq!(parse("-3").unwrap(), json!(-3));
        assert_eq!(parse("2.5").unwrap(), json!(2.5));
        assert_eq!(parse("(1, 2,)").unwrap(), json!([1, 2]));
        assert_eq!(parse("[]").unwrap(), json!([]));
        assert_eq!(parse("{1: 'a'}").unwrap(), json!({"1": "a"}));
        assert_eq!(parse(r#""\x41é""#).unwrap(), json!("Aé"));
    }

    #[test]
    fn rejects_non_literals() {
        assert!(parse("").is_err());
        assert!(parse("Data set (ID 5) does not belong to experiment (ID 73).").is_err());
        assert!(parse("[1, 2").is_err());
        assert!(parse("[1 2]").is_err());
        assert!(parse("__import__('os')").is_err());
        assert!(parse("[1] trailing").is_err());
        assert!(parse("{'a' 1}").is_err());
    }
}
