use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

/// Refuse pathologically nested input before it exhausts the stack.
const MAX_DEPTH: usize = 64;

/// Decodes exactly one bencode value from a byte slice.
///
/// Strict form: any bytes remaining after the value are an error. This is
/// the right behaviour for DHT datagrams, which carry a single dictionary
/// and nothing else.
///
/// # Errors
///
/// Returns an error if the input is empty or truncated, contains invalid
/// bencode syntax, nests deeper than 64 levels, or has trailing bytes.
///
/// # Examples
///
/// ```
/// use mdht::bencode::decode;
///
/// let v = decode(b"d1:q4:ping1:t2:aa1:y1:qe").unwrap();
/// assert_eq!(v.get(b"q").and_then(|q| q.as_str()), Some("ping"));
/// ```
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, used) = decode_prefix(data)?;
    if used != data.len() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

/// Decodes one bencode value from the front of a byte slice.
///
/// Returns the value and the number of bytes consumed, leaving any
/// trailing bytes to the caller.
///
/// # Examples
///
/// ```
/// use mdht::bencode::{decode_prefix, Value};
///
/// let (v, used) = decode_prefix(b"i42espam").unwrap();
/// assert_eq!(v, Value::Integer(42));
/// assert_eq!(used, 4);
/// ```
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut cursor = Cursor { data, pos: 0 };
    let value = cursor.value(0)?;
    Ok((value, cursor.pos))
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<u8, BencodeError> {
        let byte = self.peek().ok_or(BencodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }

        match self.peek().ok_or(BencodeError::UnexpectedEof)? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            other => Err(BencodeError::UnexpectedByte(other)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1; // 'i'

        let negative = self.peek() == Some(b'-');
        if negative {
            self.pos += 1;
        }

        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        let digits = &self.data[start..self.pos];

        let bad = |digits: &[u8]| {
            BencodeError::InvalidInteger(String::from_utf8_lossy(digits).into_owned())
        };

        if self.next()? != b'e' || digits.is_empty() {
            return Err(bad(digits));
        }
        if digits[0] == b'0' && (negative || digits.len() > 1) {
            // i-0e and leading zeros are forbidden; i0e is the only zero.
            return Err(bad(digits));
        }

        // Accumulate in the negative domain so i64::MIN decodes without
        // overflowing before the sign is applied.
        let mut n: i64 = 0;
        for &digit in digits {
            n = n
                .checked_mul(10)
                .and_then(|n| n.checked_sub(i64::from(digit - b'0')))
                .ok_or_else(|| bad(digits))?;
        }
        if !negative {
            n = n.checked_neg().ok_or_else(|| bad(digits))?;
        }

        Ok(Value::Integer(n))
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let mut len: usize = 0;
        while let Some(digit @ b'0'..=b'9') = self.peek() {
            len = len
                .checked_mul(10)
                .and_then(|len| len.checked_add(usize::from(digit - b'0')))
                .ok_or(BencodeError::InvalidLength)?;
            self.pos += 1;
        }

        if self.next()? != b':' {
            return Err(BencodeError::InvalidLength);
        }
        if len > self.data.len() - self.pos {
            return Err(BencodeError::UnexpectedEof);
        }

        let bytes = Bytes::copy_from_slice(&self.data[self.pos..self.pos + len]);
        self.pos += len;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1; // 'l'
        let mut items = Vec::new();

        while self.peek().ok_or(BencodeError::UnexpectedEof)? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1; // 'e'

        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1; // 'd'
        let mut entries = BTreeMap::new();

        loop {
            match self.peek().ok_or(BencodeError::UnexpectedEof)? {
                b'e' => break,
                b'0'..=b'9' => {}
                other => return Err(BencodeError::UnexpectedByte(other)),
            }
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }
        self.pos += 1; // 'e'

        Ok(Value::Dict(entries))
    }
}
