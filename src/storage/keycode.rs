//! Keycode is a lexicographical order-preserving binary encoding for row keys.
//!
//! A row key is the table name followed by the row's primary key values, so
//! the encoded key of a row starts with the encoded key of every prefix of its
//! primary key, and with the table prefix. That makes "all rows under this
//! parent" a single prefix scan.
//!
//! * table name: escaped like a string.
//! * each key part: a type tag, then the value:
//!   * NULL: tag only. It sorts before every other value.
//!   * BOOL: `0x00` or `0x01`.
//!   * INT64: big-endian, sign bit flipped.
//!   * FLOAT64: big-endian, sign bit flipped, all bits flipped if negative.
//!   * STRING, BYTES, NUMERIC, JSON: `0x00` escaped as `0x00ff`, terminated with `0x0000`.
//!   * DATE: days since CE as INT64.
//!   * TIMESTAMP: seconds since epoch as INT64, then nanoseconds as big-endian u32.
//! * descending key parts have every byte inverted.

use chrono::{DateTime, Datelike, NaiveDate};

use crate::{
    error::{Error, Result},
    sql::types::Value,
};

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT64: u8 = 0x02;
const TAG_FLOAT64: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_DATE: u8 = 0x06;
const TAG_TIMESTAMP: u8 = 0x07;
const TAG_NUMERIC: u8 = 0x08;
const TAG_JSON: u8 = 0x09;

/// Prefix shared by every row key of `table`
pub fn encode_table(table: &str) -> Vec<u8> {
    let mut out = Vec::new();
    encode_bytes(&mut out, table.as_bytes());
    out
}

/// Encodes a row key, or a key prefix when fewer parts than the primary key are given.
/// Each part is a value and whether its key column is descending.
pub fn encode_key<'a>(table: &str, parts: impl IntoIterator<Item = (&'a Value, bool)>) -> Result<Vec<u8>> {
    let mut out = encode_table(table);
    for (value, desc) in parts {
        let start = out.len();
        encode_value(&mut out, value)?;
        if desc {
            out[start..].iter_mut().for_each(|b| *b = !*b);
        }
    }
    Ok(out)
}

fn encode_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(*b as u8);
        }
        Value::Int64(i) => {
            out.push(TAG_INT64);
            encode_i64(out, *i);
        }
        Value::Float64(f) => {
            out.push(TAG_FLOAT64);
            let mut bits = f.to_bits();
            if bits >> 63 == 1 {
                bits = !bits;
            } else {
                bits ^= 1 << 63;
            }
            out.extend(bits.to_be_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            encode_bytes(out, s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            encode_bytes(out, b);
        }
        Value::Date(d) => {
            out.push(TAG_DATE);
            encode_i64(out, d.num_days_from_ce() as i64);
        }
        Value::Timestamp(t) => {
            out.push(TAG_TIMESTAMP);
            encode_i64(out, t.timestamp());
            out.extend(t.timestamp_subsec_nanos().to_be_bytes());
        }
        // TODO: order NUMERIC by value rather than by its decimal text
        Value::Numeric(n) => {
            out.push(TAG_NUMERIC);
            encode_bytes(out, n.as_bytes());
        }
        Value::Json(j) => {
            out.push(TAG_JSON);
            encode_bytes(out, j.as_bytes());
        }
        Value::Array(_) | Value::Struct(_) => {
            return Err(Error::Internal(format!("value {} cannot be part of a key", value)));
        }
    }
    Ok(())
}

fn encode_i64(out: &mut Vec<u8>, i: i64) {
    out.extend((i ^ i64::MIN).to_be_bytes());
}

fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == 0x00 {
            out.extend([0x00, 0xff]);
        } else {
            out.push(b);
        }
    }
    out.extend([0x00, 0x00]);
}

/// Decodes a row key into its table name and key values, given the
/// direction of each key part.
pub fn decode_key(key: &[u8], desc: &[bool]) -> Result<(String, Vec<Value>)> {
    let mut decoder = Decoder { input: key, invert: false };
    let table = String::from_utf8(decoder.bytes()?)?;
    let mut values = Vec::with_capacity(desc.len());
    for &desc in desc {
        decoder.invert = desc;
        values.push(decoder.value()?);
    }
    if !decoder.input.is_empty() {
        return Err(Error::Internal(format!(
            "unexpected trailing bytes {:x?} at end of key",
            decoder.input
        )));
    }
    Ok((table, values))
}

struct Decoder<'a> {
    input: &'a [u8],
    invert: bool,
}

impl Decoder<'_> {
    fn take(&mut self, len: usize) -> Result<Vec<u8>> {
        if self.input.len() < len {
            return Err(Error::Internal(format!(
                "insufficient bytes, expected {} got {}",
                len,
                self.input.len()
            )));
        }
        let (bytes, rest) = self.input.split_at(len);
        self.input = rest;
        Ok(bytes.iter().map(|b| if self.invert { !b } else { *b }).collect())
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i64(&mut self) -> Result<i64> {
        let bytes: [u8; 8] = self.take(8)?.as_slice().try_into()?;
        Ok(i64::from_be_bytes(bytes) ^ i64::MIN)
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match self.byte()? {
                0x00 => match self.byte()? {
                    0x00 => return Ok(out),
                    0xff => out.push(0x00),
                    b => {
                        return Err(Error::Internal(format!("invalid escape sequence 0x00{:02x}", b)));
                    }
                },
                b => out.push(b),
            }
        }
    }

    fn value(&mut self) -> Result<Value> {
        let tag = self.byte()?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_BOOL => Value::Bool(self.byte()? != 0),
            TAG_INT64 => Value::Int64(self.i64()?),
            TAG_FLOAT64 => {
                let bytes: [u8; 8] = self.take(8)?.as_slice().try_into()?;
                let mut bits = u64::from_be_bytes(bytes);
                if bits >> 63 == 1 {
                    bits ^= 1 << 63;
                } else {
                    bits = !bits;
                }
                Value::Float64(f64::from_bits(bits))
            }
            TAG_STRING => Value::String(String::from_utf8(self.bytes()?)?),
            TAG_BYTES => Value::Bytes(self.bytes()?),
            TAG_DATE => {
                let days = self.i64()?;
                let date = i32::try_from(days)
                    .ok()
                    .and_then(NaiveDate::from_num_days_from_ce_opt)
                    .ok_or_else(|| Error::Internal(format!("invalid date {}", days)))?;
                Value::Date(date)
            }
            TAG_TIMESTAMP => {
                let secs = self.i64()?;
                let nanos = u32::from_be_bytes(self.take(4)?.as_slice().try_into()?);
                let ts = DateTime::from_timestamp(secs, nanos)
                    .ok_or_else(|| Error::Internal(format!("invalid timestamp {}.{}", secs, nanos)))?;
                Value::Timestamp(ts)
            }
            TAG_NUMERIC => Value::Numeric(String::from_utf8(self.bytes()?)?),
            TAG_JSON => Value::Json(String::from_utf8(self.bytes()?)?),
            tag => return Err(Error::Internal(format!("invalid key tag {:#04x}", tag))),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate};

    use super::{decode_key, encode_key, encode_table};
    use crate::{error::Result, sql::types::Value};

    fn key(values: &[Value], desc: bool) -> Vec<u8> {
        encode_key("T", values.iter().map(|v| (v, desc))).unwrap()
    }

    #[test]
    fn test_order_preserved() {
        let ordered = [
            vec![Value::Null],
            vec![Value::Int64(i64::MIN)],
            vec![Value::Int64(-1)],
            vec![Value::Int64(0)],
            vec![Value::Int64(1), Value::Null],
            vec![Value::Int64(1), Value::from("a")],
            vec![Value::Int64(1), Value::from("a\0")],
            vec![Value::Int64(1), Value::from("ab")],
            vec![Value::Int64(i64::MAX)],
        ];
        for pair in ordered.windows(2) {
            assert!(key(&pair[0], false) < key(&pair[1], false), "{:?} < {:?}", pair[0], pair[1]);
            assert!(key(&pair[0], true) > key(&pair[1], true), "{:?} > {:?} desc", pair[0], pair[1]);
        }

        let floats = [f64::NEG_INFINITY, -1.5, -0.0, 0.0, 2.25, f64::INFINITY];
        for pair in floats.windows(2) {
            assert!(key(&[Value::Float64(pair[0])], false) < key(&[Value::Float64(pair[1])], false));
        }
    }

    #[test]
    fn test_prefix() -> Result<()> {
        let parent = encode_key("Parent", [(&Value::Int64(1), false)])?;
        let child = encode_key("Parent", [(&Value::Int64(1), false), (&Value::from("x"), true)])?;
        let other = encode_key("Parent", [(&Value::Int64(11), false)])?;
        assert!(child.starts_with(&parent));
        assert!(!other.starts_with(&parent));
        assert!(parent.starts_with(&encode_table("Parent")));
        assert!(!encode_table("ParentX").starts_with(&encode_table("Parent")));
        Ok(())
    }

    #[test]
    fn test_decode() -> Result<()> {
        let values = vec![
            Value::from("a\0b"),
            Value::Int64(-7),
            Value::Float64(-2.5),
            Value::Bytes(vec![0, 255, 1]),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
            Value::Timestamp(DateTime::from_timestamp(1_700_000_000, 5).unwrap()),
            Value::Null,
            Value::Bool(true),
        ];
        let desc = [false, true, false, true, false, true, false, true];
        let encoded = encode_key("Tbl", values.iter().zip(desc))?;
        assert_eq!(decode_key(&encoded, &desc)?, ("Tbl".to_string(), values));

        assert!(decode_key(&encoded[..encoded.len() - 1], &desc).is_err());
        assert!(encode_key("T", [(&Value::Array(vec![]), false)]).is_err());
        Ok(())
    }
}
