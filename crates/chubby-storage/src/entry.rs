//! Operation log entries and their on-disk record format
//!
//! Record format (all integers little-endian):
//! ```text
//! +--------+------+------+------+------+------+-------+------+
//! | Opcode | ULen | User | KLen | Key  | VLen | Value | Term |
//! | 1B     | 4B   | var  | 4B   | var  | 4B   | var   | 8B   |
//! +--------+------+------+------+------+------+-------+------+
//! ```

use bytes::{Buf, BufMut};
use chubby_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Size of a record with empty user, key and value
pub const MIN_RECORD_SIZE: usize = 1 + 4 + 4 + 4 + 8;

/// Operation carried by a log entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogOperation {
    /// Leader barrier, applies nothing
    #[default]
    NoOp = 0,
    /// Set `key` to `value`
    Put = 1,
    /// Remove `key`
    Delete = 2,
}

impl LogOperation {
    /// Wire opcode
    pub fn opcode(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for LogOperation {
    type Error = Error;

    fn try_from(opcode: u8) -> Result<Self> {
        match opcode {
            0 => Ok(Self::NoOp),
            1 => Ok(Self::Put),
            2 => Ok(Self::Delete),
            other => Err(Error::data_loss(format!("unknown log opcode {other}"))),
        }
    }
}

/// One replicated operation. Immutable once written; its slot index is
/// the position in the log, not part of the record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub operation: LogOperation,
    pub user: String,
    pub key: String,
    pub value: String,
    pub term: i64,
}

impl LogEntry {
    /// Create a new entry
    pub fn new(
        operation: LogOperation,
        user: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        term: i64,
    ) -> Self {
        Self {
            operation,
            user: user.into(),
            key: key.into(),
            value: value.into(),
            term,
        }
    }

    /// A no-op entry for `term`
    pub fn no_op(term: i64) -> Self {
        Self {
            term,
            ..Self::default()
        }
    }

    /// A put entry
    pub fn put(
        user: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        term: i64,
    ) -> Self {
        Self::new(LogOperation::Put, user, key, value, term)
    }

    /// A delete entry
    pub fn delete(user: impl Into<String>, key: impl Into<String>, term: i64) -> Self {
        Self::new(LogOperation::Delete, user, key, "", term)
    }

    /// Size of the encoded record in bytes
    pub fn encoded_len(&self) -> usize {
        MIN_RECORD_SIZE + self.user.len() + self.key.len() + self.value.len()
    }

    /// Serialize to the on-disk record
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.put_u8(self.operation.opcode());
        put_field(&mut buf, "user", &self.user)?;
        put_field(&mut buf, "key", &self.key)?;
        put_field(&mut buf, "value", &self.value)?;
        buf.put_i64_le(self.term);
        Ok(buf)
    }

    /// Parse an on-disk record. The record must be consumed exactly.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(Error::data_loss(format!(
                "log record too small: {} bytes",
                data.len()
            )));
        }

        let operation = LogOperation::try_from(data.get_u8())?;
        let user = get_field(&mut data, "user")?;
        let key = get_field(&mut data, "key")?;
        let value = get_field(&mut data, "value")?;

        if data.remaining() != 8 {
            return Err(Error::data_loss(format!(
                "log record term field has {} bytes, expected 8",
                data.remaining()
            )));
        }
        let term = data.get_i64_le();

        Ok(Self {
            operation,
            user,
            key,
            value,
            term,
        })
    }
}

fn put_field(buf: &mut Vec<u8>, name: &str, field: &str) -> Result<()> {
    let len = i32::try_from(field.len()).map_err(|_| {
        Error::invalid_argument(format!("log entry {name} too large: {} bytes", field.len()))
    })?;
    buf.put_i32_le(len);
    buf.put_slice(field.as_bytes());
    Ok(())
}

fn get_field(data: &mut &[u8], name: &str) -> Result<String> {
    if data.remaining() < 4 {
        return Err(Error::data_loss(format!("log record truncated before {name} length")));
    }
    let len = usize::try_from(data.get_i32_le())
        .map_err(|_| Error::data_loss(format!("log record has negative {name} length")))?;
    if data.remaining() < len {
        return Err(Error::data_loss(format!(
            "log record {name} truncated: need {len} bytes, have {}",
            data.remaining()
        )));
    }
    let raw = data[..len].to_vec();
    data.advance(len);
    String::from_utf8(raw)
        .map_err(|e| Error::data_loss(format!("log record {name} is not UTF-8: {e}")))
}
