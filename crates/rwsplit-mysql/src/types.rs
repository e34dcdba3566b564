//! Column metadata, text-protocol value decoding and string escaping.

use rwsplit_core::Value;

/// MySQL field type codes (`MYSQL_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Map a type byte; codes the text decoder treats alike collapse onto
    /// their closest relative.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 | 0x11 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A | 0x0E => FieldType::Date,
            0x0B | 0x13 => FieldType::Time,
            0x0C | 0x12 => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Blob
                | FieldType::Geometry
        )
    }
}

/// Column definition flags.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNSIGNED: u16 = 32;
    pub const BINARY: u16 = 128;
    pub const AUTO_INCREMENT: u16 = 512;
}

/// Collation id of the `binary` character set.
const BINARY_COLLATION: u16 = 63;

/// One column of a text result set.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub schema: String,
    pub table: String,
    /// Column name or alias, as used for row keys
    pub name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// BLOB/BINARY columns; TEXT columns share the blob type codes but carry
    /// a real character set.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.charset == BINARY_COLLATION
            && (self.column_type.is_blob() || self.flags & column_flags::BINARY != 0)
    }

    /// Decode one cell of this column.
    pub fn decode(&self, data: &[u8]) -> Value {
        if self.is_binary() || self.column_type == FieldType::Bit {
            return Value::Bytes(data.to_vec());
        }
        decode_text_value(self.column_type, data, self.is_unsigned())
    }
}

/// Decode a text-protocol cell. Unparseable numbers fall back to text;
/// unsigned integers widen to the next signed type so no value is lost.
pub fn decode_text_value(field_type: FieldType, data: &[u8], is_unsigned: bool) -> Value {
    let text = String::from_utf8_lossy(data);
    let fallback = || Value::Text(text.to_string());

    match (field_type, is_unsigned) {
        (FieldType::Tiny, false) => text.parse().map_or_else(|_| fallback(), Value::TinyInt),
        (FieldType::Tiny, true) => text
            .parse::<u8>()
            .map_or_else(|_| fallback(), |v| Value::SmallInt(i16::from(v))),
        (FieldType::Short | FieldType::Year, false) => {
            text.parse().map_or_else(|_| fallback(), Value::SmallInt)
        }
        (FieldType::Short | FieldType::Year, true) => text
            .parse::<u16>()
            .map_or_else(|_| fallback(), |v| Value::Int(i32::from(v))),
        (FieldType::Long | FieldType::Int24, false) => {
            text.parse().map_or_else(|_| fallback(), Value::Int)
        }
        (FieldType::Long | FieldType::Int24, true) => text
            .parse::<u32>()
            .map_or_else(|_| fallback(), |v| Value::BigInt(i64::from(v))),
        (FieldType::LongLong, false) => text.parse().map_or_else(|_| fallback(), Value::BigInt),
        (FieldType::LongLong, true) => text
            .parse::<u64>()
            .map_or_else(|_| fallback(), Value::from),
        (FieldType::Float, _) => text.parse().map_or_else(|_| fallback(), Value::Float),
        (FieldType::Double, _) => text.parse().map_or_else(|_| fallback(), Value::Double),
        (FieldType::Decimal | FieldType::NewDecimal, _) => Value::Decimal(text.into_owned()),
        (FieldType::Json, _) => {
            serde_json::from_str(&text).map_or_else(|_| fallback(), Value::Json)
        }
        (FieldType::Null, _) => Value::Null,
        _ => Value::Text(text.into_owned()),
    }
}

/// Escape `raw` for use inside a quoted string literal.
///
/// With backslash escapes enabled this follows `mysql_real_escape_string`:
/// NUL, newline, carriage return, backslash, both quote characters and
/// Ctrl-Z are backslash-escaped. Under `NO_BACKSLASH_ESCAPES` the only
/// escape available is doubling the single quote.
pub fn escape_string(raw: &str, no_backslash_escapes: bool) -> String {
    let mut out = String::with_capacity(raw.len() + raw.len() / 8);
    if no_backslash_escapes {
        for c in raw.chars() {
            if c == '\'' {
                out.push('\'');
            }
            out.push(c);
        }
        return out;
    }
    for c in raw.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out
}
