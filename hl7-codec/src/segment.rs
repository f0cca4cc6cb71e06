use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::{CodecError, CodecResult};

/// HL7 encoding characters, declared once in MSH-2 and fixed for every
/// message this crate produces.
pub const FIELD_SEPARATOR: char = '|';
pub const COMPONENT_SEPARATOR: char = '^';
pub const REPETITION_SEPARATOR: char = '~';
pub const ESCAPE_CHARACTER: char = '\\';
pub const SUBCOMPONENT_SEPARATOR: char = '&';
pub const SEGMENT_TERMINATOR: char = '\r';

/// MSH-2 value: component, repetition, escape, subcomponent.
pub const ENCODING_CHARACTERS: &str = "^~\\&";

/// One field value in a segment.
///
/// `Text` and `Components` are escaped on encode; `Raw` is emitted verbatim
/// and exists for MSH-2, which carries the separator characters themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Empty,
    Text(String),
    Components(Vec<String>),
    Repetitions(Vec<String>),
    Raw(String),
}

impl Field {
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            Field::Empty
        } else {
            Field::Text(value)
        }
    }

    pub fn components<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Field::Components(parts.into_iter().map(Into::into).collect())
    }

    pub fn repetitions<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Field::Repetitions(values.into_iter().map(Into::into).collect())
    }

    pub fn raw(value: impl Into<String>) -> Self {
        Field::Raw(value.into())
    }

    fn render(&self) -> CodecResult<String> {
        match self {
            Field::Empty => Ok(String::new()),
            Field::Text(value) => {
                reject_terminator(value)?;
                Ok(escape(value))
            }
            Field::Components(parts) => {
                let mut encoded = Vec::with_capacity(parts.len());
                for part in parts {
                    reject_terminator(part)?;
                    encoded.push(escape(part));
                }
                Ok(encoded.join(&COMPONENT_SEPARATOR.to_string()))
            }
            Field::Repetitions(values) => {
                let mut encoded = Vec::with_capacity(values.len());
                for value in values {
                    reject_terminator(value)?;
                    encoded.push(escape(value));
                }
                Ok(encoded.join(&REPETITION_SEPARATOR.to_string()))
            }
            Field::Raw(value) => {
                reject_terminator(value)?;
                Ok(value.clone())
            }
        }
    }
}

/// A segment terminator cannot be escaped; a field carrying one indicates
/// corrupted upstream data.
fn reject_terminator(value: &str) -> CodecResult<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(CodecError::MalformedField {
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Escape HL7 separator characters so free text cannot shift field positions.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            ESCAPE_CHARACTER => out.push_str("\\E\\"),
            FIELD_SEPARATOR => out.push_str("\\F\\"),
            COMPONENT_SEPARATOR => out.push_str("\\S\\"),
            REPETITION_SEPARATOR => out.push_str("\\R\\"),
            SUBCOMPONENT_SEPARATOR => out.push_str("\\T\\"),
            _ => out.push(ch),
        }
    }
    out
}

/// Inverse of [`escape`]; unknown escape sequences are left untouched.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != ESCAPE_CHARACTER {
            out.push(ch);
            continue;
        }
        let code = chars.next();
        let close = chars.peek().copied();
        match (code, close) {
            (Some('E'), Some('\\')) => {
                chars.next();
                out.push(ESCAPE_CHARACTER);
            }
            (Some('F'), Some('\\')) => {
                chars.next();
                out.push(FIELD_SEPARATOR);
            }
            (Some('S'), Some('\\')) => {
                chars.next();
                out.push(COMPONENT_SEPARATOR);
            }
            (Some('R'), Some('\\')) => {
                chars.next();
                out.push(REPETITION_SEPARATOR);
            }
            (Some('T'), Some('\\')) => {
                chars.next();
                out.push(SUBCOMPONENT_SEPARATOR);
            }
            (Some(other), _) => {
                out.push(ESCAPE_CHARACTER);
                out.push(other);
            }
            (None, _) => out.push(ESCAPE_CHARACTER),
        }
    }
    out
}

/// One HL7 segment under construction: a three-letter identifier plus
/// ordered fields. Positions are 1-based as in the HL7 numbering.
#[derive(Debug, Clone)]
pub struct Segment {
    id: &'static str,
    fields: Vec<Field>,
}

impl Segment {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            fields: Vec::new(),
        }
    }

    /// Append the next field.
    pub fn push(&mut self, field: Field) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Set a field at its HL7 position, padding the gap with empty fields.
    /// Positional parsers on the receiving side depend on the field count,
    /// so gaps are emitted as zero-length fields, never dropped.
    pub fn set(&mut self, position: usize, field: Field) -> &mut Self {
        if position == 0 {
            return self;
        }
        if self.fields.len() < position {
            self.fields.resize(position, Field::Empty);
        }
        if let Some(slot) = self.fields.get_mut(position - 1) {
            *slot = field;
        }
        self
    }

    /// Encode to wire form: `ID|f1|f2|...` terminated with `\r`.
    pub fn encode(&self) -> CodecResult<String> {
        let mut out = String::from(self.id);
        for field in &self.fields {
            out.push(FIELD_SEPARATOR);
            out.push_str(&field.render()?);
        }
        out.push(SEGMENT_TERMINATOR);
        Ok(out)
    }
}

/// Render a charge as fixed-point decimal text: two decimal places, period
/// separator, no exponent notation.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// `YYYYMMDDHHMMSS`, the precision MSH/EVN declare.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%d%H%M%S").to_string()
}

/// `YYYYMMDD` for date-precision fields (birth date, date of service).
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}
