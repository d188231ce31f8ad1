//! Typed Zinc scalar values and their wire encoding.

use std::{fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

use crate::error::ClientError;

/// Wire sigil that prefixes a ref value.
pub const REF_SIGIL: char = '@';

/// Legacy JSON spelling of a marker value.
pub const MARKER_SENTINEL: &str = "m:";

/// Escape free text for embedding inside a quoted Zinc string.
///
/// Backslash, double quote, newline, carriage return, and tab become
/// two-character escape sequences. NUL and every other control character
/// below U+0020 is dropped. The input is scanned once, so an inserted
/// backslash is never escaped a second time.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if u32::from(c) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

/// Quote and escape `text` as a Zinc string literal.
#[must_use]
pub fn quote(text: &str) -> String { format!("\"{}\"", escape(text)) }

/// Canonical decimal text for a Zinc number.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n.is_sign_positive() { "INF" } else { "-INF" }.to_owned()
    } else {
        format!("{n}")
    }
}

fn is_ref_char(c: char) -> bool { c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-' | '.' | '~') }

fn is_zone_char(c: char) -> bool { c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '/') }

/// Entity reference, written on the wire as `@id`.
///
/// Identifiers are restricted to the Haystack ref character set so that a
/// ref can be emitted unquoted without altering grid structure.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref(String);

impl Ref {
    /// Validate `id`, stripping a leading `@` if present.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when the identifier is empty or
    /// contains characters outside `[A-Za-z0-9_:\-.~]`.
    pub fn new(id: &str) -> Result<Self, ClientError> {
        let bare = id.strip_prefix(REF_SIGIL).unwrap_or(id);
        if bare.is_empty() {
            return Err(ClientError::validation("ref identifier is empty"));
        }
        if let Some(bad) = bare.chars().find(|c| !is_ref_char(*c)) {
            return Err(ClientError::validation(format!(
                "ref identifier {bare:?} contains invalid character {bad:?}"
            )));
        }
        Ok(Self(bare.to_owned()))
    }

    /// Identifier without the sigil.
    #[must_use]
    pub fn id(&self) -> &str { &self.0 }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{REF_SIGIL}{}", self.0) }
}

impl FromStr for Ref {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::new(s) }
}

/// An instant paired with a named Haystack time zone.
///
/// The instant always carries a UTC offset; a naive timestamp cannot be
/// represented.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZonedDateTime {
    instant: DateTime<FixedOffset>,
    zone: String,
}

impl ZonedDateTime {
    /// Pair `instant` with the zone name `zone` (for example `New_York`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if the zone name is empty or
    /// contains characters that cannot appear unquoted in a grid cell.
    pub fn new(instant: DateTime<FixedOffset>, zone: &str) -> Result<Self, ClientError> {
        if zone.is_empty() || !zone.chars().all(is_zone_char) {
            return Err(ClientError::validation(format!(
                "invalid time zone name {zone:?}"
            )));
        }
        Ok(Self {
            instant,
            zone: zone.to_owned(),
        })
    }

    /// Wrap a UTC instant in the `UTC` zone.
    #[must_use]
    pub fn utc(instant: DateTime<Utc>) -> Self {
        Self {
            instant: instant.fixed_offset(),
            zone: "UTC".to_owned(),
        }
    }

    /// Parse an RFC 3339 timestamp and pair it with `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for timestamps without an offset
    /// or with an invalid zone name.
    pub fn parse(iso: &str, zone: &str) -> Result<Self, ClientError> {
        let instant = DateTime::parse_from_rfc3339(iso).map_err(|e| {
            ClientError::validation(format!(
                "timestamp {iso:?} must carry a UTC offset: {e}"
            ))
        })?;
        Self::new(instant, zone)
    }

    /// The offset-carrying instant.
    #[must_use]
    pub const fn instant(&self) -> DateTime<FixedOffset> { self.instant }

    /// Haystack zone name.
    #[must_use]
    pub fn zone(&self) -> &str { &self.zone }

    /// ISO-8601 rendering of the instant, with fractional seconds only when
    /// they are non-zero.
    #[must_use]
    pub fn to_iso(&self) -> String { self.instant.to_rfc3339_opts(SecondsFormat::AutoSi, false) }

    /// ISO-8601 rendering truncated to whole seconds.
    #[must_use]
    pub fn to_iso_seconds(&self) -> String { self.instant.to_rfc3339_opts(SecondsFormat::Secs, false) }
}

impl fmt::Display for ZonedDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_iso(), self.zone)
    }
}

/// A Zinc scalar.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent value, encoded as an empty cell.
    Null,
    /// Presence tag.
    Marker,
    /// Entity reference.
    Ref(Ref),
    /// Boolean.
    Bool(bool),
    /// Unitless number.
    Number(f64),
    /// Free text.
    Str(String),
    /// Zoned timestamp.
    DateTime(ZonedDateTime),
}

impl Value {
    /// Interpret a bare string using the legacy sentinels: `"m:"` is a
    /// marker, a valid `@id` is a ref, the empty string is null, and
    /// anything else is free text.
    #[must_use]
    pub fn infer(text: &str) -> Self {
        if text.is_empty() {
            return Self::Null;
        }
        if text == MARKER_SENTINEL {
            return Self::Marker;
        }
        match Ref::new(text) {
            Ok(r) if text.starts_with(REF_SIGIL) => Self::Ref(r),
            _ => Self::Str(text.to_owned()),
        }
    }

    /// Encode as a single Zinc grid cell.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Marker => "M".to_owned(),
            Self::Ref(r) => r.to_string(),
            Self::Bool(b) => if *b { "T" } else { "F" }.to_owned(),
            Self::Number(n) => format_number(*n),
            Self::Str(s) => quote(s),
            Self::DateTime(dt) => dt.to_string(),
        }
    }

    /// Whether this value is [`Value::Marker`].
    #[must_use]
    pub const fn is_marker(&self) -> bool { matches!(self, Self::Marker) }

    /// Borrow the text of a [`Value::Str`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the ref of a [`Value::Ref`].
    #[must_use]
    pub const fn as_ref_value(&self) -> Option<&Ref> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Borrow the timestamp of a [`Value::DateTime`].
    #[must_use]
    pub const fn as_datetime(&self) -> Option<&ZonedDateTime> {
        match self {
            Self::DateTime(dt) => Some(dt),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self { Self::Str(value.to_owned()) }
}

impl From<String> for Value {
    fn from(value: String) -> Self { Self::Str(value) }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self { Self::Bool(value) }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self { Self::Number(value) }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self { Self::Number(f64::from(value)) }
}

impl From<Ref> for Value {
    fn from(value: Ref) -> Self { Self::Ref(value) }
}

impl From<ZonedDateTime> for Value {
    fn from(value: ZonedDateTime) -> Self { Self::DateTime(value) }
}
