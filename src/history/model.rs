//! History sample and write result records.

use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::{
    error::ClientError,
    zinc::{HisWriteRecord, Ref, Value, ZonedDateTime},
};

/// Value carried by a history sample.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleValue {
    /// Numeric reading.
    Number(f64),
    /// Boolean state.
    Bool(bool),
    /// Free-text state.
    Str(String),
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self { Self::Number(value) }
}

impl From<i32> for SampleValue {
    fn from(value: i32) -> Self { Self::Number(f64::from(value)) }
}

impl From<bool> for SampleValue {
    fn from(value: bool) -> Self { Self::Bool(value) }
}

impl From<&str> for SampleValue {
    fn from(value: &str) -> Self { Self::Str(value.to_owned()) }
}

impl From<String> for SampleValue {
    fn from(value: String) -> Self { Self::Str(value) }
}

impl From<&SampleValue> for Value {
    fn from(value: &SampleValue) -> Self {
        match value {
            SampleValue::Number(n) => Self::Number(*n),
            SampleValue::Bool(b) => Self::Bool(*b),
            SampleValue::Str(s) => Self::Str(s.clone()),
        }
    }
}

/// One timestamped reading for a point.
///
/// The timestamp is always zoned; a naive timestamp cannot be represented,
/// so it is rejected when the [`ZonedDateTime`] is built.
#[derive(Clone, Debug, PartialEq)]
pub struct HistorySample {
    point_id: Ref,
    timestamp: ZonedDateTime,
    value: SampleValue,
}

impl HistorySample {
    /// Sample for `point_id` (with or without the leading `@`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if `point_id` is not a valid ref.
    pub fn new(
        point_id: &str,
        timestamp: ZonedDateTime,
        value: impl Into<SampleValue>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            point_id: Ref::new(point_id)?,
            timestamp,
            value: value.into(),
        })
    }

    /// Point the sample belongs to.
    #[must_use]
    pub const fn point_id(&self) -> &Ref { &self.point_id }

    /// Sample time.
    #[must_use]
    pub const fn timestamp(&self) -> &ZonedDateTime { &self.timestamp }

    /// Sample value.
    #[must_use]
    pub const fn value(&self) -> &SampleValue { &self.value }
}

impl HisWriteRecord for HistorySample {
    fn point(&self) -> &Ref { &self.point_id }

    fn sampled_at(&self) -> &ZonedDateTime { &self.timestamp }

    fn reading(&self) -> Value { Value::from(&self.value) }
}

/// Outcome of writing one batch of samples.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    /// Whether the server accepted the batch.
    pub success: bool,
    /// Samples the server accepted.
    pub samples_written: usize,
    /// Failure description.
    pub error: Option<String>,
    /// Extra context such as the chunk index.
    pub details: Map<String, Json>,
}

impl WriteResult {
    /// Result for a batch of `count` accepted samples.
    #[must_use]
    pub fn succeeded(count: usize) -> Self {
        Self {
            success: true,
            samples_written: count,
            ..Self::default()
        }
    }

    /// Result for a rejected batch.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Attach a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<Json>) -> Self {
        self.details.insert(key.to_owned(), value.into());
        self
    }
}
