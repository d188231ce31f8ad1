//! History writes and the chunked write pipeline.
//!
//! [`HistoryWriter::write`] sends one batch as a single `evalAll` request.
//! [`HistoryWriter::write_chunked`] orders a large sample set per point,
//! slices it into chunks, and writes the chunks concurrently behind a
//! counting admission gate, returning one [`WriteResult`] per chunk in
//! chunk order.

use std::{collections::HashMap, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    error::ClientError,
    session::SessionManager,
    zinc::{Ref, encode_his_write_rpc, response_error},
};

mod model;

pub use model::{HistorySample, SampleValue, WriteResult};

/// Endpoint receiving `hisWrite` expression grids.
pub const HIS_WRITE_ENDPOINT: &str = "evalAll";
/// Default samples per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default chunks in flight at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Wire path used for a history write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMethod {
    /// `hisWrite` expressions through `evalAll`.
    #[default]
    Rpc,
    /// Batch HTTP history API. The server exposes no such endpoint yet, so
    /// this currently writes through [`WriteMethod::Rpc`].
    Http,
}

/// Group `samples` by point, sort each group by instant, and slice the
/// concatenation into chunks of at most `chunk_size`.
///
/// Groups keep the order in which their point first appears and the sort is
/// stable, so equal instants keep their input order. A point whose samples
/// span several chunks is ordered within each chunk and across the chunk
/// sequence, but the chunks themselves may be written in any order.
///
/// # Errors
///
/// Returns [`ClientError::Validation`] if `chunk_size` is zero.
pub fn plan_chunks(
    samples: &[HistorySample],
    chunk_size: usize,
) -> Result<Vec<Vec<HistorySample>>, ClientError> {
    if chunk_size == 0 {
        return Err(ClientError::validation("chunk size must be at least 1"));
    }
    let mut index: HashMap<&Ref, usize> = HashMap::new();
    let mut groups: Vec<Vec<HistorySample>> = Vec::new();
    for sample in samples {
        let slot = *index.entry(sample.point_id()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        if let Some(group) = groups.get_mut(slot) {
            group.push(sample.clone());
        }
    }
    for group in &mut groups {
        group.sort_by_key(|s| s.timestamp().instant());
    }
    let ordered: Vec<HistorySample> = groups.into_iter().flatten().collect();
    Ok(ordered.chunks(chunk_size).map(<[HistorySample]>::to_vec).collect())
}

/// Writes history samples through a [`SessionManager`].
#[derive(Clone, Debug)]
pub struct HistoryWriter {
    session: Arc<SessionManager>,
}

impl HistoryWriter {
    /// Writer sending through `session`.
    #[must_use]
    pub const fn new(session: Arc<SessionManager>) -> Self { Self { session } }

    /// Write one batch over RPC.
    ///
    /// Failures are reported in the returned [`WriteResult`], never raised.
    /// An empty batch succeeds without a request.
    pub async fn write(&self, samples: &[HistorySample]) -> WriteResult {
        self.write_with(samples, WriteMethod::Rpc).await
    }

    /// Write one batch using `method`, reporting failures in the result.
    pub async fn write_with(&self, samples: &[HistorySample], method: WriteMethod) -> WriteResult {
        match self.try_write(samples, method).await {
            Ok(result) => result,
            Err(err) => {
                error!(count = samples.len(), error = %err, "history write failed");
                WriteResult::failed(err.to_string())
            }
        }
    }

    /// Write one batch using `method`, raising failures.
    ///
    /// # Errors
    ///
    /// As for [`HistoryWriter::write_rpc`].
    pub async fn try_write(
        &self,
        samples: &[HistorySample],
        method: WriteMethod,
    ) -> Result<WriteResult, ClientError> {
        if samples.is_empty() {
            return Ok(WriteResult::succeeded(0));
        }
        debug!(count = samples.len(), ?method, "writing history samples");
        if method == WriteMethod::Http {
            warn!(fallback = "rpc", "HTTP history write not available");
        }
        self.write_rpc(samples).await
    }

    /// Write one batch over RPC, raising failures.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::HistoryWrite`] when the server reports an error
    /// in the response metadata, and the session's errors otherwise.
    pub async fn write_rpc(&self, samples: &[HistorySample]) -> Result<WriteResult, ClientError> {
        let grid = encode_his_write_rpc(samples);
        let response = self.session.post_grid(HIS_WRITE_ENDPOINT, &grid).await?;
        if let Some(message) = response_error(&response) {
            return Err(ClientError::HistoryWrite(message));
        }
        debug!(count = samples.len(), "history samples written");
        Ok(WriteResult::succeeded(samples.len()))
    }

    /// Write a large sample set in concurrent chunks.
    ///
    /// At most `max_concurrent` chunks are in flight at once; the limit is
    /// clamped to `1..=Semaphore::MAX_PERMITS`. Each chunk's outcome lands
    /// at its chunk index, with the index recorded under `details.chunk`, and
    /// a failing chunk never affects its siblings. Dropping the returned
    /// future aborts chunks still in flight.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if `chunk_size` is zero. Write
    /// failures are reported per chunk instead.
    pub async fn write_chunked(
        &self,
        samples: &[HistorySample],
        chunk_size: usize,
        max_concurrent: usize,
    ) -> Result<Vec<WriteResult>, ClientError> {
        let chunks = plan_chunks(samples, chunk_size)?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let chunk_count = chunks.len();
        info!(
            total = samples.len(),
            chunks = chunk_count,
            chunk_size,
            max_concurrent,
            "writing history in chunks"
        );

        let gate = Arc::new(Semaphore::new(max_concurrent.clamp(1, Semaphore::MAX_PERMITS)));
        let mut tasks = JoinSet::new();
        for (chunk, batch) in chunks.into_iter().enumerate() {
            let writer = self.clone();
            let chunk_gate = Arc::clone(&gate);
            tasks.spawn(async move {
                let result = match chunk_gate.acquire_owned().await {
                    Ok(_permit) => {
                        debug!(chunk, size = batch.len(), "chunk admitted");
                        writer.write(&batch).await
                    }
                    Err(err) => WriteResult::failed(err.to_string()),
                };
                (chunk, result.with_detail("chunk", chunk))
            });
        }

        let mut slots: Vec<Option<WriteResult>> = vec![None; chunk_count];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((chunk, result)) => {
                    if let Some(slot) = slots.get_mut(chunk) {
                        *slot = Some(result);
                    }
                }
                Err(err) => error!(error = %err, "chunk task ended abnormally"),
            }
        }
        let results: Vec<WriteResult> = slots
            .into_iter()
            .enumerate()
            .map(|(chunk, slot)| {
                slot.unwrap_or_else(|| {
                    WriteResult::failed("chunk task ended abnormally").with_detail("chunk", chunk)
                })
            })
            .collect();

        let written: usize = results.iter().map(|r| r.samples_written).sum();
        let failed = results.iter().filter(|r| !r.success).count();
        info!(written, chunks = chunk_count, failed, "chunked history write complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use rstest::rstest;

    use super::*;
    use crate::zinc::ZonedDateTime;

    fn sample(point: &str, minute: i64) -> HistorySample {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid date");
        HistorySample::new(point, ZonedDateTime::utc(base + ChronoDuration::minutes(minute)), 1.0)
            .expect("sample")
    }

    fn minutes(chunk: &[HistorySample]) -> Vec<(String, i64)> {
        chunk
            .iter()
            .map(|s| (s.point_id().id().to_owned(), s.timestamp().instant().timestamp() / 60))
            .collect()
    }

    #[rstest]
    fn rejects_zero_chunk_size() {
        assert!(matches!(
            plan_chunks(&[sample("p1", 0)], 0),
            Err(ClientError::Validation(_))
        ));
    }

    #[rstest]
    fn empty_input_plans_no_chunks() {
        assert!(plan_chunks(&[], 10).expect("plan").is_empty());
    }

    #[rstest]
    fn groups_in_first_seen_order_and_sorts_each_point() {
        let samples = vec![
            sample("b", 5),
            sample("a", 3),
            sample("b", 1),
            sample("a", 2),
            sample("b", 3),
        ];
        let chunks = plan_chunks(&samples, 2).expect("plan");
        let base = 28_401_120;
        let flat: Vec<(String, i64)> = chunks.iter().flat_map(|c| minutes(c)).collect();
        assert_eq!(
            flat,
            vec![
                ("b".to_owned(), base + 1),
                ("b".to_owned(), base + 3),
                ("b".to_owned(), base + 5),
                ("a".to_owned(), base + 2),
                ("a".to_owned(), base + 3),
            ]
        );
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    }
}
