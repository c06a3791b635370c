use crate::audit::{
    Classification, FeePolicy, ItemId, LinkTemplate, ParseError, Partition, ReportInput,
    ids::DEFAULT_CHUNK_SIZE, models::DEFAULT_RETAINED_PERCENT,
};
use crate::market::{FetchOutcome, LookupClient, config::LINK_BASE};
use crate::models::{AuditResponse, AuditSummary, StageReport, Submission};
use chrono::Utc;
use serde_json::{Value, json};
use std::{
    env,
    future::Future,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_DELAY_SECS: u64 = 3;
pub const DEFAULT_MAX_TEXT_LINES: usize = 130;
pub const DEFAULT_REPORT_DIR: &str = "reports";

#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    lookup: Arc<LookupClient>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, lookup: LookupClient) -> Self {
        Self {
            config: Arc::new(config),
            lookup: Arc::new(lookup),
        }
    }

    pub fn from_env() -> Self {
        Self::new(PipelineConfig::from_env(), LookupClient::from_env())
    }

    /// Runs one submission end to end. A malformed line aborts before any
    /// lookup is made; once parsing succeeds a report is always written.
    pub async fn run(&self, submission: Submission) -> Result<AuditResponse, PipelineError> {
        let mut stages = Vec::new();
        let source = submission.source();
        let text = submission.into_text();
        let notice = self.line_cap_notice(source, &text);
        let links = LinkTemplate::new(self.config.link_base.as_str());

        let ids = self
            .capture_stage("normalize_ids", &mut stages, stages::normalize_ids(&text))
            .await?;

        let partition = self
            .capture_stage("deduplicate", &mut stages, stages::deduplicate(&ids))
            .await?;

        let chunks = self
            .capture_stage(
                "batch",
                &mut stages,
                stages::batch(&partition.unique, self.config.chunk_size),
            )
            .await?;

        let fetched = self
            .capture_stage(
                "fetch_chunks",
                &mut stages,
                stages::fetch_chunks(&self.lookup, &chunks, self.config.request_delay),
            )
            .await?;

        let classification = self
            .capture_stage(
                "classify",
                &mut stages,
                stages::classify_items(&fetched.payloads, &links),
            )
            .await?;

        let report_id = Uuid::new_v4();
        let report_path = self.config.report_path(report_id);
        let input = ReportInput {
            classification: &classification,
            duplicates: &partition.duplicates,
            failures: &fetched.failures,
            fee: self.config.fee,
            links: &links,
        };
        let report = self
            .capture_stage(
                "render_report",
                &mut stages,
                stages::render(input, &report_path),
            )
            .await?;

        let summary = summarize(
            &ids,
            &partition,
            chunks.len(),
            &fetched,
            &classification,
            self.config.fee,
        );
        info!(
            target: "audit.pipeline",
            report_id = %report_id,
            source,
            submitted = summary.submitted,
            sold = summary.sold,
            unsold = summary.unsold,
            failed_chunks = summary.failed_chunks,
            "audit_completed"
        );

        Ok(AuditResponse {
            report_id: report_id.to_string(),
            report_path: report_path.display().to_string(),
            generated_at: Utc::now(),
            summary,
            report,
            notice,
            stages,
        })
    }

    /// Removes the artifact of a run whose report body has already been
    /// handed back to the caller.
    pub async fn discard_report(&self, response: &AuditResponse) {
        if let Err(err) = crate::audit::remove_report(Path::new(&response.report_path)).await {
            warn!(
                target: "audit.pipeline",
                report_id = %response.report_id,
                error = %err,
                "report_cleanup_failed"
            );
        }
    }

    fn line_cap_notice(&self, source: &str, text: &str) -> Option<String> {
        if source != "text" {
            return None;
        }
        let lines = text.lines().filter(|l| !l.trim().is_empty()).count();
        if lines <= self.config.max_text_lines {
            return None;
        }
        warn!(
            target: "audit.pipeline",
            lines,
            limit = self.config.max_text_lines,
            "text_submission_over_line_cap"
        );
        Some(format!(
            "{lines} links submitted as text; lists over {} links are better sent as a file",
            self.config.max_text_lines
        ))
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

fn summarize(
    ids: &[ItemId],
    partition: &Partition,
    chunks: usize,
    fetched: &FetchOutcome,
    c: &Classification,
    fee: FeePolicy,
) -> AuditSummary {
    AuditSummary {
        submitted: ids.len(),
        unique: partition.unique.len(),
        duplicates: partition.duplicates.len(),
        chunks,
        failed_chunks: fetched.failures.len(),
        sold: c.sold.len(),
        unsold: c.unsold.len(),
        deleted: c.deleted.len(),
        malformed: c.malformed.len(),
        unpriced: c.unpriced.len(),
        total_sold: c.total_sold,
        total_sold_after_fee: fee.apply(c.total_sold),
        total_unsold: c.total_unsold,
        total_unsold_after_fee: fee.apply(c.total_unsold),
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub request_delay: Duration,
    pub fee: FeePolicy,
    pub link_base: String,
    pub report_dir: PathBuf,
    pub max_text_lines: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_delay: Duration::from_secs(DEFAULT_DELAY_SECS),
            fee: FeePolicy::default(),
            link_base: crate::market::config::DEFAULT_LINK_BASE.to_string(),
            report_dir: PathBuf::from(DEFAULT_REPORT_DIR),
            max_text_lines: DEFAULT_MAX_TEXT_LINES,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            chunk_size: env_parse::<usize>("LOOKUP_CHUNK_SIZE")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            request_delay: Duration::from_secs(
                env_parse::<u64>("LOOKUP_DELAY_SECS").unwrap_or(DEFAULT_DELAY_SECS),
            ),
            fee: FeePolicy::new(
                env_parse::<u32>("FEE_RETAINED_PERCENT")
                    .filter(|v| *v <= 100)
                    .unwrap_or(DEFAULT_RETAINED_PERCENT),
            ),
            link_base: LINK_BASE.clone(),
            report_dir: env::var("REPORT_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_DIR)),
            max_text_lines: env_parse::<usize>("MAX_TEXT_LINES")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_TEXT_LINES),
        }
    }

    pub fn report_path(&self, report_id: Uuid) -> PathBuf {
        self.report_dir.join(format!("result-{report_id}.txt"))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

impl From<ParseError> for PipelineError {
    fn from(err: ParseError) -> Self {
        Self::invalid_input("normalize_ids", err.to_string())
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;
    use crate::audit::{self, chunk_ids, classify, normalize_text, partition_duplicates};

    const PREVIEW: usize = 5;

    pub async fn normalize_ids(text: &str) -> Result<StageOutcome<Vec<ItemId>>, PipelineError> {
        let ids = normalize_text(text)?;
        Ok(StageOutcome::new(
            ids.clone(),
            json!({
                "count": ids.len(),
                "preview": ids.iter().take(PREVIEW).collect::<Vec<_>>(),
            }),
        ))
    }

    pub async fn deduplicate(ids: &[ItemId]) -> Result<StageOutcome<Partition>, PipelineError> {
        let partition = partition_duplicates(ids);
        Ok(StageOutcome::new(
            partition.clone(),
            json!({
                "unique": partition.unique.len(),
                "duplicates": partition.duplicates,
            }),
        ))
    }

    pub async fn batch(
        unique: &[ItemId],
        chunk_size: usize,
    ) -> Result<StageOutcome<Vec<Vec<ItemId>>>, PipelineError> {
        let chunks = chunk_ids(unique, chunk_size);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        Ok(StageOutcome::new(
            chunks,
            json!({
                "chunk_size": chunk_size,
                "chunks": sizes.len(),
                "sizes": sizes,
            }),
        ))
    }

    pub async fn fetch_chunks(
        client: &LookupClient,
        chunks: &[Vec<ItemId>],
        delay: Duration,
    ) -> Result<StageOutcome<FetchOutcome>, PipelineError> {
        let outcome = client.fetch_all(chunks, delay).await;
        let failed = outcome
            .failures
            .iter()
            .map(|f| {
                json!({
                    "chunk": f.index,
                    "size": f.ids.len(),
                    "status": f.status,
                    "reason": f.reason,
                })
            })
            .collect::<Vec<_>>();
        let output = json!({
            "endpoint": client.endpoint(),
            "requested": outcome.requested(),
            "succeeded": outcome.payloads.len(),
            "failed": failed,
            "delay_ms": delay.as_millis() as u64,
        });
        Ok(StageOutcome::new(outcome, output))
    }

    pub async fn classify_items(
        payloads: &[Value],
        links: &LinkTemplate,
    ) -> Result<StageOutcome<Classification>, PipelineError> {
        let classification = classify(payloads, links);
        Ok(StageOutcome::new(
            classification.clone(),
            json!({
                "items": classification.item_count(),
                "sold": classification.sold.len(),
                "unsold": classification.unsold.len(),
                "deleted": classification.deleted.len(),
                "malformed": classification.malformed.len(),
                "unpriced": classification.unpriced.len(),
                "total_sold": classification.total_sold,
                "total_unsold": classification.total_unsold,
            }),
        ))
    }

    pub async fn render(
        input: ReportInput<'_>,
        path: &Path,
    ) -> Result<StageOutcome<String>, PipelineError> {
        let body = audit::render_report(input);
        audit::write_report(path, &body)
            .await
            .map_err(|err| PipelineError::internal("render_report", err.to_string()))?;
        Ok(StageOutcome::new(
            body.clone(),
            json!({
                "path": path.display().to_string(),
                "bytes": body.len(),
            }),
        ))
    }
}
