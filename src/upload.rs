//! Upload budget negotiation.
//!
//! One [`UploadNegotiator`] drives one upload flow at a time:
//!
//! ```text
//!            select ──► size ≤ budget ──────────────────────────► Accepted
//!                │                                                   ▲
//!                └──► AwaitingCompression ──begin──► Compressing ────┤ (fits)
//!                          ▲        ▲                     │          │
//!                          │        └──── still too big ◄─┤          │
//!                          │        └──── codec error ◄───┘          │
//!                 cancel ◄─┴─────────────────────────────────────────┘
//! ```
//!
//! A compression result is never trusted to fit: every new candidate goes
//! back through the same size rule. Attempts are sequential; while one is
//! running, further tiers are refused. Each attempt carries a job id so a
//! result arriving after `cancel` or a fresh `select` is discarded instead of
//! clobbering the new flow.

use crate::config::{BudgetConfig, CompressionConfig, EditorConfig, TierConfig};
use crate::imaging::{self, CodecError, ImageBackend};
use crate::payload::encode_payload;
use crate::store::{ImageRecord, ImageStore, NewImage, StoreError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file selected")]
    NoCandidate,
    #[error("Selected file is empty")]
    EmptyFile,
    #[error("Candidate does not need compression")]
    NotAwaitingCompression,
    #[error("A compression attempt is already running")]
    CompressionPending,
    #[error("Compression result does not belong to the current attempt")]
    StaleAttempt,
    #[error("Image size must be less than {limit} bytes ({size} selected); compress it first")]
    OverBudget { size: u64, limit: u64 },
    #[error("Compression failed: {0}")]
    Codec(#[from] CodecError),
    #[error("Please provide a title and select an image")]
    MissingTitle,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UploadError {
    /// Budget errors leave the user a choice: compress, pick a smaller file,
    /// or delete an existing image.
    pub fn is_budget(&self) -> bool {
        match self {
            UploadError::OverBudget { .. } => true,
            UploadError::Store(e) => e.is_budget(),
            _ => false,
        }
    }
}

/// Quality tier offered for oversized uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionTier {
    High,
    Medium,
    Low,
}

impl CompressionTier {
    pub const ALL: [CompressionTier; 3] = [
        CompressionTier::High,
        CompressionTier::Medium,
        CompressionTier::Low,
    ];
}

impl fmt::Display for CompressionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompressionTier::High => "high",
            CompressionTier::Medium => "medium",
            CompressionTier::Low => "low",
        })
    }
}

impl FromStr for CompressionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(CompressionTier::High),
            "medium" => Ok(CompressionTier::Medium),
            "low" => Ok(CompressionTier::Low),
            other => Err(format!("unknown compression tier: {other}")),
        }
    }
}

/// Budget rules and tier parameters for one negotiator.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub tiers: CompressionConfig,
}

impl UploadPolicy {
    /// Build a policy from the editor config.
    pub fn from_config(config: &EditorConfig) -> Self {
        Self {
            max_bytes: config.budget.max_upload_bytes,
            tiers: config.compression.clone(),
        }
    }

    pub fn tier(&self, tier: CompressionTier) -> TierConfig {
        match tier {
            CompressionTier::High => self.tiers.high,
            CompressionTier::Medium => self.tiers.medium,
            CompressionTier::Low => self.tiers.low,
        }
    }

    pub fn fits(&self, size: u64) -> bool {
        size <= self.max_bytes
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: BudgetConfig::default().max_upload_bytes,
            tiers: CompressionConfig::default(),
        }
    }
}

/// A selected file, possibly already recompressed.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadCandidate {
    pub name: String,
    pub bytes: Arc<[u8]>,
    /// Size of the file as first selected, kept across recompressions.
    pub original_size: u64,
}

impl UploadCandidate {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Where the current upload flow stands.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UploadState {
    #[default]
    Empty,
    AwaitingCompression(UploadCandidate),
    Compressing {
        candidate: UploadCandidate,
        tier: CompressionTier,
        job: u64,
    },
    Accepted(UploadCandidate),
}

impl UploadState {
    pub fn candidate(&self) -> Option<&UploadCandidate> {
        match self {
            UploadState::Empty => None,
            UploadState::AwaitingCompression(c) | UploadState::Accepted(c) => Some(c),
            UploadState::Compressing { candidate, .. } => Some(candidate),
        }
    }

    /// Tiers the user may pick right now.
    pub fn offered_tiers(&self) -> &'static [CompressionTier] {
        match self {
            UploadState::AwaitingCompression(_) => &CompressionTier::ALL,
            _ => &[],
        }
    }
}

/// Notifications for the host.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Candidate is over budget; tiers are on offer.
    NeedsCompression { size: u64, limit: u64 },
    /// A compression attempt started.
    Compressing { tier: CompressionTier },
    /// Candidate fits and is ready for record creation.
    Accepted { bytes: Arc<[u8]>, original_size: u64 },
    /// A compression attempt failed; the previous candidate is back.
    CompressionFailed { tier: CompressionTier, message: String },
    Cancelled,
}

/// A compression attempt handed out by [`UploadNegotiator::begin_compression`].
///
/// The caller runs [`CompressionJob::run`] (possibly off-thread) and feeds the
/// result back through [`UploadNegotiator::finish_compression`].
#[derive(Debug, Clone)]
pub struct CompressionJob {
    pub id: u64,
    pub tier: CompressionTier,
    pub source: Arc<[u8]>,
    pub long_edge: u32,
    /// Starting quality factor; the codec steps down from here toward `max_bytes`.
    pub quality: f32,
    pub max_bytes: u64,
}

impl CompressionJob {
    pub fn run(&self, backend: &(impl ImageBackend + ?Sized)) -> Result<Vec<u8>, CodecError> {
        imaging::recompress(
            backend,
            &self.source,
            self.long_edge,
            self.quality,
            Some(self.max_bytes),
        )
    }
}

/// Single-owner state machine for one upload flow.
pub struct UploadNegotiator {
    policy: UploadPolicy,
    state: UploadState,
    next_job: u64,
    events: Option<Sender<UploadEvent>>,
}

impl UploadNegotiator {
    pub fn new(policy: UploadPolicy) -> Self {
        Self {
            policy,
            state: UploadState::Empty,
            next_job: 1,
            events: None,
        }
    }

    /// Send [`UploadEvent`]s to `tx`.
    pub fn with_events(mut self, tx: Sender<UploadEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver just means nobody is listening.
            let _ = tx.send(event);
        }
    }

    /// Route a candidate to `Accepted` or `AwaitingCompression`.
    fn evaluate(&mut self, candidate: UploadCandidate) -> &UploadState {
        let size = candidate.size();
        if self.policy.fits(size) {
            tracing::info!(name = %candidate.name, size, "upload accepted");
            self.emit(UploadEvent::Accepted {
                bytes: Arc::clone(&candidate.bytes),
                original_size: candidate.original_size,
            });
            self.state = UploadState::Accepted(candidate);
        } else {
            tracing::info!(
                name = %candidate.name,
                size,
                limit = self.policy.max_bytes,
                "upload over budget"
            );
            self.emit(UploadEvent::NeedsCompression {
                size,
                limit: self.policy.max_bytes,
            });
            self.state = UploadState::AwaitingCompression(candidate);
        }
        &self.state
    }

    /// Start a fresh flow with a newly selected file.
    ///
    /// Any previous candidate is discarded; a compression attempt still
    /// running for it will be rejected as stale when it finishes. An empty
    /// file is refused and leaves the current flow untouched.
    pub fn select(
        &mut self,
        name: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<&UploadState, UploadError> {
        let bytes = bytes.into();
        let name = name.into();
        if bytes.is_empty() {
            tracing::info!(%name, "empty file rejected");
            return Err(UploadError::EmptyFile);
        }
        let candidate = UploadCandidate {
            original_size: bytes.len() as u64,
            name,
            bytes,
        };
        Ok(self.evaluate(candidate))
    }

    /// Claim the next compression attempt at `tier`.
    pub fn begin_compression(
        &mut self,
        tier: CompressionTier,
    ) -> Result<CompressionJob, UploadError> {
        let candidate = match std::mem::take(&mut self.state) {
            UploadState::AwaitingCompression(candidate) => candidate,
            other => {
                let err = match &other {
                    UploadState::Empty => UploadError::NoCandidate,
                    UploadState::Compressing { .. } => UploadError::CompressionPending,
                    _ => UploadError::NotAwaitingCompression,
                };
                self.state = other;
                return Err(err);
            }
        };

        let params = self.policy.tier(tier);
        let id = self.next_job;
        self.next_job += 1;
        let job = CompressionJob {
            id,
            tier,
            source: Arc::clone(&candidate.bytes),
            long_edge: params.long_edge,
            quality: params.quality,
            max_bytes: self.policy.max_bytes,
        };
        tracing::debug!(%tier, job = id, long_edge = params.long_edge, "compression started");
        self.state = UploadState::Compressing {
            candidate,
            tier,
            job: id,
        };
        self.emit(UploadEvent::Compressing { tier });
        Ok(job)
    }

    /// Feed back the outcome of `job`.
    ///
    /// Success replaces the candidate and re-applies the size rule. Failure
    /// restores the pre-attempt candidate and returns the codec error.
    pub fn finish_compression(
        &mut self,
        job: &CompressionJob,
        result: Result<Vec<u8>, CodecError>,
    ) -> Result<&UploadState, UploadError> {
        let candidate = match std::mem::take(&mut self.state) {
            UploadState::Compressing { candidate, job: current, .. } if current == job.id => {
                candidate
            }
            other => {
                self.state = other;
                tracing::debug!(job = job.id, "discarding stale compression result");
                return Err(UploadError::StaleAttempt);
            }
        };

        match result {
            Ok(bytes) => {
                tracing::debug!(
                    tier = %job.tier,
                    before = candidate.size(),
                    after = bytes.len(),
                    "compression finished"
                );
                let next = UploadCandidate {
                    name: candidate.name,
                    bytes: bytes.into(),
                    original_size: candidate.original_size,
                };
                Ok(self.evaluate(next))
            }
            Err(e) => {
                tracing::warn!(tier = %job.tier, error = %e, "compression failed");
                self.emit(UploadEvent::CompressionFailed {
                    tier: job.tier,
                    message: e.to_string(),
                });
                self.state = UploadState::AwaitingCompression(candidate);
                Err(UploadError::Codec(e))
            }
        }
    }

    /// Run one compression attempt synchronously.
    pub fn compress(
        &mut self,
        tier: CompressionTier,
        backend: &(impl ImageBackend + ?Sized),
    ) -> Result<&UploadState, UploadError> {
        let job = self.begin_compression(tier)?;
        let result = job.run(backend);
        self.finish_compression(&job, result)
    }

    /// Abandon the flow.
    pub fn cancel(&mut self) {
        if self.state != UploadState::Empty {
            tracing::debug!("upload cancelled");
            self.state = UploadState::Empty;
            self.emit(UploadEvent::Cancelled);
        }
    }

    /// Create a record from the accepted candidate.
    ///
    /// Title and acceptance are checked before anything is encoded. On
    /// success the flow ends (state returns to `Empty`); on failure the
    /// accepted candidate is kept so the user can fix the title or free a
    /// slot and retry.
    pub async fn submit(
        &mut self,
        store: &(dyn ImageStore + '_),
        user_id: &str,
        title: &str,
        tags: &str,
    ) -> Result<ImageRecord, UploadError> {
        if title.trim().is_empty() {
            return Err(UploadError::MissingTitle);
        }
        let candidate = match &self.state {
            UploadState::Accepted(c) => c.clone(),
            UploadState::Empty => return Err(UploadError::NoCandidate),
            other => {
                let size = other.candidate().map(UploadCandidate::size).unwrap_or(0);
                return Err(UploadError::OverBudget {
                    size,
                    limit: self.policy.max_bytes,
                });
            }
        };

        let record = store
            .create(NewImage {
                user_id: user_id.to_string(),
                title: title.to_string(),
                tags: parse_tags(tags),
                image_data: encode_payload(&candidate.bytes),
                original_size: candidate.original_size,
            })
            .await?;
        tracing::info!(id = %record.id, title, "image uploaded");
        self.state = UploadState::Empty;
        Ok(record)
    }
}

impl Default for UploadNegotiator {
    fn default() -> Self {
        Self::new(UploadPolicy::default())
    }
}

/// Split comma-separated tags, trimming whitespace and dropping empties.
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
