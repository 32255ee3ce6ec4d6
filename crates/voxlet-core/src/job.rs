//! Job, payload, and lease type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two inference task kinds sharing one accelerator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Text-to-speech generation
    Synthesis,
    /// Audio transcription with word-level timestamps
    Transcription,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Synthesis => write!(f, "synthesis"),
            JobKind::Transcription => write!(f, "transcription"),
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, waiting in the queue
    Queued,
    /// Picked up by a dispatch worker, binding to a node
    Dispatched,
    /// Holding a lease, inference in flight
    Running,
    /// Terminal: result available
    Completed,
    /// Terminal: retry policy exhausted or non-retryable failure
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Dispatched => write!(f, "Dispatched"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Request payload for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    /// Speech synthesis request
    Synthesis(SynthesisRequest),
    /// Transcription request
    Transcription(TranscriptionRequest),
}

impl JobPayload {
    /// Kind of inference this payload targets
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Synthesis(_) => JobKind::Synthesis,
            JobPayload::Transcription(_) => JobKind::Transcription,
        }
    }
}

/// Speech synthesis request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    /// Text to synthesize
    pub text: String,
    /// URL of reference audio for voice cloning
    #[serde(default)]
    pub voice_ref_url: Option<String>,
    /// Expressiveness (0-1)
    #[serde(default = "default_exaggeration")]
    pub exaggeration: f32,
    /// Classifier-free guidance weight (0-1)
    #[serde(default = "default_cfg_weight")]
    pub cfg_weight: f32,
    /// Language code
    #[serde(default = "default_language")]
    pub language: String,
    /// Output format: wav or mp3
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

impl Default for SynthesisRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            voice_ref_url: None,
            exaggeration: default_exaggeration(),
            cfg_weight: default_cfg_weight(),
            language: default_language(),
            output_format: default_output_format(),
        }
    }
}

fn default_exaggeration() -> f32 {
    0.5
}

fn default_cfg_weight() -> f32 {
    0.5
}

fn default_language() -> String {
    "en".to_string()
}

fn default_output_format() -> String {
    "wav".to_string()
}

/// Audio transcription request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    /// URL of the audio to transcribe
    pub audio_url: String,
    /// Language code, auto-detected when omitted
    #[serde(default)]
    pub language: Option<String>,
    /// Include word-level timestamps
    #[serde(default = "default_true")]
    pub word_timestamps: bool,
    /// Use voice-activity detection to filter silence
    #[serde(default = "default_true")]
    pub vad_filter: bool,
    /// Beam size for decoding
    #[serde(default = "default_beam_size")]
    pub beam_size: u32,
}

fn default_true() -> bool {
    true
}

fn default_beam_size() -> u32 {
    5
}

/// Result of a completed job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobOutput {
    /// Synthesized audio
    Synthesis(SynthesisResult),
    /// Transcription segments
    Transcription(TranscriptionResult),
}

/// Synthesized audio and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// Encoded audio bytes in the requested format
    pub audio: Vec<u8>,
    /// Sample rate of the generated audio
    pub sample_rate: u32,
    /// Duration of the generated audio in seconds
    pub duration_seconds: f64,
    /// Wall-clock generation time in milliseconds
    pub generation_time_ms: u64,
}

/// Transcription segments and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Detected or requested language code
    pub language: String,
    /// Confidence of the language detection
    pub language_probability: f64,
    /// Duration of the source audio in seconds
    pub duration_seconds: f64,
    /// Transcribed segments in order
    pub segments: Vec<TranscriptionSegment>,
    /// Wall-clock transcription time in milliseconds
    pub generation_time_ms: u64,
}

/// One transcribed segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    /// Segment index
    pub id: u32,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    /// Segment text
    pub text: String,
    /// Word-level timestamps, empty when not requested
    pub words: Vec<TranscriptionWord>,
}

/// One word with timing and confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionWord {
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    /// The word
    pub word: String,
    /// Decoder probability
    pub probability: f64,
}

/// An inference job owned by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: Uuid,
    /// Inference kind
    pub kind: JobKind,
    /// Request payload
    pub payload: JobPayload,
    /// Current status
    pub status: JobStatus,
    /// Node the job is or was bound to
    pub assigned_node: Option<Uuid>,
    /// Attempts consumed so far
    pub attempts: u32,
    /// Per-job wall-clock budget in seconds, dispatcher default when absent
    pub timeout_secs: Option<u64>,
    /// Terminal failure description, if failed
    pub failure: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a queued job from a payload
    pub fn new(payload: JobPayload, timeout_secs: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: payload.kind(),
            payload,
            status: JobStatus::Queued,
            assigned_node: None,
            attempts: 0,
            timeout_secs,
            failure: None,
            created_at: Utc::now(),
        }
    }
}

/// A time-bounded exclusive-use grant binding one job to one node's accelerator.
///
/// At most one live lease exists per node; the execution slot enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Unique lease identifier; release and force-release match on this
    pub id: Uuid,
    /// Job holding the lease
    pub job_id: Uuid,
    /// Node whose accelerator is leased
    pub node_id: Uuid,
    /// When the lease was granted
    pub acquired_at: DateTime<Utc>,
    /// Hard deadline after which the sweep force-releases the lease
    pub deadline: DateTime<Utc>,
}

impl Lease {
    /// Whether the deadline has elapsed
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.deadline
    }
}
