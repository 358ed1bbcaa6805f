//! Core types for the relevance-judging pipeline.
//!
//! These types model the full lifecycle:
//! Record → Classification Input → Decision → Task counters → Pending Review.

use serde::{Deserialize, Serialize};

/// Timestamp format used for every persisted time column.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Module scope label for device-record judging.
pub const DEVICE_DATA_MODULE: &str = "DEVICE_DATA";

/// Maximum characters of description sent to the oracle (including the
/// trailing ellipsis when truncated).
pub const MAX_DESCRIPTION_CHARS: usize = 2000;

/// Current UTC time in the persisted timestamp format.
pub fn now_utc_string() -> String {
    chrono::Utc::now().format(TIME_FORMAT).to_string()
}

// ═══════════════════════════════════════════
// Record Kind
// ═══════════════════════════════════════════

/// The six judgeable regulatory record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Registration,
    Application,
    Recall,
    AdverseEvent,
    Guidance,
    CustomsRuling,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Application => "application",
            Self::Recall => "recall",
            Self::AdverseEvent => "adverse_event",
            Self::Guidance => "guidance",
            Self::CustomsRuling => "customs_ruling",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "registration" => Some(Self::Registration),
            "application" => Some(Self::Application),
            "recall" => Some(Self::Recall),
            "adverse_event" => Some(Self::AdverseEvent),
            "guidance" => Some(Self::Guidance),
            "customs_ruling" => Some(Self::CustomsRuling),
            _ => None,
        }
    }

    pub fn all() -> &'static [RecordKind] {
        &[
            Self::Registration,
            Self::Application,
            Self::Recall,
            Self::AdverseEvent,
            Self::Guidance,
            Self::CustomsRuling,
        ]
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Risk Level
// ═══════════════════════════════════════════

/// Risk level carried by every regulatory record. Judging only ever moves
/// records between HIGH (related or undecided) and LOW (confirmed unrelated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Regulatory Record (normalized view of one row)
// ═══════════════════════════════════════════

/// A regulatory record loaded from one of the six kind tables, normalized
/// to the three fields the judge cares about.
#[derive(Debug, Clone)]
pub struct RegulatoryRecord {
    pub id: i64,
    pub kind: RecordKind,
    pub name: String,
    pub manufacturer: String,
    pub description: String,
    pub country: Option<String>,
    pub risk_level: RiskLevel,
    pub remark: Option<String>,
}

// ═══════════════════════════════════════════
// Classification Input (sent to the oracle)
// ═══════════════════════════════════════════

/// Normalized input for a single classification call.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationInput {
    pub entity_type: String,
    pub name: String,
    pub manufacturer: String,
    pub description: String,
}

impl ClassificationInput {
    pub fn from_record(record: &RegulatoryRecord) -> Self {
        Self {
            entity_type: record.kind.as_str().to_string(),
            name: record.name.clone(),
            manufacturer: record.manufacturer.clone(),
            description: truncate_description(&record.description),
        }
    }
}

/// Cap the description at [`MAX_DESCRIPTION_CHARS`] characters, marking
/// truncation with a trailing ellipsis.
pub fn truncate_description(s: &str) -> String {
    if s.chars().count() <= MAX_DESCRIPTION_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
    out.push_str("...");
    out
}

// ═══════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    #[serde(rename = "ORACLE")]
    Oracle,
    #[serde(rename = "DENYLIST")]
    DenyList,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oracle => "ORACLE",
            Self::DenyList => "DENYLIST",
        }
    }
}

/// A relevance verdict for one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub is_related: bool,
    /// 0.0-1.0; deny-list matches are always 1.0.
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub extracted_keywords: Vec<String>,
    pub source: DecisionSource,
    /// True when the oracle reply could not be parsed and the verdict was
    /// closed to "unrelated". Such decisions are counted as failures and
    /// never applied to a record.
    #[serde(default)]
    pub fail_closed: bool,
}

impl Decision {
    /// Verdict for a deny-list hit: unrelated with full confidence, oracle
    /// never consulted.
    pub fn denylist_match(term: &str) -> Self {
        Self {
            is_related: false,
            confidence: 1.0,
            reason: format!("matched term: {term}"),
            category: "deny-list".to_string(),
            extracted_keywords: Vec::new(),
            source: DecisionSource::DenyList,
            fail_closed: false,
        }
    }

    /// Closed verdict for an unparseable oracle reply.
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self {
            is_related: false,
            confidence: 0.0,
            reason: reason.into(),
            category: String::new(),
            extracted_keywords: Vec::new(),
            source: DecisionSource::Oracle,
            fail_closed: true,
        }
    }
}

// ═══════════════════════════════════════════
// Tasks
// ═══════════════════════════════════════════

/// Lifecycle status of a judge task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a task should judge. Kinds default to all six; risk level defaults
/// to HIGH (LOW records were already ruled out).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskScope {
    pub module_scope: String,
    pub record_kinds: Option<Vec<RecordKind>>,
    pub country: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub limit: Option<u32>,
}

impl Default for TaskScope {
    fn default() -> Self {
        Self {
            module_scope: DEVICE_DATA_MODULE.to_string(),
            record_kinds: None,
            country: None,
            risk_level: None,
            limit: None,
        }
    }
}

/// A judge task row with its progress counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub scope: TaskScope,
    pub status: TaskStatus,
    pub total_count: u32,
    pub processed_count: u32,
    pub related_count: u32,
    pub unrelated_count: u32,
    pub failed_count: u32,
    pub distinct_keyword_count: u32,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}

// ═══════════════════════════════════════════
// Judge Mode
// ═══════════════════════════════════════════

/// Whether decisions mutate records directly or are staged for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeMode {
    /// Apply decisions to records immediately.
    Auto,
    /// Stage every decision as a pending judgment; records change only on
    /// human confirmation.
    Review,
}

// ═══════════════════════════════════════════
// Pending Judgments
// ═══════════════════════════════════════════

/// Review state of a staged judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JudgmentStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl JudgmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for JudgmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A staged decision awaiting human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingJudgment {
    pub id: String,
    pub module_type: String,
    pub record_kind: RecordKind,
    pub record_id: i64,
    pub decision: Decision,
    pub suggested_risk_level: RiskLevel,
    pub suggested_remark: String,
    pub denylist_candidates: Vec<String>,
    pub denied_by_denylist: bool,
    pub status: JudgmentStatus,
    pub created_time: String,
    pub expire_time: String,
    pub reviewed_time: Option<String>,
    pub reviewed_by: Option<String>,
}

/// Outcome of a batch confirmation. Per-id failures are isolated and
/// reported here instead of aborting the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfirmOutcome {
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

// ═══════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════

/// Configuration for the judging pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Oracle endpoint base URL (OpenAI-compatible chat completions API).
    pub oracle_base_url: String,
    /// Bearer token for the oracle endpoint.
    pub oracle_api_key: String,
    /// Model name sent with every classification request.
    pub oracle_model: String,
    /// Per-request oracle timeout (default: 60s).
    pub oracle_timeout_secs: u64,
    /// Inter-batch pacing delay after each persisted progress checkpoint.
    pub pacing_delay_ms: u64,
    /// Persist task counters every N processed items (default: 100).
    pub persist_interval: u32,
    /// Days until an unreviewed pending judgment expires (default: 30).
    pub judgment_expiry_days: i64,
    /// Worker threads in the background executor.
    pub worker_threads: usize,
    /// Auto-apply decisions or stage them for review.
    pub mode: JudgeMode,
    /// Known skin-device brands that must never become deny-list terms.
    pub brand_allow_list: Vec<String>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            oracle_base_url: "https://api.openai.com/v1".to_string(),
            oracle_api_key: String::new(),
            oracle_model: "gpt-4o-mini".to_string(),
            oracle_timeout_secs: 60,
            pacing_delay_ms: 1000,
            persist_interval: 100,
            judgment_expiry_days: 30,
            worker_threads: 2,
            mode: JudgeMode::Review,
            brand_allow_list: default_brand_allow_list(),
        }
    }
}

fn default_brand_allow_list() -> Vec<String> {
    [
        "visia",
        "canfield",
        "observ",
        "dermaflash",
        "neutrogena",
        "dermalogica",
        "janus",
        "callegari",
        "aimyskin",
        "skin",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
