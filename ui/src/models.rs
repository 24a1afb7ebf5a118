use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// AI platform a scan probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
    Chatgpt,
    Perplexity,
    GoogleAiMode,
    GoogleAiOverview,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Chatgpt,
        Platform::Perplexity,
        Platform::GoogleAiMode,
        Platform::GoogleAiOverview,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Platform::Chatgpt => "ChatGPT",
            Platform::Perplexity => "Perplexity",
            Platform::GoogleAiMode => "Google AI Mode",
            Platform::GoogleAiOverview => "AI Overviews",
        }
    }
}

/// Where a batch of records came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanOrigin {
    Api,
    Extension,
}

/// One completed probe of a single platform for one prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub platform: Platform,
    pub prompt_index: usize,
    pub prompt: String,
    pub found: bool,
    pub mention_count: u32,
    pub snippet: Option<String>,
    pub competitors: Vec<String>,
    pub sources: Vec<String>,
    pub position: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One scan event: all records of one platform for one company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBatch {
    pub id: String,
    /// Stored row the batch came from. Batches split from one row are one scan.
    pub row_key: String,
    pub platform: Platform,
    pub origin: ScanOrigin,
    pub company_name: String,
    pub website: Option<String>,
    pub category: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub prompts: Vec<String>,
    pub records: Vec<ScanRecord>,
    /// Summary counters stored on the row, set when the row maps to this batch alone
    #[serde(default)]
    pub reported_mentions: Option<u32>,
    #[serde(default)]
    pub reported_queries: Option<u32>,
}

impl ScanBatch {
    /// Stored counter first, then the found flags of the records.
    pub fn mentions(&self) -> u32 {
        self.reported_mentions
            .filter(|m| *m > 0)
            .unwrap_or_else(|| self.records.iter().filter(|r| r.found).count() as u32)
    }

    /// Stored counter, then the record count, then the tracked prompts of a
    /// scan whose results have not landed yet.
    pub fn queries(&self) -> u32 {
        if let Some(total) = self.reported_queries.filter(|q| *q > 0) {
            return total;
        }
        if self.records.is_empty() {
            self.prompts.len() as u32
        } else {
            self.records.len() as u32
        }
    }
}

/// One point on a score chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePoint {
    pub date: Option<DateTime<Utc>>,
    pub score: u32,
}

/// Per-company visibility aggregate across all platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteAggregate {
    pub key: String,
    /// Path-safe form of `key` for page links
    #[serde(default)]
    pub slug: String,
    pub name: String,
    pub website: Option<String>,
    pub category: Option<String>,
    pub platforms: Vec<Platform>,
    pub total_mentions: u32,
    pub total_queries: u32,
    pub current_score: u32,
    pub score_history: Vec<ScorePoint>,
    pub score_change: i64,
    pub last_scan: Option<DateTime<Utc>>,
    pub scan_count: usize,
    pub scans: Vec<ScanBatch>,
}

/// Dashboard summary statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_sites: usize,
    pub avg_score: u32,
    pub total_scans: usize,
    pub best_performer: Option<String>,
    pub best_score: u32,
    pub scans_this_month: usize,
    pub score_change: i64,
}

/// Website list plus stats, as shown on the landing page
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOverview {
    pub stats: DashboardStats,
    pub websites: Vec<WebsiteAggregate>,
    pub failed_sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRef {
    pub name: String,
    pub website: Option<String>,
    pub category: Option<String>,
}

/// Visibility percentages for the active company
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Visibility {
    pub chatgpt: u32,
    pub perplexity: u32,
    pub total: u32,
    pub found: u32,
    pub total_prompts: u32,
    pub chatgpt_found: u32,
    pub perplexity_found: u32,
    pub chatgpt_total: u32,
    pub perplexity_total: u32,
    pub google_ai_mode_found: u32,
    pub google_ai_overview_found: u32,
    pub platform_hits: u32,
}

/// One platform's result for one prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCell {
    pub scanned: bool,
    pub found: bool,
    pub mention_count: u32,
    pub snippet: Option<String>,
    pub competitors: Vec<String>,
    pub sources: Vec<String>,
    pub from_extension: bool,
}

/// Index-aligned results of one tracked prompt across platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDetail {
    pub id: usize,
    pub text: String,
    pub chatgpt: PromptCell,
    pub perplexity: PromptCell,
    pub google_ai_mode: PromptCell,
    pub google_ai_overview: PromptCell,
}

impl PromptDetail {
    pub fn cell(&self, platform: Platform) -> &PromptCell {
        match platform {
            Platform::Chatgpt => &self.chatgpt,
            Platform::Perplexity => &self.perplexity,
            Platform::GoogleAiMode => &self.google_ai_mode,
            Platform::GoogleAiOverview => &self.google_ai_overview,
        }
    }

    pub fn cell_mut(&mut self, platform: Platform) -> &mut PromptCell {
        match platform {
            Platform::Chatgpt => &mut self.chatgpt,
            Platform::Perplexity => &mut self.perplexity,
            Platform::GoogleAiMode => &mut self.google_ai_mode,
            Platform::GoogleAiOverview => &mut self.google_ai_overview,
        }
    }

    pub fn found_anywhere(&self) -> bool {
        Platform::ALL.iter().any(|p| self.cell(*p).found)
    }
}

/// Google AI summary (AI Mode or AI Overviews)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSummary {
    pub found: u32,
    pub total: u32,
    pub pct: u32,
    pub last_scan: Option<DateTime<Utc>>,
}

/// Where a competitor showed up for one prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorAppearance {
    pub prompt_id: usize,
    pub prompt: String,
    pub platforms: Vec<Platform>,
}

/// Derived competitor view, ranked by appearances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorAggregate {
    pub rank: usize,
    pub name: String,
    pub mentions: u32,
    pub appearances: Vec<CompetitorAppearance>,
    pub platforms: Vec<Platform>,
    pub top_threat: bool,
}

impl CompetitorAggregate {
    pub fn appearance_count(&self) -> usize {
        self.appearances.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl ThreatLevel {
    /// Heading text for the threat banner
    pub fn label(self) -> &'static str {
        match self {
            ThreatLevel::Critical => "Critical",
            ThreatLevel::High => "High",
            ThreatLevel::Medium => "Medium",
            ThreatLevel::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAssessment {
    pub level: ThreatLevel,
    pub your_pct: u32,
    pub top_competitor: Option<String>,
    pub top_competitor_pct: u32,
    pub delta: i64,
}

/// Per-scan visibility for the trend chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: Option<DateTime<Utc>>,
    pub chatgpt: u32,
    pub perplexity: u32,
    pub total: u32,
}

/// Reporting window for trends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "7d")]
    Week,
    #[default]
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
}

impl Period {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("7d") => Period::Week,
            Some("90d") => Period::Quarter,
            _ => Period::Month,
        }
    }

    pub fn days(self) -> i64 {
        match self {
            Period::Week => 7,
            Period::Month => 30,
            Period::Quarter => 90,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Week => "7d",
            Period::Month => "30d",
            Period::Quarter => "90d",
        }
    }
}

/// Everything the website detail view renders
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyDetail {
    pub company: CompanyRef,
    pub website: WebsiteAggregate,
    pub visibility: Visibility,
    pub avg_mentions: Option<f64>,
    pub prompts: Vec<PromptDetail>,
    pub competitors: Vec<CompetitorAggregate>,
    pub threat: ThreatAssessment,
    pub google_ai_mode: PlatformSummary,
    pub google_ai_overview: PlatformSummary,
    pub has_extension_data: bool,
    pub trend: Vec<TrendPoint>,
    pub period: Period,
    pub last_scan: Option<DateTime<Utc>>,
    pub scan_id: Option<String>,
}

/// Rank-check position for one platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RankPosition {
    pub position: Option<i64>,
    pub found: bool,
    pub snippet: Option<String>,
    pub mentioned: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RankCheck {
    pub id: Value,
    pub keyword: Option<String>,
    pub brand_name: Option<String>,
    pub domain: Option<String>,
    pub service_area: Option<String>,
    pub date: Option<String>,
    pub chatgpt: RankPosition,
    pub perplexity: RankPosition,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanySummary {
    pub company_name: Option<String>,
    pub website: Option<String>,
    pub company_category: Option<String>,
}

/// Summary returned by `GET /api/dashboard`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardSnapshot {
    pub visibility: Visibility,
    pub prompts: Vec<Value>,
    pub competitors: Vec<Value>,
    pub rank_checks: Vec<RankCheck>,
    pub google_ai_mode: Value,
    pub google_ai_overview: Value,
    pub active_company: Option<CompanyRef>,
    pub companies: Vec<CompanySummary>,
    pub last_scan: Option<String>,
    pub total_scans: u32,
}

impl DashboardSnapshot {
    /// A scan has landed once the summary carries prompts.
    pub fn has_scan_data(&self) -> bool {
        self.visibility.total_prompts > 0
    }
}

/// Cached snapshot of one ad-hoc page audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub url: String,
    pub domain: String,
    pub score: u32,
    pub mentioned: bool,
    pub company_name: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// User-editable tracked prompts of one company
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSet {
    pub company: CompanyRef,
    pub scan_id: Option<String>,
    pub prompts: Vec<String>,
}
