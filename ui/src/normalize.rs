//! Source adapters: every backing table stores scan results under its own
//! historical field names. Each adapter turns raw rows into [`ScanBatch`]es so
//! the aggregator only ever sees one shape.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::competitors::{clean_competitor_name, extract_names_from_response, push_unique};
use crate::models::{Platform, ScanBatch, ScanOrigin, ScanRecord};

const MENTIONED_KEYS: &[&str] = &["company_mentioned", "companyMentioned", "found"];
const MENTION_COUNT_KEYS: &[&str] = &["mentions_count", "mentionCount", "mention_count"];
const PROMPT_KEYS: &[&str] = &["ai_prompt", "query", "prompt", "searchQuery"];
const COMPETITOR_KEYS: &[&str] = &[
    "competitors_mentioned",
    "competitorsMentioned",
    "competitorsInSources",
    "competitors",
];
const SOURCE_KEYS: &[&str] = &["sources", "references", "cited_sources", "citedSources", "citations"];
const SNIPPET_KEYS: &[&str] = &[
    "simulated_ai_response_snippet",
    "snippet",
    "aiResponse",
    "textContent",
    "full_response",
    "response_preview",
    "response",
];
const PROMPT_ITEM_KEYS: &[&str] = &["prompt", "text", "query", "ai_prompt", "title"];
const ROW_MENTION_KEYS: &[&str] = &["found_count", "total_company_mentions", "total_mentions"];
const ROW_QUERY_KEYS: &[&str] = &["total_queries"];

/// Domains that show up as citations but are never competitors.
const NON_COMPETITOR_DOMAINS: &[&str] = &["sortlist", "trustoo", "google", "wikipedia"];

/// Backing table a batch of rows was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanSource {
    ToolIntegrations,
    ExtensionChatgpt,
    GoogleAiMode,
    GoogleAiOverview,
}

impl ScanSource {
    pub const ALL: [ScanSource; 4] = [
        ScanSource::ToolIntegrations,
        ScanSource::ExtensionChatgpt,
        ScanSource::GoogleAiMode,
        ScanSource::GoogleAiOverview,
    ];

    pub fn table(self) -> &'static str {
        match self {
            ScanSource::ToolIntegrations => "tool_integrations",
            ScanSource::ExtensionChatgpt => "chatgpt_scans",
            ScanSource::GoogleAiMode => "google_ai_scans",
            ScanSource::GoogleAiOverview => "google_ai_overview_scans",
        }
    }

    pub fn select(self) -> &'static str {
        match self {
            ScanSource::ExtensionChatgpt => "*,chatgpt_query_results(*)",
            _ => "*",
        }
    }

    /// Platforms whose records this source can contain.
    pub fn platforms(self) -> &'static [Platform] {
        match self {
            ScanSource::ToolIntegrations => &[Platform::Chatgpt, Platform::Perplexity],
            ScanSource::ExtensionChatgpt => &[Platform::Chatgpt],
            ScanSource::GoogleAiMode => &[Platform::GoogleAiMode],
            ScanSource::GoogleAiOverview => &[Platform::GoogleAiOverview],
        }
    }

    pub fn adapter(self) -> Box<dyn SourceAdapter> {
        match self {
            ScanSource::ToolIntegrations => Box::new(ToolIntegrationAdapter),
            ScanSource::ExtensionChatgpt => Box::new(ExtensionScanAdapter),
            ScanSource::GoogleAiMode => Box::new(GoogleAiAdapter::new(Platform::GoogleAiMode)),
            ScanSource::GoogleAiOverview => {
                Box::new(GoogleAiAdapter::new(Platform::GoogleAiOverview))
            }
        }
    }
}

/// Turns raw rows of one backing table into normalized scan batches.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> ScanSource;

    fn normalize(&self, row: &Value) -> Vec<ScanBatch>;

    fn normalize_rows(&self, rows: &[Value]) -> Vec<ScanBatch> {
        rows.iter().flat_map(|row| self.normalize(row)).collect()
    }
}

// =====================
// Field helpers
// =====================

fn first_bool(item: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| item.get(*k).and_then(Value::as_bool))
}

fn first_count(item: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter().find_map(|k| {
        let v = item.get(*k)?;
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n.min(u32::MAX as u64) as u32)
    })
}

fn first_str<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| {
        item.get(*k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
}

fn first_array<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|k| item.get(*k).and_then(Value::as_array))
}

fn id_string(row: &Value) -> String {
    match row.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// `{table}:{id}`; rows without an id fall back to company and timestamp.
fn row_key(source: ScanSource, row: &Value) -> String {
    let id = id_string(row);
    if id.is_empty() {
        let created = row.get("created_at").and_then(Value::as_str).unwrap_or_default();
        format!("{}:{}@{}", source.table(), company_name(row), created)
    } else {
        format!("{}:{}", source.table(), id)
    }
}

/// Non-zero summary counter stored on the row itself.
fn row_counter(row: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter().find_map(|k| first_count(row, &[*k]).filter(|c| *c > 0))
}

pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Tracked prompts are stored either as plain strings or as objects.
pub fn prompt_text(item: &Value) -> Option<String> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(_) => first_str(item, PROMPT_ITEM_KEYS).map(str::to_string),
        _ => None,
    }
}

fn prompt_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(prompt_text).collect())
        .unwrap_or_default()
}

fn competitor_list(item: &Value) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(list) = first_array(item, COMPETITOR_KEYS) {
        for name in list.iter().filter_map(Value::as_str) {
            if let Some(cleaned) = clean_competitor_name(name) {
                push_unique(&mut names, cleaned);
            }
        }
    }
    names
}

fn source_urls(item: &Value) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for source in first_array(item, SOURCE_KEYS).into_iter().flatten() {
        let url = match source {
            Value::String(s) => Some(s.trim()),
            Value::Object(_) => first_str(source, &["link", "url", "domain"]),
            _ => None,
        };
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}

/// Strips scheme, `www.` and trailing slash for domain comparisons.
pub fn bare_domain(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    without_www.trim_end_matches('/').to_string()
}

fn company_name(row: &Value) -> String {
    first_str(row, &["company_name", "brand_name", "website"])
        .unwrap_or("Unknown")
        .to_string()
}

fn fallback_prompt(index: usize, prompts: &[String]) -> String {
    prompts
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("Prompt {}", index + 1))
}

/// Applies the shared drift rules to one raw result item.
fn record_from_item(
    platform: Platform,
    index: usize,
    item: &Value,
    prompts: &[String],
    timestamp: Option<DateTime<Utc>>,
) -> ScanRecord {
    let explicit_count = first_count(item, MENTION_COUNT_KEYS);
    let found = first_bool(item, MENTIONED_KEYS)
        .unwrap_or_else(|| explicit_count.map(|c| c > 0).unwrap_or(false));
    let mention_count = explicit_count.unwrap_or(if found { 1 } else { 0 });

    ScanRecord {
        platform,
        prompt_index: index,
        prompt: first_str(item, PROMPT_KEYS)
            .map(str::to_string)
            .unwrap_or_else(|| fallback_prompt(index, prompts)),
        found,
        mention_count,
        snippet: first_str(item, SNIPPET_KEYS).map(str::to_string),
        competitors: competitor_list(item),
        sources: source_urls(item),
        position: item.get("position").and_then(Value::as_i64),
        timestamp,
    }
}

// =====================
// Tool integrations (API ChatGPT + Perplexity)
// =====================

pub struct ToolIntegrationAdapter;

/// Splits stored results into (chatgpt, perplexity) item lists.
///
/// Current rows hold `{chatgpt: [...], perplexity: [...]}`. Older rows hold a
/// flat array, optionally tagged per item; untagged items are Perplexity.
fn split_platform_results(results: &Value) -> (Vec<&Value>, Vec<&Value>) {
    match results {
        Value::Object(map) => {
            let list = |key: &str| -> Vec<&Value> {
                map.get(key)
                    .and_then(Value::as_array)
                    .map(|a| a.iter().collect())
                    .unwrap_or_default()
            };
            (list("chatgpt"), list("perplexity"))
        }
        Value::Array(items) => {
            let tag = |item: &Value| item.get("platform").and_then(Value::as_str).map(str::to_string);
            let chatgpt: Vec<&Value> = items
                .iter()
                .filter(|i| tag(i).as_deref() == Some("chatgpt"))
                .collect();
            let mut perplexity: Vec<&Value> = items
                .iter()
                .filter(|i| tag(i).as_deref() == Some("perplexity"))
                .collect();
            perplexity.extend(items.iter().filter(|i| tag(i).is_none()));
            (chatgpt, perplexity)
        }
        _ => (Vec::new(), Vec::new()),
    }
}

impl SourceAdapter for ToolIntegrationAdapter {
    fn source(&self) -> ScanSource {
        ScanSource::ToolIntegrations
    }

    fn normalize(&self, row: &Value) -> Vec<ScanBatch> {
        let created_at = parse_timestamp(row.get("created_at"));
        let prompts = prompt_list(row.get("commercial_prompts"));
        let results = row
            .get("results")
            .filter(|v| !v.is_null())
            .or_else(|| row.get("scan_results"))
            .unwrap_or(&Value::Null);
        let (chatgpt, perplexity) = split_platform_results(results);
        let reported_mentions = row_counter(row, ROW_MENTION_KEYS);
        let reported_queries = row_counter(row, ROW_QUERY_KEYS);

        let batch = |platform: Platform, items: &[&Value]| ScanBatch {
            id: id_string(row),
            row_key: row_key(ScanSource::ToolIntegrations, row),
            platform,
            origin: ScanOrigin::Api,
            company_name: company_name(row),
            website: first_str(row, &["website"]).map(str::to_string),
            category: first_str(row, &["company_category"]).map(str::to_string),
            created_at,
            prompts: prompts.clone(),
            records: items
                .iter()
                .enumerate()
                .map(|(i, item)| record_from_item(platform, i, item, &prompts, created_at))
                .collect(),
            reported_mentions: None,
            reported_queries: None,
        };

        let mut batches: Vec<ScanBatch> = [(Platform::Chatgpt, chatgpt), (Platform::Perplexity, perplexity)]
            .into_iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(platform, items)| batch(platform, items.as_slice()))
            .collect();

        // Results not written yet: the scan still counts, sized by its prompts.
        if batches.is_empty() && (!prompts.is_empty() || reported_mentions.or(reported_queries).is_some()) {
            batches.push(batch(Platform::Perplexity, &[] as &[&Value]));
        }
        // Row counters cover ChatGPT and Perplexity together, so they only
        // describe a batch that has the row to itself.
        if let [only] = batches.as_mut_slice() {
            only.reported_mentions = reported_mentions;
            only.reported_queries = reported_queries;
        }
        batches
    }
}

// =====================
// Browser extension ChatGPT scans
// =====================

pub struct ExtensionScanAdapter;

impl SourceAdapter for ExtensionScanAdapter {
    fn source(&self) -> ScanSource {
        ScanSource::ExtensionChatgpt
    }

    fn normalize(&self, row: &Value) -> Vec<ScanBatch> {
        let created_at = parse_timestamp(row.get("created_at"));
        let company = company_name(row);
        let items: &[Value] = row
            .get("chatgpt_query_results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let reported_mentions = row_counter(row, ROW_MENTION_KEYS);
        let reported_queries = row_counter(row, ROW_QUERY_KEYS);
        if items.is_empty() && reported_mentions.is_none() && reported_queries.is_none() {
            return Vec::new();
        }

        let records = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let mut record = record_from_item(Platform::Chatgpt, i, item, &[], created_at);
                let full_text = first_str(item, &["full_response", "response_preview", "snippet"]);
                if let Some(text) = full_text {
                    for name in extract_names_from_response(text, &company) {
                        if !record.competitors.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
                            record.competitors.push(name);
                        }
                    }
                }
                record
            })
            .collect::<Vec<_>>();
        let prompts = if records.is_empty() {
            prompt_list(row.get("prompts"))
        } else {
            records.iter().map(|r| r.prompt.clone()).collect()
        };

        vec![ScanBatch {
            id: id_string(row),
            row_key: row_key(ScanSource::ExtensionChatgpt, row),
            platform: Platform::Chatgpt,
            origin: ScanOrigin::Extension,
            company_name: company,
            website: first_str(row, &["website"]).map(str::to_string),
            category: None,
            created_at,
            prompts,
            records,
            reported_mentions,
            reported_queries,
        }]
    }
}

// =====================
// Google AI Mode / AI Overviews
// =====================

pub struct GoogleAiAdapter {
    platform: Platform,
}

impl GoogleAiAdapter {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

/// Results are stored as an array, `{results: [...]}`, or under some other key.
fn google_result_items(results: &Value) -> Vec<&Value> {
    match results {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            if let Some(items) = map.get("results").and_then(Value::as_array) {
                return items.iter().collect();
            }
            first_object_array(map)
        }
        _ => Vec::new(),
    }
}

fn first_object_array(map: &Map<String, Value>) -> Vec<&Value> {
    map.values()
        .filter_map(Value::as_array)
        .find(|items| items.first().map(Value::is_object).unwrap_or(false))
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

/// Spellings of a company name worth searching for in response text.
pub fn name_variants(company: &str) -> Vec<String> {
    let lower = company.trim().to_lowercase();
    if lower.is_empty() {
        return Vec::new();
    }
    let words: Vec<&str> = lower.split_whitespace().collect();
    let candidates = [
        lower.clone(),
        words.concat(),
        words.join("-"),
        lower.replace(|c: char| matches!(c, '-' | '_' | '.'), " "),
    ];
    let mut variants = Vec::new();
    for candidate in candidates {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

fn source_domain_matches(item: &Value, own_domain: &str) -> bool {
    if own_domain.is_empty() {
        return false;
    }
    first_array(item, SOURCE_KEYS)
        .into_iter()
        .flatten()
        .filter_map(|s| first_str(s, &["domain", "link"]))
        .map(bare_domain)
        .filter(|d| !d.is_empty())
        .any(|d| {
            let host = d.split('/').next().unwrap_or_default();
            d.contains(own_domain) || (!host.is_empty() && own_domain.contains(host))
        })
}

fn competitors_from_sources(item: &Value, own_domain: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for source in first_array(item, SOURCE_KEYS).into_iter().flatten() {
        let Some(domain) = first_str(source, &["domain"]) else {
            continue;
        };
        let lower = domain.to_lowercase();
        if domain.len() < 2
            || NON_COMPETITOR_DOMAINS.iter().any(|d| lower.contains(d))
            || (!own_domain.is_empty() && lower.contains(own_domain))
        {
            continue;
        }
        let stem = bare_domain(&lower);
        let stem = [".nl", ".com", ".eu", ".org", ".net"]
            .iter()
            .find_map(|tld| stem.strip_suffix(tld))
            .unwrap_or(&stem)
            .to_string();
        if stem.len() >= 2 && !seen.contains(&stem) {
            seen.push(stem);
            names.push(domain.to_string());
        }
    }
    names
}

impl SourceAdapter for GoogleAiAdapter {
    fn source(&self) -> ScanSource {
        match self.platform {
            Platform::GoogleAiOverview => ScanSource::GoogleAiOverview,
            _ => ScanSource::GoogleAiMode,
        }
    }

    fn normalize(&self, row: &Value) -> Vec<ScanBatch> {
        let created_at = parse_timestamp(row.get("created_at"));
        let company = company_name(row);
        let website = first_str(row, &["website"]).map(str::to_string);
        let own_domain = website.as_deref().map(bare_domain).unwrap_or_default();
        let prompts = prompt_list(row.get("prompts"));
        let variants = name_variants(&company);
        let items = google_result_items(row.get("results").unwrap_or(&Value::Null));

        let records: Vec<ScanRecord> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let text = first_str(item, &["aiResponse", "textContent", "simulated_ai_response_snippet", "snippet"])
                    .unwrap_or_default();
                let text_lower = text.to_lowercase();

                let mut found = MENTIONED_KEYS[..2]
                    .iter()
                    .any(|k| item.get(*k).and_then(Value::as_bool) == Some(true));
                if !found && !text_lower.is_empty() {
                    found = variants.iter().any(|v| text_lower.contains(v.as_str()));
                }
                if !found {
                    found = source_domain_matches(item, &own_domain);
                }

                let mut counted = 0;
                if found {
                    counted = variants
                        .iter()
                        .map(|v| text_lower.matches(v.as_str()).count() as u32)
                        .max()
                        .unwrap_or(0)
                        .max(1);
                }
                let mention_count = first_count(item, &["mentionCount", "mentions_count"])
                    .filter(|c| *c > 0)
                    .unwrap_or(counted);

                let competitors = if first_array(item, COMPETITOR_KEYS).is_some() {
                    competitor_list(item)
                } else {
                    competitors_from_sources(item, &own_domain)
                };

                ScanRecord {
                    platform: self.platform,
                    prompt_index: i,
                    prompt: first_str(item, &["query", "ai_prompt", "prompt", "searchQuery"])
                        .map(str::to_string)
                        .unwrap_or_else(|| fallback_prompt(i, &prompts)),
                    found,
                    mention_count,
                    snippet: (!text.is_empty()).then(|| text.to_string()),
                    competitors,
                    sources: source_urls(item),
                    position: None,
                    timestamp: created_at,
                }
            })
            .collect();

        let reported_mentions = row_counter(row, ROW_MENTION_KEYS);
        let reported_queries = row_counter(row, ROW_QUERY_KEYS);
        if records.is_empty() && prompts.is_empty() && reported_queries.is_none() {
            return Vec::new();
        }

        vec![ScanBatch {
            id: id_string(row),
            row_key: row_key(self.source(), row),
            platform: self.platform,
            origin: ScanOrigin::Api,
            company_name: company,
            website,
            category: None,
            created_at,
            prompts,
            records,
            reported_mentions,
            reported_queries,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_integration_splits_current_shape() {
        let row = json!({
            "id": 7,
            "company_name": "Online Labs",
            "website": "https://onlinelabs.nl",
            "company_category": "Marketing",
            "commercial_prompts": ["best agency", {"prompt": "top seo firm"}],
            "created_at": "2026-02-01T10:00:00+00:00",
            "results": {
                "chatgpt": [
                    {"ai_prompt": "best agency", "company_mentioned": true, "mentions_count": 2,
                     "competitors_mentioned": ["Acme", " Acme ", "X"]},
                    {"company_mentioned": false}
                ],
                "perplexity": [
                    {"companyMentioned": true, "sources": ["https://a.nl", {"link": "https://b.nl"}]}
                ]
            }
        });

        let batches = ToolIntegrationAdapter.normalize(&row);
        assert_eq!(batches.len(), 2);
        let chatgpt = &batches[0];
        assert_eq!(chatgpt.platform, Platform::Chatgpt);
        assert_eq!(chatgpt.id, "7");
        assert_eq!(chatgpt.records[0].mention_count, 2);
        assert_eq!(chatgpt.records[0].competitors, vec!["Acme".to_string()]);
        assert_eq!(chatgpt.records[1].prompt, "top seo firm");
        assert!(!chatgpt.records[1].found);

        let perplexity = &batches[1];
        assert!(perplexity.records[0].found);
        assert_eq!(perplexity.records[0].mention_count, 1);
        assert_eq!(perplexity.records[0].sources, vec!["https://a.nl", "https://b.nl"]);
    }

    #[test]
    fn legacy_flat_results_are_perplexity() {
        let row = json!({
            "id": "abc",
            "company_name": "Acme",
            "scan_results": [{"found": true}, {"mentions_count": 0}, {"mentions_count": 3}]
        });

        let batches = ToolIntegrationAdapter.normalize(&row);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].platform, Platform::Perplexity);
        let found: Vec<bool> = batches[0].records.iter().map(|r| r.found).collect();
        assert_eq!(found, vec![true, false, true]);
    }

    #[test]
    fn tagged_flat_results_split_by_platform() {
        let row = json!({
            "company_name": "Acme",
            "results": [
                {"platform": "chatgpt", "company_mentioned": true},
                {"platform": "perplexity", "company_mentioned": false},
                {"company_mentioned": true}
            ]
        });

        let batches = ToolIntegrationAdapter.normalize(&row);
        assert_eq!(batches[0].records.len(), 1);
        assert_eq!(batches[1].records.len(), 2);
        assert!(batches[1].records[1].found);
    }

    #[test]
    fn unknown_result_shape_yields_nothing() {
        let row = json!({"company_name": "Acme", "results": {"other": 1}});
        assert!(ToolIntegrationAdapter.normalize(&row).is_empty());
    }

    #[test]
    fn split_row_shares_one_row_key() {
        let row = json!({
            "id": 9,
            "company_name": "Acme",
            "total_company_mentions": 8,
            "total_queries": 20,
            "results": {
                "chatgpt": [{"company_mentioned": true}],
                "perplexity": [{"company_mentioned": false}]
            }
        });

        let batches = ToolIntegrationAdapter.normalize(&row);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.row_key == "tool_integrations:9"));
        // The row total spans both platforms, so each batch keeps its own counts.
        assert_eq!(batches[0].mentions(), 1);
        assert_eq!(batches[1].queries(), 1);
    }

    #[test]
    fn integration_row_without_results_is_pending() {
        let row = json!({
            "id": 4,
            "company_name": "Acme",
            "commercial_prompts": ["a", "b"],
            "results": null
        });

        let batches = ToolIntegrationAdapter.normalize(&row);
        assert_eq!(batches.len(), 1);
        assert!(batches[0].records.is_empty());
        assert_eq!(batches[0].mentions(), 0);
        assert_eq!(batches[0].queries(), 2);
    }

    #[test]
    fn single_platform_row_prefers_stored_counters() {
        let row = json!({
            "id": 5,
            "company_name": "Acme",
            "total_mentions": 4,
            "total_queries": 6,
            "scan_results": [{"found": true}, {"found": false}]
        });

        let batches = ToolIntegrationAdapter.normalize(&row);
        assert_eq!(batches[0].mentions(), 4);
        assert_eq!(batches[0].queries(), 6);
    }

    #[test]
    fn extension_counters_survive_empty_results() {
        let row = json!({
            "id": 12,
            "company_name": "Acme",
            "found_count": 3,
            "total_queries": 5,
            "chatgpt_query_results": []
        });

        let batches = ExtensionScanAdapter.normalize(&row);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].row_key, "chatgpt_scans:12");
        assert_eq!(batches[0].mentions(), 3);
        assert_eq!(batches[0].queries(), 5);
    }

    #[test]
    fn zero_counters_fall_back_to_records() {
        let row = json!({
            "id": 13,
            "company_name": "Acme",
            "found_count": 0,
            "total_queries": 0,
            "chatgpt_query_results": [{"query": "q1", "found": true}, {"query": "q2", "found": false}]
        });

        let batches = ExtensionScanAdapter.normalize(&row);
        assert_eq!(batches[0].mentions(), 1);
        assert_eq!(batches[0].queries(), 2);
    }

    #[test]
    fn google_detects_mentions_from_text_and_sources() {
        let row = json!({
            "id": 3,
            "company_name": "Online Labs",
            "website": "https://www.onlinelabs.nl/",
            "prompts": ["p1", "p2", "p3"],
            "created_at": "2026-02-03T08:00:00Z",
            "results": {"results": [
                {"aiResponse": "Try OnlineLabs or online labs for SEO. online labs is great."},
                {"aiResponse": "Nothing here", "sources": [{"domain": "onlinelabs.nl", "link": "https://onlinelabs.nl/x"}]},
                {"aiResponse": "Acme leads", "sources": [
                    {"domain": "www.acme.com"}, {"domain": "google.com"}, {"domain": "acme.com"}
                ]}
            ]}
        });

        let batches = GoogleAiAdapter::new(Platform::GoogleAiMode).normalize(&row);
        let records = &batches[0].records;
        assert!(records[0].found);
        assert_eq!(records[0].mention_count, 2);
        assert!(records[1].found);
        assert_eq!(records[1].mention_count, 1);
        assert!(!records[2].found);
        assert_eq!(records[2].competitors, vec!["www.acme.com".to_string()]);
        assert_eq!(records[2].prompt, "p3");
    }

    #[test]
    fn google_results_under_unknown_key() {
        let row = json!({
            "company_name": "Acme",
            "results": {"items": [{"query": "q", "companyMentioned": true}]}
        });
        let batches = GoogleAiAdapter::new(Platform::GoogleAiOverview).normalize(&row);
        assert_eq!(batches[0].platform, Platform::GoogleAiOverview);
        assert_eq!(batches[0].records[0].prompt, "q");
        assert!(batches[0].records[0].found);
    }

    #[test]
    fn extension_scan_enriches_competitors_from_text() {
        let row = json!({
            "id": 11,
            "company_name": "Online Labs",
            "created_at": "2026-02-05T12:00:00Z",
            "chatgpt_query_results": [{
                "query": "best agency amsterdam",
                "found": false,
                "competitors_mentioned": ["Acme"],
                "full_response": "Here are some options:\n1. Webfluencer – creative studio\n• Online Labs – us\n• acme – duplicate"
            }]
        });

        let batches = ExtensionScanAdapter.normalize(&row);
        assert_eq!(batches[0].origin, ScanOrigin::Extension);
        let record = &batches[0].records[0];
        assert_eq!(record.prompt, "best agency amsterdam");
        assert_eq!(record.competitors, vec!["Acme".to_string(), "Webfluencer".to_string()]);
    }

    #[test]
    fn name_variants_cover_spacing() {
        assert_eq!(
            name_variants("Online Labs"),
            vec!["online labs", "onlinelabs", "online-labs"]
        );
        assert_eq!(name_variants("online-labs"), vec!["online-labs", "online labs"]);
        assert!(name_variants("  ").is_empty());
    }

    #[test]
    fn timestamps_with_and_without_offset() {
        assert!(parse_timestamp(Some(&json!("2026-02-01T10:00:00.123456+00:00"))).is_some());
        assert!(parse_timestamp(Some(&json!("2026-02-01T10:00:00"))).is_some());
        assert!(parse_timestamp(Some(&json!("yesterday"))).is_none());
    }
}
