//! Data aggregation: merges normalized scan batches from every platform into
//! per-company visibility views. Pure functions of their inputs; the caller
//! supplies "now" so repeated runs over the same data are identical.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::competitors::{assess_threat, rank_competitors};
use crate::error::DashboardError;
use crate::models::*;
use crate::normalize::ScanSource;

/// Outcome of fetching one platform's data.
#[derive(Debug, Clone)]
pub enum SourceOutcome {
    Loaded(Vec<ScanBatch>),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PlatformInput {
    pub platform: Platform,
    pub outcome: SourceOutcome,
}

impl PlatformInput {
    pub fn loaded(platform: Platform, batches: Vec<ScanBatch>) -> Self {
        Self {
            platform,
            outcome: SourceOutcome::Loaded(batches),
        }
    }

    pub fn failed(platform: Platform, reason: impl Into<String>) -> Self {
        Self {
            platform,
            outcome: SourceOutcome::Failed(reason.into()),
        }
    }

    /// Failed sources contribute no batches.
    pub fn batches(&self) -> &[ScanBatch] {
        match &self.outcome {
            SourceOutcome::Loaded(batches) => batches,
            SourceOutcome::Failed(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WebsiteFilter {
    #[default]
    All,
    Best,
    Recent,
}

impl WebsiteFilter {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("best") => WebsiteFilter::Best,
            Some("recent") => WebsiteFilter::Recent,
            _ => WebsiteFilter::All,
        }
    }
}

/// `round(100 * part / whole)` with half-up rounding, 0 when `whole` is 0.
pub fn percent(part: u32, whole: u32) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((200 * part as u64 + whole as u64) / (2 * whole as u64)) as u32
}

/// Half-up rounding (`Math.round`), also for negative means.
fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

pub fn company_key(name: &str) -> String {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        "unknown".to_string()
    } else {
        key
    }
}

/// Lowercase alphanumerics with every other run collapsed to `-`, so a
/// company key can sit in a single path segment.
pub fn company_slug(key: &str) -> String {
    let mut slug = String::with_capacity(key.len());
    for c in key.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug.to_string()
    }
}

/// Runs each source's adapter and regroups the batches per platform.
///
/// A platform is only marked failed when every source feeding it failed.
pub fn inputs_from_sources(
    fetched: Vec<(ScanSource, Result<Vec<Value>, DashboardError>)>,
) -> (Vec<PlatformInput>, Vec<String>) {
    let mut per_platform: HashMap<Platform, Vec<ScanBatch>> = HashMap::new();
    let mut failures: HashMap<Platform, Vec<String>> = HashMap::new();
    let mut failed_sources = Vec::new();

    for (source, result) in fetched {
        match result {
            Ok(rows) => {
                let batches = source.adapter().normalize_rows(&rows);
                debug!("{}: {} rows -> {} batches", source.table(), rows.len(), batches.len());
                for platform in source.platforms() {
                    per_platform.entry(*platform).or_default();
                }
                for batch in batches {
                    per_platform.entry(batch.platform).or_default().push(batch);
                }
            }
            Err(e) => {
                warn!("Source {} unavailable, treating as empty: {}", source.table(), e);
                failed_sources.push(source.table().to_string());
                for platform in source.platforms() {
                    failures.entry(*platform).or_default().push(e.to_string());
                }
            }
        }
    }

    let inputs = Platform::ALL
        .into_iter()
        .map(|platform| match per_platform.remove(&platform) {
            Some(batches) => PlatformInput::loaded(platform, batches),
            None => PlatformInput::failed(
                platform,
                failures
                    .remove(&platform)
                    .map(|f| f.join("; "))
                    .unwrap_or_else(|| "no source".to_string()),
            ),
        })
        .collect();

    (inputs, failed_sources)
}

fn failed_platforms(inputs: &[PlatformInput]) -> Vec<String> {
    inputs
        .iter()
        .filter_map(|input| match &input.outcome {
            SourceOutcome::Failed(reason) => {
                warn!("{} data unavailable: {}", input.platform.label(), reason);
                Some(input.platform.label().to_string())
            }
            SourceOutcome::Loaded(_) => None,
        })
        .collect()
}

/// One stored row's batches counted together.
struct ScanEvent {
    row_key: String,
    date: Option<DateTime<Utc>>,
    mentions: u32,
    queries: u32,
}

fn record_event(events: &mut Vec<ScanEvent>, batch: &ScanBatch) {
    match events.iter_mut().find(|e| e.row_key == batch.row_key) {
        Some(event) => {
            event.mentions += batch.mentions();
            event.queries += batch.queries();
            event.date = match (event.date, batch.created_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        None => events.push(ScanEvent {
            row_key: batch.row_key.clone(),
            date: batch.created_at,
            mentions: batch.mentions(),
            queries: batch.queries(),
        }),
    }
}

/// Groups every batch by normalized company name. Batches split from one
/// stored row form a single scan in the history and the scan count.
pub fn aggregate_websites(inputs: &[PlatformInput]) -> Vec<WebsiteAggregate> {
    let mut sites: Vec<WebsiteAggregate> = Vec::new();
    let mut events: Vec<Vec<ScanEvent>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for input in inputs {
        for batch in input.batches().iter().filter(|b| b.platform == input.platform) {
            let key = company_key(&batch.company_name);
            let slot = *index.entry(key.clone()).or_insert_with(|| {
                sites.push(WebsiteAggregate {
                    slug: company_slug(&key),
                    key,
                    name: batch.company_name.trim().to_string(),
                    website: None,
                    category: None,
                    platforms: Vec::new(),
                    total_mentions: 0,
                    total_queries: 0,
                    current_score: 0,
                    score_history: Vec::new(),
                    score_change: 0,
                    last_scan: None,
                    scan_count: 0,
                    scans: Vec::new(),
                });
                events.push(Vec::new());
                sites.len() - 1
            });

            let site = &mut sites[slot];
            if site.website.is_none() {
                site.website = batch.website.clone();
            }
            if site.category.is_none() {
                site.category = batch.category.clone();
            }
            if !site.platforms.contains(&batch.platform) {
                site.platforms.push(batch.platform);
            }
            site.total_mentions += batch.mentions();
            site.total_queries += batch.queries();
            site.scans.push(batch.clone());
            record_event(&mut events[slot], batch);
        }
    }

    for (site, site_events) in sites.iter_mut().zip(events) {
        site.platforms.sort();
        site.score_history = site_events
            .iter()
            .map(|e| ScorePoint {
                date: e.date,
                score: percent(e.mentions, e.queries),
            })
            .collect();
        site.score_history.sort_by(|a, b| a.date.cmp(&b.date));
        site.current_score = percent(site.total_mentions, site.total_queries);
        site.score_change = match site.score_history.as_slice() {
            [.., prev, last] => last.score as i64 - prev.score as i64,
            _ => 0,
        };
        site.scans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        site.last_scan = site.scans.first().and_then(|s| s.created_at);
        site.scan_count = site_events.len();
    }

    sites.sort_by(|a, b| b.last_scan.cmp(&a.last_scan).then_with(|| a.key.cmp(&b.key)));
    sites
}

pub fn filter_websites(mut websites: Vec<WebsiteAggregate>, filter: WebsiteFilter) -> Vec<WebsiteAggregate> {
    match filter {
        WebsiteFilter::All => {}
        WebsiteFilter::Best => websites.sort_by(|a, b| b.current_score.cmp(&a.current_score)),
        WebsiteFilter::Recent => websites.sort_by(|a, b| b.last_scan.cmp(&a.last_scan)),
    }
    websites
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub fn overview_stats(websites: &[WebsiteAggregate], now: DateTime<Utc>) -> DashboardStats {
    if websites.is_empty() {
        return DashboardStats::default();
    }
    let count = websites.len();
    let since = month_start(now);
    let score_sum: u32 = websites.iter().map(|w| w.current_score).sum();
    let change_sum: i64 = websites.iter().map(|w| w.score_change).sum();

    let mut best: Option<&WebsiteAggregate> = None;
    for site in websites {
        if best.map(|b| site.current_score > b.current_score).unwrap_or(true) {
            best = Some(site);
        }
    }

    DashboardStats {
        total_sites: count,
        avg_score: percent(score_sum, 100 * count as u32),
        total_scans: websites.iter().map(|w| w.scan_count).sum(),
        best_performer: best.map(|b| b.name.clone()),
        best_score: best.map(|b| b.current_score).unwrap_or(0),
        scans_this_month: websites
            .iter()
            .flat_map(|w| &w.score_history)
            .filter(|p| p.date.map(|d| d >= since).unwrap_or(false))
            .count(),
        score_change: round_half_up(change_sum as f64 / count as f64),
    }
}

pub fn build_overview(inputs: &[PlatformInput], filter: WebsiteFilter, now: DateTime<Utc>) -> DashboardOverview {
    let websites = aggregate_websites(inputs);
    let stats = overview_stats(&websites, now);
    DashboardOverview {
        stats,
        websites: filter_websites(websites, filter),
        failed_sources: failed_platforms(inputs),
    }
}

/// Newest batch of one platform for a company; earliest listed wins ties.
fn latest_batch<'a>(
    inputs: &'a [PlatformInput],
    platform: Platform,
    key: &str,
    origin: Option<ScanOrigin>,
) -> Option<&'a ScanBatch> {
    let mut latest: Option<&ScanBatch> = None;
    let candidates = inputs
        .iter()
        .filter(|i| i.platform == platform)
        .flat_map(|i| i.batches())
        .filter(|b| b.platform == platform && company_key(&b.company_name) == key)
        .filter(|b| origin.map(|o| b.origin == o).unwrap_or(true));
    for batch in candidates {
        if latest.map(|l| batch.created_at > l.created_at).unwrap_or(true) {
            latest = Some(batch);
        }
    }
    latest
}

fn cell_from(record: Option<&ScanRecord>, origin: ScanOrigin) -> PromptCell {
    match record {
        Some(r) => PromptCell {
            scanned: true,
            found: r.found,
            mention_count: r.mention_count,
            snippet: r.snippet.clone(),
            competitors: r.competitors.clone(),
            sources: r.sources.clone(),
            from_extension: origin == ScanOrigin::Extension,
        },
        None => PromptCell::default(),
    }
}

fn found_count(batch: Option<&ScanBatch>) -> u32 {
    batch.map(ScanBatch::mentions).unwrap_or(0)
}

fn google_summary(batch: Option<&ScanBatch>) -> PlatformSummary {
    match batch {
        Some(b) => {
            let found = b.mentions();
            let total = b.records.len().max(b.prompts.len()) as u32;
            PlatformSummary {
                found,
                total,
                pct: percent(found, total),
                last_scan: b.created_at,
            }
        }
        None => PlatformSummary::default(),
    }
}

/// Visibility per API scan (ChatGPT + Perplexity share the integration id).
fn visibility_trend(
    inputs: &[PlatformInput],
    key: &str,
    period: Period,
    now: DateTime<Utc>,
) -> Vec<TrendPoint> {
    let since = now - Duration::days(period.days());
    let mut scans: Vec<(String, Option<DateTime<Utc>>, Option<&ScanBatch>, Option<&ScanBatch>)> = Vec::new();

    for platform in [Platform::Chatgpt, Platform::Perplexity] {
        let batches = inputs
            .iter()
            .filter(|i| i.platform == platform)
            .flat_map(|i| i.batches())
            .filter(|b| b.origin == ScanOrigin::Api && b.platform == platform)
            .filter(|b| company_key(&b.company_name) == key)
            .filter(|b| b.created_at.map(|d| d >= since).unwrap_or(false));
        for batch in batches {
            let slot = match scans.iter().position(|(id, ..)| *id == batch.id) {
                Some(slot) => slot,
                None => {
                    scans.push((batch.id.clone(), batch.created_at, None, None));
                    scans.len() - 1
                }
            };
            match platform {
                Platform::Chatgpt => scans[slot].2 = Some(batch),
                _ => scans[slot].3 = Some(batch),
            }
        }
    }

    scans.sort_by(|a, b| a.1.cmp(&b.1));
    scans
        .into_iter()
        .map(|(_, date, chatgpt, perplexity)| {
            let len_of = |b: Option<&ScanBatch>| b.map(|b| b.records.len()).unwrap_or(0);
            let found_at = |b: Option<&ScanBatch>, i: usize| {
                b.and_then(|b| b.records.get(i)).map(|r| r.found).unwrap_or(false)
            };
            let prompts = len_of(chatgpt).max(len_of(perplexity));
            let union = (0..prompts)
                .filter(|i| found_at(chatgpt, *i) || found_at(perplexity, *i))
                .count() as u32;
            TrendPoint {
                date,
                chatgpt: percent(found_count(chatgpt), len_of(chatgpt) as u32),
                perplexity: percent(found_count(perplexity), len_of(perplexity) as u32),
                total: percent(union, prompts as u32),
            }
        })
        .collect()
}

/// Full cross-platform view of one company.
pub fn company_detail(
    inputs: &[PlatformInput],
    key: &str,
    period: Period,
    now: DateTime<Utc>,
) -> Option<CompanyDetail> {
    let wanted = company_key(key);
    let website = aggregate_websites(inputs)
        .into_iter()
        .find(|w| w.key == wanted || w.slug == wanted)?;
    let key = website.key.clone();

    let extension = latest_batch(inputs, Platform::Chatgpt, &key, Some(ScanOrigin::Extension));
    let api_chatgpt = latest_batch(inputs, Platform::Chatgpt, &key, Some(ScanOrigin::Api));
    let chatgpt = extension.or(api_chatgpt);
    let perplexity = latest_batch(inputs, Platform::Perplexity, &key, None);
    let google_mode = latest_batch(inputs, Platform::GoogleAiMode, &key, None);
    let google_overview = latest_batch(inputs, Platform::GoogleAiOverview, &key, None);

    // Tracked prompts come from the newest API integration scan.
    let integration = match (api_chatgpt, perplexity) {
        (Some(c), Some(p)) if p.created_at > c.created_at => Some(p),
        (Some(c), _) => Some(c),
        (None, p) => p,
    };
    let tracked: &[String] = integration.map(|b| b.prompts.as_slice()).unwrap_or(&[]);

    let platform_batches = [
        (Platform::Chatgpt, chatgpt),
        (Platform::Perplexity, perplexity),
        (Platform::GoogleAiMode, google_mode),
        (Platform::GoogleAiOverview, google_overview),
    ];
    let prompt_count = platform_batches
        .iter()
        .map(|(_, b)| b.map(|b| b.records.len()).unwrap_or(0))
        .chain(std::iter::once(tracked.len()))
        .max()
        .unwrap_or(0);

    // Competitors Perplexity named, looked for again in extension answers.
    let mut known_competitors: Vec<&str> = Vec::new();
    for record in perplexity.map(|b| b.records.as_slice()).unwrap_or(&[]) {
        for name in &record.competitors {
            if !known_competitors.contains(&name.as_str()) {
                known_competitors.push(name);
            }
        }
    }

    let mut prompts = Vec::with_capacity(prompt_count);
    for i in 0..prompt_count {
        let text = tracked.get(i).cloned().unwrap_or_else(|| {
            platform_batches
                .iter()
                .find_map(|(_, b)| b.and_then(|b| b.records.get(i)).map(|r| r.prompt.clone()))
                .unwrap_or_else(|| format!("Prompt {}", i + 1))
        });
        let mut detail = PromptDetail {
            id: i + 1,
            text,
            chatgpt: PromptCell::default(),
            perplexity: PromptCell::default(),
            google_ai_mode: PromptCell::default(),
            google_ai_overview: PromptCell::default(),
        };
        for (platform, batch) in platform_batches {
            if let Some(batch) = batch {
                *detail.cell_mut(platform) = cell_from(batch.records.get(i), batch.origin);
            }
        }
        if detail.chatgpt.from_extension {
            let text_lower = detail.chatgpt.snippet.as_deref().unwrap_or_default().to_lowercase();
            for name in &known_competitors {
                if text_lower.contains(&name.to_lowercase())
                    && !detail.chatgpt.competitors.iter().any(|c| c == name)
                {
                    detail.chatgpt.competitors.push(name.to_string());
                }
            }
        }
        prompts.push(detail);
    }

    let chatgpt_total = chatgpt.map(|b| b.queries()).unwrap_or(0);
    let perplexity_total = perplexity.map(|b| b.queries()).unwrap_or(0);
    let chatgpt_found = found_count(chatgpt);
    let perplexity_found = found_count(perplexity);
    let google_ai_mode_found = found_count(google_mode);
    let google_ai_overview_found = found_count(google_overview);
    let found = prompts.iter().filter(|p| p.found_anywhere()).count() as u32;
    let total_prompts = prompts.len() as u32;

    let visibility = Visibility {
        chatgpt: percent(chatgpt_found, chatgpt_total),
        perplexity: percent(perplexity_found, perplexity_total),
        total: percent(found, total_prompts),
        found,
        total_prompts,
        chatgpt_found,
        perplexity_found,
        chatgpt_total,
        perplexity_total,
        google_ai_mode_found,
        google_ai_overview_found,
        platform_hits: chatgpt_found + perplexity_found + google_ai_mode_found + google_ai_overview_found,
    };

    let mention_counts: Vec<u32> = prompts
        .iter()
        .flat_map(|p| [p.chatgpt.mention_count, p.perplexity.mention_count])
        .filter(|m| *m > 0)
        .collect();
    let avg_mentions = (!mention_counts.is_empty()).then(|| {
        let mean = mention_counts.iter().sum::<u32>() as f64 / mention_counts.len() as f64;
        (mean * 10.0).round() / 10.0
    });

    let competitors = rank_competitors(&prompts);
    let threat = assess_threat(visibility.total, competitors.first(), prompts.len());

    Some(CompanyDetail {
        company: CompanyRef {
            name: website.name.clone(),
            website: website.website.clone(),
            category: website.category.clone(),
        },
        last_scan: website.last_scan,
        scan_id: integration.map(|b| b.id.clone()),
        visibility,
        avg_mentions,
        prompts,
        competitors,
        threat,
        google_ai_mode: google_summary(google_mode),
        google_ai_overview: google_summary(google_overview),
        has_extension_data: extension.is_some(),
        trend: visibility_trend(inputs, &key, period, now),
        period,
        website,
    })
}
