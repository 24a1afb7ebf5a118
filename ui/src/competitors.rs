use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::aggregate::percent;
use crate::models::{
    CompetitorAggregate, CompetitorAppearance, Platform, PromptDetail, ThreatAssessment,
    ThreatLevel,
};

const MAX_COMPETITORS: usize = 20;
const MIN_NAME_LEN: usize = 2;
const MAX_NAME_LEN: usize = 80;

// "1. Name - ...", "• Name – ...", emoji bullets
static LISTED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[•📌🔹🔸▸►●✅✔️🌟🚀\d]+[.)]*\s*)([\p{L}\p{N}][\p{L}\p{N}\s&®™.'|,()]+?)\s*[–—\-]\s")
        .expect("listed-name pattern is valid")
});
static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[.*?\]\(.*?\)").expect("markdown-link pattern is valid"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static TRAILING_RATING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\d+\.\d+$").expect("rating pattern is valid"));
static RATING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+").expect("rating pattern is valid"));
static GLUED_RATING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+\.\d+[a-z]").expect("glued-rating pattern is valid"));
static ADVICE_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(tip|stap|optie|actie|check|let op|kortom|samenvatting|wil je|vraag|bekijk|bepaal|kijk|vergelijk|overweeg|zoek|lees|denk|kies|plan|budget|prijs|kosten|belangrijk|extra|meer|waarom|hoe |wat |welke|moderne|professionele|create|find|look|choose|compare|view|read|think)",
    )
    .expect("advice pattern is valid")
});
static SECTION_HEADERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(creatieve|brede|full.service|lokale|kleinere|betaalbare|waar deze|gebruik|gratis|premium|populaire|aanbevolen|top\s)",
    )
    .expect("header pattern is valid")
});

/// Trims a competitor name; rejects blanks and implausible lengths.
pub fn clean_competitor_name(name: &str) -> Option<String> {
    let cleaned = name.trim();
    let len = cleaned.chars().count();
    (MIN_NAME_LEN..=MAX_NAME_LEN)
        .contains(&len)
        .then(|| cleaned.to_string())
}

pub fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}

fn looks_like_business(name: &str, own_lower: &str) -> bool {
    let lower = name.to_lowercase();
    let len = name.chars().count();
    (MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len)
        && (own_lower.is_empty() || (lower != own_lower && !lower.contains(own_lower)))
        && !ADVICE_WORDS.is_match(name)
        && !GLUED_RATING.is_match(name)
        && RATING.find_iter(name).count() < 2
        && !SECTION_HEADERS.is_match(name)
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Pulls business names out of list-style AI answers ("1. Name - blurb").
pub fn extract_names_from_response(text: &str, own_company: &str) -> Vec<String> {
    let own_lower = own_company.trim().to_lowercase();
    let mut names = Vec::new();

    for line in text.lines() {
        let Some(caps) = LISTED_NAME.captures(line.trim()) else {
            continue;
        };
        let raw = caps[1].trim().replace("**", "");
        let unlinked = MARKDOWN_LINK.replace_all(&raw, "");
        let collapsed = WHITESPACE.replace_all(unlinked.trim(), " ");
        let name = TRAILING_RATING.replace(collapsed.trim(), "").trim().to_string();

        if looks_like_business(&name, &own_lower) {
            names.push(name);
        }
    }

    let mut unique = Vec::new();
    for name in names {
        if name.contains(',') {
            for part in name.split(',').filter_map(clean_competitor_name) {
                push_unique(&mut unique, part);
            }
        } else {
            push_unique(&mut unique, name);
        }
    }
    unique
}

struct Tally {
    name: String,
    mentions: u32,
    appearances: Vec<CompetitorAppearance>,
}

/// Ranks competitors by the number of distinct prompts they appear in.
///
/// Ties fall back to raw mention count, then to first-encountered order, so the
/// same input always produces the same #1.
pub fn rank_competitors(prompts: &[PromptDetail]) -> Vec<CompetitorAggregate> {
    let mut tallies: Vec<Tally> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for detail in prompts {
        for platform in Platform::ALL {
            for raw in &detail.cell(platform).competitors {
                let Some(name) = clean_competitor_name(raw) else {
                    continue;
                };
                let slot = *index.entry(name.clone()).or_insert_with(|| {
                    tallies.push(Tally {
                        name,
                        mentions: 0,
                        appearances: Vec::new(),
                    });
                    tallies.len() - 1
                });
                let tally = &mut tallies[slot];
                tally.mentions += 1;
                match tally.appearances.last_mut() {
                    Some(last) if last.prompt_id == detail.id => {
                        if !last.platforms.contains(&platform) {
                            last.platforms.push(platform);
                        }
                    }
                    _ => tally.appearances.push(CompetitorAppearance {
                        prompt_id: detail.id,
                        prompt: detail.text.clone(),
                        platforms: vec![platform],
                    }),
                }
            }
        }
    }

    tallies.sort_by(|a, b| {
        b.appearances
            .len()
            .cmp(&a.appearances.len())
            .then(b.mentions.cmp(&a.mentions))
    });
    tallies.truncate(MAX_COMPETITORS);

    tallies
        .into_iter()
        .enumerate()
        .map(|(i, tally)| {
            let platforms = Platform::ALL
                .into_iter()
                .filter(|p| tally.appearances.iter().any(|a| a.platforms.contains(p)))
                .collect();
            CompetitorAggregate {
                rank: i + 1,
                name: tally.name,
                mentions: tally.mentions,
                appearances: tally.appearances,
                platforms,
                top_threat: i == 0,
            }
        })
        .collect()
}

/// Compares the company's own visibility against the #1 competitor.
pub fn assess_threat(
    your_pct: u32,
    top: Option<&CompetitorAggregate>,
    total_prompts: usize,
) -> ThreatAssessment {
    let top_pct = top
        .map(|c| percent(c.appearance_count() as u32, total_prompts.max(1) as u32).min(100))
        .unwrap_or(0);
    let delta = top_pct as i64 - your_pct as i64;
    let level = if delta > 20 {
        ThreatLevel::Critical
    } else if delta > 0 {
        ThreatLevel::High
    } else if your_pct < 30 {
        ThreatLevel::Medium
    } else {
        ThreatLevel::Low
    };

    ThreatAssessment {
        level,
        your_pct,
        top_competitor: top.map(|c| c.name.clone()),
        top_competitor_pct: top_pct,
        delta,
    }
}
