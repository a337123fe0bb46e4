//! Case-law search: result model, ranking, parsing and formatting.
//!
//! Search goes through the generation backend with web grounding, which
//! cannot be forced into a JSON response mode. Replies are therefore parsed
//! best-effort: a direct decode, then the largest bracketed substring, then
//! the whole reply as a single unstructured result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::generation::{GenerationBackend, GenerationRequest};
use crate::Result;

/// Text of a result block when nothing was found or the search failed.
pub const NO_PRECEDENTS_FOUND: &str = "Bu konuda emsal karar bulunamadı.";

/// Score decrement per position when the source gives no score.
const FALLBACK_SCORE_STEP: i64 = 8;

/// A single precedent returned by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub case_number: String,
    pub decision_number: String,
    pub date: String,
    pub chamber: String,
    pub summary: String,
    pub relevance_score: u8,
}

/// A result as the upstream describes it, before scoring.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSearchResult {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(alias = "esasNo", deserialize_with = "lenient_string")]
    pub case_number: Option<String>,
    #[serde(alias = "kararNo", deserialize_with = "lenient_string")]
    pub decision_number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub date: Option<String>,
    #[serde(alias = "daire", deserialize_with = "lenient_string")]
    pub chamber: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub summary: Option<String>,
    pub relevance_score: Option<Value>,
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

/// Explicit score from the upstream, if it is usable.
fn explicit_score(value: Option<&Value>) -> Option<u8> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !number.is_finite() {
        return None;
    }
    Some(number.round().clamp(0.0, 100.0) as u8)
}

/// Score assigned to the result at `index` when the source gives none.
pub fn fallback_score(index: usize) -> u8 {
    let index = i64::try_from(index).unwrap_or(i64::MAX);
    100i64
        .saturating_sub(index.saturating_mul(FALLBACK_SCORE_STEP))
        .max(0) as u8
}

/// Score every result and order by relevance, keeping discovery order on ties.
pub fn rank_results(raw: Vec<RawSearchResult>) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = raw
        .into_iter()
        .enumerate()
        .map(|(index, r)| SearchResult {
            relevance_score: explicit_score(r.relevance_score.as_ref())
                .unwrap_or_else(|| fallback_score(index)),
            id: r
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("result-{}", index + 1)),
            title: r.title.unwrap_or_default(),
            case_number: r.case_number.unwrap_or_default(),
            decision_number: r.decision_number.unwrap_or_default(),
            date: r.date.unwrap_or_default(),
            chamber: r.chamber.unwrap_or_default(),
            summary: r.summary.unwrap_or_default(),
        })
        .collect();

    // sort_by is stable
    results.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    results
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Widest `open..=close` span, if the text has one.
fn bracketed(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn values_to_raw(value: Value) -> Option<Vec<RawSearchResult>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => vec![Value::Object(map)],
        },
        _ => return None,
    };

    Some(
        items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RawSearchResult>(item).ok())
            .collect(),
    )
}

/// Parse a free-text model reply into raw search results.
pub fn parse_search_reply(reply: &str) -> Vec<RawSearchResult> {
    let text = strip_code_fence(reply);
    if text.is_empty() {
        return Vec::new();
    }

    if let Some(raw) = serde_json::from_str::<Value>(text).ok().and_then(values_to_raw) {
        return raw;
    }

    let array = bracketed(text, '[', ']');
    let object = bracketed(text, '{', '}');
    let mut candidates: Vec<&str> = array.into_iter().chain(object).collect();
    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));

    for candidate in candidates {
        if let Some(raw) = serde_json::from_str::<Value>(candidate).ok().and_then(values_to_raw) {
            return raw;
        }
    }

    vec![RawSearchResult {
        title: Some("Arama sonucu".to_string()),
        summary: Some(text.to_string()),
        ..RawSearchResult::default()
    }]
}

/// Render ranked results as the block appended to a chat stream.
pub fn format_results_block(query: &str, results: &[SearchResult]) -> String {
    let mut block = format!("\n\n**Emsal karar araması:** \"{}\"\n", query);

    if results.is_empty() {
        block.push('\n');
        block.push_str(NO_PRECEDENTS_FOUND);
        block.push('\n');
        return block;
    }

    for (rank, result) in results.iter().enumerate() {
        let _ = write!(block, "\n{}. **{}** (İlgi: {}/100)\n", rank + 1, result.title, result.relevance_score);

        let mut details = Vec::new();
        if !result.chamber.is_empty() {
            details.push(result.chamber.clone());
        }
        if !result.case_number.is_empty() {
            details.push(format!("E. {}", result.case_number));
        }
        if !result.decision_number.is_empty() {
            details.push(format!("K. {}", result.decision_number));
        }
        if !result.date.is_empty() {
            details.push(format!("T. {}", result.date));
        }
        if !details.is_empty() {
            let _ = writeln!(block, "   {}", details.join(" | "));
        }
        if !result.summary.is_empty() {
            let _ = writeln!(block, "   {}", result.summary);
        }
    }

    block
}

/// Anything that can look up precedents for a free-text query.
#[async_trait]
pub trait CaseLawSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

const SEARCH_INSTRUCTION: &str = "\
Sen Türk yargı kararları konusunda uzman bir araştırmacısın. \
Verilen sorgu için Yargıtay, Danıştay ve bölge adliye mahkemelerinin gerçek emsal kararlarını ara. \
Yanıtını yalnızca bir JSON dizisi olarak ver; her öğe şu alanları içersin: \
id, title, caseNumber, decisionNumber, date, chamber, summary, relevanceScore (0-100 arası tam sayı). \
Karar bulamazsan boş dizi [] döndür. Karar uydurma.";

/// Case-law search backed by a grounded generation call.
pub struct GroundedCaseLawSearch {
    backend: Arc<dyn GenerationBackend>,
}

impl GroundedCaseLawSearch {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    fn request(query: &str) -> GenerationRequest {
        GenerationRequest {
            grounded_search: true,
            temperature: Some(0.1),
            ..GenerationRequest::prompt(SEARCH_INSTRUCTION, format!("Sorgu: {}", query))
        }
    }
}

#[async_trait]
impl CaseLawSearch for GroundedCaseLawSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let reply = self.backend.generate(&Self::request(query)).await?;
        let raw = parse_search_reply(&reply.text);
        if raw.is_empty() {
            warn!("Case-law search returned no results for query: {}", query);
        }
        let results = rank_results(raw);
        info!("Case-law search found {} results", results.len());
        Ok(results)
    }
}
