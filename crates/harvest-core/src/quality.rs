//! Advisory quality scoring of acquisition results.
//!
//! Reports never block persistence; an unacceptable report only yields a
//! warning event.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{AcquisitionResult, ItemKind};

/// Score in `[0, 100]` with the metrics and issues that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: u8,
    pub acceptable: bool,
    pub metrics: BTreeMap<String, f64>,
    pub issues: Vec<String>,
}

impl QualityReport {
    fn from_parts(
        raw_score: f64,
        min_score: u8,
        metrics: BTreeMap<String, f64>,
        issues: Vec<String>,
    ) -> Self {
        let score = raw_score.round().clamp(0.0, 100.0) as u8;
        Self {
            score,
            acceptable: score >= min_score,
            metrics,
            issues,
        }
    }

    /// Short human summary used in warning events.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            format!("quality score {}", self.score)
        } else {
            format!("quality score {} ({})", self.score, self.issues.join(", "))
        }
    }
}

/// Thresholds applied by the assessors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub min_score: u8,
    /// Average extracted characters per page below which a PDF needs OCR.
    pub min_chars_per_page: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_score: 60,
            min_chars_per_page: 200,
        }
    }
}

fn ratio(value: f64, target: f64) -> f64 {
    if target <= 0.0 {
        1.0
    } else {
        (value / target).clamp(0.0, 1.0)
    }
}

/// Scores social results on item count, average text length and empty items.
pub fn assess_social(result: &AcquisitionResult, thresholds: &QualityThresholds) -> QualityReport {
    let count = result.items.len();
    let mut metrics = BTreeMap::new();
    let mut issues = Vec::new();
    metrics.insert(String::from("item_count"), count as f64);

    if count == 0 {
        issues.push(String::from("no items collected"));
        return QualityReport::from_parts(0.0, thresholds.min_score, metrics, issues);
    }

    let total_chars: usize = result.items.iter().map(|item| item.text.chars().count()).sum();
    let empty = result
        .items
        .iter()
        .filter(|item| item.text.trim().is_empty())
        .count();
    let mean_length = total_chars as f64 / count as f64;
    let empty_ratio = empty as f64 / count as f64;
    metrics.insert(String::from("mean_text_length"), mean_length);
    metrics.insert(String::from("empty_ratio"), empty_ratio);

    if count < 5 {
        issues.push(String::from("few items"));
    }
    if mean_length < 20.0 {
        issues.push(String::from("short texts"));
    }
    if empty_ratio > 0.2 {
        issues.push(String::from("many empty items"));
    }

    let score = 40.0 * ratio(count as f64, 10.0)
        + 40.0 * ratio(mean_length, 80.0)
        + 20.0 * (1.0 - empty_ratio);
    QualityReport::from_parts(score, thresholds.min_score, metrics, issues)
}

/// Scores PDF results on text density; low density flags the document as needing OCR.
pub fn assess_pdf(result: &AcquisitionResult, thresholds: &QualityThresholds) -> QualityReport {
    let pages: Vec<_> = result
        .items
        .iter()
        .filter(|item| item.kind == ItemKind::Page)
        .collect();
    let page_count = pages.len();
    let mut metrics = BTreeMap::new();
    let mut issues = Vec::new();
    metrics.insert(String::from("page_count"), page_count as f64);

    if page_count == 0 {
        metrics.insert(String::from("needs_ocr"), 1.0);
        issues.push(String::from("no pages extracted"));
        return QualityReport::from_parts(0.0, thresholds.min_score, metrics, issues);
    }

    let total_chars: usize = pages
        .iter()
        .map(|page| page.text.chars().filter(|c| !c.is_whitespace()).count())
        .sum();
    let chars_per_page = total_chars as f64 / page_count as f64;
    let empty_pages = pages.iter().filter(|page| page.text.trim().is_empty()).count();
    let empty_ratio = empty_pages as f64 / page_count as f64;
    let needs_ocr = chars_per_page < thresholds.min_chars_per_page as f64;

    metrics.insert(String::from("chars_per_page"), chars_per_page);
    metrics.insert(String::from("empty_page_ratio"), empty_ratio);
    metrics.insert(String::from("needs_ocr"), if needs_ocr { 1.0 } else { 0.0 });
    if needs_ocr {
        issues.push(String::from("needs_ocr"));
    }

    let score = 80.0 * ratio(chars_per_page, thresholds.min_chars_per_page as f64)
        + 20.0 * (1.0 - empty_ratio);
    QualityReport::from_parts(score, thresholds.min_score, metrics, issues)
}

/// Scores transcripts on utterance, word and speaker counts plus mean confidence.
pub fn assess_transcript(
    result: &AcquisitionResult,
    expected_speakers: Option<u32>,
    thresholds: &QualityThresholds,
) -> QualityReport {
    let utterances: Vec<_> = result
        .items
        .iter()
        .filter(|item| item.kind == ItemKind::Utterance)
        .collect();
    let words: usize = utterances.iter().map(|item| item.word_count()).sum();
    let speakers: BTreeSet<&str> = utterances
        .iter()
        .filter_map(|item| item.author.as_deref())
        .collect();
    let confidences: Vec<f64> = utterances.iter().filter_map(|item| item.confidence).collect();
    let mean_confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    let mut metrics = BTreeMap::new();
    let mut issues = Vec::new();
    metrics.insert(String::from("utterance_count"), utterances.len() as f64);
    metrics.insert(String::from("word_count"), words as f64);
    metrics.insert(String::from("speaker_count"), speakers.len() as f64);
    if let Some(confidence) = mean_confidence {
        metrics.insert(String::from("mean_confidence"), confidence);
    }

    if utterances.is_empty() {
        issues.push(String::from("no utterances"));
        return QualityReport::from_parts(0.0, thresholds.min_score, metrics, issues);
    }
    if words < 100 {
        issues.push(String::from("short transcript"));
    }
    let expected = expected_speakers.unwrap_or(1).max(1) as usize;
    if speakers.len() < expected {
        issues.push(format!(
            "fewer speakers than expected ({} < {expected})",
            speakers.len()
        ));
    }
    if mean_confidence.is_some_and(|confidence| confidence < 0.7) {
        issues.push(String::from("low confidence"));
    }

    let score = 30.0 * ratio(utterances.len() as f64, 20.0)
        + 40.0 * ratio(words as f64, 500.0)
        + 15.0 * ratio(speakers.len() as f64, expected as f64)
        + 15.0 * mean_confidence.unwrap_or(0.8);
    QualityReport::from_parts(score, thresholds.min_score, metrics, issues)
}
