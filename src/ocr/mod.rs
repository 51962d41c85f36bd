//! Bib-number extraction from race photos.
//!
//! A vision-capable model reads text off the photo; this module turns those
//! raw detections into plausible bib numbers, optionally narrowed against the
//! event's start list. Providers live in [`provider`].

pub mod provider;

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::OcrConfig;
use provider::{create_provider, OcrProvider, TextLine};

/// Result of running bib extraction on one photo.
///
/// A provider failure is not fatal to ingestion, so it is folded into this
/// shape as an empty result with zero confidence rather than surfaced as an
/// error. The photo stays untagged and becomes an orphan candidate.
#[derive(Debug, Clone)]
pub struct BibExtraction {
    pub bib_numbers: Vec<String>,
    /// Highest confidence among the kept numbers, 0.0 when none were kept.
    pub confidence: f32,
    pub provider: String,
}

pub struct BibExtractor {
    provider: Box<dyn OcrProvider>,
}

impl BibExtractor {
    pub fn new(provider: Box<dyn OcrProvider>) -> Self {
        Self { provider }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(create_provider(config))
    }

    /// Extract bib numbers from the photo at `photo_path`.
    ///
    /// When a start list is available (`valid_bibs` non-empty) and at least
    /// one candidate appears on it, candidates not on the list are dropped.
    /// When nothing matches the list, all candidates are kept: a missing
    /// start-list entry is more often a registration-data gap than a
    /// misread, and a wrong keep is recoverable while a wrong drop is not.
    pub fn extract_bib_numbers(
        &self,
        photo_path: &Path,
        valid_bibs: Option<&HashSet<String>>,
    ) -> BibExtraction {
        let provider_name = self.provider.name().to_string();

        let lines = match self.provider.extract_text(photo_path) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(
                    photo = %photo_path.display(),
                    provider = %provider_name,
                    "OCR failed, leaving photo untagged: {e:#}"
                );
                return BibExtraction {
                    bib_numbers: Vec::new(),
                    confidence: 0.0,
                    provider: provider_name,
                };
            }
        };

        let candidates = candidate_bibs(&lines);

        let kept: Vec<(String, f32)> = match valid_bibs {
            Some(valid) if !valid.is_empty() => {
                let on_list: Vec<(String, f32)> = candidates
                    .iter()
                    .filter(|(number, _)| valid.contains(number))
                    .cloned()
                    .collect();
                if on_list.is_empty() {
                    candidates
                } else {
                    on_list
                }
            }
            _ => candidates,
        };

        let confidence = kept.iter().map(|(_, c)| *c).fold(0.0f32, f32::max);

        debug!(
            photo = %photo_path.display(),
            bibs = ?kept.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            confidence,
            "bib extraction complete"
        );

        BibExtraction {
            bib_numbers: kept.into_iter().map(|(number, _)| number).collect(),
            confidence,
            provider: provider_name,
        }
    }
}

/// Digit runs from the detected lines that look like bib numbers,
/// deduplicated in first-seen order, each paired with its line confidence.
fn candidate_bibs(lines: &[TextLine]) -> Vec<(String, f32)> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for line in lines {
        for token in line.text.split(|c: char| !c.is_ascii_digit()) {
            if !is_plausible_bib(token) {
                continue;
            }
            if seen.insert(token.to_string()) {
                candidates.push((token.to_string(), line.confidence));
            }
        }
    }
    candidates
}

/// A bib number is 1-5 digits, nonzero, and not a calendar year.
/// Four-digit values in 1900-2099 are almost always a date printed somewhere
/// in the frame (finish banner, timestamp overlay) rather than a bib.
fn is_plausible_bib(token: &str) -> bool {
    if token.is_empty() || token.len() > 5 {
        return false;
    }
    let value: u32 = match token.parse() {
        Ok(v) => v,
        Err(_) => return false,
    };
    if value == 0 {
        return false;
    }
    if token.len() == 4 && (1900..=2099).contains(&value) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct StubOcr {
        lines: Vec<TextLine>,
        fail: bool,
    }

    impl OcrProvider for StubOcr {
        fn extract_text(&self, _image_path: &Path) -> anyhow::Result<Vec<TextLine>> {
            if self.fail {
                return Err(anyhow!("connection refused"));
            }
            Ok(self.lines.clone())
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    fn line(text: &str, confidence: f32) -> TextLine {
        TextLine {
            text: text.to_string(),
            confidence,
        }
    }

    fn extractor(lines: Vec<TextLine>) -> BibExtractor {
        BibExtractor::new(Box::new(StubOcr { lines, fail: false }))
    }

    #[test]
    fn test_plausible_bib_rules() {
        assert!(is_plausible_bib("1"));
        assert!(is_plausible_bib("101"));
        assert!(is_plausible_bib("99999"));
        assert!(is_plausible_bib("1899"));
        assert!(is_plausible_bib("2100"));
        assert!(is_plausible_bib("12026")); // five digits, not a year

        assert!(!is_plausible_bib(""));
        assert!(!is_plausible_bib("0"));
        assert!(!is_plausible_bib("000"));
        assert!(!is_plausible_bib("123456"));
        assert!(!is_plausible_bib("2026"));
        assert!(!is_plausible_bib("1900"));
        assert!(!is_plausible_bib("2099"));
    }

    #[test]
    fn test_extracts_digit_runs_from_mixed_text() {
        let ex = extractor(vec![
            line("Runner 101 at km 5", 0.9),
            line("FINISH 2026-05-01", 0.8),
        ]);
        let result = ex.extract_bib_numbers(Path::new("/p.jpg"), None);
        // "101" survives, the calendar year does not
        assert!(result.bib_numbers.contains(&"101".to_string()));
        assert!(!result.bib_numbers.contains(&"2026".to_string()));
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_start_list_narrows_when_it_confirms() {
        let ex = extractor(vec![line("101", 0.9), line("555", 0.95)]);
        let valid: HashSet<String> = ["101".to_string()].into_iter().collect();

        let result = ex.extract_bib_numbers(Path::new("/p.jpg"), Some(&valid));
        assert_eq!(result.bib_numbers, vec!["101".to_string()]);
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_start_list_keeps_all_when_nothing_matches() {
        let ex = extractor(vec![line("101", 0.9), line("555", 0.95)]);
        let valid: HashSet<String> = ["777".to_string()].into_iter().collect();

        let result = ex.extract_bib_numbers(Path::new("/p.jpg"), Some(&valid));
        assert_eq!(result.bib_numbers.len(), 2);
    }

    #[test]
    fn test_empty_start_list_is_no_filter() {
        let ex = extractor(vec![line("101", 0.9)]);
        let valid = HashSet::new();
        let result = ex.extract_bib_numbers(Path::new("/p.jpg"), Some(&valid));
        assert_eq!(result.bib_numbers, vec!["101".to_string()]);
    }

    #[test]
    fn test_duplicate_numbers_kept_once() {
        let ex = extractor(vec![line("101", 0.7), line("bib 101", 0.9)]);
        let result = ex.extract_bib_numbers(Path::new("/p.jpg"), None);
        assert_eq!(result.bib_numbers, vec!["101".to_string()]);
        // First sighting's confidence is the one recorded
        assert!((result.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_provider_failure_yields_empty_result() {
        let ex = BibExtractor::new(Box::new(StubOcr { lines: vec![], fail: true }));
        let result = ex.extract_bib_numbers(Path::new("/p.jpg"), None);
        assert!(result.bib_numbers.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.provider, "stub");
    }
}
