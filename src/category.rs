// 🏷️ Category Extractor - ordered taxonomy rules for free-text labels
//
// Rules are tried in order and the first match wins; labels can satisfy
// more than one of the looser patterns, so order is part of the taxonomy.

use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// RESULT + POLICY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryMatch {
    Matched(String),
    NoMatch,
}

impl CategoryMatch {
    pub fn tag(&self) -> Option<&str> {
        match self {
            CategoryMatch::Matched(tag) => Some(tag),
            CategoryMatch::NoMatch => None,
        }
    }
}

/// What the caller does with a label that matched no rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Exclude the row and record a warning
    #[default]
    Warn,
    /// Abort the run: the taxonomy is required to be closed
    Fail,
}

/// Whether sub-categories of a family keep their suffix ("VMBO BB") or
/// collapse into the parent tag ("VMBO")
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SplitMode {
    #[default]
    Collapse,
    Split,
}

impl From<bool> for SplitMode {
    fn from(split: bool) -> Self {
        if split {
            SplitMode::Split
        } else {
            SplitMode::Collapse
        }
    }
}

// ============================================================================
// RULES
// ============================================================================

#[derive(Debug, Clone)]
pub enum Rule {
    /// Label equals one of the phrases exactly
    Exact { phrases: Vec<String>, tag: String },
    /// Leading code plus an upper-case control suffix; the suffix is kept in split mode
    CodeWithSuffix { pattern: Regex },
    /// Leading token followed by a lower-case qualifier
    TokenWithQualifier { pattern: Regex },
    /// Leading numeric code ("4.1 Openbaar basisonderwijs" → "4.1")
    LeadingCode { pattern: Regex },
}

impl Rule {
    pub fn exact(phrases: &[&str], tag: &str) -> Self {
        Rule::Exact {
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
            tag: tag.to_string(),
        }
    }

    fn apply(&self, label: &str, mode: SplitMode) -> Option<String> {
        match self {
            Rule::Exact { phrases, tag } => phrases.iter().any(|p| p == label).then(|| tag.clone()),
            Rule::CodeWithSuffix { pattern } => {
                let caps = pattern.captures(label)?;
                let code = caps.get(1)?.as_str();
                match (mode, caps.get(2)) {
                    (SplitMode::Split, Some(suffix)) => Some(format!("{} {}", code, suffix.as_str())),
                    _ => Some(code.to_string()),
                }
            }
            Rule::TokenWithQualifier { pattern } | Rule::LeadingCode { pattern } => {
                pattern.captures(label)?.get(1).map(|m| m.as_str().to_string())
            }
        }
    }
}

// ============================================================================
// TAXONOMY
// ============================================================================

#[derive(Debug, Clone)]
pub struct Taxonomy {
    rules: Vec<Rule>,
    mode: SplitMode,
    /// Tags the taxonomy always produces, used for zero-fill
    declared: Vec<String>,
}

pub const PRAKTIJK: &str = "PRAKTIJK";
pub const HAVO_VWO: &str = "HAVO/VWO";
pub const VMBO: &str = "VMBO";
pub const HAVO: &str = "HAVO";
pub const VWO: &str = "VWO";

impl Taxonomy {
    pub fn new(rules: Vec<Rule>, mode: SplitMode, declared: Vec<String>) -> Self {
        Taxonomy { rules, mode, declared }
    }

    /// Secondary-education types
    pub fn secondary_education(mode: SplitMode) -> Self {
        let rules = vec![
            Rule::exact(&["Praktijkonderwijs alle vj"], PRAKTIJK),
            Rule::exact(&["Brugjaar 1-2", "HAVO/VWO lj 3"], HAVO_VWO),
            Rule::CodeWithSuffix {
                pattern: Regex::new(r"^(\w{4}) ([A-Z]{2})").expect("static pattern"),
            },
            Rule::TokenWithQualifier {
                pattern: Regex::new(r"^(\w{3,4}) [a-z]{2}").expect("static pattern"),
            },
        ];
        let mut declared = vec![PRAKTIJK, HAVO_VWO, HAVO, VWO];
        if mode == SplitMode::Collapse {
            declared.push(VMBO);
        }
        Taxonomy::new(rules, mode, declared.into_iter().map(String::from).collect())
    }

    /// Municipal budget lines, tagged by their leading code
    pub fn budget_lines() -> Self {
        let rules = vec![Rule::LeadingCode {
            pattern: Regex::new(r"^(\d+\.\d+)\b").expect("static pattern"),
        }];
        Taxonomy::new(rules, SplitMode::Collapse, Vec::new())
    }

    pub fn declared_tags(&self) -> &[String] {
        &self.declared
    }

    /// First matching rule wins
    pub fn extract(&self, label: &str) -> CategoryMatch {
        let label = label.trim();
        self.rules
            .iter()
            .find_map(|rule| rule.apply(label, self.mode))
            .map(CategoryMatch::Matched)
            .unwrap_or(CategoryMatch::NoMatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(taxonomy: &Taxonomy, label: &str) -> Option<String> {
        taxonomy.extract(label).tag().map(String::from)
    }

    #[test]
    fn test_vmbo_collapse_and_split() {
        let collapse = Taxonomy::secondary_education(SplitMode::Collapse);
        let split = Taxonomy::secondary_education(SplitMode::Split);
        assert_eq!(tag(&collapse, "VMBO BB"), Some("VMBO".to_string()));
        assert_eq!(tag(&split, "VMBO BB"), Some("VMBO BB".to_string()));
        assert_eq!(tag(&split, "VMBO GL lj 3"), Some("VMBO GL".to_string()));
    }

    #[test]
    fn test_exact_phrases() {
        let t = Taxonomy::secondary_education(SplitMode::Collapse);
        assert_eq!(tag(&t, "Praktijkonderwijs alle vj"), Some(PRAKTIJK.to_string()));
        assert_eq!(tag(&t, "Brugjaar 1-2"), Some(HAVO_VWO.to_string()));
        assert_eq!(tag(&t, "HAVO/VWO lj 3"), Some(HAVO_VWO.to_string()));
    }

    #[test]
    fn test_exact_rule_wins_over_token_rule() {
        // both rules accept "HAVO lj 4"
        let t = Taxonomy::new(
            vec![
                Rule::exact(&["HAVO lj 4"], "SPECIAL"),
                Rule::TokenWithQualifier {
                    pattern: Regex::new(r"^(\w{3,4}) [a-z]{2}").unwrap(),
                },
            ],
            SplitMode::Collapse,
            vec![],
        );
        assert_eq!(tag(&t, "HAVO lj 4"), Some("SPECIAL".to_string()));
        assert_eq!(tag(&t, "HAVO lj 5"), Some("HAVO".to_string()));
    }

    #[test]
    fn test_token_with_qualifier() {
        let t = Taxonomy::secondary_education(SplitMode::Collapse);
        assert_eq!(tag(&t, "HAVO lj 4"), Some(HAVO.to_string()));
        assert_eq!(tag(&t, "VWO lj 6"), Some(VWO.to_string()));
        assert_eq!(tag(&t, "HAVO uitbesteed aan VAVO"), Some(HAVO.to_string()));
    }

    #[test]
    fn test_no_match() {
        let t = Taxonomy::secondary_education(SplitMode::Collapse);
        assert_eq!(t.extract("Internationaal"), CategoryMatch::NoMatch);
        assert_eq!(t.extract(""), CategoryMatch::NoMatch);
    }

    #[test]
    fn test_declared_tags_follow_mode() {
        let collapse = Taxonomy::secondary_education(SplitMode::Collapse);
        let split = Taxonomy::secondary_education(SplitMode::Split);
        assert!(collapse.declared_tags().iter().any(|t| t == VMBO));
        assert!(!split.declared_tags().iter().any(|t| t == VMBO));
    }

    #[test]
    fn test_budget_line_codes() {
        let t = Taxonomy::budget_lines();
        assert_eq!(tag(&t, "4.1 Openbaar basisonderwijs"), Some("4.1".to_string()));
        assert_eq!(tag(&t, "4.3 Onderwijsbeleid en leerlingzaken"), Some("4.3".to_string()));
        assert_eq!(t.extract("Totaal taakvelden"), CategoryMatch::NoMatch);
    }
}
