//! Keyword lists for the rule-based intent policy.

use serde::{Deserialize, Serialize};

/// Configurable vocabulary the rule classifier matches against.
/// Matching is case-sensitive substring containment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Known professor names. Any match routes to a detail lookup.
    pub person_names: Vec<String>,
    /// Phrases that point back at the previous answer.
    pub follow_up_markers: Vec<String>,
    /// Research-domain vocabulary that triggers a fresh search.
    pub domain_keywords: Vec<String>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            person_names: to_strings(&["강건욱"]),
            follow_up_markers: to_strings(&[
                "그 중",
                "그중",
                "더 자세히",
                "자세히",
                "추가로",
                "그리고",
                "앞에서",
                "방금",
                "among those",
                "more detail",
                "additionally",
                " and ",
            ]),
            domain_keywords: to_strings(&[
                "연구",
                "암",
                "나노",
                "면역",
                "유전",
                "영상",
                "신경",
                "세포",
                "단백질",
                "약물",
                "바이오",
                "인공지능",
                "research",
                "cancer",
                "nano",
                "immun",
                "genom",
                "imaging",
                "neuro",
                "protein",
                "drug",
            ]),
        }
    }
}

impl RuleSet {
    /// Extend the person list with corpus names, skipping duplicates and blanks.
    pub fn with_person_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !name.trim().is_empty() && !self.person_names.contains(&name) {
                self.person_names.push(name);
            }
        }
        self
    }

    pub fn mentions_person(&self, query: &str) -> bool {
        contains_any(query, &self.person_names)
    }

    pub fn has_follow_up_marker(&self, query: &str) -> bool {
        contains_any(query, &self.follow_up_markers)
    }

    pub fn has_domain_keyword(&self, query: &str) -> bool {
        contains_any(query, &self.domain_keywords)
    }
}

fn contains_any(query: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|needle| !needle.is_empty() && query.contains(needle.as_str()))
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
