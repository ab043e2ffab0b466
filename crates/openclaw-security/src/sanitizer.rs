//! 隐私脱敏
//!
//! 任务描述在离开发起 Agent 之前先经过这里，按顺序替换敏感信息。
//! 规则顺序有意义: SSN、信用卡、IP 这类精确格式必须先于泛化的电话号码规则。

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    Ssn,
    CreditCard,
    IpAddress,
    Email,
    ApiKey,
    Secret,
    PhoneInternational,
    Phone,
    Address,
    PersonalReference,
}

impl PiiCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiCategory::Ssn => "ssn",
            PiiCategory::CreditCard => "credit_card",
            PiiCategory::IpAddress => "ip_address",
            PiiCategory::Email => "email",
            PiiCategory::ApiKey => "api_key",
            PiiCategory::Secret => "secret",
            PiiCategory::PhoneInternational => "phone_international",
            PiiCategory::Phone => "phone",
            PiiCategory::Address => "address",
            PiiCategory::PersonalReference => "personal_reference",
        }
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Rule {
    category: PiiCategory,
    pattern: Regex,
    replacement: &'static str,
}

impl Rule {
    fn new(category: PiiCategory, pattern: &str, replacement: &'static str) -> Self {
        Self {
            category,
            pattern: Regex::new(pattern).unwrap(),
            replacement,
        }
    }
}

// 替换标签只含大写字母、下划线和方括号，不会再次命中任何规则
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(PiiCategory::Ssn, r"\b\d{3}-\d{2}-\d{4}\b", "[SSN_REDACTED]"),
        Rule::new(
            PiiCategory::CreditCard,
            r"\b(?:\d{4}[- ]?){3}\d{4}\b",
            "[CARD_REDACTED]",
        ),
        Rule::new(
            PiiCategory::IpAddress,
            r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
            "[IP_REDACTED]",
        ),
        Rule::new(
            PiiCategory::Email,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            "[EMAIL_REDACTED]",
        ),
        Rule::new(
            PiiCategory::ApiKey,
            r"\b(?:sk|pk|rk)-[A-Za-z0-9_-]{16,}|\bghp_[A-Za-z0-9]{20,}|\bAKIA[0-9A-Z]{16}\b",
            "[API_KEY_REDACTED]",
        ),
        Rule::new(
            PiiCategory::Secret,
            r#"(?i)\b(api[_-]?key|secret|token|password|passwd)(\s*[:=]\s*)[^\s"',;\[][^\s"',;]*"#,
            "${1}${2}[SECRET_REDACTED]",
        ),
        Rule::new(
            PiiCategory::PhoneInternational,
            r"\+\d{1,3}[\s.-]?\(?\d{1,4}\)?(?:[\s.-]?\d{2,4}){2,4}\b",
            "[PHONE_REDACTED]",
        ),
        Rule::new(
            PiiCategory::Phone,
            r"(?:\(\d{3}\)\s?|\b\d{3}[\s.-]?)\d{3}[\s.-]?\d{4}\b",
            "[PHONE_REDACTED]",
        ),
        Rule::new(
            PiiCategory::Address,
            r"\b\d{1,5}\s+(?:[A-Z][a-z]+\s+){1,3}(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Way|Place|Pl)\b\.?",
            "[ADDRESS_REDACTED]",
        ),
        Rule::new(
            PiiCategory::PersonalReference,
            r"(?i:\bmy\s+(?:wife|husband|partner|son|daughter|mother|mom|father|dad|brother|sister|friend|girlfriend|boyfriend|boss))(?:\s+[A-Z][a-z]+)?",
            "[PERSONAL_REFERENCE]",
        ),
    ]
});

/// 脱敏结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sanitized {
    pub text: String,
    pub counts: BTreeMap<PiiCategory, usize>,
}

impl Sanitized {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_clean(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn count(&self, category: PiiCategory) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }
}

/// 按规则顺序脱敏，不会失败
pub fn sanitize(text: &str) -> Sanitized {
    let mut current = text.to_string();
    let mut counts = BTreeMap::new();

    for rule in RULES.iter() {
        let hits = rule.pattern.find_iter(&current).count();
        if hits == 0 {
            continue;
        }
        current = rule
            .pattern
            .replace_all(&current, rule.replacement)
            .into_owned();
        *counts.entry(rule.category).or_insert(0) += hits;
    }

    if !counts.is_empty() {
        debug!(?counts, "敏感信息已脱敏");
    }

    Sanitized {
        text: current,
        counts,
    }
}
