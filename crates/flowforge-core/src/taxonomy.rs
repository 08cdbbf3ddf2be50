//! Node kind taxonomy.
//!
//! The external engine identifies node kinds by namespaced strings such as
//! `n8n-nodes-base.httpRequest`. Everything kind-specific in this crate keys
//! off the two tables below; supporting a new kind means adding a row.

use serde::{Deserialize, Serialize};

/// Role of a node in the data flow, derived from its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Trigger,
    Processor,
    Sink,
}

/// Kind families that carry parameter rules (defaults and defects).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindFamily {
    HttpCall,
    Schedule,
    Code,
    Conditional,
    Respond,
}

/// Ordered, case-insensitive substring rules. First match wins.
const ROLE_TABLE: &[(&str, NodeRole)] = &[
    ("respondtowebhook", NodeRole::Sink),
    ("trigger", NodeRole::Trigger),
    ("webhook", NodeRole::Trigger),
    ("cron", NodeRole::Trigger),
    ("sink", NodeRole::Sink),
    ("respond", NodeRole::Sink),
    ("telegram", NodeRole::Sink),
    ("slack", NodeRole::Sink),
    ("email", NodeRole::Sink),
    ("gmail", NodeRole::Sink),
    ("discord", NodeRole::Sink),
    ("write", NodeRole::Sink),
];

/// Exact (lowercased) subtype aliases.
const FAMILY_TABLE: &[(&str, KindFamily)] = &[
    ("httprequest", KindFamily::HttpCall),
    ("http", KindFamily::HttpCall),
    ("scheduletrigger", KindFamily::Schedule),
    ("schedule", KindFamily::Schedule),
    ("cron", KindFamily::Schedule),
    ("interval", KindFamily::Schedule),
    ("function", KindFamily::Code),
    ("functionitem", KindFamily::Code),
    ("code", KindFamily::Code),
    ("if", KindFamily::Conditional),
    ("respondtowebhook", KindFamily::Respond),
    ("respond", KindFamily::Respond),
];

pub fn classify(kind: &str) -> NodeRole {
    let lowered = kind.to_ascii_lowercase();
    ROLE_TABLE
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, role)| *role)
        .unwrap_or(NodeRole::Processor)
}

/// Segment after the last `.` (the whole kind when there is none).
pub fn subtype(kind: &str) -> &str {
    kind.rsplit('.').next().unwrap_or(kind)
}

pub fn family(kind: &str) -> Option<KindFamily> {
    let sub = subtype(kind).to_ascii_lowercase();
    FAMILY_TABLE
        .iter()
        .find(|(alias, _)| *alias == sub)
        .map(|(_, family)| *family)
}

/// Parameter that holds the code body for a code-family kind.
pub fn code_field(kind: &str) -> &'static str {
    if subtype(kind).eq_ignore_ascii_case("code") {
        "jsCode"
    } else {
        "functionCode"
    }
}
