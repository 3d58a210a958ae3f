//! Core domain model and field normalization for cordex.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "cordex-core";

/// Parse a locale-formatted monetary amount. Strips thousands separators and
/// whitespace; empty or unparsable input resolves to `0.0`, never an error.
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return 0.0;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parse a `YYYY-MM-DD` calendar date. Any other shape, including empty
/// input, is treated as absent.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

/// Source keyword field: free text in most rows, a list in a few.
/// Normalized into an ordered string sequence before anything downstream
/// touches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordField {
    Text(String),
    List(Vec<String>),
}

impl Default for KeywordField {
    fn default() -> Self {
        KeywordField::Text(String::new())
    }
}

impl KeywordField {
    pub fn is_empty(&self) -> bool {
        match self {
            KeywordField::Text(text) => text.trim().is_empty(),
            KeywordField::List(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }

    /// Ordered sequence of raw keyword strings. Text values split on the
    /// delimiters the source actually uses: `,`, `;`, `|`, and newline.
    pub fn normalize(&self) -> Vec<String> {
        match self {
            KeywordField::Text(text) => text
                .split(|c| matches!(c, ',' | ';' | '|' | '\n'))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            KeywordField::List(items) => items
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// Catalog project. Bulk-created by the ingestion pipeline, read-only to
/// everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Project {
    pub id: String,
    pub acronym: String,
    pub title: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub total_cost: f64,
    pub eu_contribution: f64,
    pub programme: String,
    pub legal_basis: String,
    pub topics: String,
    pub objective: String,
    pub keywords: KeywordField,
    pub signature_date: Option<NaiveDate>,
}

/// One (project, organization) participation record, denormalized the way
/// the source dataset ships it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OrgLink {
    pub project_id: String,
    pub organisation_id: String,
    pub name: String,
    pub short_name: String,
    pub country: String,
    pub role: String,
    pub net_contribution: f64,
    pub organization_url: String,
    pub city: String,
}

impl OrgLink {
    /// Role comparison is case-insensitive by convention; the schema does
    /// not enforce a single coordinator per project.
    pub fn is_coordinator(&self) -> bool {
        self.role.trim().eq_ignore_ascii_case("coordinator")
    }
}

/// Project status derived purely from (start date, end date, today).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    NotStarted,
    Ongoing,
    Expired,
}

pub fn derive_status(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> DerivedStatus {
    match (start, end) {
        (Some(start), _) if today < start => DerivedStatus::NotStarted,
        (_, Some(end)) if today > end => DerivedStatus::Expired,
        _ => DerivedStatus::Ongoing,
    }
}

fn raw_field(raw: &HashMap<String, String>, key: &str) -> String {
    raw.get(key).map(|v| v.trim().to_string()).unwrap_or_default()
}

impl Project {
    /// The only place raw project records cross into the typed model.
    /// Column names follow the CORDIS bulk CSV headers.
    pub fn from_raw(raw: &HashMap<String, String>) -> Self {
        Self {
            id: raw_field(raw, "id"),
            acronym: raw_field(raw, "acronym"),
            title: raw_field(raw, "title"),
            status: raw_field(raw, "status"),
            start_date: parse_date(&raw_field(raw, "startDate")),
            end_date: parse_date(&raw_field(raw, "endDate")),
            total_cost: parse_amount(&raw_field(raw, "totalCost")),
            eu_contribution: parse_amount(&raw_field(raw, "ecMaxContribution")),
            programme: raw_field(raw, "frameworkProgramme"),
            legal_basis: raw_field(raw, "legalBasis"),
            topics: raw_field(raw, "topics"),
            objective: raw_field(raw, "objective"),
            keywords: KeywordField::Text(raw_field(raw, "keywords")),
            signature_date: parse_date(&raw_field(raw, "ecSignatureDate")),
        }
    }

    pub fn derived_status(&self, today: NaiveDate) -> DerivedStatus {
        derive_status(self.start_date, self.end_date, today)
    }
}

impl OrgLink {
    /// Raw organization records (one row per participation) into the typed
    /// model.
    pub fn from_raw(raw: &HashMap<String, String>) -> Self {
        Self {
            project_id: raw_field(raw, "projectID"),
            organisation_id: raw_field(raw, "organisationID"),
            name: raw_field(raw, "name"),
            short_name: raw_field(raw, "shortName"),
            country: raw_field(raw, "country"),
            role: raw_field(raw, "role"),
            net_contribution: parse_amount(&raw_field(raw, "netEcContribution")),
            organization_url: raw_field(raw, "organizationURL"),
            city: raw_field(raw, "city"),
        }
    }
}
