//! Search, enrichment, and aggregation layer over the catalog store.
//!
//! Everything here is read-only and stateless: the store capability and the
//! text analyzer are injected once at startup and shared across requests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{Months, NaiveDate, Utc};
use cordex_core::{DerivedStatus, OrgLink, Project};
use cordex_store::{
    CatalogStore, Page, ProjectQuery, ProjectSort, StoreError, TextQuery,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "cordex-catalog";

pub const DEFAULT_PER_PAGE: usize = 10;
pub const MAX_PER_PAGE: usize = 50;

/// How many projects the keyword aggregation scans before cutting off.
pub const KEYWORD_SCAN_CAP: usize = 1000;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("project {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Query builder
// ---------------------------------------------------------------------------

/// Flat map of optional filter parameters, exactly as they arrive from the
/// outside. Numeric ranges stay strings here so malformed values can be
/// ignored instead of failing the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub status: Option<String>,
    pub programme: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub min_contribution: Option<String>,
    pub max_contribution: Option<String>,
    pub min_total_cost: Option<String>,
    pub max_total_cost: Option<String>,
    pub countries: Option<String>,
    pub keywords: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

/// Executable predicate + paging window + the country post-filter set.
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub query: ProjectQuery,
    pub page: Page,
    pub countries: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Malformed range values are dropped, not surfaced. `parse_amount` is the
/// wrong tool here: its 0.0 fallback would turn garbage into a real bound.
fn parse_range_bound(value: &Option<String>) -> Option<f64> {
    non_empty(value)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_date_bound(value: &Option<String>) -> Option<NaiveDate> {
    non_empty(value).and_then(|s| cordex_core::parse_date(&s))
}

fn split_csv(value: &Option<String>) -> Vec<String> {
    non_empty(value)
        .map(|s| {
            s.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Translate user-supplied filters into the store's predicate structure.
/// With no filters at all the plan matches everything (open listing).
pub fn build_search_plan(params: &SearchParams) -> SearchPlan {
    let query = ProjectQuery {
        text: params.q.as_deref().and_then(TextQuery::new),
        status: non_empty(&params.status),
        programme: non_empty(&params.programme),
        start_date_from: parse_date_bound(&params.start_date),
        end_date_from: None,
        end_date_to: parse_date_bound(&params.end_date),
        min_contribution: parse_range_bound(&params.min_contribution),
        max_contribution: parse_range_bound(&params.max_contribution),
        min_total_cost: parse_range_bound(&params.min_total_cost),
        max_total_cost: parse_range_bound(&params.max_total_cost),
        keywords: split_csv(&params.keywords),
        has_end_date: false,
        sort: ProjectSort::Unsorted,
    };

    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);
    let page = Page::new(params.page.unwrap_or(1), per_page);

    SearchPlan {
        query,
        page,
        countries: split_csv(&params.countries),
    }
}

// ---------------------------------------------------------------------------
// Text analysis capability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Technology,
    Organization,
    Event,
    WorkOfArt,
}

impl EntityKind {
    pub fn is_salient(self) -> bool {
        matches!(
            self,
            EntityKind::Product | EntityKind::Technology | EntityKind::Organization
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub text: String,
    pub kind: EntityKind,
}

/// Optional text-analysis capability behind an interface. The heuristic
/// implementation is cheap pattern matching, not a linguistic pipeline; the
/// null implementation is always available and yields nothing.
pub trait TextAnalyzer: Send + Sync {
    fn is_available(&self) -> bool;
    fn entities(&self, text: &str) -> Vec<Entity>;
    fn noun_phrases(&self, text: &str) -> Vec<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnalyzer;

impl TextAnalyzer for NullAnalyzer {
    fn is_available(&self) -> bool {
        false
    }

    fn entities(&self, _text: &str) -> Vec<Entity> {
        Vec::new()
    }

    fn noun_phrases(&self, _text: &str) -> Vec<String> {
        Vec::new()
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "to", "in", "for", "and", "or", "with", "on", "by", "is",
    "are", "was", "were", "that", "this", "these", "those", "as", "at", "from", "be",
    "been", "will", "would", "can", "could", "we", "it", "its", "their", "our", "has",
    "have", "had", "not", "but", "which", "into", "through", "between", "such",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    fn is_title_case(token: &str) -> bool {
        let mut chars = token.chars();
        match chars.next() {
            Some(first) if first.is_uppercase() => chars.all(|c| c.is_lowercase()),
            _ => false,
        }
    }

    fn is_acronym(token: &str) -> bool {
        token.len() >= 3 && token.chars().all(|c| c.is_ascii_uppercase())
    }
}

impl TextAnalyzer for HeuristicAnalyzer {
    fn is_available(&self) -> bool {
        true
    }

    /// Runs of two or more TitleCase tokens read as named organizations;
    /// standalone acronyms read as technologies. Crude, but deterministic
    /// and good enough for enrichment.
    fn entities(&self, text: &str) -> Vec<Entity> {
        let tokens: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut entities = Vec::new();
        let mut run: Vec<&str> = Vec::new();
        for &token in tokens.iter().chain(std::iter::once(&"")) {
            if Self::is_title_case(token) {
                run.push(token);
                continue;
            }
            if run.len() >= 2 {
                entities.push(Entity {
                    text: run.join(" "),
                    kind: EntityKind::Organization,
                });
            }
            run.clear();
            if Self::is_acronym(token) {
                entities.push(Entity {
                    text: (*token).to_string(),
                    kind: EntityKind::Technology,
                });
            }
        }
        entities
    }

    /// Stopword-delimited chunking: contiguous content words between
    /// stopwords/punctuation form one candidate phrase.
    fn noun_phrases(&self, text: &str) -> Vec<String> {
        let mut phrases = Vec::new();
        let mut chunk: Vec<String> = Vec::new();
        let tokens = text
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .map(|t| t.trim_matches('-'))
            .filter(|t| !t.is_empty());

        for token in tokens.chain(std::iter::once("")) {
            let lowered = token.to_lowercase();
            if lowered.is_empty() || STOPWORDS.contains(&lowered.as_str()) {
                if chunk.len() >= 2 {
                    phrases.push(chunk.join(" "));
                }
                chunk.clear();
            } else {
                chunk.push(lowered);
            }
        }
        phrases
    }
}

// ---------------------------------------------------------------------------
// Keyword extractor
// ---------------------------------------------------------------------------

/// First slice of the objective fed to the analyzer; the rest adds little
/// and costs a lot on multi-page objectives.
const OBJECTIVE_ANALYSIS_CHARS: usize = 500;

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub struct KeywordExtractor {
    analyzer: Arc<dyn TextAnalyzer>,
}

impl KeywordExtractor {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Deduplicated lowercase keyword set for one project: the explicit
    /// keyword field, plus best-effort entities and noun phrases from the
    /// title and the start of the objective. The derived step degrades to
    /// nothing when the analyzer is unavailable; it never fails the call.
    pub fn extract(&self, project: &Project) -> Vec<String> {
        let mut keywords: BTreeSet<String> = BTreeSet::new();

        for raw in project.keywords.normalize() {
            let cleaned = raw.trim().to_lowercase();
            if cleaned.chars().count() > 2 {
                keywords.insert(cleaned);
            }
        }

        if self.analyzer.is_available() {
            let mut text = String::new();
            if !project.title.is_empty() {
                text.push_str(&project.title);
                text.push(' ');
            }
            text.push_str(truncate_chars(&project.objective, OBJECTIVE_ANALYSIS_CHARS));

            if !text.trim().is_empty() {
                for entity in self.analyzer.entities(&text) {
                    let cleaned = entity.text.trim().to_lowercase();
                    if cleaned.chars().count() > 2 {
                        keywords.insert(cleaned);
                    }
                }
                for phrase in self.analyzer.noun_phrases(&text) {
                    let words = phrase.split_whitespace().count();
                    let cleaned = phrase.trim().to_lowercase();
                    if (2..=4).contains(&words) && cleaned.chars().count() > 5 {
                        keywords.insert(cleaned);
                    }
                }
            }
        }

        keywords.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

/// Fixed domain vocabulary; matched as case-insensitive substrings, not
/// whole words.
pub const DOMAIN_KEYWORDS: &[&str] = &[
    "aims", "objective", "goal", "purpose", "mission", "vision", "develop", "create",
    "improve", "enhance", "support", "promote", "address", "focus", "target", "seek",
    "investigate", "explore", "implement", "establish", "facilitate", "deliver",
    "provide", "innovation", "research", "technology", "sustainability", "digital",
    "climate", "environment", "health", "security", "mobility", "energy",
    "agriculture", "education", "society", "economy", "impact", "benefit", "solution",
    "challenge", "opportunity", "transformation", "advancement", "breakthrough",
    "excellence",
];

pub const DEFAULT_SUMMARY_SENTENCES: usize = 3;

/// Sentence segmentation: cut after `.`, `!`, or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut prev_was_terminator = false;

    for (index, c) in text.char_indices() {
        if prev_was_terminator && c.is_whitespace() {
            let sentence = text[start..index].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = index;
        }
        prev_was_terminator = matches!(c, '.' | '!' | '?');
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn score_sentence(index: usize, sentence: &str, analyzer: &dyn TextAnalyzer) -> i32 {
    let lowered = sentence.to_lowercase();
    let mut score = 0i32;

    for keyword in DOMAIN_KEYWORDS {
        if lowered.contains(keyword) {
            score += 2;
        }
    }

    score += match index {
        0 => 5,
        1 => 3,
        _ => 0,
    };

    let words = sentence.split_whitespace().count();
    if (10..=30).contains(&words) {
        score += 1;
    }

    if analyzer
        .entities(sentence)
        .iter()
        .any(|e| e.kind.is_salient())
    {
        score += 2;
    }

    score
}

/// Bounded extract of an objective: the top-scoring sentences re-emitted in
/// document order. Absent when the input is empty or the text pipeline is
/// unavailable; never an error.
pub fn summarize(
    objective: &str,
    max_sentences: usize,
    analyzer: &dyn TextAnalyzer,
) -> Option<String> {
    if objective.trim().is_empty() || !analyzer.is_available() {
        return None;
    }

    let sentences = split_sentences(objective);
    if sentences.len() <= max_sentences {
        return Some(objective.to_string());
    }

    let mut ranked: Vec<(usize, i32)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| (i, score_sentence(i, s, analyzer)))
        .collect();
    // Stable sort: equal scores keep document order, so ties are
    // first-seen-wins.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut selected: Vec<usize> = ranked
        .into_iter()
        .take(max_sentences)
        .map(|(i, _)| i)
        .collect();
    selected.sort_unstable();

    Some(
        selected
            .into_iter()
            .map(|i| sentences[i])
            .collect::<Vec<_>>()
            .join(" "),
    )
}

// ---------------------------------------------------------------------------
// Relationship enricher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OrgSummary {
    #[serde(flatten)]
    pub link: OrgLink,
    /// Distinct projects this organization participates in.
    pub project_count: u64,
    /// Projects where this organization's role matches "coordinator".
    pub coordinator_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedProject {
    #[serde(flatten)]
    pub project: Project,
    /// Computed from the project's dates at enrichment time, independent of
    /// the raw source status string.
    pub derived_status: DerivedStatus,
    pub coordinator: Option<OrgSummary>,
    pub organizations: Vec<OrgSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl EnrichedProject {
    fn all_orgs(&self) -> impl Iterator<Item = &OrgSummary> {
        self.coordinator.iter().chain(self.organizations.iter())
    }

    /// Country post-filter: keep the project when any associated
    /// organization's country intersects the requested set.
    pub fn matches_countries(&self, countries: &[String]) -> bool {
        if countries.is_empty() {
            return true;
        }
        self.all_orgs()
            .any(|o| countries.iter().any(|c| o.link.country.eq_ignore_ascii_case(c)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub projects: Vec<EnrichedProject>,
    pub total: u64,
    pub page: usize,
    pub pages: u64,
    pub per_page: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: u64,
}

/// Read-side facade: owns the injected store and analyzer, exposes the
/// operations the API layer serves.
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    analyzer: Arc<dyn TextAnalyzer>,
    extractor: KeywordExtractor,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>, analyzer: Arc<dyn TextAnalyzer>) -> Self {
        let extractor = KeywordExtractor::new(analyzer.clone());
        Self {
            store,
            analyzer,
            extractor,
        }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Resolve one project's organizations: per-organization participation
    /// counts, with the first case-insensitive "coordinator" promoted out of
    /// the participant list. Extra coordinator records stay participants
    /// (first-match-wins on the ambiguous legacy data).
    pub async fn enrich(&self, project: Project) -> Result<EnrichedProject, CatalogError> {
        let links = self.store.links_for_project(&project.id).await?;

        let mut coordinator: Option<OrgSummary> = None;
        let mut organizations = Vec::with_capacity(links.len());
        for link in links {
            let counts = self.store.participation(&link.organisation_id).await?;
            let summary = OrgSummary {
                project_count: counts.projects,
                coordinator_count: counts.coordinated,
                link,
            };
            if coordinator.is_none() && summary.link.is_coordinator() {
                coordinator = Some(summary);
            } else {
                organizations.push(summary);
            }
        }

        let derived_status = project.derived_status(Utc::now().date_naive());
        Ok(EnrichedProject {
            project,
            derived_status,
            coordinator,
            organizations,
            summary: None,
        })
    }

    /// List/search operation. The reported total is counted before the
    /// country post-filter, so it may exceed the returned set; pagination is
    /// likewise applied pre-filter. Legacy-faithful, covered by tests.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchResults, CatalogError> {
        let plan = build_search_plan(params);
        let candidates = self.store.find_projects(&plan.query, plan.page).await?;
        let total = self.store.count_projects(&plan.query).await?;

        let mut projects = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let enriched = self.enrich(candidate).await?;
            if enriched.matches_countries(&plan.countries) {
                projects.push(enriched);
            }
        }

        Ok(SearchResults {
            projects,
            total,
            page: plan.page.number(),
            pages: plan.page.total_pages(total),
            per_page: plan.page.per_page(),
        })
    }

    /// Single-item fetch with coordinator + organizations + objective
    /// summary. Summary degradation is silent: the field is simply absent.
    pub async fn fetch(&self, id: &str) -> Result<EnrichedProject, CatalogError> {
        let project = self
            .store
            .project_by_id(id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        let mut enriched = self.enrich(project).await?;
        enriched.summary = summarize(
            &enriched.project.objective,
            DEFAULT_SUMMARY_SENTENCES,
            self.analyzer.as_ref(),
        );
        Ok(enriched)
    }

    /// Open listing, paginated, no enrichment.
    pub async fn list(&self, page: Page) -> Result<(Vec<Project>, u64), CatalogError> {
        let query = ProjectQuery::default();
        let projects = self.store.find_projects(&query, page).await?;
        let total = self.store.count_projects(&query).await?;
        Ok((projects, total))
    }

    /// Latest projects by start date, enriched.
    pub async fn recent(&self, limit: usize) -> Result<Vec<EnrichedProject>, CatalogError> {
        let query = ProjectQuery {
            sort: ProjectSort::StartDateDesc,
            ..Default::default()
        };
        self.enriched_listing(query, limit).await
    }

    /// Projects ending within the next two months, soonest first, enriched.
    pub async fn expiring_soon(
        &self,
        limit: usize,
    ) -> Result<Vec<EnrichedProject>, CatalogError> {
        let today = Utc::now().date_naive();
        let horizon = today
            .checked_add_months(Months::new(2))
            .unwrap_or(today);
        let query = ProjectQuery {
            end_date_from: Some(today),
            end_date_to: Some(horizon),
            sort: ProjectSort::EndDateAsc,
            ..Default::default()
        };
        self.enriched_listing(query, limit).await
    }

    /// Projects ordered by end date ascending (closest to expiry first),
    /// enriched. Projects without an end date are excluded.
    pub async fn closed(&self, limit: usize) -> Result<Vec<EnrichedProject>, CatalogError> {
        let query = ProjectQuery {
            has_end_date: true,
            sort: ProjectSort::EndDateAsc,
            ..Default::default()
        };
        self.enriched_listing(query, limit).await
    }

    async fn enriched_listing(
        &self,
        query: ProjectQuery,
        limit: usize,
    ) -> Result<Vec<EnrichedProject>, CatalogError> {
        let rows = self
            .store
            .find_projects(&query, Page::new(1, limit.max(1)))
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.enrich(row).await?);
        }
        Ok(out)
    }

    pub async fn project_keywords(&self, id: &str) -> Result<Vec<String>, CatalogError> {
        let project = self
            .store
            .project_by_id(id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        Ok(self.extractor.extract(&project))
    }

    /// Global top-N extracted keywords across (a bounded scan of) the
    /// catalog.
    pub async fn trending_keywords(
        &self,
        limit: usize,
    ) -> Result<Vec<KeywordCount>, CatalogError> {
        let projects = self.store.scan_projects().await?;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for project in projects.iter().take(KEYWORD_SCAN_CAP) {
            if project.keywords.is_empty() && project.objective.is_empty() {
                continue;
            }
            for keyword in self.extractor.extract(project) {
                *counts.entry(keyword).or_default() += 1;
            }
        }

        let mut ranked: Vec<KeywordCount> = counts
            .into_iter()
            .map(|(keyword, count)| KeywordCount { keyword, count })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.keyword.cmp(&b.keyword)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Keyword autocomplete: extracted keywords containing the query,
    /// sorted, bounded. Queries shorter than two characters yield nothing.
    pub async fn keyword_suggestions(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, CatalogError> {
        let needle = query.trim().to_lowercase();
        if needle.chars().count() < 2 {
            return Ok(Vec::new());
        }

        // The whole capped window is scanned before truncating: the result
        // is the alphabetically-first matches, independent of scan order.
        let projects = self.store.scan_projects().await?;
        let mut suggestions: BTreeSet<String> = BTreeSet::new();
        for project in projects.iter().take(KEYWORD_SCAN_CAP) {
            for keyword in self.extractor.extract(project) {
                if keyword.contains(&needle) {
                    suggestions.insert(keyword);
                }
            }
        }
        Ok(suggestions.into_iter().take(limit).collect())
    }

    pub fn analyzer_available(&self) -> bool {
        let available = self.analyzer.is_available();
        if !available {
            warn!("text analyzer unavailable; keyword derivation and summaries degrade");
        }
        available
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryProjects {
    pub country: String,
    pub project_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgrammeProjects {
    pub programme: String,
    pub project_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryContribution {
    pub country: String,
    pub total_eu_contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearProjects {
    pub year: String,
    pub project_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopOrganization {
    pub organization: String,
    pub project_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopProject {
    pub acronym: String,
    pub title: String,
    pub eu_contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSummary {
    pub total_projects: u64,
    pub status_counts: BTreeMap<String, u64>,
    pub total_contribution: f64,
    pub countries_involved: u64,
    pub organizations_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizationEntry {
    pub id: String,
    pub name: String,
    pub country: String,
    pub acronym: String,
}

/// Flat organization listing, deduplicated by identity in first-seen order,
/// bounded. Name and acronym come from the first record seen for each id.
pub fn organization_directory(links: &[OrgLink], limit: usize) -> Vec<OrganizationEntry> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for link in links {
        if link.organisation_id.is_empty() || !seen.insert(link.organisation_id.as_str()) {
            continue;
        }
        out.push(OrganizationEntry {
            id: link.organisation_id.clone(),
            name: link.name.clone(),
            country: link.country.clone(),
            acronym: link.short_name.clone(),
        });
        if out.len() >= limit {
            break;
        }
    }
    out
}

/// Distinct-project count per organization country, top `limit` descending.
/// Rows with a missing country are excluded.
pub fn projects_by_country(links: &[OrgLink], limit: usize) -> Vec<CountryProjects> {
    let mut per_country: HashMap<&str, HashSet<&str>> = HashMap::new();
    for link in links {
        if link.country.is_empty() || link.project_id.is_empty() {
            continue;
        }
        per_country
            .entry(link.country.as_str())
            .or_default()
            .insert(link.project_id.as_str());
    }

    let mut out: Vec<CountryProjects> = per_country
        .into_iter()
        .map(|(country, projects)| CountryProjects {
            country: country.to_string(),
            project_count: projects.len() as u64,
        })
        .collect();
    out.sort_by(|a, b| {
        b.project_count
            .cmp(&a.project_count)
            .then(a.country.cmp(&b.country))
    });
    out.truncate(limit);
    out
}

/// Project count per programme identifier, alphabetical.
pub fn projects_per_programme(projects: &[Project]) -> Vec<ProgrammeProjects> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for project in projects {
        if project.programme.is_empty() {
            continue;
        }
        *counts.entry(project.programme.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(programme, project_count)| ProgrammeProjects {
            programme: programme.to_string(),
            project_count,
        })
        .collect()
}

/// Sum of EU contribution per organization country, top `limit` descending.
/// The project behind each participation is resolved from a map built in the
/// same pass; a contribution that failed to parse was already normalized to
/// zero upstream.
pub fn eu_contribution_by_country(
    projects: &[Project],
    links: &[OrgLink],
    limit: usize,
) -> Vec<CountryContribution> {
    let contribution_by_project: HashMap<&str, f64> = projects
        .iter()
        .map(|p| (p.id.as_str(), p.eu_contribution))
        .collect();

    let mut per_country: HashMap<&str, f64> = HashMap::new();
    for link in links {
        if link.country.is_empty() {
            continue;
        }
        let Some(contribution) = contribution_by_project.get(link.project_id.as_str()) else {
            continue;
        };
        *per_country.entry(link.country.as_str()).or_default() += contribution;
    }

    let mut out: Vec<CountryContribution> = per_country
        .into_iter()
        .map(|(country, total_eu_contribution)| CountryContribution {
            country: country.to_string(),
            total_eu_contribution,
        })
        .collect();
    out.sort_by(|a, b| {
        b.total_eu_contribution
            .partial_cmp(&a.total_eu_contribution)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.country.cmp(&b.country))
    });
    out.truncate(limit);
    out
}

/// Project count per start year, ascending. The year is the first four
/// characters of the canonical ISO date; projects without a start date are
/// excluded.
pub fn projects_over_time(projects: &[Project]) -> Vec<YearProjects> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for project in projects {
        let Some(start) = project.start_date else {
            continue;
        };
        let iso = start.to_string();
        let year = iso.chars().take(4).collect::<String>();
        *counts.entry(year).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(year, project_count)| YearProjects {
            year,
            project_count,
        })
        .collect()
}

/// Participation count per organization identity, top `limit` descending.
/// Grouped by organisation id; the display name comes from the first record
/// seen for that id.
pub fn top_organizations(links: &[OrgLink], limit: usize) -> Vec<TopOrganization> {
    let mut counts: HashMap<&str, (String, u64)> = HashMap::new();
    for link in links {
        if link.organisation_id.is_empty() {
            continue;
        }
        let entry = counts
            .entry(link.organisation_id.as_str())
            .or_insert_with(|| (link.name.clone(), 0));
        entry.1 += 1;
    }

    let mut out: Vec<TopOrganization> = counts
        .into_values()
        .map(|(organization, project_count)| TopOrganization {
            organization,
            project_count,
        })
        .collect();
    out.sort_by(|a, b| {
        b.project_count
            .cmp(&a.project_count)
            .then(a.organization.cmp(&b.organization))
    });
    out.truncate(limit);
    out
}

/// Largest projects by EU contribution, descending, projected down to the
/// fields the dashboard shows.
pub fn top_projects_by_contribution(projects: &[Project], limit: usize) -> Vec<TopProject> {
    let mut out: Vec<TopProject> = projects
        .iter()
        .map(|p| TopProject {
            acronym: if p.acronym.is_empty() {
                "N/A".to_string()
            } else {
                p.acronym.clone()
            },
            title: if p.title.is_empty() {
                "N/A".to_string()
            } else {
                p.title.clone()
            },
            eu_contribution: p.eu_contribution,
        })
        .collect();
    out.sort_by(|a, b| {
        b.eu_contribution
            .partial_cmp(&a.eu_contribution)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.acronym.cmp(&b.acronym))
    });
    out.truncate(limit);
    out
}

/// Dashboard headline numbers in one pass over each collection.
pub fn catalog_summary(projects: &[Project], links: &[OrgLink]) -> CatalogSummary {
    const TRACKED_STATUSES: &[&str] = &["SIGNED", "CLOSED", "TERMINATED", "ONGOING"];

    let mut status_counts: BTreeMap<String, u64> = TRACKED_STATUSES
        .iter()
        .map(|s| (s.to_lowercase(), 0))
        .collect();
    let mut total_contribution = 0.0f64;
    for project in projects {
        let status = project.status.to_lowercase();
        if let Some(count) = status_counts.get_mut(&status) {
            *count += 1;
        }
        total_contribution += project.eu_contribution;
    }

    let countries: HashSet<&str> = links
        .iter()
        .map(|l| l.country.as_str())
        .filter(|c| !c.is_empty())
        .collect();

    CatalogSummary {
        total_projects: projects.len() as u64,
        status_counts,
        total_contribution,
        countries_involved: countries.len() as u64,
        organizations_count: links.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordex_core::KeywordField;
    use cordex_store::MemoryCatalog;

    fn project(id: &str, title: &str) -> Project {
        Project {
            id: id.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn link(project_id: &str, org_id: &str, country: &str, role: &str) -> OrgLink {
        OrgLink {
            project_id: project_id.to_string(),
            organisation_id: org_id.to_string(),
            name: format!("Org {org_id}"),
            country: country.to_string(),
            role: role.to_string(),
            ..Default::default()
        }
    }

    fn service(catalog: MemoryCatalog) -> CatalogService {
        CatalogService::new(Arc::new(catalog), Arc::new(HeuristicAnalyzer))
    }

    #[test]
    fn plan_ignores_malformed_ranges_and_dates() {
        let params = SearchParams {
            min_contribution: Some("not-a-number".into()),
            max_contribution: Some("500000".into()),
            start_date: Some("01/02/2024".into()),
            ..Default::default()
        };
        let plan = build_search_plan(&params);
        assert_eq!(plan.query.min_contribution, None);
        assert_eq!(plan.query.max_contribution, Some(500_000.0));
        assert_eq!(plan.query.start_date_from, None);
    }

    #[test]
    fn plan_defaults_to_open_listing() {
        let plan = build_search_plan(&SearchParams::default());
        assert!(plan.query.matches(&project("1", "anything at all")));
        assert_eq!(plan.page.number(), 1);
        assert_eq!(plan.page.per_page(), DEFAULT_PER_PAGE);
        assert!(plan.countries.is_empty());
    }

    #[test]
    fn plan_caps_page_size() {
        let params = SearchParams {
            per_page: Some(5000),
            page: Some(0),
            ..Default::default()
        };
        let plan = build_search_plan(&params);
        assert_eq!(plan.page.per_page(), MAX_PER_PAGE);
        assert_eq!(plan.page.number(), 1);
    }

    #[test]
    fn extractor_unions_explicit_and_derived_keywords() {
        let mut p = project("1", "Robotics for Crop Monitoring");
        p.keywords = KeywordField::Text("AI, Health; Robotics".into());
        p.objective = "The project develops ML pipelines for precision farming.".into();

        let extractor = KeywordExtractor::new(Arc::new(HeuristicAnalyzer));
        let keywords = extractor.extract(&p);

        // "AI" is length 2 and dropped; the rest of the explicit field stays.
        assert!(!keywords.contains(&"ai".to_string()));
        assert!(keywords.contains(&"health".to_string()));
        assert!(keywords.contains(&"robotics".to_string()));
    }

    #[test]
    fn extractor_degrades_to_explicit_field_with_null_analyzer() {
        let mut p = project("1", "Some Title With Entities");
        p.keywords = KeywordField::List(vec!["hydrogen".into()]);
        p.objective = "Lots of analyzable text about the European Space Agency.".into();

        let extractor = KeywordExtractor::new(Arc::new(NullAnalyzer));
        assert_eq!(extractor.extract(&p), vec!["hydrogen"]);
    }

    #[test]
    fn heuristic_analyzer_finds_capitalized_runs_and_acronyms() {
        let analyzer = HeuristicAnalyzer;
        let entities = analyzer.entities("Partnering with Fraunhofer Institute on HPC workloads.");
        assert!(entities
            .iter()
            .any(|e| e.text == "Fraunhofer Institute" && e.kind == EntityKind::Organization));
        assert!(entities
            .iter()
            .any(|e| e.text == "HPC" && e.kind == EntityKind::Technology));
    }

    #[test]
    fn sentence_split_handles_terminators() {
        let text = "First sentence. Second one! Third? Trailing fragment";
        assert_eq!(
            split_sentences(text),
            vec!["First sentence.", "Second one!", "Third?", "Trailing fragment"]
        );
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn short_objectives_pass_through_unchanged() {
        let text = "We aim high. We deliver.";
        let summary = summarize(text, 3, &HeuristicAnalyzer);
        assert_eq!(summary.as_deref(), Some(text));
    }

    #[test]
    fn summary_keeps_document_order_and_bounds() {
        let text = "The project aims to develop innovation in energy research. \
                    Filler sentence with nothing of note here at all. \
                    Another plain filler sentence without any signal. \
                    It will improve health impact through digital technology research.";
        let summary = summarize(text, 2, &HeuristicAnalyzer).unwrap();

        assert!(summary.starts_with("The project aims"));
        assert!(summary.ends_with("technology research."));
        assert_eq!(split_sentences(&summary).len(), 2);
    }

    #[test]
    fn summarizer_is_absent_on_empty_or_unavailable() {
        assert_eq!(summarize("", 3, &HeuristicAnalyzer), None);
        assert_eq!(summarize("Some real text here.", 3, &NullAnalyzer), None);
    }

    #[tokio::test]
    async fn enrichment_promotes_the_first_coordinator() {
        let links = vec![
            link("1", "A", "DE", "coordinator"),
            link("1", "B", "FR", "Participant"),
            link("1", "C", "IT", "Coordinator"),
        ];
        let svc = service(MemoryCatalog::seeded(vec![project("1", "P")], links).await);

        let enriched = svc.fetch("1").await.unwrap();
        let coordinator = enriched.coordinator.expect("coordinator present");
        assert_eq!(coordinator.link.organisation_id, "A");
        assert_eq!(
            enriched
                .organizations
                .iter()
                .map(|o| o.link.organisation_id.as_str())
                .collect::<Vec<_>>(),
            vec!["B", "C"]
        );
        assert_eq!(coordinator.project_count, 1);
        assert_eq!(coordinator.coordinator_count, 1);
    }

    #[tokio::test]
    async fn fetch_unknown_project_is_not_found() {
        let svc = service(MemoryCatalog::seeded(vec![], vec![]).await);
        match svc.fetch("missing").await {
            Err(CatalogError::NotFound(id)) => assert_eq!(id, "missing"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn search_applies_country_post_filter_but_counts_before_it() {
        let mut p1 = project("1", "Solar Energy Roadmap");
        p1.eu_contribution = 200_000.0;
        let mut p2 = project("2", "New Energy Solar Panels");
        p2.eu_contribution = 150_000.0;
        let mut p3 = project("3", "Solar grid energy pilot");
        p3.eu_contribution = 50_000.0;
        let mut p4 = project("4", "Wind Turbine Maintenance");
        p4.eu_contribution = 900_000.0;
        let mut p5 = project("5", "Orphaned solar energy study");
        p5.eu_contribution = 400_000.0;

        let links = vec![
            link("1", "A", "DE", "coordinator"),
            link("2", "B", "ES", "participant"),
            link("3", "C", "FR", "coordinator"),
        ];
        let svc = service(MemoryCatalog::seeded(vec![p1, p2, p3, p4, p5], links).await);

        let params = SearchParams {
            q: Some("solar energy".into()),
            min_contribution: Some("100000".into()),
            countries: Some("DE,FR".into()),
            ..Default::default()
        };
        let results = svc.search(&params).await.unwrap();

        // Text predicate + contribution floor match projects 1, 2 and 5;
        // the country post-filter then drops the Spanish-only project 2 and
        // the link-less project 5, while the reported total still reflects
        // the pre-filter count.
        assert_eq!(results.projects.len(), 1);
        assert_eq!(results.projects[0].project.id, "1");
        assert_eq!(results.total, 3);
        assert_eq!(results.per_page, DEFAULT_PER_PAGE);
        assert_eq!(results.pages, 1);
    }

    #[tokio::test]
    async fn closed_listing_excludes_open_ended_and_sorts_by_end_date() {
        let mut p1 = project("1", "Ends later");
        p1.end_date = NaiveDate::from_ymd_opt(2026, 6, 30);
        let mut p2 = project("2", "Ends sooner");
        p2.end_date = NaiveDate::from_ymd_opt(2024, 1, 31);
        let p3 = project("3", "No end date");

        let svc = service(MemoryCatalog::seeded(vec![p1, p2, p3], vec![]).await);
        let closed = svc.closed(15).await.unwrap();

        assert_eq!(
            closed.iter().map(|p| p.project.id.as_str()).collect::<Vec<_>>(),
            vec!["2", "1"]
        );
        // A project that ended in the past reads as expired regardless of
        // its raw status string.
        assert_eq!(closed[0].derived_status, DerivedStatus::Expired);
    }

    #[tokio::test]
    async fn suggestions_are_alphabetical_across_the_scan_window() {
        let mut p1 = project("1", "One");
        p1.keywords = KeywordField::Text("solar thermal".into());
        let mut p2 = project("2", "Two");
        p2.keywords = KeywordField::Text("solar cells".into());

        let svc = CatalogService::new(
            Arc::new(MemoryCatalog::seeded(vec![p1, p2], vec![]).await),
            Arc::new(NullAnalyzer),
        );

        // Both projects match; the bound keeps the alphabetically-first
        // keyword even though it comes from the later-scanned project.
        let suggestions = svc.keyword_suggestions("solar", 1).await.unwrap();
        assert_eq!(suggestions, vec!["solar cells"]);
    }

    #[test]
    fn organization_directory_dedupes_and_bounds() {
        let mut a = link("1", "A", "DE", "coordinator");
        a.short_name = "ORG-A".into();
        let a_again = link("2", "A", "DE", "participant");
        let b = link("3", "B", "FR", "participant");
        let c = link("4", "C", "IT", "participant");

        let entries = organization_directory(&[a, a_again, b, c], 2);
        assert_eq!(
            entries
                .iter()
                .map(|e| (e.id.as_str(), e.acronym.as_str()))
                .collect::<Vec<_>>(),
            vec![("A", "ORG-A"), ("B", "")]
        );
    }

    #[tokio::test]
    async fn keyword_queries_rank_and_suggest() {
        let mut p1 = project("1", "One");
        p1.keywords = KeywordField::Text("photovoltaics; storage".into());
        let mut p2 = project("2", "Two");
        p2.keywords = KeywordField::Text("photovoltaics".into());

        let svc = CatalogService::new(
            Arc::new(MemoryCatalog::seeded(vec![p1, p2], vec![]).await),
            Arc::new(NullAnalyzer),
        );

        let trending = svc.trending_keywords(5).await.unwrap();
        assert_eq!(trending[0].keyword, "photovoltaics");
        assert_eq!(trending[0].count, 2);

        let suggestions = svc.keyword_suggestions("photo", 10).await.unwrap();
        assert_eq!(suggestions, vec!["photovoltaics"]);
        assert!(svc.keyword_suggestions("p", 10).await.unwrap().is_empty());
    }

    #[test]
    fn aggregates_count_countries_programmes_and_years() {
        let links = vec![
            link("1", "A", "DE", "coordinator"),
            link("2", "A", "DE", "participant"),
            link("1", "B", "FR", "participant"),
            link("9", "C", "", "participant"),
        ];
        let by_country = projects_by_country(&links, 10);
        assert_eq!(
            by_country,
            vec![
                CountryProjects {
                    country: "DE".into(),
                    project_count: 2
                },
                CountryProjects {
                    country: "FR".into(),
                    project_count: 1
                },
            ]
        );

        let mut p1 = project("1", "One");
        p1.programme = "HORIZON".into();
        p1.start_date = NaiveDate::from_ymd_opt(2021, 5, 1);
        let mut p2 = project("2", "Two");
        p2.programme = "HORIZON".into();
        p2.start_date = NaiveDate::from_ymd_opt(2023, 2, 1);
        let p3 = project("3", "Three");

        let per_programme = projects_per_programme(&[p1.clone(), p2.clone(), p3.clone()]);
        assert_eq!(per_programme.len(), 1);
        assert_eq!(per_programme[0].project_count, 2);

        let over_time = projects_over_time(&[p1, p2, p3]);
        assert_eq!(
            over_time
                .iter()
                .map(|y| (y.year.as_str(), y.project_count))
                .collect::<Vec<_>>(),
            vec![("2021", 1), ("2023", 1)]
        );
    }

    #[test]
    fn contribution_sums_resolve_projects_through_links() {
        let mut p1 = project("1", "One");
        p1.eu_contribution = 100.0;
        let mut p2 = project("2", "Two");
        p2.eu_contribution = 50.0;

        let links = vec![
            link("1", "A", "DE", "coordinator"),
            link("2", "B", "DE", "participant"),
            link("1", "C", "FR", "participant"),
            link("missing", "D", "FR", "participant"),
        ];
        let totals = eu_contribution_by_country(&[p1, p2], &links, 12);
        assert_eq!(totals[0].country, "DE");
        assert_eq!(totals[0].total_eu_contribution, 150.0);
        assert_eq!(totals[1].country, "FR");
        assert_eq!(totals[1].total_eu_contribution, 100.0);
    }

    #[test]
    fn top_rankings_are_bounded_and_ordered() {
        let links = vec![
            link("1", "A", "DE", "coordinator"),
            link("2", "A", "DE", "participant"),
            link("3", "B", "FR", "participant"),
        ];
        let orgs = top_organizations(&links, 1);
        assert_eq!(orgs.len(), 1);
        assert_eq!(orgs[0].organization, "Org A");
        assert_eq!(orgs[0].project_count, 2);

        let mut p1 = project("1", "Small");
        p1.eu_contribution = 10.0;
        let mut p2 = project("2", "Big");
        p2.acronym = "BIG".into();
        p2.eu_contribution = 99.0;
        let top = top_projects_by_contribution(&[p1, p2], 15);
        assert_eq!(top[0].acronym, "BIG");
    }

    #[test]
    fn summary_tracks_statuses_and_distinct_countries() {
        let mut p1 = project("1", "One");
        p1.status = "SIGNED".into();
        p1.eu_contribution = 5.0;
        let mut p2 = project("2", "Two");
        p2.status = "closed".into();
        p2.eu_contribution = 7.0;

        let links = vec![
            link("1", "A", "DE", "coordinator"),
            link("2", "B", "DE", "participant"),
        ];
        let summary = catalog_summary(&[p1, p2], &links);
        assert_eq!(summary.total_projects, 2);
        assert_eq!(summary.status_counts["signed"], 1);
        assert_eq!(summary.status_counts["closed"], 1);
        assert_eq!(summary.status_counts["ongoing"], 0);
        assert_eq!(summary.total_contribution, 12.0);
        assert_eq!(summary.countries_involved, 1);
        assert_eq!(summary.organizations_count, 2);
    }
}
