//! Catalog store capability + in-memory reference implementation.
//!
//! The persisted backend is an external collaborator; everything in this
//! crate speaks the small find/count/scan/replace interface the query layer
//! needs. `MemoryCatalog` is the reference implementation and the test fake.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use cordex_core::{OrgLink, Project};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

pub const CRATE_NAME: &str = "cordex-store";

/// Number of history entries retained per user.
pub const HISTORY_CAP: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected write: {0}")]
    Rejected(String),
}

/// Free-text predicate over {title, acronym, keywords, id, objective}.
///
/// Matches when the whole phrase appears as a case-insensitive substring of
/// any field, or when every individual term appears in at least one field
/// (not necessarily the same one, not necessarily contiguous).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextQuery {
    pub phrase: String,
    pub terms: Vec<String>,
}

impl TextQuery {
    pub fn new(q: &str) -> Option<Self> {
        let phrase = q.trim().to_lowercase();
        if phrase.is_empty() {
            return None;
        }
        let terms = phrase.split_whitespace().map(str::to_string).collect();
        Some(Self { phrase, terms })
    }

    fn haystacks(project: &Project) -> [String; 5] {
        [
            project.title.to_lowercase(),
            project.acronym.to_lowercase(),
            project.keywords.normalize().join(", ").to_lowercase(),
            project.id.to_lowercase(),
            project.objective.to_lowercase(),
        ]
    }

    pub fn matches(&self, project: &Project) -> bool {
        let fields = Self::haystacks(project);
        if fields.iter().any(|f| f.contains(&self.phrase)) {
            return true;
        }
        self.terms
            .iter()
            .all(|term| fields.iter().any(|f| f.contains(term)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectSort {
    #[default]
    Unsorted,
    StartDateDesc,
    EndDateAsc,
}

/// Composable predicate structure over the project collection. Every field
/// is optional; the empty query matches everything.
#[derive(Debug, Clone, Default)]
pub struct ProjectQuery {
    pub text: Option<TextQuery>,
    pub status: Option<String>,
    pub programme: Option<String>,
    pub start_date_from: Option<NaiveDate>,
    pub end_date_from: Option<NaiveDate>,
    pub end_date_to: Option<NaiveDate>,
    pub min_contribution: Option<f64>,
    pub max_contribution: Option<f64>,
    pub min_total_cost: Option<f64>,
    pub max_total_cost: Option<f64>,
    pub keywords: Vec<String>,
    /// Exclude projects without an end date. A bare EndDateAsc sort would
    /// otherwise rank them first.
    pub has_end_date: bool,
    pub sort: ProjectSort,
}

impl ProjectQuery {
    pub fn matches(&self, project: &Project) -> bool {
        if let Some(text) = &self.text {
            if !text.matches(project) {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if !project.status.eq_ignore_ascii_case(status) {
                return false;
            }
        }
        if let Some(programme) = &self.programme {
            if !project.programme.eq_ignore_ascii_case(programme) {
                return false;
            }
        }
        if let Some(from) = self.start_date_from {
            match project.start_date {
                Some(start) if start >= from => {}
                _ => return false,
            }
        }
        if self.has_end_date && project.end_date.is_none() {
            return false;
        }
        if let Some(from) = self.end_date_from {
            match project.end_date {
                Some(end) if end >= from => {}
                _ => return false,
            }
        }
        if let Some(to) = self.end_date_to {
            match project.end_date {
                Some(end) if end <= to => {}
                _ => return false,
            }
        }
        if let Some(min) = self.min_contribution {
            if project.eu_contribution < min {
                return false;
            }
        }
        if let Some(max) = self.max_contribution {
            if project.eu_contribution > max {
                return false;
            }
        }
        if let Some(min) = self.min_total_cost {
            if project.total_cost < min {
                return false;
            }
        }
        if let Some(max) = self.max_total_cost {
            if project.total_cost > max {
                return false;
            }
        }
        if !self.keywords.is_empty() {
            let keyword_text = project.keywords.normalize().join(", ").to_lowercase();
            let any = self
                .keywords
                .iter()
                .any(|k| keyword_text.contains(&k.to_lowercase()));
            if !any {
                return false;
            }
        }
        true
    }

    fn sort_slice(&self, projects: &mut [Project]) {
        match self.sort {
            ProjectSort::Unsorted => {}
            ProjectSort::StartDateDesc => {
                projects.sort_by(|a, b| b.start_date.cmp(&a.start_date));
            }
            ProjectSort::EndDateAsc => {
                projects.sort_by(|a, b| a.end_date.cmp(&b.end_date));
            }
        }
    }
}

/// Paging window: skip = (page - 1) * per_page, limit = per_page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    number: usize,
    per_page: usize,
}

impl Page {
    pub fn new(number: usize, per_page: usize) -> Self {
        Self {
            number: number.max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn skip(&self) -> usize {
        (self.number - 1) * self.per_page
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.per_page as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParticipationCounts {
    /// Distinct projects this organization appears in.
    pub projects: u64,
    /// Records where this organization's role matches "coordinator".
    pub coordinated: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReplaceReport {
    pub projects: usize,
    pub organizations: usize,
    pub batches: usize,
}

/// Store access capability, constructed once at process start and passed
/// explicitly to each component.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_projects(
        &self,
        query: &ProjectQuery,
        page: Page,
    ) -> Result<Vec<Project>, StoreError>;

    /// Count over the same predicate, ignoring the paging window.
    async fn count_projects(&self, query: &ProjectQuery) -> Result<u64, StoreError>;

    async fn project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError>;

    async fn links_for_project(&self, project_id: &str) -> Result<Vec<OrgLink>, StoreError>;

    async fn participation(&self, organisation_id: &str)
        -> Result<ParticipationCounts, StoreError>;

    /// Full-collection snapshots for one-pass aggregation.
    async fn scan_projects(&self) -> Result<Vec<Project>, StoreError>;
    async fn scan_links(&self) -> Result<Vec<OrgLink>, StoreError>;

    /// Drop-and-reinsert in fixed-size batches. Full-refresh semantics:
    /// anything not present in the incoming data is gone afterwards.
    async fn replace_catalog(
        &self,
        projects: Vec<Project>,
        links: Vec<OrgLink>,
        batch_size: usize,
    ) -> Result<ReplaceReport, StoreError>;

    async fn rebuild_indexes(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct CatalogIndexes {
    built: bool,
    project_by_id: HashMap<String, usize>,
    links_by_project: HashMap<String, Vec<usize>>,
    links_by_org: HashMap<String, Vec<usize>>,
}

#[derive(Default)]
struct CatalogState {
    projects: Vec<Project>,
    links: Vec<OrgLink>,
    indexes: CatalogIndexes,
}

impl CatalogState {
    fn rebuild(&mut self) {
        let mut indexes = CatalogIndexes {
            built: true,
            ..Default::default()
        };
        for (i, project) in self.projects.iter().enumerate() {
            indexes.project_by_id.insert(project.id.clone(), i);
        }
        for (i, link) in self.links.iter().enumerate() {
            indexes
                .links_by_project
                .entry(link.project_id.clone())
                .or_default()
                .push(i);
            indexes
                .links_by_org
                .entry(link.organisation_id.clone())
                .or_default()
                .push(i);
        }
        self.indexes = indexes;
    }
}

/// In-memory catalog with rebuildable lookup indexes. Reads fall back to a
/// linear scan while indexes are stale (between replace and reindex).
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/seed constructor: contents inserted and indexed in one step.
    pub async fn seeded(projects: Vec<Project>, links: Vec<OrgLink>) -> Self {
        let catalog = Self::new();
        {
            let mut state = catalog.state.write().await;
            state.projects = projects;
            state.links = links;
            state.rebuild();
        }
        catalog
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn find_projects(
        &self,
        query: &ProjectQuery,
        page: Page,
    ) -> Result<Vec<Project>, StoreError> {
        let state = self.state.read().await;
        let mut matched: Vec<Project> = state
            .projects
            .iter()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        query.sort_slice(&mut matched);
        Ok(matched
            .into_iter()
            .skip(page.skip())
            .take(page.per_page())
            .collect())
    }

    async fn count_projects(&self, query: &ProjectQuery) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state.projects.iter().filter(|p| query.matches(p)).count() as u64)
    }

    async fn project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let state = self.state.read().await;
        if state.indexes.built {
            return Ok(state
                .indexes
                .project_by_id
                .get(id)
                .map(|&i| state.projects[i].clone()));
        }
        Ok(state.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn links_for_project(&self, project_id: &str) -> Result<Vec<OrgLink>, StoreError> {
        let state = self.state.read().await;
        if state.indexes.built {
            let found = state
                .indexes
                .links_by_project
                .get(project_id)
                .map(|ids| ids.iter().map(|&i| state.links[i].clone()).collect())
                .unwrap_or_default();
            return Ok(found);
        }
        Ok(state
            .links
            .iter()
            .filter(|l| l.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn participation(
        &self,
        organisation_id: &str,
    ) -> Result<ParticipationCounts, StoreError> {
        let state = self.state.read().await;
        let links: Vec<&OrgLink> = if state.indexes.built {
            state
                .indexes
                .links_by_org
                .get(organisation_id)
                .map(|ids| ids.iter().map(|&i| &state.links[i]).collect())
                .unwrap_or_default()
        } else {
            state
                .links
                .iter()
                .filter(|l| l.organisation_id == organisation_id)
                .collect()
        };

        let distinct_projects: HashSet<&str> =
            links.iter().map(|l| l.project_id.as_str()).collect();
        let coordinated = links.iter().filter(|l| l.is_coordinator()).count() as u64;
        Ok(ParticipationCounts {
            projects: distinct_projects.len() as u64,
            coordinated,
        })
    }

    async fn scan_projects(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.state.read().await.projects.clone())
    }

    async fn scan_links(&self) -> Result<Vec<OrgLink>, StoreError> {
        Ok(self.state.read().await.links.clone())
    }

    async fn replace_catalog(
        &self,
        projects: Vec<Project>,
        links: Vec<OrgLink>,
        batch_size: usize,
    ) -> Result<ReplaceReport, StoreError> {
        if batch_size == 0 {
            return Err(StoreError::Rejected("batch size must be positive".into()));
        }
        let mut state = self.state.write().await;

        // Destructive drop first; readers between the drop and the last
        // batch observe a partially filled catalog.
        state.projects.clear();
        state.links.clear();
        state.indexes = CatalogIndexes::default();

        let mut batches = 0usize;
        for chunk in projects.chunks(batch_size) {
            state.projects.extend_from_slice(chunk);
            batches += 1;
        }
        for chunk in links.chunks(batch_size) {
            state.links.extend_from_slice(chunk);
            batches += 1;
        }

        let report = ReplaceReport {
            projects: state.projects.len(),
            organizations: state.links.len(),
            batches,
        };
        info!(
            projects = report.projects,
            organizations = report.organizations,
            batches = report.batches,
            "catalog replaced"
        );
        Ok(report)
    }

    async fn rebuild_indexes(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.rebuild();
        info!(
            projects = state.projects.len(),
            links = state.links.len(),
            "catalog indexes rebuilt"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub project_id: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Preferences {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub funding_types: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct UserProfile {
    favorites: Vec<String>,
    history: Vec<HistoryEntry>,
    preferences: Preferences,
}

/// Per-user favorites / history / preferences. The identity provider lives
/// outside this system; callers hand in an already-validated subject id.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn favorites(&self, user: &str) -> Result<Vec<String>, StoreError>;
    async fn add_favorite(&self, user: &str, project_id: &str) -> Result<(), StoreError>;
    async fn remove_favorite(&self, user: &str, project_id: &str) -> Result<(), StoreError>;
    async fn clear_favorites(&self, user: &str) -> Result<(), StoreError>;
    async fn reorder_favorites(&self, user: &str, order: Vec<String>) -> Result<(), StoreError>;

    async fn history(&self, user: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError>;
    async fn record_view(&self, user: &str, project_id: &str) -> Result<(), StoreError>;
    async fn remove_view(&self, user: &str, project_id: &str) -> Result<(), StoreError>;
    async fn clear_history(&self, user: &str) -> Result<(), StoreError>;

    async fn preferences(&self, user: &str) -> Result<Preferences, StoreError>;
    async fn set_preferences(&self, user: &str, preferences: Preferences)
        -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryProfiles {
    users: RwLock<HashMap<String, UserProfile>>,
}

impl MemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn favorites(&self, user: &str) -> Result<Vec<String>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(user).map(|p| p.favorites.clone()).unwrap_or_default())
    }

    async fn add_favorite(&self, user: &str, project_id: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let profile = users.entry(user.to_string()).or_default();
        if !profile.favorites.iter().any(|id| id == project_id) {
            profile.favorites.push(project_id.to_string());
        }
        Ok(())
    }

    async fn remove_favorite(&self, user: &str, project_id: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if let Some(profile) = users.get_mut(user) {
            profile.favorites.retain(|id| id != project_id);
        }
        Ok(())
    }

    async fn clear_favorites(&self, user: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if let Some(profile) = users.get_mut(user) {
            profile.favorites.clear();
        }
        Ok(())
    }

    async fn reorder_favorites(&self, user: &str, order: Vec<String>) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let profile = users.entry(user.to_string()).or_default();
        let mut seen = HashSet::new();
        profile.favorites = order
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Ok(())
    }

    async fn history(&self, user: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .get(user)
            .map(|p| p.history.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn record_view(&self, user: &str, project_id: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let profile = users.entry(user.to_string()).or_default();
        profile.history.insert(
            0,
            HistoryEntry {
                project_id: project_id.to_string(),
                opened_at: Utc::now(),
            },
        );
        profile.history.truncate(HISTORY_CAP);
        Ok(())
    }

    async fn remove_view(&self, user: &str, project_id: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if let Some(profile) = users.get_mut(user) {
            profile.history.retain(|e| e.project_id != project_id);
        }
        Ok(())
    }

    async fn clear_history(&self, user: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if let Some(profile) = users.get_mut(user) {
            profile.history.clear();
        }
        Ok(())
    }

    async fn preferences(&self, user: &str) -> Result<Preferences, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .get(user)
            .map(|p| p.preferences.clone())
            .unwrap_or_default())
    }

    async fn set_preferences(
        &self,
        user: &str,
        preferences: Preferences,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        users.entry(user.to_string()).or_default().preferences = preferences;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordex_core::KeywordField;

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
            country: country.to_string(),
            role: role.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn text_query_matches_phrase_and_term_bag() {
        let query = TextQuery::new("solar energy").unwrap();

        let phrase_hit = project("1", "Solar Energy Roadmap");
        let bag_hit = project("2", "New Energy Solar Panels");
        let miss = project("3", "Wind Turbine Maintenance");

        assert!(query.matches(&phrase_hit));
        assert!(query.matches(&bag_hit));
        assert!(!query.matches(&miss));
    }

    #[test]
    fn text_query_searches_keywords_and_id() {
        let mut p = project("101069937", "Untitled");
        p.keywords = KeywordField::Text("photovoltaics; storage".into());

        assert!(TextQuery::new("photovolta").unwrap().matches(&p));
        assert!(TextQuery::new("101069").unwrap().matches(&p));
    }

    #[test]
    fn empty_query_matches_everything() {
        let query = ProjectQuery::default();
        assert!(query.matches(&project("1", "anything")));
        assert!(TextQuery::new("   ").is_none());
    }

    #[test]
    fn range_predicates_are_anded() {
        let mut p = project("1", "Grid Storage");
        p.eu_contribution = 150_000.0;
        p.start_date = NaiveDate::from_ymd_opt(2024, 3, 1);

        let query = ProjectQuery {
            min_contribution: Some(100_000.0),
            start_date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };
        assert!(query.matches(&p));

        let stricter = ProjectQuery {
            min_contribution: Some(200_000.0),
            ..query
        };
        assert!(!stricter.matches(&p));
    }

    #[test]
    fn date_bounds_treat_absent_as_non_matching() {
        let p = project("1", "No dates at all");
        let query = ProjectQuery {
            end_date_to: NaiveDate::from_ymd_opt(2030, 1, 1),
            ..Default::default()
        };
        assert!(!query.matches(&p));
    }

    #[test]
    fn has_end_date_excludes_open_ended_projects() {
        let mut dated = project("1", "Dated");
        dated.end_date = NaiveDate::from_ymd_opt(2025, 1, 1);
        let open_ended = project("2", "Open ended");

        let query = ProjectQuery {
            has_end_date: true,
            ..Default::default()
        };
        assert!(query.matches(&dated));
        assert!(!query.matches(&open_ended));
    }

    #[test]
    fn page_window_math() {
        let page = Page::new(3, 10);
        assert_eq!(page.skip(), 20);
        assert_eq!(page.total_pages(25), 3);
        // Degenerate inputs clamp instead of panicking.
        assert_eq!(Page::new(0, 0).skip(), 0);
    }

    #[tokio::test]
    async fn find_applies_predicate_sort_and_paging() {
        let mut p1 = project("1", "Solar One");
        p1.start_date = NaiveDate::from_ymd_opt(2023, 1, 1);
        let mut p2 = project("2", "Solar Two");
        p2.start_date = NaiveDate::from_ymd_opt(2025, 1, 1);
        let mut p3 = project("3", "Solar Three");
        p3.start_date = NaiveDate::from_ymd_opt(2024, 1, 1);

        let catalog = MemoryCatalog::seeded(vec![p1, p2, p3], vec![]).await;
        let query = ProjectQuery {
            text: TextQuery::new("solar"),
            sort: ProjectSort::StartDateDesc,
            ..Default::default()
        };

        let rows = catalog.find_projects(&query, Page::new(1, 2)).await.unwrap();
        assert_eq!(
            rows.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["2", "3"]
        );
        assert_eq!(catalog.count_projects(&query).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn participation_counts_distinct_projects_and_coordinations() {
        let links = vec![
            link("1", "A", "DE", "coordinator"),
            link("2", "A", "DE", "Participant"),
            link("2", "A", "DE", "participant"),
            link("3", "B", "FR", "Coordinator"),
        ];
        let catalog = MemoryCatalog::seeded(vec![], links).await;

        let a = catalog.participation("A").await.unwrap();
        assert_eq!(a.projects, 2);
        assert_eq!(a.coordinated, 1);

        let b = catalog.participation("B").await.unwrap();
        assert_eq!(b.projects, 1);
        assert_eq!(b.coordinated, 1);
    }

    #[tokio::test]
    async fn replace_is_a_full_refresh() {
        let catalog = MemoryCatalog::seeded(vec![project("old", "Old")], vec![]).await;

        let report = catalog
            .replace_catalog(
                vec![project("1", "One"), project("2", "Two")],
                vec![link("1", "A", "DE", "coordinator")],
                1,
            )
            .await
            .unwrap();
        assert_eq!(report.projects, 2);
        assert_eq!(report.organizations, 1);
        assert_eq!(report.batches, 3);

        // Pre-reindex reads still work via linear scan.
        assert!(catalog.project_by_id("old").await.unwrap().is_none());
        assert!(catalog.project_by_id("1").await.unwrap().is_some());

        catalog.rebuild_indexes().await.unwrap();
        assert!(catalog.project_by_id("2").await.unwrap().is_some());
        assert_eq!(catalog.links_for_project("1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn favorites_are_ordered_deduplicated_and_reorderable() {
        let profiles = MemoryProfiles::new();
        profiles.add_favorite("u1", "1").await.unwrap();
        profiles.add_favorite("u1", "2").await.unwrap();
        profiles.add_favorite("u1", "1").await.unwrap();
        assert_eq!(profiles.favorites("u1").await.unwrap(), vec!["1", "2"]);

        profiles
            .reorder_favorites("u1", vec!["2".into(), "1".into(), "2".into()])
            .await
            .unwrap();
        assert_eq!(profiles.favorites("u1").await.unwrap(), vec!["2", "1"]);

        profiles.remove_favorite("u1", "2").await.unwrap();
        assert_eq!(profiles.favorites("u1").await.unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_capped() {
        let profiles = MemoryProfiles::new();
        for i in 0..(HISTORY_CAP + 5) {
            profiles
                .record_view("u1", &format!("p{i}"))
                .await
                .unwrap();
        }
        let history = profiles.history("u1", 100).await.unwrap();
        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(history[0].project_id, format!("p{}", HISTORY_CAP + 4));

        let limited = profiles.history("u1", 3).await.unwrap();
        assert_eq!(limited.len(), 3);
    }
}
