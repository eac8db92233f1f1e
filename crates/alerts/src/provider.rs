//! Upstream course-catalog adapter.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::ProviderError;

/// Request timeout for upstream catalog calls. The monitor must never
/// hang on a slow upstream; a timed-out fetch is treated as failed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An academic term as reported by the catalog.
#[derive(Debug, Clone)]
pub struct Term {
    pub code: String,
    pub description: String,
}

/// One schedulable section of a course.
#[derive(Debug, Clone)]
pub struct Section {
    pub crn: String,
    pub is_open: bool,
}

/// Read-only source of term and section availability data.
///
/// Failures must surface as [`ProviderError`], never as "not open".
#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    /// Terms the catalog currently exposes.
    async fn list_terms(&self) -> Result<Vec<Term>, ProviderError>;

    /// All sections of one term with their seat availability.
    async fn get_sections(&self, term_code: &str) -> Result<Vec<Section>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TermRecord {
    #[serde(rename = "STVTERM_CODE")]
    code: String,
    #[serde(rename = "STVTERM_DESC")]
    description: String,
}

#[derive(Debug, Deserialize)]
struct SectionRecord {
    #[serde(rename = "SWV_CLASS_SEARCH_CRN")]
    crn: String,
    #[serde(rename = "STUSEAT_OPEN")]
    seat_open: String,
}

/// Catalog adapter for the Howdy course API.
pub struct HowdyProvider {
    client: reqwest::Client,
    base_url: String,
    /// Substring filters against term descriptions (e.g. "Fall 2025").
    /// Empty keeps every term.
    semester_filter: Vec<String>,
}

impl HowdyProvider {
    /// Create an adapter for the given base URL.
    pub fn new(
        base_url: impl Into<String>,
        semester_filter: Vec<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            semester_filter,
        })
    }

    fn keeps(&self, term: &TermRecord) -> bool {
        self.semester_filter.is_empty()
            || self
                .semester_filter
                .iter()
                .any(|s| term.description.contains(s.as_str()))
    }
}

#[async_trait]
impl AvailabilityProvider for HowdyProvider {
    async fn list_terms(&self) -> Result<Vec<Term>, ProviderError> {
        let url = format!("{}/api/all-terms", self.base_url);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(ProviderError::Status {
                code: res.status().as_u16(),
                url,
            });
        }
        let records: Vec<TermRecord> = res
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(records
            .into_iter()
            .filter(|t| self.keeps(t))
            .map(|t| Term {
                code: t.code,
                description: t.description,
            })
            .collect())
    }

    async fn get_sections(&self, term_code: &str) -> Result<Vec<Section>, ProviderError> {
        let url = format!("{}/api/course-sections", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "termCode": term_code }))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ProviderError::Status {
                code: res.status().as_u16(),
                url,
            });
        }
        let records: Vec<SectionRecord> = res
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(records
            .into_iter()
            .map(|r| Section {
                is_open: r.seat_open == "Y",
                crn: r.crn,
            })
            .collect())
    }
}
