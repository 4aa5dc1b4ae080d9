//! EMR patient directory and document tagging.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use docflow_engine::{FlowError, FlowResult};

use super::de_id;
use super::session::EmrSession;
use crate::queue::QueueKind;

/// Directory search field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchMode {
    Name,
    Dob,
    Hin,
    DemographicNo,
}

impl SearchMode {
    /// Wire name of the search mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Name => "search_name",
            SearchMode::Dob => "search_dob",
            SearchMode::Hin => "search_hin",
            SearchMode::DemographicNo => "search_demographic_no",
        }
    }

    /// Search keyword for a query; partial fields match as substrings.
    pub fn keyword(&self, query: &str) -> String {
        match self {
            SearchMode::Name => query.to_string(),
            SearchMode::Dob | SearchMode::Hin => format!("%{}%", query),
            SearchMode::DemographicNo => query.to_string(),
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row returned by a directory search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityCandidate {
    #[serde(deserialize_with = "de_id")]
    pub demographic_no: String,

    #[serde(default)]
    pub formatted_name: String,

    #[serde(default)]
    pub formatted_dob: String,

    /// Most responsible provider; `_` or empty when unassigned.
    #[serde(default, deserialize_with = "de_id")]
    pub provider_no: String,
}

impl IdentityCandidate {
    pub fn new(
        demographic_no: impl Into<String>,
        formatted_name: impl Into<String>,
        formatted_dob: impl Into<String>,
        provider_no: impl Into<String>,
    ) -> Self {
        Self {
            demographic_no: demographic_no.into(),
            formatted_name: formatted_name.into(),
            formatted_dob: formatted_dob.into(),
            provider_no: provider_no.into(),
        }
    }

    /// Most responsible provider, if assigned.
    pub fn mrp(&self) -> Option<&str> {
        match self.provider_no.trim() {
            "" | "_" => None,
            p => Some(p),
        }
    }

    /// Keyword shown on the tagged document, e.g. `DOE, JANE (1980-05-01)`.
    pub fn keyword(&self) -> String {
        format!("{} ({})", self.formatted_name, self.formatted_dob)
    }
}

/// One entry of the provider roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEntry {
    #[serde(deserialize_with = "de_id")]
    pub provider_no: String,
    pub name: String,
}

/// Tagging write-back for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    pub document_id: String,
    pub queue: QueueKind,
    pub doc_type: String,
    pub document_description: String,
    pub observation_date: NaiveDate,
    pub demographic_no: String,
    pub demographic_keyword: String,
    pub flag_providers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrp_no: Option<String>,
    /// Set when the patient could not be identified.
    #[serde(default)]
    pub needs_review: bool,
}

/// Patient/provider directory of the EMR.
#[async_trait]
pub trait EmrDirectory: Send + Sync {
    /// Establish the session, retrying with backoff.
    async fn login(&self) -> FlowResult<()>;

    /// Fuzzy patient search.
    async fn search(&self, mode: SearchMode, query: &str) -> FlowResult<Vec<IdentityCandidate>>;

    /// Name/number pairs of active providers.
    async fn provider_roster(&self) -> FlowResult<Vec<ProviderEntry>>;

    /// Write tags back. Returns false if the EMR refused the update.
    async fn update_document(&self, update: &DocumentUpdate) -> FlowResult<bool>;

    /// End the session.
    async fn close(&self);
}

/// Directory backed by the EMR's JSON endpoints.
#[derive(Debug, Clone)]
pub struct HttpEmrDirectory {
    session: EmrSession,
}

impl HttpEmrDirectory {
    pub fn new(session: EmrSession) -> Self {
        Self { session }
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    search_mode: &'a str,
    keyword: String,
    ptstatus: &'a str,
    limit: u32,
}

#[async_trait]
impl EmrDirectory for HttpEmrDirectory {
    async fn login(&self) -> FlowResult<()> {
        self.session.login().await
    }

    async fn search(&self, mode: SearchMode, query: &str) -> FlowResult<Vec<IdentityCandidate>> {
        let request = SearchRequest {
            search_mode: mode.as_str(),
            keyword: mode.keyword(query),
            ptstatus: "active",
            limit: 10,
        };

        let response = self
            .session
            .client()
            .post(self.session.url("demographic/search"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FlowError::Transport(format!(
                "search {} failed with status {}: {}",
                mode, status, body
            )));
        }

        let candidates: Vec<IdentityCandidate> = response.json().await?;
        tracing::debug!(mode = %mode, hits = candidates.len(), "Directory search");
        Ok(candidates)
    }

    async fn provider_roster(&self) -> FlowResult<Vec<ProviderEntry>> {
        let response = self
            .session
            .client()
            .get(self.session.url("provider/roster"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FlowError::Transport(format!(
                "provider roster failed with status {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn update_document(&self, update: &DocumentUpdate) -> FlowResult<bool> {
        let response = self
            .session
            .client()
            .post(
                self.session
                    .url(&format!("dms/documents/{}/tags", update.document_id)),
            )
            .json(update)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(true)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                document_id = %update.document_id,
                status = %status,
                body = %body,
                "EMR rejected document update"
            );
            Ok(false)
        }
    }

    async fn close(&self) {
        self.session.logout().await;
    }
}
