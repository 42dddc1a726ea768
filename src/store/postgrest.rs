use super::ScheduleStore;
use crate::schedule::{ScheduleQuery, ScheduleRow};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;

const SELECT_COLUMNS: &str = "schedule,action,is_repeat";

/// Repeating rows, plus one-shot rows that have never run.
const ACTIVE_FILTER: &str = "(is_repeat.eq.true,and(is_repeat.eq.false,last_ran_at.is.null))";

/// Schedule store backed by a PostgREST endpoint (e.g. Supabase).
///
/// Requests carry the project key as `apikey` and the caller's own
/// `Authorization` header when present, so row-level security is evaluated
/// for the caller rather than the service.
pub struct PostgrestStore {
    client: reqwest::Client,
    rest_url: String,
    api_key: String,
}

/// Error body returned by PostgREST on non-2xx responses.
#[derive(Deserialize)]
struct PostgrestError {
    message: Option<String>,
}

impl PostgrestStore {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", endpoint.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    /// `GET /schedules` URL with the device equality filter and the
    /// activation predicate.
    fn active_schedules_url(&self, device_id: &str) -> String {
        format!(
            "{}/schedules?select={}&device_id=eq.{}&or={}",
            self.rest_url,
            SELECT_COLUMNS,
            urlencoding::encode(device_id),
            urlencoding::encode(ACTIVE_FILTER),
        )
    }

    fn authorization(&self, query: &ScheduleQuery) -> String {
        query
            .caller_auth
            .clone()
            .unwrap_or_else(|| format!("Bearer {}", self.api_key))
    }
}

#[async_trait]
impl ScheduleStore for PostgrestStore {
    fn backend(&self) -> &'static str {
        "postgrest"
    }

    async fn fetch_active(&self, query: &ScheduleQuery) -> Result<Vec<ScheduleRow>> {
        let url = self.active_schedules_url(query.device_id.as_str());

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .header(AUTHORIZATION, self.authorization(query))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .context("Failed to reach schedule store")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<PostgrestError>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(body);
            bail!("store returned {}: {}", status, message);
        }

        response
            .json::<Vec<ScheduleRow>>()
            .await
            .context("Failed to decode schedule rows")
    }
}
