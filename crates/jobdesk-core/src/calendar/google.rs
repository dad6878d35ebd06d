//! Google Calendar v3 client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::model::{CalendarEvent, EventDraft, EventQuery, EventTime};
use super::CalendarService;
use crate::error::CalendarError;
use crate::retry::RetryPolicy;
use crate::storage::CalendarConfig;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

const PAGE_SIZE: &str = "250";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExtendedProperties {
    #[serde(default)]
    private: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start: Option<EventTime>,
    #[serde(default)]
    end: Option<EventTime>,
    #[serde(default)]
    extended_properties: Option<ExtendedProperties>,
}

impl WireEvent {
    fn into_event(self) -> Option<CalendarEvent> {
        if self.status.as_deref() == Some("cancelled") {
            return None;
        }
        let (Some(start), Some(end)) = (self.start, self.end) else {
            tracing::warn!(event_id = %self.id, "skipping event without start/end");
            return None;
        };
        Some(CalendarEvent {
            id: self.id,
            summary: self.summary,
            description: self.description,
            location: self.location,
            start,
            end,
            private: self
                .extended_properties
                .map(|props| props.private)
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPage {
    #[serde(default)]
    items: Vec<WireEvent>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Request body for insert and patch. `location` is always sent so a
/// cleared location clears remotely too.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftBody<'a> {
    summary: &'a str,
    description: &'a str,
    location: Option<&'a str>,
    start: &'a EventTime,
    end: &'a EventTime,
    extended_properties: PrivateOnly<'a>,
}

#[derive(Debug, Serialize)]
struct PrivateOnly<'a> {
    private: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a EventDraft> for DraftBody<'a> {
    fn from(draft: &'a EventDraft) -> Self {
        Self {
            summary: &draft.summary,
            description: &draft.description,
            location: draft.location.as_deref(),
            start: &draft.start,
            end: &draft.end,
            extended_properties: PrivateOnly {
                private: &draft.private,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// Client bound to one calendar.
pub struct GoogleCalendar {
    http: Client,
    base_url: String,
    calendar_id: String,
    access_token: String,
    retry: RetryPolicy,
}

impl GoogleCalendar {
    pub fn new(
        config: &CalendarConfig,
        access_token: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, CalendarError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            calendar_id: config.calendar_id.clone(),
            access_token: access_token.into(),
            retry,
        })
    }

    /// Point at a different API root (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id)
        )
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CalendarError> {
        let response = request.bearer_auth(&self.access_token).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(api_error(response).await)
    }

    async fn write(
        &self,
        what: &str,
        retryable: fn(&CalendarError) -> bool,
        build: impl Fn() -> RequestBuilder + Send + Sync,
    ) -> Result<CalendarEvent, CalendarError> {
        let wire: WireEvent = self
            .retry
            .run_when(what, retryable, || async {
                let response = self.send(build()).await?;
                Ok::<_, CalendarError>(response.json::<WireEvent>().await?)
            })
            .await?;
        let id = wire.id.clone();
        wire.into_event().ok_or_else(|| {
            CalendarError::Malformed(format!("{what} returned an unusable event {id}"))
        })
    }
}

async fn api_error(response: Response) -> CalendarError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    CalendarError::Api { status, message }
}

fn rfc3339(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl CalendarService for GoogleCalendar {
    async fn list(&self, query: &EventQuery) -> Result<Vec<CalendarEvent>, CalendarError> {
        let url = self.events_url();
        let mut params: Vec<(&str, String)> = vec![
            ("singleEvents", "true".to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        if let Some(min) = &query.time_min {
            params.push(("timeMin", rfc3339(min)));
        }
        if let Some(max) = &query.time_max {
            params.push(("timeMax", rfc3339(max)));
        }
        if let Some((key, value)) = &query.private_property {
            params.push(("privateExtendedProperty", format!("{key}={value}")));
        }
        if let Some(text) = &query.text {
            params.push(("q", text.clone()));
        }

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: EventPage = self
                .retry
                .run("calendar list", || async {
                    let mut request = self.http.get(&url).query(&params);
                    if let Some(token) = &page_token {
                        request = request.query(&[("pageToken", token)]);
                    }
                    let response = self.send(request).await?;
                    Ok::<_, CalendarError>(response.json::<EventPage>().await?)
                })
                .await?;

            events.extend(page.items.into_iter().filter_map(WireEvent::into_event));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(count = events.len(), "calendar list");
        Ok(events)
    }

    async fn insert(&self, draft: &EventDraft) -> Result<CalendarEvent, CalendarError> {
        let url = self.events_url();
        let body = DraftBody::from(draft);
        // An insert whose response was lost may already exist; retrying it
        // would add a duplicate, so only explicit refusals are retried.
        self.write("calendar insert", CalendarError::is_refusal, || {
            self.http.post(&url).json(&body)
        })
        .await
    }

    async fn patch(
        &self,
        event_id: &str,
        draft: &EventDraft,
    ) -> Result<CalendarEvent, CalendarError> {
        let url = self.event_url(event_id);
        let body = DraftBody::from(draft);
        self.write("calendar patch", CalendarError::is_transient, || {
            self.http.patch(&url).json(&body)
        })
        .await
    }

    async fn delete(&self, event_id: &str) -> Result<(), CalendarError> {
        let url = self.event_url(event_id);
        self.retry
            .run("calendar delete", || async {
                let response = self
                    .http
                    .delete(&url)
                    .bearer_auth(&self.access_token)
                    .send()
                    .await?;
                match response.status() {
                    status if status.is_success() => Ok::<(), CalendarError>(()),
                    StatusCode::NOT_FOUND | StatusCode::GONE => {
                        tracing::debug!(event_id, "event already gone");
                        Ok(())
                    }
                    _ => Err(api_error(response).await),
                }
            })
            .await
    }
}
