//! Hosted relational store client.
//!
//! [`RemoteStore`] is the seam the record store talks through; [`RestRemote`]
//! speaks the PostgREST dialect (`col=eq.value` filters, `in.(...)` deletes,
//! merge-duplicates upserts). Column names are already translated by the
//! time rows reach this layer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use url::Url;

use crate::error::RemoteError;
use crate::retry::RetryPolicy;
use crate::schema::Record;
use crate::storage::RemoteConfig;
use crate::tenant::SessionProvider;

/// Column equality conditions, already in remote form.
pub type Conditions = [(String, Value)];

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows of `table` matching every condition.
    async fn select(&self, table: &str, filters: &Conditions) -> Result<Vec<Record>, RemoteError>;

    /// Insert or merge `rows`, resolving conflicts on `conflict_column`.
    async fn upsert(
        &self,
        table: &str,
        rows: &[Record],
        conflict_column: &str,
    ) -> Result<(), RemoteError>;

    /// Delete rows whose `key_column` is one of `ids`, restricted by `scope`.
    async fn delete(
        &self,
        table: &str,
        key_column: &str,
        ids: &[String],
        scope: &Conditions,
    ) -> Result<(), RemoteError>;
}

/// Credentials for the hosted store.
#[derive(Debug, Clone, Default)]
pub struct RemoteCredentials {
    /// Project API key, sent as `apikey`.
    pub api_key: Option<String>,
    /// Signed-in user's access token.
    pub access_token: Option<String>,
}

/// PostgREST-style client.
pub struct RestRemote {
    base: Url,
    credentials: RemoteCredentials,
    http: Client,
    retry: RetryPolicy,
}

impl RestRemote {
    pub fn new(
        config: &RemoteConfig,
        credentials: RemoteCredentials,
        retry: RetryPolicy,
    ) -> Result<Self, RemoteError> {
        let base = Url::parse(config.url.trim_end_matches('/'))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base,
            credentials,
            http,
            retry,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        let base = self.base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
        self.endpoint(&format!("rest/v1/{}", urlencoding::encode(table)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(key) = &self.credentials.api_key {
            request = request.header("apikey", key);
        }
        match self
            .credentials
            .access_token
            .as_ref()
            .or(self.credentials.api_key.as_ref())
        {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

/// Query-string form of a filter value.
fn param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eq_pairs(filters: &Conditions) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|(column, value)| (column.clone(), format!("eq.{}", param(value))))
        .collect()
}

fn in_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn select(&self, table: &str, filters: &Conditions) -> Result<Vec<Record>, RemoteError> {
        let url = self.table_url(table)?;
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(eq_pairs(filters));

        let body: Value = self
            .retry
            .run("remote select", || async {
                let response = self.send(self.http.get(url.clone()).query(&query)).await?;
                Ok::<_, RemoteError>(response.json::<Value>().await?)
            })
            .await?;

        let Value::Array(items) = body else {
            return Err(RemoteError::Malformed(format!(
                "expected an array of rows from '{table}'"
            )));
        };
        let rows = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect::<Vec<_>>();
        tracing::debug!(table, rows = rows.len(), "remote select");
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: &[Record],
        conflict_column: &str,
    ) -> Result<(), RemoteError> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = self.table_url(table)?;
        self.retry
            .run("remote upsert", || async {
                self.send(
                    self.http
                        .post(url.clone())
                        .query(&[("on_conflict", conflict_column)])
                        .header("Prefer", "resolution=merge-duplicates,return=minimal")
                        .json(rows),
                )
                .await
                .map(drop)
            })
            .await?;
        tracing::debug!(table, rows = rows.len(), "remote upsert");
        Ok(())
    }

    async fn delete(
        &self,
        table: &str,
        key_column: &str,
        ids: &[String],
        scope: &Conditions,
    ) -> Result<(), RemoteError> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = self.table_url(table)?;
        let mut query = vec![(key_column.to_string(), in_list(ids))];
        query.extend(eq_pairs(scope));

        self.retry
            .run("remote delete", || async {
                self.send(self.http.delete(url.clone()).query(&query))
                    .await
                    .map(drop)
            })
            .await?;
        tracing::debug!(table, ids = ids.len(), "remote delete");
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for RestRemote {
    async fn current_identity(&self) -> Result<Option<String>, RemoteError> {
        if self.credentials.access_token.is_none() {
            return Ok(None);
        }
        let url = self.endpoint("auth/v1/user")?;
        let response = self.send(self.http.get(url)).await?;
        let user: Value = response.json().await?;
        Ok(user
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn remote(server: &mockito::Server, access_token: Option<&str>) -> RestRemote {
        let config = RemoteConfig {
            url: server.url(),
            timeout_secs: 5,
        };
        let credentials = RemoteCredentials {
            api_key: Some("anon-key".into()),
            access_token: access_token.map(str::to_string),
        };
        RestRemote::new(&config, credentials, RetryPolicy::none()).unwrap()
    }

    #[tokio::test]
    async fn select_sends_eq_filters_and_auth_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/jobs")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("select".into(), "*".into()),
                Matcher::UrlEncoded("user_id".into(), "eq.tenant-1".into()),
                Matcher::UrlEncoded("client_id".into(), "eq.C1".into()),
            ]))
            .match_header("apikey", "anon-key")
            .match_header("authorization", "Bearer user-token")
            .with_status(200)
            .with_body(r#"[{"id":"J1","client_id":"C1"},{"id":"J2","client_id":"C1"}]"#)
            .create_async()
            .await;

        let rows = remote(&server, Some("user-token"))
            .select(
                "jobs",
                &[
                    ("user_id".into(), json!("tenant-1")),
                    ("client_id".into(), json!("C1")),
                ],
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "J1");
    }

    #[tokio::test]
    async fn select_rejects_non_array_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/jobs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"message":"nope"}"#)
            .create_async()
            .await;

        let err = remote(&server, None).select("jobs", &[]).await.unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
    }

    #[tokio::test]
    async fn upsert_posts_batch_with_merge_preference() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/clients")
            .match_query(Matcher::UrlEncoded("on_conflict".into(), "id".into()))
            .match_header("prefer", Matcher::Regex("resolution=merge-duplicates".into()))
            .match_body(Matcher::Json(json!([
                {"id": "C1", "name": "Acme", "user_id": "t"},
                {"id": "C2", "name": "Globex", "user_id": "t"}
            ])))
            .with_status(201)
            .create_async()
            .await;

        let rows: Vec<Record> = vec![
            json!({"id": "C1", "name": "Acme", "user_id": "t"}),
            json!({"id": "C2", "name": "Globex", "user_id": "t"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();

        remote(&server, Some("tok"))
            .upsert("clients", &rows, "id")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upsert_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rest/v1/clients")
            .match_query(Matcher::Any)
            .with_status(409)
            .with_body("duplicate key")
            .create_async()
            .await;

        let row = json!({"id": "C1"}).as_object().cloned().unwrap();
        let err = remote(&server, None)
            .upsert("clients", &[row], "id")
            .await
            .unwrap_err();
        match err {
            RemoteError::Http { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "duplicate key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn delete_uses_in_list_and_scope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/rest/v1/jobs")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), r#"in.("J1","J2")"#.into()),
                Matcher::UrlEncoded("user_id".into(), "eq.t".into()),
            ]))
            .with_status(204)
            .create_async()
            .await;

        remote(&server, Some("tok"))
            .delete(
                "jobs",
                "id",
                &["J1".into(), "J2".into()],
                &[("user_id".into(), json!("t"))],
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_batches_make_no_requests() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let remote = remote(&server, None);
        remote.delete("jobs", "id", &[], &[]).await.unwrap();
        remote.upsert("jobs", &[], "id").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn session_identity_comes_from_auth_endpoint() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/auth/v1/user")
            .match_header("authorization", "Bearer user-token")
            .with_status(200)
            .with_body(r#"{"id":"tenant-42","email":"owner@example.com"}"#)
            .create_async()
            .await;

        let identity = remote(&server, Some("user-token"))
            .current_identity()
            .await
            .unwrap();
        assert_eq!(identity.as_deref(), Some("tenant-42"));
    }

    #[tokio::test]
    async fn session_without_token_is_anonymous() {
        let server = mockito::Server::new_async().await;
        let identity = remote(&server, None).current_identity().await.unwrap();
        assert!(identity.is_none());
    }

    #[test]
    fn in_list_quotes_values() {
        assert_eq!(in_list(&["a".into(), "b,c".into()]), r#"in.("a","b,c")"#);
    }
}
