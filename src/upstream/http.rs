//! HTTP implementation of the upstream seam.
//!
//! Requests go to the v1.1 search/lookup/timeline endpoints, authorized
//! either with an OAuth1-signed user context or an application-only bearer
//! token. Sessions are cheap: a connection failure rebuilds the underlying
//! client and retries from the caller.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use crate::error::{UpstreamError, UpstreamResult};

use super::credentials::{AppSecrets, UserToken};
use super::oauth::OAuth1Signer;
use super::{SearchBackend, SearchRequest, TimelineRequest, UpstreamPage};

const SEARCH_URL: &str = "https://api.twitter.com/1.1/search/tweets.json";
const LOOKUP_URL: &str = "https://api.twitter.com/1.1/users/lookup.json";
const TIMELINE_URL: &str = "https://api.twitter.com/1.1/statuses/user_timeline.json";

/// Backend speaking to the real upstream API.
pub struct HttpBackend {
    client: Mutex<reqwest::Client>,
    secrets: AppSecrets,
    user: Option<UserToken>,
}

impl HttpBackend {
    /// Open a session: user-context when a token is supplied,
    /// application-only otherwise.
    pub fn connect(secrets: AppSecrets, user: Option<UserToken>) -> Self {
        HttpBackend {
            client: Mutex::new(Self::build_client(&secrets)),
            secrets,
            user,
        }
    }

    fn build_client(secrets: &AppSecrets) -> reqwest::Client {
        reqwest::Client::builder()
            .user_agent(secrets.user_agent.clone())
            .gzip(true)
            .build()
            .unwrap_or_default()
    }

    fn signer(&self) -> Option<OAuth1Signer> {
        self.user.as_ref().map(|user| OAuth1Signer {
            consumer_key: self.secrets.consumer_key.clone(),
            consumer_secret: self.secrets.consumer_secret.clone(),
            token: user.oauth_token.clone(),
            token_secret: user.oauth_token_secret.clone(),
        })
    }

    /// Authorization header for a request: OAuth1 with a user context,
    /// bearer without one.
    fn auth_header(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
    ) -> UpstreamResult<String> {
        if let Some(signer) = self.signer() {
            return Ok(signer.authorization_header(method, url, params));
        }
        match &self.secrets.bearer_token {
            Some(token) => Ok(format!("Bearer {token}")),
            None => Err(UpstreamError::Auth(
                "no user token and no bearer token configured".into(),
            )),
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        params: Vec<(String, String)>,
    ) -> UpstreamResult<UpstreamPage> {
        let auth = self.auth_header(method.as_str(), url, &params)?;
        let client = self
            .client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let request = if method == reqwest::Method::GET {
            client.get(url).query(&params)
        } else {
            client.post(url).form(&params)
        };
        let response = request
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str::<Value>(&text).ok();
        Ok(UpstreamPage { status, body })
    }
}

#[async_trait]
impl SearchBackend for HttpBackend {
    async fn search(&self, req: &SearchRequest) -> UpstreamResult<UpstreamPage> {
        let mut params: Vec<(String, String)> = vec![
            ("q".into(), req.query.clone()),
            ("result_type".into(), "recent".into()),
            ("lang".into(), req.lang.clone()),
            ("count".into(), req.count.to_string()),
        ];
        for (k, v) in &req.filters {
            params.push((k.clone(), v.clone()));
        }
        if let Some(max_id) = req.max_id {
            params.push(("max_id".into(), max_id.to_string()));
        }
        if let Some(since_id) = req.since_id {
            params.push(("since_id".into(), since_id.to_string()));
        }
        self.request(reqwest::Method::GET, SEARCH_URL, params).await
    }

    async fn lookup_users(&self, ids: &[String]) -> UpstreamResult<Value> {
        let params = vec![
            ("user_id".into(), ids.join(",")),
            ("include_entities".into(), "false".into()),
        ];
        let page = self
            .request(reqwest::Method::POST, LOOKUP_URL, params)
            .await?;
        match page.body {
            Some(body) if page.status == 200 => Ok(body),
            Some(_) => Err(UpstreamError::Status(page.status)),
            None => Err(UpstreamError::MalformedJson { attempts: 1 }),
        }
    }

    async fn user_timeline(&self, req: &TimelineRequest) -> UpstreamResult<UpstreamPage> {
        let mut params: Vec<(String, String)> = vec![
            ("result_type".into(), "recent".into()),
            ("count".into(), req.count.to_string()),
        ];
        if req.by_screen_name {
            params.push(("screen_name".into(), req.user.clone()));
        } else {
            params.push(("user_id".into(), req.user.clone()));
        }
        if let Some(max_id) = req.max_id {
            params.push(("max_id".into(), max_id.to_string()));
        }
        if let Some(since_id) = req.since_id {
            params.push(("since_id".into(), since_id.to_string()));
        }
        self.request(reqwest::Method::GET, TIMELINE_URL, params)
            .await
    }

    async fn reconnect(&self) -> UpstreamResult<()> {
        let fresh = Self::build_client(&self.secrets);
        *self
            .client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
        Ok(())
    }
}
