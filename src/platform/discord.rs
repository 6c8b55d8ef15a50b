//! Discord REST client.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::error::{PlatformError, RateLimitScope};
use super::retry::parse_retry_after;
use super::traits::{ChatPlatform, GuildRole};

/// Channel type of one-to-one direct messages.
const DM_CHANNEL_TYPE: u64 = 1;
/// Minutes of inactivity before a submission thread is archived.
const THREAD_AUTO_ARCHIVE_MINUTES: u32 = 1440;

pub struct DiscordClient {
    token: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct Member {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Deserialize)]
struct Channel {
    #[serde(rename = "type")]
    kind: u64,
    name: Option<String>,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_base))
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, PlatformError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(error_from_response(resp).await)
    }
}

/// Map a non-success response to a platform error.
async fn error_from_response(resp: Response) -> PlatformError {
    let status = resp.status();
    let header_scope = resp
        .headers()
        .get("x-ratelimit-scope")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let header_retry = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok());
    let body = resp.text().await.unwrap_or_default();

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let parsed: Option<RateLimitBody> = serde_json::from_str(&body).ok();
            let retry_after = parsed
                .as_ref()
                .and_then(|b| b.retry_after)
                .or(header_retry)
                .and_then(parse_retry_after);
            let global = parsed.as_ref().is_some_and(|b| b.global)
                || header_scope.as_deref() == Some("global");
            PlatformError::RateLimited {
                retry_after,
                scope: if global {
                    RateLimitScope::Global
                } else {
                    RateLimitScope::Local
                },
            }
        }
        StatusCode::FORBIDDEN => PlatformError::Forbidden(body),
        StatusCode::NOT_FOUND => PlatformError::NotFound(body),
        _ => PlatformError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String, PlatformError> {
        let resp = self
            .execute(
                self.request(Method::POST, &format!("/channels/{channel_id}/messages"))
                    .json(&json!({ "content": content })),
            )
            .await?;
        let msg: IdOnly = resp.json().await?;
        Ok(msg.id)
    }

    async fn add_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        let emoji = urlencoding::encode(emoji);
        self.execute(self.request(
            Method::PUT,
            &format!("/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me"),
        ))
        .await?;
        Ok(())
    }

    async fn list_roles(&self, guild_id: &str) -> Result<Vec<GuildRole>, PlatformError> {
        #[derive(Deserialize)]
        struct Role {
            id: String,
            name: String,
        }
        let resp = self
            .execute(self.request(Method::GET, &format!("/guilds/{guild_id}/roles")))
            .await?;
        let roles: Vec<Role> = resp.json().await?;
        Ok(roles
            .into_iter()
            .map(|r| GuildRole {
                id: r.id,
                name: r.name,
            })
            .collect())
    }

    async fn member_roles(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, PlatformError> {
        let resp = self
            .execute(self.request(
                Method::GET,
                &format!("/guilds/{guild_id}/members/{user_id}"),
            ))
            .await?;
        let member: Member = resp.json().await?;
        Ok(member.roles)
    }

    async fn grant_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), PlatformError> {
        self.execute(self.request(
            Method::PUT,
            &format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
        ))
        .await?;
        Ok(())
    }

    async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String, PlatformError> {
        let resp = self
            .execute(
                self.request(
                    Method::POST,
                    &format!("/channels/{channel_id}/messages/{message_id}/threads"),
                )
                .json(&json!({
                    "name": name,
                    "auto_archive_duration": THREAD_AUTO_ARCHIVE_MINUTES,
                })),
            )
            .await?;
        let thread: IdOnly = resp.json().await?;
        Ok(thread.id)
    }

    async fn channel_name(&self, channel_id: &str) -> Result<Option<String>, PlatformError> {
        let resp = self
            .execute(self.request(Method::GET, &format!("/channels/{channel_id}")))
            .await?;
        let channel: Channel = resp.json().await?;
        if channel.kind == DM_CHANNEL_TYPE {
            return Ok(None);
        }
        Ok(channel.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> DiscordClient {
        DiscordClient::new("tok", server.uri())
    }

    #[tokio::test]
    async fn send_message_posts_content_with_bot_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/c1/messages"))
            .and(header("Authorization", "Bot tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m42" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).await.send_message("c1", "hi").await.unwrap();
        assert_eq!(id, "m42");
    }

    #[tokio::test]
    async fn rate_limit_body_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/c1/messages"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(json!({ "retry_after": 1.5, "global": true })),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .send_message("c1", "hi")
            .await
            .unwrap_err();
        match err {
            PlatformError::RateLimited { retry_after, scope } => {
                assert_eq!(retry_after, Some(Duration::from_millis(1500)));
                assert_eq!(scope, RateLimitScope::Global);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_retry_after_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/c1/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 1e20 })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .send_message("c1", "hi")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlatformError::RateLimited {
                retry_after: None,
                scope: RateLimitScope::Local,
            }
        ));
    }

    #[tokio::test]
    async fn local_rate_limit_falls_back_to_header() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/guilds/g1/members/u1/roles/r1"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "3")
                    .insert_header("x-ratelimit-scope", "user"),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .grant_role("g1", "u1", "r1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlatformError::RateLimited {
                retry_after: Some(d),
                scope: RateLimitScope::Local,
            } if d == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn forbidden_grant_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/guilds/g1/members/u1/roles/r1"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Missing Permissions"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .grant_role("g1", "u1", "r1")
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Forbidden(_)));
    }

    #[tokio::test]
    async fn member_roles_and_dm_channels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/g1/members/u1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "roles": ["r1", "r2"] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/dm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "type": 1 })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/c1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "type": 0, "name": "admission-forms" })),
            )
            .mount(&server)
            .await;

        let c = client(&server).await;
        assert_eq!(c.member_roles("g1", "u1").await.unwrap(), vec!["r1", "r2"]);
        assert_eq!(c.channel_name("dm").await.unwrap(), None);
        assert_eq!(
            c.channel_name("c1").await.unwrap().as_deref(),
            Some("admission-forms")
        );
    }
}
