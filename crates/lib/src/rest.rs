//! REST calls on the HTTP API, made with the raw [`HttpClient`].
//!
//! Non-success statuses are logged and the response is still returned; only
//! transport failures are errors.

use serde::Serialize;
use serde_json::{json, Value};

use crate::gateway::model::{AuthorizedUser, CreateMessage, MessageReference};
use crate::http::{Headers, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, Url};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Interaction callback types.
pub const INTERACTION_PONG: u8 = 1;
pub const INTERACTION_CHANNEL_MESSAGE: u8 = 4;

const COMPONENT_BUTTON: u8 = 2;
const BUTTON_SECONDARY: u8 = 2;

/// Secondary-style button component.
pub fn button(label: &str, custom_id: Option<&str>) -> Value {
    json!({
        "type": COMPONENT_BUTTON,
        "style": BUTTON_SECONDARY,
        "label": label,
        "custom_id": custom_id,
    })
}

#[derive(Debug, Clone)]
pub struct RestClient {
    api_base: String,
    http: HttpClient,
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE, HttpClient::default())
    }
}

impl RestClient {
    pub fn new(api_base: impl Into<String>, http: HttpClient) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn url(&self, path: &str) -> Result<Url, HttpError> {
        Url::parse(&format!("{}{}", self.api_base, path))
    }

    async fn post_json<T: Serialize>(
        &self,
        path: &str,
        headers: Headers,
        body: &T,
        expected: &[u16],
    ) -> Result<HttpResponse, HttpError> {
        let request = HttpRequest::new(HttpMethod::Post, self.url(path)?)
            .with_headers(headers)
            .with_json(body)?;
        let response = self.http.request(&request).await?;
        log_unexpected(&request, &response, expected);
        Ok(response)
    }

    /// Post `content` to a channel, optionally as a reply and with components.
    pub async fn send_message(
        &self,
        user: &AuthorizedUser,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
        components: Vec<Value>,
    ) -> Result<HttpResponse, HttpError> {
        let body = CreateMessage {
            content: content.to_string(),
            message_reference: reply_to.map(MessageReference::to_message),
            components,
        };
        let headers: Headers = [("Authorization", user.authorization())].into_iter().collect();
        self.post_json(
            &format!("/channels/{}/messages", channel_id),
            headers,
            &body,
            &[200, 204],
        )
        .await
    }

    pub async fn delete_message(
        &self,
        user: &AuthorizedUser,
        channel_id: &str,
        message_id: &str,
    ) -> Result<HttpResponse, HttpError> {
        let request = HttpRequest::new(
            HttpMethod::Delete,
            self.url(&format!("/channels/{}/messages/{}", channel_id, message_id))?,
        )
        .with_header("Authorization", user.authorization());
        let response = self.http.request(&request).await?;
        log_unexpected(&request, &response, &[204]);
        Ok(response)
    }

    /// Answer an interaction with an arbitrary callback payload.
    pub async fn send_interaction_response(
        &self,
        payload: &Value,
        interaction_id: &str,
        interaction_token: &str,
    ) -> Result<HttpResponse, HttpError> {
        self.post_json(
            &format!("/interactions/{}/{}/callback", interaction_id, interaction_token),
            Headers::new(),
            payload,
            &[200, 204],
        )
        .await
    }

    pub async fn send_interaction_text_response(
        &self,
        content: &str,
        interaction_id: &str,
        interaction_token: &str,
    ) -> Result<HttpResponse, HttpError> {
        let payload = json!({
            "type": INTERACTION_CHANNEL_MESSAGE,
            "data": {"content": content},
        });
        self.send_interaction_response(&payload, interaction_id, interaction_token)
            .await
    }

    /// Acknowledge an interaction without replying.
    pub async fn send_interaction_ack(
        &self,
        interaction_id: &str,
        interaction_token: &str,
    ) -> Result<HttpResponse, HttpError> {
        let payload = json!({ "type": INTERACTION_PONG });
        self.send_interaction_response(&payload, interaction_id, interaction_token)
            .await
    }
}

fn log_unexpected(request: &HttpRequest, response: &HttpResponse, expected: &[u16]) {
    if !expected.contains(&response.status_code) {
        log::warn!(
            "rest: {} {} returned {} {}: {}",
            request.method,
            request.url.route,
            response.status_code,
            response.reason,
            response.text()
        );
    }
}
