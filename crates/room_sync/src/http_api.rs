//! REST collaborator seam. The engine only ever sees `ChatBackend`; the
//! production implementation talks to the marketplace API over `reqwest`
//! with the session token as a bearer credential.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{MessageId, RoomId},
    error::{ApiError, ApiException},
    protocol::{
        EditMessageBody, MarkReadResponse, MessageRecord, PinBody, ReactBody, ReactionEntry,
        RoomSnapshot, SendMessageBody,
    },
};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn fetch_snapshot(&self, room_id: RoomId) -> Result<RoomSnapshot>;
    async fn mark_read(&self, room_id: RoomId) -> Result<MarkReadResponse>;
    async fn send_message(&self, body: SendMessageBody) -> Result<MessageRecord>;
    async fn edit_message(
        &self,
        message_id: MessageId,
        body: EditMessageBody,
    ) -> Result<MessageRecord>;
    async fn delete_message(&self, message_id: MessageId) -> Result<()>;
    async fn set_reaction(
        &self,
        message_id: MessageId,
        body: ReactBody,
    ) -> Result<Vec<ReactionEntry>>;
    async fn pin_message(&self, message_id: MessageId, body: PinBody) -> Result<()>;
    async fn pin_room(&self, room_id: RoomId, body: PinBody) -> Result<()>;
}

pub struct HttpChatBackend {
    http: Client,
    server_url: String,
    token: String,
}

impl HttpChatBackend {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url.trim_end_matches('/'))
    }
}

/// Map non-2xx responses into a structured `ApiException` when the server
/// sent one, so mutation rollbacks can surface the user-facing detail.
async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if let Ok(api) = serde_json::from_str::<ApiError>(&body) {
        return Err(ApiException::from(api).into());
    }
    Err(anyhow!("chat api returned {status}: {body}"))
}

async fn checked_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    Ok(checked(response).await?.json().await?)
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn fetch_snapshot(&self, room_id: RoomId) -> Result<RoomSnapshot> {
        let response = self
            .http
            .get(self.url(&format!("/rooms/{}/messages", room_id.0)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        checked_json(response).await
    }

    async fn mark_read(&self, room_id: RoomId) -> Result<MarkReadResponse> {
        let response = self
            .http
            .post(self.url(&format!("/rooms/{}/read", room_id.0)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        checked_json(response).await
    }

    async fn send_message(&self, body: SendMessageBody) -> Result<MessageRecord> {
        let response = self
            .http
            .post(self.url(&format!("/rooms/{}/messages", body.room_id.0)))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        checked_json(response).await
    }

    async fn edit_message(
        &self,
        message_id: MessageId,
        body: EditMessageBody,
    ) -> Result<MessageRecord> {
        let response = self
            .http
            .post(self.url(&format!("/messages/{}/edit", message_id.0)))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        checked_json(response).await
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/messages/{}/delete", message_id.0)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        checked(response).await?;
        Ok(())
    }

    async fn set_reaction(
        &self,
        message_id: MessageId,
        body: ReactBody,
    ) -> Result<Vec<ReactionEntry>> {
        let response = self
            .http
            .post(self.url(&format!("/messages/{}/reactions", message_id.0)))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        checked_json(response).await
    }

    async fn pin_message(&self, message_id: MessageId, body: PinBody) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/messages/{}/pin", message_id.0)))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        checked(response).await?;
        Ok(())
    }

    async fn pin_room(&self, room_id: RoomId, body: PinBody) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/rooms/{}/pin", room_id.0)))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        checked(response).await?;
        Ok(())
    }
}
