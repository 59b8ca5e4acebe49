//! REST client for the `/messaging` endpoints.
//!
//! `MessagingApi` is the seam between the messaging core and the backend;
//! `HttpMessagingApi` is the reqwest implementation.

use async_trait::async_trait;
use reqwest::{multipart, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use cm_proto::api::{ConversationPreview, ErrorResponse, RecipientProfile, SendMessageRequest, UserSummary};
use cm_proto::{MessageId, MessageType, RoomId, WireMessage};

use crate::error::ChatError;

/// File upload after the caption has been encrypted. File bytes travel as-is.
#[derive(Debug, Clone)]
pub struct EncryptedUpload {
    pub room_id: RoomId,
    pub message_type: MessageType,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Envelope string of the caption.
    pub content: String,
}

#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn recent_conversations(&self) -> Result<Vec<ConversationPreview>, ChatError>;
    async fn users(&self) -> Result<Vec<UserSummary>, ChatError>;
    async fn room_history(&self, room: &RoomId) -> Result<Vec<WireMessage>, ChatError>;
    async fn send_message(&self, room: &RoomId, request: &SendMessageRequest) -> Result<(), ChatError>;
    async fn upload_file(&self, upload: EncryptedUpload) -> Result<(), ChatError>;
    async fn mark_read(&self, message: &MessageId) -> Result<(), ChatError>;
    async fn mark_all_read(&self, room: &RoomId) -> Result<(), ChatError>;
    async fn recipient_profile(&self, room: &RoomId) -> Result<RecipientProfile, ChatError>;
}

/// Lists arrive either bare or wrapped in an object, depending on the route.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "messages", alias = "conversations", alias = "users")]
        data: Vec<T>,
    },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(items) | Listing::Wrapped { data: items } => items,
        }
    }
}

#[derive(Clone)]
pub struct HttpMessagingApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpMessagingApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cm-chat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/messaging/{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChatError> {
        let res = self.authorize(self.client.get(self.url(path))).send().await?;
        Ok(check(res).await?.json().await?)
    }

    async fn post_empty(&self, path: &str) -> Result<(), ChatError> {
        let res = self.authorize(self.client.post(self.url(path))).send().await?;
        check(res).await?;
        Ok(())
    }
}

async fn check(res: Response) -> Result<Response, ChatError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let detail = res
        .json::<ErrorResponse>()
        .await
        .map(|body| body.error)
        .unwrap_or_default();
    if detail.is_empty() {
        Err(ChatError::Fetch(format!("server returned {status}")))
    } else {
        Err(ChatError::Fetch(format!("server returned {status}: {detail}")))
    }
}

#[async_trait]
impl MessagingApi for HttpMessagingApi {
    async fn recent_conversations(&self) -> Result<Vec<ConversationPreview>, ChatError> {
        Ok(self.get_json::<Listing<_>>("recent").await?.into_vec())
    }

    async fn users(&self) -> Result<Vec<UserSummary>, ChatError> {
        Ok(self.get_json::<Listing<_>>("users").await?.into_vec())
    }

    async fn room_history(&self, room: &RoomId) -> Result<Vec<WireMessage>, ChatError> {
        let path = format!("messages/{room}");
        Ok(self.get_json::<Listing<_>>(&path).await?.into_vec())
    }

    async fn send_message(&self, room: &RoomId, request: &SendMessageRequest) -> Result<(), ChatError> {
        let res = self
            .authorize(self.client.post(self.url(&format!("messages/{room}"))))
            .json(request)
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn upload_file(&self, upload: EncryptedUpload) -> Result<(), ChatError> {
        let mut part = multipart::Part::bytes(upload.bytes).file_name(upload.file_name);
        if let Some(mime) = upload.mime_type.as_deref() {
            part = part
                .mime_str(mime)
                .map_err(|e| ChatError::Validation(format!("mime type {mime:?}: {e}")))?;
        }
        let form = multipart::Form::new()
            .part("file", part)
            .text("roomId", upload.room_id.to_string())
            .text("type", upload.message_type.as_str())
            .text("content", upload.content);

        let res = self
            .authorize(self.client.post(self.url("upload")))
            .multipart(form)
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn mark_read(&self, message: &MessageId) -> Result<(), ChatError> {
        self.post_empty(&format!("read/{message}")).await
    }

    async fn mark_all_read(&self, room: &RoomId) -> Result<(), ChatError> {
        self.post_empty(&format!("read-all/{room}")).await
    }

    async fn recipient_profile(&self, room: &RoomId) -> Result<RecipientProfile, ChatError> {
        self.get_json(&format!("recipient/{room}")).await
    }
}
