//! LiveKit room service client.
//!
//! Talks to the server API over Twirp/JSON:
//! `POST {base}/twirp/livekit.RoomService/{Method}` with a JSON body and an
//! HS256 bearer token minted from the API key and secret.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::LiveKitSettings;
use crate::error::RoomError;

/// Lifetime of a minted access token, in seconds.
const TOKEN_TTL_SECS: i64 = 600;

/// A cached token is replaced this many seconds before it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

const ROOM_SERVICE: &str = "twirp/livekit.RoomService";

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    nbf: i64,
    exp: i64,
    video: VideoGrant<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoGrant<'a> {
    room_admin: bool,
    room: &'a str,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

#[derive(Debug, Serialize)]
struct UpdateRoomMetadataRequest<'a> {
    room: &'a str,
    metadata: &'a str,
}

#[derive(Debug, Serialize)]
struct RemoveParticipantRequest<'a> {
    room: &'a str,
    identity: &'a str,
}

/// Client for one room.
#[derive(Debug)]
pub struct RoomClient {
    http: Client,
    base_url: String,
    room: String,
    api_key: String,
    api_secret: String,
    identity: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

impl RoomClient {
    pub fn new(
        base_url: impl Into<String>,
        room: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RoomError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            room: room.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            identity: None,
            token: Mutex::new(None),
        })
    }

    pub fn from_settings(settings: &LiveKitSettings) -> Result<Self, RoomError> {
        let client = Self::new(
            settings.base_url(),
            settings.room.clone(),
            settings.api_key.clone(),
            settings.api_secret.clone(),
            settings.request_timeout,
        )?;
        Ok(client.with_identity(settings.identity.clone()))
    }

    /// Broadcaster participant released by [`remove_participant`](Self::remove_participant).
    pub fn with_identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity.filter(|id| !id.is_empty());
        self
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Replace the room's metadata.
    pub async fn update_room_metadata(&self, metadata: &str) -> Result<(), RoomError> {
        let request = UpdateRoomMetadataRequest {
            room: &self.room,
            metadata,
        };
        self.call("UpdateRoomMetadata", &request).await
    }

    /// Disconnect a participant from the room.
    pub async fn remove_participant(&self, identity: &str) -> Result<(), RoomError> {
        let request = RemoveParticipantRequest {
            room: &self.room,
            identity,
        };
        self.call("RemoveParticipant", &request).await
    }

    async fn call<B: Serialize>(&self, method: &str, body: &B) -> Result<(), RoomError> {
        let url = format!("{}/{}/{}", self.base_url, ROOM_SERVICE, method);
        let token = self.token()?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RoomError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(method, room = %self.room, "room service call succeeded");
        Ok(())
    }

    fn token(&self) -> Result<String, RoomError> {
        self.token_at(Utc::now().timestamp())
    }

    /// Cached token, minting a new one when it is about to expire.
    fn token_at(&self, now: i64) -> Result<String, RoomError> {
        let mut cached = self.token.lock();
        if let Some(token) = cached.as_ref() {
            if now < token.expires_at - TOKEN_REFRESH_MARGIN_SECS {
                return Ok(token.token.clone());
            }
        }

        let expires_at = now + TOKEN_TTL_SECS;
        let claims = Claims {
            iss: &self.api_key,
            nbf: now,
            exp: expires_at,
            video: VideoGrant {
                room_admin: true,
                room: &self.room,
            },
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.api_secret.as_bytes()),
        )?;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}
