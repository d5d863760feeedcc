//! Broadcast session teardown.

use async_trait::async_trait;
use tracing::debug;

use crate::error::RoomError;
use crate::livekit::RoomClient;

/// Releases the live session held by the broadcaster. Called once, during
/// shutdown.
#[async_trait]
pub trait SessionRelease: Send + Sync {
    async fn release(&self) -> Result<(), RoomError>;
}

/// Disconnects the configured broadcaster participant from the room.
///
/// Without a configured identity there is nothing to release.
#[async_trait]
impl SessionRelease for RoomClient {
    async fn release(&self) -> Result<(), RoomError> {
        match self.identity() {
            Some(identity) => self.remove_participant(identity).await,
            None => {
                debug!(room = %self.room(), "no broadcaster identity configured");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_removes_broadcaster() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/twirp/livekit.RoomService/RemoveParticipant")
                    .json_body(json!({"room": "car", "identity": "car-cam"}));
                then.status(200).json_body(json!({}));
            })
            .await;

        let timeout = Duration::from_secs(2);
        let client = RoomClient::new(server.base_url(), "car", "key", "secret", timeout)
            .unwrap()
            .with_identity(Some("car-cam".to_string()));
        client.release().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_release_without_identity_is_noop() {
        let timeout = Duration::from_millis(100);
        let client =
            RoomClient::new("http://127.0.0.1:9", "car", "key", "secret", timeout).unwrap();
        tokio_test::assert_ok!(client.release().await);
    }
}
