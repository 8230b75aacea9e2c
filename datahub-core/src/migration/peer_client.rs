use super::{PeerChannelClient, replicated_hash};
use crate::content::{ChannelConfig, Content, ContentKey};
use crate::{HubError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LANGUAGE, CONTENT_TYPE, HeaderMap, LOCATION};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const CREATION_DATE: &str = "Creation-Date";
const USER: &str = "User";

/// [`PeerChannelClient`] speaking the hub's REST interface.
///
/// Redirects are not followed: the peer answers `latest` with a redirect whose
/// `Location` carries the sequence.
#[derive(Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Option<Response>> {
        let response = request.send().await.map_err(|error| {
            HubError::PeerUnreachable(format!("request to {} failed: {}", url, error))
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status().is_server_error() || response.status().is_client_error() {
            return Err(HubError::PeerUnreachable(format!(
                "peer answered {} for {}",
                response.status(),
                url
            )));
        }
        Ok(Some(response))
    }
}

#[async_trait]
impl PeerChannelClient for HttpPeerClient {
    async fn get_configuration(&self, channel_url: &str) -> Result<ChannelConfig> {
        let response = self
            .send(self.client.get(channel_url), channel_url)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("peer channel {}", channel_url)))?;

        let body = response.text().await.map_err(|error| {
            HubError::PeerUnreachable(format!("reading {} failed: {}", channel_url, error))
        })?;
        let config: ChannelConfig = serde_json::from_str(&body).map_err(|error| {
            HubError::PeerConfigInvalid(format!("unable to parse config of {}: {}", channel_url, error))
        })?;
        tracing::info!("Found config {:?} at {}", config, channel_url);
        Ok(config)
    }

    async fn get_latest_sequence(&self, channel_url: &str) -> Result<Option<u64>> {
        let url = format!("{}latest", channel_url);
        let Some(response) = self.send(self.client.get(&url), &url).await? else {
            return Ok(None);
        };

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                HubError::PeerConfigInvalid(format!("{} answered without a location", url))
            })?;
        sequence_from_location(location).map(Some).ok_or_else(|| {
            HubError::PeerConfigInvalid(format!("unexpected latest location {}", location))
        })
    }

    async fn get_creation_time(
        &self,
        channel_url: &str,
        sequence: u64,
    ) -> Result<Option<DateTime<Utc>>> {
        let url = format!("{}{}", channel_url, sequence);
        let Some(response) = self.send(self.client.head(&url), &url).await? else {
            return Ok(None);
        };
        Ok(creation_time(response.headers()))
    }

    async fn get_content(&self, channel_url: &str, sequence: u64) -> Result<Option<Content>> {
        let url = format!("{}{}", channel_url, sequence);
        let Some(response) = self.send(self.client.get(&url), &url).await? else {
            return Ok(None);
        };

        // The key of a migrated item must not depend on when it was fetched.
        let headers = response.headers().clone();
        let created = creation_time(&headers).ok_or_else(|| {
            HubError::PeerConfigInvalid(format!("{} answered without a creation date", url))
        })?;

        let data = response.bytes().await.map_err(|error| {
            HubError::PeerUnreachable(format!("reading {} failed: {}", url, error))
        })?;

        let mut builder = Content::builder()
            .key(ContentKey::with_time(created, replicated_hash(sequence)))
            .data(data);
        if let Some(value) = header_str(&headers, CONTENT_TYPE.as_str()) {
            builder = builder.content_type(value);
        }
        if let Some(value) = header_str(&headers, CONTENT_LANGUAGE.as_str()) {
            builder = builder.content_language(value);
        }
        if let Some(value) = header_str(&headers, USER) {
            builder = builder.user(value);
        }
        Ok(Some(builder.build()))
    }

    async fn list_channels(&self, base_url: &str) -> Result<Vec<String>> {
        let url = format!("{}/channel", base_url.trim_end_matches('/'));
        let Some(response) = self.send(self.client.get(&url), &url).await? else {
            return Ok(Vec::new());
        };
        let body = response.text().await.map_err(|error| {
            HubError::PeerUnreachable(format!("reading {} failed: {}", url, error))
        })?;
        parse_channel_listing(&body)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn sequence_from_location(location: &str) -> Option<u64> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
}

/// Accepts epoch millis or RFC 3339.
fn parse_creation_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp_millis(millis);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

fn creation_time(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    header_str(headers, CREATION_DATE).and_then(parse_creation_date)
}

#[derive(Deserialize)]
struct ChannelListing {
    #[serde(rename = "_links")]
    links: ChannelLinks,
}

#[derive(Deserialize)]
struct ChannelLinks {
    #[serde(default)]
    channels: Vec<ChannelLink>,
}

#[derive(Deserialize)]
struct ChannelLink {
    name: String,
}

fn parse_channel_listing(body: &str) -> Result<Vec<String>> {
    let listing: ChannelListing = serde_json::from_str(body).map_err(|error| {
        HubError::PeerConfigInvalid(format!("unable to parse channel listing: {}", error))
    })?;
    Ok(listing
        .links
        .channels
        .into_iter()
        .map(|channel| channel.name)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path as AxumPath;
    use axum::http::{HeaderName, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_sequence_from_location() {
        assert_eq!(
            sequence_from_location("http://peer/channel/UHF/1234"),
            Some(1234)
        );
        assert_eq!(sequence_from_location("http://peer/channel/UHF/77/"), Some(77));
        assert_eq!(sequence_from_location("http://peer/channel/UHF/latest"), None);
    }

    #[test]
    fn test_creation_date_formats() {
        assert_eq!(
            parse_creation_date("12345").map(|t| t.timestamp_millis()),
            Some(12345)
        );
        assert_eq!(
            parse_creation_date("2015-01-23T21:11:19.407Z").map(|t| t.timestamp_millis()),
            Some(1_422_047_479_407)
        );
        assert!(parse_creation_date("yesterday").is_none());

        let mut headers = HeaderMap::new();
        assert!(creation_time(&headers).is_none());
        headers.insert(CREATION_DATE, HeaderValue::from_static("1000"));
        assert_eq!(creation_time(&headers).map(|t| t.timestamp_millis()), Some(1000));
    }

    #[test]
    fn test_channel_listing() {
        let body = r#"{"_links":{"self":{"href":"http://peer/channel"},"channels":[
            {"name":"UHF","href":"http://peer/channel/UHF"},
            {"name":"VHF","href":"http://peer/channel/VHF"}]}}"#;
        assert_eq!(parse_channel_listing(body).unwrap(), vec!["UHF", "VHF"]);
        assert!(matches!(
            parse_channel_listing("[]"),
            Err(HubError::PeerConfigInvalid(_))
        ));
    }

    #[test]
    fn test_client_builds() {
        assert!(HttpPeerClient::new(Duration::from_secs(5)).is_ok());
    }

    const CREATED_MILLIS: i64 = 1_422_047_479_407;

    async fn channel_listing() -> &'static str {
        r#"{"_links":{"channels":[{"name":"UHF"},{"name":"VHF"}]}}"#
    }

    async fn channel_config() -> String {
        serde_json::to_string(&ChannelConfig::new("UHF").with_ttl_days(3)).unwrap()
    }

    async fn channel_item(AxumPath(segment): AxumPath<String>) -> Response {
        match segment.as_str() {
            "latest" => (
                StatusCode::SEE_OTHER,
                [(header::LOCATION, "http://peer/channel/UHF/7")],
            )
                .into_response(),
            "7" => (
                [
                    (header::CONTENT_TYPE, "text/plain".to_string()),
                    (header::CONTENT_LANGUAGE, "en".to_string()),
                    (HeaderName::from_static("user"), "alice".to_string()),
                    (HeaderName::from_static("creation-date"), CREATED_MILLIS.to_string()),
                ],
                "bologna",
            )
                .into_response(),
            "9" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            "10" => "undated".into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    /// Serves a peer hub with one channel, `UHF`, whose latest sequence is 7.
    /// Sequence 9 fails and sequence 10 has no creation date.
    async fn serve_peer() -> String {
        let app = Router::new()
            .route("/channel", get(channel_listing))
            .route("/channel/UHF/", get(channel_config))
            .route("/channel/UHF/:segment", get(channel_item));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client() -> HttpPeerClient {
        HttpPeerClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_configuration_and_listing() {
        let base = serve_peer().await;
        let client = client();

        let config = client
            .get_configuration(&format!("{}/channel/UHF/", base))
            .await
            .unwrap();
        assert_eq!(config.name, "UHF");
        assert_eq!(config.ttl_days, Some(3));

        assert!(matches!(
            client.get_configuration(&format!("{}/channel/VHF/", base)).await,
            Err(HubError::NotFound(_))
        ));
        assert_eq!(client.list_channels(&base).await.unwrap(), vec!["UHF", "VHF"]);
    }

    #[tokio::test]
    async fn test_latest_sequence_from_redirect() {
        let base = serve_peer().await;
        let client = client();

        let latest = client
            .get_latest_sequence(&format!("{}/channel/UHF/", base))
            .await
            .unwrap();
        assert_eq!(latest, Some(7));

        let missing = client
            .get_latest_sequence(&format!("{}/channel/VHF/", base))
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_creation_time_status_mapping() {
        let base = serve_peer().await;
        let channel_url = format!("{}/channel/UHF/", base);
        let client = client();

        let created = client.get_creation_time(&channel_url, 7).await.unwrap();
        assert_eq!(created.map(|t| t.timestamp_millis()), Some(CREATED_MILLIS));
        assert_eq!(client.get_creation_time(&channel_url, 8).await.unwrap(), None);
        assert!(matches!(
            client.get_creation_time(&channel_url, 9).await,
            Err(HubError::PeerUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_content_headers_and_key() {
        let base = serve_peer().await;
        let channel_url = format!("{}/channel/UHF/", base);
        let client = client();

        let content = client.get_content(&channel_url, 7).await.unwrap().unwrap();
        let created = DateTime::<Utc>::from_timestamp_millis(CREATED_MILLIS).unwrap();
        assert_eq!(
            content.key(),
            Some(&ContentKey::with_time(created, replicated_hash(7)))
        );
        assert_eq!(content.data().as_ref(), b"bologna");
        assert_eq!(content.content_type(), Some("text/plain"));
        assert_eq!(content.content_language(), Some("en"));
        assert_eq!(content.user(), Some("alice"));

        assert!(client.get_content(&channel_url, 8).await.unwrap().is_none());
        assert!(matches!(
            client.get_content(&channel_url, 9).await,
            Err(HubError::PeerUnreachable(_))
        ));
        assert!(matches!(
            client.get_content(&channel_url, 10).await,
            Err(HubError::PeerConfigInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = client()
            .get_latest_sequence(&format!("http://{}/channel/UHF/", addr))
            .await;
        assert!(matches!(result, Err(HubError::PeerUnreachable(_))));
    }
}
