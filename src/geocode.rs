//! Reverse geocoding providers.
//!
//! This module converts a coordinate into a structured address payload by
//! calling an OpenStreetMap-style `/reverse` endpoint over HTTP.
//!
//! It defines the `AddressPayload` shape shared by the supported services and
//! the `AddressProvider` trait the resolver depends on. Two query styles are
//! supported: the full Nominatim `jsonv2` request (primary) and the minimal
//! `lat`/`lon` request understood by Nominatim-compatible mirrors (secondary).

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use reqwest::header::ACCEPT_LANGUAGE;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::geo::Coordinate;

/// Address components as returned under `address` by Nominatim-style services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressDetails {
    pub public_building: Option<String>,
    pub building: Option<String>,
    pub amenity: Option<String>,
    pub shop: Option<String>,
    pub house_number: Option<String>,
    pub block: Option<String>,
    pub road: Option<String>,
    pub residential: Option<String>,
    pub pedestrian: Option<String>,
    pub footway: Option<String>,
    pub cycleway: Option<String>,
    pub path: Option<String>,
    pub neighbourhood: Option<String>,
    pub suburb: Option<String>,
    pub quarter: Option<String>,
    pub hamlet: Option<String>,
    pub estate: Option<String>,
    pub city: Option<String>,
    pub town: Option<String>,
    pub village: Option<String>,
    pub city_district: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
}

/// A reverse geocoding response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressPayload {
    /// Name of the feature at the coordinate (building, shop, ...)
    pub name: Option<String>,
    /// The provider's own one-line rendering
    pub display_name: Option<String>,
    pub address: AddressDetails,
    /// Set by Nominatim instead of a result, e.g. "Unable to geocode"
    pub error: Option<String>,
}

/// Interface for reverse geocoding services
#[async_trait]
pub trait AddressProvider: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    /// Look up the address at a coordinate
    async fn reverse(&self, coordinate: Coordinate) -> Result<AddressPayload>;
}

/// Which query parameters to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStyle {
    /// `format=jsonv2&zoom=18&addressdetails=1&namedetails=1&extratags=1`
    Nominatim,
    /// Just `lat` and `lon`
    Minimal,
}

/// Reverse geocoder reached over HTTP
pub struct HttpAddressProvider {
    name: String,
    client: Client,
    endpoint: Url,
    style: QueryStyle,
    accept_language: String,
}

impl HttpAddressProvider {
    pub fn new(
        name: impl Into<String>,
        client: Client,
        base_url: &str,
        style: QueryStyle,
        accept_language: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            client,
            endpoint: endpoint_url(base_url, "reverse")?,
            style,
            accept_language: accept_language.into(),
        })
    }

    /// Full URL for a lookup at `coordinate`
    pub fn request_url(&self, coordinate: Coordinate) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            if self.style == QueryStyle::Nominatim {
                query.append_pair("format", "jsonv2");
            }
            query
                .append_pair("lat", &coordinate.lat.to_string())
                .append_pair("lon", &coordinate.lng.to_string());
            if self.style == QueryStyle::Nominatim {
                query
                    .append_pair("zoom", "18")
                    .append_pair("addressdetails", "1")
                    .append_pair("namedetails", "1")
                    .append_pair("extratags", "1");
            }
        }
        url
    }
}

#[async_trait]
impl AddressProvider for HttpAddressProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reverse(&self, coordinate: Coordinate) -> Result<AddressPayload> {
        let url = self.request_url(coordinate);
        debug!("{}: GET {}", self.name, url);

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT_LANGUAGE, self.accept_language.as_str())
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.name))?
            .error_for_status()
            .with_context(|| format!("{} rejected the lookup", self.name))?;

        let payload: AddressPayload = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.name))?;

        if let Some(error) = &payload.error {
            anyhow::bail!("{} returned an error: {}", self.name, error);
        }

        Ok(payload)
    }
}

/// Join `path` onto a base URL, treating the base as a directory
pub fn endpoint_url(base_url: &str, path: &str) -> Result<Url> {
    let mut base = Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path)
        .with_context(|| format!("Failed to build endpoint {path} on {base_url}"))
}

/// HTTP client shared by the geocoding and POI providers
pub fn build_http_client(user_agent: &str) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .build()
        .context("Failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const SAMPLE_RESPONSE: &str = r#"{
        "place_id": 123,
        "lat": "19.0760",
        "lon": "72.8777",
        "name": "Azad Maidan",
        "display_name": "Azad Maidan, Fort, Mumbai, Maharashtra, 400001, India",
        "address": {
            "leisure": "Azad Maidan",
            "road": "Mahapalika Marg",
            "neighbourhood": "Fort",
            "city": "Mumbai",
            "state": "Maharashtra",
            "postcode": "400001",
            "country": "India"
        }
    }"#;

    fn provider(base_url: &str, style: QueryStyle) -> HttpAddressProvider {
        HttpAddressProvider::new("test", Client::new(), base_url, style, "en-IN").unwrap()
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() -> Result<()> {
        assert_eq!(
            endpoint_url("https://geocode.example", "reverse")?.as_str(),
            "https://geocode.example/reverse"
        );
        assert_eq!(
            endpoint_url("https://proxy.example/nominatim", "reverse")?.as_str(),
            "https://proxy.example/nominatim/reverse"
        );
        assert!(endpoint_url("not a url", "reverse").is_err());
        Ok(())
    }

    #[test]
    fn test_request_url_styles() {
        let coordinate = Coordinate::new(19.076, 72.8777);

        let full = provider("https://nominatim.example", QueryStyle::Nominatim)
            .request_url(coordinate);
        assert_eq!(
            full.as_str(),
            "https://nominatim.example/reverse?format=jsonv2&lat=19.076&lon=72.8777&zoom=18&addressdetails=1&namedetails=1&extratags=1"
        );

        let minimal =
            provider("https://mirror.example", QueryStyle::Minimal).request_url(coordinate);
        assert_eq!(
            minimal.as_str(),
            "https://mirror.example/reverse?lat=19.076&lon=72.8777"
        );
    }

    #[tokio::test]
    async fn test_reverse_parses_payload() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("lat".into(), "19.076".into()),
                Matcher::UrlEncoded("lon".into(), "72.8777".into()),
                Matcher::UrlEncoded("format".into(), "jsonv2".into()),
            ]))
            .match_header("accept-language", "en-IN")
            .with_header("content-type", "application/json")
            .with_body(SAMPLE_RESPONSE)
            .create_async()
            .await;

        let payload = provider(&server.url(), QueryStyle::Nominatim)
            .reverse(Coordinate::new(19.076, 72.8777))
            .await?;

        mock.assert_async().await;
        assert_eq!(payload.name.as_deref(), Some("Azad Maidan"));
        assert_eq!(payload.address.city.as_deref(), Some("Mumbai"));
        assert_eq!(payload.address.postcode.as_deref(), Some("400001"));
        Ok(())
    }

    #[tokio::test]
    async fn test_reverse_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let result = provider(&server.url(), QueryStyle::Minimal)
            .reverse(Coordinate::new(19.076, 72.8777))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reverse_error_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"Unable to geocode"}"#)
            .create_async()
            .await;

        let err = provider(&server.url(), QueryStyle::Nominatim)
            .reverse(Coordinate::new(0.0, 0.0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unable to geocode"));
    }
}
