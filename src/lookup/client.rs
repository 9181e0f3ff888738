use async_trait::async_trait;
use reqwest::{Client as HttpClient, ClientBuilder};
use tracing::debug;
use url::Url;

use crate::config::LookupConfig;
use crate::error::GeoEnrichError;
use crate::lookup::error::LookupError;
use crate::lookup::response::parse_response;
use crate::types::{EnrichedRecord, GeoQuery};

/// Remote reverse lookup for one coordinate.
///
/// Implementations are stateless per call and shared by every worker.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, query: &GeoQuery) -> Result<EnrichedRecord, LookupError>;
}

/// Reverse geocoder backed by an HTTP GET of
/// `{base_url}{longitude},{latitude}.json?types={filter}&access_token={token}`.
#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    http_client: HttpClient,
    base_url: String,
    access_token: String,
    type_filter: Option<String>,
}

impl HttpGeocoder {
    pub fn new(config: &LookupConfig) -> crate::Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            GeoEnrichError::InvalidConfig(format!("Invalid lookup.base_url: {}", e))
        })?;

        let http_client = ClientBuilder::new()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GeoEnrichError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            access_token: config.access_token.clone(),
            type_filter: config.type_filter.clone(),
        })
    }

    /// Builds the lookup URL for a query.
    pub fn request_url(&self, query: &GeoQuery) -> Result<Url, LookupError> {
        let raw = format!("{}{},{}.json", self.base_url, query.longitude, query.latitude);
        let mut url = Url::parse(&raw)
            .map_err(|e| LookupError::Request(format!("Invalid lookup URL {}: {}", raw, e)))?;

        {
            let mut pairs = url.query_pairs_mut();
            if let Some(filter) = &self.type_filter {
                pairs.append_pair("types", filter);
            }
            pairs.append_pair("access_token", &self.access_token);
        }

        Ok(url)
    }
}

#[async_trait]
impl ReverseGeocoder for HttpGeocoder {
    async fn reverse(&self, query: &GeoQuery) -> Result<EnrichedRecord, LookupError> {
        let url = self.request_url(query)?;

        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            debug!("Lookup for {},{} returned HTTP {}", query.latitude, query.longitude, status);
            return Err(LookupError::from_status(status.as_u16()));
        }

        let body = response.bytes().await?;
        parse_response(&body, query.code.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geocoder(type_filter: Option<&str>) -> HttpGeocoder {
        HttpGeocoder::new(&LookupConfig {
            base_url: "https://geo.example.com/places/".to_string(),
            access_token: "tok en".to_string(),
            type_filter: type_filter.map(str::to_string),
            request_timeout_ms: 1_000,
        })
        .unwrap()
    }

    fn query() -> GeoQuery {
        GeoQuery {
            latitude: -6.2,
            longitude: 106.8,
            code: None,
        }
    }

    #[test]
    fn test_request_url_puts_longitude_first() {
        let url = geocoder(Some("poi")).request_url(&query()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://geo.example.com/places/106.8,-6.2.json?types=poi&access_token=tok+en"
        );
    }

    #[test]
    fn test_request_url_without_type_filter() {
        let url = geocoder(None).request_url(&query()).unwrap();
        assert_eq!(url.query(), Some("access_token=tok+en"));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = HttpGeocoder::new(&LookupConfig {
            base_url: "not a url".to_string(),
            ..LookupConfig::default()
        });
        assert!(matches!(result, Err(GeoEnrichError::InvalidConfig(_))));
    }
}
