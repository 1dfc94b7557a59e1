use reqwest::{StatusCode, Url};
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::domain::{RecordId, SearchQuery};
use crate::error::WiscatError;
use crate::record::MetadataRecord;

/// One page of search results, as reported by the catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub number_matched: Option<u64>,
    pub number_returned: usize,
    pub records: Vec<MetadataRecord>,
    pub next: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct FetchedRecord {
    pub url: String,
    pub record: MetadataRecord,
    pub raw_json: Value,
}

/// Operations against a WIS2 Global Discovery Catalogue.
pub trait CatalogueClient: Send + Sync {
    /// Location of the metadata archive advertised by the catalogue.
    fn archive_url(&self) -> Result<String, WiscatError>;
    fn download(&self, url: &str) -> Result<Vec<u8>, WiscatError>;
    fn search(&self, query: &SearchQuery) -> Result<SearchPage, WiscatError>;
    fn get_record(&self, id: &RecordId) -> Result<FetchedRecord, WiscatError>;
}

#[derive(Clone)]
pub struct GdcHttpClient {
    client: Client,
    base_url: String,
}

impl GdcHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, WiscatError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("wiscat/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| WiscatError::InvalidArgument(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| WiscatError::remote(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.gdc_url.trim_end_matches('/').to_string(),
        })
    }

    fn items_url(&self) -> String {
        format!("{}/items", self.base_url)
    }

    /// The identifier goes in as a single percent-encoded path segment.
    fn record_url(&self, id: &RecordId) -> Result<Url, WiscatError> {
        let mut url = Url::parse(&self.base_url).map_err(|err| {
            WiscatError::InvalidArgument(format!("invalid GDC URL {}: {err}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                WiscatError::InvalidArgument(format!("GDC URL cannot have a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .push("items")
            .push(id.as_str());
        Ok(url)
    }

    fn handle_status(response: Response) -> Result<Response, WiscatError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .ok()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| "catalogue request failed".to_string());
        Err(WiscatError::RemoteUnavailable {
            status: Some(status),
            message,
        })
    }

    fn read_json(response: Response) -> Result<Value, WiscatError> {
        let body = response
            .text()
            .map_err(|err| WiscatError::remote(err.to_string()))?;
        serde_json::from_str(&body).map_err(|err| WiscatError::ResponseParse(err.to_string()))
    }

    fn get(&self, url: &str) -> Result<Response, WiscatError> {
        debug!("GET {url}");
        self.client
            .get(url)
            .send()
            .map_err(|err| WiscatError::remote(err.to_string()))
    }
}

impl CatalogueClient for GdcHttpClient {
    fn archive_url(&self) -> Result<String, WiscatError> {
        debug!("fetching GDC collection information from {}", self.base_url);
        let response = Self::handle_status(self.get(&self.base_url)?)?;
        let collection = Self::read_json(response)?;
        let link = find_link(&collection, "archives").ok_or_else(|| {
            WiscatError::NotFound(format!(
                "archive link in GDC collection {}",
                self.base_url
            ))
        })?;
        debug!("archive link found: {link}");
        Ok(link)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, WiscatError> {
        let response = Self::handle_status(self.get(url)?)?;
        let bytes = response
            .bytes()
            .map_err(|err| WiscatError::remote(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn search(&self, query: &SearchQuery) -> Result<SearchPage, WiscatError> {
        let params = query.to_params();
        debug!("query parameters: {params:?}");
        let response = self
            .client
            .get(self.items_url())
            .query(&params)
            .send()
            .map_err(|err| WiscatError::remote(err.to_string()))?;
        let url = response.url().to_string();
        debug!("URL: {url}");
        let response = Self::handle_status(response)?;
        let body = Self::read_json(response)?;
        parse_search_page(&body, url)
    }

    fn get_record(&self, id: &RecordId) -> Result<FetchedRecord, WiscatError> {
        let response = self.get(self.record_url(id)?.as_str())?;
        let url = response.url().to_string();
        if response.status() == StatusCode::NOT_FOUND {
            return Err(WiscatError::NotFound(format!("record {id}")));
        }
        let response = Self::handle_status(response)?;
        let raw_json = Self::read_json(response)?;
        let record = MetadataRecord::from_wcmp2(&raw_json)?;
        Ok(FetchedRecord {
            url,
            record,
            raw_json,
        })
    }
}

pub fn parse_search_page(body: &Value, url: String) -> Result<SearchPage, WiscatError> {
    let features = body
        .get("features")
        .and_then(|value| value.as_array())
        .ok_or_else(|| {
            WiscatError::ResponseParse("search response has no \"features\" array".to_string())
        })?;
    let records = features
        .iter()
        .map(MetadataRecord::from_wcmp2)
        .collect::<Result<Vec<_>, WiscatError>>()?;
    let number_returned = body
        .get("numberReturned")
        .and_then(|value| value.as_u64())
        .map(|value| value as usize)
        .unwrap_or(records.len());

    Ok(SearchPage {
        number_matched: body.get("numberMatched").and_then(|value| value.as_u64()),
        number_returned,
        next: find_link(body, "next"),
        records,
        url,
    })
}

fn find_link(document: &Value, rel: &str) -> Option<String> {
    document
        .get("links")
        .and_then(|value| value.as_array())?
        .iter()
        .find(|link| link.get("rel").and_then(|value| value.as_str()) == Some(rel))
        .and_then(|link| link.get("href"))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn search_page_reads_counts_and_next_link() {
        let body = json!({
            "type": "FeatureCollection",
            "numberMatched": 42,
            "numberReturned": 1,
            "features": [{
                "id": "urn:wmo:md:ca-eccc-msc:swob",
                "properties": {"title": "SWOB", "wmo:dataPolicy": "core"}
            }],
            "links": [{"rel": "next", "href": "http://gdc/items?offset=1"}]
        });
        let page = parse_search_page(&body, "http://gdc/items".to_string()).unwrap();
        assert_eq!(page.number_matched, Some(42));
        assert_eq!(page.number_returned, 1);
        assert_eq!(page.next.as_deref(), Some("http://gdc/items?offset=1"));
        assert_eq!(page.records[0].centre_id.as_deref(), Some("ca-eccc-msc"));
    }

    #[test]
    fn record_url_encodes_identifier_as_one_segment() {
        let client =
            GdcHttpClient::new(&ResolvedConfig::with_gdc_url("http://gdc.example/collections/x/"))
                .unwrap();
        let id: RecordId = "urn:wmo:md:xx-a:b#x?y%z".parse().unwrap();
        assert_eq!(
            client.record_url(&id).unwrap().as_str(),
            "http://gdc.example/collections/x/items/urn:wmo:md:xx-a:b%23x%3Fy%25z"
        );
    }

    #[test]
    fn search_page_without_features_is_a_parse_error() {
        let err = parse_search_page(&json!({"numberMatched": 0}), String::new()).unwrap_err();
        assert!(matches!(err, WiscatError::ResponseParse(_)));
    }
}
