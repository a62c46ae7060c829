use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::{BioassayId, UniprotId};
use crate::error::KiraError;

const PUG_BASE: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";

pub trait AssayIndexClient: Send + Sync {
    fn assay_ids_for_protein(&self, id: &UniprotId) -> Result<Vec<BioassayId>, KiraError>;
}

#[derive(Clone)]
pub struct PugHttpClient {
    client: Client,
    base_url: String,
}

impl PugHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_base_url(PUG_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ba/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::PubchemHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| KiraError::PubchemHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(status, delay_ms = delay, "retrying PubChem request");
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::PubchemHttp(err.to_string()));
                }
            }
        }
    }

    fn assay_ids_url(&self, id: &UniprotId) -> String {
        format!(
            "{}/bioassay/target/ProteinName/{}/aids/JSON",
            self.base_url,
            id.as_str()
        )
    }
}

impl AssayIndexClient for PugHttpClient {
    fn assay_ids_for_protein(&self, id: &UniprotId) -> Result<Vec<BioassayId>, KiraError> {
        let url = self.assay_ids_url(id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let status = response.status().as_u16();
        // PubChem answers an unknown protein with 404 and a Fault body.
        if status == 404 {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "PubChem request failed".to_string());
            return Err(KiraError::PubchemStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| KiraError::PubchemHttp(err.to_string()))?;
        parse_assay_ids(&body)
    }
}

#[derive(Debug, Deserialize)]
struct AidResponse {
    #[serde(rename = "IdentifierList")]
    identifier_list: Option<IdentifierList>,
}

#[derive(Debug, Deserialize)]
struct IdentifierList {
    #[serde(rename = "AID", default)]
    aid: Vec<u64>,
}

pub fn parse_assay_ids(body: &str) -> Result<Vec<BioassayId>, KiraError> {
    let parsed: AidResponse =
        serde_json::from_str(body).map_err(|err| KiraError::PubchemHttp(err.to_string()))?;
    Ok(parsed
        .identifier_list
        .map(|list| list.aid.into_iter().map(BioassayId::new).collect())
        .unwrap_or_default())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_identifier_list() {
        let ids = parse_assay_ids(r#"{"IdentifierList":{"AID":[1000,1001]}}"#).unwrap();
        assert_eq!(ids, vec![BioassayId::new(1000), BioassayId::new(1001)]);
    }

    #[test]
    fn fault_body_lists_nothing() {
        let body = r#"{"Fault":{"Code":"PUGREST.NotFound","Message":"No data found"}}"#;
        assert!(parse_assay_ids(body).unwrap().is_empty());
    }

    #[test]
    fn invalid_body_is_an_error() {
        assert_matches!(parse_assay_ids("<html>"), Err(KiraError::PubchemHttp(_)));
    }

    #[test]
    fn url_uses_protein_name_namespace() {
        let client = PugHttpClient::with_base_url("http://localhost/rest/pug/").unwrap();
        let id: UniprotId = "P69905".parse().unwrap();
        assert_eq!(
            client.assay_ids_url(&id),
            "http://localhost/rest/pug/bioassay/target/ProteinName/P69905/aids/JSON"
        );
    }
}
