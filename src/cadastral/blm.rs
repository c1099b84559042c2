//! Client for the BLM National PLSS CadNSDI ArcGIS map service.

use std::sync::{Mutex, MutexGuard, PoisonError};

use geo::Coord;
use hashbrown::HashMap;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{CadastralClient, Ring};
use crate::config::CadastralConfig;
use crate::error::CadastralError;

/// Looks up township grid ids and section polygons on the BLM map service.
///
/// Transient failures (connection errors, timeouts, HTTP 429 and 5xx) are
/// retried with exponential backoff. Successful responses are cached for the
/// life of the client, up to `cache_capacity` entries; once full an arbitrary
/// entry is evicted for each new one.
pub struct BlmClient {
    client: Client,
    config: CadastralConfig,
    township_url: Url,
    section_url: Url,
    /// Cache of full request URL → response
    cache: Mutex<HashMap<String, QueryResponse>>,
}

#[derive(Debug, Clone, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Clone, Deserialize)]
struct Feature {
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    geometry: Option<Geometry>,
}

#[derive(Debug, Clone, Deserialize)]
struct Geometry {
    #[serde(default)]
    rings: Vec<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceError {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<String>,
}

impl BlmClient {
    pub fn new(config: CadastralConfig) -> Result<Self, CadastralError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            township_url: config.layer_url(config.township_layer)?,
            section_url: config.layer_url(config.section_layer)?,
            config,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Number of cached responses
    pub fn cache_size(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, QueryResponse>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember(&self, key: String, response: &QueryResponse) {
        let capacity = self.config.cache_capacity;
        if capacity == 0 {
            return;
        }

        let mut cache = self.lock_cache();
        if cache.len() >= capacity && !cache.contains_key(&key) {
            if let Some(evicted) = cache.keys().next().cloned() {
                debug!("Cadastral cache full, evicting {}", evicted);
                cache.remove(&evicted);
            }
        }
        cache.insert(key, response.clone());
    }

    async fn query(
        &self,
        layer_url: &Url,
        params: &[(&str, String)],
    ) -> Result<QueryResponse, CadastralError> {
        let mut url = layer_url.clone();
        url.query_pairs_mut().extend_pairs(params);
        let key = url.to_string();

        let cached = self.lock_cache().get(&key).cloned();
        if let Some(response) = cached {
            debug!("Cadastral cache hit: {}", key);
            return Ok(response);
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send(&url).await {
                Ok(response) => {
                    self.remember(key, &response);
                    return Ok(response);
                }
                Err(e) if is_transient(&e) => {
                    if attempts >= max_attempts {
                        return Err(CadastralError::RetriesExhausted {
                            attempts,
                            last: e.to_string(),
                        });
                    }
                    let delay = self.config.backoff(attempts);
                    warn!(
                        "Cadastral request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempts, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, url: &Url) -> Result<QueryResponse, CadastralError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let body = response.text().await?;
        parse_response(&body)
    }
}

impl CadastralClient for BlmClient {
    async fn find_grid_id(
        &self,
        region: &str,
        township: &str,
        range: &str,
    ) -> Result<Option<String>, CadastralError> {
        let (township_no, township_dir) = split_token(township, 'T')?;
        let (range_no, range_dir) = split_token(range, 'R')?;

        let params = [
            (
                "where",
                township_where(region, township_no, township_dir, range_no, range_dir),
            ),
            (
                "outFields",
                "PLSSID,STATEABBR,TWNSHPNO,TWNSHPDIR,RANGENO,RANGEDIR".to_string(),
            ),
            ("returnGeometry", "false".to_string()),
            ("f", "json".to_string()),
        ];

        let response = self.query(&self.township_url, &params).await?;
        let grid_id = grid_id_from(&response, township_no, range_no);

        match &grid_id {
            Some(id) => info!("{} {} {} is township {}", region, township, range, id),
            None => info!("No township found for {} {} {}", region, township, range),
        }

        Ok(grid_id)
    }

    async fn find_section_polygons(
        &self,
        grid_id: &str,
        section: &str,
    ) -> Result<Vec<Ring>, CadastralError> {
        let section_no = section
            .strip_prefix("Sec. ")
            .filter(|n| is_numeral(n))
            .ok_or_else(|| CadastralError::InvalidToken(section.to_string()))?;

        let params = [
            ("where", section_where(grid_id, section_no)),
            ("outFields", "PLSSID,FRSTDIVNO,FRSTDIVTYP".to_string()),
            ("returnGeometry", "true".to_string()),
            ("outSR", "4326".to_string()),
            ("f", "json".to_string()),
        ];

        let response = self.query(&self.section_url, &params).await?;
        let rings = rings_from(&response);
        debug!(
            "{} in township {}: {} polygon(s)",
            section,
            grid_id,
            rings.len()
        );

        Ok(rings)
    }
}

/// `"T3N"` → `("3", "N")`
fn split_token(token: &str, prefix: char) -> Result<(&str, &str), CadastralError> {
    let invalid = || CadastralError::InvalidToken(token.to_string());
    let body = token.strip_prefix(prefix).ok_or_else(invalid)?;
    let split = body.len().checked_sub(1).ok_or_else(invalid)?;
    if !body.is_char_boundary(split) {
        return Err(invalid());
    }
    let (number, direction) = body.split_at(split);
    if !is_numeral(number) || !direction.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(invalid());
    }
    Ok((number, direction))
}

fn is_numeral(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

fn township_where(
    region: &str,
    township_no: &str,
    township_dir: &str,
    range_no: &str,
    range_dir: &str,
) -> String {
    format!(
        "STATEABBR='{}' AND TWNSHPNO LIKE '%{}' AND TWNSHPDIR='{}' AND RANGENO LIKE '%{}' AND RANGEDIR='{}'",
        quote(region),
        township_no,
        township_dir,
        range_no,
        range_dir
    )
}

fn section_where(grid_id: &str, section_no: &str) -> String {
    format!(
        "PLSSID='{}' AND FRSTDIVNO='{}' AND FRSTDIVTYP='SN'",
        quote(grid_id),
        section_no
    )
}

fn parse_response(body: &str) -> Result<QueryResponse, CadastralError> {
    let response: QueryResponse =
        serde_json::from_str(body).map_err(|e| CadastralError::Decode(e.to_string()))?;
    match &response.error {
        Some(error) => Err(classify_service_error(error)),
        None => Ok(response),
    }
}

/// First feature whose township and range numbers match exactly.
///
/// `LIKE '%3'` also matches townships 13 and 23, so the numbers are compared
/// again here. Features that do not report them are accepted as-is.
fn grid_id_from(response: &QueryResponse, township_no: &str, range_no: &str) -> Option<String> {
    response
        .features
        .iter()
        .filter(|f| {
            attribute_matches(f, "TWNSHPNO", township_no) && attribute_matches(f, "RANGENO", range_no)
        })
        .find_map(|f| f.attributes.get("PLSSID")?.as_str().map(str::to_string))
}

fn attribute_matches(feature: &Feature, name: &str, number: &str) -> bool {
    let Some(value) = feature.attributes.get(name) else {
        return true;
    };
    let actual = match value {
        serde_json::Value::String(s) => s.trim().parse::<u32>().ok(),
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    };
    actual.is_some() && actual == number.parse::<u32>().ok()
}

/// Outer ring of each feature
fn rings_from(response: &QueryResponse) -> Vec<Ring> {
    response
        .features
        .iter()
        .filter_map(|f| f.geometry.as_ref()?.rings.first())
        .map(|ring| {
            ring.iter()
                .filter(|point| point.len() >= 2)
                .map(|point| Coord {
                    x: point[0],
                    y: point[1],
                })
                .collect::<Ring>()
        })
        .filter(|ring| !ring.is_empty())
        .collect()
}

fn mentions_quota(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("quota") || text.contains("credit")
}

fn classify_status(status: u16, body: String) -> CadastralError {
    if matches!(status, 402 | 403) {
        CadastralError::QuotaExceeded(format!("HTTP {}: {}", status, body))
    } else {
        CadastralError::Status { status, body }
    }
}

fn classify_service_error(error: &ServiceError) -> CadastralError {
    let mut message = error.message.clone();
    for detail in &error.details {
        message.push_str("; ");
        message.push_str(detail);
    }

    if matches!(error.code, 402 | 403) || mentions_quota(&message) {
        CadastralError::QuotaExceeded(message)
    } else {
        CadastralError::Service {
            code: error.code,
            message,
        }
    }
}

fn is_transient(error: &CadastralError) -> bool {
    match error {
        CadastralError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        CadastralError::Status { status, .. } => *status == 429 || *status >= 500,
        CadastralError::Service { code, .. } => *code == 429 || *code >= 500,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, routing::get, Router};

    const TOWNSHIPS: &str = r#"{
        "features": [
            {"attributes": {"PLSSID": "WY060130N0050W0", "TWNSHPNO": "013", "RANGENO": "005"}},
            {"attributes": {"PLSSID": "WY060030N0050W0", "TWNSHPNO": "003", "RANGENO": "005"}}
        ]
    }"#;

    const SECTIONS: &str = r#"{
        "features": [
            {"attributes": {"PLSSID": "WY060030N0050W0"},
             "geometry": {"rings": [
                [[-107.1, 43.0], [-107.08, 43.0], [-107.08, 43.015], [-107.1, 43.015], [-107.1, 43.0]],
                [[-107.09, 43.005], [-107.089, 43.005], [-107.09, 43.006]]
             ]}},
            {"attributes": {"PLSSID": "WY060030N0050W0"}}
        ]
    }"#;

    #[test]
    fn test_split_token() {
        assert_eq!(split_token("T3N", 'T').unwrap(), ("3", "N"));
        assert_eq!(split_token("R105W", 'R').unwrap(), ("105", "W"));
        for bad in ["3N", "T", "TN", "T3", "T3n", "Sec. 14"] {
            assert!(split_token(bad, 'T').is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_where_clauses() {
        assert_eq!(
            township_where("WY", "3", "N", "5", "W"),
            "STATEABBR='WY' AND TWNSHPNO LIKE '%3' AND TWNSHPDIR='N' AND RANGENO LIKE '%5' AND RANGEDIR='W'"
        );
        assert_eq!(
            section_where("WY060030N0050W0", "14"),
            "PLSSID='WY060030N0050W0' AND FRSTDIVNO='14' AND FRSTDIVTYP='SN'"
        );
        assert_eq!(
            section_where("x' OR '1'='1", "14"),
            "PLSSID='x'' OR ''1''=''1' AND FRSTDIVNO='14' AND FRSTDIVTYP='SN'"
        );
    }

    #[test]
    fn test_grid_id_skips_suffix_matches() {
        let response = parse_response(TOWNSHIPS).unwrap();
        assert_eq!(
            grid_id_from(&response, "3", "5"),
            Some("WY060030N0050W0".to_string())
        );
        assert_eq!(
            grid_id_from(&response, "13", "5"),
            Some("WY060130N0050W0".to_string())
        );
        assert_eq!(grid_id_from(&response, "23", "5"), None);
    }

    #[test]
    fn test_grid_id_empty() {
        let response = parse_response(r#"{"features": []}"#).unwrap();
        assert_eq!(grid_id_from(&response, "3", "5"), None);
    }

    #[test]
    fn test_rings_use_outer_ring_only() {
        let response = parse_response(SECTIONS).unwrap();
        let rings = rings_from(&response);
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].len(), 5);
        assert_eq!(rings[0][0], Coord { x: -107.1, y: 43.0 });
    }

    #[test]
    fn test_service_errors() {
        let quota = parse_response(
            r#"{"error": {"code": 400, "message": "Unable to complete operation.", "details": ["Monthly quota of credits exceeded"]}}"#,
        )
        .unwrap_err();
        assert!(quota.is_quota());

        let busy = parse_response(r#"{"error": {"code": 500, "message": "Server busy"}}"#)
            .unwrap_err();
        assert!(matches!(busy, CadastralError::Service { code: 500, .. }));
        assert!(is_transient(&busy));

        let bad = parse_response(r#"{"error": {"code": 400, "message": "Invalid query"}}"#)
            .unwrap_err();
        assert!(!is_transient(&bad));

        assert!(matches!(
            parse_response("<html>"),
            Err(CadastralError::Decode(_))
        ));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(403, String::new()).is_quota());
        assert!(classify_status(402, String::new()).is_quota());
        assert!(is_transient(&classify_status(429, String::new())));
        assert!(is_transient(&classify_status(503, String::new())));
        assert!(!is_transient(&classify_status(404, String::new())));
    }

    /// Serve `/MapServer/{layer}/query`, answering each request with the next
    /// scripted reply (the last one repeats)
    async fn serve(replies: Vec<(StatusCode, &'static str)>) -> (CadastralConfig, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = (Arc::new(replies), hits.clone());

        async fn reply(
            State((replies, hits)): State<(Arc<Vec<(StatusCode, &'static str)>>, Arc<AtomicUsize>)>,
        ) -> (StatusCode, &'static str) {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            replies[n.min(replies.len() - 1)]
        }

        let router = Router::new()
            .route("/MapServer/{layer}/query", get(reply))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let config = CadastralConfig {
            base_url: format!("http://{}/MapServer", addr),
            max_attempts: 3,
            backoff_ms: 1,
            ..CadastralConfig::default()
        };
        (config, hits)
    }

    #[tokio::test]
    async fn test_retries_then_caches() {
        let (config, hits) = serve(vec![
            (StatusCode::SERVICE_UNAVAILABLE, "busy"),
            (StatusCode::OK, TOWNSHIPS),
        ])
        .await;
        let client = BlmClient::new(config).unwrap();

        let grid_id = client.find_grid_id("WY", "T3N", "R5W").await.unwrap();
        assert_eq!(grid_id.as_deref(), Some("WY060030N0050W0"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let again = client.find_grid_id("WY", "T3N", "R5W").await.unwrap();
        assert_eq!(again, grid_id);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(client.cache_size(), 1);
    }

    #[tokio::test]
    async fn test_cache_capacity() {
        let (mut config, hits) = serve(vec![(StatusCode::OK, TOWNSHIPS)]).await;
        config.cache_capacity = 1;
        let client = BlmClient::new(config).unwrap();

        client.find_grid_id("WY", "T3N", "R5W").await.unwrap();
        client.find_grid_id("WY", "T13N", "R5W").await.unwrap();
        assert_eq!(client.cache_size(), 1);

        // the first lookup was evicted, so it goes back to the service
        client.find_grid_id("WY", "T3N", "R5W").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(client.cache_size(), 1);
    }

    #[tokio::test]
    async fn test_cache_disabled() {
        let (mut config, hits) = serve(vec![(StatusCode::OK, TOWNSHIPS)]).await;
        config.cache_capacity = 0;
        let client = BlmClient::new(config).unwrap();

        client.find_grid_id("WY", "T3N", "R5W").await.unwrap();
        client.find_grid_id("WY", "T3N", "R5W").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(client.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (config, hits) = serve(vec![(StatusCode::BAD_GATEWAY, "down")]).await;
        let client = BlmClient::new(config).unwrap();

        let err = client.find_grid_id("WY", "T3N", "R5W").await.unwrap_err();
        assert!(matches!(err, CadastralError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(client.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_quota_not_retried() {
        let (config, hits) = serve(vec![(StatusCode::FORBIDDEN, "quota")]).await;
        let client = BlmClient::new(config).unwrap();

        let err = client
            .find_section_polygons("WY060030N0050W0", "Sec. 14")
            .await
            .unwrap_err();
        assert!(err.is_quota());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_section_polygons() {
        let (config, _) = serve(vec![(StatusCode::OK, SECTIONS)]).await;
        let client = BlmClient::new(config).unwrap();

        let rings = client
            .find_section_polygons("WY060030N0050W0", "Sec. 14")
            .await
            .unwrap();
        assert_eq!(rings.len(), 1);

        let err = client
            .find_section_polygons("WY060030N0050W0", "14")
            .await
            .unwrap_err();
        assert!(matches!(err, CadastralError::InvalidToken(_)));
    }
}
