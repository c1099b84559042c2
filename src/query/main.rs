//! Query server for PLSS locality parsing and resolution.
//!
//! Provides an HTTP API that parses free-text localities into TRS tokens and
//! resolves them to section boxes through the BLM cadastral service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use meridian::plss::{self, highlight, Plss};
use meridian::{BlmClient, Config, Error, PlssError, SectionBox, Trs};

#[derive(Parser, Debug)]
#[command(name = "query")]
#[command(about = "PLSS locality query server")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    listen: String,

    /// TOML config file; BLM defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Application state shared across handlers
struct AppState {
    client: BlmClient,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Meridian Query Server");

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    info!("Using cadastral service at {}", config.cadastral.base_url);

    let client = BlmClient::new(config.cadastral).context("Failed to create cadastral client")?;
    let state = Arc::new(AppState { client });

    // Build router
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/parse", get(parse_handler))
        .route("/v1/resolve", get(resolve_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting server on {}", args.listen);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Parse a locality without resolving it
async fn parse_handler(
    Query(params): Query<ParseQueryParams>,
) -> Result<Json<ParseResponse>, ApiError> {
    match plss::parser().parse(&params.text) {
        Ok(Some(tokens)) => Ok(Json(ParseResponse {
            matched: tokens.matched.clone(),
            tokens,
        })),
        Ok(None) => Err(plss_error(
            &params.text,
            &PlssError::TownshipFormat {
                fragment: params.text.clone(),
            },
        )),
        Err(e) => Err(plss_error(&params.text, &e)),
    }
}

/// Parse and resolve a locality to section boxes
async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResolveQueryParams>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let region = params.region.to_ascii_uppercase();
    let trs = Trs::new(params.text.as_str(), &region).map_err(|e| plss_error(&params.text, &e))?;

    let boxes = trs.find(&state.client).await.map_err(|e| {
        warn!("Resolving {:?} in {} failed: {}", params.text, region, e);
        error_response(&params.text, e)
    })?;

    Ok(Json(ResolveResponse {
        description: trs.describe(&boxes),
        tokens: trs.plss().clone(),
        boxes: boxes.iter().map(BoxResponse::from).collect(),
    }))
}

fn plss_error(text: &str, error: &PlssError) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            kind: error.kind(),
            message: error.to_string(),
            highlighted: error.fragment().map(|fragment| highlight(text, fragment)),
        }),
    )
}

fn error_response(text: &str, error: Error) -> ApiError {
    match error {
        Error::Plss(e) => plss_error(text, &e),
        Error::Cadastral(e) => {
            let (status, kind) = if e.is_quota() {
                (StatusCode::SERVICE_UNAVAILABLE, "quota_exceeded")
            } else {
                (StatusCode::BAD_GATEWAY, "cadastral")
            };
            (
                status,
                Json(ErrorResponse {
                    kind,
                    message: e.to_string(),
                    highlighted: None,
                }),
            )
        }
    }
}

#[derive(Deserialize)]
struct ParseQueryParams {
    /// Locality text
    text: String,
}

#[derive(Deserialize)]
struct ResolveQueryParams {
    /// Locality text
    text: String,
    /// Two-letter state code
    region: String,
}

#[derive(Debug, Serialize)]
struct ParseResponse {
    tokens: Plss,
    /// Part of the text the tokens were read from
    matched: String,
}

#[derive(Serialize)]
struct ResolveResponse {
    tokens: Plss,
    boxes: Vec<BoxResponse>,
    description: String,
}

#[derive(Serialize)]
struct BoxResponse {
    label: Option<String>,
    north: f64,
    south: f64,
    east: f64,
    west: f64,
    /// [lon, lat]
    center: [f64; 2],
    /// Center-to-corner distance, usable as coordinate uncertainty
    radius_km: f64,
    width_km: f64,
    height_km: f64,
    polygon: Vec<[f64; 2]>,
}

impl From<&SectionBox> for BoxResponse {
    fn from(section_box: &SectionBox) -> Self {
        let center = section_box.centroid();
        let (width_km, height_km) = section_box.size_km();
        Self {
            label: section_box.label().map(str::to_string),
            north: section_box.north(),
            south: section_box.south(),
            east: section_box.east(),
            west: section_box.west(),
            center: [center.x, center.y],
            radius_km: section_box.radius_km(),
            width_km,
            height_km,
            polygon: section_box
                .polygon()
                .exterior()
                .coords()
                .map(|c| [c.x, c.y])
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    highlighted: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian::CadastralError;

    #[tokio::test]
    async fn test_parse_handler() {
        let Json(response) = parse_handler(Query(ParseQueryParams {
            text: "near T3N R5W Sec. 14 NE/4".to_string(),
        }))
        .await
        .unwrap();
        assert_eq!(response.tokens.quarter_section, "NE");
        assert_eq!(response.matched, "T3N R5W Sec. 14 NE/4");
    }

    #[tokio::test]
    async fn test_parse_handler_highlights_failure() {
        let (status, Json(body)) = parse_handler(Query(ParseQueryParams {
            text: "by creek, T3N Sec. 14".to_string(),
        }))
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.kind, "range_format");
        assert_eq!(
            body.highlighted.as_deref(),
            Some("by creek, <strong>T3N Sec. 14</strong>")
        );
    }

    #[test]
    fn test_cadastral_status_codes() {
        let (status, Json(body)) = error_response(
            "x",
            Error::Cadastral(CadastralError::QuotaExceeded("credits".to_string())),
        );
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.kind, "quota_exceeded");

        let (status, _) = error_response(
            "x",
            Error::Cadastral(CadastralError::Status {
                status: 500,
                body: String::new(),
            }),
        );
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_box_response() {
        let section_box = SectionBox::from_corners((0.0, 0.0), (4.0, 2.0)).with_label("Sec. 1 T1N R1E");
        let response = BoxResponse::from(&section_box);
        assert_eq!(response.center, [2.0, 1.0]);
        assert_eq!(response.north, 2.0);
        assert_eq!(response.polygon.len(), 5);
        assert!(response.radius_km > 0.0);
        assert!(response.width_km > response.height_km);
        assert_eq!(response.label.as_deref(), Some("Sec. 1 T1N R1E"));
    }
}
