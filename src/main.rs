use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use clap::Parser;
use lunchrec::{init_tracing, AppState, Config, ItemKey, RecError, RecommendationRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    n: Option<usize>,
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SimilarQuery {
    n: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message,
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<T>>)>;

async fn health_check() -> Json<ApiResponse<HashMap<String, String>>> {
    let mut status = HashMap::new();
    status.insert("status".to_string(), "healthy".to_string());
    status.insert("service".to_string(), "lunchrec".to_string());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

    Json(ApiResponse::success(status))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<RecommendationQuery>,
) -> ApiResult<lunchrec::RecommendationResponse> {
    let request = RecommendationRequest {
        user_id,
        num_recommendations: params.n.unwrap_or(state.config.recommendation.default_n),
        query_text: params.query,
    };

    match state.recommendation_service.recommend(&request).await {
        Ok(response) => Ok(Json(ApiResponse::success(response))),
        Err(e @ RecError::InvalidRequest(_)) => {
            Err((StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string()))))
        }
        Err(e) => {
            tracing::error!("Failed to get recommendations: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, Json(ApiResponse::error(e.to_string()))))
        }
    }
}

async fn get_similar_users(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<SimilarQuery>,
) -> ApiResult<Vec<lunchrec::SimilarUser>> {
    let n = params.n.unwrap_or(state.config.recommendation.neighbors);
    if n == 0 || n > state.config.recommendation.max_n {
        let message = format!("n must be between 1 and {}", state.config.recommendation.max_n);
        return Err((StatusCode::BAD_REQUEST, Json(ApiResponse::error(message))));
    }

    let similar = state.recommendation_service.similar_users(&user_id, n).await;
    Ok(Json(ApiResponse::success(similar)))
}

async fn get_similar_items(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(params): Query<SimilarQuery>,
) -> ApiResult<Vec<lunchrec::SimilarItem>> {
    let item_id: ItemKey = item_id
        .parse()
        .map_err(|e: anyhow::Error| (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string()))))?;

    let n = params.n.unwrap_or(state.config.recommendation.neighbors);
    if n == 0 || n > state.config.recommendation.max_n {
        let message = format!("n must be between 1 and {}", state.config.recommendation.max_n);
        return Err((StatusCode::BAD_REQUEST, Json(ApiResponse::error(message))));
    }

    let similar = state.recommendation_service.similar_items(&item_id, n).await;
    Ok(Json(ApiResponse::success(similar)))
}

async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<serde_json::Value>> {
    let matrix = state.recommendation_service.matrix_stats().await;
    let training = state.training_service.get_training_stats();

    Json(ApiResponse::success(serde_json::json!({
        "matrix": matrix,
        "training": training,
    })))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/recommendations/:user_id", get(get_recommendations))
        .route("/users/:user_id/similar", get(get_similar_users))
        .route("/items/:item_id/similar", get(get_similar_items))
        .route("/stats", get(get_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()?
        .block_on(serve(config))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Starting lunchrec server with config: {:?}", config.server);
    let addr = config.server.socket_addr()?;

    let state = AppState::new(config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
