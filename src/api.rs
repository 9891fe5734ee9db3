use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    cache::IdempotencyCache,
    classify::{ClassificationFlags, ClassificationOutcome},
    error::GateError,
    gate::{Decision, ProvenanceGate},
    matcher::MatchResult,
    provenance::{ProvenanceMetadata, WhitelistEntry},
    registry::HashRegistry,
    watermark::WatermarkPayload,
};

// ==========================================
// 1. 定义应用状态 (Shared State)
// ==========================================
// 所有的 HTTP 请求都会共享这个状态。
// 白名单自己保证按 Key 串行写，这里不需要再套一层 Mutex。
pub struct AppState {
    pub gate: ProvenanceGate,
    pub idempotency: IdempotencyCache<Decision>,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

// 请求：只带图片路径，服务端自己读文件
#[derive(Deserialize)]
pub struct ImageRequest {
    pub image_path: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub image_path: String,
    #[serde(default)]
    pub metadata: ProvenanceMetadata,
}

#[derive(Deserialize)]
pub struct EvaluateRequest {
    pub image_path: String,
    // 可选：调用方已经有视觉结果时直接带上（允许 "yes"/1 这类宽松写法）
    #[serde(default)]
    pub flags: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct EmbedRequest {
    pub image_path: String,
    pub output_path: String,
    pub payload: WatermarkPayload,
}

#[derive(Serialize)]
pub struct EmbedResponse {
    pub output_path: String,
    pub bytes_written: usize,
}

#[derive(Serialize)]
pub struct ExtractResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<WatermarkPayload>,
}

#[derive(Serialize)]
pub struct EntriesResponse {
    pub total: usize,
    pub entries: Vec<WhitelistEntry>,
}

#[derive(Serialize)]
pub struct AdminResponse {
    pub success: bool,
    pub message: String,
}

// ==========================================
// 3. API 路由构建
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/check", post(check_fingerprint))
        .route("/register", post(register_fingerprint))
        .route("/classify", post(classify_flags))
        .route("/evaluate", post(evaluate))
        .route("/watermark/embed", post(embed_watermark))
        .route("/watermark/extract", post(extract_watermark))
        .route("/admin/entries", get(list_entries))
        .route("/admin/entries/{hash}", delete(delete_entry))
        .route("/admin/clear", post(clear_entries))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()) // ⚠️ 开发模式：允许所有跨域
        .with_state(state)
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

async fn read_image(path: &str) -> ApiResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("图片不存在或不可读: {path} ({e})")))
}

/// 白名单的 sled 读写会阻塞，管理接口也放到 spawn_blocking
async fn with_registry<T, F>(state: &AppState, op: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(HashRegistry) -> crate::error::Result<T> + Send + 'static,
{
    let registry = state.gate.registry().clone();
    tokio::task::spawn_blocking(move || op(registry))
        .await
        .map_err(|e| error_response(GateError::internal(format!("白名单任务异常退出: {e}"))))?
        .map_err(error_response)
}

fn error_response(e: GateError) -> (StatusCode, String) {
    let status = match e {
        GateError::Input(_) | GateError::Image(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// 接口：查重
async fn check_fingerprint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImageRequest>,
) -> ApiResult<Json<MatchResult>> {
    tracing::info!("📥 收到查重请求: 图片={}", req.image_path);
    let bytes = read_image(&req.image_path).await?;
    Ok(Json(state.gate.check_fingerprint(bytes).await))
}

/// 接口：登记指纹（后台执行，立即返回 202）
async fn register_fingerprint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<StatusCode> {
    let bytes = read_image(&req.image_path).await?;
    // 不等待：登记失败只会在后台记 warn
    drop(state.gate.register_fingerprint(bytes, req.metadata));
    Ok(StatusCode::ACCEPTED)
}

/// 接口：按六个信号分类
async fn classify_flags(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<serde_json::Value>,
) -> Json<ClassificationOutcome> {
    let flags = ClassificationFlags::from_loose_json(&raw);
    Json(state.gate.classify(flags))
}

/// 接口：完整登记决策（支持 Idempotency-Key）
async fn evaluate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<EvaluateRequest>,
) -> ApiResult<Json<Decision>> {
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(key) = &idempotency_key {
        if let Some(cached) = state.idempotency.get(key) {
            tracing::debug!(key = %key, "命中幂等缓存");
            return Ok(Json(cached));
        }
    }

    let bytes = read_image(&req.image_path).await?;
    let flags = req.flags.as_ref().map(ClassificationFlags::from_loose_json);
    let decision = state.gate.evaluate(bytes, flags).await;

    if let Some(key) = idempotency_key {
        state.idempotency.insert(key, decision.clone());
    }
    Ok(Json(decision))
}

/// 接口：写入水印并保存到 output_path
async fn embed_watermark(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmbedRequest>,
) -> ApiResult<Json<EmbedResponse>> {
    let bytes = read_image(&req.image_path).await?;
    let marked = state
        .gate
        .embed_watermark(bytes, req.payload)
        .await
        .map_err(error_response)?;
    tokio::fs::write(&req.output_path, &marked)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("写出失败: {e}")))?;

    tracing::info!("✅ 水印已写入: {}", req.output_path);
    Ok(Json(EmbedResponse {
        output_path: req.output_path,
        bytes_written: marked.len(),
    }))
}

/// 接口：提取水印
async fn extract_watermark(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImageRequest>,
) -> ApiResult<Json<ExtractResponse>> {
    let bytes = read_image(&req.image_path).await?;
    let payload = state.gate.extract_watermark(bytes).await;
    Ok(Json(ExtractResponse {
        found: payload.is_some(),
        payload,
    }))
}

/// 管理接口：列出全部条目
async fn list_entries(State(state): State<Arc<AppState>>) -> ApiResult<Json<EntriesResponse>> {
    let entries = with_registry(&state, |registry| registry.scan_all()).await?;
    Ok(Json(EntriesResponse {
        total: entries.len(),
        entries,
    }))
}

/// 管理接口：删除单个哈希
async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> ApiResult<Json<AdminResponse>> {
    let removed = with_registry(&state, move |registry| registry.delete(&hash)).await?;
    let message = if removed { "Hash deleted" } else { "Hash not found" };
    Ok(Json(AdminResponse {
        success: removed,
        message: message.to_string(),
    }))
}

/// 管理接口：清空白名单
async fn clear_entries(State(state): State<Arc<AppState>>) -> ApiResult<Json<AdminResponse>> {
    tracing::warn!("🧹 收到清空白名单请求");
    with_registry(&state, |registry| registry.clear()).await?;
    Ok(Json(AdminResponse {
        success: true,
        message: "Whitelist cleared".to_string(),
    }))
}
