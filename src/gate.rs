use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::classify::{self, ClassificationFlags, ClassificationOutcome, RequiredAction};
use crate::config::Config;
use crate::error::{GateError, Result};
use crate::fingerprint::{self, FingerprintSet};
use crate::matcher::{MatchResult, MatchTier, TieredMatcher};
use crate::provenance::ProvenanceMetadata;
use crate::provider::{self, EmbeddingProvider, VisionProvider};
use crate::registry::HashRegistry;
use crate::watermark::{self, WatermarkPayload};

/// 闸门的四种结论 (Disposition)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "camelCase")]
pub enum Decision {
    /// 直接放行登记
    #[serde(rename_all = "camelCase")]
    Allow {
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<u8>,
    },
    /// 撞上已登记资产：不直接拦截，而是引导走二创 (Remix) 路径
    #[serde(rename_all = "camelCase")]
    OfferRemix {
        source_asset_id: Option<String>,
        title: Option<String>,
        tier: MatchTier,
        confidence: f64,
        derivatives_allowed: bool,
    },
    #[serde(rename_all = "camelCase")]
    RequireSelfie { group_id: u8 },
    #[serde(rename_all = "camelCase")]
    BlockSubmitReview { group_id: u8 },
}

/// 决策表：匹配结果 + 分类结果 -> 四选一
///
/// - 任意层命中 => OfferRemix
/// - 未命中时看分类：
///   - 需要自拍 => RequireSelfie
///   - 不允许登记（含 0 组“无法判断”）=> BlockSubmitReview
///   - 允许且无额外动作 => Allow
///   - 分类信号缺失 (None) => Allow，外部服务故障不阻塞登记 (fail-open)
pub fn decide_with(matched: &MatchResult, outcome: Option<&ClassificationOutcome>) -> Decision {
    if matched.found {
        let metadata = matched.matched_entry.as_ref().map(|e| &e.metadata);
        return Decision::OfferRemix {
            source_asset_id: metadata.and_then(|m| m.source_asset_id.clone()),
            title: metadata.and_then(|m| m.title.clone()),
            tier: matched.tier,
            confidence: matched.confidence,
            derivatives_allowed: metadata.map_or(true, ProvenanceMetadata::derivatives_allowed),
        };
    }

    let Some(outcome) = outcome else {
        return Decision::Allow { group_id: None };
    };
    match outcome.required_action {
        RequiredAction::TakeSelfie => Decision::RequireSelfie {
            group_id: outcome.group_id,
        },
        _ if !outcome.registration_allowed => Decision::BlockSubmitReview {
            group_id: outcome.group_id,
        },
        RequiredAction::None => Decision::Allow {
            group_id: Some(outcome.group_id),
        },
        RequiredAction::SubmitReview => Decision::BlockSubmitReview {
            group_id: outcome.group_id,
        },
    }
}

/// 以原始 flags 决策（内部先做一致性修正再查表）
pub fn decide(matched: &MatchResult, flags: &ClassificationFlags) -> Decision {
    let outcome = classify::classify(*flags);
    decide_with(matched, Some(&outcome))
}

/// 原镜 · 内容来源闸门 (Provenance Gate)
///
/// **职责**: 对外暴露五个能力，内部串起 指纹 -> 分层匹配 -> 分类 -> 决策。
///
/// **线程模型**:
/// - 指纹、匹配、水印都是 CPU 密集的纯函数，统一放到 `spawn_blocking`，不占用请求线程。
/// - 白名单是唯一共享的可变状态，由 `HashRegistry` 自己保证按 Key 串行写。
/// - 外部服务带各自的超时，失败即视为信号缺失。
#[derive(Clone)]
pub struct ProvenanceGate {
    registry: HashRegistry,
    matcher: TieredMatcher,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    vision: Option<Arc<dyn VisionProvider>>,
    provider_timeout: Duration,
}

impl ProvenanceGate {
    pub fn new(registry: HashRegistry) -> Self {
        Self {
            registry,
            matcher: TieredMatcher::default(),
            embedder: None,
            vision: None,
            provider_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(registry: HashRegistry, config: &Config) -> Self {
        Self {
            matcher: TieredMatcher::new(config.perceptual_threshold, config.semantic_threshold),
            provider_timeout: config.provider_timeout,
            ..Self::new(registry)
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionProvider>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn registry(&self) -> &HashRegistry {
        &self.registry
    }

    /// 提取三层指纹（语义层可选，拿不到就跳过）
    pub async fn fingerprints(&self, image: Arc<[u8]>) -> Result<FingerprintSet> {
        let bytes = Arc::clone(&image);
        let set = tokio::task::spawn_blocking(move || fingerprint::compute(&bytes))
            .await
            .map_err(|e| GateError::internal(format!("指纹任务异常退出: {e}")))?;
        if set.is_empty() {
            return Ok(set);
        }

        let embedding = match &self.embedder {
            Some(embedder) => provider::embed_with_timeout(embedder, image, self.provider_timeout).await,
            None => None,
        };
        Ok(set.with_embedding(embedding))
    }

    /// checkFingerprint：查重
    ///
    /// 白名单读失败时按“没命中”返回 (fail-open)。
    pub async fn check_fingerprint(&self, image: Vec<u8>) -> MatchResult {
        let image: Arc<[u8]> = Arc::from(image);
        let set = match self.fingerprints(image).await {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!("指纹提取失败，按未命中处理: {}", e);
                return MatchResult::none();
            }
        };
        self.match_fingerprints(set).await
    }

    async fn match_fingerprints(&self, set: FingerprintSet) -> MatchResult {
        let registry = self.registry.clone();
        let matcher = self.matcher;
        let joined = tokio::task::spawn_blocking(move || matcher.find_match(&registry, &set)).await;
        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_fail_open() => {
                tracing::warn!("白名单读取失败，按未命中处理: {}", e);
                MatchResult::none()
            }
            Ok(Err(e)) => {
                tracing::warn!("匹配失败，按未命中处理: {}", e);
                MatchResult::none()
            }
            Err(e) => {
                tracing::warn!("匹配任务异常退出: {}", e);
                MatchResult::none()
            }
        }
    }

    /// 同步写入白名单，返回真实结果（后台登记任务内部调用它）
    pub async fn capture(&self, image: Arc<[u8]>, metadata: ProvenanceMetadata) -> Result<()> {
        let set = self.fingerprints(image).await?;
        if set.exact_hash.is_empty() {
            return Err(GateError::input("图片为空或无法解码，无法登记指纹"));
        }
        let registry = self.registry.clone();
        let entry = tokio::task::spawn_blocking(move || registry.put_fingerprints(&set, metadata))
            .await
            .map_err(|e| GateError::internal(format!("登记任务异常退出: {e}")))??;
        tracing::info!(hash = %entry.exact_hash, title = ?entry.metadata.title, "指纹已登记");
        Ok(())
    }

    /// registerFingerprint：后台尽力登记，立即返回
    ///
    /// 调用方可以直接丢弃返回的 JoinHandle；失败只记 warn，不影响调用方。
    pub fn register_fingerprint(&self, image: Vec<u8>, metadata: ProvenanceMetadata) -> JoinHandle<()> {
        let gate = self.clone();
        tokio::spawn(async move {
            if let Err(e) = gate.capture(Arc::from(image), metadata).await {
                tracing::warn!("指纹登记失败（不影响主流程）: {}", e);
            }
        })
    }

    /// classify：纯查表
    pub fn classify(&self, flags: ClassificationFlags) -> ClassificationOutcome {
        classify::classify(flags)
    }

    /// 完整决策：查重 + 分类
    ///
    /// `flags` 由调用方提供时直接使用；否则询问视觉服务，失败视为信号缺失。
    pub async fn evaluate(&self, image: Vec<u8>, flags: Option<ClassificationFlags>) -> Decision {
        let image: Arc<[u8]> = Arc::from(image);
        let matched = match self.fingerprints(Arc::clone(&image)).await {
            Ok(set) => self.match_fingerprints(set).await,
            Err(e) => {
                tracing::warn!("指纹提取失败，按未命中处理: {}", e);
                MatchResult::none()
            }
        };
        if matched.found {
            return decide_with(&matched, None);
        }

        let flags = match (flags, &self.vision) {
            (Some(flags), _) => Some(flags),
            (None, Some(vision)) => provider::detect_with_timeout(vision, image, self.provider_timeout).await,
            (None, None) => None,
        };
        let outcome = flags.map(classify::classify);
        let decision = decide_with(&matched, outcome.as_ref());
        tracing::info!(?decision, "登记决策完成");
        decision
    }

    /// embedWatermark
    pub async fn embed_watermark(&self, image: Vec<u8>, payload: WatermarkPayload) -> Result<Vec<u8>> {
        tokio::task::spawn_blocking(move || watermark::encode(&image, &payload))
            .await
            .map_err(|e| GateError::internal(format!("水印任务异常退出: {e}")))?
    }

    /// extractWatermark：没有水印返回 None，从不报错
    pub async fn extract_watermark(&self, image: Vec<u8>) -> Option<WatermarkPayload> {
        tokio::task::spawn_blocking(move || watermark::decode(&image))
            .await
            .ok()
            .flatten()
    }
}
