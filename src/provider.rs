use std::sync::Arc;
use std::time::Duration;

use crate::classify::ClassificationFlags;

/// 外部语义 Embedding 服务
///
/// 返回 `Ok(None)` 表示服务正常但这张图没有向量；返回 `Err` 表示调用失败。
/// 两种情况在闸门里都按“语义层不可用”处理。
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, image: &[u8]) -> anyhow::Result<Option<Vec<f32>>>;
}

/// 外部视觉 / 品牌识别服务：只产出六个布尔信号，闸门从不接触模型原始输出
pub trait VisionProvider: Send + Sync {
    fn detect(&self, image: &[u8]) -> anyhow::Result<ClassificationFlags>;
}

/// 带超时调用外部服务，失败一律降级为 None (fail-open)
///
/// 外部调用可能是阻塞 IO，放到 blocking 线程池里跑，避免卡住请求处理线程。
/// 超时后阻塞任务会在后台自然结束，结果被丢弃。
pub async fn call_with_timeout<T, F>(name: &'static str, timeout: Duration, call: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(call)).await {
        Ok(Ok(Ok(value))) => Some(value),
        Ok(Ok(Err(e))) => {
            tracing::warn!(provider = name, "外部服务调用失败，按信号缺失处理: {:#}", e);
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(provider = name, "外部服务任务异常退出: {}", e);
            None
        }
        Err(_) => {
            tracing::warn!(provider = name, ?timeout, "外部服务超时，按信号缺失处理");
            None
        }
    }
}

pub async fn embed_with_timeout(
    provider: &Arc<dyn EmbeddingProvider>,
    image: Arc<[u8]>,
    timeout: Duration,
) -> Option<Vec<f32>> {
    let provider = Arc::clone(provider);
    call_with_timeout("embedding", timeout, move || provider.embed(&image))
        .await
        .flatten()
}

pub async fn detect_with_timeout(
    provider: &Arc<dyn VisionProvider>,
    image: Arc<[u8]>,
    timeout: Duration,
) -> Option<ClassificationFlags> {
    let provider = Arc::clone(provider);
    call_with_timeout("vision", timeout, move || provider.detect(&image)).await
}
