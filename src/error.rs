use thiserror::Error;

/// 闸门统一结果类型
pub type Result<T> = std::result::Result<T, GateError>;

/// 错误分类 (Error Taxonomy)
///
/// 四大类对应处理策略：
/// - `Input`: 调用方给了坏数据（空字节、哈希长度不对），直接报告，不重试。
/// - `TransientProvider`: 外部 Embedding / 视觉服务超时或失败，降级为“信号缺失”，继续放行 (fail-open)。
/// - `IntegrityMismatch`: 水印长度头 / 校验和不对，对外统一表现为“没有水印”。
/// - `Persistence`: 白名单写入失败，只记 warn，绝不让登记请求失败。
#[derive(Debug, Error)]
pub enum GateError {
    #[error("输入无效: {0}")]
    Input(String),

    #[error("外部服务不可用: {0}")]
    TransientProvider(String),

    #[error("水印完整性校验失败: {0}")]
    IntegrityMismatch(String),

    #[error("白名单持久化失败: {0}")]
    Persistence(#[from] sled::Error),

    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("图像编解码失败: {0}")]
    Image(#[from] image::ImageError),

    #[error("配置错误: {0}")]
    Config(String),

    /// 内部不变量被破坏（后台任务崩溃、写入后读不回等），不是调用方的错
    #[error("内部错误: {0}")]
    Internal(String),
}

impl GateError {
    pub fn input(msg: impl Into<String>) -> Self {
        GateError::Input(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GateError::Internal(msg.into())
    }

    /// 是否属于“可以当作信号缺失继续走”的错误
    pub fn is_fail_open(&self) -> bool {
        matches!(
            self,
            GateError::TransientProvider(_) | GateError::Persistence(_)
        )
    }
}
