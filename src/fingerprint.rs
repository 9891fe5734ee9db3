use image::imageops::FilterType; // 降采样滤波器
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256}; // 引入 SHA2 算法和 Digest 特性(方法集)

/// 感知哈希降采样网格边长 (32x32 灰度)
pub const GRID_SIZE: u32 = 32;
/// 每行/每列的分块数：8x8 = 64 块 = 64 位
const BLOCKS_PER_SIDE: u32 = 8;
const BLOCK_SIZE: u32 = GRID_SIZE / BLOCKS_PER_SIDE;
/// 感知哈希固定 64 位，16 个十六进制字符
pub const PERCEPTUAL_HASH_BITS: u32 = 64;
pub const PERCEPTUAL_HASH_HEX_LEN: usize = 16;

/// 指纹集合 (FingerprintSet)
///
/// 三层指纹，由粗到细对应 Tiered Matcher 的三层查询：
/// - `exact_hash`: SHA-256，任何一个字节变化都会雪崩。
/// - `perceptual_hash`: 64 位块均值哈希，抗压缩、抗缩放，不抗裁剪/旋转。
/// - `semantic_embedding`: 外部 Embedding 服务给的向量，可以没有。
///
/// 空输入或无法解码的图片得到“全空”集合，下游自然 found=false，不报错。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintSet {
    /// 64 字符小写 Hex；全空集合里为空字符串
    pub exact_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_embedding: Option<Vec<f32>>,
}

impl FingerprintSet {
    pub fn is_empty(&self) -> bool {
        self.exact_hash.is_empty()
            && self.perceptual_hash.is_none()
            && self.semantic_embedding.is_none()
    }

    /// 挂上外部 Embedding（拿不到就保持 None，语义层会被跳过）
    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.semantic_embedding = embedding.filter(|v| !v.is_empty());
        self
    }
}

/// 计算原始字节序列的 SHA-256，输出小写十六进制
pub fn exact_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    // `{:x}`: 二进制 -> 小写十六进制字符串 (Lower Hex)
    format!("{:x}", hasher.finalize())
}

/// 从内存中的图片字节提取指纹
///
/// **流程**:
/// 1. 空字节直接返回全空集合。
/// 2. 解码失败（不是图片 / 文件损坏）同样返回全空集合，只记 debug 日志。
/// 3. SHA-256 针对原始字节，而不是解码后的像素。
pub fn compute(image_bytes: &[u8]) -> FingerprintSet {
    if image_bytes.is_empty() {
        return FingerprintSet::default();
    }

    let img = match image::load_from_memory(image_bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::debug!("图片解码失败，返回空指纹: {}", e);
            return FingerprintSet::default();
        }
    };

    FingerprintSet {
        exact_hash: exact_hash(image_bytes),
        perceptual_hash: Some(perceptual_hash(&img)),
        semantic_embedding: None,
    }
}

/// 块均值感知哈希 (Block-Mean pHash)
///
/// ```text
///  32x32 灰度网格，切成 8x8 个 4x4 小块
///  +----+----+-- ... --+----+
///  | b0 | b1 |         | b7 |     bit i = 1  当且仅当  mean(block i) > mean(grid)
///  +----+----+-- ... --+----+
///  | b8 |    |         |b15 |     按行优先顺序，bit 0 是第一个十六进制字符的最高位
///  ...
/// ```
pub fn perceptual_hash(img: &image::DynamicImage) -> String {
    let small = img
        .resize_exact(GRID_SIZE, GRID_SIZE, FilterType::Triangle)
        .to_rgb8();

    // 亮度公式 (BT.601): 0.299 R + 0.587 G + 0.114 B，四舍五入到整数
    let gray: Vec<f64> = small
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64).round()
        })
        .collect();

    let global_mean = gray.iter().sum::<f64>() / gray.len() as f64;

    let mut bits: u64 = 0;
    for i in 0..PERCEPTUAL_HASH_BITS {
        let block_row = i / BLOCKS_PER_SIDE;
        let block_col = i % BLOCKS_PER_SIDE;
        let mut sum = 0.0;
        for y in 0..BLOCK_SIZE {
            for x in 0..BLOCK_SIZE {
                let row = block_row * BLOCK_SIZE + y;
                let col = block_col * BLOCK_SIZE + x;
                sum += gray[(row * GRID_SIZE + col) as usize];
            }
        }
        let block_mean = sum / (BLOCK_SIZE * BLOCK_SIZE) as f64;
        bits <<= 1;
        if block_mean > global_mean {
            bits |= 1;
        }
    }

    format!("{:016x}", bits)
}
