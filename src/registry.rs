use std::path::Path;

use crate::error::{GateError, Result};
use crate::fingerprint::FingerprintSet;
use crate::provenance::{ProvenanceMetadata, WhitelistEntry};

/// 白名单所在的 sled Tree 名
const WHITELIST_TREE: &str = "whitelist";

/// 模块：哈希白名单 (Hash Registry)
///
/// **职责**: 记住“哪些图已经登记过、归谁所有”。
///
/// **存储结构**:
/// - 后端是 sled (嵌入式 KV)，单独一棵 `whitelist` Tree。
/// - Key = 64 字符小写 SHA-256 Hex；Value = `WhitelistEntry` 的 JSON。
/// - 每条记录首次写入时从 `db.generate_id()` 拿一个单调递增的登记序号 (`seq`)。
///   `scan_all` 按序号返回，感知层/语义层“同分取先遇到的”就是先登记的那条，
///   和 exact hash 的字典序无关。
///
/// **并发**:
/// - 读 (`get` / `scan_all`) 不加锁，直接读 sled 快照。
/// - 写 (`put`) 用 sled 的原子 CAS 更新 (`update_and_fetch`)，同一个 Key 的并发写
///   会自动重试，不会丢更新；不同 Key 之间互不影响。
/// - 每次写完 `flush`，保证重启后数据还在。
///
/// `Clone` 很便宜：sled 的 Db / Tree 内部都是 Arc。
#[derive(Clone)]
pub struct HashRegistry {
    db: sled::Db,
    tree: sled::Tree,
}

impl HashRegistry {
    /// 打开（或创建）磁盘上的白名单
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// 临时库：进程退出即删除，测试和基准用
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    fn with_db(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(WHITELIST_TREE)?;
        Ok(Self { db, tree })
    }

    /// 按 exact hash 合并写入元数据
    pub fn put(&self, hash: &str, metadata: ProvenanceMetadata) -> Result<WhitelistEntry> {
        self.upsert(hash, None, None, metadata)
    }

    /// 连同感知哈希和语义向量一起写入（登记流程用这个）
    pub fn put_fingerprints(
        &self,
        fingerprints: &FingerprintSet,
        metadata: ProvenanceMetadata,
    ) -> Result<WhitelistEntry> {
        self.upsert(
            &fingerprints.exact_hash,
            fingerprints.perceptual_hash.as_deref(),
            fingerprints.semantic_embedding.as_deref(),
            metadata,
        )
    }

    /// 核心写路径：读旧值 -> 合并 -> CAS 写回
    ///
    /// **[语法细节 - FnMut 闭包]**: sled 在 CAS 冲突时会重复调用闭包，
    /// 所以闭包里不能有副作用，只根据旧值算新值。
    fn upsert(
        &self,
        hash: &str,
        perceptual_hash: Option<&str>,
        embedding: Option<&[f32]>,
        metadata: ProvenanceMetadata,
    ) -> Result<WhitelistEntry> {
        let key = normalize_hash(hash)?;
        let metadata = metadata.strip_empty();
        let now = chrono::Utc::now().timestamp_millis();
        // 闭包可能被重复调用，序号必须在外面先拿好；更新已有条目时这个号作废
        let seq = self.db.generate_id()?;

        let stored = self.tree.update_and_fetch(key.as_bytes(), |old| {
            let previous = old.and_then(|bytes| serde_json::from_slice::<WhitelistEntry>(bytes).ok());
            let entry = match previous {
                Some(prev) => WhitelistEntry {
                    exact_hash: prev.exact_hash,
                    perceptual_hash: perceptual_hash.map(str::to_string).or(prev.perceptual_hash),
                    semantic_embedding: embedding.map(<[f32]>::to_vec).or(prev.semantic_embedding),
                    metadata: prev.metadata.merge(metadata.clone()),
                    seq: prev.seq,
                    inserted_at: prev.inserted_at,
                    updated_at: now,
                },
                None => WhitelistEntry {
                    exact_hash: key.clone(),
                    perceptual_hash: perceptual_hash.map(str::to_string),
                    semantic_embedding: embedding.map(<[f32]>::to_vec),
                    metadata: metadata.clone(),
                    seq,
                    inserted_at: now,
                    updated_at: now,
                },
            };
            // 序列化失败时保留旧值，绝不能返回 None（那会删掉这个 Key）
            match serde_json::to_vec(&entry) {
                Ok(bytes) => Some(bytes),
                Err(_) => old.map(<[u8]>::to_vec),
            }
        })?;
        self.db.flush()?;

        let bytes = stored.ok_or_else(|| GateError::internal(format!("写入后读不到条目: {key}")))?;
        let entry: WhitelistEntry = serde_json::from_slice(&bytes)?;
        tracing::debug!(hash = %key, "白名单条目已写入");
        Ok(entry)
    }

    /// 精确查找
    pub fn get(&self, hash: &str) -> Result<Option<WhitelistEntry>> {
        let key = normalize_hash(hash)?;
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 全量遍历（按登记顺序）。损坏的条目跳过并告警，不中断遍历。
    pub fn scan_all(&self) -> Result<Vec<WhitelistEntry>> {
        let mut entries = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<WhitelistEntry>(&value) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    key = %String::from_utf8_lossy(&key),
                    "跳过损坏的白名单条目: {}", e
                ),
            }
        }
        // 稳定排序：没有序号的旧数据 (seq = 0) 排在最前，再按首次写入时间
        entries.sort_by_key(|entry| (entry.seq, entry.inserted_at));
        Ok(entries)
    }

    /// 删除单个 Key，返回是否真的删掉了东西
    pub fn delete(&self, hash: &str) -> Result<bool> {
        let key = normalize_hash(hash)?;
        let removed = self.tree.remove(key.as_bytes())?.is_some();
        self.db.flush()?;
        if removed {
            tracing::info!(hash = %key, "白名单条目已删除");
        }
        Ok(removed)
    }

    /// 清空整个白名单（管理操作，不可恢复）
    pub fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        self.db.flush()?;
        tracing::info!("白名单已清空");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// exact hash 必须是 64 个十六进制字符；统一转小写
pub fn normalize_hash(hash: &str) -> Result<String> {
    let trimmed = hash.trim();
    let mut digest = [0u8; 32];
    hex::decode_to_slice(trimmed, &mut digest).map_err(|e| {
        GateError::input(format!(
            "exact hash 必须是 64 位十六进制, 实际长度 {} ({e})",
            trimmed.len()
        ))
    })?;
    Ok(hex::encode(digest))
}
