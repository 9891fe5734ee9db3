use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fingerprint::{FingerprintSet, PERCEPTUAL_HASH_BITS};
use crate::provenance::WhitelistEntry;
use crate::registry::HashRegistry;

/// 感知层默认阈值：80% 相似
pub const PERCEPTUAL_THRESHOLD: f64 = 80.0;
/// 语义层默认阈值：75% 相似
pub const SEMANTIC_THRESHOLD: f64 = 75.0;
/// 未命中时最多回报几个“差一点”的候选
const NEAR_MISS_LIMIT: usize = 3;

/// 匹配器读取白名单的接口
///
/// 感知层 / 语义层目前只能全表扫描。以后换成分桶或 ANN 索引时实现这个 trait 即可，
/// 但“取最大值、同分取先遇到的”必须保持不变。
pub trait FingerprintIndex {
    fn lookup_exact(&self, exact_hash: &str) -> Result<Option<WhitelistEntry>>;
    fn scan_all(&self) -> Result<Vec<WhitelistEntry>>;
}

impl FingerprintIndex for HashRegistry {
    fn lookup_exact(&self, exact_hash: &str) -> Result<Option<WhitelistEntry>> {
        self.get(exact_hash)
    }

    fn scan_all(&self) -> Result<Vec<WhitelistEntry>> {
        HashRegistry::scan_all(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchTier {
    Exact,
    Perceptual,
    Semantic,
    None,
}

/// 未达阈值的感知层候选
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearMiss {
    pub source_asset_id: Option<String>,
    pub title: Option<String>,
    pub similarity: f64,
    pub distance: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub found: bool,
    pub tier: MatchTier,
    /// 0.0 ~ 1.0
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_entry: Option<WhitelistEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub near_misses: Vec<NearMiss>,
}

impl MatchResult {
    pub fn none() -> Self {
        Self {
            found: false,
            tier: MatchTier::None,
            confidence: 0.0,
            matched_entry: None,
            near_misses: Vec::new(),
        }
    }

    fn hit(tier: MatchTier, confidence: f64, entry: WhitelistEntry) -> Self {
        Self {
            found: true,
            tier,
            confidence,
            matched_entry: Some(entry),
            near_misses: Vec::new(),
        }
    }
}

/// 汉明距离：两个 16 位十六进制串的不同比特数
///
/// 长度不对或含非十六进制字符（包括 `+` 号）时按最大距离 64 处理。
pub fn hamming_distance(a: &str, b: &str) -> u32 {
    match (parse_perceptual(a), parse_perceptual(b)) {
        (Some(x), Some(y)) => (x ^ y).count_ones(),
        _ => PERCEPTUAL_HASH_BITS,
    }
}

fn parse_perceptual(hash: &str) -> Option<u64> {
    let mut bytes = [0u8; 8];
    hex::decode_to_slice(hash, &mut bytes).ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// 相似度百分比 = (64 - 距离) / 64 * 100
pub fn similarity_percent(distance: u32) -> f64 {
    let distance = distance.min(PERCEPTUAL_HASH_BITS);
    (PERCEPTUAL_HASH_BITS - distance) as f64 / PERCEPTUAL_HASH_BITS as f64 * 100.0
}

/// 余弦相似度；任一向量模长为 0 或维度不一致时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// 分层匹配器 (Tiered Matcher)
///
/// 严格按 exact -> perceptual -> semantic 的顺序查，上一层命中就不再往下走。
#[derive(Debug, Clone, Copy)]
pub struct TieredMatcher {
    pub perceptual_threshold: f64,
    pub semantic_threshold: f64,
}

impl Default for TieredMatcher {
    fn default() -> Self {
        Self {
            perceptual_threshold: PERCEPTUAL_THRESHOLD,
            semantic_threshold: SEMANTIC_THRESHOLD,
        }
    }
}

impl TieredMatcher {
    pub fn new(perceptual_threshold: f64, semantic_threshold: f64) -> Self {
        Self {
            perceptual_threshold,
            semantic_threshold,
        }
    }

    pub fn find_match<I: FingerprintIndex + ?Sized>(
        &self,
        index: &I,
        fingerprints: &FingerprintSet,
    ) -> Result<MatchResult> {
        // 第一层：精确哈希
        if !fingerprints.exact_hash.is_empty() {
            if let Some(entry) = index.lookup_exact(&fingerprints.exact_hash)? {
                tracing::info!(tier = "exact", title = ?entry.metadata.title, "命中白名单");
                return Ok(MatchResult::hit(MatchTier::Exact, 1.0, entry));
            }
        }

        let wants_perceptual = fingerprints.perceptual_hash.is_some();
        let wants_semantic = fingerprints.semantic_embedding.is_some();
        if !wants_perceptual && !wants_semantic {
            return Ok(MatchResult::none());
        }

        // 感知层和语义层共用一次全表扫描
        let entries = index.scan_all()?;
        let mut near_misses = Vec::new();

        // 第二层：感知哈希
        if let Some(query) = fingerprints.perceptual_hash.as_deref() {
            let (best, misses) = self.best_perceptual(query, &entries);
            if let Some((similarity, entry)) = best {
                tracing::info!(tier = "perceptual", similarity, title = ?entry.metadata.title, "命中白名单");
                return Ok(MatchResult::hit(MatchTier::Perceptual, similarity / 100.0, entry.clone()));
            }
            near_misses = misses;
        }

        // 第三层：语义向量
        if let Some(query) = fingerprints.semantic_embedding.as_deref() {
            if let Some((similarity, entry)) = self.best_semantic(query, &entries) {
                tracing::info!(tier = "semantic", similarity, title = ?entry.metadata.title, "命中白名单");
                return Ok(MatchResult::hit(MatchTier::Semantic, similarity / 100.0, entry.clone()));
            }
        }

        Ok(MatchResult {
            near_misses,
            ..MatchResult::none()
        })
    }

    /// 取相似度最高且达标的条目；同分时保留先遇到的（严格大于才替换）。
    /// 顺带收集前几名未达标的候选。
    fn best_perceptual<'a>(
        &self,
        query: &str,
        entries: &'a [WhitelistEntry],
    ) -> (Option<(f64, &'a WhitelistEntry)>, Vec<NearMiss>) {
        let mut best: Option<(f64, &WhitelistEntry)> = None;
        let mut misses: Vec<NearMiss> = Vec::new();

        for entry in entries {
            // 注意：比较的是“查询图的哈希”和“条目的哈希”，不是条目和它自己
            let Some(candidate) = entry.perceptual_hash.as_deref() else {
                continue;
            };
            let distance = hamming_distance(query, candidate);
            let similarity = similarity_percent(distance);

            if similarity >= self.perceptual_threshold {
                if best.map_or(true, |(max, _)| similarity > max) {
                    best = Some((similarity, entry));
                }
            } else {
                misses.push(NearMiss {
                    source_asset_id: entry.metadata.source_asset_id.clone(),
                    title: entry.metadata.title.clone(),
                    similarity,
                    distance,
                });
            }
        }

        // 稳定排序：同分保持遍历顺序
        misses.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        misses.truncate(NEAR_MISS_LIMIT);
        (best, misses)
    }

    fn best_semantic<'a>(
        &self,
        query: &[f32],
        entries: &'a [WhitelistEntry],
    ) -> Option<(f64, &'a WhitelistEntry)> {
        let mut best: Option<(f64, &WhitelistEntry)> = None;
        for entry in entries {
            let Some(candidate) = entry.semantic_embedding.as_deref() else {
                continue;
            };
            let similarity = cosine_similarity(query, candidate) * 100.0;
            if similarity >= self.semantic_threshold && best.map_or(true, |(max, _)| similarity > max) {
                best = Some((similarity, entry));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::ProvenanceMetadata;
    use std::cell::Cell;

    /// 内存索引：按插入顺序遍历，顺便统计调用次数
    #[derive(Default)]
    struct VecIndex {
        entries: Vec<WhitelistEntry>,
        scans: Cell<usize>,
    }

    impl FingerprintIndex for VecIndex {
        fn lookup_exact(&self, exact_hash: &str) -> Result<Option<WhitelistEntry>> {
            Ok(self.entries.iter().find(|e| e.exact_hash == exact_hash).cloned())
        }

        fn scan_all(&self) -> Result<Vec<WhitelistEntry>> {
            self.scans.set(self.scans.get() + 1);
            Ok(self.entries.clone())
        }
    }

    fn entry(id: &str, phash: Option<&str>, embedding: Option<Vec<f32>>) -> WhitelistEntry {
        WhitelistEntry {
            exact_hash: id.repeat(64),
            perceptual_hash: phash.map(str::to_string),
            semantic_embedding: embedding,
            metadata: ProvenanceMetadata {
                source_asset_id: Some(format!("ip-{id}")),
                title: Some(format!("title-{id}")),
                ..Default::default()
            },
            seq: 0,
            inserted_at: 0,
            updated_at: 0,
        }
    }

    fn query(exact: &str, phash: Option<&str>, embedding: Option<Vec<f32>>) -> FingerprintSet {
        FingerprintSet {
            exact_hash: exact.to_string(),
            perceptual_hash: phash.map(str::to_string),
            semantic_embedding: embedding,
        }
    }

    #[test]
    fn hamming_against_self_and_complement() {
        let hash = "a5f00f5a3c3cc3c3";
        let complement = format!("{:016x}", !u64::from_str_radix(hash, 16).unwrap());
        assert_eq!(hamming_distance(hash, hash), 0);
        assert_eq!(similarity_percent(0), 100.0);
        assert_eq!(hamming_distance(hash, &complement), 64);
        assert_eq!(similarity_percent(64), 0.0);
    }

    #[test]
    fn length_mismatch_is_maximal_distance() {
        assert_eq!(hamming_distance("ffff", "ffffffffffffffff"), 64);
        assert_eq!(hamming_distance("zzzzzzzzzzzzzzzz", "ffffffffffffffff"), 64);
        // from_str_radix 会接受前导 '+'，这里不能
        assert_eq!(hamming_distance("+fffffffffffffff", "ffffffffffffffff"), 64);
        assert_eq!(hamming_distance("+fffffffffffffff", "+fffffffffffffff"), 64);
        assert_eq!(hamming_distance("FFFFFFFFFFFFFFFE", "ffffffffffffffff"), 1);
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn exact_tier_short_circuits_scans() {
        let index = VecIndex {
            entries: vec![entry("a", Some("ffffffffffffffff"), None)],
            ..Default::default()
        };
        let result = TieredMatcher::default()
            .find_match(&index, &query(&"a".repeat(64), Some("0000000000000000"), None))
            .unwrap();
        assert_eq!(result.tier, MatchTier::Exact);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(index.scans.get(), 0);
    }

    #[test]
    fn five_bit_difference_is_a_perceptual_match() {
        let index = VecIndex {
            entries: vec![entry("a", Some("ffffffff00000000"), None)],
            ..Default::default()
        };
        // e0 = 1110_0000，与 ff 相差 5 位
        let result = TieredMatcher::default()
            .find_match(&index, &query(&"b".repeat(64), Some("e0ffffff00000000"), None))
            .unwrap();
        assert!(result.found);
        assert_eq!(result.tier, MatchTier::Perceptual);
        assert!((result.confidence * 100.0 - 92.1875).abs() < 1e-9);
    }

    #[test]
    fn ties_keep_first_encountered_entry() {
        let index = VecIndex {
            entries: vec![
                entry("1", Some("0fffffffffffffff"), None),
                entry("2", Some("f0ffffffffffffff"), None),
            ],
            ..Default::default()
        };
        let result = TieredMatcher::default()
            .find_match(&index, &query("", Some("ffffffffffffffff"), None))
            .unwrap();
        let matched = result.matched_entry.unwrap();
        assert_eq!(matched.metadata.source_asset_id.as_deref(), Some("ip-1"));
    }

    #[test]
    fn higher_similarity_wins_over_order() {
        let index = VecIndex {
            entries: vec![
                entry("1", Some("00ffffffffffffff"), None),
                entry("2", Some("0fffffffffffffff"), None),
            ],
            ..Default::default()
        };
        let result = TieredMatcher::default()
            .find_match(&index, &query("", Some("ffffffffffffffff"), None))
            .unwrap();
        assert_eq!(
            result.matched_entry.unwrap().metadata.source_asset_id.as_deref(),
            Some("ip-2")
        );
    }

    #[test]
    fn below_threshold_reports_near_misses() {
        // 相差 16 位 -> 75%，低于 80%
        let index = VecIndex {
            entries: vec![
                entry("1", Some("0000ffffffffffff"), None),
                entry("2", Some("0000000000000000"), None),
                entry("3", None, None),
            ],
            ..Default::default()
        };
        let result = TieredMatcher::default()
            .find_match(&index, &query("", Some("ffffffffffffffff"), None))
            .unwrap();
        assert!(!result.found);
        assert_eq!(result.tier, MatchTier::None);
        assert_eq!(result.near_misses.len(), 2);
        assert_eq!(result.near_misses[0].similarity, 75.0);
        assert_eq!(result.near_misses[1].distance, 64);
    }

    #[test]
    fn semantic_tier_only_runs_when_both_sides_have_vectors() {
        let index = VecIndex {
            entries: vec![
                entry("1", Some("0000000000000000"), None),
                entry("2", None, Some(vec![1.0, 0.1, 0.0])),
            ],
            ..Default::default()
        };
        let matcher = TieredMatcher::default();

        let with_vector = matcher
            .find_match(&index, &query("", Some("ffffffffffffffff"), Some(vec![1.0, 0.0, 0.0])))
            .unwrap();
        assert_eq!(with_vector.tier, MatchTier::Semantic);
        assert!(with_vector.confidence > 0.99);

        let without_vector = matcher
            .find_match(&index, &query("", Some("ffffffffffffffff"), None))
            .unwrap();
        assert!(!without_vector.found);
    }

    #[test]
    fn accepted_perceptual_match_beats_stronger_semantic_candidate() {
        let index = VecIndex {
            entries: vec![
                entry("1", Some("e0ffffffffffffff"), None),
                entry("2", None, Some(vec![1.0, 0.0])),
            ],
            ..Default::default()
        };
        // 感知层 92% 已达标，语义层 100% 不再参与
        let result = TieredMatcher::default()
            .find_match(&index, &query("", Some("ffffffffffffffff"), Some(vec![1.0, 0.0])))
            .unwrap();
        assert_eq!(result.tier, MatchTier::Perceptual);
        assert_eq!(
            result.matched_entry.unwrap().metadata.source_asset_id.as_deref(),
            Some("ip-1")
        );
    }

    #[test]
    fn semantic_threshold_is_inclusive() {
        // (1,0,0,0,0) · (3,2,1,1,1) = 3，|b| = 4，余弦正好 0.75
        let index = VecIndex {
            entries: vec![entry("1", None, Some(vec![3.0, 2.0, 1.0, 1.0, 1.0]))],
            ..Default::default()
        };
        let vector_query = query("", None, Some(vec![1.0, 0.0, 0.0, 0.0, 0.0]));

        let at_boundary = TieredMatcher::default().find_match(&index, &vector_query).unwrap();
        assert_eq!(at_boundary.tier, MatchTier::Semantic);
        assert_eq!(at_boundary.confidence, 0.75);

        let stricter = TieredMatcher::new(PERCEPTUAL_THRESHOLD, 75.001)
            .find_match(&index, &vector_query)
            .unwrap();
        assert!(!stricter.found);
    }

    #[test]
    fn orthogonal_vectors_do_not_match() {
        let index = VecIndex {
            entries: vec![entry("1", None, Some(vec![0.0, 1.0]))],
            ..Default::default()
        };
        // 正交向量，相似度 0
        let result = TieredMatcher::default()
            .find_match(&index, &query("", None, Some(vec![1.0, 0.0])))
            .unwrap();
        assert!(!result.found);
    }

    #[test]
    fn empty_fingerprints_never_match() {
        let index = VecIndex {
            entries: vec![entry("a", Some("0000000000000000"), None)],
            ..Default::default()
        };
        let result = TieredMatcher::default()
            .find_match(&index, &FingerprintSet::default())
            .unwrap();
        assert_eq!(result, MatchResult::none());
        assert_eq!(index.scans.get(), 0);
    }
}
