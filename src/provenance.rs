use serde::{Deserialize, Serialize}; // 序列化：白名单条目以 JSON 形式落盘
use serde_json::Value;
use std::collections::BTreeMap;

/// 来源元数据 (Provenance Metadata)
///
/// 开放结构：固定字段之外的任何键都收进 `extra`，原样保存。
/// 所有字段都是可选的，因为合并 (merge) 时调用方常常只带一部分字段。
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceMetadata {
    // === 第一层：身份 (Identity) ===

    // 已登记资产的 ID
    // 作用：命中后告诉调用方“你撞上了谁”，用于给出 Remix 路径。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_asset_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    // 所有者地址（通常是链上钱包地址 0x...）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_address: Option<String>,

    // === 第二层：授权 (Licensing) ===

    // 许可条款列表
    // 细节：结构由上游注册服务决定，这里只关心 licenses[0].terms.derivativesAllowed。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licenses: Option<Vec<Value>>,

    // === 第三层：血缘 (Lineage) ===
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_derivative: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_asset_ids: Option<Vec<String>>,

    // === 扩展字段 ===
    // 作用：description / mediaType / visionDescription 之类的自由字段。
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ProvenanceMetadata {
    /// 去掉所有空值：None、空字符串、空数组、空对象、null
    pub fn strip_empty(mut self) -> Self {
        self.source_asset_id = non_empty_string(self.source_asset_id);
        self.title = non_empty_string(self.title);
        self.owner_address = non_empty_string(self.owner_address);
        self.licenses = self.licenses.filter(|l| !l.is_empty());
        self.parent_asset_ids = self.parent_asset_ids.and_then(|ids| {
            let ids: Vec<String> = ids.into_iter().filter(|id| !id.trim().is_empty()).collect();
            (!ids.is_empty()).then_some(ids)
        });
        self.extra.retain(|_, v| !is_empty_value(v));
        self
    }

    /// 合并：新来的非空字段覆盖旧值，空字段不动旧值
    pub fn merge(self, incoming: ProvenanceMetadata) -> Self {
        let incoming = incoming.strip_empty();
        let mut merged = self.strip_empty();

        if incoming.source_asset_id.is_some() {
            merged.source_asset_id = incoming.source_asset_id;
        }
        if incoming.title.is_some() {
            merged.title = incoming.title;
        }
        if incoming.owner_address.is_some() {
            merged.owner_address = incoming.owner_address;
        }
        if incoming.licenses.is_some() {
            merged.licenses = incoming.licenses;
        }
        if incoming.is_derivative.is_some() {
            merged.is_derivative = incoming.is_derivative;
        }
        if incoming.parent_asset_ids.is_some() {
            merged.parent_asset_ids = incoming.parent_asset_ids;
        }
        merged.extra.extend(incoming.extra);
        merged
    }

    /// 是否允许二创
    ///
    /// 没有任何 license 时默认允许；有 license 时以第一条的
    /// `terms.derivativesAllowed == true` 为准。
    pub fn derivatives_allowed(&self) -> bool {
        match self.licenses.as_deref() {
            None | Some([]) => true,
            Some([first, ..]) => first
                .pointer("/terms/derivativesAllowed")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

fn non_empty_string(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// 白名单条目 (Whitelist Entry)
///
/// 主键 `exact_hash` 一旦写入就不再变化；之后只能通过元数据合并更新。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistEntry {
    pub exact_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_embedding: Option<Vec<f32>>,
    pub metadata: ProvenanceMetadata,
    /// 登记序号：首次写入时由 sled 分配，单调递增，合并时保留。
    /// `scan_all` 按它排序，所以“同分取先遇到的”就是“同分取先登记的”。
    #[serde(default)]
    pub seq: u64,
    /// 首次写入时间 (Unix 毫秒)，合并时保留
    pub inserted_at: i64,
    pub updated_at: i64,
}
