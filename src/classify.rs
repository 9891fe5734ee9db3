use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 视觉服务给出的六个布尔信号
///
/// 兼容两种键名：camelCase（本服务）和 snake_case（上游视觉模型的原始输出）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationFlags {
    #[serde(default, alias = "is_ai_generated")]
    pub is_ai_generated: bool,
    #[serde(default, alias = "is_animation")]
    pub is_animation: bool,
    #[serde(default, alias = "has_human_face")]
    pub has_human_face: bool,
    #[serde(default, alias = "is_full_face_visible")]
    pub is_full_face_visible: bool,
    #[serde(default, alias = "is_famous_person")]
    pub is_famous_person: bool,
    #[serde(default, alias = "has_known_brand_or_character")]
    pub has_known_brand_or_character: bool,
}

impl ClassificationFlags {
    /// 一致性修正：没有人脸就不可能“全脸可见”
    pub fn normalized(mut self) -> Self {
        self.is_full_face_visible = self.has_human_face && self.is_full_face_visible;
        self
    }

    /// 宽松解析视觉模型的 JSON 输出
    ///
    /// 模型经常把布尔值写成 "yes" / 1 / "true"，这里统一收敛成 bool；
    /// 认不出来的一律按 false。
    pub fn from_loose_json(value: &Value) -> Self {
        let flag = |snake: &str, camel: &str| {
            value
                .get(snake)
                .or_else(|| value.get(camel))
                .map(loose_bool)
                .unwrap_or(false)
        };
        Self {
            is_ai_generated: flag("is_ai_generated", "isAiGenerated"),
            is_animation: flag("is_animation", "isAnimation"),
            has_human_face: flag("has_human_face", "hasHumanFace"),
            is_full_face_visible: flag("is_full_face_visible", "isFullFaceVisible"),
            is_famous_person: flag("is_famous_person", "isFamousPerson"),
            has_known_brand_or_character: flag("has_known_brand_or_character", "hasKnownBrandOrCharacter"),
        }
    }
}

fn loose_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "ya" | "1"
        ),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequiredAction {
    None,
    TakeSelfie,
    SubmitReview,
}

/// 分组对应的授权策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LicensePolicy {
    /// 直接登记，AI 训练授权固定为关闭
    FixedAiTraining,
    /// 直接登记，AI 训练授权由用户自选
    ManualAiTraining,
    /// 需要自拍或人工审核，暂不给授权模板
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationOutcome {
    pub group_id: u8,
    pub registration_allowed: bool,
    pub required_action: RequiredAction,
    pub license_policy: LicensePolicy,
    pub ai_generated: bool,
    pub label: String,
    pub verdict: String,
}

/// 分组的主体内容（决定 label 后缀）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    Plain,
    Brand,
    FamousFull,
    FamousPartial,
    OrdinaryFull,
    OrdinaryPartial,
}

/// 一行分组规则
struct GroupRule {
    registration_allowed: bool,
    required_action: RequiredAction,
    license_policy: LicensePolicy,
    ai_generated: bool,
    animation: bool,
    subject: Subject,
}

const fn rule(
    registration_allowed: bool,
    required_action: RequiredAction,
    license_policy: LicensePolicy,
    ai_generated: bool,
    animation: bool,
    subject: Subject,
) -> GroupRule {
    GroupRule {
        registration_allowed,
        required_action,
        license_policy,
        ai_generated,
        animation,
        subject,
    }
}

use self::LicensePolicy::{FixedAiTraining as Fixed, ManualAiTraining as Manual, NotApplicable as Na};
use self::RequiredAction::{None as Direct, SubmitReview as Review, TakeSelfie as Selfie};

/// 16 个分组的固定结果表，下标即 group_id
///
/// | 组 | 内容 | 结果 |
/// |----|------|------|
/// | 0 | 无法判断 | 人工审核 |
/// | 1 / 4 / 6 / 12 | AI 无脸无品牌 / AI 名人半脸 / AI 普通人半脸 / AI 动画无品牌 | 直接登记 (固定 AI 授权) |
/// | 9 / 11 / 14 | 实拍名人半脸 / 实拍普通人半脸 / 手绘动画无品牌 | 直接登记 (自选 AI 授权) |
/// | 5 / 10 | 普通人全脸 | 需要自拍验证 |
/// | 2 / 3 / 7 / 8 / 13 / 15 | 品牌角色 / 名人全脸 | 人工审核 |
static GROUPS: [GroupRule; 16] = [
    rule(false, Review, Na, false, false, Subject::Plain),
    rule(true, Direct, Fixed, true, false, Subject::Plain),
    rule(false, Review, Na, true, false, Subject::Brand),
    rule(false, Review, Na, true, false, Subject::FamousFull),
    rule(true, Direct, Fixed, true, false, Subject::FamousPartial),
    rule(true, Selfie, Na, true, false, Subject::OrdinaryFull),
    rule(true, Direct, Fixed, true, false, Subject::OrdinaryPartial),
    rule(false, Review, Na, false, false, Subject::Brand),
    rule(false, Review, Na, false, false, Subject::FamousFull),
    rule(true, Direct, Manual, false, false, Subject::FamousPartial),
    rule(true, Selfie, Na, false, false, Subject::OrdinaryFull),
    rule(true, Direct, Manual, false, false, Subject::OrdinaryPartial),
    rule(true, Direct, Fixed, true, true, Subject::Plain),
    rule(false, Review, Na, true, true, Subject::Brand),
    rule(true, Direct, Manual, false, true, Subject::Plain),
    rule(false, Review, Na, false, true, Subject::Brand),
];

/// 规则表：按顺序匹配，第一条命中即返回；都不命中为 0 (无法判断)
///
/// 动画优先于人脸判断。调用前 flags 必须已经 `normalized()`。
pub fn determine_group(flags: &ClassificationFlags) -> u8 {
    let ClassificationFlags {
        is_ai_generated: ai,
        is_animation: animation,
        has_human_face: face,
        is_full_face_visible: full,
        is_famous_person: famous,
        has_known_brand_or_character: brand,
    } = *flags;

    if animation {
        return match (ai, brand) {
            (true, false) => 12,
            (true, true) => 13,
            (false, false) => 14,
            (false, true) => 15,
        };
    }

    if ai && !face && !brand {
        return 1;
    }
    if ai && brand && !face {
        return 2;
    }
    if ai && face {
        return match (famous, full) {
            (true, true) => 3,
            (true, false) => 4,
            (false, true) => 5,
            (false, false) => 6,
        };
    }
    if !ai && brand {
        return 7;
    }
    if !ai && face {
        return match (famous, full) {
            (true, true) => 8,
            (true, false) => 9,
            (false, true) => 10,
            (false, false) => 11,
        };
    }
    0
}

/// 分类：一致性修正 -> 查表 -> 组装结果
pub fn classify(flags: ClassificationFlags) -> ClassificationOutcome {
    let flags = flags.normalized();
    let group_id = determine_group(&flags);
    outcome_for_group(group_id)
}

/// 按 group_id 取固定结果；越界按 0 处理
pub fn outcome_for_group(group_id: u8) -> ClassificationOutcome {
    let group_id = if (group_id as usize) < GROUPS.len() { group_id } else { 0 };
    let rule = &GROUPS[group_id as usize];
    ClassificationOutcome {
        group_id,
        registration_allowed: rule.registration_allowed,
        required_action: rule.required_action,
        license_policy: rule.license_policy,
        ai_generated: rule.ai_generated,
        label: label(rule),
        verdict: verdict(group_id, rule),
    }
}

fn label(rule: &GroupRule) -> String {
    let kind = match (rule.animation, rule.ai_generated) {
        (true, true) => "AI Animation",
        (true, false) => "Non-AI Animation",
        (false, true) => "AI Image",
        (false, false) => "Non-AI Image",
    };
    let suffix = match rule.subject {
        Subject::Brand => "with a famous brand/character",
        Subject::FamousFull => "with full public figure face",
        Subject::FamousPartial => "with public figure not fully visible",
        Subject::OrdinaryFull => "with full regular person face",
        Subject::OrdinaryPartial => "with regular person not fully visible",
        Subject::Plain => "without faces/brands",
    };
    format!("{kind} {suffix}")
}

fn verdict(group_id: u8, rule: &GroupRule) -> String {
    let text = match (group_id, rule.required_action, rule.subject) {
        (0, _, _) => "Analysis inconclusive; please submit for review.",
        (_, RequiredAction::TakeSelfie, _) => {
            "This IP can be registered after selfie verification of the pictured person."
        }
        (_, RequiredAction::SubmitReview, Subject::Brand) => {
            "This IP cannot be registered directly because it contains a famous brand/character."
        }
        (_, RequiredAction::SubmitReview, Subject::FamousFull) => {
            "This IP cannot be registered directly because it shows a public figure's full face."
        }
        (_, RequiredAction::SubmitReview, _) => "This IP cannot be registered.",
        (_, RequiredAction::None, Subject::FamousPartial) => {
            "This IP can be registered because the public figure is not fully visible."
        }
        (_, RequiredAction::None, Subject::OrdinaryPartial) => {
            "This IP can be registered because the face is not fully visible."
        }
        (_, RequiredAction::None, _) if rule.animation => {
            "This IP can be registered because it's an animation without brand/character."
        }
        (_, RequiredAction::None, _) => {
            "This IP can be registered because it doesn't show faces/brands."
        }
    };
    text.to_string()
}
