use image::{DynamicImage, ImageOutputFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::error::{GateError, Result};
use crate::spread::{SpreadLocator, REDUNDANCY, WATERMARK_SEED};

/// 判定阈值：> 127 读作 1
pub const THRESHOLD: u8 = 127;
/// 解码端最多读取的候选比特数
pub const MAX_CANDIDATE_BITS: usize = 2048;
/// 长度头的合理上限（字节）
pub const MAX_FRAMED_LEN: usize = 10_000;
const HEADER_BITS: usize = 16;
/// 保护带：写 1 后至少 151，写 0 后至多 103，离阈值各 24
const HIGH_BAND: u8 = THRESHOLD + 24;
const LOW_BAND: u8 = THRESHOLD - 24;

/// 水印载荷 (Watermark Payload)
///
/// 用 BCS 编码成紧凑的二进制，字段顺序即编码顺序，改动字段会破坏旧水印的解码。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkPayload {
    pub asset_id: String,
    pub license_terms: String,
    pub copyright_info: String,
    pub metadata: BTreeMap<String, String>,
    /// Unix 秒
    pub timestamp: i64,
}

impl WatermarkPayload {
    /// 必填字段检查：三个字符串非空、时间戳为正；metadata 可以为空
    pub fn is_complete(&self) -> bool {
        !self.asset_id.trim().is_empty()
            && !self.license_terms.trim().is_empty()
            && !self.copyright_info.trim().is_empty()
            && self.timestamp > 0
    }
}

// ==========================================
// 1. 帧格式 (Framing)
// ==========================================
//
//  [ 16 bit 长度头 (大端) ][ payload 字节 ... ][ XOR 校验 1 字节 ]
//    长度头 = payload 字节数 + 1

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// 把载荷编码成待写入的比特流（高位在前）
pub fn payload_bitstream(payload: &WatermarkPayload) -> Result<Vec<bool>> {
    if !payload.is_complete() {
        return Err(GateError::input("水印载荷缺少必填字段"));
    }
    let body = bcs::to_bytes(payload).map_err(|e| GateError::input(format!("水印载荷编码失败: {e}")))?;

    let framed_len = body.len() + 1;
    let total_bits = HEADER_BITS + framed_len * 8;
    if framed_len > MAX_FRAMED_LEN || total_bits > MAX_CANDIDATE_BITS {
        return Err(GateError::input(format!(
            "水印载荷过大: {} 字节, 最多 {} 字节",
            body.len(),
            (MAX_CANDIDATE_BITS - HEADER_BITS) / 8 - 1
        )));
    }

    let mut frame = Vec::with_capacity(framed_len + 2);
    frame.extend_from_slice(&(framed_len as u16).to_be_bytes());
    frame.extend_from_slice(&body);
    frame.push(xor_checksum(&body));

    Ok(frame
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1 == 1))
        .collect())
}

fn bits_to_byte(bits: &[bool]) -> u8 {
    bits.iter().fold(0u8, |acc, bit| (acc << 1) | u8::from(*bit))
}

/// 从比特流还原 payload 字节；长度头或校验和不对时报 IntegrityMismatch
fn unframe(bits: &[bool]) -> Result<Vec<u8>> {
    if bits.len() < HEADER_BITS {
        return Err(GateError::IntegrityMismatch("比特数不足以读出长度头".into()));
    }
    let framed_len = ((bits_to_byte(&bits[..8]) as usize) << 8) | bits_to_byte(&bits[8..16]) as usize;
    if framed_len < 2 || framed_len > MAX_FRAMED_LEN {
        return Err(GateError::IntegrityMismatch(format!("长度头不合理: {framed_len}")));
    }
    let needed = HEADER_BITS + framed_len * 8;
    if needed > bits.len() {
        return Err(GateError::IntegrityMismatch(format!(
            "长度头要求 {needed} 位, 实际只有 {} 位",
            bits.len()
        )));
    }

    let bytes: Vec<u8> = bits[HEADER_BITS..needed].chunks(8).map(bits_to_byte).collect();
    let (body, checksum) = bytes.split_at(framed_len - 1);
    if xor_checksum(body) != checksum[0] {
        return Err(GateError::IntegrityMismatch("校验和不一致".into()));
    }
    Ok(body.to_vec())
}

// ==========================================
// 2. 像素层 (Pixel Layer)
// ==========================================

/// 把一个通道值推到阈值的对应一侧
///
/// 已经在保护带外侧的值不动；在带内的值按原值比例混合进保护带，
/// 保留原有明暗层次而不是一刀切成常数。
fn embed_sample(value: u8, bit: bool) -> u8 {
    if bit {
        if value >= HIGH_BAND {
            value
        } else {
            HIGH_BAND + value / 4
        }
    } else if value <= LOW_BAND {
        value
    } else {
        LOW_BAND - (u8::MAX - value) / 4
    }
}

/// 在 RGBA8 缓冲区里写入水印（原地修改）
pub fn embed_rgba(pixels: &mut [u8], payload: &WatermarkPayload) -> Result<()> {
    let bits = payload_bitstream(payload)?;
    let mut locator = SpreadLocator::new(WATERMARK_SEED, pixels.len());
    if bits.len() > locator.capacity() {
        return Err(GateError::input(format!(
            "图片太小: 需要 {} 位容量, 只有 {} 位",
            bits.len(),
            locator.capacity()
        )));
    }

    for bit in bits {
        let Some(offsets) = locator.next_offsets() else {
            break;
        };
        for offset in offsets {
            pixels[offset] = embed_sample(pixels[offset], bit);
        }
    }
    Ok(())
}

/// 读出前 `count` 个候选比特（多数表决；4:4 平票按 0）
pub fn read_bitstream(pixels: &[u8], count: usize) -> Vec<bool> {
    let mut locator = SpreadLocator::new(WATERMARK_SEED, pixels.len());
    let mut bits = Vec::with_capacity(count.min(locator.capacity()));
    while bits.len() < count {
        let Some(offsets) = locator.next_offsets() else {
            break;
        };
        let ones = offsets.iter().filter(|&&o| pixels[o] > THRESHOLD).count();
        bits.push(ones * 2 > REDUNDANCY);
    }
    bits
}

/// 从 RGBA8 缓冲区提取水印；没有水印 / 数据损坏都返回 None
pub fn extract_rgba(pixels: &[u8]) -> Option<WatermarkPayload> {
    let bits = read_bitstream(pixels, MAX_CANDIDATE_BITS);
    let body = match unframe(&bits) {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("未检测到水印: {}", e);
            return None;
        }
    };
    match bcs::from_bytes::<WatermarkPayload>(&body) {
        Ok(payload) if payload.is_complete() => Some(payload),
        Ok(_) => {
            tracing::debug!("水印载荷缺少必填字段");
            None
        }
        Err(e) => {
            tracing::debug!("水印载荷解析失败: {}", e);
            None
        }
    }
}

// ==========================================
// 3. 图片层 (Image Layer)
// ==========================================

/// 解码图片 -> 写水印 -> 重新编码为 PNG
///
/// **[⚠️ 输出格式]**: 固定输出 PNG。JPEG 之类的有损格式会把保护带磨平，
/// 调用方如果要再压缩，应当在压缩之后重新验证。
pub fn encode(image_bytes: &[u8], payload: &WatermarkPayload) -> Result<Vec<u8>> {
    if image_bytes.is_empty() {
        return Err(GateError::input("图片字节为空"));
    }
    let mut rgba = image::load_from_memory(image_bytes)?.to_rgba8();
    embed_rgba(&mut rgba, payload)?;
    write_png(rgba)
}

/// 解码图片并提取水印；任何失败都当作“没有水印”
pub fn decode(image_bytes: &[u8]) -> Option<WatermarkPayload> {
    let img = image::load_from_memory(image_bytes).ok()?;
    extract_rgba(&img.to_rgba8())
}

fn write_png(rgba: RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(rgba).write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}
