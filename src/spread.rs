use std::collections::HashSet;

/// 水印扩频种子（固定值，编码端和解码端必须一致）
pub const WATERMARK_SEED: u64 = 42;
/// 每个比特的冗余份数
pub const REDUNDANCY: usize = 8;
/// RGBA 每像素 4 字节，只用前 3 个通道
const CHANNELS: usize = 4;
const COLOR_CHANNELS: usize = 3;
/// 域分隔前缀，换算法时改版本号
const DOMAIN: &[u8] = b"yuanjing-watermark-spread-v1";

/// 扩频位置生成器 (Spread Locator)
///
/// **问题**: 水印的每一位要分散写到 8 个像素通道里，而且解码端必须能算出完全相同的位置，
/// 不能把位置表额外存储在图片之外。
///
/// **做法**: 位置是 (seed, bit 序号, 缓冲区长度) 的纯函数：
/// ```text
/// slot = u64_le( BLAKE3( DOMAIN || seed_le64 || bit_le32 || len_le64 || copy_u8 )[0..8] ) mod usable
/// ```
/// - usable = 像素数 * 3（跳过 Alpha）。slot s 对应字节偏移 (s / 3) * 4 + s % 3。
/// - 如果 slot 已被之前的 (bit, copy) 占用，线性探测到下一个空位。
///
/// **[性质]**:
/// - 纯字节层定义，不依赖任何语言的随机数库，其它实现可以逐字节复现。
/// - 前缀稳定：前 N 位的位置与总共要生成多少位无关，所以编码 300 位、解码读 2048 位时，
///   前 300 位的位置完全一致。
/// - 无冲突：不同比特不会写到同一个通道上互相覆盖。
pub struct SpreadLocator {
    seed: u64,
    buffer_len: usize,
    usable: usize,
    occupied: HashSet<usize>,
    next_bit: u32,
}

impl SpreadLocator {
    pub fn new(seed: u64, buffer_len: usize) -> Self {
        Self {
            seed,
            buffer_len,
            usable: usable_slots(buffer_len),
            occupied: HashSet::new(),
            next_bit: 0,
        }
    }

    /// 这个缓冲区最多能容纳多少比特
    pub fn capacity(&self) -> usize {
        self.usable / REDUNDANCY
    }

    /// 依次生成下一个比特的 8 个字节偏移；容量用完返回 None
    pub fn next_offsets(&mut self) -> Option<[usize; REDUNDANCY]> {
        if self.next_bit as usize >= self.capacity() {
            return None;
        }
        let bit = self.next_bit;
        let mut offsets = [0usize; REDUNDANCY];
        for (copy, offset) in offsets.iter_mut().enumerate() {
            let mut slot = self.candidate_slot(bit, copy as u8);
            while !self.occupied.insert(slot) {
                slot = (slot + 1) % self.usable;
            }
            *offset = slot_to_offset(slot);
        }
        self.next_bit += 1;
        Some(offsets)
    }

    fn candidate_slot(&self, bit: u32, copy: u8) -> usize {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN);
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&bit.to_le_bytes());
        hasher.update(&(self.buffer_len as u64).to_le_bytes());
        hasher.update(&[copy]);
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(head) % self.usable as u64) as usize
    }
}

/// 生成前 `bits` 个比特的全部位置（超过容量的部分截断）
pub fn spread_offsets(seed: u64, buffer_len: usize, bits: usize) -> Vec<[usize; REDUNDANCY]> {
    let mut locator = SpreadLocator::new(seed, buffer_len);
    std::iter::from_fn(|| locator.next_offsets()).take(bits).collect()
}

fn usable_slots(buffer_len: usize) -> usize {
    (buffer_len / CHANNELS) * COLOR_CHANNELS
}

fn slot_to_offset(slot: usize) -> usize {
    (slot / COLOR_CHANNELS) * CHANNELS + slot % COLOR_CHANNELS
}
