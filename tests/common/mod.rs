#![allow(dead_code)]

use image::{DynamicImage, ImageOutputFormat, RgbaImage};
use std::io::Cursor;

/// 带纹理的测试图（PNG 字节）
pub fn textured_png(width: u32, height: u32, phase: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        let v = ((x * 5 + y * 11 + phase) % 256) as u8;
        image::Rgba([v, 255 - v, (x % 200) as u8, 255])
    });
    to_png(img)
}

/// 左右两半明暗分明的测试图
pub fn split_png(width: u32, height: u32, bright_left: bool) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        let left = x < width / 2;
        let v = if left == bright_left { 230 } else { 20 };
        image::Rgba([v, v, v, 255])
    });
    to_png(img)
}

pub fn to_png(img: RgbaImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}
