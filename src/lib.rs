//! 原镜 · 内容来源闸门 (Yuanjing Provenance Gate)
//!
//! 登记前查重 (exact -> perceptual -> semantic)、按六个视觉信号分组、给出四选一的登记结论，
//! 以及独立的隐形水印编解码。

pub mod api;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod matcher;
pub mod provenance;
pub mod provider;
pub mod registry;
pub mod spread;
pub mod watermark;

pub use error::{GateError, Result};
pub use gate::{Decision, ProvenanceGate};
