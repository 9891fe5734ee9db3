use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GateError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// 感知哈希层接受阈值 (百分比)
    pub perceptual_threshold: f64,
    /// 语义层接受阈值 (百分比)
    pub semantic_threshold: f64,
    /// 每次外部服务调用的超时
    pub provider_timeout: Duration,
    pub idempotency_ttl: Duration,
    pub idempotency_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            db_path: "data/db/whitelist_db".to_string(),
            perceptual_threshold: 80.0,
            semantic_threshold: 75.0,
            provider_timeout: Duration::from_millis(5000),
            idempotency_ttl: Duration::from_secs(60),
            idempotency_capacity: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT", defaults.port)?,
            db_path: env::var("DB_PATH").unwrap_or(defaults.db_path),
            perceptual_threshold: parse_var("PERCEPTUAL_THRESHOLD", defaults.perceptual_threshold)?,
            semantic_threshold: parse_var("SEMANTIC_THRESHOLD", defaults.semantic_threshold)?,
            provider_timeout: Duration::from_millis(parse_var("PROVIDER_TIMEOUT_MS", 5000u64)?),
            idempotency_ttl: Duration::from_secs(parse_var("IDEMPOTENCY_TTL_SECS", 60u64)?),
            idempotency_capacity: parse_var("IDEMPOTENCY_CAPACITY", defaults.idempotency_capacity)?,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GateError::Config(format!("{name} 必须是数字, 实际为 {raw:?}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = Config::default();
        assert_eq!(config.perceptual_threshold, 80.0);
        assert_eq!(config.semantic_threshold, 75.0);
        assert_eq!(config.idempotency_ttl, Duration::from_secs(60));
    }

    #[test]
    fn unparsable_number_is_config_error() {
        // 独占的变量名，避免和其它测试并发抢同一个环境变量
        env::set_var("YUANJING_TEST_BAD_PORT", "not-a-port");
        let parsed: Result<u16> = parse_var("YUANJING_TEST_BAD_PORT", 3000);
        assert!(matches!(parsed, Err(GateError::Config(_))));
        env::remove_var("YUANJING_TEST_BAD_PORT");

        let fallback: u16 = parse_var("YUANJING_TEST_UNSET_PORT", 3000).unwrap();
        assert_eq!(fallback, 3000);
    }
}
