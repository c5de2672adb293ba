// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::recrawl::{ContentClass, RecrawlPolicies, RecrawlPolicy};
use crate::domain::models::task::TaskKind;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// 应用程序配置设置
///
/// 启动时读取一次，不支持热加载
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    /// 服务器配置
    pub server: ServerSettings,
    /// 数据库配置
    pub database: DatabaseSettings,
    /// Redis配置
    pub redis: RedisSettings,
    /// 队列后端配置
    pub queue: QueueSettings,
    /// 域名限流配置
    #[validate(nested)]
    pub rate_limiting: RateLimitingSettings,
    /// 租约配置
    #[validate(nested)]
    pub lease: LeaseSettings,
    /// 重试配置
    #[validate(nested)]
    pub retry: RetrySettings,
    /// 工作者配置
    #[validate(nested)]
    pub workers: WorkerSettings,
    /// 清扫器配置
    #[validate(nested)]
    pub sweeper: SweeperSettings,
    /// 重爬配置
    #[validate(nested)]
    pub recrawl: RecrawlSettings,
    /// 抓取器配置
    #[validate(nested)]
    pub fetcher: FetcherSettings,
    /// 结果存储配置
    pub sink: SinkSettings,
    /// 指标配置
    pub metrics: MetricsSettings,
}

/// 服务器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// 监听主机地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

/// 数据库配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: Option<u32>,
    /// 最小连接数
    pub min_connections: Option<u32>,
    /// 连接超时时间（秒）
    pub connect_timeout: Option<u64>,
    /// 空闲连接超时时间（秒）
    pub idle_timeout: Option<u64>,
}

/// Redis配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis连接URL
    pub url: String,
}

/// 队列后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackendKind {
    /// 进程内存储
    Memory,
    /// 关系数据库（Postgres / SQLite）
    Sql,
    /// Redis
    Redis,
}

/// 队列配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// 后端类型
    pub backend: QueueBackendKind,
    /// Redis 键前缀
    pub key_prefix: String,
}

/// 限流器后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimiterBackendKind {
    /// 进程内令牌桶
    Local,
    /// 多进程共享的 Redis 令牌桶
    Redis,
}

/// 单个域名的限流覆盖
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct DomainOverride {
    pub burst: Option<u32>,
    pub requests_per_second: Option<f64>,
}

/// 速率限制配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RateLimitingSettings {
    /// 后端类型
    pub backend: RateLimiterBackendKind,
    /// 桶容量
    #[validate(range(min = 1, max = 20))]
    pub burst: u32,
    /// 每秒补充的令牌数
    #[validate(range(min = 0.1, max = 10.0))]
    pub requests_per_second: f64,
    /// 抖动百分比
    #[validate(range(min = 0.0, max = 50.0))]
    pub jitter_percent: f64,
    /// 按域名覆盖
    #[serde(default)]
    #[validate(custom(function = "validate_overrides"))]
    pub overrides: HashMap<String, DomainOverride>,
}

impl RateLimitingSettings {
    /// 抖动因子 (0.0-0.5)
    pub fn jitter_factor(&self) -> f64 {
        self.jitter_percent / 100.0
    }

    /// 域名的桶参数 `(capacity, refill_rate)`
    pub fn bucket_for(&self, domain: &str) -> (f64, f64) {
        let over = self.overrides.get(domain);
        let burst = over.and_then(|o| o.burst).unwrap_or(self.burst);
        let rate = over
            .and_then(|o| o.requests_per_second)
            .unwrap_or(self.requests_per_second);
        (burst as f64, rate)
    }
}

fn validate_overrides(overrides: &HashMap<String, DomainOverride>) -> Result<(), ValidationError> {
    for over in overrides.values() {
        if let Some(burst) = over.burst {
            if !(1..=20).contains(&burst) {
                return Err(ValidationError::new("override_burst_range"));
            }
        }
        if let Some(rate) = over.requests_per_second {
            if !(0.1..=10.0).contains(&rate) {
                return Err(ValidationError::new("override_rate_range"));
            }
        }
    }
    Ok(())
}

/// 租约配置设置
///
/// 租约时长应大于该类型任务处理时间的 99 分位
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LeaseSettings {
    /// 抓取任务租约时长（秒）
    #[validate(range(min = 1))]
    pub crawl_secs: u64,
    /// 解析任务租约时长（秒）
    #[validate(range(min = 1))]
    pub parse_secs: u64,
}

impl LeaseSettings {
    /// 任务类型对应的租约时长
    pub fn duration_for(&self, kind: TaskKind) -> Duration {
        match kind {
            TaskKind::Crawl => Duration::from_secs(self.crawl_secs),
            TaskKind::Parse => Duration::from_secs(self.parse_secs),
        }
    }
}

/// 重试配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RetrySettings {
    /// 最大尝试次数
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    /// 初始退避（毫秒）
    pub base_delay_ms: u64,
    /// 最大退避（秒）
    pub max_delay_secs: u64,
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// 工作者配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WorkerSettings {
    /// 抓取工作循环数量
    pub crawl_concurrency: usize,
    /// 解析工作循环数量
    pub parse_concurrency: usize,
    /// 队列为空时的轮询间隔（毫秒）
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,
    /// 连续存储失败多少次后退出循环
    #[validate(range(min = 1))]
    pub max_store_failures: u32,
    /// 循环退出后的重启延迟（秒）
    pub restart_delay_secs: u64,
    /// 最大链接深度
    pub max_depth: u32,
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

/// 清扫器配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SweeperSettings {
    /// 扫描间隔（秒）
    #[validate(range(min = 1))]
    pub interval_secs: u64,
    /// 任务从入队起的绝对时间上限（秒）
    #[validate(range(min = 1))]
    pub stuck_ceiling_secs: u64,
}

impl SweeperSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stuck_ceiling(&self) -> Duration {
        Duration::from_secs(self.stuck_ceiling_secs)
    }
}

/// 重爬配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecrawlSettings {
    /// 是否启用重爬
    pub enabled: bool,
    /// 静态页面基础间隔（秒）
    #[validate(range(min = 1))]
    pub static_interval_secs: u64,
    /// 渲染页面基础间隔（秒）
    #[validate(range(min = 1))]
    pub rendered_interval_secs: u64,
    /// 动态页面基础间隔（秒）
    #[validate(range(min = 1))]
    pub dynamic_interval_secs: u64,
    /// 是否启用智能间隔调整
    pub smart_adjustment: bool,
    /// 内容未变化时的放大系数
    #[validate(range(exclusive_min = 0.0))]
    pub lengthen_factor: f64,
    /// 内容变化时的缩小系数
    #[validate(range(exclusive_min = 0.0))]
    pub shorten_factor: f64,
    /// 间隔下限（秒）
    pub min_interval_secs: u64,
    /// 间隔上限（秒）
    pub max_interval_secs: u64,
    /// 扫描间隔（秒）
    #[validate(range(min = 1))]
    pub scan_interval_secs: u64,
    /// 每次扫描最多重新入队的记录数
    #[validate(range(min = 1))]
    pub batch_size: u64,
}

impl RecrawlSettings {
    /// 转换为领域层的重爬策略
    pub fn policies(&self) -> RecrawlPolicies {
        let policy = |content_class, secs| RecrawlPolicy {
            content_class,
            base_interval: Duration::from_secs(secs),
            smart_adjustment_enabled: self.smart_adjustment,
        };
        RecrawlPolicies {
            static_policy: policy(ContentClass::Static, self.static_interval_secs),
            rendered_policy: policy(ContentClass::Rendered, self.rendered_interval_secs),
            dynamic_policy: policy(ContentClass::Dynamic, self.dynamic_interval_secs),
            lengthen_factor: self.lengthen_factor,
            shorten_factor: self.shorten_factor,
            min_interval: Duration::from_secs(self.min_interval_secs),
            max_interval: Duration::from_secs(self.max_interval_secs),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// 抓取器配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FetcherSettings {
    /// User-Agent 请求头
    pub user_agent: String,
    /// 请求超时（秒）
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

/// 结果存储配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct SinkSettings {
    /// 本地输出目录
    pub directory: String,
}

/// 指标配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// 是否启用 Prometheus 导出
    pub enabled: bool,
    /// 监听地址
    pub listen: String,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加内置默认值、`config/default`、`config/{APP_ENVIRONMENT}`
    /// 以及 `CRAWLQ__SECTION__KEY` 形式的环境变量
    ///
    /// # 返回值
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        Self::with_defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("CRAWLQ")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// 仅由内置默认值构成的配置
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::with_defaults()?.build()?.try_deserialize()
    }

    fn with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.url", "sqlite://crawlq.db?mode=rwc")?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout", 10)?
            .set_default("database.idle_timeout", 300)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("queue.backend", "memory")?
            .set_default("queue.key_prefix", "crawlq")?
            .set_default("rate_limiting.backend", "local")?
            .set_default("rate_limiting.burst", 5)?
            .set_default("rate_limiting.requests_per_second", 1.0)?
            .set_default("rate_limiting.jitter_percent", 20.0)?
            .set_default("lease.crawl_secs", 120)?
            .set_default("lease.parse_secs", 60)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 1000)?
            .set_default("retry.max_delay_secs", 300)?
            .set_default("workers.crawl_concurrency", 4)?
            .set_default("workers.parse_concurrency", 2)?
            .set_default("workers.poll_interval_ms", 500)?
            .set_default("workers.max_store_failures", 5)?
            .set_default("workers.restart_delay_secs", 5)?
            .set_default("workers.max_depth", 3)?
            .set_default("sweeper.interval_secs", 60)?
            .set_default("sweeper.stuck_ceiling_secs", 2 * 3600)?
            .set_default("recrawl.enabled", true)?
            .set_default("recrawl.static_interval_secs", 48 * 3600)?
            .set_default("recrawl.rendered_interval_secs", 24 * 3600)?
            .set_default("recrawl.dynamic_interval_secs", 6 * 3600)?
            .set_default("recrawl.smart_adjustment", true)?
            .set_default("recrawl.lengthen_factor", 1.5)?
            .set_default("recrawl.shorten_factor", 0.5)?
            .set_default("recrawl.min_interval_secs", 3600)?
            .set_default("recrawl.max_interval_secs", 30 * 24 * 3600)?
            .set_default("recrawl.scan_interval_secs", 60)?
            .set_default("recrawl.batch_size", 100)?
            .set_default("fetcher.user_agent", "crawlq/0.1")?
            .set_default("fetcher.timeout_secs", 30)?
            .set_default("sink.directory", "./output")?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.listen", "0.0.0.0:9000")
    }
}
