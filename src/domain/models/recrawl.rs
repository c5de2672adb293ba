// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lease::to_chrono;
use crate::domain::models::task::{DomainError, Validators};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 内容分类
///
/// 根据页面的渲染需求决定重爬节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    /// 静态页面
    #[default]
    Static,
    /// 需要脚本渲染的页面
    Rendered,
    /// 频繁变化的动态页面
    Dynamic,
}

impl ContentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::Static => "static",
            ContentClass::Rendered => "rendered",
            ContentClass::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(ContentClass::Static),
            "rendered" => Ok(ContentClass::Rendered),
            "dynamic" => Ok(ContentClass::Dynamic),
            other => Err(DomainError::ValidationError(format!(
                "unknown content class: {}",
                other
            ))),
        }
    }
}

/// 单个内容分类的重爬策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecrawlPolicy {
    pub content_class: ContentClass,
    /// 基础间隔
    pub base_interval: Duration,
    /// 是否根据内容变化调整间隔
    pub smart_adjustment_enabled: bool,
}

/// 全部分类的重爬策略
///
/// 调整系数与上下限都是运营默认值，可通过配置覆盖
#[derive(Debug, Clone, PartialEq)]
pub struct RecrawlPolicies {
    pub static_policy: RecrawlPolicy,
    pub rendered_policy: RecrawlPolicy,
    pub dynamic_policy: RecrawlPolicy,
    /// 内容未变化时的间隔放大系数
    pub lengthen_factor: f64,
    /// 内容变化时的间隔缩小系数
    pub shorten_factor: f64,
    /// 间隔下限
    pub min_interval: Duration,
    /// 间隔上限
    pub max_interval: Duration,
}

impl Default for RecrawlPolicies {
    fn default() -> Self {
        let hours = |h: u64| Duration::from_secs(h * 3600);
        Self {
            static_policy: RecrawlPolicy {
                content_class: ContentClass::Static,
                base_interval: hours(48),
                smart_adjustment_enabled: true,
            },
            rendered_policy: RecrawlPolicy {
                content_class: ContentClass::Rendered,
                base_interval: hours(24),
                smart_adjustment_enabled: true,
            },
            dynamic_policy: RecrawlPolicy {
                content_class: ContentClass::Dynamic,
                base_interval: hours(6),
                smart_adjustment_enabled: true,
            },
            lengthen_factor: 1.5,
            shorten_factor: 0.5,
            min_interval: hours(1),
            max_interval: hours(24 * 30),
        }
    }
}

impl RecrawlPolicies {
    /// 分类对应的策略
    pub fn policy_for(&self, class: ContentClass) -> &RecrawlPolicy {
        match class {
            ContentClass::Static => &self.static_policy,
            ContentClass::Rendered => &self.rendered_policy,
            ContentClass::Dynamic => &self.dynamic_policy,
        }
    }

    /// 计算下一次重爬间隔
    ///
    /// # 参数
    ///
    /// * `class` - 本次抓取得到的内容分类
    /// * `previous` - 已有记录的当前间隔与哈希，首次抓取为 `None`
    /// * `new_hash` - 本次内容哈希
    ///
    /// # 返回值
    ///
    /// 首次抓取或关闭智能调整时返回基础间隔；内容未变化时放大（不超过上限），
    /// 变化时缩小（不低于下限）。分类变化时从新分类的基础间隔重新开始。
    pub fn next_interval(
        &self,
        class: ContentClass,
        previous: Option<(ContentClass, Duration, Option<&str>)>,
        new_hash: &str,
    ) -> Duration {
        let policy = self.policy_for(class);
        let Some((prev_class, current, prev_hash)) = previous else {
            return policy.base_interval;
        };
        if !policy.smart_adjustment_enabled || prev_class != class {
            return policy.base_interval;
        }

        match prev_hash {
            None => policy.base_interval,
            Some(hash) if hash == new_hash => {
                let lengthened = current.mul_f64(self.lengthen_factor);
                lengthened.min(self.max_interval.max(current))
            }
            Some(_) => {
                let shortened = current.mul_f64(self.shorten_factor);
                shortened.max(self.min_interval.min(current))
            }
        }
    }
}

/// URL 重爬状态
///
/// Fresh → Eligible → Leased → Completed → (间隔后) Eligible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UrlState {
    /// 尚未完成过抓取
    #[default]
    Fresh,
    /// 已到重爬时间
    Eligible,
    /// 已重新入队，等待完成
    Leased,
    /// 最近一次抓取已完成
    Completed,
}

impl UrlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlState::Fresh => "fresh",
            UrlState::Eligible => "eligible",
            UrlState::Leased => "leased",
            UrlState::Completed => "completed",
        }
    }
}

impl FromStr for UrlState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fresh" => Ok(UrlState::Fresh),
            "eligible" => Ok(UrlState::Eligible),
            "leased" => Ok(UrlState::Leased),
            "completed" => Ok(UrlState::Completed),
            other => Err(DomainError::ValidationError(format!(
                "unknown url state: {}",
                other
            ))),
        }
    }
}

/// URL 重爬记录
///
/// 首次抓取完成时创建，之后每次完成都会更新，从不硬删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub domain: String,
    pub content_class: ContentClass,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub last_hash: Option<String>,
    /// 当前重爬间隔（秒）
    pub current_interval_secs: i64,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub state: UrlState,
    /// 附加到重爬任务负载中的条件请求信息
    pub validators: Validators,
    pub crawl_count: u64,
    /// 最近一次重新入队的时间
    pub readmitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UrlRecord {
    /// 创建尚未抓取过的记录
    pub fn fresh(
        url: impl Into<String>,
        domain: impl Into<String>,
        content_class: ContentClass,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            domain: domain.into(),
            content_class,
            last_crawled_at: None,
            last_hash: None,
            current_interval_secs: 0,
            next_eligible_at: None,
            state: UrlState::Fresh,
            validators: Validators::default(),
            crawl_count: 0,
            readmitted_at: None,
            updated_at: now,
        }
    }

    pub fn current_interval(&self) -> Duration {
        Duration::from_secs(self.current_interval_secs.max(0) as u64)
    }

    /// 记录一次完成的抓取
    pub fn complete(
        &mut self,
        class: ContentClass,
        hash: &str,
        validators: Validators,
        interval: Duration,
        now: DateTime<Utc>,
    ) {
        self.content_class = class;
        self.last_crawled_at = Some(now);
        self.last_hash = Some(hash.to_string());
        self.current_interval_secs = interval.as_secs() as i64;
        self.next_eligible_at = Some(now + to_chrono(interval));
        self.state = UrlState::Completed;
        self.validators = validators;
        self.crawl_count += 1;
        self.updated_at = now;
    }

    /// 在 `now` 时刻观察到的状态
    ///
    /// 已完成且间隔已过的记录视为 Eligible
    pub fn effective_state(&self, now: DateTime<Utc>) -> UrlState {
        match (self.state, self.next_eligible_at) {
            (UrlState::Completed, Some(next)) if next <= now => UrlState::Eligible,
            (state, _) => state,
        }
    }

    /// 是否需要重新入队
    ///
    /// # 参数
    ///
    /// * `now` - 当前时间
    /// * `stuck_ceiling` - 已重新入队但一直未完成的记录在超过该时长后再次到期
    pub fn is_due(&self, now: DateTime<Utc>, stuck_ceiling: Duration) -> bool {
        match self.effective_state(now) {
            UrlState::Eligible => true,
            UrlState::Leased => self
                .readmitted_at
                .map(|at| now - at >= to_chrono(stuck_ceiling))
                .unwrap_or(true),
            UrlState::Fresh | UrlState::Completed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HOUR: u64 = 3600;

    fn policies() -> RecrawlPolicies {
        RecrawlPolicies::default()
    }

    #[test]
    fn test_first_completion_uses_base_interval() {
        let interval = policies().next_interval(ContentClass::Static, None, "h1");
        assert_eq!(interval, Duration::from_secs(48 * HOUR));
    }

    #[test]
    fn test_unchanged_content_lengthens_interval() {
        let p = policies();
        let first = p.next_interval(ContentClass::Static, None, "h1");
        let second = p.next_interval(ContentClass::Static, Some((ContentClass::Static, first, Some("h1"))), "h1");
        assert!(second > first);
        assert_eq!(second, Duration::from_secs(72 * HOUR));
    }

    #[test]
    fn test_changed_content_shortens_interval() {
        let p = policies();
        let base = Duration::from_secs(48 * HOUR);
        let next = p.next_interval(ContentClass::Static, Some((ContentClass::Static, base, Some("h1"))), "h2");
        assert_eq!(next, Duration::from_secs(24 * HOUR));
    }

    #[test]
    fn test_interval_clamped_to_bounds() {
        let mut p = policies();
        p.max_interval = Duration::from_secs(60 * HOUR);
        p.min_interval = Duration::from_secs(30 * HOUR);
        let base = Duration::from_secs(48 * HOUR);

        let longer = p.next_interval(ContentClass::Static, Some((ContentClass::Static, base, Some("h"))), "h");
        assert_eq!(longer, Duration::from_secs(60 * HOUR));

        let shorter = p.next_interval(ContentClass::Static, Some((ContentClass::Static, base, Some("h"))), "x");
        assert_eq!(shorter, Duration::from_secs(30 * HOUR));
    }

    #[test]
    fn test_smart_adjustment_disabled_keeps_base() {
        let mut p = policies();
        p.dynamic_policy.smart_adjustment_enabled = false;
        let base = Duration::from_secs(6 * HOUR);
        let next = p.next_interval(ContentClass::Dynamic, Some((ContentClass::Dynamic, base, Some("h"))), "h");
        assert_eq!(next, base);
    }

    #[test]
    fn test_record_state_machine() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut record = UrlRecord::fresh("https://a.test/", "a.test", ContentClass::Static, now);
        assert_eq!(record.effective_state(now), UrlState::Fresh);

        record.complete(ContentClass::Static, "h", Validators::default(), Duration::from_secs(HOUR), now);
        assert_eq!(record.effective_state(now), UrlState::Completed);
        assert!(!record.is_due(now, Duration::from_secs(2 * HOUR)));

        let later = now + chrono::Duration::hours(1);
        assert_eq!(record.effective_state(later), UrlState::Eligible);
        assert!(record.is_due(later, Duration::from_secs(2 * HOUR)));

        record.state = UrlState::Leased;
        record.readmitted_at = Some(later);
        assert!(!record.is_due(later + chrono::Duration::minutes(30), Duration::from_secs(2 * HOUR)));
        assert!(record.is_due(later + chrono::Duration::hours(2), Duration::from_secs(2 * HOUR)));
    }
}
