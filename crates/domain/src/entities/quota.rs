//! 每日令牌配额实体
//!
//! 配额计数以 (用户, 自然日) 为键，自然日的边界由 [`QuotaCalendar`] 统一计算。

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::Serialize;

use crate::value_objects::UserId;

/// 配额状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub user_id: UserId,
    pub tokens_used: i64,
    pub remaining: i64,
    pub is_exceeded: bool,
}

impl QuotaStatus {
    /// remaining = max(0, limit - used)，remaining 为 0 即视为超额。
    pub fn evaluate(user_id: UserId, used: i64, daily_limit: i64) -> Self {
        let remaining = (daily_limit - used).max(0);
        Self {
            user_id,
            tokens_used: used,
            remaining,
            is_exceeded: remaining == 0,
        }
    }
}

/// 配额错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuotaError {
    #[error("prompt has {count} tokens, limit is {max}")]
    PromptTooLarge { count: usize, max: usize },
    #[error("daily quota exceeded: {used}/{limit}")]
    DailyExceeded { used: i64, limit: i64 },
    #[error("quota store error: {0}")]
    Store(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

/// 配额自然日日历
///
/// 所有调用点（读取、累加、TTL）都必须通过同一个实例得到日期键和过期时间，
/// 否则会出现读写落在不同日期键上的情况。
#[derive(Debug, Clone, Copy)]
pub struct QuotaCalendar {
    offset: FixedOffset,
}

impl Default for QuotaCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl QuotaCalendar {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// `offset_minutes` 超出 ±24h 时回退为 UTC。
    pub fn with_offset_minutes(offset_minutes: i32) -> Self {
        match FixedOffset::east_opt(offset_minutes * 60) {
            Some(offset) => Self { offset },
            None => Self::utc(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn day_of(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// 下一个自然日零点（UTC 表示）
    pub fn next_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_midnight = self
            .day_of(now)
            .succ_opt()
            .and_then(|day| day.and_hms_opt(0, 0, 0));

        match local_midnight {
            Some(naive) => {
                let utc_naive = naive - Duration::seconds(i64::from(self.offset.local_minus_utc()));
                DateTime::from_naive_utc_and_offset(utc_naive, Utc)
            }
            None => now + Duration::days(1),
        }
    }

    /// 距下一个边界的秒数，至少为 1，避免写入立即过期的计数器。
    pub fn seconds_until_boundary(&self, now: DateTime<Utc>) -> i64 {
        (self.next_boundary(now) - now).num_seconds().max(1)
    }

    pub fn quota_key(&self, user_id: UserId, now: DateTime<Utc>) -> String {
        format!(
            "quota:user:{}:date:{}",
            user_id,
            self.day_of(now).format("%Y-%m-%d")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn status_clamps_remaining_and_flags_exceeded() {
        let user = UserId::from(Uuid::new_v4());

        let fresh = QuotaStatus::evaluate(user, 0, 1000);
        assert_eq!((fresh.remaining, fresh.is_exceeded), (1000, false));

        let over = QuotaStatus::evaluate(user, 1050, 1000);
        assert_eq!(over.tokens_used, 1050);
        assert_eq!((over.remaining, over.is_exceeded), (0, true));

        let exact = QuotaStatus::evaluate(user, 1000, 1000);
        assert!(exact.is_exceeded);
    }

    #[test]
    fn utc_calendar_boundary_is_next_midnight() {
        let calendar = QuotaCalendar::utc();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 30).unwrap();

        assert_eq!(
            calendar.next_boundary(now),
            Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(calendar.seconds_until_boundary(now), 30);
    }

    #[test]
    fn offset_calendar_shifts_day_key() {
        // UTC+7: 2026-03-14 18:00Z 已经是当地 3 月 15 日凌晨 1 点
        let calendar = QuotaCalendar::with_offset_minutes(7 * 60);
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap();
        let user = UserId::from(Uuid::nil());

        assert_eq!(
            calendar.quota_key(user, now),
            format!("quota:user:{}:date:2026-03-15", Uuid::nil())
        );
        assert_eq!(
            calendar.next_boundary(now),
            Utc.with_ymd_and_hms(2026, 3, 15, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let calendar = QuotaCalendar::with_offset_minutes(48 * 60);
        assert_eq!(calendar.offset().local_minus_utc(), 0);
    }
}
