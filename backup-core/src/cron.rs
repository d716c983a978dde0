//! 五段式 cron 表达式解析与触发时间计算
//!
//! ```text
//! ┌───────────── 分钟 (0-59)
//! │ ┌───────────── 小时 (0-23)
//! │ │ ┌───────────── 日 (1-31)
//! │ │ │ ┌───────────── 月 (1-12 或 JAN-DEC)
//! │ │ │ │ ┌───────────── 星期 (0-7 或 SUN-SAT，0 和 7 都表示周日)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! 日与星期同时受限时，任一匹配即可触发。

use crate::constants::cron::{CRON_FIELDS_COUNT, MAX_LOOKAHEAD_DAYS};
use crate::{BackupError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use std::collections::BTreeSet;
use std::str::FromStr;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// 表达式中的单个字段
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u32>,
    min: u32,
    max: u32,
    /// 以 `*` 开头视为不受限（影响日/星期的组合规则）
    wildcard: bool,
}

impl CronField {
    fn parse(
        expr: &str,
        min: u32,
        max: u32,
        names: &[&str],
        name_offset: u32,
    ) -> std::result::Result<Self, String> {
        let mut field = Self {
            values: BTreeSet::new(),
            min,
            max,
            wildcard: expr.starts_with('*'),
        };
        for part in expr.split(',') {
            field.parse_part(part, names, name_offset)?;
        }
        Ok(field)
    }

    fn parse_part(
        &mut self,
        part: &str,
        names: &[&str],
        name_offset: u32,
    ) -> std::result::Result<(), String> {
        if part.is_empty() {
            return Err("存在空的列表项".to_string());
        }

        let (range_part, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<u32>()
                    .map_err(|_| format!("无效的步长 '{step}'"))?;
                if step == 0 {
                    return Err("步长不能为 0".to_string());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range_part == "*" {
            (self.min, self.max)
        } else if let Some((start, end)) = range_part.split_once('-') {
            let start = self.parse_value(start, names, name_offset)?;
            let end = self.parse_value(end, names, name_offset)?;
            if start > end {
                return Err(format!("无效的范围 {start}-{end}"));
            }
            (start, end)
        } else {
            let value = self.parse_value(range_part, names, name_offset)?;
            // `5/10` 等价于 `5-max/10`
            if step.is_some() {
                (value, self.max)
            } else {
                (value, value)
            }
        };

        let step = step.unwrap_or(1);
        if step > self.max {
            return Err(format!("步长 {step} 超出范围 [1, {}]", self.max));
        }
        let mut value = start;
        while value <= end {
            self.values.insert(value);
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
        Ok(())
    }

    fn parse_value(
        &self,
        text: &str,
        names: &[&str],
        name_offset: u32,
    ) -> std::result::Result<u32, String> {
        let lowered = text.to_ascii_lowercase();
        let value = match names.iter().position(|name| *name == lowered) {
            Some(index) => index as u32 + name_offset,
            None => text
                .parse::<u32>()
                .map_err(|_| format!("无效的取值 '{text}'"))?,
        };
        if value < self.min || value > self.max {
            return Err(format!(
                "取值 {value} 超出范围 [{}, {}]",
                self.min, self.max
            ));
        }
        Ok(value)
    }

    fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// 解析后的 cron 表达式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: String| BackupError::InvalidSchedule {
            expression: expression.to_string(),
            reason,
        };

        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != CRON_FIELDS_COUNT {
            return Err(invalid(format!(
                "需要 {CRON_FIELDS_COUNT} 个字段，实际 {} 个",
                parts.len()
            )));
        }

        let minute = CronField::parse(parts[0], 0, 59, &[], 0).map_err(invalid)?;
        let hour = CronField::parse(parts[1], 0, 23, &[], 0).map_err(invalid)?;
        let day_of_month = CronField::parse(parts[2], 1, 31, &[], 0).map_err(invalid)?;
        let month = CronField::parse(parts[3], 1, 12, &MONTH_NAMES, 1).map_err(invalid)?;
        let mut day_of_week =
            CronField::parse(parts[4], 0, 7, &WEEKDAY_NAMES, 0).map_err(invalid)?;

        if day_of_week.values.remove(&7) {
            day_of_week.values.insert(0);
        }
        day_of_week.max = 6;

        Ok(Self {
            expression: expression.to_string(),
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 判断某一天是否可能触发
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.month.matches(date.month()) {
            return false;
        }
        let dom = self.day_of_month.matches(date.day());
        let dow = self
            .day_of_week
            .matches(date.weekday().num_days_from_sunday());

        if !self.day_of_month.wildcard && !self.day_of_week.wildcard {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// 计算严格晚于 `after` 的下一次触发时间
    ///
    /// 按 `after` 所在时区的本地时间匹配，夏令时跳过的本地时间不会触发。
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start_date = after.naive_local().date();

        for offset in 0..=MAX_LOOKAHEAD_DAYS {
            let date = start_date.checked_add_signed(Duration::days(offset))?;
            if !self.matches_date(date) {
                continue;
            }
            for &hour in &self.hour.values {
                for &minute in &self.minute.values {
                    let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let Some(candidate) = tz.from_local_datetime(&naive).earliest() else {
                        continue;
                    };
                    if candidate > *after {
                        return Some(candidate);
                    }
                }
            }
        }

        None
    }
}

impl FromStr for CronSchedule {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        CronSchedule::parse(s)
    }
}

/// 校验 cron 表达式，不合法或永远不会触发时返回 `InvalidSchedule`
pub fn validate(expression: &str) -> Result<CronSchedule> {
    let schedule = CronSchedule::parse(expression)?;
    if schedule.next_after(&Utc::now()).is_none() {
        return Err(BackupError::InvalidSchedule {
            expression: expression.to_string(),
            reason: "表达式没有可触发的时间".to_string(),
        });
    }
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_validate() {
        assert!(validate("0 2 * * *").is_ok());
        assert!(validate("*/15 9-17 * * mon-fri").is_ok());
        assert!(matches!(
            validate("not-a-cron"),
            Err(BackupError::InvalidSchedule { .. })
        ));
        assert!(validate("60 * * * *").is_err());
        assert!(validate("* * * *").is_err());
        assert!(validate("*/0 * * * *").is_err());
        assert!(validate("5-1 * * * *").is_err());
        assert!(validate("1,,2 * * * *").is_err());
        assert!(validate("1/4294967295 * * * *").is_err());
        assert!(validate("*/60 * * * *").is_err());
        assert!(validate("0 */23 * * *").is_ok());
    }

    #[test]
    fn test_validate_rejects_schedule_that_never_fires() {
        assert!(CronSchedule::parse("0 0 31 2 *").is_ok());
        assert!(matches!(
            validate("0 0 31 2 *"),
            Err(BackupError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_daily_at_two() {
        let schedule = CronSchedule::parse("0 2 * * *").unwrap();
        assert_eq!(
            schedule.next_after(&at(2024, 1, 15, 1, 59, 59)),
            Some(at(2024, 1, 15, 2, 0, 0))
        );
        // 恰好在触发时刻之后，顺延到次日
        assert_eq!(
            schedule.next_after(&at(2024, 1, 15, 2, 0, 0)),
            Some(at(2024, 1, 16, 2, 0, 0))
        );
        assert_eq!(
            schedule.next_after(&at(2024, 12, 31, 3, 0, 0)),
            Some(at(2025, 1, 1, 2, 0, 0))
        );
    }

    #[test]
    fn test_steps_and_offsets() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(&at(2024, 1, 15, 10, 16, 0)),
            Some(at(2024, 1, 15, 10, 30, 0))
        );

        let schedule = CronSchedule::parse("5/20 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(&at(2024, 1, 15, 10, 26, 0)),
            Some(at(2024, 1, 15, 10, 45, 0))
        );
    }

    #[test]
    fn test_names_and_sunday_aliases() {
        let by_name = CronSchedule::parse("0 0 * * SUN").unwrap();
        let by_zero = CronSchedule::parse("0 0 * * 0").unwrap();
        let by_seven = CronSchedule::parse("0 0 * * 7").unwrap();
        assert_eq!(by_name.day_of_week, by_zero.day_of_week);
        assert_eq!(by_zero.day_of_week, by_seven.day_of_week);

        // 2024-01-15 是周一
        assert_eq!(
            by_seven.next_after(&at(2024, 1, 15, 0, 0, 0)),
            Some(at(2024, 1, 21, 0, 0, 0))
        );

        let quarterly = CronSchedule::parse("0 0 1 jan,apr,jul,oct *").unwrap();
        assert_eq!(
            quarterly.next_after(&at(2024, 2, 1, 0, 0, 0)),
            Some(at(2024, 4, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // 每月 13 日或每周五
        let schedule = CronSchedule::parse("0 12 13 * fri").unwrap();
        // 2024-09-13 是周五，2024-09-06 也是周五
        assert!(schedule.matches_date(NaiveDate::from_ymd_opt(2024, 9, 6).unwrap()));
        assert!(schedule.matches_date(NaiveDate::from_ymd_opt(2024, 10, 13).unwrap()));
        assert!(!schedule.matches_date(NaiveDate::from_ymd_opt(2024, 10, 14).unwrap()));

        // 只限定日期时星期不参与
        let only_dom = CronSchedule::parse("0 12 13 * *").unwrap();
        assert!(!only_dom.matches_date(NaiveDate::from_ymd_opt(2024, 9, 6).unwrap()));
    }

    #[test]
    fn test_leap_day() {
        let schedule = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            schedule.next_after(&at(2025, 3, 1, 0, 0, 0)),
            Some(at(2028, 2, 29, 0, 0, 0))
        );
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let schedule = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert_eq!(schedule.next_after(&at(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn test_local_time_zone_is_respected() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let schedule = CronSchedule::parse("0 2 * * *").unwrap();
        let after = tz.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let next = schedule.next_after(&after).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2024, 1, 16, 2, 0, 0).unwrap());
        assert_eq!(next.with_timezone(&Utc), at(2024, 1, 15, 18, 0, 0));
    }
}
