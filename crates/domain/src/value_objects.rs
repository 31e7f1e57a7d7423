use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 数据节点的共享范围
///
/// 数值越大共享范围越广：SCENARIO 只属于一个场景，CYCLE 在同一周期的场景间共享，
/// GLOBAL 在所有场景间共享。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    #[default]
    Scenario = 1,
    Cycle = 2,
    Global = 3,
}

/// 周期频率
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Quarterly => "QUARTERLY",
            Frequency::Yearly => "YEARLY",
        }
    }

    /// 计算包含 `date` 的周期起始日期
    pub fn period_start(&self, date: DateTime<Utc>) -> NaiveDate {
        let day = date.date_naive();
        match self {
            Frequency::Daily => day,
            Frequency::Weekly => {
                day - Duration::days(day.weekday().num_days_from_monday() as i64)
            }
            Frequency::Monthly => first_of_month(day.year(), day.month()),
            Frequency::Quarterly => {
                let quarter_month = ((day.month() - 1) / 3) * 3 + 1;
                first_of_month(day.year(), quarter_month)
            }
            Frequency::Yearly => first_of_month(day.year(), 1),
        }
    }

    /// 周期的起止时间，结束时间是下一个周期开始前的最后一微秒
    pub fn period_bounds(&self, date: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.period_start(date);
        let next_start = match self {
            Frequency::Daily => start + Duration::days(1),
            Frequency::Weekly => start + Duration::days(7),
            Frequency::Monthly => add_months(start, 1),
            Frequency::Quarterly => add_months(start, 3),
            Frequency::Yearly => add_months(start, 12),
        };
        let start = start.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = next_start.and_time(chrono::NaiveTime::MIN).and_utc() - Duration::microseconds(1);
        (start, end)
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn add_months(first_day: NaiveDate, months: u32) -> NaiveDate {
    let total = first_day.month0() + months;
    let year = first_day.year() + (total / 12) as i32;
    first_of_month(year, total % 12 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_scope_ordering() {
        assert!(Scope::Scenario < Scope::Cycle);
        assert!(Scope::Cycle < Scope::Global);
        assert_eq!(Scope::default(), Scope::Scenario);
    }

    #[test]
    fn test_weekly_period_starts_on_monday() {
        // 2024-05-16 是周四
        let date = Utc.with_ymd_and_hms(2024, 5, 16, 15, 30, 0).unwrap();
        let (start, end) = Frequency::Weekly.period_bounds(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap());
        assert_eq!(
            end,
            Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap() - Duration::microseconds(1)
        );
    }

    #[test]
    fn test_quarterly_and_yearly_bounds() {
        let date = Utc.with_ymd_and_hms(2023, 11, 2, 8, 0, 0).unwrap();
        let (start, _) = Frequency::Quarterly.period_bounds(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 10, 1, 0, 0, 0).unwrap());

        let (start, end) = Frequency::Yearly.period_bounds(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        assert!(end < Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_monthly_period_rolls_over_december() {
        let date = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        let (start, end) = Frequency::Monthly.period_bounds(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(
            end,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() - Duration::microseconds(1)
        );
    }
}
