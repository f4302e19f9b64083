//! Trading window gate
//!
//! Decides when the engine is allowed to enter new trades:
//! - only on configured weekdays (default Tue/Wed/Thu)
//! - only inside the entry hour window (default 09:00-10:00)
//! - never on the first or last days of the month
//! - never on market holidays or early-close days
//!
//! The holiday table covers the fixed, observed and floating US equity
//! market holidays, with Good Friday computed from the Easter date.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};

/// Why the window is open or closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    Open,
    MonthEdge,
    OffWeekday,
    Holiday,
    EarlyClose,
    OutsideHours,
}

impl WindowCheck {
    pub fn is_open(&self) -> bool {
        matches!(self, WindowCheck::Open)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            WindowCheck::Open => "inside the trading window",
            WindowCheck::MonthEdge => "first or last days of the month",
            WindowCheck::OffWeekday => "not a trading weekday",
            WindowCheck::Holiday => "market holiday",
            WindowCheck::EarlyClose => "market closes early today",
            WindowCheck::OutsideHours => "outside the entry hours",
        }
    }
}

/// Trading calendar configuration
#[derive(Debug, Clone)]
pub struct TradingSchedule {
    /// Weekdays on which new trades may be entered
    pub trading_weekdays: Vec<Weekday>,
    /// First hour of the entry window, inclusive
    pub entry_hour_start: u32,
    /// Last hour of the entry window, exclusive
    pub entry_hour_end: u32,
    /// Days of the month on which trading is skipped
    pub skip_month_days: Vec<u32>,
}

impl Default for TradingSchedule {
    fn default() -> Self {
        Self {
            trading_weekdays: vec![Weekday::Tue, Weekday::Wed, Weekday::Thu],
            entry_hour_start: 9,
            entry_hour_end: 10,
            skip_month_days: vec![1, 2, 3, 4, 5, 25, 26, 27, 28, 29, 30, 31],
        }
    }
}

impl TradingSchedule {
    /// Evaluate the gate for a point in time. Checks run in the same
    /// order the verdicts are listed, the first failure wins.
    pub fn check(&self, now: NaiveDateTime) -> WindowCheck {
        let date = now.date();
        if self.skip_month_days.contains(&date.day()) {
            return WindowCheck::MonthEdge;
        }
        if !self.trading_weekdays.contains(&date.weekday()) {
            return WindowCheck::OffWeekday;
        }
        if is_market_holiday(date) {
            return WindowCheck::Holiday;
        }
        if is_early_close(date) {
            return WindowCheck::EarlyClose;
        }
        if now.hour() < self.entry_hour_start || now.hour() >= self.entry_hour_end {
            return WindowCheck::OutsideHours;
        }
        WindowCheck::Open
    }

    pub fn in_trading_window(&self, now: NaiveDateTime) -> bool {
        self.check(now).is_open()
    }

    /// Whether new trades may be entered at some point on this date
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !self.skip_month_days.contains(&date.day())
            && self.trading_weekdays.contains(&date.weekday())
            && !is_market_holiday(date)
            && !is_early_close(date)
    }

    /// Start of the next entry window strictly after `now`, used for
    /// sleep-until scheduling between cycles.
    pub fn next_window_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        let start = NaiveTime::from_hms_opt(self.entry_hour_start.min(23), 0, 0)
            .unwrap_or(NaiveTime::MIN);

        let today = now.date();
        if self.is_trading_day(today) {
            let candidate = today.and_time(start);
            if now < candidate {
                return candidate;
            }
        }

        let mut date = today + Duration::days(1);
        for _ in 0..400 {
            if self.is_trading_day(date) {
                return date.and_time(start);
            }
            date += Duration::days(1);
        }
        // Unreachable with a sane configuration
        (today + Duration::days(1)).and_time(start)
    }
}

/// US equity market holiday check
pub fn is_market_holiday(date: NaiveDate) -> bool {
    holidays_for(date.year()).contains(&date)
}

/// Scheduled early-close days: July 3rd, the day after Thanksgiving and
/// Christmas Eve, when they land on a weekday
pub fn is_early_close(date: NaiveDate) -> bool {
    let year = date.year();
    let weekday_only = |d: Option<NaiveDate>| d.filter(|d| !is_weekend(*d));

    let july_3 = weekday_only(NaiveDate::from_ymd_opt(year, 7, 3));
    let christmas_eve = weekday_only(NaiveDate::from_ymd_opt(year, 12, 24));
    let after_thanksgiving = nth_weekday_of_month(year, 11, Weekday::Thu, 4).map(|d| d + Duration::days(1));

    [july_3, christmas_eve, after_thanksgiving]
        .into_iter()
        .flatten()
        .any(|d| d == date)
}

fn holidays_for(year: i32) -> Vec<NaiveDate> {
    let fixed_observed = |month: u32, day: u32| {
        NaiveDate::from_ymd_opt(year, month, day).map(observed)
    };

    [
        new_years(year),
        nth_weekday_of_month(year, 1, Weekday::Mon, 3), // Martin Luther King Jr. Day
        nth_weekday_of_month(year, 2, Weekday::Mon, 3), // Presidents' Day
        good_friday(year),
        last_weekday_of_month(year, 5, Weekday::Mon), // Memorial Day
        fixed_observed(6, 19),                        // Juneteenth
        fixed_observed(7, 4),                         // Independence Day
        nth_weekday_of_month(year, 9, Weekday::Mon, 1), // Labor Day
        nth_weekday_of_month(year, 11, Weekday::Thu, 4), // Thanksgiving
        fixed_observed(12, 25),                       // Christmas
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// New Year's Day. A Saturday January 1st is not observed on the prior
/// Friday by the exchange, so only the Sunday case moves.
fn new_years(year: i32) -> Option<NaiveDate> {
    let date = NaiveDate::from_ymd_opt(year, 1, 1)?;
    match date.weekday() {
        Weekday::Sat => None,
        Weekday::Sun => date.succ_opt(),
        _ => Some(date),
    }
}

/// Saturday holidays move to Friday, Sunday holidays to Monday
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date.pred_opt().unwrap_or(date),
        Weekday::Sun => date.succ_opt().unwrap_or(date),
        _ => date,
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let offset = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    let day = 1 + offset + (n - 1) * 7;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;
    let last = first_next.pred_opt()?;
    let offset = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    Some(last - Duration::days(offset as i64))
}

/// Easter Sunday by the anonymous Gregorian computus
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

fn good_friday(year: i32) -> Option<NaiveDate> {
    easter_sunday(year).map(|easter| easter - Duration::days(2))
}
