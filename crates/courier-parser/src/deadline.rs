use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum confidence for an extracted deadline to be kept.
const MIN_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadlineCandidate {
    pub deadline: DateTime<Utc>,
    pub confidence: f64,
}

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}(?::\d{2})?)?").unwrap());

static RELATIVE_UNITS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:within|in)\s+(?:the\s+next\s+)?(\d+)\s*(business\s+)?(hours?|days?|weeks?|months?)")
        .unwrap()
});

static FROM_NOW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*(business\s+)?(days?|weeks?)\s+from\s+(?:now|today)").unwrap()
});

static NAMED_RELATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:by|before)\s+(tomorrow|today|tonight)").unwrap());

static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:by|before)\s+(?:cob\s+|eob\s+)?(this\s+|next\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)")
        .unwrap()
});

static END_OF_PERIOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)end\s+of\s+(?:the\s+)?(day|week|month|quarter|year|business\s+day)").unwrap()
});

static COB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:by|before)\s+(?:close\s+of\s+business|cob|eob|end\s+of\s+business)(?:\s+(?:on\s+)?([a-z]+))?",
    )
    .unwrap()
});

static ASAP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:asap|as\s+soon\s+as\s+possible|immediately|right\s+away|urgent(?:ly)?)\b")
        .unwrap()
});

static QUARTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bQ([1-4])\s*(\d{4})?\b").unwrap());

static SLASH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:on|by|before)\s+(\d{1,2})[/-](\d{1,2})(?:[/-](\d{2,4}))?").unwrap()
});

static MONTH_NAME_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:on|by|before)\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?(?:,?\s+(\d{4}))?",
    )
    .unwrap()
});

static CLOCK_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:by|before)\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)").unwrap()
});

/// Extract the most confident future deadline from free-form text.
///
/// Pass one scans for ISO dates; pass two walks a prioritized phrase list,
/// each pattern carrying a base confidence. The winner is the candidate with
/// the highest confidence whose datetime is strictly after `now`; anything
/// under 0.7 is discarded.
pub fn extract_deadline(text: &str, now: DateTime<Utc>) -> Option<DeadlineCandidate> {
    let normalized = normalize(text);
    let mut best: Option<DeadlineCandidate> = None;

    let mut consider = |deadline: Option<DateTime<Utc>>, confidence: f64| {
        let Some(deadline) = deadline else { return };
        if deadline <= now || confidence < MIN_CONFIDENCE {
            return;
        }
        if best.map_or(true, |b| confidence > b.confidence) {
            best = Some(DeadlineCandidate {
                deadline,
                confidence,
            });
        }
    };

    for m in ISO_DATE.find_iter(&normalized) {
        consider(parse_iso(m.as_str()), 0.98);
    }

    for caps in RELATIVE_UNITS.captures_iter(&normalized) {
        let amount: i64 = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let business = caps.get(2).is_some();
        consider(add_units(now, amount, &caps[3], business), 0.95);
    }

    for caps in FROM_NOW.captures_iter(&normalized) {
        let amount: i64 = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let business = caps.get(2).is_some();
        consider(add_units(now, amount, &caps[3], business), 0.9);
    }

    for caps in NAMED_RELATIVE.captures_iter(&normalized) {
        let deadline = match caps[1].to_lowercase().as_str() {
            "tomorrow" => at_time(now.date_naive() + Duration::days(1), 17, 0, 0),
            _ => at_time(now.date_naive(), 23, 59, 0),
        };
        consider(deadline, 0.95);
    }

    for caps in WEEKDAY.captures_iter(&normalized) {
        let next_week = caps
            .get(1)
            .map(|m| m.as_str().to_lowercase().starts_with("next"))
            .unwrap_or(false);
        consider(upcoming_weekday(now, &caps[2], next_week), 0.9);
    }

    for caps in END_OF_PERIOD.captures_iter(&normalized) {
        consider(end_of_period(now, &caps[1].to_lowercase()), 0.9);
    }

    for caps in COB.captures_iter(&normalized) {
        let deadline = match caps.get(1).and_then(|m| weekday_index(m.as_str())) {
            // "by COB Friday" pins the named weekday at 17:00.
            Some(_) => upcoming_weekday(now, &caps[1], false),
            // Bare COB/EOB lands on today at 17:00.
            None => at_time(now.date_naive(), 17, 0, 0),
        };
        consider(deadline, 0.95);
    }

    if ASAP.is_match(&normalized) {
        consider(Some(now + Duration::hours(4)), 0.8);
    }

    for caps in QUARTER.captures_iter(&normalized) {
        let quarter: u32 = match caps[1].parse() {
            Ok(q) => q,
            Err(_) => continue,
        };
        let year = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(now.year());
        consider(quarter_end(year, quarter), 0.9);
    }

    for caps in SLASH_DATE.captures_iter(&normalized) {
        consider(parse_slash_date(&caps, now), 0.95);
    }

    for caps in MONTH_NAME_DATE.captures_iter(&normalized) {
        consider(parse_month_name_date(&caps, now), 0.95);
    }

    for caps in CLOCK_TIME.captures_iter(&normalized) {
        consider(parse_clock_time(&caps, now), 0.9);
    }

    best
}

fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
}

fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    if let Some((date_part, time_part)) = raw.split_once('T') {
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
        let time = if time_part.len() == 5 {
            chrono::NaiveTime::parse_from_str(time_part, "%H:%M").ok()?
        } else {
            chrono::NaiveTime::parse_from_str(time_part, "%H:%M:%S").ok()?
        };
        Some(Utc.from_utc_datetime(&date.and_time(time)))
    } else {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
        at_time(date, 0, 0, 0)
    }
}

fn at_time(date: NaiveDate, hour: u32, minute: u32, second: u32) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour, minute, second)
        .map(|dt| Utc.from_utc_datetime(&dt))
}

fn add_units(
    now: DateTime<Utc>,
    amount: i64,
    unit: &str,
    business: bool,
) -> Option<DateTime<Utc>> {
    let unit = unit.to_lowercase();
    if unit.starts_with("hour") {
        return Some(now + Duration::hours(amount));
    }
    let days = if unit.starts_with("week") {
        amount * 7
    } else if unit.starts_with("month") {
        amount * 30
    } else {
        amount
    };
    if business {
        add_business_days(now, days)
    } else {
        Some(now + Duration::days(days))
    }
}

/// Add business days, skipping weekends. Lands on 17:00.
fn add_business_days(start: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    let mut date = start.date_naive();
    let mut remaining = days;
    while remaining > 0 {
        date += Duration::days(1);
        if date.weekday().num_days_from_monday() < 5 {
            remaining -= 1;
        }
    }
    at_time(date, 17, 0, 0)
}

fn weekday_index(name: &str) -> Option<u32> {
    match name.to_lowercase().as_str() {
        "monday" => Some(0),
        "tuesday" => Some(1),
        "wednesday" => Some(2),
        "thursday" => Some(3),
        "friday" => Some(4),
        "saturday" => Some(5),
        "sunday" => Some(6),
        _ => None,
    }
}

fn upcoming_weekday(now: DateTime<Utc>, name: &str, next_week: bool) -> Option<DateTime<Utc>> {
    let target = weekday_index(name)?;
    let today = now.weekday().num_days_from_monday();
    let mut ahead = (i64::from(target) - i64::from(today)).rem_euclid(7);
    if ahead == 0 {
        ahead = 7;
    }
    if next_week {
        ahead += 7;
    }
    at_time(now.date_naive() + Duration::days(ahead), 17, 0, 0)
}

fn end_of_period(now: DateTime<Utc>, period: &str) -> Option<DateTime<Utc>> {
    match period {
        "day" | "business day" => at_time(now.date_naive(), 23, 59, 59),
        "week" => {
            let today = now.weekday().num_days_from_monday();
            let mut to_friday = 4 - i64::from(today);
            if to_friday < 0 {
                to_friday += 7;
            }
            at_time(now.date_naive() + Duration::days(to_friday), 17, 0, 0)
        }
        "month" => {
            let next = first_of_next_month(now.year(), now.month())?;
            at_time(next - Duration::days(1), 23, 59, 59)
        }
        "quarter" => {
            let quarter = (now.month() - 1) / 3 + 1;
            quarter_end(now.year(), quarter)
        }
        "year" => at_time(NaiveDate::from_ymd_opt(now.year(), 12, 31)?, 23, 59, 59),
        _ => None,
    }
}

fn first_of_next_month(year: i32, month: u32) -> Option<NaiveDate> {
    if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
}

/// Last day of the given quarter at 23:59:59.
fn quarter_end(year: i32, quarter: u32) -> Option<DateTime<Utc>> {
    let end_month = quarter.min(4) * 3;
    let next = first_of_next_month(year, end_month)?;
    at_time(next - Duration::days(1), 23, 59, 59)
}

fn parse_slash_date(caps: &regex::Captures<'_>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    let year = match caps.get(3) {
        Some(m) => {
            let raw: i32 = m.as_str().parse().ok()?;
            if raw < 100 {
                2000 + raw
            } else {
                raw
            }
        }
        None => now.year(),
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let candidate = at_time(date, 17, 0, 0)?;
    // A bare month/day that already passed this year means next year.
    if caps.get(3).is_none() && candidate <= now {
        return at_time(NaiveDate::from_ymd_opt(year + 1, month, day)?, 17, 0, 0);
    }
    Some(candidate)
}

fn parse_month_name_date(caps: &regex::Captures<'_>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let month = match caps[1].to_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    let day: u32 = caps[2].parse().ok()?;
    let year = caps
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(now.year());
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let candidate = at_time(date, 17, 0, 0)?;
    if caps.get(3).is_none() && candidate <= now {
        return at_time(NaiveDate::from_ymd_opt(year + 1, month, day)?, 17, 0, 0);
    }
    Some(candidate)
}

fn parse_clock_time(caps: &regex::Captures<'_>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    if hour > 12 {
        return None;
    }
    let meridiem = caps[3].to_lowercase();
    if meridiem == "pm" && hour != 12 {
        hour += 12;
    } else if meridiem == "am" && hour == 12 {
        hour = 0;
    }
    let candidate = at_time(now.date_naive(), hour, minute, 0)?;
    if candidate <= now {
        return at_time(now.date_naive() + Duration::days(1), hour, minute, 0);
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        // Wednesday 2025-06-11 10:00:00 UTC
        Utc.with_ymd_and_hms(2025, 6, 11, 10, 0, 0).unwrap()
    }

    #[test]
    fn iso_dates_win_with_high_confidence() {
        let got = extract_deadline("finish by 2025-12-15 please", fixed_now()).unwrap();
        assert_eq!(
            got.deadline,
            Utc.with_ymd_and_hms(2025, 12, 15, 0, 0, 0).unwrap()
        );
        assert!(got.confidence >= 0.95);
    }

    #[test]
    fn iso_datetime_keeps_time_of_day() {
        let got = extract_deadline("deadline 2025-07-01T14:30", fixed_now()).unwrap();
        assert_eq!(
            got.deadline,
            Utc.with_ymd_and_hms(2025, 7, 1, 14, 30, 0).unwrap()
        );
    }

    #[test]
    fn past_iso_dates_are_discarded() {
        assert!(extract_deadline("we shipped on 2020-01-01", fixed_now()).is_none());
    }

    #[test]
    fn relative_hours_add_from_now() {
        let got = extract_deadline("need this within 6 hours", fixed_now()).unwrap();
        assert_eq!(got.deadline, fixed_now() + Duration::hours(6));
    }

    #[test]
    fn business_days_skip_the_weekend() {
        // Wednesday + 3 business days = Monday at 17:00.
        let got = extract_deadline("within 3 business days", fixed_now()).unwrap();
        assert_eq!(
            got.deadline,
            Utc.with_ymd_and_hms(2025, 6, 16, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn tomorrow_lands_at_five_pm() {
        let got = extract_deadline("please finish by tomorrow", fixed_now()).unwrap();
        assert_eq!(
            got.deadline,
            Utc.with_ymd_and_hms(2025, 6, 12, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn cob_friday_resolves_to_friday_five_pm() {
        let got = extract_deadline("by COB Friday", fixed_now()).unwrap();
        assert_eq!(
            got.deadline,
            Utc.with_ymd_and_hms(2025, 6, 13, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_monday_is_the_following_week() {
        let got = extract_deadline("get it done by next Monday", fixed_now()).unwrap();
        assert_eq!(
            got.deadline,
            Utc.with_ymd_and_hms(2025, 6, 23, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn end_of_month_is_the_last_day() {
        let got = extract_deadline("wrap up by end of month", fixed_now()).unwrap();
        assert_eq!(got.deadline.day(), 30);
        assert_eq!(got.deadline.month(), 6);
    }

    #[test]
    fn end_of_quarter_resolves() {
        let got = extract_deadline("target end of quarter", fixed_now()).unwrap();
        assert_eq!(got.deadline.month(), 6);
        assert_eq!(got.deadline.day(), 30);
    }

    #[test]
    fn asap_is_four_hours_out() {
        let got = extract_deadline("Fix ASAP.", fixed_now()).unwrap();
        assert_eq!(got.deadline, fixed_now() + Duration::hours(4));
        assert!((got.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn quarter_reference_resolves_to_quarter_end() {
        let got = extract_deadline("needed for Q3 2025", fixed_now()).unwrap();
        assert_eq!(
            got.deadline,
            Utc.with_ymd_and_hms(2025, 9, 30, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn no_deadline_language_yields_none() {
        assert!(extract_deadline("thanks for the update", fixed_now()).is_none());
    }

    #[test]
    fn highest_confidence_candidate_wins() {
        // Both ASAP (0.8) and an ISO date (0.98) appear; ISO wins.
        let got = extract_deadline("ASAP, ideally by 2025-08-01", fixed_now()).unwrap();
        assert_eq!(
            got.deadline,
            Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn afternoon_clock_time_resolves_today() {
        let got = extract_deadline("need it by 5pm", fixed_now()).unwrap();
        assert_eq!(
            got.deadline,
            Utc.with_ymd_and_hms(2025, 6, 11, 17, 0, 0).unwrap()
        );
    }
}
