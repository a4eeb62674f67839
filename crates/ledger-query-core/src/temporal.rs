//! Resolution of explicit timestamps and period phrases into UTC instants.
//!
//! Nothing in this module fails: text that cannot be understood yields `None`
//! (or the reference instant for single-instant callers) so that queries built
//! from unreliable upstream input always receive something usable.

use serde::Serialize;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Closed UTC interval; `end` is the last representable microsecond of the span.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct Interval {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

/// Best-effort resolution for phrases the fixed vocabulary does not cover.
pub trait PeriodFallback: Send + Sync {
    fn resolve(&self, text: &str, reference: OffsetDateTime) -> Option<Interval>;
}

/// Fallback that never resolves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFallback;

impl PeriodFallback for NoFallback {
    fn resolve(&self, _text: &str, _reference: OffsetDateTime) -> Option<Interval> {
        None
    }
}

/// Extracts a single date from loose text and widens it to its calendar month.
///
/// Understands ISO dates (`2024-03-15`), year-months (`2024-03`, `03/2024`,
/// `2024/03`), bare month numbers (`4`, `04`), English month names and
/// abbreviations, and `month NN`. A four digit year anywhere in the phrase
/// selects the year; otherwise the reference year is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalendarMonthFallback;

impl PeriodFallback for CalendarMonthFallback {
    fn resolve(&self, text: &str, reference: OffsetDateTime) -> Option<Interval> {
        let reference = reference.to_offset(UtcOffset::UTC);
        let trimmed = text.trim();

        if let Some(instant) = parse_explicit_instant(trimmed) {
            return month_span(instant.year(), instant.month());
        }

        if let Some((year, month)) = parse_year_month(trimmed) {
            return month_span(year, month);
        }

        let lowered = trimmed.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .collect();

        let mut month = None;
        let mut year = None;
        for (index, token) in tokens.iter().enumerate() {
            if month.is_none() {
                month = month_from_name(token).or_else(|| {
                    if *token == "month" {
                        tokens.get(index + 1).and_then(|next| month_from_number(next))
                    } else {
                        None
                    }
                });
            }
            if year.is_none() && token.len() == 4 {
                year = token
                    .parse::<i32>()
                    .ok()
                    .filter(|value| (1900..=2999).contains(value));
            }
        }

        let month = match month {
            Some(month) => month,
            None => numeric_month(&tokens)?,
        };
        month_span(year.unwrap_or_else(|| reference.year()), month)
    }
}

/// A purely numeric phrase names a month through its single one or two digit token.
fn numeric_month(tokens: &[&str]) -> Option<Month> {
    if !tokens
        .iter()
        .all(|token| token.bytes().all(|byte| byte.is_ascii_digit()))
    {
        return None;
    }

    let mut short = tokens.iter().filter(|token| token.len() <= 2);
    let candidate = short.next()?;
    if short.next().is_some() {
        return None;
    }
    month_from_number(candidate)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalResolver<F = CalendarMonthFallback> {
    fallback: F,
}

impl TemporalResolver<CalendarMonthFallback> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: PeriodFallback> TemporalResolver<F> {
    #[must_use]
    pub fn with_fallback(fallback: F) -> Self {
        Self { fallback }
    }

    /// Fixed vocabulary first, then the pluggable fallback.
    #[must_use]
    pub fn resolve_period(&self, text: &str, reference: OffsetDateTime) -> Option<Interval> {
        let resolved =
            named_period(text, reference).or_else(|| self.fallback.resolve(text, reference));
        tracing::debug!(text, ?resolved, "resolved period phrase");
        resolved
    }

    /// Single-instant resolution used for entry timestamps; falls back to `now`.
    ///
    /// Relative phrases keep the time of day of `now`: "yesterday" is `now`
    /// minus one day, "last month" the same day one month back (clamped to the
    /// month's length). Fallback periods land on `now`'s day and time inside
    /// the resolved month, or on the period start when that day is outside it.
    #[must_use]
    pub fn resolve_instant(&self, text: Option<&str>, now: OffsetDateTime) -> OffsetDateTime {
        let now = now.to_offset(UtcOffset::UTC);
        let Some(text) = text.map(str::trim).filter(|value| !value.is_empty()) else {
            return now;
        };

        let resolved = parse_explicit_instant(text)
            .or_else(|| NamedPeriod::classify(text).and_then(|named| named.shift(now)))
            .or_else(|| {
                self.fallback
                    .resolve(text, now)
                    .map(|span| anchor_in_span(span, now))
            });
        tracing::debug!(text, ?resolved, "resolved entry instant");
        resolved.unwrap_or(now)
    }

    #[must_use]
    pub fn resolve_range_start(&self, text: &str, reference: OffsetDateTime) -> Option<OffsetDateTime> {
        parse_explicit_instant(text)
            .or_else(|| self.resolve_period(text, reference).map(|span| span.start))
    }

    #[must_use]
    pub fn resolve_range_end(&self, text: &str, reference: OffsetDateTime) -> Option<OffsetDateTime> {
        parse_explicit_instant(text)
            .or_else(|| self.resolve_period(text, reference).map(|span| span.end))
    }
}

/// Parses an ISO-8601 timestamp. Offset-less input is taken as UTC.
#[must_use]
pub fn parse_explicit_instant(text: &str) -> Option<OffsetDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(parsed) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(parsed.to_offset(UtcOffset::UTC));
    }

    if let Ok(parsed) = OffsetDateTime::parse(text, &Iso8601::DEFAULT) {
        return Some(parsed.to_offset(UtcOffset::UTC));
    }

    let naive = PrimitiveDateTime::parse(
        text,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            text,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(text, format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            text,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            text,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(text, format_description!("[year]-[month]-[day] [hour]:[minute]"))
    });
    if let Ok(parsed) = naive {
        return Some(parsed.assume_utc());
    }

    Date::parse(text, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

/// Resolves the fixed relative-period vocabulary against `reference`.
#[must_use]
pub fn named_period(text: &str, reference: OffsetDateTime) -> Option<Interval> {
    let today = reference.to_offset(UtcOffset::UTC).date();

    match NamedPeriod::classify(text)? {
        NamedPeriod::Today => day_span(today),
        NamedPeriod::Yesterday => day_span(today.previous_day()?),
        NamedPeriod::ThisMonth => month_span(today.year(), today.month()),
        NamedPeriod::LastMonth => {
            let (year, month) = match today.month() {
                Month::January => (today.year() - 1, Month::December),
                month => (today.year(), month.previous()),
            };
            month_span(year, month)
        }
        NamedPeriod::ThisYear => year_span(today.year()),
        NamedPeriod::LastYear => year_span(today.year() - 1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamedPeriod {
    Today,
    Yesterday,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
}

impl NamedPeriod {
    /// First matching phrase wins, in vocabulary order.
    fn classify(text: &str) -> Option<Self> {
        let phrase = text.to_lowercase();

        if phrase.contains("today") {
            Some(Self::Today)
        } else if phrase.contains("yesterday") {
            Some(Self::Yesterday)
        } else if phrase.contains("this month") || phrase.contains("current month") {
            Some(Self::ThisMonth)
        } else if phrase.contains("last month") {
            Some(Self::LastMonth)
        } else if phrase.contains("this year") || phrase.contains("current year") {
            Some(Self::ThisYear)
        } else if phrase.contains("last year") {
            Some(Self::LastYear)
        } else {
            None
        }
    }

    fn shift(self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        match self {
            Self::Today | Self::ThisMonth | Self::ThisYear => Some(now),
            Self::Yesterday => now.checked_sub(Duration::DAY),
            Self::LastMonth => shift_months(now, -1),
            Self::LastYear => shift_months(now, -12),
        }
    }
}

fn shift_months(moment: OffsetDateTime, months: i32) -> Option<OffsetDateTime> {
    let date = moment.date();
    let index = date.year() * 12 + i32::from(u8::from(date.month())) - 1 + months;
    let year = index.div_euclid(12);
    let month = Month::try_from(u8::try_from(index.rem_euclid(12) + 1).ok()?).ok()?;
    let day = date.day().min(month_length(year, month)?);
    let shifted = Date::from_calendar_date(year, month, day).ok()?;
    Some(shifted.with_time(moment.time()).assume_utc())
}

fn month_length(year: i32, month: Month) -> Option<u8> {
    month_span(year, month).map(|span| span.end.day())
}

fn anchor_in_span(span: Interval, now: OffsetDateTime) -> OffsetDateTime {
    let first = span.start.date();
    month_length(first.year(), first.month())
        .and_then(|length| {
            Date::from_calendar_date(first.year(), first.month(), now.day().min(length)).ok()
        })
        .map(|date| date.with_time(now.time()).assume_utc())
        .filter(|candidate| *candidate >= span.start && *candidate <= span.end)
        .unwrap_or(span.start)
}

fn day_span(day: Date) -> Option<Interval> {
    span_between(day, day.next_day()?)
}

fn month_span(year: i32, month: Month) -> Option<Interval> {
    let first = Date::from_calendar_date(year, month, 1).ok()?;
    let next = match month {
        Month::December => Date::from_calendar_date(year + 1, Month::January, 1).ok()?,
        month => Date::from_calendar_date(year, month.next(), 1).ok()?,
    };
    span_between(first, next)
}

fn year_span(year: i32) -> Option<Interval> {
    let first = Date::from_calendar_date(year, Month::January, 1).ok()?;
    let next = Date::from_calendar_date(year + 1, Month::January, 1).ok()?;
    span_between(first, next)
}

#[allow(clippy::unnecessary_wraps)]
fn span_between(first: Date, next: Date) -> Option<Interval> {
    Some(Interval {
        start: first.midnight().assume_utc(),
        end: next.midnight().assume_utc() - Duration::MICROSECOND,
    })
}

fn parse_year_month(text: &str) -> Option<(i32, Month)> {
    let (year_raw, month_raw) = text.split_once('-')?;
    if year_raw.len() != 4 {
        return None;
    }
    let year = year_raw.parse::<i32>().ok()?;
    Some((year, month_from_number(month_raw)?))
}

fn month_from_number(raw: &str) -> Option<Month> {
    if raw.is_empty() || raw.len() > 2 {
        return None;
    }
    Month::try_from(raw.parse::<u8>().ok()?).ok()
}

fn month_from_name(token: &str) -> Option<Month> {
    let month = match token {
        "january" | "jan" => Month::January,
        "february" | "feb" => Month::February,
        "march" | "mar" => Month::March,
        "april" | "apr" => Month::April,
        "may" => Month::May,
        "june" | "jun" => Month::June,
        "july" | "jul" => Month::July,
        "august" | "aug" => Month::August,
        "september" | "sep" | "sept" => Month::September,
        "october" | "oct" => Month::October,
        "november" | "nov" => Month::November,
        "december" | "dec" => Month::December,
        _ => return None,
    };
    Some(month)
}
