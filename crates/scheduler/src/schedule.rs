//! Timezone-aware schedule expressions.
//!
//! Two families: `@every <n><unit>` intervals and 5-field cron
//! (min hour dom month dow, Sunday = 0) with the `@hourly`/`@daily`/
//! `@weekly`/`@monthly` aliases. Cron next-run is found by scanning
//! minute-by-minute from the next whole minute in the configured zone, up
//! to a 366-day horizon.
//!
//! **DST handling:**
//! - Spring-forward gaps: local times that don't exist are skipped.
//! - Fall-back overlaps: the earliest (pre-transition) mapping is chosen.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use ms_domain::{Error, Result};

/// Parse a timezone string into a `chrono_tz::Tz`, falling back to UTC.
pub fn parse_tz(tz: &str) -> Tz {
    tz.parse::<Tz>().unwrap_or(chrono_tz::UTC)
}

/// Parse a timezone string, rejecting unknown names.
pub fn parse_tz_strict(tz: &str) -> Result<Tz> {
    tz.parse::<Tz>()
        .map_err(|_| Error::Config(format!("unknown timezone: {tz}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedule
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Fixed interval. The next run chains off the previous trigger so a
    /// late tick does not drift the cadence.
    Every(Duration),
    Cron(CronExpr),
}

impl Schedule {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::TaskValidation("schedule is empty".into()));
        }
        if let Some(spec) = input.strip_prefix("@every ") {
            return parse_every(spec.trim()).map(Schedule::Every);
        }
        let cron = match input {
            "@hourly" => "0 * * * *",
            "@daily" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            other if other.starts_with('@') => {
                return Err(Error::TaskValidation(format!(
                    "unknown schedule alias: {other}"
                )))
            }
            other => other,
        };
        CronExpr::parse(cron).map(Schedule::Cron)
    }

    /// Compute the next trigger strictly after `now`.
    ///
    /// `previous` is the last computed trigger, when one exists: interval
    /// schedules advance from it (catch-up semantics), and fall back to
    /// `now + interval` on the first computation.
    pub fn next_run(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Result<DateTime<Utc>> {
        match self {
            Schedule::Every(interval) => Ok(match previous {
                Some(prev) => prev + *interval,
                None => now + *interval,
            }),
            Schedule::Cron(expr) => expr.next_after(now, tz).ok_or_else(|| {
                Error::TaskValidation("cron expression never matches within 366 days".into())
            }),
        }
    }
}

fn parse_every(spec: &str) -> Result<Duration> {
    let bad = || Error::TaskValidation(format!("bad @every duration: {spec}"));
    let unit = spec.chars().last().ok_or_else(bad)?;
    let digits = &spec[..spec.len() - unit.len_utf8()];
    let n: i64 = digits.parse().map_err(|_| bad())?;
    if n <= 0 {
        return Err(bad());
    }
    match unit {
        's' => Ok(Duration::seconds(n)),
        'm' => Ok(Duration::minutes(n)),
        'h' => Ok(Duration::hours(n)),
        'd' => Ok(Duration::days(n)),
        _ => Err(bad()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron expressions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq)]
enum CronPart {
    /// `*` or `*/step`.
    Any { step: u32 },
    /// `a`, `a-b`, or `a-b/step` (a single value is `a-a`).
    Range { start: u32, end: u32, step: u32 },
}

impl CronPart {
    fn matches(&self, value: u32, field_min: u32) -> bool {
        match *self {
            CronPart::Any { step } => (value - field_min) % step == 0,
            CronPart::Range { start, end, step } => {
                value >= start && value <= end && (value - start) % step == 0
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CronField {
    parts: Vec<CronPart>,
    min: u32,
    /// `*` with no step, which matters for the dom/dow OR rule.
    unrestricted: bool,
}

impl CronField {
    fn parse(field: &str, name: &str, min: u32, max: u32) -> Result<Self> {
        let bad = |detail: &str| {
            Error::TaskValidation(format!("cron field {name} `{field}`: {detail}"))
        };

        let mut parts = Vec::new();
        for piece in field.split(',') {
            let (base, step) = match piece.split_once('/') {
                Some((base, step_s)) => {
                    let step: u32 = step_s.parse().map_err(|_| bad("bad step"))?;
                    if step == 0 {
                        return Err(bad("step must be positive"));
                    }
                    (base, step)
                }
                None => (piece, 1),
            };

            let part = if base == "*" {
                CronPart::Any { step }
            } else if let Some((start_s, end_s)) = base.split_once('-') {
                let start: u32 = start_s.parse().map_err(|_| bad("bad range start"))?;
                let end: u32 = end_s.parse().map_err(|_| bad("bad range end"))?;
                if start > end {
                    return Err(bad("range start exceeds end"));
                }
                CronPart::Range { start, end, step }
            } else {
                let value: u32 = base.parse().map_err(|_| bad("not a number"))?;
                if step != 1 {
                    return Err(bad("step requires * or a range"));
                }
                CronPart::Range {
                    start: value,
                    end: value,
                    step: 1,
                }
            };

            if let CronPart::Range { start, end, .. } = part {
                if start < min || end > max {
                    return Err(bad(&format!("values must be within {min}-{max}")));
                }
            }
            parts.push(part);
        }

        let unrestricted = parts.len() == 1 && parts[0] == CronPart::Any { step: 1 };
        Ok(Self {
            parts,
            min,
            unrestricted,
        })
    }

    fn matches(&self, value: u32) -> bool {
        self.parts.iter().any(|p| p.matches(value, self.min))
    }
}

/// A validated 5-field cron expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::TaskValidation(format!(
                "cron expression must have 5 fields, got {}: `{expr}`",
                fields.len()
            )));
        }
        Ok(Self {
            minute: CronField::parse(fields[0], "minute", 0, 59)?,
            hour: CronField::parse(fields[1], "hour", 0, 23)?,
            dom: CronField::parse(fields[2], "day-of-month", 1, 31)?,
            month: CronField::parse(fields[3], "month", 1, 12)?,
            dow: CronField::parse(fields[4], "day-of-week", 0, 6)?,
        })
    }

    /// Match a local wall-clock minute. Day-of-month and day-of-week
    /// OR-combine when both are restricted, per the standard cron
    /// convention; otherwise the restricted one decides.
    fn matches_naive(&self, dt: &chrono::NaiveDateTime) -> bool {
        if !(self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.month.matches(dt.month()))
        {
            return false;
        }
        let dom_ok = self.dom.matches(dt.day());
        let dow_ok = self.dow.matches(dt.weekday().num_days_from_sunday());
        if !self.dom.unrestricted && !self.dow.unrestricted {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }

    /// Next occurrence strictly after `after`, evaluated in `tz`, as UTC.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        use chrono::TimeZone;

        // Advance to the next whole local minute.
        let local_after = after.with_timezone(&tz).naive_local();
        let to_next_min = 60 - local_after.second() as i64;
        let mut candidate = local_after + Duration::seconds(to_next_min);
        candidate = candidate.with_second(0).unwrap_or(candidate);
        candidate = candidate.with_nanosecond(0).unwrap_or(candidate);

        let max_checks = 366 * 24 * 60; // one year of minutes
        for _ in 0..max_checks {
            if self.matches_naive(&candidate) {
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc))
                    }
                    chrono::LocalResult::None => {
                        // DST gap, this local minute doesn't exist.
                    }
                }
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // ── Parsing ────────────────────────────────────────────────────

    #[test]
    fn every_accepts_all_units() {
        assert_eq!(
            Schedule::parse("@every 90s").unwrap(),
            Schedule::Every(Duration::seconds(90))
        );
        assert_eq!(
            Schedule::parse("@every 5m").unwrap(),
            Schedule::Every(Duration::minutes(5))
        );
        assert_eq!(
            Schedule::parse("@every 2h").unwrap(),
            Schedule::Every(Duration::hours(2))
        );
        assert_eq!(
            Schedule::parse("@every 1d").unwrap(),
            Schedule::Every(Duration::days(1))
        );
    }

    #[test]
    fn every_rejects_garbage() {
        for bad in ["@every", "@every 5", "@every x5m", "@every 5w", "@every 0s", "@every -1m"] {
            assert!(Schedule::parse(bad).is_err(), "{bad} must not parse");
        }
    }

    #[test]
    fn aliases_expand_to_cron() {
        assert_eq!(
            Schedule::parse("@daily").unwrap(),
            Schedule::Cron(CronExpr::parse("0 0 * * *").unwrap())
        );
        assert_eq!(
            Schedule::parse("@weekly").unwrap(),
            Schedule::Cron(CronExpr::parse("0 0 * * 0").unwrap())
        );
        assert!(Schedule::parse("@fortnightly").is_err());
    }

    #[test]
    fn cron_rejects_malformed_fields() {
        for bad in [
            "* * * *",          // 4 fields
            "60 * * * *",       // minute out of range
            "* 24 * * *",       // hour out of range
            "* * 0 * *",        // dom below range
            "* * * 13 *",       // month out of range
            "* * * * 7",        // dow out of range
            "*/0 * * * *",      // zero step
            "5/2 * * * *",      // step on single value
            "9-3 * * * *",      // inverted range
            "a * * * *",
        ] {
            assert!(CronExpr::parse(bad).is_err(), "{bad} must not parse");
        }
    }

    // ── Matching ───────────────────────────────────────────────────

    #[test]
    fn range_with_step_matches_expected_minutes() {
        let expr = CronExpr::parse("10-30/10 * * * *").unwrap();
        let hits: Vec<u32> = (0..60)
            .filter(|m| expr.matches_naive(&at(2026, 6, 15, 9, *m, 0).naive_utc()))
            .collect();
        assert_eq!(hits, vec![10, 20, 30]);
    }

    #[test]
    fn lists_and_ranges_combine() {
        let expr = CronExpr::parse("0 9-17,22 * * *").unwrap();
        assert!(expr.matches_naive(&at(2026, 6, 15, 10, 0, 0).naive_utc()));
        assert!(expr.matches_naive(&at(2026, 6, 15, 22, 0, 0).naive_utc()));
        assert!(!expr.matches_naive(&at(2026, 6, 15, 20, 0, 0).naive_utc()));
    }

    #[test]
    fn dom_dow_or_when_both_restricted() {
        // 2026-06-15 is a Monday (dow 1); the 15th also matches dom.
        let expr = CronExpr::parse("0 0 15 * 5").unwrap(); // 15th OR Friday
        assert!(expr.matches_naive(&at(2026, 6, 15, 0, 0, 0).naive_utc()), "matches via dom");
        assert!(expr.matches_naive(&at(2026, 6, 19, 0, 0, 0).naive_utc()), "matches via dow (Friday)");
        assert!(!expr.matches_naive(&at(2026, 6, 16, 0, 0, 0).naive_utc()));
    }

    #[test]
    fn dom_and_dow_and_when_only_one_restricted() {
        let expr = CronExpr::parse("0 0 * * 1").unwrap(); // Mondays only
        assert!(expr.matches_naive(&at(2026, 6, 15, 0, 0, 0).naive_utc()));
        assert!(!expr.matches_naive(&at(2026, 6, 16, 0, 0, 0).naive_utc()));
    }

    // ── next_run ───────────────────────────────────────────────────

    #[test]
    fn next_run_is_strictly_in_the_future() {
        let now = at(2026, 6, 15, 10, 0, 0);
        for expr in ["* * * * *", "0 * * * *", "0 0 * * *", "*/5 * * * *"] {
            let s = Schedule::parse(expr).unwrap();
            let next = s.next_run(None, now, chrono_tz::UTC).unwrap();
            assert!(next > now, "{expr}: {next} must be after {now}");
        }
    }

    #[test]
    fn next_run_is_minimal_matching_minute() {
        let now = at(2026, 6, 15, 10, 0, 30);
        let s = Schedule::parse("*/5 * * * *").unwrap();
        // 10:00:30 → next whole minute 10:01 → first multiple of 5 is 10:05.
        assert_eq!(s.next_run(None, now, chrono_tz::UTC).unwrap(), at(2026, 6, 15, 10, 5, 0));
        // An exactly-matching current minute is excluded (strictly after).
        let on_boundary = at(2026, 6, 15, 10, 5, 0);
        assert_eq!(
            s.next_run(None, on_boundary, chrono_tz::UTC).unwrap(),
            at(2026, 6, 15, 10, 10, 0)
        );
    }

    #[test]
    fn every_chains_from_previous_trigger() {
        let s = Schedule::parse("@every 1h").unwrap();
        let now = at(2026, 6, 15, 10, 30, 0);
        let prev = at(2026, 6, 15, 9, 0, 0);
        assert_eq!(s.next_run(Some(prev), now, chrono_tz::UTC).unwrap(), at(2026, 6, 15, 10, 0, 0));
        assert_eq!(s.next_run(None, now, chrono_tz::UTC).unwrap(), at(2026, 6, 15, 11, 30, 0));
    }

    #[test]
    fn impossible_cron_errors_instead_of_spinning() {
        let s = Schedule::parse("0 0 30 2 *").unwrap(); // February 30th
        assert!(s.next_run(None, at(2026, 1, 1, 0, 0, 0), chrono_tz::UTC).is_err());
    }

    // ── Timezones & DST ────────────────────────────────────────────

    #[test]
    fn cron_evaluates_in_configured_zone() {
        let tz = parse_tz("Asia/Tokyo");
        let s = Schedule::parse("0 9 * * *").unwrap();
        // 00:30 UTC is 09:30 JST, so the next 09:00 JST is the following day.
        let next = s.next_run(None, at(2026, 6, 15, 0, 30, 0), tz).unwrap();
        assert_eq!(next, at(2026, 6, 16, 0, 0, 0), "9:00 JST is 0:00 UTC");
    }

    #[test]
    fn spring_forward_gap_is_skipped() {
        let tz = parse_tz("US/Eastern");
        let expr = CronExpr::parse("30 2 * * *").unwrap();
        // 2026-03-08 02:30 ET does not exist; the next hit is the 9th.
        let next = expr.next_after(at(2026, 3, 8, 6, 0, 0), tz).unwrap();
        assert_eq!(next.day(), 9);
        assert_eq!(next.hour(), 6); // 02:30 EST = 06:30 UTC... minute check below
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn fall_back_overlap_takes_earliest() {
        let tz = parse_tz("US/Eastern");
        let expr = CronExpr::parse("30 1 * * *").unwrap();
        // 2026-11-01 01:30 ET happens twice; the EDT (earlier) instant wins.
        let next = expr.next_after(at(2026, 11, 1, 4, 0, 0), tz).unwrap();
        assert_eq!(next.hour(), 5);
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn strict_tz_parsing_rejects_unknown_names() {
        assert!(parse_tz_strict("Europe/Paris").is_ok());
        assert!(parse_tz_strict("Mars/OlympusMons").is_err());
        assert_eq!(parse_tz("Mars/OlympusMons"), chrono_tz::UTC);
    }
}
