//! Comparators: pure predicates over a normalized value and an operand.
//!
//! Relative date windows are measured from `now`, the moment of evaluation.
//! Weeks compare by ISO week; months and years are fixed 30 and 365 day
//! windows rather than calendar boundaries.

use jiff::civil::{Date, DateTime};
use jiff::tz::TimeZone;
use jiff::{SignedDuration, Timestamp, Zoned};
use serde_json::Value;

use crate::model::Operator;
use crate::normalize::Normalized;

const WEEK_DAYS: i64 = 7;
const MONTH_DAYS: i64 = 30;
const YEAR_DAYS: i64 = 365;

#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error("`{operator}` does not apply to {shape} values")]
    Unsupported {
        operator: Operator,
        shape: &'static str,
    },

    #[error("`{operator}` expects a {expected} operand, got {operand}")]
    Operand {
        operator: Operator,
        expected: &'static str,
        operand: Value,
    },

    #[error("invalid date `{input}`: {message}")]
    Date { input: String, message: String },

    #[error("array rollups can only be compared through any, every or none")]
    ArrayNeedsQuantifier,
}

/// Apply `operator` to `value` against `operand`, evaluated at `now`.
pub fn compare(
    operator: Operator,
    value: &Normalized,
    operand: &Value,
    now: &Zoned,
) -> Result<bool, CompareError> {
    use Operator::{DoesNotContain, DoesNotEqual, IsEmpty, IsNotEmpty};

    match (value, operator) {
        (Normalized::Array(_), _) => Err(CompareError::ArrayNeedsQuantifier),
        (Normalized::Empty, IsEmpty | DoesNotEqual | DoesNotContain) => Ok(true),
        (Normalized::Empty, _) => Ok(false),
        (Normalized::Text(s), IsEmpty) => Ok(s.is_empty()),
        (Normalized::Text(s), IsNotEmpty) => Ok(!s.is_empty()),
        (Normalized::List(items), IsEmpty) => Ok(items.is_empty()),
        (Normalized::List(items), IsNotEmpty) => Ok(!items.is_empty()),
        (Normalized::Date(_) | Normalized::Number(_), IsEmpty) => Ok(false),
        (Normalized::Date(_) | Normalized::Number(_), IsNotEmpty) => Ok(true),
        (Normalized::Bool(b), _) => compare_bool(operator, *b, operand),
        (Normalized::Number(n), _) => compare_number(operator, *n, operand),
        (Normalized::Text(s), _) => compare_text(operator, s, operand),
        (Normalized::List(items), _) => compare_list(operator, items, operand),
        (Normalized::Date(d), _) => compare_date(operator, d, operand, now),
    }
}

fn compare_bool(operator: Operator, value: bool, operand: &Value) -> Result<bool, CompareError> {
    let expected = || {
        operand.as_bool().ok_or_else(|| CompareError::Operand {
            operator,
            expected: "boolean",
            operand: operand.clone(),
        })
    };
    match operator {
        Operator::Equals => Ok(value == expected()?),
        Operator::DoesNotEqual => Ok(value != expected()?),
        _ => Err(CompareError::Unsupported {
            operator,
            shape: "checkbox",
        }),
    }
}

#[allow(clippy::float_cmp)]
fn compare_number(operator: Operator, value: f64, operand: &Value) -> Result<bool, CompareError> {
    let expected = || {
        operand.as_f64().ok_or_else(|| CompareError::Operand {
            operator,
            expected: "number",
            operand: operand.clone(),
        })
    };
    match operator {
        Operator::Equals => Ok(value == expected()?),
        Operator::DoesNotEqual => Ok(value != expected()?),
        Operator::LessThan => Ok(value < expected()?),
        Operator::GreaterThan => Ok(value > expected()?),
        Operator::LessThanOrEqualTo => Ok(value <= expected()?),
        Operator::GreaterThanOrEqualTo => Ok(value >= expected()?),
        _ => Err(CompareError::Unsupported {
            operator,
            shape: "number",
        }),
    }
}

fn compare_text(operator: Operator, value: &str, operand: &Value) -> Result<bool, CompareError> {
    let expected = || string_operand(operator, operand);
    match operator {
        Operator::Equals => Ok(value == expected()?),
        Operator::DoesNotEqual => Ok(value != expected()?),
        Operator::Contains => Ok(value.contains(expected()?)),
        Operator::DoesNotContain => Ok(!value.contains(expected()?)),
        Operator::StartsWith => Ok(value.starts_with(expected()?)),
        Operator::EndsWith => Ok(value.ends_with(expected()?)),
        _ => Err(CompareError::Unsupported {
            operator,
            shape: "text",
        }),
    }
}

fn compare_list(operator: Operator, items: &[String], operand: &Value) -> Result<bool, CompareError> {
    match operator {
        Operator::Contains => {
            let needle = string_operand(operator, operand)?;
            Ok(items.iter().any(|item| item == needle))
        }
        Operator::DoesNotContain => {
            let needle = string_operand(operator, operand)?;
            Ok(!items.iter().any(|item| item == needle))
        }
        Operator::Equals | Operator::DoesNotEqual => {
            let expected: Vec<&str> = operand
                .as_array()
                .and_then(|values| values.iter().map(Value::as_str).collect())
                .ok_or_else(|| CompareError::Operand {
                    operator,
                    expected: "array of strings",
                    operand: operand.clone(),
                })?;
            let equal = items.iter().map(String::as_str).eq(expected);
            Ok(equal == (operator == Operator::Equals))
        }
        _ => Err(CompareError::Unsupported {
            operator,
            shape: "list",
        }),
    }
}

fn compare_date(
    operator: Operator,
    value: &str,
    operand: &Value,
    now: &Zoned,
) -> Result<bool, CompareError> {
    let tz = now.time_zone();
    let at = parse_date(value, tz)?;
    let reference = || -> Result<Timestamp, CompareError> {
        parse_date(string_operand(operator, operand)?, tz)
    };
    let now_ts = now.timestamp();

    match operator {
        Operator::Equals => Ok(at == reference()?),
        Operator::DoesNotEqual => Ok(at != reference()?),
        Operator::Before => Ok(at < reference()?),
        Operator::After => Ok(at > reference()?),
        Operator::OnOrBefore => Ok(at <= reference()?),
        Operator::OnOrAfter => Ok(at >= reference()?),
        Operator::PastWeek => Ok(within_past(at, now_ts, WEEK_DAYS)),
        Operator::PastMonth => Ok(within_past(at, now_ts, MONTH_DAYS)),
        Operator::PastYear => Ok(within_past(at, now_ts, YEAR_DAYS)),
        Operator::NextWeek => Ok(within_next(at, now_ts, WEEK_DAYS)),
        Operator::NextMonth => Ok(within_next(at, now_ts, MONTH_DAYS)),
        Operator::NextYear => Ok(within_next(at, now_ts, YEAR_DAYS)),
        Operator::ThisWeek => {
            let week = at.to_zoned(tz.clone()).date().iso_week_date();
            let current = now.date().iso_week_date();
            Ok(week.year() == current.year() && week.week() == current.week())
        }
        _ => Err(CompareError::Unsupported {
            operator,
            shape: "date",
        }),
    }
}

fn days(n: i64) -> SignedDuration {
    SignedDuration::from_hours(24 * n)
}

fn within_past(at: Timestamp, now: Timestamp, window_days: i64) -> bool {
    // Saturating: a window reaching past the representable range covers everything.
    let start = now.checked_sub(days(window_days)).unwrap_or(Timestamp::MIN);
    start <= at && at <= now
}

fn within_next(at: Timestamp, now: Timestamp, window_days: i64) -> bool {
    let end = now.checked_add(days(window_days)).unwrap_or(Timestamp::MAX);
    now <= at && at <= end
}

fn string_operand(operator: Operator, operand: &Value) -> Result<&str, CompareError> {
    operand.as_str().ok_or_else(|| CompareError::Operand {
        operator,
        expected: "string",
        operand: operand.clone(),
    })
}

/// Parse an ISO-8601 timestamp, datetime or date.
///
/// Values without an offset are interpreted in `tz`; bare dates mean midnight.
pub fn parse_date(input: &str, tz: &TimeZone) -> Result<Timestamp, CompareError> {
    if let Ok(ts) = input.parse::<Timestamp>() {
        return Ok(ts);
    }

    let civil = input
        .parse::<DateTime>()
        .or_else(|_| input.parse::<Date>().map(|d| d.to_datetime(jiff::civil::Time::midnight())))
        .map_err(|e| CompareError::Date {
            input: input.to_string(),
            message: e.to_string(),
        })?;

    civil
        .to_zoned(tz.clone())
        .map(|z| z.timestamp())
        .map_err(|e| CompareError::Date {
            input: input.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    /// 2026-10-14 12:00 UTC, a Wednesday in ISO week 42.
    fn now() -> Zoned {
        "2026-10-14T12:00:00Z"
            .parse::<Timestamp>()
            .unwrap()
            .to_zoned(TimeZone::UTC)
    }

    fn date(s: &str) -> Normalized {
        Normalized::Date(s.to_string())
    }

    fn check(operator: Operator, value: &Normalized, operand: Value) -> bool {
        compare(operator, value, &operand, &now()).unwrap()
    }

    #[test]
    fn text_operators() {
        let v = Normalized::Text("Order 1234".into());
        assert!(check(Operator::Equals, &v, json!("Order 1234")));
        assert!(check(Operator::DoesNotEqual, &v, json!("Order 9")));
        assert!(check(Operator::Contains, &v, json!("123")));
        assert!(check(Operator::DoesNotContain, &v, json!("999")));
        assert!(check(Operator::StartsWith, &v, json!("Order")));
        assert!(check(Operator::EndsWith, &v, json!("34")));
        assert!(check(Operator::IsNotEmpty, &v, json!(true)));
        assert!(check(Operator::IsEmpty, &Normalized::Text(String::new()), json!(true)));
    }

    #[test]
    fn number_ordering() {
        let v = Normalized::Number(5.0);
        assert!(check(Operator::LessThan, &v, json!(6)));
        assert!(check(Operator::GreaterThan, &v, json!(4.5)));
        assert!(check(Operator::LessThanOrEqualTo, &v, json!(5)));
        assert!(check(Operator::GreaterThanOrEqualTo, &v, json!(5)));
        assert!(!check(Operator::Equals, &v, json!(4)));
    }

    #[test]
    fn number_with_string_operand_is_an_error() {
        let err = compare(Operator::LessThan, &Normalized::Number(1.0), &json!("2"), &now());
        assert!(matches!(err, Err(CompareError::Operand { .. })));
    }

    #[test]
    fn list_membership() {
        let v = Normalized::List(vec!["red".into(), "blue".into()]);
        assert!(check(Operator::Contains, &v, json!("blue")));
        assert!(!check(Operator::Contains, &v, json!("bl")));
        assert!(check(Operator::DoesNotContain, &v, json!("green")));
        assert!(check(Operator::Equals, &v, json!(["red", "blue"])));
        assert!(check(Operator::IsEmpty, &Normalized::List(vec![]), json!(true)));
    }

    #[test]
    fn empty_values() {
        assert!(check(Operator::IsEmpty, &Normalized::Empty, json!(true)));
        assert!(!check(Operator::IsNotEmpty, &Normalized::Empty, json!(true)));
        assert!(!check(Operator::Equals, &Normalized::Empty, json!("x")));
        assert!(check(Operator::DoesNotEqual, &Normalized::Empty, json!("x")));
    }

    #[test]
    fn checkbox_equality() {
        assert!(check(Operator::Equals, &Normalized::Bool(true), json!(true)));
        assert!(check(Operator::DoesNotEqual, &Normalized::Bool(false), json!(true)));
    }

    #[test]
    fn past_week_window() {
        assert!(check(Operator::PastWeek, &date("2026-10-11T12:00:00Z"), json!({})));
        assert!(!check(Operator::PastWeek, &date("2026-10-04T12:00:00Z"), json!({})));
        assert!(!check(Operator::PastWeek, &date("2026-10-15T12:00:00Z"), json!({})));
    }

    #[test]
    fn fixed_month_and_year_windows() {
        // 29 days back is inside the 30-day window even across a month boundary.
        assert!(check(Operator::PastMonth, &date("2026-09-15"), json!({})));
        assert!(!check(Operator::PastMonth, &date("2026-09-13"), json!({})));
        assert!(check(Operator::NextYear, &date("2027-10-13"), json!({})));
        assert!(!check(Operator::NextYear, &date("2027-10-15"), json!({})));
    }

    #[test]
    fn next_week_excludes_the_past() {
        assert!(check(Operator::NextWeek, &date("2026-10-20T08:00:00Z"), json!({})));
        assert!(!check(Operator::NextWeek, &date("2026-10-13T08:00:00Z"), json!({})));
    }

    #[test]
    fn this_week_uses_iso_weeks() {
        // Monday and Sunday of ISO week 42.
        assert!(check(Operator::ThisWeek, &date("2026-10-12"), json!({})));
        assert!(check(Operator::ThisWeek, &date("2026-10-18T23:00:00Z"), json!({})));
        assert!(!check(Operator::ThisWeek, &date("2026-10-19"), json!({})));
        // Same week number, different year.
        assert!(!check(Operator::ThisWeek, &date("2025-10-15"), json!({})));
    }

    #[test]
    fn absolute_date_comparisons() {
        let v = date("2026-10-01T09:30:00.000-04:00");
        assert!(check(Operator::After, &v, json!("2026-10-01")));
        assert!(check(Operator::Before, &v, json!("2026-10-02")));
        assert!(check(Operator::OnOrAfter, &v, json!("2026-10-01T13:30:00Z")));
        assert!(check(Operator::OnOrBefore, &v, json!("2026-10-01T13:30:00Z")));
        assert!(check(Operator::Equals, &v, json!("2026-10-01T13:30:00Z")));
    }

    #[test]
    fn malformed_dates_are_errors() {
        let err = compare(Operator::PastWeek, &date("last tuesday"), &json!({}), &now());
        assert!(matches!(err, Err(CompareError::Date { .. })));

        let err = compare(Operator::Before, &date("2026-10-01"), &json!("soon"), &now());
        assert!(matches!(err, Err(CompareError::Date { .. })));
    }

    #[test]
    fn arrays_need_a_quantifier() {
        let err = compare(Operator::Equals, &Normalized::Array(vec![]), &json!(1), &now());
        assert!(matches!(err, Err(CompareError::ArrayNeedsQuantifier)));
    }

    #[test]
    fn text_ordering_is_unsupported() {
        let err = compare(Operator::LessThan, &Normalized::Text("a".into()), &json!("b"), &now());
        assert!(matches!(err, Err(CompareError::Unsupported { .. })));
    }
}
