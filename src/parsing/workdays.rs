//! ProTime work-schedule parser.
//!
//! Accepts the JSON shapes the dashboard has exported over time, or text
//! copied out of a ProTime PDF (Dutch day abbreviations, `D/M` dates).

use std::{collections::BTreeSet, sync::LazyLock};

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

use super::{ParseError, WorkdayParser};

use crate::log_debug;

const ENABLE_LOGS: bool = true;

static HEADER_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(20\d{2})\b").expect("Invalid header date regex")
});
static WEEK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Week\s+\d+\s+(20\d{2})").expect("Invalid week header regex"));
static DAY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(ma|di|wo|do|vr|za|zo)\s+(\d{1,2})/(\d{1,2})")
        .expect("Invalid day line regex")
});
static CLOCK_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}:\d{2}").expect("Invalid clock time regex"));

/// Markers for days off; such lines never count as work days.
const DAY_OFF_MARKERS: [&str; 3] = ["Vakantie", "OA Var", "Vrije Dag"];

#[derive(Debug, Default, Clone, Copy)]
pub struct ProTimeParser;

impl WorkdayParser for ProTimeParser {
    fn parse_workdays(
        &self,
        raw: &str,
        fallback_year: i32,
    ) -> Result<BTreeSet<NaiveDate>, ParseError> {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            let days = parse_json(&value);
            if !days.is_empty() {
                return Ok(days);
            }
        }

        let days = parse_pdf_text(raw, fallback_year);
        if days.is_empty() {
            return Err(ParseError::Workdays(
                "expected ProTime PDF text or JSON format".into(),
            ));
        }
        Ok(days)
    }
}

fn parse_json(value: &Value) -> BTreeSet<NaiveDate> {
    let mut days = BTreeSet::new();

    match value {
        Value::Object(map) => match map.get("workdays") {
            Some(Value::Array(entries)) => {
                for entry in entries {
                    match entry {
                        // {date, is_workday}; is_workday may also be a clock time
                        Value::Object(obj) => {
                            if obj.get("is_workday").map(is_truthy).unwrap_or(false) {
                                if let Some(day) = obj.get("date").and_then(Value::as_str) {
                                    insert_date(&mut days, day);
                                }
                            }
                        }
                        Value::String(day) => insert_date(&mut days, day),
                        _ => {}
                    }
                }
            }
            _ => {
                for (day, flag) in map {
                    if flag == &Value::Bool(true) {
                        insert_date(&mut days, day);
                    }
                }
            }
        },
        Value::Array(entries) => {
            for day in entries.iter().filter_map(Value::as_str) {
                insert_date(&mut days, day);
            }
        }
        _ => {}
    }

    days
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn insert_date(days: &mut BTreeSet<NaiveDate>, raw: &str) {
    let normalized = raw.trim().replace('-', "/");
    match NaiveDate::parse_from_str(&normalized, "%Y/%m/%d") {
        Ok(day) => {
            days.insert(day);
        }
        Err(_) => log_debug!("skipping unparseable workday '{raw}'"),
    }
}

fn parse_pdf_text(raw: &str, fallback_year: i32) -> BTreeSet<NaiveDate> {
    let mut year = HEADER_DATE
        .captures(raw)
        .and_then(|caps| caps[3].parse::<i32>().ok())
        .unwrap_or(fallback_year);

    let mut days = BTreeSet::new();

    for line in raw.lines() {
        if let Some(caps) = WEEK_HEADER.captures(line) {
            if let Ok(week_year) = caps[1].parse::<i32>() {
                year = week_year;
            }
            continue;
        }

        let Some(caps) = DAY_LINE.captures(line) else {
            continue;
        };

        let worked = CLOCK_TIME.is_match(line)
            && !DAY_OFF_MARKERS.iter().any(|marker| line.contains(marker));
        if !worked {
            continue;
        }

        let day = caps[2].parse::<u32>().ok();
        let month = caps[3].parse::<u32>().ok();
        match day
            .zip(month)
            .and_then(|(day, month)| NaiveDate::from_ymd_opt(year, month, day))
        {
            Some(date) => {
                days.insert(date);
            }
            None => log_debug!("skipping impossible date in line '{}'", line.trim()),
        }
    }

    days
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_every_json_shape() {
        let rich = r#"{"workdays":[{"date":"2025-10-01","is_workday":"22:00"},{"date":"2025-10-02","is_workday":false}]}"#;
        let simple = r#"{"workdays":["2025/10/01"]}"#;
        let array = r#"["2025-10-01"]"#;
        let flags = r#"{"2025/10/01":true,"2025/10/02":false}"#;

        for input in [rich, simple, array, flags] {
            let days = ProTimeParser.parse_workdays(input, 2020).unwrap();
            assert_eq!(days, BTreeSet::from([date(2025, 10, 1)]), "input {input}");
        }
    }

    #[test]
    fn pdf_text_uses_header_year_and_skips_days_off() {
        let text = "\
Gegenereerd op 22/10/2025
wo 01/10   8:52   17:03
do 2/10    -      -
vr 03/10   Vakantie 7:36
ma 06/10   11:34  19:46
di 07/10   OZ Vrije Dag
";
        let days = ProTimeParser.parse_workdays(text, 2020).unwrap();
        assert_eq!(days, BTreeSet::from([date(2025, 10, 1), date(2025, 10, 6)]));
    }

    #[test]
    fn week_headers_switch_the_year() {
        let text = "\
Week 52 2024
ma 30/12  8:00  16:00
Week 1 2025
do 02/01  8:00  16:00
";
        let days = ProTimeParser.parse_workdays(text, 2000).unwrap();
        assert_eq!(days, BTreeSet::from([date(2024, 12, 30), date(2025, 1, 2)]));
    }

    #[test]
    fn unrecognised_input_is_an_error() {
        assert!(matches!(
            ProTimeParser.parse_workdays("hello world", 2025),
            Err(ParseError::Workdays(_))
        ));
    }
}
