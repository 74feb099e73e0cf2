//! Medtronic CareLink CSV export parser.
//!
//! Layout: six metadata lines, then `;`-separated rows with at least 35
//! columns. Date and time are wall-clock values; they are read as UTC so the
//! calendar date of every row stays stable.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use super::{CsvMetadata, CsvRow, ImportException, ParseError, ParsedExport, RowProducer};

use crate::{log_debug, log_info};

const ENABLE_LOGS: bool = true;

const HEADER_LINES: usize = 6;
const MIN_COLUMNS: usize = 35;

const COL_DATE: usize = 1;
const COL_TIME: usize = 2;
const COL_ALERT: usize = 7;
const COL_PRIME: usize = 21;
const COL_SENSOR_GLUCOSE: usize = 34;

/// Plausible sensor range; values outside are kept but logged.
const GLUCOSE_PLAUSIBLE: std::ops::RangeInclusive<f64> = 40.0..=400.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct CareLinkParser;

impl RowProducer for CareLinkParser {
    fn parse(&self, raw: &str) -> Result<ParsedExport, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let lines: Vec<&str> = raw.lines().collect();
        let data_lines = lines.get(HEADER_LINES..).unwrap_or(&[]);

        let first = data_lines
            .iter()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| ParseError::Format("no data rows found after header".into()))?;

        let sample_columns = first.split(';').count();
        if sample_columns < MIN_COLUMNS {
            return Err(ParseError::Format(format!(
                "expected at least {MIN_COLUMNS} columns, found {sample_columns}. Is this a CareLink export?"
            )));
        }

        let mut rows = Vec::new();
        let mut exceptions = Vec::new();
        let mut checked = 0;

        for (offset, line) in data_lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            checked += 1;
            let line_number = HEADER_LINES + offset + 1;
            let parts: Vec<&str> = line.split(';').collect();

            if is_column_header(&parts) {
                continue;
            }

            if parts.len() < MIN_COLUMNS {
                exceptions.push(ImportException {
                    line: line_number,
                    reason: format!("expected {MIN_COLUMNS} columns, found {}", parts.len()),
                });
                continue;
            }

            match parse_row(&parts) {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {}
                Err(reason) => {
                    log_debug!("line {line_number}: {reason}");
                    exceptions.push(ImportException {
                        line: line_number,
                        reason,
                    });
                }
            }
        }

        if rows.is_empty() {
            return Err(ParseError::NoReadings { checked });
        }

        log_info!(
            "CareLink export parsed: {} rows kept, {} exceptions",
            rows.len(),
            exceptions.len()
        );

        Ok(ParsedExport {
            rows,
            metadata: parse_metadata(raw),
            exceptions,
        })
    }
}

fn is_column_header(parts: &[&str]) -> bool {
    parts.get(COL_DATE).map(|s| s.trim()) == Some("Date")
        && parts.get(COL_TIME).map(|s| s.trim()) == Some("Time")
}

/// `Ok(None)` for rows that carry nothing of interest (bolus-only rows etc).
fn parse_row(parts: &[&str]) -> Result<Option<CsvRow>, String> {
    let glucose = parts.get(COL_SENSOR_GLUCOSE).and_then(|raw| parse_decimal(raw));
    let alert = parts
        .get(COL_ALERT)
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
        .map(str::to_string);
    let rewind = parts.get(COL_PRIME).map(|raw| raw.trim()) == Some("Rewind");

    if glucose.is_none() && alert.is_none() && !rewind {
        return Ok(None);
    }

    let timestamp = parse_timestamp(parts[COL_DATE], parts[COL_TIME])?;

    let glucose = match glucose {
        Some(value) => {
            if !GLUCOSE_PLAUSIBLE.contains(&value) {
                log_debug!("suspicious glucose value {value} mg/dL at {timestamp}");
            }
            let rounded = value.round();
            if rounded < 1.0 || rounded > f64::from(u16::MAX) {
                return Err(format!("glucose value {value} out of range"));
            }
            Some(rounded as u16)
        }
        None => None,
    };

    Ok(Some(CsvRow {
        timestamp,
        glucose,
        alert,
        rewind,
    }))
}

fn parse_timestamp(date: &str, time: &str) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y/%m/%d")
        .map_err(|_| format!("invalid date '{}'", date.trim()))?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S")
        .map_err(|_| format!("invalid time '{}'", time.trim()))?;
    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

/// CareLink writes decimals with a comma.
fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Patient and device details from the first three header lines.
///
/// Line 1 carries `Device;<model>`, line 2 the quoted last/first name and
/// `Serial Number;<serial>`, line 3 `CGM;<sensor>`. Missing pieces stay `None`.
pub fn parse_metadata(raw: &str) -> CsvMetadata {
    let lines: Vec<&str> = raw.lines().take(3).collect();
    let mut metadata = CsvMetadata::default();

    if let Some(line) = lines.first() {
        metadata.device = value_after(line, "Device");
    }

    if let Some(line) = lines.get(1) {
        let parts: Vec<String> = line.split(';').map(unquote).collect();
        let last = parts.first().map(String::as_str).unwrap_or("");
        let first = parts.get(1).map(String::as_str).unwrap_or("");
        let name = format!("{first} {last}").trim().to_string();
        if !name.is_empty() {
            metadata.name = Some(name);
        }
        metadata.device_serial = value_after(line, "Serial Number");
    }

    if let Some(line) = lines.get(2) {
        metadata.cgm = value_after(line, "CGM");
    }

    metadata
}

fn unquote(raw: &str) -> String {
    raw.replace('"', "").trim().to_string()
}

fn value_after(line: &str, label: &str) -> Option<String> {
    let parts: Vec<String> = line.split(';').map(unquote).collect();
    let index = parts.iter().position(|part| part == label)?;
    parts
        .get(index + 1)
        .filter(|value| !value.is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{carelink_csv, ts, CsvLine};

    #[test]
    fn parses_glucose_alerts_and_rewinds() {
        let csv = carelink_csv(&[
            CsvLine::glucose(ts(2025, 10, 1, 8, 0), 120),
            CsvLine::alert(ts(2025, 10, 1, 8, 3), "SENSOR CONNECTED"),
            CsvLine::rewind(ts(2025, 10, 1, 9, 0)),
        ]);

        let export = CareLinkParser.parse(&csv).unwrap();

        assert_eq!(export.rows.len(), 3);
        assert_eq!(export.rows[0].glucose, Some(120));
        assert_eq!(export.rows[1].alert.as_deref(), Some("SENSOR CONNECTED"));
        assert!(export.rows[2].rewind);
        assert!(export.exceptions.is_empty());
    }

    #[test]
    fn comma_decimals_are_rounded() {
        let mut line = CsvLine::glucose(ts(2025, 10, 1, 8, 0), 0);
        line.glucose_raw = Some("117,6".into());
        let export = CareLinkParser.parse(&carelink_csv(&[line])).unwrap();
        assert_eq!(export.rows[0].glucose, Some(118));
    }

    #[test]
    fn bad_dates_become_exceptions() {
        let mut broken = CsvLine::glucose(ts(2025, 10, 1, 8, 0), 100);
        broken.date_raw = Some("2025/13/40".into());
        let csv = carelink_csv(&[broken, CsvLine::glucose(ts(2025, 10, 1, 8, 5), 101)]);

        let export = CareLinkParser.parse(&csv).unwrap();
        assert_eq!(export.rows.len(), 1);
        assert_eq!(export.exceptions.len(), 1);
        assert!(export.exceptions[0].reason.contains("invalid date"));
    }

    #[test]
    fn empty_and_narrow_inputs_are_rejected() {
        assert!(matches!(
            CareLinkParser.parse("  \n"),
            Err(ParseError::Empty)
        ));

        let narrow = "a\nb\nc\nd\ne\nf\n1;2025/10/01;08:00:00;x\n";
        assert!(matches!(
            CareLinkParser.parse(narrow),
            Err(ParseError::Format(_))
        ));
    }

    #[test]
    fn header_only_export_has_no_readings() {
        let csv = carelink_csv(&[]);
        assert!(matches!(
            CareLinkParser.parse(&csv),
            Err(ParseError::NoReadings { .. })
        ));
    }

    #[test]
    fn metadata_comes_from_header_lines() {
        let csv = carelink_csv(&[CsvLine::glucose(ts(2025, 10, 1, 8, 0), 120)]);
        let metadata = parse_metadata(&csv);

        assert_eq!(metadata.name.as_deref(), Some("Jane Doe"));
        assert_eq!(metadata.device.as_deref(), Some("MiniMed 780G MMT-1886"));
        assert_eq!(metadata.device_serial.as_deref(), Some("NG4114235H"));
        assert_eq!(metadata.cgm.as_deref(), Some("Guardian 4 Sensor"));
    }
}
