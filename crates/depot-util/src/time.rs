use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.get(..3)?.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == lower).map(|i| i as u32 + 1)
}

fn is_weekday(name: &str) -> bool {
    const DAYS: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];
    name.get(..3)
        .map(|d| DAYS.contains(&d.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn zone_is_utc(zone: &str) -> bool {
    if matches!(zone, "GMT" | "UTC" | "Z") {
        return true;
    }
    // numeric timezones are accepted but must denote zero offset
    zone.parse::<i32>().map(|z| z == 0).unwrap_or(false)
}

fn time_of_day(spec: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(spec, "%H:%M:%S").ok()
}

/// Parse the three full-date shapes of RFC 7231 §7.1.1.1: the RFC 1123
/// form, the obsolete RFC 850 form and ANSI C `asctime()`. The date
/// must be in UTC; numeric timezones are accepted when they are zero.
pub fn parse_rfc1123(input: &str) -> Option<DateTime<Utc>> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let weekday = *tokens.first()?;
    if !is_weekday(weekday) {
        return None;
    }

    let (date, time) = match weekday.len() {
        // Sun, 06 Nov 1994 08:49:37 GMT
        4 => {
            if !weekday.ends_with(',') || tokens.len() != 6 {
                return None;
            }
            let day: u32 = tokens[1].parse().ok()?;
            let month = month_number(tokens[2])?;
            let year: i32 = tokens[3].parse().ok()?;
            if !zone_is_utc(tokens[5]) {
                return None;
            }
            (
                NaiveDate::from_ymd_opt(year, month, day)?,
                time_of_day(tokens[4])?,
            )
        }
        // Sun Nov  6 08:49:37 1994
        3 => {
            if tokens.len() != 5 {
                return None;
            }
            let month = month_number(tokens[1])?;
            let day: u32 = tokens[2].parse().ok()?;
            let year: i32 = tokens[4].parse().ok()?;
            (
                NaiveDate::from_ymd_opt(year, month, day)?,
                time_of_day(tokens[3])?,
            )
        }
        0..=2 => return None,
        // Sunday, 06-Nov-94 08:49:37 GMT
        _ => {
            if !weekday.ends_with(',') || tokens.len() != 4 {
                return None;
            }
            let mut parts = tokens[1].split('-');
            let day: u32 = parts.next()?.parse().ok()?;
            let month = month_number(parts.next()?)?;
            let year: i32 = parts.next()?.parse().ok()?;
            if parts.next().is_some() || !zone_is_utc(tokens[3]) {
                return None;
            }
            (
                NaiveDate::from_ymd_opt(1900 + year, month, day)?,
                time_of_day(tokens[2])?,
            )
        }
    };

    Some(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
}

/// Render a timestamp in the RFC 1123 shape, C locale, `GMT` suffix.
pub fn format_rfc1123(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse the FTP `MDTM` reply body, `YYYYMMDDHHMMSS`.
pub fn parse_ftp_mdtm(input: &str) -> Option<DateTime<Utc>> {
    if input.len() != 14 || !input.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(input, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Human-readable byte count, SI-1000 units, at most four significant
/// digits (`8192` → `8192`, `10000` → `10.0 k`).
pub fn size_to_str(size: u64) -> String {
    const UNITS: [&str; 9] = ["", "k", "M", "G", "T", "P", "E", "Z", "Y"];
    let mut value = size as f64;
    for (i, unit) in UNITS.iter().enumerate() {
        if value < 100.0 && i != 0 {
            return format!("{value:.1} {unit}");
        }
        if value < 10000.0 {
            return format!("{value:.0} {unit}").trim_end().to_string();
        }
        value /= 1000.0;
    }
    String::new()
}

/// Duration rendered from its two largest nonzero components
/// (`1d 2h`, `3min 4s`, `5s`).
pub fn time_to_str(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs / 3600) % 24;
    let mins = (secs / 60) % 60;
    let s = secs % 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}min")
    } else if mins > 0 {
        format!("{mins}min {s}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_shapes() {
        let expect = Utc
            .with_ymd_and_hms(1994, 11, 6, 8, 49, 37)
            .single()
            .unwrap();
        assert_eq!(
            parse_rfc1123("Sun, 06 Nov 1994 08:49:37 GMT"),
            Some(expect)
        );
        assert_eq!(
            parse_rfc1123("Sunday, 06-Nov-94 08:49:37 GMT"),
            Some(expect)
        );
        assert_eq!(parse_rfc1123("Sun Nov  6 08:49:37 1994"), Some(expect));
    }

    #[test]
    fn accepts_zero_numeric_timezone_only() {
        assert!(parse_rfc1123("Sun, 06 Nov 1994 08:49:37 +0000").is_some());
        assert!(parse_rfc1123("Sun, 06 Nov 1994 08:49:37 -0000").is_some());
        assert!(parse_rfc1123("Sun, 06 Nov 1994 08:49:37 +0200").is_none());
    }

    #[test]
    fn rejects_garbage_dates() {
        assert!(parse_rfc1123("So, 06 Nov 1994 08:49:37 GMT").is_none());
        assert!(parse_rfc1123("Sun, 31 Feb 1994 08:49:37 GMT").is_none());
        assert!(parse_rfc1123("Sun, 06 Nov 1994 08:49:37").is_none());
        assert!(parse_rfc1123("").is_none());
    }

    #[test]
    fn formats_round_trip() {
        let stamp = "Sun, 06 Nov 1994 08:49:37 GMT";
        assert_eq!(format_rfc1123(parse_rfc1123(stamp).unwrap()), stamp);
    }

    #[test]
    fn parses_mdtm() {
        let when = parse_ftp_mdtm("19941106084937").unwrap();
        assert_eq!(format_rfc1123(when), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(parse_ftp_mdtm("1994110608493").is_none());
        assert!(parse_ftp_mdtm("1994110608493x").is_none());
    }

    #[test]
    fn renders_sizes() {
        assert_eq!(size_to_str(0), "0");
        assert_eq!(size_to_str(1024), "1024");
        assert_eq!(size_to_str(10_000), "10.0 k");
        assert_eq!(size_to_str(123_456), "123 k");
        assert_eq!(size_to_str(1_234_567_890), "1235 M");
    }

    #[test]
    fn renders_durations() {
        assert_eq!(time_to_str(5), "5s");
        assert_eq!(time_to_str(61), "1min 1s");
        assert_eq!(time_to_str(3661), "1h 1min");
        assert_eq!(time_to_str(90_061), "1d 1h");
    }
}
