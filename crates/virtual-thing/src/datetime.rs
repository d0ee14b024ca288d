//! `dt/...` pointer targets.
//!
//! Months are 0-based and weekdays count from Sunday = 0, so descriptions
//! written against the JavaScript `Date` accessors keep working.

use chrono::{DateTime, Datelike, Local, SecondsFormat, TimeZone, Timelike, Utc};
use serde_json::Value;

use crate::error::{Error, Result};

const COMPONENTS: &[&str] = &[
    "unix", "iso", "local", "l_time", "l_date", "l_ms", "l_s", "l_m", "l_h", "l_d", "l_M", "l_y", "l_wd", "utc",
    "u_time", "u_date", "u_ms", "u_s", "u_m", "u_h", "u_d", "u_M", "u_y", "u_wd",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DateTimeExpr {
    Component(&'static str),
    LocalFormat(String),
    UtcFormat(String),
}

fn body(expr: &str) -> Option<&str> {
    expr.strip_prefix("/dt/").or_else(|| expr.strip_prefix("dt/"))
}

/// Whether a resolved pointer text addresses the date-time accessor at all.
pub fn is_dt_expr(expr: &str) -> bool {
    body(expr).is_some()
}

pub fn parse(expr: &str) -> Result<DateTimeExpr> {
    let invalid = || Error::fatal(format!("Invalid DateTime format: {expr}"));
    let body = body(expr).ok_or_else(invalid)?;
    if let Some(component) = COMPONENTS.iter().copied().find(|component| *component == body) {
        return Ok(DateTimeExpr::Component(component));
    }
    let formatted = |prefix: &str| {
        body.strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
            .filter(|format| !format.contains(['(', ')']))
    };
    if let Some(format) = formatted("local") {
        return Ok(DateTimeExpr::LocalFormat(format.to_owned()));
    }
    if let Some(format) = formatted("utc") {
        return Ok(DateTimeExpr::UtcFormat(format.to_owned()));
    }
    Err(invalid())
}

impl DateTimeExpr {
    pub fn get(&self) -> Result<Value> {
        let now = Utc::now();
        match self {
            Self::Component(component) => Ok(component_value(component, &now, &now.with_timezone(&Local))),
            Self::LocalFormat(format) if format.is_empty() => Ok(Value::from(locale_string(&now.with_timezone(&Local)))),
            Self::UtcFormat(format) if format.is_empty() => Ok(Value::from(now.format("%a, %d %b %Y %H:%M:%S GMT").to_string())),
            Self::LocalFormat(format) => Ok(Value::from(now.with_timezone(&Local).format(&strftime(format)?).to_string())),
            Self::UtcFormat(format) => Ok(Value::from(now.format(&strftime(format)?).to_string())),
        }
    }
}

fn locale_string<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}

fn component_value(component: &str, utc: &DateTime<Utc>, local: &DateTime<Local>) -> Value {
    match component {
        "unix" => Value::from(utc.timestamp_millis()),
        "iso" => Value::from(utc.to_rfc3339_opts(SecondsFormat::Millis, true)),
        "local" => Value::from(locale_string(local)),
        "l_time" => Value::from(local.format("%H:%M:%S GMT%z").to_string()),
        "l_date" => Value::from(local.format("%a %b %d %Y").to_string()),
        "l_ms" => Value::from(local.timestamp_subsec_millis()),
        "l_s" => Value::from(local.second()),
        "l_m" => Value::from(local.minute()),
        "l_h" => Value::from(local.hour()),
        "l_d" => Value::from(local.day()),
        "l_M" => Value::from(local.month0()),
        "l_y" => Value::from(local.year()),
        "l_wd" => Value::from(local.weekday().num_days_from_sunday()),
        "utc" => Value::from(utc.format("%a, %d %b %Y %H:%M:%S GMT").to_string()),
        "u_time" => Value::from(utc.format("%H:%M:%S GMT+0000").to_string()),
        "u_date" => Value::from(utc.format("%a %b %d %Y").to_string()),
        "u_ms" => Value::from(utc.timestamp_subsec_millis()),
        "u_s" => Value::from(utc.second()),
        "u_m" => Value::from(utc.minute()),
        "u_h" => Value::from(utc.hour()),
        "u_d" => Value::from(utc.day()),
        "u_M" => Value::from(utc.month0()),
        "u_y" => Value::from(utc.year()),
        "u_wd" => Value::from(utc.weekday().num_days_from_sunday()),
        _ => Value::Null,
    }
}

/// Translate Unicode date tokens (`yyyy-MM-dd HH:mm:ss.SSS`) to a strftime string.
/// Text between single quotes is literal, `''` is a quote.
pub fn strftime(format: &str) -> Result<String> {
    let chars: Vec<char> = format.chars().collect();
    let mut out = String::new();
    let mut index = 0;
    while index < chars.len() {
        let c = chars[index];
        if c == '\'' {
            if chars.get(index + 1) == Some(&'\'') {
                out.push('\'');
                index += 2;
                continue;
            }
            index += 1;
            while index < chars.len() && chars[index] != '\'' {
                push_literal(&mut out, chars[index]);
                index += 1;
            }
            index += 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            index += 1;
            continue;
        }
        let run = chars[index..].iter().take_while(|next| **next == c).count();
        index += run;
        let spec = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('E', 4) => "%A",
            ('E', _) => "%a",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', _) => "%3f",
            ('a', _) => "%p",
            ('x' | 'X', _) => "%:z",
            ('D', _) => "%j",
            _ => {
                return Err(Error::fatal(format!(
                    "Format string contains an unescaped latin alphabet character `{c}`"
                )));
            }
        };
        out.push_str(spec);
    }
    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
