//! Five-field cron expressions.
//!
//! Expressions are `minute hour day-of-month month day-of-week`. Each field is
//! `*`, a number, a range `a-b`, or a step `base/n` where `base` is one of the
//! former and `n` is in `1..=59`. Day-of-week accepts `0-7`, with both `0` and
//! `7` meaning Sunday. Day-of-month and day-of-week must both match.
//!
//! Validation happens here; occurrence search is delegated to the `cron` crate
//! by rendering each validated field as an explicit value list in its
//! seconds-first syntax.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    const ALL: [Field; 5] = [
        Field::Minute,
        Field::Hour,
        Field::DayOfMonth,
        Field::Month,
        Field::DayOfWeek,
    ];

    fn name(self) -> &'static str {
        match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 7),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Any,
    Value(u32),
    Range(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldExpr {
    Span(Span),
    Step { base: Span, step: u32 },
}

impl FieldExpr {
    fn parse(field: Field, token: &str) -> Result<Self, SchedulerError> {
        match token.split_once('/') {
            Some((base, step)) => {
                let step = parse_number(field, step)?;
                if !(1..=59).contains(&step) {
                    return Err(invalid(field, token, "step must be between 1 and 59"));
                }
                let base = Span::parse(field, base)?;
                Ok(FieldExpr::Step { base, step })
            }
            None => Ok(FieldExpr::Span(Span::parse(field, token)?)),
        }
    }

    /// Concrete values selected by this field, in the field's own numbering.
    fn values(&self, field: Field) -> BTreeSet<u32> {
        let (lo, hi) = field.bounds();
        match *self {
            FieldExpr::Span(Span::Any) => (lo..=hi).collect(),
            FieldExpr::Span(Span::Value(v)) => BTreeSet::from([v]),
            FieldExpr::Span(Span::Range(a, b)) => (a..=b).collect(),
            FieldExpr::Step { base, step } => {
                let (start, end) = match base {
                    Span::Any => (lo, hi),
                    Span::Value(v) => (v, hi),
                    Span::Range(a, b) => (a, b),
                };
                (start..=end).step_by(step as usize).collect()
            }
        }
    }
}

impl Span {
    fn parse(field: Field, token: &str) -> Result<Self, SchedulerError> {
        if token == "*" {
            return Ok(Span::Any);
        }

        let (lo, hi) = field.bounds();
        let check = |v: u32| {
            if v < lo || v > hi {
                Err(invalid(
                    field,
                    token,
                    &format!("value {} outside {}-{}", v, lo, hi),
                ))
            } else {
                Ok(v)
            }
        };

        match token.split_once('-') {
            Some((a, b)) => {
                let a = check(parse_number(field, a)?)?;
                let b = check(parse_number(field, b)?)?;
                if a > b {
                    return Err(invalid(field, token, "range start is after range end"));
                }
                Ok(Span::Range(a, b))
            }
            None => Ok(Span::Value(check(parse_number(field, token)?)?)),
        }
    }
}

fn parse_number(field: Field, text: &str) -> Result<u32, SchedulerError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(field, text, "expected a non-negative integer"));
    }
    text.parse::<u32>()
        .map_err(|_| invalid(field, text, "number is too large"))
}

fn invalid(field: Field, token: &str, reason: &str) -> SchedulerError {
    SchedulerError::BadRequest(format!(
        "invalid cron {} field '{}': {}",
        field.name(),
        token,
        reason
    ))
}

/// Render one field for the `cron` crate.
fn render(field: Field, expr: &FieldExpr) -> String {
    if *expr == FieldExpr::Span(Span::Any) {
        return "*".to_string();
    }

    let values = expr.values(field);
    let values: BTreeSet<u32> = match field {
        // The cron crate numbers weekdays 1 (Sunday) through 7 (Saturday).
        Field::DayOfWeek => values.into_iter().map(|d| d % 7 + 1).collect(),
        _ => values,
    };

    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// A validated five-field cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// Validate an expression.
    ///
    /// Fails with [`SchedulerError::BadRequest`] on a wrong field count, any
    /// field outside the grammar, or an expression that never fires.
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let tokens: Vec<&str> = expression.split_whitespace().collect();
        if tokens.len() != Field::ALL.len() {
            return Err(SchedulerError::BadRequest(format!(
                "invalid cron expression '{}': expected 5 fields, found {}",
                expression,
                tokens.len()
            )));
        }

        let mut rendered = vec!["0".to_string()];
        for (field, token) in Field::ALL.iter().zip(&tokens) {
            let expr = FieldExpr::parse(*field, token)?;
            rendered.push(render(*field, &expr));
        }

        let schedule = cron::Schedule::from_str(&rendered.join(" ")).map_err(|e| {
            SchedulerError::BadRequest(format!("invalid cron expression '{}': {}", expression, e))
        })?;

        if schedule.upcoming(Utc).next().is_none() {
            return Err(SchedulerError::BadRequest(format!(
                "cron expression '{}' never fires",
                expression
            )));
        }

        Ok(Self {
            expression: tokens.join(" "),
            schedule,
        })
    }

    /// The normalized expression (single spaces between fields).
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl FromStr for CronSchedule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
