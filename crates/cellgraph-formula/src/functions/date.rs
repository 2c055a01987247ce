//! Date functions over serial day numbers
//!
//! In the 1900 date system serial 1 is 1900-01-01 and serial 60 is the
//! fictional 1900-02-29, so every later serial is one day ahead of the
//! proleptic calendar. In the 1904 system serial 0 is 1904-01-01.

use chrono::{Datelike, Duration, Local, NaiveDate, Timelike};
use cellgraph_core::ErrorCode;

use crate::value::{EvalResult, Value};

use super::EvaluationContext;

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Serial of a real calendar date
fn serial_from_date(date: NaiveDate, date_1904: bool) -> Option<i64> {
    if date_1904 {
        return Some((date - ymd(1904, 1, 1)?).num_days());
    }
    let days = (date - ymd(1899, 12, 31)?).num_days();
    Some(if date >= ymd(1900, 3, 1)? { days + 1 } else { days })
}

/// (year, month, day) of a serial. Serial 0 in the 1900 system is the
/// day before 1900-01-01, shown as 1900-01-00.
fn date_parts(serial: i64, date_1904: bool) -> Option<(i32, u32, u32)> {
    if serial < 0 {
        return None;
    }
    let date = if date_1904 {
        ymd(1904, 1, 1)?.checked_add_signed(Duration::days(serial))?
    } else {
        match serial {
            0 => return Some((1900, 1, 0)),
            60 => return Some((1900, 2, 29)),
            s if s > 60 => ymd(1899, 12, 31)?.checked_add_signed(Duration::days(s - 1))?,
            s => ymd(1899, 12, 31)?.checked_add_signed(Duration::days(s))?,
        }
    };
    Some((date.year(), date.month(), date.day()))
}

fn serial_arg(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<(i32, u32, u32)> {
    let serial = ctx.number(&args[0])?.floor();
    if serial > i64::MAX as f64 {
        return Err(ErrorCode::Num.into());
    }
    date_parts(serial as i64, ctx.date_1904()).ok_or_else(|| ErrorCode::Num.into())
}

/// DATE(year, month, day)
///
/// Years 0..1899 are offset by 1900. Months and days outside their usual
/// range roll over into neighbouring months and years.
pub fn fn_date(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let mut year = ctx.number(&args[0])?.trunc() as i64;
    let month = ctx.number(&args[1])?.trunc() as i64;
    let day = ctx.number(&args[2])?.trunc() as i64;

    if (0..1900).contains(&year) {
        year += 1900;
    }
    if !(0..=9999).contains(&year) {
        return Ok(Value::Error(ErrorCode::Num));
    }

    let total_months = year * 12 + (month - 1);
    let norm_year = total_months.div_euclid(12) as i32;
    let norm_month = total_months.rem_euclid(12) as u32 + 1;

    let Some(month_start) = ymd(norm_year, norm_month, 1)
        .and_then(|first| serial_from_date(first, ctx.date_1904()))
    else {
        return Ok(Value::Error(ErrorCode::Num));
    };
    let serial = month_start + day - 1;
    if serial < 0 {
        return Ok(Value::Error(ErrorCode::Num));
    }
    Ok(Value::Number(serial as f64))
}

/// YEAR(serial)
pub fn fn_year(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let (y, _, _) = serial_arg(args, ctx)?;
    Ok(Value::Number(f64::from(y)))
}

/// MONTH(serial)
pub fn fn_month(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let (_, m, _) = serial_arg(args, ctx)?;
    Ok(Value::Number(f64::from(m)))
}

/// DAY(serial)
pub fn fn_day(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let (_, _, d) = serial_arg(args, ctx)?;
    Ok(Value::Number(f64::from(d)))
}

fn today_serial(ctx: &EvaluationContext<'_>) -> EvalResult<f64> {
    serial_from_date(Local::now().date_naive(), ctx.date_1904())
        .map(|s| s as f64)
        .ok_or_else(|| ErrorCode::Num.into())
}

/// NOW() - current date and time as a serial
pub fn fn_now(_args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let now = Local::now();
    let seconds = f64::from(now.hour() * 3600 + now.minute() * 60 + now.second());
    Ok(Value::Number(today_serial(ctx)? + seconds / 86400.0))
}

/// TODAY() - current date as a serial
pub fn fn_today(_args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Number(today_serial(ctx)?))
}
