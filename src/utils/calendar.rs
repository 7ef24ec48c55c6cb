use jiff::{civil::Date, ToSpan};

/// The same month and day one year earlier.  Feb 29 has no counterpart in a
/// common year, so it maps to `date - 365 days` (Mar 1 of the prior year).
pub fn same_day_last_year(date: Date) -> Option<Date> {
    shift_years(date, 1)
}

/// Move a date `years` calendar years back, with the same Feb 29 rule as
/// [`same_day_last_year`] applied at every step.
pub fn shift_years(date: Date, years: i16) -> Option<Date> {
    let mut out = date;
    for _ in 0..years {
        out = match Date::new(out.year() - 1, out.month(), out.day()) {
            Ok(d) => d,
            Err(_) => out.checked_sub(365.days()).ok()?,
        };
    }
    Some(out)
}

/// `date - n` calendar days, `None` on overflow.
pub fn days_before(date: Date, n: i64) -> Option<Date> {
    date.checked_sub(n.days()).ok()
}
