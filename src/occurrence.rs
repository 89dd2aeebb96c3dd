//! Calendar expansion of weekly templates.

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::models::ClassTemplate;

/// Dates in `[from, horizon_end]` on which `template` takes place, ascending.
pub fn occurrences(
    template: &ClassTemplate,
    from: NaiveDate,
    horizon_end: NaiveDate,
) -> Vec<NaiveDate> {
    weekday_dates(template.weekday, from, horizon_end).collect()
}

/// Iterates every `weekday` between `from` and `to`, both inclusive.
pub fn weekday_dates(
    weekday: Weekday,
    from: NaiveDate,
    to: NaiveDate,
) -> impl Iterator<Item = NaiveDate> {
    let first = first_on_or_after(from, weekday);
    std::iter::successors(first, |date| date.checked_add_days(Days::new(7)))
        .take_while(move |date| *date <= to)
}

/// First date on or after `from` that falls on `weekday`.
pub fn first_on_or_after(from: NaiveDate, weekday: Weekday) -> Option<NaiveDate> {
    let offset = (7 + weekday.num_days_from_monday() - from.weekday().num_days_from_monday()) % 7;
    from.checked_add_days(Days::new(offset.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{date, vinyasa};

    fn on(weekday: Weekday) -> ClassTemplate {
        ClassTemplate {
            weekday,
            ..vinyasa(1)
        }
    }

    #[test]
    fn test_month_boundary() {
        let dates = occurrences(&on(Weekday::Mon), date(2024, 1, 29), date(2024, 2, 12));
        assert_eq!(
            dates,
            vec![date(2024, 1, 29), date(2024, 2, 5), date(2024, 2, 12)]
        );
    }

    #[test]
    fn test_from_not_on_weekday() {
        // 2024-01-30 is a Tuesday
        let dates = occurrences(&on(Weekday::Mon), date(2024, 1, 30), date(2024, 2, 12));
        assert_eq!(dates, vec![date(2024, 2, 5), date(2024, 2, 12)]);
    }

    #[test]
    fn test_year_boundary() {
        let dates = occurrences(&on(Weekday::Tue), date(2024, 12, 25), date(2025, 1, 14));
        assert_eq!(
            dates,
            vec![date(2024, 12, 31), date(2025, 1, 7), date(2025, 1, 14)]
        );
    }

    #[test]
    fn test_leap_day() {
        // 2024-02-29 is a Thursday
        let dates = occurrences(&on(Weekday::Thu), date(2024, 2, 20), date(2024, 3, 7));
        assert_eq!(
            dates,
            vec![date(2024, 2, 22), date(2024, 2, 29), date(2024, 3, 7)]
        );
    }

    #[test]
    fn test_empty_when_from_after_horizon() {
        let dates = occurrences(&on(Weekday::Mon), date(2024, 2, 13), date(2024, 2, 12));
        assert!(dates.is_empty());
    }

    #[test]
    fn test_single_day_window() {
        assert_eq!(
            occurrences(&on(Weekday::Mon), date(2024, 1, 29), date(2024, 1, 29)),
            vec![date(2024, 1, 29)]
        );
        let sundays = occurrences(&on(Weekday::Sun), date(2024, 1, 29), date(2024, 1, 29));
        assert!(sundays.is_empty());
    }

    #[test]
    fn test_every_weekday_over_a_year() {
        let from = date(2023, 12, 20);
        let to = date(2025, 1, 10);
        for weekday in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            let dates = occurrences(&on(weekday), from, to);
            assert!(!dates.is_empty());
            assert!(dates.iter().all(|d| d.weekday() == weekday));
            assert!(dates.iter().all(|d| *d >= from && *d <= to));
            assert!(dates.windows(2).all(|w| (w[1] - w[0]).num_days() == 7));
            assert!(*dates.first().unwrap() - from < chrono::TimeDelta::days(7));
            assert!(to - *dates.last().unwrap() < chrono::TimeDelta::days(7));
        }
    }

    #[test]
    fn test_end_of_calendar_is_total() {
        let from = NaiveDate::MAX - Days::new(20);
        let dates = occurrences(&on(Weekday::Mon), from, NaiveDate::MAX);
        assert!(dates.len() <= 3);
        assert!(dates.iter().all(|d| d.weekday() == Weekday::Mon));
    }
}
