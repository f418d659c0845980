use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_utc_offset() {
        let dt = NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(9, 26, 53)
            .unwrap();
        assert_eq!(to_iso(dt), "2026-03-14T09:26:53+00:00");
    }
}
