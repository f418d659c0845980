use serde::de::DeserializeOwned;
use serde_json::Value;

/// A PATCH body field that distinguishes "leave unchanged" from "clear".
#[derive(Debug, PartialEq)]
pub enum NullableField<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> NullableField<T> {
    pub fn is_omitted(&self) -> bool {
        matches!(self, NullableField::Omitted)
    }

    /// `None` when omitted, `Some(None)` when cleared.
    pub fn into_change(self) -> Option<Option<T>> {
        match self {
            NullableField::Omitted => None,
            NullableField::Null => Some(None),
            NullableField::Value(value) => Some(Some(value)),
        }
    }
}

pub fn classify_field<T: DeserializeOwned>(
    body: &Value,
    name: &str,
) -> Result<NullableField<T>, String> {
    match body.get(name) {
        None => Ok(NullableField::Omitted),
        Some(Value::Null) => Ok(NullableField::Null),
        Some(other) => serde_json::from_value(other.clone())
            .map(NullableField::Value)
            .map_err(|err| format!("invalid value for {name}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn tells_omitted_from_null() {
        let body = json!({ "deadline": null });
        let deadline: NullableField<NaiveDate> = classify_field(&body, "deadline").unwrap();
        assert_eq!(deadline, NullableField::Null);
        let budget: NullableField<i32> = classify_field(&body, "budget_min").unwrap();
        assert!(budget.is_omitted());
    }

    #[test]
    fn parses_present_values() {
        let body = json!({ "deadline": "2026-12-01", "budget_max": 5000 });
        let deadline: NullableField<NaiveDate> = classify_field(&body, "deadline").unwrap();
        assert_eq!(
            deadline.into_change(),
            Some(Some(NaiveDate::from_ymd_opt(2026, 12, 1).unwrap()))
        );
        let budget: NullableField<i32> = classify_field(&body, "budget_max").unwrap();
        assert_eq!(budget, NullableField::Value(5000));
    }

    #[test]
    fn rejects_wrong_types() {
        let body = json!({ "budget_max": "lots" });
        let result: Result<NullableField<i32>, _> = classify_field(&body, "budget_max");
        assert!(result.is_err());
    }
}
