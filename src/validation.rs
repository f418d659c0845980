//! Field checks shared by the profile wizard and campaign/proposal forms.
//!
//! A [`Checks`] collects every problem in one pass so clients can show
//! all inline messages at once instead of failing on the first.

use std::collections::HashSet;

use crate::error::{AppError, FieldErrors};

#[derive(Debug, Default)]
pub struct Checks {
    errors: FieldErrors,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> FieldErrors {
        self.errors
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, message) in other {
            self.errors.entry(field).or_insert(message);
        }
    }

    pub fn finish<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.errors)
        }
    }

    pub fn finish_http<T>(self, value: T) -> Result<T, AppError> {
        self.finish(value).map_err(AppError::validation)
    }

    /// Required free text, trimmed, with a length range in characters.
    pub fn text(
        &mut self,
        field: &str,
        value: Option<&str>,
        min: usize,
        max: usize,
    ) -> Option<String> {
        let trimmed = value.map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            self.fail(field, "is required");
            return None;
        }
        let len = trimmed.chars().count();
        if len < min {
            self.fail(field, format!("must be at least {min} characters"));
            return None;
        }
        if len > max {
            self.fail(field, format!("must be at most {max} characters"));
            return None;
        }
        Some(trimmed.to_string())
    }

    /// Optional free text: blank becomes `None`.
    pub fn optional_text(&mut self, field: &str, value: Option<&str>, max: usize) -> Option<String> {
        let trimmed = value.map(str::trim).filter(|value| !value.is_empty())?;
        if trimmed.chars().count() > max {
            self.fail(field, format!("must be at most {max} characters"));
            return None;
        }
        Some(trimmed.to_string())
    }

    pub fn choice(&mut self, field: &str, value: Option<&str>, allowed: &[&str]) -> Option<String> {
        let Some(raw) = value.map(str::trim).filter(|value| !value.is_empty()) else {
            self.fail(field, "is required");
            return None;
        };
        let normalized = raw.to_lowercase();
        if allowed.contains(&normalized.as_str()) {
            Some(normalized)
        } else {
            self.fail(field, format!("must be one of: {}", allowed.join(", ")));
            None
        }
    }

    pub fn int_range(&mut self, field: &str, value: Option<i32>, min: i32, max: i32) -> Option<i32> {
        let Some(value) = value else {
            self.fail(field, "is required");
            return None;
        };
        if value < min || value > max {
            self.fail(field, format!("must be between {min} and {max}"));
            return None;
        }
        Some(value)
    }

    pub fn optional_int_range(
        &mut self,
        field: &str,
        value: Option<i32>,
        min: i32,
        max: i32,
    ) -> Option<i32> {
        value.and_then(|value| self.int_range(field, Some(value), min, max))
    }

    /// Optional http(s) URL. Blank becomes `None`.
    pub fn optional_url(&mut self, field: &str, value: Option<&str>) -> Option<String> {
        let trimmed = value.map(str::trim).filter(|value| !value.is_empty())?;
        match url::Url::parse(trimmed) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some() => {
                Some(trimmed.to_string())
            }
            _ => {
                self.fail(field, "must be an http:// or https:// URL");
                None
            }
        }
    }

    /// A list of short labels: trimmed, blanks dropped, case-insensitive
    /// duplicates removed keeping the first spelling.
    pub fn labels(
        &mut self,
        field: &str,
        value: Option<&[String]>,
        min: usize,
        max: usize,
    ) -> Option<Vec<String>> {
        let mut seen = HashSet::new();
        let mut labels = Vec::new();
        for raw in value.unwrap_or_default() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.chars().count() > MAX_LABEL_LENGTH {
                self.fail(
                    field,
                    format!("entries must be at most {MAX_LABEL_LENGTH} characters"),
                );
                return None;
            }
            if seen.insert(trimmed.to_lowercase()) {
                labels.push(trimmed.to_string());
            }
        }
        if labels.len() < min {
            if min == 1 {
                self.fail(field, "needs at least one entry");
            } else {
                self.fail(field, format!("needs at least {min} entries"));
            }
            return None;
        }
        if labels.len() > max {
            self.fail(field, format!("allows at most {max} entries"));
            return None;
        }
        Some(labels)
    }

    pub fn email(&mut self, field: &str, value: &str) -> Option<String> {
        let normalized = value.trim().to_lowercase();
        if looks_like_email(&normalized) {
            Some(normalized)
        } else {
            self.fail(field, "must be a valid email address");
            None
        }
    }
}

pub const MAX_LABEL_LENGTH: usize = 50;

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
        && value.len() <= 255
}
