//! Column vocabulary and sensitivity classification.
//!
//! Source dumps name their columns in whatever language and spelling the
//! leaker used ("почта", "email", "Phone Number"). Raw names are first
//! mapped onto one canonical vocabulary, then bucketed into sensitivity
//! tiers for the search report. Unrecognized columns land in `low` under
//! their original name.

use serde::Serialize;

/// Sensitivity tier of a matched column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Critical,
    Medium,
    Low,
}

/// Maps a raw column name onto the canonical vocabulary.
///
/// Matching is case-insensitive on the trimmed name. Unrecognized names are
/// returned trimmed but otherwise as-is, so the report still shows what the
/// source called the column.
pub fn canonical_column(raw: &str) -> String {
    let trimmed = raw.trim();
    let canonical = match trimmed.to_lowercase().as_str() {
        "email" | "e-mail" | "mail" | "почта" => "email",
        "phone" | "number" | "phone number" | "phone_number" | "телефон"
        | "номер телефона" => "phone_number",
        "password" | "пароль" => "password",
        "credit card" | "credit_card" | "банковская карта" => "credit_card",
        "cvv" => "cvv",
        "address" | "адрес" => "address",
        "bank account" | "bank_account" => "bank_account",
        "birthdate" | "birth_date" | "дата рождения" | "датарожд" => "birth_date",
        "work address" | "work_address" | "рабочий адрес" => "work_address",
        "city" | "город" => "city",
        "name" | "first name" | "first_name" | "имя" => "name",
        "last name" | "last_name" | "фамилия" => "last_name",
        "zip" => "zip",
        "postal code" | "postal_code" | "индекс" => "postal_code",
        "username" | "login" | "пользователь" | "логин" => "username",
        "профессия" => "profession",
        "работа" => "job",
        "описание" => "description",
        _ => return trimmed.to_string(),
    };
    canonical.to_string()
}

/// Tier membership for a canonical column name.
pub fn tier_for(canonical: &str) -> Tier {
    match canonical {
        "password" | "email" | "phone_number" | "credit_card" | "cvv" | "address"
        | "bank_account" => Tier::Critical,
        "birth_date" | "work_address" | "city" | "name" | "zip" | "postal_code"
        | "username" | "last_name" => Tier::Medium,
        _ => Tier::Low,
    }
}

/// Matched columns of one dataset, bucketed by sensitivity.
///
/// Lists are de-duplicated and keep first-seen order.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TierBuckets {
    pub critical: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
}

/// Canonicalizes and buckets a sequence of raw column names.
pub fn classify_columns<'a>(columns: impl IntoIterator<Item = &'a str>) -> TierBuckets {
    let mut buckets = TierBuckets::default();
    for raw in columns {
        let canonical = canonical_column(raw);
        let bucket = match tier_for(&canonical) {
            Tier::Critical => &mut buckets.critical,
            Tier::Medium => &mut buckets.medium,
            Tier::Low => &mut buckets.low,
        };
        if !bucket.contains(&canonical) {
            bucket.push(canonical);
        }
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn russian_and_english_spellings_merge() {
        assert_eq!(canonical_column("почта"), "email");
        assert_eq!(canonical_column("Email"), "email");
        assert_eq!(canonical_column("Телефон"), "phone_number");
        assert_eq!(canonical_column("phone number"), "phone_number");
        assert_eq!(canonical_column("number"), "phone_number");
    }

    #[test]
    fn unrecognized_passes_through_trimmed() {
        assert_eq!(canonical_column("  foo_bar "), "foo_bar");
    }

    #[test]
    fn tier_membership() {
        assert_eq!(tier_for("phone_number"), Tier::Critical);
        assert_eq!(tier_for("city"), Tier::Medium);
        assert_eq!(tier_for("foo_bar"), Tier::Low);
    }

    #[test]
    fn classify_scenario() {
        let buckets = classify_columns(["Телефон", "Город", "foo_bar", "почта", "email"]);
        assert_eq!(buckets.critical, vec!["phone_number", "email"]);
        assert_eq!(buckets.medium, vec!["city"]);
        assert_eq!(buckets.low, vec!["foo_bar"]);
    }

    #[test]
    fn first_seen_order_is_stable() {
        let buckets = classify_columns(["пароль", "email", "password", "cvv"]);
        assert_eq!(buckets.critical, vec!["password", "email", "cvv"]);
    }
}
