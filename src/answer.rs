use serde_json::Value;

/// Canonical comparison form of an answer. Strings lose all whitespace and
/// are lower-cased; other values use their canonical text. `null` has no
/// canonical form.
pub fn normalize(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(normalize_text(s)),
        Value::Number(n) => Some(canonical_number(n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

pub fn normalize_text(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

// Integral floats print without a fraction so 42.0 and 42 agree.
fn canonical_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
            format!("{}", f as i64)
        }
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// True when both answers normalize to the same text. A missing answer on
/// either side never matches.
pub fn check_answer(given: &Value, expected: &Value) -> bool {
    match (normalize(given), normalize(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod normalize_tests {
        use super::*;

        #[test]
        fn strips_whitespace_and_lowercases() {
            let cases = [
                (" 42 ", "42"),
                ("Hello World", "helloworld"),
                ("  A  B  C  ", "abc"),
                ("123 456", "123456"),
                ("tab\tand\nnewline", "tabandnewline"),
                ("", ""),
                ("  ", ""),
            ];
            for (input, expected) in cases {
                assert_eq!(normalize(&json!(input)).as_deref(), Some(expected), "input {input:?}");
            }
        }

        #[test]
        fn numbers_use_canonical_text() {
            assert_eq!(normalize(&json!(42)).as_deref(), Some("42"));
            assert_eq!(normalize(&json!(42.0)).as_deref(), Some("42"));
            assert_eq!(normalize(&json!(-7)).as_deref(), Some("-7"));
            assert_eq!(normalize(&json!(2.5)).as_deref(), Some("2.5"));
        }

        #[test]
        fn null_has_no_form() {
            assert_eq!(normalize(&Value::Null), None);
        }

        #[test]
        fn booleans() {
            assert_eq!(normalize(&json!(true)).as_deref(), Some("true"));
        }
    }

    mod check_tests {
        use super::*;

        #[test]
        fn exact_match() {
            assert!(check_answer(&json!("42"), &json!("42")));
            assert!(!check_answer(&json!("42"), &json!("43")));
            assert!(check_answer(&json!("yxwz"), &json!("yxwz")));
            assert!(check_answer(&json!("YXWZ"), &json!("yxwz")));
            assert!(check_answer(&json!("yx wz"), &json!("yxwz")));
        }

        #[test]
        fn edge_cases() {
            assert!(check_answer(&json!(""), &json!("")));
            assert!(check_answer(&json!(" "), &json!("")));
            assert!(!check_answer(&json!(""), &json!("42")));
            assert!(check_answer(&json!("a-b_c"), &json!("a-b_c")));
            assert!(check_answer(&json!("a b c"), &json!("abc")));
        }

        #[test]
        fn mixed_types() {
            assert!(check_answer(&json!(42), &json!("42")));
            assert!(check_answer(&json!("42"), &json!(42)));
            assert!(check_answer(&json!(42.0), &json!("42")));
            assert!(!check_answer(&Value::Null, &json!("42")));
            assert!(!check_answer(&json!("42"), &Value::Null));
        }

        #[test]
        fn booleans_match_their_text_in_any_case() {
            assert!(check_answer(&json!(true), &json!("true")));
            assert!(check_answer(&json!("True"), &json!(true)));
            assert!(!check_answer(&json!(false), &json!("true")));
        }

        #[test]
        fn null_never_matches_null() {
            assert!(!check_answer(&Value::Null, &Value::Null));
        }

        #[test]
        fn text_null_is_not_missing() {
            assert!(!check_answer(&json!("None"), &Value::Null));
            assert!(!check_answer(&json!("null"), &Value::Null));
        }
    }
}
