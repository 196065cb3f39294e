//! Declarative request validation
//!
//! Request shapes derive `validator::Validate` and annotate fields with the
//! rules they require; failed validation is converted into a structured
//! `ValidationError` whose details carry a `{field: [rule, ...]}` map.
//!
//! ```rust
//! use serde::Deserialize;
//! use validator::Validate;
//!
//! #[derive(Deserialize, Validate)]
//! struct CreateUser {
//!     #[validate(length(min = 1, code = "required"))]
//!     name: String,
//!     #[validate(email(code = "email"))]
//!     email: String,
//! }
//! ```

use serde_json::{Map, Value};
use validator::{Validate, ValidationErrors};

use crate::error::{Error, Result};

/// Flatten validator errors into a field → rule-code list map
pub fn validation_details(errors: &ValidationErrors) -> Map<String, Value> {
    let mut details = Map::new();
    for (field, field_errors) in errors.field_errors() {
        let codes: Vec<Value> = field_errors
            .iter()
            .map(|err| Value::String(err.code.to_string()))
            .collect();
        details.insert(field.to_string(), Value::Array(codes));
    }
    details
}

/// Run declarative rules, mapping failure to a structured error
pub fn validate<T: Validate>(value: &T) -> Result<()> {
    value
        .validate()
        .map_err(|errors| Error::validation("validation failed", validation_details(&errors)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Validate)]
    struct CreateUser {
        #[validate(length(min = 1, code = "required"))]
        name: String,

        #[validate(email(code = "email"))]
        email: String,

        #[validate(range(min = 13, max = 130, code = "range"))]
        #[serde(default = "default_age")]
        age: u8,
    }

    fn default_age() -> u8 {
        30
    }

    #[test]
    fn valid_shape_passes() {
        let user = CreateUser {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            age: 30,
        };
        assert!(validate(&user).is_ok());
    }

    #[test]
    fn failures_list_rule_codes_per_field() {
        let user = CreateUser {
            name: "".into(),
            email: "bad".into(),
            age: 30,
        };
        let err = validate(&user).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        let details = err.details.unwrap();
        assert_eq!(details.get("name"), Some(&json!(["required"])));
        assert_eq!(details.get("email"), Some(&json!(["email"])));
        assert!(details.get("age").is_none());
    }

    #[test]
    fn numeric_bounds_are_enforced() {
        let user = CreateUser {
            name: "Bob".into(),
            email: "bob@example.com".into(),
            age: 7,
        };
        let err = validate(&user).unwrap_err();
        let details = err.details.unwrap();
        assert_eq!(details.get("age"), Some(&json!(["range"])));
    }
}
