//! Neighborhood assessment request submitted by the web form.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{Result, ServerError};

const SUBJECT_PREFIX: &str = "New Assessment Request — ";

/// Fields that must hold something other than whitespace, in the order
/// they are reported.
pub const REQUIRED_FIELDS: [&str; 2] = ["neighborhood_name", "contact_value"];

/// Form payload. Missing keys decode as empty strings.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FormSubmission {
    #[validate(custom(function = "not_blank"))]
    pub neighborhood_name: String,
    pub zipcode: String,
    pub num_homes: String,
    pub num_businesses: String,
    /// `email` or `phone`, free text.
    pub contact_method: String,
    /// Email address or phone number.
    #[validate(custom(function = "not_blank"))]
    pub contact_value: String,
}

fn not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required")
            .with_message("Field must not be blank.".into()));
    }
    Ok(())
}

fn missing_fields(errors: &ValidationErrors) -> Vec<&'static str> {
    let errors = errors.field_errors();
    REQUIRED_FIELDS
        .into_iter()
        .filter(|field| errors.contains_key(*field))
        .collect()
}

impl FormSubmission {
    /// Decode and validate a raw request body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let submission: FormSubmission = serde_json::from_slice(body)?;
        submission
            .validate()
            .map_err(|errors| ServerError::MissingFields(missing_fields(&errors)))?;
        Ok(submission)
    }

    pub fn subject(&self) -> String {
        format!("{SUBJECT_PREFIX}{}", self.neighborhood_name)
    }

    /// Plain-text body, one labelled line per field.
    pub fn body(&self, site: &str) -> String {
        format!(
            "New assessment request received via {site}

Neighborhood/HOA Name : {}
Zipcode (primary)     : {}
Number of Homes       : {}
Number of Businesses  : {}
Contact Method        : {}
Contact               : {}
",
            self.neighborhood_name,
            self.zipcode,
            self.num_homes,
            self.num_businesses,
            self.contact_method,
            self.contact_value,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oak_hills() -> FormSubmission {
        FormSubmission {
            neighborhood_name: "Oak Hills".into(),
            zipcode: "94110".into(),
            num_homes: "42".into(),
            num_businesses: "3".into(),
            contact_method: "email".into(),
            contact_value: "a@b.com".into(),
        }
    }

    #[test]
    fn test_parse() {
        let body = br#"{"neighborhood_name":"Oak Hills","zipcode":"94110","num_homes":"42","num_businesses":"3","contact_method":"email","contact_value":"a@b.com"}"#;
        assert_eq!(FormSubmission::parse(body).unwrap(), oak_hills());
    }

    #[test]
    fn test_parse_defaults_and_unknown_keys() {
        let body =
            br#"{"neighborhood_name":"Elm Park","contact_value":"555-0100","website":"x"}"#;
        let submission = FormSubmission::parse(body).unwrap();

        assert_eq!(submission.neighborhood_name, "Elm Park");
        assert_eq!(submission.contact_value, "555-0100");
        assert!(submission.zipcode.is_empty());
        assert!(submission.contact_method.is_empty());
    }

    #[test]
    fn test_parse_malformed() {
        let bodies: [&[u8]; 4] = [b"", b"{", b"null", br#"{"num_homes":42}"#];
        for body in bodies {
            assert!(
                matches!(FormSubmission::parse(body), Err(ServerError::Body(_))),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_parse_is_strict() {
        let trailing =
            br#"{"neighborhood_name":"Oak Hills","contact_value":"a@b.com"} {}"#;
        assert!(matches!(FormSubmission::parse(trailing), Err(ServerError::Body(_))));
        assert!(matches!(FormSubmission::parse(b"null"), Err(ServerError::Body(_))));

        // Keys are matched exactly, other spellings are ignored.
        let body = br#"{"Neighborhood_Name":"Oak Hills","contact_value":"a@b.com"}"#;
        match FormSubmission::parse(body) {
            Err(ServerError::MissingFields(fields)) => {
                assert_eq!(fields, ["neighborhood_name"])
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_fields() {
        let cases: [(&[u8], Vec<&str>); 4] = [
            (b"{}", vec!["neighborhood_name", "contact_value"]),
            (
                br#"{"neighborhood_name":"  \t","contact_value":"a@b.com"}"#,
                vec!["neighborhood_name"],
            ),
            (
                br#"{"neighborhood_name":"Oak Hills","contact_value":"\n"}"#,
                vec!["contact_value"],
            ),
            (
                br#"{"neighborhood_name":"","contact_value":" ","zipcode":"94110"}"#,
                vec!["neighborhood_name", "contact_value"],
            ),
        ];

        for (body, expected) in cases {
            match FormSubmission::parse(body) {
                Err(ServerError::MissingFields(fields)) => assert_eq!(fields, expected),
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn test_subject() {
        assert_eq!(oak_hills().subject(), "New Assessment Request — Oak Hills");
    }

    #[test]
    fn test_body() {
        let body = oak_hills().body("sandbox.example.org");

        assert_eq!(
            body,
            "New assessment request received via sandbox.example.org\n\
             \n\
             Neighborhood/HOA Name : Oak Hills\n\
             Zipcode (primary)     : 94110\n\
             Number of Homes       : 42\n\
             Number of Businesses  : 3\n\
             Contact Method        : email\n\
             Contact               : a@b.com\n"
        );
    }

    #[test]
    fn test_body_keeps_values_untrimmed() {
        let submission = FormSubmission {
            neighborhood_name: " Oak Hills ".into(),
            contact_value: "a@b.com".into(),
            ..Default::default()
        };

        assert!(submission.body("x").contains("Neighborhood/HOA Name :  Oak Hills \n"));
        assert!(submission.body("x").contains("Zipcode (primary)     : \n"));
    }
}
