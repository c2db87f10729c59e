use std::error::Error;
use tinyurl::errors::{Result, TinyurlError};

#[cfg(test)]
mod error_creation_tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let error = TinyurlError::not_found("短链接不存在: abc");

        assert!(matches!(error, TinyurlError::NotFound(_)));
        assert!(error.to_string().contains("Resource Not Found"));
        assert!(error.to_string().contains("abc"));
    }

    #[test]
    fn test_conflict_error() {
        let error = TinyurlError::conflict("record already exists");

        assert!(matches!(error, TinyurlError::Conflict(_)));
        assert_eq!(error.code(), "E002");
        assert_eq!(error.message(), "record already exists");
    }

    #[test]
    fn test_worker_unavailable_error() {
        let error = TinyurlError::worker_unavailable("deletion worker is not running");

        assert!(matches!(error, TinyurlError::WorkerUnavailable(_)));
        assert_eq!(error.code(), "E011");
        assert_eq!(error.error_type(), "Worker Unavailable");
    }

    #[test]
    fn test_codes_are_unique() {
        let errors = [
            TinyurlError::not_found(""),
            TinyurlError::conflict(""),
            TinyurlError::credential_mismatch(""),
            TinyurlError::validation(""),
            TinyurlError::database_config(""),
            TinyurlError::database_connection(""),
            TinyurlError::database_operation(""),
            TinyurlError::file_operation(""),
            TinyurlError::serialization(""),
            TinyurlError::config(""),
            TinyurlError::worker_unavailable(""),
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}

#[cfg(test)]
mod error_classification_tests {
    use super::*;

    #[test]
    fn test_persistence_errors() {
        assert!(TinyurlError::database_connection("down").is_persistence());
        assert!(TinyurlError::database_operation("failed").is_persistence());
        assert!(TinyurlError::file_operation("disk full").is_persistence());
    }

    #[test]
    fn test_non_persistence_errors() {
        assert!(!TinyurlError::not_found("x").is_persistence());
        assert!(!TinyurlError::conflict("x").is_persistence());
        assert!(!TinyurlError::worker_unavailable("x").is_persistence());
    }
}

#[cfg(test)]
mod error_conversion_tests {
    use super::*;

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error: TinyurlError = io.into();
        assert!(matches!(error, TinyurlError::FileOperation(_)));
        assert!(error.message().contains("denied"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: TinyurlError = err.into();
        assert!(matches!(error, TinyurlError::Serialization(_)));
    }

    #[test]
    fn test_from_db_err() {
        let err = sea_orm::DbErr::Custom("boom".to_string());
        let error: TinyurlError = err.into();
        assert!(matches!(error, TinyurlError::DatabaseOperation(_)));
    }

    #[test]
    fn test_question_mark_propagation() {
        fn parse(input: &str) -> Result<serde_json::Value> {
            Ok(serde_json::from_str(input)?)
        }

        assert!(parse("{}").is_ok());
        assert!(matches!(parse("{"), Err(TinyurlError::Serialization(_))));
    }
}

#[cfg(test)]
mod error_format_tests {
    use super::*;

    #[test]
    fn test_format_simple() {
        let error = TinyurlError::validation("file keeper path is empty");
        assert_eq!(
            error.format_simple(),
            "Validation Error: file keeper path is empty"
        );
        assert_eq!(error.to_string(), error.format_simple());
    }

    #[test]
    fn test_format_colored_contains_code() {
        colored::control::set_override(false);
        let error = TinyurlError::database_config("bad url");
        let out = error.format_colored();
        assert!(out.contains("E005"));
        assert!(out.contains("bad url"));
    }

    #[test]
    fn test_is_std_error() {
        let error: Box<dyn Error> = Box::new(TinyurlError::config("missing"));
        assert!(error.source().is_none());
        assert!(error.to_string().contains("missing"));
    }
}
