//! Tests for error types

#[cfg(test)]
mod tests {
    use super::super::error::*;

    #[test]
    fn test_insufficient_data_message_names_context() {
        let err = AnalyticsError::insufficient("MACD(12,26,9)", 35, 20);
        let msg = err.to_string();
        assert!(msg.contains("MACD(12,26,9)"));
        assert!(msg.contains("35"));
        assert!(msg.contains("20"));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(AnalyticsError::insufficient("risk", 2, 1).is_client_error());
        assert!(AnalyticsError::InvalidParameter("period".into()).is_client_error());
        assert!(AnalyticsError::MissingInput("regime").is_client_error());

        assert!(!AnalyticsError::convergence("GMM", "singular").is_client_error());
        assert!(!AnalyticsError::Timeout { secs: 5 }.is_client_error());
        assert!(!AnalyticsError::upstream("funding", "http 503").is_client_error());
    }

    #[test]
    fn test_convergence_message() {
        let err = AnalyticsError::convergence("HMM(diagonal)", "no convergence after 300 iterations");
        assert_eq!(
            err.to_string(),
            "HMM(diagonal) fit failed to converge: no convergence after 300 iterations"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: AnalyticsError = parse.unwrap_err().into();
        assert!(matches!(err, AnalyticsError::Serialization(_)));
    }
}
