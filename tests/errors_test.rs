#[cfg(test)]
mod error_tests {
    use crabview::errors::StreamError;
    use crabview::CameraId;
    use std::error::Error;
    use std::time::Duration;

    #[test]
    fn test_stream_error_transport() {
        let error = StreamError::Transport("connection refused".to_string());
        assert!(error.to_string().contains("Signaling transport error"));
        assert!(error.to_string().contains("connection refused"));
    }

    #[test]
    fn test_stream_error_negotiation() {
        let error = StreamError::Negotiation("bad answer".to_string());
        assert_eq!(error.to_string(), "Negotiation error: bad answer");
    }

    #[test]
    fn test_stream_error_timeout() {
        let error = StreamError::Timeout(Duration::from_secs(30));
        assert_eq!(error.to_string(), "Negotiation timed out after 30s");
    }

    #[test]
    fn test_stream_error_exhausted() {
        let error = StreamError::Exhausted {
            camera_id: CameraId(7),
            attempts: 3,
        };
        assert_eq!(error.to_string(), "Camera 7: giving up after 3 failed attempts");
        assert!(error.is_exhausted());
        assert!(!error.is_session_fatal());
    }

    #[test]
    fn test_stream_error_debug_format() {
        let error = StreamError::AlreadyActive(CameraId(4));
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("AlreadyActive"));
        assert!(debug_str.contains("4"));
    }

    #[test]
    fn test_stream_error_implements_error_trait() {
        let error = StreamError::Closed;
        let _error_trait: &dyn Error = &error;
        assert!(error.source().is_none());
    }

    #[test]
    fn test_session_fatal_variants() {
        let fatal = vec![
            StreamError::Transport("t".to_string()),
            StreamError::Negotiation("n".to_string()),
            StreamError::Timeout(Duration::from_millis(1)),
        ];
        for error in fatal {
            assert!(error.is_session_fatal(), "{:?} should be fatal", error);
            assert!(!error.is_exhausted());
        }

        let not_fatal = vec![
            StreamError::Closed,
            StreamError::AlreadyActive(CameraId(1)),
            StreamError::Config("c".to_string()),
        ];
        for error in not_fatal {
            assert!(!error.is_session_fatal(), "{:?} should not be fatal", error);
        }
    }

    #[test]
    fn test_errors_are_cloneable_for_shared_outcomes() {
        let error = StreamError::Negotiation("shared".to_string());
        let copy = error.clone();
        assert_eq!(error, copy);
    }

    #[test]
    fn test_anyhow_conversion() {
        fn fails() -> anyhow::Result<()> {
            let loaded: Result<(), StreamError> =
                Err(StreamError::Config("missing base_url".to_string()));
            loaded?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(err.to_string().contains("missing base_url"));
        assert!(err.downcast_ref::<StreamError>().is_some());
    }
}
