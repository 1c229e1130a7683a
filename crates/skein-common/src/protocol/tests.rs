//! Tests for the protocol module
//!
//! These tests cover request construction, invoke-type parsing, response
//! conversion and retry classification of errors.

#[cfg(test)]
mod tests {
    use super::super::*;
    use serde_json::json;

    #[test]
    fn test_request_creation() {
        let req = Request::new("demo.EchoService", "echo", json!(["hi"]));
        assert_eq!(req.service, "demo.EchoService");
        assert_eq!(req.method, "echo");
        assert_eq!(req.id, 0);
        assert!(req.timeout_ms.is_none());
        assert!(req.invoke_type.is_none());
        assert_eq!(req.method_key(), "demo.EchoService.echo");
    }

    #[test]
    fn test_request_builders() {
        let req = Request::new("svc", "m", json!({}))
            .with_timeout(5000)
            .with_invoke_type(InvokeType::Future)
            .with_hash_key("user-7");
        assert_eq!(req.timeout_ms, Some(5000));
        assert_eq!(req.invoke_type, Some(InvokeType::Future));
        assert_eq!(req.hash_key.as_deref(), Some("user-7"));
    }

    #[test]
    fn test_optional_fields_are_omitted_on_the_wire() {
        let req = Request::new("svc", "m", json!(null));
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("timeout_ms").is_none());
        assert!(value.get("invoke_type").is_none());

        let decoded: Request = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_invoke_type_parsing() {
        assert_eq!("sync".parse::<InvokeType>().unwrap(), InvokeType::Sync);
        assert_eq!("OneWay".parse::<InvokeType>().unwrap(), InvokeType::OneWay);
        assert_eq!("callback".parse::<InvokeType>().unwrap(), InvokeType::Callback);
        assert_eq!("future".parse::<InvokeType>().unwrap(), InvokeType::Future);

        let err = "streaming".parse::<InvokeType>().unwrap_err();
        assert!(matches!(err, SkeinError::Config(_)));
    }

    #[test]
    fn test_invoke_type_display_matches_parse() {
        for t in [
            InvokeType::Sync,
            InvokeType::OneWay,
            InvokeType::Callback,
            InvokeType::Future,
        ] {
            assert_eq!(t.to_string().parse::<InvokeType>().unwrap(), t);
        }
    }

    #[test]
    fn test_response_success() {
        let resp = Response::success(123, json!({"result": "ok"}));
        assert!(resp.success);
        assert_eq!(resp.code, ResponseCode::Success);
        assert_eq!(resp.into_result().unwrap(), json!({"result": "ok"}));
    }

    #[test]
    fn test_response_error_becomes_application_error() {
        let resp = Response::error(456, "something failed");
        assert!(!resp.success);
        assert_eq!(resp.code, ResponseCode::Application);
        match resp.into_result() {
            Err(SkeinError::Application(msg)) => assert_eq!(msg, "something failed"),
            other => panic!("expected application error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_response_yields_null() {
        let resp = Response::empty(9);
        assert!(resp.success);
        assert_eq!(resp.into_result().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_response_code_defaults_when_missing() {
        let resp: Response =
            serde_json::from_value(json!({"id": 1, "result": 5, "error": null, "success": true}))
                .unwrap();
        assert_eq!(resp.code, ResponseCode::Success);
    }

    #[test]
    fn test_error_retry_classification() {
        assert!(SkeinError::ServerBusy("queue full".into()).is_retriable());
        assert!(SkeinError::ClientTimeout(3000).is_retriable());
        assert!(!SkeinError::Application("boom".into()).is_retriable());
        assert!(!SkeinError::Connection("reset".into()).is_retriable());
        assert!(!SkeinError::Routing("none".into()).is_retriable());
    }

    #[test]
    fn test_invocation_wrapper_keeps_classification() {
        let wrapped = SkeinError::invocation(
            "svc",
            "m",
            "127.0.0.1:9000",
            SkeinError::ClientTimeout(100),
        );
        assert!(wrapped.is_retriable());
        assert!(matches!(wrapped.root(), SkeinError::ClientTimeout(100)));
        assert!(wrapped.to_string().contains("127.0.0.1:9000"));

        let fatal = SkeinError::invocation("svc", "m", "p", SkeinError::Connection("x".into()));
        assert!(!fatal.is_retriable());
        assert!(fatal.is_connection_failure());
    }
}
