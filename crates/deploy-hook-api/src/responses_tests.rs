use super::*;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;

#[test]
fn test_optional_fields_are_omitted() {
    let json = serde_json::to_value(ResponseEnvelope::ignored("Event type issues ignored")).unwrap();

    assert_eq!(
        json,
        serde_json::json!({"status": "ignored", "message": "Event type issues ignored"})
    );
}

#[test]
fn test_timestamp_serializes_as_iso8601() {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
    let envelope = ResponseEnvelope::success("done").with_timestamp(Timestamp::from_datetime(at));

    let json = serde_json::to_value(envelope).unwrap();

    assert_eq!(json["status"], "success");
    assert_eq!(json["timestamp"], "2024-05-01T12:30:00.000000Z");
}

#[test]
fn test_healthy_has_version_and_no_message() {
    let json = serde_json::to_value(ResponseEnvelope::healthy("1.0.0")).unwrap();

    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], "1.0.0");
    assert!(json.get("message").is_none());
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_response_sets_content_headers() {
    let response = ResponseEnvelope::success("Webhook is active")
        .into_response_with_status(StatusCode::OK);

    let content_length: usize = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), content_length);
    assert_eq!(
        &body[..],
        br#"{"status":"success","message":"Webhook is active"}"#
    );
}
