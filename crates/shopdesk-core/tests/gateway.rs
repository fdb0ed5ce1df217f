mod common;

use reqwest::{Method, StatusCode};
use serde_json::Value;

use common::harness;
use shopdesk_core::api::{ApiError, Resource};
use shopdesk_core::auth::{LogoutReason, SessionEvent};

#[tokio::test]
async fn test_retried_request_is_not_retried_again() {
    let h = harness().await;
    h.session.login("a@b.com", "pw", None).await.unwrap();

    let gateway = h.api.gateway();
    let request = gateway.request(Method::GET, "orders").build().unwrap();
    let response = gateway.send(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.fake.resource_hits(), 2);
    assert_eq!(h.fake.refreshes(), 1);
    assert_eq!(
        h.fake.seen_auth.lock().unwrap().as_slice(),
        &[Some("Bearer t1".to_string()), Some("Bearer t2".to_string())]
    );
    assert!(h.session.is_authenticated());
}

#[tokio::test]
async fn test_refresh_rejection_expires_session() {
    let h = harness().await;
    h.session.login("a@b.com", "pw", None).await.unwrap();
    h.fake.set_refresh_result(None);
    let mut events = h.session.subscribe();

    let result: Result<Value, ApiError> = h.api.list(Resource::Products).await;
    assert!(matches!(result, Err(ApiError::SessionExpired)));

    assert!(!h.session.is_authenticated());
    assert!(h.storage.is_empty());
    assert_eq!(h.fake.resource_hits(), 1);
    assert_eq!(h.fake.refreshes(), 1);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::LoggedOut {
            reason: LogoutReason::Expired
        }
    );
}

#[tokio::test]
async fn test_unauthorized_without_refresh_token_is_returned() {
    let h = harness().await;

    let gateway = h.api.gateway();
    let request = gateway.request(Method::GET, "products").build().unwrap();
    let response = gateway.send(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let result: Result<Value, ApiError> = h.api.list(Resource::Products).await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));

    assert_eq!(h.fake.refreshes(), 0);
    assert_eq!(h.fake.resource_hits(), 2);
    assert_eq!(h.fake.seen_auth.lock().unwrap()[0], None);
}

#[tokio::test]
async fn test_other_errors_are_not_retried() {
    let h = harness().await;
    h.session.login("a@b.com", "pw", None).await.unwrap();

    let result: Result<Value, ApiError> = h.api.list(Resource::Campaigns).await;
    assert!(matches!(result, Err(ApiError::ServerError(body)) if body == "boom"));
    assert_eq!(h.fake.resource_hits(), 1);
    assert_eq!(h.fake.refreshes(), 0);
}

#[tokio::test]
async fn test_valid_token_goes_straight_through() {
    let h = harness().await;
    h.fake.accept("t1");
    h.session.login("a@b.com", "pw", None).await.unwrap();

    let products: Value = h.api.list(Resource::Products).await.unwrap();
    assert_eq!(products.as_array().unwrap().len(), 1);
    assert_eq!(h.fake.resource_hits(), 1);
    assert_eq!(h.fake.refreshes(), 0);
}

#[tokio::test]
async fn test_concurrent_401s_trigger_one_refresh() {
    let h = harness().await;
    h.session.login("a@b.com", "pw", None).await.unwrap();
    h.fake.set_refresh_delay(std::time::Duration::from_millis(200));

    let calls = (0..4).map(|_| {
        let api = h.api.clone();
        async move { api.list::<Value>(Resource::Products).await }
    });
    for result in futures::future::join_all(calls).await {
        assert!(result.is_ok());
    }
    assert_eq!(h.fake.refreshes(), 1);
    assert_eq!(h.fake.resource_hits(), 8);
}
