mod common;

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::json;
use sg_auth::{LogoutReason, RefreshFailure, SessionError, SessionEvent, Tokens};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{bearer, jwt_expiring_in, next_logout, session_with};

async fn mount_refresh(server: &MockServer, refresh: &str, response: ResponseTemplate, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .and(body_json(json!({ "refresh": refresh })))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

async fn mount_projects(server: &MockServer, token: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path("/api/projects/"))
        .and(header("Authorization", bearer(token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(calls)
        .mount(server)
        .await;
}

async fn mount_unauthorized_fallback(server: &MockServer) {
    Mock::given(path("/api/projects/"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"code": "token_not_valid"})),
        )
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_expired_requests_share_one_refresh() {
    let server = MockServer::start().await;
    let fresh = jwt_expiring_in(600);

    mount_refresh(
        &server,
        "r1",
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access": fresh }))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;
    mount_projects(&server, &fresh, 6).await;
    mount_unauthorized_fallback(&server).await;

    let session = session_with(&server, Some(Tokens::new(jwt_expiring_in(-60), "r1"))).await;
    assert!(!session.is_access_token_valid());

    let requests: Vec<_> = (0..6)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move {
                let request = session.request(Method::GET, "projects/").unwrap();
                session.send(request).await
            })
        })
        .collect();

    for request in requests {
        assert_eq!(request.await.unwrap().unwrap().status(), StatusCode::OK);
    }
    assert_eq!(session.access_token(), Some(fresh));
    assert!(session.is_access_token_valid());
    assert_eq!(session.tokens().get().unwrap().refresh(), "r1");
}

#[tokio::test]
async fn test_reactive_refresh_replays_once() {
    let server = MockServer::start().await;
    let stale = jwt_expiring_in(600);
    let fresh = jwt_expiring_in(900);

    mount_refresh(
        &server,
        "r1",
        ResponseTemplate::new(200).set_body_json(json!({ "access": fresh, "refresh": "r2" })),
        1,
    )
    .await;
    mount_projects(&server, &fresh, 1).await;
    Mock::given(path("/api/projects/"))
        .and(header("Authorization", bearer(&stale).as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_with(&server, Some(Tokens::new(stale, "r1"))).await;

    let response = session
        .send(session.request(Method::GET, "projects/").unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Rotated refresh token is honored
    assert_eq!(session.tokens().get(), Some(Tokens::new(fresh, "r2")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    let stale = jwt_expiring_in(600);
    let fresh = jwt_expiring_in(900);

    mount_refresh(
        &server,
        "r1",
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access": fresh }))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;
    mount_projects(&server, &fresh, 4).await;
    mount_unauthorized_fallback(&server).await;

    let session = session_with(&server, Some(Tokens::new(stale, "r1"))).await;

    let requests: Vec<_> = (0..4)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .send(session.request(Method::GET, "projects/").unwrap())
                    .await
            })
        })
        .collect();

    for request in requests {
        assert_eq!(request.await.unwrap().unwrap().status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_replay_is_never_retried_twice() {
    let server = MockServer::start().await;
    let fresh = jwt_expiring_in(900);

    mount_refresh(
        &server,
        "r1",
        ResponseTemplate::new(200).set_body_json(json!({ "access": fresh })),
        1,
    )
    .await;
    Mock::given(path("/api/projects/"))
        .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
        .expect(2)
        .mount(&server)
        .await;

    let session = session_with(&server, Some(Tokens::new(jwt_expiring_in(600), "r1"))).await;

    let err = session
        .send(session.request(Method::GET, "projects/").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Unauthorized { ref body_snippet } if body_snippet == "nope"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refresh_failure_fails_every_queued_request() {
    let server = MockServer::start().await;

    mount_refresh(
        &server,
        "r-revoked",
        ResponseTemplate::new(401)
            .set_body_json(json!({"code": "token_not_valid"}))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;
    Mock::given(path("/api/projects/"))
        .and(header("Authorization", "Bearer never-issued"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    mount_unauthorized_fallback(&server).await;

    let session = session_with(
        &server,
        Some(Tokens::new(jwt_expiring_in(-60), "r-revoked")),
    )
    .await;
    let mut events = session.subscribe();

    let requests: Vec<_> = (0..5)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .send(session.request(Method::GET, "projects/").unwrap())
                    .await
            })
        })
        .collect();

    for request in requests {
        let err = request.await.unwrap().unwrap_err();
        assert!(err.is_auth_failure(), "unexpected error: {err:?}");
    }

    assert!(!session.is_authenticated());
    assert_eq!(
        next_logout(&mut events).await,
        SessionEvent::LoggedOut {
            reason: LogoutReason::RefreshFailed,
            redirect_to: "/login".to_string(),
        }
    );
}

#[tokio::test]
async fn test_reactive_refresh_failure_propagates_original_401() {
    let server = MockServer::start().await;

    mount_refresh(&server, "r1", ResponseTemplate::new(400), 1).await;
    Mock::given(path("/api/projects/"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired upstream"))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_with(&server, Some(Tokens::new(jwt_expiring_in(600), "r1"))).await;

    let err = session
        .send(session.request(Method::GET, "projects/").unwrap())
        .await
        .unwrap_err();
    assert!(
        matches!(err, SessionError::Unauthorized { ref body_snippet } if body_snippet == "expired upstream")
    );
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_401_without_session_logs_out() {
    let server = MockServer::start().await;
    mount_unauthorized_fallback(&server).await;
    Mock::given(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = session_with(&server, None).await;
    let mut events = session.subscribe();

    let err = session
        .send(session.request(Method::GET, "projects/").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Unauthorized { .. }));
    assert_eq!(
        next_logout(&mut events).await,
        SessionEvent::LoggedOut {
            reason: LogoutReason::Unauthorized,
            redirect_to: "/login".to_string(),
        }
    );
}

#[tokio::test]
async fn test_token_endpoint_401_skips_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = session_with(&server, Some(Tokens::new(jwt_expiring_in(-60), "r1"))).await;

    let request = session
        .request(Method::POST, "token/")
        .unwrap()
        .json(&json!({"username": "ana", "password": "x"}))
        .unwrap();
    let err = session.send(request).await.unwrap_err();

    assert!(matches!(err, SessionError::Unauthorized { .. }));
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_other_failures_pass_through() {
    let server = MockServer::start().await;
    let access = jwt_expiring_in(600);

    Mock::given(path("/api/projects/"))
        .and(header("Authorization", bearer(&access).as_str()))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = session_with(&server, Some(Tokens::new(access, "r1"))).await;

    let response = session
        .send(session.request(Method::GET, "projects/").unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().await.unwrap(), "maintenance");
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_credentials_stay_on_own_origin() {
    let own = MockServer::start().await;
    let foreign = MockServer::start().await;
    let access = jwt_expiring_in(600);

    Mock::given(path("/api/projects/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&own)
        .await;
    Mock::given(path("/api/projects/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&foreign)
        .await;

    let session = session_with(&own, Some(Tokens::new(access.clone(), "r1"))).await;

    let foreign_url = url::Url::parse(&format!("{}/api/projects/", foreign.uri())).unwrap();
    session
        .send(sg_auth::ApiRequest::get(foreign_url))
        .await
        .unwrap();
    session
        .send(session.request(Method::GET, "projects/").unwrap())
        .await
        .unwrap();

    let foreign_requests = foreign.received_requests().await.unwrap();
    assert_eq!(foreign_requests.len(), 1);
    assert!(foreign_requests[0].headers.get("authorization").is_none());

    let own_requests = own.received_requests().await.unwrap();
    assert_eq!(own_requests.len(), 1);
    assert_eq!(
        own_requests[0].headers.get("authorization").unwrap().to_str().unwrap(),
        bearer(&access)
    );
}

#[tokio::test]
async fn test_foreign_401_is_returned_untouched() {
    let own = MockServer::start().await;
    let foreign = MockServer::start().await;

    Mock::given(path("/files/report.pdf"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&foreign)
        .await;
    Mock::given(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&own)
        .await;

    let session = session_with(&own, Some(Tokens::new(jwt_expiring_in(600), "r1"))).await;

    let url = url::Url::parse(&format!("{}/files/report.pdf", foreign.uri())).unwrap();
    let response = session.send(sg_auth::ApiRequest::get(url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(session.is_authenticated());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logout_releases_requests_waiting_on_refresh() {
    let server = MockServer::start().await;

    mount_refresh(
        &server,
        "r1",
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access": jwt_expiring_in(600) }))
            .set_delay(Duration::from_millis(1500)),
        1,
    )
    .await;
    mount_unauthorized_fallback(&server).await;

    let session = session_with(&server, Some(Tokens::new(jwt_expiring_in(-60), "r1"))).await;

    let spawn_request = || {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .send(session.request(Method::GET, "projects/").unwrap())
                .await
        })
    };

    let leader = spawn_request();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !session.is_refreshing() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let followers: Vec<_> = (0..3).map(|_| spawn_request()).collect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.logout().await;

    for follower in followers {
        let err = follower.await.unwrap().unwrap_err();
        assert!(err.is_auth_failure(), "unexpected error: {err:?}");
    }
    let err = leader.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SessionError::Authentication(RefreshFailure::SessionEnded)
    ));

    // The refresh that landed after logout must not bring the session back
    assert!(!session.is_authenticated());
}
