use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use outpost_flow::{
    Answers, FlowError, FlowExecutor, FlowSession, FlowTransport, Operation, SessionConfig,
    SessionError, MAX_DEPTH,
};
use outpost_protocol::{ChallengeType, StageKind};
use pretty_assertions::assert_eq;
use serde_json::json;

const IDENTIFICATION: &str = include_str!("fixtures/identification.json");
const PASSWORD: &str = include_str!("fixtures/password.json");
const PASSWORD_INVALID: &str = include_str!("fixtures/password_invalid.json");
const AUTHENTICATOR_VALIDATE: &str = include_str!("fixtures/authenticator_validate.json");
const ACCESS_DENIED: &str = include_str!("fixtures/access_denied.json");
const REDIRECT: &str = include_str!("fixtures/redirect.json");

const FLOW: &str = "default-authentication-flow";
const EXECUTOR_PATH: &str = "/api/v3/flows/executor/default-authentication-flow/";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("outpost_flow=debug")
        .with_test_writer()
        .try_init();
}

fn executor(server: &ServerGuard) -> anyhow::Result<FlowExecutor> {
    let executor = FlowExecutor::new(FLOW, &SessionConfig::new(server.url()))?.with_answers(
        Answers::new()
            .with(StageKind::Identification, "alice")
            .with(StageKind::Password, "hunter2"),
    );
    Ok(executor)
}

#[tokio::test]
async fn login_follows_cookies_and_query_state() -> anyhow::Result<()> {
    init_tracing();
    let mut server = Server::new_async().await;
    let query = Matcher::UrlEncoded(
        "query".into(),
        "goauthentik.io%2Foutpost%2Fldap=true".into(),
    );

    let get_identification = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(query.clone())
        .match_header("cookie", Matcher::Missing)
        .match_header("user-agent", Matcher::Regex("^goauthentik.io/outpost/".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "authentik_session=s1; Path=/; HttpOnly")
        .with_body(IDENTIFICATION)
        .expect(1)
        .create_async()
        .await;
    let solve_identification = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(query.clone())
        .match_header("cookie", Matcher::Regex("authentik_session=s1".into()))
        .match_body(Matcher::Json(json!({
            "component": "ak-stage-identification",
            "uid_field": "alice"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(PASSWORD)
        .expect(1)
        .create_async()
        .await;
    let get_password = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(query.clone())
        .match_header("cookie", Matcher::Regex("authentik_session=s1".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(PASSWORD)
        .expect(1)
        .create_async()
        .await;
    let solve_password = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(query)
        .match_header("cookie", Matcher::Regex("authentik_session=s1".into()))
        .match_body(Matcher::Json(json!({
            "component": "ak-stage-password",
            "password": "hunter2"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(REDIRECT)
        .expect(1)
        .create_async()
        .await;

    let mut executor = executor(&server)?;
    executor.add_query_param("goauthentik.io/outpost/ldap", "true");
    let completion = executor.execute().await?;

    assert_eq!(completion.exchanges, 2);
    assert_eq!(completion.redirect_to.as_deref(), Some("/if/user/"));
    get_identification.assert_async().await;
    solve_identification.assert_async().await;
    get_password.assert_async().await;
    solve_password.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn non_converging_flow_stops_after_ten_submissions() -> anyhow::Result<()> {
    init_tracing();
    let mut server = Server::new_async().await;
    let get = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(IDENTIFICATION)
        .expect(MAX_DEPTH as usize)
        .create_async()
        .await;
    let solve = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(IDENTIFICATION)
        .expect(MAX_DEPTH as usize)
        .create_async()
        .await;

    let result = executor(&server)?.execute().await;

    assert!(matches!(result, Err(FlowError::DepthExceeded { depth: 10 })));
    get.assert_async().await;
    solve.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn redirect_with_error_status_succeeds() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(PASSWORD)
        .create_async()
        .await;
    let _mock = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(REDIRECT)
        .create_async()
        .await;

    let completion = executor(&server)?.execute().await?;
    assert_eq!(completion.exchanges, 1);
    Ok(())
}

#[tokio::test]
async fn error_status_without_redirect_fails_the_exchange() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(PASSWORD)
        .create_async()
        .await;
    let _mock = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(PASSWORD_INVALID)
        .create_async()
        .await;

    match executor(&server)?.execute().await {
        Err(FlowError::Exchange { operation, source }) => {
            assert_eq!(operation, Operation::SubmitChallenge);
            assert!(matches!(source, SessionError::Status(400, _)));
        }
        other => panic!("expected exchange error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn rejected_password_is_a_validation_error() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(PASSWORD)
        .create_async()
        .await;
    let _mock = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(PASSWORD_INVALID)
        .create_async()
        .await;

    match executor(&server)?.execute().await {
        Err(FlowError::Validation { field, message }) => {
            assert_eq!(field, "password");
            assert_eq!(message, "Invalid password");
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn access_denied_after_submit_makes_no_further_calls() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let get = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(IDENTIFICATION)
        .expect(1)
        .create_async()
        .await;
    let solve = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(ACCESS_DENIED)
        .expect(1)
        .create_async()
        .await;

    match executor(&server)?.execute().await {
        Err(FlowError::AccessDenied { message }) => {
            assert_eq!(message.as_deref(), Some("Policy denied access"))
        }
        other => panic!("expected access denied, got {:?}", other),
    }
    get.assert_async().await;
    solve.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn access_denied_on_fetch_with_error_status() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let get = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(403)
        .with_header("content-type", "application/json")
        .with_body(ACCESS_DENIED)
        .expect(1)
        .create_async()
        .await;
    let solve = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    match executor(&server)?.execute().await {
        Err(FlowError::AccessDenied { message }) => {
            assert_eq!(message.as_deref(), Some("Policy denied access"))
        }
        other => panic!("expected access denied, got {:?}", other),
    }
    get.assert_async().await;
    solve.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn duo_device_is_selected() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(AUTHENTICATOR_VALIDATE)
        .create_async()
        .await;
    let solve = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .match_body(Matcher::Json(json!({
            "component": "ak-stage-authenticator-validate",
            "duo": 17
        })))
        .with_status(200)
        .with_body(REDIRECT)
        .expect(1)
        .create_async()
        .await;

    executor(&server)?.execute().await?;
    solve.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn unsupported_challenge_is_never_submitted() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"type": "native", "component": "ak-stage-consent", "permissions": []}"#)
        .create_async()
        .await;
    let solve = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    match executor(&server)?.execute().await {
        Err(FlowError::UnsupportedChallenge { component, .. }) => {
            assert_eq!(component, "ak-stage-consent")
        }
        other => panic!("expected unsupported challenge, got {:?}", other),
    }
    solve.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn server_error_on_fetch_is_an_exchange_error() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("Internal Server Error")
        .create_async()
        .await;

    match executor(&server)?.execute().await {
        Err(FlowError::Exchange { operation, source }) => {
            assert_eq!(operation, Operation::GetChallenge);
            assert!(matches!(source, SessionError::Status(500, _)));
        }
        other => panic!("expected exchange error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn garbage_body_is_a_decoding_error() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    match executor(&server)?.execute().await {
        Err(FlowError::Exchange { source, .. }) => {
            assert!(matches!(source, SessionError::Json(_)))
        }
        other => panic!("expected exchange error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn check_access_not_passing_returns_false() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let check = server
        .mock("GET", "/api/v3/core/applications/billing/check_access/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"passing": false, "messages": ["User is not a member of group billing"]}"#)
        .expect(1)
        .create_async()
        .await;

    let granted = executor(&server)?.check_application_access("billing").await?;

    assert!(!granted);
    check.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn check_access_passing_returns_true() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v3/core/applications/billing/check_access/")
        .with_status(200)
        .with_body(r#"{"passing": true, "messages": []}"#)
        .create_async()
        .await;

    assert!(executor(&server)?.check_application_access("billing").await?);
    Ok(())
}

#[tokio::test]
async fn check_access_unknown_application_is_an_error() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v3/core/applications/missing/check_access/")
        .with_status(404)
        .with_body(r#"{"detail": "Not found."}"#)
        .create_async()
        .await;

    match executor(&server)?.check_application_access("missing").await {
        Err(FlowError::Exchange { operation, source }) => {
            assert_eq!(operation, Operation::CheckAccess);
            assert!(matches!(source, SessionError::Status(404, _)));
        }
        other => panic!("expected exchange error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn sessions_do_not_share_cookies() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let fresh = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .match_header("cookie", Matcher::Missing)
        .with_status(200)
        .with_header("set-cookie", "authentik_session=first; Path=/")
        .with_body(IDENTIFICATION)
        .expect(2)
        .create_async()
        .await;
    let resumed = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .match_header("cookie", Matcher::Regex("authentik_session=first".into()))
        .with_status(200)
        .with_body(PASSWORD)
        .expect(1)
        .create_async()
        .await;

    let config = SessionConfig::new(server.url());
    let first = FlowSession::new(&config)?;
    let second = FlowSession::new(&config)?;

    let a = first.get_challenge(FLOW, "").await?;
    let b = second.get_challenge(FLOW, "").await?;
    let c = first.get_challenge(FLOW, "").await?;

    assert_eq!(a.challenge.component(), StageKind::Identification);
    assert_eq!(b.challenge.component(), StageKind::Identification);
    assert_eq!(c.challenge.component(), StageKind::Password);
    assert_eq!(c.challenge.challenge_type, ChallengeType::Native);
    fresh.assert_async().await;
    resumed.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_runs_complete_independently() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let get = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(IDENTIFICATION)
        .expect(3)
        .create_async()
        .await;
    let solve = server
        .mock("POST", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(REDIRECT)
        .expect(3)
        .create_async()
        .await;

    let mut executors = Vec::new();
    for _ in 0..3 {
        executors.push(executor(&server)?);
    }
    let completions =
        futures::future::try_join_all(executors.iter_mut().map(|e| e.execute())).await?;

    assert_eq!(completions.len(), 3);
    assert!(completions.iter().all(|c| c.exchanges == 1));
    get.assert_async().await;
    solve.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn caller_timeout_cancels_the_run() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", EXECUTOR_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_secs(2));
            w.write_all(IDENTIFICATION.as_bytes())
        })
        .create_async()
        .await;

    let mut executor = executor(&server)?;
    let result = tokio::time::timeout(Duration::from_millis(200), executor.execute()).await;

    assert!(result.is_err());
    Ok(())
}
