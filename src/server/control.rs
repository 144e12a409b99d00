use std::{str::FromStr, time::{Duration, Instant}};

use axum::{Json, extract::State};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tracing::{info, warn};

use crate::command::{self, CommandError};

use super::util::{ActionBody, RawBody};
use super::{ApiError, AppState, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    /// Flag passed to the control binary.
    pub fn flag(self) -> &'static str {
        match self {
            Self::Start => "-start",
            Self::Stop => "-stop",
            Self::Restart => "-restart",
        }
    }
}

impl FromStr for ControlAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            _ => Err(()),
        }
    }
}

#[derive(Serialize)]
pub struct ControlReport {
    output: String,
    returncode: i32,
}

pub async fn control(
    State(state): State<AppState>,
    body: RawBody,
) -> Result<Json<Outcome<ControlReport>>, ApiError> {
    let body = ActionBody::read(body)?;
    let action: ControlAction = body
        .action
        .parse()
        .map_err(|_| ApiError::bad_request("Unknown action"))?;

    let Ok(_running) = state.control_gate.try_lock() else {
        warn!(?action, "control action rejected, another one is running");
        return Ok(Json(Outcome::failed(
            "Another control action is in progress",
        )));
    };

    let settings = &state.settings.control;
    if let Some(log) = &settings.clear_log {
        // Truncate only; a missing log stays missing.
        if let Err(err) = OpenOptions::new().write(true).truncate(true).open(log).await {
            warn!(path = %log.display(), error = %err, "could not clear proxy log");
        }
    }

    let started = Instant::now();
    let limit = Duration::from_secs(settings.timeout_seconds);
    let outcome = match command::run(&settings.command, &[action.flag()], Some(limit)).await {
        Ok(out) => {
            info!(
                ?action,
                code = out.code,
                latency_ms = started.elapsed().as_millis(),
                "control action finished"
            );
            Outcome::reported(
                out.success(),
                ControlReport {
                    output: out.combined(),
                    returncode: out.code,
                },
            )
        }
        Err(CommandError::Timeout(_)) => {
            warn!(?action, timeout_secs = limit.as_secs(), "control action timed out");
            Outcome::failed("Command timeout")
        }
        Err(err) => {
            warn!(?action, error = %err, "control action failed to run");
            Outcome::failed(err.to_string())
        }
    };
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::server::tests::{call, fake_xkeen, test_settings};
    use crate::server::{AppState, router};

    const URI: &str = "/cgi-bin/control";

    #[test]
    fn actions_map_to_flags() {
        assert_eq!("start".parse::<ControlAction>().unwrap().flag(), "-start");
        assert_eq!("stop".parse::<ControlAction>().unwrap().flag(), "-stop");
        assert_eq!("restart".parse::<ControlAction>().unwrap().flag(), "-restart");
        assert!("status".parse::<ControlAction>().is_err());
    }

    #[tokio::test]
    async fn restart_reports_exit_and_output() {
        let dir = tempfile::tempdir().unwrap();
        fake_xkeen(dir.path(), "[ \"$1\" = -restart ] || exit 9\nprintf OK\n");
        let app = router(AppState::new(test_settings(dir.path())));

        let (status, _, body) = call(app, Method::POST, URI, "{\"action\":\"restart\"}").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "success": true, "output": "OK", "returncode": 0 })
        );
    }

    #[tokio::test]
    async fn failing_command_is_not_a_request_error() {
        let dir = tempfile::tempdir().unwrap();
        fake_xkeen(dir.path(), "echo out\necho boom >&2\nexit 1\n");
        let app = router(AppState::new(test_settings(dir.path())));

        let (status, _, body) = call(app, Method::POST, URI, "{\"action\":\"start\"}").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "success": false, "output": "out\nboom\n", "returncode": 1 })
        );
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fake_xkeen(dir.path(), "exec sleep 10\n");
        let mut settings = test_settings(dir.path());
        settings.control.timeout_seconds = 1;
        let app = router(AppState::new(settings));

        let started = std::time::Instant::now();
        let (status, _, body) = call(app, Method::POST, URI, "{\"action\":\"stop\"}").await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": false, "error": "Command timeout" }));
    }

    #[tokio::test]
    async fn error_log_is_cleared_before_action() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("error.log"), "old run\n").unwrap();
        fake_xkeen(dir.path(), "printf started\n");
        let app = router(AppState::new(test_settings(dir.path())));

        let (_, _, body) = call(app, Method::POST, URI, "{\"action\":\"start\"}").await;
        assert_eq!(body["success"], true);
        assert_eq!(std::fs::read_to_string(dir.path().join("error.log")).unwrap(), "");
    }

    #[tokio::test]
    async fn second_action_is_rejected_while_one_runs() {
        let dir = tempfile::tempdir().unwrap();
        fake_xkeen(dir.path(), "printf OK\n");
        let state = AppState::new(test_settings(dir.path()));
        let held = state.control_gate.clone();
        let _guard = held.lock().await;

        let (status, _, body) =
            call(router(state), Method::POST, URI, "{\"action\":\"restart\"}").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "success": false, "error": "Another control action is in progress" })
        );
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.control.command = vec![dir.path().join("no-such-xkeen").display().to_string()];
        let app = router(AppState::new(settings));

        let (status, _, body) = call(app, Method::POST, URI, "{\"action\":\"start\"}").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("no-such-xkeen"));
    }

    #[tokio::test]
    async fn request_errors() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(AppState::new(test_settings(dir.path())));

        let (status, _, body) = call(app.clone(), Method::GET, URI, "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], "Only POST allowed");

        let (status, _, body) = call(app.clone(), Method::POST, URI, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No data");

        let (status, _, body) =
            call(app.clone(), Method::POST, URI, "{\"action\":\"reboot\"}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown action");

        let (status, _, _) = call(app, Method::POST, URI, "not json").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
