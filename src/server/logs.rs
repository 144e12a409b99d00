use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Deserialize;
use tokio::fs;
use tracing::warn;

use crate::command;

use super::{ApiError, AppState, Data, Outcome};

const DEFAULT_LOG: &str = "error.log";
const FORBIDDEN: &str = "Доступ к этому файлу запрещен";

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    file: Option<String>,
}

/// Tail of a whitelisted log. Unknown names never touch the filesystem;
/// a blank `file` means the default log.
pub async fn read_logs(
    State(state): State<AppState>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> Result<Json<Outcome<Data>>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let name = query
        .file
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG.to_string());
    Ok(Json(tail_log(&state, &name).await))
}

async fn tail_log(state: &AppState, name: &str) -> Outcome<Data> {
    let settings = &state.settings.logs;

    let Some(path) = settings.files.get(name) else {
        warn!(file = %name, "log outside whitelist requested");
        return Outcome::failed(FORBIDDEN);
    };

    match fs::try_exists(path).await {
        Ok(true) => {}
        Ok(false) => {
            return Outcome::ok(Data {
                data: format!("Лог файл '{name}' не найден"),
            });
        }
        Err(err) => return Outcome::failed(err.to_string()),
    }

    let lines = settings.lines.to_string();
    let path_arg = path.to_string_lossy();
    let limit = Duration::from_secs(settings.timeout_seconds);
    match command::run(&settings.tail_command, &["-n", lines.as_str(), &*path_arg], Some(limit)).await {
        Ok(out) if out.success() => Outcome::ok(Data { data: out.stdout }),
        Ok(out) => {
            warn!(file = %name, code = out.code, "tail failed");
            Outcome::failed(out.stderr)
        }
        Err(err) => {
            warn!(file = %name, error = %err, "tail failed to run");
            Outcome::failed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write;

    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::server::tests::{call, test_settings};
    use crate::server::{AppState, router};

    #[tokio::test]
    async fn defaults_to_error_log_and_keeps_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut text = String::new();
        for i in 1..=150 {
            writeln!(text, "line {i}").unwrap();
        }
        std::fs::write(dir.path().join("error.log"), &text).unwrap();
        let app = router(AppState::new(test_settings(dir.path())));

        let (status, _, body) = call(app, Method::GET, "/cgi-bin/logs", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let data = body["data"].as_str().unwrap();
        assert_eq!(data.lines().count(), 100);
        assert_eq!(data.lines().next(), Some("line 51"));
        assert_eq!(data.lines().last(), Some("line 150"));
    }

    #[tokio::test]
    async fn reads_named_log() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("access.log"), "GET /\n").unwrap();
        let app = router(AppState::new(test_settings(dir.path())));

        let (_, _, body) = call(app, Method::GET, "/cgi-bin/logs?file=access.log", "").await;
        assert_eq!(body, json!({ "success": true, "data": "GET /\n" }));
    }

    #[tokio::test]
    async fn missing_log_is_a_friendly_success() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(AppState::new(test_settings(dir.path())));

        let (status, _, body) = call(app, Method::GET, "/cgi-bin/logs?file=access.log", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "success": true, "data": "Лог файл 'access.log' не найден" })
        );
    }

    #[tokio::test]
    async fn names_outside_whitelist_are_denied() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        // Would fail loudly if the handler ever ran it.
        settings.logs.tail_command = vec!["/nonexistent/tail".to_string()];
        let app = router(AppState::new(settings));

        for uri in [
            "/cgi-bin/logs?file=../../etc/passwd",
            "/cgi-bin/logs?file=%2Fetc%2Fshadow",
            "/cgi-bin/logs?file=syslog",
        ] {
            let (status, _, body) = call(app.clone(), Method::GET, uri, "").await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(
                body,
                json!({ "success": false, "error": "Доступ к этому файлу запрещен" })
            );
        }
    }

    #[tokio::test]
    async fn blank_name_means_default_log() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("error.log"), "boom\n").unwrap();
        let app = router(AppState::new(test_settings(dir.path())));

        for uri in ["/cgi-bin/logs?file=", "/cgi-bin/logs?other=1"] {
            let (status, _, body) = call(app.clone(), Method::GET, uri, "").await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body, json!({ "success": true, "data": "boom\n" }));
        }
    }

    #[tokio::test]
    async fn repeated_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("error.log"), "boom\n").unwrap();
        let app = router(AppState::new(test_settings(dir.path())));

        let (status, _, body) = call(
            app,
            Method::GET,
            "/cgi-bin/logs?file=access.log&file=error.log",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn tail_failure_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("error.log"), "x\n").unwrap();
        let mut settings = test_settings(dir.path());
        settings.logs.tail_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf 'tail: cannot open' >&2; exit 1".to_string(),
        ];
        let app = router(AppState::new(settings));

        let (_, _, body) = call(app, Method::GET, "/cgi-bin/logs", "").await;
        assert_eq!(body, json!({ "success": false, "error": "tail: cannot open" }));
    }
}
