use std::time::Duration;

use axum::{Json, extract::State};
use serde::Serialize;
use tracing::debug;

use crate::command::{self, strip_ansi};
use crate::config::{Probe, Settings};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    running: bool,
    status: &'static str,
}

impl StatusReport {
    fn new(running: bool) -> Self {
        Self {
            running,
            status: if running { "running" } else { "stopped" },
        }
    }
}

pub async fn read_status(State(state): State<super::AppState>) -> Json<StatusReport> {
    Json(StatusReport::new(probe(&state.settings).await))
}

/// Never fails: anything short of a clean positive answer counts as stopped.
async fn probe(settings: &Settings) -> bool {
    let limit = Some(Duration::from_secs(settings.status.timeout_seconds));
    match settings.status.probe {
        Probe::Control => {
            match command::run(&settings.control.command, &["-status"], limit).await {
                Ok(out) if out.success() => reports_running(
                    &out.combined(),
                    &settings.status.running_phrase,
                    &settings.status.stopped_phrase,
                ),
                Ok(out) => {
                    debug!(code = out.code, "status report exited non-zero");
                    false
                }
                Err(err) => {
                    debug!(error = %err, "status report unavailable");
                    false
                }
            }
        }
        Probe::Process => match command::run(&settings.status.process_command, &[], limit).await {
            Ok(out) => out.success(),
            Err(err) => {
                debug!(error = %err, "process probe unavailable");
                false
            }
        },
    }
}

/// The positive phrase is usually a substring of the negative one
/// ("запущен" / "не запущен"), so the negative phrase wins.
fn reports_running(report: &str, running: &str, stopped: &str) -> bool {
    let report = strip_ansi(report).to_lowercase();
    let stopped = stopped.to_lowercase();
    if !stopped.is_empty() && report.contains(&stopped) {
        return false;
    }
    report.contains(&running.to_lowercase())
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::server::tests::{call, fake_xkeen, test_settings};
    use crate::server::{AppState, router};

    const URI: &str = "/cgi-bin/status";

    #[test]
    fn phrase_matching_ignores_colour_and_negation() {
        let (yes, no) = ("запущен", "не запущен");
        assert!(reports_running("Прокси-клиент \x1b[32mзапущен\x1b[0m", yes, no));
        assert!(!reports_running("Прокси-клиент \x1b[31mне запущен\x1b[0m", yes, no));
        assert!(!reports_running("", yes, no));
        assert!(reports_running("xray is Running", "running", "not running"));
        assert!(!reports_running("xray is NOT running", "running", "not running"));
    }

    #[tokio::test]
    async fn running_report() {
        let dir = tempfile::tempdir().unwrap();
        fake_xkeen(
            dir.path(),
            "[ \"$1\" = -status ] || exit 2\nprintf '\\033[32mПрокси-клиент запущен\\033[0m\\n'\n",
        );
        let app = router(AppState::new(test_settings(dir.path())));

        let (status, _, body) = call(app, Method::GET, URI, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "running": true, "status": "running" }));
    }

    #[tokio::test]
    async fn stopped_report() {
        let dir = tempfile::tempdir().unwrap();
        fake_xkeen(dir.path(), "echo 'Прокси-клиент не запущен'\n");
        let app = router(AppState::new(test_settings(dir.path())));

        let (_, _, body) = call(app, Method::GET, URI, "").await;
        assert_eq!(body, json!({ "running": false, "status": "stopped" }));
    }

    #[tokio::test]
    async fn probe_failures_mean_stopped() {
        let dir = tempfile::tempdir().unwrap();

        let mut missing = test_settings(dir.path());
        missing.control.command = vec!["/nonexistent/xkeen".to_string()];
        assert!(!probe(&missing).await);

        fake_xkeen(dir.path(), "echo 'Прокси-клиент запущен'\nexit 1\n");
        assert!(!probe(&test_settings(dir.path())).await);

        let mut hung = test_settings(dir.path());
        fake_xkeen(dir.path(), "exec sleep 10\n");
        hung.status.timeout_seconds = 1;
        assert!(!probe(&hung).await);
    }

    #[tokio::test]
    async fn process_probe_uses_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.status.probe = Probe::Process;

        settings.status.process_command = vec!["true".to_string()];
        assert!(probe(&settings).await);

        settings.status.process_command = vec!["false".to_string()];
        assert!(!probe(&settings).await);
    }
}
