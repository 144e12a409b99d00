use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::paths::is_plain_file_name;
use crate::store::{ConfigEntry, ConfigStore};

use super::util::{ActionBody, RawBody};
use super::{ApiError, AppState, Outcome};

#[derive(Serialize)]
pub struct Configs {
    configs: Vec<ConfigEntry>,
}

#[derive(Deserialize)]
struct SaveArgs {
    filename: String,
    content: String,
}

#[derive(Deserialize)]
struct DeleteArgs {
    filename: String,
}

pub async fn list_configs(State(state): State<AppState>) -> Json<Outcome<Configs>> {
    match state.store.list().await {
        Ok(configs) => Json(Outcome::ok(Configs { configs })),
        Err(err) => {
            warn!(error = %err, "failed to list configs");
            Json(Outcome::failed(err.to_string()))
        }
    }
}

/// POST and DELETE share one body format: `{action: "save" | "delete", filename, ...}`.
/// Names ending in `.lst` address routing lists when those are enabled.
pub async fn mutate_configs(
    State(state): State<AppState>,
    body: RawBody,
) -> Result<Json<Outcome>, ApiError> {
    let body = ActionBody::read(body)?;
    let outcome = match body.action.as_str() {
        "save" => {
            let args: SaveArgs = body.args()?;
            let filename = checked_filename(&state.store, &args.filename)?;
            match state.store.save(&filename, &args.content).await {
                Ok(path) => {
                    info!(path = %path.display(), bytes = args.content.len(), "config file saved");
                    Outcome::done()
                }
                Err(err) => {
                    warn!(filename = %filename, error = %err, "failed to save config file");
                    Outcome::failed(err.to_string())
                }
            }
        }
        "delete" => {
            let args: DeleteArgs = body.args()?;
            let filename = checked_filename(&state.store, &args.filename)?;
            match state.store.delete(&filename).await {
                Ok(true) => {
                    info!(filename = %filename, "config file deleted");
                    Outcome::done()
                }
                Ok(false) => Outcome::failed("File not found"),
                Err(err) => {
                    warn!(filename = %filename, error = %err, "failed to delete config file");
                    Outcome::failed(err.to_string())
                }
            }
        }
        _ => return Err(ApiError::bad_request("Unknown action")),
    };
    Ok(Json(outcome))
}

fn checked_filename(store: &ConfigStore, raw: &str) -> Result<String, ApiError> {
    let filename = store.stored_name(raw);
    if raw.is_empty() || !is_plain_file_name(&filename) {
        return Err(ApiError::bad_request("Invalid filename"));
    }
    Ok(filename)
}
