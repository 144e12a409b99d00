use axum::{Json, extract::State};
use serde::Deserialize;
use tokio::fs;
use tracing::{info, warn};

use super::util::{ActionBody, RawBody};
use super::{ApiError, AppState, Data, Outcome};

#[derive(Deserialize)]
struct SaveArgs {
    data: String,
}

pub async fn read_config(State(state): State<AppState>) -> Json<Outcome<Data>> {
    let path = &state.settings.xray.config_file;
    match fs::read_to_string(path).await {
        Ok(data) => Json(Outcome::ok(Data { data })),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read config");
            Json(Outcome::failed(err.to_string()))
        }
    }
}

pub async fn write_config(
    State(state): State<AppState>,
    body: RawBody,
) -> Result<Json<Outcome>, ApiError> {
    let body = ActionBody::read(body)?;
    if body.action != "save" {
        return Err(ApiError::bad_request("Unknown action"));
    }
    let args: SaveArgs = body.args()?;

    let path = &state.settings.xray.config_file;
    match state.locks.write(path, &args.data).await {
        Ok(()) => {
            info!(path = %path.display(), bytes = args.data.len(), "config saved");
            Ok(Json(Outcome::done()))
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to save config");
            Ok(Json(Outcome::failed(err.to_string())))
        }
    }
}
