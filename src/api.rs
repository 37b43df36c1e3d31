use std::convert::Infallible;

use http::StatusCode;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use warp::reply::Reply;
use warp::{Filter, Rejection};

use crate::allocation::{self, Entry};
use crate::db::TimesheetStore;
use crate::error::{ApiError, ErrorBody};

/// What every handler needs: the store and the single user everything is
/// filed under.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: TimesheetStore,
    pub user_id: String,
    pub strict_validation: bool,
}

impl AppState {
    pub fn new(store: TimesheetStore, user_id: impl Into<String>, strict_validation: bool) -> Self {
        AppState {
            store,
            user_id: user_id.into(),
            strict_validation,
        }
    }
}

/// Body of `POST /api/timeentries`. Both fields are optional here so a
/// missing one is answered with our own 400 instead of a parse rejection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub week_key: Option<String>,
    #[serde(default)]
    pub entries: Option<Vec<Entry>>,
}

#[derive(Serialize)]
struct Success {
    success: bool,
}

fn json_body_submission() -> impl Filter<Extract = (Submission,), Error = Rejection> + Clone {
    warp::body::content_length_limit(1024 * 64).and(warp::body::json())
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

// Filters
pub fn list_weeks(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "timeentries")
        .and(warp::get())
        .and(with_state(state))
        .and_then(list_weeks_handler)
}

pub fn get_week(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "timeentries" / String)
        .and(warp::get())
        .and(with_state(state))
        .and_then(get_week_handler)
}

pub fn post_week(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "timeentries")
        .and(warp::post())
        .and(json_body_submission())
        .and(with_state(state))
        .and_then(save_week_handler)
}

pub fn delete_week(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "timeentries" / String)
        .and(warp::delete())
        .and(with_state(state))
        .and_then(delete_week_handler)
}

/// All four routes with rejections turned into JSON error bodies.
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    list_weeks(state.clone())
        .or(get_week(state.clone()))
        .or(post_week(state.clone()))
        .or(delete_week(state))
        .recover(handle_rejection)
}

// Handlers
async fn list_weeks_handler(state: AppState) -> Result<warp::reply::Response, Infallible> {
    match state.store.get_all(&state.user_id).await {
        Ok(weeks) => {
            tracing::info!(user_id = %state.user_id, weeks = weeks.len(), "retrieved weeks");
            Ok(warp::reply::json(&weeks).into_response())
        }
        Err(err) => Ok(ApiError::from(err).into_response()),
    }
}

async fn get_week_handler(raw_key: String, state: AppState) -> Result<warp::reply::Response, Infallible> {
    let week_key = match decode_week_key(&raw_key) {
        Ok(key) => key,
        Err(err) => return Ok(err.into_response()),
    };

    match state.store.get_week(&state.user_id, &week_key).await {
        Ok(Some(record)) => Ok(warp::reply::json(&record).into_response()),
        Ok(None) => Ok(ApiError::NotFound.into_response()),
        Err(err) => Ok(ApiError::from(err).into_response()),
    }
}

async fn save_week_handler(submission: Submission, state: AppState) -> Result<warp::reply::Response, Infallible> {
    let (week_key, entries) = match (submission.week_key, submission.entries) {
        (Some(week_key), Some(entries)) if !week_key.is_empty() => (week_key, entries),
        _ => {
            return Ok(
                ApiError::Validation(String::from("Missing required fields: weekKey and entries"))
                    .into_response(),
            )
        }
    };

    if state.strict_validation {
        if let Err(err) = allocation::check_entries(&entries) {
            tracing::warn!(week_key = %week_key, error = %err, "rejected invalid week");
            return Ok(ApiError::Validation(err.to_string()).into_response());
        }
    }

    match state.store.save(&state.user_id, &week_key, &entries).await {
        Ok(()) => {
            tracing::info!(week_key = %week_key, entries = entries.len(), "week saved");
            Ok(warp::reply::json(&Success { success: true }).into_response())
        }
        Err(err) => Ok(ApiError::from(err).into_response()),
    }
}

async fn delete_week_handler(raw_key: String, state: AppState) -> Result<warp::reply::Response, Infallible> {
    let week_key = match decode_week_key(&raw_key) {
        Ok(key) => key,
        Err(err) => return Ok(err.into_response()),
    };

    match state.store.delete(&state.user_id, &week_key).await {
        Ok(true) => {
            tracing::info!(week_key = %week_key, "week deleted");
            Ok(warp::reply::json(&Success { success: true }).into_response())
        }
        Ok(false) => Ok(ApiError::NotFound.into_response()),
        Err(err) => Ok(ApiError::from(err).into_response()),
    }
}

/// Week keys contain `/`, so clients send them as one percent-encoded segment.
fn decode_week_key(raw: &str) -> Result<String, ApiError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|_| ApiError::Validation(String::from("Week key is not valid UTF-8")))
}

pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "Request body is not valid JSON")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body is too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length header is required")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected a JSON body")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        tracing::error!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    let body = ErrorBody {
        error: message.to_string(),
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use anyhow::Result;
    use bytes::Bytes;
    use fake::faker::lorem::en::Word;
    use fake::Fake;
    use serde_json::{json, Value};

    const USER: &str = "sam@example.com";
    const WEEK: &str = "1/5/2025 - 1/11/2025";
    const WEEK_PATH: &str = "/api/timeentries/1%2F5%2F2025%20-%201%2F11%2F2025";

    async fn setup_state(strict_validation: bool) -> Result<AppState> {
        let store = db::tests::setup_test_store().await?;
        Ok(AppState::new(store, USER, strict_validation))
    }

    fn fake_entries(percentages: &[&str]) -> Vec<Entry> {
        percentages
            .iter()
            .enumerate()
            .map(|(i, percentage)| {
                let word: String = Word().fake();
                Entry::new(i as i64 + 1, format!("{}-{}", word, i), *percentage)
            })
            .collect()
    }

    fn body_json(body: &Bytes) -> Value {
        serde_json::from_slice(body).expect("response body is JSON")
    }

    #[tokio::test]
    async fn test_get_week() -> Result<()> {
        let state = setup_state(true).await?;
        let exp_entries = fake_entries(&["70", "30"]);
        state.store.save(USER, WEEK, &exp_entries).await?;

        let filter = routes(state);

        let res = warp::test::request()
            .method("GET")
            .path(WEEK_PATH)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 200);
        let body = body_json(res.body());
        assert_eq!(body["weekKey"], WEEK);
        assert_eq!(body["entries"], serde_json::to_value(&exp_entries)?);
        assert!(body["submitDate"].is_string());

        Ok(())
    }

    #[tokio::test]
    async fn test_get_missing_week() -> Result<()> {
        let filter = routes(setup_state(true).await?);

        let res = warp::test::request()
            .method("GET")
            .path(WEEK_PATH)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 404);
        assert_eq!(body_json(res.body()), json!({"error": "Entry not found"}));

        Ok(())
    }

    #[tokio::test]
    async fn test_list_weeks() -> Result<()> {
        let state = setup_state(true).await?;
        let exp_entries = fake_entries(&["100"]);
        state.store.save(USER, WEEK, &exp_entries).await?;

        let filter = routes(state);

        let res = warp::test::request()
            .method("GET")
            .path("/api/timeentries")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 200);
        assert_eq!(body_json(res.body()), json!({ WEEK: exp_entries }));

        Ok(())
    }

    #[tokio::test]
    async fn test_post_week() -> Result<()> {
        let state = setup_state(true).await?;
        let exp_entries = fake_entries(&["40", "35", "25"]);

        let filter = routes(state.clone());

        let res = warp::test::request()
            .method("POST")
            .path("/api/timeentries")
            .json(&json!({"weekKey": WEEK, "entries": exp_entries}))
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 200);
        assert_eq!(res.body(), &Bytes::from_static(b"{\"success\":true}"));

        let record = state.store.get_week(USER, WEEK).await?.expect("week was saved");
        assert_eq!(record.entries, exp_entries);

        Ok(())
    }

    #[tokio::test]
    async fn test_post_week_missing_fields() -> Result<()> {
        let filter = routes(setup_state(true).await?);

        for body in [
            json!({"entries": []}),
            json!({"weekKey": WEEK}),
            json!({"weekKey": "", "entries": []}),
        ] {
            let res = warp::test::request()
                .method("POST")
                .path("/api/timeentries")
                .json(&body)
                .reply(&filter)
                .await;

            assert_eq!(res.status(), 400);
            assert_eq!(
                body_json(res.body())["error"],
                "Missing required fields: weekKey and entries"
            );
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_post_week_rejects_invalid_entries() -> Result<()> {
        let state = setup_state(true).await?;
        let filter = routes(state.clone());

        let res = warp::test::request()
            .method("POST")
            .path("/api/timeentries")
            .json(&json!({"weekKey": WEEK, "entries": fake_entries(&["80", "30"])}))
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 400);
        assert_eq!(body_json(res.body())["error"], "Total percentage exceeds 100%");

        let duplicates = vec![Entry::new(1_i64, "PPP", "50"), Entry::new(2_i64, "PPP", "50")];
        let res = warp::test::request()
            .method("POST")
            .path("/api/timeentries")
            .json(&json!({"weekKey": WEEK, "entries": duplicates}))
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 400);
        assert_eq!(body_json(res.body())["error"], "Duplicate projects are not allowed");
        assert!(state.store.get_week(USER, WEEK).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_post_week_rejects_extreme_percentages() -> Result<()> {
        let state = setup_state(true).await?;
        let filter = routes(state.clone());

        for (percentages, exp_error) in [
            (&["99999999999999999999", "10"][..], "Total percentage exceeds 100%"),
            (
                &["9223372036854775807", "9223372036854775807"][..],
                "Total percentage exceeds 100%",
            ),
            (&["-50", "150"][..], "Percentages must be between 0 and 100"),
            (
                &["-9223372036854775808", "-1"][..],
                "Percentages must be between 0 and 100",
            ),
        ] {
            let res = warp::test::request()
                .method("POST")
                .path("/api/timeentries")
                .json(&json!({"weekKey": WEEK, "entries": fake_entries(percentages)}))
                .reply(&filter)
                .await;

            assert_eq!(res.status(), 400);
            assert_eq!(body_json(res.body())["error"], exp_error);
        }
        assert!(state.store.get_week(USER, WEEK).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_post_week_permissive_mode() -> Result<()> {
        let state = setup_state(false).await?;
        let filter = routes(state.clone());
        let exp_entries = fake_entries(&["80", "30"]);

        let res = warp::test::request()
            .method("POST")
            .path("/api/timeentries")
            .json(&json!({"weekKey": WEEK, "entries": exp_entries}))
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 200);
        let record = state.store.get_week(USER, WEEK).await?.expect("week was saved");
        assert_eq!(record.entries, exp_entries);

        Ok(())
    }

    #[tokio::test]
    async fn test_post_malformed_body() -> Result<()> {
        let filter = routes(setup_state(true).await?);

        let res = warp::test::request()
            .method("POST")
            .path("/api/timeentries")
            .header("content-type", "application/json")
            .body("{not json")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 400);

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_week() -> Result<()> {
        let state = setup_state(true).await?;
        state.store.save(USER, WEEK, &fake_entries(&["100"])).await?;

        let filter = routes(state.clone());

        let res = warp::test::request()
            .method("DELETE")
            .path(WEEK_PATH)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 200);
        assert_eq!(res.body(), &Bytes::from_static(b"{\"success\":true}"));
        assert!(state.store.get_week(USER, WEEK).await?.is_none());

        let res = warp::test::request()
            .method("DELETE")
            .path(WEEK_PATH)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 404);

        Ok(())
    }

    #[tokio::test]
    async fn test_store_failure_is_500() -> Result<()> {
        let state = setup_state(true).await?;
        state.store.close().await;

        let filter = routes(state);

        let res = warp::test::request()
            .method("GET")
            .path("/api/timeentries")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 500);
        assert_eq!(body_json(res.body()), json!({"error": "Internal server error"}));

        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_path() -> Result<()> {
        let filter = routes(setup_state(true).await?);

        let res = warp::test::request()
            .method("GET")
            .path("/api/projects")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), 404);

        Ok(())
    }
}
