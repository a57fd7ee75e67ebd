use super::*;

use crate::assistant::last_user_text;
use crate::chat_types::{LegacyChatRequest, Role};
use crate::db::HistoryRecord;
use crate::timestamp::now_iso_z;

/// `GET /history`: the caller's single transcript, oldest first.
pub(super) async fn api_history(
    headers: HeaderMap,
    State(state): State<WebState>,
) -> Result<Json<Value>, ApiError> {
    let user = state.user(&headers)?;
    let uid = user.user_id.clone();
    let records = call_blocking(state.app_state.db.clone(), move |db| db.get_history(&uid))
        .await
        .map_err(|e| internal_error("history", e))?;

    let messages: Vec<Value> = records
        .into_iter()
        .map(|r| {
            json!({
                "sender": if r.role == Role::User.as_str() { "user" } else { "bot" },
                "text": r.content,
                "time": r.time,
            })
        })
        .collect();
    debug!("[history] returning {} messages", messages.len());
    Ok(Json(json!({ "messages": messages })))
}

/// `POST /chat`: answer the posted transcript and persist the newest
/// exchange.
pub(super) async fn api_chat(
    headers: HeaderMap,
    State(state): State<WebState>,
    body: Option<Json<LegacyChatRequest>>,
) -> Result<Json<Value>, ApiError> {
    let user = state.user(&headers)?;
    info!("[chat] user_id={} called /chat", user.user_id);

    let failed = |e: &dyn std::fmt::Display| {
        error!("[chat] Error handling /chat for user_id={}: {e}", user.user_id);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process chat")
    };

    let Some(Json(request)) = body else {
        return Err(failed(&"request body is not a valid chat payload"));
    };
    let history = request.history;
    let last_user = last_user_text(&history).to_string();

    let reply = state
        .app_state
        .assistant
        .reply(&history, &last_user)
        .await
        .map_err(|e| failed(&e))?;

    if !last_user.is_empty() {
        let uid = user.user_id.clone();
        let user_time = now_iso_z();
        let records = vec![
            HistoryRecord {
                user_id: uid.clone(),
                role: Role::User.as_str().into(),
                content: last_user,
                time: user_time,
            },
            HistoryRecord {
                user_id: uid,
                role: Role::Assistant.as_str().into(),
                content: reply.clone(),
                time: now_iso_z(),
            },
        ];
        call_blocking(state.app_state.db.clone(), move |db| db.append_history(&records))
            .await
            .map_err(|e| failed(&e))?;
        debug!("[chat] persisted 2 messages");
    }

    Ok(Json(json!({ "reply": reply })))
}
