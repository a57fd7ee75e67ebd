use super::*;

use crate::chat_types::{Role, Turn};
use crate::db::{StoredChat, StoredMessage};
use crate::error::PraxisError;
use crate::timestamp::{ceil_to_millis, now_iso_z, parse_timestamp, to_iso_z};

const DEFAULT_CHAT_TITLE: &str = "New chat";
const CHAT_LIST_LIMIT: usize = 200;
const DEFAULT_PAGE_LIMIT: usize = 50;
const MAX_PAGE_LIMIT: usize = 200;

fn chat_not_found() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "Chat not found.")
}

fn message_json(msg: &StoredMessage) -> Value {
    json!({
        "id": msg.id,
        "role": Role::parse(&msg.role).as_str(),
        "content": msg.content,
        "createdAt": msg.created_at,
    })
}

fn summary_json(chat: &StoredChat) -> Value {
    json!({
        "id": chat.id,
        "title": chat.title.as_deref().unwrap_or(DEFAULT_CHAT_TITLE),
        "lastMessageAt": chat.updated_at,
    })
}

/// Resolve a chat the caller owns, or the uniform 404.
async fn owned_chat(state: &WebState, user_id: &str, chat_id: &str) -> Result<StoredChat, ApiError> {
    let uid = user_id.to_string();
    let cid = chat_id.to_string();
    call_blocking(state.app_state.db.clone(), move |db| {
        db.get_owned_chat(&uid, &cid)?
            .ok_or_else(|| PraxisError::NotFound(format!("chat {cid} for user {uid}")))
    })
    .await
    .map_err(|e| match e {
        PraxisError::NotFound(what) => {
            debug!("[chats] {what} not found");
            chat_not_found()
        }
        other => internal_error("chats", other),
    })
}

fn parse_limit(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_PAGE_LIMIT as i64)
        .clamp(1, MAX_PAGE_LIMIT as i64) as usize
}

fn parse_before(raw: Option<&str>) -> Result<Option<String>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => parse_timestamp(s)
            .map(|dt| Some(to_iso_z(ceil_to_millis(dt))))
            .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Invalid 'before' timestamp.")),
    }
}

/// Trim and bound a posted message body.
fn validate_content(body: Option<&Value>, max_chars: usize) -> Result<String, ApiError> {
    let Some(raw) = body.and_then(|v| v.get("content")).and_then(Value::as_str) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Missing or invalid 'content'.",
        ));
    };
    let content = raw.trim();
    if content.is_empty() {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "'content' cannot be empty.",
        ));
    }
    if content.chars().count() > max_chars {
        return Err(api_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("'content' exceeds {max_chars} characters."),
        ));
    }
    Ok(content.to_string())
}

pub(super) async fn api_list_chats(
    headers: HeaderMap,
    State(state): State<WebState>,
) -> Result<Json<Value>, ApiError> {
    let user = state.user(&headers)?;
    let uid = user.user_id.clone();
    let chats = call_blocking(state.app_state.db.clone(), move |db| {
        db.list_chats(&uid, CHAT_LIST_LIMIT)
    })
    .await
    .map_err(|e| internal_error("chats", e))?;
    Ok(Json(Value::Array(chats.iter().map(summary_json).collect())))
}

pub(super) async fn api_create_chat(
    headers: HeaderMap,
    State(state): State<WebState>,
    body: Option<Json<Value>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user = state.user(&headers)?;
    let title = body
        .as_ref()
        .and_then(|Json(v)| v.get("title"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let uid = user.user_id.clone();
    let chat = call_blocking(state.app_state.db.clone(), move |db| {
        db.create_chat(&uid, title.as_deref())
    })
    .await
    .map_err(|e| internal_error("chats", e))?;
    info!("[chats] user_id={} created chat {}", user.user_id, chat.id);
    Ok((StatusCode::CREATED, Json(json!({ "id": chat.id }))))
}

pub(super) async fn api_archive_chat(
    headers: HeaderMap,
    State(state): State<WebState>,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = state.user(&headers)?;
    let uid = user.user_id.clone();
    let cid = chat_id.clone();
    let archived = call_blocking(state.app_state.db.clone(), move |db| db.archive_chat(&uid, &cid))
        .await
        .map_err(|e| internal_error("chats", e))?;
    if !archived {
        return Err(chat_not_found());
    }
    info!("[chats] user_id={} archived chat {chat_id}", user.user_id);
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct MessagesQuery {
    limit: Option<String>,
    before: Option<String>,
}

pub(super) async fn api_get_messages(
    headers: HeaderMap,
    State(state): State<WebState>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = state.user(&headers)?;
    let chat = owned_chat(&state, &user.user_id, &chat_id).await?;

    let limit = parse_limit(query.limit.as_deref());
    let before = parse_before(query.before.as_deref())?;

    let uid = user.user_id.clone();
    let cid = chat.id.clone();
    let (messages, has_more) = call_blocking(state.app_state.db.clone(), move |db| {
        db.fetch_messages_page(&uid, &cid, limit, before.as_deref())
    })
    .await
    .map_err(|e| internal_error("chats", e))?;

    Ok(Json(json!({
        "chatId": chat.id,
        "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
        "hasMore": has_more,
    })))
}

pub(super) async fn api_post_message(
    headers: HeaderMap,
    State(state): State<WebState>,
    Path(chat_id): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let user = state.user(&headers)?;
    let chat = owned_chat(&state, &user.user_id, &chat_id).await?;
    let config = &state.app_state.config;
    let content = validate_content(body.as_ref().map(|Json(v)| v), config.max_message_chars)?;

    let db = state.app_state.db.clone();
    let user_msg = StoredMessage {
        id: uuid::Uuid::new_v4().simple().to_string(),
        user_id: user.user_id.clone(),
        chat_id: chat.id.clone(),
        role: Role::User.as_str().into(),
        content: content.clone(),
        created_at: now_iso_z(),
    };
    let window = config.history_window;
    let history = call_blocking(db.clone(), move |db| {
        let stamped = db.insert_chat_message(&user_msg)?;
        db.touch_chat(&user_msg.chat_id, &stamped)?;
        db.recent_chat_messages(&user_msg.user_id, &user_msg.chat_id, window)
    })
    .await
    .map_err(|e| internal_error("chats", e))?;

    let turns: Vec<Turn> = history
        .into_iter()
        .map(|m| Turn {
            role: Role::parse(&m.role),
            content: m.content,
        })
        .collect();
    debug!(
        "[chats] chat {} history window has {} turns",
        chat.id,
        turns.len()
    );
    let reply = state
        .app_state
        .assistant
        .reply_or_fallback(&turns, &content)
        .await;

    let mut assistant_msg = StoredMessage {
        id: uuid::Uuid::new_v4().simple().to_string(),
        user_id: user.user_id.clone(),
        chat_id: chat.id.clone(),
        role: Role::Assistant.as_str().into(),
        content: reply,
        created_at: now_iso_z(),
    };
    let stored = assistant_msg.clone();
    assistant_msg.created_at = call_blocking(db, move |db| {
        let stamped = db.insert_chat_message(&stored)?;
        db.touch_chat(&stored.chat_id, &stamped)?;
        Ok(stamped)
    })
    .await
    .map_err(|e| internal_error("chats", e))?;

    Ok(Json(json!({
        "ok": true,
        "assistant": message_json(&assistant_msg),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::FALLBACK_REPLY;
    use crate::web::test_support::*;

    async fn create(app: &Router, token: &str, title: Option<&str>) -> String {
        let body = match title {
            Some(t) => json!({ "title": t }),
            None => json!({}),
        };
        let (status, _, resp) = send(app, "POST", "/api/chats", Some(token), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        resp["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None), 50);
        assert_eq!(parse_limit(Some("abc")), 50);
        assert_eq!(parse_limit(Some("0")), 1);
        assert_eq!(parse_limit(Some("-4")), 1);
        assert_eq!(parse_limit(Some("999")), 200);
        assert_eq!(parse_limit(Some(" 7 ")), 7);
    }

    #[test]
    fn test_parse_before() {
        assert_eq!(parse_before(None).unwrap(), None);
        assert_eq!(parse_before(Some("")).unwrap(), None);
        assert_eq!(
            parse_before(Some("2025-01-02T03:04:05+02:00")).unwrap().as_deref(),
            Some("2025-01-02T01:04:05.000Z")
        );
        assert_eq!(
            parse_before(Some("2025-01-02")).unwrap().as_deref(),
            Some("2025-01-02T00:00:00.000Z")
        );
        // Finer than stored precision rounds up so the stamp at .678 stays included.
        assert_eq!(
            parse_before(Some("2025-01-02T03:04:05.678901Z")).unwrap().as_deref(),
            Some("2025-01-02T03:04:05.679Z")
        );
        let (status, Json(body)) = parse_before(Some("yesterday")).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid 'before' timestamp.");
    }

    #[tokio::test]
    async fn test_create_and_list_chats() {
        let state = test_state(Box::new(DummyLlm));
        let token = token_for(&state, "1");
        let app = build_router(WebState::new(state));

        let untitled = create(&app, &token, Some("   ")).await;
        let titled = create(&app, &token, Some("Invoices")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        send(
            &app,
            "POST",
            &format!("/api/chats/{untitled}/messages"),
            Some(&token),
            Some(json!({"content": "bump"})),
        )
        .await;

        let (status, _, body) = send(&app, "GET", "/api/chats", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let chats = body.as_array().unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0]["id"], untitled.as_str());
        assert_eq!(chats[0]["title"], "New chat");
        assert_eq!(chats[1]["id"], titled.as_str());
        assert_eq!(chats[1]["title"], "Invoices");
        assert!(chats[1]["lastMessageAt"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_other_users_chat_is_not_found() {
        let state = test_state(Box::new(DummyLlm));
        let alice = token_for(&state, "1");
        let bob = token_for(&state, "2");
        let app = build_router(WebState::new(state));
        let chat = create(&app, &alice, None).await;

        for (method, uri, body) in [
            ("GET", format!("/api/chats/{chat}/messages"), None),
            (
                "POST",
                format!("/api/chats/{chat}/messages"),
                Some(json!({"content": "hi"})),
            ),
            // Invalid input must not reveal whether the chat exists.
            ("POST", format!("/api/chats/{chat}/messages"), Some(json!({}))),
            ("DELETE", format!("/api/chats/{chat}"), None),
            ("GET", "/api/chats/doesnotexist/messages".to_string(), None),
        ] {
            let (status, _, resp) = send(&app, method, &uri, Some(&bob), body).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
            assert_eq!(resp["error"], "Chat not found.");
        }

        let (_, _, body) = send(&app, "GET", "/api/chats", Some(&bob), None).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_message_validation() {
        let state = test_state(Box::new(DummyLlm));
        let token = token_for(&state, "1");
        let app = build_router(WebState::new(state));
        let chat = create(&app, &token, None).await;
        let uri = format!("/api/chats/{chat}/messages");

        let long = "x".repeat(8001);
        let cases = [
            (Some(json!({})), StatusCode::BAD_REQUEST, "Missing or invalid 'content'."),
            (Some(json!({"content": 5})), StatusCode::BAD_REQUEST, "Missing or invalid 'content'."),
            (None, StatusCode::BAD_REQUEST, "Missing or invalid 'content'."),
            (Some(json!({"content": "  \n "})), StatusCode::UNPROCESSABLE_ENTITY, "'content' cannot be empty."),
            (Some(json!({"content": long})), StatusCode::PAYLOAD_TOO_LARGE, "'content' exceeds 8000 characters."),
        ];
        for (body, expected, message) in cases {
            let (status, _, resp) = send(&app, "POST", &uri, Some(&token), body).await;
            assert_eq!(status, expected);
            assert_eq!(resp["error"], message);
        }

        // Exactly at the bound, and surrounding whitespace does not count.
        let edge = format!("  {}  ", "é".repeat(8000));
        let (status, _, _) = send(&app, "POST", &uri, Some(&token), Some(json!({"content": edge}))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_message_round_trip() {
        let state = test_state(Box::new(DummyLlm));
        let token = token_for(&state, "1");
        let app = build_router(WebState::new(state));
        let chat = create(&app, &token, None).await;
        let uri = format!("/api/chats/{chat}/messages");

        let (status, _, body) = send(&app, "POST", &uri, Some(&token), Some(json!({"content": "  hi  "}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["assistant"]["role"], "assistant");
        assert_eq!(body["assistant"]["content"], "hello from llm (1 turns)");

        let (_, _, body) = send(&app, "POST", &uri, Some(&token), Some(json!({"content": "again"}))).await;
        assert_eq!(body["assistant"]["content"], "hello from llm (3 turns)");

        let (status, _, body) = send(&app, "GET", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chatId"], chat.as_str());
        assert_eq!(body["hasMore"], false);
        let messages = body["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, ["user", "assistant", "user", "assistant"]);
        assert_eq!(messages[0]["content"], "hi");
    }

    #[tokio::test]
    async fn test_post_message_uses_fallback_on_provider_error() {
        let state = test_state(Box::new(FailingLlm));
        let token = token_for(&state, "1");
        let app = build_router(WebState::new(state));
        let chat = create(&app, &token, None).await;
        let uri = format!("/api/chats/{chat}/messages");

        let (status, _, body) = send(&app, "POST", &uri, Some(&token), Some(json!({"content": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["assistant"]["content"], FALLBACK_REPLY);

        let (_, _, body) = send(&app, "GET", &uri, Some(&token), None).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_window_bounds_prompt() {
        let llm = RecordingLlm::default();
        let mut cfg = crate::config::Config::test_defaults();
        cfg.history_window = 3;
        let state = test_state_with(Box::new(llm.clone()), cfg);
        let token = token_for(&state, "1");
        let app = build_router(WebState::new(state));
        let chat = create(&app, &token, None).await;
        let uri = format!("/api/chats/{chat}/messages");

        for text in ["one", "two", "three"] {
            let (status, _, _) = send(&app, "POST", &uri, Some(&token), Some(json!({"content": text}))).await;
            assert_eq!(status, StatusCode::OK);
        }

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[0].len(), 4);
        assert_eq!(prompts[0][2], "User: one");
        // Third send sees only the newest three turns, ending with its own.
        let last = &prompts[2];
        assert_eq!(
            last[2..],
            ["User: two", "Assistant: reply", "User: three", "Assistant:"]
        );
        assert!(!last.iter().any(|p| p == "User: one"));
    }

    #[tokio::test]
    async fn test_messages_pagination() {
        let state = test_state(Box::new(DummyLlm));
        let token = token_for(&state, "1");
        let app = build_router(WebState::new(state));
        let chat = create(&app, &token, None).await;
        let uri = format!("/api/chats/{chat}/messages");

        for i in 0..3 {
            send(&app, "POST", &uri, Some(&token), Some(json!({"content": format!("m{i}")}))).await;
        }

        let (_, _, page) = send(&app, "GET", &format!("{uri}?limit=4"), Some(&token), None).await;
        let newest = page["messages"].as_array().unwrap();
        assert_eq!(newest.len(), 4);
        assert_eq!(page["hasMore"], true);
        assert_eq!(newest[0]["content"], "m1");

        let oldest_ts = newest[0]["createdAt"].as_str().unwrap();
        let (_, _, page) = send(
            &app,
            "GET",
            &format!("{uri}?limit=4&before={}", urlencoding::encode(oldest_ts)),
            Some(&token),
            None,
        )
        .await;
        let older = page["messages"].as_array().unwrap();
        let texts: Vec<&str> = older.iter().map(|m| m["content"].as_str().unwrap()).collect();
        assert_eq!(texts, ["m0", "hello from llm (1 turns)"]);
        assert_eq!(page["hasMore"], false);

        let (status, _, body) = send(&app, "GET", &format!("{uri}?before=garbage"), Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid 'before' timestamp.");
    }

    #[tokio::test]
    async fn test_archive_hides_chat() {
        let state = test_state(Box::new(DummyLlm));
        let token = token_for(&state, "1");
        let app = build_router(WebState::new(state));
        let chat = create(&app, &token, None).await;

        let (status, _, body) = send(&app, "DELETE", &format!("/api/chats/{chat}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let (_, _, body) = send(&app, "GET", "/api/chats", Some(&token), None).await;
        assert!(body.as_array().unwrap().is_empty());

        let (status, _, _) = send(&app, "DELETE", &format!("/api/chats/{chat}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&app, "GET", &format!("/api/chats/{chat}/messages"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
