use axum::{Extension, Json, extract::State};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use letterbox_db::StoreError;
use letterbox_db::models::{MessageDetailRow, UserSummaryRow};
use letterbox_types::api::{
    MessageDetail, MessageEnvelope, ReadReceipt, SendMessageRequest, SentMessage,
};
use letterbox_types::models::UserSummary;

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult, NOT_THE_RECIPIENT, NOT_YOUR_MESSAGE};
use crate::extract::{JsonBody, PathParam};
use crate::middleware::Claims;

/// `GET /messages/{id}`: full message with both participants. Only the
/// sender or the recipient may see it.
pub async fn get_message(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MessageEnvelope<MessageDetail>>> {
    let detail = load_message(&state, id).await?;
    ensure_participant(&detail, &claims.username)?;

    Ok(Json(MessageEnvelope::new(detail)))
}

/// `POST /messages`: send from the caller to `to_username`.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<SendMessageRequest>,
) -> ApiResult<Json<MessageEnvelope<SentMessage>>> {
    let from_username = claims.username;
    let row = blocking(move || {
        state
            .db
            .create_message(&from_username, &req.to_username, &req.body)
            .map_err(|e| match e {
                StoreError::ForeignKeyViolation {
                    field: "to_username",
                    value,
                } => ApiError::RecipientNotFound(value),
                other => other.into(),
            })
    })
    .await?;

    info!(id = row.id, from = %row.from_username, to = %row.to_username, "Message sent");

    let sent_at = parse_timestamp(&row.sent_at, row.id, "sent_at");
    Ok(Json(MessageEnvelope::new(SentMessage {
        id: row.id,
        from_username: row.from_username,
        to_username: row.to_username,
        body: row.body,
        sent_at,
    })))
}

/// `POST /messages/{id}/read`: recipient-only. Re-reading keeps the
/// first `read_at`.
pub async fn mark_read(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MessageEnvelope<ReadReceipt>>> {
    let detail = load_message(&state, id).await?;
    ensure_recipient(&detail, &claims.username)?;

    let row = blocking(move || Ok(state.db.mark_read(id)?)).await?;

    Ok(Json(MessageEnvelope::new(ReadReceipt {
        id: row.id,
        read_at: row
            .read_at
            .as_deref()
            .map(|raw| parse_timestamp(raw, row.id, "read_at")),
    })))
}

/// The caller must be the sender or the recipient.
pub fn ensure_participant(message: &MessageDetail, username: &str) -> ApiResult<()> {
    if message.from_user.username == username || message.to_user.username == username {
        Ok(())
    } else {
        Err(ApiError::unauthorized(NOT_YOUR_MESSAGE))
    }
}

/// The caller must be the recipient.
pub fn ensure_recipient(message: &MessageDetail, username: &str) -> ApiResult<()> {
    if message.to_user.username == username {
        Ok(())
    } else {
        Err(ApiError::unauthorized(NOT_THE_RECIPIENT))
    }
}

async fn load_message(state: &AppState, id: i64) -> ApiResult<MessageDetail> {
    let state = state.clone();
    let row = blocking(move || Ok(state.db.get_message(id)?)).await?;
    Ok(detail_from_row(row))
}

fn detail_from_row(row: MessageDetailRow) -> MessageDetail {
    MessageDetail {
        id: row.id,
        sent_at: parse_timestamp(&row.sent_at, row.id, "sent_at"),
        read_at: row
            .read_at
            .as_deref()
            .map(|raw| parse_timestamp(raw, row.id, "read_at")),
        body: row.body,
        from_user: summary_from_row(row.from_user),
        to_user: summary_from_row(row.to_user),
    }
}

fn summary_from_row(row: UserSummaryRow) -> UserSummary {
    UserSummary {
        username: row.username,
        first_name: row.first_name,
        last_name: row.last_name,
        phone: row.phone,
    }
}

fn parse_timestamp(raw: &str, id: i64, column: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by hand through the sqlite3 shell use datetime('now'),
            // which has no timezone. Parse as naive UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt {} '{}' on message {}: {}", column, raw, id, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn user(username: &str) -> UserSummary {
        UserSummary {
            username: username.into(),
            first_name: "First".into(),
            last_name: "Last".into(),
            phone: "555-0100".into(),
        }
    }

    fn message(from: &str, to: &str) -> MessageDetail {
        MessageDetail {
            id: 1,
            body: "hi".into(),
            sent_at: Utc::now(),
            read_at: None,
            from_user: user(from),
            to_user: user(to),
        }
    }

    #[test]
    fn participants_may_view() {
        let m = message("alice", "bob");
        assert!(ensure_participant(&m, "alice").is_ok());
        assert!(ensure_participant(&m, "bob").is_ok());

        let err = ensure_participant(&m, "carol").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), NOT_YOUR_MESSAGE);
    }

    #[test]
    fn only_recipient_may_mark_read() {
        let m = message("alice", "bob");
        assert!(ensure_recipient(&m, "bob").is_ok());

        for caller in ["alice", "carol"] {
            let err = ensure_recipient(&m, caller).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(err.to_string(), NOT_THE_RECIPIENT);
        }
    }

    #[test]
    fn self_addressed_message_is_visible_and_readable() {
        let m = message("alice", "alice");
        assert!(ensure_participant(&m, "alice").is_ok());
        assert!(ensure_recipient(&m, "alice").is_ok());
    }

    #[test]
    fn usernames_compare_exactly() {
        let m = message("alice", "bob");
        assert!(ensure_participant(&m, "Alice").is_err());
        assert!(ensure_recipient(&m, "bob ").is_err());
    }

    #[test]
    fn parses_stored_timestamps() {
        let ts = parse_timestamp("2026-03-01T12:30:00.250Z", 1, "sent_at");
        assert_eq!(ts.timestamp_millis(), 1_772_368_200_250);

        let naive = parse_timestamp("2026-03-01 12:30:00", 1, "sent_at");
        assert_eq!(naive.timestamp(), 1_772_368_200);

        assert_eq!(parse_timestamp("garbage", 1, "sent_at"), DateTime::<Utc>::default());
    }
}
