//! Database row types. These map directly to SQLite rows.
//! Timestamps stay as stored RFC 3339 text; the API layer parses them.

pub struct UserRow {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub join_at: String,
    pub last_login_at: Option<String>,
}

pub struct UserSummaryRow {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// A freshly inserted message.
pub struct MessageRow {
    pub id: i64,
    pub from_username: String,
    pub to_username: String,
    pub body: String,
    pub sent_at: String,
}

/// A message joined with both participants.
pub struct MessageDetailRow {
    pub id: i64,
    pub body: String,
    pub sent_at: String,
    pub read_at: Option<String>,
    pub from_user: UserSummaryRow,
    pub to_user: UserSummaryRow,
}

pub struct ReadRow {
    pub id: i64,
    pub read_at: Option<String>,
}
