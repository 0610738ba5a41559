/// Database row types — these map directly to SQLite rows.
/// Distinct from the veil-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub verify_code: Option<String>,
    pub verify_expires_at: Option<String>,
    pub verified: bool,
    pub accepting_messages: bool,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub owner_id: String,
    pub content: String,
    pub created_at: String,
}
