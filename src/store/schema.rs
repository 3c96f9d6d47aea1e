use rusqlite::Connection;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    email_verified INTEGER NOT NULL DEFAULT 0,
    subscription_status TEXT NOT NULL DEFAULT 'free',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS auth_tokens (
    token_hash TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_type TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS library_items (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL DEFAULT '',
    link TEXT NOT NULL,
    source TEXT NOT NULL,
    image_url TEXT NOT NULL DEFAULT '',
    site_name TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    ai_summary TEXT,
    ai_excerpt TEXT,
    ai_tags TEXT,
    UNIQUE(user_id, link)
);

CREATE INDEX IF NOT EXISTS idx_library_items_user_created
    ON library_items(user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS library_contents (
    id TEXT PRIMARY KEY REFERENCES library_items(id) ON DELETE CASCADE,
    content TEXT NOT NULL DEFAULT '',
    excerpt TEXT NOT NULL DEFAULT '',
    article_lang TEXT NOT NULL DEFAULT '',
    published_time TEXT,
    ai_markdown TEXT,
    content_embedding BLOB
);

CREATE VIRTUAL TABLE IF NOT EXISTS library_search USING fts5(
    item_id UNINDEXED,
    title,
    excerpt,
    content,
    ai_summary,
    ai_tags,
    tokenize = 'porter unicode61'
);

CREATE TABLE IF NOT EXISTS daily_ai_limits (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    day TEXT NOT NULL,
    question_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, day)
);

CREATE TABLE IF NOT EXISTS import_jobs (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    import_option TEXT NOT NULL DEFAULT 'all',
    file_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    total_items INTEGER NOT NULL DEFAULT 0,
    imported_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_import_jobs_status_created
    ON import_jobs(status, created_at);
"#;

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
