use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                email   TEXT NOT NULL UNIQUE,
                phone   TEXT NOT NULL,
                fam     TEXT NOT NULL,
                name    TEXT NOT NULL,
                otc     TEXT
            );

            CREATE TABLE coords (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                latitude    REAL NOT NULL,
                longitude   REAL NOT NULL,
                height      INTEGER NOT NULL
            );

            CREATE TABLE pereval_added (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                date_added      TEXT NOT NULL DEFAULT (datetime('now')),
                user_id         INTEGER NOT NULL REFERENCES users(id),
                beauty_title    TEXT,
                title           TEXT NOT NULL,
                other_titles    TEXT,
                connect         TEXT,
                add_time        TEXT,
                status          TEXT NOT NULL DEFAULT 'new'
                                CHECK (status IN ('new', 'pending', 'accepted', 'rejected')),
                coord_id        INTEGER NOT NULL REFERENCES coords(id)
            );

            CREATE INDEX idx_pereval_user ON pereval_added(user_id);

            CREATE TABLE images (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                pereval_id  INTEGER NOT NULL REFERENCES pereval_added(id),
                img         BLOB NOT NULL,
                title       TEXT NOT NULL
            );

            CREATE INDEX idx_images_pereval ON images(pereval_id);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
