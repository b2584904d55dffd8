use crate::models::{
    ImageRow, NewImage, PerevalRow, PerevalSummaryRow, UpdateOutcome, UserRow, UserWrite,
};
use crate::Database;
use anyhow::Result;
use pereval_types::api::{SubmitPerevalRequest, UserPayload, UserUpdateRequest};
use pereval_types::models::PassStatus;
use rusqlite::types::{ToSql, Type};
use rusqlite::{Connection, Row};
use tracing::{debug, info};

impl Database {
    // -- Passes --

    /// Store a full submission (user, coordinates, pass, images) atomically.
    /// A user row is reused when the email is already known.
    pub fn submit_pereval(&self, req: &SubmitPerevalRequest, images: &[NewImage]) -> Result<i64> {
        let pereval_id = self.with_tx(|tx| {
            let user_id = upsert_user(tx, &req.user)?;

            tx.execute(
                "INSERT INTO coords (latitude, longitude, height) VALUES (?1, ?2, ?3)",
                rusqlite::params![req.coords.latitude, req.coords.longitude, req.coords.height],
            )?;
            let coord_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO pereval_added
                     (user_id, beauty_title, title, other_titles, connect, add_time, coord_id, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    user_id,
                    req.beauty_title,
                    req.title,
                    req.other_titles,
                    req.connect,
                    req.normalized_add_time(),
                    coord_id,
                    PassStatus::New.as_str(),
                ],
            )?;
            let pereval_id = tx.last_insert_rowid();

            insert_images(tx, pereval_id, images)?;
            Ok(pereval_id)
        })?;

        info!("Pereval {} submitted with {} image(s)", pereval_id, images.len());
        Ok(pereval_id)
    }

    pub fn get_pereval(&self, id: i64) -> Result<Option<(PerevalRow, Vec<ImageRow>)>> {
        self.with_conn(|conn| {
            let Some(row) = query_pereval(conn, id)? else {
                return Ok(None);
            };
            let images = query_images(conn, id)?;
            Ok(Some((row, images)))
        })
    }

    /// Replace a pass's coordinates, fields and image set, provided it is
    /// still in `new` status. The submitter is never changed.
    pub fn update_pereval(
        &self,
        id: i64,
        req: &SubmitPerevalRequest,
        images: &[NewImage],
    ) -> Result<UpdateOutcome> {
        self.with_tx(|tx| {
            let current = tx
                .query_row(
                    "SELECT status, coord_id FROM pereval_added WHERE id = ?1",
                    [id],
                    |row| Ok((status_at(row, 0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;

            let Some((status, coord_id)) = current else {
                return Ok(UpdateOutcome::NotFound);
            };
            if !status.is_editable() {
                return Ok(UpdateOutcome::NotEditable(status));
            }

            tx.execute(
                "UPDATE coords SET latitude = ?1, longitude = ?2, height = ?3 WHERE id = ?4",
                rusqlite::params![
                    req.coords.latitude,
                    req.coords.longitude,
                    req.coords.height,
                    coord_id
                ],
            )?;

            tx.execute(
                "UPDATE pereval_added
                 SET beauty_title = ?1, title = ?2, other_titles = ?3, connect = ?4, add_time = ?5
                 WHERE id = ?6",
                rusqlite::params![
                    req.beauty_title,
                    req.title,
                    req.other_titles,
                    req.connect,
                    req.normalized_add_time(),
                    id
                ],
            )?;

            let removed = tx.execute("DELETE FROM images WHERE pereval_id = ?1", [id])?;
            insert_images(tx, id, images)?;
            debug!("Pereval {}: replaced {} image(s) with {}", id, removed, images.len());

            Ok(UpdateOutcome::Updated)
        })
    }

    pub fn list_perevals_by_email(&self, email: &str) -> Result<Vec<PerevalSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.beauty_title, p.title, p.status
                 FROM pereval_added p
                 JOIN users u ON p.user_id = u.id
                 WHERE u.email = ?1
                 ORDER BY p.id",
            )?;

            let rows = stmt
                .query_map([email], |row| {
                    Ok(PerevalSummaryRow {
                        id: row.get(0)?,
                        beauty_title: row.get(1)?,
                        title: row.get(2)?,
                        status: status_at(row, 3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Users --

    pub fn list_users(&self, limit: u32, offset: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, phone, fam, name, otc FROM users ORDER BY id LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![limit, offset], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Users whose email contains `fragment`; every user when `fragment` is `None`.
    pub fn search_users(&self, fragment: Option<&str>) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let rows = match fragment {
                Some(fragment) => {
                    let pattern = format!("%{}%", escape_like(fragment));
                    let mut stmt = conn.prepare(
                        "SELECT id, email, phone, fam, name, otc FROM users
                         WHERE email LIKE ?1 ESCAPE '\\'
                         ORDER BY id",
                    )?;
                    stmt.query_map([pattern], user_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn
                        .prepare("SELECT id, email, phone, fam, name, otc FROM users ORDER BY id")?;
                    stmt.query_map([], user_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    pub fn create_user(&self, user: &UserPayload) -> Result<UserWrite> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (email, phone, fam, name, otc) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![user.email, user.phone, user.fam, user.name, user.otc],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Ok(UserWrite::EmailTaken),
                Err(e) => return Err(e.into()),
            }

            let id = conn.last_insert_rowid();
            info!("User {} created", id);
            Ok(query_user(conn, id)?.map_or(UserWrite::NotFound, UserWrite::Written))
        })
    }

    /// Apply only the fields present in `update`. An empty update just
    /// re-reads the row.
    pub fn update_user(&self, id: i64, update: &UserUpdateRequest) -> Result<UserWrite> {
        self.with_conn(|conn| {
            let mut columns: Vec<&str> = Vec::new();
            let mut values: Vec<&dyn ToSql> = Vec::new();

            if let Some(email) = &update.email {
                columns.push("email");
                values.push(email);
            }
            if let Some(phone) = &update.phone {
                columns.push("phone");
                values.push(phone);
            }
            if let Some(fam) = &update.fam {
                columns.push("fam");
                values.push(fam);
            }
            if let Some(name) = &update.name {
                columns.push("name");
                values.push(name);
            }
            if let Some(otc) = &update.otc {
                columns.push("otc");
                values.push(otc);
            }

            if !columns.is_empty() {
                let assignments: Vec<String> = columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| format!("{} = ?{}", col, i + 1))
                    .collect();
                let sql = format!(
                    "UPDATE users SET {} WHERE id = ?{}",
                    assignments.join(", "),
                    values.len() + 1
                );
                values.push(&id);

                match conn.execute(&sql, values.as_slice()) {
                    Ok(0) => return Ok(UserWrite::NotFound),
                    Ok(_) => info!("User {} updated ({})", id, columns.join(", ")),
                    Err(e) if is_unique_violation(&e) => return Ok(UserWrite::EmailTaken),
                    Err(e) => return Err(e.into()),
                }
            }

            Ok(query_user(conn, id)?.map_or(UserWrite::NotFound, UserWrite::Written))
        })
    }
}

/// Id of the user with `user.email`, refreshing their contact data; a new
/// row when the email is unknown.
fn upsert_user(conn: &Connection, user: &UserPayload) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE email = ?1", [&user.email], |row| row.get(0))
        .optional()?;

    if let Some(id) = existing {
        debug!("Reusing user {} for {}, contact data refreshed", id, user.email);
        conn.execute(
            "UPDATE users SET phone = ?1, fam = ?2, name = ?3, otc = ?4 WHERE id = ?5",
            rusqlite::params![user.phone, user.fam, user.name, user.otc, id],
        )?;
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO users (email, phone, fam, name, otc) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![user.email, user.phone, user.fam, user.name, user.otc],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_images(conn: &Connection, pereval_id: i64, images: &[NewImage]) -> Result<()> {
    let mut stmt =
        conn.prepare("INSERT INTO images (pereval_id, img, title) VALUES (?1, ?2, ?3)")?;
    for image in images {
        stmt.execute(rusqlite::params![pereval_id, image.data, image.title])?;
    }
    Ok(())
}

fn query_pereval(conn: &Connection, id: i64) -> Result<Option<PerevalRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.date_added, p.status, p.beauty_title, p.title, p.other_titles,
                p.connect, p.add_time,
                c.latitude, c.longitude, c.height,
                u.email, u.phone, u.fam, u.name, u.otc
         FROM pereval_added p
         JOIN coords c ON p.coord_id = c.id
         JOIN users u ON p.user_id = u.id
         WHERE p.id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(PerevalRow {
                id: row.get(0)?,
                date_added: row.get(1)?,
                status: status_at(row, 2)?,
                beauty_title: row.get(3)?,
                title: row.get(4)?,
                other_titles: row.get(5)?,
                connect: row.get(6)?,
                add_time: row.get(7)?,
                latitude: row.get(8)?,
                longitude: row.get(9)?,
                height: row.get(10)?,
                email: row.get(11)?,
                phone: row.get(12)?,
                fam: row.get(13)?,
                name: row.get(14)?,
                otc: row.get(15)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_images(conn: &Connection, pereval_id: i64) -> Result<Vec<ImageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, pereval_id, img, title FROM images WHERE pereval_id = ?1 ORDER BY id",
    )?;

    let rows = stmt
        .query_map([pereval_id], |row| {
            Ok(ImageRow {
                id: row.get(0)?,
                pereval_id: row.get(1)?,
                img: row.get(2)?,
                title: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_user(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT id, email, phone, fam, name, otc FROM users WHERE id = ?1",
            [id],
            user_from_row,
        )
        .optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        phone: row.get(2)?,
        fam: row.get(3)?,
        name: row.get(4)?,
        otc: row.get(5)?,
    })
}

fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<PassStatus> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Escape LIKE wildcards so user input matches literally (paired with `ESCAPE '\'`).
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
