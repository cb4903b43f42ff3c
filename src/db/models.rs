use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    pub profile_pic: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub date_joined: String,
}

impl User {
    /// Column list for a `users u` alias, in `from_row` order.
    pub const COLUMNS: &'static str = "u.id, u.username, u.email, u.first_name, u.last_name, \
         u.bio, u.profile_pic, u.password_hash, u.date_joined";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            bio: row.get(5)?,
            profile_pic: row.get(6)?,
            password_hash: row.get(7)?,
            date_joined: row.get(8)?,
        })
    }

    pub fn find(conn: &Connection, id: i64) -> rusqlite::Result<Self> {
        conn.query_row(
            &format!("SELECT {} FROM users u WHERE u.id = ?1", Self::COLUMNS),
            params![id],
            Self::from_row,
        )
    }

    pub fn find_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!("SELECT {} FROM users u WHERE u.username = ?1", Self::COLUMNS),
            params![username],
            Self::from_row,
        )
        .optional()
    }

    pub fn find_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!("SELECT {} FROM users u WHERE u.email = ?1", Self::COLUMNS),
            params![email],
            Self::from_row,
        )
        .optional()
    }

    pub fn exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
    }

    pub fn all(conn: &Connection) -> rusqlite::Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users u ORDER BY u.id",
            Self::COLUMNS
        ))?;
        let users = stmt
            .query_map([], Self::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    pub media: Option<String>,
    pub created_at: String,
}

impl Post {
    pub const COLUMNS: &'static str = "p.id, p.author_id, p.content, p.media, p.created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            author_id: row.get(1)?,
            content: row.get(2)?,
            media: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    pub fn find(conn: &Connection, id: i64) -> rusqlite::Result<Self> {
        conn.query_row(
            &format!("SELECT {} FROM posts p WHERE p.id = ?1", Self::COLUMNS),
            params![id],
            Self::from_row,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: String,
}

impl Comment {
    pub const COLUMNS: &'static str = "c.id, c.post_id, c.user_id, c.content, c.created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            post_id: row.get(1)?,
            user_id: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    pub fn find(conn: &Connection, id: i64) -> rusqlite::Result<Self> {
        conn.query_row(
            &format!("SELECT {} FROM comments c WHERE c.id = ?1", Self::COLUMNS),
            params![id],
            Self::from_row,
        )
    }
}

/// A job listing, joined with its creator's username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub description: String,
    pub salary_range: String,
    pub deadline: String,
    pub created_by: i64,
    pub created_by_username: String,
    pub created_at: String,
}

impl Job {
    /// Selects from `jobs j JOIN users u`.
    pub const SELECT: &'static str = "SELECT j.id, j.title, j.company_name, j.location, \
         j.description, j.salary_range, j.deadline, j.created_by, u.username, j.created_at \
         FROM jobs j JOIN users u ON u.id = j.created_by";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            company_name: row.get(2)?,
            location: row.get(3)?,
            description: row.get(4)?,
            salary_range: row.get(5)?,
            deadline: row.get(6)?,
            created_by: row.get(7)?,
            created_by_username: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    pub fn find(conn: &Connection, id: i64) -> rusqlite::Result<Self> {
        conn.query_row(
            &format!("{} WHERE j.id = ?1", Self::SELECT),
            params![id],
            Self::from_row,
        )
    }
}

/// An event, joined with its creator's username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start_time: String,
    pub end_time: String,
    pub created_by: i64,
    pub created_by_username: String,
    pub created_at: String,
}

impl Event {
    pub const SELECT: &'static str = "SELECT e.id, e.title, e.description, e.location, \
         e.start_time, e.end_time, e.created_by, u.username, e.created_at \
         FROM events e JOIN users u ON u.id = e.created_by";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            location: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            created_by: row.get(6)?,
            created_by_username: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    pub fn find(conn: &Connection, id: i64) -> rusqlite::Result<Self> {
        conn.query_row(
            &format!("{} WHERE e.id = ?1", Self::SELECT),
            params![id],
            Self::from_row,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub message: String,
    pub timestamp: String,
}

impl ChatMessage {
    pub const COLUMNS: &'static str = "m.id, m.sender_id, m.receiver_id, m.message, m.timestamp";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            receiver_id: row.get(2)?,
            message: row.get(3)?,
            timestamp: row.get(4)?,
        })
    }

    pub fn find(conn: &Connection, id: i64) -> rusqlite::Result<Self> {
        conn.query_row(
            &format!("SELECT {} FROM chat_messages m WHERE m.id = ?1", Self::COLUMNS),
            params![id],
            Self::from_row,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{insert_user, test_pool};

    #[test]
    fn user_lookup_by_username_and_email() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let id = insert_user(&conn, "alice");

        let by_name = User::find_by_username(&conn, "alice").unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(by_name.email, "alice@example.com");
        assert!(by_name.password_hash.is_none());

        let by_email = User::find_by_email(&conn, "ALICE@example.com").unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(id));

        assert!(User::find_by_username(&conn, "nobody").unwrap().is_none());
        assert!(matches!(
            User::find(&conn, 404),
            Err(rusqlite::Error::QueryReturnedNoRows)
        ));
    }

    #[test]
    fn password_hash_never_serialized() {
        let user = User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            first_name: String::new(),
            last_name: String::new(),
            bio: None,
            profile_pic: None,
            password_hash: Some("$2b$04$secret".into()),
            date_joined: "2025-01-01T00:00:00.000Z".into(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn job_row_carries_creator_username() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let owner = insert_user(&conn, "recruiter");
        conn.execute(
            "INSERT INTO jobs (title, company_name, location, description, deadline, created_by) \
             VALUES ('Rust Engineer', 'Acme', 'Remote', 'Write Rust', '2030-01-31', ?1)",
            params![owner],
        )
        .unwrap();

        let job = Job::find(&conn, conn.last_insert_rowid()).unwrap();
        assert_eq!(job.created_by, owner);
        assert_eq!(job.created_by_username, "recruiter");
        assert_eq!(job.salary_range, "");
        assert_eq!(job.deadline, "2030-01-31");
    }
}
