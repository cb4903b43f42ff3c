//! Many-to-many "membership" tables: likes, interest markers and follows.
//!
//! Every join table pairs a *target* (the thing being liked, followed, ...)
//! with a *member* user, under a unique (target, member) index.

use rusqlite::{params, Connection};

use crate::db::is_unique_violation;
use crate::db::models::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinTable {
    PostLikes,
    CommentLikes,
    JobInterest,
    EventInterest,
    /// target = the followed user, member = the follower
    Follows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Added,
    Removed,
}

impl JoinTable {
    fn table(self) -> &'static str {
        match self {
            JoinTable::PostLikes => "post_likes",
            JoinTable::CommentLikes => "comment_likes",
            JoinTable::JobInterest => "job_interests",
            JoinTable::EventInterest => "event_interests",
            JoinTable::Follows => "user_follows",
        }
    }

    fn target_column(self) -> &'static str {
        match self {
            JoinTable::PostLikes => "post_id",
            JoinTable::CommentLikes => "comment_id",
            JoinTable::JobInterest => "job_id",
            JoinTable::EventInterest => "event_id",
            JoinTable::Follows => "following_id",
        }
    }

    fn member_column(self) -> &'static str {
        match self {
            JoinTable::Follows => "follower_id",
            _ => "user_id",
        }
    }

    /// Post likes list newest first; everything else in insertion order.
    fn member_order(self) -> &'static str {
        match self {
            JoinTable::PostLikes => "m.created_at DESC, m.id DESC",
            _ => "m.id ASC",
        }
    }
}

/// Remove the membership if present, otherwise create it.
///
/// Delete-first keeps this a single statement in the common unlike path. When a
/// concurrent toggle inserts the same pair between our delete and insert, the
/// unique index rejects the duplicate and the row exists exactly once, which is
/// reported as `Added`.
pub fn toggle(
    conn: &Connection,
    table: JoinTable,
    target_id: i64,
    member_id: i64,
) -> rusqlite::Result<Toggle> {
    let removed = conn.execute(
        &format!(
            "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
            table.table(),
            table.target_column(),
            table.member_column()
        ),
        params![target_id, member_id],
    )?;
    if removed > 0 {
        return Ok(Toggle::Removed);
    }

    let inserted = conn.execute(
        &format!(
            "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
            table.table(),
            table.target_column(),
            table.member_column()
        ),
        params![target_id, member_id],
    );
    match inserted {
        Ok(_) => Ok(Toggle::Added),
        Err(e) if is_unique_violation(&e) => Ok(Toggle::Added),
        Err(e) => Err(e),
    }
}

pub fn is_member(
    conn: &Connection,
    table: JoinTable,
    target_id: i64,
    member_id: i64,
) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) > 0 FROM {} WHERE {} = ?1 AND {} = ?2",
            table.table(),
            table.target_column(),
            table.member_column()
        ),
        params![target_id, member_id],
        |row| row.get(0),
    )
}

pub fn count(conn: &Connection, table: JoinTable, target_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1",
            table.table(),
            table.target_column()
        ),
        params![target_id],
        |row| row.get(0),
    )
}

/// Users holding a membership on `target_id` (likers, interested users, followers).
pub fn members(conn: &Connection, table: JoinTable, target_id: i64) -> rusqlite::Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} m JOIN users u ON u.id = m.{} WHERE m.{} = ?1 ORDER BY {}",
        User::COLUMNS,
        table.table(),
        table.member_column(),
        table.target_column(),
        table.member_order()
    ))?;
    let users = stmt
        .query_map(params![target_id], User::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// Users that `user_id` follows.
pub fn following(conn: &Connection, user_id: i64) -> rusqlite::Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM user_follows m JOIN users u ON u.id = m.following_id \
         WHERE m.follower_id = ?1 ORDER BY m.id ASC",
        User::COLUMNS
    ))?;
    let users = stmt
        .query_map(params![user_id], User::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}
