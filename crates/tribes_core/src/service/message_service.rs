//! Tribe messages and activity feed.
//!
//! # Invariants
//! - Only active members of live tribes post or read.
//! - Message bodies are trimmed and bounded by `max_message_chars`.
//! - Bodies are never logged.

use crate::model::feed::{TribeActivity, TribeMessage};
use crate::model::tribe::{Membership, TribeId};
use crate::repo::{
    MessageRepository, SqliteMessageRepository, SqliteTribeRepository, TribeRepository,
};
use crate::service::context::ServiceContext;
use crate::service::error::{require_user, TribeError, TribeResult};
use crate::service::permission_service::PermissionService;
use log::info;
use rusqlite::Connection;

pub struct MessageService<'a> {
    conn: &'a Connection,
    ctx: ServiceContext<'a>,
}

impl<'a> MessageService<'a> {
    pub fn new(conn: &'a Connection, ctx: ServiceContext<'a>) -> Self {
        Self { conn, ctx }
    }

    fn messages(&self) -> SqliteMessageRepository<'a> {
        SqliteMessageRepository::new(self.conn)
    }

    fn member(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<Membership> {
        let (_, membership) =
            PermissionService::new(self.conn).require_active_member(user_id, tribe_id)?;
        Ok(membership)
    }

    pub fn post_message(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        body: &str,
    ) -> TribeResult<TribeMessage> {
        let user_id = require_user(user_id)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(TribeError::InvalidMessage(
                "message must not be empty".to_string(),
            ));
        }
        let max_chars = self.ctx.config.max_message_chars;
        if body.chars().count() > max_chars {
            return Err(TribeError::InvalidMessage(format!(
                "message must be at most {max_chars} characters"
            )));
        }
        self.member(user_id, tribe_id)?;

        let message = TribeMessage::new(tribe_id, user_id, body, self.ctx.now_ms());
        self.messages().insert_message(&message)?;
        info!(
            "event=message_post module=message status=ok tribe_id={} message_id={} user_id={}",
            tribe_id, message.id, user_id
        );
        Ok(message)
    }

    /// Newest first.
    pub fn list_messages(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        limit: u32,
    ) -> TribeResult<Vec<TribeMessage>> {
        let user_id = require_user(user_id)?;
        self.member(user_id, tribe_id)?;
        Ok(self.messages().list_messages(tribe_id, limit)?)
    }

    pub fn mark_messages_read(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<()> {
        let user_id = require_user(user_id)?;
        let membership = self.member(user_id, tribe_id)?;
        SqliteTribeRepository::new(self.conn)
            .set_last_read_messages_at(membership.id, self.ctx.now_ms())?;
        Ok(())
    }

    /// Messages by others since the caller joined or last read, whichever is later.
    pub fn unread_message_count(&self, user_id: &str, tribe_id: TribeId) -> TribeResult<u32> {
        let user_id = require_user(user_id)?;
        let membership = self.member(user_id, tribe_id)?;
        let since = membership
            .accepted_at
            .into_iter()
            .chain(membership.last_read_messages_at)
            .max()
            .unwrap_or(0);
        Ok(self
            .messages()
            .count_messages_since(tribe_id, user_id, since)?)
    }

    pub fn list_activities(
        &self,
        user_id: &str,
        tribe_id: TribeId,
        limit: u32,
    ) -> TribeResult<Vec<TribeActivity>> {
        let user_id = require_user(user_id)?;
        self.member(user_id, tribe_id)?;
        Ok(self.messages().list_activities(tribe_id, limit)?)
    }
}
