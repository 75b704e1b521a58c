//! Read access to the guild directory (groups and their members).

use async_trait::async_trait;

use crate::{Result, types::Group};

/// Group and membership lookups owned by the directory subsystem.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Active groups of a guild, ordered by name.
    async fn active_groups(&self, guild_id: &str) -> Result<Vec<Group>>;
    /// Active group whose slug is exactly `slug`.
    async fn group_by_slug(&self, guild_id: &str, slug: &str) -> Result<Option<Group>>;
    /// Current member user ids of a group.
    async fn group_members(&self, group_id: i64) -> Result<Vec<String>>;
    /// Active groups a user currently belongs to.
    async fn member_groups(&self, guild_id: &str, user_id: &str) -> Result<Vec<Group>>;
}
