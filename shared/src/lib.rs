//! Persistence layer for the CommentGuard moderation pipeline: the
//! comment store (status sink) and the shared daily quota counter.

pub mod comments_store;
pub mod quota_store;
