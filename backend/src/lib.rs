//! CommentGuard backend: the asynchronous moderation pipeline that
//! decides whether a newly created comment is published, using a local
//! sensitive-term prefilter, a daily call quota and an external AI
//! classification endpoint.

pub mod ai_client;
pub mod config;
pub mod pipeline;
pub mod prefilter;
pub mod quota;
