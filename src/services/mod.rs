pub mod comments;
pub mod error;
pub mod retry;
pub mod voting;
