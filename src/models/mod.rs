pub mod comment_models;
pub mod poll_models;
pub mod source_models;
pub mod vote_record_models;

pub const POLLS: &str = "polls";
pub const POLL_VOTES: &str = "poll_votes";
pub const COMMENTS: &str = "comments";
pub const COMMENT_LIKES: &str = "comment_likes";
pub const USERS: &str = "users";
pub const COURSES: &str = "courses";
pub const EXAMS: &str = "exams";
pub const PAYMENTS: &str = "payments";

/// Key of a per-user idempotency record such as a vote or a like.
pub fn pair_key(entity_id: &str, user_id: &str) -> String {
    format!("{}_{}", entity_id, user_id)
}
