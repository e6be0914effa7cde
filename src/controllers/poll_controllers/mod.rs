pub mod cast_vote;
pub mod check_vote;
pub mod close_poll;
pub mod create_poll;
pub mod delete_poll;
pub mod models;
pub mod polls_stream;
