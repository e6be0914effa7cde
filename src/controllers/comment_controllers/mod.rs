pub mod add_comment;
pub mod comments_stream;
pub mod delete_comment;
pub mod toggle_like;
