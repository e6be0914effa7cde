pub mod analytics_controllers;
pub mod comment_controllers;
pub mod live_stream;
pub mod poll_controllers;
