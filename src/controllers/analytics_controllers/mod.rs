pub mod analytics_socket;
pub mod dashboard_stream;
