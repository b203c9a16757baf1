mod app;
mod jobs;

pub use app::{router, AppState};
