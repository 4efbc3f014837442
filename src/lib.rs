pub mod audio;
pub mod capture;
pub mod config;
pub mod identity;
pub mod reply;
pub mod speech;
pub mod stt;
pub mod ui;

mod app;

pub use app::*;
pub use capture::{CaptureJob, CaptureMessage};
pub use reply::{ReplyJob, ReplyJobMessage};
