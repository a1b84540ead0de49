//! Upload session bookkeeping: the persisted model, the live tracker, and
//! discovery of session files left behind by earlier runs.

pub mod store;
pub mod tracker;
pub mod types;

pub use store::{SessionStore, session_file_name};
pub use tracker::SessionTracker;
pub use types::{ItemProgress, UploadSession};
