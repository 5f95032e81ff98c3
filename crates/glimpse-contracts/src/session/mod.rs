mod store;
mod turn;

pub use store::{upload_announcement, HistoryPolicy, PinnedImage, Session, SessionState};
pub use turn::{ImageBytes, Role, Turn, ASSISTANT_AVATAR, USER_AVATAR};
