use std::fmt;
use std::sync::Arc;

use serde::Serialize;

pub const USER_AVATAR: &str = "👤";
pub const ASSISTANT_AVATAR: &str = "🤖";

/// Raw image bytes shared between the pinned image and the turns showing it.
pub type ImageBytes = Arc<[u8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn avatar(&self) -> &'static str {
        match self {
            Role::User => USER_AVATAR,
            Role::Assistant => ASSISTANT_AVATAR,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat message. Fields are private so a turn cannot change once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    content: String,
    image: Option<ImageBytes>,
    avatar: Option<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: None,
            avatar: Some(USER_AVATAR.to_string()),
        }
    }

    pub fn user_with_image(content: impl Into<String>, image: ImageBytes) -> Self {
        Self {
            image: Some(image),
            ..Self::user(content)
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image: None,
            avatar: Some(ASSISTANT_AVATAR.to_string()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn image(&self) -> Option<&ImageBytes> {
        self.image.as_ref()
    }

    pub fn avatar(&self) -> Option<&str> {
        self.avatar.as_deref()
    }
}
