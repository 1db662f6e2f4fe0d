use serde::{Deserialize, Serialize};

/// Unique identifier for a notification recipient
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientId(pub String);

impl RecipientId {
    /// Returns the raw recipient identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecipientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecipientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The addressed user and the contact points channels may use.
///
/// Every contact field is optional; a missing field simply makes the
/// corresponding channel inapplicable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Stable recipient identity.
    pub id: RecipientId,
    /// Human-readable name used in logs.
    pub username: String,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number in E.164 form.
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Chat-bot identifier (Telegram chat id).
    #[serde(default)]
    pub chat_id: Option<String>,
}

impl Recipient {
    /// Creates a recipient with no contact points.
    pub fn new(id: impl Into<RecipientId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: None,
            phone_number: None,
            chat_id: None,
        }
    }

    /// Sets the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the phone number.
    pub fn with_phone_number(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    /// Sets the chat-bot identifier.
    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Email address, if present and non-blank.
    pub fn email(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    /// Phone number, if present and non-blank.
    pub fn phone_number(&self) -> Option<&str> {
        non_blank(self.phone_number.as_deref())
    }

    /// Chat-bot identifier, if present and non-blank.
    pub fn chat_id(&self) -> Option<&str> {
        non_blank(self.chat_id.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
