use serde::{Deserialize, Serialize};

/// One turn of conversation history carried in graph state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum Message {
    System(String),
    Human(String),
    Ai(String),
}

impl Message {
    pub fn content(&self) -> &str {
        match self {
            Message::System(s) | Message::Human(s) | Message::Ai(s) => s,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System(_) => "system",
            Message::Human(_) => "human",
            Message::Ai(_) => "ai",
        }
    }
}

/// Reducer for the `messages` channel: new messages are appended in order.
pub fn add_messages(history: &mut Vec<Message>, new: impl IntoIterator<Item = Message>) {
    history.extend(new);
}
