#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use ledger_agent::llm::ChatModel;
use ledger_agent::message::Message;
use ledger_agent::{AgentError, Result};

/// Replies with canned responses in order and records every prompt it saw.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String>>>,
    pub prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(AgentError::Model(message.to_string()))])),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(&self, messages: &[Message]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::Model("script exhausted".to_string())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub const AMAZON_REPLY: &str = "```json\n{\"company_name\": \"Amazon\", \"amount_paid\": 40000, \"product_name\": \"GPUs\", \"num_units\": 5}\n```";
