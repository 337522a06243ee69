//! User interaction seam.
//!
//! Destructive operations ask before acting and report their outcome through
//! an [`Interaction`]. Front ends supply their own; [`AutoConfirm`] accepts
//! everything and logs notices, which is what the HTTP surface and tests use.

use tracing::{info, warn};

use crate::models::Id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirm {
    DeleteMessage(Id),
    DeleteChat { with: String },
    BlockUser { username: String },
    UnblockUser { username: String },
}

impl Confirm {
    pub fn prompt(&self) -> String {
        match self {
            Confirm::DeleteMessage(_) => "Are you sure you want to delete this message?".to_string(),
            Confirm::DeleteChat { with } => format!("Delete your conversation with {with}?"),
            Confirm::BlockUser { username } => {
                format!("Block {username}? They will no longer be able to message you.")
            }
            Confirm::UnblockUser { username } => format!("Unblock {username}?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Failure(String),
}

pub trait Interaction: Send + Sync {
    fn confirm(&self, question: &Confirm) -> bool;
    fn notify(&self, notice: Notice);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl Interaction for AutoConfirm {
    fn confirm(&self, question: &Confirm) -> bool {
        info!(prompt = %question.prompt(), "auto-confirmed");
        true
    }

    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Success(text) => info!(%text, "notice"),
            Notice::Failure(text) => warn!(%text, "notice"),
        }
    }
}
