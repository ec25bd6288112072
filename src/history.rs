//! Persisted conversation history access.
//!
//! History lives in a remote store and is consumed through an offset-based
//! paginated fetch contract. The session itself never persists anything; it
//! raises a refetch flag after a run finishes so committed history catches
//! up with what was streamed.

use anyhow::{Context, Result, bail};

use crate::timeline::Message;

/// One page of persisted history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_offset: usize,
}

/// Load status of the persisted history layer.
///
/// The timeline builder shows the greeting only once history is `Ready` and
/// empty; while `Loading`, neither history nor greeting render.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HistoryState {
    #[default]
    Loading,
    Ready(Vec<Message>),
}

impl HistoryState {
    pub fn is_loading(&self) -> bool {
        matches!(self, HistoryState::Loading)
    }
}

/// Paginated history store for a chat.
pub trait HistoryStore {
    /// Fetches one page of messages starting at `offset`, oldest first.
    fn fetch_page(
        &self,
        chat_id: &str,
        offset: usize,
    ) -> impl Future<Output = Result<HistoryPage>> + Send;
}

/// Walks all pages for a chat and returns the full message list.
pub async fn load_history(store: &impl HistoryStore, chat_id: &str) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    let mut offset = 0;

    loop {
        let page = store
            .fetch_page(chat_id, offset)
            .await
            .with_context(|| format!("failed to fetch history page at offset {offset}"))?;
        messages.extend(page.messages);

        if !page.has_more {
            break;
        }
        if page.next_offset <= offset {
            bail!("history pagination did not advance past offset {offset}");
        }
        offset = page.next_offset;
    }

    Ok(messages)
}
