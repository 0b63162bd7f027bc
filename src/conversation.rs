use crate::bus::{Event, EventBus};
use crate::chat::{ChatMessage, ConversationSnapshot, SUGGESTED_QUESTIONS};
use crate::responder::Responder;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Simulated typing time before a bot reply lands.
    pub reply_delay: Duration,
    /// Drop pending replies when the widget closes. Off by default: replies
    /// scheduled before closing are still appended.
    pub cancel_on_close: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            reply_delay: DEFAULT_REPLY_DELAY,
            cancel_on_close: false,
        }
    }
}

/// Handle to a scheduled bot reply, used to cancel it before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyTicket(u64);

impl From<u64> for ReplyTicket {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

struct PendingReply {
    ticket: ReplyTicket,
    prompt: String,
    due: Instant,
}

#[derive(Default)]
struct SessionState {
    messages: Vec<ChatMessage>,
    input: String,
    is_open: bool,
    pending: VecDeque<PendingReply>,
    next_ticket: u64,
}

struct Shared {
    id: String,
    state: Mutex<SessionState>,
    wake: Notify,
    responder: Arc<dyn Responder>,
    bus: Arc<EventBus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_all(&self, events: Vec<Event>) {
        for event in events {
            self.bus.publish(event);
        }
    }

    fn message_event(&self, message: ChatMessage) -> Event {
        Event::ChatMessage {
            session_id: self.id.clone(),
            message,
        }
    }

    fn typing_event(&self, is_typing: bool) -> Event {
        Event::Typing {
            session_id: self.id.clone(),
            is_typing,
        }
    }

    /// Appends every reply whose delay has elapsed, in submission order.
    fn deliver_due(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let now = Instant::now();
            while state.pending.front().is_some_and(|p| p.due <= now) {
                let Some(pending) = state.pending.pop_front() else {
                    break;
                };
                let reply = ChatMessage::bot(self.responder.respond(&pending.prompt));
                debug!(session = %self.id, ticket = pending.ticket.0, "Delivering bot reply");
                state.messages.push(reply.clone());
                events.push(self.message_event(reply));
            }
            if !events.is_empty() && state.pending.is_empty() {
                events.push(self.typing_event(false));
            }
        }
        self.publish_all(events);
    }
}

async fn run_replies(shared: Arc<Shared>) {
    loop {
        let next_due = shared.lock().pending.front().map(|p| p.due);
        match next_due {
            Some(due) => {
                tokio::select! {
                    _ = time::sleep_until(due) => shared.deliver_due(),
                    _ = shared.wake.notified() => {}
                }
            }
            None => shared.wake.notified().await,
        }
    }
}

/// One visitor's chat widget: transcript, input buffer and pending replies.
///
/// Replies are scheduled on a background task owned by the session and are
/// delivered even if the widget is closed in the meantime, unless
/// `cancel_on_close` is set. Dropping the session stops the task.
pub struct ConversationSession {
    shared: Arc<Shared>,
    config: ConversationConfig,
    worker: JoinHandle<()>,
}

impl ConversationSession {
    /// Must be called from within a tokio runtime.
    pub fn new(
        id: impl Into<String>,
        config: ConversationConfig,
        responder: Arc<dyn Responder>,
        bus: Arc<EventBus>,
    ) -> Self {
        let shared = Arc::new(Shared {
            id: id.into(),
            state: Mutex::new(SessionState::default()),
            wake: Notify::new(),
            responder,
            bus,
        });
        let worker = tokio::spawn(run_replies(shared.clone()));

        Self {
            shared,
            config,
            worker,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Expands the widget. The first open of a session greets the visitor.
    pub fn open(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.shared.lock();
            if state.is_open {
                return;
            }
            state.is_open = true;
            events.push(Event::Visibility {
                session_id: self.shared.id.clone(),
                is_open: true,
            });

            if state.messages.is_empty() {
                let welcome = ChatMessage::welcome();
                state.messages.push(welcome.clone());
                events.push(self.shared.message_event(welcome));
            }
        }
        self.shared.publish_all(events);
    }

    pub fn close(&self) {
        {
            let mut state = self.shared.lock();
            if !state.is_open {
                return;
            }
            state.is_open = false;
        }
        self.shared.bus.publish(Event::Visibility {
            session_id: self.shared.id.clone(),
            is_open: false,
        });

        if self.config.cancel_on_close {
            let cancelled = self.cancel_pending();
            if cancelled > 0 {
                info!(session = %self.shared.id, cancelled, "Dropped pending replies on close");
            }
        }
    }

    /// Flips the widget and returns whether it is now open.
    pub fn toggle(&self) -> bool {
        if self.is_open() {
            self.close();
            false
        } else {
            self.open();
            true
        }
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.shared.lock().input = text.into();
    }

    /// Copies a suggestion into the input buffer without sending it.
    /// Suggestions are only offered until the visitor has sent something.
    pub fn select_suggested_question(&self, text: &str) -> bool {
        let mut state = self.shared.lock();
        if state.messages.len() > 1 {
            return false;
        }
        state.input = text.to_string();
        true
    }

    pub fn suggestions(&self) -> Vec<String> {
        suggestions_for(&self.shared.lock())
    }

    /// Appends a visitor message and schedules the bot reply.
    ///
    /// Whitespace-only text is ignored and returns `None`.
    pub fn submit_user_message(&self, text: &str) -> Option<ReplyTicket> {
        if text.trim().is_empty() {
            return None;
        }

        let message = ChatMessage::user(text);
        let ticket = {
            let mut state = self.shared.lock();
            state.messages.push(message.clone());
            state.input.clear();

            let ticket = ReplyTicket(state.next_ticket);
            state.next_ticket += 1;
            state.pending.push_back(PendingReply {
                ticket,
                prompt: text.to_string(),
                due: Instant::now() + self.config.reply_delay,
            });
            ticket
        };

        debug!(session = %self.shared.id, ticket = ticket.0, "Scheduled bot reply");
        self.shared.publish_all(vec![
            self.shared.message_event(message),
            self.shared.typing_event(true),
        ]);
        self.shared.wake.notify_one();

        Some(ticket)
    }

    /// Sends whatever is in the input buffer.
    pub fn send_input(&self) -> Option<ReplyTicket> {
        let text = self.shared.lock().input.clone();
        self.submit_user_message(&text)
    }

    pub fn cancel_reply(&self, ticket: ReplyTicket) -> bool {
        let now_idle = {
            let mut state = self.shared.lock();
            let before = state.pending.len();
            state.pending.retain(|p| p.ticket != ticket);
            if state.pending.len() == before {
                return false;
            }
            state.pending.is_empty()
        };

        if now_idle {
            self.shared.bus.publish(self.shared.typing_event(false));
        }
        self.shared.wake.notify_one();
        true
    }

    /// Drops every scheduled reply and returns how many were dropped.
    pub fn cancel_pending(&self) -> usize {
        let cancelled = {
            let mut state = self.shared.lock();
            let count = state.pending.len();
            state.pending.clear();
            count
        };

        if cancelled > 0 {
            self.shared.bus.publish(self.shared.typing_event(false));
            self.shared.wake.notify_one();
        }
        cancelled
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().is_open
    }

    pub fn is_typing(&self) -> bool {
        !self.shared.lock().pending.is_empty()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.lock().messages.clone()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        let state = self.shared.lock();
        ConversationSnapshot {
            session_id: self.shared.id.clone(),
            messages: state.messages.clone(),
            is_typing: !state.pending.is_empty(),
            is_open: state.is_open,
            input: state.input.clone(),
            suggestions: suggestions_for(&state),
        }
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

fn suggestions_for(state: &SessionState) -> Vec<String> {
    if state.messages.len() <= 1 {
        SUGGESTED_QUESTIONS.iter().map(|q| q.to_string()).collect()
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::WELCOME_ID;
    use crate::entity::Sender;
    use crate::responder::{KeywordResponder, Reply};

    fn session_with(config: ConversationConfig) -> (ConversationSession, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let session =
            ConversationSession::new("test", config, Arc::new(KeywordResponder), bus.clone());
        (session, bus)
    }

    fn session() -> ConversationSession {
        session_with(ConversationConfig::default()).0
    }

    #[tokio::test]
    async fn open_twice_greets_once() {
        let session = session();
        session.open();
        session.open();

        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, WELCOME_ID);
        assert_eq!(messages[0].sender, Sender::Bot);
    }

    #[tokio::test]
    async fn reopening_does_not_greet_again() {
        let session = session();
        assert!(session.toggle());
        assert!(!session.toggle());
        assert!(session.toggle());
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn blank_messages_are_ignored() {
        let session = session();
        session.open();
        assert!(session.submit_user_message("").is_none());
        assert!(session.submit_user_message("   ").is_none());
        assert!(session.submit_user_message("\n\t").is_none());
        assert_eq!(session.messages().len(), 1);
        assert!(!session.is_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_arrives_after_delay() {
        let session = session();
        session.open();
        session.set_input("How much is my license worth?");

        assert!(session.send_input().is_some());
        assert!(session.is_typing());
        assert_eq!(session.snapshot().input, "");

        time::sleep(DEFAULT_REPLY_DELAY - Duration::from_millis(10)).await;
        assert_eq!(session.messages().len(), 2);
        assert!(session.is_typing());

        time::sleep(Duration::from_millis(20)).await;
        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].sender, Sender::Bot);
        // "how" outranks "worth"
        assert_eq!(messages[2].text, Reply::SellingProcess.text());
        assert!(!session.is_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn replies_follow_submission_order() {
        let session = session();
        session.open();
        session.submit_user_message("is it secure?");
        time::sleep(Duration::from_millis(100)).await;
        session.submit_user_message("what is the price?");

        time::sleep(DEFAULT_REPLY_DELAY - Duration::from_millis(50)).await;
        // first reply in, second still pending
        assert_eq!(session.messages().len(), 4);
        assert!(session.is_typing());

        time::sleep(Duration::from_millis(200)).await;
        let texts: Vec<String> = session.messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts.len(), 5);
        assert_eq!(texts[3], Reply::Security.text());
        assert_eq!(texts[4], Reply::Valuation.text());
        assert!(!session.is_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_lands_after_close_by_default() {
        let session = session();
        session.open();
        session.submit_user_message("hello");
        session.close();

        time::sleep(DEFAULT_REPLY_DELAY + Duration::from_millis(10)).await;
        assert!(!session.is_open());
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[2].text, Reply::Fallback.text());
    }

    #[tokio::test(start_paused = true)]
    async fn close_can_cancel_pending_replies() {
        let (session, _bus) = session_with(ConversationConfig {
            cancel_on_close: true,
            ..Default::default()
        });
        session.open();
        session.submit_user_message("hello");
        session.close();
        assert!(!session.is_typing());

        time::sleep(DEFAULT_REPLY_DELAY * 2).await;
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_single_reply() {
        let session = session();
        session.open();
        let first = session.submit_user_message("sell").unwrap();
        session.submit_user_message("long?").unwrap();

        assert!(session.cancel_reply(first));
        assert!(!session.cancel_reply(first));
        assert!(session.is_typing());

        time::sleep(DEFAULT_REPLY_DELAY + Duration::from_millis(10)).await;
        let messages = session.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].text, Reply::Turnaround.text());
    }

    #[tokio::test]
    async fn suggestions_only_before_first_message() {
        let session = session();
        session.open();
        assert_eq!(session.suggestions().len(), 2);
        assert!(session.select_suggested_question(SUGGESTED_QUESTIONS[1]));
        assert_eq!(session.snapshot().input, SUGGESTED_QUESTIONS[1]);
        // selecting does not send
        assert_eq!(session.messages().len(), 1);

        session.send_input();
        assert!(session.suggestions().is_empty());
        assert!(!session.select_suggested_question(SUGGESTED_QUESTIONS[0]));
        assert_eq!(session.snapshot().input, "");
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_transcript_events() {
        let (session, bus) = session_with(ConversationConfig::default());
        let mut rx = bus.subscribe();
        session.open();
        session.submit_user_message("safe?");
        time::sleep(DEFAULT_REPLY_DELAY + Duration::from_millis(10)).await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.session_id(), Some("test"));
            kinds.push(match event {
                Event::Visibility { .. } => "visibility",
                Event::ChatMessage { message, .. } => match message.sender {
                    Sender::User => "user",
                    Sender::Bot => "bot",
                },
                Event::Typing { is_typing: true, .. } => "typing",
                Event::Typing { is_typing: false, .. } => "idle",
                _ => "other",
            });
        }
        assert_eq!(kinds, ["visibility", "bot", "user", "typing", "bot", "idle"]);
    }
}
