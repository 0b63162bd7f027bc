use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::contact::{BusSink, ContactForm, ContactFormSnapshot, ContactSink, LogSink, SubmitOutcome};
use crate::conversation::{ConversationConfig, ConversationSession};
use crate::responder::Responder;
use crate::theme::ThemeController;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Something a visitor owns, stamped with the last time they touched it.
struct Tracked<T> {
    item: T,
    last_active: Instant,
}

impl<T> Tracked<T> {
    fn new(item: T) -> Self {
        Self {
            item,
            last_active: Instant::now(),
        }
    }

    fn touch(&mut self) -> &mut T {
        self.last_active = Instant::now();
        &mut self.item
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns every live chat session and contact form plus the shared
/// collaborators the HTTP layer needs. Visitors rarely say goodbye, so
/// anything left untouched for `idle_timeout` is evicted by the scheduler.
pub struct Manager {
    event_bus: Arc<EventBus>,
    responder: Arc<dyn Responder>,
    conversation: ConversationConfig,
    theme: ThemeController,
    contact_sinks: Vec<Arc<dyn ContactSink>>,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<String, Tracked<Arc<ConversationSession>>>>,
    forms: Mutex<HashMap<String, Tracked<ContactForm>>>,
}

impl Manager {
    pub fn new(
        event_bus: Arc<EventBus>,
        responder: Arc<dyn Responder>,
        conversation: ConversationConfig,
        theme: ThemeController,
        idle_timeout: Duration,
    ) -> Self {
        let contact_sinks: Vec<Arc<dyn ContactSink>> = vec![
            Arc::new(LogSink),
            Arc::new(BusSink::new(event_bus.clone())),
        ];

        Self {
            event_bus,
            responder,
            conversation,
            theme,
            contact_sinks,
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
            forms: Mutex::new(HashMap::new()),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn theme(&self) -> &ThemeController {
        &self.theme
    }

    pub fn create_session(&self) -> Arc<ConversationSession> {
        let id = format!("ses_{}", Uuid::new_v4().simple());
        let session = Arc::new(ConversationSession::new(
            id,
            self.conversation.clone(),
            self.responder.clone(),
            self.event_bus.clone(),
        ));

        let mut sessions = lock(&self.sessions);
        sessions.insert(session.id().to_string(), Tracked::new(session.clone()));
        info!(session = %session.id(), active = sessions.len(), "Chat session started");

        session
    }

    /// Looks up a session and marks it active.
    pub fn session(&self, id: &str) -> Option<Arc<ConversationSession>> {
        let mut sessions = lock(&self.sessions);
        sessions.get_mut(id).map(|tracked| tracked.touch().clone())
    }

    /// Forgets a session. Its pending replies are dropped with it.
    pub fn end_session(&self, id: &str) -> bool {
        let removed = lock(&self.sessions).remove(id);

        match removed {
            Some(tracked) => {
                tracked.item.cancel_pending();
                info!(session = %id, "Chat session ended");
                true
            }
            None => false,
        }
    }

    pub fn create_form(&self) -> ContactFormSnapshot {
        let id = format!("form_{}", Uuid::new_v4().simple());
        let form = ContactForm::new();
        let snapshot = form.snapshot(id.clone());

        let mut forms = lock(&self.forms);
        forms.insert(id, Tracked::new(form));
        debug!(active = forms.len(), "Contact form started");

        snapshot
    }

    /// Runs `f` against a stored form and marks it active. `None` when the
    /// form does not exist.
    pub fn with_form<R>(&self, id: &str, f: impl FnOnce(&mut ContactForm) -> R) -> Option<R> {
        let mut forms = lock(&self.forms);
        forms.get_mut(id).map(|tracked| f(tracked.touch()))
    }

    /// Validates and submits a stored form. The form stays around after a
    /// successful submit, emptied, so the visitor can send another.
    pub fn submit_form(&self, id: &str) -> Option<Result<SubmitOutcome>> {
        self.with_form(id, |form| form.submit(&self.contact_sinks))
    }

    pub fn end_form(&self, id: &str) -> bool {
        lock(&self.forms).remove(id).is_some()
    }

    /// One-shot submission of a complete form.
    pub fn submit_contact(&self, mut form: ContactForm) -> Result<SubmitOutcome> {
        form.submit(&self.contact_sinks)
    }

    /// Drops sessions and forms idle for longer than `idle_timeout`. A session
    /// with a reply still pending is kept. Returns how many were dropped.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let timeout = self.idle_timeout;

        let expired: Vec<Arc<ConversationSession>> = {
            let mut sessions = lock(&self.sessions);
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, t)| t.idle_for(now) >= timeout && !t.item.is_typing())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| sessions.remove(id))
                .map(|t| t.item)
                .collect()
        };

        let forms_dropped = {
            let mut forms = lock(&self.forms);
            let before = forms.len();
            forms.retain(|_, t| t.idle_for(now) < timeout);
            before - forms.len()
        };

        for session in &expired {
            session.cancel_pending();
        }

        let dropped = expired.len() + forms_dropped;
        if dropped > 0 {
            info!(
                sessions = expired.len(),
                forms = forms_dropped,
                "Evicted idle visitors"
            );
        }
        dropped
    }

    /// Sweeps idle state forever. Spawn it next to the server.
    pub async fn start_scheduler(&self) {
        let period = (self.idle_timeout / 4).max(Duration::from_secs(1));
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.sweep_idle();
        }
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Event;
    use crate::contact::Field;
    use crate::responder::KeywordResponder;
    use crate::theme::MemoryPreferences;

    const TTL: Duration = Duration::from_secs(60);

    async fn manager_with(conversation: ConversationConfig) -> Manager {
        let bus = Arc::new(EventBus::new());
        let theme = ThemeController::load(Arc::new(MemoryPreferences::default()), bus.clone(), false)
            .await
            .unwrap();
        Manager::new(bus, Arc::new(KeywordResponder), conversation, theme, TTL)
    }

    async fn manager() -> Manager {
        manager_with(ConversationConfig::default()).await
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let manager = manager().await;
        let a = manager.create_session();
        let b = manager.create_session();
        assert_ne!(a.id(), b.id());

        a.open();
        assert_eq!(a.messages().len(), 1);
        assert!(b.messages().is_empty());
        assert!(manager.session(a.id()).is_some());
    }

    #[tokio::test]
    async fn ended_session_is_gone() {
        let manager = manager().await;
        let id = manager.create_session().id().to_string();
        assert!(manager.end_session(&id));
        assert!(manager.session(&id).is_none());
        assert!(!manager.end_session(&id));
    }

    #[tokio::test]
    async fn contact_submission_signals_success() {
        let manager = manager().await;
        let mut rx = manager.event_bus().subscribe();

        let mut form = ContactForm::new();
        form.set_field(Field::Name, "Jane");
        form.set_field(Field::Email, "jane@co.com");
        form.set_field(Field::Company, "Acme");
        form.set_field(Field::LicenseType, "Oracle");
        form.set_field(Field::Message, "hi");

        let outcome = manager.submit_contact(form).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Submitted(_)));
        assert!(matches!(rx.try_recv().unwrap(), Event::ContactSubmitted(_)));
    }

    #[tokio::test]
    async fn stored_form_keeps_state_between_calls() {
        let manager = manager().await;
        let id = manager.create_form().form_id;

        manager.with_form(&id, |form| form.validate()).unwrap();
        manager
            .with_form(&id, |form| form.set_field(Field::Email, "jane@co.com"))
            .unwrap();

        let snapshot = manager.with_form(&id, |form| form.snapshot(id.as_str())).unwrap();
        assert_eq!(snapshot.fields[&Field::Email], "jane@co.com");
        assert_eq!(snapshot.errors.len(), 4);
        assert!(!snapshot.errors.contains_key(&Field::Email));

        assert!(manager.end_form(&id));
        assert!(manager.submit_form(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_sessions_are_evicted() {
        let manager = manager().await;
        for _ in 0..1000 {
            manager.create_session();
        }
        assert_eq!(manager.session_count(), 1000);

        time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(manager.sweep_idle(), 1000);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_eviction() {
        let manager = manager().await;
        let quiet = manager.create_session().id().to_string();
        let busy = manager.create_session().id().to_string();
        let form = manager.create_form().form_id;

        time::advance(Duration::from_secs(40)).await;
        manager.session(&busy).unwrap();
        time::advance(Duration::from_secs(30)).await;

        assert_eq!(manager.sweep_idle(), 2);
        assert!(manager.session(&quiet).is_none());
        assert!(manager.session(&busy).is_some());
        assert!(manager.with_form(&form, |_| ()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_reply_keeps_session_alive() {
        let manager = manager_with(ConversationConfig {
            reply_delay: TTL * 2,
            ..Default::default()
        })
        .await;
        let session = manager.create_session();
        session.submit_user_message("hello");
        let id = session.id().to_string();
        drop(session);

        time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(manager.sweep_idle(), 0);
        assert_eq!(manager.session_count(), 1);

        manager.session(&id).unwrap().cancel_pending();
        time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(manager.sweep_idle(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_sweeps_in_background() {
        let manager = Arc::new(manager().await);
        manager.create_session();

        let sweeper = manager.clone();
        let handle = tokio::spawn(async move { sweeper.start_scheduler().await });

        time::sleep(TTL + TTL / 2).await;
        assert_eq!(manager.session_count(), 0);
        handle.abort();
    }
}
