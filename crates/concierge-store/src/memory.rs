//! In-memory store for tests.
//!
//! Mirrors the semantics of [`crate::RocksStore`] (id sequences, the one-open-per-user
//! constraint, ordered history) and adds failure injection so callers can exercise
//! their store-outage paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::{ConsultationId, MessageId, Role, StaffId, StaffStatus, UserId};
use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::types::{
    Consultation, ConsultationFilter, ConsultationPage, ConsultationStatus, Message, MessagePage,
    MessageStatus, NewConsultation, NewMessage, Page, Staff, StaffFilter,
};
use crate::Store;

#[derive(Default)]
struct State {
    consultations: BTreeMap<ConsultationId, Consultation>,
    messages: BTreeMap<MessageId, Message>,
    staff: BTreeMap<StaffId, Staff>,
    next_consultation: u64,
    next_message: u64,
}

/// A `Store` backed by ordered maps behind a mutex.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_messages: AtomicBool,
    fail_all: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with staff records.
    #[must_use]
    pub fn with_staff(staff: impl IntoIterator<Item = Staff>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            for s in staff {
                state.staff.insert(s.id, s);
            }
        }
        store
    }

    /// Make every message write fail until reset.
    pub fn fail_message_writes(&self, fail: bool) {
        self.fail_messages.store(fail, Ordering::SeqCst);
    }

    /// Make every operation fail until reset.
    pub fn fail_everything(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Number of messages committed so far, across all consultations.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }

    fn check(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected failure".to_string()));
        }
        Ok(())
    }

    fn check_message_write(&self) -> Result<()> {
        self.check()?;
        if self.fail_messages.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected message write failure".to_string()));
        }
        Ok(())
    }
}

fn open_for_user(state: &State, user_id: UserId) -> Option<&Consultation> {
    state
        .consultations
        .values()
        .find(|c| c.user_id == user_id && c.status.is_open())
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_consultation(&self, new: NewConsultation) -> Result<Consultation> {
        self.check()?;
        let mut state = self.state.lock();
        if open_for_user(&state, new.user_id).is_some() {
            return Err(StoreError::Conflict(format!(
                "user {} already has an open consultation",
                new.user_id
            )));
        }
        state.next_consultation += 1;
        let consultation = new.into_consultation(ConsultationId::new(state.next_consultation));
        state
            .consultations
            .insert(consultation.id, consultation.clone());
        Ok(consultation)
    }

    async fn get_consultation(&self, id: ConsultationId) -> Result<Option<Consultation>> {
        self.check()?;
        Ok(self.state.lock().consultations.get(&id).cloned())
    }

    async fn update_consultation(&self, consultation: &Consultation) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock();
        let slot = state
            .consultations
            .get_mut(&consultation.id)
            .ok_or(StoreError::NotFound)?;
        *slot = consultation.clone();
        Ok(())
    }

    async fn get_active_consultation_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Consultation>> {
        self.check()?;
        Ok(open_for_user(&self.state.lock(), user_id).cloned())
    }

    async fn list_consultations(
        &self,
        filter: &ConsultationFilter,
        page: Page,
    ) -> Result<ConsultationPage> {
        self.check()?;
        let state = self.state.lock();
        let matching: Vec<&Consultation> = state
            .consultations
            .values()
            .rev()
            .filter(|c| filter.matches(c))
            .collect();
        Ok(ConsultationPage {
            total: matching.len() as u64,
            consultations: matching
                .into_iter()
                .skip(page.offset())
                .take(page.limit as usize)
                .cloned()
                .collect(),
            page: page.page,
            limit: page.limit,
        })
    }

    async fn count_active_consultations(&self, staff_id: StaffId) -> Result<u32> {
        self.check()?;
        let count = self
            .state
            .lock()
            .consultations
            .values()
            .filter(|c| c.status == ConsultationStatus::Active && c.staff_id == Some(staff_id))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        self.check_message_write()?;
        let mut state = self.state.lock();
        state.next_message += 1;
        let message = new.into_message(MessageId::new(state.next_message));
        state.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        self.check()?;
        Ok(self.state.lock().messages.get(&id).cloned())
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> Result<Message> {
        self.check_message_write()?;
        let mut state = self.state.lock();
        let message = state.messages.get_mut(&id).ok_or(StoreError::NotFound)?;
        message.status = status;
        Ok(message.clone())
    }

    async fn list_messages(
        &self,
        consultation_id: ConsultationId,
        page: Page,
    ) -> Result<MessagePage> {
        self.check()?;
        let state = self.state.lock();
        let all: Vec<&Message> = state
            .messages
            .values()
            .filter(|m| m.consultation_id == consultation_id)
            .collect();
        Ok(MessagePage {
            total: all.len() as u64,
            messages: all
                .into_iter()
                .skip(page.offset())
                .take(page.limit as usize)
                .cloned()
                .collect(),
            page: page.page,
            limit: page.limit,
        })
    }

    async fn mark_messages_read(
        &self,
        consultation_id: ConsultationId,
        reader: Role,
        ids: Option<Vec<MessageId>>,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>> {
        self.check_message_write()?;
        let wanted: Option<HashSet<MessageId>> = ids.map(|ids| ids.into_iter().collect());
        let mut state = self.state.lock();
        let mut changed = Vec::new();
        for message in state
            .messages
            .values_mut()
            .filter(|m| m.consultation_id == consultation_id)
        {
            let selected = wanted.as_ref().map_or(true, |w| w.contains(&message.id));
            if selected && message.is_unread_for(reader) {
                message.read_at = Some(at);
                changed.push(message.id);
            }
        }
        Ok(changed)
    }

    async fn count_unread(&self, consultation_id: ConsultationId, reader: Role) -> Result<u32> {
        self.check()?;
        let count = self
            .state
            .lock()
            .messages
            .values()
            .filter(|m| m.consultation_id == consultation_id && m.is_unread_for(reader))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn put_staff(&self, staff: &Staff) -> Result<()> {
        self.check()?;
        self.state.lock().staff.insert(staff.id, staff.clone());
        Ok(())
    }

    async fn get_staff(&self, id: StaffId) -> Result<Option<Staff>> {
        self.check()?;
        Ok(self.state.lock().staff.get(&id).cloned())
    }

    async fn get_available_staff(&self, filter: &StaffFilter) -> Result<Vec<Staff>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .staff
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn update_staff_status(&self, id: StaffId, status: StaffStatus) -> Result<Staff> {
        self.check()?;
        let mut state = self.state.lock();
        let staff = state.staff.get_mut(&id).ok_or(StoreError::NotFound)?;
        staff.status = status;
        staff.updated_at = Utc::now();
        Ok(staff.clone())
    }
}
