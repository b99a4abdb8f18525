//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! `RocksDB` calls are blocking, so every trait method hops onto the blocking pool.
//! Read-modify-write sequences (id allocation, index maintenance) run under a single
//! write lock; plain reads do not take it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::{ConsultationId, MessageId, Role, StaffId, StaffStatus, UserId};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf, seq};
use crate::types::{
    Consultation, ConsultationFilter, ConsultationPage, ConsultationStatus, Message, MessagePage,
    MessageStatus, NewConsultation, NewMessage, Page, Staff, StaffFilter,
};
use crate::Store;

/// RocksDB-backed storage implementation.
#[derive(Clone)]
pub struct RocksStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: DBWithThreadMode<MultiThreaded>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Run a synchronous database operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Database(format!("storage task failed: {e}")))?
    }
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl Inner {
    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect every key in `cf_name` starting with `prefix`.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push(key);
        }
        Ok(out)
    }

    /// Reserve the next value of a sequence inside `batch`.
    fn next_id(&self, batch: &mut WriteBatch, name: &[u8]) -> Result<u64> {
        let cf = self.cf(cf::META)?;
        let current = match self.db.get_cf(&cf, name).map_err(db_err)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::Database(format!("corrupt sequence {}", String::from_utf8_lossy(name)))
                })?;
                u64::from_be_bytes(arr)
            }
            None => 0,
        };
        let next = current + 1;
        batch.put_cf(&cf, name, next.to_be_bytes());
        Ok(next)
    }

    // =========================================================================
    // Consultation Operations
    // =========================================================================

    fn create_consultation(&self, new: NewConsultation) -> Result<Consultation> {
        let _guard = self.write_lock.lock();

        let cf_open = self.cf(cf::OPEN_BY_USER)?;
        let open_key = keys::open_by_user_key(new.user_id);
        if self.db.get_cf(&cf_open, &open_key).map_err(db_err)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "user {} already has an open consultation",
                new.user_id
            )));
        }

        let mut batch = WriteBatch::default();
        let id = ConsultationId::new(self.next_id(&mut batch, seq::CONSULTATION)?);
        let consultation = new.into_consultation(id);
        self.write_consultation(&mut batch, None, &consultation)?;
        self.db.write(batch).map_err(db_err)?;

        Ok(consultation)
    }

    fn update_consultation(&self, consultation: &Consultation) -> Result<()> {
        let _guard = self.write_lock.lock();

        let old: Consultation = self
            .get(cf::CONSULTATIONS, &keys::consultation_key(consultation.id))?
            .ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        self.write_consultation(&mut batch, Some(&old), consultation)?;
        self.db.write(batch).map_err(db_err)?;
        Ok(())
    }

    /// Stage a consultation record and reconcile its indexes against `old`.
    fn write_consultation(
        &self,
        batch: &mut WriteBatch,
        old: Option<&Consultation>,
        new: &Consultation,
    ) -> Result<()> {
        let cf_main = self.cf(cf::CONSULTATIONS)?;
        let cf_open = self.cf(cf::OPEN_BY_USER)?;
        let cf_by_staff = self.cf(cf::ACTIVE_BY_STAFF)?;

        batch.put_cf(&cf_main, keys::consultation_key(new.id), Self::serialize(new)?);

        let open_key = keys::open_by_user_key(new.user_id);
        if new.status.is_open() {
            batch.put_cf(&cf_open, &open_key, new.id.to_be_bytes());
        } else if old.is_some_and(|o| o.status.is_open()) {
            batch.delete_cf(&cf_open, &open_key);
        }

        if let Some(old) = old {
            if let (ConsultationStatus::Active, Some(staff)) = (old.status, old.staff_id) {
                batch.delete_cf(&cf_by_staff, keys::staff_consultation_key(staff, old.id));
            }
        }
        if let (ConsultationStatus::Active, Some(staff)) = (new.status, new.staff_id) {
            batch.put_cf(&cf_by_staff, keys::staff_consultation_key(staff, new.id), []);
        }

        Ok(())
    }

    fn get_active_consultation_for_user(&self, user_id: UserId) -> Result<Option<Consultation>> {
        let cf_open = self.cf(cf::OPEN_BY_USER)?;
        let Some(raw) = self
            .db
            .get_cf(&cf_open, keys::open_by_user_key(user_id))
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        let id = ConsultationId::from_be_slice(&raw)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        self.get(cf::CONSULTATIONS, &keys::consultation_key(id))
    }

    fn count_active_consultations(&self, staff_id: StaffId) -> Result<u32> {
        let entries = self.scan_prefix(cf::ACTIVE_BY_STAFF, &keys::staff_prefix(staff_id))?;
        Ok(u32::try_from(entries.len()).unwrap_or(u32::MAX))
    }

    /// Walk the primary records from the highest id down, keeping one page of matches.
    fn list_consultations(
        &self,
        filter: &ConsultationFilter,
        page: Page,
    ) -> Result<ConsultationPage> {
        let cf = self.cf(cf::CONSULTATIONS)?;
        let skip = page.offset() as u64;
        let mut total = 0u64;
        let mut consultations = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            let (_, value) = item.map_err(db_err)?;
            let consultation: Consultation = Self::deserialize(&value)?;
            if !filter.matches(&consultation) {
                continue;
            }
            if total >= skip && consultations.len() < page.limit as usize {
                consultations.push(consultation);
            }
            total += 1;
        }

        Ok(ConsultationPage {
            consultations,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    // =========================================================================
    // Message Operations
    // =========================================================================

    fn create_message(&self, new: NewMessage) -> Result<Message> {
        let _guard = self.write_lock.lock();

        let cf_messages = self.cf(cf::MESSAGES)?;
        let cf_index = self.cf(cf::MESSAGES_BY_CONSULTATION)?;

        let mut batch = WriteBatch::default();
        let id = MessageId::new(self.next_id(&mut batch, seq::MESSAGE)?);
        let message = new.into_message(id);

        batch.put_cf(&cf_messages, keys::message_key(id), Self::serialize(&message)?);
        batch.put_cf(
            &cf_index,
            keys::consultation_message_key(message.consultation_id, id),
            [],
        );
        self.db.write(batch).map_err(db_err)?;

        Ok(message)
    }

    fn put_message(&self, message: &Message) -> Result<()> {
        let cf = self.cf(cf::MESSAGES)?;
        self.db
            .put_cf(&cf, keys::message_key(message.id), Self::serialize(message)?)
            .map_err(db_err)
    }

    fn update_message_status(&self, id: MessageId, status: MessageStatus) -> Result<Message> {
        let _guard = self.write_lock.lock();

        let mut message: Message = self
            .get(cf::MESSAGES, &keys::message_key(id))?
            .ok_or(StoreError::NotFound)?;
        message.status = status;
        self.put_message(&message)?;
        Ok(message)
    }

    fn consultation_messages(&self, consultation_id: ConsultationId) -> Result<Vec<Message>> {
        let index = self.scan_prefix(
            cf::MESSAGES_BY_CONSULTATION,
            &keys::consultation_prefix(consultation_id),
        )?;

        let mut messages = Vec::with_capacity(index.len());
        for key in index {
            let id = keys::extract_message_id(&key)?;
            if let Some(message) = self.get(cf::MESSAGES, &keys::message_key(id))? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    fn list_messages(&self, consultation_id: ConsultationId, page: Page) -> Result<MessagePage> {
        let index = self.scan_prefix(
            cf::MESSAGES_BY_CONSULTATION,
            &keys::consultation_prefix(consultation_id),
        )?;
        let total = index.len() as u64;

        let mut messages = Vec::new();
        for key in index.iter().skip(page.offset()).take(page.limit as usize) {
            let id = keys::extract_message_id(key)?;
            if let Some(message) = self.get(cf::MESSAGES, &keys::message_key(id))? {
                messages.push(message);
            }
        }

        Ok(MessagePage {
            messages,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    fn mark_messages_read(
        &self,
        consultation_id: ConsultationId,
        reader: Role,
        ids: Option<Vec<MessageId>>,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>> {
        let _guard = self.write_lock.lock();

        let wanted: Option<HashSet<MessageId>> = ids.map(|ids| ids.into_iter().collect());
        let cf_messages = self.cf(cf::MESSAGES)?;
        let mut batch = WriteBatch::default();
        let mut changed = Vec::new();

        for mut message in self.consultation_messages(consultation_id)? {
            let selected = wanted.as_ref().map_or(true, |w| w.contains(&message.id));
            if selected && message.is_unread_for(reader) {
                message.read_at = Some(at);
                batch.put_cf(&cf_messages, keys::message_key(message.id), Self::serialize(&message)?);
                changed.push(message.id);
            }
        }

        if !changed.is_empty() {
            self.db.write(batch).map_err(db_err)?;
        }
        Ok(changed)
    }

    fn count_unread(&self, consultation_id: ConsultationId, reader: Role) -> Result<u32> {
        let count = self
            .consultation_messages(consultation_id)?
            .iter()
            .filter(|m| m.is_unread_for(reader))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    // =========================================================================
    // Staff Operations
    // =========================================================================

    fn put_staff_locked(&self, staff: &Staff) -> Result<()> {
        let cf_staff = self.cf(cf::STAFF)?;
        let cf_by_status = self.cf(cf::STAFF_BY_STATUS)?;

        let key = keys::staff_key(staff.id);
        let old_status = self.get::<Staff>(cf::STAFF, &key)?.map(|s| s.status);

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_staff, &key, Self::serialize(staff)?);
        if let Some(old) = old_status {
            if old != staff.status {
                batch.delete_cf(&cf_by_status, keys::status_staff_key(old.as_u8(), staff.id));
            }
        }
        batch.put_cf(
            &cf_by_status,
            keys::status_staff_key(staff.status.as_u8(), staff.id),
            [],
        );

        self.db.write(batch).map_err(db_err)
    }

    fn put_staff(&self, staff: &Staff) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.put_staff_locked(staff)
    }

    fn get_available_staff(&self, filter: &StaffFilter) -> Result<Vec<Staff>> {
        let mut staff = Vec::new();
        for status in &filter.statuses {
            for key in self.scan_prefix(cf::STAFF_BY_STATUS, &[status.as_u8()])? {
                let id = keys::extract_staff_id(&key)?;
                if let Some(record) = self.get::<Staff>(cf::STAFF, &keys::staff_key(id))? {
                    if filter.matches(&record) {
                        staff.push(record);
                    }
                }
            }
        }
        staff.sort_by_key(|s| s.id);
        Ok(staff)
    }

    fn update_staff_status(&self, id: StaffId, status: StaffStatus) -> Result<Staff> {
        let _guard = self.write_lock.lock();

        let mut staff: Staff = self
            .get(cf::STAFF, &keys::staff_key(id))?
            .ok_or(StoreError::NotFound)?;
        staff.status = status;
        staff.updated_at = Utc::now();
        self.put_staff_locked(&staff)?;
        Ok(staff)
    }
}

#[async_trait]
impl Store for RocksStore {
    async fn create_consultation(&self, new: NewConsultation) -> Result<Consultation> {
        self.blocking(move |db| db.create_consultation(new)).await
    }

    async fn get_consultation(&self, id: ConsultationId) -> Result<Option<Consultation>> {
        self.blocking(move |db| db.get(cf::CONSULTATIONS, &keys::consultation_key(id)))
            .await
    }

    async fn update_consultation(&self, consultation: &Consultation) -> Result<()> {
        let consultation = consultation.clone();
        self.blocking(move |db| db.update_consultation(&consultation))
            .await
    }

    async fn get_active_consultation_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Consultation>> {
        self.blocking(move |db| db.get_active_consultation_for_user(user_id))
            .await
    }

    async fn count_active_consultations(&self, staff_id: StaffId) -> Result<u32> {
        self.blocking(move |db| db.count_active_consultations(staff_id))
            .await
    }

    async fn list_consultations(
        &self,
        filter: &ConsultationFilter,
        page: Page,
    ) -> Result<ConsultationPage> {
        let filter = *filter;
        self.blocking(move |db| db.list_consultations(&filter, page))
            .await
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        self.blocking(move |db| db.create_message(new)).await
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        self.blocking(move |db| db.get(cf::MESSAGES, &keys::message_key(id)))
            .await
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> Result<Message> {
        self.blocking(move |db| db.update_message_status(id, status))
            .await
    }

    async fn list_messages(
        &self,
        consultation_id: ConsultationId,
        page: Page,
    ) -> Result<MessagePage> {
        self.blocking(move |db| db.list_messages(consultation_id, page))
            .await
    }

    async fn mark_messages_read(
        &self,
        consultation_id: ConsultationId,
        reader: Role,
        ids: Option<Vec<MessageId>>,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>> {
        self.blocking(move |db| db.mark_messages_read(consultation_id, reader, ids, at))
            .await
    }

    async fn count_unread(&self, consultation_id: ConsultationId, reader: Role) -> Result<u32> {
        self.blocking(move |db| db.count_unread(consultation_id, reader))
            .await
    }

    async fn put_staff(&self, staff: &Staff) -> Result<()> {
        let staff = staff.clone();
        self.blocking(move |db| db.put_staff(&staff)).await
    }

    async fn get_staff(&self, id: StaffId) -> Result<Option<Staff>> {
        self.blocking(move |db| db.get(cf::STAFF, &keys::staff_key(id)))
            .await
    }

    async fn get_available_staff(&self, filter: &StaffFilter) -> Result<Vec<Staff>> {
        let filter = filter.clone();
        self.blocking(move |db| db.get_available_staff(&filter))
            .await
    }

    async fn update_staff_status(&self, id: StaffId, status: StaffStatus) -> Result<Staff> {
        self.blocking(move |db| db.update_staff_status(id, status))
            .await
    }
}
