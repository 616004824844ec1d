//! UHF inventory and tag memory operations.
//!
//! An inventory is one command followed by a stream of UHF list records.
//! The engine subscribes to the device's records before the command goes
//! out, so no list can be missed, and collects tags in arrival order until
//! a list carries the end-of-inventory flag or the deadline passes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::commands::CommandHandler;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
use crate::protocol::{InventoryParams, MemoryAccess, Opcode, encode_lock};
use crate::types::{
    DeviceIdentity, LockAction, LockMask, LockTarget, QueryParameter, RecordPayload,
    SelectParameter, UhfDataType, UhfTagResult,
};

/// Default time an inventory may take from command to end marker.
pub const DEFAULT_INVENTORY_TIMEOUT: Duration = Duration::from_secs(5);

/// Tags collected by one inventory round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryReport {
    /// Tags in arrival order.
    pub tags: Vec<UhfTagResult>,
    /// False if the deadline passed before the end-of-inventory marker.
    pub completed: bool,
}

/// Runs UHF operations against one reader.
#[derive(Debug, Clone)]
pub struct UhfEngine {
    commands: CommandHandler,
    dispatcher: EventDispatcher,
    device: Arc<DeviceIdentity>,
    inventory_timeout: Duration,
    /// Records of two overlapping inventories would be indistinguishable.
    inventory: Arc<tokio::sync::Mutex<()>>,
}

impl UhfEngine {
    /// Creates an engine for `device`.
    #[must_use]
    pub fn new(
        commands: CommandHandler,
        dispatcher: EventDispatcher,
        device: Arc<DeviceIdentity>,
        inventory_timeout: Duration,
    ) -> Self {
        Self {
            commands,
            dispatcher,
            device,
            inventory_timeout,
            inventory: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Returns the inventory deadline.
    #[must_use]
    pub const fn inventory_timeout(&self) -> Duration {
        self.inventory_timeout
    }

    /// Selects the record shape for following inventories.
    pub async fn set_data_type(&self, data_type: UhfDataType) -> Result<()> {
        self.commands.uhf_set_data_type(data_type).await
    }

    /// Runs one inventory round.
    ///
    /// Every tag in the report has the shape of the session's data type.
    /// With duplicate suppression enabled, only the first sighting of an
    /// EPC is kept.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if select or query fields are out of range
    /// - `InventoryShape` if the reader reports another record shape
    /// - `Disconnected` if the link drops mid-inventory
    /// - the vendor error if the reader rejects the command
    pub async fn inventory(
        &self,
        select: Option<SelectParameter>,
        query: QueryParameter,
    ) -> Result<InventoryReport> {
        let settings = self.commands.settings();
        let params = InventoryParams {
            select,
            query,
            data_type: settings.uhf_data_type,
        }
        .encode()?;

        let _round = self.inventory.lock().await;
        let mut records = self.dispatcher.subscribe(Some(
            EventFilter::kinds(vec![EventKind::Data, EventKind::ConnectionChanged])
                .for_device(self.device.id.clone()),
        ));
        let deadline = Instant::now() + self.inventory_timeout;

        self.commands.execute(Opcode::UhfInventory, params).await?;
        tracing::debug!(
            "{}: inventory started ({:?})",
            self.device,
            settings.uhf_data_type
        );

        let mut collector = Collector::new(settings.uhf_data_type, settings.suppress_duplicates);
        let completed = collect(&mut records, &mut collector, deadline).await?;
        if !completed {
            tracing::warn!(
                "{}: inventory timed out after {} tags",
                self.device,
                collector.tags.len()
            );
        }
        Ok(InventoryReport {
            tags: collector.tags,
            completed,
        })
    }

    /// Reads `word_count` 16-bit words from a memory bank.
    pub async fn read_memory(&self, access: MemoryAccess, word_count: u8) -> Result<Bytes> {
        let params = access.encode_read(word_count)?;
        let body = self
            .commands
            .execute(Opcode::UhfReadMemory, params)
            .await?
            .unwrap_or_default();
        let expected = usize::from(word_count) * 2;
        if body.len() != expected {
            tracing::warn!(
                "{}: read returned {} bytes, expected {}",
                self.device,
                body.len(),
                expected
            );
            return Err(Error::UnexpectedResponse {
                opcode: Opcode::UhfReadMemory as u8,
            });
        }
        Ok(body)
    }

    /// Writes whole words to a memory bank.
    pub async fn write_memory(&self, access: MemoryAccess, data: &[u8]) -> Result<()> {
        let params = access.encode_write(data)?;
        self.commands.execute(Opcode::UhfWriteMemory, params).await?;
        Ok(())
    }

    /// Applies one lock action to one field.
    pub async fn lock(
        &self,
        access_password: u32,
        target: LockTarget,
        action: LockAction,
    ) -> Result<()> {
        self.lock_mask(access_password, LockMask::for_action(target, action))
            .await
    }

    /// Sends an explicit lock mask.
    pub async fn lock_mask(&self, access_password: u32, mask: LockMask) -> Result<()> {
        tracing::debug!("{}: lock bits 0x{:05X}", self.device, mask.pack());
        self.commands
            .execute(Opcode::UhfLock, encode_lock(access_password, &mask))
            .await?;
        Ok(())
    }
}

/// Accumulates the tags of one inventory.
struct Collector {
    data_type: UhfDataType,
    seen: Option<HashSet<Bytes>>,
    tags: Vec<UhfTagResult>,
}

impl Collector {
    fn new(data_type: UhfDataType, suppress_duplicates: bool) -> Self {
        Self {
            data_type,
            seen: suppress_duplicates.then(HashSet::new),
            tags: Vec::new(),
        }
    }

    /// Adds the tags of one list; returns true at the end marker.
    fn push(&mut self, data_type: UhfDataType, tags: &[UhfTagResult], end: bool) -> Result<bool> {
        if data_type != self.data_type {
            return Err(Error::InventoryShape {
                expected: self.data_type,
                actual: data_type,
            });
        }
        for tag in tags {
            if let Some(seen) = self.seen.as_mut() {
                if !seen.insert(tag.epc.clone()) {
                    continue;
                }
            }
            self.tags.push(tag.clone());
        }
        Ok(end)
    }
}

/// Drains UHF lists until the end marker; returns false on deadline.
async fn collect(
    records: &mut Subscription,
    collector: &mut Collector,
    deadline: Instant,
) -> Result<bool> {
    loop {
        let Ok(event) = tokio::time::timeout_at(deadline, records.recv()).await else {
            return Ok(false);
        };
        match event {
            Some(Event::DataArrived { record, .. }) => {
                if let RecordPayload::UhfList(list) = &record.payload {
                    if collector.push(list.data_type, &list.tags, list.end_of_inventory)? {
                        return Ok(true);
                    }
                }
            }
            Some(Event::ConnectionChanged { new, .. }) if !new.is_linked() => {
                return Err(Error::Disconnected);
            }
            Some(_) => {}
            None => return Err(Error::ChannelClosed),
        }
    }
}
