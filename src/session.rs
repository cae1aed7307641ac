use crate::codec::{Decoder, Encoder};
use crate::debug;
use crate::deletion::DeletionSimulation;
use crate::error::{ReplicaError, Result};
use crate::field::WireField;
use crate::protocol::{apply_update, rollback_update, write_update, ApplyReport, WriteReport};
use crate::rate_limit::{TickLimiter, TickStats};
use crate::transport::{Delivery, Transport};
use crate::view::ClientView;
use crate::world::{EntityId, World};
use ahash::AHashMap;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

// Downstream messages are `sequence: varint, flags: u8, update`.
const UPDATE_RESET: u8 = 0x01;

// Upstream messages start with a tag byte. A resync request is a varint id
// count followed by the ids; a count of zero asks for a full reset.
const UPSTREAM_INPUT: u8 = 0;
const UPSTREAM_RESYNC: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Entity slots per world, including the null slot.
    pub max_entities: usize,
    pub tick_interval_ms: u64,
    pub max_message_size: usize,
    /// Bytes per ring direction.
    pub ring_capacity: usize,
    /// Fade progress per second in the deletion simulation.
    pub fade_rate: f32,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            max_entities: 16384,
            tick_interval_ms: 40,
            max_message_size: 64 * 1024,
            ring_capacity: 2 * 1024 * 1024,
            fade_rate: 5.0,
        }
    }
}

impl ReplicaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_max_entities(mut self, max_entities: usize) -> Self {
        self.max_entities = max_entities;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    pub fn with_fade_rate(mut self, rate: f32) -> Self {
        self.fade_rate = rate;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Game rules run by the authority once per tick.
pub trait GameLogic {
    /// Handles one inbound message. Called for every queued message before
    /// [`GameLogic::step`].
    fn on_message(&mut self, world: &mut World, client: ClientId, payload: &[u8]);

    fn step(&mut self, world: &mut World);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub inbound: usize,
    pub sent: usize,
    pub bytes_sent: usize,
    pub dropped: usize,
    /// Updates that did not fit in the message size limit.
    pub oversize: usize,
    pub disconnected: usize,
    pub deleted: usize,
    /// Resync requests received from clients.
    pub resyncs: usize,
}

struct ClientSlot<T> {
    transport: T,
    view: ClientView,
    sequence: u64,
    reset_pending: bool,
}

impl<T> ClientSlot<T> {
    fn handle_resync(&mut self, body: &[u8]) -> Result<()> {
        let mut dec = Decoder::new(body);
        let count = dec.read_varuint()?;
        if count == 0 {
            self.view.reset();
            self.reset_pending = true;
            return Ok(());
        }
        for _ in 0..count {
            self.view.resend(EntityId::decode(&mut dec)?);
        }
        Ok(())
    }

    fn write(
        &mut self,
        world: &World,
        status: u8,
        enc: &mut Encoder,
    ) -> Result<WriteReport> {
        enc.clear();
        enc.write_varuint(self.sequence)?;
        enc.write_u8(if self.reset_pending { UPDATE_RESET } else { 0 })?;
        write_update(world, &mut self.view, status, enc)
    }
}

pub struct Authority<T: Transport> {
    config: ReplicaConfig,
    world: World,
    clients: AHashMap<ClientId, ClientSlot<T>>,
    next_client: u32,
    limiter: TickLimiter,
    encoder: Encoder,
    status: u8,
    ticks: u64,
}

impl<T: Transport> Authority<T> {
    pub fn new(config: ReplicaConfig) -> Self {
        Self {
            world: World::with_label("authority", config.max_entities),
            clients: AHashMap::new(),
            next_client: 1,
            limiter: TickLimiter::new(config.tick_interval()),
            encoder: Encoder::new(config.max_message_size),
            status: 0,
            ticks: 0,
            config,
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Global status byte sent at the end of every update.
    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn connect(&mut self, transport: T) -> ClientId {
        let view = ClientView::new(self.world.capacity());
        self.connect_with_view(transport, view)
    }

    pub fn connect_with_view(&mut self, transport: T, view: ClientView) -> ClientId {
        let id = ClientId(self.next_client);
        self.next_client += 1;
        self.clients.insert(
            id,
            ClientSlot {
                transport,
                view,
                sequence: 0,
                reset_pending: false,
            },
        );
        log::debug!("{} connected", id);
        id
    }

    pub fn disconnect(&mut self, id: ClientId) -> Option<T> {
        let mut slot = self.clients.remove(&id)?;
        if let Err(e) = slot.transport.close() {
            log::warn!("closing {}: {}", id, e);
        }
        Some(slot.transport)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn view(&self, id: ClientId) -> Option<&ClientView> {
        self.clients.get(&id).map(|slot| &slot.view)
    }

    pub fn view_mut(&mut self, id: ClientId) -> Option<&mut ClientView> {
        self.clients.get_mut(&id).map(|slot| &mut slot.view)
    }

    pub fn tick_stats(&self) -> TickStats {
        self.limiter.stats()
    }

    fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Runs one tick if the cadence allows it at `now`. An update that is
    /// dropped or too large rolls the client's view back.
    pub fn tick<L: GameLogic>(&mut self, now: Instant, logic: &mut L) -> Result<Option<TickReport>> {
        if !self.limiter.ready(now) {
            return Ok(None);
        }

        let mut report = TickReport::default();
        let mut lost = Vec::new();
        let ids = self.client_ids();

        for id in &ids {
            let Some(slot) = self.clients.get_mut(id) else {
                continue;
            };
            loop {
                match slot.transport.receive() {
                    Ok(Some(payload)) => match payload.split_first() {
                        Some((&UPSTREAM_INPUT, input)) => {
                            report.inbound += 1;
                            logic.on_message(&mut self.world, *id, input);
                        }
                        Some((&UPSTREAM_RESYNC, body)) => {
                            report.resyncs += 1;
                            if let Err(e) = slot.handle_resync(body) {
                                log::warn!("{}: malformed resync request: {}", id, e);
                            }
                        }
                        _ => log::warn!("{}: unknown upstream message", id),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("{} receive failed: {}", id, e);
                        lost.push(*id);
                        break;
                    }
                }
            }
        }

        logic.step(&mut self.world);
        self.world.rebuild_dense_indices();

        for id in &ids {
            if lost.contains(id) {
                continue;
            }
            let Some(slot) = self.clients.get_mut(id) else {
                continue;
            };

            let before = slot.view.clone();
            match slot.write(&self.world, self.status, &mut self.encoder) {
                Ok(written) => {
                    debug::trace_write(*id, &written, self.encoder.len());
                    match slot.transport.send(self.encoder.as_slice()) {
                        Ok(Delivery::Sent) => {
                            slot.sequence = slot.sequence.wrapping_add(1);
                            slot.reset_pending = false;
                            report.sent += 1;
                            report.bytes_sent += self.encoder.len();
                        }
                        Ok(Delivery::Dropped) => {
                            log::warn!(
                                "{}: update of {} bytes dropped, resyncing",
                                id,
                                self.encoder.len()
                            );
                            rollback_update(&self.world, &mut slot.view, before);
                            report.dropped += 1;
                        }
                        Err(e) => {
                            log::warn!("{} send failed: {}", id, e);
                            lost.push(*id);
                        }
                    }
                }
                Err(ReplicaError::BufferFull { needed, limit }) => {
                    log::warn!(
                        "{}: update needs more than {} bytes (reached {}), resyncing",
                        id,
                        limit,
                        needed
                    );
                    rollback_update(&self.world, &mut slot.view, before);
                    report.oversize += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.world.clear_dirty();
        report.deleted = self.world.process_deletions();
        self.world.rebuild_dense_indices();

        for id in lost {
            self.disconnect(id);
            report.disconnected += 1;
        }
        self.ticks += 1;
        Ok(Some(report))
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

fn read_header(dec: &mut Decoder<'_>) -> Result<(u64, u8)> {
    let sequence = dec.read_varuint()?;
    Ok((sequence, dec.read_u8()?))
}

// An empty id list asks for a full reset.
fn write_resync(enc: &mut Encoder, ids: &[EntityId]) -> Result<()> {
    enc.clear();
    enc.write_u8(UPSTREAM_RESYNC)?;
    enc.write_varuint(ids.len() as u64)?;
    ids.iter().try_for_each(|id| id.encode(enc))
}

/// The receiving side: a mirrored world plus its deletion simulation.
/// After a lost or malformed update it holds its world until a reset arrives.
pub struct Presentation<T: Transport> {
    transport: T,
    world: World,
    fading: DeletionSimulation,
    fade_rate: f32,
    upstream: Encoder,
    focus: Option<EntityId>,
    status: u8,
    expected: u64,
    awaiting_reset: bool,
    reset_requested: bool,
    applied: u64,
    rejected: u64,
    discarded: u64,
    resync_requests: u64,
    last_report: ApplyReport,
}

impl<T: Transport> Presentation<T> {
    pub fn new(transport: T, config: &ReplicaConfig) -> Self {
        Self {
            transport,
            world: World::with_label("presentation", config.max_entities),
            fading: DeletionSimulation::new(config.max_entities),
            fade_rate: config.fade_rate,
            upstream: Encoder::new(config.max_message_size),
            focus: None,
            status: 0,
            expected: 0,
            awaiting_reset: false,
            reset_requested: false,
            applied: 0,
            rejected: 0,
            discarded: 0,
            resync_requests: 0,
            last_report: ApplyReport::default(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn deletion_simulation(&self) -> &DeletionSimulation {
        &self.fading
    }

    /// Entity the authority marked as this observer's subject.
    pub fn focus(&self) -> Option<EntityId> {
        self.focus
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Messages abandoned because their bytes were malformed.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn resync_requests(&self) -> u64 {
        self.resync_requests
    }

    pub fn is_awaiting_reset(&self) -> bool {
        self.awaiting_reset
    }

    pub fn last_report(&self) -> &ApplyReport {
        &self.last_report
    }

    /// Applies every pending update. Returns how many were applied.
    pub fn poll(&mut self) -> Result<usize> {
        if self.awaiting_reset && !self.reset_requested {
            self.request_reset()?;
        }

        let mut applied = 0;
        while let Some(payload) = self.transport.receive()? {
            let mut dec = Decoder::new(&payload);
            let (sequence, flags) = match read_header(&mut dec) {
                Ok(header) => header,
                Err(e) => {
                    log::warn!("malformed update header: {}", e);
                    self.rejected += 1;
                    self.lose_sync()?;
                    continue;
                }
            };
            let update = &payload[dec.position()..];

            if sequence != self.expected && !self.awaiting_reset {
                log::warn!(
                    "update {} arrived while expecting {}, requesting reset",
                    sequence,
                    self.expected
                );
                self.lose_sync()?;
            }
            self.expected = sequence.wrapping_add(1);

            if flags & UPDATE_RESET != 0 {
                self.clear_world();
                self.awaiting_reset = false;
                self.reset_requested = false;
            } else if self.awaiting_reset {
                self.discarded += 1;
                continue;
            }

            match apply_update(&mut self.world, Some(&mut self.fading), update) {
                Ok(report) => {
                    debug::trace_apply(&report);
                    if !report.repaired.is_empty() {
                        self.request_resend(&report.repaired)?;
                    }
                    self.focus = report.focus;
                    self.status = report.status;
                    self.last_report = report;
                    self.applied += 1;
                    applied += 1;
                }
                Err(e) if e.is_protocol_error() => {
                    log::warn!(
                        "malformed update of {} bytes: {}",
                        payload.len(),
                        e
                    );
                    self.rejected += 1;
                    self.lose_sync()?;
                }
                Err(e) => return Err(e),
            }
        }
        if applied > 0 {
            self.world.rebuild_dense_indices();
            debug::log_world(&self.world);
        }
        Ok(applied)
    }

    fn lose_sync(&mut self) -> Result<()> {
        self.awaiting_reset = true;
        self.reset_requested = false;
        self.request_reset()
    }

    fn clear_world(&mut self) {
        let ids: Vec<EntityId> = self.world.entities().collect();
        for id in ids {
            self.world.destroy(id);
        }
    }

    fn request_reset(&mut self) -> Result<()> {
        write_resync(&mut self.upstream, &[])?;
        self.reset_requested = self.send_upstream()? == Delivery::Sent;
        Ok(())
    }

    fn request_resend(&mut self, ids: &[EntityId]) -> Result<()> {
        match write_resync(&mut self.upstream, ids) {
            Ok(()) => {
                log::debug!("requesting resend of {} entities", ids.len());
                self.send_upstream()?;
                Ok(())
            }
            Err(ReplicaError::BufferFull { .. }) => self.lose_sync(),
            Err(e) => Err(e),
        }
    }

    fn send_upstream(&mut self) -> Result<Delivery> {
        let delivery = self.transport.send(self.upstream.as_slice())?;
        if delivery == Delivery::Sent {
            self.resync_requests += 1;
        }
        Ok(delivery)
    }

    pub fn tick(&mut self, delta: f32) -> usize {
        self.fading.tick(delta, self.fade_rate)
    }

    pub fn send_input(&mut self, payload: &[u8]) -> Result<Delivery> {
        let mut message = BytesMut::with_capacity(payload.len() + 1);
        message.put_u8(UPSTREAM_INPUT);
        message.put_slice(payload);
        self.transport.send(&message)
    }
}
