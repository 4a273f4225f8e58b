// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pads and the connection table.
//!
//! A [`Pad`] is a directional endpoint owned by an element. Linked pads do
//! not reference each other: the relation lives in the shared [`PadTable`]
//! (pad id -> pad id) and is resolved on every push, so either side can be
//! dropped independently and a dangling link shows up as `NotLinked`.
//!
//! Pushing a buffer is a plain function call into the peer's
//! [`PadHandler`]. The peer holds its stream lock for the whole downstream
//! call, which serializes buffers and serialized events through that pad.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::core::buffer::Buffer;
use crate::core::error::{FlowError, FlowResult, LinkError};
use crate::core::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PadId(u64);

impl PadId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pad#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Src,
    Sink,
}

/// The processing capability behind a sink pad.
///
/// Called with the pad's stream lock held, so at most one call per pad is in
/// flight at any time.
pub trait PadHandler: Send + Sync {
    fn chain(&self, pad: &Pad, buffer: Buffer) -> FlowResult;

    /// `FlushStart` arrives out-of-band, without the stream lock, possibly
    /// while `chain` is blocked on another thread.
    fn event(&self, pad: &Pad, event: Event) -> FlowResult {
        let _ = (pad, event);
        Ok(())
    }
}

/// Verdict of a pad probe.
pub enum ProbeReturn {
    /// Continue with this (possibly replaced) buffer.
    Pass(Buffer),
    /// Swallow the buffer and report success.
    Drop,
    /// Refuse the buffer with the given flow error.
    Fail(FlowError),
}

pub type ProbeFn = dyn Fn(&Pad, Buffer) -> ProbeReturn + Send + Sync;

#[derive(Default)]
struct TableInner {
    pads: HashMap<PadId, (Weak<Pad>, PadDirection)>,
    peers: HashMap<PadId, PadId>,
}

/// Connection table shared by every pad of a pipeline.
#[derive(Default)]
pub struct PadTable {
    inner: RwLock<TableInner>,
}

impl PadTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, pad: &Arc<Pad>) {
        self.inner
            .write()
            .pads
            .insert(pad.id, (Arc::downgrade(pad), pad.direction));
    }

    fn remove(&self, id: PadId) {
        let mut inner = self.inner.write();
        inner.pads.remove(&id);
        if let Some(peer) = inner.peers.remove(&id) {
            inner.peers.remove(&peer);
        }
    }

    pub fn lookup(&self, id: PadId) -> Option<Arc<Pad>> {
        self.inner.read().pads.get(&id)?.0.upgrade()
    }

    pub fn peer_id(&self, id: PadId) -> Option<PadId> {
        self.inner.read().peers.get(&id).copied()
    }

    /// Resolve the live peer of `id`.
    pub fn peer(&self, id: PadId) -> Option<Arc<Pad>> {
        let inner = self.inner.read();
        let peer = inner.peers.get(&id)?;
        inner.pads.get(peer)?.0.upgrade()
    }

    pub fn link(&self, src: &Pad, sink: &Pad) -> Result<(), LinkError> {
        if src.direction != PadDirection::Src || sink.direction != PadDirection::Sink {
            return Err(LinkError::WrongDirection {
                src: src.full_name(),
                sink: sink.full_name(),
            });
        }

        let mut inner = self.inner.write();
        for pad in [src, sink] {
            if !inner.pads.contains_key(&pad.id) {
                return Err(LinkError::NotRegistered(pad.full_name()));
            }
            if inner.peers.contains_key(&pad.id) {
                return Err(LinkError::AlreadyLinked(pad.full_name()));
            }
        }
        inner.peers.insert(src.id, sink.id);
        inner.peers.insert(sink.id, src.id);

        tracing::debug!("Linked {} -> {}", src.full_name(), sink.full_name());
        Ok(())
    }

    /// Remove the link of `pad` in both directions. Returns whether a link
    /// existed.
    pub fn unlink(&self, pad: &Pad) -> bool {
        let mut inner = self.inner.write();
        match inner.peers.remove(&pad.id) {
            Some(peer) => {
                inner.peers.remove(&peer);
                tracing::debug!("Unlinked {}", pad.full_name());
                true
            }
            None => false,
        }
    }

    /// All linked (src, sink) pairs.
    pub fn links(&self) -> Vec<(PadId, PadId)> {
        let inner = self.inner.read();
        let mut links: Vec<_> = inner
            .peers
            .iter()
            .filter(|(id, _)| {
                inner
                    .pads
                    .get(id)
                    .is_some_and(|(_, direction)| *direction == PadDirection::Src)
            })
            .map(|(src, sink)| (*src, *sink))
            .collect();
        links.sort();
        links
    }
}

pub struct Pad {
    id: PadId,
    name: String,
    parent: String,
    direction: PadDirection,
    handler: Option<Arc<dyn PadHandler>>,
    table: Arc<PadTable>,
    stream_lock: Mutex<()>,
    active: AtomicBool,
    flushing: AtomicBool,
    eos: AtomicBool,
    probe: RwLock<Option<Arc<ProbeFn>>>,
}

impl Pad {
    /// Create an inactive source pad registered in `table`.
    pub fn new_src(table: &Arc<PadTable>, parent: &str, name: &str) -> Arc<Pad> {
        Self::build(table, parent, name, PadDirection::Src, None)
    }

    /// Create an inactive sink pad that dispatches to `handler`.
    pub fn new_sink(
        table: &Arc<PadTable>,
        parent: &str,
        name: &str,
        handler: Arc<dyn PadHandler>,
    ) -> Arc<Pad> {
        Self::build(table, parent, name, PadDirection::Sink, Some(handler))
    }

    fn build(
        table: &Arc<PadTable>,
        parent: &str,
        name: &str,
        direction: PadDirection,
        handler: Option<Arc<dyn PadHandler>>,
    ) -> Arc<Pad> {
        let pad = Arc::new(Pad {
            id: PadId::new(),
            name: name.to_string(),
            parent: parent.to_string(),
            direction,
            handler,
            table: Arc::clone(table),
            stream_lock: Mutex::new(()),
            active: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            eos: AtomicBool::new(false),
            probe: RwLock::new(None),
        });
        table.register(&pad);
        pad
    }

    #[inline]
    pub fn id(&self) -> PadId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning element.
    #[inline]
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn full_name(&self) -> String {
        format!("{}:{}", self.parent, self.name)
    }

    #[inline]
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    pub fn peer(&self) -> Option<Arc<Pad>> {
        self.table.peer(self.id)
    }

    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Inactive pads and pads between `FlushStart` and `FlushStop` refuse data.
    pub fn is_flushing(&self) -> bool {
        !self.active.load(Ordering::SeqCst) || self.flushing.load(Ordering::SeqCst)
    }

    pub fn is_eos(&self) -> bool {
        self.eos.load(Ordering::SeqCst)
    }

    /// Activate or deactivate the pad.
    ///
    /// Deactivating waits for any in-flight chain call to leave, so the
    /// owning element must already have unblocked its streaming thread.
    pub fn set_active(&self, active: bool) {
        if active {
            self.flushing.store(false, Ordering::SeqCst);
            self.eos.store(false, Ordering::SeqCst);
            self.active.store(true, Ordering::SeqCst);
        } else {
            self.active.store(false, Ordering::SeqCst);
            drop(self.stream_lock.lock());
        }
        tracing::trace!("[{}] active={}", self.full_name(), active);
    }

    pub fn set_probe<F>(&self, probe: F)
    where
        F: Fn(&Pad, Buffer) -> ProbeReturn + Send + Sync + 'static,
    {
        *self.probe.write() = Some(Arc::new(probe));
    }

    pub fn remove_probe(&self) {
        *self.probe.write() = None;
    }

    fn run_probe(&self, buffer: Buffer) -> ProbeReturn {
        let probe = self.probe.read().clone();
        match probe {
            Some(probe) => probe(self, buffer),
            None => ProbeReturn::Pass(buffer),
        }
    }

    /// Hand `buffer` to the linked peer and run the downstream chain.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        if self.direction != PadDirection::Src {
            return Err(FlowError::error(format!(
                "push on sink pad {}",
                self.full_name()
            )));
        }
        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }

        let buffer = match self.run_probe(buffer) {
            ProbeReturn::Pass(buffer) => buffer,
            ProbeReturn::Drop => return Ok(()),
            ProbeReturn::Fail(err) => return Err(err),
        };

        let peer = self.peer().ok_or(FlowError::NotLinked)?;
        peer.chain(buffer)
    }

    fn chain(&self, buffer: Buffer) -> FlowResult {
        let _stream = self.stream_lock.lock();

        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }
        if self.is_eos() {
            return Err(FlowError::Eos);
        }

        let buffer = match self.run_probe(buffer) {
            ProbeReturn::Pass(buffer) => buffer,
            ProbeReturn::Drop => return Ok(()),
            ProbeReturn::Fail(err) => return Err(err),
        };

        match &self.handler {
            Some(handler) => handler.chain(self, buffer),
            None => Err(FlowError::NotLinked),
        }
    }

    /// Send `event` downstream to the linked peer.
    pub fn push_event(&self, event: Event) -> FlowResult {
        if self.direction != PadDirection::Src {
            return Err(FlowError::error(format!(
                "push_event on sink pad {}",
                self.full_name()
            )));
        }
        if !self.is_active() {
            return Err(FlowError::Flushing);
        }
        if self.flushing.load(Ordering::SeqCst) && !matches!(event, Event::FlushStop { .. }) {
            return Err(FlowError::Flushing);
        }

        let peer = self.peer().ok_or(FlowError::NotLinked)?;
        tracing::trace!("[{}] -> {} {}", self.full_name(), peer.full_name(), event);
        peer.send_event(event)
    }

    /// Deliver `event` to this sink pad's handler, honouring serialization.
    pub fn send_event(&self, event: Event) -> FlowResult {
        let handler = match &self.handler {
            Some(handler) => handler,
            None => return Err(FlowError::NotLinked),
        };

        if let Event::FlushStart = event {
            if !self.is_active() {
                return Err(FlowError::Flushing);
            }
            self.flushing.store(true, Ordering::SeqCst);
            return handler.event(self, event);
        }

        let _stream = self.stream_lock.lock();
        if !self.is_active() {
            return Err(FlowError::Flushing);
        }

        match event {
            Event::FlushStop { .. } => {
                self.flushing.store(false, Ordering::SeqCst);
                self.eos.store(false, Ordering::SeqCst);
            }
            Event::Eos => {
                if self.is_flushing() {
                    return Err(FlowError::Flushing);
                }
                if self.eos.swap(true, Ordering::SeqCst) {
                    return Err(FlowError::Eos);
                }
            }
            Event::Segment(_) => {
                if self.is_flushing() {
                    return Err(FlowError::Flushing);
                }
                if self.is_eos() {
                    return Err(FlowError::Eos);
                }
            }
            Event::FlushStart => {}
        }

        handler.event(self, event)
    }
}

impl Drop for Pad {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pad")
            .field("id", &self.id)
            .field("name", &self.full_name())
            .field("direction", &self.direction)
            .field("active", &self.is_active())
            .field("flushing", &self.flushing.load(Ordering::SeqCst))
            .field("eos", &self.is_eos())
            .finish()
    }
}
