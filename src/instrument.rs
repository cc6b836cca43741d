//! Voice tracking.
//!
//! An [`Instrument`] turns values (usually frequencies) into started voices
//! through a synth function, routes them into a destination, and keeps a
//! registry of sounding voices keyed by [`VoiceId`] until each one ends.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::SynthKitError;
use crate::host::Context;
use crate::node::{Node, VoiceId};

/// Builds one voice from a value.
pub type Synth<T> = Rc<dyn Fn(&Context, T) -> Result<Node, SynthKitError>>;

/// What [`Instrument::start`] plays.
pub enum Play<T> {
    /// A voice built elsewhere.
    Node(Node),
    /// A value handed to the instrument's synth.
    Value(T),
}

impl<T> From<Node> for Play<T> {
    fn from(node: Node) -> Self {
        Play::Node(node)
    }
}

impl<T> From<&Node> for Play<T> {
    fn from(node: &Node) -> Self {
        Play::Node(node.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Started,
    /// Stop scheduled; waiting for the voice to end.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartEvent {
    pub id: VoiceId,
    pub time: f64,
}

struct Voice {
    node: Node,
    state: VoiceState,
}

struct Observers<E> {
    callbacks: RefCell<Vec<Box<dyn FnMut(&E)>>>,
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Observers { callbacks: RefCell::new(Vec::new()) }
    }
}

impl<E> Observers<E> {
    fn subscribe(&self, callback: Box<dyn FnMut(&E)>) {
        self.callbacks.borrow_mut().push(callback);
    }

    fn emit(&self, event: &E) {
        // observers may subscribe from inside a callback
        let mut running = std::mem::take(&mut *self.callbacks.borrow_mut());
        for callback in running.iter_mut() {
            callback(event);
        }
        let mut callbacks = self.callbacks.borrow_mut();
        running.append(&mut *callbacks);
        *callbacks = running;
    }
}

#[derive(Default)]
struct Registry {
    next_id: VoiceId,
    voices: BTreeMap<VoiceId, Voice>,
}

#[derive(Default)]
struct Shared {
    registry: RefCell<Registry>,
    started: Observers<StartEvent>,
    voices: Observers<usize>,
    ended: Observers<VoiceId>,
}

impl Shared {
    fn len(&self) -> usize {
        self.registry.borrow().voices.len()
    }

    fn remove(&self, id: VoiceId) {
        let removed = self.registry.borrow_mut().voices.remove(&id);
        if let Some(voice) = removed {
            log::debug!("voice {id} ended");
            if let Err(e) = voice.node.disconnect() {
                log::warn!("voice {id} did not disconnect: {e}");
            }
            self.ended.emit(&id);
            self.voices.emit(&self.len());
        }
    }
}

pub struct Instrument<T = f64> {
    ctx: Context,
    synth: Option<Synth<T>>,
    destination: Option<Node>,
    max_voices: usize,
    shared: Rc<Shared>,
}

impl<T> Instrument<T> {
    /// An instrument with no synth and no destination; every voice it plays
    /// must be passed in as a node.
    pub fn new(ctx: &Context) -> Self {
        Instrument {
            ctx: ctx.clone(),
            synth: None,
            destination: None,
            max_voices: 0,
            shared: Rc::new(Shared::default()),
        }
    }

    /// An instrument routed to the context's final output.
    pub fn master(ctx: &Context) -> Self {
        Instrument::new(ctx).with_destination(Node::destination(ctx))
    }

    pub fn with_synth(
        mut self,
        synth: impl Fn(&Context, T) -> Result<Node, SynthKitError> + 'static,
    ) -> Self {
        self.synth = Some(Rc::new(synth));
        self
    }

    pub fn with_destination(mut self, destination: Node) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Cap simultaneous sounding voices; 0 means unlimited.
    pub fn with_max_voices(mut self, max_voices: usize) -> Self {
        self.max_voices = max_voices;
        self
    }

    /// A new instrument sharing this one's destination, with its own
    /// registry.
    pub fn inst<U>(
        &self,
        synth: impl Fn(&Context, U) -> Result<Node, SynthKitError> + 'static,
        max_voices: usize,
    ) -> Instrument<U> {
        let child = Instrument::new(&self.ctx).with_synth(synth).with_max_voices(max_voices);
        match &self.destination {
            Some(destination) => child.with_destination(destination.clone()),
            None => child,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn destination(&self) -> Option<&Node> {
        self.destination.as_ref()
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    /// Build (if needed), connect, register and start one voice.
    ///
    /// The voice starts at `max(now, time) + delay`; a positive `duration`
    /// schedules its stop as well.
    pub fn start(
        &self,
        play: impl Into<Play<T>>,
        time: Option<f64>,
        delay: Option<f64>,
        duration: Option<f64>,
    ) -> Result<Node, SynthKitError> {
        let node = match play.into() {
            Play::Node(node) => node,
            Play::Value(value) => {
                let synth = self.synth.as_ref().ok_or(SynthKitError::NoSynth)?;
                synth(&self.ctx, value)?
            }
        };
        if let Some(destination) = &self.destination {
            node.connect(destination)?;
        }
        let time = node.context().when(time, delay);
        self.enforce_limit(time)?;
        let id = self.track(&node);
        node.start(time)?;
        if let Some(duration) = duration.filter(|d| *d > 0.0) {
            node.stop(time + duration)?;
        }
        log::debug!("voice {id} ({}) started at {time:.4}", node.label());
        self.shared.started.emit(&StartEvent { id, time });
        self.shared.voices.emit(&self.shared.len());
        Ok(node)
    }

    /// Shorthand for playing a value through the synth right away.
    pub fn play(&self, value: T) -> Result<Node, SynthKitError> {
        self.start(Play::Value(value), None, None, None)
    }

    /// Register `node` and return its id. When the node ends its entry is
    /// dropped and its host nodes are disconnected.
    pub fn track(&self, node: &Node) -> VoiceId {
        let id = {
            let mut registry = self.shared.registry.borrow_mut();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.voices.insert(id, Voice { node: node.clone(), state: VoiceState::Started });
            id
        };
        node.set_id(id);
        let shared = Rc::downgrade(&self.shared);
        node.on_ended(move || {
            if let Some(shared) = shared.upgrade() {
                shared.remove(id);
            }
        });
        id
    }

    /// Stop voices by id, or all tracked voices when `ids` is `None`.
    /// Unknown ids are ignored.
    pub fn stop(
        &self,
        ids: Option<&[VoiceId]>,
        time: Option<f64>,
        delay: Option<f64>,
    ) -> Result<(), SynthKitError> {
        let targets: Vec<(VoiceId, Node)> = {
            let registry = self.shared.registry.borrow();
            match ids {
                None => registry.voices.iter().map(|(id, v)| (*id, v.node.clone())).collect(),
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| match registry.voices.get(id) {
                        Some(voice) => Some((*id, voice.node.clone())),
                        None => {
                            log::debug!("no voice {id} to stop");
                            None
                        }
                    })
                    .collect(),
            }
        };
        for (id, node) in targets {
            let at = node.context().when(time, delay);
            node.stop(at)?;
            self.mark_stopped(id);
        }
        Ok(())
    }

    pub fn stop_all(&self) -> Result<(), SynthKitError> {
        self.stop(None, None, None)
    }

    /// Ids of every voice still registered, oldest first.
    pub fn voice_ids(&self) -> Vec<VoiceId> {
        self.shared.registry.borrow().voices.keys().copied().collect()
    }

    pub fn voice(&self, id: VoiceId) -> Option<Node> {
        self.shared.registry.borrow().voices.get(&id).map(|v| v.node.clone())
    }

    pub fn state(&self, id: VoiceId) -> Option<VoiceState> {
        self.shared.registry.borrow().voices.get(&id).map(|v| v.state)
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn on_start(&self, callback: impl FnMut(&StartEvent) + 'static) {
        self.shared.started.subscribe(Box::new(callback));
    }

    /// Called with the number of registered voices whenever it changes.
    pub fn on_voices(&self, callback: impl FnMut(&usize) + 'static) {
        self.shared.voices.subscribe(Box::new(callback));
    }

    pub fn on_ended(&self, callback: impl FnMut(&VoiceId) + 'static) {
        self.shared.ended.subscribe(Box::new(callback));
    }

    fn mark_stopped(&self, id: VoiceId) {
        if let Some(voice) = self.shared.registry.borrow_mut().voices.get_mut(&id) {
            voice.state = VoiceState::Stopped;
        }
    }

    /// Stop the oldest sounding voices until a new one fits under the cap.
    fn enforce_limit(&self, time: f64) -> Result<(), SynthKitError> {
        if self.max_voices == 0 {
            return Ok(());
        }
        let excess: Vec<(VoiceId, Node)> = {
            let registry = self.shared.registry.borrow();
            let sounding: Vec<_> = registry
                .voices
                .iter()
                .filter(|(_, v)| v.state == VoiceState::Started)
                .collect();
            let over = (sounding.len() + 1).saturating_sub(self.max_voices);
            sounding.into_iter().take(over).map(|(id, v)| (*id, v.node.clone())).collect()
        };
        for (id, node) in excess {
            log::debug!("voice limit {} reached, stealing voice {id}", self.max_voices);
            node.stop(time)?;
            self.mark_stopped(id);
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for Instrument<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("voices", &self.len())
            .field("max_voices", &self.max_voices)
            .field("has_synth", &self.synth.is_some())
            .finish()
    }
}
