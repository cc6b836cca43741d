//! Audio nodes and their lifecycle.
//!
//! A [`Node`] is a cheap-clone handle to one logical unit of the audio graph.
//! It is either a leaf (a single host node), an envelope (a gain node driven
//! by attack/release contours), a serial or parallel composite built by
//! [`routing`], or a wrapper that attaches extra lifecycle dependents to
//! another node (see [`lifecycle`]).
//!
//! Every node has exactly one input point and one output point. `connect`
//! always leaves from the output point, so a composite behaves like a single
//! node from the outside.

pub mod buffer;
pub mod contour;
pub mod effects;
pub mod envelope;
pub mod filter;
pub mod oscillator;
pub mod param;
pub mod routing;
pub mod signal;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::SynthKitError;
use crate::host::{Context, Endpoint, HostId, NodeKind, ParamName};

use self::contour::Contour;
use self::param::{ParamValue, plug};

/// Identifier handed out by an instrument's voice tracker.
pub type VoiceId = u64;

pub(crate) enum Shape {
    Leaf {
        host: HostId,
        source: bool,
        params: &'static [ParamName],
    },
    Envelope {
        host: HostId,
        attack: Contour,
        release: Option<Contour>,
    },
    Series {
        members: Vec<Node>,
    },
    Parallel {
        input: HostId,
        output: HostId,
    },
    Wrapped {
        inner: Node,
    },
}

pub(crate) struct Parts {
    pub label: String,
    pub shape: Shape,
    pub dependents: Vec<Node>,
    pub duration: Option<f64>,
    pub release: Option<f64>,
}

struct NodeInner {
    ctx: Context,
    label: String,
    shape: Shape,
    dependents: Vec<Node>,
    duration: Option<f64>,
    release: Option<f64>,
    startable: bool,
    emits_ended: bool,
    id: Cell<Option<VoiceId>>,
    started: Cell<bool>,
    connected: Cell<bool>,
    disconnected: Cell<bool>,
    ended: Cell<bool>,
    /// Members still running before a composite counts as ended.
    pending: Cell<usize>,
    listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
}

#[derive(Clone)]
pub struct Node(Rc<NodeInner>);

/// Where [`Node::connect`] sends its output.
pub enum Target<'a> {
    Node(&'a Node),
    Param(&'a Node, ParamName),
    Destination,
}

impl<'a> From<&'a Node> for Target<'a> {
    fn from(node: &'a Node) -> Self {
        Target::Node(node)
    }
}

impl Node {
    pub(crate) fn from_parts(ctx: &Context, parts: Parts) -> Node {
        let Parts { label, shape, dependents, duration, release } = parts;

        let startable = match &shape {
            Shape::Leaf { source, .. } => *source || dependents.iter().any(Node::is_startable),
            Shape::Envelope { .. } => true,
            Shape::Series { members } => members.iter().any(Node::is_startable),
            Shape::Parallel { .. } => dependents.iter().any(Node::is_startable),
            Shape::Wrapped { inner } => {
                inner.is_startable() || dependents.iter().any(Node::is_startable)
            }
        };
        let candidates: Vec<&Node> = match &shape {
            Shape::Series { members } => members.iter().collect(),
            Shape::Parallel { .. } => dependents.iter().collect(),
            Shape::Wrapped { inner } => vec![inner],
            _ => Vec::new(),
        };
        // a shared node counts once, it only ends once
        let mut joined: Vec<Node> = Vec::new();
        for member in candidates.into_iter().filter(|m| m.emits_ended()) {
            if !joined.iter().any(|j| Node::ptr_eq(j, member)) {
                joined.push(member.clone());
            }
        }
        let emits_ended = match &shape {
            Shape::Leaf { source, .. } => *source,
            Shape::Envelope { .. } => false,
            _ => !joined.is_empty(),
        };

        let node = Node(Rc::new(NodeInner {
            ctx: ctx.clone(),
            label,
            shape,
            dependents,
            duration: duration.filter(|d| *d > 0.0),
            release: release.filter(|r| *r > 0.0),
            startable,
            emits_ended,
            id: Cell::new(None),
            started: Cell::new(false),
            connected: Cell::new(false),
            disconnected: Cell::new(false),
            ended: Cell::new(false),
            pending: Cell::new(joined.len()),
            listeners: RefCell::new(Vec::new()),
        }));

        if let Shape::Leaf { host, source: true, .. } = &node.0.shape {
            let weak = Rc::downgrade(&node.0);
            ctx.engine().on_ended(
                *host,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        Node(inner).fire_ended();
                    }
                }),
            );
        }
        for member in &joined {
            let weak: Weak<NodeInner> = Rc::downgrade(&node.0);
            member.on_ended(move || {
                if let Some(inner) = weak.upgrade() {
                    Node(inner).member_ended();
                }
            });
        }
        node
    }

    /// Create a host node and bind its parameters. Modulating sources become
    /// lifecycle dependents of the new node.
    pub(crate) fn leaf(
        ctx: &Context,
        kind: NodeKind,
        params: Vec<(ParamName, Option<ParamValue>)>,
    ) -> Result<Node, SynthKitError> {
        let host = ctx.engine().create_node(&kind)?;
        let label = format!("{}{}", kind.name(), host);
        let allowed = kind.params();
        let mut dependents = Vec::new();
        for (name, value) in params {
            if value.is_none() {
                continue;
            }
            if !allowed.contains(&name) {
                return Err(SynthKitError::UnknownParam { node: label, param: name });
            }
            if let Some(modulator) = plug(ctx, host, name, value)? {
                dependents.push(modulator);
            }
        }
        let duration = match &kind {
            NodeKind::BufferSource { buffer: Some(buffer), looping: false } => {
                Some(buffer.duration())
            }
            _ => None,
        };
        // modulators keep sweeping through their own release
        let release = dependents
            .iter()
            .filter(|d| d.is_startable())
            .filter_map(Node::release)
            .reduce(f64::max);
        Ok(Node::from_parts(
            ctx,
            Parts {
                label,
                shape: Shape::Leaf { host, source: kind.is_source(), params: allowed },
                dependents,
                duration,
                release,
            },
        ))
    }

    /// The context's final output as a node, so it can close a chain.
    pub fn destination(ctx: &Context) -> Node {
        let host = ctx.engine().destination();
        Node::from_parts(
            ctx,
            Parts {
                label: "Destination".to_string(),
                shape: Shape::Leaf { host, source: false, params: &[] },
                dependents: Vec::new(),
                duration: None,
                release: None,
            },
        )
    }

    pub fn context(&self) -> &Context {
        &self.0.ctx
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn id(&self) -> Option<VoiceId> {
        self.0.id.get()
    }

    pub(crate) fn set_id(&self, id: VoiceId) {
        self.0.id.set(Some(id));
    }

    /// Seconds the node runs on its own once started. `None` means unbounded.
    pub fn duration(&self) -> Option<f64> {
        self.0.duration
    }

    /// Seconds the node keeps sounding after `stop`.
    pub fn release(&self) -> Option<f64> {
        self.0.release
    }

    pub fn dependents(&self) -> &[Node] {
        &self.0.dependents
    }

    /// Whether start/stop mean anything for this node.
    pub fn is_startable(&self) -> bool {
        self.0.startable
    }

    pub fn is_connected(&self) -> bool {
        self.0.connected.get()
    }

    pub fn is_disconnected(&self) -> bool {
        self.0.disconnected.get()
    }

    pub fn has_ended(&self) -> bool {
        self.0.ended.get()
    }

    /// Whether this node will ever signal `ended`.
    pub fn emits_ended(&self) -> bool {
        self.0.emits_ended
    }

    pub fn ptr_eq(a: &Node, b: &Node) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// The host node that receives this node's input.
    pub fn input_host(&self) -> HostId {
        match &self.0.shape {
            Shape::Leaf { host, .. } | Shape::Envelope { host, .. } => *host,
            Shape::Series { members } => members[0].input_host(),
            Shape::Parallel { input, .. } => *input,
            Shape::Wrapped { inner } => inner.input_host(),
        }
    }

    /// The host node whose output `connect` routes.
    pub fn output_host(&self) -> HostId {
        match &self.0.shape {
            Shape::Leaf { host, .. } | Shape::Envelope { host, .. } => *host,
            Shape::Series { members } => members[members.len() - 1].output_host(),
            Shape::Parallel { output, .. } => *output,
            Shape::Wrapped { inner } => inner.output_host(),
        }
    }

    pub fn number_of_inputs(&self) -> usize {
        match &self.0.shape {
            Shape::Parallel { .. } => 1,
            Shape::Series { members } => members[0].number_of_inputs(),
            Shape::Wrapped { inner } => inner.number_of_inputs(),
            _ => self.0.ctx.engine().number_of_inputs(self.input_host()),
        }
    }

    /// The host node owning parameter `param`.
    pub fn param_host(&self, param: ParamName) -> Result<HostId, SynthKitError> {
        match &self.0.shape {
            Shape::Leaf { host, params, .. } if params.contains(&param) => Ok(*host),
            Shape::Envelope { host, .. } if param == ParamName::Gain => Ok(*host),
            Shape::Series { members } => members[0].param_host(param),
            Shape::Wrapped { inner } => inner.param_host(param),
            _ => Err(SynthKitError::UnknownParam { node: self.0.label.clone(), param }),
        }
    }

    /// Route this node's output. Returns `self` so calls can be chained.
    pub fn connect<'a>(&self, target: impl Into<Target<'a>>) -> Result<&Self, SynthKitError> {
        let endpoint = match target.into() {
            Target::Node(node) => {
                self.check_context(node)?;
                Endpoint::Node(node.input_host())
            }
            Target::Param(node, param) => {
                self.check_context(node)?;
                Endpoint::Param(node.param_host(param)?, param)
            }
            Target::Destination => Endpoint::Node(self.0.ctx.engine().destination()),
        };
        self.connect_endpoint(endpoint)?;
        Ok(self)
    }

    pub(crate) fn connect_endpoint(&self, endpoint: Endpoint) -> Result<(), SynthKitError> {
        log::trace!("connect {} -> {:?}", self.0.label, endpoint);
        self.0.ctx.engine().connect(self.output_host(), endpoint)?;
        self.0.connected.set(true);
        Ok(())
    }

    fn check_context(&self, other: &Node) -> Result<(), SynthKitError> {
        if self.0.ctx.same(&other.0.ctx) {
            Ok(())
        } else {
            Err(SynthKitError::host(format!(
                "cannot connect {} to {}: nodes belong to different contexts",
                self.0.label, other.0.label
            )))
        }
    }

    /// Start the node at an absolute time, then every startable dependent in
    /// order. A node with a fixed duration schedules its own stop.
    pub fn start(&self, time: f64) -> Result<(), SynthKitError> {
        self.check_time(time)?;
        if !self.0.connected.get() {
            log::debug!("starting {} before it is connected", self.0.label);
        }
        log::debug!("start {} at {time:.4}", self.0.label);
        self.start_own(time)?;
        for dependent in self.0.dependents.iter().filter(|d| d.is_startable()) {
            dependent.start(time)?;
        }
        if let Some(duration) = self.0.duration {
            self.stop(time + duration)?;
        }
        Ok(())
    }

    fn start_own(&self, time: f64) -> Result<(), SynthKitError> {
        match &self.0.shape {
            Shape::Leaf { host, source: true, .. } => {
                if self.0.started.replace(true) {
                    log::debug!("{} already started", self.0.label);
                    return Ok(());
                }
                self.0.ctx.engine().start(*host, time)
            }
            Shape::Envelope { host, attack, .. } => {
                self.0.started.set(true);
                attack.apply(&self.0.ctx, *host, ParamName::Gain, time)
            }
            Shape::Series { members } if members[0].is_startable() => members[0].start(time),
            Shape::Wrapped { inner } if inner.is_startable() => inner.start(time),
            _ => Ok(()),
        }
    }

    /// Stop the node and cascade to its startable dependents.
    ///
    /// Serial composites stop their members last-to-first, each one delayed by
    /// the release time of the members already stopped, so tails further down
    /// the chain keep sounding.
    pub fn stop(&self, time: f64) -> Result<(), SynthKitError> {
        self.check_time(time)?;
        if self.0.disconnected.get() {
            log::debug!("{} is released, ignoring stop", self.0.label);
            return Ok(());
        }
        log::debug!("stop {} at {time:.4}", self.0.label);
        if let Shape::Series { members } = &self.0.shape {
            let mut at = time;
            for member in members.iter().rev().filter(|m| m.is_startable()) {
                member.stop(at)?;
                at += member.release().unwrap_or(0.0);
            }
            return Ok(());
        }
        self.stop_own(time)?;
        for dependent in self.0.dependents.iter().filter(|d| d.is_startable()) {
            dependent.stop(time)?;
        }
        Ok(())
    }

    fn stop_own(&self, time: f64) -> Result<(), SynthKitError> {
        match &self.0.shape {
            Shape::Leaf { host, source: true, .. } => {
                if !self.0.started.get() {
                    log::debug!("{} stopped before it was started", self.0.label);
                    return Ok(());
                }
                self.0.ctx.engine().stop(*host, time)
            }
            Shape::Envelope { host, release: Some(release), .. } => {
                release.apply(&self.0.ctx, *host, ParamName::Gain, time)
            }
            Shape::Wrapped { inner } if inner.is_startable() => inner.stop(time),
            _ => Ok(()),
        }
    }

    /// Give a buffer source or convolver its audio after it was created
    /// without any.
    pub fn set_buffer(&self, buffer: Rc<buffer::AudioBuffer>) -> Result<(), SynthKitError> {
        match &self.0.shape {
            Shape::Leaf { host, .. } => self.0.ctx.engine().set_buffer(*host, buffer),
            Shape::Wrapped { inner } => inner.set_buffer(buffer),
            _ => Err(SynthKitError::Config(format!("{} holds no buffer", self.0.label))),
        }
    }

    /// Disconnect this node and everything it depends on. Terminal.
    pub fn disconnect(&self) -> Result<(), SynthKitError> {
        if self.0.disconnected.replace(true) {
            return Ok(());
        }
        let engine = self.0.ctx.engine();
        match &self.0.shape {
            Shape::Leaf { host, .. } if *host == engine.destination() => {}
            Shape::Leaf { host, .. } | Shape::Envelope { host, .. } => engine.disconnect(*host)?,
            Shape::Series { members } => members[0].disconnect()?,
            Shape::Parallel { input, output } => {
                engine.disconnect(*input)?;
                engine.disconnect(*output)?;
            }
            Shape::Wrapped { inner } => inner.disconnect()?,
        }
        for dependent in &self.0.dependents {
            dependent.disconnect()?;
        }
        self.0.connected.set(false);
        Ok(())
    }

    /// Run `callback` once the node has finished playing. Runs immediately
    /// if it already has.
    pub fn on_ended(&self, callback: impl FnOnce() + 'static) {
        if self.0.ended.get() {
            callback();
        } else {
            self.0.listeners.borrow_mut().push(Box::new(callback));
        }
    }

    fn fire_ended(&self) {
        if self.0.ended.replace(true) {
            return;
        }
        log::debug!("{} ended", self.0.label);
        let listeners = std::mem::take(&mut *self.0.listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
    }

    fn member_ended(&self) {
        let pending = self.0.pending.get().saturating_sub(1);
        self.0.pending.set(pending);
        if pending == 0 {
            self.fire_ended();
        }
    }

    fn check_time(&self, time: f64) -> Result<(), SynthKitError> {
        if time.is_finite() {
            Ok(())
        } else {
            Err(SynthKitError::InvalidTime { node: self.0.label.clone(), time })
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("label", &self.0.label)
            .field("id", &self.0.id.get())
            .field("duration", &self.0.duration)
            .field("release", &self.0.release)
            .field("dependents", &self.0.dependents.len())
            .finish()
    }
}

/// Attach `dependents` to `node`: starting, stopping or disconnecting the
/// returned node does the same to `node` first, then to each dependent in
/// order.
pub fn lifecycle(node: Node, dependents: Vec<Node>) -> Node {
    if dependents.is_empty() {
        return node;
    }
    let ctx = node.context().clone();
    let label = format!("{}+{}", node.label(), dependents.len());
    let duration = node.duration();
    let release = node.release();
    let wrapped = Node::from_parts(
        &ctx,
        Parts { label, shape: Shape::Wrapped { inner: node }, dependents, duration, release },
    );
    wrapped.0.connected.set(match &wrapped.0.shape {
        Shape::Wrapped { inner } => inner.is_connected(),
        _ => false,
    });
    wrapped
}
