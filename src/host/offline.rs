//! A host engine that renders nothing and records everything.
//!
//! `OfflineEngine` keeps a manual clock and a log of every call made against
//! it, so graphs and schedules can be inspected deterministically. Advancing
//! the clock fires `ended` callbacks for sources whose stop time (or buffer
//! end) has passed, the way a real engine would.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::SynthKitError;
use crate::node::buffer::AudioBuffer;

use super::{Automation, Endpoint, Engine, HostId, NodeKind, ParamName};

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Create { node: HostId, kind: &'static str },
    Connect { from: HostId, to: Endpoint },
    Disconnect { node: HostId },
    Start { node: HostId, time: f64 },
    Stop { node: HostId, time: f64 },
    SetParam { node: HostId, param: ParamName, value: f64 },
    SetBuffer { node: HostId },
    Schedule { node: HostId, param: ParamName, event: Automation },
}

struct HostNode {
    kind: &'static str,
    inputs: usize,
    source: bool,
    params: BTreeMap<ParamName, f64>,
    /// Playback length of a non-looping buffer.
    natural_length: Option<f64>,
    has_buffer: bool,
    started: Option<f64>,
    stop_at: Option<f64>,
    ended: bool,
    disconnected: bool,
    callbacks: Vec<Box<dyn FnMut()>>,
}

impl HostNode {
    fn end_time(&self) -> Option<f64> {
        let start = self.started?;
        match (self.stop_at, self.natural_length) {
            (Some(stop), Some(len)) => Some(stop.min(start + len)),
            (Some(stop), None) => Some(stop),
            (None, Some(len)) => Some(start + len),
            (None, None) => None,
        }
    }
}

struct State {
    now: f64,
    nodes: Vec<HostNode>,
    calls: Vec<HostCall>,
}

impl State {
    fn node(&self, id: HostId) -> Result<&HostNode, SynthKitError> {
        self.nodes
            .get(id.0 as usize)
            .ok_or_else(|| SynthKitError::host(format!("unknown host node {id}")))
    }

    fn node_mut(&mut self, id: HostId) -> Result<&mut HostNode, SynthKitError> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or_else(|| SynthKitError::host(format!("unknown host node {id}")))
    }
}

pub struct OfflineEngine {
    sample_rate: f64,
    state: RefCell<State>,
}

impl OfflineEngine {
    pub fn new(sample_rate: f64) -> Self {
        let destination = HostNode {
            kind: "Destination",
            inputs: 1,
            source: false,
            params: BTreeMap::new(),
            natural_length: None,
            has_buffer: false,
            started: None,
            stop_at: None,
            ended: false,
            disconnected: false,
            callbacks: Vec::new(),
        };
        OfflineEngine {
            sample_rate,
            state: RefCell::new(State { now: 0.0, nodes: vec![destination], calls: Vec::new() }),
        }
    }

    /// Move the clock forward to `time` and fire `ended` for every source
    /// that has finished by then, in end-time order.
    pub fn advance_to(&self, time: f64) {
        {
            let mut state = self.state.borrow_mut();
            state.now = state.now.max(time);
        }
        // Callbacks may schedule new stops, so keep collecting until quiet.
        loop {
            let mut due: Vec<(f64, HostId, Vec<Box<dyn FnMut()>>)> = Vec::new();
            {
                let mut state = self.state.borrow_mut();
                let now = state.now;
                for (i, node) in state.nodes.iter_mut().enumerate() {
                    if node.ended || !node.source {
                        continue;
                    }
                    if let Some(end) = node.end_time().filter(|end| *end <= now) {
                        node.ended = true;
                        due.push((end, HostId(i as u32), std::mem::take(&mut node.callbacks)));
                    }
                }
            }
            if due.is_empty() {
                break;
            }
            due.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            for (_, _, callbacks) in due.iter_mut() {
                for callback in callbacks.iter_mut() {
                    callback();
                }
            }
        }
    }

    pub fn advance(&self, seconds: f64) {
        let now = self.state.borrow().now;
        self.advance_to(now + seconds);
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Automation events scheduled on one parameter, in call order.
    pub fn automation(&self, node: HostId, param: ParamName) -> Vec<Automation> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                HostCall::Schedule { node: n, param: p, event } if *n == node && *p == param => {
                    Some(*event)
                }
                _ => None,
            })
            .collect()
    }

    /// `(node, time)` of every start call, in call order.
    pub fn starts(&self) -> Vec<(HostId, f64)> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                HostCall::Start { node, time } => Some((*node, *time)),
                _ => None,
            })
            .collect()
    }

    /// `(node, time)` of every stop call, in call order.
    pub fn stops(&self) -> Vec<(HostId, f64)> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                HostCall::Stop { node, time } => Some((*node, *time)),
                _ => None,
            })
            .collect()
    }

    pub fn connections_from(&self, node: HostId) -> Vec<Endpoint> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                HostCall::Connect { from, to } if *from == node => Some(*to),
                _ => None,
            })
            .collect()
    }

    pub fn is_connected(&self, from: HostId, to: Endpoint) -> bool {
        self.connections_from(from).contains(&to)
    }

    pub fn param(&self, node: HostId, param: ParamName) -> Option<f64> {
        let state = self.state.borrow();
        state.nodes.get(node.0 as usize)?.params.get(&param).copied()
    }

    pub fn kind_of(&self, node: HostId) -> Option<&'static str> {
        self.state.borrow().nodes.get(node.0 as usize).map(|n| n.kind)
    }

    pub fn stop_time(&self, node: HostId) -> Option<f64> {
        self.state.borrow().nodes.get(node.0 as usize).and_then(|n| n.stop_at)
    }

    pub fn has_ended(&self, node: HostId) -> bool {
        self.state.borrow().nodes.get(node.0 as usize).is_some_and(|n| n.ended)
    }

    /// Whether a buffer source or convolver has audio to play.
    pub fn has_buffer(&self, node: HostId) -> bool {
        self.state.borrow().nodes.get(node.0 as usize).is_some_and(|n| n.has_buffer)
    }

    pub fn is_disconnected(&self, node: HostId) -> bool {
        self.state.borrow().nodes.get(node.0 as usize).is_some_and(|n| n.disconnected)
    }

    /// Number of nodes created, excluding the destination.
    pub fn created(&self) -> usize {
        self.state.borrow().nodes.len() - 1
    }
}

impl Engine for OfflineEngine {
    fn current_time(&self) -> f64 {
        self.state.borrow().now
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn destination(&self) -> HostId {
        HostId(0)
    }

    fn create_node(&self, kind: &NodeKind) -> Result<HostId, SynthKitError> {
        let has_buffer = matches!(
            kind,
            NodeKind::BufferSource { buffer: Some(_), .. } | NodeKind::Convolver { buffer: Some(_), .. }
        );
        let natural_length = match kind {
            NodeKind::BufferSource { buffer: Some(buffer), looping: false } => {
                Some(buffer.duration())
            }
            _ => None,
        };
        let mut state = self.state.borrow_mut();
        let id = HostId(state.nodes.len() as u32);
        state.nodes.push(HostNode {
            kind: kind.name(),
            inputs: kind.inputs(),
            source: kind.is_source(),
            params: kind.params().iter().map(|p| (*p, 0.0)).collect(),
            natural_length,
            has_buffer,
            started: None,
            stop_at: None,
            ended: false,
            disconnected: false,
            callbacks: Vec::new(),
        });
        state.calls.push(HostCall::Create { node: id, kind: kind.name() });
        Ok(id)
    }

    fn number_of_inputs(&self, node: HostId) -> usize {
        self.state.borrow().nodes.get(node.0 as usize).map_or(0, |n| n.inputs)
    }

    fn connect(&self, from: HostId, to: Endpoint) -> Result<(), SynthKitError> {
        let mut state = self.state.borrow_mut();
        state.node(from)?;
        match to {
            Endpoint::Node(target) => {
                if state.node(target)?.inputs == 0 {
                    return Err(SynthKitError::host(format!("{target} has no inputs")));
                }
            }
            Endpoint::Param(target, param) => {
                if !state.node(target)?.params.contains_key(&param) {
                    return Err(SynthKitError::host(format!("{target} has no parameter {param}")));
                }
            }
        }
        state.calls.push(HostCall::Connect { from, to });
        Ok(())
    }

    fn disconnect(&self, node: HostId) -> Result<(), SynthKitError> {
        let mut state = self.state.borrow_mut();
        state.node_mut(node)?.disconnected = true;
        state.calls.push(HostCall::Disconnect { node });
        Ok(())
    }

    fn start(&self, node: HostId, time: f64) -> Result<(), SynthKitError> {
        let mut state = self.state.borrow_mut();
        let host = state.node_mut(node)?;
        if !host.source {
            return Err(SynthKitError::host(format!("{} {node} cannot be started", host.kind)));
        }
        if host.started.is_some() {
            return Err(SynthKitError::host(format!("{} {node} already started", host.kind)));
        }
        host.started = Some(time);
        state.calls.push(HostCall::Start { node, time });
        Ok(())
    }

    fn stop(&self, node: HostId, time: f64) -> Result<(), SynthKitError> {
        let mut state = self.state.borrow_mut();
        let host = state.node_mut(node)?;
        if host.started.is_none() {
            return Err(SynthKitError::host(format!("{} {node} stopped before start", host.kind)));
        }
        host.stop_at = Some(time);
        state.calls.push(HostCall::Stop { node, time });
        Ok(())
    }

    fn set_param(&self, node: HostId, param: ParamName, value: f64) -> Result<(), SynthKitError> {
        let mut state = self.state.borrow_mut();
        let host = state.node_mut(node)?;
        match host.params.get_mut(&param) {
            Some(slot) => *slot = value,
            None => {
                return Err(SynthKitError::host(format!("{node} has no parameter {param}")));
            }
        }
        state.calls.push(HostCall::SetParam { node, param, value });
        Ok(())
    }

    fn set_buffer(&self, node: HostId, _buffer: Rc<AudioBuffer>) -> Result<(), SynthKitError> {
        let mut state = self.state.borrow_mut();
        let host = state.node_mut(node)?;
        if !matches!(host.kind, "BufferSource" | "Convolver") {
            return Err(SynthKitError::host(format!("{} {node} holds no buffer", host.kind)));
        }
        host.has_buffer = true;
        state.calls.push(HostCall::SetBuffer { node });
        Ok(())
    }

    fn schedule(
        &self,
        node: HostId,
        param: ParamName,
        event: Automation,
    ) -> Result<(), SynthKitError> {
        let mut state = self.state.borrow_mut();
        if !state.node(node)?.params.contains_key(&param) {
            return Err(SynthKitError::host(format!("{node} has no parameter {param}")));
        }
        state.calls.push(HostCall::Schedule { node, param, event });
        Ok(())
    }

    fn on_ended(&self, node: HostId, callback: Box<dyn FnMut()>) {
        if let Some(host) = self.state.borrow_mut().nodes.get_mut(node.0 as usize) {
            host.callbacks.push(callback);
        }
    }
}
