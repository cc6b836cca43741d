//! Serial and parallel composition.

use crate::error::SynthKitError;
use crate::host::{Endpoint, NodeKind, ParamName};

use super::{Node, Parts, Shape};

/// Chain `nodes` output-to-input.
///
/// The composite's input is the first node's, its output the last node's.
/// Starting it starts every startable member in order. Stopping it stops
/// members from last to first, each one after the releases of those already
/// stopped. An empty list yields `None`, a single node is returned as-is.
pub fn connect_series(nodes: Vec<Node>) -> Result<Option<Node>, SynthKitError> {
    let mut nodes = nodes.into_iter();
    match nodes.next() {
        None => Ok(None),
        Some(first) => series_of(first, nodes.collect()).map(Some),
    }
}

/// Feed one input into every branch and sum all branch outputs.
///
/// The composite has a fixed duration only when every branch does, and ends
/// once all branches that can end have ended.
pub fn connect_parallel(nodes: Vec<Node>) -> Result<Option<Node>, SynthKitError> {
    let mut nodes = nodes.into_iter();
    match nodes.next() {
        None => Ok(None),
        Some(first) => parallel_of(first, nodes.collect()).map(Some),
    }
}

pub(crate) fn series_of(first: Node, rest: Vec<Node>) -> Result<Node, SynthKitError> {
    if rest.is_empty() {
        return Ok(first);
    }
    let mut members = Vec::with_capacity(rest.len() + 1);
    members.push(first);
    members.extend(rest);

    for pair in members.windows(2) {
        if pair[1].number_of_inputs() == 0 {
            log::debug!("{} takes no input, not chaining {} into it", pair[1].label(), pair[0].label());
            continue;
        }
        pair[0].connect(&pair[1])?;
    }

    let duration = members.iter().map(|m| m.duration().unwrap_or(0.0)).fold(0.0, f64::max);
    let release: f64 = members
        .iter()
        .filter(|m| m.is_startable())
        .map(|m| m.release().unwrap_or(0.0))
        .sum();
    let label = format!("Series({}..{})", members[0].label(), members[members.len() - 1].label());
    let ctx = members[0].context().clone();
    let dependents = members[1..].to_vec();
    Ok(Node::from_parts(
        &ctx,
        Parts {
            label,
            shape: Shape::Series { members },
            dependents,
            duration: Some(duration),
            release: Some(release),
        },
    ))
}

pub(crate) fn parallel_of(first: Node, rest: Vec<Node>) -> Result<Node, SynthKitError> {
    let ctx = first.context().clone();
    let mut branches = Vec::with_capacity(rest.len() + 1);
    branches.push(first);
    branches.extend(rest);

    let engine = ctx.engine();
    let input = engine.create_node(&NodeKind::Gain)?;
    let output = engine.create_node(&NodeKind::Gain)?;
    engine.set_param(input, ParamName::Gain, 1.0)?;
    engine.set_param(output, ParamName::Gain, 1.0)?;

    for branch in &branches {
        if branch.number_of_inputs() > 0 {
            engine.connect(input, Endpoint::Node(branch.input_host()))?;
        }
        branch.connect_endpoint(Endpoint::Node(output))?;
    }

    let duration = branches
        .iter()
        .map(Node::duration)
        .try_fold(0.0, |acc: f64, d| d.map(|d| acc.max(d)));
    let release = branches.iter().map(|b| b.release().unwrap_or(0.0)).fold(0.0, f64::max);
    Ok(Node::from_parts(
        &ctx,
        Parts {
            label: format!("Parallel{input}"),
            shape: Shape::Parallel { input, output },
            dependents: branches,
            duration,
            release: Some(release),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::offline::HostCall;
    use crate::node::envelope::{AdsrConfig, adsr, perc};
    use crate::node::oscillator::sine;
    use crate::node::signal::gain;
    use crate::node::tests::offline;
    use float_cmp::approx_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn empty_and_single() {
        let (ctx, _) = offline();
        assert!(connect_series(Vec::new()).unwrap().is_none());
        assert!(connect_parallel(Vec::new()).unwrap().is_none());
        let only = gain(&ctx, 1.0).unwrap();
        let same = connect_series(vec![only.clone()]).unwrap().unwrap();
        assert!(Node::ptr_eq(&only, &same));
    }

    #[test]
    fn series_wires_head_to_tail() {
        let (ctx, engine) = offline();
        let a = sine(&ctx, 440.0).unwrap();
        let b = gain(&ctx, 0.5).unwrap();
        let c = gain(&ctx, 0.25).unwrap();
        let chain = connect_series(vec![a.clone(), b.clone(), c.clone()]).unwrap().unwrap();
        assert!(engine.is_connected(a.output_host(), Endpoint::Node(b.input_host())));
        assert!(engine.is_connected(b.output_host(), Endpoint::Node(c.input_host())));
        assert_eq!(chain.input_host(), a.input_host());
        assert_eq!(chain.output_host(), c.output_host());
        assert_eq!(chain.param_host(ParamName::Frequency).unwrap(), a.output_host());
    }

    #[test]
    fn series_duration_is_longest_member() {
        let (ctx, engine) = offline();
        let tone = sine(&ctx, 440.0).unwrap();
        let env = perc(&ctx, Some(0.01), Some(0.2)).unwrap();
        let voice = connect_series(vec![tone.clone(), env]).unwrap().unwrap();
        assert!(approx_eq!(f64, voice.duration().unwrap(), 0.21, epsilon = 1e-9));

        voice.start(1.0).unwrap();
        let stops = engine.stops();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].0, tone.output_host());
        assert!(approx_eq!(f64, stops[0].1, 1.21, epsilon = 1e-9));
    }

    #[test]
    fn series_without_durations_is_unbounded() {
        let (ctx, _) = offline();
        let voice = connect_series(vec![sine(&ctx, 440.0).unwrap(), gain(&ctx, 1.0).unwrap()])
            .unwrap()
            .unwrap();
        assert_eq!(voice.duration(), None);
    }

    #[test]
    fn series_starts_in_order_and_stops_in_reverse() {
        let (ctx, engine) = offline();
        let tone = sine(&ctx, 440.0).unwrap();
        let b = adsr(&ctx, &AdsrConfig { release: 0.2, ..AdsrConfig::default() }).unwrap();
        let c = adsr(&ctx, &AdsrConfig { release: 0.5, ..AdsrConfig::default() }).unwrap();
        let voice = connect_series(vec![tone.clone(), b.clone(), c.clone()]).unwrap().unwrap();

        voice.start(0.0).unwrap();
        let first_schedule = |host| {
            engine
                .calls()
                .iter()
                .position(|call| matches!(call, HostCall::Schedule { node, .. } if *node == host))
                .unwrap()
        };
        assert!(first_schedule(b.output_host()) < first_schedule(c.output_host()));

        engine.clear_calls();
        voice.stop(2.0).unwrap();
        let timeline: Vec<_> = engine
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Schedule { node, event, .. } => Some((node, event.time)),
                HostCall::Stop { node, time } => Some((node, time)),
                _ => None,
            })
            .collect();
        let expected = [
            (c.output_host(), 2.0),
            (c.output_host(), 2.5),
            (b.output_host(), 2.5),
            (b.output_host(), 2.7),
            (tone.output_host(), 2.7),
        ];
        assert_eq!(timeline.len(), expected.len());
        for ((host, at), (want_host, want_at)) in timeline.iter().zip(expected) {
            assert_eq!(*host, want_host);
            assert!(approx_eq!(f64, *at, want_at, epsilon = 1e-9));
        }
    }

    #[test]
    fn series_stop_waits_for_downstream_release() {
        let (ctx, engine) = offline();
        let tone = sine(&ctx, 440.0).unwrap();
        let env = adsr(&ctx, &AdsrConfig { release: 0.3, ..AdsrConfig::default() }).unwrap();
        let voice = connect_series(vec![tone.clone(), env.clone()]).unwrap().unwrap();
        assert!(approx_eq!(f64, voice.release().unwrap(), 0.3, epsilon = 1e-9));

        voice.start(0.0).unwrap();
        voice.stop(1.0).unwrap();
        // the envelope releases at 1.0, the oscillator keeps going through it
        let release = engine.automation(env.output_host(), ParamName::Gain);
        assert_eq!(release[release.len() - 2].time, 1.0);
        assert_eq!(engine.stops().len(), 1);
        assert!(approx_eq!(f64, engine.stops()[0].1, 1.3, epsilon = 1e-9));
    }

    #[test]
    fn parallel_feeds_every_branch() {
        let (ctx, engine) = offline();
        let a = gain(&ctx, 1.0).unwrap();
        let b = gain(&ctx, 0.5).unwrap();
        let tone = sine(&ctx, 220.0).unwrap();
        let mix = connect_parallel(vec![a.clone(), b.clone(), tone.clone()]).unwrap().unwrap();
        let input = mix.input_host();
        let output = mix.output_host();
        assert!(engine.is_connected(input, Endpoint::Node(a.input_host())));
        assert!(engine.is_connected(input, Endpoint::Node(b.input_host())));
        assert!(!engine.is_connected(input, Endpoint::Node(tone.input_host())));
        for branch in [&a, &b, &tone] {
            assert!(engine.is_connected(branch.output_host(), Endpoint::Node(output)));
        }
        assert_eq!(engine.param(input, ParamName::Gain), Some(1.0));
        assert!(mix.param_host(ParamName::Gain).is_err());
    }

    #[test]
    fn parallel_duration_needs_every_branch() {
        let (ctx, _) = offline();
        let short = perc(&ctx, Some(0.01), Some(0.1)).unwrap();
        let long = perc(&ctx, Some(0.01), Some(0.5)).unwrap();
        let bounded = connect_parallel(vec![short.clone(), long]).unwrap().unwrap();
        assert!(approx_eq!(f64, bounded.duration().unwrap(), 0.51, epsilon = 1e-9));

        let open = connect_parallel(vec![short, sine(&ctx, 100.0).unwrap()]).unwrap().unwrap();
        assert_eq!(open.duration(), None);
    }

    #[test]
    fn parallel_ends_after_every_branch() {
        let (ctx, engine) = offline();
        let a = sine(&ctx, 100.0).unwrap();
        let b = sine(&ctx, 200.0).unwrap();
        let passive = gain(&ctx, 1.0).unwrap();
        let mix = connect_parallel(vec![a.clone(), b.clone(), passive]).unwrap().unwrap();
        let ended = Rc::new(Cell::new(false));
        let flag = ended.clone();
        mix.on_ended(move || flag.set(true));

        mix.start(0.0).unwrap();
        a.stop(1.0).unwrap();
        b.stop(2.0).unwrap();
        engine.advance_to(1.5);
        assert!(!ended.get());
        engine.advance_to(2.0);
        assert!(ended.get());
    }

    #[test]
    fn shared_branch_ends_the_mix_once() {
        let (ctx, engine) = offline();
        let tone = sine(&ctx, 220.0).unwrap();
        let mix = connect_parallel(vec![tone.clone(), tone.clone()]).unwrap().unwrap();
        assert!(mix.emits_ended());
        let ends = Rc::new(Cell::new(0));
        let count = ends.clone();
        mix.on_ended(move || count.set(count.get() + 1));

        mix.start(0.0).unwrap();
        mix.stop(1.0).unwrap();
        engine.advance_to(1.0);
        assert!(mix.has_ended());
        assert_eq!(ends.get(), 1);
    }

    #[test]
    fn series_ends_after_every_member() {
        let (ctx, engine) = offline();
        let tone = sine(&ctx, 440.0).unwrap();
        let env = perc(&ctx, None, None).unwrap();
        let voice = connect_series(vec![tone, env]).unwrap().unwrap();
        assert!(voice.emits_ended());
        voice.start(0.0).unwrap();
        engine.advance_to(0.1);
        assert!(!voice.has_ended());
        engine.advance_to(1.0);
        assert!(voice.has_ended());
    }
}
