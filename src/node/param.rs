//! Parameter binding.
//!
//! A parameter accepts either a literal number, assigned directly, or a node,
//! whose output is connected into the parameter after the parameter's own
//! baseline has been zeroed so the source fully defines the value.

use crate::error::SynthKitError;
use crate::host::{Context, Endpoint, HostId, ParamName};

use super::Node;

#[derive(Debug, Clone)]
pub enum ParamValue {
    Literal(f64),
    Source(Node),
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Literal(value)
    }
}

impl From<Node> for ParamValue {
    fn from(node: Node) -> Self {
        ParamValue::Source(node)
    }
}

impl From<&Node> for ParamValue {
    fn from(node: &Node) -> Self {
        ParamValue::Source(node.clone())
    }
}

/// Bind `value` to `param` on `host`.
///
/// Returns the modulating node when `value` is a source, so the caller can
/// keep it as a lifecycle dependent. `None` leaves the parameter untouched.
pub fn plug(
    ctx: &Context,
    host: HostId,
    param: ParamName,
    value: Option<ParamValue>,
) -> Result<Option<Node>, SynthKitError> {
    match value {
        None => Ok(None),
        Some(ParamValue::Literal(value)) => {
            ctx.engine().set_param(host, param, value)?;
            Ok(None)
        }
        Some(ParamValue::Source(source)) => {
            ctx.engine().set_param(host, param, 0.0)?;
            source.connect_endpoint(Endpoint::Param(host, param))?;
            Ok(Some(source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NodeKind;
    use crate::node::oscillator::sine;
    use crate::node::tests::offline;

    #[test]
    fn literal_assigns_value() {
        let (ctx, engine) = offline();
        let host = ctx.engine().create_node(&NodeKind::Gain).unwrap();
        let bound = plug(&ctx, host, ParamName::Gain, Some(0.25.into())).unwrap();
        assert!(bound.is_none());
        assert_eq!(engine.param(host, ParamName::Gain), Some(0.25));
        assert!(engine.connections_from(host).is_empty());
    }

    #[test]
    fn source_zeroes_baseline_and_connects() {
        let (ctx, engine) = offline();
        let host = ctx.engine().create_node(&NodeKind::Gain).unwrap();
        ctx.engine().set_param(host, ParamName::Gain, 1.0).unwrap();
        let lfo = sine(&ctx, 4.0).unwrap();

        let bound = plug(&ctx, host, ParamName::Gain, Some((&lfo).into())).unwrap();
        assert!(bound.is_some_and(|n| Node::ptr_eq(&n, &lfo)));
        assert_eq!(engine.param(host, ParamName::Gain), Some(0.0));
        assert!(engine.is_connected(lfo.output_host(), Endpoint::Param(host, ParamName::Gain)));
    }

    #[test]
    fn absent_value_is_untouched() {
        let (ctx, engine) = offline();
        let host = ctx.engine().create_node(&NodeKind::Gain).unwrap();
        let before = engine.calls().len();
        assert!(plug(&ctx, host, ParamName::Gain, None).unwrap().is_none());
        assert_eq!(engine.calls().len(), before);
    }
}
