use meridian_common::error::PlanResult;

use super::{Node, NodeId, Plan, PrimitiveBuilder};
use crate::engine::{Primitive, PulloutOpcode, PulloutSubquery};

/// Runs an uncorrelated subquery first and hands its result to the
/// underlying plan as bind variables.
#[derive(Debug)]
pub(crate) struct PulloutNode {
    pub order: usize,
    pub opcode: PulloutOpcode,
    pub sq_name: String,
    pub has_values: String,
    pub subquery: NodeId,
    pub underlying: NodeId,
}

/// A pulled-out subquery waiting for the plan it will sit on top of.
#[derive(Debug, Clone)]
pub(crate) struct PendingPullout {
    pub opcode: PulloutOpcode,
    pub sq_name: String,
    pub has_values: String,
    pub subquery: NodeId,
}

impl Plan<'_> {
    pub(crate) fn pullout_reorder(&mut self, id: NodeId, order: usize) {
        let (subquery, underlying) = match &self.nodes[id.0] {
            Node::Pullout(p) => (p.subquery, p.underlying),
            _ => return,
        };
        self.reorder(subquery, order);
        let sub_order = self.order(subquery);
        self.reorder(underlying, sub_order);
        let next = self.order(underlying) + 1;
        self.set_order(id, next);
    }

    /// Stack each pullout on top of the current plan root.
    pub(crate) fn add_pullouts(&mut self, pb: &mut PrimitiveBuilder, pullouts: Vec<PendingPullout>) {
        for p in pullouts {
            let id = self.add_node(Node::Pullout(PulloutNode {
                order: 0,
                opcode: p.opcode,
                sq_name: p.sq_name,
                has_values: p.has_values,
                subquery: p.subquery,
                underlying: pb.bldr,
            }));
            pb.bldr = id;
            self.reorder(id, 0);
        }
    }

    pub(crate) fn pullout_primitive(&self, p: &PulloutNode) -> PlanResult<Primitive> {
        Ok(Primitive::PulloutSubquery(PulloutSubquery {
            opcode: p.opcode,
            subquery_name: p.sq_name.clone(),
            has_values: p.has_values.clone(),
            subquery: Box::new(self.primitive(p.subquery)?),
            underlying: Box::new(self.primitive(p.underlying)?),
        }))
    }
}
