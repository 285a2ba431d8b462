//! Name → constructor registry, resolved once at graph build.

use crate::config::NodeDescriptor;
use crate::context::Context;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::NodeBehavior;
use crate::pipeline::node_type::BuiltinNodeType;
use std::collections::BTreeMap;

pub type NodeConstructor =
    Box<dyn Fn(&NodeDescriptor, &Context) -> PipelineResult<Box<dyn NodeBehavior>> + Send + Sync>;

#[derive(Default)]
pub struct NodeRegistry {
    constructors: BTreeMap<String, NodeConstructor>,
}

impl NodeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every [`BuiltinNodeType`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for &ty in BuiltinNodeType::all() {
            registry.register(ty.type_name(), move |desc, _ctx| ty.create(desc));
        }
        registry
    }

    /// Register (or replace) a constructor under `type_name`.
    pub fn register<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn(&NodeDescriptor, &Context) -> PipelineResult<Box<dyn NodeBehavior>>
            + Send
            + Sync
            + 'static,
    {
        if self
            .constructors
            .insert(type_name.to_string(), Box::new(constructor))
            .is_some()
        {
            tracing::debug!("Replaced constructor for node type '{}'", type_name);
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Instantiate the node a descriptor names.
    pub fn create(
        &self,
        desc: &NodeDescriptor,
        context: &Context,
    ) -> PipelineResult<Box<dyn NodeBehavior>> {
        let constructor = self
            .constructors
            .get(&desc.node_type)
            .ok_or_else(|| PipelineError::UnknownNodeType(desc.node_type.clone()))?;
        constructor(desc, context)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::StateSinkNode;

    #[test]
    fn test_builtins_registered() {
        let registry = NodeRegistry::with_builtins();
        for ty in BuiltinNodeType::all() {
            assert!(registry.contains(ty.type_name()));
        }
        assert_eq!(registry.type_names().count(), BuiltinNodeType::all().len());
    }

    #[test]
    fn test_unknown_type() {
        let registry = NodeRegistry::new();
        let desc = NodeDescriptor::new("Mystery", 1, "m");
        assert!(matches!(
            registry.create(&desc, &Context::default()),
            Err(PipelineError::UnknownNodeType(t)) if t == "Mystery"
        ));
    }

    #[test]
    fn test_custom_constructor_sees_context() {
        let mut registry = NodeRegistry::new();
        registry.register("JobSink", |_desc, ctx| {
            let capacity = ctx.job_id.len();
            Ok(Box::new(StateSinkNode::new(capacity)) as Box<dyn NodeBehavior>)
        });
        let desc = NodeDescriptor::new("JobSink", 1, "s");
        let ctx = Context {
            job_id: "abc".into(),
            ..Context::default()
        };
        let node = registry.create(&desc, &ctx).unwrap();
        assert_eq!(
            node.param("capacity"),
            Some(crate::pipeline::packet::ParamValue::Int(3))
        );
    }
}
