//! Matchers and mailets every container ships with.

pub mod mailets;
pub mod matchers;

use std::sync::Arc;

pub use mailets::{AddHeader, Null, Requeue, SetAttribute, ToProcessor, ToRepository};
pub use matchers::{
    All, And, HasAttribute, HostIs, Inverted, Not, Or, RecipientIs, SenderIsNull,
};

use crate::registry::Registry;

pub(crate) fn register(registry: &mut Registry) {
    registry.register_matcher("All", 1, |_| Ok(Arc::new(All)));
    registry.register_matcher("RecipientIs", 1, |config| {
        Ok(Arc::new(RecipientIs::from_config(config)?))
    });
    registry.register_matcher("HostIs", 1, |config| Ok(Arc::new(HostIs::from_config(config)?)));
    registry.register_matcher("SenderIsNull", 1, |_| Ok(Arc::new(SenderIsNull)));
    registry.register_matcher("HasAttribute", 1, |config| {
        Ok(Arc::new(HasAttribute::from_config(config)?))
    });

    registry.register_composite("And", 1, |config, children| {
        Ok(Arc::new(And::new(config, children)?))
    });
    registry.register_composite("Or", 1, |config, children| {
        Ok(Arc::new(Or::new(config, children)?))
    });
    registry.register_composite("Not", 1, |config, children| {
        Ok(Arc::new(Not::new(config, children)?))
    });

    registry.register_mailet("Null", 1, |_, _| Ok(Arc::new(Null)));
    registry.register_mailet("ToProcessor", 1, |config, _| {
        Ok(Arc::new(ToProcessor::from_config(config)?))
    });
    registry.register_mailet("ToRepository", 1, |config, context| {
        Ok(Arc::new(ToRepository::from_config(config, context)?))
    });
    registry.register_mailet("AddHeader", 1, |config, _| {
        Ok(Arc::new(AddHeader::from_config(config)?))
    });
    registry.register_mailet("SetAttribute", 1, |config, _| {
        Ok(Arc::new(SetAttribute::from_config(config)?))
    });
    registry.register_mailet("Requeue", 1, |config, context| {
        Ok(Arc::new(Requeue::from_config(config, context)?))
    });
}
