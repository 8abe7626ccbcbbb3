mod descriptor;
mod identifier;
mod injectable;
mod scope;

pub use descriptor::{ComponentDescriptor, ComponentScope, ConstantDescriptor, FactoryDescriptor};
pub use identifier::{Constraint, ServiceId, Tag};
pub use injectable::Injectable;
pub use scope::{Instance, ProviderFn, Scope};

pub(crate) use scope::{Binding, downcast};
