use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity under which a component, factory, constant or event topic is bound.
///
/// Defaults to a Rust type (`ServiceId::of::<T>()`, trait objects included) and
/// may be overridden with a plain string key.
#[derive(Clone)]
pub enum ServiceId {
    Type { id: TypeId, name: &'static str },
    Key(Cow<'static, str>),
}

impl ServiceId {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn key(key: impl Into<Cow<'static, str>>) -> Self {
        Self::Key(key.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Type { name, .. } => name,
            Self::Key(key) => key,
        }
    }
}

impl PartialEq for ServiceId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Type { id: a, .. }, Self::Type { id: b, .. }) => a == b,
            (Self::Key(a), Self::Key(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ServiceId {}

impl Hash for ServiceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Type { id, .. } => {
                0u8.hash(state);
                id.hash(state);
            }
            Self::Key(key) => {
                1u8.hash(state);
                key.hash(state);
            }
        }
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type { name, .. } => write!(f, "ServiceId::Type({name})"),
            Self::Key(key) => write!(f, "ServiceId::Key({key:?})"),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&'static str> for ServiceId {
    fn from(key: &'static str) -> Self {
        Self::Key(Cow::Borrowed(key))
    }
}

impl From<String> for ServiceId {
    fn from(key: String) -> Self {
        Self::Key(Cow::Owned(key))
    }
}

/// A `(key, value)` tag attached to a binding.
pub type Tag = (String, String);

/// Narrows resolution to bindings carrying a given name and/or tags.
///
/// An empty constraint accepts every binding of the requested identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraint {
    pub name: Option<String>,
    pub tags: Vec<Tag>,
}

impl Constraint {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            tags: Vec::new(),
        }
    }

    pub fn tagged(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().and_tag(key, value)
    }

    pub fn and_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.tags.is_empty()
    }

    pub(crate) fn matches(&self, name: Option<&str>, tags: &[Tag]) -> bool {
        if let Some(wanted) = &self.name {
            if name != Some(wanted.as_str()) {
                return false;
            }
        }
        self.tags.iter().all(|tag| tags.contains(tag))
    }
}
