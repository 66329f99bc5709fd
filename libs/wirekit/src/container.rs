//! Lazy-singleton dependency container.
//!
//! The container maps a [`BeanKey`] (type, plus an optional instance name) to
//! a slot holding either a ready instance or a deferred factory. Resolution is
//! depth-first and memoized: a factory runs at most once, and every later
//! `resolve` returns the same `Arc`.
//!
//! Concurrency model: each slot carries its own mutex. Two threads racing to
//! resolve the same unresolved key perform exactly one construction — the
//! loser blocks on the slot lock until the winner has published the instance.
//! Cycle detection uses a thread-local stack of in-flight keys, checked before
//! the slot lock is taken, so a same-thread cycle fails with the full chain
//! instead of deadlocking.

use std::any::{type_name, Any, TypeId};
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

/// Type-erased instance stored in a slot.
pub type AnyInstance = Arc<dyn Any + Send + Sync>;

/// Type-erased deferred producer for a bean.
pub type BeanFactory = Box<dyn FnOnce(&Container) -> anyhow::Result<AnyInstance> + Send>;

/// Types constructible from the container, pulling their dependencies via
/// [`Container::resolve`].
pub trait Injectable: Sized + Send + Sync + 'static {
    fn construct(container: &Container) -> anyhow::Result<Self>;
}

/// Lookup key for a managed bean: the concrete type, optionally qualified by
/// an instance name so several beans of one type can coexist.
#[derive(Clone, Eq)]
pub struct BeanKey {
    type_id: TypeId,
    type_name: &'static str,
    name: Option<Cow<'static, str>>,
}

impl BeanKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: None,
        }
    }

    pub fn named<T: 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: Some(name.into()),
        }
    }

    /// Build a key from raw descriptor parts (used by the catalog, where the
    /// concrete type is only known through its registration).
    pub fn from_parts(type_id: TypeId, type_name: &'static str, name: Option<&'static str>) -> Self {
        Self {
            type_id,
            type_name,
            name: name.map(Cow::Borrowed),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

// Identity is (type, name); the type name rides along for diagnostics only.
impl PartialEq for BeanKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Hash for BeanKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for BeanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}[{}]", self.type_name, name),
            None => f.write_str(self.type_name),
        }
    }
}

impl fmt::Debug for BeanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BeanKey({self})")
    }
}

/// Structured errors for container registration and resolution.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("no bean registered for '{0}'")]
    MissingBean(BeanKey),
    #[error("circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },
    #[error("no suitable constructor for '{type_name}'")]
    NoSuitableConstructor { type_name: &'static str },
    #[error("construction of '{key}' failed")]
    Construction {
        key: BeanKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("bean '{key}' is not of the requested type '{requested}'")]
    TypeMismatch {
        key: BeanKey,
        requested: &'static str,
    },
}

enum SlotState {
    Registered(BeanFactory),
    Resolving,
    Ready(AnyInstance),
    Failed(String),
}

struct Slot {
    state: Mutex<SlotState>,
}

impl Slot {
    fn new(state: SlotState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }
}

thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<BeanKey>> = const { RefCell::new(Vec::new()) };
}

/// Pops its key from the thread-local resolution stack on drop, so the stack
/// stays correct on every early return.
struct StackFrame;

impl StackFrame {
    fn push(key: BeanKey) -> Self {
        RESOLUTION_STACK.with(|stack| stack.borrow_mut().push(key));
        StackFrame
    }
}

impl Drop for StackFrame {
    fn drop(&mut self) {
        RESOLUTION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The dependency container. Cheap to share behind an `Arc`; all methods take
/// `&self`.
#[derive(Default)]
pub struct Container {
    slots: DashMap<BeanKey, Arc<Slot>>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.slots.iter().map(|e| e.key().to_string()).collect();
        f.debug_struct("Container").field("beans", &keys).finish()
    }
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a ready instance under its type key. Registering the identical
    /// instance again is a no-op; a different instance replaces the old one
    /// and the replacement is logged.
    pub fn register_instance<T: Send + Sync + 'static>(&self, value: T) {
        self.insert_ready(BeanKey::of::<T>(), Arc::new(value));
    }

    pub fn register_instance_named<T: Send + Sync + 'static>(
        &self,
        name: impl Into<Cow<'static, str>>,
        value: T,
    ) {
        self.insert_ready(BeanKey::named::<T>(name), Arc::new(value));
    }

    /// Store an already-shared instance under its type key.
    pub fn register_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.insert_ready(BeanKey::of::<T>(), value);
    }

    /// Register a deferred producer. The factory runs at most once, on the
    /// first `resolve` of the key.
    pub fn register_factory<T, F>(&self, factory: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Container) -> anyhow::Result<T> + Send + 'static,
    {
        self.register_with_key(
            BeanKey::of::<T>(),
            Box::new(move |c| factory(c).map(|v| Arc::new(v) as AnyInstance)),
        );
    }

    pub fn register_factory_named<T, F>(&self, name: impl Into<Cow<'static, str>>, factory: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Container) -> anyhow::Result<T> + Send + 'static,
    {
        self.register_with_key(
            BeanKey::named::<T>(name),
            Box::new(move |c| factory(c).map(|v| Arc::new(v) as AnyInstance)),
        );
    }

    /// Register a type whose construction strategy is its [`Injectable`] impl.
    pub fn register_type<T: Injectable>(&self) {
        self.register_factory(T::construct);
    }

    /// Register a type-erased factory under an explicit key. This is the
    /// entry point the catalog uses for discovered descriptors.
    pub fn register_with_key(&self, key: BeanKey, factory: BeanFactory) {
        use dashmap::mapref::entry::Entry;
        match self.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                tracing::warn!(bean = %occupied.key(), "replacing existing bean registration");
                occupied.insert(Slot::new(SlotState::Registered(factory)));
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(bean = %vacant.key(), "bean registered");
                vacant.insert(Slot::new(SlotState::Registered(factory)));
            }
        }
    }

    fn insert_ready(&self, key: BeanKey, value: AnyInstance) {
        use dashmap::mapref::entry::Entry;
        match self.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                let same = {
                    let state = occupied.get().state.lock();
                    matches!(&*state, SlotState::Ready(existing) if Arc::ptr_eq(existing, &value))
                };
                if same {
                    return;
                }
                tracing::warn!(bean = %occupied.key(), "replacing existing bean instance");
                occupied.insert(Slot::new(SlotState::Ready(value)));
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(bean = %vacant.key(), "bean instance registered");
                vacant.insert(Slot::new(SlotState::Ready(value)));
            }
        }
    }

    /// Existence check; never triggers construction.
    pub fn has<T: 'static>(&self) -> bool {
        self.has_key(&BeanKey::of::<T>())
    }

    pub fn has_key(&self, key: &BeanKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ContainerError> {
        self.resolve_typed(BeanKey::of::<T>())
    }

    pub fn resolve_named<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<T>, ContainerError> {
        self.resolve_typed(BeanKey::named::<T>(name.to_owned()))
    }

    fn resolve_typed<T: Send + Sync + 'static>(
        &self,
        key: BeanKey,
    ) -> Result<Arc<T>, ContainerError> {
        let value = self.resolve_key(&key)?;
        value.downcast::<T>().map_err(|_| ContainerError::TypeMismatch {
            key,
            requested: type_name::<T>(),
        })
    }

    /// Type-erased resolution. Runs the factory on first call, caches the
    /// instance, and fails with the full chain on a cycle.
    pub fn resolve_key(&self, key: &BeanKey) -> Result<AnyInstance, ContainerError> {
        let slot = self
            .slots
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ContainerError::MissingBean(key.clone()))?;

        // The cycle test must come before the slot lock: a same-thread
        // re-entry would otherwise deadlock on its own mutex.
        let already_resolving =
            RESOLUTION_STACK.with(|stack| stack.borrow().iter().any(|k| k == key));
        if already_resolving {
            return Err(ContainerError::CircularDependency {
                chain: self.chain_with(key),
            });
        }

        let _frame = StackFrame::push(key.clone());
        let mut state = slot.state.lock();
        match &mut *state {
            SlotState::Ready(value) => Ok(value.clone()),
            SlotState::Failed(message) => Err(ContainerError::Construction {
                key: key.clone(),
                source: anyhow::anyhow!(message.clone()),
            }),
            SlotState::Resolving => Err(ContainerError::CircularDependency {
                chain: self.chain_with(key),
            }),
            SlotState::Registered(_) => {
                let factory = match std::mem::replace(&mut *state, SlotState::Resolving) {
                    SlotState::Registered(factory) => factory,
                    _ => unreachable!("state checked above"),
                };
                // The slot lock is held across construction: a racing thread
                // blocks here and observes Ready (or Failed) afterwards.
                match factory(self) {
                    Ok(value) => {
                        *state = SlotState::Ready(value.clone());
                        tracing::debug!(bean = %key, "bean constructed");
                        Ok(value)
                    }
                    Err(source) => {
                        *state = SlotState::Failed(format!("{source:#}"));
                        tracing::error!(bean = %key, error = %source, "bean construction failed");
                        // A cycle detected deeper in the graph surfaces as-is,
                        // with its chain intact, instead of being buried under
                        // one Construction wrapper per dependent.
                        if let Some(ContainerError::CircularDependency { chain }) =
                            source.downcast_ref::<ContainerError>()
                        {
                            return Err(ContainerError::CircularDependency {
                                chain: chain.clone(),
                            });
                        }
                        Err(ContainerError::Construction {
                            key: key.clone(),
                            source,
                        })
                    }
                }
            }
        }
    }

    fn chain_with(&self, key: &BeanKey) -> Vec<String> {
        let mut chain: Vec<String> =
            RESOLUTION_STACK.with(|stack| stack.borrow().iter().map(|k| k.to_string()).collect());
        chain.push(key.to_string());
        chain
    }
}
