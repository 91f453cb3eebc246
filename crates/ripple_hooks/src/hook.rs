//! The hook abstraction and the context hooks run with.

use core::fmt;

use crate::batch::DataOperationError;
use crate::entity::{Eid, Entity, RelationRef};
use crate::events::Event;
use crate::selector::{Always, SelectTarget, Selector};
use crate::transaction::{Transaction, TransactionError};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error returned by a hook body.
///
/// Any error fails the dispatch and, inside a transaction, marks it as
/// needing rollback.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The hook rejected the mutation.
    #[error("{0}")]
    Failed(String),
    /// The hook needs a transaction but was fired without one.
    #[error("hook requires a transaction")]
    NoTransaction,
    /// A mutation issued from the hook failed.
    #[error(transparent)]
    Transaction(Box<TransactionError>),
    /// Batching data on an operation failed.
    #[error(transparent)]
    Data(#[from] DataOperationError),
}

impl HookError {
    /// Creates a [`HookError::Failed`] from a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        HookError::Failed(message.into())
    }
}

impl From<TransactionError> for HookError {
    fn from(err: TransactionError) -> Self {
        HookError::Transaction(Box::new(err))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments a dispatch is made with.
///
/// Batch variants fan out: each entity, or each pair, is dispatched as its
/// own call with its own selection.
#[derive(Debug)]
pub enum HookArgs<'a> {
    /// System events.
    System,
    /// A single entity event.
    Entity(&'a mut Entity),
    /// A batch of entities; should share one entity type.
    Entities(&'a mut [Entity]),
    /// A single relation event.
    Relation {
        /// Subject entity.
        eidfrom: Eid,
        /// Relation type.
        rtype: &'a str,
        /// Object entity.
        eidto: Eid,
    },
    /// A batch of pairs sharing one relation type.
    Relations {
        /// Relation type.
        rtype: &'a str,
        /// `(eidfrom, eidto)` pairs.
        pairs: &'a [(Eid, Eid)],
    },
}

impl HookArgs<'_> {
    /// Returns a short name of the argument shape for error messages.
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            HookArgs::System => "system",
            HookArgs::Entity(_) | HookArgs::Entities(_) => "entity",
            HookArgs::Relation { .. } | HookArgs::Relations { .. } => "relation",
        }
    }
}

/// The target of one concrete hook call.
#[derive(Debug)]
pub(crate) enum HookTarget<'a> {
    System,
    Entity(&'a mut Entity),
    Relation(RelationRef<'a>),
}

impl HookTarget<'_> {
    pub(crate) fn reborrow(&mut self) -> HookTarget<'_> {
        match self {
            HookTarget::System => HookTarget::System,
            HookTarget::Entity(entity) => HookTarget::Entity(&mut **entity),
            HookTarget::Relation(relation) => HookTarget::Relation(*relation),
        }
    }

    pub(crate) fn as_select(&self) -> SelectTarget<'_> {
        match self {
            HookTarget::System => SelectTarget::System,
            HookTarget::Entity(entity) => SelectTarget::Entity(&**entity),
            HookTarget::Relation(relation) => SelectTarget::Relation(*relation),
        }
    }

    /// Returns the `(etype, rtype)` pruning key of this call.
    pub(crate) fn prune_key(&self) -> (Option<&str>, Option<&str>) {
        match self {
            HookTarget::System => (None, None),
            HookTarget::Entity(entity) => (Some(entity.etype()), None),
            HookTarget::Relation(relation) => (None, Some(relation.rtype)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HookContext
// ─────────────────────────────────────────────────────────────────────────────

/// What a hook body receives.
pub struct HookContext<'a> {
    event: Event,
    tx: Option<&'a mut Transaction>,
    target: HookTarget<'a>,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(
        event: Event,
        tx: Option<&'a mut Transaction>,
        target: HookTarget<'a>,
    ) -> Self {
        Self { event, tx, target }
    }

    /// Returns the event being dispatched.
    #[must_use]
    pub fn event(&self) -> Event {
        self.event
    }

    /// Returns true if the event was fired inside a transaction.
    #[must_use]
    pub fn has_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Returns the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::NoTransaction`] for events fired outside one,
    /// such as `server_startup`.
    pub fn tx(&mut self) -> Result<&mut Transaction, HookError> {
        self.tx.as_deref_mut().ok_or(HookError::NoTransaction)
    }

    /// Returns the entity of an entity event.
    #[must_use]
    pub fn entity(&self) -> Option<&Entity> {
        match &self.target {
            HookTarget::Entity(entity) => Some(&**entity),
            _ => None,
        }
    }

    /// Returns the entity of an entity event mutably, so `before_*` hooks
    /// can edit attributes before they are written.
    pub fn entity_mut(&mut self) -> Option<&mut Entity> {
        match &mut self.target {
            HookTarget::Entity(entity) => Some(&mut **entity),
            _ => None,
        }
    }

    /// Returns the relation of a relation event.
    #[must_use]
    pub fn relation(&self) -> Option<RelationRef<'a>> {
        match &self.target {
            HookTarget::Relation(relation) => Some(*relation),
            _ => None,
        }
    }

    /// Returns the transaction and the entity at once.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::NoTransaction`] outside a transaction.
    pub fn tx_and_entity(&mut self) -> Result<(&mut Transaction, Option<&mut Entity>), HookError> {
        let tx = self.tx.as_deref_mut().ok_or(HookError::NoTransaction)?;
        let entity = match &mut self.target {
            HookTarget::Entity(entity) => Some(&mut **entity),
            _ => None,
        };
        Ok((tx, entity))
    }
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("event", &self.event)
            .field("target", &self.target)
            .field("in_transaction", &self.tx.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hook Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A unit of behavior run on matching events.
///
/// The `id` names a registration slot: several implementations may share
/// one, and per call only the best-scored applicable one runs.
///
/// ```
/// use ripple_hooks::hook::{Hook, HookContext, HookError};
/// use ripple_hooks::selector::{IsInstance, Selector};
///
/// struct LowercaseLogin {
///     selector: IsInstance,
/// }
///
/// impl Hook for LowercaseLogin {
///     fn id(&self) -> &str {
///         "lowercase_login"
///     }
///
///     fn events(&self) -> &[&str] {
///         &["before_add_entity", "before_update_entity"]
///     }
///
///     fn selector(&self) -> &dyn Selector {
///         &self.selector
///     }
///
///     fn call(&self, cx: &mut HookContext<'_>) -> Result<(), HookError> {
///         if let Some(entity) = cx.entity_mut() {
///             let login = entity.get("login").and_then(|v| v.as_str()).map(str::to_lowercase);
///             if let Some(login) = login {
///                 entity.set("login", login);
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Hook: Send + Sync + 'static {
    /// Registration slot identifier.
    fn id(&self) -> &str;

    /// Names of the events this hook listens to.
    fn events(&self) -> &[&str];

    /// Category used to enable or disable groups of hooks per transaction.
    fn category(&self) -> &str {
        ""
    }

    /// Execution order; lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Selector deciding whether the hook applies to a call.
    fn selector(&self) -> &dyn Selector {
        &Always
    }

    /// Runs the hook.
    ///
    /// # Errors
    ///
    /// Any error aborts the dispatch.
    fn call(&self, cx: &mut HookContext<'_>) -> Result<(), HookError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// FnHook
// ─────────────────────────────────────────────────────────────────────────────

type HookFn = dyn Fn(&mut HookContext<'_>) -> Result<(), HookError> + Send + Sync;

/// A hook built from a closure.
///
/// ```
/// use ripple_hooks::hook::FnHook;
/// use ripple_hooks::selector::IsInstance;
///
/// let hook = FnHook::new("audit", &["after_add_entity"], |_cx| Ok(()))
///     .with_category("audit")
///     .with_order(-10)
///     .with_selector(IsInstance::new(["Invoice"]));
/// # let _ = hook;
/// ```
pub struct FnHook {
    id: String,
    events: Vec<&'static str>,
    category: String,
    order: i32,
    selector: Box<dyn Selector>,
    body: Box<HookFn>,
}

impl FnHook {
    /// Creates a hook with the default category, order and selector.
    pub fn new<F>(id: impl Into<String>, events: &[&'static str], body: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            events: events.to_vec(),
            category: String::new(),
            order: 0,
            selector: Box::new(Always),
            body: Box::new(body),
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Sets the order.
    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Sets the selector.
    #[must_use]
    pub fn with_selector(mut self, selector: impl Selector) -> Self {
        self.selector = Box::new(selector);
        self
    }
}

impl Hook for FnHook {
    fn id(&self) -> &str {
        &self.id
    }

    fn events(&self) -> &[&str] {
        &self.events
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn selector(&self) -> &dyn Selector {
        &*self.selector
    }

    fn call(&self, cx: &mut HookContext<'_>) -> Result<(), HookError> {
        (self.body)(cx)
    }
}

impl fmt::Debug for FnHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHook")
            .field("id", &self.id)
            .field("events", &self.events)
            .field("category", &self.category)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_hook_builder_sets_metadata() {
        let hook = FnHook::new("audit", &["after_add_entity"], |_| Ok(()))
            .with_category("audit")
            .with_order(-3);
        assert_eq!(hook.id(), "audit");
        assert_eq!(hook.events(), &["after_add_entity"]);
        assert_eq!(hook.category(), "audit");
        assert_eq!(hook.order(), -3);
    }

    #[test]
    fn context_without_transaction_reports_it() {
        let mut cx = HookContext::new(Event::ServerStartup, None, HookTarget::System);
        assert!(!cx.has_transaction());
        assert!(matches!(cx.tx(), Err(HookError::NoTransaction)));
        assert!(cx.entity().is_none());
        assert!(cx.relation().is_none());
    }

    #[test]
    fn context_exposes_mutable_entity() {
        let mut entity = Entity::new(Eid(3), "Person").with_attr("login", "ADA");
        {
            let mut cx = HookContext::new(
                Event::BeforeAddEntity,
                None,
                HookTarget::Entity(&mut entity),
            );
            if let Some(entity) = cx.entity_mut() {
                entity.set("login", "ada");
            }
        }
        assert_eq!(entity.get("login").and_then(|v| v.as_str()), Some("ada"));
    }

    #[test]
    fn fn_hook_runs_body() {
        let hook = FnHook::new("fails", &["server_startup"], |_| Err(HookError::failed("nope")));
        let mut cx = HookContext::new(Event::ServerStartup, None, HookTarget::System);
        let err = hook.call(&mut cx).unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn args_shape_names_family() {
        assert_eq!(HookArgs::System.shape(), "system");
        let pairs = [(Eid(1), Eid(2))];
        let args = HookArgs::Relations {
            rtype: "knows",
            pairs: &pairs,
        };
        assert_eq!(args.shape(), "relation");
    }
}
