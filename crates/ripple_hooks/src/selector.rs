//! Selectors decide whether a hook applies to a concrete event call.
//!
//! A selector maps a [`SelectContext`] to an optional [`Score`]: `None`
//! means "does not apply", `Some(n)` means "applies with strength `n`".
//! Scores arbitrate between several implementations sharing a hook id; the
//! highest score wins.
//!
//! Selectors compose with [`SelectorExt`]:
//!
//! ```
//! use ripple_hooks::selector::{IsInstance, MatchRtype, SelectorExt};
//!
//! let people = IsInstance::new(["Person", "Company"]);
//! let _not_people = people.not();
//! let _owned_by = MatchRtype::new(["owned_by"]).or(MatchRtype::new(["created_by"]));
//! ```
//!
//! Selectors built from a single [`IsInstance`] or [`MatchRtype`] (or an
//! [`And`] whose first child is one) expose a [`PruneHint`] the dispatcher
//! uses to skip them without evaluation when the etype or rtype of the call
//! cannot match.

use core::fmt;

use crate::entity::{Eid, Entity, RelationRef};
use crate::events::Event;
use crate::transaction::Transaction;

/// Strength of a selector match.
pub type Score = u32;

/// Type-erased selector, the form hooks and combinators store.
pub type BoxedSelector = Box<dyn Selector>;

// ─────────────────────────────────────────────────────────────────────────────
// SelectContext
// ─────────────────────────────────────────────────────────────────────────────

/// What a concrete event call is about.
#[derive(Debug, Clone, Copy)]
pub enum SelectTarget<'a> {
    /// System events carry no target.
    System,
    /// One entity of an entity event.
    Entity(&'a Entity),
    /// One pair of a relation event.
    Relation(RelationRef<'a>),
}

/// Everything a selector may inspect about a concrete event call.
#[derive(Clone, Copy)]
pub struct SelectContext<'a> {
    event: Event,
    target: SelectTarget<'a>,
    tx: Option<&'a Transaction>,
}

impl<'a> SelectContext<'a> {
    /// Creates a context for `event` about `target`, outside any transaction.
    #[must_use]
    pub fn new(event: Event, target: SelectTarget<'a>) -> Self {
        Self {
            event,
            target,
            tx: None,
        }
    }

    /// Attaches the transaction the call happens in.
    #[must_use]
    pub fn with_transaction(mut self, tx: &'a Transaction) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Returns the event being dispatched.
    #[must_use]
    pub fn event(&self) -> Event {
        self.event
    }

    /// Returns the call's target.
    #[must_use]
    pub fn target(&self) -> SelectTarget<'a> {
        self.target
    }

    /// Returns the entity of an entity event.
    #[must_use]
    pub fn entity(&self) -> Option<&'a Entity> {
        match self.target {
            SelectTarget::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Returns the entity type of an entity event.
    #[must_use]
    pub fn etype(&self) -> Option<&'a str> {
        self.entity().map(Entity::etype)
    }

    /// Returns the relation of a relation event.
    #[must_use]
    pub fn relation(&self) -> Option<RelationRef<'a>> {
        match self.target {
            SelectTarget::Relation(relation) => Some(relation),
            _ => None,
        }
    }

    /// Returns the relation type of a relation event.
    #[must_use]
    pub fn rtype(&self) -> Option<&'a str> {
        self.relation().map(|relation| relation.rtype)
    }

    /// Returns the transaction, if the event is fired inside one.
    #[must_use]
    pub fn transaction(&self) -> Option<&'a Transaction> {
        self.tx
    }

    /// Looks up the type of an entity through the transaction.
    #[must_use]
    pub fn entity_type_of(&self, eid: Eid) -> Option<String> {
        self.tx.and_then(|tx| tx.entity_type(eid))
    }
}

impl fmt::Debug for SelectContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectContext")
            .field("event", &self.event)
            .field("target", &self.target)
            .field("in_transaction", &self.tx.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Selector Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Static knowledge a selector exposes for pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneHint<'a> {
    /// Only matches entity events on these entity types.
    EntityTypes(&'a [String]),
    /// Only matches relation events on these relation types.
    RelationTypes(&'a [String]),
}

impl PruneHint<'_> {
    /// Returns true if no call keyed by `etype`/`rtype` can match.
    #[must_use]
    pub fn excludes(&self, etype: Option<&str>, rtype: Option<&str>) -> bool {
        match self {
            PruneHint::EntityTypes(etypes) => {
                !etype.is_some_and(|etype| etypes.iter().any(|t| t == etype))
            }
            PruneHint::RelationTypes(rtypes) => {
                !rtype.is_some_and(|rtype| rtypes.iter().any(|t| t == rtype))
            }
        }
    }
}

/// A predicate over event calls.
pub trait Selector: Send + Sync + 'static {
    /// Scores the call, `None` when the selector does not apply.
    fn score(&self, cx: &SelectContext<'_>) -> Option<Score>;

    /// Returns a hint allowing the dispatcher to skip this selector.
    ///
    /// A hint must never exclude a call the selector would score `Some`.
    fn prune_hint(&self) -> Option<PruneHint<'_>> {
        None
    }
}

impl Selector for BoxedSelector {
    fn score(&self, cx: &SelectContext<'_>) -> Option<Score> {
        (**self).score(cx)
    }

    fn prune_hint(&self) -> Option<PruneHint<'_>> {
        (**self).prune_hint()
    }
}

/// Combinator methods available on every selector.
pub trait SelectorExt: Selector + Sized {
    /// Matches when both match; scores add up.
    fn and<S: Selector>(self, other: S) -> And {
        And::new(vec![Box::new(self), Box::new(other)])
    }

    /// Matches when either matches; the first match's score is kept.
    fn or<S: Selector>(self, other: S) -> Or {
        Or::new(vec![Box::new(self), Box::new(other)])
    }

    /// Matches exactly when `self` does not.
    fn not(self) -> Not {
        Not::new(self)
    }
}

impl<S: Selector> SelectorExt for S {}

// ─────────────────────────────────────────────────────────────────────────────
// Combinators
// ─────────────────────────────────────────────────────────────────────────────

/// Conjunction of selectors.
pub struct And {
    children: Vec<BoxedSelector>,
}

impl And {
    /// Creates a conjunction. An empty conjunction always matches with score 0.
    #[must_use]
    pub fn new(children: Vec<BoxedSelector>) -> Self {
        Self { children }
    }
}

impl Selector for And {
    fn score(&self, cx: &SelectContext<'_>) -> Option<Score> {
        self.children
            .iter()
            .try_fold(0, |total: Score, child| {
                child.score(cx).map(|s| total.saturating_add(s))
            })
    }

    fn prune_hint(&self) -> Option<PruneHint<'_>> {
        self.children.first().and_then(|child| child.prune_hint())
    }
}

/// Disjunction of selectors.
pub struct Or {
    children: Vec<BoxedSelector>,
}

impl Or {
    /// Creates a disjunction. An empty disjunction never matches.
    #[must_use]
    pub fn new(children: Vec<BoxedSelector>) -> Self {
        Self { children }
    }
}

impl Selector for Or {
    fn score(&self, cx: &SelectContext<'_>) -> Option<Score> {
        self.children.iter().find_map(|child| child.score(cx))
    }
}

/// Negation of a selector.
pub struct Not {
    inner: BoxedSelector,
}

impl Not {
    /// Negates `inner`.
    #[must_use]
    pub fn new(inner: impl Selector) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Selector for Not {
    fn score(&self, cx: &SelectContext<'_>) -> Option<Score> {
        match self.inner.score(cx) {
            Some(_) => None,
            None => Some(1),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Predicates
// ─────────────────────────────────────────────────────────────────────────────

/// Matches every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl Selector for Always {
    fn score(&self, _cx: &SelectContext<'_>) -> Option<Score> {
        Some(1)
    }
}

/// Matches entity events whose entity type is one of a set.
#[derive(Debug, Clone)]
pub struct IsInstance {
    etypes: Vec<String>,
}

impl IsInstance {
    /// Matches entities of any of `etypes`.
    #[must_use]
    pub fn new<I, S>(etypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            etypes: etypes.into_iter().map(Into::into).collect(),
        }
    }
}

impl Selector for IsInstance {
    fn score(&self, cx: &SelectContext<'_>) -> Option<Score> {
        let etype = cx.etype()?;
        self.etypes.iter().any(|t| t == etype).then_some(1)
    }

    fn prune_hint(&self) -> Option<PruneHint<'_>> {
        Some(PruneHint::EntityTypes(&self.etypes))
    }
}

/// Matches relation events whose relation type is one of a set, optionally
/// constraining the subject and object entity types.
#[derive(Debug, Clone)]
pub struct MatchRtype {
    rtypes: Vec<String>,
    subject_etypes: Option<Vec<String>>,
    object_etypes: Option<Vec<String>>,
}

impl MatchRtype {
    /// Matches relations of any of `rtypes`.
    #[must_use]
    pub fn new<I, S>(rtypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rtypes: rtypes.into_iter().map(Into::into).collect(),
            subject_etypes: None,
            object_etypes: None,
        }
    }

    /// Also requires the subject to be one of `etypes`.
    #[must_use]
    pub fn from_etypes<I, S>(mut self, etypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_etypes = Some(etypes.into_iter().map(Into::into).collect());
        self
    }

    /// Also requires the object to be one of `etypes`.
    #[must_use]
    pub fn to_etypes<I, S>(mut self, etypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.object_etypes = Some(etypes.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the matched relation types.
    #[must_use]
    pub fn rtypes(&self) -> &[String] {
        &self.rtypes
    }
}

fn etype_allowed(cx: &SelectContext<'_>, eid: Eid, allowed: Option<&Vec<String>>) -> bool {
    let Some(allowed) = allowed else {
        return true;
    };
    cx.entity_type_of(eid)
        .is_some_and(|etype| allowed.iter().any(|t| *t == etype))
}

impl Selector for MatchRtype {
    fn score(&self, cx: &SelectContext<'_>) -> Option<Score> {
        let relation = cx.relation()?;
        if !self.rtypes.iter().any(|t| t == relation.rtype) {
            return None;
        }
        let matches = etype_allowed(cx, relation.eidfrom, self.subject_etypes.as_ref())
            && etype_allowed(cx, relation.eidto, self.object_etypes.as_ref());
        matches.then_some(1)
    }

    fn prune_hint(&self) -> Option<PruneHint<'_>> {
        Some(PruneHint::RelationTypes(&self.rtypes))
    }
}

/// Selector backed by a closure returning whether the call matches.
pub struct FnSelector<F> {
    predicate: F,
    score: Score,
}

impl<F> FnSelector<F>
where
    F: Fn(&SelectContext<'_>) -> bool + Send + Sync + 'static,
{
    /// Creates a selector scoring 1 whenever `predicate` holds.
    #[must_use]
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            score: 1,
        }
    }

    /// Overrides the score returned on a match.
    #[must_use]
    pub fn with_score(mut self, score: Score) -> Self {
        self.score = score;
        self
    }
}

impl<F> Selector for FnSelector<F>
where
    F: Fn(&SelectContext<'_>) -> bool + Send + Sync + 'static,
{
    fn score(&self, cx: &SelectContext<'_>) -> Option<Score> {
        (self.predicate)(cx).then_some(self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Entity {
        Entity::new(Eid(1), "Person")
    }

    fn entity_cx(entity: &Entity) -> SelectContext<'_> {
        SelectContext::new(Event::AfterAddEntity, SelectTarget::Entity(entity))
    }

    fn relation_cx(rtype: &str) -> SelectContext<'_> {
        SelectContext::new(
            Event::AfterAddRelation,
            SelectTarget::Relation(RelationRef {
                eidfrom: Eid(1),
                rtype,
                eidto: Eid(2),
            }),
        )
    }

    #[test]
    fn is_instance_matches_listed_etypes() {
        let entity = person();
        assert_eq!(IsInstance::new(["Person"]).score(&entity_cx(&entity)), Some(1));
        assert_eq!(IsInstance::new(["Company"]).score(&entity_cx(&entity)), None);
        assert_eq!(IsInstance::new(["Person"]).score(&relation_cx("knows")), None);
    }

    #[test]
    fn match_rtype_matches_listed_rtypes() {
        let selector = MatchRtype::new(["knows", "likes"]);
        assert_eq!(selector.score(&relation_cx("likes")), Some(1));
        assert_eq!(selector.score(&relation_cx("owns")), None);
    }

    #[test]
    fn match_rtype_with_etypes_needs_a_transaction() {
        let selector = MatchRtype::new(["knows"]).from_etypes(["Person"]);
        assert_eq!(selector.score(&relation_cx("knows")), None);
    }

    #[test]
    fn and_sums_scores_and_fails_on_any_none() {
        let entity = person();
        let cx = entity_cx(&entity);
        assert_eq!(IsInstance::new(["Person"]).and(Always).score(&cx), Some(2));
        assert_eq!(IsInstance::new(["Company"]).and(Always).score(&cx), None);
    }

    #[test]
    fn or_returns_first_match() {
        let entity = person();
        let cx = entity_cx(&entity);
        let selector = IsInstance::new(["Company"])
            .or(FnSelector::new(|_| true).with_score(5))
            .or(Always);
        assert_eq!(selector.score(&cx), Some(5));
    }

    #[test]
    fn not_inverts_match() {
        let entity = person();
        let cx = entity_cx(&entity);
        assert_eq!(IsInstance::new(["Company"]).not().score(&cx), Some(1));
        assert_eq!(IsInstance::new(["Person"]).not().score(&cx), None);
    }

    #[test]
    fn prune_hints_follow_first_and_child() {
        let and = IsInstance::new(["Person"]).and(Always);
        assert!(matches!(and.prune_hint(), Some(PruneHint::EntityTypes(_))));
        assert!(Always.and(IsInstance::new(["Person"])).prune_hint().is_none());
        assert!(IsInstance::new(["Person"]).or(Always).prune_hint().is_none());
        assert!(IsInstance::new(["Person"]).not().prune_hint().is_none());
    }

    #[test]
    fn hints_exclude_only_unmatchable_keys() {
        let etypes = vec!["Person".to_string()];
        let hint = PruneHint::EntityTypes(&etypes);
        assert!(!hint.excludes(Some("Person"), None));
        assert!(hint.excludes(Some("Company"), None));
        assert!(hint.excludes(None, Some("knows")));

        let rtypes = vec!["knows".to_string()];
        let hint = PruneHint::RelationTypes(&rtypes);
        assert!(!hint.excludes(None, Some("knows")));
        assert!(hint.excludes(None, Some("owns")));
    }
}
