//! Stock hooks propagating a main relation along other relations.
//!
//! Given a main relation `M` (for instance `in_project`) and watched
//! relations `R` (for instance `has_attachment`), the three hooks keep
//! `M` flowing from an entity to whatever it reaches through `R`:
//!
//! | Hook | Fires on | Effect |
//! |------|----------|--------|
//! | [`PropagateRelation`] | `after_add_relation` of a watched `R(x, y)` | `M(y, t)` for every `M(x, t)` |
//! | [`PropagateMainAdd`] | `after_add_relation` of `M(x, p)` | `M(r, p)` for every `r` reached from `x` |
//! | [`PropagateMainDel`] | `after_delete_relation` of `M(x, p)` | removes `M(r, p)` for the same `r` |
//!
//! A *subject* relation `R(x, y)` propagates from its subject `x` to its
//! object `y`; an *object* relation `R(y, x)` propagates from its object
//! `x` to its subject `y`. Every mutation goes through the transaction, so
//! propagation re-enters dispatch and spreads transitively; relations
//! already present (or already absent) are left alone, which bounds it.
//!
//! ```
//! use ripple_hooks::manager::HooksManager;
//! use ripple_hooks::propagate::{PropagateMainAdd, PropagateRelation};
//!
//! let hooks = HooksManager::default();
//! hooks
//!     .register(
//!         PropagateRelation::new("attachment_in_project", "in_project")
//!             .with_subject_relations(["has_attachment"]),
//!     )
//!     .unwrap();
//! hooks
//!     .register(
//!         PropagateMainAdd::new("project_to_attachments", "in_project")
//!             .with_subject_relations(["has_attachment"]),
//!     )
//!     .unwrap();
//! ```

use crate::entity::{Eid, Role};
use crate::hook::{Hook, HookContext, HookError};
use crate::selector::{MatchRtype, Selector};
use crate::transaction::Transaction;

const AFTER_ADD: &[&str] = &["after_add_relation"];
const AFTER_DELETE: &[&str] = &["after_delete_relation"];

/// Propagation rules shared by the three hooks.
#[derive(Debug, Clone, Default)]
struct Rules {
    main_rtype: String,
    subject_relations: Vec<String>,
    object_relations: Vec<String>,
    skip_subject_relations: Vec<String>,
    skip_object_relations: Vec<String>,
}

impl Rules {
    fn new(main_rtype: impl Into<String>) -> Self {
        Self {
            main_rtype: main_rtype.into(),
            ..Self::default()
        }
    }

    fn subject_relations(&self) -> impl Iterator<Item = &str> {
        self.subject_relations
            .iter()
            .filter(|rtype| !self.skip_subject_relations.contains(rtype))
            .map(String::as_str)
    }

    fn object_relations(&self) -> impl Iterator<Item = &str> {
        self.object_relations
            .iter()
            .filter(|rtype| !self.skip_object_relations.contains(rtype))
            .map(String::as_str)
    }

    /// Entities `eid` passes the main relation on to.
    fn reached_from(&self, tx: &Transaction, eid: Eid) -> Vec<Eid> {
        let mut reached: Vec<Eid> = Vec::new();
        for rtype in self.subject_relations() {
            reached.extend(tx.related(eid, rtype, Role::Subject));
        }
        for rtype in self.object_relations() {
            reached.extend(tx.related(eid, rtype, Role::Object));
        }
        reached.sort_unstable();
        reached.dedup();
        reached
    }
}

fn collect<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// PropagateRelation
// ─────────────────────────────────────────────────────────────────────────────

/// Copies the main relation onto entities newly linked through a watched
/// relation.
#[derive(Debug)]
pub struct PropagateRelation {
    id: String,
    category: String,
    rules: Rules,
    selector: MatchRtype,
}

impl PropagateRelation {
    /// Creates the hook for main relation `main_rtype`, watching nothing yet.
    pub fn new(id: impl Into<String>, main_rtype: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: String::new(),
            rules: Rules::new(main_rtype),
            selector: MatchRtype::new(Vec::<String>::new()),
        }
    }

    /// Watches relations `R(x, y)` propagating from subject to object.
    #[must_use]
    pub fn with_subject_relations<I, S>(mut self, rtypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.subject_relations.extend(collect(rtypes));
        self.refresh_selector();
        self
    }

    /// Watches relations `R(y, x)` propagating from object to subject.
    #[must_use]
    pub fn with_object_relations<I, S>(mut self, rtypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.object_relations.extend(collect(rtypes));
        self.refresh_selector();
        self
    }

    /// Sets the hook category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    fn refresh_selector(&mut self) {
        let watched = self
            .rules
            .subject_relations
            .iter()
            .chain(&self.rules.object_relations)
            .cloned();
        self.selector = MatchRtype::new(watched);
    }
}

impl Hook for PropagateRelation {
    fn id(&self) -> &str {
        &self.id
    }

    fn events(&self) -> &[&str] {
        AFTER_ADD
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn selector(&self) -> &dyn Selector {
        &self.selector
    }

    fn call(&self, cx: &mut HookContext<'_>) -> Result<(), HookError> {
        let Some(relation) = cx.relation() else {
            return Ok(());
        };
        let rules = &self.rules;
        let mut sources: Vec<(Eid, Eid)> = Vec::with_capacity(2);
        if rules.subject_relations().any(|rtype| rtype == relation.rtype) {
            sources.push((relation.eidfrom, relation.eidto));
        }
        if rules.object_relations().any(|rtype| rtype == relation.rtype) {
            sources.push((relation.eidto, relation.eidfrom));
        }

        let tx = cx.tx()?;
        for (from, to) in sources {
            for target in tx.related(from, &rules.main_rtype, Role::Subject) {
                if !tx.has_relation(to, &rules.main_rtype, target) {
                    tracing::debug!(
                        hook = %self.id,
                        rtype = %rules.main_rtype,
                        eidfrom = %to,
                        eidto = %target,
                        "propagating relation"
                    );
                    tx.add_relation(to, &rules.main_rtype, target)?;
                }
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PropagateMainAdd / PropagateMainDel
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! main_relation_hook {
    ($(#[$meta:meta])* $name:ident, $events:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            id: String,
            category: String,
            rules: Rules,
            selector: MatchRtype,
        }

        impl $name {
            /// Creates the hook for main relation `main_rtype`.
            pub fn new(id: impl Into<String>, main_rtype: impl Into<String>) -> Self {
                let rules = Rules::new(main_rtype);
                let selector = MatchRtype::new([rules.main_rtype.clone()]);
                Self {
                    id: id.into(),
                    category: String::new(),
                    rules,
                    selector,
                }
            }

            /// Follows relations `R(x, r)` from the main relation's subject.
            #[must_use]
            pub fn with_subject_relations<I, S>(mut self, rtypes: I) -> Self
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                self.rules.subject_relations.extend(collect(rtypes));
                self
            }

            /// Follows relations `R(r, x)` to the main relation's subject.
            #[must_use]
            pub fn with_object_relations<I, S>(mut self, rtypes: I) -> Self
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                self.rules.object_relations.extend(collect(rtypes));
                self
            }

            /// Excludes subject relations from the ones followed.
            #[must_use]
            pub fn skip_subject_relations<I, S>(mut self, rtypes: I) -> Self
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                self.rules.skip_subject_relations.extend(collect(rtypes));
                self
            }

            /// Excludes object relations from the ones followed.
            #[must_use]
            pub fn skip_object_relations<I, S>(mut self, rtypes: I) -> Self
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                self.rules.skip_object_relations.extend(collect(rtypes));
                self
            }

            /// Sets the hook category.
            #[must_use]
            pub fn with_category(mut self, category: impl Into<String>) -> Self {
                self.category = category.into();
                self
            }
        }

        impl Hook for $name {
            fn id(&self) -> &str {
                &self.id
            }

            fn events(&self) -> &[&str] {
                $events
            }

            fn category(&self) -> &str {
                &self.category
            }

            fn selector(&self) -> &dyn Selector {
                &self.selector
            }

            fn call(&self, cx: &mut HookContext<'_>) -> Result<(), HookError> {
                let Some(relation) = cx.relation() else {
                    return Ok(());
                };
                let (subject, target) = (relation.eidfrom, relation.eidto);
                let tx = cx.tx()?;
                let reached = self.rules.reached_from(tx, subject);
                self.apply(tx, &reached, target)
            }
        }
    };
}

main_relation_hook!(
    /// Spreads a newly added main relation `M(x, p)` to every entity `x`
    /// reaches.
    PropagateMainAdd,
    AFTER_ADD
);

main_relation_hook!(
    /// Withdraws a deleted main relation `M(x, p)` from every entity `x`
    /// reaches.
    PropagateMainDel,
    AFTER_DELETE
);

impl PropagateMainAdd {
    fn apply(&self, tx: &mut Transaction, reached: &[Eid], target: Eid) -> Result<(), HookError> {
        let rtype = &self.rules.main_rtype;
        for &eid in reached {
            if !tx.has_relation(eid, rtype, target) {
                tracing::debug!(hook = %self.id, rtype = %rtype, eidfrom = %eid, eidto = %target, "propagating relation");
                tx.add_relation(eid, rtype, target)?;
            }
        }
        Ok(())
    }
}

impl PropagateMainDel {
    fn apply(&self, tx: &mut Transaction, reached: &[Eid], target: Eid) -> Result<(), HookError> {
        let rtype = &self.rules.main_rtype;
        for &eid in reached {
            if tx.has_relation(eid, rtype, target) {
                tracing::debug!(hook = %self.id, rtype = %rtype, eidfrom = %eid, eidto = %target, "withdrawing relation");
                tx.delete_relation(eid, rtype, target)?;
            }
        }
        Ok(())
    }
}
