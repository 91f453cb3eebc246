//! Integration tests for hook registration and dispatch.
//!
//! Covers ordering, slot arbitration between implementations sharing an
//! id, category control, pruning, re-entrant dispatch and failure
//! handling, always through a [`Transaction`] on the in-memory backend.

mod test_utils;

use ripple_hooks::entity::Attributes;
use ripple_hooks::events::Event;
use ripple_hooks::hook::{FnHook, HookError};
use ripple_hooks::manager::HooksManager;
use ripple_hooks::plugin::HooksPlugin;
use ripple_hooks::registry::HookRegistrationError;
use ripple_hooks::selector::{FnSelector, IsInstance, MatchRtype, SelectorExt};
use ripple_hooks::transaction::{HooksMode, TransactionError, TransactionState};
use serde_json::json;
use test_utils::{Journal, build_server, open, recording_hook};

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRATION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn hooks_without_known_events_are_rejected() {
    let hooks = HooksManager::default();
    let journal = Journal::new();

    let err = hooks
        .register(recording_hook(&journal, "typo", "typo", &["after_add_entty"]))
        .err();
    assert!(matches!(err, Some(HookRegistrationError::UnknownEvent { .. })));

    let err = hooks.register(recording_hook(&journal, "none", "none", &[])).err();
    assert!(matches!(err, Some(HookRegistrationError::NoEvents { .. })));

    assert!(Event::ALL.iter().all(|event| hooks.hook_count(*event) == 0));
}

#[test]
fn plugin_hooks_see_startup_and_transactions() {
    let journal = Journal::new();
    let (mut server, hooks) = build_server(
        HooksPlugin::default()
            .with_hook(recording_hook(&journal, "boot", "boot", &["server_startup"]))
            .with_hook(recording_hook(&journal, "audit", "audit", &["after_add_entity"])),
    );
    assert_eq!(journal.entries(), vec!["boot@server_startup"]);

    let (_store, mut tx) = open(&hooks);
    tx.create_entity("Person", Attributes::new()).unwrap();
    tx.commit().unwrap();
    server.cleanup();

    assert_eq!(
        journal.entries(),
        vec!["boot@server_startup", "audit@after_add_entity Person"]
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORDERING & SELECTION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn hooks_run_by_order_for_matching_entities() {
    let hooks = HooksManager::default();
    let journal = Journal::new();
    hooks
        .register(
            recording_hook(&journal, "h1", "h1", &["after_add_entity"])
                .with_order(5)
                .with_selector(IsInstance::new(["Person"])),
        )
        .unwrap();
    hooks
        .register(
            recording_hook(&journal, "h2", "h2", &["after_add_entity"])
                .with_order(1)
                .with_selector(IsInstance::new(["Person"])),
        )
        .unwrap();

    let (_store, mut tx) = open(&hooks);
    tx.create_entity("Company", Attributes::new()).unwrap();
    tx.create_entity("Person", Attributes::new()).unwrap();

    assert_eq!(
        journal.entries(),
        vec!["h2@after_add_entity Person", "h1@after_add_entity Person"]
    );
}

#[test]
fn equal_orders_keep_registration_order() {
    let hooks = HooksManager::default();
    let journal = Journal::new();
    for id in ["a", "b", "c"] {
        hooks
            .register(recording_hook(&journal, id, id, &["server_maintenance"]).with_category(id))
            .unwrap();
    }
    hooks
        .register(recording_hook(&journal, "first", "first", &["server_maintenance"]).with_order(-1))
        .unwrap();

    hooks.call_system_hooks(Event::ServerMaintenance).unwrap();

    assert_eq!(
        journal.entries(),
        vec![
            "first@server_maintenance",
            "a@server_maintenance",
            "b@server_maintenance",
            "c@server_maintenance",
        ]
    );
}

#[test]
fn best_scoring_implementation_wins_its_slot() {
    let hooks = HooksManager::default();
    let journal = Journal::new();
    hooks
        .register(recording_hook(&journal, "notify", "generic", &["after_add_entity"]))
        .unwrap();
    hooks
        .register(
            recording_hook(&journal, "notify", "specific", &["after_add_entity"])
                .with_selector(IsInstance::new(["Person"]).and(FnSelector::new(|cx| {
                    cx.entity().is_some_and(|e| e.get("vip").is_some())
                }))),
        )
        .unwrap();

    let (_store, mut tx) = open(&hooks);
    tx.create_entity("Person", Attributes::new()).unwrap();
    let mut vip = Attributes::new();
    vip.insert("vip".into(), json!(true));
    tx.create_entity("Person", vip).unwrap();

    assert_eq!(
        journal.entries(),
        vec![
            "generic@after_add_entity Person",
            "specific@after_add_entity Person",
        ]
    );
}

#[test]
fn batches_fan_out_per_item() {
    let hooks = HooksManager::default();
    let journal = Journal::new();
    hooks
        .register(
            recording_hook(&journal, "link", "link", &["after_add_relation"])
                .with_selector(MatchRtype::new(["knows"])),
        )
        .unwrap();

    let (_store, mut tx) = open(&hooks);
    let people = tx
        .create_entities("Person", vec![Attributes::new(); 3])
        .unwrap();
    let added = tx
        .add_relations("knows", &[(people[0], people[1]), (people[1], people[2]), (people[0], people[1])])
        .unwrap();

    assert_eq!(added.len(), 2);
    assert_eq!(journal.filtered("link").len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSACTION INTERPLAY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn hooks_can_mutate_through_the_transaction() {
    let hooks = HooksManager::default();
    let journal = Journal::new();
    hooks
        .register(
            FnHook::new("welcome", &["after_add_entity"], |cx| {
                let owner = cx.entity().map(|e| e.eid());
                let tx = cx.tx()?;
                assert!(tx.is_running_hooks());
                assert!(!tx.read_security());
                assert!(!tx.write_security());
                let card = tx.create_entity("Card", Attributes::new())?;
                if let Some(owner) = owner {
                    tx.add_relation(owner, "owns", card)?;
                }
                Ok(())
            })
            .with_selector(IsInstance::new(["Person"])),
        )
        .unwrap();
    hooks
        .register(recording_hook(&journal, "audit", "audit", &["after_add_entity", "after_add_relation"]))
        .unwrap();

    let (store, mut tx) = open(&hooks);
    let ada = tx.create_entity("Person", Attributes::new()).unwrap();
    assert_eq!(tx.running_hooks(), 0);
    assert!(tx.read_security());
    tx.commit().unwrap();

    assert_eq!(store.entity_count(), 2);
    assert!(journal.entries().contains(&"audit@after_add_relation owns".to_string()));
    assert!(store.entity(ada).is_some());
}

#[test]
fn failing_hook_forces_rollback() {
    let hooks = HooksManager::default();
    hooks
        .register(
            FnHook::new("validate", &["before_add_entity"], |cx| {
                match cx.entity().and_then(|e| e.get("name")) {
                    Some(_) => Ok(()),
                    None => Err(HookError::failed("name is required")),
                }
            }),
        )
        .unwrap();

    let (store, mut tx) = open(&hooks);
    let err = tx.create_entity("Person", Attributes::new()).unwrap_err();
    assert!(err.to_string().contains("validate"));
    assert_eq!(tx.state(), TransactionState::MustRollback);
    assert!(matches!(
        tx.create_entity("Person", Attributes::new()),
        Err(TransactionError::MustRollback)
    ));
    assert!(matches!(tx.commit(), Err(TransactionError::MustRollback)));

    tx.rollback().unwrap();
    assert_eq!(store.entity_count(), 0);
}

#[test]
fn temporary_hooks_are_removed_on_drop() {
    let hooks = HooksManager::default();
    let journal = Journal::new();
    {
        let _guard = hooks
            .install(recording_hook(&journal, "probe", "probe", &["after_add_entity"]))
            .unwrap();
        let (_store, mut tx) = open(&hooks);
        tx.create_entity("Person", Attributes::new()).unwrap();
    }
    let (_store, mut tx) = open(&hooks);
    tx.create_entity("Person", Attributes::new()).unwrap();

    assert_eq!(journal.entries().len(), 1);
    assert_eq!(hooks.hook_count(Event::AfterAddEntity), 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CATEGORIES & PRUNING
// ═══════════════════════════════════════════════════════════════════════════════

fn categorized(journal: &Journal) -> HooksManager {
    let hooks = HooksManager::default();
    hooks
        .register(
            recording_hook(journal, "mail", "mail", &["after_add_entity"])
                .with_category("email")
                .with_selector(IsInstance::new(["Person"])),
        )
        .unwrap();
    hooks
        .register(
            recording_hook(journal, "index", "index", &["after_add_entity"])
                .with_category("search")
                .with_selector(IsInstance::new(["Person"])),
        )
        .unwrap();
    hooks
}

#[test]
fn category_toggle_mid_transaction_is_honored() {
    let journal = Journal::new();
    let hooks = categorized(&journal);
    let (_store, mut tx) = open(&hooks);
    assert!(tx.pruning_enabled());

    tx.create_entity("Person", Attributes::new()).unwrap();
    tx.disable_categories(["email"]);
    tx.create_entity("Person", Attributes::new()).unwrap();
    tx.enable_categories(["email"]);
    tx.create_entity("Person", Attributes::new()).unwrap();

    assert_eq!(journal.filtered("mail").len(), 2);
    assert_eq!(journal.filtered("index").len(), 3);
}

#[test]
fn pruning_does_not_change_what_runs() {
    let run = |pruning: bool| {
        let journal = Journal::new();
        let hooks = categorized(&journal);
        let (_store, mut tx) = open(&hooks);
        tx.set_pruning(pruning);
        tx.disable_categories(["search"]);
        tx.create_entity("Person", Attributes::new()).unwrap();
        tx.create_entity("Company", Attributes::new()).unwrap();
        tx.create_entity("Person", Attributes::new()).unwrap();
        journal.entries()
    };
    assert_eq!(run(true), run(false));
    assert_eq!(run(true).len(), 2);
}

#[test]
fn deny_all_runs_only_enabled_categories() {
    let journal = Journal::new();
    let hooks = categorized(&journal);
    let (_store, mut tx) = open(&hooks);
    {
        let mut scoped = tx.with_hooks_mode(HooksMode::deny_all().except(["search"]));
        scoped.create_entity("Person", Attributes::new()).unwrap();
    }
    tx.create_entity("Person", Attributes::new()).unwrap();

    assert_eq!(journal.filtered("mail").len(), 1);
    assert_eq!(journal.filtered("index").len(), 2);
}

#[test]
fn configured_categories_start_disabled() {
    let journal = Journal::new();
    let (_server, hooks) = build_server(
        HooksPlugin::default()
            .with_disabled_categories(["email"])
            .with_hook(
                recording_hook(&journal, "mail", "mail", &["after_add_entity"]).with_category("email"),
            ),
    );
    let (_store, mut tx) = open(&hooks);
    assert!(!tx.is_category_active("email"));
    tx.create_entity("Person", Attributes::new()).unwrap();
    assert!(journal.entries().is_empty());
}
