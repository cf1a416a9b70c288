use resmap_core::db::open_db_in_memory;
use resmap_core::store::{install_record_type, Record, RecordType, StoreError};
use resmap_core::{
    attrs, AttrValue, ListenerError, ListenerFailurePolicy, ManagerConfig, ManagerError, Resource,
    ResourceContext, ResourceManager, ResourceRegistry, ResourceSchema, Session,
    UpdateListener, UpdateListenerRegistry,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
struct Notification {
    added: Vec<String>,
    updated: Vec<String>,
    deleted: Vec<String>,
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Notification>>,
}

impl Recorder {
    fn calls(&self) -> Vec<Notification> {
        self.calls.lock().unwrap().clone()
    }
}

impl UpdateListener for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_update(
        &self,
        _session: &Session<'_>,
        added: &[Resource],
        updated: &[Resource],
        deleted: &[Resource],
    ) -> Result<(), ListenerError> {
        self.calls.lock().unwrap().push(Notification {
            added: names(added),
            updated: names(updated),
            deleted: names(deleted),
        });
        Ok(())
    }
}

fn names(resources: &[Resource]) -> Vec<String> {
    resources
        .iter()
        .map(|resource| match resource.value_or_null("name") {
            AttrValue::Text(name) => name,
            other => other.to_string(),
        })
        .collect()
}

fn registry() -> Arc<ResourceRegistry> {
    Arc::new(
        ResourceRegistry::new([
            ResourceSchema::builder("tenant")
                .table("tenants")
                .identity("name")
                .mutable("descr")
                .build(),
            ResourceSchema::builder("vrf")
                .table("vrfs")
                .identity("tenant_name")
                .identity("name")
                .mutable("enforced")
                .build(),
        ])
        .unwrap(),
    )
}

fn setup_with(config: ManagerConfig) -> (Connection, ResourceManager) {
    let conn = open_db_in_memory().unwrap();
    let registry = registry();
    registry.install(&conn).unwrap();
    let manager = ResourceManager::new(registry, Arc::new(UpdateListenerRegistry::new()), config);
    (conn, manager)
}

fn setup() -> (Connection, ResourceManager) {
    setup_with(ManagerConfig::default())
}

fn tenant(name: &str) -> Resource {
    Resource::of_type("tenant").with("name", name)
}

fn stored_tenants(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM tenants;", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn one_notification_per_committing_session() {
    let (conn, manager) = setup();
    let recorder = Arc::new(Recorder::default());
    manager.register_listener(recorder.clone());

    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("existing"), false).unwrap();
    ctx.commit().unwrap();

    manager.create(&mut ctx, &tenant("t1"), false).unwrap();
    manager.create(&mut ctx, &tenant("t2"), false).unwrap();
    manager
        .update(&mut ctx, &tenant("existing"), &attrs! { "descr" => "changed" })
        .unwrap();
    ctx.commit().unwrap();

    let calls = recorder.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[1],
        Notification {
            added: vec!["t1".to_string(), "t2".to_string()],
            updated: vec!["existing".to_string()],
            deleted: Vec::new(),
        }
    );
}

#[test]
fn notified_resources_carry_staged_attribute_values() {
    let (conn, manager) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.register_update_listener("capture", move |_, added, _, _| {
        sink.lock().unwrap().extend(added.iter().cloned());
        Ok(())
    });

    let mut ctx = ResourceContext::from_connection(&conn);
    manager
        .create(
            &mut ctx,
            &Resource::of_type("vrf")
                .with("tenant_name", "common")
                .with("name", "v1")
                .with("enforced", true),
            false,
        )
        .unwrap();
    ctx.commit().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].resource_type(), "vrf");
    assert_eq!(seen[0].get("enforced"), Some(&AttrValue::Integer(1)));
    assert_eq!(seen[0].get("tenant_name"), Some(&AttrValue::from("common")));
}

#[test]
fn empty_update_never_notifies() {
    let (conn, manager) = setup();
    let recorder = Arc::new(Recorder::default());
    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("t1"), false).unwrap();
    ctx.commit().unwrap();

    manager.register_listener(recorder.clone());
    manager.update(&mut ctx, &tenant("t1"), &attrs! {}).unwrap();
    manager
        .update(&mut ctx, &tenant("t1"), &attrs! { "name" => "other" })
        .unwrap();
    ctx.commit().unwrap();

    assert!(recorder.calls().is_empty());
}

#[test]
fn create_then_delete_is_reported_as_added_and_deleted() {
    let (conn, manager) = setup();
    let recorder = Arc::new(Recorder::default());
    manager.register_listener(recorder.clone());

    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("flash"), false).unwrap();
    manager.delete(&mut ctx, &tenant("flash")).unwrap();
    ctx.commit().unwrap();

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].added, vec!["flash".to_string()]);
    assert_eq!(calls[0].deleted, vec!["flash".to_string()]);
    assert!(calls[0].updated.is_empty());
    assert_eq!(stored_tenants(&conn), 0);
}

#[test]
fn listeners_run_in_registration_order() {
    let (conn, manager) = setup();
    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let order = order.clone();
        manager.register_update_listener(label, move |_, _, _, _| {
            order.lock().unwrap().push(label);
            Ok(())
        });
    }

    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("t1"), false).unwrap();
    ctx.commit().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn unregistered_listener_misses_pending_commit() {
    let (conn, manager) = setup();
    let recorder = Arc::new(Recorder::default());
    let id = manager.register_listener(recorder.clone());

    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("t1"), false).unwrap();
    assert!(manager.unregister_update_listener(id));
    assert!(!manager.unregister_update_listener(id));
    ctx.commit().unwrap();

    assert!(recorder.calls().is_empty());
    assert_eq!(stored_tenants(&conn), 1);
}

#[test]
fn listener_registered_after_staging_sees_the_commit() {
    let (conn, manager) = setup();
    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("t1"), false).unwrap();

    let recorder = Arc::new(Recorder::default());
    manager.register_listener(recorder.clone());
    ctx.commit().unwrap();

    assert_eq!(recorder.calls().len(), 1);
}

#[test]
fn listener_failure_aborts_transaction_by_default() {
    let (conn, manager) = setup();
    manager.register_update_listener("veto", |_, _, _, _| Err(ListenerError::new("vetoed")));

    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("t1"), false).unwrap();
    let err = ctx.commit().unwrap_err();
    assert!(matches!(err, StoreError::Hook(_)));
    assert!(err.to_string().contains("vetoed"));

    assert!(ctx.db_session().pending_changes().is_empty());
    assert_eq!(stored_tenants(&conn), 0);
    assert!(manager.get(&ctx, &tenant("t1")).unwrap().is_none());
}

#[test]
fn listener_failure_can_reject_commit_and_keep_staged_changes() {
    let (conn, manager) = setup_with(ManagerConfig {
        listener_failure: ListenerFailurePolicy::RejectCommit,
    });
    let veto = Arc::new(Mutex::new(true));
    let flag = veto.clone();
    manager.register_update_listener("gate", move |_, _, _, _| {
        if *flag.lock().unwrap() {
            Err(ListenerError::new("gate closed"))
        } else {
            Ok(())
        }
    });

    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("t1"), false).unwrap();
    assert!(ctx.commit().is_err());
    assert_eq!(ctx.db_session().pending_changes().new.len(), 1);
    assert_eq!(stored_tenants(&conn), 0);

    *veto.lock().unwrap() = false;
    ctx.commit().unwrap();
    assert_eq!(stored_tenants(&conn), 1);
}

#[test]
fn later_listeners_do_not_run_after_a_failure() {
    let (conn, manager) = setup();
    let recorder = Arc::new(Recorder::default());
    manager.register_update_listener("veto", |_, _, _, _| Err(ListenerError::new("no")));
    manager.register_listener(recorder.clone());

    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("t1"), false).unwrap();
    assert!(ctx.commit().is_err());
    assert!(recorder.calls().is_empty());
}

#[test]
fn listener_can_read_through_the_committing_session() {
    let (conn, manager) = setup();
    let registry = manager.registry().clone();
    let counted = Arc::new(Mutex::new(None));
    let sink = counted.clone();
    manager.register_update_listener("reader", move |session, _, _, _| {
        let tenants = registry.get("tenant").unwrap().record_type();
        let visible = session
            .query(tenants, &attrs! {})
            .map_err(|err| ListenerError::new("query failed").with_source(err))?;
        *sink.lock().unwrap() = Some(visible.len());
        Ok(())
    });

    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("t1"), false).unwrap();
    manager.create(&mut ctx, &tenant("t2"), false).unwrap();
    ctx.commit().unwrap();

    assert_eq!(*counted.lock().unwrap(), Some(2));
}

#[test]
fn changes_to_unregistered_tables_are_not_notified() {
    let (conn, manager) = setup();
    let audit = Arc::new(RecordType::new(
        "audit_log",
        vec!["id".to_string()],
        vec!["message".to_string()],
    ));
    install_record_type(&conn, "audit", &audit).unwrap();
    let recorder = Arc::new(Recorder::default());
    manager.register_listener(recorder.clone());

    let mut ctx = ResourceContext::from_connection(&conn);
    manager.create(&mut ctx, &tenant("t1"), false).unwrap();
    ctx.commit().unwrap();

    ctx.db_session_mut()
        .add(Record::new(audit, attrs! { "id" => 1, "message" => "hello" }))
        .unwrap();
    ctx.commit().unwrap();

    assert_eq!(recorder.calls().len(), 1);
    let audit_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM audit_log;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(audit_rows, 1);
}

#[test]
fn shared_listener_registry_serves_every_manager() {
    let conn = open_db_in_memory().unwrap();
    let registry = registry();
    registry.install(&conn).unwrap();
    let listeners = Arc::new(UpdateListenerRegistry::new());
    let recorder = Arc::new(Recorder::default());
    listeners.register(recorder.clone());

    let first = ResourceManager::new(registry.clone(), listeners.clone(), ManagerConfig::default());
    let second = ResourceManager::new(registry, listeners, ManagerConfig::default());

    let mut ctx = ResourceContext::from_connection(&conn);
    first.create(&mut ctx, &tenant("a"), false).unwrap();
    second.create(&mut ctx, &tenant("b"), false).unwrap();
    ctx.commit().unwrap();

    let calls = recorder.calls();
    // Each manager attaches its own dispatcher.
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].added, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn unknown_type_never_reaches_listeners() {
    let (conn, manager) = setup();
    let recorder = Arc::new(Recorder::default());
    manager.register_listener(recorder.clone());

    let mut ctx = ResourceContext::from_connection(&conn);
    let err = manager
        .create(&mut ctx, &Resource::of_type("contract"), false)
        .unwrap_err();
    assert!(matches!(err, ManagerError::UnknownResourceType(_)));
    ctx.commit().unwrap();
    assert!(recorder.calls().is_empty());
}
