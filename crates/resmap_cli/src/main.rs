//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise `resmap_core` end to end against an in-memory database.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Set `RESMAP_LOG_DIR` to an absolute path to also write core logs there.

use log::info;
use resmap_core::db::open_db_in_memory;
use resmap_core::{
    attrs, core_version, default_log_level, init_logging, Resource, ResourceContext,
    ResourceManager, ResourceRegistry, ResourceSchema,
};
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("resmap_cli error={err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("RESMAP_LOG_DIR") {
        init_logging(default_log_level(), &log_dir)?;
    }
    println!("resmap_core version={}", core_version());

    let conn = open_db_in_memory()?;
    let registry = ResourceRegistry::new([ResourceSchema::builder("tenant")
        .table("tenants")
        .identity("name")
        .mutable("descr")
        .build()])?;
    registry.install(&conn)?;
    let manager = ResourceManager::with_defaults(Arc::new(registry));

    manager.register_update_listener("cli-probe", |_session, added, updated, deleted| {
        println!(
            "resmap_core notify added={} updated={} deleted={}",
            added.len(),
            updated.len(),
            deleted.len()
        );
        Ok(())
    });

    let mut ctx = ResourceContext::from_connection(&conn);
    for name in ["common", "mgmt"] {
        let tenant = Resource::of_type("tenant")
            .with("name", name)
            .with("descr", "probe");
        manager.create(&mut ctx, &tenant, false)?;
    }
    ctx.commit()?;

    let found = manager.find(&ctx, "tenant", &attrs! { "descr" => "probe" })?;
    println!("resmap_core find tenants={}", found.len());
    info!(
        "event=cli_probe module=cli status=ok tenants={}",
        found.len()
    );
    Ok(())
}
