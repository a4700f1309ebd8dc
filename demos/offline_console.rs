// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline console example.
//!
//! Demonstrates:
//! 1. Opening a SQLite store and rescuing a legacy JSON export into it
//! 2. Serving pages straight from the store (cached-only when signed out)
//! 3. Signing in and running a sync against the backend proxy
//! 4. Displaying the metrics the data layer recorded
//!
//! Without `SCOUT_BACKEND` the demo answers from a built-in script, so it
//! runs with no network at all.
//!
//! # Run
//!
//! ```bash
//! # Scripted backend
//! cargo run --example offline_console
//!
//! # Real backend proxy, completing an OAuth redirect
//! SCOUT_BACKEND=https://console.example.org \
//! SCOUT_CALLBACK='?code=...&state=...' \
//! cargo run --example offline_console
//! ```
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `SCOUT_DB` | `scout_console.db` | SQLite file |
//! | `SCOUT_LEGACY` | `legacy_storage.json` | legacy flat-key export to migrate |
//! | `SCOUT_BACKEND` | unset | backend proxy URL |
//! | `SCOUT_CALLBACK` | unset | OAuth callback query to exchange |

use std::path::Path;
use std::sync::Arc;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

use scout_sync::clock::{Clock, SystemClock};
use scout_sync::remote::adapter::{ATTENDANCE_PATH, EVENTS_PATH, MEMBERS_PATH, SECTIONS_PATH, USER_PATH};
use scout_sync::remote::{ReqwestTransport, ScriptedTransport, Transport};
use scout_sync::storage::{migrate, JsonFileLegacy, PersistentStore, SqliteStore};
use scout_sync::{
    classify, AuthGrant, DataFacade, PageData, PageKind, PageSnapshot, SyncConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the data layer records)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .init();

    println!("=== Scout offline console ===\n");

    // 1. Store + legacy migration
    let db_path = std::env::var("SCOUT_DB").unwrap_or_else(|_| "scout_console.db".into());
    let store = Arc::new(SqliteStore::open(&format!("sqlite:{}", db_path)).await?);
    println!("Store: {}", db_path);

    let legacy_path = std::env::var("SCOUT_LEGACY").unwrap_or_else(|_| "legacy_storage.json".into());
    if Path::new(&legacy_path).exists() {
        let legacy = JsonFileLegacy::open(&legacy_path)?;
        let report = migrate(store.as_ref(), &legacy, SystemClock.today()).await?;
        if report.ran() {
            println!(
                "Migrated legacy storage v{} -> v{}: {} sections, {} members, {} events, {} attendance, {} rescued",
                report.from_version,
                report.to_version,
                report.sections,
                report.members,
                report.events,
                report.attendance,
                report.rescued
            );
        }
    }
    for (table, rows) in store.row_counts().await? {
        println!("  {:<12} {} rows", table.name(), rows);
    }

    // 2. Facade over the chosen backend
    let backend = std::env::var("SCOUT_BACKEND").ok();
    let config = match &backend {
        Some(url) => SyncConfig { backend_url: url.clone(), ..SyncConfig::default() },
        None => SyncConfig::default(),
    };
    let transport: Arc<dyn Transport> = match &backend {
        Some(_) => Arc::new(ReqwestTransport::new()?),
        None => scripted_backend(),
    };
    let facade = DataFacade::open(config, store.clone(), transport, Arc::new(SystemClock)).await?;
    let auth = facade.use_auth();
    println!("\nSession: {}", auth.state());

    // Cached pages render before any network
    let cached = facade.use_page_data(PageKind::Events).ready().await;
    print_snapshot("events (cached)", &cached);

    // 3. Sign in
    let signed_in = match (&backend, std::env::var("SCOUT_CALLBACK")) {
        (Some(_), Ok(query)) => auth.login_with_callback(&query).await,
        (Some(_), Err(_)) => {
            println!("No SCOUT_CALLBACK given; staying cached-only");
            Err(scout_sync::SyncError::TokenExpired)
        }
        (None, _) => auth.login(&AuthGrant { access_token: "demo-token".into(), expires_in: 3600.0 }).await,
    };
    match signed_in {
        Ok(user) => println!("Signed in as {} {} ({}s left)", user.first_name, user.last_name, auth.remaining_ms() / 1000),
        Err(e) => println!("Not signed in: {} ({:?})", e, e.notice_level()),
    }

    // Forced refreshes go through the engine's coalescing and rate limits
    for kind in [PageKind::Sections, PageKind::Events, PageKind::Movers] {
        let page = facade.use_page_data(kind.clone());
        let report = page.refresh().await;
        println!(
            "\nRefreshed {:?}: run {} wrote {} records{}",
            kind,
            report.run_id,
            report.records(),
            report.error.as_ref().map(|e| format!(" (error: {})", e)).unwrap_or_default()
        );
        print_snapshot(&format!("{:?}", kind), &page.snapshot());
    }

    let detail = facade.use_page_data(PageKind::EventDetail { event_id: "e1".into(), section_id: "49097".into() });
    detail.refresh().await;
    print_snapshot("event detail", &detail.snapshot());

    // 4. Metrics
    println!("\n=== Metrics ===");
    print_metrics(&snapshotter);

    auth.logout();
    println!("\nSigned out; session is now {}", auth.state());
    store.close().await;
    Ok(())
}

/// Canned backend answers, shaped like the real proxy's.
fn scripted_backend() -> Arc<dyn Transport> {
    let transport = ScriptedTransport::new();
    transport.respond_json(USER_PATH, json!({"userid": "1001", "firstname": "Demo", "lastname": "Leader"}));
    transport.respond_json(
        SECTIONS_PATH,
        json!({"items": [
            {"sectionid": "49097", "sectionname": "Beavers", "section": "beavers"},
            {"sectionid": "11107", "sectionname": "Cubs", "section": "cubs"}
        ]}),
    );
    transport.respond_json_for(
        MEMBERS_PATH,
        "sectionid",
        "49097",
        json!({"identifier": "scoutid", "items": [
            {"scoutid": 2486157, "firstname": "Sam", "lastname": "Smith", "dob": "2016-09-12",
             "essential_information": {"allergies": "No allergies", "swimmer": "Yes"}},
            {"scoutid": 2486158, "firstname": "Alex", "lastname": "Jones", "dob": "2017-02-01",
             "essential_information": {"allergies": "Peanuts", "swimmer": "No"}}
        ]}),
    );
    transport.respond_json_for(
        MEMBERS_PATH,
        "sectionid",
        "11107",
        json!({"identifier": "scoutid", "data": {
            "2486157": {"firstname": "Sam", "lastname": "Smith", "dob": "2016-09-12"},
            "2490001": {"firstname": "Riley", "lastname": "Brown", "dob": "2014-05-30"}
        }}),
    );
    transport.respond_json_for(
        EVENTS_PATH,
        "sectionid",
        "49097",
        json!({"data": {"e1": {"name": "Summer Camp", "startdate": "2024-07-20", "location": "Gilwell"}}}),
    );
    transport.respond_json(EVENTS_PATH, json!({"items": []}));
    transport.respond_json(
        ATTENDANCE_PATH,
        json!({"items": [
            {"scoutid": 2486157, "attending": "Yes"},
            {"scoutid": 2486158, "attending": "Invited"}
        ]}),
    );
    transport
}

fn print_snapshot(label: &str, snapshot: &PageSnapshot) {
    println!("-- {} (loading: {}, error: {:?})", label, snapshot.loading, snapshot.error);
    match &snapshot.data {
        None => println!("   (no data yet)"),
        Some(PageData::Sections(page)) => {
            for section in &page.sections {
                let count = page.members.iter().filter(|m| m.sections.contains_key(&section.id)).count();
                println!("   {:<10} {} members", section.name, count);
            }
        }
        Some(PageData::Events(page)) => {
            for (section_id, events) in &page.events {
                for event in events {
                    println!("   [{}] {} {}", section_id, event.start.as_deref().unwrap_or("?"), event.name);
                }
            }
        }
        Some(PageData::EventDetail(page)) => {
            if let Some(event) = &page.event {
                println!("   {}: yes {} / no {} / invited {}", event.name, page.summary.yes, page.summary.no, page.summary.invited);
            }
            for member in &page.members {
                let allergies = member.field("essential_information", "allergies").unwrap_or("");
                println!("   {:<14} age {:<5} allergies: {}", member.full_name(), member.age, classify(allergies, "allergies").as_str());
            }
        }
        Some(PageData::Movers(page)) => {
            for member in &page.members {
                println!("   {:<14} {} in {:?}", member.full_name(), member.age, member.section_names());
            }
        }
    }
}

fn print_metrics(snapshotter: &Snapshotter) {
    let mut rows: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(key, _, _, value)| {
            let key = key.key();
            let labels: Vec<String> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let value = match value {
                DebugValue::Counter(n) => n.to_string(),
                DebugValue::Gauge(g) => format!("{:.0}", g.into_inner()),
                DebugValue::Histogram(samples) => format!("{} samples", samples.len()),
            };
            format!("  {}{{{}}} = {}", key.name(), labels.join(","), value)
        })
        .collect();
    rows.sort();
    for row in rows {
        println!("{}", row);
    }
}
