//! Backup and restore must never interleave their disconnect/copy/reconnect
//! sequences. Every sequence is bracketed by `maintenance begin` and
//! `maintenance end` debug events emitted while the lock is held, so a
//! process-wide capture of those events shows any overlap.
//!
//! This lives in its own test binary because it installs the global
//! subscriber.

use std::sync::{Arc, Mutex};
use std::thread;

use normsql_core::{FieldSpec, Row, StoreConfig, TableDefinition};
use normsql_sqlite::{Database, Options};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

#[derive(Clone, Debug)]
struct Marker {
    message: String,
    operation: String,
}

#[derive(Default)]
struct MarkerVisitor {
    message: String,
    operation: String,
}

impl tracing::field::Visit for MarkerVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "operation" => self.operation = format!("{value:?}"),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => value.clone_into(&mut self.message),
            "operation" => value.clone_into(&mut self.operation),
            _ => {}
        }
    }
}

struct MarkerLayer {
    markers: Arc<Mutex<Vec<Marker>>>,
}

impl<S: Subscriber> Layer<S> for MarkerLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MarkerVisitor::default();
        event.record(&mut visitor);
        if visitor.message.starts_with("maintenance ") {
            self.markers.lock().unwrap().push(Marker {
                message: visitor.message,
                operation: visitor.operation,
            });
        }
    }
}

#[test]
fn test_backup_and_restore_never_interleave() {
    let markers = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry()
        .with(MarkerLayer {
            markers: Arc::clone(&markers),
        })
        .with(LevelFilter::DEBUG);
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(StoreConfig::new(dir.path().join("store.sqlite"))).unwrap();
    db.add_table_definition(TableDefinition::new("samples").with_field("name", FieldSpec::text()))
        .unwrap();
    db.connect().unwrap();
    db.insert("samples", &[Row::new().with("name", "seed")], &Options::default())
        .unwrap();
    db.backup().unwrap();
    let db = Arc::new(db);

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for _ in 0..5 {
                    if worker % 2 == 0 {
                        db.backup().unwrap();
                    } else {
                        db.restore(0).unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let markers = markers.lock().unwrap().clone();
    // The seeding backup plus twenty from the workers.
    assert_eq!(markers.len(), 2 * 21);
    for pair in markers.chunks(2) {
        assert_eq!(pair[0].message, "maintenance begin", "{markers:?}");
        assert_eq!(pair[1].message, "maintenance end", "{markers:?}");
        assert_eq!(pair[0].operation, pair[1].operation, "{markers:?}");
    }
    assert!(db.is_connected());
}
