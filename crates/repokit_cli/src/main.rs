//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire `repokit_core` against an in-memory SQLite store.
//! - Print a short deterministic report of derived, paged and bulk calls.
//!
//! Set `REPOKIT_LOG_DIR` to an absolute path to also write core logs.

use log::info;
use repokit_core::{
    args, core_version, default_log_level, init_logging, open_db_in_memory, Declaration, Direction,
    Entity, EntityDescriptor, EntityRegistry, FieldType, FromRecord, MappingError, Migration,
    Mutation, PageRequest, Record, Repository, ReturnKind, Sort, Value,
};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MIGRATIONS: &[Migration] = &[Migration::new(
    1,
    "CREATE TABLE member (
        member_id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL,
        age INTEGER NOT NULL
    );",
)];

#[derive(Debug, Clone)]
struct Member {
    id: Option<i64>,
    username: String,
    age: i64,
}

impl FromRecord for Member {
    fn from_record(record: &Record) -> Result<Self, MappingError> {
        Ok(Self {
            id: record.get("id")?,
            username: record.get("username")?,
            age: record.get("age")?,
        })
    }
}

impl Entity for Member {
    const NAME: &'static str = "Member";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder(Self::NAME, "member")
            .id("id", "member_id", FieldType::Integer)
            .field("username", FieldType::Text)
            .field("age", FieldType::Integer)
            .build()
    }

    fn id(&self) -> Option<Value> {
        self.id.map(Value::Integer)
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("username", Value::Text(self.username.clone())),
            ("age", Value::Integer(self.age)),
        ]
    }
}

fn main() -> ExitCode {
    if let Ok(log_dir) = std::env::var("REPOKIT_LOG_DIR") {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("repokit logging disabled: {err}");
        }
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("repokit smoke failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("repokit_core version={}", core_version());

    let conn = open_db_in_memory(MIGRATIONS)?;
    let mut registry = EntityRegistry::new();
    registry.register_entity::<Member>()?;

    let invalidations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invalidations);
    let repo = Repository::<Member>::builder(
        Arc::new(registry),
        Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .declare(
        Declaration::derived("findByUsernameAndAgeGreaterThan")
            .param()
            .param(),
    )
    .declare(
        Declaration::derived("findByAge")
            .param()
            .returns(ReturnKind::Page),
    )
    .declare(
        Declaration::raw(
            "bulkAgePlus",
            "UPDATE member SET age = age + 1 WHERE age >= :age",
        )
        .named_param("age")
        .returns(ReturnKind::Affected),
    )
    .build()?;

    for (username, age) in [("AAA", 10), ("AAA", 20), ("BBB", 10), ("CCC", 10), ("DDD", 40)] {
        repo.save(
            &conn,
            &Member {
                id: None,
                username: username.to_string(),
                age,
            },
        )?;
    }

    let found = repo.find_list(&conn, "findByUsernameAndAgeGreaterThan", args!["AAA", 15])?;
    println!("derived matches={}", found.len());

    let request = PageRequest::of_sorted(0, 2, Sort::by(Direction::Desc, &["username"]));
    let page = repo.find_page(&conn, "findByAge", args![10], &request)?;
    println!(
        "page content={} total={} pages={} has_next={}",
        page.number_of_elements(),
        page.total_elements().unwrap_or(0),
        page.total_pages().unwrap_or(0),
        page.has_next()
    );

    let bulk = repo.bulk_update(&conn, "bulkAgePlus", args![20], &Mutation::new())?;
    println!(
        "bulk affected={} invalidations={}",
        bulk.affected,
        invalidations.load(Ordering::SeqCst)
    );

    let total = repo.count_all(&conn)?;
    info!("event=cli_smoke module=cli status=ok members={total}");
    println!("members total={total}");
    Ok(())
}
