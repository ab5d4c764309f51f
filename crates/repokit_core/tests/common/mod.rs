#![allow(dead_code)]

use repokit_core::{
    open_db_in_memory, CachePolicy, Declaration, Entity, EntityDescriptor, EntityRegistry,
    FetchDirective, FieldType, FromRecord, InvalidationHook, MappingError, Migration,
    PagingStrategy, Record, Related, Repository, ReturnKind, Row, Store, StoreResult, Value,
};
use rusqlite::Connection;
use std::cell::RefCell;
use std::sync::{Arc, Mutex};

pub const MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        "CREATE TABLE team (
            team_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        );",
    ),
    Migration::new(
        2,
        "CREATE TABLE member (
            member_id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            age INTEGER NOT NULL,
            team_id INTEGER REFERENCES team(team_id)
        );",
    ),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
}

impl Team {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }
}

impl FromRecord for Team {
    fn from_record(record: &Record) -> Result<Self, MappingError> {
        Ok(Self {
            id: record.get("id")?,
            name: record.get("name")?,
        })
    }
}

impl Entity for Team {
    const NAME: &'static str = "Team";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder(Self::NAME, "team")
            .id("id", "team_id", FieldType::Integer)
            .field("name", FieldType::Text)
            .build()
    }

    fn id(&self) -> Option<Value> {
        self.id.map(Value::Integer)
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![("name", Value::Text(self.name.clone()))]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub id: Option<i64>,
    pub username: String,
    pub age: i64,
    pub team: Related<Team>,
}

impl Member {
    pub fn new(username: &str, age: i64) -> Self {
        Self {
            id: None,
            username: username.to_string(),
            age,
            team: Related::default(),
        }
    }

    pub fn with_team(username: &str, age: i64, team_id: i64) -> Self {
        Self {
            team: Related::Unresolved(Value::Integer(team_id)),
            ..Self::new(username, age)
        }
    }
}

impl FromRecord for Member {
    fn from_record(record: &Record) -> Result<Self, MappingError> {
        Ok(Self {
            id: record.get("id")?,
            username: record.get("username")?,
            age: record.get("age")?,
            team: record.related("team")?,
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
            .association("team", "Team", "team_id")
            .build()
    }

    fn id(&self) -> Option<Value> {
        self.id.map(Value::Integer)
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("username", Value::Text(self.username.clone())),
            ("age", Value::Integer(self.age)),
            ("team", self.team.key()),
        ]
    }
}

/// Member with its team name, read through a raw projection query.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDto {
    pub id: i64,
    pub username: String,
    pub team_name: String,
}

impl FromRecord for MemberDto {
    fn from_record(record: &Record) -> Result<Self, MappingError> {
        Ok(Self {
            id: record.get("id")?,
            username: record.get("username")?,
            team_name: record.get("teamName")?,
        })
    }
}

const MEMBER_COLUMNS: &str = "member_id AS id, username, age, team_id AS team";

pub fn open() -> Connection {
    open_db_in_memory(MIGRATIONS).unwrap()
}

pub fn registry() -> Arc<EntityRegistry> {
    let mut registry = EntityRegistry::new();
    registry.register_entity::<Team>().unwrap();
    registry.register_entity::<Member>().unwrap();
    Arc::new(registry)
}

/// Every operation the member tests exercise.
pub fn member_declarations() -> Vec<Declaration> {
    vec![
        Declaration::derived("findByUsernameAndAgeGreaterThan")
            .param()
            .param(),
        Declaration::raw(
            "findUser",
            format!(
                "SELECT {MEMBER_COLUMNS} FROM member WHERE username = :username AND age = :age"
            ),
        )
        .named_param("username")
        .named_param("age"),
        Declaration::raw("findUsernameList", "SELECT username FROM member ORDER BY member_id")
            .returns(ReturnKind::Scalars),
        Declaration::raw(
            "findMemberDto",
            "SELECT m.member_id AS id, m.username AS username, t.name AS teamName
             FROM member m JOIN team t ON m.team_id = t.team_id
             ORDER BY m.member_id",
        )
        .returns(ReturnKind::Projection),
        Declaration::raw(
            "findByNames",
            format!("SELECT {MEMBER_COLUMNS} FROM member WHERE username IN :names"),
        )
        .named_collection("names"),
        Declaration::derived("findByUsernameIn").collection(),
        Declaration::derived("findListByUsername").param(),
        Declaration::derived("findMemberByUsername")
            .param()
            .returns(ReturnKind::Single),
        Declaration::derived("findOptionalByUsername")
            .param()
            .returns(ReturnKind::Single),
        Declaration::derived("findByAgeOrderByUsernameDesc").param(),
        Declaration::derived("findByAge")
            .param()
            .returns(ReturnKind::Page),
        Declaration::derived("findSliceByAge")
            .param()
            .returns(ReturnKind::Page)
            .paging(PagingStrategy::Windowed),
        Declaration::raw(
            "findRawPageByAge",
            format!("SELECT {MEMBER_COLUMNS} FROM member WHERE age = :age"),
        )
        .named_param("age")
        .returns(ReturnKind::Page)
        .count_query("SELECT COUNT(member_id) FROM member WHERE age = :age"),
        Declaration::derived("countByAge")
            .param()
            .returns(ReturnKind::Count),
        Declaration::raw(
            "bulkAgePlus",
            "update member set age = age + 1 where age >= :age",
        )
        .named_param("age")
        .returns(ReturnKind::Affected),
        Declaration::derived("updateByAgeGreaterThanEqual")
            .param()
            .returns(ReturnKind::Affected),
        Declaration::derived("updateStatsByAgeGreaterThanEqual")
            .param()
            .returns(ReturnKind::Affected)
            .cache(CachePolicy::Retain),
        Declaration::derived("deleteByUsername")
            .param()
            .returns(ReturnKind::Affected),
        Declaration::derived("findAll").fetch(FetchDirective::left(["team"])),
        Declaration::derived("findMemberFetchJoin").fetch(FetchDirective::left(["team"])),
        Declaration::derived("findEntityGraphByUsername")
            .param()
            .fetch(FetchDirective::left(["team"])),
        Declaration::derived("findLazyByUsername").param(),
    ]
}

pub fn member_repository(hook: Arc<dyn InvalidationHook>) -> Repository<Member> {
    member_declarations()
        .into_iter()
        .fold(Repository::builder(registry(), hook), |builder, declaration| {
            builder.declare(declaration)
        })
        .build()
        .unwrap()
}

pub fn team_repository() -> Repository<Team> {
    Repository::builder(registry(), noop_hook()).build().unwrap()
}

pub fn noop_hook() -> Arc<dyn InvalidationHook> {
    Arc::new(|_: &str| {})
}

/// Hook that records every invalidated entity name.
pub fn recording_hook() -> (Arc<dyn InvalidationHook>, Arc<Mutex<Vec<String>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    let hook: Arc<dyn InvalidationHook> = Arc::new(move |entity: &str| {
        sink.lock().unwrap().push(entity.to_string());
    });
    (hook, calls)
}

/// Saves members and returns them with identifiers assigned.
pub fn seed_members(
    repo: &Repository<Member>,
    conn: &Connection,
    members: &[(&str, i64)],
) -> Vec<Member> {
    members
        .iter()
        .map(|(username, age)| {
            let mut member = Member::new(username, *age);
            let id = repo.save(conn, &member).unwrap();
            member.id = match id {
                Value::Integer(id) => Some(id),
                other => panic!("unexpected id {other:?}"),
            };
            member
        })
        .collect()
}

pub fn seed_team(conn: &Connection, name: &str) -> i64 {
    match team_repository().save(conn, &Team::new(name)).unwrap() {
        Value::Integer(id) => id,
        other => panic!("unexpected id {other:?}"),
    }
}

/// Store wrapper that records every statement it forwards.
pub struct CountingStore<'c> {
    conn: &'c Connection,
    statements: RefCell<Vec<String>>,
}

impl<'c> CountingStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            statements: RefCell::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.statements.borrow().len()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.borrow().clone()
    }

    pub fn reset(&self) {
        self.statements.borrow_mut().clear();
    }

    fn record(&self, sql: &str) {
        self.statements.borrow_mut().push(sql.to_string());
    }
}

impl Store for CountingStore<'_> {
    fn execute(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
        self.record(sql);
        Store::execute(self.conn, sql, params)
    }

    fn execute_scalar(&self, sql: &str, params: &[Value]) -> StoreResult<Option<Value>> {
        self.record(sql);
        self.conn.execute_scalar(sql, params)
    }

    fn execute_mutation(&self, sql: &str, params: &[Value]) -> StoreResult<u64> {
        self.record(sql);
        self.conn.execute_mutation(sql, params)
    }
}
