mod common;

use common::{
    member_declarations, member_repository, noop_hook, open, recording_hook, registry,
    seed_members, Member,
};
use repokit_core::{
    args, BulkResult, Declaration, EntityRegistry, Mutation, Output, Page, ParseError, Record,
    RegistryError, RepoError, Repository, ReturnKind,
};
use std::sync::Arc;

const MEMBER_SQL: &str =
    "SELECT member_id AS id, username, age, team_id AS team FROM member ORDER BY member_id";

#[test]
fn custom_operations_are_addressable_by_name() {
    let conn = open();
    let repo: Repository<Member> = Repository::builder(registry(), noop_hook())
        .declare(Declaration::derived("findListByUsername").param())
        .custom("findMemberCustom", |ctx, _args| {
            let rows = ctx.store().execute(MEMBER_SQL, &[])?;
            Ok(Output::Records(rows.iter().map(Record::from_row).collect()))
        })
        .build()
        .unwrap();
    seed_members(&repo, &conn, &[("AAA", 10), ("BBB", 20)]);

    let members = repo.find_list(&conn, "findMemberCustom", args![]).unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[1].username, "BBB");

    let derived = repo
        .find_list(&conn, "findListByUsername", args!["AAA"])
        .unwrap();
    assert_eq!(derived.len(), 1);
}

#[test]
fn custom_override_replaces_declared_operation() {
    let conn = open();
    let repo: Repository<Member> = Repository::builder(registry(), noop_hook())
        .declare(Declaration::derived("findListByUsername").param())
        .custom_override("findListByUsername", |_ctx, _args| {
            Ok(Output::Records(vec![Record::new()
                .with("id", 7_i64)
                .with("username", "custom")
                .with("age", 1_i64)
                .with("team", None::<i64>)]))
        })
        .build()
        .unwrap();

    assert!(repo.plan("findListByUsername").is_none());
    let members = repo
        .find_list(&conn, "findListByUsername", args!["ignored"])
        .unwrap();
    assert_eq!(members[0].username, "custom");
}

#[test]
fn name_collisions_fail_the_build() {
    let custom_over_declared = Repository::<Member>::builder(registry(), noop_hook())
        .declare(Declaration::derived("findListByUsername").param())
        .custom("findListByUsername", |_ctx, _args| Ok(Output::Count(0)))
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        custom_over_declared,
        RepoError::AmbiguousOperation(_)
    ));

    let duplicate_declaration = Repository::<Member>::builder(registry(), noop_hook())
        .declare(Declaration::derived("findListByUsername").param())
        .declare(
            Declaration::derived("findListByUsername")
                .param()
                .returns(ReturnKind::Single),
        )
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        duplicate_declaration,
        RepoError::AmbiguousOperation(_)
    ));

    let duplicate_custom = Repository::<Member>::builder(registry(), noop_hook())
        .custom("op", |_ctx, _args| Ok(Output::Count(0)))
        .custom_override("op", |_ctx, _args| Ok(Output::Count(1)))
        .build()
        .err()
        .unwrap();
    assert!(matches!(duplicate_custom, RepoError::AmbiguousOperation(_)));
}

#[test]
fn malformed_declarations_fail_at_build() {
    let unknown_field = Repository::<Member>::builder(registry(), noop_hook())
        .declare(Declaration::derived("findByNickname").param())
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        unknown_field,
        RepoError::Parse(ParseError::UnknownField { .. })
    ));

    let count_mismatch = Repository::<Member>::builder(registry(), noop_hook())
        .declare(Declaration::derived("findByUsernameAndAge").param())
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        count_mismatch,
        RepoError::Parse(ParseError::ParameterCountMismatch { .. })
    ));

    let unknown_verb = Repository::<Member>::builder(registry(), noop_hook())
        .declare(Declaration::derived("fetchByUsername").param())
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        unknown_verb,
        RepoError::Parse(ParseError::UnknownVerb(_))
    ));
}

#[test]
fn unmapped_entity_fails_at_build() {
    let err = Repository::<Member>::builder(Arc::new(EntityRegistry::new()), noop_hook())
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        RepoError::Registry(RegistryError::UnmappedEntity(_))
    ));
}

#[test]
fn custom_operations_receive_page_and_invalidation_access() {
    let conn = open();
    let (hook, calls) = recording_hook();
    let repo: Repository<Member> = Repository::builder(registry(), hook)
        .custom("findPageCustom", |ctx, _args| {
            let request = ctx
                .page()
                .ok_or_else(|| RepoError::InvalidRequest("page required".to_string()))?;
            let rows = ctx.store().execute(MEMBER_SQL, &[])?;
            let total = rows.len() as u64;
            let content = rows
                .iter()
                .skip(request.offset() as usize)
                .take(request.size as usize)
                .map(Record::from_row)
                .collect();
            Ok(Output::Page(Page::counted(content, request, total)))
        })
        .custom("resetAges", |ctx, _args| {
            let affected = ctx
                .store()
                .execute_mutation("UPDATE member SET age = 0", &[])?;
            if affected > 0 {
                ctx.invalidate();
            }
            Ok(Output::Affected(BulkResult {
                affected,
                invalidated: affected > 0,
            }))
        })
        .build()
        .unwrap();
    seed_members(&repo, &conn, &[("a", 1), ("b", 2), ("c", 3)]);

    let page = repo
        .find_page(
            &conn,
            "findPageCustom",
            args![],
            &repokit_core::PageRequest::of(1, 2),
        )
        .unwrap();
    assert_eq!(page.content()[0].username, "c");
    assert_eq!(page.total_elements(), Some(3));

    let result = repo
        .bulk_update(&conn, "resetAges", args![], &Mutation::new())
        .unwrap();
    assert_eq!(result.affected, 3);
    assert_eq!(*calls.lock().unwrap(), vec!["Member".to_string()]);
}

#[test]
fn custom_bulk_operations_are_invalidated_on_return() {
    let conn = open();
    let (hook, calls) = recording_hook();
    let repo: Repository<Member> = Repository::builder(registry(), hook)
        .custom("ageEveryone", |ctx, _args| {
            let affected = ctx
                .store()
                .execute_mutation("UPDATE member SET age = age + 1", &[])?;
            Ok(Output::Affected(BulkResult {
                affected,
                invalidated: false,
            }))
        })
        .build()
        .unwrap();

    let untouched = repo
        .bulk_update(&conn, "ageEveryone", args![], &Mutation::new())
        .unwrap();
    assert_eq!(untouched.affected, 0);
    assert!(!untouched.invalidated);
    assert!(calls.lock().unwrap().is_empty());

    seed_members(&repo, &conn, &[("a", 1), ("b", 2)]);
    let result = repo
        .bulk_update(&conn, "ageEveryone", args![], &Mutation::new())
        .unwrap();
    assert_eq!(result.affected, 2);
    assert!(result.invalidated);
    assert_eq!(*calls.lock().unwrap(), vec!["Member".to_string()]);
}

#[test]
fn wrong_output_from_custom_operation_is_a_shape_mismatch() {
    let conn = open();
    let repo: Repository<Member> = Repository::builder(registry(), noop_hook())
        .custom("countCustom", |_ctx, _args| Ok(Output::Count(3)))
        .build()
        .unwrap();

    assert_eq!(repo.count(&conn, "countCustom", args![]).unwrap(), 3);
    let err = repo
        .find_list(&conn, "countCustom", args![])
        .unwrap_err();
    assert!(matches!(err, RepoError::ShapeMismatch { .. }));
}

#[test]
fn repository_lists_declared_and_builtin_operations() {
    let repo = member_repository(noop_hook());
    let names = repo.operation_names();

    for builtin in ["findAll", "findById", "count", "countById", "deleteById"] {
        assert!(names.contains(&builtin), "missing {builtin}");
    }
    assert_eq!(
        names.len(),
        member_declarations().len() + 4,
        "findAll is declared explicitly"
    );
    assert!(repo.plan("findAll").unwrap().fetch.len() == 1);
}

#[test]
fn repositories_are_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Repository<Member>>();
    assert_send_sync::<EntityRegistry>();
}
