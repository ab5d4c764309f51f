mod common;

use common::{
    member_repository, noop_hook, open, registry, seed_members, seed_team, CountingStore, Member,
};
use repokit_core::{
    args, Declaration, Direction, FetchDirective, JoinKind, PageRequest, RepoError, Repository,
    ReturnKind, Sort,
};

fn five_members_aged_ten() -> rusqlite::Connection {
    let conn = open();
    let repo = member_repository(noop_hook());
    seed_members(
        &repo,
        &conn,
        &[
            ("member1", 10),
            ("member2", 10),
            ("member3", 10),
            ("member4", 10),
            ("member5", 10),
            ("other", 20),
        ],
    );
    conn
}

fn by_username_desc(page: u32, size: u32) -> PageRequest {
    PageRequest::of_sorted(page, size, Sort::by(Direction::Desc, &["username"]))
}

#[test]
fn counted_page_reports_totals_and_navigation() {
    let conn = five_members_aged_ten();
    let repo = member_repository(noop_hook());

    let page = repo
        .find_page(&conn, "findByAge", args![10], &by_username_desc(0, 3))
        .unwrap();

    let names: Vec<&str> = page
        .content()
        .iter()
        .map(|member| member.username.as_str())
        .collect();
    assert_eq!(names, vec!["member5", "member4", "member3"]);
    assert_eq!(page.number(), 0);
    assert_eq!(page.total_elements(), Some(5));
    assert_eq!(page.total_pages(), Some(2));
    assert!(page.is_first());
    assert!(page.has_next());
}

#[test]
fn counted_last_and_past_last_pages() {
    let conn = five_members_aged_ten();
    let repo = member_repository(noop_hook());

    let last = repo
        .find_page(&conn, "findByAge", args![10], &by_username_desc(1, 3))
        .unwrap();
    assert_eq!(last.number_of_elements(), 2);
    assert_eq!(last.total_elements(), Some(5));
    assert!(!last.has_next());
    assert!(last.is_last());

    let past = repo
        .find_page(&conn, "findByAge", args![10], &by_username_desc(4, 3))
        .unwrap();
    assert!(past.content().is_empty());
    assert!(!past.has_next());
    assert_eq!(past.total_elements(), Some(5));
}

#[test]
fn count_query_is_skipped_when_content_implies_total() {
    let conn = five_members_aged_ten();
    let repo = member_repository(noop_hook());
    let store = CountingStore::new(&conn);

    repo.find_page(&store, "findByAge", args![10], &by_username_desc(0, 3))
        .unwrap();
    assert_eq!(store.count(), 2);
    assert!(store.statements()[1].starts_with("SELECT COUNT(*)"));
    assert!(!store.statements()[1].contains("JOIN"));

    store.reset();
    let short = repo
        .find_page(&store, "findByAge", args![10], &by_username_desc(1, 3))
        .unwrap();
    assert_eq!(store.count(), 1);
    assert_eq!(short.total_elements(), Some(5));

    store.reset();
    let small = repo
        .find_page(&store, "findByAge", args![10], &by_username_desc(0, 10))
        .unwrap();
    assert_eq!(store.count(), 1);
    assert_eq!(small.total_elements(), Some(5));
    assert_eq!(small.total_pages(), Some(1));
}

#[test]
fn windowed_page_over_fetches_one_row() {
    let conn = five_members_aged_ten();
    let repo = member_repository(noop_hook());
    let store = CountingStore::new(&conn);

    let first = repo
        .find_page(&store, "findSliceByAge", args![10], &by_username_desc(0, 3))
        .unwrap();
    assert_eq!(first.number_of_elements(), 3);
    assert!(first.has_next());
    assert_eq!(first.total_elements(), None);
    assert_eq!(store.count(), 1);

    let second = repo
        .find_page(&store, "findSliceByAge", args![10], &by_username_desc(1, 3))
        .unwrap();
    assert_eq!(second.number_of_elements(), 2);
    assert!(!second.has_next());
}

#[test]
fn raw_page_uses_declared_count_query() {
    let conn = five_members_aged_ten();
    let repo = member_repository(noop_hook());
    let store = CountingStore::new(&conn);

    let page = repo
        .find_page(&store, "findRawPageByAge", args![10], &by_username_desc(0, 2))
        .unwrap();

    let names: Vec<&str> = page
        .content()
        .iter()
        .map(|member| member.username.as_str())
        .collect();
    assert_eq!(names, vec!["member5", "member4"]);
    assert_eq!(page.total_elements(), Some(5));
    assert_eq!(page.total_pages(), Some(3));
    assert_eq!(
        store.statements()[1],
        "SELECT COUNT(member_id) FROM member WHERE age = ?"
    );
}

#[test]
fn invalid_page_requests_fail() {
    let conn = five_members_aged_ten();
    let repo = member_repository(noop_hook());

    let zero = repo
        .find_page(&conn, "findByAge", args![10], &by_username_desc(0, 0))
        .unwrap_err();
    assert!(matches!(zero, RepoError::InvalidRequest(_)));

    let unordered = repo
        .find_page(&conn, "findByAge", args![10], &PageRequest::of(0, 3))
        .unwrap_err();
    assert!(matches!(unordered, RepoError::UnorderedPagination(_)));

    let unknown_sort = repo
        .find_page(
            &conn,
            "findByAge",
            args![10],
            &PageRequest::of_sorted(0, 3, Sort::by(Direction::Asc, &["nickname"])),
        )
        .unwrap_err();
    assert!(matches!(unknown_sort, RepoError::InvalidRequest(_)));

    let not_a_page = repo
        .find_page(&conn, "findListByUsername", args!["x"], &by_username_desc(0, 3))
        .unwrap_err();
    assert!(matches!(not_a_page, RepoError::ShapeMismatch { .. }));
}

#[test]
fn page_map_and_serialization() {
    let conn = five_members_aged_ten();
    let repo = member_repository(noop_hook());

    let page = repo
        .find_page(&conn, "findByAge", args![10], &by_username_desc(0, 3))
        .unwrap()
        .map(|member| member.username);

    let json = serde_json::to_value(&page).unwrap();
    assert_eq!(json["content"][0], "member5");
    assert_eq!(json["total_elements"], 5);
    assert_eq!(json["has_next"], true);
}

/// Page operations over members with teams: left and inner fetch joins plus a
/// raw query that orders itself.
fn team_page_repository() -> Repository<Member> {
    Repository::builder(registry(), noop_hook())
        .declare(
            Declaration::derived("findTeamedByAge")
                .param()
                .returns(ReturnKind::Page)
                .fetch(FetchDirective::left(["team"])),
        )
        .declare(
            Declaration::derived("findStaffedByAge")
                .param()
                .returns(ReturnKind::Page)
                .fetch(FetchDirective::new().join("team", JoinKind::Inner)),
        )
        .declare(
            Declaration::raw(
                "findOrderedRawPage",
                "SELECT member_id AS id, username, age, team_id AS team FROM member
                 WHERE age = :age ORDER BY username DESC",
            )
            .named_param("age")
            .returns(ReturnKind::Page)
            .ordered(),
        )
        .build()
        .unwrap()
}

/// Five members aged ten; only the first three belong to a team.
fn five_members_three_teamed() -> rusqlite::Connection {
    let conn = open();
    let team_id = seed_team(&conn, "teamA");
    let repo = member_repository(noop_hook());
    for (index, username) in ["member1", "member2", "member3", "member4", "member5"]
        .iter()
        .enumerate()
    {
        let member = if index < 3 {
            Member::with_team(username, 10, team_id)
        } else {
            Member::new(username, 10)
        };
        repo.save(&conn, &member).unwrap();
    }
    conn
}

fn by_username_asc(page: u32, size: u32) -> PageRequest {
    PageRequest::of_sorted(page, size, Sort::by(Direction::Asc, &["username"]))
}

#[test]
fn fetch_joined_page_counts_without_join_columns() {
    let conn = five_members_three_teamed();
    let repo = team_page_repository();
    let store = CountingStore::new(&conn);

    let page = repo
        .find_page(&store, "findTeamedByAge", args![10], &by_username_asc(1, 2))
        .unwrap();

    let statements = store.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].contains("LEFT JOIN"));
    assert!(statements[1].starts_with("SELECT COUNT(*)"));
    assert!(!statements[1].contains("JOIN"));

    assert_eq!(page.total_elements(), Some(5));
    let members = page.content();
    assert_eq!(members[0].username, "member3");
    assert_eq!(
        members[0].team.get().map(|team| team.name.as_str()),
        Some("teamA")
    );
    assert_eq!(members[1].username, "member4");
    assert!(members[1].team.is_loaded());
    assert!(members[1].team.get().is_none());
}

#[test]
fn inner_join_page_totals_agree_on_every_page() {
    let conn = five_members_three_teamed();
    let repo = team_page_repository();
    let store = CountingStore::new(&conn);

    let pages: Vec<_> = (0..3)
        .map(|index| {
            repo.find_page(&store, "findStaffedByAge", args![10], &by_username_asc(index, 2))
                .unwrap()
        })
        .collect();

    for page in &pages {
        assert_eq!(page.total_elements(), Some(3));
        assert_eq!(page.total_pages(), Some(2));
    }
    assert_eq!(pages[0].number_of_elements(), 2);
    assert!(pages[0].has_next());
    assert_eq!(pages[1].number_of_elements(), 1);
    assert!(!pages[1].has_next());
    assert!(pages[2].content().is_empty());
    assert!(!pages[2].has_next());

    let count = store
        .statements()
        .into_iter()
        .find(|sql| sql.starts_with("SELECT COUNT(*)"))
        .unwrap();
    assert!(count.contains("INNER JOIN"));
    assert!(!count.contains("team.name"));
}

#[test]
fn windowed_page_past_the_end_is_empty() {
    let conn = five_members_aged_ten();
    let repo = member_repository(noop_hook());

    let past = repo
        .find_page(&conn, "findSliceByAge", args![10], &by_username_desc(5, 3))
        .unwrap();
    assert!(past.content().is_empty());
    assert!(!past.has_next());
    assert_eq!(past.total_elements(), None);
}

#[test]
fn ordered_raw_page_accepts_unsorted_requests() {
    let conn = five_members_three_teamed();
    let repo = team_page_repository();

    let page = repo
        .find_page(&conn, "findOrderedRawPage", args![10], &PageRequest::of(0, 2))
        .unwrap();
    let names: Vec<&str> = page
        .content()
        .iter()
        .map(|member| member.username.as_str())
        .collect();
    assert_eq!(names, vec!["member5", "member4"]);
    assert_eq!(page.total_elements(), Some(5));

    let resorted = repo
        .find_page(&conn, "findOrderedRawPage", args![10], &by_username_asc(0, 2))
        .unwrap();
    assert_eq!(resorted.content()[0].username, "member1");

    let unordered = member_repository(noop_hook())
        .find_page(&conn, "findRawPageByAge", args![10], &PageRequest::of(0, 2))
        .unwrap_err();
    assert!(matches!(unordered, RepoError::UnorderedPagination(_)));
}
