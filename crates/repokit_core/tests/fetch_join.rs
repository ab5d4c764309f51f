mod common;

use common::{member_repository, noop_hook, open, seed_team, CountingStore, Member, Team};
use repokit_core::{
    args, Declaration, FetchDirective, JoinKind, ParseError, RepoError, Related, Repository,
    Value,
};

fn seed_members_with_teams(conn: &rusqlite::Connection) -> (i64, i64) {
    let repo = member_repository(noop_hook());
    let team_a = seed_team(conn, "teamA");
    let team_b = seed_team(conn, "teamB");
    repo.save(conn, &Member::with_team("member1", 10, team_a))
        .unwrap();
    repo.save(conn, &Member::with_team("member2", 20, team_b))
        .unwrap();
    repo.save(conn, &Member::new("loner", 30)).unwrap();
    (team_a, team_b)
}

#[test]
fn fetch_join_populates_associations_in_one_statement() {
    let conn = open();
    seed_members_with_teams(&conn);
    let repo = member_repository(noop_hook());
    let store = CountingStore::new(&conn);

    let mut members = repo.find_all(&store).unwrap();
    members.sort_by_key(|member| member.id);

    assert_eq!(store.count(), 1);
    assert!(store.statements()[0].contains("LEFT JOIN \"team\" t1"));
    assert_eq!(members.len(), 3);
    assert_eq!(
        members[0].team.get().map(|team| team.name.as_str()),
        Some("teamA")
    );
    assert_eq!(
        members[1].team.get().map(|team| team.name.as_str()),
        Some("teamB")
    );
    assert_eq!(members[2].team, Related::Loaded(None));
}

#[test]
fn entity_graph_style_fetch_on_derived_predicate() {
    let conn = open();
    let (team_a, _) = seed_members_with_teams(&conn);
    let repo = member_repository(noop_hook());
    let store = CountingStore::new(&conn);

    let members = repo
        .find_list(&store, "findEntityGraphByUsername", args!["member1"])
        .unwrap();
    assert_eq!(store.count(), 1);
    assert_eq!(
        members[0].team,
        Related::Loaded(Some(Team {
            id: Some(team_a),
            name: "teamA".to_string()
        }))
    );

    let fetched = repo
        .find_list(&store, "findMemberFetchJoin", args![])
        .unwrap();
    assert_eq!(fetched.len(), 3);
    assert!(fetched.iter().all(|member| member.team.is_loaded()));
}

#[test]
fn associations_stay_unresolved_without_a_directive() {
    let conn = open();
    let (team_a, _) = seed_members_with_teams(&conn);
    let repo = member_repository(noop_hook());

    let members = repo
        .find_list(&conn, "findLazyByUsername", args!["member1"])
        .unwrap();
    assert_eq!(members[0].team, Related::Unresolved(Value::Integer(team_a)));
    assert!(members[0].team.get().is_none());
}

#[test]
fn inner_join_drops_members_without_a_team() {
    let conn = open();
    seed_members_with_teams(&conn);
    let repo: Repository<Member> = Repository::builder(common::registry(), noop_hook())
        .declare(
            Declaration::derived("findAllTeamed")
                .fetch(FetchDirective::new().join("team", JoinKind::Inner)),
        )
        .build()
        .unwrap();

    let members = repo.find_list(&conn, "findAllTeamed", args![]).unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|member| member.team.get().is_some()));
}

#[test]
fn unknown_association_fails_at_build() {
    let err = Repository::<Member>::builder(common::registry(), noop_hook())
        .declare(Declaration::derived("findAll").fetch(FetchDirective::left(["owner"])))
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        RepoError::Parse(ParseError::UnknownAssociation { .. })
    ));
}
