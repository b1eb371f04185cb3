use super::{LOG_TARGET, Sources, Subject, rest_task};
use crate::Result;
use crate::engine::{ChannelKind, Channels, ConnectionPager, GraphPlan, ItemsKey};
use crate::graph::{Arg, Field, Query, Selection};
use core::fmt::Formatter;
use std::sync::Arc;
use strum::{Display, IntoStaticStr};

/// Organizations are listed in pages of this size.
const ORGANIZATIONS_PAGE_SIZE: u32 = 100;

/// The graph entry point an owner is looked up through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum OwnerKind {
    User,
    Organization,
    /// Either a user or an organization; the first page tells which.
    RepositoryOwner,
}

/// A user, an organization, or whichever of the two owns repositories under a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    kind: OwnerKind,
    login: String,
}

impl Owner {
    pub fn new(kind: OwnerKind, login: impl Into<String>) -> Self {
        Self {
            kind,
            login: login.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> OwnerKind {
        self.kind
    }

    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    fn root(&self) -> &'static str {
        self.kind.into()
    }

    fn profile_selections(&self) -> Vec<Selection> {
        let specific: Vec<Selection> = match self.kind {
            OwnerKind::User => vec![
                "name".into(),
                "createdAt".into(),
                "company".into(),
                "location".into(),
                Field::new("followers").arg("first", 0_u32).select(["totalCount"]).into(),
            ],
            OwnerKind::Organization => vec![
                "name".into(),
                "createdAt".into(),
                "email".into(),
                "location".into(),
                Field::new("membersWithRole").arg("first", 0_u32).select(["totalCount"]).into(),
            ],
            OwnerKind::RepositoryOwner => vec![
                "__typename".into(),
                Selection::on("User", ["name", "createdAt"]),
                Selection::on("Organization", ["name", "createdAt"]),
            ],
        };

        let mut selections: Vec<Selection> = vec!["login".into(), "url".into(), sponsorable_fragment()];
        selections.extend(specific);
        selections
    }
}

impl core::fmt::Display for Owner {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} '{}'", self.kind, self.login)
    }
}

impl Subject for Owner {
    fn base_query(&self) -> Query {
        let mut query = Query::new();
        let _ = query.select([Field::new(self.root()).arg("login", self.login.as_str())]);
        query
    }

    fn prepare(&self, plan: &mut GraphPlan, channels: &Arc<Channels>, sources: &Sources) -> Result<()> {
        let root = self.root();
        for selection in self.profile_selections() {
            let _ = plan.select_at(&[root], selection);
        }

        if self.kind == OwnerKind::User {
            let _ = plan.paginate(organizations_pager(root));
        }
        let _ = plan.paginate(repositories_pager(root, sources.page_size));

        // The REST user endpoint serves organizations too
        let _ = channels.enqueue(
            ChannelKind::Rest,
            rest_task(&sources.rest, "profile", format!("users/{}", self.login), false),
        );

        log::debug!(target: LOG_TARGET, "Planned harvest of {self}");
        Ok(())
    }
}

/// `... on Sponsorable { hasSponsorsListing sponsors(first: 0) { totalCount } }`
#[must_use]
pub fn sponsorable_fragment() -> Selection {
    Selection::on(
        "Sponsorable",
        [
            Selection::from("hasSponsorsListing"),
            Field::new("sponsors").arg("first", 0_u32).select(["totalCount"]).into(),
        ],
    )
}

/// Pager over the organizations of the user found under response key `root`.
#[must_use]
pub fn organizations_pager(root: &str) -> ConnectionPager {
    ConnectionPager::new([root, "organizations"], |after| {
        Field::new("organizations")
            .arg("first", ORGANIZATIONS_PAGE_SIZE)
            .arg("after", after.map(str::to_string))
            .select([
                Selection::from(Field::new("pageInfo").select(["hasNextPage", "endCursor"])),
                Field::new("nodes").select(["email", "name", "login"]).into(),
            ])
    })
    .items(ItemsKey::Nodes)
}

fn repositories_pager(root: &str, page_size: u32) -> ConnectionPager {
    ConnectionPager::new([root, "repositories"], move |after| {
        Field::new("repositories")
            .arg("first", page_size)
            .arg("ownerAffiliations", vec![Arg::enum_value("OWNER")])
            .arg("after", after.map(str::to_string))
            .select([
                Selection::from("totalCount"),
                Field::new("pageInfo").select(["hasNextPage", "endCursor"]).into(),
                Field::new("nodes")
                    .select(["nameWithOwner", "createdAt", "pushedAt", "stargazerCount", "forkCount", "isFork", "isArchived"])
                    .into(),
            ])
    })
    .items(ItemsKey::Nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PaginationRule, RuleOutcome};
    use crate::subjects::tests::test_sources;
    use serde_json::json;

    #[test]
    fn root_names() {
        assert_eq!(Owner::new(OwnerKind::User, "x").root(), "user");
        assert_eq!(Owner::new(OwnerKind::Organization, "x").root(), "organization");
        assert_eq!(Owner::new(OwnerKind::RepositoryOwner, "x").root(), "repositoryOwner");
    }

    #[tokio::test]
    async fn user_plan_has_sponsors_and_organizations() {
        let user = Owner::new(OwnerKind::User, "octocat");
        let mut plan = GraphPlan::new(user.base_query());
        let channels = Arc::new(Channels::new());

        user.prepare(&mut plan, &channels, &test_sources(None)).unwrap();

        assert_eq!(plan.rule_count(), 2);
        assert_eq!(channels.counts(ChannelKind::Rest), (1, 0));

        let rendered = plan.query().render();
        assert!(rendered.starts_with(r#"query { user(login: "octocat") { login url ... on Sponsorable { hasSponsorsListing sponsors(first: 0) { totalCount } }"#));
        assert!(rendered.contains("organizations(first: 100, after: null) { pageInfo { hasNextPage endCursor } nodes { email name login } }"));
        assert!(rendered.contains("repositories(first: 100, ownerAffiliations: [OWNER], after: null)"));
    }

    #[tokio::test]
    async fn organization_plan_has_no_organizations_pager() {
        let org = Owner::new(OwnerKind::Organization, "acme");
        let mut plan = GraphPlan::new(org.base_query());
        org.prepare(&mut plan, &Arc::new(Channels::new()), &test_sources(None)).unwrap();

        assert_eq!(plan.rule_count(), 1);
        assert!(plan.query().render().contains("membersWithRole(first: 0) { totalCount }"));
    }

    #[test]
    fn organizations_pager_follows_page_info() {
        let tree = json!({ "user": { "organizations": {
            "pageInfo": { "hasNextPage": true, "endCursor": "Y3Vyc29yOjE=" },
            "nodes": [ { "login": "a" }, { "login": "b" } ]
        } } });

        let rule: Box<dyn PaginationRule> = Box::new(organizations_pager("user"));
        let actions = rule.evaluate(&tree).into_actions();
        assert_eq!(actions.len(), 1);

        let tree = json!({ "user": { "organizations": {
            "pageInfo": { "hasNextPage": false, "endCursor": null },
            "nodes": [ { "login": "a" } ]
        } } });
        let rule: Box<dyn PaginationRule> = Box::new(organizations_pager("user"));
        assert!(matches!(rule.evaluate(&tree), RuleOutcome::Finished));
    }
}
