use super::{LOG_TARGET, Sources, Subject, rest_task, single};
use crate::Result;
use crate::clone::CloneWorkspace;
use crate::engine::{ChannelKind, Channels, ConnectionPager, GraphPlan, ItemsKey, NextRound, PaginationRule, RuleOutcome, Task};
use crate::graph::{Arg, Field, Query, Selection};
use crate::rest::RestClient;
use crate::tree::TreePath;
use core::fmt::{Display, Formatter};
use ohno::bail;
use serde_json::Value;
use std::sync::Arc;

const ROOT: &str = "repository";

/// Manifests are expensive for the upstream to compute; ask for few at a time.
const MANIFEST_PAGE_SIZE: u32 = 10;

const FEATURE_LABELS: [&str; 4] = ["enhancement", "feature", "feature request", "feature-request"];

const CONTRIBUTING_FILES: [(&str, &str); 3] = [
    ("contributing_md", "CONTRIBUTING.md"),
    ("contributing_txt", "CONTRIBUTING.txt"),
    ("contributing_raw", "CONTRIBUTING"),
];

/// A repository, identified by owner and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    owner: String,
    name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse an `OWNER/NAME` slug.
    pub fn parse(slug: &str) -> Result<Self> {
        let slug = slug.trim().trim_end_matches('/');
        match slug.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name.trim_end_matches(".git")))
            }
            _ => bail!("invalid repository '{slug}', expected OWNER/NAME"),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn queue_rest(&self, channels: &Channels, rest: &Arc<RestClient>) {
        let slug = self.to_string();
        let tasks = [
            rest_task(rest, "contributors", format!("repos/{slug}/contributors?per_page=100&anon=1"), true),
            rest_task(rest, "community_profile", format!("repos/{slug}/community/profile"), false),
            rest_task(rest, "security_advisories", format!("repos/{slug}/security-advisories?per_page=100"), true),
            rest_task(rest, "workflows", format!("repos/{slug}/actions/workflows?per_page=100"), false),
        ];

        for task in tasks {
            let _ = channels.enqueue(ChannelKind::Rest, task);
        }
    }

    fn queue_scrape(&self, channels: &Channels, sources: &Sources) {
        let web = Arc::clone(&sources.web);
        let owner = self.owner.clone();
        let name = self.name.clone();

        let _ = channels.enqueue(
            ChannelKind::Scrape,
            Task::new("dependents", move || async move {
                let count = web.dependents(&owner, &name).await?;
                Ok(single("dependents", count.into()))
            }),
        );
    }

    fn queue_clone(&self, channels: &Channels, sources: &Sources) -> Result<()> {
        let workspace = CloneWorkspace::for_repository(&sources.clone_url, &self.owner, &self.name, sources.git_timeout)?;

        let _ = channels.enqueue(
            ChannelKind::Clone,
            Task::new("commit statistics", move || async move { workspace.commit_stats().await }),
        );
        Ok(())
    }
}

impl Display for Repository {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl Subject for Repository {
    fn base_query(&self) -> Query {
        let mut query = Query::new();
        let _ = query.select([Field::new(ROOT).arg("owner", self.owner.as_str()).arg("name", self.name.as_str())]);
        query
    }

    fn prepare(&self, plan: &mut GraphPlan, channels: &Arc<Channels>, sources: &Sources) -> Result<()> {
        for selection in profile_selections()
            .into_iter()
            .chain(contributing_selections())
            .chain(feature_request_selections())
        {
            let _ = plan.select_at(&[ROOT], selection);
        }

        let _ = plan.paginate(manifests_pager());
        let _ = plan.paginate(pull_requests_pager(sources));
        let _ = plan.paginate(issues_pager(sources));
        let _ = plan.paginate(releases_pager(sources));
        plan.register(owner_discovery(Arc::clone(&sources.rest)));

        self.queue_rest(channels, &sources.rest);
        self.queue_scrape(channels, sources);
        self.queue_clone(channels, sources)?;

        log::debug!(target: LOG_TARGET, "Planned harvest of repository '{self}'");
        Ok(())
    }
}

fn profile_selections() -> Vec<Selection> {
    vec![
        "nameWithOwner".into(),
        "url".into(),
        "createdAt".into(),
        "pushedAt".into(),
        "stargazerCount".into(),
        "forkCount".into(),
        "isArchived".into(),
        "isFork".into(),
        "isSecurityPolicyEnabled".into(),
        Field::new("owner").select(["__typename", "login"]).into(),
        Field::new("fundingLinks").select(["platform", "url"]).into(),
    ]
}

fn contributing_selections() -> Vec<Selection> {
    CONTRIBUTING_FILES
        .iter()
        .map(|(alias, file)| {
            Field::new("object")
                .alias(*alias)
                .arg("expression", format!("HEAD:{file}"))
                .select([Selection::on("Blob", ["oid", "byteSize"])])
                .into()
        })
        .collect()
}

fn feature_request_selections() -> Vec<Selection> {
    let count = |alias: &str, states: &[&str]| -> Selection {
        Field::new("issues")
            .alias(alias)
            .arg("first", 0_u32)
            .arg("states", Arg::List(states.iter().map(|s| Arg::enum_value(*s)).collect()))
            .arg("filterBy", Arg::Object(vec![("labels".to_string(), Arg::from(FEATURE_LABELS.to_vec()))]))
            .select(["totalCount"])
            .into()
    };

    vec![
        count("feature_requests", &["CLOSED", "OPEN"]),
        count("closed_feature_requests", &["CLOSED"]),
    ]
}

fn newest_first() -> Arg {
    Arg::Object(vec![
        ("field".to_string(), Arg::enum_value("CREATED_AT")),
        ("direction".to_string(), Arg::enum_value("DESC")),
    ])
}

fn page_info() -> Selection {
    Field::new("pageInfo").select(["hasNextPage", "endCursor"]).into()
}

fn edges(node: &[&str]) -> Selection {
    Field::new("edges")
        .select([Selection::from("cursor"), Field::new("node").select(node.iter().copied()).into()])
        .into()
}

fn with_since(pager: ConnectionPager, sources: &Sources, field: TreePath) -> ConnectionPager {
    match sources.since {
        Some(cutoff) => pager.since(cutoff, field),
        None => pager,
    }
}

fn manifests_pager() -> ConnectionPager {
    ConnectionPager::new([ROOT, "dependencyGraphManifests"], |after| {
        Field::new("dependencyGraphManifests")
            .arg("first", MANIFEST_PAGE_SIZE)
            .arg("after", after.map(str::to_string))
            .select([Selection::from("totalCount"), page_info(), edges(&["filename", "dependenciesCount"])])
    })
}

fn pull_requests_pager(sources: &Sources) -> ConnectionPager {
    let page_size = sources.page_size;
    let pager = ConnectionPager::new([ROOT, "pullRequests"], move |after| {
        Field::new("pullRequests")
            .arg("first", page_size)
            .arg("states", vec![Arg::enum_value("MERGED")])
            .arg("orderBy", newest_first())
            .arg("after", after.map(str::to_string))
            .select([Selection::from("totalCount"), page_info(), edges(&["mergedAt", "createdAt"])])
    });
    with_since(pager, sources, TreePath::keys(["node", "createdAt"]))
}

fn issues_pager(sources: &Sources) -> ConnectionPager {
    let page_size = sources.page_size;
    let pager = ConnectionPager::new([ROOT, "issues"], move |after| {
        Field::new("issues")
            .arg("first", page_size)
            .arg("orderBy", newest_first())
            .arg("after", after.map(str::to_string))
            .select([Selection::from("totalCount"), page_info(), edges(&["createdAt", "closedAt", "state"])])
    });
    with_since(pager, sources, TreePath::keys(["node", "createdAt"]))
}

fn releases_pager(sources: &Sources) -> ConnectionPager {
    let page_size = sources.page_size;
    let pager = ConnectionPager::new([ROOT, "releases"], move |after| {
        Field::new("releases")
            .arg("first", page_size)
            .arg("orderBy", newest_first())
            .arg("after", after.map(str::to_string))
            .select([
                Selection::from("totalCount"),
                page_info(),
                Field::new("nodes")
                    .select(["tagName", "createdAt", "publishedAt", "isPrerelease"])
                    .into(),
            ])
    })
    .items(ItemsKey::Nodes);
    with_since(pager, sources, TreePath::keys(["createdAt"]))
}

/// Once the first page names the owner, fetch its REST profile.
fn owner_discovery(rest: Arc<RestClient>) -> impl PaginationRule {
    move |tree: &Value| {
        let owner = TreePath::keys([ROOT, "owner"]).lookup(tree);
        let kind = owner.and_then(|o| o.get("__typename")).and_then(Value::as_str);
        let login = owner.and_then(|o| o.get("login")).and_then(Value::as_str);

        let path = match (kind, login) {
            (Some("Organization"), Some(login)) => format!("orgs/{login}"),
            (Some(_), Some(login)) => format!("users/{login}"),
            _ => {
                log::debug!(target: LOG_TARGET, "Repository owner not found on the first page");
                return RuleOutcome::Finished;
            }
        };

        log::debug!(target: LOG_TARGET, "Discovered repository owner, queuing '{path}'");
        RuleOutcome::Continue(Box::new(move |next: &mut NextRound<'_>| {
            let _ = next.enqueue(ChannelKind::Rest, rest_task(&rest, "owner_profile", path, false));
        }))
    }
}
