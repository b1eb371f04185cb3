use super::{LOG_TARGET, Sources, Subject, organizations_pager, sponsorable_fragment};
use crate::Result;
use crate::engine::{Channels, GraphPlan};
use crate::graph::{Field, Query};
use core::fmt::{Display, Formatter};
use ohno::bail;
use regex::Regex;
use std::sync::{Arc, LazyLock};

static ALIAS_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\[\-\]]").expect("invalid regex"));

/// Response key of the sub-query for `login`.
///
/// Logins such as `dependabot[bot]` or `some-user` contain characters an alias
/// cannot, and logins may start with a digit, hence the prefix.
#[must_use]
pub fn user_alias(login: &str) -> String {
    format!("user_{}", ALIAS_REGEX.replace_all(login, "_"))
}

/// Many users in a single graph query, one aliased sub-query each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiUser {
    logins: Vec<String>,
}

impl MultiUser {
    /// Duplicate logins are dropped, keeping first-seen order.
    pub fn new<I, S>(logins: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for login in logins {
            let login = login.into();
            if !unique.iter().any(|l| user_alias(l) == user_alias(&login)) {
                unique.push(login);
            }
        }

        if unique.is_empty() {
            bail!("at least one user login is required");
        }

        Ok(Self { logins: unique })
    }

    #[must_use]
    pub fn logins(&self) -> &[String] {
        &self.logins
    }
}

impl Display for MultiUser {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} user(s)", self.logins.len())
    }
}

impl Subject for MultiUser {
    fn base_query(&self) -> Query {
        let mut query = Query::new();
        let _ = query.select(
            self.logins
                .iter()
                .map(|login| Field::new("user").alias(user_alias(login)).arg("login", login.as_str())),
        );
        query
    }

    fn prepare(&self, plan: &mut GraphPlan, _channels: &Arc<Channels>, _sources: &Sources) -> Result<()> {
        for login in &self.logins {
            let alias = user_alias(login);
            let _ = plan.select_at(&[alias.as_str()], "login");
            let _ = plan.select_at(&[alias.as_str()], sponsorable_fragment());
            let _ = plan.paginate(organizations_pager(&alias));
        }

        log::debug!(target: LOG_TARGET, "Planned harvest of {self}");
        Ok(())
    }
}
