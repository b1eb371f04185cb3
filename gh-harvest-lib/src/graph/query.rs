use core::fmt::{Display, Formatter, Write};

/// A GraphQL argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// An enum literal such as `MERGED`, rendered without quotes.
    Enum(String),
    List(Vec<Self>),
    Object(Vec<(String, Self)>),
}

impl Arg {
    pub fn enum_value(value: impl Into<String>) -> Self {
        Self::Enum(value.into())
    }
}

impl Display for Arg {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            // JSON string escaping is valid GraphQL string escaping
            Self::Str(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
            Self::Enum(e) => f.write_str(e),
            Self::List(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char(']')
            }
            Self::Object(fields) => {
                f.write_char('{')?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_char('}')
            }
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Arg {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

/// One entry in a selection set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Field(Field),
    InlineFragment { on: String, selections: Vec<Self> },
}

impl Selection {
    /// An inline fragment `... on <type> { ... }`.
    pub fn on<I>(type_name: impl Into<String>, selections: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Self>,
    {
        Self::InlineFragment {
            on: type_name.into(),
            selections: selections.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Self::Field(field)
    }
}

impl From<&str> for Selection {
    fn from(name: &str) -> Self {
        Self::Field(Field::new(name))
    }
}

/// A field with optional alias, arguments, and sub-selections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    alias: Option<String>,
    args: Vec<(String, Arg)>,
    selections: Vec<Selection>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            selections: Vec::new(),
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set an argument, replacing any earlier value of the same name.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        set_arg(&mut self.args, name.into(), value.into());
        self
    }

    /// Add sub-selections, merging with existing ones that share a response key.
    #[must_use]
    pub fn select<I>(mut self, selections: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Selection>,
    {
        for selection in selections {
            merge_selection(&mut self.selections, selection.into());
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key under which this field appears in the response: its alias, or its name.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn get_arg(&self, name: &str) -> Option<&Arg> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn merge(&mut self, other: Self) {
        for (name, value) in other.args {
            set_arg(&mut self.args, name, value);
        }
        for selection in other.selections {
            merge_selection(&mut self.selections, selection);
        }
    }

    fn child_mut(&mut self, response_key: &str) -> Option<&mut Self> {
        self.selections.iter_mut().find_map(|s| match s {
            Selection::Field(f) if f.response_key() == response_key => Some(f),
            _ => None,
        })
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{alias}: ")?;
        }
        f.write_str(&self.name)?;

        if !self.args.is_empty() {
            f.write_char('(')?;
            for (i, (name, value)) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name}: {value}")?;
            }
            f.write_char(')')?;
        }

        write!(f, "{}", Selections(&self.selections))
    }
}

fn set_arg(args: &mut Vec<(String, Arg)>, name: String, value: Arg) {
    match args.iter_mut().find(|(n, _)| *n == name) {
        Some((_, existing)) => *existing = value,
        None => args.push((name, value)),
    }
}

fn merge_selection(selections: &mut Vec<Selection>, incoming: Selection) {
    match incoming {
        Selection::Field(field) => {
            let existing = selections.iter_mut().find_map(|s| match s {
                Selection::Field(f) if f.response_key() == field.response_key() => Some(f),
                _ => None,
            });
            match existing {
                Some(existing) => existing.merge(field),
                None => selections.push(Selection::Field(field)),
            }
        }
        Selection::InlineFragment { on, selections: incoming } => {
            let existing = selections.iter_mut().find_map(|s| match s {
                Selection::InlineFragment { on: o, selections } if *o == on => Some(selections),
                _ => None,
            });
            match existing {
                Some(existing) => {
                    for selection in incoming {
                        merge_selection(existing, selection);
                    }
                }
                None => selections.push(Selection::InlineFragment { on, selections: incoming }),
            }
        }
    }
}

/// A selection set, rendered as ` { a b ... on T { c } }`. Empty sets render as nothing.
struct Selections<'a>(&'a [Selection]);

impl Display for Selections<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }

        f.write_str(" {")?;
        for selection in self.0 {
            match selection {
                Selection::Field(field) => write!(f, " {field}")?,
                Selection::InlineFragment { on, selections } => write!(f, " ... on {on}{}", Selections(selections))?,
            }
        }
        f.write_str(" }")
    }
}

/// A GraphQL query document under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    roots: Vec<Selection>,
}

impl Query {
    #[must_use]
    pub const fn new() -> Self {
        Self { roots: Vec::new() }
    }

    /// Add root fields, merging with roots that share a response key.
    pub fn select<I>(&mut self, selections: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Selection>,
    {
        for selection in selections {
            merge_selection(&mut self.roots, selection.into());
        }
        self
    }

    /// Add `selection` beneath the field reached by following `path` (response keys).
    ///
    /// Returns `false` when some step of the path is not part of the query.
    pub fn select_at(&mut self, path: &[&str], selection: impl Into<Selection>) -> bool {
        let Some((first, rest)) = path.split_first() else {
            merge_selection(&mut self.roots, selection.into());
            return true;
        };

        let root = self.roots.iter_mut().find_map(|s| match s {
            Selection::Field(f) if f.response_key() == *first => Some(f),
            _ => None,
        });

        let Some(mut field) = root else {
            return false;
        };

        for key in rest {
            match field.child_mut(key) {
                Some(child) => field = child,
                None => return false,
            }
        }

        merge_selection(&mut field.selections, selection.into());
        true
    }

    /// Whether the query selects nothing.
    ///
    /// Root fields are object entry points (`repository(...)`, `user(...)`), so a
    /// root with no sub-selections contributes nothing to the document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.iter().all(|root| match root {
            Selection::Field(field) => field.selections.is_empty(),
            Selection::InlineFragment { selections, .. } => selections.is_empty(),
        })
    }

    /// Drop root fields that select nothing, e.g. the user entry points of a
    /// multi-user round in which only some users still have pages left.
    pub fn prune(&mut self) {
        self.roots.retain(|root| match root {
            Selection::Field(field) => !field.selections.is_empty(),
            Selection::InlineFragment { selections, .. } => !selections.is_empty(),
        });
    }

    #[must_use]
    pub fn roots(&self) -> &[Selection] {
        &self.roots
    }

    /// Render the GraphQL document.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "query{}", Selections(&self.roots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fields_args_and_aliases() {
        let mut query = Query::new();
        let _ = query.select([Field::new("repository").arg("owner", "acme").arg("name", "widget").select([
            Selection::from("name"),
            Field::new("pullRequests")
                .arg("first", 100_u32)
                .arg("states", Arg::enum_value("MERGED"))
                .select(["totalCount"])
                .into(),
            Field::new("object").alias("contributing_md").arg("expression", "HEAD:CONTRIBUTING.md").into(),
        ])]);

        assert_eq!(
            query.render(),
            "query { repository(owner: \"acme\", name: \"widget\") { name pullRequests(first: 100, states: MERGED) { totalCount } contributing_md: object(expression: \"HEAD:CONTRIBUTING.md\") } }"
        );
    }

    #[test]
    fn strings_are_escaped() {
        let mut query = Query::new();
        let _ = query.select([Field::new("user").arg("login", "a\"b\\c")]);
        assert_eq!(query.render(), r#"query { user(login: "a\"b\\c") }"#);
    }

    #[test]
    fn inline_fragments_and_lists() {
        let mut query = Query::new();
        let _ = query.select([Field::new("user")
            .arg("login", "x")
            .select([Selection::on("Sponsorable", ["hasSponsorsListing"])])
            .select([Field::new("issues").arg("labels", vec!["feature", "enhancement"])])]);

        assert_eq!(
            query.render(),
            "query { user(login: \"x\") { ... on Sponsorable { hasSponsorsListing } issues(labels: [\"feature\", \"enhancement\"]) } }"
        );
    }

    #[test]
    fn same_response_key_merges() {
        let mut query = Query::new();
        let _ = query.select([Field::new("repository").select(["name"])]);
        let _ = query.select([Field::new("repository").select(["url"])]);
        assert_eq!(query.roots().len(), 1);
        assert_eq!(query.render(), "query { repository { name url } }");
    }

    #[test]
    fn later_args_replace_earlier() {
        let field = Field::new("issues").arg("first", 100_u32).arg("first", 50_u32);
        assert_eq!(field.get_arg("first"), Some(&Arg::Int(50)));
    }

    #[test]
    fn select_at_nests_under_existing_fields() {
        let mut query = Query::new();
        let _ = query.select([Field::new("repository").arg("owner", "a").select([Field::new("refs")])]);

        assert!(query.select_at(&["repository", "refs"], Field::new("totalCount")));
        assert!(!query.select_at(&["repository", "missing"], Field::new("x")));
        assert!(!query.select_at(&["user"], Field::new("x")));
        assert_eq!(query.render(), "query { repository(owner: \"a\") { refs { totalCount } } }");
    }

    #[test]
    fn empty_query() {
        let mut query = Query::new();
        assert!(query.is_empty());
        assert_eq!(query.render(), "query");

        let _ = query.select([Field::new("repository").arg("owner", "a").arg("name", "b")]);
        assert!(query.is_empty());

        assert!(query.select_at(&["repository"], Field::new("name")));
        assert!(!query.is_empty());
    }

    #[test]
    fn prune_drops_bare_roots() {
        let mut query = Query::new();
        let _ = query.select([
            Field::new("user").alias("user_a").arg("login", "a"),
            Field::new("user").alias("user_b").arg("login", "b").select(["name"]),
        ]);

        query.prune();
        assert_eq!(query.render(), "query { user_b: user(login: \"b\") { name } }");
    }

    #[test]
    fn fields_and_args_display_on_their_own() {
        let field = Field::new("issues")
            .alias("open")
            .arg("filterBy", Arg::Object(vec![("states".to_string(), vec![Arg::enum_value("OPEN")].into())]))
            .select(["totalCount"]);
        assert_eq!(field.to_string(), "open: issues(filterBy: {states: [OPEN]}) { totalCount }");
        assert_eq!(Arg::from(vec![1_i64, 2]).to_string(), "[1, 2]");
        assert_eq!(format!("{}", Query::new()), "query");
    }

    #[test]
    fn optional_args_render_null() {
        let field = Field::new("pullRequests").arg("after", None::<String>);
        let mut query = Query::new();
        let _ = query.select([field]);
        assert_eq!(query.render(), "query { pullRequests(after: null) }");
    }
}
