use serde::{Deserialize, Serialize};

/// RouteType
///
/// Closed set of route kinds. Deserializes from the lowercase wire values used by the route
/// JSON schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Service,
    Read,
    Create,
    Update,
    Delete,
    Transaction,
}

impl RouteType {
    /// `select` | `insert` | `update` | `delete` | `service` — the `request_kind` segment used
    /// to locate the authorization SQL file, for route types where it is determined purely by
    /// route type rather than by the incoming HTTP method (i.e. `service`).
    pub fn service_request_kind(self) -> Option<&'static str> {
        matches!(self, RouteType::Service).then_some("service")
    }
}

/// Route
///
/// One entry of a `RouteTable`. Field names use `PascalCase` on the wire to match the existing
/// route JSON schema, except the acronym-bearing fields (`URLScheme`, `ServiceURL`), which
/// `rename_all` would otherwise mangle to `UrlScheme`/`ServiceUrl` — those carry an explicit
/// `#[serde(rename = "...")]` instead. `query_params` is the flat alternating
/// `[name, regex, name, regex, ...]` sequence, not a sequence of `{name, regex}` objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Route {
    pub name: String,
    pub r#type: RouteType,
    #[serde(rename = "URLScheme", default)]
    pub url_scheme: String,
    #[serde(default)]
    pub query_params: Vec<String>,
    #[serde(rename = "ServiceURL", default)]
    pub service_url: String,
    #[serde(default)]
    pub description: String,
}

impl Route {
    /// Returns the `{var}` placeholder names in `url_scheme`, left to right. axum 0.8's own
    /// `{name}` path syntax is already single-segment and non-greedy, so this is a plain
    /// bracket scan rather than a regex.
    pub fn path_vars(&self) -> Vec<String> {
        path_vars(&self.url_scheme)
    }
}

pub fn path_vars(url_scheme: &str) -> Vec<String> {
    let mut vars = Vec::new();
    let mut chars = url_scheme.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c == '{' {
            let mut end = start + 1;
            for (i, c2) in chars.by_ref() {
                if c2 == '}' {
                    end = i;
                    break;
                }
            }
            vars.push(url_scheme[start + 1..end].to_string());
        }
    }
    vars
}

/// RouteTable
///
/// Ordered, immutable once installed. Cheap to clone (just an `Arc`-free `Vec` clone) because
/// admin reloads replace the whole table rather than mutate it in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteTable {
    pub routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        if bytes.is_empty() {
            return Ok(RouteTable::default());
        }
        let routes: Vec<Route> = serde_json::from_slice(bytes)?;
        Ok(RouteTable { routes })
    }

    /// Finds the sibling `read` route sharing `name` with a mutating route — used by the
    /// write-then-read chain to discover the response-shaping query.
    pub fn sibling_read(&self, name: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| r.name == name && r.r#type == RouteType::Read)
    }

    pub fn by_name(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name == name)
    }
}
