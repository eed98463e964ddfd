/// Mount template for the LFS routes, e.g. `/api/projects/:project/lfs`.
///
/// The `:project` placeholder selects the project identifier from the
/// request path; the same template renders concrete broker links (self and
/// verify hrefs) for a resolved project.
#[derive(Debug, Clone)]
pub struct ServerPath {
    template: String,
}

impl ServerPath {
    pub fn new(template: &str) -> Result<Self, String> {
        if !template.starts_with('/') {
            return Err("server path template must start with '/'".into());
        }
        if !template.contains(":project") {
            return Err("server path template must contain :project".into());
        }
        Ok(Self {
            template: template.trim_end_matches('/').to_string(),
        })
    }

    /// Template in axum route syntax, for router registration.
    pub fn route_prefix(&self) -> String {
        self.template.replace(":project", "{project}")
    }

    /// Template with the placeholder substituted, for rendering links.
    pub fn render(&self, project: &str) -> String {
        self.template.replace(":project", project)
    }
}
